//! 📂 Previously, on "Things That Could Go Wrong With A Directory"...
//!
//! The disk was quiet. Too quiet. Three processes shared it: one writing uploads, one
//! reading them back, and one appending rows to a file that only ever got longer.
//! Nobody had a broker. Nobody had a cluster. Everybody had `rename(2)`.
//!
//! This module is the single-box deployment story:
//!
//! - 🪣 [`DirectoryBlobStore`]: one file per key, written to a temp name and renamed
//!   into place so readers never see half an upload.
//! - ✉️ [`SpoolJobQueue`]: a spool directory with `pending/` and `inflight/`. Claiming a
//!   message is a rename, acknowledging it is a delete, and a claim that sits too long
//!   gets renamed back. Works across processes, survives restarts.
//! - 🗄️ [`NdjsonDocumentStore`]: every batch appended to one NDJSON file in a single write.
//!
//! 💀 Disk full: your problem now.
//! 🦆 (mandatory, no notes)

mod directory_blob_store;
mod ndjson_document_store;
mod spool_job_queue;

pub use directory_blob_store::{DirectoryBlobStore, DirectoryBlobStoreConfig};
pub use ndjson_document_store::{NdjsonDocumentStore, NdjsonDocumentStoreConfig};
pub use spool_job_queue::{SpoolJobQueue, SpoolJobQueueConfig};
