//! # Previously, on Rowlift...
//!
//! 🎬 The bytes had nowhere to go. No bucket. No broker. No cluster. Just a laptop,
//! a test suite, and a dream. Someone had to write backends so simple they live
//! entirely in RAM, gone the moment the process blinks.
//!
//! `in_mem` provides one of each: a [`BlobStore`](super::BlobStore) that is a
//! `HashMap`, a [`JobQueue`](super::JobQueue) that is a channel with a memory for
//! unacknowledged messages, and a [`DocumentStore`](super::DocumentStore) that is a
//! `Vec` of batches. All three are `Clone`, and clones share state, so tests can hand
//! one copy to the pipeline and keep another to peek at.
//!
//! 🦆
//!
//! ⚠️ Not for production. The queue does redeliver like a real one, but a restart
//! forgets everything. That is the whole point, and also the whole problem.

mod in_mem_blob_store;
mod in_mem_document_store;
mod in_mem_job_queue;

pub use in_mem_blob_store::InMemoryBlobStore;
pub use in_mem_document_store::InMemoryDocumentStore;
pub use in_mem_job_queue::{InMemoryJobQueue, InMemoryJobQueueConfig};
