//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN: INT. SERVER ROOM, 3:47 AM
//!
//! A spreadsheet with forty thousand rows has been parsed, tagged, and batched. All
//! that is left is to hand it to a cluster. The cluster is yellow. The cluster is
//! always yellow. Nobody remembers why.
//!
//! This module turns one committed batch into one `_bulk` request made of `create`
//! actions, and treats a per-item failure inside a 200 response as the failure it is.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

mod elasticsearch_document_store;

pub use elasticsearch_document_store::{ElasticsearchDocumentStore, ElasticsearchDocumentStoreConfig};
