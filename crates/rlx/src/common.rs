//! 📦 Common data structures: the building blocks of rowlift.
//!
//! 🎬 COLD OPEN: INT. UPLOAD FORM, 4:12 PM ON A FRIDAY
//!
//! Someone, somewhere, clicks "Upload" on a spreadsheet named `final_FINAL_v3.csv`.
//! They do not know about queues. They do not know about blobs. They want a job id
//! and they want to go home. This module gives that job id a shape, and gives every
//! row in that file a place to live afterwards.
//!
//! 🦆
//!
//! Nothing in here does I/O. These are the nouns. The verbs live in `producer`,
//! `consumer` and `backends`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// 🏷️ The field every committed row carries back to its job. Not lower-cased, on purpose:
/// header keys are always lower-cased, so `jobId` can never collide with a column.
pub const JOB_ID_FIELD: &str = "jobId";

/// 🏷️ Metadata key for the event type tag on every job message.
pub const EVENT_TYPE_KEY: &str = "eventType";

/// 🏷️ The event type the producer stamps on uploads unless configured otherwise.
pub const DEFAULT_EVENT_TYPE: &str = "file.upload";

/// 🪪 A job identifier. A v4 UUID wearing a name tag.
///
/// The hyphenated lowercase form is used everywhere: as the blob key, as the
/// queue message body, and as the `jobId` field on every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// 🎲 Mint a fresh one. Collisions are theoretically possible and practically a lottery win.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// 📄 One submitted file, as the producer saw it at submit time.
///
/// Read-only after creation. Nobody in this crate deletes jobs; cleanup belongs
/// to whoever owns the bucket lifecycle rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: JobId,
    /// 🔑 Always equal to `id.to_string()`. Kept separate so the blob store never has to know about UUIDs.
    pub blob_key: String,
    pub size: u64,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, size: u64) -> Self {
        Self {
            id,
            blob_key: id.to_string(),
            size,
            submitted_at: Utc::now(),
        }
    }
}

/// ✉️ The unit carried on the job queue: a body (the job id) plus string metadata.
///
/// Metadata carries the event type tag and the W3C trace context, so a job's
/// trace survives the trip across the queue boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub body: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl JobMessage {
    pub fn new(body: impl Into<String>, metadata: HashMap<String, String>) -> Self {
        Self {
            body: body.into(),
            metadata,
        }
    }

    /// 🏷️ The `eventType` tag, if the sender bothered to set one.
    pub fn event_type(&self) -> Option<&str> {
        self.metadata.get(EVENT_TYPE_KEY).map(String::as_str)
    }
}

/// 📬 One delivery of a [`JobMessage`].
///
/// The same message can be delivered many times (at-least-once, remember). Each
/// delivery gets its own `delivery_id`, and acknowledgment is per delivery: acking
/// a stale delivery after the queue already handed the message to someone else is
/// a no-op, not a double-ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_id: String,
    pub message: JobMessage,
    /// 🔄 1 on first delivery, +1 per redelivery.
    pub attempt: u32,
}

/// 🧾 One parsed data line, keyed by normalized header names.
///
/// An ordered map with string keys and string values. Order is the header order
/// (with `jobId` first once the consumer stamps it), which keeps committed documents
/// readable. Inserting a key that already exists replaces the value in place: a
/// header that repeats a column name keeps the last column's value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowRecord {
    fields: Vec<(String, String)>,
}

impl RowRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// ➕ Insert or replace a field. Returns the previous value when replacing.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.fields.push((key, value));
                None
            }
        }
    }

    /// 🏷️ Stamp the job id onto the record, in front of every column.
    pub fn tag_job(&mut self, job_id: &JobId) {
        let value = job_id.to_string();
        match self.fields.iter_mut().find(|(k, _)| k == JOB_ID_FIELD) {
            Some((_, existing)) => *existing = value,
            None => self.fields.insert(0, (JOB_ID_FIELD.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// -- 🎯 hand-rolled so the JSON object comes out in insertion order, no map re-sorting
impl Serialize for RowRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RowRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = RowRecord::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// 📨 One upload request, stripped of whatever transport delivered it.
///
/// `file` is `None` when the request arrived without a file part. `declared_size`
/// is what the client claimed; the receipt also reports what we actually read.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub method: String,
    pub file_name: Option<String>,
    pub declared_size: Option<u64>,
    pub file: Option<Vec<u8>>,
}

impl Upload {
    /// 📮 A well-behaved POST with a file attached. What every client should send.
    pub fn post(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            method: "POST".to_string(),
            file_name: Some(file_name.into()),
            declared_size: Some(bytes.len() as u64),
            file: Some(bytes),
        }
    }
}

/// 🧾 What the caller gets back from a successful submit: `{jobId, totalRead, size}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    #[serde(rename = "jobId")]
    pub job_id: JobId,
    #[serde(rename = "totalRead")]
    pub total_read: u64,
    pub size: u64,
}
