//! 📊 metrics.rs: "How many files did we actually ingest?" A question asked by every
//! on-call engineer, usually right after someone says "it's fine, the queue is empty".
//!
//! Plain atomic counters, shared by the producer and the consumer through an `Arc`.
//! No exporter, no scrape endpoint. The CLI renders a summary table at exit.
//!
//! 🦆 The duck counts too. It just doesn't tell anyone.

use std::sync::atomic::{AtomicU64, Ordering};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};

// -- 📏 one mebibyte. not a megabyte. there's a difference and I will die on this hill.
const MIB: u64 = 1024 * 1024;

/// 🔢 Pipeline counters. Every method takes `&self`; increments are relaxed.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    files_uploaded: AtomicU64,
    bytes_uploaded: AtomicU64,
    submits_rejected: AtomicU64,
    files_processed: AtomicU64,
    lines_processed: AtomicU64,
    parse_errors: AtomicU64,
    jobs_acknowledged: AtomicU64,
    jobs_deferred: AtomicU64,
    jobs_failed: AtomicU64,
}

/// 📸 A point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub files_uploaded: u64,
    pub bytes_uploaded: u64,
    pub submits_rejected: u64,
    pub files_processed: u64,
    pub lines_processed: u64,
    pub parse_errors: u64,
    pub jobs_acknowledged: u64,
    pub jobs_deferred: u64,
    pub jobs_failed: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📤 One file made it into the blob store.
    pub fn record_upload(&self, bytes: u64) {
        self.files_uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_submit_rejected(&self) {
        self.submits_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// 📥 One blob was downloaded and parsed to the end.
    pub fn record_file_processed(&self) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lines_processed(&self, lines: u64) {
        self.lines_processed.fetch_add(lines, Ordering::Relaxed);
    }

    pub fn record_parse_errors(&self, errors: u64) {
        self.parse_errors.fetch_add(errors, Ordering::Relaxed);
    }

    pub fn record_acknowledged(&self) {
        self.jobs_acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.jobs_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_uploaded: self.files_uploaded.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            submits_rejected: self.submits_rejected.load(Ordering::Relaxed),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            lines_processed: self.lines_processed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            jobs_acknowledged: self.jobs_acknowledged.load(Ordering::Relaxed),
            jobs_deferred: self.jobs_deferred.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }

    /// 🍽️ The summary table: two columns, right-aligned, no borders.
    pub fn render(&self) -> String {
        let s = self.snapshot();
        let rows = [
            ("files uploaded", format_number(s.files_uploaded)),
            ("bytes uploaded", format_bytes(s.bytes_uploaded)),
            ("submits rejected", format_number(s.submits_rejected)),
            ("files processed", format_number(s.files_processed)),
            ("lines processed", format_number(s.lines_processed)),
            ("parse errors", format_number(s.parse_errors)),
            ("jobs acknowledged", format_number(s.jobs_acknowledged)),
            ("jobs deferred", format_number(s.jobs_deferred)),
            ("jobs failed", format_number(s.jobs_failed)),
        ];

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        for (label, value) in rows {
            table.add_row(vec![
                Cell::new(label).set_alignment(CellAlignment::Right),
                Cell::new(value).set_alignment(CellAlignment::Right),
            ]);
        }
        table.to_string()
    }
}

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= 1024 {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} bytes")
    }
}
