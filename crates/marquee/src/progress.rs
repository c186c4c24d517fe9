//! 📊 progress.rs — "Did it work?" — every ETL run, every time, forever.
//!
//! 🚀 This module answers the morning-after question with cold hard numbers
//! and a table so comfy it has lumbar support. Every row that got rejected and
//! every document the index refused shows up here, counted, not swept under
//! the rug.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};

use crate::common::ResourceKind;
use crate::state::Watermark;

/// 🔢 Formats a number with commas for the 3 people in the audience who like readability.
/// "1000000 docs" → "1,000,000 docs" — you're welcome, eyes.
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

/// ⏱️ MM:SS, or HH:MM:SS if you should probably call your mom. It's been a while.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📦 How one resource kind fared in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindReport {
    pub kind: ResourceKind,
    pub pages: usize,
    /// 🔁 pages that came back from a previous, interrupted run
    pub redelivered_pages: usize,
    pub rows: usize,
    pub indexed: usize,
    /// 💀 documents the index rejected
    pub failed: usize,
    /// 💀 rows the transformer could not make sense of
    pub rejected: usize,
    pub watermark: Option<Watermark>,
}

impl KindReport {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            pages: 0,
            redelivered_pages: 0,
            rows: 0,
            indexed: 0,
            failed: 0,
            rejected: 0,
            watermark: None,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.rejected == 0
    }
}

/// 🎬 The whole run, all kinds, plus how long it took.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub kinds: Vec<KindReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn total_indexed(&self) -> usize {
        self.kinds.iter().map(|k| k.indexed).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.kinds.iter().map(|k| k.failed + k.rejected).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.kinds.iter().all(KindReport::is_clean)
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    /// 🍽️ the comfy table
    pub fn render(&self) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            "kind",
            "pages",
            "redelivered",
            "rows",
            "indexed",
            "failed",
            "rejected",
            "watermark",
        ]);

        let number = |n: usize| {
            Cell::new(format_number(n as u64)).set_alignment(CellAlignment::Right)
        };
        for kind in &self.kinds {
            let watermark = kind
                .watermark
                .as_ref()
                .map(|mark| format!("{} / {}", mark.modified.to_rfc3339(), mark.id))
                .unwrap_or_else(|| "-".to_string());
            table.add_row(vec![
                Cell::new(kind.kind.slug()),
                number(kind.pages),
                number(kind.redelivered_pages),
                number(kind.rows),
                number(kind.indexed),
                number(kind.failed),
                number(kind.rejected),
                Cell::new(watermark),
            ]);
        }

        format!(
            "{}\n{} indexed, {} failed, {} elapsed",
            table,
            format_number(self.total_indexed() as u64),
            format_number(self.total_failed() as u64),
            format_duration(self.elapsed)
        )
    }
}
