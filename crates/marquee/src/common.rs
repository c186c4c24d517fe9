//! 📦 Common data structures — the building blocks of marquee.
//!
//! 🎬 COLD OPEN — INT. PROJECTION BOOTH — 3:47 AM
//!
//! A row leaves Postgres. It does not know it is about to become a document.
//! It does not know about Elasticsearch. It barely knows its own `modified`
//! timestamp. But it carries it anyway, like a ticket stub in a coat pocket.
//!
//! 🦆
//!
//! These structs ferry rows from the source to the transformer and documents
//! from the transformer to the sink. They don't ask questions. They carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app_config::IndexNames;

/// 🎭 The three kinds of thing this catalog knows about.
///
/// Each kind owns a state-key slug, an index, a display label and a mapping.
/// The ETL visits them in [`ResourceKind::all`] order, the API mounts one set
/// of routes per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Films,
    Genres,
    Persons,
}

impl ResourceKind {
    /// 🔄 films first (they're the headliners), then the supporting cast, then the genres.
    pub fn all() -> [ResourceKind; 3] {
        [
            ResourceKind::Films,
            ResourceKind::Persons,
            ResourceKind::Genres,
        ]
    }

    /// 🏷️ Prefix for this kind's keys in the state file.
    pub fn slug(&self) -> &'static str {
        match self {
            ResourceKind::Films => "movies",
            ResourceKind::Genres => "genres",
            ResourceKind::Persons => "persons",
        }
    }

    /// 🎬 The word that goes in "<Label> with id <id> not found".
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Films => "Film",
            ResourceKind::Genres => "Genre",
            ResourceKind::Persons => "Person",
        }
    }

    /// 🛣️ Path segment under `/api/v1/`.
    pub fn route(&self) -> &'static str {
        match self {
            ResourceKind::Films => "films",
            ResourceKind::Genres => "genres",
            ResourceKind::Persons => "persons",
        }
    }

    pub fn index<'a>(&self, names: &'a IndexNames) -> &'a str {
        names.for_kind(*self)
    }

    /// 📏 `page[size]` when the caller doesn't say.
    pub fn default_page_size(&self) -> usize {
        match self {
            ResourceKind::Films => 20,
            ResourceKind::Genres | ResourceKind::Persons => 50,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// 🐘 One row as it came out of Postgres: identity, change clock, and the
/// jsonb blob the query assembled. Serializable so a page can be parked in the
/// state file while it is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    pub id: String,
    pub modified: DateTime<Utc>,
    pub doc: Value,
}

/// 📦 A page of rows, plus a flag saying "you've seen this one before".
///
/// `redelivered` is true when the page came back out of the state file after a
/// crash. Nobody dedups it downstream; the upsert-by-id does not care.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    pub rows: Vec<SourceRow>,
    pub redelivered: bool,
}

impl RowBatch {
    pub fn new(rows: Vec<SourceRow>) -> Self {
        Self {
            rows,
            redelivered: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// ⏰ The newest position in the page, which is where the watermark lands.
    pub fn last(&self) -> Option<&SourceRow> {
        self.rows.last()
    }
}

/// 🎯 One index-ready document: an id and the serialized body.
///
/// The body is a `String` wearing a trenchcoat and claiming to be JSON.
/// The transformer made it, so we believe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub source_buf: String,
}

/// 📦 Documents headed for one index in one `_bulk` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentBatch {
    pub docs: Vec<Document>,
}

impl DocumentBatch {
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// 📊 bytes on the wire, give or take the action lines
    pub fn total_bytes(&self) -> usize {
        self.docs.iter().map(|doc| doc.source_buf.len()).sum()
    }
}

/// 📄 `page[size]` and `page[number]`, already validated. Numbers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Page {
    pub size: usize,
    pub number: usize,
}

impl Page {
    pub fn new(size: usize, number: usize) -> Self {
        Self { size, number }
    }

    /// 📐 `(number - 1) * size`, the offset the search engine wants
    pub fn from(&self) -> usize {
        self.number.saturating_sub(1).saturating_mul(self.size)
    }

    /// 📐 one past the last hit this page covers
    pub fn end(&self) -> usize {
        self.from().saturating_add(self.size)
    }
}
