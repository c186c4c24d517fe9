//! 🔄 Transforms — turning joined Postgres rows into index-ready documents 🎭
//!
//! 🎬 COLD OPEN — INT. EDITING BAY — 2:47 AM
//!
//! The raw footage is a mess. Actors, writers and directors all crammed into
//! one `people` array, tagged with a role like extras wearing name badges.
//! Somebody has to cut it into a film. This module is that somebody.
//!
//! ```text
//!   SourceRow (jsonb)          RowTransform             EgressTransform
//!  ┌──────────────────┐      ┌──────────────┐        ┌──────────────────┐
//!  │ film + people[]  │─────▶│ FilmTransform│──┐     │                  │
//!  ├──────────────────┤      ├──────────────┤  ├────▶│ ElasticsearchBulk│
//!  │ person + roles[] │─────▶│PersonTransform│─┤     │  (NDJSON lines)  │
//!  ├──────────────────┤      ├──────────────┤  │     │                  │
//!  │ genre            │─────▶│GenreTransform│──┘     └──────────────────┘
//!  └──────────────────┘      └──────────────┘
//!                                 Document { id, source_buf }
//! ```
//!
//! Every transform is a zero-sized marker type. Pure functions, no state: the
//! same row in gives the same bytes out, every time. A malformed row is an
//! error naming the kind and the row id; nothing downstream guesses.

use anyhow::Result;

use crate::common::{Document, ResourceKind, SourceRow};

pub mod elasticsearch;
pub mod film;
pub mod genre;
pub mod person;

pub use elasticsearch::ElasticsearchBulk;
pub use film::FilmTransform;
pub use genre::GenreTransform;
pub use person::PersonTransform;

/// 📥 RowTransform — one raw source row in, one index document out.
///
/// # Contract 📜
/// - Input: a borrowed [`SourceRow`], because a rejected row still gets logged
/// - Output: a [`Document`] whose `source_buf` is the serialized model
/// - Deterministic. Transforming twice yields identical output.
pub trait RowTransform {
    fn transform_row(row: &SourceRow) -> Result<Document>;
}

/// 🎯 Pick the transform for `kind` and run it.
pub fn transform_row(kind: ResourceKind, row: &SourceRow) -> Result<Document> {
    match kind {
        ResourceKind::Films => FilmTransform::transform_row(row),
        ResourceKind::Persons => PersonTransform::transform_row(row),
        ResourceKind::Genres => GenreTransform::transform_row(row),
    }
}

/// 📤 EgressTransform — a document in the sink's wire format.
pub trait EgressTransform {
    fn transform_doc(index: &str, doc: &Document) -> Result<String>;
}
