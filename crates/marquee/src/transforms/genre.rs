use anyhow::{Context, Result};
use serde::Deserialize;

use super::RowTransform;
use crate::common::{Document, SourceRow};
use crate::models::Genre;

/// 🏷️ Genres come out of Postgres already looking like genres. Straight mapping.
pub struct GenreTransform;

impl RowTransform for GenreTransform {
    fn transform_row(row: &SourceRow) -> Result<Document> {
        let genre = Genre::deserialize(&row.doc)
            .with_context(|| format!("💀 genre row '{}' is not shaped like a genre", row.id))?;
        let source_buf = serde_json::to_string(&genre)
            .with_context(|| format!("💀 genre '{}' refused to serialize", row.id))?;
        Ok(Document {
            id: genre.id,
            source_buf,
        })
    }
}
