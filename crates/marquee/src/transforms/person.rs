//! 👤 PersonTransform — one person, every role they ever had, one document.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::RowTransform;
use crate::common::{Document, SourceRow};
use crate::models::PersonDocument;

#[derive(Debug, Deserialize)]
struct RawPerson {
    id: String,
    #[serde(alias = "name")]
    full_name: String,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    film_ids: Vec<String>,
}

/// 🎭 `full_name` → `name`, roles joined into one label, film ids deduplicated.
pub struct PersonTransform;

impl PersonTransform {
    pub fn to_document(raw: &serde_json::Value) -> Result<PersonDocument> {
        let raw = RawPerson::deserialize(raw)?;
        let roles: BTreeSet<String> = raw
            .roles
            .into_iter()
            .map(|role| role.trim().to_string())
            .filter(|role| !role.is_empty())
            .collect();
        let film_ids: BTreeSet<String> = raw.film_ids.into_iter().collect();

        Ok(PersonDocument {
            id: raw.id,
            name: raw.full_name,
            role: (!roles.is_empty()).then(|| roles.into_iter().collect::<Vec<_>>().join(", ")),
            film_ids: film_ids.into_iter().collect(),
        })
    }
}

impl RowTransform for PersonTransform {
    fn transform_row(row: &SourceRow) -> Result<Document> {
        let person = Self::to_document(&row.doc)
            .with_context(|| format!("💀 person row '{}' is not shaped like a person", row.id))?;
        let source_buf = serde_json::to_string(&person)
            .with_context(|| format!("💀 person '{}' refused to serialize", row.id))?;
        Ok(Document {
            id: person.id,
            source_buf,
        })
    }
}
