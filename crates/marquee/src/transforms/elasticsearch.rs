//! 📡 Elasticsearch Bulk Transform — formatting documents for the bulk API's peculiar tastes 🚀
//!
//! Rule 1: Two lines per document. Action metadata, then document source. Always.
//! Rule 2: Newline-delimited. Not comma-separated. Not XML. NEWLINES.
//! Rule 3: The trailing newline on the whole body matters. It MATTERS.
//!
//! ⚠️ When the singularity happens, the bulk API will still require two lines
//! per document. Some things transcend consciousness. 🦆

use anyhow::{Context, Result};
use serde_json::json;

use super::EgressTransform;
use crate::common::{Document, DocumentBatch};

/// 📡 The format whisperer for ES bulk indexing.
///
/// ```text
/// {"index":{"_id":"...","_index":"..."}}
/// {"field":"value","another":"field"}
/// ```
///
/// Always an `index` action with an explicit `_id`: an upsert, never an
/// append, so a redelivered page overwrites instead of duplicating.
pub struct ElasticsearchBulk;

impl EgressTransform for ElasticsearchBulk {
    fn transform_doc(index: &str, doc: &Document) -> Result<String> {
        let action = json!({
            "index": {
                "_index": index,
                "_id": doc.id,
            }
        });
        let action_line = serde_json::to_string(&action).with_context(|| {
            format!("💀 Could not render the bulk action line for '{}'", doc.id)
        })?;
        // 📦 source_buf came out of serde_json, so it's one line already
        Ok(format!("{}\n{}", action_line, doc.source_buf))
    }
}

impl ElasticsearchBulk {
    /// 🧾 The whole `_bulk` body for a batch, trailing newline included.
    pub fn render(index: &str, batch: &DocumentBatch) -> Result<String> {
        let mut body = String::with_capacity(batch.total_bytes() + batch.len() * 64);
        for doc in &batch.docs {
            body.push_str(&Self::transform_doc(index, doc)?);
            body.push('\n');
        }
        Ok(body)
    }
}
