use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::backends::elasticsearch::ElasticsearchClient;
use crate::backends::{BulkOutcome, Sink};
use crate::common::{DocumentBatch, ResourceKind};
use crate::retry::{RetryPolicy, retry};
use crate::transforms::elasticsearch::ElasticsearchBulk;

/// 📡 The sink side of the Elasticsearch backend: one `_bulk` call per batch.
///
/// On first use it makes sure the index exists, creating it with the kind's
/// mapping when it doesn't. Every document goes in as an `index` action keyed
/// by its id, so the same batch twice leaves the index exactly as once.
///
/// 🔄 Transport failures are retried per policy. Item failures are logged one
/// by one and counted, never retried: a mapping conflict will still be a
/// mapping conflict in 200 milliseconds.
#[derive(Debug)]
pub struct ElasticsearchSink {
    client: ElasticsearchClient,
    kind: ResourceKind,
    index: String,
    retry: RetryPolicy,
    index_ready: bool,
}

impl ElasticsearchSink {
    pub fn new(
        client: ElasticsearchClient,
        kind: ResourceKind,
        index: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            kind,
            index: index.into(),
            retry,
            index_ready: false,
        }
    }

    async fn ensure_index(&mut self) -> Result<()> {
        if self.index_ready {
            return Ok(());
        }
        let client = &self.client;
        let kind = self.kind;
        let index = self.index.as_str();
        retry(&self.retry, &format!("ensure index {index}"), || {
            client.ensure_index(kind, index)
        })
        .await
        .with_context(|| format!("💀 Could not make sure index '{index}' exists"))?;
        self.index_ready = true;
        Ok(())
    }
}

#[async_trait]
impl Sink for ElasticsearchSink {
    async fn receive(&mut self, batch: DocumentBatch) -> Result<BulkOutcome> {
        if batch.is_empty() {
            return Ok(BulkOutcome::default());
        }
        self.ensure_index().await?;

        let payload = ElasticsearchBulk::render(&self.index, &batch)?;
        debug!(
            "📡 {}: sending {} docs ({} bytes) to /_bulk",
            self.index,
            batch.len(),
            payload.len()
        );

        let client = &self.client;
        let label = format!("bulk {}", self.index);
        let report = retry(&self.retry, &label, || client.bulk(payload.clone()))
            .await
            .with_context(|| {
                format!(
                    "💀 The bulk request for index '{}' never landed. The NDJSON was rendered with love; the HTTP layer said 'nah'.",
                    self.index
                )
            })?;

        for failure in &report.failures {
            error!(
                "💀 {}: document '{}' rejected with status {}: {}",
                self.index, failure.id, failure.status, failure.reason
            );
        }
        info!(
            "🚀 {}: indexed {} docs, {} rejected",
            self.index,
            report.indexed,
            report.failures.len()
        );
        Ok(BulkOutcome {
            indexed: report.indexed,
            failed: report.failures.len(),
        })
    }

    /// 🗑️ Nothing buffered, nothing to flush. The connection pool says goodbye.
    async fn close(&mut self) -> Result<()> {
        debug!("🗑️ {} sink closing — no buffer to flush, just vibes to release", self.index);
        Ok(())
    }
}
