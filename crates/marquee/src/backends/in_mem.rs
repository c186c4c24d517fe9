//! # Previously, on Marquee...
//!
//! 🎬 The rows were trapped. Someone had to move them, and Postgres was
//! three docker-compose services away. So this module was born: a source and
//! a sink that live entirely in RAM, gone the moment you blink.
//!
//! [`InMemorySource`] hands out a fixed set of rows in `(modified, id)` order,
//! one page at a time, and can pretend it crashed last time by starting with
//! an in-flight page. [`InMemorySink`] hoards every batch behind an
//! `Arc<Mutex<...>>` so tests can inspect what arrived. 🦆
//!
//! ⚠️ This is NOT for production. This is for tests. If you're deploying this
//! to prod, please also deploy a therapist.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::backends::{BulkOutcome, Sink, Source};
use crate::common::{DocumentBatch, RowBatch, SourceRow};

/// 📦 A source with a script. Every line already memorized.
#[derive(Debug, Default)]
pub struct InMemorySource {
    pages: VecDeque<Vec<SourceRow>>,
    /// 🔁 a page left over from "last time", served first and flagged
    in_flight: Option<Vec<SourceRow>>,
    awaiting_commit: bool,
    committed: usize,
}

impl InMemorySource {
    /// 🚀 Sorts `rows` by `(modified, id)` and chops them into pages of `page_size`.
    pub fn new(mut rows: Vec<SourceRow>, page_size: usize) -> Self {
        rows.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.id.cmp(&b.id)));
        let page_size = page_size.max(1);
        let pages = rows
            .chunks(page_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        Self {
            pages,
            ..Self::default()
        }
    }

    /// 🔁 Pretend the previous run died holding `rows`.
    pub fn with_in_flight(mut self, rows: Vec<SourceRow>) -> Self {
        self.in_flight = Some(rows);
        self
    }

    /// ✅ how many pages have been acknowledged so far
    pub fn committed(&self) -> usize {
        self.committed
    }
}

#[async_trait]
impl Source for InMemorySource {
    async fn next_batch(&mut self) -> Result<RowBatch> {
        if let Some(rows) = self.in_flight.take() {
            self.awaiting_commit = true;
            return Ok(RowBatch {
                rows,
                redelivered: true,
            });
        }
        match self.pages.pop_front() {
            Some(rows) => {
                self.awaiting_commit = true;
                Ok(RowBatch::new(rows))
            }
            // 💤 the well is dry. go home.
            None => Ok(RowBatch::default()),
        }
    }

    async fn commit(&mut self) -> Result<()> {
        if self.awaiting_commit {
            self.awaiting_commit = false;
            self.committed += 1;
        }
        Ok(())
    }
}

/// 📦 A sink that never forgets.
///
/// Clone-able because tests need to peek inside after handing `self` off to
/// the pipeline. The `Arc` means every clone shares the same evidence locker.
#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    pub received: Arc<tokio::sync::Mutex<Vec<DocumentBatch>>>,
    /// 💀 ids this sink will refuse, to rehearse item-level failures
    rejected_ids: Arc<HashSet<String>>,
    closed: Arc<tokio::sync::Mutex<bool>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🧪 A sink that rejects these ids the way a bulk API rejects a bad item.
    pub fn rejecting<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rejected_ids: Arc::new(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// 🗂️ The latest body per id, the way an index would hold it after upserts.
    pub async fn documents(&self) -> BTreeMap<String, String> {
        let received = self.received.lock().await;
        let mut docs = BTreeMap::new();
        for batch in received.iter() {
            for doc in &batch.docs {
                if !self.rejected_ids.contains(&doc.id) {
                    docs.insert(doc.id.clone(), doc.source_buf.clone());
                }
            }
        }
        docs
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.lock().await
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn receive(&mut self, batch: DocumentBatch) -> Result<BulkOutcome> {
        let failed = batch
            .docs
            .iter()
            .filter(|doc| self.rejected_ids.contains(&doc.id))
            .count();
        let outcome = BulkOutcome {
            indexed: batch.len() - failed,
            failed,
        };
        self.received.lock().await.push(batch);
        Ok(outcome)
    }

    async fn close(&mut self) -> Result<()> {
        *self.closed.lock().await = true;
        Ok(())
    }
}
