//! 🔌 Backends — where the real I/O happens.
//!
//! 🚰 Source backends pour rows out of Postgres, Sink backends slurp documents
//! into Elasticsearch. And in between, we panic! (kidding, we use anyhow)
//!
//! 🎭 This module is the casting agency. Need rows from the elephant? Need
//! rows from a `Vec` for a test? Need documents upserted into an index, or
//! just piled up in RAM where a test can stare at them? We've got a backend
//! for that.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;

use crate::common::{DocumentBatch, RowBatch};

pub mod elasticsearch;
pub mod in_mem;
pub mod postgres;

pub use elasticsearch::{ElasticsearchClient, ElasticsearchSink};
pub use in_mem::{InMemorySink, InMemorySource};
pub use postgres::{PageFetcher, PgPageFetcher, PostgresSource};

// ===== Source Trait and Backend Enum =====

/// 🚰 A source that produces pages of changed rows.
///
/// # Contract 📜
/// - `next_batch` returns pages in `(modified, id)` order until the well runs
///   dry, at which point it returns an empty batch.
/// - A returned page is parked durably before it is handed out. It stays
///   parked until `commit` is called, and comes back (flagged `redelivered`)
///   on the next run if the process dies first.
/// - The borrow checker demands `&mut self` because sources have state. And
///   feelings. Mostly state.
#[async_trait]
pub trait Source: std::fmt::Debug + Send {
    /// 📦 Fetch the next page of rows. Empty means drained.
    async fn next_batch(&mut self) -> Result<RowBatch>;

    /// ✅ The downstream side has dealt with the last page; forget it.
    async fn commit(&mut self) -> Result<()>;
}

/// 🎭 The many faces of a Source — a polymorphic casting call for row origins.
///
/// Ancient proverb: "He who hardcodes the backend, migrates only once."
#[derive(Debug)]
pub enum SourceBackend {
    InMemory(InMemorySource),
    Postgres(PostgresSource),
}

#[async_trait]
impl Source for SourceBackend {
    async fn next_batch(&mut self) -> Result<RowBatch> {
        match self {
            SourceBackend::InMemory(source) => source.next_batch().await,
            SourceBackend::Postgres(source) => source.next_batch().await,
        }
    }

    async fn commit(&mut self) -> Result<()> {
        match self {
            SourceBackend::InMemory(source) => source.commit().await,
            SourceBackend::Postgres(source) => source.commit().await,
        }
    }
}

// ===== Sink Trait and Backend Enum =====

/// 📊 What happened to a batch once it reached the other side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub indexed: usize,
    /// 💀 item-level rejections. logged one by one, counted here, never retried.
    pub failed: usize,
}

/// 🕳️ A sink that upserts documents by id.
///
/// # Contract 📜
/// - `receive` writes every document in the batch, keyed by its id, so the
///   same document twice is the same as once.
/// - Transport trouble is an `Err`. Item trouble is a count in [`BulkOutcome`].
/// - `close` flushes and releases. Call it. Skipping it is considered rude.
#[async_trait]
pub trait Sink: std::fmt::Debug + Send {
    async fn receive(&mut self, batch: DocumentBatch) -> Result<BulkOutcome>;
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 The many faces of a Sink. Mirrors `SourceBackend` on the other end of
/// the pipeline. Whoever designed this was clearly a fan of symmetry.
#[derive(Debug)]
pub enum SinkBackend {
    InMemory(InMemorySink),
    Elasticsearch(ElasticsearchSink),
}

#[async_trait]
impl Sink for SinkBackend {
    async fn receive(&mut self, batch: DocumentBatch) -> Result<BulkOutcome> {
        match self {
            SinkBackend::InMemory(sink) => sink.receive(batch).await,
            SinkBackend::Elasticsearch(sink) => sink.receive(batch).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SinkBackend::InMemory(sink) => sink.close().await,
            SinkBackend::Elasticsearch(sink) => sink.close().await,
        }
    }
}
