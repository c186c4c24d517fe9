//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[dramatic orchestral music swells]*
//! 🎬 "In a world where rows change constantly..."
//! 🎬 "One supervisor dared to keep the index in sync."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor module — part middle manager, part helicopter parent.
//! It walks the kinds in order (films, persons, genres), drains each source
//! into its sink page by page, and writes the whole thing up in a
//! [`RunReport`]. One sequential loop. No worker pools, no channels, no
//! drama: each page is fetched, transformed, upserted and acknowledged before
//! the next one is even asked for.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::app_config::AppConfig;
use crate::backends::{
    ElasticsearchClient, ElasticsearchSink, PostgresSource, Sink, SinkBackend, Source,
    SourceBackend, postgres,
};
use crate::common::{DocumentBatch, ResourceKind};
use crate::progress::{KindReport, RunReport};
use crate::state::{JsonFileStorage, State, Watermark};
use crate::transforms::transform_row;

/// 🚰➡️🕳️ Pump one kind from `source` into `sink` until the source runs dry.
///
/// Per page: transform every row (a row that won't transform is logged and
/// counted, its siblings still go), upsert the survivors, then acknowledge
/// the page so the source can forget it. Item-level bulk failures are counted
/// and the page is still acknowledged; they are data problems, and replaying
/// the page would only fail the same way.
pub async fn drain<S, K>(kind: ResourceKind, source: &mut S, sink: &mut K) -> Result<KindReport>
where
    S: Source + ?Sized,
    K: Sink + ?Sized,
{
    let mut report = KindReport::new(kind);
    loop {
        let batch = source
            .next_batch()
            .await
            .with_context(|| format!("💀 {kind}: could not fetch the next page"))?;
        if batch.is_empty() {
            break;
        }

        report.pages += 1;
        if batch.redelivered {
            report.redelivered_pages += 1;
        }
        report.rows += batch.rows.len();

        let mut docs = DocumentBatch::default();
        for row in &batch.rows {
            match transform_row(kind, row) {
                Ok(doc) => docs.docs.push(doc),
                Err(err) => {
                    report.rejected += 1;
                    warn!("⚠️ {kind}: skipping row '{}': {:#}", row.id, err);
                }
            }
        }

        let outcome = sink
            .receive(docs)
            .await
            .with_context(|| format!("💀 {kind}: the sink refused a page"))?;
        report.indexed += outcome.indexed;
        report.failed += outcome.failed;

        if let Some(last) = batch.last() {
            let candidate = Watermark {
                modified: last.modified,
                id: last.id.clone(),
            };
            report.watermark = Some(Watermark::advance(report.watermark.take(), candidate));
        }

        source
            .commit()
            .await
            .with_context(|| format!("💀 {kind}: could not acknowledge a page"))?;
    }

    sink.close().await?;
    info!(
        "✅ {kind}: {} pages, {} rows, {} indexed, {} failed, {} rejected",
        report.pages, report.rows, report.indexed, report.failed, report.rejected
    );
    Ok(report)
}

/// 🔄 Drain each `(kind, source, sink)` triple in order.
pub async fn run_pipeline(
    pipelines: Vec<(ResourceKind, SourceBackend, SinkBackend)>,
) -> Result<RunReport> {
    let started = Instant::now();
    let mut report = RunReport::default();
    for (kind, mut source, mut sink) in pipelines {
        report.kinds.push(drain(kind, &mut source, &mut sink).await?);
    }
    report.elapsed = started.elapsed();
    Ok(report)
}

/// 📦 The Supervisor: because even an ETL loop needs someone hovering over it
/// asking "is it done yet?"
pub struct Supervisor {
    app_config: AppConfig,
}

impl Supervisor {
    pub fn new(app_config: AppConfig) -> Self {
        Self { app_config }
    }

    /// 🏗️ Postgres → Elasticsearch for every kind, wired from config.
    async fn build_pipelines(&self) -> Result<Vec<(ResourceKind, SourceBackend, SinkBackend)>> {
        let pool = postgres::connect_pool(&self.app_config.postgres);
        let search = ElasticsearchClient::new(self.app_config.elasticsearch.clone())?;
        let storage = JsonFileStorage::new(&self.app_config.etl.state_file);
        let policy = self.app_config.retry.policy();
        let indices = &self.app_config.elasticsearch.indices;

        let mut pipelines = Vec::new();
        for kind in ResourceKind::all() {
            let state = State::open(storage.clone()).await?;
            let source = PostgresSource::new(
                kind,
                pool.clone(),
                state,
                self.app_config.etl.page_size,
                policy.clone(),
            );
            let sink =
                ElasticsearchSink::new(search.clone(), kind, kind.index(indices), policy.clone());
            pipelines.push((
                kind,
                SourceBackend::Postgres(source),
                SinkBackend::Elasticsearch(sink),
            ));
        }
        Ok(pipelines)
    }

    /// 🚀 One pass over every kind.
    pub async fn run_once(&self) -> Result<RunReport> {
        let pipelines = self.build_pipelines().await?;
        run_pipeline(pipelines).await
    }

    /// 🔁 Run, nap, repeat, until Ctrl-C. A failed run is logged and the loop
    /// carries on; the next run resumes from whatever the state file says.
    pub async fn run_forever(&self) -> Result<()> {
        let delay = Duration::from_secs(self.app_config.etl.delay_secs);
        loop {
            match self.run_once().await {
                Ok(report) => info!("🎬 ETL run finished\n{}", report.render()),
                Err(err) => error!("💀 ETL run failed: {:#}", err),
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                signal = tokio::signal::ctrl_c() => {
                    signal.context("💀 Could not listen for Ctrl-C")?;
                    info!("👋 Ctrl-C received, the projector is off");
                    return Ok(());
                }
            }
        }
    }
}
