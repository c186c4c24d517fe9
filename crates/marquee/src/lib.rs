//! 🎬 marquee — movie rows in, searchable documents out, served warm.
//!
//! Two halves share this crate:
//! - the ETL ([`supervisors`]): Postgres pages → transforms → Elasticsearch
//!   upserts, resumable through a JSON state file;
//! - the read API ([`api`]): axum routes over a cache-aside layer
//!   ([`services`]) that asks Redis first and Elasticsearch second.

pub mod api;
pub mod app_config;
pub mod backends;
pub mod cache;
pub mod common;
pub mod error;
pub mod models;
pub mod progress;
pub mod retry;
pub mod services;
pub mod state;
pub mod supervisors;
pub mod transforms;

use anyhow::{Context, Result};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use serde_json::Value;
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::ElasticsearchClient;
use crate::state::JsonFileStorage;
use crate::supervisors::Supervisor;

/// 🚀 Run the ETL: once, or forever until Ctrl-C.
pub async fn run_etl(app_config: AppConfig, once: bool) -> Result<()> {
    let search = ElasticsearchClient::new(app_config.elasticsearch.clone())?;
    retry::retry(&app_config.retry.policy(), "elasticsearch ping", || search.ping())
        .await
        .context("💀 Elasticsearch did not answer before the first run")?;

    let supervisor = Supervisor::new(app_config);
    if once {
        let report = supervisor.run_once().await?;
        info!("🎬 ETL run finished\n{}", report.render());
        Ok(())
    } else {
        supervisor.run_forever().await
    }
}

/// 🌐 Serve the read API until Ctrl-C.
pub async fn serve(app_config: AppConfig) -> Result<()> {
    api::serve(app_config).await
}

/// 📁 The state file, as a table: one row per key.
pub async fn show_state(app_config: &AppConfig) -> Result<String> {
    let storage = JsonFileStorage::new(&app_config.etl.state_file);
    let state = storage
        .retrieve_state()
        .await
        .context("💀 Could not read the ETL state file")?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["key", "value"]);
    for (key, value) in &state {
        let shown = match value {
            // 📦 an in-flight page: the count is what matters, not a wall of JSON
            Value::Array(rows) => format!("{} rows in flight", rows.len()),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        table.add_row(vec![key.clone(), shown]);
    }

    Ok(format!(
        "{}\n{} ({} keys)",
        table,
        storage.path().display(),
        state.len()
    ))
}
