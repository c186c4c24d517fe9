//! 🌐 The read API — the front of house. Takes orders, serves JSON, never tips.
//!
//! Three resource kinds, the same three routes each (list, search, by id),
//! plus "films for a person" and a health check. Every handler is generic over
//! the model, so the routes are bound once per kind at startup and the type
//! system makes sure `/films/...` only ever decodes films.
//!
//! ```text
//! GET /api/v1/{films|genres|persons}[/]          ?page[size]=&page[number]=
//! GET /api/v1/{films|genres|persons}/search[/]   ?query=&page[size]=&page[number]=
//! GET /api/v1/{films|genres|persons}/{id}
//! GET /api/v1/persons/{id}/film[/]               ?page[size]=&page[number]=
//! GET /health
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::ElasticsearchClient;
use crate::cache::CacheBackend;
use crate::common::{Page, ResourceKind};
use crate::error::ApiError;
use crate::models::{CatalogModel, Film, Genre, Person};
use crate::services::CatalogService;

/// 🧳 Everything a handler needs, passed as axum state. No globals.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub search: ElasticsearchClient,
    pub cache: CacheBackend,
    pub config: Arc<AppConfig>,
}

impl AppContext {
    pub fn new(search: ElasticsearchClient, cache: CacheBackend, config: AppConfig) -> Self {
        Self {
            search,
            cache,
            config: Arc::new(config),
        }
    }

    fn service<M: CatalogModel>(&self) -> CatalogService<'_, M> {
        CatalogService::new(
            &self.search,
            &self.cache,
            &self.config.elasticsearch.indices,
            &self.config.cache,
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    #[serde(rename = "page[size]")]
    size: Option<usize>,
    #[serde(rename = "page[number]")]
    number: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    query: Option<String>,
    #[serde(rename = "page[size]")]
    size: Option<usize>,
    #[serde(rename = "page[number]")]
    number: Option<usize>,
}

/// 🚧 Defaults per kind, then the bounds: both at least 1, size at most the configured max.
fn validate_page(
    kind: ResourceKind,
    size: Option<usize>,
    number: Option<usize>,
    max_page_size: usize,
) -> Result<Page, ApiError> {
    let size = size.unwrap_or_else(|| kind.default_page_size());
    let number = number.unwrap_or(1);
    if size < 1 || size > max_page_size {
        return Err(ApiError::Validation(format!(
            "page[size] must be between 1 and {max_page_size}"
        )));
    }
    if number < 1 {
        return Err(ApiError::Validation(
            "page[number] must be at least 1".to_string(),
        ));
    }
    Ok(Page::new(size, number))
}

fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(params)| params)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

async fn get_by_id<M: CatalogModel>(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<M>, ApiError> {
    Ok(Json(ctx.service::<M>().get_by_id(&id).await?))
}

async fn list<M: CatalogModel>(
    State(ctx): State<AppContext>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Vec<M>>, ApiError> {
    let params = query_params(params)?;
    let page = validate_page(
        M::KIND,
        params.size,
        params.number,
        ctx.config.api.max_page_size,
    )?;
    Ok(Json(ctx.service::<M>().list(page).await?))
}

async fn search<M: CatalogModel>(
    State(ctx): State<AppContext>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<M>>, ApiError> {
    let params = query_params(params)?;
    let query = params
        .query
        .as_deref()
        .map(str::trim)
        .filter(|query| !query.is_empty())
        .ok_or_else(|| ApiError::Validation("query must not be empty".to_string()))?;
    let page = validate_page(
        M::KIND,
        params.size,
        params.number,
        ctx.config.api.max_page_size,
    )?;
    Ok(Json(ctx.service::<M>().search(query, page).await?))
}

async fn films_by_person(
    State(ctx): State<AppContext>,
    Path(person_id): Path<String>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Vec<Film>>, ApiError> {
    let params = query_params(params)?;
    let page = validate_page(
        ResourceKind::Persons,
        params.size,
        params.number,
        ctx.config.api.max_page_size,
    )?;
    Ok(Json(
        ctx.service::<Film>()
            .films_by_person(&person_id, page)
            .await?,
    ))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// 🛣️ list, search and by-id for one model, with and without the trailing slash
fn resource_routes<M: CatalogModel>(router: Router<AppContext>) -> Router<AppContext> {
    let base = format!("/api/v1/{}", M::KIND.route());
    router
        .route(&base, get(list::<M>))
        .route(&format!("{base}/"), get(list::<M>))
        .route(&format!("{base}/search"), get(search::<M>))
        .route(&format!("{base}/search/"), get(search::<M>))
        .route(&format!("{base}/:id"), get(get_by_id::<M>))
}

/// 🏗️ The whole router, state attached, request tracing on.
pub fn build_router(ctx: AppContext) -> Router {
    let router = Router::new().route("/health", get(health));
    let router = resource_routes::<Film>(router);
    let router = resource_routes::<Genre>(router);
    let router = resource_routes::<Person>(router);
    router
        .route("/api/v1/persons/:id/film", get(films_by_person))
        .route("/api/v1/persons/:id/film/", get(films_by_person))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// 🚀 Bind, serve, stop on Ctrl-C.
pub async fn serve(config: AppConfig) -> Result<()> {
    let search = ElasticsearchClient::new(config.elasticsearch.clone())?;
    let cache = CacheBackend::from_config(&config.cache, &config.redis).await?;
    let bind = config.api.bind.clone();
    let app = build_router(AppContext::new(search, cache, config));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("💀 Could not bind the API to '{bind}'. Is something already sitting in that seat?"))?;
    info!("🌐 serving the catalog on http://{bind}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            // 🔕 if the signal handler can't be installed, there is nothing to wait for
            let _ = tokio::signal::ctrl_c().await;
            info!("👋 Ctrl-C received, closing the box office");
        })
        .await
        .context("💀 The API server stopped unexpectedly")
}
