//! 💀 Errors — named, numbered, and sorted into "try again" and "give up".
//!
//! The pipeline lives on `anyhow`. The API needs errors that know their own
//! HTTP status, so it gets [`ApiError`]. And everybody gets [`is_transient`],
//! the bouncer that decides which failures earn a retry.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::common::ResourceKind;

/// 🌐 What the read API can go wrong with, and how loudly.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 🔍 "<Label> with id <id> not found"
    #[error("{} with id {id} not found", kind.label())]
    NotFound { kind: ResourceKind, id: String },

    /// 🚧 bad query parameters
    #[error("{0}")]
    Validation(String),

    /// 📡 the search engine (or something behind it) let us down
    #[error("upstream failure: {0:#}")]
    Upstream(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Upstream(err) if is_transient(err) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::Upstream(err) => {
                // 🧅 the full onion goes to the logs, the client gets the short version
                error!("💀 upstream failure while serving a request: {:#}", err);
                if status == StatusCode::SERVICE_UNAVAILABLE {
                    "Search backend is unavailable, try again shortly".to_string()
                } else {
                    "Internal server error".to_string()
                }
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// 📡 A non-2xx answer from an HTTP upstream, kept typed so the retry logic can
/// tell a 503 (come back later) from a 400 (don't bother).
#[derive(Debug, thiserror::Error)]
#[error("{operation} returned HTTP {status}: {body}")]
pub struct UpstreamStatus {
    pub operation: String,
    pub status: u16,
    pub body: String,
}

impl UpstreamStatus {
    pub fn is_transient(&self) -> bool {
        matches!(self.status, 429 | 502 | 503 | 504)
    }
}

/// 🕵️ Walk the error chain and decide whether retrying could possibly help.
///
/// Transport trouble (refused connections, timeouts, dropped sockets, pool
/// exhaustion, 429/5xx gateway answers) is transient. Everything else, such as
/// bad SQL, bad JSON or a 400 from the index, is terminal.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            return e.is_connect() || e.is_timeout() || e.is_request();
        }
        if let Some(e) = cause.downcast_ref::<sqlx::Error>() {
            return matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            );
        }
        if let Some(e) = cause.downcast_ref::<redis::RedisError>() {
            return e.is_io_error()
                || e.is_connection_refusal()
                || e.is_timeout()
                || e.is_connection_dropped();
        }
        if let Some(e) = cause.downcast_ref::<UpstreamStatus>() {
            return e.is_transient();
        }
        if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
            );
        }
        false
    })
}
