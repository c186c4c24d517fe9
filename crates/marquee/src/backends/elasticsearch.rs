//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN — INT. SERVER ROOM — 3:47 AM
//!
//! The monitoring dashboard glows amber in the dark. One engineer, alone,
//! stares into the abyss of a RED cluster. The abyss stares back and offers a
//! 429. "I'll just reindex it," they whispered. "It'll be fast," they said.
//!
//! 🚀 This module is the one HTTP client both halves of marquee share. The ETL
//! uses it to create indices and `_bulk` documents in. The API uses it to
//! fetch by id, list, and search. Same client, same auth rules, same timeouts.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde_json::{Value, json};
use tracing::{debug, info, trace};

use crate::app_config::ElasticsearchConfig;
use crate::common::{Page, ResourceKind};
use crate::error::UpstreamStatus;

pub mod elasticsearch_sink;
pub use elasticsearch_sink::ElasticsearchSink;

/// 💀 One item the bulk API said no to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemFailure {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

/// 📊 What a `_bulk` call reported back, item by item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub indexed: usize,
    pub failures: Vec<BulkItemFailure>,
}

/// 📡 The shared HTTP muscle. Cheap to clone; the connection pool is inside.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    client: reqwest::Client,
    base: Url,
    config: ElasticsearchConfig,
}

impl ElasticsearchClient {
    /// 🚀 Build the client. 10 second connect timeout because if ES can't
    /// handshake in 10 seconds, it's not having a good time and neither are we.
    /// 30 second response timeout because bulk requests can be meaty.
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept. Probably a missing TLS cert or a cursed system OpenSSL.")?;
        let base = Url::parse(&config.url).with_context(|| {
            format!(
                "💀 '{}' is not a URL. Include scheme + port. Yes, all of it.",
                config.url
            )
        })?;
        Ok(Self {
            client,
            base,
            config,
        })
    }

    /// 🛣️ base URL plus percent-encoded path segments. Ids with slashes in them
    /// stay one segment, as the universe intended.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("💀 '{}' cannot be a base URL", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// 🔒 Auth priority: API key wins over basic auth. This is not a democracy.
    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    async fn read_json(response: reqwest::Response, operation: &str) -> Result<Value> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("💀 {operation}: the response body evaporated mid-read"))?;
        if !status.is_success() {
            return Err(UpstreamStatus {
                operation: operation.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }
            .into());
        }
        serde_json::from_slice(&body)
            .with_context(|| format!("💀 {operation}: Elasticsearch answered in something other than JSON"))
    }

    /// 📡 "Hello? Is this thing on?" — a developer, gesturing at a cluster.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .authed(self.client.get(self.base.clone()))
            .send()
            .await
            .context("💀 Could not reach Elasticsearch at all. Check the URL, the network, your feelings.")?;
        Self::read_json(response, "ping").await.map(|_| ())
    }

    /// 🔍 HEAD `/<index>`: 200 means yes, 404 means no, anything else means trouble.
    pub async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self
            .authed(self.client.head(self.url(&[index])?))
            .send()
            .await
            .with_context(|| format!("💀 Knocked on index '{index}', got ghosted"))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(UpstreamStatus {
                operation: format!("HEAD {index}"),
                status: status.as_u16(),
                body: String::new(),
            }
            .into()),
        }
    }

    /// 🏗️ PUT `/<index>` with a mapping. Returns `false` when somebody else got
    /// there first (`resource_already_exists_exception`), which is fine.
    pub async fn create_index(&self, index: &str, body: &Value) -> Result<bool> {
        let response = self
            .authed(self.client.put(self.url(&[index])?))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .with_context(|| format!("💀 Tried to create index '{index}', the network said no"))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let text = response.text().await.unwrap_or_default();
            if text.contains("resource_already_exists_exception") {
                debug!("🏗️ index '{index}' already exists, someone beat us to it");
                return Ok(false);
            }
            return Err(UpstreamStatus {
                operation: format!("create index {index}"),
                status: status.as_u16(),
                body: text,
            }
            .into());
        }
        Self::read_json(response, &format!("create index {index}")).await?;
        info!("🏗️ created index '{index}'");
        Ok(true)
    }

    /// 🏗️ Create `index` with `kind`'s mapping unless it is already there.
    pub async fn ensure_index(&self, kind: ResourceKind, index: &str) -> Result<()> {
        if self.index_exists(index).await? {
            debug!("✅ index '{index}' exists and is accepting visitors");
            return Ok(());
        }
        self.create_index(index, &index_mapping(kind)).await?;
        Ok(())
    }

    /// 📦 POST `/_bulk` with an NDJSON body. Transport failures and non-2xx
    /// answers are errors; per-item rejections come back in the report.
    pub async fn bulk(&self, ndjson: String) -> Result<BulkReport> {
        trace!("📡 sending {} bytes to /_bulk", ndjson.len());
        let response = self
            .authed(self.client.post(self.url(&["_bulk"])?))
            // ⚠️ application/x-ndjson, not application/json. VERY important.
            .header("Content-Type", "application/x-ndjson")
            .body(ndjson)
            .send()
            .await
            .context("💀 The bulk request never made it to Elasticsearch. Check connectivity, check timeouts.")?;
        let body = Self::read_json(response, "bulk").await?;
        Ok(parse_bulk_response(&body))
    }

    /// 🔍 GET `/<index>/_doc/<id>`. Not found, or a missing index, is `None`.
    pub async fn get_source(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let response = self
            .authed(self.client.get(self.url(&[index, "_doc", id])?))
            .send()
            .await
            .with_context(|| format!("💀 Could not ask index '{index}' for document '{id}'"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::read_json(response, &format!("get {index}/{id}")).await?;
        if body.get("found").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        Ok(body.get("_source").cloned())
    }

    /// 🔍 POST `/<index>/_search` and hand back the `_source` of every hit.
    /// A missing index is an empty shelf, not a crisis.
    pub async fn search(&self, index: &str, body: &Value) -> Result<Vec<Value>> {
        let response = self
            .authed(self.client.post(self.url(&[index, "_search"])?))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .with_context(|| format!("💀 Search against index '{index}' never arrived"))?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("🔍 index '{index}' does not exist yet; empty result");
            return Ok(Vec::new());
        }
        let body = Self::read_json(response, &format!("search {index}")).await?;
        let hits = body
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| hit.get("_source").cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }
}

/// 🧾 Walk the `items` of a bulk response. Anything with an `error` or a
/// status of 300 or more is a failure; the rest got indexed.
pub fn parse_bulk_response(body: &Value) -> BulkReport {
    let mut report = BulkReport::default();
    let Some(items) = body.get("items").and_then(Value::as_array) else {
        return report;
    };
    for item in items {
        // 📦 each item is `{"<action>": {...}}`; we only send `index`
        let Some(result) = item.as_object().and_then(|obj| obj.values().next()) else {
            continue;
        };
        let raw_status = result.get("status").and_then(Value::as_u64);
        let status = raw_status.and_then(|raw| u16::try_from(raw).ok());
        let error = result.get("error");
        // 💀 a status that doesn't fit in a u16 isn't an HTTP status, and it certainly isn't a success
        let garbled = raw_status.is_some() && status.is_none();
        if error.is_some() || garbled || status.is_some_and(|status| status >= 300) {
            report.failures.push(BulkItemFailure {
                id: result
                    .get("_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                status: status.unwrap_or_default(),
                reason: error
                    .map(|e| {
                        e.get("reason")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| e.to_string())
                    })
                    .unwrap_or_default(),
            });
        } else {
            report.indexed += 1;
        }
    }
    report
}

/// 🗺️ The fixed mapping each kind's index is created with.
pub fn index_mapping(kind: ResourceKind) -> Value {
    let person_ref = json!({
        "type": "nested",
        "dynamic": "strict",
        "properties": {
            "id": {"type": "keyword"},
            "name": {"type": "text"}
        }
    });
    let text_with_raw = json!({
        "type": "text",
        "fields": {"raw": {"type": "keyword"}}
    });
    let mappings = match kind {
        ResourceKind::Films => json!({
            "dynamic": "strict",
            "properties": {
                "id": {"type": "keyword"},
                "title": text_with_raw,
                "description": {"type": "text"},
                "imdb_rating": {"type": "float"},
                "type": {"type": "keyword"},
                "created": {"type": "date"},
                "modified": {"type": "date"},
                "directors": person_ref,
                "actors": person_ref,
                "writers": person_ref,
                "directors_names": {"type": "text"},
                "actors_names": {"type": "text"},
                "writers_names": {"type": "text"},
                "genre": {
                    "type": "nested",
                    "dynamic": "strict",
                    "properties": {
                        "id": {"type": "keyword"},
                        "name": {"type": "keyword"}
                    }
                }
            }
        }),
        ResourceKind::Persons => json!({
            "dynamic": "strict",
            "properties": {
                "id": {"type": "keyword"},
                "name": text_with_raw,
                "role": {"type": "text"},
                "film_ids": {"type": "keyword"}
            }
        }),
        ResourceKind::Genres => json!({
            "dynamic": "strict",
            "properties": {
                "id": {"type": "keyword"},
                "name": text_with_raw,
                "description": {"type": "text"}
            }
        }),
    };
    json!({
        "settings": {"refresh_interval": "1s"},
        "mappings": mappings
    })
}

/// 🔍 Which fields a free-text query looks at, per kind.
pub fn search_fields(kind: ResourceKind) -> Vec<&'static str> {
    match kind {
        ResourceKind::Films => vec![
            "title^3",
            "description",
            "actors_names",
            "directors_names",
            "writers_names",
        ],
        ResourceKind::Persons => vec!["name"],
        ResourceKind::Genres => vec!["name^2", "description"],
    }
}

/// 🪟 Elasticsearch's default `index.max_result_window`. `from + size` past
/// this is a 400 from the cluster, so pages that far out are never asked for.
pub const MAX_RESULT_WINDOW: usize = 10_000;

/// 🪟 Can the cluster answer this page at all?
pub fn within_result_window(page: Page) -> bool {
    page.end() <= MAX_RESULT_WINDOW
}

/// 📄 Everything, one page at a time, in id order so pages don't shuffle.
pub fn list_query(page: Page) -> Value {
    json!({
        "query": {"match_all": {}},
        "from": page.from(),
        "size": page.size,
        "sort": [{"id": "asc"}]
    })
}

/// 🔍 `simple_query_string` with AND between words: every word must match.
pub fn full_text_query(kind: ResourceKind, query: &str, page: Page) -> Value {
    json!({
        "query": {
            "simple_query_string": {
                "query": query,
                "fields": search_fields(kind),
                "default_operator": "and"
            }
        },
        "from": page.from(),
        "size": page.size,
        "sort": ["_score", {"id": "asc"}]
    })
}

/// 🎭 Films where the person shows up as director, actor or writer.
pub fn films_by_person_query(person_id: &str, page: Page) -> Value {
    let nested = |role: &str| {
        json!({
            "nested": {
                "path": role,
                "query": {"term": {format!("{role}.id"): person_id}}
            }
        })
    };
    json!({
        "query": {
            "bool": {
                "should": [nested("directors"), nested("actors"), nested("writers")],
                "minimum_should_match": 1
            }
        },
        "from": page.from(),
        "size": page.size,
        "sort": [{"id": "asc"}]
    })
}
