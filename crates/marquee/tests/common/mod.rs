//! 🧪 A pocket-sized Elasticsearch for the integration tests.
//!
//! One wiremock responder that actually keeps documents around: indices are
//! created by HEAD/PUT or implicitly by `_bulk`, documents come back from
//! `_doc/{id}`, and `_search` understands exactly the queries marquee sends
//! (`match_all`, `simple_query_string` with AND, the nested person `should`).
//! Hits are sorted by id. Scoring is for grown-up clusters.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request as HttpRequest, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use marquee::api::{AppContext, build_router};
use marquee::app_config::{AppConfig, CacheBackendKind};
use marquee::backends::ElasticsearchClient;
use marquee::cache::{CacheBackend, InMemoryCache};

type Indices = BTreeMap<String, BTreeMap<String, Value>>;

/// 🗄️ The fake cluster. Clone it freely; every clone sees the same shelves.
#[derive(Clone, Default)]
pub struct FakeElasticsearch {
    indices: Arc<Mutex<Indices>>,
}

impl FakeElasticsearch {
    pub fn put(&self, index: &str, id: &str, source: Value) {
        let mut indices = self.indices.lock().expect("💀 fake cluster lock");
        indices
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), source);
    }

    pub fn documents(&self, index: &str) -> BTreeMap<String, Value> {
        let indices = self.indices.lock().expect("💀 fake cluster lock");
        indices.get(index).cloned().unwrap_or_default()
    }

    fn bulk(&self, body: &[u8]) -> ResponseTemplate {
        let text = String::from_utf8_lossy(body);
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let mut items = Vec::new();
        let mut indices = self.indices.lock().expect("💀 fake cluster lock");
        while let (Some(action), Some(source)) = (lines.next(), lines.next()) {
            let action: Value = serde_json::from_str(action).expect("💀 bulk action line");
            let source: Value = serde_json::from_str(source).expect("💀 bulk source line");
            let index = action["index"]["_index"].as_str().expect("💀 _index").to_string();
            let id = action["index"]["_id"].as_str().expect("💀 _id").to_string();
            let created = indices
                .entry(index.clone())
                .or_default()
                .insert(id.clone(), source)
                .is_none();
            items.push(json!({
                "index": {
                    "_index": index,
                    "_id": id,
                    "status": if created { 201 } else { 200 },
                    "result": if created { "created" } else { "updated" }
                }
            }));
        }
        ResponseTemplate::new(200).set_body_json(json!({"errors": false, "items": items}))
    }

    fn search(&self, index: &str, body: &[u8]) -> ResponseTemplate {
        let indices = self.indices.lock().expect("💀 fake cluster lock");
        let Some(docs) = indices.get(index) else {
            return ResponseTemplate::new(404).set_body_json(json!({
                "error": {"type": "index_not_found_exception"},
                "status": 404
            }));
        };
        let request: Value = serde_json::from_slice(body).expect("💀 search body");
        let query = &request["query"];

        // 📚 BTreeMap iteration is already id order
        let matching: Vec<(&String, &Value)> = docs
            .iter()
            .filter(|(_, source)| matches_query(query, source))
            .collect();
        let from = request["from"].as_u64().unwrap_or(0) as usize;
        let size = request["size"].as_u64().unwrap_or(10) as usize;
        // 🪟 like the real thing: from + size past 10k is a 400, not an empty page
        if from + size > 10_000 {
            return ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "type": "search_phase_execution_exception",
                    "reason": "Result window is too large, from + size must be less than or equal to: [10000]"
                },
                "status": 400
            }));
        }
        let hits: Vec<Value> = matching
            .iter()
            .skip(from)
            .take(size)
            .map(|(id, source)| json!({"_index": index, "_id": id, "_source": source}))
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({
            "hits": {"total": {"value": matching.len()}, "hits": hits}
        }))
    }
}

impl Respond for FakeElasticsearch {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let segments: Vec<String> = request
            .url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let method = request.method.as_str();

        match (method, segments.as_slice()) {
            ("GET", []) => ResponseTemplate::new(200)
                .set_body_json(json!({"tagline": "You Know, for Search"})),
            ("POST", [bulk]) if bulk == "_bulk" => self.bulk(&request.body),
            ("HEAD", [index]) => {
                let exists = self
                    .indices
                    .lock()
                    .expect("💀 fake cluster lock")
                    .contains_key(index);
                ResponseTemplate::new(if exists { 200 } else { 404 })
            }
            ("PUT", [index]) => {
                let mut indices = self.indices.lock().expect("💀 fake cluster lock");
                if indices.contains_key(index) {
                    return ResponseTemplate::new(400).set_body_json(json!({
                        "error": {"type": "resource_already_exists_exception"},
                        "status": 400
                    }));
                }
                indices.insert(index.clone(), BTreeMap::new());
                ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true, "index": index}))
            }
            ("GET", [index, doc, id]) if doc == "_doc" => {
                let indices = self.indices.lock().expect("💀 fake cluster lock");
                match indices.get(index).and_then(|docs| docs.get(id)) {
                    Some(source) => ResponseTemplate::new(200).set_body_json(json!({
                        "_index": index, "_id": id, "found": true, "_source": source
                    })),
                    None => ResponseTemplate::new(404)
                        .set_body_json(json!({"_index": index, "_id": id, "found": false})),
                }
            }
            ("POST", [index, search]) if search == "_search" => self.search(index, &request.body),
            _ => ResponseTemplate::new(400).set_body_json(json!({
                "error": format!("the fake cluster does not do {method} {}", request.url.path())
            })),
        }
    }
}

fn matches_query(query: &Value, source: &Value) -> bool {
    if query.get("match_all").is_some() {
        return true;
    }
    if let Some(simple) = query.get("simple_query_string") {
        return matches_all_words(simple, source);
    }
    if let Some(should) = query.pointer("/bool/should").and_then(Value::as_array) {
        return should.iter().any(|clause| matches_nested_term(clause, source));
    }
    panic!("💀 the fake cluster does not understand {query}");
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// 🔍 AND semantics: every word of the query must appear in one of the fields.
fn matches_all_words(simple: &Value, source: &Value) -> bool {
    let query = simple["query"].as_str().unwrap_or_default();
    let mut haystack = Vec::new();
    for field in simple["fields"].as_array().into_iter().flatten() {
        let name = field.as_str().unwrap_or_default();
        let name = name.split('^').next().unwrap_or(name);
        match &source[name] {
            Value::String(text) => haystack.extend(tokens(text)),
            Value::Array(values) => {
                for value in values.iter().filter_map(Value::as_str) {
                    haystack.extend(tokens(value));
                }
            }
            _ => {}
        }
    }
    let words = tokens(query);
    !words.is_empty() && words.iter().all(|word| haystack.contains(word))
}

fn matches_nested_term(clause: &Value, source: &Value) -> bool {
    let Some(nested) = clause.get("nested") else {
        return false;
    };
    let path = nested["path"].as_str().unwrap_or_default();
    let Some(term) = nested.pointer("/query/term").and_then(Value::as_object) else {
        return false;
    };
    term.iter().any(|(field, wanted)| {
        let leaf = field.strip_prefix(&format!("{path}.")).unwrap_or(field);
        source[path]
            .as_array()
            .into_iter()
            .flatten()
            .any(|entry| &entry[leaf] == wanted)
    })
}

/// 🎬 A running fake cluster and a handle on its contents.
pub async fn fake_cluster() -> (MockServer, FakeElasticsearch) {
    let server = MockServer::start().await;
    let fake = FakeElasticsearch::default();
    Mock::given(any())
        .respond_with(fake.clone())
        .mount(&server)
        .await;
    (server, fake)
}

pub fn app_config(server: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.elasticsearch.url = server.uri();
    config.cache.backend = CacheBackendKind::Memory;
    config
}

/// 🏗️ The real router, pointed at the fake cluster, with a process-local cache.
pub fn app(server: &MockServer) -> (Router, InMemoryCache) {
    let config = app_config(server);
    let search =
        ElasticsearchClient::new(config.elasticsearch.clone()).expect("💀 client for the fake");
    let memory = InMemoryCache::new();
    let ctx = AppContext::new(search, CacheBackend::InMemory(memory.clone()), config);
    (build_router(ctx), memory)
}

/// 📡 GET `uri` through the router without opening a socket.
pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            HttpRequest::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("💀 request"),
        )
        .await
        .expect("💀 router is infallible");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("💀 body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("💀 response is not JSON")
    };
    (status, body)
}

/// 🔢 How many `method` requests hit a path containing `needle`.
pub async fn count_requests(server: &MockServer, method: &str, needle: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.method.as_str() == method && request.url.path().contains(needle))
        .count()
}

/// 🗺️ who calls whom, for the films-by-person tests
pub fn credits(pairs: &[(&str, &str)]) -> Vec<Value> {
    pairs
        .iter()
        .map(|(id, name)| json!({"id": id, "name": name}))
        .collect()
}
