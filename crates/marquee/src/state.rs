//! 📁 The state file — the ETL's diary.
//!
//! A flat JSON object on local disk. Per resource kind it holds a watermark
//! (`<slug>_watermark`) and, only while a page is unacknowledged, the page
//! itself (`<slug>_in_flight`). Lose this file and the next run starts from
//! the beginning of time, which is slow but correct.
//!
//! 🔒 Writes are merge-then-rename: read what's there, lay the new keys on top,
//! write a sibling temp file, rename it over the original. A crash mid-write
//! leaves the old diary intact.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// 📂 Raw key/value persistence. No opinions about what the values mean.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 📖 Read the whole map. A missing file is an empty diary. So is a
    /// corrupt one, with a warning, because the alternative is never starting.
    pub async fn retrieve_state(&self) -> Result<Map<String, Value>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("📁 no state file at {:?} yet, starting fresh", self.path);
                return Ok(Map::new());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("💀 Could not read state file '{}'", self.path.display())
                });
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => {
                warn!(
                    "⚠️ state file {:?} holds a {} instead of an object; treating it as empty",
                    self.path,
                    json_type_name(&other)
                );
                Ok(Map::new())
            }
            Err(err) => {
                warn!(
                    "⚠️ state file {:?} is not valid JSON ({}); treating it as empty",
                    self.path, err
                );
                Ok(Map::new())
            }
        }
    }

    /// 💾 Merge `partial` into what's on disk and write it back. A `null` value
    /// deletes its key. Returns the merged map.
    pub async fn save_state(&self, partial: Map<String, Value>) -> Result<Map<String, Value>> {
        let mut merged = self.retrieve_state().await?;
        for (key, value) in partial {
            if value.is_null() {
                merged.remove(&key);
            } else {
                merged.insert(key, value);
            }
        }

        let body = serde_json::to_vec_pretty(&Value::Object(merged.clone()))
            .context("💀 State refused to serialize. JSON, of all things, said no.")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("💀 Could not create state directory '{}'", parent.display())
                })?;
            }
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        tokio::fs::write(&tmp_path, body).await.with_context(|| {
            format!("💀 Could not write state temp file '{}'", tmp_path.display())
        })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| {
                format!(
                    "💀 Could not move '{}' over '{}'",
                    tmp_path.display(),
                    self.path.display()
                )
            })?;

        Ok(merged)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 🗂️ Typed access over [`JsonFileStorage`], with the last-known map cached.
#[derive(Debug)]
pub struct State {
    storage: JsonFileStorage,
    snapshot: Map<String, Value>,
}

impl State {
    pub async fn open(storage: JsonFileStorage) -> Result<Self> {
        let snapshot = storage.retrieve_state().await?;
        Ok(Self { storage, snapshot })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.snapshot.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .with_context(|| format!("💀 State key '{key}' has an unexpected shape")),
        }
    }

    pub async fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("💀 Could not serialize state key '{key}'"))?;
        self.set_many(vec![(key.to_string(), value)]).await
    }

    /// 💾 Several keys, one write. This is how a page and its watermark land together.
    pub async fn set_many(&mut self, entries: Vec<(String, Value)>) -> Result<()> {
        let partial: Map<String, Value> = entries.into_iter().collect();
        self.snapshot = self.storage.save_state(partial).await?;
        Ok(())
    }

    pub async fn remove(&mut self, key: &str) -> Result<()> {
        if !self.snapshot.contains_key(key) {
            return Ok(());
        }
        self.set_many(vec![(key.to_string(), Value::Null)]).await
    }

    pub fn snapshot(&self) -> &Map<String, Value> {
        &self.snapshot
    }
}

/// ⏰ A position in the `(modified, id)` ordering. The extractor resumes
/// strictly after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub modified: DateTime<Utc>,
    pub id: String,
}

impl PartialOrd for Watermark {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Watermark {
    fn cmp(&self, other: &Self) -> Ordering {
        self.modified
            .cmp(&other.modified)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl Watermark {
    /// 📈 The later of the two. The watermark only ever moves forward; an attempt
    /// to move it back is logged and ignored.
    pub fn advance(current: Option<Watermark>, candidate: Watermark) -> Watermark {
        match current {
            Some(current) if candidate < current => {
                warn!(
                    "⚠️ refusing to move watermark back from {:?} to {:?}",
                    current, candidate
                );
                current
            }
            _ => candidate,
        }
    }
}
