//! 🧠 The cache — the goldfish in the room. Remembers everything, briefly.
//!
//! Two backends behind one enum, the same way the pipeline does sources and
//! sinks: [`RedisCache`] for real deployments, [`InMemoryCache`] for tests and
//! laptops. Both speak strings: the caller serializes, the cache stores, the
//! TTL forgets.
//!
//! 🔑 Keys are namespaced by index name, so a payload cached for the `movies`
//! index only ever comes back to code that decodes films.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::app_config::{CacheBackendKind, CacheConfig, RedisConfig};
use crate::common::Page;

/// 🔑 `<index>:id:<id>`
pub fn entity_key(index: &str, id: &str) -> String {
    format!("{index}:id:{id}")
}

/// 🔑 `<index>:list:<size>:<number>`
pub fn list_key(index: &str, page: Page) -> String {
    format!("{index}:list:{}:{}", page.size, page.number)
}

/// 🔑 `<index>:search:<size>:<number>:<query>`; the query goes last so colons in it can't collide
pub fn search_key(index: &str, query: &str, page: Page) -> String {
    format!("{index}:search:{}:{}:{}", page.size, page.number, query.trim())
}

/// 🔑 `<films index>:by_person:<person id>:<size>:<number>`
pub fn by_person_key(films_index: &str, person_id: &str, page: Page) -> String {
    format!(
        "{films_index}:by_person:{person_id}:{}:{}",
        page.size, page.number
    )
}

/// ⏱️ how long one attempt to reach Redis may take before we give up on it
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// 💤 after a failed attempt, requests skip Redis this long instead of queueing on it
const RECONNECT_AFTER: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Link {
    manager: Option<ConnectionManager>,
    failed_at: Option<Instant>,
}

/// 🧠 Redis, through a `ConnectionManager` that reconnects on its own.
///
/// Connecting is lazy and retried: Redis being down when the API boots means
/// cache misses until it is back, not an API that won't start.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    address: String,
    link: Arc<tokio::sync::Mutex<Link>>,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// 🏗️ Parse the connection string. No network yet.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.connection_url())
            .context("💀 The Redis connection string is not a Redis connection string")?;
        Ok(Self {
            client,
            address: format!("{}:{}", config.host, config.port),
            link: Arc::default(),
        })
    }

    /// 🔌 The shared manager, connecting first if nobody has yet.
    pub async fn connection(&self) -> Result<ConnectionManager> {
        let mut link = self.link.lock().await;
        if let Some(manager) = link.manager.as_ref() {
            return Ok(manager.clone());
        }
        if let Some(failed_at) = link.failed_at {
            if failed_at.elapsed() < RECONNECT_AFTER {
                anyhow::bail!("💀 Redis at {} was unreachable moments ago; not asking again yet", self.address);
            }
        }
        let connected = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(self.client.clone()))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|connected| connected.map_err(anyhow::Error::from))
            .with_context(|| {
                format!(
                    "💀 Could not reach Redis at {}. The goldfish is not in the bowl.",
                    self.address
                )
            });
        match connected {
            Ok(manager) => {
                info!("🧠 connected to Redis at {}", self.address);
                link.failed_at = None;
                link.manager = Some(manager.clone());
                Ok(manager)
            }
            Err(err) => {
                link.failed_at = Some(Instant::now());
                Err(err)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("💀 Redis GET '{key}' failed"))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(key, value, seconds)
            .await
            .with_context(|| format!("💀 Redis SET '{key}' failed"))?;
        Ok(())
    }
}

/// 🧪 A HashMap with an expiry date on every entry. Counts its reads and
/// writes so tests can check who asked.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<tokio::sync::Mutex<HashMap<String, (String, Instant)>>>,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            Some(_) => {
                // ⏳ past its expiry date. into the bin.
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
    }
}

/// 🎭 The many faces of the cache.
#[derive(Debug, Clone)]
pub enum CacheBackend {
    Redis(RedisCache),
    InMemory(InMemoryCache),
}

impl CacheBackend {
    /// 🏗️ Whichever backend the config asked for. Only a malformed Redis
    /// address is an error; an unreachable one is a warning.
    pub async fn from_config(cache: &CacheConfig, redis: &RedisConfig) -> Result<Self> {
        match cache.backend {
            CacheBackendKind::Redis => {
                info!("🧠 caching in Redis at {}:{}", redis.host, redis.port);
                let cache = RedisCache::new(redis)?;
                if let Err(err) = cache.connection().await {
                    warn!(
                        "⚠️ {:#}. Serving uncached and trying again on every request.",
                        err
                    );
                }
                Ok(CacheBackend::Redis(cache))
            }
            CacheBackendKind::Memory => {
                info!("🧠 caching in process memory");
                Ok(CacheBackend::InMemory(InMemoryCache::new()))
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = match self {
            CacheBackend::Redis(cache) => cache.get(key).await?,
            CacheBackend::InMemory(cache) => cache.get(key).await,
        };
        debug!(
            "🧠 cache {} for '{key}'",
            if value.is_some() { "hit" } else { "miss" }
        );
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        match self {
            CacheBackend::Redis(cache) => cache.set(key, value, ttl).await,
            CacheBackend::InMemory(cache) => {
                cache.set(key, value, ttl).await;
                Ok(())
            }
        }
    }
}
