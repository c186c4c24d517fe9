//! 🍿 The read side: cache first, search engine second, and a policy for
//! when either one has a bad day.
//!
//! ⚖️ The policy, stated once and applied everywhere:
//! - a cache that errors, or hands back bytes that don't decode, is a miss
//!   (logged) and the search engine answers instead;
//! - a cache write that fails is logged and the response still goes out;
//! - a search engine that errors is an error, surfaced as [`ApiError::Upstream`];
//! - "no such document" is not an error and is never cached.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::app_config::{CacheConfig, IndexNames};
use crate::backends::ElasticsearchClient;
use crate::backends::elasticsearch::{
    films_by_person_query, full_text_query, list_query, within_result_window,
};
use crate::cache::{self, CacheBackend};
use crate::common::Page;
use crate::error::ApiError;
use crate::models::{CatalogModel, Film};

/// 🧠➡️📡 Look in the cache; on a miss, `fetch`, then remember the answer for `ttl`.
pub async fn cache_aside<T, F, Fut>(
    cache: &CacheBackend,
    key: &str,
    ttl: Duration,
    fetch: F,
) -> Result<Option<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
            Ok(value) => return Ok(Some(value)),
            Err(err) => warn!("⚠️ cached value for '{key}' does not decode ({err}); refetching"),
        },
        Ok(None) => {}
        Err(err) => warn!("⚠️ cache read for '{key}' failed ({:#}); asking the search engine", err),
    }

    let Some(value) = fetch().await? else {
        debug!("🔍 '{key}': nothing there, nothing cached");
        return Ok(None);
    };

    match serde_json::to_string(&value) {
        Ok(raw) => {
            if let Err(err) = cache.set(key, &raw, ttl).await {
                warn!("⚠️ cache write for '{key}' failed: {:#}", err);
            }
        }
        Err(err) => warn!("⚠️ could not serialize '{key}' for the cache: {err}"),
    }
    Ok(Some(value))
}

fn decode_hits<M: DeserializeOwned>(hits: Vec<Value>, index: &str) -> Result<Vec<M>> {
    hits.into_iter()
        .map(|hit| {
            serde_json::from_value(hit)
                .with_context(|| format!("💀 a document in '{index}' does not fit its model"))
        })
        .collect()
}

/// 🪟 `true` when the cluster can serve `page`. A page past the result window
/// is past the last page of any index we could hold, so it is empty.
fn answerable(index: &str, page: Page) -> bool {
    if within_result_window(page) {
        return true;
    }
    debug!(
        "🪟 '{index}': page {} of size {} is past the result window; empty without asking",
        page.number, page.size
    );
    false
}

/// 🎬 Read operations for one model, wired to the shared client and cache.
pub struct CatalogService<'a, M: CatalogModel> {
    search: &'a ElasticsearchClient,
    cache: &'a CacheBackend,
    indices: &'a IndexNames,
    ttl: &'a CacheConfig,
    _model: PhantomData<M>,
}

impl<'a, M: CatalogModel> CatalogService<'a, M> {
    pub fn new(
        search: &'a ElasticsearchClient,
        cache: &'a CacheBackend,
        indices: &'a IndexNames,
        ttl: &'a CacheConfig,
    ) -> Self {
        Self {
            search,
            cache,
            indices,
            ttl,
            _model: PhantomData,
        }
    }

    fn index(&self) -> &'a str {
        M::KIND.index(self.indices)
    }

    /// 🔍 One document, or [`ApiError::NotFound`].
    pub async fn get_by_id(&self, id: &str) -> Result<M, ApiError> {
        let index = self.index();
        let search = self.search;
        let found = cache_aside(
            self.cache,
            &cache::entity_key(index, id),
            self.ttl.entity_ttl(),
            || async move {
                match search.get_source(index, id).await? {
                    Some(source) => serde_json::from_value::<M>(source)
                        .map(Some)
                        .with_context(|| format!("💀 '{index}/{id}' does not fit its model")),
                    None => Ok(None),
                }
            },
        )
        .await?;
        found.ok_or_else(|| ApiError::NotFound {
            kind: M::KIND,
            id: id.to_string(),
        })
    }

    /// 📄 Everything, a page at a time. Past the last page is an empty list.
    pub async fn list(&self, page: Page) -> Result<Vec<M>, ApiError> {
        let index = self.index();
        if !answerable(index, page) {
            return Ok(Vec::new());
        }
        let search = self.search;
        let items = cache_aside(
            self.cache,
            &cache::list_key(index, page),
            self.ttl.listing_ttl(),
            || async move {
                let hits = search.search(index, &list_query(page)).await?;
                decode_hits::<M>(hits, index).map(Some)
            },
        )
        .await?;
        Ok(items.unwrap_or_default())
    }

    /// 🔍 Full text, every word must match.
    pub async fn search(&self, query: &str, page: Page) -> Result<Vec<M>, ApiError> {
        let index = self.index();
        if !answerable(index, page) {
            return Ok(Vec::new());
        }
        let search = self.search;
        let items = cache_aside(
            self.cache,
            &cache::search_key(index, query, page),
            self.ttl.listing_ttl(),
            || async move {
                let body = full_text_query(M::KIND, query, page);
                let hits = search.search(index, &body).await?;
                decode_hits::<M>(hits, index).map(Some)
            },
        )
        .await?;
        Ok(items.unwrap_or_default())
    }
}

impl CatalogService<'_, Film> {
    /// 🎭 Every film the person directed, acted in, or wrote. An unknown
    /// person simply has no films.
    pub async fn films_by_person(&self, person_id: &str, page: Page) -> Result<Vec<Film>, ApiError> {
        let index = self.index();
        if !answerable(index, page) {
            return Ok(Vec::new());
        }
        let search = self.search;
        let items = cache_aside(
            self.cache,
            &cache::by_person_key(index, person_id, page),
            self.ttl.listing_ttl(),
            || async move {
                let body = films_by_person_query(person_id, page);
                let hits = search.search(index, &body).await?;
                decode_hits::<Film>(hits, index).map(Some)
            },
        )
        .await?;
        Ok(items.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn the_one_where_the_second_ask_never_leaves_the_building() -> Result<()> {
        let cache = CacheBackend::InMemory(InMemoryCache::new());
        let counter = AtomicUsize::new(0);
        let fetches = &counter;

        for _ in 0..3 {
            let value: Option<String> =
                cache_aside(&cache, "movies:id:f1", Duration::from_secs(50), move || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("Alien".to_string()))
                })
                .await?;
            assert_eq!(value.as_deref(), Some("Alien"));
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nothing_is_not_worth_remembering() -> Result<()> {
        let memory = InMemoryCache::new();
        let cache = CacheBackend::InMemory(memory.clone());

        let value: Option<String> =
            cache_aside(&cache, "movies:id:ghost", Duration::from_secs(50), || async {
                Ok(None)
            })
            .await?;

        assert_eq!(value, None);
        assert_eq!(memory.writes(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_scrambled_cache_entry_is_a_miss() -> Result<()> {
        let cache = CacheBackend::InMemory(InMemoryCache::new());
        cache
            .set("genres:id:g1", "not json at all", Duration::from_secs(50))
            .await?;

        let value: Option<Vec<u32>> =
            cache_aside(&cache, "genres:id:g1", Duration::from_secs(50), || async {
                Ok(Some(vec![1, 2, 3]))
            })
            .await?;

        assert_eq!(value, Some(vec![1, 2, 3]));
        assert_eq!(cache.get("genres:id:g1").await?.as_deref(), Some("[1,2,3]"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_search_outage_is_not_swallowed() {
        let cache = CacheBackend::InMemory(InMemoryCache::new());
        let result: Result<Option<String>> =
            cache_aside(&cache, "movies:list:20:1", Duration::from_secs(10), || async {
                Err(anyhow::anyhow!("💀 the cluster is on fire"))
            })
            .await;
        assert!(result.is_err());
    }
}
