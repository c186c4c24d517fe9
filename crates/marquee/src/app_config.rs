//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the popcorn
//! machine. In the projection booth. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! Every section has defaults, so `MARQUEE_*` env vars alone are enough to boot.
//! Nested keys use a double underscore: `MARQUEE_POSTGRES__HOST=db`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::common::ResourceKind;
use crate::retry::RetryPolicy;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub etl: EtlConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// 🐘 Where the rows live. The source of truth. The elephant never forgets.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    /// 🔒 "postgres" is not a password. It is a cry for help.
    pub password: Option<String>,
    /// 📂 the schema holding film_work & friends
    pub search_path: String,
    pub max_connections: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            dbname: "movies_database".to_string(),
            user: "app".to_string(),
            password: None,
            search_path: "content".to_string(),
            max_connections: 4,
        }
    }
}

/// 📡 Elasticsearch: where documents go to become searchable.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ElasticsearchConfig {
    /// 📡 Include scheme + port. Yes, all of it. No, `localhost` alone is not enough.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 🔒 API key wins over basic auth. This is not a democracy.
    pub api_key: Option<String>,
    pub indices: IndexNames,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9200".to_string(),
            username: None,
            password: None,
            api_key: None,
            indices: IndexNames::default(),
        }
    }
}

/// 🏷️ One index per resource kind.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct IndexNames {
    pub movies: String,
    pub genres: String,
    pub persons: String,
}

impl Default for IndexNames {
    fn default() -> Self {
        Self {
            movies: "movies".to_string(),
            genres: "genres".to_string(),
            persons: "persons".to_string(),
        }
    }
}

impl IndexNames {
    /// 🎯 Which index does this kind of thing live in?
    pub fn for_kind(&self, kind: ResourceKind) -> &str {
        match kind {
            ResourceKind::Films => &self.movies,
            ResourceKind::Genres => &self.genres,
            ResourceKind::Persons => &self.persons,
        }
    }
}

/// 🧠 Redis connection knobs.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            password: None,
        }
    }
}

impl RedisConfig {
    /// 🔗 `redis://[:password@]host:port/db` — the connection string nobody remembers the shape of.
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// 🗄️ Which cache sits in front of the search engine.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Redis,
    /// 🧪 process-local. great for laptops, terrible for fleets.
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// ⏳ by-id entries live this long
    pub entity_ttl_secs: u64,
    /// ⏳ list / search / by-person pages live this long
    pub listing_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Redis,
            entity_ttl_secs: 50,
            listing_ttl_secs: 10,
        }
    }
}

impl CacheConfig {
    pub fn entity_ttl(&self) -> Duration {
        Duration::from_secs(self.entity_ttl_secs)
    }

    pub fn listing_ttl(&self) -> Duration {
        Duration::from_secs(self.listing_ttl_secs)
    }
}

/// 🔄 The ETL loop's personal trainer.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EtlConfig {
    /// 📦 rows per extracted page
    pub page_size: u32,
    /// 💤 nap length between runs
    pub delay_secs: u64,
    /// 📁 where the watermark and in-flight page are persisted
    pub state_file: PathBuf,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            delay_secs: 60,
            state_file: PathBuf::from("state.json"),
        }
    }
}

/// 🌐 The read API.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    /// 🚧 `page[size]` above this is a 422
    pub max_page_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8001".to_string(),
            max_page_size: 1000,
        }
    }
}

/// 🔁 Backoff knobs. `max_attempts` absent means "retry until the heat death of the universe".
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub start_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            start_delay_ms: 100,
            factor: 2.0,
            max_delay_ms: 10_000,
            max_attempts: None,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            start_delay: Duration::from_millis(self.start_delay_ms),
            factor: self.factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 📐 DESIGN NOTE:
///   - `config_file_name` None → env vars (MARQUEE_*) on top of defaults.
///   - `config_file_name` Some → env vars + TOML file, merged. TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("MARQUEE_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (MARQUEE_*). \
             The file exists in our hearts, but apparently not in a parseable shape.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (MARQUEE_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        // 🧪 Figment wants TOML from disk, like it's method acting.
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 tempfile refused to exist");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config. The filesystem said 'new phone who dis'.");
        file
    }

    #[test]
    fn the_one_where_an_empty_file_still_boots_on_defaults() {
        let file = write_test_config("");
        let app_config = load_config(Some(file.path())).expect("💀 defaults should parse");

        assert_eq!(app_config.postgres.port, 5432);
        assert_eq!(app_config.postgres.search_path, "content");
        assert_eq!(app_config.elasticsearch.indices, IndexNames::default());
        assert_eq!(app_config.cache.backend, CacheBackendKind::Redis);
        assert_eq!(app_config.cache.entity_ttl_secs, 50);
        assert_eq!(app_config.etl.page_size, 100);
        assert_eq!(app_config.api.max_page_size, 1000);
        assert_eq!(app_config.retry.max_attempts, None);
    }

    #[test]
    fn the_one_where_the_toml_file_overrides_the_knobs() {
        let file = write_test_config(
            r#"
            [postgres]
            host = "db.internal"
            password = "hunter2"

            [elasticsearch]
            url = "http://es:9200"
            [elasticsearch.indices]
            movies = "films_v2"

            [cache]
            backend = "memory"
            listing_ttl_secs = 3

            [etl]
            delay_secs = 5
            state_file = "/var/lib/marquee/state.json"

            [retry]
            max_attempts = 7
            "#,
        );

        let app_config = load_config(Some(file.path())).expect("💀 overrides should parse");

        assert_eq!(app_config.postgres.host, "db.internal");
        assert_eq!(app_config.postgres.password.as_deref(), Some("hunter2"));
        assert_eq!(app_config.postgres.port, 5432, "untouched keys keep their defaults");
        assert_eq!(app_config.elasticsearch.indices.movies, "films_v2");
        assert_eq!(app_config.elasticsearch.indices.genres, "genres");
        assert_eq!(app_config.cache.backend, CacheBackendKind::Memory);
        assert_eq!(app_config.cache.listing_ttl(), Duration::from_secs(3));
        assert_eq!(app_config.etl.delay_secs, 5);
        assert_eq!(
            app_config.etl.state_file,
            PathBuf::from("/var/lib/marquee/state.json")
        );
        assert_eq!(app_config.retry.policy().max_attempts, Some(7));
    }

    #[test]
    fn the_one_where_a_typo_in_the_enum_is_a_loud_error() {
        let file = write_test_config(
            r#"
            [cache]
            backend = "memcached"
            "#,
        );

        let the_verdict = load_config(Some(file.path()));
        assert!(the_verdict.is_err(), "unknown cache backend must not parse");
    }

    #[test]
    fn the_one_where_the_toml_crate_agrees_with_figment() {
        // 🧪 the same fixture, parsed by plain `toml`, to make sure the serde shape is honest
        let parsed: AppConfig = toml::from_str(
            r#"
            [redis]
            host = "cache"
            port = 6380
            db = 2
            password = "s3cret"
            "#,
        )
        .expect("💀 plain toml should parse too");

        assert_eq!(parsed.redis.connection_url(), "redis://:s3cret@cache:6380/2");
        assert_eq!(
            RedisConfig::default().connection_url(),
            "redis://127.0.0.1:6379/0"
        );
    }

    #[test]
    fn the_one_where_each_kind_finds_its_index() {
        let names = IndexNames::default();
        assert_eq!(names.for_kind(ResourceKind::Films), "movies");
        assert_eq!(names.for_kind(ResourceKind::Genres), "genres");
        assert_eq!(names.for_kind(ResourceKind::Persons), "persons");
    }
}
