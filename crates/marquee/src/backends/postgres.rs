//! 🐘 The Postgres source — the elephant that never forgets a modified timestamp.
//!
//! One [`PostgresSource`] per resource kind per run. Each one pages through
//! rows whose own (or, for films, related people/genre) modification time is
//! past the watermark, in `(modified, id)` order, using keyset pagination.
//!
//! 🔒 The durability deal, in one sentence: write the page and the new
//! watermark to the state file before handing the page out, erase the page
//! after the sink said thanks. Die in between and the page comes back next run.
//! At-least-once. The upsert downstream shrugs off the duplicate.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::{debug, info};

use crate::app_config::PostgresConfig;
use crate::backends::Source;
use crate::common::{ResourceKind, RowBatch, SourceRow};
use crate::retry::{RetryPolicy, retry};
use crate::state::{State, Watermark};

// 🔤 ids compare as bytes (`COLLATE "C"`) so the database walks rows in the
// same order `Watermark` sorts them; a locale collation would skip or repeat.

/// 🎞️ A film changes when it changes, or when any of its people or genres do.
const FILMS_QUERY: &str = r#"
SELECT changed.id, changed.modified, changed.doc
FROM (
    SELECT
        fw.id::text AS id,
        GREATEST(
            fw.modified,
            COALESCE(MAX(p.modified), fw.modified),
            COALESCE(MAX(g.modified), fw.modified)
        ) AS modified,
        jsonb_build_object(
            'id', fw.id,
            'title', fw.title,
            'description', fw.description,
            'rating', fw.rating,
            'type', fw.type,
            'created', fw.created,
            'modified', fw.modified,
            'people', COALESCE(
                jsonb_agg(DISTINCT jsonb_build_object(
                    'person_role', pfw.role,
                    'person_id', p.id,
                    'person_name', p.full_name
                )) FILTER (WHERE p.id IS NOT NULL),
                '[]'::jsonb
            ),
            'genres', COALESCE(
                jsonb_agg(DISTINCT jsonb_build_object(
                    'genre_id', g.id,
                    'genre_name', g.name
                )) FILTER (WHERE g.id IS NOT NULL),
                '[]'::jsonb
            )
        ) AS doc
    FROM film_work fw
    LEFT JOIN person_film_work pfw ON pfw.film_work_id = fw.id
    LEFT JOIN person p ON p.id = pfw.person_id
    LEFT JOIN genre_film_work gfw ON gfw.film_work_id = fw.id
    LEFT JOIN genre g ON g.id = gfw.genre_id
    GROUP BY fw.id
) AS changed
WHERE $1::timestamptz IS NULL
    OR (changed.modified, changed.id COLLATE "C") > ($1::timestamptz, $2::text COLLATE "C")
ORDER BY changed.modified, changed.id COLLATE "C"
LIMIT $3
"#;

/// 🎭 A person changes when they do, or when a film they are credited on does.
/// Credits are seen through the film they sit on.
const PERSONS_QUERY: &str = r#"
SELECT changed.id, changed.modified, changed.doc
FROM (
    SELECT
        p.id::text AS id,
        GREATEST(
            p.modified,
            COALESCE(MAX(fw.modified), p.modified)
        ) AS modified,
        jsonb_build_object(
            'id', p.id,
            'full_name', p.full_name,
            'roles', COALESCE(
                jsonb_agg(DISTINCT pfw.role) FILTER (WHERE pfw.role IS NOT NULL),
                '[]'::jsonb
            ),
            'film_ids', COALESCE(
                jsonb_agg(DISTINCT pfw.film_work_id) FILTER (WHERE pfw.film_work_id IS NOT NULL),
                '[]'::jsonb
            )
        ) AS doc
    FROM person p
    LEFT JOIN person_film_work pfw ON pfw.person_id = p.id
    LEFT JOIN film_work fw ON fw.id = pfw.film_work_id
    GROUP BY p.id
) AS changed
WHERE $1::timestamptz IS NULL
    OR (changed.modified, changed.id COLLATE "C") > ($1::timestamptz, $2::text COLLATE "C")
ORDER BY changed.modified, changed.id COLLATE "C"
LIMIT $3
"#;

const GENRES_QUERY: &str = r#"
SELECT changed.id, changed.modified, changed.doc
FROM (
    SELECT
        g.id::text AS id,
        g.modified AS modified,
        jsonb_build_object(
            'id', g.id,
            'name', g.name,
            'description', g.description
        ) AS doc
    FROM genre g
) AS changed
WHERE $1::timestamptz IS NULL
    OR (changed.modified, changed.id COLLATE "C") > ($1::timestamptz, $2::text COLLATE "C")
ORDER BY changed.modified, changed.id COLLATE "C"
LIMIT $3
"#;

fn query_for(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Films => FILMS_QUERY,
        ResourceKind::Persons => PERSONS_QUERY,
        ResourceKind::Genres => GENRES_QUERY,
    }
}

/// 🔑 `<slug>_watermark`
pub fn watermark_key(kind: ResourceKind) -> String {
    format!("{}_watermark", kind.slug())
}

/// 🔑 `<slug>_in_flight`
pub fn in_flight_key(kind: ResourceKind) -> String {
    format!("{}_in_flight", kind.slug())
}

/// 🔌 Build the pool without touching the network. The first query connects,
/// and that first query is already wrapped in the retry policy.
pub fn connect_pool(config: &PostgresConfig) -> PgPool {
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.dbname)
        .username(&config.user)
        .options([("search_path", config.search_path.as_str())]);
    if let Some(ref password) = config.password {
        options = options.password(password);
    }

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_lazy_with(options)
}

/// 📄 One keyset page of changed rows, strictly after `after`, at most `limit`.
///
/// The SQL lives behind this seam; the watermark and in-flight bookkeeping in
/// [`PostgresSource`] does not care where the rows come from.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, after: Option<&Watermark>, limit: i64) -> Result<Vec<SourceRow>>;
}

/// 🐘 The real thing: one of the keyset queries above against a pool.
#[derive(Clone)]
pub struct PgPageFetcher {
    pool: PgPool,
    sql: &'static str,
}

impl PgPageFetcher {
    pub fn new(kind: ResourceKind, pool: PgPool) -> Self {
        Self {
            pool,
            sql: query_for(kind),
        }
    }
}

#[async_trait]
impl PageFetcher for PgPageFetcher {
    async fn fetch_page(&self, after: Option<&Watermark>, limit: i64) -> Result<Vec<SourceRow>> {
        let rows: Vec<(String, DateTime<Utc>, Value)> = sqlx::query_as(self.sql)
            .bind(after.map(|mark| mark.modified))
            .bind(after.map(|mark| mark.id.clone()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("💀 The elephant would not hand over the next page of rows")?;

        Ok(rows
            .into_iter()
            .map(|(id, modified, doc)| SourceRow { id, modified, doc })
            .collect())
    }
}

/// 🚰 Pages of changed rows for one resource kind.
pub struct PostgresSource<F = PgPageFetcher> {
    kind: ResourceKind,
    fetcher: F,
    state: State,
    page_size: i64,
    retry: RetryPolicy,
    /// 🔁 the in-flight check only happens on the first call of a run
    recovered: bool,
}

impl<F> std::fmt::Debug for PostgresSource<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 🔒 the pool's Debug is a wall of connection stats; nobody asked
        f.debug_struct("PostgresSource")
            .field("kind", &self.kind)
            .field("page_size", &self.page_size)
            .field("recovered", &self.recovered)
            .finish()
    }
}

impl PostgresSource {
    pub fn new(
        kind: ResourceKind,
        pool: PgPool,
        state: State,
        page_size: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self::with_fetcher(kind, PgPageFetcher::new(kind, pool), state, page_size, retry)
    }
}

impl<F: PageFetcher> PostgresSource<F> {
    pub fn with_fetcher(
        kind: ResourceKind,
        fetcher: F,
        state: State,
        page_size: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            kind,
            fetcher,
            state,
            page_size: i64::from(page_size.max(1)),
            retry,
            recovered: false,
        }
    }
}

#[async_trait]
impl<F: PageFetcher> Source for PostgresSource<F> {
    async fn next_batch(&mut self) -> Result<RowBatch> {
        let in_flight = in_flight_key(self.kind);
        let watermark_key = watermark_key(self.kind);

        if !self.recovered {
            self.recovered = true;
            let parked: Option<Vec<SourceRow>> = self.state.get(&in_flight)?;
            if let Some(rows) = parked.filter(|rows| !rows.is_empty()) {
                info!(
                    "🔁 {}: redelivering {} rows left in flight by the previous run",
                    self.kind,
                    rows.len()
                );
                return Ok(RowBatch {
                    rows,
                    redelivered: true,
                });
            }
        }

        let current: Option<Watermark> = self.state.get(&watermark_key)?;
        let fetcher = &self.fetcher;
        let limit = self.page_size;
        let label = format!("extract {}", self.kind);
        let rows = retry(&self.retry, &label, || {
            fetcher.fetch_page(current.as_ref(), limit)
        })
        .await?;

        let Some(last) = rows.last() else {
            debug!("💤 {}: nothing changed past the watermark", self.kind);
            return Ok(RowBatch::default());
        };

        let advanced = Watermark::advance(
            current,
            Watermark {
                modified: last.modified,
                id: last.id.clone(),
            },
        );
        let parked = serde_json::to_value(&rows)
            .context("💀 Could not serialize the page for the state file")?;
        let mark = serde_json::to_value(&advanced)
            .context("💀 Could not serialize the watermark")?;
        self.state
            .set_many(vec![(in_flight, parked), (watermark_key, mark)])
            .await?;

        info!("🐘 {}: extracted {} rows", self.kind, rows.len());
        Ok(RowBatch::new(rows))
    }

    async fn commit(&mut self) -> Result<()> {
        self.state.remove(&in_flight_key(self.kind)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JsonFileStorage;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn unreachable_pool() -> PgPool {
        connect_pool(&PostgresConfig {
            host: "127.0.0.1".into(),
            port: 1,
            ..PostgresConfig::default()
        })
    }

    fn row(id: &str, modified: &str) -> SourceRow {
        SourceRow {
            id: id.into(),
            modified: modified.parse().expect("💀 ts"),
            doc: json!({"id": id}),
        }
    }

    fn mark(id: &str, modified: &str) -> Watermark {
        Watermark {
            modified: modified.parse().expect("💀 ts"),
            id: id.into(),
        }
    }

    /// 📜 Hands out pages from a script and remembers what it was asked.
    #[derive(Default)]
    struct ScriptedPages {
        pages: Mutex<VecDeque<Vec<SourceRow>>>,
        asked_after: Mutex<Vec<Option<Watermark>>>,
    }

    impl ScriptedPages {
        fn new(pages: Vec<Vec<SourceRow>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                ..Self::default()
            }
        }

        fn asked_after(&self) -> Vec<Option<Watermark>> {
            self.asked_after.lock().expect("💀 lock").clone()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedPages {
        async fn fetch_page(&self, after: Option<&Watermark>, _limit: i64) -> Result<Vec<SourceRow>> {
            self.asked_after.lock().expect("💀 lock").push(after.cloned());
            Ok(self.pages.lock().expect("💀 lock").pop_front().unwrap_or_default())
        }
    }

    async fn films_source(
        storage: &JsonFileStorage,
        pages: Vec<Vec<SourceRow>>,
    ) -> PostgresSource<ScriptedPages> {
        PostgresSource::with_fetcher(
            ResourceKind::Films,
            ScriptedPages::new(pages),
            State::open(storage.clone()).await.expect("💀 open"),
            100,
            RetryPolicy::immediate(1),
        )
    }

    #[test]
    fn the_one_where_every_query_pages_by_keyset() {
        for kind in ResourceKind::all() {
            let sql = query_for(kind);
            assert!(sql.contains(r#"ORDER BY changed.modified, changed.id COLLATE "C""#));
            assert!(sql.contains(r#"(changed.modified, changed.id COLLATE "C") > ($1::timestamptz, $2::text COLLATE "C")"#));
            assert!(sql.contains("LIMIT $3"));
        }
        assert!(FILMS_QUERY.contains("GREATEST"));
        assert_eq!(watermark_key(ResourceKind::Films), "movies_watermark");
        assert_eq!(in_flight_key(ResourceKind::Persons), "persons_in_flight");
    }

    #[test]
    fn the_one_where_a_person_moves_with_their_films() {
        assert!(PERSONS_QUERY.contains("COALESCE(MAX(fw.modified), p.modified)"));
        assert!(PERSONS_QUERY.contains("LEFT JOIN film_work fw ON fw.id = pfw.film_work_id"));
    }

    #[tokio::test]
    async fn the_one_where_the_page_is_on_disk_before_it_is_handed_out() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let storage = JsonFileStorage::new(dir.path().join("state.json"));
        let page = vec![
            row("f1", "2021-06-16T20:14:09Z"),
            row("f2", "2021-06-17T08:00:00Z"),
        ];
        let mut source = films_source(&storage, vec![page.clone()]).await;

        let batch = source.next_batch().await.expect("💀 next batch");
        assert!(!batch.redelivered);
        assert_eq!(batch.rows, page);

        let on_disk = storage.retrieve_state().await.expect("💀 retrieve");
        let parked: Vec<SourceRow> =
            serde_json::from_value(on_disk["movies_in_flight"].clone()).expect("💀 in flight");
        let watermark: Watermark =
            serde_json::from_value(on_disk["movies_watermark"].clone()).expect("💀 watermark");
        assert_eq!(parked, page);
        assert_eq!(watermark, mark("f2", "2021-06-17T08:00:00Z"));
    }

    #[tokio::test]
    async fn the_one_where_commit_forgets_the_page_but_not_the_watermark() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let storage = JsonFileStorage::new(dir.path().join("state.json"));
        let mut source = films_source(
            &storage,
            vec![
                vec![row("f1", "2021-06-16T20:14:09Z")],
                vec![row("f2", "2021-06-17T08:00:00Z")],
            ],
        )
        .await;

        source.next_batch().await.expect("💀 first page");
        source.commit().await.expect("💀 commit");

        let on_disk = storage.retrieve_state().await.expect("💀 retrieve");
        assert!(on_disk.get("movies_in_flight").is_none());
        assert_eq!(
            serde_json::from_value::<Watermark>(on_disk["movies_watermark"].clone()).expect("💀 watermark"),
            mark("f1", "2021-06-16T20:14:09Z")
        );

        source.next_batch().await.expect("💀 second page");
        source.commit().await.expect("💀 commit");
        let empty = source.next_batch().await.expect("💀 dry");
        assert!(empty.rows.is_empty());

        assert_eq!(
            source.fetcher.asked_after(),
            vec![
                None,
                Some(mark("f1", "2021-06-16T20:14:09Z")),
                Some(mark("f2", "2021-06-17T08:00:00Z")),
            ],
            "each page starts where the committed watermark left off"
        );
    }

    #[tokio::test]
    async fn the_one_where_an_older_page_does_not_drag_the_watermark_back() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let storage = JsonFileStorage::new(dir.path().join("state.json"));
        let ahead = mark("f9", "2021-06-20T00:00:00Z");
        State::open(storage.clone())
            .await
            .expect("💀 open")
            .set(&watermark_key(ResourceKind::Films), &ahead)
            .await
            .expect("💀 seed watermark");

        let stale = vec![row("f1", "2021-06-16T20:14:09Z")];
        let mut source = films_source(&storage, vec![stale.clone()]).await;

        let batch = source.next_batch().await.expect("💀 next batch");
        assert_eq!(batch.rows, stale, "the rows still go out");

        let on_disk = storage.retrieve_state().await.expect("💀 retrieve");
        assert_eq!(
            serde_json::from_value::<Watermark>(on_disk["movies_watermark"].clone()).expect("💀 watermark"),
            ahead
        );
        assert!(on_disk.get("movies_in_flight").is_some());
    }

    #[tokio::test]
    async fn the_one_where_a_crash_means_a_rerun() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let storage = JsonFileStorage::new(dir.path().join("state.json"));
        let parked = vec![SourceRow {
            id: "g1".into(),
            modified: "2021-06-16T20:14:09Z".parse().expect("💀 ts"),
            doc: json!({"id": "g1", "name": "Drama"}),
        }];

        let mut state = State::open(storage.clone()).await.expect("💀 open");
        state
            .set(&in_flight_key(ResourceKind::Genres), &parked)
            .await
            .expect("💀 park");

        let mut source = PostgresSource::new(
            ResourceKind::Genres,
            unreachable_pool(),
            State::open(storage.clone()).await.expect("💀 open"),
            100,
            RetryPolicy::immediate(1),
        );

        let batch = source.next_batch().await.expect("💀 redelivery needs no database");
        assert!(batch.redelivered);
        assert_eq!(batch.rows, parked);

        source.commit().await.expect("💀 commit");
        let after = storage.retrieve_state().await.expect("💀 retrieve");
        assert!(after.get("genres_in_flight").is_none());
    }
}
