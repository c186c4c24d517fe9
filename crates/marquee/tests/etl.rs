//! 🔄 Rows in one end, documents out the other, and the API agrees with both.

mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{Value, json};

use marquee::backends::{ElasticsearchClient, ElasticsearchSink, InMemorySource, SinkBackend, SourceBackend};
use marquee::common::{ResourceKind, SourceRow};
use marquee::retry::RetryPolicy;
use marquee::supervisors::run_pipeline;
use marquee::transforms::film::FilmTransform;

use common::{app, app_config, fake_cluster, get_json};

fn row(id: &str, modified: &str, doc: Value) -> SourceRow {
    SourceRow {
        id: id.to_string(),
        modified: modified.parse().expect("💀 timestamp"),
        doc,
    }
}

fn film_rows() -> Vec<SourceRow> {
    vec![
        row(
            "f1",
            "2021-06-16T20:14:09Z",
            json!({
                "id": "f1",
                "title": "Alien",
                "description": "In space no one can hear you scream.",
                "rating": 8.5,
                "type": "movie",
                "people": [
                    {"person_role": "director", "person_id": "p2", "person_name": "Ridley Scott"},
                    {"person_role": "actor", "person_id": "p1", "person_name": "Sigourney Weaver"},
                    {"person_role": "actor", "person_id": "p1", "person_name": "Sigourney Weaver"},
                    {"person_role": "writer", "person_id": "p3", "person_name": "Dan O'Bannon"}
                ],
                "genres": [
                    {"genre_id": "g2", "genre_name": "Sci-Fi"},
                    {"genre_id": "g1", "genre_name": "Horror"}
                ]
            }),
        ),
        row(
            "f2",
            "2021-06-17T08:00:00Z",
            json!({"id": "f2", "title": "Aliens", "rating": 8.4, "people": [], "genres": []}),
        ),
    ]
}

fn person_rows() -> Vec<SourceRow> {
    vec![row(
        "p1",
        "2021-06-16T20:14:09Z",
        json!({"id": "p1", "full_name": "Sigourney Weaver", "roles": ["actor", "actor"], "film_ids": ["f1", "f2", "f1"]}),
    )]
}

fn genre_rows() -> Vec<SourceRow> {
    vec![
        row("g1", "2021-06-16T20:14:09Z", json!({"id": "g1", "name": "Horror"})),
        row("g2", "2021-06-16T20:14:09Z", json!({"id": "g2", "name": "Sci-Fi", "description": "Spaceships, mostly."})),
    ]
}

async fn sync_everything(client: &ElasticsearchClient) -> Result<marquee::progress::RunReport> {
    let pipelines = [
        (ResourceKind::Films, "movies", film_rows()),
        (ResourceKind::Persons, "persons", person_rows()),
        (ResourceKind::Genres, "genres", genre_rows()),
    ]
    .into_iter()
    .map(|(kind, index, rows)| {
        (
            kind,
            SourceBackend::InMemory(InMemorySource::new(rows, 1)),
            SinkBackend::Elasticsearch(ElasticsearchSink::new(
                client.clone(),
                kind,
                index,
                RetryPolicy::immediate(3),
            )),
        )
    })
    .collect();
    run_pipeline(pipelines).await
}

#[tokio::test]
async fn the_one_where_what_went_in_comes_back_out() -> Result<()> {
    let (server, fake) = fake_cluster().await;
    let client = ElasticsearchClient::new(app_config(&server).elasticsearch)?;

    let report = sync_everything(&client).await?;
    assert!(report.is_clean());
    assert_eq!(report.total_indexed(), 5);
    assert_eq!(fake.documents("movies").len(), 2);

    let (app, _) = app(&server);
    let (status, served) = get_json(&app, "/api/v1/films/f1").await;
    assert_eq!(status, StatusCode::OK);

    let expected = FilmTransform::to_film(&film_rows()[0].doc)?;
    assert_eq!(served, serde_json::to_value(&expected)?);
    assert_eq!(served["actors"].as_array().map(Vec::len), Some(1), "credits are deduplicated");
    assert_eq!(served["genre"][0]["name"], "Horror");

    let (_, person) = get_json(&app, "/api/v1/persons/p1").await;
    assert_eq!(person["full_name"], "Sigourney Weaver");
    assert_eq!(person["role"], "actor");
    assert_eq!(person["film_ids"], json!(["f1", "f2"]));

    let (_, filmography) = get_json(&app, "/api/v1/persons/p1/film").await;
    assert_eq!(filmography.as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn the_one_where_running_it_twice_changes_nothing() -> Result<()> {
    let (server, fake) = fake_cluster().await;
    let client = ElasticsearchClient::new(app_config(&server).elasticsearch)?;

    sync_everything(&client).await?;
    let first = (
        fake.documents("movies"),
        fake.documents("persons"),
        fake.documents("genres"),
    );

    let again = sync_everything(&client).await?;
    let second = (
        fake.documents("movies"),
        fake.documents("persons"),
        fake.documents("genres"),
    );

    assert_eq!(again.total_indexed(), 5, "every row is upserted again");
    assert_eq!(first, second, "upserts by id leave the catalog as it was");
    Ok(())
}

#[tokio::test]
async fn the_one_where_a_malformed_row_is_counted_not_fatal() -> Result<()> {
    let (server, fake) = fake_cluster().await;
    let client = ElasticsearchClient::new(app_config(&server).elasticsearch)?;
    let rows = vec![
        row("g1", "2021-06-16T20:14:09Z", json!({"id": "g1", "name": "Horror"})),
        row("g2", "2021-06-16T20:14:10Z", json!({"id": "g2"})),
    ];

    let report = run_pipeline(vec![(
        ResourceKind::Genres,
        SourceBackend::InMemory(InMemorySource::new(rows, 10)),
        SinkBackend::Elasticsearch(ElasticsearchSink::new(
            client,
            ResourceKind::Genres,
            "genres",
            RetryPolicy::immediate(3),
        )),
    )])
    .await?;

    let genres = report.get(ResourceKind::Genres).expect("💀 genres report");
    assert_eq!(genres.rejected, 1);
    assert_eq!(genres.indexed, 1);
    assert_eq!(
        genres.watermark.as_ref().map(|mark| mark.id.as_str()),
        Some("g2"),
        "the watermark passes the bad row so it isn't retried forever"
    );
    assert_eq!(fake.documents("genres").len(), 1);
    Ok(())
}
