//! 🎞️ FilmTransform — cutting the raw footage into a film document.
//!
//! The row carries one flat `people` array where every entry wears a
//! `person_role` badge. We sort them into directors, actors and writers,
//! throw out duplicates (same person credited twice in the same role, thanks
//! to the join fan-out), sort by name, and derive the `*_names` lists that
//! full-text search chews on. Unknown roles are quietly left on the cutting
//! room floor.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::RowTransform;
use crate::common::{Document, SourceRow};
use crate::models::{Film, GenreRef, PersonRef};

#[derive(Debug, Deserialize)]
struct RawFilm {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "imdb_rating")]
    rating: Option<f64>,
    #[serde(default, rename = "type")]
    film_type: Option<String>,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    modified: Option<DateTime<Utc>>,
    #[serde(default)]
    people: Vec<RawCredit>,
    #[serde(default)]
    genres: Vec<RawGenre>,
}

#[derive(Debug, Deserialize)]
struct RawCredit {
    person_role: String,
    person_id: String,
    person_name: String,
}

#[derive(Debug, Deserialize)]
struct RawGenre {
    genre_id: String,
    genre_name: String,
}

/// 🎬 `people[]` + `genres[]` → [`Film`].
pub struct FilmTransform;

impl FilmTransform {
    /// 👥 One role bucket: dedup by id, sort by name then id.
    fn credits(people: &[RawCredit], role: &str) -> Vec<PersonRef> {
        let mut seen = BTreeSet::new();
        let mut bucket: Vec<PersonRef> = people
            .iter()
            .filter(|credit| credit.person_role.eq_ignore_ascii_case(role))
            .filter(|credit| seen.insert(credit.person_id.clone()))
            .map(|credit| PersonRef {
                id: credit.person_id.clone(),
                name: credit.person_name.clone(),
            })
            .collect();
        bucket.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        bucket
    }

    fn names(bucket: &[PersonRef]) -> Vec<String> {
        // already sorted by name; the names come out sorted too
        bucket.iter().map(|person| person.name.clone()).collect()
    }

    pub fn to_film(raw: &serde_json::Value) -> Result<Film> {
        let raw = RawFilm::deserialize(raw)?;

        let directors = Self::credits(&raw.people, "director");
        let actors = Self::credits(&raw.people, "actor");
        let writers = Self::credits(&raw.people, "writer");

        let mut seen = BTreeSet::new();
        let mut genre: Vec<GenreRef> = raw
            .genres
            .into_iter()
            .filter(|g| seen.insert(g.genre_id.clone()))
            .map(|g| GenreRef {
                id: g.genre_id,
                name: g.genre_name,
            })
            .collect();
        genre.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        Ok(Film {
            id: raw.id,
            title: raw.title,
            description: raw.description,
            imdb_rating: raw.rating,
            film_type: raw.film_type,
            created: raw.created,
            modified: raw.modified,
            directors_names: Self::names(&directors),
            actors_names: Self::names(&actors),
            writers_names: Self::names(&writers),
            directors,
            actors,
            writers,
            genre,
        })
    }
}

impl RowTransform for FilmTransform {
    fn transform_row(row: &SourceRow) -> Result<Document> {
        let film = Self::to_film(&row.doc)
            .with_context(|| format!("💀 film row '{}' is not shaped like a film", row.id))?;
        let source_buf = serde_json::to_string(&film)
            .with_context(|| format!("💀 film '{}' refused to serialize", row.id))?;
        Ok(Document {
            id: film.id,
            source_buf,
        })
    }
}
