//! 🎬 The cast list: what a film, a person and a genre look like on the way out.
//!
//! These are the shapes stored in the search engine and served by the API.
//! They are built fresh on every read, from cache or from the index. Nobody
//! holds on to them. They are the mayflies of the catalog. 🦆

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::common::ResourceKind;

/// 🎭 Anything the read API can serve.
///
/// `KIND` ties a model to its index, so a cached payload from the `movies`
/// index only ever decodes into [`Film`].
pub trait CatalogModel: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: ResourceKind;
}

/// 👤 A person as credited on a film: just enough to click through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    pub id: String,
    pub name: String,
}

/// 🏷️ A genre as tagged on a film.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreRef {
    pub id: String,
    pub name: String,
}

/// 🎞️ A film document. The headliner.
///
/// People are split into one list per role, each deduplicated by id, and each
/// list has a sorted `*_names` twin for full-text search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Film {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub imdb_rating: Option<f64>,
    #[serde(default, rename = "type")]
    pub film_type: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub directors: Vec<PersonRef>,
    #[serde(default)]
    pub actors: Vec<PersonRef>,
    #[serde(default)]
    pub writers: Vec<PersonRef>,
    #[serde(default)]
    pub directors_names: Vec<String>,
    #[serde(default)]
    pub actors_names: Vec<String>,
    #[serde(default)]
    pub writers_names: Vec<String>,
    #[serde(default)]
    pub genre: Vec<GenreRef>,
}

impl CatalogModel for Film {
    const KIND: ResourceKind = ResourceKind::Films;
}

/// 👤 A person, as the API serves it.
///
/// The index calls the field `name`; the API calls it `full_name`. Decoding
/// accepts either, encoding always writes `full_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    #[serde(alias = "name")]
    pub full_name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub film_ids: Vec<String>,
}

impl CatalogModel for Person {
    const KIND: ResourceKind = ResourceKind::Persons;
}

/// 📇 A person, as the index stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDocument {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub film_ids: Vec<String>,
}

/// 🏷️ A genre. Short, sweet, sometimes described.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl CatalogModel for Genre {
    const KIND: ResourceKind = ResourceKind::Genres;
}
