//! Favorite comic records and collection queries.
//!
//! DESIGN
//! ======
//! A favorite is identified by its `url` within one user's collection.
//! Stores keep whatever is written (duplicates included); readers order by
//! `created_at` descending and collapse repeats themselves.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// RECORDS
// =============================================================================

/// A comic saved to a user's favorites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteComic {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub view: String,
    #[serde(default)]
    pub remote_thumbnail: String,
    /// `None` on insert asks the store to stamp its own clock.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

impl FavoriteComic {
    #[must_use]
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            thumbnail: String::new(),
            view: String::new(),
            remote_thumbnail: String::new(),
            created_at: None,
        }
    }

    #[must_use]
    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = thumbnail.into();
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: OffsetDateTime) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// Address of a stored favorite, used for deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub user_id: Uuid,
    pub id: Uuid,
}

/// A favorite as persisted in a user's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteDocument {
    pub id: Uuid,
    pub user_id: Uuid,
    pub comic: FavoriteComic,
}

impl FavoriteDocument {
    #[must_use]
    pub fn reference(&self) -> DocumentRef {
        DocumentRef { user_id: self.user_id, id: self.id }
    }
}

/// Result of flipping a favorite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ToggleOutcome {
    Inserted(FavoriteDocument),
    Removed(DocumentRef),
}

/// Path of a user's favorites collection, used as a log field.
#[must_use]
pub fn collection_path(user_id: Uuid) -> String {
    format!("users/{user_id}/favorite_comics")
}

// =============================================================================
// QUERY
// =============================================================================

/// Filter over one user's collection. Results are always ordered by
/// `created_at` descending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FavoriteQuery {
    /// Exact match on `url`.
    pub url: Option<String>,
    pub limit: Option<usize>,
}

impl FavoriteQuery {
    /// Every favorite, newest first.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// At most one favorite with exactly this `url`.
    #[must_use]
    pub fn by_url(url: impl Into<String>) -> Self {
        Self { url: Some(url.into()), limit: Some(1) }
    }

    #[must_use]
    pub fn matches(&self, comic: &FavoriteComic) -> bool {
        self.url.as_deref().is_none_or(|url| comic.url == url)
    }
}

/// Keep the first record per `url`. Applied to newest-first input this keeps
/// the most recent duplicate.
#[must_use]
pub fn dedup_by_url(comics: impl IntoIterator<Item = FavoriteComic>) -> Vec<FavoriteComic> {
    let mut seen = std::collections::HashSet::new();
    comics
        .into_iter()
        .filter(|comic| seen.insert(comic.url.clone()))
        .collect()
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
