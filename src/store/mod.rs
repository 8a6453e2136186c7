//! Favorite store — per-user collections of favorite comics.
//!
//! DESIGN
//! ======
//! `FavoriteStore` is the seam between the data source and whatever holds
//! the documents. It exposes the handful of primitives a document database
//! offers: equality-filtered queries with a limit, newest-first ordering,
//! live queries, insert, and delete by reference.
//!
//! TRADE-OFFS
//! ==========
//! The provided `toggle` is read-then-write and can race with a concurrent
//! toggle of the same `url` (two inserts, or two deletes). Both stores in
//! this crate override it with an atomic version. Readers collapse
//! duplicate urls regardless, so a racing third-party store degrades to
//! extra rows rather than wrong answers.

pub mod memory;
pub mod postgres;

use futures::stream::BoxStream;
use tracing::debug;
use uuid::Uuid;

use crate::model::{DocumentRef, FavoriteComic, FavoriteDocument, FavoriteQuery, ToggleOutcome};

pub use memory::MemoryFavoriteStore;
pub use postgres::PgFavoriteStore;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl crate::error::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_DATABASE",
            Self::Unavailable(_) => "E_STORE_UNAVAILABLE",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Database(e) => matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed),
            Self::Unavailable(_) => true,
        }
    }
}

/// Newest-first snapshot of the documents matching a query.
pub type Snapshot = Vec<FavoriteDocument>;

/// Live query: the current snapshot, then one per collection change.
/// Failures are items; the stream keeps going after them.
pub type SnapshotStream = BoxStream<'static, Result<Snapshot, StoreError>>;

// =============================================================================
// STORE TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait FavoriteStore: Send + Sync {
    /// Run a one-shot query against a user's collection.
    async fn query(&self, user_id: Uuid, query: &FavoriteQuery) -> Result<Snapshot, StoreError>;

    /// Subscribe to a query. Dropping the stream cancels the subscription.
    fn watch(&self, user_id: Uuid, query: FavoriteQuery) -> SnapshotStream;

    /// Add a document. A `None` `created_at` is stamped with the store clock.
    async fn insert(&self, user_id: Uuid, comic: FavoriteComic) -> Result<FavoriteDocument, StoreError>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, reference: &DocumentRef) -> Result<(), StoreError>;

    /// First document whose `url` equals `url`, if any.
    async fn find_by_url(&self, user_id: Uuid, url: &str) -> Result<Option<FavoriteDocument>, StoreError> {
        let docs = self.query(user_id, &FavoriteQuery::by_url(url)).await?;
        Ok(docs.into_iter().next())
    }

    /// Delete the document with `comic.url` if present, otherwise insert `comic`.
    async fn toggle(&self, user_id: Uuid, comic: FavoriteComic) -> Result<ToggleOutcome, StoreError> {
        match self.find_by_url(user_id, &comic.url).await? {
            Some(existing) => {
                let reference = existing.reference();
                self.delete(&reference).await?;
                debug!(%user_id, url = %comic.url, "toggle removed existing favorite");
                Ok(ToggleOutcome::Removed(reference))
            }
            None => {
                let doc = self.insert(user_id, comic).await?;
                debug!(%user_id, url = %doc.comic.url, "toggle inserted favorite");
                Ok(ToggleOutcome::Inserted(doc))
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
