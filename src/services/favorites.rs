//! Favorite comics data source.
//!
//! DESIGN
//! ======
//! Every operation is relative to whoever is signed in right now. Reads are
//! live signals: each auth change tears down the previous collection
//! subscription and starts one against the new user's collection, or emits
//! `Unauthenticated` without touching the store. Writes read the current
//! user once and run against the store.
//!
//! ERROR HANDLING
//! ==============
//! Live signals carry failures as `Err` items and stay open, so a transient
//! store error is followed by later snapshots. One-shot operations return
//! the error.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use crate::error::ErrorCode;
use crate::model::{FavoriteComic, FavoriteQuery, ToggleOutcome, collection_path, dedup_by_url};
use crate::services::auth::{AuthError, AuthSessionProvider};
use crate::signal::switch_latest;
use crate::store::{FavoriteStore, StoreError};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FavoriteError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("comic is not in favorites: {url}")]
    NotFound { url: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for FavoriteError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.error_code(),
            Self::NotFound { .. } => "E_FAVORITE_NOT_FOUND",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.retryable(),
            Self::Auth(_) | Self::NotFound { .. } => false,
        }
    }
}

/// Live stream of results for the signed-in user.
pub type Signal<T> = BoxStream<'static, Result<T, FavoriteError>>;

// =============================================================================
// DATA SOURCE
// =============================================================================

#[derive(Clone)]
pub struct FavoriteComicsDataSource {
    store: Arc<dyn FavoriteStore>,
    auth: Arc<dyn AuthSessionProvider>,
}

impl FavoriteComicsDataSource {
    #[must_use]
    pub fn new(store: Arc<dyn FavoriteStore>, auth: Arc<dyn AuthSessionProvider>) -> Self {
        Self { store, auth }
    }

    /// Whether the signed-in user has favorited `url`.
    #[must_use]
    pub fn is_favorited(&self, url: &str) -> Signal<bool> {
        let store = Arc::clone(&self.store);
        let url = url.to_string();
        switch_latest(self.auth.user_changes(), move |auth| match auth {
            Err(e) => unauthenticated(e),
            Ok(user) => store
                .watch(user.id, FavoriteQuery::by_url(url.as_str()))
                .map(|snapshot| snapshot.map(|docs| !docs.is_empty()).map_err(FavoriteError::from))
                .boxed(),
        })
        .boxed()
    }

    /// The signed-in user's favorites, newest first, one entry per url.
    #[must_use]
    pub fn favorite_comics(&self) -> Signal<Vec<FavoriteComic>> {
        let store = Arc::clone(&self.store);
        switch_latest(self.auth.user_changes(), move |auth| match auth {
            Err(e) => unauthenticated(e),
            Ok(user) => store
                .watch(user.id, FavoriteQuery::all())
                .map(|snapshot| {
                    snapshot
                        .map(|docs| dedup_by_url(docs.into_iter().map(|doc| doc.comic)))
                        .map_err(FavoriteError::from)
                })
                .boxed(),
        })
        .boxed()
    }

    /// Remove `comic` from favorites if its url is present, add it otherwise.
    ///
    /// # Errors
    ///
    /// `Auth` when nobody is signed in, `Store` when the lookup or write fails.
    pub async fn toggle(&self, comic: FavoriteComic) -> Result<ToggleOutcome, FavoriteError> {
        let user = self.auth.current_user()?;
        let url = comic.url.clone();
        let outcome = self.store.toggle(user.id, comic).await?;
        match &outcome {
            ToggleOutcome::Inserted(_) => {
                debug!(collection = %collection_path(user.id), %url, "inserted into favorites");
            }
            ToggleOutcome::Removed(_) => {
                debug!(collection = %collection_path(user.id), %url, "removed from favorites");
            }
        }
        Ok(outcome)
    }

    /// Remove the favorite with `comic.url`.
    ///
    /// # Errors
    ///
    /// `NotFound` when no favorite has that url (nothing is written), `Auth`
    /// when nobody is signed in, `Store` when the lookup or delete fails.
    pub async fn remove_from_favorite(&self, comic: &FavoriteComic) -> Result<(), FavoriteError> {
        let user = self.auth.current_user()?;
        let Some(doc) = self.store.find_by_url(user.id, &comic.url).await? else {
            return Err(FavoriteError::NotFound { url: comic.url.clone() });
        };
        self.store.delete(&doc.reference()).await?;
        debug!(collection = %collection_path(user.id), url = %comic.url, "removed from favorites");
        Ok(())
    }
}

fn unauthenticated<T: Send + 'static>(e: AuthError) -> Signal<T> {
    stream::once(async move { Err(FavoriteError::from(e)) }).boxed()
}

#[cfg(test)]
#[path = "favorites_test.rs"]
mod tests;
