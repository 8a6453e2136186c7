//! In-process favorite store with live queries.
//!
//! DESIGN
//! ======
//! Collections live in a `HashMap<user_id, Collection>` behind a tokio
//! `RwLock`. Each collection carries a `watch` version counter bumped on
//! every mutation; live queries wait on it and re-run their query.
//! Collections are created lazily. A collection with no documents and no
//! live query is idle; idle collections are swept whenever a new one is
//! created, and dropped as soon as a delete leaves them idle.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};
use tracing::debug;
use uuid::Uuid;

use super::{FavoriteStore, Snapshot, SnapshotStream, StoreError};
use crate::model::{DocumentRef, FavoriteComic, FavoriteDocument, FavoriteQuery, ToggleOutcome, collection_path};

// =============================================================================
// COLLECTION
// =============================================================================

struct StoredDocument {
    /// Insertion order, breaks ties between equal timestamps (newest first).
    seq: u64,
    doc: FavoriteDocument,
}

struct Collection {
    docs: Vec<StoredDocument>,
    next_seq: u64,
    version: watch::Sender<u64>,
}

impl Collection {
    fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self { docs: Vec::new(), next_seq: 0, version }
    }

    fn snapshot(&self, query: &FavoriteQuery) -> Snapshot {
        let mut matching: Vec<&StoredDocument> = self
            .docs
            .iter()
            .filter(|stored| query.matches(&stored.doc.comic))
            .collect();
        matching.sort_by(|a, b| {
            b.doc
                .comic
                .created_at
                .cmp(&a.doc.comic.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        matching
            .into_iter()
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|stored| stored.doc.clone())
            .collect()
    }

    fn push(&mut self, user_id: Uuid, mut comic: FavoriteComic) -> FavoriteDocument {
        comic.created_at.get_or_insert_with(OffsetDateTime::now_utc);
        let doc = FavoriteDocument { id: Uuid::new_v4(), user_id, comic };
        self.docs.push(StoredDocument { seq: self.next_seq, doc: doc.clone() });
        self.next_seq += 1;
        self.bump();
        doc
    }

    fn remove(&mut self, id: Uuid) -> bool {
        let before = self.docs.len();
        self.docs.retain(|stored| stored.doc.id != id);
        let removed = self.docs.len() != before;
        if removed {
            self.bump();
        }
        removed
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    fn is_idle(&self) -> bool {
        self.docs.is_empty() && self.version.receiver_count() == 0
    }
}

/// Get or create the user's collection, evicting idle ones before creating.
fn open_collection(collections: &mut HashMap<Uuid, Collection>, user_id: Uuid) -> &mut Collection {
    if !collections.contains_key(&user_id) {
        collections.retain(|_, collection| !collection.is_idle());
    }
    collections.entry(user_id).or_insert_with(Collection::new)
}

fn close_if_idle(collections: &mut HashMap<Uuid, Collection>, user_id: Uuid) {
    if collections.get(&user_id).is_some_and(Collection::is_idle) {
        collections.remove(&user_id);
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Favorite store held entirely in memory. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryFavoriteStore {
    collections: Arc<RwLock<HashMap<Uuid, Collection>>>,
}

impl MemoryFavoriteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl FavoriteStore for MemoryFavoriteStore {
    async fn query(&self, user_id: Uuid, query: &FavoriteQuery) -> Result<Snapshot, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&user_id)
            .map(|collection| collection.snapshot(query))
            .unwrap_or_default())
    }

    fn watch(&self, user_id: Uuid, query: FavoriteQuery) -> SnapshotStream {
        let collections = Arc::clone(&self.collections);
        stream::unfold(None::<watch::Receiver<u64>>, move |rx| {
            let collections = Arc::clone(&collections);
            let query = query.clone();
            async move {
                let (rx, snapshot) = match rx {
                    None => {
                        let mut guard = collections.write().await;
                        let collection = open_collection(&mut guard, user_id);
                        debug!(collection = %collection_path(user_id), "live query subscribed");
                        (collection.version.subscribe(), collection.snapshot(&query))
                    }
                    Some(mut rx) => {
                        rx.changed().await.ok()?;
                        let guard = collections.read().await;
                        let snapshot = guard
                            .get(&user_id)
                            .map(|collection| collection.snapshot(&query))
                            .unwrap_or_default();
                        (rx, snapshot)
                    }
                };
                Some((Ok(snapshot), Some(rx)))
            }
        })
        .boxed()
    }

    async fn insert(&self, user_id: Uuid, comic: FavoriteComic) -> Result<FavoriteDocument, StoreError> {
        let mut collections = self.collections.write().await;
        Ok(open_collection(&mut collections, user_id).push(user_id, comic))
    }

    async fn delete(&self, reference: &DocumentRef) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        if let Some(collection) = collections.get_mut(&reference.user_id) {
            collection.remove(reference.id);
        }
        close_if_idle(&mut collections, reference.user_id);
        Ok(())
    }

    async fn toggle(&self, user_id: Uuid, comic: FavoriteComic) -> Result<ToggleOutcome, StoreError> {
        let mut collections = self.collections.write().await;
        let collection = open_collection(&mut collections, user_id);

        let existing = collection.snapshot(&FavoriteQuery::by_url(comic.url.as_str())).into_iter().next();
        let outcome = match existing {
            Some(doc) => {
                collection.remove(doc.id);
                ToggleOutcome::Removed(doc.reference())
            }
            None => ToggleOutcome::Inserted(collection.push(user_id, comic)),
        };
        close_if_idle(&mut collections, user_id);
        Ok(outcome)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
