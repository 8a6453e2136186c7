//! Postgres-backed favorite store.
//!
//! DESIGN
//! ======
//! One `favorite_comics` table partitioned by `user_id`. A row trigger
//! publishes the affected user id on `favorite_comics_changed`. Each store
//! owns a single change feed: one `PgListener` on its own connection that
//! fans events out over a broadcast channel. Live queries subscribe to the
//! feed, re-query through the pool on matching events, and forward
//! snapshots through a bounded channel.
//!
//! ERROR HANDLING
//! ==============
//! Feed failures reach every live query as error items. After the back-off
//! the feed reconnects and broadcasts a resync, so every live query sends a
//! fresh snapshot covering notifications lost while disconnected. A watch
//! task exits once its consumer drops the stream.
//! Toggle runs in a transaction holding an advisory lock keyed on
//! (user, url), so concurrent toggles of one favorite serialize.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::stream::StreamExt;
use sqlx::postgres::{PgListener, PgRow};
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{FavoriteStore, Snapshot, SnapshotStream, StoreError};
use crate::config::WatchConfig;
use crate::model::{DocumentRef, FavoriteComic, FavoriteDocument, FavoriteQuery, ToggleOutcome, collection_path};

/// Channel the `favorite_comics_notify` trigger publishes on.
pub const NOTIFY_CHANNEL: &str = "favorite_comics_changed";

const SELECT_FAVORITES: &str =
    "SELECT id, user_id, url, title, thumbnail, view, remote_thumbnail, created_at FROM favorite_comics";

/// Floor for the change-feed fan-out; a lagging watcher resyncs, so this
/// only bounds how often that happens under bursts.
const FEED_MIN_CAPACITY: usize = 64;

type SnapshotSender = mpsc::Sender<Result<Snapshot, StoreError>>;

// =============================================================================
// QUERIES
// =============================================================================

pub(crate) fn build_query(user_id: Uuid, query: &FavoriteQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(SELECT_FAVORITES);
    builder.push(" WHERE user_id = ").push_bind(user_id);
    if let Some(url) = &query.url {
        builder.push(" AND url = ").push_bind(url.clone());
    }
    builder.push(" ORDER BY created_at DESC, id DESC");
    if let Some(limit) = query.limit {
        builder
            .push(" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    builder
}

fn row_to_document(row: &PgRow) -> Result<FavoriteDocument, sqlx::Error> {
    Ok(FavoriteDocument {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        comic: FavoriteComic {
            url: row.try_get("url")?,
            title: row.try_get("title")?,
            thumbnail: row.try_get("thumbnail")?,
            view: row.try_get("view")?,
            remote_thumbnail: row.try_get("remote_thumbnail")?,
            created_at: Some(row.try_get("created_at")?),
        },
    })
}

async fn fetch_snapshot<'e, E>(executor: E, user_id: Uuid, query: &FavoriteQuery) -> Result<Snapshot, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let mut builder = build_query(user_id, query);
    let rows = builder.build().fetch_all(executor).await?;
    rows.iter().map(row_to_document).collect()
}

async fn insert_row<'e, E>(executor: E, user_id: Uuid, mut comic: FavoriteComic) -> Result<FavoriteDocument, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let id = Uuid::new_v4();
    let row = sqlx::query(
        r"INSERT INTO favorite_comics (id, user_id, url, title, thumbnail, view, remote_thumbnail, created_at)
          VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, now()))
          RETURNING created_at",
    )
    .bind(id)
    .bind(user_id)
    .bind(&comic.url)
    .bind(&comic.title)
    .bind(&comic.thumbnail)
    .bind(&comic.view)
    .bind(&comic.remote_thumbnail)
    .bind(comic.created_at)
    .fetch_one(executor)
    .await?;

    comic.created_at = Some(row.try_get("created_at")?);
    Ok(FavoriteDocument { id, user_id, comic })
}

async fn delete_row<'e, E>(executor: E, reference: &DocumentRef) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query("DELETE FROM favorite_comics WHERE id = $1 AND user_id = $2")
        .bind(reference.id)
        .bind(reference.user_id)
        .execute(executor)
        .await?;
    Ok(())
}

// =============================================================================
// CHANGE FEED
// =============================================================================

#[derive(Debug, Clone)]
enum FeedEvent {
    /// The trigger fired for this user's collection.
    Changed(Uuid),
    /// The listener (re)connected; notifications may have been missed.
    Resync,
    Failed(String),
}

/// One `LISTEN` connection per store, shared by every live query.
///
/// The listener connects with the store's database url rather than
/// borrowing from the pool, so open watches never hold pool connections.
/// It starts on the first subscription and stops when the store is dropped.
struct ChangeFeed {
    database_url: String,
    retry: Duration,
    events: broadcast::Sender<FeedEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeFeed {
    fn new(database_url: String, config: WatchConfig) -> Self {
        let (events, _) = broadcast::channel(config.buffer.max(FEED_MIN_CAPACITY));
        Self {
            database_url,
            retry: config.retry,
            events,
            task: Mutex::new(None),
        }
    }

    /// Subscribe before reading state, then re-read on every event.
    fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        let events = self.events.subscribe();
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_none_or(JoinHandle::is_finished) {
            *task = Some(tokio::spawn(run_feed(
                self.database_url.clone(),
                self.retry,
                self.events.clone(),
            )));
        }
        events
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = task.take() {
            task.abort();
        }
    }
}

async fn listen(database_url: &str) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect(database_url).await?;
    listener.listen(NOTIFY_CHANNEL).await?;
    Ok(listener)
}

async fn run_feed(database_url: String, retry: Duration, events: broadcast::Sender<FeedEvent>) {
    loop {
        let mut listener = match listen(&database_url).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(channel = NOTIFY_CHANNEL, error = %e, "change feed connect failed");
                let _ = events.send(FeedEvent::Failed(e.to_string()));
                tokio::time::sleep(retry).await;
                continue;
            }
        };
        debug!(channel = NOTIFY_CHANNEL, "change feed listening");
        let _ = events.send(FeedEvent::Resync);

        // try_recv instead of recv: recv reconnects silently and hides the
        // window in which notifications were dropped.
        loop {
            match listener.try_recv().await {
                Ok(Some(notification)) => match Uuid::parse_str(notification.payload()) {
                    Ok(user_id) => {
                        let _ = events.send(FeedEvent::Changed(user_id));
                    }
                    Err(e) => warn!(payload = notification.payload(), error = %e, "ignoring malformed change notification"),
                },
                Ok(None) => {
                    warn!(channel = NOTIFY_CHANNEL, "change feed connection lost; reconnecting");
                    break;
                }
                Err(e) => {
                    warn!(channel = NOTIFY_CHANNEL, error = %e, "change feed receive failed");
                    let _ = events.send(FeedEvent::Failed(e.to_string()));
                    tokio::time::sleep(retry).await;
                    break;
                }
            }
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Clone)]
pub struct PgFavoriteStore {
    pool: PgPool,
    feed: Arc<ChangeFeed>,
    watch: WatchConfig,
}

impl PgFavoriteStore {
    /// `database_url` is used for the change-feed connection, which lives
    /// outside `pool`.
    #[must_use]
    pub fn new(pool: PgPool, database_url: impl Into<String>, watch: WatchConfig) -> Self {
        Self {
            pool,
            feed: Arc::new(ChangeFeed::new(database_url.into(), watch)),
            watch,
        }
    }

    /// Query and forward one snapshot. Returns `false` once the consumer is gone.
    async fn send_snapshot(&self, tx: &SnapshotSender, user_id: Uuid, query: &FavoriteQuery) -> bool {
        let snapshot = fetch_snapshot(&self.pool, user_id, query)
            .await
            .map_err(StoreError::from);
        tx.send(snapshot).await.is_ok()
    }

    async fn run_watch(self, user_id: Uuid, query: FavoriteQuery, tx: SnapshotSender) {
        let collection = collection_path(user_id);
        let mut events = self.feed.subscribe();
        debug!(%collection, "live query subscribed");

        if !self.send_snapshot(&tx, user_id, &query).await {
            return;
        }

        loop {
            let sent = tokio::select! {
                () = tx.closed() => break,
                event = events.recv() => match event {
                    Ok(FeedEvent::Changed(changed)) if changed == user_id => {
                        self.send_snapshot(&tx, user_id, &query).await
                    }
                    Ok(FeedEvent::Changed(_)) => true,
                    Ok(FeedEvent::Resync) => self.send_snapshot(&tx, user_id, &query).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(%collection, skipped, "live query lagged; resyncing");
                        self.send_snapshot(&tx, user_id, &query).await
                    }
                    Ok(FeedEvent::Failed(message)) => {
                        tx.send(Err(StoreError::Unavailable(message))).await.is_ok()
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if !sent {
                break;
            }
        }

        debug!(%collection, "live query closed");
    }
}

#[async_trait::async_trait]
impl FavoriteStore for PgFavoriteStore {
    async fn query(&self, user_id: Uuid, query: &FavoriteQuery) -> Result<Snapshot, StoreError> {
        Ok(fetch_snapshot(&self.pool, user_id, query).await?)
    }

    /// Spawns the listener task, so this must be called inside a Tokio runtime.
    fn watch(&self, user_id: Uuid, query: FavoriteQuery) -> SnapshotStream {
        let (tx, rx) = mpsc::channel(self.watch.buffer);
        tokio::spawn(self.clone().run_watch(user_id, query, tx));
        ReceiverStream::new(rx).boxed()
    }

    async fn insert(&self, user_id: Uuid, comic: FavoriteComic) -> Result<FavoriteDocument, StoreError> {
        Ok(insert_row(&self.pool, user_id, comic).await?)
    }

    async fn delete(&self, reference: &DocumentRef) -> Result<(), StoreError> {
        Ok(delete_row(&self.pool, reference).await?)
    }

    async fn toggle(&self, user_id: Uuid, comic: FavoriteComic) -> Result<ToggleOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{user_id}:{}", comic.url))
            .execute(&mut *tx)
            .await?;

        let existing = fetch_snapshot(&mut *tx, user_id, &FavoriteQuery::by_url(comic.url.as_str()))
            .await?
            .into_iter()
            .next();
        let outcome = match existing {
            Some(doc) => {
                let reference = doc.reference();
                delete_row(&mut *tx, &reference).await?;
                ToggleOutcome::Removed(reference)
            }
            None => ToggleOutcome::Inserted(insert_row(&mut *tx, user_id, comic).await?),
        };

        tx.commit().await?;
        Ok(outcome)
    }
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;
