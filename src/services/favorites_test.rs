use super::*;
use crate::error::ErrorCode;
use crate::model::{DocumentRef, FavoriteDocument};
use crate::services::auth::{AuthSession, AuthenticatedUser};
use crate::store::{MemoryFavoriteStore, Snapshot, SnapshotStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use time::macros::datetime;
use tokio::time::{Duration, timeout};
use uuid::Uuid;

// =============================================================================
// HELPERS
// =============================================================================

async fn next_item<T>(signal: &mut Signal<T>) -> Result<T, FavoriteError> {
    timeout(Duration::from_millis(200), signal.next())
        .await
        .expect("signal item timed out")
        .expect("signal ended")
}

async fn assert_signal_quiet<T: std::fmt::Debug>(signal: &mut Signal<T>) {
    if let Ok(item) = timeout(Duration::from_millis(80), signal.next()).await {
        panic!("expected signal to stay quiet, got {item:?}");
    }
}

fn user(name: &str) -> AuthenticatedUser {
    AuthenticatedUser { id: Uuid::new_v4(), name: name.into() }
}

fn comic(url: &str) -> FavoriteComic {
    FavoriteComic::new(url, format!("Comic at {url}")).with_thumbnail("https://img.example/t.png")
}

fn data_source(store: Arc<dyn FavoriteStore>, session: &AuthSession) -> FavoriteComicsDataSource {
    FavoriteComicsDataSource::new(store, Arc::new(session.clone()))
}

/// Memory store that counts how often it is asked to read.
#[derive(Default)]
struct CountingStore {
    inner: MemoryFavoriteStore,
    reads: AtomicUsize,
}

#[async_trait::async_trait]
impl FavoriteStore for CountingStore {
    async fn query(&self, user_id: Uuid, query: &FavoriteQuery) -> Result<Snapshot, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.query(user_id, query).await
    }

    fn watch(&self, user_id: Uuid, query: FavoriteQuery) -> SnapshotStream {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.watch(user_id, query)
    }

    async fn insert(&self, user_id: Uuid, comic: FavoriteComic) -> Result<FavoriteDocument, StoreError> {
        self.inner.insert(user_id, comic).await
    }

    async fn delete(&self, reference: &DocumentRef) -> Result<(), StoreError> {
        self.inner.delete(reference).await
    }
}

/// Store whose live queries hiccup once and whose one-shot calls always fail.
struct FlakyStore;

#[async_trait::async_trait]
impl FavoriteStore for FlakyStore {
    async fn query(&self, _user_id: Uuid, _query: &FavoriteQuery) -> Result<Snapshot, StoreError> {
        Err(StoreError::Unavailable("offline".into()))
    }

    fn watch(&self, user_id: Uuid, _query: FavoriteQuery) -> SnapshotStream {
        let doc = FavoriteDocument { id: Uuid::new_v4(), user_id, comic: comic("/back") };
        stream::iter([Ok(Vec::new()), Err(StoreError::Unavailable("blip".into())), Ok(vec![doc])])
            .chain(stream::pending())
            .boxed()
    }

    async fn insert(&self, _user_id: Uuid, _comic: FavoriteComic) -> Result<FavoriteDocument, StoreError> {
        Err(StoreError::Unavailable("offline".into()))
    }

    async fn delete(&self, _reference: &DocumentRef) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("offline".into()))
    }
}

// =============================================================================
// is_favorited
// =============================================================================

#[tokio::test]
async fn is_favorited_follows_toggles() {
    let session = AuthSession::new();
    session.sign_in(user("alice"));
    let source = data_source(Arc::new(MemoryFavoriteStore::new()), &session);

    let mut favorited = source.is_favorited("/comic/1");
    assert!(!next_item(&mut favorited).await.unwrap());

    source.toggle(comic("/comic/1")).await.unwrap();
    assert!(next_item(&mut favorited).await.unwrap());

    source.toggle(comic("/comic/1")).await.unwrap();
    assert!(!next_item(&mut favorited).await.unwrap());
}

#[tokio::test]
async fn is_favorited_ignores_other_urls() {
    let session = AuthSession::new();
    session.sign_in(user("alice"));
    let source = data_source(Arc::new(MemoryFavoriteStore::new()), &session);

    let mut favorited = source.is_favorited("/comic/1");
    assert!(!next_item(&mut favorited).await.unwrap());

    source.toggle(comic("/comic/2")).await.unwrap();
    // The collection changed, so a snapshot may arrive, but it must say "no".
    if let Ok(Some(item)) = timeout(Duration::from_millis(80), favorited.next()).await {
        assert!(!item.unwrap());
    }
}

#[tokio::test]
async fn is_favorited_switches_with_the_signed_in_user() {
    let session = AuthSession::new();
    let store = MemoryFavoriteStore::new();
    let source = data_source(Arc::new(store.clone()), &session);

    session.sign_in(user("alice"));
    let mut favorited = source.is_favorited("/comic/1");
    assert!(!next_item(&mut favorited).await.unwrap());

    source.toggle(comic("/comic/1")).await.unwrap();
    assert!(next_item(&mut favorited).await.unwrap());

    session.sign_out();
    let err = next_item(&mut favorited).await.unwrap_err();
    assert!(matches!(err, FavoriteError::Auth(AuthError::Unauthenticated)));

    session.sign_in(user("bob"));
    assert!(!next_item(&mut favorited).await.unwrap());
}

// =============================================================================
// favorite_comics
// =============================================================================

#[tokio::test]
async fn favorite_comics_are_newest_first() {
    let session = AuthSession::new();
    let alice = user("alice");
    session.sign_in(alice.clone());
    let store = MemoryFavoriteStore::new();
    store
        .insert(alice.id, comic("/old").with_created_at(datetime!(2024-01-01 0:00 UTC)))
        .await
        .unwrap();
    store
        .insert(alice.id, comic("/new").with_created_at(datetime!(2024-06-01 0:00 UTC)))
        .await
        .unwrap();
    let source = data_source(Arc::new(store), &session);

    let mut favorites = source.favorite_comics();
    let list = next_item(&mut favorites).await.unwrap();
    let urls: Vec<_> = list.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(urls, vec!["/new", "/old"]);
}

#[tokio::test]
async fn favorite_comics_keep_latest_duplicate_only() {
    let session = AuthSession::new();
    let alice = user("alice");
    session.sign_in(alice.clone());
    let store = MemoryFavoriteStore::new();
    store
        .insert(
            alice.id,
            FavoriteComic::new("/x", "first save").with_created_at(datetime!(2024-01-01 0:00 UTC)),
        )
        .await
        .unwrap();
    store
        .insert(
            alice.id,
            FavoriteComic::new("/x", "second save").with_created_at(datetime!(2024-02-01 0:00 UTC)),
        )
        .await
        .unwrap();
    let source = data_source(Arc::new(store), &session);

    let mut favorites = source.favorite_comics();
    let list = next_item(&mut favorites).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].title, "second save");
    assert_eq!(list[0].created_at, Some(datetime!(2024-02-01 0:00 UTC)));
}

#[tokio::test]
async fn favorite_comics_re_emit_on_changes() {
    let session = AuthSession::new();
    session.sign_in(user("alice"));
    let source = data_source(Arc::new(MemoryFavoriteStore::new()), &session);

    let mut favorites = source.favorite_comics();
    assert!(next_item(&mut favorites).await.unwrap().is_empty());

    source.toggle(comic("/a")).await.unwrap();
    let list = next_item(&mut favorites).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].url, "/a");
}

#[tokio::test]
async fn favorite_comics_stop_following_previous_user() {
    let session = AuthSession::new();
    let alice = user("alice");
    let bob = user("bob");
    let store = MemoryFavoriteStore::new();
    store.insert(bob.id, comic("/bob-only")).await.unwrap();
    let source = data_source(Arc::new(store.clone()), &session);

    session.sign_in(alice.clone());
    let mut favorites = source.favorite_comics();
    assert!(next_item(&mut favorites).await.unwrap().is_empty());

    session.sign_in(bob);
    let list = next_item(&mut favorites).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].url, "/bob-only");

    store.insert(alice.id, comic("/alice-late")).await.unwrap();
    assert_signal_quiet(&mut favorites).await;
}

// =============================================================================
// unauthenticated
// =============================================================================

#[tokio::test]
async fn signals_report_unauthenticated_without_reading_the_store() {
    let session = AuthSession::new();
    let store = Arc::new(CountingStore::default());
    let source = data_source(store.clone(), &session);

    let mut favorited = source.is_favorited("/comic/1");
    let mut favorites = source.favorite_comics();

    assert!(matches!(next_item(&mut favorited).await, Err(FavoriteError::Auth(AuthError::Unauthenticated))));
    assert!(matches!(next_item(&mut favorites).await, Err(FavoriteError::Auth(AuthError::Unauthenticated))));
    assert_signal_quiet(&mut favorited).await;
    assert_eq!(store.reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn mutations_fail_when_signed_out() {
    let session = AuthSession::new();
    let store = Arc::new(CountingStore::default());
    let source = data_source(store.clone(), &session);

    let toggled = source.toggle(comic("/a")).await;
    assert!(matches!(toggled, Err(FavoriteError::Auth(AuthError::Unauthenticated))));

    let removed = source.remove_from_favorite(&comic("/a")).await;
    assert!(matches!(removed, Err(FavoriteError::Auth(AuthError::Unauthenticated))));
    assert_eq!(store.reads.load(Ordering::SeqCst), 0);
}

// =============================================================================
// toggle / remove_from_favorite
// =============================================================================

#[tokio::test]
async fn toggle_inserts_exactly_one_record_then_deletes_it() {
    let session = AuthSession::new();
    let alice = user("alice");
    session.sign_in(alice.clone());
    let store = MemoryFavoriteStore::new();
    let source = data_source(Arc::new(store.clone()), &session);

    let outcome = source.toggle(comic("/a")).await.unwrap();
    assert!(matches!(outcome, ToggleOutcome::Inserted(ref doc) if doc.user_id == alice.id));
    assert_eq!(store.query(alice.id, &FavoriteQuery::all()).await.unwrap().len(), 1);

    let outcome = source.toggle(comic("/a")).await.unwrap();
    assert!(matches!(outcome, ToggleOutcome::Removed(_)));
    assert!(store.query(alice.id, &FavoriteQuery::all()).await.unwrap().is_empty());
}

#[tokio::test]
async fn remove_from_favorite_deletes_matching_record() {
    let session = AuthSession::new();
    let alice = user("alice");
    session.sign_in(alice.clone());
    let store = MemoryFavoriteStore::new();
    store.insert(alice.id, comic("/a")).await.unwrap();
    store.insert(alice.id, comic("/b")).await.unwrap();
    let source = data_source(Arc::new(store.clone()), &session);

    source.remove_from_favorite(&comic("/a")).await.unwrap();

    let left = store.query(alice.id, &FavoriteQuery::all()).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].comic.url, "/b");
}

#[tokio::test]
async fn remove_missing_favorite_is_not_found_and_writes_nothing() {
    let session = AuthSession::new();
    let alice = user("alice");
    session.sign_in(alice.clone());
    let store = MemoryFavoriteStore::new();
    store.insert(alice.id, comic("/b")).await.unwrap();
    let source = data_source(Arc::new(store.clone()), &session);

    let mut favorites = source.favorite_comics();
    next_item(&mut favorites).await.unwrap();

    let err = source.remove_from_favorite(&comic("/a")).await.unwrap_err();
    assert!(matches!(err, FavoriteError::NotFound { ref url } if url == "/a"));
    assert_eq!(err.error_code(), "E_FAVORITE_NOT_FOUND");

    assert_signal_quiet(&mut favorites).await;
    assert_eq!(store.query(alice.id, &FavoriteQuery::all()).await.unwrap().len(), 1);
}

// =============================================================================
// store failures
// =============================================================================

#[tokio::test]
async fn live_signal_keeps_going_after_store_error() {
    let session = AuthSession::new();
    session.sign_in(user("alice"));
    let source = data_source(Arc::new(FlakyStore), &session);

    let mut favorites = source.favorite_comics();
    assert!(next_item(&mut favorites).await.unwrap().is_empty());

    let err = next_item(&mut favorites).await.unwrap_err();
    assert!(matches!(err, FavoriteError::Store(StoreError::Unavailable(_))));
    assert!(err.retryable());

    let list = next_item(&mut favorites).await.unwrap();
    assert_eq!(list[0].url, "/back");
}

#[tokio::test]
async fn one_shot_operations_surface_store_errors() {
    let session = AuthSession::new();
    session.sign_in(user("alice"));
    let source = data_source(Arc::new(FlakyStore), &session);

    let toggled = source.toggle(comic("/a")).await.unwrap_err();
    assert!(matches!(toggled, FavoriteError::Store(_)));
    assert_eq!(toggled.error_code(), "E_STORE_UNAVAILABLE");

    let removed = source.remove_from_favorite(&comic("/a")).await.unwrap_err();
    assert!(matches!(removed, FavoriteError::Store(_)));
}

#[test]
fn auth_error_code_passes_through() {
    let err = FavoriteError::from(AuthError::Unauthenticated);
    assert_eq!(err.error_code(), "E_UNAUTHENTICATED");
    assert!(!err.retryable());
    assert_eq!(err.to_string(), "not signed in");
}
