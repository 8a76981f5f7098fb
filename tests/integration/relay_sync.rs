//! End-to-end sync through a real relay server.
//!
//! Each "device" is a [`SyncEngine`] with its own relay connection and its
//! own local cache; the relay runs in-process on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use todosync::auth::{AuthProvider, Identity, TrustedEmailAuth};
use todosync::backend::RelayBackend;
use todosync::backend::relay::DEFAULT_CONNECT_TIMEOUT;
use todosync::store::{FileStore, LocalCache, MemoryStore};
use todosync::sync::{SyncEngine, SyncEvent, SyncState};
use todosync::tasks::{DragLocation, DragResult, TaskAction};
use todosync_proto::task::Category;
use todosync_relay::relay::{RelayState, start_server_with_state};

async fn start_relay() -> (String, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay server");
    (format!("ws://{addr}/ws"), state)
}

async fn device(url: &str) -> SyncEngine<RelayBackend, MemoryStore> {
    let backend = RelayBackend::connect(url, DEFAULT_CONNECT_TIMEOUT)
        .await
        .expect("relay connect failed");
    SyncEngine::new(Some(backend), LocalCache::new(MemoryStore::new()))
}

async fn next<K>(engine: &mut SyncEngine<RelayBackend, K>) -> SyncEvent
where
    K: todosync::store::KeyValueStore,
{
    tokio::time::timeout(Duration::from_secs(5), engine.next_event())
        .await
        .expect("sync event timed out")
}

fn create(text: &str, category: Category) -> TaskAction {
    TaskAction::Create {
        text: text.into(),
        category: Some(category),
    }
}

#[tokio::test]
async fn edits_propagate_between_devices() {
    let (url, relay) = start_relay().await;
    let me = Identity::new("me@example.com");
    let mut phone = device(&url).await;
    let mut laptop = device(&url).await;

    for engine in [&mut phone, &mut laptop] {
        engine.start(me.clone());
        assert_eq!(next(engine).await, SyncEvent::Loaded { found: false });
        assert_eq!(next(engine).await, SyncEvent::Subscribed);
    }
    assert_eq!(relay.watcher_count(me.as_str()).await, 2);

    phone
        .dispatch(create("Read chapter 4", Category::School))
        .await
        .unwrap();
    assert_eq!(phone.sync_error(), None);
    assert_eq!(next(&mut laptop).await, SyncEvent::RemoteApplied);
    assert_eq!(laptop.board().snapshot(), phone.board().snapshot());
    assert!(matches!(next(&mut phone).await, SyncEvent::EchoIgnored { .. }));

    // Toggle on the laptop, then move it to another list.
    let id = laptop.board().tasks(Category::School)[0].id.clone();
    laptop
        .dispatch(TaskAction::Toggle { id })
        .await
        .unwrap();
    assert_eq!(next(&mut phone).await, SyncEvent::RemoteApplied);
    assert!(phone.board().tasks(Category::School)[0].completed);
    laptop
        .dispatch(TaskAction::Drag(DragResult::new(
            DragLocation::new(Category::School, 0),
            DragLocation::new(Category::ClubWork, 0),
        )))
        .await
        .unwrap();
    assert_eq!(next(&mut phone).await, SyncEvent::RemoteApplied);

    let moved = phone.board().tasks(Category::ClubWork);
    assert_eq!(moved.len(), 1);
    assert!(moved[0].completed);
    assert!(phone.board().tasks(Category::School).is_empty());
}

#[tokio::test]
async fn new_device_loads_existing_tasks() {
    let (url, _relay) = start_relay().await;
    let me = Identity::new("me@example.com");

    let mut first = device(&url).await;
    first.start(me.clone());
    next(&mut first).await;
    next(&mut first).await;
    first
        .dispatch(create("Buy milk", Category::NonUrgent))
        .await
        .unwrap();
    first.stop();

    let mut second = device(&url).await;
    second.start(me);
    assert_eq!(next(&mut second).await, SyncEvent::Loaded { found: true });
    assert_eq!(second.board().tasks(Category::NonUrgent)[0].text, "Buy milk");
}

#[tokio::test]
async fn identities_are_isolated() {
    let (url, _relay) = start_relay().await;
    let mut alice = device(&url).await;
    let mut bob = device(&url).await;
    alice.start(Identity::new("alice@example.com"));
    bob.start(Identity::new("bob@example.com"));
    for engine in [&mut alice, &mut bob] {
        next(engine).await;
        assert_eq!(next(engine).await, SyncEvent::Subscribed);
    }

    alice
        .dispatch(create("Alice only", Category::School))
        .await
        .unwrap();
    assert!(matches!(next(&mut alice).await, SyncEvent::EchoIgnored { .. }));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), bob.next_event())
            .await
            .is_err()
    );
    assert!(bob.board().is_empty());
}

#[tokio::test]
async fn relay_shutdown_is_reported_and_edits_stay_local() {
    let (url, relay) = start_relay().await;
    let me = Identity::new("me@example.com");
    let mut engine = device(&url).await;
    engine.start(me);
    next(&mut engine).await;
    next(&mut engine).await;

    relay.close_all_connections().await;
    assert_eq!(next(&mut engine).await, SyncEvent::SubscriptionClosed);
    assert!(engine.sync_error().is_some());
    assert_eq!(engine.state(), SyncState::Synced);

    engine
        .dispatch(create("Written offline", Category::NonUrgent))
        .await
        .unwrap();
    assert!(engine.sync_error().is_some());
    assert_eq!(engine.board().len(), 1);
}

#[tokio::test]
async fn signed_in_device_persists_to_disk_across_restarts() {
    let (url, _relay) = start_relay().await;
    let dir = tempfile::tempdir().unwrap();
    let auth = TrustedEmailAuth::new();
    auth.sign_in_with_email("  Me@Example.com ").await.unwrap();
    let identity = auth.current().unwrap();
    assert_eq!(identity.as_str(), "me@example.com");

    {
        let backend = RelayBackend::connect(&url, DEFAULT_CONNECT_TIMEOUT)
            .await
            .unwrap();
        let cache = LocalCache::new(FileStore::new(dir.path()));
        let mut engine = SyncEngine::new(Some(backend), cache);
        engine.follow_identity(Some(identity.clone()));
        next(&mut engine).await;
        next(&mut engine).await;
        engine
            .dispatch(create("Book the hall", Category::ClubWork))
            .await
            .unwrap();
    }

    // Restarted offline: the cached list is still there.
    let restarted: SyncEngine<RelayBackend, FileStore> =
        SyncEngine::new(None, LocalCache::new(FileStore::new(dir.path())));
    assert_eq!(
        restarted.board().tasks(Category::ClubWork)[0].text,
        "Book the hall"
    );
}
