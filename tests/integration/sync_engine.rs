//! Integration tests for the sync engine against the in-process backend.
//!
//! Covers the session lifecycle end to end:
//! - First-time identities start empty, returning ones adopt remote tasks
//! - Remote changes are applied without being pushed back
//! - Own pushes echoed by the backend are ignored, unless a foreign record
//!   landed in between, in which case the board follows the backend
//! - Edits are refused while the initial load is in flight
//! - Failed pushes surface an error and are retried by the next change
//! - Stopping abandons outstanding work and releases the subscription

use std::sync::Arc;
use std::time::Duration;

use todosync::auth::Identity;
use todosync::backend::LoopbackBackend;
use todosync::store::{LocalCache, MemoryStore};
use todosync::sync::{BoardView, DispatchError, SyncEngine, SyncEvent, SyncState};
use todosync::tasks::{DragLocation, DragResult, TaskAction};
use todosync_proto::task::{Category, RemoteRecord, SessionId, Snapshot, Task};

type Engine = SyncEngine<LoopbackBackend, Arc<MemoryStore>>;

fn engine(backend: &LoopbackBackend, store: &Arc<MemoryStore>) -> Engine {
    SyncEngine::new(Some(backend.clone()), LocalCache::new(Arc::clone(store)))
}

fn cached(store: &Arc<MemoryStore>) -> Snapshot {
    LocalCache::new(Arc::clone(store)).load()
}

fn create(text: &str, category: Category) -> TaskAction {
    TaskAction::Create {
        text: text.into(),
        category: Some(category),
    }
}

async fn next(engine: &mut Engine) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), engine.next_event())
        .await
        .expect("sync event timed out")
}

/// Starts a session and drives it through load and subscribe.
async fn synced(engine: &mut Engine, identity: &Identity) -> SyncEvent {
    engine.start(identity.clone());
    let loaded = next(engine).await;
    assert_eq!(next(engine).await, SyncEvent::Subscribed);
    assert_eq!(engine.state(), SyncState::Synced);
    loaded
}

fn remote(tasks: Snapshot) -> RemoteRecord {
    RemoteRecord::new(SessionId::new(), 1, tasks)
}

#[tokio::test]
async fn first_time_identity_starts_empty_without_error() {
    let backend = LoopbackBackend::new();
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&backend, &store);
    engine
        .dispatch(create("Offline note", Category::School))
        .await
        .unwrap();
    assert_eq!(backend.upsert_calls(), 0);

    let me = Identity::new("new@example.com");
    assert_eq!(synced(&mut engine, &me).await, SyncEvent::Loaded { found: false });

    assert!(engine.board().is_empty());
    assert_eq!(engine.sync_error(), None);
    assert!(cached(&store).is_empty());
}

#[tokio::test]
async fn returning_identity_adopts_remote_tasks() {
    let backend = LoopbackBackend::new();
    let me = Identity::new("me@example.com");
    let tasks = Snapshot::new().with_tasks(Category::ClubWork, vec![Task::new("Book the hall")]);
    backend.push_remote(&me, remote(tasks.clone()));

    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&backend, &store);
    assert_eq!(synced(&mut engine, &me).await, SyncEvent::Loaded { found: true });

    assert_eq!(engine.board().snapshot(), &tasks);
    assert_eq!(cached(&store), tasks);
    assert_eq!(backend.fetch_calls(), 1);
    assert_eq!(backend.upsert_calls(), 0);
}

#[tokio::test]
async fn view_is_syncing_until_load_finishes() {
    let backend = LoopbackBackend::new();
    backend.hold_fetches();
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&backend, &store);

    engine.start(Identity::new("me@example.com"));
    assert_eq!(engine.state(), SyncState::Loading);
    assert_eq!(engine.view(), BoardView::Syncing);

    backend.release_fetches();
    assert_eq!(next(&mut engine).await, SyncEvent::Loaded { found: false });
    assert!(matches!(engine.view(), BoardView::Ready(_)));
}

#[tokio::test]
async fn remote_change_is_applied_without_push() {
    let backend = LoopbackBackend::new();
    let store = Arc::new(MemoryStore::new());
    let me = Identity::new("me@example.com");
    let mut engine = engine(&backend, &store);
    synced(&mut engine, &me).await;

    let tasks = Snapshot::new().with_tasks(Category::NonUrgent, vec![Task::new("Buy milk")]);
    backend.push_remote(&me, remote(tasks.clone()));
    assert_eq!(next(&mut engine).await, SyncEvent::RemoteApplied);

    assert_eq!(engine.board().snapshot(), &tasks);
    assert_eq!(cached(&store), tasks);
    assert_eq!(backend.upsert_calls(), 0);

    // The next local edit pushes exactly once, carrying both tasks.
    engine
        .dispatch(create("Essay", Category::School))
        .await
        .unwrap();
    assert_eq!(backend.upsert_calls(), 1);
    let stored = backend.stored(&me).unwrap();
    assert_eq!(stored.tasks.len(), 2);
    assert_eq!(stored.origin.as_ref(), Some(engine.session_id()));
}

#[tokio::test]
async fn own_push_echo_is_ignored() {
    let backend = LoopbackBackend::new();
    let store = Arc::new(MemoryStore::new());
    let me = Identity::new("me@example.com");
    let mut engine = engine(&backend, &store);
    synced(&mut engine, &me).await;

    engine
        .dispatch(create("Essay", Category::School))
        .await
        .unwrap();
    let before = engine.board().snapshot().clone();

    assert_eq!(next(&mut engine).await, SyncEvent::EchoIgnored { revision: 1 });
    assert_eq!(engine.board().snapshot(), &before);
    assert_eq!(backend.upsert_calls(), 1);
}

#[tokio::test]
async fn own_push_landing_after_foreign_record_is_adopted() {
    let backend = LoopbackBackend::new();
    let store = Arc::new(MemoryStore::new());
    let me = Identity::new("me@example.com");
    let mut engine = engine(&backend, &store);
    synced(&mut engine, &me).await;

    // Another device writes first; its record is queued before our push
    // overwrites it on the backend.
    let theirs = Snapshot::new().with_tasks(Category::School, vec![Task::new("From B")]);
    backend.push_remote(&me, remote(theirs.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine
        .dispatch(create("From A", Category::NonUrgent))
        .await
        .unwrap();
    let ours = backend.stored(&me).unwrap();
    assert_eq!(ours.origin.as_ref(), Some(engine.session_id()));

    assert_eq!(next(&mut engine).await, SyncEvent::RemoteApplied);
    assert_eq!(engine.board().snapshot(), &theirs);
    assert_eq!(next(&mut engine).await, SyncEvent::Resynced { revision: 1 });

    assert_eq!(engine.board().snapshot(), &ours.tasks);
    assert_eq!(cached(&store), ours.tasks);
    assert_eq!(engine.state(), SyncState::Synced);
    // Adopting our own record does not push it again.
    assert_eq!(backend.upsert_calls(), 1);

    // Later pushes are plain echoes again.
    engine
        .dispatch(create("Next", Category::School))
        .await
        .unwrap();
    assert_eq!(next(&mut engine).await, SyncEvent::EchoIgnored { revision: 2 });
    assert_eq!(engine.board().snapshot(), &backend.stored(&me).unwrap().tasks);
}

#[tokio::test]
async fn edits_are_refused_while_loading() {
    let backend = LoopbackBackend::new();
    let me = Identity::new("me@example.com");
    let tasks = Snapshot::new().with_tasks(Category::ClubWork, vec![Task::new("Book the hall")]);
    backend.push_remote(&me, remote(tasks.clone()));
    backend.hold_fetches();
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&backend, &store);

    engine.start(me.clone());
    assert_eq!(engine.state(), SyncState::Loading);
    let refused = engine
        .dispatch(create("Too early", Category::School))
        .await;
    assert_eq!(refused, Err(DispatchError::Syncing));
    assert!(cached(&store).is_empty());
    assert_eq!(backend.upsert_calls(), 0);

    backend.release_fetches();
    assert_eq!(next(&mut engine).await, SyncEvent::Loaded { found: true });
    assert_eq!(engine.board().snapshot(), &tasks);
    assert_eq!(cached(&store), tasks);

    // Once loaded the same edit goes through.
    engine
        .dispatch(create("Too early", Category::School))
        .await
        .unwrap();
    assert_eq!(engine.board().len(), 2);
}

#[tokio::test]
async fn failed_push_sets_error_and_next_change_retries() {
    let backend = LoopbackBackend::new();
    let store = Arc::new(MemoryStore::new());
    let me = Identity::new("me@example.com");
    let mut engine = engine(&backend, &store);
    synced(&mut engine, &me).await;

    backend.fail_next_upsert();
    engine
        .dispatch(create("First", Category::NonUrgent))
        .await
        .unwrap();
    assert!(engine.sync_error().is_some());
    assert_eq!(engine.state(), SyncState::Synced);
    assert_eq!(backend.stored(&me), None);
    // The failed change is still cached locally.
    assert_eq!(cached(&store).len(), 1);

    engine
        .dispatch(create("Second", Category::NonUrgent))
        .await
        .unwrap();
    assert_eq!(engine.sync_error(), None);
    assert_eq!(backend.upsert_calls(), 2);
    assert_eq!(backend.stored(&me).unwrap().tasks.len(), 2);
}

#[tokio::test]
async fn load_failure_keeps_local_tasks_and_still_subscribes() {
    let backend = LoopbackBackend::new();
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&backend, &store);
    engine
        .dispatch(create("Offline note", Category::School))
        .await
        .unwrap();

    backend.fail_next_fetch();
    let me = Identity::new("me@example.com");
    assert_eq!(synced(&mut engine, &me).await, SyncEvent::LoadFailed);

    assert!(engine.sync_error().is_some());
    assert_eq!(engine.board().len(), 1);
    assert_eq!(backend.subscriber_count(&me), 1);
}

#[tokio::test]
async fn subscribe_failure_is_reported() {
    let backend = LoopbackBackend::new();
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&backend, &store);
    let me = Identity::new("me@example.com");

    backend.fail_next_subscribe();
    engine.start(me.clone());
    assert_eq!(next(&mut engine).await, SyncEvent::Loaded { found: false });
    assert_eq!(next(&mut engine).await, SyncEvent::SubscribeFailed);
    assert!(engine.sync_error().is_some());
    assert_eq!(backend.subscriber_count(&me), 0);

    // Pushes still go out without live updates.
    engine
        .dispatch(create("Essay", Category::School))
        .await
        .unwrap();
    assert_eq!(backend.upsert_calls(), 1);
    assert_eq!(engine.sync_error(), None);
}

#[tokio::test]
async fn stop_during_load_discards_late_result() {
    let backend = LoopbackBackend::new();
    let me = Identity::new("me@example.com");
    backend.push_remote(
        &me,
        remote(Snapshot::new().with_tasks(Category::School, vec![Task::new("Remote")])),
    );
    backend.hold_fetches();

    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(&backend, &store);
    engine
        .dispatch(create("Local", Category::NonUrgent))
        .await
        .unwrap();
    engine.start(me.clone());
    tokio::task::yield_now().await;
    engine.stop();
    backend.release_fetches();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(engine.state(), SyncState::Idle);
    assert!(
        tokio::time::timeout(Duration::from_millis(50), engine.next_event())
            .await
            .is_err()
    );
    assert_eq!(engine.board().tasks(Category::NonUrgent)[0].text, "Local");
    assert!(engine.board().tasks(Category::School).is_empty());
    assert_eq!(backend.subscribe_calls(), 0);
}

#[tokio::test]
async fn stop_releases_subscription_and_is_idempotent() {
    let backend = LoopbackBackend::new();
    let store = Arc::new(MemoryStore::new());
    let me = Identity::new("me@example.com");
    let mut engine = engine(&backend, &store);
    synced(&mut engine, &me).await;
    assert_eq!(backend.subscriber_count(&me), 1);

    engine.stop();
    assert_eq!(backend.subscriber_count(&me), 0);
    assert_eq!(engine.identity(), None);
    engine.stop();
    assert_eq!(engine.state(), SyncState::Idle);

    // Changes after stop stay local.
    engine
        .dispatch(create("Offline", Category::School))
        .await
        .unwrap();
    assert_eq!(backend.upsert_calls(), 0);
    assert_eq!(cached(&store).len(), 1);
}

#[tokio::test]
async fn switching_identity_moves_the_subscription() {
    let backend = LoopbackBackend::new();
    let store = Arc::new(MemoryStore::new());
    let alice = Identity::new("alice@example.com");
    let bob = Identity::new("bob@example.com");
    backend.push_remote(
        &bob,
        remote(Snapshot::new().with_tasks(Category::School, vec![Task::new("Bob's task")])),
    );

    let mut engine = engine(&backend, &store);
    engine.follow_identity(Some(alice.clone()));
    next(&mut engine).await;
    next(&mut engine).await;
    assert_eq!(backend.subscriber_count(&alice), 1);

    engine.follow_identity(Some(bob.clone()));
    assert_eq!(backend.subscriber_count(&alice), 0);
    assert_eq!(next(&mut engine).await, SyncEvent::Loaded { found: true });
    assert_eq!(next(&mut engine).await, SyncEvent::Subscribed);
    assert_eq!(backend.subscriber_count(&bob), 1);
    assert_eq!(engine.board().tasks(Category::School)[0].text, "Bob's task");

    engine.follow_identity(None);
    assert_eq!(backend.subscriber_count(&bob), 0);
    assert_eq!(engine.state(), SyncState::Idle);
}

#[tokio::test]
async fn two_devices_converge_through_shared_backend() {
    let backend = LoopbackBackend::new();
    let me = Identity::new("me@example.com");
    let phone_store = Arc::new(MemoryStore::new());
    let laptop_store = Arc::new(MemoryStore::new());
    let mut phone = engine(&backend, &phone_store);
    let mut laptop = engine(&backend, &laptop_store);
    synced(&mut phone, &me).await;
    synced(&mut laptop, &me).await;

    for (text, category) in [
        ("Read chapter 4", Category::School),
        ("Buy milk", Category::NonUrgent),
    ] {
        phone.dispatch(create(text, category)).await.unwrap();
        assert!(matches!(next(&mut phone).await, SyncEvent::EchoIgnored { .. }));
        assert_eq!(next(&mut laptop).await, SyncEvent::RemoteApplied);
    }
    assert_eq!(laptop.board().snapshot(), phone.board().snapshot());
    assert_eq!(cached(&laptop_store), cached(&phone_store));
    assert_eq!(backend.upsert_calls(), 2);

    // A drag on the laptop flows back to the phone.
    laptop
        .dispatch(TaskAction::Drag(DragResult::new(
            DragLocation::new(Category::School, 0),
            DragLocation::new(Category::NonUrgent, 0),
        )))
        .await
        .unwrap();
    assert_eq!(next(&mut phone).await, SyncEvent::RemoteApplied);
    let moved = phone.board().tasks(Category::NonUrgent);
    assert_eq!(moved.len(), 2);
    assert_eq!(moved[0].text, "Read chapter 4");
    assert!(phone.board().tasks(Category::School).is_empty());
    assert_eq!(backend.upsert_calls(), 3);
}

#[tokio::test]
async fn unchanged_action_is_not_pushed() {
    let backend = LoopbackBackend::new();
    let store = Arc::new(MemoryStore::new());
    let me = Identity::new("me@example.com");
    let mut engine = engine(&backend, &store);
    synced(&mut engine, &me).await;

    let at = DragLocation::new(Category::School, 0);
    engine
        .dispatch(TaskAction::Drag(DragResult::cancelled(at)))
        .await
        .unwrap();
    engine.dispatch(TaskAction::ClearAll).await.unwrap();
    assert_eq!(backend.upsert_calls(), 0);
}
