//! End-to-end session scenarios against the in-memory backend.
//!
//! These exercise the public API only: a recording manager over a real
//! backend implementation, the way an application would wire it up.

use std::sync::Arc;
use std::time::Duration;

use tether_core::{
    BackendSessionManager, CoordinationBackend, Error, InMemoryBackend, RecordingSessionManager,
    Session, SessionConfig, SessionState,
};

const TTL: Duration = Duration::from_secs(20);

fn setup() -> (Arc<InMemoryBackend>, Arc<RecordingSessionManager>) {
    let backend = Arc::new(InMemoryBackend::new());
    let manager = Arc::new(RecordingSessionManager::new(Arc::new(
        BackendSessionManager::new(backend.clone()),
    )));
    (backend, manager)
}

async fn listed(backend: &InMemoryBackend, id: &str) -> bool {
    backend
        .list_sessions()
        .await
        .unwrap()
        .iter()
        .any(|s| s.id == id)
}

#[tokio::test]
async fn lock_then_destroy_scenario() {
    let (backend, manager) = setup();

    let session = Session::new("a-session", TTL, backend.clone(), manager.clone())
        .await
        .unwrap();
    let id = session.id();
    assert!(!id.is_empty());

    session.acquire_lock("foo", &[]).await.unwrap();
    assert_eq!(backend.list_sessions().await.unwrap().len(), 1);

    let mut signal = session.err();
    session.destroy().await;

    assert!(!listed(&backend, &id).await);
    assert_eq!(signal.recv().await, None);
    assert_eq!(manager.destroy_call_count(), 1);
    assert_eq!(manager.destroy_args_for_call(0), Some(id));
}

#[tokio::test]
async fn contended_lock_frees_up_after_holder_destroyed() {
    let (backend, manager) = setup();

    let holder = Session::new("holder", TTL, backend.clone(), manager.clone())
        .await
        .unwrap();
    let waiter = Session::new("waiter", TTL, backend.clone(), manager.clone())
        .await
        .unwrap();

    holder.acquire_lock("service/leader", b"holder").await.unwrap();
    assert!(matches!(
        waiter.acquire_lock("service/leader", b"waiter").await,
        Err(Error::LockHeldByOther { .. })
    ));

    holder.destroy().await;

    waiter.acquire_lock("service/leader", b"waiter").await.unwrap();
    let entry = backend.get_key("service/leader").await.unwrap().unwrap();
    assert_eq!(entry.value, b"waiter");
    assert_eq!(entry.session, Some(waiter.id()));

    waiter.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn contended_lock_frees_up_after_holder_expires() {
    let (backend, manager) = setup();

    let holder = Session::new("holder", TTL, backend.clone(), manager.clone())
        .await
        .unwrap();
    let waiter = Session::new("waiter", TTL, backend.clone(), manager.clone())
        .await
        .unwrap();
    holder.acquire_lock("foo", b"").await.unwrap();

    // Dropping stops renewal; the lease then lapses on the backend.
    drop(holder);
    tokio::time::sleep(TTL + Duration::from_secs(1)).await;

    waiter.acquire_lock("foo", b"").await.unwrap();
    waiter.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn session_survives_backend_down_at_startup() {
    let (backend, manager) = setup();
    backend.set_reachable(false);

    let config = SessionConfig::default().with_retry_interval(Duration::from_millis(500));
    let session = Session::with_config("a-session", TTL, backend.clone(), manager, config)
        .await
        .unwrap();
    assert_eq!(session.id(), "");

    backend.set_reachable(true);
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(!session.id().is_empty());
    assert!(listed(&backend, &session.id()).await);

    session.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn operator_wipe_is_reported_once() {
    let (backend, manager) = setup();
    let session = Session::new("a-session", TTL, backend.clone(), manager)
        .await
        .unwrap();
    let mut first = session.err();
    let mut second = session.err();

    backend.destroy_all_sessions().await;

    let a = tokio::time::timeout(TTL, first.recv()).await.unwrap();
    let b = tokio::time::timeout(TTL, second.recv()).await.unwrap();
    assert!(matches!(a, Some(Error::SessionNotFound(_))));
    assert_eq!(a, b);

    assert_eq!(session.state(), SessionState::Invalidated);
    assert_eq!(
        session.acquire_lock("foo", b"").await,
        Err(Error::SessionInvalid)
    );

    session.destroy().await;
    session.destroy().await;
    assert_eq!(first.try_recv(), Some(a));
}

#[tokio::test]
async fn recreate_yields_a_listed_lease() {
    let (backend, manager) = setup();
    let session = Session::new("a-session", TTL, backend.clone(), manager)
        .await
        .unwrap();
    session.acquire_lock("foo", &[]).await.unwrap();
    let original = session.id();

    session.destroy().await;
    let renewed = session.recreate().await.unwrap();

    assert_ne!(renewed.id(), original);
    assert!(listed(&backend, &renewed.id()).await);
    assert!(!listed(&backend, &original).await);

    renewed.destroy().await;
}

#[tokio::test]
async fn lock_racing_recreate_never_reports_success_for_a_stale_lease() {
    let (backend, manager) = setup();
    let session = Arc::new(
        Session::new("a-session", TTL, backend.clone(), manager)
            .await
            .unwrap(),
    );

    let mut tasks = Vec::new();
    for i in 0..16 {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            if i % 4 == 0 {
                session.recreate().await.map(|_| ())
            } else {
                session.acquire_lock("foo", b"").await
            }
        }));
    }
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) | Err(Error::SessionInvalid) | Err(Error::LockHeldByOther { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // Whatever happened, the session ends up on exactly one live lease.
    assert_eq!(backend.session_count().await, 1);
    session.acquire_lock("foo", b"").await.unwrap();
    session.destroy().await;
}
