//! In-memory CoordinationBackend implementation for testing.
//!
//! Keeps leases and keys in process with the same semantics a Consul agent
//! gives them: leases expire when not renewed within their TTL, and keys
//! locked by an expired or destroyed lease are released. Outages and
//! operator actions can be simulated with [`InMemoryBackend::set_reachable`]
//! and [`InMemoryBackend::destroy_all_sessions`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::traits::{CoordinationBackend, KeyEntry, SessionDescriptor};
use crate::config::MAX_SESSION_TTL;
use crate::error::{Error, Result};

const NODE_NAME: &str = "in-memory";

struct Lease {
    name: String,
    ttl: Duration,
    expires_at: Instant,
    create_index: u64,
}

struct Key {
    value: Vec<u8>,
    session: Option<String>,
    modify_index: u64,
}

#[derive(Default)]
struct State {
    leases: HashMap<String, Lease>,
    keys: HashMap<String, Key>,
    index: u64,
}

impl State {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    /// Drop expired leases and release what they held.
    fn expire(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leases
            .iter()
            .filter(|(_, lease)| now >= lease.expires_at)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            debug!(session_id = %id, "In-memory lease expired");
            self.remove_lease(&id);
        }
    }

    fn remove_lease(&mut self, id: &str) -> bool {
        if self.leases.remove(id).is_none() {
            return false;
        }
        let index = self.next_index();
        for key in self.keys.values_mut() {
            if key.session.as_deref() == Some(id) {
                key.session = None;
                key.modify_index = index;
            }
        }
        true
    }
}

/// In-memory implementation of CoordinationBackend for testing.
pub struct InMemoryBackend {
    state: Mutex<State>,
    reachable: AtomicBool,
}

impl InMemoryBackend {
    /// Create an empty, reachable backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going down (`false`) or coming back (`true`).
    ///
    /// Leases keep aging while unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Whether calls currently succeed.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Destroy every lease, as an operator wiping sessions would.
    pub async fn destroy_all_sessions(&self) -> usize {
        let mut state = self.state.lock().await;
        let ids: Vec<String> = state.leases.keys().cloned().collect();
        for id in &ids {
            state.remove_lease(id);
        }
        ids.len()
    }

    /// Number of live leases.
    pub async fn session_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.expire(Instant::now());
        state.leases.len()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(Error::BackendUnavailable(
                "in-memory backend is unreachable".to_string(),
            ))
        }
    }

    /// Lock the state after pruning expired leases.
    async fn live_state(&self) -> Result<tokio::sync::MutexGuard<'_, State>> {
        self.check_reachable()?;
        let mut state = self.state.lock().await;
        state.expire(Instant::now());
        Ok(state)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationBackend for InMemoryBackend {
    async fn create_session(&self, name: &str, ttl: Duration) -> Result<String> {
        if ttl.is_zero() || ttl > MAX_SESSION_TTL {
            return Err(Error::BackendRejected {
                status: 400,
                message: format!(
                    "invalid session TTL {:?}, must be between 0s and {:?}",
                    ttl, MAX_SESSION_TTL
                ),
            });
        }

        let mut state = self.live_state().await?;
        let id = Uuid::new_v4().to_string();
        let create_index = state.next_index();
        state.leases.insert(
            id.clone(),
            Lease {
                name: name.to_string(),
                ttl,
                expires_at: Instant::now() + ttl,
                create_index,
            },
        );
        Ok(id)
    }

    async fn renew_session(&self, id: &str) -> Result<()> {
        let mut state = self.live_state().await?;
        let lease = state
            .leases
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        lease.expires_at = Instant::now() + lease.ttl;
        Ok(())
    }

    async fn destroy_session(&self, id: &str) -> Result<()> {
        let mut state = self.live_state().await?;
        state.remove_lease(id);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionDescriptor>> {
        let state = self.live_state().await?;
        let mut sessions: Vec<SessionDescriptor> = state
            .leases
            .iter()
            .map(|(id, lease)| SessionDescriptor {
                id: id.clone(),
                name: lease.name.clone(),
                node: NODE_NAME.to_string(),
                ttl: format!("{}s", lease.ttl.as_secs()),
                behavior: "release".to_string(),
                lock_delay: 0,
                create_index: lease.create_index,
            })
            .collect();
        sessions.sort_by_key(|s| s.create_index);
        Ok(sessions)
    }

    async fn put_if_session_owns(
        &self,
        key: &str,
        value: &[u8],
        session_id: &str,
    ) -> Result<bool> {
        let mut state = self.live_state().await?;
        if !state.leases.contains_key(session_id) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }

        if let Some(existing) = state.keys.get(key)
            && existing
                .session
                .as_deref()
                .is_some_and(|holder| holder != session_id)
        {
            return Ok(false);
        }

        let modify_index = state.next_index();
        state.keys.insert(
            key.to_string(),
            Key {
                value: value.to_vec(),
                session: Some(session_id.to_string()),
                modify_index,
            },
        );
        Ok(true)
    }

    async fn release_if_session_owns(&self, key: &str, session_id: &str) -> Result<bool> {
        let mut state = self.live_state().await?;
        if !state.leases.contains_key(session_id) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }

        let index = state.next_index();
        match state.keys.get_mut(key) {
            Some(entry) if entry.session.as_deref() == Some(session_id) => {
                entry.session = None;
                entry.modify_index = index;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_key(&self, key: &str) -> Result<Option<KeyEntry>> {
        let state = self.live_state().await?;
        Ok(state.keys.get(key).map(|entry| KeyEntry {
            key: key.to_string(),
            value: entry.value.clone(),
            session: entry.session.clone(),
            modify_index: entry.modify_index,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(20);

    #[tokio::test]
    async fn create_list_destroy() {
        let backend = InMemoryBackend::new();

        let id = backend.create_session("a-session", TTL).await.unwrap();
        let sessions = backend.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, id);
        assert_eq!(sessions[0].name, "a-session");
        assert_eq!(sessions[0].ttl, "20s");

        backend.destroy_session(&id).await.unwrap();
        assert!(backend.list_sessions().await.unwrap().is_empty());

        // Destroying again is fine
        backend.destroy_session(&id).await.unwrap();
    }

    #[tokio::test]
    async fn renew_unknown_session_is_not_found() {
        let backend = InMemoryBackend::new();
        let err = backend.renew_session("nope").await.unwrap_err();
        assert_eq!(err, Error::SessionNotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn unreachable_backend_fails_every_call() {
        let backend = InMemoryBackend::new();
        backend.set_reachable(false);

        let err = backend.create_session("a", TTL).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(backend.list_sessions().await.unwrap_err().is_retryable());

        backend.set_reachable(true);
        assert!(backend.create_session("a", TTL).await.is_ok());
    }

    #[tokio::test]
    async fn lock_contention_between_sessions() {
        let backend = InMemoryBackend::new();
        let a = backend.create_session("a", TTL).await.unwrap();
        let b = backend.create_session("b", TTL).await.unwrap();

        assert!(backend.put_if_session_owns("foo", b"1", &a).await.unwrap());
        assert!(!backend.put_if_session_owns("foo", b"2", &b).await.unwrap());
        // Re-acquire by holder updates the value
        assert!(backend.put_if_session_owns("foo", b"3", &a).await.unwrap());

        let entry = backend.get_key("foo").await.unwrap().unwrap();
        assert_eq!(entry.value, b"3");
        assert_eq!(entry.session.as_deref(), Some(a.as_str()));

        backend.destroy_session(&a).await.unwrap();
        let entry = backend.get_key("foo").await.unwrap().unwrap();
        assert!(entry.session.is_none());
        assert!(backend.put_if_session_owns("foo", b"4", &b).await.unwrap());
    }

    #[tokio::test]
    async fn release_only_by_holder() {
        let backend = InMemoryBackend::new();
        let a = backend.create_session("a", TTL).await.unwrap();
        let b = backend.create_session("b", TTL).await.unwrap();

        backend.put_if_session_owns("foo", b"", &a).await.unwrap();
        assert!(!backend.release_if_session_owns("foo", &b).await.unwrap());
        assert!(backend.release_if_session_owns("foo", &a).await.unwrap());
        assert!(backend.put_if_session_owns("foo", b"", &b).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_with_unknown_session_is_not_found() {
        let backend = InMemoryBackend::new();
        let err = backend
            .put_if_session_owns("foo", b"", "ghost")
            .await
            .unwrap_err();
        assert_eq!(err, Error::SessionNotFound("ghost".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn leases_expire_without_renewal() {
        let backend = InMemoryBackend::new();
        let id = backend.create_session("a", TTL).await.unwrap();
        backend.put_if_session_owns("foo", b"", &id).await.unwrap();

        tokio::time::advance(Duration::from_secs(15)).await;
        backend.renew_session(&id).await.unwrap();

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(backend.session_count().await, 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(backend.session_count().await, 0);
        assert!(matches!(
            backend.renew_session(&id).await,
            Err(Error::SessionNotFound(_))
        ));
        let entry = backend.get_key("foo").await.unwrap().unwrap();
        assert!(entry.session.is_none());
    }

    #[tokio::test]
    async fn destroy_all_sessions_releases_everything() {
        let backend = InMemoryBackend::new();
        let a = backend.create_session("a", TTL).await.unwrap();
        backend.create_session("b", TTL).await.unwrap();
        backend.put_if_session_owns("foo", b"", &a).await.unwrap();

        assert_eq!(backend.destroy_all_sessions().await, 2);
        assert_eq!(backend.session_count().await, 0);
        assert!(backend.get_key("foo").await.unwrap().unwrap().session.is_none());
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let backend = InMemoryBackend::new();
        let err = backend
            .create_session("a", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendRejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn oversized_ttl_is_rejected() {
        let backend = InMemoryBackend::new();
        let err = backend
            .create_session("a", Duration::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendRejected { status: 400, .. }));
        assert_eq!(backend.session_count().await, 0);

        backend
            .create_session("b", MAX_SESSION_TTL)
            .await
            .unwrap();
    }
}
