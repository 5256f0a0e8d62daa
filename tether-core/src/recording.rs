//! Recording session manager for tests
//!
//! RecordingSessionManager wraps another manager, forwards every call and
//! keeps a log of the arguments, so tests can assert on how a Session drove
//! the lease lifecycle while still running against a real backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::manager::SessionManager;

#[derive(Debug, Default)]
struct Calls {
    create: Vec<(String, Duration)>,
    renew: Vec<String>,
    destroy: Vec<String>,
}

/// SessionManager test double that records calls and delegates.
pub struct RecordingSessionManager {
    inner: Arc<dyn SessionManager>,
    calls: Mutex<Calls>,
}

impl RecordingSessionManager {
    /// Wrap `inner`, recording every call made through this manager.
    #[must_use]
    pub fn new(inner: Arc<dyn SessionManager>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Calls::default()),
        }
    }

    fn calls(&self) -> MutexGuard<'_, Calls> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of `create` calls.
    pub fn create_call_count(&self) -> usize {
        self.calls().create.len()
    }

    /// Arguments of the `index`th `create` call.
    pub fn create_args_for_call(&self, index: usize) -> Option<(String, Duration)> {
        self.calls().create.get(index).cloned()
    }

    /// Number of `renew` calls.
    pub fn renew_call_count(&self) -> usize {
        self.calls().renew.len()
    }

    /// Number of `destroy` calls.
    pub fn destroy_call_count(&self) -> usize {
        self.calls().destroy.len()
    }

    /// Session ID passed to the `index`th `destroy` call.
    pub fn destroy_args_for_call(&self, index: usize) -> Option<String> {
        self.calls().destroy.get(index).cloned()
    }
}

#[async_trait]
impl SessionManager for RecordingSessionManager {
    async fn create(&self, name: &str, ttl: Duration) -> Result<String> {
        self.calls().create.push((name.to_string(), ttl));
        self.inner.create(name, ttl).await
    }

    async fn renew(&self, id: &str) -> Result<()> {
        self.calls().renew.push(id.to_string());
        self.inner.renew(id).await
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        self.calls().destroy.push(id.to_string());
        self.inner.destroy(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::manager::BackendSessionManager;

    #[tokio::test]
    async fn records_and_delegates() {
        let backend = Arc::new(InMemoryBackend::new());
        let recording =
            RecordingSessionManager::new(Arc::new(BackendSessionManager::new(backend.clone())));

        let id = recording
            .create("a-session", Duration::from_secs(20))
            .await
            .unwrap();
        recording.renew(&id).await.unwrap();
        recording.destroy(&id).await.unwrap();

        assert_eq!(recording.create_call_count(), 1);
        assert_eq!(
            recording.create_args_for_call(0),
            Some(("a-session".to_string(), Duration::from_secs(20)))
        );
        assert_eq!(recording.renew_call_count(), 1);
        assert_eq!(recording.destroy_call_count(), 1);
        assert_eq!(recording.destroy_args_for_call(0), Some(id));
        assert_eq!(recording.destroy_args_for_call(1), None);
        assert_eq!(backend.session_count().await, 0);
    }

    #[tokio::test]
    async fn failed_calls_are_recorded_too() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.set_reachable(false);
        let recording =
            RecordingSessionManager::new(Arc::new(BackendSessionManager::new(backend)));

        assert!(
            recording
                .create("a", Duration::from_secs(20))
                .await
                .is_err()
        );
        assert_eq!(recording.create_call_count(), 1);
    }
}
