//! Session manager: lease create/renew/destroy against a backend.
//!
//! The manager translates lifecycle intents into backend calls and nothing
//! more. Retry policy and state tracking live in [`Session`](crate::Session).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::backend::CoordinationBackend;
use crate::error::{Error, Result};

/// Trait for the low-level lease lifecycle calls a session makes.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Create a lease tagged with `name`. Returns its ID.
    async fn create(&self, name: &str, ttl: Duration) -> Result<String>;

    /// Extend a lease.
    async fn renew(&self, id: &str) -> Result<()>;

    /// Release a lease. Releasing a lease the backend no longer knows is
    /// not an error.
    async fn destroy(&self, id: &str) -> Result<()>;
}

/// SessionManager that forwards to a [`CoordinationBackend`].
pub struct BackendSessionManager {
    backend: Arc<dyn CoordinationBackend>,
}

impl BackendSessionManager {
    /// Create a manager over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn CoordinationBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl SessionManager for BackendSessionManager {
    async fn create(&self, name: &str, ttl: Duration) -> Result<String> {
        let id = self.backend.create_session(name, ttl).await?;
        info!(session_id = %id, name = %name, ttl_secs = ttl.as_secs(), "Created session");
        Ok(id)
    }

    async fn renew(&self, id: &str) -> Result<()> {
        self.backend.renew_session(id).await
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        match self.backend.destroy_session(id).await {
            Ok(()) => {
                info!(session_id = %id, "Destroyed session");
                Ok(())
            }
            Err(Error::SessionNotFound(_)) => {
                debug!(session_id = %id, "Session already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
