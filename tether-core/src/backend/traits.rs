//! CoordinationBackend trait and the data it exchanges
//!
//! This is the whole surface a [`Session`](crate::Session) needs from the
//! coordination service. Anything offering leases with a TTL and
//! session-conditioned writes can implement it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Backend view of a session lease, using Consul's field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Node", default)]
    pub node: String,

    /// TTL as the backend reports it, e.g. `"20s"`.
    #[serde(rename = "TTL", default)]
    pub ttl: String,

    #[serde(rename = "Behavior", default)]
    pub behavior: String,

    /// Lock delay in nanoseconds.
    #[serde(rename = "LockDelay", default)]
    pub lock_delay: u64,

    #[serde(rename = "CreateIndex", default)]
    pub create_index: u64,
}

/// Backend view of a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub key: String,
    pub value: Vec<u8>,
    /// Session currently holding the lock on this key, if any.
    pub session: Option<String>,
    pub modify_index: u64,
}

/// Trait for coordination backends
///
/// Implementations map each call onto the backend's API. Errors follow the
/// crate's taxonomy: transport problems are `BackendUnavailable`, unknown
/// sessions are `SessionNotFound`, anything else the backend refuses is
/// `BackendRejected`.
#[async_trait]
pub trait CoordinationBackend: Send + Sync {
    /// Create a lease labelled `name` with the given TTL. Returns its ID.
    async fn create_session(&self, name: &str, ttl: Duration) -> Result<String>;

    /// Extend a lease.
    async fn renew_session(&self, id: &str) -> Result<()>;

    /// Release a lease. Unknown IDs are not an error.
    async fn destroy_session(&self, id: &str) -> Result<()>;

    /// List all live leases.
    async fn list_sessions(&self) -> Result<Vec<SessionDescriptor>>;

    /// Write `value` at `key` if the key is unlocked or already locked by
    /// `session_id`. Returns `false` when another session holds the key.
    async fn put_if_session_owns(&self, key: &str, value: &[u8], session_id: &str)
    -> Result<bool>;

    /// Release the lock on `key` if `session_id` holds it.
    async fn release_if_session_owns(&self, key: &str, session_id: &str) -> Result<bool>;

    /// Read a key.
    async fn get_key(&self, key: &str) -> Result<Option<KeyEntry>>;
}
