//! Managed coordination sessions over a Consul-style backend.
//!
//! A [`Session`] binds this process to a server-side lease with a TTL. The
//! session keeps the lease alive in the background, reports invalidation
//! exactly once through its [`ErrorSignal`], and uses the lease as the
//! ownership token for advisory locks on keys.
//!
//! # Key Types
//!
//! - [`CoordinationBackend`] - Trait for the lease and conditional-write calls
//! - [`ConsulBackend`] - Consul HTTP API implementation
//! - [`InMemoryBackend`] - In-process implementation for tests
//! - [`SessionManager`] - Trait for lease create/renew/destroy
//! - [`Session`] - Lease state machine with background renewal

pub mod backend;
pub mod config;
pub mod error;
pub mod manager;
pub mod recording;
pub mod session;
pub mod signal;

// Re-exports
pub use backend::{
    ConsulBackend, CoordinationBackend, InMemoryBackend, KeyEntry, SessionDescriptor,
};
pub use config::{ConsulConfig, MAX_SESSION_TTL, SessionBehavior, SessionConfig, TetherConfig};
pub use error::{Error, Result};
pub use manager::{BackendSessionManager, SessionManager};
pub use recording::RecordingSessionManager;
pub use session::{Session, SessionState};
pub use signal::ErrorSignal;
