//! Coordination backend abstraction

pub mod consul;
pub mod memory;
pub mod traits;

// Re-export key types for convenience
pub use consul::ConsulBackend;
pub use memory::InMemoryBackend;
pub use traits::{CoordinationBackend, KeyEntry, SessionDescriptor};
