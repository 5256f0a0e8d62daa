//! Session struct and lease state machine
//!
//! A Session owns one backend lease at a time and a background monitor task
//! that keeps it alive:
//!
//! - While the lease ID is empty (backend was down at construction) the
//!   monitor retries creation every `retry_interval`.
//! - While a lease exists the monitor renews it every `renew_interval`
//!   (half the TTL by default), retrying sooner after a failed renewal.
//! - A renewal answered with "not found" or a rejection, or an outage that
//!   outlasts the TTL, invalidates the session and settles the error signal.
//!
//! Lifecycle transitions (monitor ticks, `destroy`, `recreate`) are
//! serialized by an async transition lock. `destroy` and `recreate` cancel
//! the monitor before taking it, abandoning any backend call the monitor has
//! in flight. The lease ID and state sit behind a plain mutex that is never
//! held across an await, so accessors stay synchronous.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backend::CoordinationBackend;
use crate::config::{MAX_SESSION_TTL, SessionConfig};
use crate::error::{Error, Result};
use crate::manager::SessionManager;
use crate::signal::{ErrorSignal, SignalSlot};

/// State of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Lease believed live (or creation pending), monitor running.
    Active,
    /// The monitor found the lease can no longer be renewed.
    Invalidated,
    /// Lease released and monitor stopped.
    Destroyed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Invalidated => write!(f, "invalidated"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

struct Lease {
    id: String,
    state: SessionState,
    /// Last successful create or renew.
    renewed_at: Instant,
    /// Renewal attempts failed since `renewed_at`.
    failures: u32,
}

struct Monitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    name: String,
    ttl: Duration,
    config: SessionConfig,
    backend: Arc<dyn CoordinationBackend>,
    manager: Arc<dyn SessionManager>,
    lease: Mutex<Lease>,
    transition: tokio::sync::Mutex<()>,
    signal: SignalSlot,
    monitor: Mutex<Option<Monitor>>,
}

impl Inner {
    fn lease(&self) -> MutexGuard<'_, Lease> {
        self.lease.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn monitor(&self) -> MutexGuard<'_, Option<Monitor>> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The lease ID, if the session can act with it right now.
    fn live_id(&self) -> Result<String> {
        let lease = self.lease();
        if lease.state != SessionState::Active || lease.id.is_empty() {
            return Err(Error::SessionInvalid);
        }
        Ok(lease.id.clone())
    }

    fn arm(&self, id: String) {
        let mut lease = self.lease();
        lease.id = id;
        lease.state = SessionState::Active;
        lease.renewed_at = Instant::now();
        lease.failures = 0;
    }

    fn start_monitor(self: &Arc<Self>) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_monitor(Arc::clone(self), cancel.clone()));
        if let Some(previous) = self.monitor().replace(Monitor { cancel, handle }) {
            previous.cancel.cancel();
        }
    }

    fn stop_monitor(&self) -> Option<JoinHandle<()>> {
        self.monitor().take().map(|monitor| {
            monitor.cancel.cancel();
            monitor.handle
        })
    }

    fn next_delay(&self) -> Duration {
        let lease = self.lease();
        let renew = self.config.renew_interval_for(self.ttl);
        if lease.id.is_empty() {
            self.config.retry_interval
        } else if lease.failures > 0 {
            renew.min(self.config.retry_interval)
        } else {
            renew
        }
    }

    /// One monitor step. Caller holds the transition lock.
    async fn tick(&self) -> ControlFlow<()> {
        let (id, state) = {
            let lease = self.lease();
            (lease.id.clone(), lease.state)
        };
        if state != SessionState::Active {
            return ControlFlow::Break(());
        }

        if id.is_empty() {
            return match self.manager.create(&self.name, self.ttl).await {
                Ok(id) => {
                    info!(session_id = %id, name = %self.name, "Session created after backend became reachable");
                    self.arm(id);
                    ControlFlow::Continue(())
                }
                Err(e) if e.is_retryable() => {
                    debug!(name = %self.name, error = %e, "Backend still unavailable, retrying session creation");
                    ControlFlow::Continue(())
                }
                Err(e) => {
                    self.invalidate(e);
                    ControlFlow::Break(())
                }
            };
        }

        match self.manager.renew(&id).await {
            Ok(()) => {
                let mut lease = self.lease();
                lease.renewed_at = Instant::now();
                lease.failures = 0;
                trace!(session_id = %id, "Renewed session");
                ControlFlow::Continue(())
            }
            Err(e) if e.is_retryable() => {
                let elapsed = {
                    let mut lease = self.lease();
                    lease.failures += 1;
                    lease.renewed_at.elapsed()
                };
                if elapsed >= self.ttl {
                    self.invalidate(e);
                    ControlFlow::Break(())
                } else {
                    warn!(
                        session_id = %id,
                        error = %e,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Failed to renew session, will retry"
                    );
                    ControlFlow::Continue(())
                }
            }
            Err(e) => {
                self.invalidate(e);
                ControlFlow::Break(())
            }
        }
    }

    fn invalidate(&self, error: Error) {
        let id = {
            let mut lease = self.lease();
            lease.state = SessionState::Invalidated;
            lease.id.clone()
        };
        warn!(session_id = %id, name = %self.name, error = %error, "Session invalidated");
        self.signal.fire(Some(error));
    }

    /// Release the lease and settle the signal. Caller holds the transition
    /// lock.
    async fn teardown(&self) {
        self.stop_monitor();

        let id = {
            let mut lease = self.lease();
            if lease.state == SessionState::Destroyed {
                return;
            }
            lease.state = SessionState::Destroyed;
            std::mem::take(&mut lease.id)
        };

        if !id.is_empty()
            && let Err(e) = self.manager.destroy(&id).await
        {
            warn!(session_id = %id, error = %e, "Failed to destroy session, leaving it to expire");
        }

        self.signal.fire(None);
        debug!(session_id = %id, name = %self.name, "Session torn down");
    }
}

async fn run_monitor(inner: Arc<Inner>, cancel: CancellationToken) {
    debug!(name = %inner.name, "Session monitor started");

    loop {
        let delay = inner.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let _transition = inner.transition.lock().await;
        let flow = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            flow = inner.tick() => flow,
        };
        if flow.is_break() {
            break;
        }
    }

    debug!(name = %inner.name, "Session monitor stopped");
}

/// A managed lease on the coordination backend.
///
/// Methods take `&self`; wrap the session in an `Arc` to share it between
/// tasks. Dropping a session stops its monitor without destroying the
/// lease, which then expires on the backend after its TTL.
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Create a session with default timing.
    ///
    /// Succeeds even when the backend is unreachable; the lease is then
    /// created in the background and [`Session::id`] stays empty until it
    /// is. Fails on invalid parameters or if the backend rejects the lease.
    pub async fn new(
        name: impl Into<String>,
        ttl: Duration,
        backend: Arc<dyn CoordinationBackend>,
        manager: Arc<dyn SessionManager>,
    ) -> Result<Self> {
        Self::with_config(name, ttl, backend, manager, SessionConfig::default()).await
    }

    /// Create a session with explicit timing.
    pub async fn with_config(
        name: impl Into<String>,
        ttl: Duration,
        backend: Arc<dyn CoordinationBackend>,
        manager: Arc<dyn SessionManager>,
        config: SessionConfig,
    ) -> Result<Self> {
        let name = name.into();
        validate(ttl, &config)?;

        let inner = Arc::new(Inner {
            name,
            ttl,
            config,
            backend,
            manager,
            lease: Mutex::new(Lease {
                id: String::new(),
                state: SessionState::Active,
                renewed_at: Instant::now(),
                failures: 0,
            }),
            transition: tokio::sync::Mutex::new(()),
            signal: SignalSlot::new(),
            monitor: Mutex::new(None),
        });

        match inner.manager.create(&inner.name, ttl).await {
            Ok(id) => inner.arm(id),
            Err(e) if e.is_retryable() => {
                warn!(name = %inner.name, error = %e, "Backend unavailable, session will be created in the background");
            }
            Err(e) => return Err(e),
        }

        inner.start_monitor();
        Ok(Self { inner })
    }

    /// Current lease ID, empty if there is none.
    pub fn id(&self) -> String {
        self.inner.lease().id.clone()
    }

    /// Logical name the lease is labelled with.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Lease TTL.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lease().state
    }

    /// Termination signal for the current lease generation.
    pub fn err(&self) -> ErrorSignal {
        self.inner.signal.subscribe()
    }

    /// Try once to lock `key` with this session's lease, writing `value`.
    ///
    /// Does not retry. Fails with `LockHeldByOther` when another session
    /// holds the key and `SessionInvalid` when there is no live lease. The
    /// lease ID is read at entry; if a concurrent `recreate` or `destroy`
    /// replaced it before the backend answered, the call fails with
    /// `SessionInvalid`.
    pub async fn acquire_lock(&self, key: &str, value: &[u8]) -> Result<()> {
        let id = self.inner.live_id()?;

        let acquired = match self
            .inner
            .backend
            .put_if_session_owns(key, value, &id)
            .await
        {
            Ok(acquired) => acquired,
            Err(Error::SessionNotFound(_)) => return Err(Error::SessionInvalid),
            Err(e) => return Err(e),
        };

        if self.inner.live_id().ok().as_deref() != Some(id.as_str()) {
            debug!(session_id = %id, key = %key, "Lease changed during lock acquisition");
            return Err(Error::SessionInvalid);
        }

        if acquired {
            debug!(session_id = %id, key = %key, "Acquired lock");
            Ok(())
        } else {
            Err(Error::LockHeldByOther {
                key: key.to_string(),
            })
        }
    }

    /// Release `key` if this session's lease holds it.
    ///
    /// Returns whether a lock was released.
    pub async fn release_lock(&self, key: &str) -> Result<bool> {
        let id = self.inner.live_id()?;

        match self.inner.backend.release_if_session_owns(key, &id).await {
            Ok(released) => {
                debug!(session_id = %id, key = %key, released, "Released lock");
                Ok(released)
            }
            Err(Error::SessionNotFound(_)) => Err(Error::SessionInvalid),
            Err(e) => Err(e),
        }
    }

    /// Release the lease and stop the monitor.
    ///
    /// Backend errors are logged, not returned. Settles the error signal
    /// with `None` unless it already carries an invalidation. Calling it
    /// again is a no-op.
    pub async fn destroy(&self) {
        // Cancel first so an in-flight renewal gives up the transition lock.
        self.inner.stop_monitor();
        let _transition = self.inner.transition.lock().await;
        self.inner.teardown().await;
    }

    /// Destroy the current lease, if any, and create a new one.
    ///
    /// Unlike construction, creation is attempted once and its failure is
    /// returned; the session then stays destroyed. On success the session
    /// is active again with a new ID and a fresh error signal.
    pub async fn recreate(&self) -> Result<&Self> {
        self.inner.stop_monitor();
        let _transition = self.inner.transition.lock().await;
        self.inner.teardown().await;

        let id = self.inner.manager.create(&self.inner.name, self.inner.ttl).await?;
        info!(session_id = %id, name = %self.inner.name, "Session recreated");

        self.inner.signal.rearm();
        self.inner.arm(id);
        self.inner.start_monitor();
        Ok(self)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.stop_monitor() {
            handle.abort();
        }
    }
}

fn validate(ttl: Duration, config: &SessionConfig) -> Result<()> {
    if ttl.is_zero() || ttl > MAX_SESSION_TTL {
        return Err(Error::InvalidConfig(format!(
            "session TTL {:?} must be positive and at most {:?}",
            ttl, MAX_SESSION_TTL
        )));
    }
    if config.retry_interval.is_zero() {
        return Err(Error::InvalidConfig(
            "retry interval must be positive".to_string(),
        ));
    }
    let renew = config.renew_interval_for(ttl);
    if renew.is_zero() || renew >= ttl {
        return Err(Error::InvalidConfig(format!(
            "renew interval {:?} must be positive and shorter than the TTL {:?}",
            renew, ttl
        )));
    }
    Ok(())
}
