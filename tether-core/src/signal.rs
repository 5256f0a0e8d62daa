//! Settle-once notification for session termination.
//!
//! Each lease generation gets one slot. The slot settles at most once, with
//! `None` for a clean destroy or `Some(error)` for an invalidation, and the
//! sending side is dropped right after. Sends never block and later sends
//! are ignored.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::error::Error;

#[derive(Debug, Clone)]
enum Signal {
    Pending,
    Settled(Option<Error>),
}

/// Receiving side of a session's termination signal.
///
/// Cloning yields another observer of the same generation.
#[derive(Debug, Clone)]
pub struct ErrorSignal {
    rx: watch::Receiver<Signal>,
}

impl ErrorSignal {
    /// Wait until the session terminates.
    ///
    /// Returns `None` after a clean destroy and `Some(error)` when the lease
    /// was invalidated. A slot closed without a value also yields `None`.
    pub async fn recv(&mut self) -> Option<Error> {
        match self
            .rx
            .wait_for(|signal| matches!(signal, Signal::Settled(_)))
            .await
        {
            Ok(signal) => match &*signal {
                Signal::Settled(err) => err.clone(),
                Signal::Pending => None,
            },
            Err(_) => None,
        }
    }

    /// The outcome if the signal has settled, without waiting.
    pub fn try_recv(&self) -> Option<Option<Error>> {
        match &*self.rx.borrow() {
            Signal::Settled(err) => Some(err.clone()),
            Signal::Pending => None,
        }
    }

    /// Whether the signal has settled.
    pub fn is_settled(&self) -> bool {
        self.try_recv().is_some()
    }
}

struct Slot {
    tx: Option<watch::Sender<Signal>>,
    rx: watch::Receiver<Signal>,
}

impl Slot {
    fn pending() -> Self {
        let (tx, rx) = watch::channel(Signal::Pending);
        Self { tx: Some(tx), rx }
    }
}

/// Sending side, owned by the session.
pub(crate) struct SignalSlot {
    slot: Mutex<Slot>,
}

impl SignalSlot {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::pending()),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settle the current generation. Returns `false` if it already was.
    pub(crate) fn fire(&self, outcome: Option<Error>) -> bool {
        match self.slot().tx.take() {
            Some(tx) => {
                tx.send_replace(Signal::Settled(outcome));
                true
            }
            None => false,
        }
    }

    /// Start a fresh generation. Observers of the previous one keep what
    /// they saw.
    pub(crate) fn rearm(&self) {
        *self.slot() = Slot::pending();
    }

    pub(crate) fn subscribe(&self) -> ErrorSignal {
        ErrorSignal {
            rx: self.slot().rx.clone(),
        }
    }
}
