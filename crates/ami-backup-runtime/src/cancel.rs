//! Cooperative cancellation for long waits.
//!
//! A [`Cancellation`] is handed to every poll loop; the matching
//! [`CancelHandle`] is held by whoever may abort the run (the CLI wires it
//! to Ctrl-C). Dropping the handle without cancelling leaves the run
//! uncancellable.

use thiserror::Error;
use tokio::sync::watch;

/// Returned when a wait was aborted through its [`CancelHandle`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Triggers cancellation.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace never fails, even with no receivers left
        self.tx.send_replace(true);
    }
}

/// Observes cancellation.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// A linked handle/observer pair.
    pub fn new() -> (CancelHandle, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Cancellation { rx })
    }

    /// An observer that is never cancelled.
    pub fn never() -> Self {
        let (_, cancellation) = Self::new();
        cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}
