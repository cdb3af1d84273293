//! Per-operation cancellation signal.
//!
//! Each dispatch gets a fresh [`CancelHandle`] (kept on the slot) and a
//! [`CancelToken`] (kept by the running operation). Built on
//! [`tokio::sync::watch`] so the operation can both check the flag between
//! steps and await it inside `select!`.

use tokio::sync::watch;

/// Owning side of the signal. Stored on the slot while work is in flight.
#[derive(Debug)]
pub struct CancelHandle {
    generation: u64,
    tx: watch::Sender<bool>,
}

/// Observing side of the signal. Dropping the handle without cancelling
/// also counts as cancellation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    /// Create a linked handle/token pair tagged with `generation`.
    pub fn new(generation: u64) -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { generation, tx }, CancelToken { rx })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Signal abandonment. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once the operation has been cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the handle is gone, which is treated the same way.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
