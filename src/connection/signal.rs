//! One-shot broadcast close notification
//!
//! Every task of a connection holds the same `ClosedSignal`. Triggering it is
//! idempotent and every waiter, present or future, observes it without
//! consuming it.

use std::sync::Mutex;

use tokio::sync::watch;

/// Broadcast-once closed notification
#[derive(Debug)]
pub struct ClosedSignal {
    /// Trigger-once flag
    fired: Mutex<bool>,
    /// Wakes every waiter when the flag flips
    tx: watch::Sender<bool>,
}

impl ClosedSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            fired: Mutex::new(false),
            tx,
        }
    }

    /// Fire the signal
    ///
    /// Returns `true` only for the call that actually fired it.
    pub fn trigger(&self) -> bool {
        let mut fired = match self.fired.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *fired {
            return false;
        }
        *fired = true;
        self.tx.send_replace(true);
        true
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal fires
    ///
    /// Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for ClosedSignal {
    fn default() -> Self {
        Self::new()
    }
}
