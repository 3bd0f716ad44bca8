//! Edge-triggered one-way signals
//!
//! The client coordinates its tasks with three broadcast signals:
//! connection-established (fires once), currently-disconnected (a fresh
//! signal is installed on each reconnect), and shutdown (fires once,
//! terminal). A [`Signal`] is a thin wrapper over a watch channel that only
//! ever moves from unfired to fired.

use std::sync::Arc;
use tokio::sync::watch;

/// A clonable, fire-once broadcast signal.
#[derive(Clone, Debug)]
pub(crate) struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Returns true if this call was the one that fired it.
    pub fn fire(&self) -> bool {
        let mut newly = false;
        self.tx.send_modify(|fired| {
            newly = !*fired;
            *fired = true;
        });
        newly
    }

    /// Whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn fired(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
