//! Pending-request tracking
//!
//! Every submitted command gets a monotonically increasing 64-bit id and a
//! single-use reply sink (a oneshot channel). The registry owns the id
//! allocator and the id → pending-request mapping so that replies arriving
//! out of band can be routed back to their callers.
//!
//! Two disjoint sequences exist: the live sequence (normal submissions over
//! the persistent connection) and the batch sequence (staged commands
//! awaiting a flush). Ids are strictly increasing and never reused, so an
//! ordered map per sequence gives removal by id and iteration in original
//! submission order at once.
//!
//! The add operation and the shutdown transition share one critical
//! section: a concurrent shutdown either observes a request (and fails it
//! during the drain) or prevents it (and the caller sees shutting-down).
//! No request is ever lost between the two.

use crate::command::Command;
use crate::signal::Signal;
use norc_core::{Error, Result};
use serde_json::value::RawValue;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{oneshot, Mutex};

/// The value delivered through a reply sink: raw result bytes or a failure.
pub(crate) type Reply = Result<Box<RawValue>>;

/// A submitted command whose reply has not yet been delivered.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub id: u64,
    pub method: String,
    pub command: Command,
    /// The serialized frame, kept verbatim for resend after a reconnect.
    pub frame: String,
    pub reply_tx: oneshot::Sender<Reply>,
}

impl PendingRequest {
    /// Fulfill the reply sink with a failure.
    pub fn fail(self, err: Error) {
        let _ = self.reply_tx.send(Err(err));
    }

    /// Fulfill the reply sink.
    pub fn fulfill(self, reply: Reply) {
        let _ = self.reply_tx.send(reply);
    }
}

#[derive(Default)]
struct Inner {
    live: BTreeMap<u64, PendingRequest>,
    batch: BTreeMap<u64, PendingRequest>,
    /// Sinks detached from their entries without being fulfilled (requests
    /// dropped from the resend pass, staged commands of a failed batch
    /// exchange). The shutdown drain fulfills them so every caller
    /// eventually hears exactly once.
    abandoned: Vec<oneshot::Sender<Reply>>,
}

/// Id allocation plus the id → pending-request map.
pub(crate) struct Registry {
    next_id: AtomicU64,
    shutdown: Signal,
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new(shutdown: Signal) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            shutdown,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The next request id. The first id handed out is 1, and ids strictly
    /// increase for the lifetime of the client.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Track a pending request in the live or batch sequence. Fails by
    /// handing the request back when the client is already shutting down;
    /// the check and the insertion share the registry lock.
    pub async fn add(
        &self,
        req: PendingRequest,
        batch: bool,
    ) -> std::result::Result<(), PendingRequest> {
        let mut inner = self.inner.lock().await;
        if self.shutdown.is_fired() {
            return Err(req);
        }
        let seq = if batch {
            &mut inner.batch
        } else {
            &mut inner.live
        };
        seq.insert(req.id, req);
        Ok(())
    }

    /// Detach and return the pending request with the given id.
    pub async fn remove(&self, id: u64) -> Option<PendingRequest> {
        let mut inner = self.inner.lock().await;
        let found = inner.live.remove(&id);
        if found.is_some() {
            return found;
        }
        inner.batch.remove(&id)
    }

    /// Initiate shutdown and fail every outstanding reply sink. The
    /// shutdown signal is fired and the registry drained under one lock
    /// hold, excluding interleaved additions. Returns false when shutdown
    /// was already initiated.
    pub async fn shutdown_with(&self, err: Error) -> bool {
        let mut inner = self.inner.lock().await;
        if !self.shutdown.fire() {
            return false;
        }
        for (_, req) in std::mem::take(&mut inner.live) {
            req.fail(err.clone());
        }
        for (_, req) in std::mem::take(&mut inner.batch) {
            req.fail(err.clone());
        }
        for tx in std::mem::take(&mut inner.abandoned) {
            let _ = tx.send(Err(Error::Shutdown));
        }
        true
    }

    /// Snapshot the live sequence for a resend pass, in original submission
    /// order. Entries whose method is in the skip set are detached without
    /// notifying their callers: no reply will come for them.
    pub async fn resend_snapshot(&self, skip: &HashSet<String>) -> Vec<(u64, String)> {
        let mut inner = self.inner.lock().await;
        let dropped: Vec<u64> = inner
            .live
            .values()
            .filter(|req| skip.contains(&req.method))
            .map(|req| req.id)
            .collect();
        for id in dropped {
            if let Some(req) = inner.live.remove(&id) {
                inner.abandoned.push(req.reply_tx);
            }
        }
        inner
            .live
            .values()
            .map(|req| (req.id, req.frame.clone()))
            .collect()
    }

    /// The staged batch frames, in original submission order.
    pub async fn batch_frames(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.batch.values().map(|req| req.frame.clone()).collect()
    }

    /// Empty the batch sequence after a failed exchange. The detached sinks
    /// are fulfilled only by the shutdown drain.
    pub async fn clear_batch(&self) {
        let mut inner = self.inner.lock().await;
        let drained = std::mem::take(&mut inner.batch);
        for (_, req) in drained {
            inner.abandoned.push(req.reply_tx);
        }
    }

    #[cfg(test)]
    pub async fn pending_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.live.len() + inner.batch.len()
    }
}
