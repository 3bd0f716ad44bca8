//! Notification handling and subscription state
//!
//! Server-pushed notifications arrive on the persistent connection as
//! frames with a null id. The read loop hands them here, where they are
//! demultiplexed by method name to the matching callback in
//! [`NotificationHandlers`]. Notifications with no registered handler are
//! dropped; malformed parameters are logged and dropped, never fatal.
//!
//! [`NotificationState`] remembers which subscriptions the caller has
//! established so the reconnect supervisor can replay them: at most one
//! command per category, with all watched outpoints and all watched
//! addresses coalesced into a single command each.

use crate::command::{Command, OutPoint};
use norc_core::types::NotificationFrame;
use serde_json::value::RawValue;
use std::collections::HashSet;

/// Method name of the block connected notification.
pub const BLOCK_CONNECTED: &str = "blockconnected";
/// Method name of the block disconnected notification.
pub const BLOCK_DISCONNECTED: &str = "blockdisconnected";
/// Method name of the mempool acceptance notification.
pub const TX_ACCEPTED: &str = "txaccepted";
/// Method name of the verbose mempool acceptance notification.
pub const TX_ACCEPTED_VERBOSE: &str = "txacceptedverbose";
/// Method name of the watched outpoint spend notification.
pub const REDEEMING_TX: &str = "redeemingtx";
/// Method name of the watched address payment notification.
pub const RECV_TX: &str = "recvtx";

/// Callbacks for server-initiated events. Each field may be left unset to
/// ignore that notification kind.
///
/// Callbacks are invoked directly from the connection's read loop, so they
/// should hand long-running work off elsewhere rather than block frame
/// processing.
#[derive(Default)]
pub struct NotificationHandlers {
    /// Invoked when the connection is first established and again after
    /// each successful reconnect.
    pub on_client_connected: Option<Box<dyn Fn() + Send + Sync>>,

    /// Invoked when a block is connected to the best chain, with the block
    /// hash and height.
    pub on_block_connected: Option<Box<dyn Fn(&str, i64) + Send + Sync>>,

    /// Invoked when a block is disconnected from the best chain, with the
    /// block hash and height.
    pub on_block_disconnected: Option<Box<dyn Fn(&str, i64) + Send + Sync>>,

    /// Invoked when a transaction is accepted to the mempool, with the
    /// transaction id and the total output value.
    pub on_tx_accepted: Option<Box<dyn Fn(&str, f64) + Send + Sync>>,

    /// Invoked for verbose mempool acceptance, with the raw transaction
    /// details for typed decoding by the caller.
    pub on_tx_accepted_verbose: Option<Box<dyn Fn(&RawValue) + Send + Sync>>,

    /// Invoked when a watched outpoint is spent, with the serialized
    /// spending transaction and optional block details.
    pub on_spent: Option<Box<dyn Fn(&str, Option<&RawValue>) + Send + Sync>>,

    /// Invoked when a watched address receives a payment, with the
    /// serialized transaction and optional block details.
    pub on_received: Option<Box<dyn Fn(&str, Option<&RawValue>) + Send + Sync>>,

    /// Invoked for any notification without a dedicated handler above.
    pub on_unknown: Option<Box<dyn Fn(&str, &[Box<RawValue>]) + Send + Sync>>,
}

/// Route a notification to its handler, decoding the positional parameters
/// for the typed callbacks.
pub(crate) fn dispatch(handlers: &NotificationHandlers, ntfn: &NotificationFrame) {
    match ntfn.method.as_str() {
        BLOCK_CONNECTED => {
            if let Some(cb) = &handlers.on_block_connected {
                match block_params(&ntfn.params) {
                    Some((hash, height)) => cb(&hash, height),
                    None => warn_malformed(BLOCK_CONNECTED),
                }
            }
        }
        BLOCK_DISCONNECTED => {
            if let Some(cb) = &handlers.on_block_disconnected {
                match block_params(&ntfn.params) {
                    Some((hash, height)) => cb(&hash, height),
                    None => warn_malformed(BLOCK_DISCONNECTED),
                }
            }
        }
        TX_ACCEPTED => {
            if let Some(cb) = &handlers.on_tx_accepted {
                let decoded = (
                    decode_param::<String>(ntfn.params.first()),
                    decode_param::<f64>(ntfn.params.get(1)),
                );
                match decoded {
                    (Some(txid), Some(amount)) => cb(&txid, amount),
                    _ => warn_malformed(TX_ACCEPTED),
                }
            }
        }
        TX_ACCEPTED_VERBOSE => {
            if let Some(cb) = &handlers.on_tx_accepted_verbose {
                match ntfn.params.first() {
                    Some(details) => cb(details),
                    None => warn_malformed(TX_ACCEPTED_VERBOSE),
                }
            }
        }
        REDEEMING_TX => {
            if let Some(cb) = &handlers.on_spent {
                match decode_param::<String>(ntfn.params.first()) {
                    Some(tx) => cb(&tx, ntfn.params.get(1).map(|details| &**details)),
                    None => warn_malformed(REDEEMING_TX),
                }
            }
        }
        RECV_TX => {
            if let Some(cb) = &handlers.on_received {
                match decode_param::<String>(ntfn.params.first()) {
                    Some(tx) => cb(&tx, ntfn.params.get(1).map(|details| &**details)),
                    None => warn_malformed(RECV_TX),
                }
            }
        }
        other => {
            if let Some(cb) = &handlers.on_unknown {
                cb(other, &ntfn.params);
            } else {
                tracing::trace!(method = other, "ignoring notification with no handler");
            }
        }
    }
}

fn block_params(params: &[Box<RawValue>]) -> Option<(String, i64)> {
    let hash = decode_param::<String>(params.first())?;
    let height = decode_param::<i64>(params.get(1))?;
    Some((hash, height))
}

fn decode_param<T: serde::de::DeserializeOwned>(param: Option<&Box<RawValue>>) -> Option<T> {
    serde_json::from_str(param?.get()).ok()
}

fn warn_malformed(method: &str) {
    tracing::warn!(method, "dropping notification with malformed parameters");
}

/// The subscriptions the caller has established, tracked so they can be
/// replayed after a reconnect without double-registering.
#[derive(Debug, Clone, Default)]
pub(crate) struct NotificationState {
    pub notify_blocks: bool,
    pub notify_new_tx: bool,
    pub notify_new_tx_verbose: bool,
    pub notify_spent: HashSet<OutPoint>,
    pub notify_received: HashSet<String>,
}

impl NotificationState {
    /// Merge a successfully submitted subscription command into the state.
    /// Non-subscription commands leave the state untouched.
    pub fn merge(&mut self, cmd: &Command) {
        match cmd {
            Command::NotifyBlocks => self.notify_blocks = true,
            Command::NotifyNewTransactions { verbose } => {
                if *verbose {
                    self.notify_new_tx_verbose = true;
                } else {
                    self.notify_new_tx = true;
                }
            }
            Command::NotifySpent { outpoints } => {
                self.notify_spent.extend(outpoints.iter().cloned());
            }
            Command::NotifyReceived { addresses } => {
                self.notify_received.extend(addresses.iter().cloned());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use norc_core::codec::decode_inbound;
    use norc_core::InboundFrame;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};

    fn notification(raw: &str) -> NotificationFrame {
        match decode_inbound(raw).unwrap() {
            InboundFrame::Notification(n) => n,
            _ => panic!("expected notification"),
        }
    }

    #[test]
    fn dispatches_block_connected() {
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let handlers = NotificationHandlers {
            on_block_connected: Some(Box::new(move |hash, height| {
                *seen2.lock().unwrap() = Some((hash.to_string(), height));
            })),
            ..NotificationHandlers::default()
        };

        let ntfn = notification(r#"{"id":null,"method":"blockconnected","params":["HASH",123]}"#);
        dispatch(&handlers, &ntfn);
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(("HASH".to_string(), 123))
        );
    }

    #[test]
    fn malformed_params_are_dropped() {
        let count = Arc::new(AtomicI64::new(0));
        let count2 = count.clone();
        let handlers = NotificationHandlers {
            on_block_connected: Some(Box::new(move |_, _| {
                count2.fetch_add(1, Ordering::SeqCst);
            })),
            ..NotificationHandlers::default()
        };

        // Height is missing.
        let ntfn = notification(r#"{"id":null,"method":"blockconnected","params":["HASH"]}"#);
        dispatch(&handlers, &ntfn);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_methods_go_to_the_fallback() {
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let handlers = NotificationHandlers {
            on_unknown: Some(Box::new(move |method, params| {
                *seen2.lock().unwrap() = Some((method.to_string(), params.len()));
            })),
            ..NotificationHandlers::default()
        };

        let ntfn = notification(r#"{"id":null,"method":"somefuture","params":[1,2,3]}"#);
        dispatch(&handlers, &ntfn);
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(("somefuture".to_string(), 3))
        );
    }

    #[test]
    fn merge_tracks_each_category() {
        let mut state = NotificationState::default();

        state.merge(&Command::NotifyBlocks);
        assert!(state.notify_blocks);

        state.merge(&Command::NotifyNewTransactions { verbose: false });
        assert!(state.notify_new_tx);
        assert!(!state.notify_new_tx_verbose);

        state.merge(&Command::NotifyNewTransactions { verbose: true });
        assert!(state.notify_new_tx);
        assert!(state.notify_new_tx_verbose);

        state.merge(&Command::NotifySpent {
            outpoints: vec![OutPoint::new("aa", 0)],
        });
        state.merge(&Command::NotifySpent {
            outpoints: vec![OutPoint::new("aa", 0), OutPoint::new("bb", 1)],
        });
        assert_eq!(state.notify_spent.len(), 2);

        state.merge(&Command::NotifyReceived {
            addresses: vec!["A".to_string()],
        });
        state.merge(&Command::NotifyReceived {
            addresses: vec!["A".to_string(), "B".to_string()],
        });
        assert_eq!(state.notify_received.len(), 2);
    }

    #[test]
    fn merge_ignores_plain_commands() {
        let mut state = NotificationState::default();
        state.merge(&Command::raw("getblockcount", Vec::new()));
        state.merge(&Command::Rescan {
            begin_block: "h".to_string(),
            addresses: vec!["A".to_string()],
            outpoints: Vec::new(),
        });
        assert!(!state.notify_blocks);
        assert!(state.notify_received.is_empty());
    }
}
