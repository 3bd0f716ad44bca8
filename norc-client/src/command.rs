//! Commands submitted through the client
//!
//! The transport core only needs to interpret the handful of commands that
//! affect its own state: the notification subscriptions (replayed after a
//! reconnect) and the long-running scan operation (excluded from resends by
//! default). Everything else from the node's catalogue travels as
//! [`Command::Raw`], leaving argument marshalling and result decoding to the
//! thin per-command wrappers built on top of the client.
//!
//! Method-name derivation is a total function over the variants.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A transaction outpoint watched for spend notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction id, hex encoded.
    pub txid: String,
    /// Output index within the transaction.
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: impl Into<String>, index: u32) -> Self {
        Self {
            txid: txid.into(),
            index,
        }
    }

    fn to_param(&self) -> Value {
        json!({"txid": self.txid, "index": self.index})
    }
}

/// A command to submit to the server.
#[derive(Debug, Clone)]
pub enum Command {
    /// Subscribe to block connected/disconnected notifications.
    NotifyBlocks,
    /// Subscribe to notifications for transactions accepted to the mempool,
    /// optionally in verbose form.
    NotifyNewTransactions {
        verbose: bool,
    },
    /// Subscribe to notifications for spends of the given outpoints.
    NotifySpent {
        outpoints: Vec<OutPoint>,
    },
    /// Subscribe to notifications for payments to the given addresses.
    NotifyReceived {
        addresses: Vec<String>,
    },
    /// Rescan historical blocks for activity on the given addresses and
    /// outpoints, starting from a block hash. Long running; excluded from
    /// the default resend set.
    Rescan {
        begin_block: String,
        addresses: Vec<String>,
        outpoints: Vec<OutPoint>,
    },
    /// Any other command from the node's catalogue, with pre-marshalled
    /// positional parameters.
    Raw {
        method: String,
        params: Vec<Value>,
    },
}

impl Command {
    /// Convenience constructor for catalogue commands.
    pub fn raw(method: impl Into<String>, params: Vec<Value>) -> Self {
        Command::Raw {
            method: method.into(),
            params,
        }
    }

    /// The wire method name for this command.
    pub fn method(&self) -> &str {
        match self {
            Command::NotifyBlocks => "notifyblocks",
            Command::NotifyNewTransactions { .. } => "notifynewtransactions",
            Command::NotifySpent { .. } => "notifyspent",
            Command::NotifyReceived { .. } => "notifyreceived",
            Command::Rescan { .. } => "rescan",
            Command::Raw { method, .. } => method,
        }
    }

    /// The positional parameters for this command.
    pub fn params(&self) -> Vec<Value> {
        match self {
            Command::NotifyBlocks => Vec::new(),
            Command::NotifyNewTransactions { verbose } => vec![json!(verbose)],
            Command::NotifySpent { outpoints } => {
                vec![Value::Array(outpoints.iter().map(OutPoint::to_param).collect())]
            }
            Command::NotifyReceived { addresses } => {
                vec![Value::Array(
                    addresses.iter().map(|a| Value::String(a.clone())).collect(),
                )]
            }
            Command::Rescan {
                begin_block,
                addresses,
                outpoints,
            } => vec![
                json!(begin_block),
                Value::Array(
                    addresses.iter().map(|a| Value::String(a.clone())).collect(),
                ),
                Value::Array(outpoints.iter().map(OutPoint::to_param).collect()),
            ],
            Command::Raw { params, .. } => params.clone(),
        }
    }
}
