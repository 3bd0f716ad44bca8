//! A dual-mode JSON-RPC client for Bitcoin-style nodes
//!
//! This crate provides [`Client`], a transport multiplexer that accepts
//! command submissions from many concurrent callers and correlates the
//! replies back to them by id. It runs in one of two modes, fixed at
//! construction:
//!
//! - **Persistent mode** (the default): JSON-RPC 1.0 over a long-lived
//!   bidirectional WebSocket. Server-initiated notifications are
//!   demultiplexed to the typed callbacks in [`NotificationHandlers`], and
//!   connection loss is survived transparently: the client redials with a
//!   capped backoff, replays its subscription state, and resends requests
//!   that were still in flight.
//! - **One-shot mode**: JSON-RPC 2.0 over independent HTTP POST exchanges,
//!   for servers without bidirectional support. A batch client
//!   ([`Client::new_batch`]) stages commands and sends them as a single
//!   array-framed exchange.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use norc_client::{Client, Command, ConnConfig, NotificationHandlers};
//!
//! #[tokio::main]
//! async fn main() -> norc_core::Result<()> {
//!     let handlers = NotificationHandlers {
//!         on_block_connected: Some(Box::new(|hash, height| {
//!             println!("block {hash} connected at height {height}");
//!         })),
//!         ..NotificationHandlers::default()
//!     };
//!
//!     let config = ConnConfig {
//!         host: "127.0.0.1:8334".to_string(),
//!         user: "user".to_string(),
//!         pass: "pass".to_string(),
//!         ..ConnConfig::default()
//!     };
//!     let client = Client::new(config, Some(handlers)).await?;
//!
//!     client.send_cmd(Command::NotifyBlocks).await.receive().await?;
//!
//!     client.shutdown().await;
//!     client.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

mod batch;
mod client;
mod command;
mod config;
mod http;
mod notify;
mod reconnect;
mod registry;
mod signal;
mod socket;

pub use client::{Client, ResponseFuture};
pub use command::{Command, OutPoint};
pub use config::{ConnConfig, Network};
pub use notify::NotificationHandlers;
