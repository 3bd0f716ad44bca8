//! norc - a dual-mode JSON-RPC client for Bitcoin-style nodes
//!
//! This is the convenience crate that re-exports the norc sub-crates. Use it
//! if you want a single dependency providing the full client surface.
//!
//! # Architecture
//!
//! norc is organized into modular crates:
//!
//! - **norc-core**: JSON-RPC 1.0/2.0 wire types, codec, error taxonomy
//! - **norc-client**: the client itself, in two connection modes:
//!   - *persistent mode*: JSON-RPC 1.0 over a long-lived WebSocket with
//!     server-initiated notifications, automatic reconnection, in-flight
//!     request resend, and subscription replay
//!   - *one-shot mode*: JSON-RPC 2.0 over independent HTTP POST exchanges,
//!     with optional batching of many commands into one exchange
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use norc::{Client, Command, ConnConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnConfig {
//!         host: "127.0.0.1:8334".to_string(),
//!         user: "user".to_string(),
//!         pass: "pass".to_string(),
//!         ..ConnConfig::default()
//!     };
//!
//!     let client = Client::new(config, None).await?;
//!
//!     let block_count: u64 = client
//!         .send_cmd(Command::raw("getblockcount", Vec::new()))
//!         .await
//!         .receive_as()
//!         .await?;
//!     println!("block count: {}", block_count);
//!
//!     client.shutdown().await;
//!     client.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub use norc_client::{
    Client, Command, ConnConfig, Network, NotificationHandlers, OutPoint, ResponseFuture,
};
pub use norc_core::{Error, Result, RpcError};

/// Re-export of the core crate for direct access to wire types and the codec.
pub use norc_core;
/// Re-export of the client crate.
pub use norc_client;
