//! Core types for the norc JSON-RPC client
//!
//! This crate holds everything the client crate needs that does no I/O:
//!
//! - **Wire types** ([`types`]): outbound [`Request`] frames (JSON-RPC 1.0
//!   and 2.0), classified inbound frames, protocol version tags
//! - **Codec** ([`codec`]): inbound frame classification per JSON-RPC 1.0
//!   (a frame is a notification iff its id is null or absent), outbound
//!   encoding, and batch envelope assembly
//! - **Errors** ([`error`]): one [`Error`] enum spanning transport,
//!   protocol, remote, and lifecycle failures, plus the [`RpcError`] wire
//!   object
//!
//! Result payloads are opaque [`serde_json::value::RawValue`] fragments;
//! typed decoding belongs to the command wrappers layered on the client.

pub mod codec;
pub mod error;
pub mod types;

pub use error::{Error, Result, RpcError};
pub use types::{InboundFrame, NotificationFrame, ProtocolVersion, Request, ResponseFrame};
