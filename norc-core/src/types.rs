//! Wire types for the JSON-RPC dialects spoken by Bitcoin-style nodes
//!
//! Outbound commands are framed as JSON-RPC 1.0 on the persistent connection
//! and JSON-RPC 2.0 inside batch exchanges; both shapes are covered by
//! [`Request`] with a [`ProtocolVersion`] tag. Parameters are always
//! positional (an array), as the node RPC dialect requires.
//!
//! Inbound server-to-client frames are either responses or notifications.
//! Per JSON-RPC 1.0, a frame is a notification exactly when its `id` field
//! is null or absent; the codec in [`crate::codec`] performs that
//! classification and produces the types here.
//!
//! # Why Raw Result Payloads?
//!
//! Result payloads are carried as raw JSON fragments
//! ([`serde_json::value::RawValue`]) so the transport core never commits to
//! a concrete result type; typed decoding happens in the per-command
//! wrappers that sit on top of the client. This also means a result that
//! traveled through a batch exchange is byte-identical to one that did not.

use crate::error::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::fmt;

/// JSON-RPC protocol version tag for outbound frames.
///
/// The persistent bidirectional connection speaks JSON-RPC 1.0; batch
/// exchanges require 2.0, where the array framing is defined. The tag only
/// affects the `jsonrpc` field of the emitted frame.
///
/// # Examples
///
/// ```rust
/// use norc_core::ProtocolVersion;
///
/// assert_eq!(ProtocolVersion::V1.as_str(), "1.0");
/// assert_eq!(ProtocolVersion::V2.to_string(), "2.0");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// JSON-RPC 1.0, used on the persistent bidirectional connection.
    V1,
    /// JSON-RPC 2.0, used for elements of a batch exchange.
    V2,
}

impl ProtocolVersion {
    /// The version string carried in the `jsonrpc` field.
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVersion::V1 => "1.0",
            ProtocolVersion::V2 => "2.0",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound JSON-RPC command frame.
///
/// # Identifier
///
/// The `id` is a client-assigned 64-bit integer, strictly increasing for
/// the lifetime of a client and never reused; the server echoes it in the
/// reply so responses can be correlated no matter what order they arrive
/// in.
///
/// # Round-Tripping
///
/// The type derives both `Serialize` and `Deserialize` so an encoded frame
/// parses back to an equal value, which is what makes resend-after-
/// reconnect safe to do with the stored bytes.
///
/// # Examples
///
/// ```rust
/// use norc_core::{ProtocolVersion, Request};
/// use serde_json::json;
///
/// let req = Request::new(
///     ProtocolVersion::V1,
///     1,
///     "getblockhash",
///     vec![json!(812000)],
/// );
/// assert_eq!(req.jsonrpc, "1.0");
/// assert_eq!(req.id, 1);
///
/// let encoded = serde_json::to_string(&req).unwrap();
/// let decoded: Request = serde_json::from_str(&encoded).unwrap();
/// assert_eq!(decoded, req);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version string: "1.0" or "2.0".
    pub jsonrpc: String,
    /// Name of the remote procedure.
    pub method: String,
    /// Positional parameters. Always present on the wire, possibly empty.
    pub params: Vec<Value>,
    /// Client-assigned identifier used to correlate the reply.
    pub id: u64,
}

impl Request {
    /// Create a new command frame.
    ///
    /// # Arguments
    ///
    /// * `version` - Which dialect the frame belongs to
    /// * `id` - The client-assigned request identifier
    /// * `method` - The remote procedure name
    /// * `params` - Positional parameters (empty for no-argument commands)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use norc_core::{ProtocolVersion, Request};
    ///
    /// let req = Request::new(ProtocolVersion::V2, 7, "getblockcount", Vec::new());
    /// assert_eq!(req.jsonrpc, "2.0");
    /// assert!(req.params.is_empty());
    /// ```
    pub fn new(
        version: ProtocolVersion,
        id: u64,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Self {
        Self {
            jsonrpc: version.as_str().to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A server reply correlated to a request by id.
///
/// The outcome is either the raw result fragment or the remote error object,
/// never both; the codec enforces the exclusion when classifying frames. A
/// reply whose `result` was null (or absent) carries the fragment `null`,
/// matching what the server meant.
#[derive(Debug)]
pub struct ResponseFrame {
    /// The id of the request this reply answers.
    pub id: u64,
    /// Raw result bytes, or the server's error object.
    pub outcome: std::result::Result<Box<RawValue>, RpcError>,
}

/// A server-initiated notification: a frame with a null or absent id.
///
/// Notifications never receive replies and are not correlated to any
/// request; they are demultiplexed by `method` to the caller's handlers.
#[derive(Debug)]
pub struct NotificationFrame {
    /// Notification method name, never empty.
    pub method: String,
    /// Positional parameters, possibly empty.
    pub params: Vec<Box<RawValue>>,
}

/// A classified inbound frame.
///
/// Produced by [`crate::codec::decode_inbound`], which applies the JSON-RPC
/// 1.0 rule: null or absent id means notification, anything else is a
/// response.
///
/// # Examples
///
/// ```rust
/// use norc_core::{codec, InboundFrame};
///
/// let frame = codec::decode_inbound(r#"{"result":"0a1b","error":null,"id":4}"#).unwrap();
/// assert!(frame.is_response());
/// assert!(!frame.is_notification());
///
/// match frame {
///     InboundFrame::Response(resp) => assert_eq!(resp.id, 4),
///     InboundFrame::Notification(_) => unreachable!(),
/// }
/// ```
#[derive(Debug)]
pub enum InboundFrame {
    /// A reply to a previously issued command.
    Response(ResponseFrame),
    /// A server-pushed notification.
    Notification(NotificationFrame),
}

impl InboundFrame {
    /// Whether this frame is a response.
    pub fn is_response(&self) -> bool {
        matches!(self, InboundFrame::Response(_))
    }

    /// Whether this frame is a notification.
    pub fn is_notification(&self) -> bool {
        matches!(self, InboundFrame::Notification(_))
    }
}
