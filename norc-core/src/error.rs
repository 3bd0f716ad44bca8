//! Error types for norc
//!
//! One error enum covers the whole workspace, split along the four kinds a
//! caller can observe:
//!
//! - **Transport**: dial, read, or write failure on either connection mode
//! - **Protocol**: malformed inbound frames, invalid identifiers
//! - **Remote**: the server returned a JSON-RPC error object ([`RpcError`])
//! - **Lifecycle**: the client was never connected, has disconnected, is
//!   shutting down, and so on
//!
//! Lifecycle errors mirror the states a dual-mode client moves through; they
//! are delivered to callers through their reply sinks rather than panics or
//! side channels.
//!
//! # Remote vs. local errors
//!
//! A remote error is something the server said: a well-formed reply whose
//! `error` field was non-null. Everything else in [`Error`] is a local
//! judgement about the connection or the client's own state. Keeping the
//! wire object intact inside [`Error::Rpc`] lets callers match on the
//! server's numeric code without string inspection.
//!
//! # Examples
//!
//! ```rust
//! use norc_core::{Error, RpcError};
//!
//! // A remote error keeps the server's code and message intact.
//! let err: Error = RpcError::new(-32601, "Method not found").into();
//! match err {
//!     Error::Rpc(rpc) => assert_eq!(rpc.code, -32601),
//!     _ => unreachable!(),
//! }
//!
//! // Lifecycle errors classify themselves.
//! assert!(Error::Shutdown.is_lifecycle());
//! assert!(!Error::Transport("connection reset".into()).is_lifecycle());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type used throughout the norc crates.
///
/// This is a convenience alias over the workspace [`Error`], used by both
/// the core codec and the client so errors compose without conversion
/// layers.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by norc operations.
///
/// # Error Categories
///
/// - **Transport**: [`Error::Transport`], [`Error::HttpStatus`]
/// - **Protocol**: [`Error::Protocol`], [`Error::Serialization`]
/// - **Remote**: [`Error::Rpc`]
/// - **Lifecycle**: [`Error::NotConnected`], [`Error::Disconnected`],
///   [`Error::Shutdown`], [`Error::NotBidirectional`],
///   [`Error::AlreadyConnected`], [`Error::EmptyBatch`]
///
/// Configuration problems ([`Error::Config`], [`Error::InvalidAuth`],
/// [`Error::InvalidEndpoint`]) surface at construction or dial time, before
/// any request is in flight.
///
/// # Propagation
///
/// Transport, remote, and lifecycle errors reach the caller through the
/// reply sink of the affected request. Protocol errors on inbound frames
/// are logged by the read loop and the frame is dropped; they are never
/// fatal to the connection unless the read itself failed.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A dial, read, or write on the underlying transport failed.
    ///
    /// On the persistent connection this tears the socket down (and, with
    /// automatic reconnection enabled, starts the redial loop). On the
    /// one-shot path the exchange is retried with backoff before this is
    /// surfaced.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound frame could not be interpreted. Protocol errors on the
    /// read path are logged and the frame dropped; they are never fatal to
    /// the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An outbound value could not be serialized, or a result fragment could
    /// not be decoded into the requested type.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The server answered the request with a JSON-RPC error object.
    ///
    /// The wire object is carried whole, so the server's numeric code and
    /// message remain matchable.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use norc_core::{Error, RpcError};
    ///
    /// let err: Error = RpcError::new(-5, "block not found").into();
    /// assert_eq!(err.to_string(), "RPC error -5: block not found");
    /// ```
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The server rejected the credentials, or the specified endpoint is
    /// incorrect.
    ///
    /// Detected from the handshake's HTTP status: 401 and 403 both map
    /// here, since servers differ in which they send for bad credentials.
    #[error("authentication failure")]
    InvalidAuth,

    /// The endpoint either does not support bidirectional connections or
    /// does not exist.
    ///
    /// The handshake was authenticated and answered with a plain 200, which
    /// means the server spoke HTTP but refused the upgrade.
    #[error("the endpoint does not support bidirectional connections or does not exist")]
    InvalidEndpoint,

    /// The client was created but the connection was never established.
    ///
    /// This differs from [`Error::Disconnected`], which represents an
    /// established connection that was lost. Seen when submitting commands
    /// to a client built with deferred dialing before `connect` succeeds.
    #[error("the client was never connected")]
    NotConnected,

    /// The client has been disconnected from the server.
    ///
    /// When automatic reconnection is disabled, outstanding requests fail
    /// with this error at the moment of disconnect. With reconnection
    /// enabled callers never see it; in-flight requests are resent instead.
    #[error("the client has been disconnected")]
    Disconnected,

    /// The client is shutting down or already shut down.
    ///
    /// Outstanding requests fail with this error exactly once, as do any
    /// submissions made after shutdown was initiated.
    #[error("the client has been shut down")]
    Shutdown,

    /// A bidirectional-only operation was invoked on a client configured for
    /// one-shot HTTP POST exchanges.
    #[error("client is not configured for bidirectional connections")]
    NotBidirectional,

    /// A new connection cannot be established because the client is already
    /// connected.
    #[error("client has already connected")]
    AlreadyConnected,

    /// A batch flush was requested with nothing staged.
    ///
    /// Returned without touching the network.
    #[error("batch is empty")]
    EmptyBatch,

    /// The connection configuration is invalid (unparseable address, bad
    /// certificate bundle, unreadable cookie file, ...).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A one-shot exchange produced a body that is not valid JSON-RPC. The
    /// HTTP status code and the (truncated) raw body are carried so the
    /// caller can see what the server actually said.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use norc_core::Error;
    ///
    /// let err = Error::HttpStatus {
    ///     status: 503,
    ///     body: "<html>maintenance</html>".to_string(),
    /// };
    /// assert!(err.to_string().contains("503"));
    /// assert!(!err.is_lifecycle());
    /// ```
    #[error("status code {status}, response: {body:?}")]
    HttpStatus {
        /// HTTP status code of the exchange.
        status: u16,
        /// Raw response body, truncated to a reasonable length.
        body: String,
    },
}

impl Error {
    /// Whether this error is one of the lifecycle kinds.
    ///
    /// Lifecycle errors describe the client's own state rather than
    /// anything the network or the server did; they are not worth retrying
    /// against the same client.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use norc_core::Error;
    ///
    /// assert!(Error::Shutdown.is_lifecycle());
    /// assert!(Error::EmptyBatch.is_lifecycle());
    /// assert!(!Error::Transport("dial failed".into()).is_lifecycle());
    /// ```
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Error::NotConnected
                | Error::Disconnected
                | Error::Shutdown
                | Error::NotBidirectional
                | Error::AlreadyConnected
                | Error::EmptyBatch
        )
    }
}

/// JSON-RPC error object as it appears on the wire: `{code, message}`.
///
/// Remote errors are delivered to the caller as the reply's failure with the
/// result bytes absent. The struct is itself a `std::error::Error` so it can
/// travel inside [`Error::Rpc`] without loss.
///
/// # Error Codes
///
/// The node dialect reuses the JSON-RPC reserved range for protocol-level
/// failures (`-32700` parse error, `-32601` method not found, ...) and its
/// own negative codes for domain failures (`-5` block not found, `-8`
/// invalid parameter, ...). The core never interprets codes; it hands them
/// to the caller as-is.
///
/// # Examples
///
/// ```rust
/// use norc_core::RpcError;
///
/// let err = RpcError::new(-32601, "Method not found");
/// assert_eq!(err.code, -32601);
/// assert_eq!(err.to_string(), "RPC error -32601: Method not found");
///
/// // The wire form is exactly the two spec fields.
/// let json = serde_json::to_string(&err).unwrap();
/// assert_eq!(json, r#"{"code":-32601,"message":"Method not found"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code assigned by the server.
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
}

impl RpcError {
    /// Create a new RPC error value.
    ///
    /// # Arguments
    ///
    /// * `code` - Numeric error code (the server's, or a synthesized one)
    /// * `message` - Short human-readable description
    ///
    /// # Examples
    ///
    /// ```rust
    /// use norc_core::RpcError;
    ///
    /// let err = RpcError::new(-8, "Invalid parameter");
    /// assert_eq!(err.message, "Invalid parameter");
    /// ```
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_display() {
        let err = RpcError::new(-32601, "Method not found");
        assert_eq!(err.to_string(), "RPC error -32601: Method not found");
    }

    #[test]
    fn rpc_error_wire_format() {
        let err = RpcError::new(-5, "block not found");
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"code":-5,"message":"block not found"}"#);

        let back: RpcError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn rpc_error_converts_into_error() {
        let err: Error = RpcError::new(-1, "x").into();
        assert!(matches!(err, Error::Rpc(ref e) if e.code == -1));
        assert!(!err.is_lifecycle());
    }

    #[test]
    fn lifecycle_classification() {
        assert!(Error::Shutdown.is_lifecycle());
        assert!(Error::EmptyBatch.is_lifecycle());
        assert!(!Error::Transport("x".into()).is_lifecycle());
        assert!(!Error::Protocol("x".into()).is_lifecycle());
    }
}
