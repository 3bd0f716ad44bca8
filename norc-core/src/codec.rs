//! Codec for inbound frame classification and outbound framing
//!
//! Inbound server-to-client frames follow JSON-RPC 1.0 rules: a frame is a
//! notification when its `id` is null or absent, and a response otherwise.
//! Classification is strict about the few things that matter:
//!
//! - a notification must carry a non-empty `method` and a present `params`
//!   array (empty is fine, null is not)
//! - a response id must be a finite, non-negative number equal to its own
//!   truncation, so it can be cast to `u64` without loss
//! - a response carries raw result bytes or a non-null error object, never
//!   both
//!
//! Malformed frames come back as [`Error::Protocol`]; the read loop logs
//! them and drops the frame. They are never fatal to the connection.
//!
//! # Why Raw Fragments?
//!
//! Result payloads stay as [`serde_json::value::RawValue`] fragments rather
//! than parsed trees. The transport core never knows the result type of the
//! command it is carrying; deferring the parse keeps typed decoding in the
//! per-command wrappers and makes a batched result indistinguishable from a
//! non-batch one.
//!
//! # Examples
//!
//! ```rust
//! use norc_core::codec;
//!
//! // A numeric id makes the frame a response...
//! let frame = codec::decode_inbound(r#"{"result":42,"error":null,"id":1}"#).unwrap();
//! assert!(frame.is_response());
//!
//! // ...and a null id makes it a notification.
//! let frame =
//!     codec::decode_inbound(r#"{"id":null,"method":"blockconnected","params":["HASH",123]}"#)
//!         .unwrap();
//! assert!(frame.is_notification());
//! ```

use crate::error::{Error, Result, RpcError};
use crate::types::{InboundFrame, NotificationFrame, Request, ResponseFrame};
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Value;

/// Encode an outbound command frame to its wire form.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the frame cannot be serialized.
/// With positional `Vec<Value>` parameters this does not happen in
/// practice, but the fallibility is kept at the seam rather than hidden.
///
/// # Examples
///
/// ```rust
/// use norc_core::{codec, ProtocolVersion, Request};
///
/// let req = Request::new(ProtocolVersion::V1, 1, "getblockcount", Vec::new());
/// let frame = codec::encode_request(&req).unwrap();
/// assert_eq!(
///     frame,
///     r#"{"jsonrpc":"1.0","method":"getblockcount","params":[],"id":1}"#
/// );
/// ```
pub fn encode_request(req: &Request) -> Result<String> {
    serde_json::to_string(req).map_err(|e| Error::Serialization(e.to_string()))
}

/// Assemble already-encoded request frames into one batch envelope:
/// `[` frame `,` frame ... `]`.
///
/// The frames are concatenated verbatim, exactly as they were staged; the
/// envelope never re-parses or re-serializes them.
///
/// # Examples
///
/// ```rust
/// use norc_core::codec;
///
/// let a = r#"{"jsonrpc":"2.0","method":"a","params":[],"id":1}"#;
/// let b = r#"{"jsonrpc":"2.0","method":"b","params":[],"id":2}"#;
/// assert_eq!(codec::encode_batch([a, b]), format!("[{a},{b}]"));
/// ```
pub fn encode_batch<'a>(frames: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::from("[");
    for (i, frame) in frames.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(frame);
    }
    out.push(']');
    out
}

/// Partially decoded inbound frame, before classification.
#[derive(Deserialize)]
struct WireFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Vec<Box<RawValue>>>,
    #[serde(default)]
    result: Option<Box<RawValue>>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Classify an inbound frame as a response or a notification.
///
/// # Classification Rules
///
/// 1. If `id` is null or missing the frame is a notification, which must
///    carry a non-empty `method` and a present `params` array (an empty
///    array is permitted, null is not).
/// 2. Otherwise the frame is a response and `id` must be a finite,
///    non-negative number equal to its own truncation; it is cast to `u64`.
/// 3. A response yields raw result bytes or the structured remote error,
///    never both: a non-null `error` wins.
///
/// # Errors
///
/// Returns [`Error::Protocol`] for anything that violates the rules above,
/// including input that is not valid JSON. Callers log and drop; a
/// malformed frame never takes the connection down.
///
/// # Examples
///
/// ```rust
/// use norc_core::{codec, InboundFrame};
///
/// let frame = codec::decode_inbound(
///     r#"{"result":null,"error":{"code":-32601,"message":"Method not found"},"id":7}"#,
/// )
/// .unwrap();
/// match frame {
///     InboundFrame::Response(resp) => {
///         assert_eq!(resp.id, 7);
///         assert_eq!(resp.outcome.unwrap_err().code, -32601);
///     }
///     InboundFrame::Notification(_) => unreachable!(),
/// }
///
/// // A fractional id is rejected, not truncated.
/// assert!(codec::decode_inbound(r#"{"result":1,"error":null,"id":1.5}"#).is_err());
/// ```
pub fn decode_inbound(raw: &str) -> Result<InboundFrame> {
    let frame: WireFrame = serde_json::from_str(raw)
        .map_err(|e| Error::Protocol(format!("invalid message: {e}")))?;

    // JSON-RPC 1.0 notifications are requests with a null (or absent) id.
    let Some(id) = frame.id else {
        let method = match frame.method {
            Some(m) if !m.is_empty() => m,
            _ => {
                return Err(Error::Protocol(
                    "malformed notification: missing method".into(),
                ))
            }
        };
        // params are not optional: null isn't valid (but an empty array is)
        let Some(params) = frame.params else {
            return Err(Error::Protocol(
                "malformed notification: missing params".into(),
            ));
        };
        return Ok(InboundFrame::Notification(NotificationFrame {
            method,
            params,
        }));
    };

    // The id must convert to an integer without loss of precision.
    let id = match id.as_f64() {
        Some(n) if n >= 0.0 && n == n.trunc() => n as u64,
        _ => {
            return Err(Error::Protocol(
                "malformed response: invalid identifier".into(),
            ))
        }
    };

    Ok(InboundFrame::Response(ResponseFrame {
        id,
        outcome: fold_outcome(frame.result, frame.error),
    }))
}

/// Reply body of a one-shot HTTP exchange: `{result, error}` without the
/// envelope fields. Returns the folded outcome, or a protocol error when the
/// body is not valid JSON-RPC (the caller synthesizes a status-carrying
/// error in that case).
///
/// # Examples
///
/// ```rust
/// use norc_core::codec;
///
/// let outcome = codec::decode_response_body(br#"{"result":812000,"error":null}"#).unwrap();
/// assert_eq!(outcome.unwrap().get(), "812000");
///
/// // An HTML error page is not a JSON-RPC reply.
/// assert!(codec::decode_response_body(b"<html>502</html>").is_err());
/// ```
pub fn decode_response_body(body: &[u8]) -> Result<std::result::Result<Box<RawValue>, RpcError>> {
    #[derive(Deserialize)]
    struct WireReply {
        #[serde(default)]
        result: Option<Box<RawValue>>,
        #[serde(default)]
        error: Option<RpcError>,
    }

    let reply: WireReply = serde_json::from_slice(body)
        .map_err(|e| Error::Protocol(format!("invalid reply body: {e}")))?;
    Ok(fold_outcome(reply.result, reply.error))
}

/// A non-null error wins; otherwise the result bytes (a JSON `null` when the
/// server sent none) are the outcome.
fn fold_outcome(
    result: Option<Box<RawValue>>,
    error: Option<RpcError>,
) -> std::result::Result<Box<RawValue>, RpcError> {
    match error {
        Some(err) => Err(err),
        None => Ok(result.unwrap_or_else(null_fragment)),
    }
}

fn null_fragment() -> Box<RawValue> {
    // A bare null is always a valid JSON document.
    RawValue::from_string("null".to_string()).expect("null is valid JSON")
}
