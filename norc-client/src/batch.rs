//! Batch accumulation and fan-out
//!
//! A batch client (see [`Client::new_batch`]) does not send submissions
//! immediately: each command is staged in the batch sequence with its id,
//! and nothing touches the network until [`Client::send_batch`]. The flush
//! concatenates the staged frames into one JSON-RPC 2.0 array, performs a
//! single one-shot exchange with the raw-body path, and fans the returned
//! elements back out to the staged reply sinks by id, so a batched result
//! is indistinguishable from a non-batch result to the caller.

use crate::client::{Client, ResponseFuture};
use crate::command::Command;
use crate::registry::PendingRequest;
use norc_core::{codec, Error, Result, RpcError};
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Value;
use tokio::sync::oneshot;

/// One element of a batch response body.
#[derive(Deserialize)]
struct BatchElement {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

impl Client {
    /// Send every staged command as one batch exchange and deliver each
    /// element of the response to its caller's reply sink.
    ///
    /// Fails with [`Error::EmptyBatch`] when nothing is staged, without
    /// touching the network. On an exchange-level failure the staged
    /// sequence is cleared (those callers hear shutting-down at shutdown)
    /// and the error is returned to the flushing caller.
    pub async fn send_batch(&self) -> Result<()> {
        let frames = self.registry.batch_frames().await;
        if frames.is_empty() {
            return Err(Error::EmptyBatch);
        }
        let envelope = codec::encode_batch(frames.iter().map(String::as_str));

        // The envelope exchange gets its own id and reply sink; it is never
        // registered, the one-shot engine answers it directly.
        let id = self.registry.next_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        let req = PendingRequest {
            id,
            method: String::new(),
            command: Command::raw("", Vec::new()),
            frame: envelope,
            reply_tx,
        };
        self.send_post_request(req).await;

        let body = match (ResponseFuture { rx: reply_rx }).receive().await {
            Ok(body) => body,
            Err(e) => {
                self.registry.clear_batch().await;
                return Err(e);
            }
        };

        let elements: Vec<BatchElement> = match serde_json::from_str(body.get()) {
            Ok(elements) => elements,
            Err(e) => {
                self.registry.clear_batch().await;
                return Err(Error::Protocol(format!("invalid batch response: {e}")));
            }
        };

        for element in elements {
            // Skip ids another task already claimed, and ids we never sent.
            let Some(req) = self.registry.remove(element.id).await else {
                continue;
            };
            let reply = match element.error {
                Some(err) => Err(Error::Rpc(err)),
                None => reserialize_result(&element.result),
            };
            req.fulfill(reply);
        }
        Ok(())
    }
}

/// Turn a decoded batch element result back into raw bytes so it is
/// indistinguishable from a non-batch result.
fn reserialize_result(result: &Value) -> Result<Box<RawValue>> {
    let text = serde_json::to_string(result).map_err(|e| Error::Serialization(e.to_string()))?;
    RawValue::from_string(text).map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batch_elements_decode_out_of_order() {
        let body = r#"[{"id":101,"result":"b","error":null},
                       {"id":100,"result":"a","error":null},
                       {"id":102,"result":null,"error":{"code":-1,"message":"x"}}]"#;
        let elements: Vec<BatchElement> = serde_json::from_str(body).unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].id, 101);
        assert_eq!(elements[0].result, json!("b"));
        assert!(elements[0].error.is_none());
        let err = elements[2].error.as_ref().unwrap();
        assert_eq!(err.code, -1);
        assert_eq!(err.message, "x");
    }

    #[test]
    fn reserialized_results_match_wire_form() {
        assert_eq!(reserialize_result(&json!(42)).unwrap().get(), "42");
        assert_eq!(
            reserialize_result(&json!({"k": [1, 2]})).unwrap().get(),
            r#"{"k":[1,2]}"#
        );
        assert_eq!(reserialize_result(&Value::Null).unwrap().get(), "null");
    }
}
