//! Common test utilities for norc-client integration tests
//!
//! Provides a mock WebSocket server for the persistent connection and a
//! minimal HTTP responder for the one-shot path, so client behavior can be
//! tested without a real node.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use norc_client::ConnConfig;

/// Control events broadcast to every live mock connection.
#[derive(Clone)]
enum Ctl {
    /// Send a server-initiated frame.
    Push(String),
    /// Abruptly drop the connection.
    Drop,
}

/// Mock WebSocket server for client testing.
///
/// Accepts any number of connections; each received text frame is recorded
/// and optionally answered by the handler. Frames can also be pushed from
/// the server side, and connections dropped to exercise reconnection.
pub struct MockWsServer {
    addr: SocketAddr,
    ctl_tx: broadcast::Sender<Ctl>,
    message_rx: mpsc::Receiver<String>,
    shutdown_tx: mpsc::Sender<()>,
}

impl MockWsServer {
    /// Start a mock server that records messages but never responds.
    pub async fn new() -> Self {
        Self::with_handler(|_| None).await
    }

    /// Start a mock server with a message handler. The handler receives
    /// each incoming text frame and may return a response frame.
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (msg_tx, message_rx) = mpsc::channel::<String>(100);
        let (ctl_tx, _) = broadcast::channel::<Ctl>(64);

        let handler = Arc::new(handler);
        let accept_ctl = ctl_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let handler = handler.clone();
                        let msg_tx = msg_tx.clone();
                        let ctl_rx = accept_ctl.subscribe();
                        tokio::spawn(run_connection(stream, handler, msg_tx, ctl_rx));
                    }
                }
            }
        });

        Self {
            addr,
            ctl_tx,
            message_rx,
            shutdown_tx,
        }
    }

    /// The bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the next message received by the server.
    pub async fn wait_for_message(&mut self) -> Option<String> {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Push a server-initiated frame to every live connection.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.ctl_tx.send(Ctl::Push(frame.into()));
    }

    /// Abruptly drop every live connection, leaving the listener up.
    pub fn drop_connections(&self) {
        let _ = self.ctl_tx.send(Ctl::Drop);
    }

    /// Stop accepting connections.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}

async fn run_connection<F>(
    stream: TcpStream,
    handler: Arc<F>,
    msg_tx: mpsc::Sender<String>,
    mut ctl_rx: broadcast::Receiver<Ctl>,
) where
    F: Fn(&str) -> Option<String> + Send + Sync + 'static,
{
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = msg_tx.send(text.clone()).await;
                    if let Some(response) = handler(&text) {
                        let _ = write.send(Message::Text(response)).await;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            ctl = ctl_rx.recv() => match ctl {
                Ok(Ctl::Push(frame)) => {
                    let _ = write.send(Message::Text(frame)).await;
                }
                Ok(Ctl::Drop) | Err(_) => break,
            },
        }
    }
}

/// Connection configuration pointed at a mock server.
pub fn test_config(addr: SocketAddr) -> ConnConfig {
    ConnConfig {
        host: addr.to_string(),
        user: "testuser".to_string(),
        pass: "testpass".to_string(),
        disable_tls: true,
        ..ConnConfig::default()
    }
}

/// Build a success response frame for the request in `msg`.
pub fn echo_result(msg: &str, result: serde_json::Value) -> Option<String> {
    let id = request_id(msg)?;
    Some(json!({"result": result, "error": null, "id": id}).to_string())
}

/// Build an error response frame for the request in `msg`.
pub fn echo_error(msg: &str, code: i32, message: &str) -> Option<String> {
    let id = request_id(msg)?;
    Some(
        json!({"result": null, "error": {"code": code, "message": message}, "id": id}).to_string(),
    )
}

/// Extract the id of a request frame.
pub fn request_id(msg: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(msg).ok()?;
    value.get("id")?.as_u64()
}

/// Extract the method of a request frame.
pub fn request_method(msg: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(msg).ok()?;
    Some(value.get("method")?.as_str()?.to_string())
}

/// A response frame with the given id, built directly.
pub fn response_frame(id: u64, result: serde_json::Value) -> String {
    json!({"result": result, "error": null, "id": id}).to_string()
}

/// A notification frame (null id).
pub fn notification_frame(method: &str, params: serde_json::Value) -> String {
    json!({"id": null, "method": method, "params": params}).to_string()
}

/// Minimal HTTP/1.1 responder for the one-shot path. Each connection gets
/// the next canned response from the queue (the last one repeats), and the
/// request bodies are recorded in order.
pub struct MockHttpServer {
    addr: SocketAddr,
    pub requests: mpsc::Receiver<String>,
}

impl MockHttpServer {
    pub async fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (req_tx, requests) = mpsc::channel::<String>(100);
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (status, body) = {
                    let mut queue = queue.lock().await;
                    if queue.len() > 1 {
                        queue.pop_front().unwrap()
                    } else {
                        queue
                            .front()
                            .cloned()
                            .unwrap_or((500, String::from("no canned response")))
                    }
                };
                let req_tx = req_tx.clone();
                tokio::spawn(async move {
                    serve_http_once(stream, status, body, req_tx).await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the next recorded request body.
    pub async fn wait_for_request(&mut self) -> Option<String> {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.requests.recv())
            .await
            .ok()
            .flatten()
    }
}

async fn serve_http_once(
    mut stream: TcpStream,
    status: u16,
    body: String,
    req_tx: mpsc::Sender<String>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    // Read until the end of the headers.
    let header_end = loop {
        let Ok(n) = stream.read(&mut chunk).await else {
            return;
        };
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let Ok(n) = stream.read(&mut chunk).await else {
            return;
        };
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request_body =
        String::from_utf8_lossy(&buf[header_end..header_end + content_length]).to_string();
    let _ = req_tx.send(request_body).await;

    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_result_matches_request_id() {
        let msg = r#"{"jsonrpc":"1.0","method":"getblockcount","params":[],"id":7}"#;
        let response = echo_result(msg, json!(42)).unwrap();
        assert!(response.contains(r#""id":7"#));
        assert!(response.contains(r#""result":42"#));
    }

    #[test]
    fn notification_frames_have_null_ids() {
        let frame = notification_frame("blockconnected", json!(["HASH", 1]));
        assert!(frame.contains(r#""id":null"#));
    }
}
