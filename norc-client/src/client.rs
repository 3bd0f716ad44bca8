//! The dual-mode RPC client
//!
//! A [`Client`] multiplexes command submissions from many concurrent callers
//! over one of two transports, fixed at construction time:
//!
//! - **persistent mode**: a long-lived bidirectional WebSocket carrying
//!   JSON-RPC 1.0 frames, with server-initiated notifications, automatic
//!   reconnection, in-flight request resend, and subscription replay
//! - **one-shot mode**: independent HTTP POST exchanges, optionally staged
//!   into a single JSON-RPC 2.0 batch
//!
//! Each submission is assigned a strictly increasing id and registered with
//! a single-use reply sink; replies are correlated by id no matter what
//! order the server answers in. On the persistent connection exactly one
//! task reads from the socket and exactly one task writes to it; callers
//! enqueue frames on a bounded send queue and never touch the socket.
//!
//! # Cloning
//!
//! `Client` is cheaply cloneable; all clones share the same connection and
//! state, so the client can be used from many tasks without extra
//! synchronization.
//!
//! # Lifecycle
//!
//! A client moves through never-connected, connected, disconnected, and
//! shut-down. Shutdown is terminal and idempotent: every outstanding reply
//! sink is fulfilled exactly once with a shutting-down error, and
//! [`Client::wait_for_shutdown`] joins every task the client spawned.

use crate::command::Command;
use crate::config::{AuthProvider, ConnConfig, Network};
use crate::http;
use crate::notify::{self, NotificationHandlers, NotificationState};
use crate::reconnect;
use crate::registry::{PendingRequest, Registry, Reply};
use crate::signal::Signal;
use crate::socket::{self, WsTransport};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use norc_core::{codec, Error, InboundFrame, ProtocolVersion, Request, Result};
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use std::cmp;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, error::ProtocolError, Message};

/// Number of frames the send queue holds before producers block.
pub(crate) const SEND_BUFFER_SIZE: usize = 50;

/// Base interval between redial attempts; scaled linearly by the retry
/// count.
pub(crate) const CONNECTION_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Ceiling for any connection retry backoff.
pub(crate) const MAX_CONNECT_BACKOFF: Duration = Duration::from_secs(60);

/// The eventual reply to a submitted command.
///
/// Obtained from [`Client::send_cmd`]; awaiting [`receive`] blocks until the
/// core fulfills the reply sink, which happens exactly once: with the
/// server's answer, or with a transport/lifecycle failure (disconnect with
/// auto-reconnect disabled, shutdown).
///
/// [`receive`]: ResponseFuture::receive
pub struct ResponseFuture {
    pub(crate) rx: oneshot::Receiver<Reply>,
}

impl ResponseFuture {
    /// A future that already holds a failure.
    pub(crate) fn ready_err(err: Error) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }

    /// Wait for the reply and return the raw result fragment.
    pub async fn receive(self) -> Result<Box<RawValue>> {
        match self.rx.await {
            Ok(reply) => reply,
            // A dropped sink means the core went away mid-flight; the
            // shutdown drain is the only path that does that.
            Err(_) => Err(Error::Shutdown),
        }
    }

    /// Wait for the reply and decode the result into a concrete type.
    pub async fn receive_as<T: DeserializeOwned>(self) -> Result<T> {
        let raw = self.receive().await?;
        serde_json::from_str(raw.get()).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Connection-scoped lifecycle fields, guarded by one lock.
pub(crate) struct ConnState {
    /// Whether a socket exists or is being established. Guards `connect`
    /// against concurrent or repeated dialing.
    pub has_socket: bool,
    /// Whether the current socket has been lost or torn down.
    pub disconnected: bool,
    /// Signal for the current socket; a fresh one is installed on each
    /// reconnect.
    pub disconnect_signal: Signal,
}

/// A Bitcoin-style node RPC client.
#[derive(Clone)]
pub struct Client {
    pub(crate) config: Arc<ConnConfig>,
    pub(crate) auth: Arc<AuthProvider>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) ntfn_handlers: Option<Arc<NotificationHandlers>>,
    pub(crate) ntfn_state: Arc<Mutex<NotificationState>>,
    pub(crate) conn: Arc<Mutex<ConnState>>,
    /// Fires once, when the first connection is established.
    pub(crate) connected: Signal,
    /// Fires once; terminal.
    pub(crate) shutdown: Signal,
    pub(crate) send_tx: mpsc::Sender<String>,
    pub(crate) send_rx: Arc<Mutex<mpsc::Receiver<String>>>,
    /// Queue into the one-shot engine; present only in one-shot mode.
    pub(crate) post_tx: Option<mpsc::Sender<PendingRequest>>,
    /// Whether submissions are staged for a batch flush. Fixed at
    /// construction.
    pub(crate) batch: bool,
    pub(crate) backend_version: Arc<Mutex<Option<String>>>,
    pub(crate) tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Client {
    /// Create a new client from the connection configuration.
    ///
    /// In persistent mode the connection is dialed immediately unless
    /// `disable_connect_on_new` is set, in which case [`Client::connect`]
    /// must be called before use. The notification handlers are ignored in
    /// one-shot mode, which cannot receive notifications.
    pub async fn new(config: ConnConfig, handlers: Option<NotificationHandlers>) -> Result<Self> {
        Self::new_internal(config, handlers, false).await
    }

    /// Create a client that stages commands and sends them as one JSON-RPC
    /// 2.0 batch exchange on [`Client::send_batch`]. Requires one-shot mode.
    pub async fn new_batch(config: ConnConfig) -> Result<Self> {
        if !config.http_post_mode {
            return Err(Error::Config(
                "batch mode requires the one-shot transport".to_string(),
            ));
        }
        Self::new_internal(config, None, true).await
    }

    async fn new_internal(
        config: ConnConfig,
        handlers: Option<NotificationHandlers>,
        batch: bool,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let shutdown = Signal::new();
        let connected = Signal::new();
        let (send_tx, send_rx) = mpsc::channel(SEND_BUFFER_SIZE);
        let auth = Arc::new(AuthProvider::new(config.clone()));
        let registry = Arc::new(Registry::new(shutdown.clone()));

        // Notifications only work over the bidirectional connection.
        let ntfn_handlers = if config.http_post_mode {
            None
        } else {
            handlers.map(Arc::new)
        };

        let (post_tx, post_rx) = if config.http_post_mode {
            let (tx, rx) = mpsc::channel(http::SEND_POST_BUFFER_SIZE);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let client = Client {
            config: config.clone(),
            auth,
            registry,
            ntfn_handlers,
            ntfn_state: Arc::new(Mutex::new(NotificationState::default())),
            conn: Arc::new(Mutex::new(ConnState {
                has_socket: false,
                disconnected: false,
                disconnect_signal: Signal::new(),
            })),
            connected,
            shutdown,
            send_tx,
            send_rx: Arc::new(Mutex::new(send_rx)),
            post_tx,
            batch,
            backend_version: Arc::new(Mutex::new(None)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        };

        if config.http_post_mode {
            let http_client = http::new_http_client(&config)?;
            if let Some(post_rx) = post_rx {
                // The consumer is spawned exactly once, here; the batch
                // constructor shares it.
                let consumer = {
                    let client = client.clone();
                    tokio::spawn(
                        async move { http::run_post_handler(client, http_client, post_rx).await },
                    )
                };
                client.tasks.lock().await.push(consumer);
            }
            client.connected.fire();
            tracing::info!(host = %config.host, "client ready in one-shot mode");
        } else if !config.disable_connect_on_new {
            let stream = socket::dial(&config, &client.auth).await?;
            tracing::info!(host = %config.host, "established connection to RPC server");
            client.conn.lock().await.has_socket = true;
            client.connected.fire();
            client.start_socket_tasks(stream).await;
            if !config.disable_auto_reconnect {
                let supervisor = {
                    let client = client.clone();
                    tokio::spawn(async move { reconnect::run(client).await })
                };
                client.tasks.lock().await.push(supervisor);
            }
        }

        Ok(client)
    }

    /// Establish the initial connection for a client created with
    /// `disable_connect_on_new`.
    ///
    /// Up to `tries` attempts are made, each after a linearly increasing
    /// backoff capped at one minute; `0` means unlimited attempts. Fails
    /// with [`Error::NotBidirectional`] in one-shot mode and
    /// [`Error::AlreadyConnected`] when a connection already exists.
    pub async fn connect(&self, tries: usize) -> Result<()> {
        if self.config.http_post_mode {
            return Err(Error::NotBidirectional);
        }
        {
            let mut conn = self.conn.lock().await;
            if conn.has_socket {
                return Err(Error::AlreadyConnected);
            }
            conn.has_socket = true;
        }

        let mut attempt: u32 = 0;
        loop {
            match socket::dial(&self.config, &self.auth).await {
                Ok(stream) => {
                    tracing::info!(host = %self.config.host, "established connection to RPC server");
                    self.connected.fire();
                    self.start_socket_tasks(stream).await;
                    if !self.config.disable_auto_reconnect {
                        let supervisor = {
                            let client = self.clone();
                            tokio::spawn(async move { reconnect::run(client).await })
                        };
                        self.tasks.lock().await.push(supervisor);
                    }
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if tries != 0 && attempt as usize >= tries {
                        self.conn.lock().await.has_socket = false;
                        return Err(e);
                    }
                    let backoff =
                        cmp::min(CONNECTION_RETRY_INTERVAL * attempt, MAX_CONNECT_BACKOFF);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Submit a command and obtain the future reply.
    ///
    /// The command is assigned the next id, serialized, and either written
    /// to the persistent connection's send queue or handed to the one-shot
    /// engine. In batch mode the command is only staged; nothing goes on
    /// the wire until [`Client::send_batch`].
    pub async fn send_cmd(&self, cmd: Command) -> ResponseFuture {
        let version = if self.batch {
            ProtocolVersion::V2
        } else {
            ProtocolVersion::V1
        };
        let method = cmd.method().to_string();
        let id = self.registry.next_id();
        let request = Request::new(version, id, method.clone(), cmd.params());
        let frame = match codec::encode_request(&request) {
            Ok(frame) => frame,
            Err(e) => return ResponseFuture::ready_err(e),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let req = PendingRequest {
            id,
            method,
            command: cmd,
            frame: frame.clone(),
            reply_tx,
        };

        if self.config.http_post_mode {
            if self.batch {
                if let Err(req) = self.registry.add(req, true).await {
                    req.fail(Error::Shutdown);
                }
            } else {
                self.send_post_request(req).await;
            }
            return ResponseFuture { rx: reply_rx };
        }

        // The handler tasks are not running until the connection has been
        // established at least once.
        if !self.connected.is_fired() {
            req.fail(Error::NotConnected);
            return ResponseFuture { rx: reply_rx };
        }

        match self.registry.add(req, false).await {
            Err(req) => req.fail(Error::Shutdown),
            Ok(()) => {
                tracing::trace!(method = %request.method, id, "sending command");
                self.send_message(frame).await;
            }
        }
        ResponseFuture { rx: reply_rx }
    }

    /// Enqueue a frame for the writer task. Blocks while the queue is full,
    /// but never past disconnect: if the disconnect signal wins the race the
    /// send is silently abandoned and the reply sink is left to the
    /// disconnect or shutdown drain.
    pub(crate) async fn send_message(&self, frame: String) {
        let disconnect = self.disconnect_signal().await;
        tokio::select! {
            result = self.send_tx.send(frame) => {
                let _ = result;
            }
            _ = disconnect.fired() => {}
        }
    }

    /// Hand a request to the one-shot engine. Blocks while the queue is
    /// full; shutdown aborts the wait and the caller observes
    /// shutting-down.
    pub(crate) async fn send_post_request(&self, req: PendingRequest) {
        if self.shutdown.is_fired() {
            req.fail(Error::Shutdown);
            return;
        }
        let Some(post_tx) = &self.post_tx else {
            req.fail(Error::Config(
                "client is not configured for one-shot mode".to_string(),
            ));
            return;
        };
        tokio::select! {
            result = post_tx.send(req) => {
                if let Err(send_error) = result {
                    send_error.0.fail(Error::Shutdown);
                }
            }
            // The request was consumed by the racing send; dropping it
            // closes the sink and the caller observes shutting-down.
            _ = self.shutdown.fired() => {}
        }
    }

    /// Spawn the reader and writer for a freshly dialed socket and announce
    /// the connection to the handler surface.
    pub(crate) async fn start_socket_tasks(&self, stream: WsTransport) {
        tracing::trace!(host = %self.config.host, "starting client handlers");
        let (sink, source) = stream.split();

        let mut tasks = self.tasks.lock().await;
        if let Some(handlers) = self.ntfn_handlers.clone() {
            tasks.push(tokio::spawn(async move {
                if let Some(cb) = &handlers.on_client_connected {
                    cb();
                }
            }));
        }
        let reader = {
            let client = self.clone();
            tokio::spawn(async move { client.read_loop(source).await })
        };
        let writer = {
            let client = self.clone();
            tokio::spawn(async move { client.write_loop(sink).await })
        };
        tasks.push(reader);
        tasks.push(writer);
    }

    /// Read loop for the persistent connection. Classifies each inbound
    /// frame and either routes the response to its pending request or
    /// dispatches the notification. Exits on shutdown, disconnect, or read
    /// failure; always tears the connection down on the way out.
    pub(crate) async fn read_loop(&self, mut source: SplitStream<WsTransport>) {
        let disconnect = self.disconnect_signal().await;
        loop {
            tokio::select! {
                _ = self.shutdown.fired() => break,
                _ = disconnect.fired() => break,
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => self.handle_frame(&text).await,
                        Err(_) => tracing::warn!("dropping non-utf8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(host = %self.config.host, "connection closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        if self.should_log_read_error(&e) {
                            tracing::error!(host = %self.config.host, error = %e, "receive error");
                        }
                        break;
                    }
                    None => break,
                }
            }
        }
        // Ensure the connection is torn down.
        self.disconnect().await;
        tracing::trace!(host = %self.config.host, "input handler done");
    }

    /// Write loop for the persistent connection: the only task that touches
    /// the socket's write half. Frames queued by `send_message` go out in
    /// order; anything still queued when the connection dies is discarded.
    pub(crate) async fn write_loop(&self, mut sink: SplitSink<WsTransport, Message>) {
        let disconnect = self.disconnect_signal().await;
        let mut rx = self.send_rx.lock().await;
        loop {
            tokio::select! {
                _ = disconnect.fired() => break,
                frame = rx.recv() => match frame {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            tracing::debug!(error = %e, "write failed");
                            self.disconnect().await;
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
        // Drain the queue before exiting so nothing is left waiting to
        // send.
        while rx.try_recv().is_ok() {}
        tracing::trace!(host = %self.config.host, "output handler done");
    }

    /// Handle one inbound frame: route a response by id, or dispatch a
    /// notification. Malformed frames are logged and dropped.
    async fn handle_frame(&self, raw: &str) {
        match codec::decode_inbound(raw) {
            Err(e) => tracing::warn!(error = %e, "remote server sent an invalid frame"),
            Ok(InboundFrame::Notification(ntfn)) => {
                tracing::trace!(method = %ntfn.method, "received notification");
                if let Some(handlers) = &self.ntfn_handlers {
                    notify::dispatch(handlers, &ntfn);
                }
            }
            Ok(InboundFrame::Response(response)) => {
                let Some(req) = self.registry.remove(response.id).await else {
                    tracing::warn!(id = response.id, "received unexpected reply");
                    return;
                };
                // A reply to a subscription command means the server has
                // registered it; remember the intent so it survives a
                // reconnect.
                if self.ntfn_handlers.is_some() {
                    self.ntfn_state.lock().await.merge(&req.command);
                }
                req.fulfill(response.outcome.map_err(Error::from));
            }
        }
    }

    /// Whether a read failure deserves a log line. Nothing is logged when
    /// the client is being torn down or the stream simply ended.
    fn should_log_read_error(&self, err: &tungstenite::Error) -> bool {
        if self.shutdown.is_fired() {
            return false;
        }
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => false,
            tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => false,
            tungstenite::Error::Io(io_err) => !matches!(
                io_err.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            _ => true,
        }
    }

    /// The disconnect signal of the current connection. Safe to call while
    /// the signal is being replaced during a reconnect.
    pub(crate) async fn disconnect_signal(&self) -> Signal {
        self.conn.lock().await.disconnect_signal.clone()
    }

    /// Whether the server connection has been lost. A client that was never
    /// connected reports false.
    pub async fn disconnected(&self) -> bool {
        if !self.connected.is_fired() {
            return false;
        }
        self.conn.lock().await.disconnected
    }

    /// Tear down the current socket if it is still up. Returns whether this
    /// call performed the teardown. No-op in one-shot mode.
    pub(crate) async fn do_disconnect(&self) -> bool {
        if self.config.http_post_mode {
            return false;
        }
        let mut conn = self.conn.lock().await;
        if conn.disconnected {
            return false;
        }
        tracing::trace!(host = %self.config.host, "disconnecting client");
        conn.disconnect_signal.fire();
        conn.disconnected = true;
        true
    }

    /// Disconnect from the server. The connection is automatically
    /// re-established unless the client was created with
    /// `disable_auto_reconnect`, in which case every outstanding request
    /// fails with a disconnected error and the client shuts down.
    ///
    /// Idempotent per live socket; has no effect in one-shot mode.
    pub async fn disconnect(&self) {
        if !self.do_disconnect().await {
            return;
        }
        if self.config.disable_auto_reconnect {
            self.registry.shutdown_with(Error::Disconnected).await;
        }
    }

    /// Shut the client down: fail all outstanding requests with
    /// shutting-down, refuse new submissions, stop reconnecting, and tear
    /// down any live connection. Idempotent and terminal.
    pub async fn shutdown(&self) {
        if !self.registry.shutdown_with(Error::Shutdown).await {
            return;
        }
        tracing::trace!(host = %self.config.host, "shutting down client");
        self.do_disconnect().await;
    }

    /// Block until every task the client spawned has stopped.
    pub async fn wait_for_shutdown(&self) {
        loop {
            let handle = self.tasks.lock().await.pop();
            match handle {
                Some(handle) => {
                    let _ = handle.await;
                }
                None => break,
            }
        }
    }

    /// The chain this client was configured for.
    pub fn network(&self) -> Network {
        self.config.network
    }

    /// The cached backend version, if a command wrapper has detected it
    /// since the last (re)connect.
    pub async fn backend_version(&self) -> Option<String> {
        self.backend_version.lock().await.clone()
    }

    /// Cache the detected backend version. Cleared automatically on
    /// reconnect, since the server may have been upgraded.
    pub async fn set_backend_version(&self, version: impl Into<String>) {
        *self.backend_version.lock().await = Some(version.into());
    }

    pub(crate) async fn reset_backend_version(&self) {
        *self.backend_version.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batch_construction_requires_one_shot_mode() {
        let config = ConnConfig {
            host: "127.0.0.1:0".to_string(),
            pass: "x".to_string(),
            ..ConnConfig::default()
        };
        assert!(Client::new_batch(config).await.is_err());
    }

    #[tokio::test]
    async fn unconnected_client_rejects_commands() {
        let config = ConnConfig {
            host: "127.0.0.1:1".to_string(),
            pass: "x".to_string(),
            disable_connect_on_new: true,
            ..ConnConfig::default()
        };
        let client = Client::new(config, None).await.unwrap();
        let err = client
            .send_cmd(Command::raw("getblockcount", Vec::new()))
            .await
            .receive()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn connect_rejects_one_shot_clients() {
        let config = ConnConfig {
            host: "127.0.0.1:1".to_string(),
            pass: "x".to_string(),
            http_post_mode: true,
            ..ConnConfig::default()
        };
        let client = Client::new(config, None).await.unwrap();
        assert!(matches!(
            client.connect(1).await.unwrap_err(),
            Error::NotBidirectional
        ));
        client.shutdown().await;
        client.wait_for_shutdown().await;
    }

    #[tokio::test]
    async fn ready_err_futures_resolve_immediately() {
        let err = ResponseFuture::ready_err(Error::EmptyBatch)
            .receive()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyBatch));
    }
}
