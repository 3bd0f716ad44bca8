//! The reconnect supervisor
//!
//! When automatic reconnection is enabled on a persistent-mode client, one
//! supervisor task watches for connection loss and makes the
//! disconnect/reconnect cycle largely invisible to callers: it redials with
//! a linearly growing backoff, swaps the new socket in, restarts the reader
//! and writer, replays the subscription state, and rewrites the frames of
//! still-pending requests in their original submission order.
//!
//! Requests whose method is in the configured do-not-resend set are dropped
//! from the registry instead of replayed; a long-running scan restarted
//! from scratch would do more harm than the missing reply.

use crate::client::{Client, CONNECTION_RETRY_INTERVAL, MAX_CONNECT_BACKOFF};
use crate::command::Command;
use crate::signal::Signal;
use crate::socket;
use norc_core::Result;
use std::cmp;

/// Supervisor loop: wait for disconnect, redial until it sticks, hand the
/// new socket to the client, then kick off the resend pass. Runs until
/// shutdown.
pub(crate) async fn run(client: Client) {
    'watch: loop {
        let disconnect = client.disconnect_signal().await;
        tokio::select! {
            _ = disconnect.fired() => {}
            _ = client.shutdown.fired() => break 'watch,
        }

        let mut retry: u32 = 0;
        loop {
            if client.shutdown.is_fired() {
                break 'watch;
            }

            match socket::dial(&client.config, &client.auth).await {
                Err(e) => {
                    retry += 1;
                    tracing::info!(host = %client.config.host, error = %e, "failed to connect");
                    let backoff = cmp::min(CONNECTION_RETRY_INTERVAL * retry, MAX_CONNECT_BACKOFF);
                    tracing::info!(
                        host = %client.config.host,
                        backoff_secs = backoff.as_secs(),
                        "retrying connection"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = client.shutdown.fired() => break 'watch,
                    }
                }
                Ok(stream) => {
                    tracing::info!(host = %client.config.host, "reestablished connection to RPC server");

                    // The backend may have restarted into a different
                    // version.
                    client.reset_backend_version().await;

                    {
                        let mut conn = client.conn.lock().await;
                        conn.disconnect_signal = Signal::new();
                        conn.disconnected = false;
                    }

                    client.start_socket_tasks(stream).await;

                    // Reissue pending requests from a separate task since
                    // the sends can block on the queue.
                    let resender = {
                        let client = client.clone();
                        tokio::spawn(async move { client.resend_requests().await })
                    };
                    client.tasks.lock().await.push(resender);
                    break;
                }
            }
        }
    }
    tracing::trace!(host = %client.config.host, "reconnect handler done");
}

impl Client {
    /// Resend pass, run once per successful reconnect: restore the
    /// notification state first, then rewrite the frames of requests that
    /// were in flight when the connection dropped.
    pub(crate) async fn resend_requests(&self) {
        if let Err(e) = self.reregister_ntfns().await {
            tracing::warn!(error = %e, "unable to re-establish notification state");
            self.disconnect().await;
            return;
        }

        let resend = self
            .registry
            .resend_snapshot(&self.config.no_resend_methods)
            .await;
        for (id, frame) in resend {
            // Stop if the connection dropped again; the next reconnect
            // picks these up.
            if self.disconnected().await {
                return;
            }
            tracing::trace!(id, "resending command");
            self.send_message(frame).await;
        }
    }

    /// Reissue the minimum set of subscription commands needed to restore
    /// the notification streams the caller had requested: at most one
    /// command per category, outpoints and addresses each coalesced into a
    /// single command.
    async fn reregister_ntfns(&self) -> Result<()> {
        // Nothing to do when the caller never wired up handlers.
        if self.ntfn_handlers.is_none() {
            return Ok(());
        }

        // Subscription commands can take a while; work from a snapshot so
        // the state lock is not held across them. Concurrent subscriptions
        // register themselves with the server directly, so replaying the
        // snapshot cannot double-register.
        let state = self.ntfn_state.lock().await.clone();

        if state.notify_blocks {
            tracing::debug!("reregistering block notifications");
            self.send_cmd(Command::NotifyBlocks).await.receive().await?;
        }

        if state.notify_new_tx || state.notify_new_tx_verbose {
            tracing::debug!(
                verbose = state.notify_new_tx_verbose,
                "reregistering transaction notifications"
            );
            self.send_cmd(Command::NotifyNewTransactions {
                verbose: state.notify_new_tx_verbose,
            })
            .await
            .receive()
            .await?;
        }

        if !state.notify_spent.is_empty() {
            let outpoints: Vec<_> = state.notify_spent.iter().cloned().collect();
            tracing::debug!(count = outpoints.len(), "reregistering spent notifications");
            self.send_cmd(Command::NotifySpent { outpoints })
                .await
                .receive()
                .await?;
        }

        if !state.notify_received.is_empty() {
            let addresses: Vec<_> = state.notify_received.iter().cloned().collect();
            tracing::debug!(
                count = addresses.len(),
                "reregistering address notifications"
            );
            self.send_cmd(Command::NotifyReceived { addresses })
                .await
                .receive()
                .await?;
        }

        Ok(())
    }
}
