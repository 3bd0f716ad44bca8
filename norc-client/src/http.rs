//! The one-shot request engine
//!
//! In one-shot mode every command is an independent HTTP POST exchange
//! against a pooled client. Submissions go through a bounded queue served
//! by a single consumer task, so callers do not spawn a task per request;
//! the consumer performs each exchange with bounded retry and delivers the
//! outcome straight into the request's reply sink.
//!
//! Transport failures are retried up to ten times with a linearly growing
//! backoff; anything the server actually answered, including non-2xx
//! statuses, is final. A body that is not valid JSON-RPC surfaces as a
//! synthesized error carrying the HTTP status and the (truncated) body so
//! the caller can see what the server said.

use crate::client::Client;
use crate::registry::PendingRequest;
use norc_core::{codec, Error};
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use serde_json::value::RawValue;
use std::cmp;
use std::time::Duration;
use tokio::sync::mpsc;

/// Number of requests the one-shot queue holds before producers block.
pub(crate) const SEND_POST_BUFFER_SIZE: usize = 100;

/// Attempts per exchange before the transport error is surfaced.
const POST_ATTEMPTS: u32 = 10;

/// Base interval between attempt retries; scaled linearly by the attempt
/// number and capped at one minute.
const REQUEST_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Ceiling for the retry backoff.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Overall timeout for a single HTTP attempt, so a request cannot block
/// indefinitely.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(600);

/// How much of a non-JSON body is kept in the synthesized error.
const ERROR_BODY_LIMIT: usize = 1024;

/// Build the pooled HTTP client from the connection configuration.
pub(crate) fn new_http_client(config: &crate::ConnConfig) -> norc_core::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_TIMEOUT)
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(30));

    if !config.disable_tls {
        builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_2);
        if !config.certificates.is_empty() {
            let cert = reqwest::Certificate::from_pem(&config.certificates)
                .map_err(|e| Error::Config(format!("certificate bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
    }

    if !config.proxy.is_empty() {
        let mut proxy = reqwest::Proxy::all(config.proxy.as_str())
            .map_err(|e| Error::Config(format!("proxy {}: {e}", config.proxy)))?;
        if !config.proxy_user.is_empty() {
            proxy = proxy.basic_auth(&config.proxy_user, &config.proxy_pass);
        }
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| Error::Config(format!("http client: {e}")))
}

/// The single consumer of the one-shot queue. Runs until shutdown, then
/// drains the queue, failing whatever is still waiting.
pub(crate) async fn run_post_handler(
    client: Client,
    http: reqwest::Client,
    mut rx: mpsc::Receiver<PendingRequest>,
) {
    loop {
        tokio::select! {
            req = rx.recv() => match req {
                Some(req) => handle_post_request(&client, &http, req).await,
                None => break,
            },
            _ = client.shutdown.fired() => break,
        }
    }

    // Drain any queued requests before exiting so nothing is left waiting
    // around for a reply.
    while let Ok(req) = rx.try_recv() {
        req.fail(Error::Shutdown);
    }
    tracing::trace!(host = %client.config.host, "one-shot send handler done");
}

/// Perform one exchange: up to [`POST_ATTEMPTS`] attempts, then deliver the
/// outcome into the reply sink.
async fn handle_post_request(client: &Client, http: &reqwest::Client, req: PendingRequest) {
    let url = match client.config.http_url() {
        Ok(url) => url,
        Err(e) => return req.fail(e),
    };

    let mut response = None;
    for attempt in 0..POST_ATTEMPTS {
        let (user, pass) = match client.auth.credentials().await {
            Ok(creds) => creds,
            Err(e) => return req.fail(e),
        };

        let mut builder = http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONNECTION, "close")
            .basic_auth(&user, Some(&pass))
            .body(req.frame.clone());
        for (key, value) in &client.config.extra_headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        match builder.send().await {
            Ok(resp) => {
                response = Some(resp);
                break;
            }
            Err(e) => {
                // Quit the retry loop when we can't retry anymore.
                if attempt == POST_ATTEMPTS - 1 {
                    return req.fail(Error::Transport(e.to_string()));
                }
                let backoff = cmp::min(
                    REQUEST_RETRY_INTERVAL * (attempt + 1),
                    MAX_RETRY_BACKOFF,
                );
                tracing::debug!(
                    method = %req.method,
                    id = req.id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "one-shot attempt failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = client.shutdown.fired() => return req.fail(Error::Shutdown),
                }
            }
        }
    }

    let Some(resp) = response else {
        return req.fail(Error::Transport("no response from server".to_string()));
    };

    let status = resp.status();
    let body = match resp.bytes().await {
        Ok(body) => body,
        Err(e) => return req.fail(Error::Transport(format!("error reading reply: {e}"))),
    };

    if client.batch {
        // Batch bodies stay raw; the flushing caller demultiplexes the
        // elements itself.
        match serde_json::from_slice::<Box<RawValue>>(&body) {
            Ok(raw) => req.fulfill(Ok(raw)),
            Err(_) => req.fail(Error::HttpStatus {
                status: status.as_u16(),
                body: truncate_body(&body),
            }),
        }
        return;
    }

    match codec::decode_response_body(&body) {
        Ok(outcome) => req.fulfill(outcome.map_err(Error::from)),
        // Not a JSON-RPC reply at all; surface what the server actually
        // sent, status code included.
        Err(_) => req.fail(Error::HttpStatus {
            status: status.as_u16(),
            body: truncate_body(&body),
        }),
    }
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= ERROR_BODY_LIMIT {
        return text.into_owned();
    }
    let mut cut = ERROR_BODY_LIMIT;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConnConfig;

    #[test]
    fn truncates_long_bodies_on_char_boundaries() {
        let long = "x".repeat(ERROR_BODY_LIMIT + 100);
        let truncated = truncate_body(long.as_bytes());
        assert_eq!(truncated.len(), ERROR_BODY_LIMIT + 3);
        assert!(truncated.ends_with("..."));

        let short = b"short body";
        assert_eq!(truncate_body(short), "short body");

        // Multibyte content must not be split mid-character.
        let multibyte = "\u{00e9}".repeat(ERROR_BODY_LIMIT);
        let truncated = truncate_body(multibyte.as_bytes());
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn http_client_builds_from_default_config() {
        let config = ConnConfig {
            host: "127.0.0.1:8332".to_string(),
            http_post_mode: true,
            ..ConnConfig::default()
        };
        assert!(new_http_client(&config).is_ok());
    }

    #[test]
    fn http_client_rejects_bad_proxy() {
        let config = ConnConfig {
            proxy: "not a url at all \u{0000}".to_string(),
            ..ConnConfig::default()
        };
        assert!(new_http_client(&config).is_err());
    }

    #[test]
    fn http_client_rejects_bad_certificates() {
        let config = ConnConfig {
            certificates: b"garbage".to_vec(),
            ..ConnConfig::default()
        };
        assert!(new_http_client(&config).is_err());
    }
}
