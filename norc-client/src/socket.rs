//! Dialing the persistent bidirectional connection
//!
//! The persistent transport is a WebSocket carried over TCP, a unix domain
//! socket, or a SOCKS5-proxied TCP stream, with optional TLS on top. The
//! server authenticates the handshake with basic access authentication, so
//! the upgrade request carries an `Authorization` header alongside any
//! configured extra headers.
//!
//! Handshake rejections are mapped onto the error taxonomy: a 401 or 403
//! means the credentials were refused, while a plain 200 means the endpoint
//! answered HTTP but does not speak the upgrade, i.e. the endpoint is wrong.

use crate::config::{self, AuthProvider, ConnConfig, NodeAddr};
use base64::Engine;
use norc_core::{Error, Result};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

/// The raw byte stream under the WebSocket, either kind of socket.
#[derive(Debug)]
pub(crate) enum DialStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// The fully assembled persistent transport.
pub(crate) type WsTransport = WebSocketStream<MaybeTlsStream<DialStream>>;

impl AsyncRead for DialStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            DialStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            DialStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for DialStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            DialStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            DialStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            DialStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            DialStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            DialStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            DialStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Open the persistent connection described by the configuration,
/// completing the handshake with basic-auth credentials from the provider.
pub(crate) async fn dial(config: &ConnConfig, auth: &AuthProvider) -> Result<WsTransport> {
    let addr = config::parse_address(&config.host)?;
    let (user, pass) = auth.credentials().await?;

    let stream = connect_stream(config, &addr).await?;

    let scheme = if config.disable_tls { "ws" } else { "wss" };
    let host = match &addr {
        NodeAddr::Tcp(hostport) => hostport.as_str(),
        // The URL host is only used for the Host header and TLS SNI.
        NodeAddr::Unix(_) | NodeAddr::UnixPacket(_) => "localhost",
    };
    let url = format!("{scheme}://{host}/{}", config.endpoint);

    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Config(format!("invalid handshake request: {e}")))?;
    let login = format!("{user}:{pass}");
    let encoded = base64::engine::general_purpose::STANDARD.encode(login.as_bytes());
    let basic = HeaderValue::from_str(&format!("Basic {encoded}"))
        .map_err(|e| Error::Config(format!("invalid credentials: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, basic);
    for (key, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| Error::Config(format!("invalid header name {key:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Config(format!("invalid header value for {key:?}: {e}")))?;
        request.headers_mut().insert(name, value);
    }

    let connector = tls_connector(config)?;
    match client_async_tls_with_config(request, stream, None, connector).await {
        Ok((ws, _response)) => Ok(ws),
        Err(tungstenite::Error::Http(response)) => {
            let status = response.status();
            // Authentication failures come back as HTTP status codes.
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(Error::InvalidAuth);
            }
            // The request was authenticated and answered, but the upgrade
            // still failed: the endpoint is invalid in some way.
            if status == StatusCode::OK {
                return Err(Error::InvalidEndpoint);
            }
            Err(Error::Transport(format!(
                "handshake failed with status {status}"
            )))
        }
        Err(e) => Err(Error::Transport(e.to_string())),
    }
}

async fn connect_stream(config: &ConnConfig, addr: &NodeAddr) -> Result<DialStream> {
    match addr {
        NodeAddr::Tcp(hostport) => {
            if config.proxy.is_empty() {
                let stream = TcpStream::connect(hostport.as_str())
                    .await
                    .map_err(|e| Error::Transport(format!("dial {hostport}: {e}")))?;
                Ok(DialStream::Tcp(stream))
            } else {
                let stream = if config.proxy_user.is_empty() {
                    Socks5Stream::connect(config.proxy.as_str(), hostport.as_str()).await
                } else {
                    Socks5Stream::connect_with_password(
                        config.proxy.as_str(),
                        hostport.as_str(),
                        &config.proxy_user,
                        &config.proxy_pass,
                    )
                    .await
                }
                .map_err(|e| Error::Transport(format!("socks proxy {}: {e}", config.proxy)))?;
                Ok(DialStream::Tcp(stream.into_inner()))
            }
        }
        NodeAddr::Unix(path) | NodeAddr::UnixPacket(path) => {
            #[cfg(unix)]
            {
                let stream = UnixStream::connect(path)
                    .await
                    .map_err(|e| Error::Transport(format!("dial {}: {e}", path.display())))?;
                return Ok(DialStream::Unix(stream));
            }
            #[cfg(not(unix))]
            {
                let _ = path;
                return Err(Error::Config(
                    "unix domain sockets are not supported on this platform".to_string(),
                ));
            }
        }
    }
}

fn tls_connector(config: &ConnConfig) -> Result<Option<Connector>> {
    if config.disable_tls {
        return Ok(None);
    }
    let mut builder = native_tls::TlsConnector::builder();
    builder.min_protocol_version(Some(native_tls::Protocol::Tlsv12));
    if !config.certificates.is_empty() {
        let cert = native_tls::Certificate::from_pem(&config.certificates)
            .map_err(|e| Error::Config(format!("certificate bundle: {e}")))?;
        builder.add_root_certificate(cert);
    }
    let connector = builder
        .build()
        .map_err(|e| Error::Config(format!("tls connector: {e}")))?;
    Ok(Some(Connector::NativeTls(connector)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn dial_refuses_unknown_scheme() {
        let config = Arc::new(ConnConfig {
            host: "quic://127.0.0.1:1".to_string(),
            pass: "x".to_string(),
            ..ConnConfig::default()
        });
        let auth = AuthProvider::new(config.clone());
        let err = dial(&config, &auth).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn dial_surfaces_connection_refused_as_transport() {
        // Port 1 on localhost is essentially never listening.
        let config = Arc::new(ConnConfig {
            host: "127.0.0.1:1".to_string(),
            pass: "x".to_string(),
            disable_tls: true,
            ..ConnConfig::default()
        });
        let auth = AuthProvider::new(config.clone());
        let err = dial(&config, &auth).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn tls_connector_rejects_garbage_certificates() {
        let config = ConnConfig {
            certificates: b"not a pem".to_vec(),
            ..ConnConfig::default()
        };
        assert!(tls_connector(&config).is_err());
    }

    #[test]
    fn tls_connector_absent_when_disabled() {
        let config = ConnConfig {
            disable_tls: true,
            ..ConnConfig::default()
        };
        assert!(tls_connector(&config).unwrap().is_none());
    }
}
