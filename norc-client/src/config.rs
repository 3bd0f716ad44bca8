//! Connection configuration
//!
//! [`ConnConfig`] carries everything needed to reach the RPC server:
//! address and endpoint, credentials (direct or via a cookie file), chain
//! selection, TLS and proxy settings, and the flags controlling connection
//! mode and reconnection behavior.
//!
//! Addresses can be `host:port`, `[ipv6]:port`, a bare `port` (shorthand
//! for `localhost:port`), `unix:///path`, or `unixpacket:///path`. Any other
//! `scheme://` is rejected.

use norc_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;

/// How long a cookie lookup is served from cache before the file is stat'd
/// again.
const COOKIE_CACHE_WINDOW: Duration = Duration::from_secs(30);

/// The chain the remote node is expected to be running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
    Signet,
    Simnet,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
            Network::Signet => "signet",
            Network::Simnet => "simnet",
        }
    }
}

/// Connection configuration parameters for [`crate::Client`].
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Address of the RPC server: `host:port`, `[ipv6]:port`, a bare port
    /// (treated as `localhost:port`), `unix:///path`, or
    /// `unixpacket:///path`.
    pub host: String,

    /// WebSocket endpoint on the RPC server, typically "ws". Unused in
    /// one-shot mode.
    pub endpoint: String,

    /// Username for basic access authentication.
    pub user: String,

    /// Passphrase for basic access authentication.
    pub pass: String,

    /// Path to a cookie file containing `user:pass`. Consulted when `pass`
    /// is empty; the file is re-read whenever its modification time changes,
    /// with stat checks rate limited to one per 30 seconds.
    pub cookie_path: PathBuf,

    /// The chain the server is expected to run. Defaults to mainnet.
    pub network: Network,

    /// Disable transport layer security. The server's credentials travel in
    /// cleartext when set.
    pub disable_tls: bool,

    /// PEM-encoded certificate chain used as the TLS root of trust. Ignored
    /// when `disable_tls` is set; empty means the platform roots.
    pub certificates: Vec<u8>,

    /// SOCKS5 proxy to connect through, as `host:port` for the persistent
    /// connection or a full proxy URL (e.g. `socks5://host:port`) in
    /// one-shot mode. Empty disables proxying.
    pub proxy: String,

    /// Optional username for the proxy server.
    pub proxy_user: String,

    /// Optional password for the proxy server.
    pub proxy_pass: String,

    /// Do not automatically redial when the connection is lost. Outstanding
    /// requests then fail with a disconnected error and the client shuts
    /// down.
    pub disable_auto_reconnect: bool,

    /// Construct the client without dialing; `connect` must be called
    /// before use. Persistent mode only.
    pub disable_connect_on_new: bool,

    /// Run over independent HTTP POST exchanges instead of the persistent
    /// bidirectional connection. Notifications are unavailable in this mode.
    pub http_post_mode: bool,

    /// Extra headers attached to every outbound request and handshake.
    pub extra_headers: HashMap<String, String>,

    /// Enable compatibility hacks for hosted API providers that deviate
    /// from the node wire format. Consulted by command wrappers.
    pub enable_compat_hacks: bool,

    /// Methods that must not be reissued after a reconnect. Long-running
    /// scans are excluded by default: a replayed rescan would start over
    /// from the beginning.
    pub no_resend_methods: HashSet<String>,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            endpoint: "ws".to_string(),
            user: String::new(),
            pass: String::new(),
            cookie_path: PathBuf::new(),
            network: Network::default(),
            disable_tls: false,
            certificates: Vec::new(),
            proxy: String::new(),
            proxy_user: String::new(),
            proxy_pass: String::new(),
            disable_auto_reconnect: false,
            disable_connect_on_new: false,
            http_post_mode: false,
            extra_headers: HashMap::new(),
            enable_compat_hacks: false,
            no_resend_methods: HashSet::from(["rescan".to_string()]),
        }
    }
}

impl ConnConfig {
    /// The URL used for one-shot HTTP POST exchanges.
    pub(crate) fn http_url(&self) -> Result<String> {
        let scheme = if self.disable_tls { "http" } else { "https" };
        match parse_address(&self.host)? {
            NodeAddr::Tcp(hostport) => Ok(format!("{scheme}://{hostport}")),
            NodeAddr::Unix(_) | NodeAddr::UnixPacket(_) => Err(Error::Config(
                "one-shot mode requires a tcp address".to_string(),
            )),
        }
    }
}

/// A parsed server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NodeAddr {
    /// `host:port`, ready to dial.
    Tcp(String),
    /// Unix domain stream socket.
    Unix(PathBuf),
    /// Unix domain packet socket path. Dialed as a stream socket: the
    /// framing layer requires a byte stream.
    UnixPacket(PathBuf),
}

/// Parse an address string into a dialable form.
pub(crate) fn parse_address(addr: &str) -> Result<NodeAddr> {
    if let Some(path) = addr.strip_prefix("unix://") {
        return Ok(NodeAddr::Unix(PathBuf::from(path)));
    }
    if let Some(path) = addr.strip_prefix("unixpacket://") {
        return Ok(NodeAddr::UnixPacket(PathBuf::from(path)));
    }
    if addr.contains("://") {
        return Err(Error::Config(format!(
            "unsupported protocol in address: {addr}"
        )));
    }
    verify_port(addr).map(NodeAddr::Tcp)
}

/// Make sure an address string has both a host and a port. A bare port is
/// shorthand for `localhost:port`.
fn verify_port(addr: &str) -> Result<String> {
    if addr.parse::<u16>().is_ok() {
        return Ok(format!("localhost:{addr}"));
    }

    if let Some(rest) = addr.strip_prefix('[') {
        // Bracketed IPv6: require `]:port`.
        match rest.split_once(']') {
            Some((host, port))
                if !host.is_empty()
                    && port.strip_prefix(':').is_some_and(|p| p.parse::<u16>().is_ok()) =>
            {
                Ok(addr.to_string())
            }
            _ => Err(Error::Config(format!("invalid address: {addr}"))),
        }
    } else {
        match addr.rsplit_once(':') {
            Some((host, port))
                if !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok() =>
            {
                Ok(addr.to_string())
            }
            _ => Err(Error::Config(format!("invalid address: {addr}"))),
        }
    }
}

/// Resolves the credentials to use for a connection attempt: the configured
/// user/pass pair, or the contents of the cookie file.
///
/// Cookie lookups are cached: the file is stat'd at most once per
/// [`COOKIE_CACHE_WINDOW`] and only re-read when its modification time
/// changes. A read failure is cached for the same window.
pub(crate) struct AuthProvider {
    config: Arc<ConnConfig>,
    cookie: Mutex<CookieCache>,
}

#[derive(Default)]
struct CookieCache {
    last_check: Option<Instant>,
    last_modified: Option<SystemTime>,
    user: String,
    pass: String,
    error: Option<String>,
}

impl CookieCache {
    fn result(&self) -> Result<(String, String)> {
        match &self.error {
            Some(e) => Err(Error::Config(format!("cookie auth: {e}"))),
            None => Ok((self.user.clone(), self.pass.clone())),
        }
    }
}

impl AuthProvider {
    pub fn new(config: Arc<ConnConfig>) -> Self {
        Self {
            config,
            cookie: Mutex::new(CookieCache::default()),
        }
    }

    /// The username and passphrase to present to the server.
    pub async fn credentials(&self) -> Result<(String, String)> {
        // Direct user/pass auth wins over the cookie file.
        if !self.config.pass.is_empty() {
            return Ok((self.config.user.clone(), self.config.pass.clone()));
        }

        let mut cache = self.cookie.lock().await;
        if let Some(checked) = cache.last_check {
            if checked.elapsed() < COOKIE_CACHE_WINDOW {
                return cache.result();
            }
        }
        cache.last_check = Some(Instant::now());

        let modified = match tokio::fs::metadata(&self.config.cookie_path).await {
            Ok(meta) => meta.modified().ok(),
            Err(e) => {
                cache.error = Some(e.to_string());
                return cache.result();
            }
        };

        if modified != cache.last_modified {
            cache.last_modified = modified;
            match read_cookie_file(&self.config.cookie_path).await {
                Ok((user, pass)) => {
                    cache.user = user;
                    cache.pass = pass;
                    cache.error = None;
                }
                Err(e) => cache.error = Some(e),
            }
        }

        cache.result()
    }
}

/// Read a `user:pass` cookie file.
async fn read_cookie_file(path: &Path) -> std::result::Result<(String, String), String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| e.to_string())?;
    let line = contents.lines().next().unwrap_or("");
    match line.split_once(':') {
        Some((user, pass)) => Ok((user.to_string(), pass.to_string())),
        None => Err(format!("malformed cookie file: {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port() {
        assert_eq!(
            parse_address("127.0.0.1:8334").unwrap(),
            NodeAddr::Tcp("127.0.0.1:8334".to_string())
        );
        assert_eq!(
            parse_address("node.example.com:8334").unwrap(),
            NodeAddr::Tcp("node.example.com:8334".to_string())
        );
    }

    #[test]
    fn bare_port_means_localhost() {
        assert_eq!(
            parse_address("8334").unwrap(),
            NodeAddr::Tcp("localhost:8334".to_string())
        );
    }

    #[test]
    fn parses_bracketed_ipv6() {
        assert_eq!(
            parse_address("[::1]:8334").unwrap(),
            NodeAddr::Tcp("[::1]:8334".to_string())
        );
        assert!(parse_address("[::1]").is_err());
        assert!(parse_address("[]:8334").is_err());
    }

    #[test]
    fn parses_unix_addresses() {
        assert_eq!(
            parse_address("unix:///var/run/node.sock").unwrap(),
            NodeAddr::Unix(PathBuf::from("/var/run/node.sock"))
        );
        assert_eq!(
            parse_address("unixpacket:///var/run/node.sock").unwrap(),
            NodeAddr::UnixPacket(PathBuf::from("/var/run/node.sock"))
        );
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(parse_address("tcp://127.0.0.1:8334").is_err());
        assert!(parse_address("https://example.com").is_err());
    }

    #[test]
    fn rejects_missing_or_invalid_port() {
        assert!(parse_address("localhost").is_err());
        assert!(parse_address("localhost:notaport").is_err());
        assert!(parse_address(":8334").is_err());
        assert!(parse_address("::1").is_err());
    }

    #[test]
    fn http_url_respects_tls_flag() {
        let config = ConnConfig {
            host: "127.0.0.1:8334".to_string(),
            ..ConnConfig::default()
        };
        assert_eq!(config.http_url().unwrap(), "https://127.0.0.1:8334");

        let config = ConnConfig {
            host: "8334".to_string(),
            disable_tls: true,
            ..ConnConfig::default()
        };
        assert_eq!(config.http_url().unwrap(), "http://localhost:8334");
    }

    #[test]
    fn http_url_rejects_unix_addresses() {
        let config = ConnConfig {
            host: "unix:///tmp/node.sock".to_string(),
            ..ConnConfig::default()
        };
        assert!(config.http_url().is_err());
    }

    #[test]
    fn default_excludes_rescan_from_resend() {
        let config = ConnConfig::default();
        assert!(config.no_resend_methods.contains("rescan"));
        assert_eq!(config.endpoint, "ws");
        assert_eq!(config.network, Network::Mainnet);
    }

    #[tokio::test]
    async fn direct_credentials_win() {
        let config = Arc::new(ConnConfig {
            user: "alice".to_string(),
            pass: "hunter2".to_string(),
            cookie_path: PathBuf::from("/nonexistent"),
            ..ConnConfig::default()
        });
        let auth = AuthProvider::new(config);
        assert_eq!(
            auth.credentials().await.unwrap(),
            ("alice".to_string(), "hunter2".to_string())
        );
    }

    #[tokio::test]
    async fn cookie_credentials_are_read_and_cached() {
        let dir = std::env::temp_dir().join(format!("norc-cookie-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cookie");
        std::fs::write(&path, "__cookie__:s3cret\n").unwrap();

        let config = Arc::new(ConnConfig {
            cookie_path: path.clone(),
            ..ConnConfig::default()
        });
        let auth = AuthProvider::new(config);
        assert_eq!(
            auth.credentials().await.unwrap(),
            ("__cookie__".to_string(), "s3cret".to_string())
        );

        // Within the cache window a rewrite is not observed.
        std::fs::write(&path, "other:pass\n").unwrap();
        assert_eq!(
            auth.credentials().await.unwrap(),
            ("__cookie__".to_string(), "s3cret".to_string())
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_cookie_file_is_an_error() {
        let config = Arc::new(ConnConfig {
            cookie_path: PathBuf::from("/definitely/not/here"),
            ..ConnConfig::default()
        });
        let auth = AuthProvider::new(config);
        assert!(auth.credentials().await.is_err());
    }
}
