//! Transport layer abstraction.
//!
//! A [`Connector`] produces a fresh byte stream to the master agent each time
//! the session opens. [`MasterAddress`] covers the two standard transports:
//! a Unix domain socket (the net-snmp default) and TCP (RFC 2741 §8.1).

#[cfg(any(test, feature = "testing"))]
mod mock;

#[cfg(any(test, feature = "testing"))]
pub use mock::*;

use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

/// Boxed future used at dyn-compatible seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default master agent socket.
pub const DEFAULT_MASTER_PATH: &str = "/var/agentx/master";

/// Default AgentX TCP port (RFC 2741 §8.1.1).
pub const DEFAULT_TCP_PORT: u16 = 705;

/// A bidirectional byte stream to the master agent.
pub trait MasterStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> MasterStream for T {}

/// Boxed master stream.
pub type BoxedStream = Box<dyn MasterStream>;

/// Opens connections to the master agent.
///
/// Called once per [`connect`](crate::Session::connect) /
/// [`reconnect`](crate::Session::reconnect).
pub trait Connector: Send + Sync + 'static {
    /// Open a new stream.
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream>>;

    /// Human-readable description of the peer, used in errors and logs.
    fn target(&self) -> String;
}

/// Address of the master agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MasterAddress {
    /// Unix domain socket path.
    Unix(PathBuf),
    /// TCP `host:port`.
    Tcp(String),
}

impl Default for MasterAddress {
    fn default() -> Self {
        MasterAddress::Unix(PathBuf::from(DEFAULT_MASTER_PATH))
    }
}

impl std::fmt::Display for MasterAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MasterAddress::Unix(path) => write!(f, "unix:{}", path.display()),
            MasterAddress::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

impl FromStr for MasterAddress {
    type Err = Error;

    /// Accepts `unix:/path`, `/path`, `tcp:host:port`, `host:port` and
    /// `tcp:host` (port 705).
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress { input: s.into() };
        let s_trim = s.trim();
        if s_trim.is_empty() {
            return Err(invalid());
        }

        if let Some(path) = s_trim.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(MasterAddress::Unix(PathBuf::from(path)));
        }
        if s_trim.starts_with('/') {
            return Ok(MasterAddress::Unix(PathBuf::from(s_trim)));
        }

        let hostport = s_trim.strip_prefix("tcp:").unwrap_or(s_trim);
        if hostport.is_empty() {
            return Err(invalid());
        }
        match split_port(hostport) {
            Some((host, port)) => {
                if host.is_empty() || port.parse::<u16>().is_err() {
                    return Err(invalid());
                }
                Ok(MasterAddress::Tcp(hostport.to_string()))
            }
            None if s_trim.starts_with("tcp:") => Ok(MasterAddress::Tcp(format!(
                "{}:{}",
                hostport, DEFAULT_TCP_PORT
            ))),
            None => Err(invalid()),
        }
    }
}

/// Split `host:port`, honoring bracketed IPv6 literals.
fn split_port(s: &str) -> Option<(&str, &str)> {
    if let Some(rest) = s.strip_prefix('[') {
        let end = rest.find(']')?;
        let port = rest[end + 1..].strip_prefix(':')?;
        return Some((&rest[..end], port));
    }
    let (host, port) = s.rsplit_once(':')?;
    if host.contains(':') {
        // Bare IPv6 literal without port
        return None;
    }
    Some((host, port))
}

impl Connector for MasterAddress {
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream>> {
        Box::pin(async move {
            let with_target = |source: std::io::Error| Error::Io {
                target: Some(self.to_string().into()),
                source,
            };
            match self {
                #[cfg(unix)]
                MasterAddress::Unix(path) => {
                    let stream = tokio::net::UnixStream::connect(path)
                        .await
                        .map_err(with_target)?;
                    Ok(Box::new(stream) as BoxedStream)
                }
                #[cfg(not(unix))]
                MasterAddress::Unix(_) => Err(with_target(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix domain sockets are not available on this platform",
                ))),
                MasterAddress::Tcp(addr) => {
                    let stream = tokio::net::TcpStream::connect(addr.as_str())
                        .await
                        .map_err(with_target)?;
                    configure_tcp(&stream).map_err(with_target)?;
                    Ok(Box::new(stream) as BoxedStream)
                }
            }
        })
    }

    fn target(&self) -> String {
        self.to_string()
    }
}

/// Disable Nagle and enable keepalive on a master connection.
///
/// PDUs are small and latency bound; keepalive detects a master that
/// vanished without closing the socket.
fn configure_tcp(stream: &tokio::net::TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let sock = socket2::SockRef::from(stream);
    sock.set_keepalive(true)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix() {
        assert_eq!(
            "unix:/var/agentx/master".parse::<MasterAddress>().unwrap(),
            MasterAddress::Unix(PathBuf::from("/var/agentx/master"))
        );
        assert_eq!(
            "/tmp/agentx.sock".parse::<MasterAddress>().unwrap(),
            MasterAddress::Unix(PathBuf::from("/tmp/agentx.sock"))
        );
    }

    #[test]
    fn test_parse_tcp() {
        assert_eq!(
            "tcp:localhost:705".parse::<MasterAddress>().unwrap(),
            MasterAddress::Tcp("localhost:705".into())
        );
        assert_eq!(
            "127.0.0.1:1705".parse::<MasterAddress>().unwrap(),
            MasterAddress::Tcp("127.0.0.1:1705".into())
        );
        assert_eq!(
            "tcp:[::1]:705".parse::<MasterAddress>().unwrap(),
            MasterAddress::Tcp("[::1]:705".into())
        );
        assert_eq!(
            "tcp:localhost".parse::<MasterAddress>().unwrap(),
            MasterAddress::Tcp("localhost:705".into())
        );
    }

    #[test]
    fn test_parse_invalid() {
        for input in ["", "unix:", "tcp:", "localhost", "host:notaport", ":705"] {
            assert!(
                matches!(
                    input.parse::<MasterAddress>(),
                    Err(Error::InvalidAddress { .. })
                ),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_default_and_display() {
        let addr = MasterAddress::default();
        assert_eq!(addr.to_string(), "unix:/var/agentx/master");
        assert_eq!(addr.target(), "unix:/var/agentx/master");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_missing_socket_reports_target() {
        let addr = MasterAddress::Unix(PathBuf::from("/nonexistent/agentx/master"));
        match addr.connect().await {
            Err(Error::Io { target, .. }) => {
                assert_eq!(target.as_deref(), Some("unix:/nonexistent/agentx/master"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[tokio::test]
    async fn test_connect_tcp_sets_options() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let addr = MasterAddress::Tcp(format!("127.0.0.1:{port}"));
        assert!(addr.connect().await.is_ok());
        accept.await.unwrap();
    }
}
