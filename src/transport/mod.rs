//! Transports for moving bytes between a server and a client.
//!
//! A [`Transport`] is a configured endpoint descriptor: a [`TransportKind`]
//! plus an address string, constructed once per dial or listen session. It is
//! polymorphic over exactly two variants. The stream variant carries bytes
//! over TCP with ordering and delivery guarantees; the datagram variant
//! carries them over UDP with neither, and nothing here compensates for that.
//!
//! [`Transport::listen_and_serve`] owns the passive side: it binds, then
//! accepts connections (stream) or receives datagrams (datagram) until the
//! cancel token fires, dispatching the handler once per connection or
//! datagram on its own task so a slow handler never blocks the next accept.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::cancel::CancelToken;
use crate::conn::Connection;

mod tcp;
mod udp;

pub use self::tcp::TcpTransport;
pub use self::udp::UdpTransport;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How long an accept or receive call may block before the loop re-checks
/// the cancel token. A policy knob trading shutdown latency against syscall
/// overhead, not a correctness requirement.
pub(crate) const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Selects which transport implementation is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Reliable, connection-oriented byte stream (TCP).
    Stream,
    /// Unreliable, connectionless datagrams (UDP).
    Datagram,
}

impl TransportKind {
    /// The short name used in addresses and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stream => "stream",
            TransportKind::Datagram => "datagram",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`TransportKind`] from a string.
#[derive(Debug, Error)]
#[error("unknown transport kind {0:?} (expected \"stream\"/\"tcp\" or \"datagram\"/\"udp\")")]
pub struct InvalidTransportKind(String);

impl FromStr for TransportKind {
    type Err = InvalidTransportKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" | "tcp" => Ok(TransportKind::Stream),
            "datagram" | "udp" => Ok(TransportKind::Datagram),
            other => Err(InvalidTransportKind(other.to_owned())),
        }
    }
}

/// Handler invoked once per accepted connection or received datagram.
///
/// Implemented for any `Fn(Connection) -> Future` closure. The transport
/// spawns the returned future on its own task.
pub trait ConnHandler: Send + Sync + 'static {
    /// Produce the future handling one connection.
    fn call(&self, conn: Connection) -> BoxFuture<'static, ()>;
}

impl<F, Fut> ConnHandler for F
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, conn: Connection) -> BoxFuture<'static, ()> {
        Box::pin((self)(conn))
    }
}

/// A configured endpoint, polymorphic over the two transport kinds.
#[derive(Debug, Clone)]
pub enum Transport {
    /// The reliable stream transport.
    Tcp(TcpTransport),
    /// The unreliable datagram transport.
    Udp(UdpTransport),
}

impl Transport {
    /// Construct the transport selected by `kind` for `address`.
    pub fn new(kind: TransportKind, address: impl Into<String>) -> Self {
        let address = address.into();
        match kind {
            TransportKind::Stream => Transport::Tcp(TcpTransport::new(address)),
            TransportKind::Datagram => Transport::Udp(UdpTransport::new(address)),
        }
    }

    /// The kind this transport was constructed with.
    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Tcp(_) => TransportKind::Stream,
            Transport::Udp(_) => TransportKind::Datagram,
        }
    }

    /// Actively open a connection to the configured address.
    ///
    /// For the stream transport this fails if the peer is unreachable or the
    /// token fires first. The datagram transport has no handshake: dialing
    /// binds a local socket and connects it to the remote address, so only
    /// local bind/resolve errors surface here.
    pub async fn dial(&self, token: CancelToken) -> Result<Connection, TransportError> {
        match self {
            Transport::Tcp(transport) => transport.dial(token).await,
            Transport::Udp(transport) => transport.dial(token).await,
        }
    }

    /// Bind locally and serve until the token fires.
    ///
    /// Returns `Ok(())` when cancelled; an error only for transport-level
    /// setup failure. Accept/receive timeouts are the mechanism by which the
    /// token is periodically re-checked and are retried silently; other
    /// transient accept/receive errors are logged and skipped.
    pub async fn listen_and_serve<H>(
        &self,
        token: CancelToken,
        handler: H,
    ) -> Result<(), TransportError>
    where
        H: ConnHandler,
    {
        match self {
            Transport::Tcp(transport) => transport.listen_and_serve(token, handler).await,
            Transport::Udp(transport) => transport.listen_and_serve(token, handler).await,
        }
    }
}

/// Errors surfaced by [`Transport::dial`] and [`Transport::listen_and_serve`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// Binding the local socket failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// The address that could not be bound.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Resolving the remote address failed.
    #[error("failed to resolve {address}: {source}")]
    Resolve {
        /// The address that could not be resolved.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Connecting to the remote endpoint failed.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// The address that could not be reached.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The cancel token fired before the dial completed.
    #[error("dial to {address} cancelled")]
    Cancelled {
        /// The address being dialed.
        address: String,
    },
}

impl TransportError {
    pub(crate) fn bind(address: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            address: address.into(),
            source,
        }
    }

    pub(crate) fn resolve(address: impl Into<String>, source: io::Error) -> Self {
        Self::Resolve {
            address: address.into(),
            source,
        }
    }

    pub(crate) fn connect(address: impl Into<String>, source: io::Error) -> Self {
        Self::Connect {
            address: address.into(),
            source,
        }
    }

    pub(crate) fn cancelled(address: impl Into<String>) -> Self {
        Self::Cancelled {
            address: address.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_names_and_aliases() {
        assert_eq!("stream".parse::<TransportKind>().unwrap(), TransportKind::Stream);
        assert_eq!("tcp".parse::<TransportKind>().unwrap(), TransportKind::Stream);
        assert_eq!("datagram".parse::<TransportKind>().unwrap(), TransportKind::Datagram);
        assert_eq!("udp".parse::<TransportKind>().unwrap(), TransportKind::Datagram);
        assert!("quic".parse::<TransportKind>().is_err());
    }

    #[test]
    fn kind_display_round_trips() {
        for kind in [TransportKind::Stream, TransportKind::Datagram] {
            assert_eq!(kind.to_string().parse::<TransportKind>().unwrap(), kind);
        }
    }

    #[test]
    fn transport_reports_its_kind() {
        let transport = Transport::new(TransportKind::Stream, "127.0.0.1:0");
        assert_eq!(transport.kind(), TransportKind::Stream);
        let transport = Transport::new(TransportKind::Datagram, "127.0.0.1:0");
        assert_eq!(transport.kind(), TransportKind::Datagram);
    }
}
