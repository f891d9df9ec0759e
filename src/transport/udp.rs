//! The unreliable datagram transport, backed by UDP.
//!
//! The listen loop owns a single receiving socket and a single reusable
//! receive buffer. Each received datagram is copied into a private buffer and
//! wrapped in a [`PacketConn`] before the handler is dispatched; the shared
//! buffer never escapes the loop.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace, warn, Instrument};

use super::{ConnHandler, TransportError, ACCEPT_POLL_INTERVAL};
use crate::cancel::CancelToken;
use crate::conn::{Connection, PacketConn};
use crate::proto::RECV_BUFFER_SIZE;

/// Connectionless transport over UDP. Datagrams may be dropped, duplicated
/// or reordered; that is the point of this transport, not a defect.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    address: String,
}

impl UdpTransport {
    /// Create a transport for `address` (host:port).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub(crate) async fn dial(&self, token: CancelToken) -> Result<Connection, TransportError> {
        if token.is_cancelled() {
            return Err(TransportError::cancelled(&self.address));
        }

        let remote = lookup_host(&self.address)
            .await
            .map_err(|e| TransportError::resolve(&self.address, e))?
            .next()
            .ok_or_else(|| {
                TransportError::resolve(
                    &self.address,
                    io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
                )
            })?;

        let local = SocketAddr::new(
            if remote.is_ipv6() {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            } else {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            },
            0,
        );
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| TransportError::bind(&self.address, e))?;
        socket
            .connect(remote)
            .await
            .map_err(|e| TransportError::connect(&self.address, e))?;
        trace!(%remote, "udp socket connected");
        Ok(Connection::from(socket))
    }

    pub(crate) async fn listen_and_serve<H>(
        &self,
        token: CancelToken,
        handler: H,
    ) -> Result<(), TransportError>
    where
        H: ConnHandler,
    {
        let socket = Arc::new(
            UdpSocket::bind(&self.address)
                .await
                .map_err(|e| TransportError::bind(&self.address, e))?,
        );
        debug!(address = %self.address, "udp listening");

        // Reused for every receive; payloads are copied out before dispatch.
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            if token.is_cancelled() {
                debug!("udp listener shutting down");
                return Ok(());
            }

            // Bounded receive so the token is re-checked even while idle.
            let (len, peer) = match timeout(ACCEPT_POLL_INTERVAL, socket.recv_from(&mut buf)).await
            {
                Err(_elapsed) => continue,
                Ok(Err(error)) => {
                    warn!(%error, "udp receive error");
                    continue;
                }
                Ok(Ok(received)) => received,
            };

            if token.is_cancelled() {
                debug!("udp listener shutting down");
                return Ok(());
            }

            trace!(%peer, len, "received datagram");
            let payload = Bytes::copy_from_slice(&buf[..len]);
            let conn = Connection::from(PacketConn::new(payload, peer, Arc::clone(&socket)));
            let span = tracing::debug_span!("datagram", %peer);
            tokio::spawn(handler.call(conn).instrument(span));
        }
    }
}
