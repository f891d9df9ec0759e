//! The reliable stream transport, backed by TCP.

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, trace, warn, Instrument};

use super::{ConnHandler, TransportError, ACCEPT_POLL_INTERVAL};
use crate::cancel::CancelToken;
use crate::conn::Connection;

/// Connection-oriented transport over TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    address: String,
}

impl TcpTransport {
    /// Create a transport for `address` (host:port).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub(crate) async fn dial(&self, token: CancelToken) -> Result<Connection, TransportError> {
        tokio::select! {
            _ = token.cancelled() => Err(TransportError::cancelled(&self.address)),
            result = TcpStream::connect(&self.address) => {
                let stream = result.map_err(|e| TransportError::connect(&self.address, e))?;
                trace!(peer = ?stream.peer_addr().ok(), "tcp connected");
                Ok(Connection::from(stream))
            }
        }
    }

    pub(crate) async fn listen_and_serve<H>(
        &self,
        token: CancelToken,
        handler: H,
    ) -> Result<(), TransportError>
    where
        H: ConnHandler,
    {
        let listener = TcpListener::bind(&self.address)
            .await
            .map_err(|e| TransportError::bind(&self.address, e))?;
        debug!(address = %self.address, "tcp listening");

        loop {
            if token.is_cancelled() {
                debug!("tcp listener shutting down");
                return Ok(());
            }

            // Bounded accept so the token is re-checked even while idle.
            let (stream, peer) = match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Err(_elapsed) => continue,
                Ok(Err(error)) => {
                    warn!(%error, "tcp accept error");
                    continue;
                }
                Ok(Ok(accepted)) => accepted,
            };

            if token.is_cancelled() {
                // Shutdown was requested while accepting; admit no new work.
                debug!("tcp listener shutting down");
                return Ok(());
            }

            trace!(%peer, "accepted connection");
            let span = tracing::debug_span!("connection", %peer);
            tokio::spawn(handler.call(Connection::from(stream)).instrument(span));
        }
    }
}
