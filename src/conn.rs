//! The uniform connection type handed to protocol code by every transport.
//!
//! Effectively implements enum-dispatch for [`AsyncRead`] and [`AsyncWrite`]
//! over the channel types the transports produce: a live TCP stream, a
//! dial-side connected UDP socket, and the server-side [`PacketConn`]
//! pseudo-connection wrapping exactly one already-received datagram. Protocol
//! code reads, writes and closes without knowing which one it holds.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};

/// An opened communication channel, uniform across transport kinds.
///
/// Closing is idempotent. For stream connections it shuts down the socket;
/// for a [`PacketConn`] it is a no-op, because the underlying socket belongs
/// to the listen loop, not to the pseudo-connection.
#[derive(Debug)]
#[pin_project]
pub struct Connection {
    #[pin]
    inner: ConnectionCore,
}

#[derive(Debug)]
#[pin_project(project = ConnectionCoreProj)]
enum ConnectionCore {
    /// A live bidirectional TCP stream.
    Tcp(#[pin] TcpStream),

    /// A dial-side UDP socket connected to the remote address. One datagram
    /// per read, one datagram per write.
    Udp(#[pin] UdpSocket),

    /// A single received datagram masquerading as a connection.
    Packet(#[pin] PacketConn),
}

impl Connection {
    /// Close the connection, releasing any connection-specific resources.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub async fn close(&mut self) -> io::Result<()> {
        self.shutdown().await
    }

    /// The remote address, where the channel has one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            ConnectionCore::Tcp(stream) => stream.peer_addr().ok(),
            ConnectionCore::Udp(socket) => socket.peer_addr().ok(),
            ConnectionCore::Packet(conn) => Some(conn.peer),
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project().inner.project() {
            ConnectionCoreProj::Tcp(stream) => stream.poll_read(cx, buf),
            ConnectionCoreProj::Udp(socket) => socket.poll_recv(cx, buf),
            ConnectionCoreProj::Packet(conn) => conn.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project().inner.project() {
            ConnectionCoreProj::Tcp(stream) => stream.poll_write(cx, buf),
            ConnectionCoreProj::Udp(socket) => socket.poll_send(cx, buf),
            ConnectionCoreProj::Packet(conn) => conn.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project().inner.project() {
            ConnectionCoreProj::Tcp(stream) => stream.poll_flush(cx),
            ConnectionCoreProj::Udp(_) => Poll::Ready(Ok(())),
            ConnectionCoreProj::Packet(conn) => conn.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project().inner.project() {
            ConnectionCoreProj::Tcp(stream) => stream.poll_shutdown(cx),
            ConnectionCoreProj::Udp(_) => Poll::Ready(Ok(())),
            ConnectionCoreProj::Packet(conn) => conn.poll_shutdown(cx),
        }
    }
}

impl From<TcpStream> for Connection {
    fn from(stream: TcpStream) -> Self {
        Self {
            inner: ConnectionCore::Tcp(stream),
        }
    }
}

impl From<UdpSocket> for Connection {
    fn from(socket: UdpSocket) -> Self {
        Self {
            inner: ConnectionCore::Udp(socket),
        }
    }
}

impl From<PacketConn> for Connection {
    fn from(conn: PacketConn) -> Self {
        Self {
            inner: ConnectionCore::Packet(conn),
        }
    }
}

/// A pseudo-connection wrapping one already-received datagram.
///
/// Reads drain the captured payload and then report end-of-data forever:
/// never the same bytes twice, never an error. A datagram is one message,
/// fully consumed. Writes send fresh datagrams back to the captured sender
/// through the listen socket shared with the receive loop; datagram sends
/// are atomic per call, so concurrent pseudo-connections do not corrupt each
/// other's packets.
#[derive(Debug)]
pub struct PacketConn {
    payload: Bytes,
    peer: SocketAddr,
    socket: Arc<UdpSocket>,
}

impl PacketConn {
    /// Wrap one received datagram.
    ///
    /// `payload` must be a private copy of the received bytes; the receive
    /// loop reuses its buffer on the very next iteration.
    pub fn new(payload: Bytes, peer: SocketAddr, socket: Arc<UdpSocket>) -> Self {
        Self {
            payload,
            peer,
            socket,
        }
    }

    /// The address the wrapped datagram arrived from.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl AsyncRead for PacketConn {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.payload.is_empty() {
            // Exhausted: end-of-data, not an error.
            return Poll::Ready(Ok(()));
        }
        let len = usize::min(buf.remaining(), this.payload.len());
        buf.put_slice(&this.payload[..len]);
        this.payload.advance(len);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for PacketConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.socket.poll_send_to(cx, buf, this.peer)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // The socket is owned by the listen loop; closing the
        // pseudo-connection only marks it finished.
        Poll::Ready(Ok(()))
    }
}
