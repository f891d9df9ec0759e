//! byteferry
//!
//! Streaming file transfer over pluggable transports.
//!
//! A [`FileServer`] serves files out of a store directory and a [`FileClient`]
//! fetches one file per session, with the transport in between abstracted
//! behind a single dial / listen-and-serve / read / write / close surface.
//! Two transports exist: a reliable byte-stream transport (TCP) and an
//! unreliable datagram transport (UDP) which genuinely drops and reorders
//! packets; nothing in this crate compensates for that.
//!
//! Server shutdown is cooperative: a [`CancelToken`] stops the accept loop
//! from admitting new work, and [`FileServer::start`] returns only once every
//! in-flight connection handler has finished.

pub mod cancel;
pub mod client;
pub mod conn;
pub mod drain;
pub mod proto;
pub mod server;
pub mod transport;

pub use self::cancel::{CancelSource, CancelToken};
pub use self::client::FileClient;
pub use self::conn::Connection;
pub use self::server::FileServer;
pub use self::transport::{Transport, TransportKind};
