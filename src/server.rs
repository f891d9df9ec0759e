//! The server side: dispatch loop, drain-on-shutdown, and the per-connection
//! file-stream handlers.

use camino::{Utf8Path, Utf8PathBuf};
use rand::RngCore;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::cancel::{CancelSource, CancelToken};
use crate::conn::Connection;
use crate::drain::WaitGroup;
use crate::proto::{
    StreamRequest, COPY_BUFFER_SIZE, DATAGRAM_PAYLOAD_SIZE, REQUEST_BUFFER_SIZE,
};
use crate::transport::{Transport, TransportKind};

/// Serves files out of a store directory over a chosen transport.
///
/// [`FileServer::start`] blocks until shutdown completes: it returns only
/// once cancellation has been observed and every dispatched connection
/// handler has finished. Cancellation never aborts a handler mid-transfer;
/// shutdown is "stop accepting new work, drain existing work".
#[derive(Debug)]
pub struct FileServer {
    store_dir: Utf8PathBuf,
    shutdown: CancelSource,
}

/// Errors that end the server as a whole.
///
/// Only transport setup failures and a crashed listener task are returned
/// from [`FileServer::start`]. Individual connection errors (malformed
/// requests, rejected names, missing files, mid-transfer I/O failures) are
/// logged at the point of failure and never terminate the server or other
/// connections.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The transport failed to set up (bind/resolve).
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),

    /// The listener task panicked or was aborted.
    #[error("listener task failed: {0}")]
    ListenerTask(#[from] tokio::task::JoinError),
}

impl FileServer {
    /// Create a server that serves files from `store_dir`.
    pub fn new(store_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            shutdown: CancelSource::new(),
        }
    }

    /// The directory files are served from.
    pub fn store_dir(&self) -> &Utf8Path {
        &self.store_dir
    }

    /// Serve on `address` over the transport selected by `kind`, blocking
    /// until full shutdown.
    ///
    /// Shutdown is triggered by [`stop`][FileServer::stop] or by `token`
    /// firing; either way the accept loop stops admitting new work and
    /// `start` waits for all in-flight handlers to drain before returning.
    /// Transport setup failure is returned, never swallowed.
    pub async fn start(
        &self,
        kind: TransportKind,
        address: &str,
        token: CancelToken,
    ) -> Result<(), ServerError> {
        let shutdown = self.shutdown.token();
        let transport = Transport::new(kind, address);
        let handlers = WaitGroup::new();

        let handler = {
            let store_dir = self.store_dir.clone();
            let handlers = handlers.clone();
            move |conn: Connection| {
                // Counted before the handler body runs; released on drop on
                // every exit path.
                let guard = handlers.guard();
                let store_dir = store_dir.clone();
                async move {
                    let _guard = guard;
                    let mut conn = conn;
                    let result = match kind {
                        TransportKind::Stream => serve_stream(&store_dir, &mut conn).await,
                        TransportKind::Datagram => serve_datagram(&mut conn).await,
                    };
                    if let Err(error) = result {
                        warn!(%error, "connection handler failed");
                    }
                    // The connection is closed here regardless of handler
                    // outcome, exactly once.
                    if let Err(error) = conn.close().await {
                        debug!(%error, "connection close failed");
                    }
                }
            }
        };

        let mut serving = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { transport.listen_and_serve(shutdown, handler).await }
        });

        tokio::select! {
            result = &mut serving => result??,
            _ = shutdown.cancelled() => serving.await??,
            _ = token.cancelled() => {
                self.shutdown.cancel();
                serving.await??
            }
        }

        debug!(in_flight = handlers.in_flight(), "draining connection handlers");
        handlers.wait().await;
        debug!("server stopped");
        Ok(())
    }

    /// Request shutdown. Idempotent and safe from any task; handlers already
    /// in flight are allowed to finish.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

/// Per-connection failures; logged by the dispatch wrapper, never escalated.
#[derive(Debug, Error)]
enum ServeError {
    #[error("failed to read request: {0}")]
    Read(#[source] std::io::Error),

    #[error("invalid request: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("rejected file name {0:?}")]
    RejectedName(String),

    #[error("file not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serve one stream session: request, size prefix, then the file bytes.
async fn serve_stream(store_dir: &Utf8Path, conn: &mut Connection) -> Result<(), ServeError> {
    let mut buf = vec![0u8; REQUEST_BUFFER_SIZE];
    let len = conn.read(&mut buf).await.map_err(ServeError::Read)?;
    let request = StreamRequest::from_bytes(&buf[..len])?;

    // Sanitize before any filesystem access.
    let name = sanitize_file_name(&request.file_name)
        .ok_or_else(|| ServeError::RejectedName(request.file_name.clone()))?;
    let path = store_dir.join(name);

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Err(ServeError::NotFound(path)),
    };
    let file = File::open(&path).await?;

    conn.write_i64_le(metadata.len() as i64).await?;
    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, file);
    let sent = tokio::io::copy_buf(&mut reader, conn).await?;
    conn.flush().await?;

    info!(file = %name, bytes = sent, "file sent");
    Ok(())
}

/// Serve one datagram: reply with a fixed-size packet of random bytes.
///
/// The inbound payload is deliberately ignored; this is the synthetic-traffic
/// path, not file delivery.
async fn serve_datagram(conn: &mut Connection) -> Result<(), ServeError> {
    let mut payload = vec![0u8; DATAGRAM_PAYLOAD_SIZE];
    rand::rng().fill_bytes(&mut payload);
    let sent = conn.write(&payload).await?;
    debug!(bytes = sent, "synthetic datagram sent");
    Ok(())
}

/// Reduce a requested name to its final path component, rejecting anything
/// that still references a parent directory. No partial sanitization: a name
/// whose base contains a parent-directory marker is rejected outright.
fn sanitize_file_name(name: &str) -> Option<&str> {
    let base = Utf8Path::new(name).file_name()?;
    if base.contains("..") {
        return None;
    }
    Some(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(sanitize_file_name("sample.txt"), Some("sample.txt"));
        assert_eq!(sanitize_file_name("archive.tar.gz"), Some("archive.tar.gz"));
    }

    #[test]
    fn names_reduce_to_final_component() {
        assert_eq!(sanitize_file_name("../etc/passwd"), Some("passwd"));
        assert_eq!(sanitize_file_name("a/../../etc/passwd"), Some("passwd"));
        assert_eq!(sanitize_file_name("dir/sub/file.bin"), Some("file.bin"));
    }

    #[test]
    fn parent_directory_bases_are_rejected() {
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("a/.."), None);
        assert_eq!(sanitize_file_name("foo..bar"), None);
        assert_eq!(sanitize_file_name(""), None);
    }
}
