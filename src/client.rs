//! The client side: dial once, run the receive protocol, terminate.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, trace};

use crate::cancel::CancelToken;
use crate::conn::Connection;
use crate::proto::{StreamRequest, RECV_BUFFER_SIZE, UDP_OUTPUT_FILE};
use crate::transport::{Transport, TransportKind};

/// Fetches one file (or one burst of datagrams) per session into an output
/// directory.
///
/// Every failure is returned to the caller as a [`ClientError`]; a failed
/// transfer aborts the attempt, not the process.
#[derive(Debug)]
pub struct FileClient {
    output_dir: Utf8PathBuf,
}

/// Errors surfaced by a transfer attempt.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Dialing the server failed.
    #[error("dial failed: {0}")]
    Dial(#[from] crate::transport::TransportError),

    /// The request could not be encoded.
    #[error("failed to encode request: {0}")]
    Request(#[from] serde_json::Error),

    /// The size prefix could not be read. The usual sign of a rejected
    /// request: the server logs the reason and closes without replying.
    #[error("failed to read file size: {0}")]
    Size(#[source] io::Error),

    /// The server sent a negative size.
    #[error("server reported invalid file size {0}")]
    InvalidSize(i64),

    /// The output file could not be created.
    #[error("failed to create {path}: {source}")]
    Create {
        /// The path that could not be created.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The connection ended before the promised byte count arrived.
    #[error("transfer ended after {written} of {expected} bytes")]
    Truncated {
        /// Bytes the size prefix promised.
        expected: u64,
        /// Bytes actually received.
        written: u64,
    },

    /// Any other I/O failure during the transfer.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FileClient {
    /// Create a client writing received files into `output_dir`.
    pub fn new(output_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Dial `address` over the transport selected by `kind` and run the
    /// kind-appropriate receive protocol, returning the number of bytes
    /// written to the output file.
    ///
    /// Over a stream transport this requests `file_name` and streams it to
    /// `output_dir/<file_name>`. Over a datagram transport `file_name` is
    /// ignored: every received datagram is appended to
    /// `output_dir/udp_output.bin` until `token` fires, with no ordering or
    /// completeness guarantee.
    pub async fn start(
        &self,
        kind: TransportKind,
        address: &str,
        file_name: &str,
        token: CancelToken,
    ) -> Result<u64, ClientError> {
        let transport = Transport::new(kind, address);
        let mut conn = transport.dial(token.clone()).await?;

        let result = match kind {
            TransportKind::Stream => self.fetch_stream(&mut conn, file_name).await,
            TransportKind::Datagram => self.receive_datagrams(&mut conn, token).await,
        };

        if let Err(error) = conn.close().await {
            debug!(%error, "connection close failed");
        }
        result
    }

    async fn fetch_stream(
        &self,
        conn: &mut Connection,
        file_name: &str,
    ) -> Result<u64, ClientError> {
        let request = StreamRequest::new(file_name).to_bytes()?;
        conn.write_all(&request).await?;

        let size = conn.read_i64_le().await.map_err(ClientError::Size)?;
        let size = u64::try_from(size).map_err(|_| ClientError::InvalidSize(size))?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(file_name);
        let mut file = File::create(&path)
            .await
            .map_err(|source| ClientError::Create {
                path: path.clone(),
                source,
            })?;

        debug!(file = file_name, bytes = size, "receiving");
        let mut limited = (&mut *conn).take(size);
        let written = tokio::io::copy(&mut limited, &mut file).await?;
        file.flush().await?;
        if written != size {
            return Err(ClientError::Truncated {
                expected: size,
                written,
            });
        }

        info!(file = file_name, bytes = written, path = %path, "file received");
        Ok(written)
    }

    async fn receive_datagrams(
        &self,
        conn: &mut Connection,
        token: CancelToken,
    ) -> Result<u64, ClientError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(UDP_OUTPUT_FILE);
        let mut file = File::create(&path)
            .await
            .map_err(|source| ClientError::Create {
                path: path.clone(),
                source,
            })?;

        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let received = tokio::select! {
                _ = token.cancelled() => break,
                received = conn.read(&mut buf) => received?,
            };
            if received == 0 {
                // A zero-length datagram; nothing to append.
                continue;
            }
            file.write_all(&buf[..received]).await?;
            total += received as u64;
            trace!(bytes = received, "datagram appended");
        }
        file.flush().await?;

        info!(bytes = total, path = %path, "datagram capture finished");
        Ok(total)
    }
}
