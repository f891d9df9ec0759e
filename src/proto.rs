//! Wire format of the file-stream protocol.
//!
//! Over a stream connection a session is: one JSON-encoded [`StreamRequest`]
//! from the client, then an 8-byte little-endian signed file size from the
//! server, then exactly that many raw file bytes. The request is written in
//! one call and read into a bounded buffer in one call; it carries no length
//! prefix of its own.
//!
//! Over a datagram connection no request/response framing exists at all: the
//! server emits one fixed-size packet of random bytes per datagram received,
//! and the client appends whatever arrives to one output file.

use serde::{Deserialize, Serialize};

/// Size of the bounded buffer a request is read into.
pub const REQUEST_BUFFER_SIZE: usize = 4096;

/// Size of the synthetic datagrams the server emits on the datagram path.
pub const DATAGRAM_PAYLOAD_SIZE: usize = 1400;

/// Size of the receive buffers used for datagrams on both ends.
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Size of the copy buffer used when streaming file contents.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// File name the datagram client appends received payloads to.
pub const UDP_OUTPUT_FILE: &str = "udp_output.bin";

/// The single control message of the protocol: which file to stream.
///
/// Constructed by the client, serialized, sent once per session, parsed once
/// by the server, then discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    /// Name of the requested file. The server takes only its final path
    /// component before any filesystem access.
    #[serde(rename = "FileName")]
    pub file_name: String,
}

impl StreamRequest {
    /// Request the file named `file_name`.
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// Serialize to the wire encoding.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parse from the wire encoding.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
