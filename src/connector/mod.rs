//! Connector side: a synchronous request/response client over the tunnel.
//!
//! One outstanding request at a time; large files are fetched as successive
//! ranged reads. Cancellation is closing the tunnel; there is no
//! per-request cancel.

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::core::{ProtocolError, TunnelError, DOWNLOAD_CHUNK_SIZE};
use crate::crypto::Role;
use crate::protocol::{
    decode_payload, encode_payload, DeleteRequest, ErrorCode, ErrorResponse, FileInfo, Frame,
    FrameType, ListRequest, MkdirRequest, ReadRequest, RenameRequest, ResponseBody, StatRequest,
    WriteRequest,
};
use crate::transport::Tunnel;

/// Errors surfaced by the connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Tunnel failure; the session is over.
    #[error("tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// The sharer answered with a typed error; the session continues.
    #[error("remote error ({code}): {message}")]
    Remote {
        /// The wire error code.
        code: ErrorCode,
        /// The sharer's description.
        message: String,
    },

    /// The sharer answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ConnectorError {
    /// The remote error code, if this is a remote error.
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            ConnectorError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A file-browsing client driving the protocol as initiator.
pub struct Connector {
    tunnel: Tunnel,
}

impl Connector {
    /// Dial the relay and establish the tunnel as initiator.
    pub async fn open(
        relay_url: &str,
        session_id: &str,
        passcode: &str,
    ) -> Result<Self, ConnectorError> {
        let tunnel = Tunnel::open(relay_url, session_id, passcode, Role::Initiator).await?;
        Ok(Self { tunnel })
    }

    /// Wrap an already-established tunnel.
    pub fn from_tunnel(tunnel: Tunnel) -> Self {
        Self { tunnel }
    }

    /// Send one request frame and decode the matching response body.
    async fn request(&self, frame: Frame) -> Result<ResponseBody, ConnectorError> {
        self.tunnel.send(&frame).await?;
        let reply = self.tunnel.receive().await?;
        match reply.frame_type {
            FrameType::Response => Ok(decode_payload(&reply.payload)?),
            FrameType::Error => {
                let error: ErrorResponse = decode_payload(&reply.payload)?;
                Err(ConnectorError::Remote {
                    code: error.code(),
                    message: error.message,
                })
            }
            _ => Err(ProtocolError::UnexpectedResponse.into()),
        }
    }

    /// List a remote directory.
    pub async fn list(&self, path: &str) -> Result<Vec<FileInfo>, ConnectorError> {
        let payload = encode_payload(&ListRequest { path: path.into() })?;
        match self.request(Frame::new(FrameType::List, payload)?).await? {
            ResponseBody::List(list) => Ok(list.files),
            _ => Err(ProtocolError::UnexpectedResponse.into()),
        }
    }

    /// Stat a remote entry.
    pub async fn stat(&self, path: &str) -> Result<FileInfo, ConnectorError> {
        let payload = encode_payload(&StatRequest { path: path.into() })?;
        match self.request(Frame::new(FrameType::Stat, payload)?).await? {
            ResponseBody::Stat(stat) => Ok(stat.info),
            _ => Err(ProtocolError::UnexpectedResponse.into()),
        }
    }

    /// Read one range of a remote file.
    pub async fn read_chunk(
        &self,
        path: &str,
        offset: i64,
        length: i64,
    ) -> Result<Vec<u8>, ConnectorError> {
        let payload = encode_payload(&ReadRequest {
            path: path.into(),
            offset,
            length,
        })?;
        match self.request(Frame::new(FrameType::Read, payload)?).await? {
            ResponseBody::Read(read) => Ok(read.data),
            _ => Err(ProtocolError::UnexpectedResponse.into()),
        }
    }

    /// Fetch a whole remote file into `sink` as successive chunked reads.
    /// Returns the number of bytes transferred.
    pub async fn download<W>(&self, path: &str, sink: &mut W) -> Result<u64, ConnectorError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut offset: i64 = 0;
        loop {
            let chunk = self
                .read_chunk(path, offset, DOWNLOAD_CHUNK_SIZE as i64)
                .await?;
            if chunk.is_empty() {
                break;
            }
            sink.write_all(&chunk)
                .await
                .map_err(|e| TunnelError::Transport(e.into()))?;
            offset += chunk.len() as i64;
            if chunk.len() < DOWNLOAD_CHUNK_SIZE {
                break;
            }
        }
        sink.flush()
            .await
            .map_err(|e| TunnelError::Transport(e.into()))?;
        debug!(path, bytes = offset, "download complete");
        Ok(offset as u64)
    }

    /// Write bytes at an offset, creating the file if missing.
    pub async fn write(
        &self,
        path: &str,
        offset: i64,
        data: Vec<u8>,
    ) -> Result<i64, ConnectorError> {
        let payload = encode_payload(&WriteRequest {
            path: path.into(),
            offset,
            data,
        })?;
        match self.request(Frame::new(FrameType::Write, payload)?).await? {
            ResponseBody::Write(write) => Ok(write.bytes_written),
            _ => Err(ProtocolError::UnexpectedResponse.into()),
        }
    }

    /// Delete a remote entry (recursively for directories).
    pub async fn delete(&self, path: &str) -> Result<(), ConnectorError> {
        let payload = encode_payload(&DeleteRequest { path: path.into() })?;
        match self.request(Frame::new(FrameType::Delete, payload)?).await? {
            ResponseBody::Empty => Ok(()),
            _ => Err(ProtocolError::UnexpectedResponse.into()),
        }
    }

    /// Rename a remote entry.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), ConnectorError> {
        let payload = encode_payload(&RenameRequest {
            old_path: old_path.into(),
            new_path: new_path.into(),
        })?;
        match self.request(Frame::new(FrameType::Rename, payload)?).await? {
            ResponseBody::Empty => Ok(()),
            _ => Err(ProtocolError::UnexpectedResponse.into()),
        }
    }

    /// Create a remote directory, parents included.
    pub async fn mkdir(&self, path: &str, perm: u32) -> Result<(), ConnectorError> {
        let payload = encode_payload(&MkdirRequest {
            path: path.into(),
            perm,
        })?;
        match self.request(Frame::new(FrameType::Mkdir, payload)?).await? {
            ResponseBody::Empty => Ok(()),
            _ => Err(ProtocolError::UnexpectedResponse.into()),
        }
    }

    /// Probe the sharer.
    pub async fn ping(&self) -> Result<(), ConnectorError> {
        self.tunnel.ping().await.map_err(ConnectorError::from)
    }

    /// Close the tunnel. Idempotent.
    pub async fn close(&self) {
        self.tunnel.close().await;
    }
}
