//! Sharer side: the request dispatcher and the share loop.
//!
//! The dispatcher is a per-tunnel state machine
//! `Idle -> Decoding -> Executing -> Replying -> Idle`. A single bad
//! request answers with a typed error frame and returns to `Idle`; only
//! tunnel-level failures (disconnect, decrypt failure) end the loop.
//! Operations are serialized in arrival order; there is no pipelining.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::{CryptoError, TransportError, TunnelError, MAX_FAILED_ATTEMPTS};
use crate::crypto::Role;
use crate::protocol::{
    decode_payload, encode_payload, DeleteRequest, ErrorCode, ErrorResponse, Frame, FrameType,
    ListRequest, ListResponse, MkdirRequest, ReadRequest, ReadResponse, RenameRequest,
    ResponseBody, StatRequest, StatResponse, WriteRequest, WriteResponse,
};
use crate::sandbox::{FsError, SecureFs};
use crate::transport::Tunnel;

/// Where the dispatcher is within one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DispatchPhase {
    /// Waiting for a frame.
    Idle,
    /// Decoding a request payload.
    Decoding,
    /// Running the filesystem operation.
    Executing,
    /// Sending the response.
    Replying,
}

/// Pairs incoming requests with filesystem calls and emits typed replies.
pub struct Dispatcher {
    tunnel: Arc<Tunnel>,
    fs: SecureFs,
    phase: DispatchPhase,
}

impl Dispatcher {
    /// Build a dispatcher over an established tunnel.
    pub fn new(tunnel: Arc<Tunnel>, fs: SecureFs) -> Self {
        Self {
            tunnel,
            fs,
            phase: DispatchPhase::Idle,
        }
    }

    fn advance(&mut self, next: DispatchPhase) {
        if self.phase != next {
            tracing::trace!(from = ?self.phase, to = ?next, "dispatch phase");
            self.phase = next;
        }
    }

    /// Serve requests until the tunnel ends.
    ///
    /// A clean peer disconnect returns `Ok`; transport and crypto failures
    /// propagate. Either way the tunnel is closed on the way out.
    pub async fn run(mut self) -> Result<(), TunnelError> {
        let result = self.serve().await;
        self.tunnel.close().await;
        match result {
            Err(TunnelError::Transport(TransportError::Closed)) | Err(TunnelError::Closed) => {
                Ok(())
            }
            other => other,
        }
    }

    async fn serve(&mut self) -> Result<(), TunnelError> {
        loop {
            self.advance(DispatchPhase::Idle);
            let frame = self.tunnel.receive().await?;

            match frame.frame_type {
                FrameType::Ping => {
                    self.tunnel.send(&Frame::empty(FrameType::Pong)).await?;
                }
                FrameType::Pong => {}
                FrameType::List
                | FrameType::Stat
                | FrameType::Read
                | FrameType::Write
                | FrameType::Delete
                | FrameType::Rename
                | FrameType::Mkdir => {
                    self.handle_request(frame).await?;
                }
                // Anything else is not a request; tell the peer and move on.
                other => {
                    debug!(?other, "unexpected frame at dispatcher");
                    self.reply_error(ErrorResponse::new(
                        ErrorCode::Unknown,
                        "frame is not a request",
                    ))
                    .await?;
                }
            }
        }
    }

    async fn handle_request(&mut self, frame: Frame) -> Result<(), TunnelError> {
        self.advance(DispatchPhase::Decoding);
        match self.execute(&frame).await {
            Ok(body) => {
                self.advance(DispatchPhase::Replying);
                let reply = Frame::new(FrameType::Response, encode_payload(&body)?)?;
                self.tunnel.send(&reply).await
            }
            Err(error) => self.reply_error(error).await,
        }
    }

    async fn reply_error(&mut self, error: ErrorResponse) -> Result<(), TunnelError> {
        self.advance(DispatchPhase::Replying);
        let reply = Frame::new(FrameType::Error, encode_payload(&error)?)?;
        self.tunnel.send(&reply).await
    }

    /// Decode and run one request. Operation failures become typed errors;
    /// only encode/transport problems escape as tunnel errors.
    async fn execute(&mut self, frame: &Frame) -> Result<ResponseBody, ErrorResponse> {
        let fs = self.fs.clone();
        match frame.frame_type {
            FrameType::List => {
                let request: ListRequest = self.decode(&frame.payload)?;
                self.run_fs(move || {
                    fs.list(&request.path)
                        .map(|files| ResponseBody::List(ListResponse { files }))
                })
                .await
            }
            FrameType::Stat => {
                let request: StatRequest = self.decode(&frame.payload)?;
                self.run_fs(move || {
                    fs.stat(&request.path)
                        .map(|info| ResponseBody::Stat(StatResponse { info }))
                })
                .await
            }
            FrameType::Read => {
                let request: ReadRequest = self.decode(&frame.payload)?;
                self.run_fs(move || {
                    fs.read(&request.path, request.offset, request.length)
                        .map(|data| ResponseBody::Read(ReadResponse { data }))
                })
                .await
            }
            FrameType::Write => {
                let request: WriteRequest = self.decode(&frame.payload)?;
                self.run_fs(move || {
                    fs.write(&request.path, request.offset, &request.data)
                        .map(|bytes_written| {
                            ResponseBody::Write(WriteResponse { bytes_written })
                        })
                })
                .await
            }
            FrameType::Delete => {
                let request: DeleteRequest = self.decode(&frame.payload)?;
                self.run_fs(move || fs.delete(&request.path).map(|_| ResponseBody::Empty))
                    .await
            }
            FrameType::Rename => {
                let request: RenameRequest = self.decode(&frame.payload)?;
                self.run_fs(move || {
                    fs.rename(&request.old_path, &request.new_path)
                        .map(|_| ResponseBody::Empty)
                })
                .await
            }
            FrameType::Mkdir => {
                let request: MkdirRequest = self.decode(&frame.payload)?;
                self.run_fs(move || {
                    fs.mkdir(&request.path, request.perm).map(|_| ResponseBody::Empty)
                })
                .await
            }
            _ => Err(ErrorResponse::new(ErrorCode::Unknown, "frame is not a request")),
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(
        &self,
        payload: &[u8],
    ) -> Result<T, ErrorResponse> {
        decode_payload(payload)
            .map_err(|_| ErrorResponse::new(ErrorCode::Unknown, "undecodable request payload"))
    }

    /// Run a filesystem operation on the blocking pool.
    async fn run_fs<F>(&mut self, op: F) -> Result<ResponseBody, ErrorResponse>
    where
        F: FnOnce() -> Result<ResponseBody, FsError> + Send + 'static,
    {
        self.advance(DispatchPhase::Executing);
        match tokio::task::spawn_blocking(op).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(fs_error)) => Err(ErrorResponse::new(fs_error.code(), fs_error.to_string())),
            Err(_) => Err(ErrorResponse::new(ErrorCode::Unknown, "operation aborted")),
        }
    }
}

/// Open the responder tunnel for a session and serve one peer.
///
/// Failed handshakes (a connector guessing passcodes) are retried up to the
/// attempt cap, then the share stops; a successfully established session is
/// served to completion and the function returns.
pub async fn serve_share(
    relay_url: &str,
    session_id: &str,
    passcode: &str,
    fs: SecureFs,
) -> Result<(), TunnelError> {
    let mut failures: u32 = 0;
    loop {
        match Tunnel::open(relay_url, session_id, passcode, Role::Responder).await {
            Ok(tunnel) => {
                info!("peer connected");
                let result = Dispatcher::new(Arc::new(tunnel), fs.clone()).run().await;
                match &result {
                    Ok(()) => info!("peer disconnected"),
                    Err(e) => warn!("session ended: {e}"),
                }
                return result;
            }
            Err(TunnelError::Crypto(CryptoError::Authentication)) => {
                failures += 1;
                warn!(failures, "handshake failed");
                if failures >= MAX_FAILED_ATTEMPTS {
                    warn!("too many failed handshakes, stopping share");
                    return Err(TunnelError::Crypto(CryptoError::Authentication));
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PresharedKey;
    use crate::transport::memory::duplex_pair;
    use tempfile::TempDir;

    async fn harness() -> (TempDir, Arc<Tunnel>, tokio::task::JoinHandle<Result<(), TunnelError>>)
    {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("hello.txt"), b"hi").unwrap();
        let fs = SecureFs::new(tmp.path(), false).unwrap();

        let ((a_sink, a_source), (b_sink, b_source)) = duplex_pair();
        let responder = tokio::spawn(Tunnel::establish(
            Box::new(b_sink),
            Box::new(b_source),
            Role::Responder,
            PresharedKey::from_bytes([0x07; 32]),
        ));
        let client = Tunnel::establish(
            Box::new(a_sink),
            Box::new(a_source),
            Role::Initiator,
            PresharedKey::from_bytes([0x07; 32]),
        )
        .await
        .unwrap();
        let server = responder.await.unwrap().unwrap();

        let dispatcher = Dispatcher::new(Arc::new(server), fs);
        let handle = tokio::spawn(dispatcher.run());
        (tmp, Arc::new(client), handle)
    }

    async fn roundtrip(tunnel: &Tunnel, frame_type: FrameType, payload: Vec<u8>) -> Frame {
        tunnel
            .send(&Frame::new(frame_type, payload).unwrap())
            .await
            .unwrap();
        tunnel.receive().await.unwrap()
    }

    #[tokio::test]
    async fn test_dispatcher_serves_list_and_read() {
        let (_tmp, client, _handle) = harness().await;

        let payload = encode_payload(&ListRequest { path: "/".into() }).unwrap();
        let reply = roundtrip(&client, FrameType::List, payload).await;
        assert_eq!(reply.frame_type, FrameType::Response);
        match decode_payload::<ResponseBody>(&reply.payload).unwrap() {
            ResponseBody::List(list) => {
                assert_eq!(list.files.len(), 1);
                assert_eq!(list.files[0].name, "hello.txt");
                assert_eq!(list.files[0].size, 2);
            }
            other => panic!("wrong body: {other:?}"),
        }

        let payload = encode_payload(&ReadRequest {
            path: "/hello.txt".into(),
            offset: 0,
            length: 2,
        })
        .unwrap();
        let reply = roundtrip(&client, FrameType::Read, payload).await;
        match decode_payload::<ResponseBody>(&reply.payload).unwrap() {
            ResponseBody::Read(read) => assert_eq!(read.data, b"hi"),
            other => panic!("wrong body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_error_keeps_tunnel_alive() {
        let (_tmp, client, _handle) = harness().await;

        // Traversal attempt answers with a typed error...
        let payload = encode_payload(&ReadRequest {
            path: "/../etc/passwd".into(),
            offset: 0,
            length: 100,
        })
        .unwrap();
        let reply = roundtrip(&client, FrameType::Read, payload).await;
        assert_eq!(reply.frame_type, FrameType::Error);
        let error: ErrorResponse = decode_payload(&reply.payload).unwrap();
        assert!(matches!(
            error.code(),
            ErrorCode::InvalidPath | ErrorCode::NotFound
        ));

        // ...and the next valid request still succeeds.
        let payload = encode_payload(&StatRequest {
            path: "/hello.txt".into(),
        })
        .unwrap();
        let reply = roundtrip(&client, FrameType::Stat, payload).await;
        assert_eq!(reply.frame_type, FrameType::Response);
    }

    #[tokio::test]
    async fn test_dispatcher_undecodable_request() {
        let (_tmp, client, _handle) = harness().await;

        let reply = roundtrip(&client, FrameType::Read, vec![0xFF; 8]).await;
        assert_eq!(reply.frame_type, FrameType::Error);
        let error: ErrorResponse = decode_payload(&reply.payload).unwrap();
        assert_eq!(error.code(), ErrorCode::Unknown);
    }

    #[tokio::test]
    async fn test_dispatcher_answers_ping() {
        let (_tmp, client, _handle) = harness().await;
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatcher_clean_disconnect() {
        let (_tmp, client, handle) = harness().await;
        client.close().await;
        assert!(handle.await.unwrap().is_ok());
    }
}
