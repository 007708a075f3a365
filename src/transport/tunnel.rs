//! The encrypted duplex channel between two peers.
//!
//! A tunnel owns a message transport, runs the handshake over it raw, then
//! wraps every frame in an AEAD record. Sending and receiving are
//! independently lockable so a sender task and a receiver task can run
//! concurrently; the send counter only moves inside the writer critical
//! section.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::core::{
    CryptoError, ProtocolError, TransportError, TunnelError, HANDSHAKE_READ_DEADLINE,
    HANDSHAKE_WRITE_DEADLINE, READ_DEADLINE, WRITE_DEADLINE,
};
use crate::crypto::{
    derive_key, AeadReceiver, AeadSender, InitiatorHandshake, ResponderHandshake, Role,
};
use crate::protocol::{Frame, FrameType};

use super::{connect, join_url, MessageSink, MessageSource};

struct WriterHalf {
    sink: Box<dyn MessageSink>,
    aead: AeadSender,
}

struct ReaderHalf {
    source: Box<dyn MessageSource>,
    aead: AeadReceiver,
}

/// An established encrypted tunnel.
pub struct Tunnel {
    writer: Mutex<WriterHalf>,
    reader: Mutex<ReaderHalf>,
    closed: AtomicBool,
}

impl Tunnel {
    /// Dial the relay endpoint for `role`, derive the preshared key, run the
    /// handshake, and install the transport keys.
    ///
    /// The key derivation is memory-hard and CPU-bound, so it runs on the
    /// blocking pool.
    pub async fn open(
        relay_url: &str,
        session_id: &str,
        passcode: &str,
        role: Role,
    ) -> Result<Self, TunnelError> {
        let passcode = passcode.to_string();
        let session = session_id.to_string();
        let psk = tokio::task::spawn_blocking(move || derive_key(&passcode, &session))
            .await
            .map_err(|_| CryptoError::KeyDerivation)??;

        let endpoint = match role {
            Role::Responder => "share",
            Role::Initiator => "connect",
        };
        let url = join_url(relay_url, endpoint, session_id);
        let (sink, source) = connect(&url).await?;

        Self::establish(Box::new(sink), Box::new(source), role, psk).await
    }

    /// Run the handshake over an already-connected transport and build the
    /// tunnel. Useful when the transport is not a relay WebSocket.
    pub async fn establish(
        mut sink: Box<dyn MessageSink>,
        mut source: Box<dyn MessageSource>,
        role: Role,
        psk: crate::crypto::PresharedKey,
    ) -> Result<Self, TunnelError> {
        let keys = match role {
            Role::Initiator => {
                let mut handshake = InitiatorHandshake::new(psk);
                let m1 = handshake.write_init()?;
                write_handshake(&mut sink, FrameType::HandshakeInit, m1).await?;

                let frame = read_handshake(&mut source).await?;
                if frame.frame_type != FrameType::HandshakeResp {
                    return Err(ProtocolError::UnexpectedResponse.into());
                }
                handshake.read_resp(&frame.payload)?
            }
            Role::Responder => {
                let frame = read_handshake(&mut source).await?;
                if frame.frame_type != FrameType::HandshakeInit {
                    return Err(ProtocolError::UnexpectedResponse.into());
                }
                let mut handshake = ResponderHandshake::new(psk);
                handshake.read_init(&frame.payload)?;

                let (m2, keys) = handshake.write_resp()?;
                write_handshake(&mut sink, FrameType::HandshakeResp, m2).await?;
                keys
            }
        };

        let (aead_tx, aead_rx) = keys.into_aeads(role);
        Ok(Self {
            writer: Mutex::new(WriterHalf {
                sink,
                aead: aead_tx,
            }),
            reader: Mutex::new(ReaderHalf {
                source,
                aead: aead_rx,
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Seal and send one frame as a single transport message.
    pub async fn send(&self, frame: &Frame) -> Result<(), TunnelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::Closed);
        }

        let mut writer = self.writer.lock().await;
        let record = writer.aead.seal(&frame.encode())?;
        timeout(WRITE_DEADLINE, writer.sink.send_msg(record))
            .await
            .map_err(|_| TransportError::Timeout)??;
        Ok(())
    }

    /// Receive, open, and parse one frame.
    pub async fn receive(&self) -> Result<Frame, TunnelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::Closed);
        }

        let mut reader = self.reader.lock().await;
        let record = timeout(READ_DEADLINE, reader.source.recv_msg())
            .await
            .map_err(|_| TransportError::Timeout)??
            .ok_or(TransportError::Closed)?;
        let plaintext = reader.aead.open(&record)?;
        Ok(Frame::decode(&plaintext)?)
    }

    /// Probe the peer: send ping, expect pong.
    pub async fn ping(&self) -> Result<(), TunnelError> {
        self.send(&Frame::empty(FrameType::Ping)).await?;
        let frame = self.receive().await?;
        if frame.frame_type != FrameType::Pong {
            return Err(ProtocolError::UnexpectedResponse.into());
        }
        Ok(())
    }

    /// Close the tunnel. One-shot and idempotent; a peer blocked in
    /// `receive` observes the transport closing.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let mut writer = self.writer.lock().await;
            let _ = writer.sink.close_msg().await;
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn write_handshake(
    sink: &mut Box<dyn MessageSink>,
    frame_type: FrameType,
    message: Vec<u8>,
) -> Result<(), TunnelError> {
    let frame = Frame::new(frame_type, message)?;
    timeout(HANDSHAKE_WRITE_DEADLINE, sink.send_msg(frame.encode()))
        .await
        .map_err(|_| TransportError::Timeout)??;
    Ok(())
}

async fn read_handshake(source: &mut Box<dyn MessageSource>) -> Result<Frame, TunnelError> {
    let bytes = timeout(HANDSHAKE_READ_DEADLINE, source.recv_msg())
        .await
        .map_err(|_| TransportError::Timeout)??
        .ok_or(TransportError::Closed)?;
    Ok(Frame::decode(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PresharedKey;
    use crate::transport::memory::duplex_pair;

    async fn tunnel_pair(initiator_psk: [u8; 32], responder_psk: [u8; 32]) -> (Tunnel, Tunnel) {
        let ((a_sink, a_source), (b_sink, b_source)) = duplex_pair();

        let responder = tokio::spawn(Tunnel::establish(
            Box::new(b_sink),
            Box::new(b_source),
            Role::Responder,
            PresharedKey::from_bytes(responder_psk),
        ));
        let initiator = Tunnel::establish(
            Box::new(a_sink),
            Box::new(a_source),
            Role::Initiator,
            PresharedKey::from_bytes(initiator_psk),
        )
        .await
        .unwrap();

        (initiator, responder.await.unwrap().unwrap())
    }

    #[tokio::test]
    async fn test_tunnel_duplex_frames() {
        let (initiator, responder) = tunnel_pair([0x01; 32], [0x01; 32]).await;

        let request = Frame::new(FrameType::List, b"listing".to_vec()).unwrap();
        initiator.send(&request).await.unwrap();
        let got = responder.receive().await.unwrap();
        assert_eq!(got, request);

        let response = Frame::new(FrameType::Response, b"entries".to_vec()).unwrap();
        responder.send(&response).await.unwrap();
        let got = initiator.receive().await.unwrap();
        assert_eq!(got, response);
    }

    #[tokio::test]
    async fn test_tunnel_ping_pong() {
        let (initiator, responder) = tunnel_pair([0x02; 32], [0x02; 32]).await;

        let echo = tokio::spawn(async move {
            let frame = responder.receive().await.unwrap();
            assert_eq!(frame.frame_type, FrameType::Ping);
            responder.send(&Frame::empty(FrameType::Pong)).await.unwrap();
        });

        initiator.ping().await.unwrap();
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_psk_fails_both_sides() {
        let ((a_sink, a_source), (b_sink, b_source)) = duplex_pair();

        let responder = tokio::spawn(Tunnel::establish(
            Box::new(b_sink),
            Box::new(b_source),
            Role::Responder,
            PresharedKey::from_bytes([0xBB; 32]),
        ));
        let initiator = Tunnel::establish(
            Box::new(a_sink),
            Box::new(a_source),
            Role::Initiator,
            PresharedKey::from_bytes([0xAA; 32]),
        )
        .await;

        // Responder rejects M1; the initiator then sees the transport die.
        assert!(responder.await.unwrap().is_err());
        assert!(initiator.is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (initiator, responder) = tunnel_pair([0x03; 32], [0x03; 32]).await;

        initiator.close().await;
        initiator.close().await;
        assert!(initiator.is_closed());

        assert!(matches!(
            initiator.send(&Frame::empty(FrameType::Ping)).await,
            Err(TunnelError::Closed)
        ));

        // The peer observes end of stream as a transport error.
        assert!(responder.receive().await.is_err());
    }

    #[tokio::test]
    async fn test_tampered_record_fails_receive() {
        let (initiator, responder) = tunnel_pair([0x04; 32], [0x04; 32]).await;

        // Seal on the initiator, flip one ciphertext bit in flight, and
        // confirm the responder's AEAD rejects the record.
        initiator
            .send(&Frame::new(FrameType::Stat, b"x".to_vec()).unwrap())
            .await
            .unwrap();

        let mut reader = responder.reader.lock().await;
        let mut record = reader.source.recv_msg().await.unwrap().unwrap();
        record[30] ^= 0x01;
        assert!(reader.aead.open(&record).is_err());
    }
}
