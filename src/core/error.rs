//! Error types for the Burrow protocol stack.

use thiserror::Error;

/// Errors in the crypto layer.
///
/// Authentication failures are deliberately collapsed into a single variant:
/// a tag mismatch, a proof mismatch, and a low-order remote point must be
/// indistinguishable to the peer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Passcode key derivation failed.
    #[error("key derivation failed")]
    KeyDerivation,

    /// Handshake authentication failed (tag, proof, or key exchange).
    #[error("handshake authentication failed")]
    Authentication,

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    Seal,

    /// AEAD decryption failed (invalid tag or corrupted record).
    #[error("AEAD decryption failed")]
    Open,

    /// The 64-bit send counter would wrap; the tunnel must terminate.
    #[error("send counter exhausted")]
    CounterExhausted,

    /// A handshake message arrived for the wrong role or out of order.
    #[error("handshake message out of order")]
    OutOfOrder,
}

/// Errors in the frame codec and payload schema.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame payload exceeds the 1 MiB cap.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Frame type tag is not in the declared set.
    #[error("unknown frame type: {0:#x}")]
    UnknownType(u32),

    /// Frame shorter than its header or declared length.
    #[error("truncated frame")]
    Truncated,

    /// Payload failed to decode.
    #[error("payload decode failed: {0}")]
    Decode(String),

    /// Payload failed to encode.
    #[error("payload encode failed: {0}")]
    Encode(String),

    /// A response frame did not match the outstanding request.
    #[error("unexpected response frame")]
    UnexpectedResponse,
}

/// Errors in the message transport under the tunnel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A read or write deadline expired.
    #[error("deadline exceeded")]
    Timeout,

    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// WebSocket-level failure.
    #[error("websocket error: {0}")]
    Ws(String),
}

/// Errors surfaced by the tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Crypto failure; fatal for the tunnel.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Protocol failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport failure; fatal for the tunnel.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The tunnel was closed locally.
    #[error("tunnel closed")]
    Closed,
}

/// Top-level Burrow errors.
#[derive(Debug, Error)]
pub enum BurrowError {
    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Tunnel error.
    #[error("tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
