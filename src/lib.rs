//! # Burrow
//!
//! Zero-trust folder tunneling: make a local directory browsable to exactly
//! one remote peer through a blind relay.
//!
//! - **Confidentiality and integrity**: a passcode-derived preshared key
//!   gates an ephemeral X25519 handshake; every frame rides inside an
//!   XChaCha20-Poly1305 record with a monotonic send counter.
//! - **Blind relay**: the rendezvous point pairs two WebSocket connections
//!   for a session id and forwards opaque bytes verbatim. It never sees a
//!   key, a path, or a plaintext frame.
//! - **Sandboxed filesystem**: every remote path is confined to the export
//!   root after lexical cleaning and full symlink evaluation, with an
//!   optional read-only policy.
//!
//! ## Modules
//!
//! - [`core`]: constants and error taxonomy
//! - [`crypto`]: key derivation, handshake, AEAD records
//! - [`protocol`]: frame codec and payload schema
//! - [`transport`]: message transports and the [`transport::Tunnel`]
//! - [`relay`]: the blind relay server and session manager
//! - [`sandbox`]: the confined filesystem service
//! - [`sharer`]: the request dispatcher (responder side)
//! - [`connector`]: the file-browsing client (initiator side)
//!
//! ## Example
//!
//! ```no_run
//! use burrow::connector::Connector;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = Connector::open("http://127.0.0.1:8080", "A7K3QX", "123-456").await?;
//! for entry in connector.list("/").await? {
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//! connector.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connector;
pub mod core;
pub mod crypto;
pub mod protocol;
pub mod relay;
pub mod sandbox;
pub mod sharer;
pub mod transport;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::connector::{Connector, ConnectorError};
    pub use crate::core::{BurrowError, CryptoError, ProtocolError, TransportError, TunnelError};
    pub use crate::crypto::Role;
    pub use crate::protocol::{ErrorCode, FileInfo, Frame, FrameType};
    pub use crate::relay::{RelayState, SessionManager};
    pub use crate::sandbox::{FsError, SecureFs};
    pub use crate::sharer::Dispatcher;
    pub use crate::transport::Tunnel;
}

pub use crate::core::BurrowError;
pub use crate::crypto::Role;
pub use crate::sandbox::SecureFs;
pub use crate::transport::Tunnel;
