//! Cryptographic layer: passcode key derivation, the two-message
//! authenticated handshake, and AEAD record sealing.
//!
//! The trust model is a shared short passcode. Both peers stretch it into a
//! 32-byte preshared key with a memory-hard KDF, gate an ephemeral X25519
//! exchange on it, and bind the derived directional transport keys to a
//! running transcript of everything exchanged. The relay in the middle sees
//! only ciphertext.

pub mod aead;
pub mod handshake;
pub mod kdf;
pub mod keys;

pub use aead::{AeadReceiver, AeadSender};
pub use handshake::{InitiatorHandshake, ResponderHandshake, Role, TransportKeys};
pub use kdf::derive_key;
pub use keys::{ct_eq, random_bytes, EphemeralKeypair, PresharedKey, TransportKey};
