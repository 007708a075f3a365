//! Key material and primitive helpers.
//!
//! Every secret lives in a fixed-size array wrapped in a type that wipes its
//! memory on drop; nothing relies on scope rules alone.

use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroize;

use crate::core::{CryptoError, AEAD_KEY_SIZE, PUBLIC_KEY_SIZE};

/// The 32-byte output of passcode key derivation.
///
/// Gates the handshake; zeroized on drop.
#[derive(Clone)]
pub struct PresharedKey {
    key: [u8; AEAD_KEY_SIZE],
}

impl PresharedKey {
    /// Wrap existing key material.
    pub fn from_bytes(key: [u8; AEAD_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Raw key bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; AEAD_KEY_SIZE] {
        &self.key
    }
}

impl Drop for PresharedKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// A directional 32-byte transport key installed after the handshake.
#[derive(Clone)]
pub struct TransportKey {
    key: [u8; AEAD_KEY_SIZE],
}

impl TransportKey {
    /// Wrap existing key material.
    pub fn from_bytes(key: [u8; AEAD_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Raw key bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; AEAD_KEY_SIZE] {
        &self.key
    }
}

impl Drop for TransportKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// An ephemeral X25519 keypair, generated fresh per handshake.
///
/// The private scalar is consumed by the exchange and wiped by its own
/// destructor; it never outlives the handshake.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public: [u8; PUBLIC_KEY_SIZE],
}

impl EphemeralKeypair {
    /// Generate a new random keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = *PublicKey::from(&secret).as_bytes();
        Self { secret, public }
    }

    /// The public half.
    pub fn public_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }

    /// Complete the exchange against the remote ephemeral public key.
    ///
    /// Rejects the all-zero shared secret, which only a low-order remote
    /// point can produce. Consumes the keypair.
    pub fn diffie_hellman(
        self,
        remote_public: &[u8; PUBLIC_KEY_SIZE],
    ) -> Result<SharedSecret, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*remote_public));
        if bool::from(shared.as_bytes().ct_eq(&[0u8; 32])) {
            return Err(CryptoError::Authentication);
        }
        Ok(SharedSecret { inner: shared })
    }
}

/// The X25519 shared secret; wiped on drop by the underlying library.
pub struct SharedSecret {
    inner: x25519_dalek::SharedSecret,
}

impl SharedSecret {
    /// Raw shared secret bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.inner.as_bytes()
    }
}

/// Constant-time byte equality. Unequal lengths compare unequal.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Fresh bytes from the OS CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_exchange_agrees() {
        let a = EphemeralKeypair::generate();
        let b = EphemeralKeypair::generate();

        let a_pub = *a.public_bytes();
        let b_pub = *b.public_bytes();
        assert_ne!(a_pub, b_pub);

        let s_a = a.diffie_hellman(&b_pub).unwrap();
        let s_b = b.diffie_hellman(&a_pub).unwrap();
        assert_eq!(s_a.as_bytes(), s_b.as_bytes());
    }

    #[test]
    fn test_low_order_point_rejected() {
        // The identity element forces an all-zero shared secret.
        let kp = EphemeralKeypair::generate();
        let identity = [0u8; PUBLIC_KEY_SIZE];
        assert!(matches!(
            kp.diffie_hellman(&identity),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(b"123-456", b"123-456"));
        assert!(!ct_eq(b"123-456", b"123-457"));
        assert!(!ct_eq(b"123-456", b"123-45"));
        assert!(ct_eq(b"", b""));
    }

    #[test]
    fn test_random_bytes_distinct() {
        let a: [u8; 16] = random_bytes();
        let b: [u8; 16] = random_bytes();
        assert_ne!(a, b);
    }
}
