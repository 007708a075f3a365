//! XChaCha20-Poly1305 record sealing.
//!
//! A sealed record is `nonce(24) || ciphertext || tag(16)`. The sender
//! builds each nonce from its 64-bit counter (big-endian, leading 8 bytes,
//! incremented before sealing) followed by 16 fresh CSPRNG bytes. The full
//! nonce travels in the record, so the receiver is stateless: uniqueness and
//! replay resistance come from the sender's counter discipline, and brief
//! reordering costs nothing.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::core::{CryptoError, AEAD_NONCE_SIZE, AEAD_TAG_SIZE, NONCE_COUNTER_SIZE};

use super::keys::TransportKey;

/// Minimum length of a well-formed record: nonce plus tag.
pub const MIN_RECORD_SIZE: usize = AEAD_NONCE_SIZE + AEAD_TAG_SIZE;

/// Sealing half of a tunnel direction.
///
/// Owns the key and the strictly increasing send counter. The counter is
/// only ever touched inside `seal`, which the tunnel calls under its writer
/// lock.
pub struct AeadSender {
    key: TransportKey,
    counter: u64,
}

impl AeadSender {
    /// Create a sender with its counter at zero.
    pub fn new(key: TransportKey) -> Self {
        Self { key, counter: 0 }
    }

    /// Current counter value (the counter of the last sealed record).
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Seal a plaintext into a record.
    ///
    /// Increments the counter first; a counter that would wrap is a fatal
    /// error and the tunnel must terminate.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(CryptoError::CounterExhausted)?;

        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        nonce[..NONCE_COUNTER_SIZE].copy_from_slice(&self.counter.to_be_bytes());
        OsRng.fill_bytes(&mut nonce[NONCE_COUNTER_SIZE..]);

        let cipher = XChaCha20Poly1305::new(self.key.as_bytes().into());
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|_| CryptoError::Seal)?;

        let mut record = Vec::with_capacity(AEAD_NONCE_SIZE + ciphertext.len());
        record.extend_from_slice(&nonce);
        record.extend_from_slice(&ciphertext);
        Ok(record)
    }
}

/// Opening half of a tunnel direction. Stateless apart from the key.
pub struct AeadReceiver {
    key: TransportKey,
}

impl AeadReceiver {
    /// Create a receiver.
    pub fn new(key: TransportKey) -> Self {
        Self { key }
    }

    /// Open a record back into its plaintext.
    ///
    /// Any tampering with the nonce, ciphertext, or tag fails the Poly1305
    /// check and surfaces as a single opaque error.
    pub fn open(&self, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if record.len() < MIN_RECORD_SIZE {
            return Err(CryptoError::Open);
        }

        let (nonce, ciphertext) = record.split_at(AEAD_NONCE_SIZE);
        let cipher = XChaCha20Poly1305::new(self.key.as_bytes().into());
        cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &[],
                },
            )
            .map_err(|_| CryptoError::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (AeadSender, AeadReceiver) {
        let key = TransportKey::from_bytes([0x42; 32]);
        (AeadSender::new(key.clone()), AeadReceiver::new(key))
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (mut tx, rx) = pair();
        let plaintext = b"hello through the burrow";

        let record = tx.seal(plaintext).unwrap();
        assert_eq!(record.len(), plaintext.len() + MIN_RECORD_SIZE);

        let opened = rx.open(&record).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_counter_strictly_increases() {
        let (mut tx, _) = pair();
        assert_eq!(tx.counter(), 0);
        tx.seal(b"a").unwrap();
        assert_eq!(tx.counter(), 1);
        tx.seal(b"b").unwrap();
        assert_eq!(tx.counter(), 2);
    }

    #[test]
    fn test_successive_nonces_distinct() {
        let (mut tx, _) = pair();
        let r1 = tx.seal(b"same").unwrap();
        let r2 = tx.seal(b"same").unwrap();
        assert_ne!(&r1[..AEAD_NONCE_SIZE], &r2[..AEAD_NONCE_SIZE]);
    }

    #[test]
    fn test_nonce_carries_counter_big_endian() {
        let (mut tx, _) = pair();
        tx.seal(b"x").unwrap();
        let record = tx.seal(b"y").unwrap();
        assert_eq!(hex::encode(&record[..NONCE_COUNTER_SIZE]), "0000000000000002");
    }

    #[test]
    fn test_any_single_bit_flip_fails() {
        let (mut tx, rx) = pair();
        let record = tx.seal(b"integrity").unwrap();

        for byte in 0..record.len() {
            for bit in 0..8 {
                let mut tampered = record.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    rx.open(&tampered).is_err(),
                    "flip at byte {byte} bit {bit} went undetected"
                );
            }
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let (mut tx, _) = pair();
        let record = tx.seal(b"secret").unwrap();

        let other = AeadReceiver::new(TransportKey::from_bytes([0x43; 32]));
        assert!(matches!(other.open(&record), Err(CryptoError::Open)));
    }

    #[test]
    fn test_truncated_record_fails() {
        let (mut tx, rx) = pair();
        let record = tx.seal(b"short").unwrap();
        assert!(rx.open(&record[..MIN_RECORD_SIZE - 1]).is_err());
        assert!(rx.open(&[]).is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let (mut tx, rx) = pair();
        let record = tx.seal(b"").unwrap();
        assert_eq!(record.len(), MIN_RECORD_SIZE);
        assert_eq!(rx.open(&record).unwrap(), b"");
    }
}
