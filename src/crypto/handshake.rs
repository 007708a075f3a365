//! Two-message authenticated handshake.
//!
//! Both messages ride an already-connected framed transport, before any
//! transport-key traffic:
//!
//! ```text
//! initiator                                    responder
//!   M1 = E_i.pub || seal(psk, auth_blob_i)  ->
//!                                            <- M2 = E_r.pub || seal(k_r2i, auth_blob_r)
//! ```
//!
//! An `auth_blob` is `challenge(32) || SHA256(transcript || psk || challenge)`.
//! The transcript is a rolling SHA-256 chain absorbing, in wire order, the
//! preshared key and each ephemeral public key; both roles converge on the
//! same hash. Once the ephemerals and the X25519 shared secret `s` are
//! known, each direction gets its own key
//! `K(label) = SHA256(transcript || s || label)`, which binds the transport
//! keys to the exact messages exchanged. M2 is sealed under the
//! responder-to-initiator transport key, so opening it already proves key
//! agreement before the explicit proof check.
//!
//! Every failure is the same opaque authentication error; the transcript and
//! ephemeral scalar are wiped once the transport keys are installed.

use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::core::{
    CryptoError, AUTH_BLOB_SIZE, CHALLENGE_SIZE, HASH_SIZE, LABEL_INITIATOR_TO_RESPONDER,
    LABEL_RESPONDER_TO_INITIATOR, PUBLIC_KEY_SIZE,
};

use super::aead::{AeadReceiver, AeadSender, MIN_RECORD_SIZE};
use super::keys::{ct_eq, random_bytes, EphemeralKeypair, PresharedKey, TransportKey};

/// Exact wire size of either handshake message.
pub const HANDSHAKE_MESSAGE_SIZE: usize = PUBLIC_KEY_SIZE + MIN_RECORD_SIZE + AUTH_BLOB_SIZE;

/// Role in the handshake; decides which transport key sends and which
/// receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Initiator (the connector). Sends M1.
    Initiator,
    /// Responder (the sharer). Sends M2.
    Responder,
}

/// Running SHA-256 chain over the handshake inputs.
///
/// `update` folds each item as `h = SHA256(h || item)` starting from 32 zero
/// bytes. Wiped on drop.
struct Transcript {
    h: [u8; HASH_SIZE],
}

impl Transcript {
    fn new() -> Self {
        Self { h: [0u8; HASH_SIZE] }
    }

    fn update(&mut self, item: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.h);
        hasher.update(item);
        self.h = hasher.finalize().into();
    }

    fn hash(&self) -> &[u8; HASH_SIZE] {
        &self.h
    }
}

impl Drop for Transcript {
    fn drop(&mut self) {
        self.h.zeroize();
    }
}

/// The two directional transport keys derived by a completed handshake.
pub struct TransportKeys {
    /// Key for initiator-to-responder records.
    initiator_to_responder: TransportKey,
    /// Key for responder-to-initiator records.
    responder_to_initiator: TransportKey,
}

impl TransportKeys {
    fn derive(transcript: &Transcript, shared_secret: &[u8; 32]) -> Self {
        Self {
            initiator_to_responder: derive_label_key(
                transcript.hash(),
                shared_secret,
                LABEL_INITIATOR_TO_RESPONDER,
            ),
            responder_to_initiator: derive_label_key(
                transcript.hash(),
                shared_secret,
                LABEL_RESPONDER_TO_INITIATOR,
            ),
        }
    }

    /// The send key for the given role.
    pub fn send_key(&self, role: Role) -> &TransportKey {
        match role {
            Role::Initiator => &self.initiator_to_responder,
            Role::Responder => &self.responder_to_initiator,
        }
    }

    /// The receive key for the given role.
    pub fn recv_key(&self, role: Role) -> &TransportKey {
        match role {
            Role::Initiator => &self.responder_to_initiator,
            Role::Responder => &self.initiator_to_responder,
        }
    }

    /// Split into AEAD halves for the given role.
    pub fn into_aeads(self, role: Role) -> (AeadSender, AeadReceiver) {
        let sender = AeadSender::new(self.send_key(role).clone());
        let receiver = AeadReceiver::new(self.recv_key(role).clone());
        (sender, receiver)
    }
}

fn derive_label_key(transcript: &[u8; HASH_SIZE], s: &[u8; 32], label: &[u8]) -> TransportKey {
    let mut hasher = Sha256::new();
    hasher.update(transcript);
    hasher.update(s);
    hasher.update(label);
    TransportKey::from_bytes(hasher.finalize().into())
}

/// `SHA256(transcript || psk || challenge)`, the knowledge proof inside an
/// auth blob.
fn proof(transcript: &Transcript, psk: &PresharedKey, challenge: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(transcript.hash());
    hasher.update(psk.as_bytes());
    hasher.update(challenge);
    hasher.finalize().into()
}

fn build_auth_blob(transcript: &Transcript, psk: &PresharedKey) -> [u8; AUTH_BLOB_SIZE] {
    let challenge: [u8; CHALLENGE_SIZE] = random_bytes();
    let p = proof(transcript, psk, &challenge);
    let mut blob = [0u8; AUTH_BLOB_SIZE];
    blob[..CHALLENGE_SIZE].copy_from_slice(&challenge);
    blob[CHALLENGE_SIZE..].copy_from_slice(&p);
    blob
}

fn verify_auth_blob(
    transcript: &Transcript,
    psk: &PresharedKey,
    blob: &[u8],
) -> Result<(), CryptoError> {
    if blob.len() != AUTH_BLOB_SIZE {
        return Err(CryptoError::Authentication);
    }
    let (challenge, remote_proof) = blob.split_at(CHALLENGE_SIZE);
    let expected = proof(transcript, psk, challenge);
    if !ct_eq(&expected, remote_proof) {
        return Err(CryptoError::Authentication);
    }
    Ok(())
}

fn split_message(message: &[u8]) -> Result<([u8; PUBLIC_KEY_SIZE], &[u8]), CryptoError> {
    if message.len() != HANDSHAKE_MESSAGE_SIZE {
        return Err(CryptoError::Authentication);
    }
    let mut remote_public = [0u8; PUBLIC_KEY_SIZE];
    remote_public.copy_from_slice(&message[..PUBLIC_KEY_SIZE]);
    Ok((remote_public, &message[PUBLIC_KEY_SIZE..]))
}

/// Handshake state machine for the initiator.
pub struct InitiatorHandshake {
    psk: PresharedKey,
    transcript: Transcript,
    local: Option<EphemeralKeypair>,
    sent_init: bool,
}

impl InitiatorHandshake {
    /// Start an initiator handshake gated on the preshared key.
    pub fn new(psk: PresharedKey) -> Self {
        let mut transcript = Transcript::new();
        transcript.update(psk.as_bytes());
        Self {
            psk,
            transcript,
            local: Some(EphemeralKeypair::generate()),
            sent_init: false,
        }
    }

    /// Produce M1.
    pub fn write_init(&mut self) -> Result<Vec<u8>, CryptoError> {
        if self.sent_init {
            return Err(CryptoError::OutOfOrder);
        }
        self.sent_init = true;

        let local = self.local.as_ref().ok_or(CryptoError::OutOfOrder)?;
        self.transcript.update(local.public_bytes());

        let blob = build_auth_blob(&self.transcript, &self.psk);
        let mut psk_sender = AeadSender::new(TransportKey::from_bytes(*self.psk.as_bytes()));
        let record = psk_sender.seal(&blob)?;

        let mut message = Vec::with_capacity(HANDSHAKE_MESSAGE_SIZE);
        message.extend_from_slice(local.public_bytes());
        message.extend_from_slice(&record);
        Ok(message)
    }

    /// Consume M2, finishing the handshake.
    pub fn read_resp(mut self, message: &[u8]) -> Result<TransportKeys, CryptoError> {
        if !self.sent_init {
            return Err(CryptoError::OutOfOrder);
        }
        let local = self.local.take().ok_or(CryptoError::OutOfOrder)?;

        let (remote_public, record) = split_message(message)?;
        self.transcript.update(&remote_public);

        let shared = local.diffie_hellman(&remote_public)?;
        let keys = TransportKeys::derive(&self.transcript, shared.as_bytes());

        let receiver = AeadReceiver::new(keys.recv_key(Role::Initiator).clone());
        let blob = receiver.open(record).map_err(|_| CryptoError::Authentication)?;
        verify_auth_blob(&self.transcript, &self.psk, &blob)?;

        Ok(keys)
    }
}

/// Handshake state machine for the responder.
pub struct ResponderHandshake {
    psk: PresharedKey,
    transcript: Transcript,
    local: Option<EphemeralKeypair>,
    remote_public: Option<[u8; PUBLIC_KEY_SIZE]>,
}

impl ResponderHandshake {
    /// Start a responder handshake gated on the preshared key.
    pub fn new(psk: PresharedKey) -> Self {
        let mut transcript = Transcript::new();
        transcript.update(psk.as_bytes());
        Self {
            psk,
            transcript,
            local: Some(EphemeralKeypair::generate()),
            remote_public: None,
        }
    }

    /// Consume M1, authenticating the initiator's knowledge of the passcode.
    pub fn read_init(&mut self, message: &[u8]) -> Result<(), CryptoError> {
        if self.remote_public.is_some() {
            return Err(CryptoError::OutOfOrder);
        }

        let (remote_public, record) = split_message(message)?;
        self.transcript.update(&remote_public);

        let receiver = AeadReceiver::new(TransportKey::from_bytes(*self.psk.as_bytes()));
        let blob = receiver.open(record).map_err(|_| CryptoError::Authentication)?;
        verify_auth_blob(&self.transcript, &self.psk, &blob)?;

        self.remote_public = Some(remote_public);
        Ok(())
    }

    /// Produce M2 and finish, yielding the transport keys.
    pub fn write_resp(mut self) -> Result<(Vec<u8>, TransportKeys), CryptoError> {
        let remote_public = self.remote_public.take().ok_or(CryptoError::OutOfOrder)?;
        let local = self.local.take().ok_or(CryptoError::OutOfOrder)?;

        let local_public = *local.public_bytes();
        self.transcript.update(&local_public);

        let shared = local.diffie_hellman(&remote_public)?;
        let keys = TransportKeys::derive(&self.transcript, shared.as_bytes());

        let blob = build_auth_blob(&self.transcript, &self.psk);
        let mut sender = AeadSender::new(keys.send_key(Role::Responder).clone());
        let record = sender.seal(&blob)?;

        let mut message = Vec::with_capacity(HANDSHAKE_MESSAGE_SIZE);
        message.extend_from_slice(&local_public);
        message.extend_from_slice(&record);
        Ok((message, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn psk(byte: u8) -> PresharedKey {
        PresharedKey::from_bytes([byte; 32])
    }

    fn run(initiator_psk: PresharedKey, responder_psk: PresharedKey) -> (TransportKeys, TransportKeys) {
        let mut initiator = InitiatorHandshake::new(initiator_psk);
        let mut responder = ResponderHandshake::new(responder_psk);

        let m1 = initiator.write_init().unwrap();
        responder.read_init(&m1).unwrap();
        let (m2, responder_keys) = responder.write_resp().unwrap();
        let initiator_keys = initiator.read_resp(&m2).unwrap();
        (initiator_keys, responder_keys)
    }

    #[test]
    fn test_handshake_roundtrip() {
        let (initiator_keys, responder_keys) = run(psk(0x11), psk(0x11));

        // Initiator's send key is the responder's receive key and vice versa.
        assert_eq!(
            initiator_keys.send_key(Role::Initiator).as_bytes(),
            responder_keys.recv_key(Role::Responder).as_bytes()
        );
        assert_eq!(
            initiator_keys.recv_key(Role::Initiator).as_bytes(),
            responder_keys.send_key(Role::Responder).as_bytes()
        );

        // Directions must not share a key.
        assert_ne!(
            initiator_keys.send_key(Role::Initiator).as_bytes(),
            initiator_keys.recv_key(Role::Initiator).as_bytes()
        );
    }

    #[test]
    fn test_handshake_messages_have_fixed_size() {
        let mut initiator = InitiatorHandshake::new(psk(0x22));
        let mut responder = ResponderHandshake::new(psk(0x22));

        let m1 = initiator.write_init().unwrap();
        assert_eq!(m1.len(), HANDSHAKE_MESSAGE_SIZE);

        responder.read_init(&m1).unwrap();
        let (m2, _) = responder.write_resp().unwrap();
        assert_eq!(m2.len(), HANDSHAKE_MESSAGE_SIZE);
    }

    #[test]
    fn test_mismatched_psk_fails_at_responder() {
        let mut initiator = InitiatorHandshake::new(psk(0x33));
        let mut responder = ResponderHandshake::new(psk(0x44));

        let m1 = initiator.write_init().unwrap();
        assert!(matches!(
            responder.read_init(&m1),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn test_tampered_init_fails() {
        let mut initiator = InitiatorHandshake::new(psk(0x55));
        let mut responder = ResponderHandshake::new(psk(0x55));

        let mut m1 = initiator.write_init().unwrap();
        let last = m1.len() - 1;
        m1[last] ^= 0x01;
        assert!(responder.read_init(&m1).is_err());
    }

    #[test]
    fn test_tampered_resp_fails() {
        let mut initiator = InitiatorHandshake::new(psk(0x66));
        let mut responder = ResponderHandshake::new(psk(0x66));

        let m1 = initiator.write_init().unwrap();
        responder.read_init(&m1).unwrap();
        let (mut m2, _) = responder.write_resp().unwrap();
        // Corrupt the responder's ephemeral public key: the derived keys
        // change, so the sealed blob no longer opens.
        m2[0] ^= 0x01;
        assert!(initiator.read_resp(&m2).is_err());
    }

    #[test]
    fn test_fresh_handshakes_yield_fresh_keys() {
        let (a, _) = run(psk(0x77), psk(0x77));
        let (b, _) = run(psk(0x77), psk(0x77));
        // Ephemeral contributions make every session's keys unique.
        assert_ne!(
            a.send_key(Role::Initiator).as_bytes(),
            b.send_key(Role::Initiator).as_bytes()
        );
    }

    #[test]
    fn test_out_of_order_messages_rejected() {
        let responder = ResponderHandshake::new(psk(0x88));
        assert!(matches!(
            responder.write_resp(),
            Err(CryptoError::OutOfOrder)
        ));

        let initiator = InitiatorHandshake::new(psk(0x88));
        let garbage = vec![0u8; HANDSHAKE_MESSAGE_SIZE];
        assert!(matches!(
            initiator.read_resp(&garbage),
            Err(CryptoError::OutOfOrder)
        ));
    }

    #[test]
    fn test_runt_message_rejected() {
        let mut responder = ResponderHandshake::new(psk(0x99));
        assert!(responder.read_init(&[0u8; 10]).is_err());
    }
}
