//! Passcode key derivation.
//!
//! A six-digit passcode has about 20 bits of entropy, so the stretch into
//! the preshared key must be expensive: Argon2id at time cost 3, 64 MiB,
//! four lanes lands around 100 ms per guess on commodity hardware, which
//! gates online brute force at the peer and offline guessing against
//! recorded handshake traffic alike.

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroize;

use crate::core::{
    CryptoError, AEAD_KEY_SIZE, KDF_LANES, KDF_MEMORY_KIB, KDF_MIN_SALT_LEN, KDF_TIME_COST,
};

use super::keys::PresharedKey;

/// Derive the 32-byte preshared key from a passcode and session id.
///
/// The session id is the salt, right-padded with zero bytes to the minimum
/// salt length. Deterministic: both peers must arrive at the same key.
pub fn derive_key(passcode: &str, session_id: &str) -> Result<PresharedKey, CryptoError> {
    let params = Params::new(
        KDF_MEMORY_KIB,
        KDF_TIME_COST,
        KDF_LANES,
        Some(AEAD_KEY_SIZE),
    )
    .map_err(|_| CryptoError::KeyDerivation)?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut salt = session_id.as_bytes().to_vec();
    if salt.len() < KDF_MIN_SALT_LEN {
        salt.resize(KDF_MIN_SALT_LEN, 0);
    }

    let mut output = [0u8; AEAD_KEY_SIZE];
    argon
        .hash_password_into(passcode.as_bytes(), &salt, &mut output)
        .map_err(|_| CryptoError::KeyDerivation)?;

    let key = PresharedKey::from_bytes(output);
    output.zeroize();
    Ok(key)
}
