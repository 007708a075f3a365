//! Protocol constants.
//!
//! These values are fixed by the wire protocol and MUST NOT be changed:
//! two peers built from different values will not interoperate.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// XChaCha20 nonce size.
pub const AEAD_NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// AEAD key size (XChaCha20-Poly1305).
pub const AEAD_KEY_SIZE: usize = 32;

/// Bytes of the nonce occupied by the big-endian send counter.
pub const NONCE_COUNTER_SIZE: usize = 8;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// SHA-256 output size.
pub const HASH_SIZE: usize = 32;

/// Random challenge carried in a handshake auth blob.
pub const CHALLENGE_SIZE: usize = 32;

/// Handshake auth blob: challenge followed by a transcript proof.
pub const AUTH_BLOB_SIZE: usize = CHALLENGE_SIZE + HASH_SIZE;

/// Argon2id time cost (iterations).
pub const KDF_TIME_COST: u32 = 3;

/// Argon2id memory cost in KiB (64 MiB).
pub const KDF_MEMORY_KIB: u32 = 64 * 1024;

/// Argon2id parallelism (lanes).
pub const KDF_LANES: u32 = 4;

/// Minimum salt length; shorter session ids are zero-padded up to this.
pub const KDF_MIN_SALT_LEN: usize = 8;

/// Transport key derivation label, initiator to responder direction.
pub const LABEL_INITIATOR_TO_RESPONDER: &[u8] = b"initiator_to_responder";

/// Transport key derivation label, responder to initiator direction.
pub const LABEL_RESPONDER_TO_INITIATOR: &[u8] = b"responder_to_initiator";

// =============================================================================
// FRAME CODEC
// =============================================================================

/// Frame header size: length (4, BE) + type (4, BE).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum frame payload (1 MiB). Larger frames are a protocol error.
pub const MAX_FRAME_PAYLOAD: usize = 1024 * 1024;

// =============================================================================
// TUNNEL DEADLINES
// =============================================================================

/// Read deadline between data messages.
pub const READ_DEADLINE: Duration = Duration::from_secs(120);

/// Write deadline for data messages.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(30);

/// Handshake read deadline. Generous: the remote peer may still be inside
/// the memory-hard key derivation on modest hardware.
pub const HANDSHAKE_READ_DEADLINE: Duration = Duration::from_secs(120);

/// Handshake write deadline.
pub const HANDSHAKE_WRITE_DEADLINE: Duration = Duration::from_secs(30);

// =============================================================================
// RELAY
// =============================================================================

/// Relay per-message read size cap (2 MiB).
pub const RELAY_MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Relay read idle timeout; refreshed by any inbound traffic including pongs.
pub const RELAY_READ_IDLE: Duration = Duration::from_secs(60);

/// Relay write deadline toward either endpoint.
pub const RELAY_WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Interval of server-initiated pings, below the read idle timeout.
pub const RELAY_PING_INTERVAL: Duration = Duration::from_secs(54);

/// A connection pair not seen for this long is removed.
pub const PAIR_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

/// How often the stale-pair monitor runs.
pub const PAIR_MONITOR_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// SESSIONS
// =============================================================================

/// Session id length in base32 characters.
pub const SESSION_ID_LEN: usize = 6;

/// Random bytes behind a session id.
pub const SESSION_ID_ENTROPY: usize = 4;

/// Sessions expire this long after creation.
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Sessions expire after this much inactivity.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How often the session sweeper runs.
pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Failed passcode attempts before a session latches locked.
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

/// Passcode validation is padded to at least this wall-clock duration.
pub const VALIDATE_MIN_DURATION: Duration = Duration::from_millis(100);

// =============================================================================
// FILESYSTEM SERVICE
// =============================================================================

/// Hard cap on a single read operation (10 MiB); longer reads are truncated.
pub const MAX_READ_CHUNK: usize = 10 * 1024 * 1024;

/// Mode for files created by write requests.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Default chunk size the connector uses for whole-file downloads.
pub const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;
