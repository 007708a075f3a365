//! Relay-side session lifecycle.
//!
//! A session is the relay's record of one shareable endpoint pair: a short
//! base32 id, a six-digit passcode, timers, and a failure counter that
//! latches into a lockout. The table is a single reader-writer-locked map;
//! the sweeper visits it every few minutes.
//!
//! Time and randomness arrive through injected capabilities so expiry,
//! lockout, and id generation are deterministic under test.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core::{
    MAX_FAILED_ATTEMPTS, SESSION_ID_ENTROPY, SESSION_ID_LEN, SESSION_IDLE_TIMEOUT,
    SESSION_MAX_AGE, VALIDATE_MIN_DURATION,
};
use crate::crypto::ct_eq;

/// A monotonic time source.
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Production clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A source of random bytes for ids and passcodes.
pub trait Entropy: Send + Sync + 'static {
    /// Fill `buf` with random bytes.
    fn fill(&self, buf: &mut [u8]);
}

/// Production entropy, backed by the OS CSPRNG.
pub struct OsEntropy;

impl Entropy for OsEntropy {
    fn fill(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}

/// One session record.
#[derive(Clone, Debug)]
pub struct Session {
    /// Six-character base32 id.
    pub id: String,
    /// Passcode rendered as `XXX-XXX`. Known only to the relay (which
    /// minted it) and whoever the sharer tells; never logged.
    pub passcode: String,
    /// The sharer's exported path, as given at creation.
    pub shared_root: String,
    /// Creation time.
    pub created_at: Instant,
    /// Last activity time.
    pub last_activity: Instant,
    /// Consecutive failed passcode attempts.
    pub failed_attempts: u32,
    /// Latched once the attempt cap is crossed.
    pub locked: bool,
    /// Cleared on revoke.
    pub active: bool,
}

impl Session {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= SESSION_MAX_AGE
            || now.duration_since(self.last_activity) >= SESSION_IDLE_TIMEOUT
    }
}

/// Outcome of a failed passcode validation.
///
/// Everything except a lockout collapses into one generic failure: unknown
/// id, expired session, and wrong passcode must be indistinguishable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Generic authentication failure.
    #[error("authentication failed")]
    Failed,

    /// The session is locked out.
    #[error("session locked")]
    Locked,
}

/// The session table.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn Entropy>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Create a manager on the system clock and OS entropy.
    pub fn new() -> Self {
        Self::with_capabilities(Arc::new(SystemClock), Arc::new(OsEntropy))
    }

    /// Create a manager with injected capabilities.
    pub fn with_capabilities(clock: Arc<dyn Clock>, entropy: Arc<dyn Entropy>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
            entropy,
        }
    }

    /// Create a fresh session for a shared path.
    ///
    /// The id is re-rolled until unique among live sessions.
    pub async fn create_session(&self, shared_root: &str) -> Session {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;

        let id = loop {
            let candidate = self.generate_id();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
            debug!("session id collision, re-rolling");
        };

        let session = Session {
            id: id.clone(),
            passcode: self.generate_passcode(),
            shared_root: shared_root.to_string(),
            created_at: now,
            last_activity: now,
            failed_attempts: 0,
            locked: false,
            active: true,
        };
        sessions.insert(id, session.clone());
        session
    }

    fn generate_id(&self) -> String {
        let mut bytes = [0u8; SESSION_ID_ENTROPY];
        self.entropy.fill(&mut bytes);
        let encoded = base32::encode(base32::Alphabet::RFC4648 { padding: false }, &bytes);
        encoded[..SESSION_ID_LEN].to_string()
    }

    fn generate_passcode(&self) -> String {
        let mut bytes = [0u8; 4];
        self.entropy.fill(&mut bytes);
        let n = u32::from_be_bytes(bytes) % 1_000_000;
        format!("{:03}-{:03}", n / 1000, n % 1000)
    }

    /// Plain read of a session record.
    pub async fn lookup(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Whether a session exists, is unlocked, and has not expired.
    pub async fn is_live(&self, id: &str) -> bool {
        let now = self.clock.now();
        match self.sessions.read().await.get(id) {
            Some(s) => s.active && !s.locked && !s.is_expired(now),
            None => false,
        }
    }

    /// Validate a passcode against a session.
    ///
    /// The total running time is padded to at least 100 ms so success,
    /// failure, unknown id, and lockout are indistinguishable by timing.
    /// The comparison itself is constant-time. Wrong passcodes count toward
    /// the lockout cap; success resets the counter and refreshes activity.
    pub async fn validate_passcode(&self, id: &str, passcode: &str) -> Result<(), AuthError> {
        let started = Instant::now();
        let result = self.validate_inner(id, passcode).await;

        let elapsed = started.elapsed();
        if elapsed < VALIDATE_MIN_DURATION {
            tokio::time::sleep(VALIDATE_MIN_DURATION - elapsed).await;
        }
        result
    }

    async fn validate_inner(&self, id: &str, passcode: &str) -> Result<(), AuthError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;

        let session = sessions.get_mut(id).ok_or(AuthError::Failed)?;
        if session.locked {
            return Err(AuthError::Locked);
        }
        if !session.active || session.is_expired(now) {
            return Err(AuthError::Failed);
        }

        if ct_eq(session.passcode.as_bytes(), passcode.as_bytes()) {
            session.failed_attempts = 0;
            session.last_activity = now;
            Ok(())
        } else {
            session.failed_attempts += 1;
            if session.failed_attempts >= MAX_FAILED_ATTEMPTS {
                session.locked = true;
                info!(session_id = %id, "session locked after repeated failures");
            }
            Err(AuthError::Failed)
        }
    }

    /// Refresh a session's last-activity time.
    pub async fn touch(&self, id: &str) {
        let now = self.clock.now();
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            session.last_activity = now;
        }
    }

    /// Mark a session inactive and remove it.
    pub async fn revoke(&self, id: &str) {
        if let Some(mut session) = self.sessions.write().await.remove(id) {
            session.active = false;
            info!(session_id = %id, "session revoked");
        }
    }

    /// Remove expired and locked-out sessions. Returns how many were
    /// dropped.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.active && !s.locked && !s.is_expired(now));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "session sweep");
        }
        removed
    }

    /// Number of live records in the table.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
