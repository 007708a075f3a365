//! Connection pairing.
//!
//! A `ConnectionPair` holds up to two endpoint handles for one session id:
//! the sharer side and the connector side. Each handle is the sending end
//! of the peer connection's outbound channel; the relay's read loops look
//! up the opposite handle and push messages into it verbatim. Pairs are
//! dropped when both sides are gone or when a monitor finds them stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

use crate::core::PAIR_STALE_AFTER;

use super::session::Clock;

/// Which side of a pair a connection occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointSide {
    /// The sharer (handshake responder).
    Sharer,
    /// The connector (handshake initiator).
    Connector,
}

impl EndpointSide {
    /// The opposite side.
    pub fn peer(self) -> Self {
        match self {
            EndpointSide::Sharer => EndpointSide::Connector,
            EndpointSide::Connector => EndpointSide::Sharer,
        }
    }
}

/// Both endpoint slots for one session id.
pub struct ConnectionPair {
    session_id: String,
    created_at: Instant,
    last_seen: Mutex<Instant>,
    sharer: Mutex<Option<mpsc::Sender<Message>>>,
    connector: Mutex<Option<mpsc::Sender<Message>>>,
}

impl ConnectionPair {
    fn new(session_id: String, now: Instant) -> Self {
        Self {
            session_id,
            created_at: now,
            last_seen: Mutex::new(now),
            sharer: Mutex::new(None),
            connector: Mutex::new(None),
        }
    }

    /// The session this pair belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// When the pair was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn slot(&self, side: EndpointSide) -> &Mutex<Option<mpsc::Sender<Message>>> {
        match side {
            EndpointSide::Sharer => &self.sharer,
            EndpointSide::Connector => &self.connector,
        }
    }

    /// Install an endpoint handle, replacing any previous occupant of the
    /// slot (whose writer then sees its channel close).
    pub async fn attach(&self, side: EndpointSide, tx: mpsc::Sender<Message>) {
        *self.slot(side).lock().await = Some(tx);
    }

    /// Vacate a slot.
    pub async fn detach(&self, side: EndpointSide) {
        *self.slot(side).lock().await = None;
    }

    /// The opposite endpoint's handle, if attached.
    pub async fn peer_sender(&self, side: EndpointSide) -> Option<mpsc::Sender<Message>> {
        self.slot(side.peer()).lock().await.clone()
    }

    /// Whether both slots are vacant.
    pub async fn is_empty(&self) -> bool {
        self.sharer.lock().await.is_none() && self.connector.lock().await.is_none()
    }

    /// Refresh the pair's last-seen time.
    pub async fn touch(&self, now: Instant) {
        *self.last_seen.lock().await = now;
    }

    /// The pair's last-seen time.
    pub async fn last_seen(&self) -> Instant {
        *self.last_seen.lock().await
    }
}

/// The relay's table of live pairs.
pub struct PairRegistry {
    pairs: RwLock<HashMap<String, Arc<ConnectionPair>>>,
    clock: Arc<dyn Clock>,
}

impl PairRegistry {
    /// Create a registry on the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            pairs: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// The registry's current time.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Get or create the pair for a session id.
    pub async fn join(&self, session_id: &str) -> Arc<ConnectionPair> {
        let mut pairs = self.pairs.write().await;
        pairs
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(ConnectionPair::new(session_id.to_string(), self.clock.now()))
            })
            .clone()
    }

    /// Drop the pair if both endpoints are gone.
    pub async fn release_if_empty(&self, session_id: &str) {
        let mut pairs = self.pairs.write().await;
        if let Some(pair) = pairs.get(session_id) {
            if pair.is_empty().await {
                pairs.remove(session_id);
                debug!(session_id, "pair released");
            }
        }
    }

    /// Remove pairs not seen for longer than the staleness bound. Returns
    /// how many were dropped.
    pub async fn remove_stale(&self) -> usize {
        let now = self.clock.now();
        let mut pairs = self.pairs.write().await;
        let mut stale = Vec::new();
        for (id, pair) in pairs.iter() {
            if now.duration_since(pair.last_seen().await) >= PAIR_STALE_AFTER {
                stale.push(id.clone());
            }
        }
        for id in &stale {
            pairs.remove(id);
            debug!(session_id = %id, "stale pair removed");
        }
        stale.len()
    }

    /// Number of live pairs.
    pub async fn len(&self) -> usize {
        self.pairs.read().await.len()
    }
}
