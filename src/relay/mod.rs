//! The blind relay.
//!
//! Three interfaces on one listening socket:
//!
//! - `POST /session/create` mints a session (id + passcode) for a sharer.
//! - `GET /share?session=<id>` upgrades the sharer's connection.
//! - `GET /connect?session=<id>` upgrades the connector's connection.
//!
//! After the upgrade the relay pairs the two sockets and forwards binary
//! messages verbatim: no inspection, no decryption, no re-framing. Every
//! application byte it sees after the peers' handshake is ciphertext.
//! Errors propagate by closing; the relay never retries on a peer's behalf.

pub mod pair;
pub mod session;

pub use pair::{ConnectionPair, EndpointSide, PairRegistry};
pub use session::{AuthError, Clock, Entropy, OsEntropy, Session, SessionManager, SystemClock};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::{
    PAIR_MONITOR_INTERVAL, RELAY_MAX_MESSAGE_SIZE, RELAY_PING_INTERVAL, RELAY_READ_IDLE,
    RELAY_WRITE_DEADLINE, SESSION_SWEEP_INTERVAL,
};

/// Shared state behind every relay route.
#[derive(Clone)]
pub struct RelayState {
    /// The session table.
    pub sessions: Arc<SessionManager>,
    /// The live connection pairs.
    pub pairs: Arc<PairRegistry>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Production state: system clock, OS entropy.
    pub fn new() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            sessions: Arc::new(SessionManager::with_capabilities(
                clock.clone(),
                Arc::new(OsEntropy),
            )),
            pairs: Arc::new(PairRegistry::new(clock)),
        }
    }
}

/// Body of `POST /session/create`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// The path the sharer intends to export.
    pub shared_path: String,
}

/// Response of `POST /session/create`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    /// The minted session id.
    pub session_id: String,
    /// The minted passcode.
    pub passcode: String,
}

#[derive(Debug, Deserialize)]
struct JoinQuery {
    session: String,
}

/// Build the relay router over the given state.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/session/create", post(create_session))
        .route("/share", get(share_join))
        .route("/connect", get(connect_join))
        .with_state(state)
}

/// Run the relay: bind, start the background sweepers, serve until the
/// process ends.
pub async fn serve(listen: SocketAddr, state: RelayState) -> std::io::Result<()> {
    spawn_maintenance(&state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, "relay listening");
    axum::serve(listener, router(state)).await
}

/// Start the session sweeper and the stale-pair monitor.
pub fn spawn_maintenance(state: &RelayState) {
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SESSION_SWEEP_INTERVAL).await;
            sessions.sweep().await;
        }
    });

    let pairs = state.pairs.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(PAIR_MONITOR_INTERVAL).await;
            pairs.remove_stale().await;
        }
    });
}

async fn create_session(
    State(state): State<RelayState>,
    Json(request): Json<CreateSessionRequest>,
) -> Response {
    if request.shared_path.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "shared_path must not be empty").into_response();
    }

    let session = state.sessions.create_session(&request.shared_path).await;
    info!(session_id = %session.id, "session created");
    Json(CreateSessionResponse {
        session_id: session.id,
        passcode: session.passcode,
    })
    .into_response()
}

async fn share_join(
    State(state): State<RelayState>,
    Query(query): Query<JoinQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    join(state, query.session, EndpointSide::Sharer, ws).await
}

async fn connect_join(
    State(state): State<RelayState>,
    Query(query): Query<JoinQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    join(state, query.session, EndpointSide::Connector, ws).await
}

async fn join(
    state: RelayState,
    session_id: String,
    side: EndpointSide,
    ws: WebSocketUpgrade,
) -> Response {
    // Unknown, expired, and locked sessions are rejected before upgrade.
    if !state.sessions.is_live(&session_id).await {
        debug!(session_id = %session_id, "join rejected");
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    }
    state.sessions.touch(&session_id).await;

    ws.max_message_size(RELAY_MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| endpoint_loop(state, session_id, side, socket))
        .into_response()
}

/// Per-endpoint lifecycle: attach to the pair, pump messages to the peer,
/// detach and propagate the close on any failure.
async fn endpoint_loop(state: RelayState, session_id: String, side: EndpointSide, socket: WebSocket) {
    let pair = state.pairs.join(&session_id).await;

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);
    let self_tx = out_tx.clone();
    pair.attach(side, out_tx).await;
    debug!(session_id = %session_id, ?side, "endpoint attached");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: drains the outbound channel onto the socket. A write
    // that misses its deadline kills the connection; there is no queueing
    // beyond the channel itself.
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            match timeout(RELAY_WRITE_DEADLINE, ws_tx.send(message)).await {
                Ok(Ok(())) if !closing => {}
                Ok(Ok(())) => break,
                Ok(Err(e)) => {
                    debug!("relay write failed: {e}");
                    break;
                }
                Err(_) => {
                    warn!("relay write deadline exceeded");
                    break;
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // Read loop: one complete message per iteration, forwarded verbatim to
    // the peer slot. Idle reads and server-side pings share the select.
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + RELAY_PING_INTERVAL,
        RELAY_PING_INTERVAL,
    );
    loop {
        tokio::select! {
            _ = ping.tick() => {
                if self_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            next = timeout(RELAY_READ_IDLE, ws_rx.next()) => {
                let message = match next {
                    Err(_) => {
                        debug!(session_id = %session_id, "read idle timeout");
                        break;
                    }
                    Ok(None) | Ok(Some(Err(_))) => break,
                    Ok(Some(Ok(message))) => message,
                };

                pair.touch(state.pairs.now()).await;
                state.sessions.touch(&session_id).await;

                match message {
                    Message::Binary(data) => {
                        match pair.peer_sender(side).await {
                            Some(peer) => {
                                if peer.send(Message::Binary(data)).await.is_err() {
                                    debug!(session_id = %session_id, "peer writer gone");
                                }
                            }
                            // No queue by design: a frame with nobody on
                            // the other side is dropped.
                            None => debug!(session_id = %session_id, "no peer attached, frame dropped"),
                        }
                    }
                    // Pings are answered by the socket layer; pongs only
                    // refresh the idle clock, which `touch` above did.
                    Message::Ping(_) | Message::Pong(_) | Message::Text(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    // Teardown: vacate the slot, close the peer so the error propagates,
    // drop the pair once both sides are gone.
    pair.detach(side).await;
    if let Some(peer) = pair.peer_sender(side).await {
        let _ = peer.send(Message::Close(None)).await;
    }
    drop(self_tx);
    let _ = writer.await;
    state.pairs.release_if_empty(&session_id).await;
    debug!(session_id = %session_id, ?side, "endpoint detached");
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn_relay() -> (SocketAddr, RelayState) {
        let state = RelayState::new();
        let router = router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (addr, state)
    }

    /// Attachment runs after the upgrade response, so wait for both slots
    /// before pushing the first frame through.
    async fn wait_both_attached(state: &RelayState, session_id: &str) {
        for _ in 0..100 {
            let pair = state.pairs.join(session_id).await;
            if pair.peer_sender(EndpointSide::Sharer).await.is_some()
                && pair.peer_sender(EndpointSide::Connector).await.is_some()
            {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("endpoints never attached");
    }

    #[tokio::test]
    async fn test_create_session_endpoint() {
        let (addr, state) = spawn_relay().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{addr}/session/create"))
            .json(&CreateSessionRequest {
                shared_path: "/srv/data".into(),
            })
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());

        let created: CreateSessionResponse = response.json().await.unwrap();
        assert_eq!(created.session_id.len(), 6);
        assert_eq!(created.passcode.len(), 7);
        assert!(state.sessions.lookup(&created.session_id).await.is_some());
    }

    #[tokio::test]
    async fn test_create_session_rejects_empty_path() {
        let (addr, _state) = spawn_relay().await;
        let response = reqwest::Client::new()
            .post(format!("http://{addr}/session/create"))
            .json(&CreateSessionRequest {
                shared_path: "  ".into(),
            })
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_join_unknown_session_rejected_before_upgrade() {
        let (addr, _state) = spawn_relay().await;
        let result =
            tokio_tungstenite::connect_async(format!("ws://{addr}/share?session=NOSUCH")).await;
        // The upgrade is refused with a 4xx, which surfaces as an error.
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pair_forwards_binary_verbatim() {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let (addr, state) = spawn_relay().await;
        let session = state.sessions.create_session("/srv").await;

        let (mut sharer, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/share?session={}", session.id))
                .await
                .unwrap();
        let (mut connector, _) = tokio_tungstenite::connect_async(format!(
            "ws://{addr}/connect?session={}",
            session.id
        ))
        .await
        .unwrap();
        wait_both_attached(&state, &session.id).await;

        let payload = vec![0xAB; 4096];
        connector
            .send(WsMessage::Binary(payload.clone()))
            .await
            .unwrap();

        // Skip any control frames; the first binary must be byte-identical.
        loop {
            match sharer.next().await.unwrap().unwrap() {
                WsMessage::Binary(data) => {
                    assert_eq!(data, payload);
                    break;
                }
                _ => continue,
            }
        }

        // And the reverse direction.
        sharer.send(WsMessage::Binary(vec![1, 2, 3])).await.unwrap();
        loop {
            match connector.next().await.unwrap().unwrap() {
                WsMessage::Binary(data) => {
                    assert_eq!(data, vec![1, 2, 3]);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_peer_close_propagates() {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let (addr, state) = spawn_relay().await;
        let session = state.sessions.create_session("/srv").await;

        let (sharer, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/share?session={}", session.id))
                .await
                .unwrap();
        let (mut connector, _) = tokio_tungstenite::connect_async(format!(
            "ws://{addr}/connect?session={}",
            session.id
        ))
        .await
        .unwrap();

        drop(sharer);

        // The connector observes a close (or stream end) shortly after.
        loop {
            match connector.next().await {
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    }
}
