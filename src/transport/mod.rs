//! Message-oriented transport under the tunnel.
//!
//! The tunnel only needs two capabilities: push one complete message, pull
//! one complete message. Production traffic rides a client WebSocket stream
//! split into halves; tests ride an in-memory channel pair. Deadlines are
//! applied by the tunnel, not here.

pub mod tunnel;

pub use tunnel::Tunnel;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::core::TransportError;

/// Write half of a message transport.
#[async_trait]
pub trait MessageSink: Send {
    /// Write one complete message.
    async fn send_msg(&mut self, data: Vec<u8>) -> Result<(), TransportError>;

    /// Close the transport for writing.
    async fn close_msg(&mut self) -> Result<(), TransportError>;
}

/// Read half of a message transport.
#[async_trait]
pub trait MessageSource: Send {
    /// Read one complete message; `Ok(None)` on clean end of stream.
    async fn recv_msg(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a relay WebSocket connection.
pub struct WsSink {
    inner: futures_util::stream::SplitSink<WsStream, Message>,
}

/// Read half of a relay WebSocket connection.
pub struct WsSource {
    inner: futures_util::stream::SplitStream<WsStream>,
}

/// Dial a relay endpoint and split the connection.
pub async fn connect(url: &str) -> Result<(WsSink, WsSource), TransportError> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|e| TransportError::Ws(e.to_string()))?;
    let (sink, source) = stream.split();
    Ok((WsSink { inner: sink }, WsSource { inner: source }))
}

/// Build the WebSocket URL for a relay join endpoint from the relay's base
/// URL (`http://`, `https://`, `ws://`, or `wss://`).
pub fn join_url(relay_url: &str, endpoint: &str, session_id: &str) -> String {
    let base = relay_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/{endpoint}?session={session_id}")
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send_msg(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        self.inner
            .send(Message::Binary(data))
            .await
            .map_err(|e| TransportError::Ws(e.to_string()))
    }

    async fn close_msg(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::Ws(e.to_string()))
    }
}

#[async_trait]
impl MessageSource for WsSource {
    async fn recv_msg(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        // Control frames are transport noise; only data frames surface.
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::Ws(e.to_string())),
            }
        }
    }
}

/// In-memory message transport for tests: two connected endpoints backed by
/// bounded channels.
pub mod memory {
    use super::*;

    /// Write half of an in-memory transport.
    pub struct MemorySink {
        tx: Option<mpsc::Sender<Vec<u8>>>,
    }

    /// Read half of an in-memory transport.
    pub struct MemorySource {
        rx: mpsc::Receiver<Vec<u8>>,
    }

    /// One endpoint of an in-memory duplex connection.
    pub type MemoryEndpoint = (MemorySink, MemorySource);

    /// Create a connected pair of in-memory endpoints.
    pub fn duplex_pair() -> (MemoryEndpoint, MemoryEndpoint) {
        let (a_tx, b_rx) = mpsc::channel(32);
        let (b_tx, a_rx) = mpsc::channel(32);
        (
            (MemorySink { tx: Some(a_tx) }, MemorySource { rx: a_rx }),
            (MemorySink { tx: Some(b_tx) }, MemorySource { rx: b_rx }),
        )
    }

    #[async_trait]
    impl MessageSink for MemorySink {
        async fn send_msg(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
            match &self.tx {
                Some(tx) => tx.send(data).await.map_err(|_| TransportError::Closed),
                None => Err(TransportError::Closed),
            }
        }

        async fn close_msg(&mut self) -> Result<(), TransportError> {
            self.tx.take();
            Ok(())
        }
    }

    #[async_trait]
    impl MessageSource for MemorySource {
        async fn recv_msg(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(self.rx.recv().await)
        }
    }
}
