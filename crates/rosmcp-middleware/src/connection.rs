//! WebSocket connection to a `rosbridge_server`.
//!
//! [`BridgeConnection`] is a lazily opened, explicitly closed handle:
//!
//! 1. **Connect** – opened on first use (or explicitly via
//!    [`BridgeConnection::connect`]); a failed attempt leaves the handle
//!    disconnected and the next call retries from scratch.
//!
//! 2. **Exchange** – outbound [`Envelope`] values are serialised to JSON
//!    text frames; inbound frames are returned raw for the caller to parse.
//!
//! 3. **Teardown** – any transport failure drops the socket before control
//!    returns, so a half-broken stream is never reused.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rosmcp_types::{BridgeError, Envelope};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::transport::BridgeTransport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Granularity of the bounded receive loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A single client connection to the bridge.
pub struct BridgeConnection {
    url: String,
    ws: Option<WsStream>,
}

impl BridgeConnection {
    /// Create a disconnected handle for `url` (e.g. `"ws://127.0.0.1:9090"`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ws: None,
        }
    }

    /// Create a disconnected handle for `ws://host:port`.
    pub fn for_endpoint(host: &str, port: u16) -> Self {
        Self::new(format!("ws://{host}:{port}"))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.ws.is_some()
    }

    /// Open the socket unless it is already open.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] when the handshake fails.  The
    /// handle stays disconnected.
    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        if self.ws.is_some() {
            return Ok(());
        }
        match connect_async(self.url.as_str()).await {
            Ok((ws, _response)) => {
                info!(url = %self.url, "bridge connected");
                self.ws = Some(ws);
                Ok(())
            }
            Err(e) => {
                error!(url = %self.url, error = %e, "bridge connection error");
                Err(BridgeError::Connection(format!("{}: {e}", self.url)))
            }
        }
    }

    /// Read frames until one carries a text payload.
    ///
    /// Control frames are skipped.  A closed stream, a transport error or a
    /// binary frame that is not UTF-8 disconnects the handle and yields
    /// `None`.
    async fn read_message(&mut self) -> Option<String> {
        let ws = self.ws.as_mut()?;
        let failure = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(text.to_string()),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(text),
                    Err(e) => break format!("binary frame is not UTF-8: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => break "closed by peer".to_string(),
                Some(Ok(_)) => continue,
                Some(Err(e)) => break e.to_string(),
            }
        };
        warn!(url = %self.url, error = %failure, "bridge receive error");
        self.ws = None;
        None
    }
}

#[async_trait]
impl BridgeTransport for BridgeConnection {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), BridgeError> {
        let json = match serde_json::to_string(envelope) {
            Ok(json) => json,
            Err(e) => {
                error!(op = envelope.op(), target = envelope.target(), error = %e, "envelope serialisation error");
                self.close().await;
                return Err(BridgeError::Encoding(e.to_string()));
            }
        };

        self.connect().await?;
        let Some(ws) = self.ws.as_mut() else {
            return Err(BridgeError::Connection(format!("{}: not connected", self.url)));
        };

        let written = ws.send(Message::Text(json.into())).await;
        if let Err(e) = written {
            error!(url = %self.url, op = envelope.op(), error = %e, "bridge send error");
            self.ws = None;
            return Err(BridgeError::Connection(format!("send to {}: {e}", self.url)));
        }
        debug!(op = envelope.op(), target = envelope.target(), "envelope sent");
        Ok(())
    }

    async fn recv(&mut self) -> Option<String> {
        if self.connect().await.is_err() {
            return None;
        }
        self.read_message().await
    }

    async fn recv_timeout(&mut self, timeout: Duration) -> Option<String> {
        if self.connect().await.is_err() {
            return None;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!(url = %self.url, timeout_ms = timeout.as_millis() as u64, "receive timed out");
                return None;
            }
            let slice = POLL_INTERVAL.min(deadline - now);
            match tokio::time::timeout(slice, self.read_message()).await {
                Ok(Some(text)) if text.is_empty() => continue,
                Ok(Some(text)) => return Some(text),
                Ok(None) => return None,
                Err(_elapsed) => continue,
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            match ws.close(None).await {
                Ok(()) => info!(url = %self.url, "bridge connection closed"),
                Err(e) => warn!(url = %self.url, error = %e, "bridge close error"),
            }
        }
    }
}
