//! Test doubles shared by the unit tests in this crate.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rosmcp_types::{BridgeError, Envelope};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use crate::transport::BridgeTransport;

/// A reply the mock bridge interprets as "send a Close frame and hang up".
pub(crate) const CLOSE_SENTINEL: &str = "__close__";

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

/// Records every envelope it is asked to send and replays queued inbound
/// messages.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub sent: Vec<Envelope>,
    pub inbox: VecDeque<String>,
    /// Number of successful sends after which every send fails.
    pub fail_after: Option<usize>,
}

impl MockTransport {
    pub fn with_inbox(messages: impl IntoIterator<Item = String>) -> Self {
        Self {
            inbox: messages.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn sent_ops(&self) -> Vec<&'static str> {
        self.sent.iter().map(Envelope::op).collect()
    }
}

#[async_trait]
impl BridgeTransport for MockTransport {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), BridgeError> {
        if self.fail_after.is_some_and(|n| self.sent.len() >= n) {
            return Err(BridgeError::Connection("mock send failure".to_string()));
        }
        serde_json::to_string(envelope).map_err(|e| BridgeError::Encoding(e.to_string()))?;
        self.sent.push(envelope.clone());
        Ok(())
    }

    async fn recv(&mut self) -> Option<String> {
        self.inbox.pop_front()
    }

    async fn recv_timeout(&mut self, timeout: Duration) -> Option<String> {
        match self.inbox.pop_front() {
            Some(msg) => Some(msg),
            None => {
                tokio::time::sleep(timeout).await;
                None
            }
        }
    }

    async fn close(&mut self) {}
}

// ---------------------------------------------------------------------------
// Loopback WebSocket bridge
// ---------------------------------------------------------------------------

/// A `rosbridge_server` stand-in listening on an ephemeral loopback port.
pub(crate) struct MockBridge {
    pub url: String,
    received: mpsc::UnboundedReceiver<Value>,
}

impl MockBridge {
    /// Wait (bounded) for the next JSON message a client sent.
    pub async fn next_received(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("mock bridge saw no message within 5s")
            .expect("mock bridge channel closed")
    }
}

/// Start a mock bridge.  `respond` is called for every inbound JSON message
/// and returns the text frames to send back.
pub(crate) async fn spawn_mock_bridge<F>(respond: F) -> MockBridge
where
    F: Fn(&Value) -> Vec<String> + Send + Sync + 'static,
{
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("bind mock bridge");
    let addr = listener.local_addr().expect("local addr");
    let (tx, received) = mpsc::unbounded_channel();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            let tx = tx.clone();
            let respond = Arc::clone(&respond);
            tokio::spawn(async move {
                let Ok(ws) = accept_async(stream).await else {
                    return;
                };
                let (mut ws_tx, mut ws_rx) = ws.split();
                while let Some(Ok(msg)) = ws_rx.next().await {
                    let Message::Text(text) = msg else {
                        continue;
                    };
                    let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    let replies = respond(&value);
                    let _ = tx.send(value);
                    for reply in replies {
                        if reply == CLOSE_SENTINEL {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            return;
                        }
                        if ws_tx.send(Message::Text(reply.into())).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    MockBridge {
        url: format!("ws://{addr}"),
        received,
    }
}
