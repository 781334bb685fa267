//! The transport seam.
//!
//! Everything above the socket (the topic facade, the twist publisher, the
//! camera subscriber) talks to the bridge through [`BridgeTransport`].  The
//! production implementation is
//! [`BridgeConnection`][crate::connection::BridgeConnection]; tests swap in
//! an in-memory double.

use std::time::Duration;

use async_trait::async_trait;
use rosmcp_types::{BridgeError, Envelope};

/// A duplex, message-oriented link to a rosbridge endpoint.
///
/// # Contract
///
/// * `send` – serialise `envelope` and write it as one message.  Any failure
///   leaves the transport disconnected.
///
/// * `recv` – one blocking read.  Returns `None` (never an error) when
///   nothing was read; the transport is disconnected afterwards.
///
/// * `recv_timeout` – like `recv`, but gives up once `timeout` has elapsed.
///
/// * `close` – idempotent teardown.
#[async_trait]
pub trait BridgeTransport: Send {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), BridgeError>;

    async fn recv(&mut self) -> Option<String>;

    async fn recv_timeout(&mut self, timeout: Duration) -> Option<String>;

    async fn close(&mut self);
}
