//! `rosmcp-middleware` – The Bridge Client
//!
//! Speaks the rosbridge JSON protocol over WebSocket on behalf of callers
//! that only know "list topics", "drive" and "look".
//!
//! # Modules
//!
//! - [`transport`] – The [`BridgeTransport`] seam every higher layer talks to.
//! - [`connection`] – Lazily opened, explicitly closed WebSocket connection
//!   to a `rosbridge_server`.
//! - [`topics`] – `/rosapi/topics` listing and one-shot topic sampling.
//! - [`twist`] – `geometry_msgs/Twist` coercion, single publish and timed
//!   10 Hz playback with a trailing stop command.
//! - [`codec`] – `sensor_msgs/Image` decoding and size-bounded JPEG
//!   compression.
//! - [`camera`] – Camera topic subscriber that saves or compresses a frame.
//! - [`tools`] – [`RobotTools`], one connect → act → close method per tool.

pub mod camera;
pub mod codec;
pub mod connection;
pub mod tools;
pub mod topics;
pub mod transport;
pub mod twist;

#[cfg(test)]
mod test_support;

pub use camera::{ImageSubscriber, SavedFrame};
pub use connection::BridgeConnection;
pub use tools::{Camera, RobotTools, ToolsConfig};
pub use transport::BridgeTransport;
pub use twist::{PlaybackReport, TwistPublisher, TwistStep};
