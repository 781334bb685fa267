//! Tool-facing facade.
//!
//! [`RobotTools`] owns the bridge endpoint and topic names and exposes one
//! method per robot tool.  Each call opens a fresh [`BridgeConnection`],
//! does its work and closes the connection before returning, whatever the
//! outcome.  Results are JSON objects carrying a `status` of `"success"`,
//! `"cancelled"` or `"error"` so they can be handed straight to a client.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rosmcp_types::{BridgeError, CompressedArtifact};
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::camera::ImageSubscriber;
use crate::connection::BridgeConnection;
use crate::topics;
use crate::transport::BridgeTransport;
use crate::twist::{PlaybackReport, TwistPublisher, never_stop};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Endpoint, topic names and defaults used by [`RobotTools`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolsConfig {
    /// WebSocket URL of the rosbridge server, e.g. `ws://127.0.0.1:9090`.
    pub bridge_url: String,
    pub cmd_vel_topic: String,
    pub front_camera_topic: String,
    pub back_camera_topic: String,
    /// Directory for captures saved without an explicit path.
    pub output_dir: PathBuf,
    /// Default budget for a single base64 image.
    pub max_image_kb: f64,
    /// Default per-image budget when both cameras are captured together.
    pub pair_max_image_kb: f64,
    pub jpeg_quality: u8,
    pub sample_timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bridge_url: "ws://127.0.0.1:9090".to_string(),
            cmd_vel_topic: "/kachaka/manual_control/cmd_vel".to_string(),
            front_camera_topic: "/kachaka/front_camera/image_raw".to_string(),
            back_camera_topic: "/kachaka/back_camera/image_raw".to_string(),
            output_dir: PathBuf::from("screenshots"),
            max_image_kb: 700.0,
            pair_max_image_kb: 400.0,
            jpeg_quality: 85,
            sample_timeout: Duration::from_secs(3),
        }
    }
}

/// Which of the robot's two cameras to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Camera {
    Front,
    Back,
}

impl Camera {
    pub fn as_str(self) -> &'static str {
        match self {
            Camera::Front => "front",
            Camera::Back => "back",
        }
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Camera {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(Camera::Front),
            "back" => Ok(Camera::Back),
            other => Err(format!("unknown camera '{other}' (expected 'front' or 'back')")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RobotTools
// ─────────────────────────────────────────────────────────────────────────────

/// One method per robot tool, each scoped to its own bridge connection.
#[derive(Debug, Clone)]
pub struct RobotTools {
    config: ToolsConfig,
    stop: watch::Receiver<bool>,
}

impl RobotTools {
    pub fn new(config: ToolsConfig) -> Self {
        Self {
            config,
            stop: never_stop(),
        }
    }

    /// Attach the signal that interrupts twist sequence playback.
    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn config(&self) -> &ToolsConfig {
        &self.config
    }

    fn connection(&self) -> BridgeConnection {
        BridgeConnection::new(self.config.bridge_url.as_str())
    }

    fn publisher(&self) -> TwistPublisher {
        TwistPublisher::new(self.config.cmd_vel_topic.as_str())
    }

    fn subscriber(&self, camera: Camera) -> ImageSubscriber {
        let topic = match camera {
            Camera::Front => &self.config.front_camera_topic,
            Camera::Back => &self.config.back_camera_topic,
        };
        ImageSubscriber::new(topic.as_str(), self.config.output_dir.as_path())
    }

    /// `{status, topics, types}`, or an error outcome when the bridge
    /// returned nothing usable.
    pub async fn list_topics(&self) -> Value {
        let mut conn = self.connection();
        let listing = topics::list_topics(&mut conn).await;
        conn.close().await;

        if listing.is_empty() {
            return error_outcome("No topics found");
        }
        let (names, types): (Vec<String>, Vec<String>) =
            listing.into_iter().map(|t| (t.name, t.msg_type)).unzip();
        info!(count = names.len(), "listed topics");
        json!({ "status": "success", "topics": names, "types": types })
    }

    /// Publish a single velocity command.
    pub async fn publish_twist(&self, linear: &[Value], angular: &[Value]) -> Value {
        let mut conn = self.connection();
        let result = self.publisher().publish(&mut conn, linear, angular).await;
        conn.close().await;

        match result {
            Ok(envelope) => json!({
                "status": "success",
                "message": "Twist message published successfully",
                "published": envelope,
            }),
            Err(e) => {
                warn!(topic = %self.config.cmd_vel_topic, error = %e, "twist publish failed");
                error_outcome(e.to_string())
            }
        }
    }

    /// Hold one command for each of `durations` (seconds), then stop.
    pub async fn publish_twist_sequence(
        &self,
        linear: &[Value],
        angular: &[Value],
        durations: &[Value],
    ) -> Value {
        let mut conn = self.connection();
        let result = self
            .publisher()
            .play_uniform(&mut conn, linear, angular, durations, self.stop.clone())
            .await;
        conn.close().await;
        self.playback_outcome(result)
    }

    /// Play `(linear_seq[i], angular_seq[i])` for `durations[i]` seconds
    /// each, then stop.
    pub async fn publish_twist_steps(
        &self,
        linear_seq: &[Vec<Value>],
        angular_seq: &[Vec<Value>],
        durations: &[Value],
    ) -> Value {
        let mut conn = self.connection();
        let result = self
            .publisher()
            .play_steps(&mut conn, linear_seq, angular_seq, durations, self.stop.clone())
            .await;
        conn.close().await;
        self.playback_outcome(result)
    }

    fn playback_outcome(&self, result: Result<PlaybackReport, BridgeError>) -> Value {
        match result {
            Ok(report) if report.cancelled => json!({
                "status": "cancelled",
                "message": "Twist sequence interrupted; stop command sent",
                "commands_sent": report.commands_sent,
            }),
            Ok(report) => json!({
                "status": "success",
                "message": "Twist sequence message published successfully",
                "commands_sent": report.commands_sent,
            }),
            Err(e) => {
                warn!(topic = %self.config.cmd_vel_topic, error = %e, "twist sequence failed");
                error_outcome(e.to_string())
            }
        }
    }

    /// Grab one frame from `camera` and save it to `path`, or to a
    /// timestamped PNG in the output directory.
    pub async fn capture(&self, camera: Camera, path: Option<&Path>) -> Value {
        let mut conn = self.connection();
        let saved = self.subscriber(camera).subscribe(&mut conn, path).await;
        conn.close().await;

        match saved {
            Some(frame) => json!({
                "status": "success",
                "camera": camera.as_str(),
                "path": frame.path.display().to_string(),
                "width": frame.image.width(),
                "height": frame.image.height(),
            }),
            None => error_outcome(format!("Failed to capture {camera} camera image")),
        }
    }

    /// One frame from `camera` as base64 JPEG within `max_size_kb`
    /// (defaults to the configured single-image budget).
    pub async fn camera_image_base64(&self, camera: Camera, max_size_kb: Option<f64>) -> Value {
        let budget = max_size_kb.unwrap_or(self.config.max_image_kb);
        let mut conn = self.connection();
        let artifact = self
            .subscriber(camera)
            .subscribe_as_base64(&mut conn, budget, self.config.jpeg_quality)
            .await;
        conn.close().await;

        match artifact {
            Some(artifact) => artifact_outcome(camera, &artifact),
            None => error_outcome("Failed to capture or compress the camera image"),
        }
    }

    /// Front then back frame over a single connection.  Succeeds when at
    /// least one camera produced an artifact.
    pub async fn both_cameras_base64(&self, max_size_kb: Option<f64>) -> Value {
        let budget = max_size_kb.unwrap_or(self.config.pair_max_image_kb);
        let mut conn = self.connection();
        let mut cameras = Map::new();
        for camera in [Camera::Front, Camera::Back] {
            let artifact = self
                .subscriber(camera)
                .subscribe_as_base64(&mut conn, budget, self.config.jpeg_quality)
                .await;
            let Some(artifact) = artifact else {
                continue;
            };
            match serde_json::to_value(&artifact) {
                Ok(value) => {
                    cameras.insert(camera.as_str().to_string(), value);
                }
                Err(e) => warn!(camera = %camera, error = %e, "failed to serialise image artifact"),
            }
        }
        conn.close().await;

        if cameras.is_empty() {
            return error_outcome("Failed to capture camera images");
        }
        json!({ "status": "success", "cameras": cameras })
    }

    /// Take one message from `topic` within `timeout` (defaults to the
    /// configured sample timeout) and return its `msg` body.
    pub async fn sample_topic(&self, topic: &str, timeout: Option<Duration>) -> Value {
        let timeout = timeout.unwrap_or(self.config.sample_timeout);
        let mut conn = self.connection();
        let sample = topics::subscribe_once(&mut conn, topic, timeout).await;
        conn.close().await;

        match sample.as_ref().and_then(|v| v.get("msg")) {
            Some(msg) => json!({ "status": "success", "topic": topic, "msg": msg }),
            None => error_outcome(format!("No message received on {topic}")),
        }
    }
}

fn error_outcome(message: impl Into<String>) -> Value {
    json!({ "status": "error", "message": message.into() })
}

/// Flatten `artifact` into a success outcome tagged with `camera`.
fn artifact_outcome(camera: Camera, artifact: &CompressedArtifact) -> Value {
    match serde_json::to_value(artifact) {
        Ok(Value::Object(mut fields)) => {
            fields.insert("status".to_string(), Value::from("success"));
            fields.insert("camera".to_string(), Value::from(camera.as_str()));
            Value::Object(fields)
        }
        Ok(_) | Err(_) => error_outcome("Failed to serialise the image artifact"),
    }
}
