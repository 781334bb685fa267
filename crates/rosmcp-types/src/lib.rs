use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One outbound rosbridge protocol message.
///
/// Serialises to the flat JSON object the bridge expects, with the variant
/// name carried in the `op` field (`publish`, `subscribe`, `unsubscribe`,
/// `call_service`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Envelope {
    /// Publish `msg` on `topic`.
    Publish { topic: String, msg: Value },
    /// Start streaming `topic` to this connection.
    Subscribe {
        id: String,
        topic: String,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        msg_type: Option<String>,
    },
    /// Stop a subscription previously opened with the same `id`.
    Unsubscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        topic: String,
    },
    /// Invoke a bridge-side service; the response carries the same `id`.
    CallService { service: String, id: String },
}

impl Envelope {
    /// The topic or service name this envelope addresses.
    pub fn target(&self) -> &str {
        match self {
            Envelope::Publish { topic, .. }
            | Envelope::Subscribe { topic, .. }
            | Envelope::Unsubscribe { topic, .. } => topic,
            Envelope::CallService { service, .. } => service,
        }
    }

    /// The wire `op` tag.
    pub fn op(&self) -> &'static str {
        match self {
            Envelope::Publish { .. } => "publish",
            Envelope::Subscribe { .. } => "subscribe",
            Envelope::Unsubscribe { .. } => "unsubscribe",
            Envelope::CallService { .. } => "call_service",
        }
    }
}

/// A (name, type) pair returned by the topic listing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub msg_type: String,
}

/// `geometry_msgs/Vector3`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// `geometry_msgs/Twist` as sent to a differential-drive base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

impl Twist {
    /// Build a planar drive command from full 3-component vectors.
    ///
    /// Only `linear[0]` (forward speed) and `angular[2]` (yaw rate) reach the
    /// base; the remaining components are always transmitted as zero.
    pub fn planar(linear: [f64; 3], angular: [f64; 3]) -> Self {
        Self {
            linear: Vector3 {
                x: linear[0],
                ..Vector3::default()
            },
            angular: Vector3 {
                z: angular[2],
                ..Vector3::default()
            },
        }
    }

    /// The all-zero command.
    pub fn stop() -> Self {
        Self::default()
    }

    pub fn is_stop(&self) -> bool {
        *self == Self::default()
    }
}

/// Pixel layouts accepted from `sensor_msgs/Image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    Rgb8,
    Bgr8,
    Mono8,
}

impl ImageEncoding {
    /// Bytes per pixel.
    pub fn channels(self) -> usize {
        match self {
            ImageEncoding::Rgb8 | ImageEncoding::Bgr8 => 3,
            ImageEncoding::Mono8 => 1,
        }
    }
}

impl FromStr for ImageEncoding {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rgb8" => Ok(ImageEncoding::Rgb8),
            "bgr8" => Ok(ImageEncoding::Bgr8),
            "mono8" => Ok(ImageEncoding::Mono8),
            other => Err(BridgeError::UnsupportedEncoding(other.to_string())),
        }
    }
}

impl fmt::Display for ImageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageEncoding::Rgb8 => write!(f, "rgb8"),
            ImageEncoding::Bgr8 => write!(f, "bgr8"),
            ImageEncoding::Mono8 => write!(f, "mono8"),
        }
    }
}

/// The `msg` body of an inbound `sensor_msgs/Image` envelope.
///
/// Fields other than these four (`header`, `step`, `is_bigendian`) are
/// ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageMessage {
    pub height: u32,
    pub width: u32,
    pub encoding: String,
    /// Base64-encoded raw pixel buffer.
    pub data: String,
}

/// Width × height, rendered as `"WxH"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<Resolution> for String {
    fn from(r: Resolution) -> Self {
        r.to_string()
    }
}

impl TryFrom<String> for Resolution {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| format!("resolution '{s}' is not of the form WxH"))?;
        let width = w.parse().map_err(|_| format!("bad width in '{s}'"))?;
        let height = h.parse().map_err(|_| format!("bad height in '{s}'"))?;
        Ok(Self { width, height })
    }
}

/// A size-bounded, text-safe encoding of one camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedArtifact {
    pub image_base64: String,
    pub mime_type: String,
    pub original_size: Resolution,
    pub compressed_size: Resolution,
    pub quality: u8,
    /// Length of `image_base64` in kilobytes, rounded to two decimals.
    pub size_kb: f64,
}

/// Errors raised anywhere between the caller and the bridge socket.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Bridge Connection Error: {0}")]
    Connection(String),

    #[error("Invalid number value: {0}")]
    InvalidNumber(String),

    #[error("Envelope Encoding Error: {0}")]
    Encoding(String),

    #[error("Bridge Protocol Error: {0}")]
    Protocol(String),

    #[error("Unsupported image encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Image Decode Error: {0}")]
    ImageDecode(String),

    #[error("Image Encode Error: {0}")]
    ImageEncode(String),

    #[error("Failed to persist image to {path}: {details}")]
    Persist { path: String, details: String },
}
