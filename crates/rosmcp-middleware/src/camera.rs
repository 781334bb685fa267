//! Camera topic subscriber.
//!
//! [`ImageSubscriber`] pulls one `sensor_msgs/Image` from the bridge and
//! either writes it to disk ([`ImageSubscriber::subscribe`]) or turns it into a
//! size-bounded base64 JPEG ([`ImageSubscriber::subscribe_as_base64`]).  Every
//! failure is logged and reported as `None`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use image::DynamicImage;
use rosmcp_types::{BridgeError, CompressedArtifact, Envelope, ImageMessage};
use serde::Deserialize as _;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec::{compress_to_budget, decode_image};
use crate::transport::BridgeTransport;

/// ROS message type requested when subscribing.
pub const IMAGE_MSG_TYPE: &str = "sensor_msgs/Image";

/// A successfully captured and saved frame.
#[derive(Debug, Clone)]
pub struct SavedFrame {
    pub image: DynamicImage,
    pub path: PathBuf,
}

/// Subscribes to a single camera topic.
#[derive(Debug, Clone)]
pub struct ImageSubscriber {
    topic: String,
    output_dir: PathBuf,
}

impl ImageSubscriber {
    /// `output_dir` receives auto-named captures; it is created on demand.
    pub fn new(topic: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            topic: topic.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Receive one frame and save it to `save_path`, or to
    /// `<output_dir>/<YYYYmmdd_HHMMSS>.png` when `None`.
    pub async fn subscribe<T>(&self, conn: &mut T, save_path: Option<&Path>) -> Option<SavedFrame>
    where
        T: BridgeTransport + ?Sized,
    {
        let image = self.receive_frame(conn).await?;
        let path = save_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.timestamped_path());
        match save_image(&image, &path) {
            Ok(()) => {
                info!(topic = %self.topic, path = %path.display(), "image saved");
                Some(SavedFrame { image, path })
            }
            Err(e) => {
                error!(topic = %self.topic, error = %e, "failed to save image");
                None
            }
        }
    }

    /// Receive one frame and compress it to at most `max_size_kb`.
    ///
    /// `None` when nothing was received, the frame did not decode, or no
    /// candidate fits the budget.
    pub async fn subscribe_as_base64<T>(
        &self,
        conn: &mut T,
        max_size_kb: f64,
        quality: u8,
    ) -> Option<CompressedArtifact>
    where
        T: BridgeTransport + ?Sized,
    {
        let image = self.receive_frame(conn).await?;
        match compress_to_budget(&image, max_size_kb, quality) {
            Ok(Some(artifact)) => {
                info!(
                    topic = %self.topic,
                    size = %artifact.compressed_size,
                    quality = artifact.quality,
                    size_kb = artifact.size_kb,
                    "image compressed"
                );
                Some(artifact)
            }
            Ok(None) => {
                warn!(topic = %self.topic, max_size_kb, "no compression setting fits the size budget");
                None
            }
            Err(e) => {
                error!(topic = %self.topic, error = %e, "image compression failed");
                None
            }
        }
    }

    /// Subscribe, read one message, unsubscribe, decode.
    async fn receive_frame<T>(&self, conn: &mut T) -> Option<DynamicImage>
    where
        T: BridgeTransport + ?Sized,
    {
        let id = Uuid::new_v4().to_string();
        let subscribe = Envelope::Subscribe {
            id: id.clone(),
            topic: self.topic.clone(),
            msg_type: Some(IMAGE_MSG_TYPE.to_string()),
        };
        if let Err(e) = conn.send(&subscribe).await {
            error!(topic = %self.topic, error = %e, "image subscribe failed");
            return None;
        }

        let raw = self.next_own_message(conn).await;

        let unsubscribe = Envelope::Unsubscribe {
            id: Some(id),
            topic: self.topic.clone(),
        };
        if let Err(e) = conn.send(&unsubscribe).await {
            warn!(topic = %self.topic, error = %e, "image unsubscribe failed");
        }

        let Some(raw) = raw else {
            warn!(topic = %self.topic, "no data received from subscriber");
            return None;
        };
        match parse_image_envelope(&raw).and_then(|msg| decode_image(&msg)) {
            Ok(image) => Some(image),
            Err(e) => {
                error!(topic = %self.topic, error = %e, "failed to decode image");
                None
            }
        }
    }

    /// Read until a message published on this subscriber's topic arrives.
    ///
    /// Frames for other topics can still be queued on a shared connection
    /// after their unsubscribe; those are dropped.
    async fn next_own_message<T>(&self, conn: &mut T) -> Option<String>
    where
        T: BridgeTransport + ?Sized,
    {
        loop {
            let raw = conn.recv().await?;
            match envelope_topic(&raw) {
                Some(topic) if topic == self.topic => return Some(raw),
                other => {
                    debug!(topic = %self.topic, received = ?other, "skipping message for another topic");
                }
            }
        }
    }

    fn timestamped_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        self.output_dir.join(format!("{stamp}.png"))
    }
}

/// The `topic` field of an inbound envelope, if it has one.
fn envelope_topic(raw: &str) -> Option<String> {
    let json: Value = serde_json::from_str(raw).ok()?;
    json.get("topic").and_then(Value::as_str).map(str::to_string)
}

/// Extract the `msg` body of an inbound image envelope.
pub fn parse_image_envelope(raw: &str) -> Result<ImageMessage, BridgeError> {
    let json: Value =
        serde_json::from_str(raw).map_err(|e| BridgeError::Protocol(format!("invalid JSON: {e}")))?;
    let msg = json
        .get("msg")
        .ok_or_else(|| BridgeError::Protocol("envelope has no 'msg' field".to_string()))?;
    ImageMessage::deserialize(msg).map_err(|e| BridgeError::Protocol(format!("malformed image message: {e}")))
}

/// Write `image` to `path`, creating parent directories.  The format
/// follows the file extension.
pub fn save_image(image: &DynamicImage, path: &Path) -> Result<(), BridgeError> {
    let persist_err = |details: String| BridgeError::Persist {
        path: path.display().to_string(),
        details,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| persist_err(e.to_string()))?;
    }
    image.save(path).map_err(|e| persist_err(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::image_message;
    use crate::test_support::MockTransport;
    use serde_json::json;

    fn image_envelope(width: u32, height: u32, encoding: &str, raw: &[u8]) -> String {
        let msg = image_message(width, height, encoding, raw);
        json!({
            "op": "publish",
            "topic": "/camera/image_raw",
            "msg": {
                "header": { "frame_id": "camera" },
                "height": msg.height,
                "width": msg.width,
                "encoding": msg.encoding,
                "is_bigendian": 0,
                "step": width as usize * raw.len() / (width * height).max(1) as usize,
                "data": msg.data
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn subscribe_saves_png_to_requested_path() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let target = dir.path().join("nested").join("shot.png");
        let raw: Vec<u8> = (0..4 * 3 * 3).map(|i| i as u8).collect();
        let mut conn = MockTransport::with_inbox([image_envelope(4, 3, "rgb8", &raw)]);

        let sub = ImageSubscriber::new("/camera/image_raw", dir.path());
        let saved = sub.subscribe(&mut conn, Some(&target)).await.expect("frame");

        assert_eq!(saved.path, target);
        assert!(target.exists());
        let reloaded = image::open(&target).unwrap().to_rgb8();
        assert_eq!(reloaded.get_pixel(0, 0).0, [0, 1, 2]);
        assert_eq!(conn.sent_ops(), vec!["subscribe", "unsubscribe"]);
        match &conn.sent[0] {
            Envelope::Subscribe { msg_type, .. } => {
                assert_eq!(msg_type.as_deref(), Some(IMAGE_MSG_TYPE))
            }
            other => panic!("expected subscribe, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribe_defaults_to_timestamped_file_in_output_dir() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let out = dir.path().join("screenshots");
        let mut conn = MockTransport::with_inbox([image_envelope(2, 2, "mono8", &[0, 64, 128, 255])]);

        let sub = ImageSubscriber::new("/camera/image_raw", &out);
        let saved = sub.subscribe(&mut conn, None).await.expect("frame");

        assert!(saved.path.starts_with(&out));
        assert_eq!(saved.path.extension().and_then(|e| e.to_str()), Some("png"));
        let stem = saved.path.file_stem().unwrap().to_string_lossy().to_string();
        assert_eq!(stem.len(), "20240101_120000".len());
        assert!(saved.path.exists());
    }

    #[tokio::test]
    async fn subscribe_without_data_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut conn = MockTransport::default();
        let sub = ImageSubscriber::new("/camera/image_raw", dir.path());
        assert!(sub.subscribe(&mut conn, None).await.is_none());
        // The subscription is still torn down.
        assert_eq!(conn.sent_ops(), vec!["subscribe", "unsubscribe"]);
    }

    #[tokio::test]
    async fn subscribe_with_unsupported_encoding_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut conn = MockTransport::with_inbox([image_envelope(1, 1, "rgba8", &[1, 2, 3, 4])]);
        let sub = ImageSubscriber::new("/camera/image_raw", dir.path());
        assert!(sub.subscribe(&mut conn, None).await.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn subscribe_with_short_buffer_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut conn = MockTransport::with_inbox([image_envelope(4, 4, "bgr8", &[0; 10])]);
        let sub = ImageSubscriber::new("/camera/image_raw", dir.path());
        assert!(sub.subscribe(&mut conn, None).await.is_none());
    }

    #[tokio::test]
    async fn base64_returns_artifact_and_unsubscribes() {
        let raw = vec![200u8; 64 * 48 * 3];
        let mut conn = MockTransport::with_inbox([image_envelope(64, 48, "bgr8", &raw)]);
        let sub = ImageSubscriber::new("/camera/image_raw", "unused");

        let artifact = sub.subscribe_as_base64(&mut conn, 700.0, 85).await.expect("artifact");
        assert_eq!(artifact.mime_type, "image/jpeg");
        assert_eq!(artifact.original_size.to_string(), "64x48");
        assert_eq!(artifact.quality, 85);
        assert!(artifact.size_kb <= 700.0);
        assert_eq!(conn.sent_ops(), vec!["subscribe", "unsubscribe"]);
    }

    #[tokio::test]
    async fn base64_over_budget_is_none() {
        let mut state = 1u32;
        let raw: Vec<u8> = (0..320 * 240 * 3)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect();
        let mut conn = MockTransport::with_inbox([image_envelope(320, 240, "rgb8", &raw)]);
        let sub = ImageSubscriber::new("/camera/image_raw", "unused");
        assert!(sub.subscribe_as_base64(&mut conn, 0.5, 85).await.is_none());
    }

    fn tagged_frame(topic: &str, value: u8) -> String {
        let msg = image_message(2, 2, "mono8", &[value; 4]);
        json!({
            "op": "publish",
            "topic": topic,
            "msg": {
                "height": msg.height,
                "width": msg.width,
                "encoding": msg.encoding,
                "data": msg.data
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn stale_frames_from_another_topic_are_skipped() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut conn = MockTransport::with_inbox([
            tagged_frame("/front/image_raw", 10),
            tagged_frame("/front/image_raw", 20),
            tagged_frame("/back/image_raw", 200),
        ]);

        let front = ImageSubscriber::new("/front/image_raw", dir.path());
        let back = ImageSubscriber::new("/back/image_raw", dir.path());

        assert!(front.subscribe_as_base64(&mut conn, 700.0, 85).await.is_some());
        let saved = back
            .subscribe(&mut conn, Some(&dir.path().join("back.png")))
            .await
            .expect("back frame");

        assert_eq!(saved.image.to_luma8().get_pixel(0, 0).0, [200]);
        assert!(conn.inbox.is_empty());
        assert_eq!(
            conn.sent_ops(),
            vec!["subscribe", "unsubscribe", "subscribe", "unsubscribe"]
        );
    }

    #[tokio::test]
    async fn oversized_dimensions_are_a_soft_failure() {
        let frame = json!({
            "op": "publish",
            "topic": "/camera/image_raw",
            "msg": { "height": u32::MAX, "width": u32::MAX, "encoding": "rgb8", "data": "" }
        })
        .to_string();
        let mut conn = MockTransport::with_inbox([frame]);
        let sub = ImageSubscriber::new("/camera/image_raw", "unused");
        assert!(sub.subscribe_as_base64(&mut conn, 700.0, 85).await.is_none());
        assert_eq!(conn.sent_ops(), vec!["subscribe", "unsubscribe"]);
    }

    #[tokio::test]
    async fn only_foreign_frames_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut conn = MockTransport::with_inbox([tagged_frame("/front/image_raw", 1)]);
        let back = ImageSubscriber::new("/back/image_raw", dir.path());
        assert!(back.subscribe(&mut conn, None).await.is_none());
        assert_eq!(conn.sent_ops(), vec!["subscribe", "unsubscribe"]);
    }

    #[test]
    fn parse_image_envelope_requires_msg() {
        assert!(matches!(
            parse_image_envelope(r#"{"op":"publish"}"#),
            Err(BridgeError::Protocol(_))
        ));
        assert!(matches!(
            parse_image_envelope(r#"{"msg":{"height":1}}"#),
            Err(BridgeError::Protocol(_))
        ));
    }
}
