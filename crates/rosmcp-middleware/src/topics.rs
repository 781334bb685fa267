//! Request/response helpers on top of a [`BridgeTransport`].
//!
//! Both calls narrow every failure to an empty result and a log line; the
//! caller only ever sees "data" or "no data".

use std::collections::HashSet;
use std::time::Duration;

use rosmcp_types::{Envelope, TopicDescriptor};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::transport::BridgeTransport;

/// rosapi introspection service that lists topics and their types.
pub const TOPICS_SERVICE: &str = "/rosapi/topics";

/// Correlation id used for every topic listing request.
pub const TOPICS_REQUEST_ID: &str = "get_topics_request_1";

/// List the topics known to the bridge.
///
/// Returns an empty list when the call fails, the response is malformed or
/// the `topics` / `types` arrays differ in length.  Duplicate names keep
/// their first type.
pub async fn list_topics<T>(conn: &mut T) -> Vec<TopicDescriptor>
where
    T: BridgeTransport + ?Sized,
{
    let request = Envelope::CallService {
        service: TOPICS_SERVICE.to_string(),
        id: TOPICS_REQUEST_ID.to_string(),
    };
    if let Err(e) = conn.send(&request).await {
        warn!(service = TOPICS_SERVICE, error = %e, "topic listing request failed");
        return Vec::new();
    }
    let Some(raw) = conn.recv().await else {
        warn!(service = TOPICS_SERVICE, "no response to topic listing");
        return Vec::new();
    };
    parse_topic_listing(&raw).unwrap_or_default()
}

/// Parse a `/rosapi/topics` service response.
///
/// Returns `None` when the response is not a usable listing.
pub fn parse_topic_listing(raw: &str) -> Option<Vec<TopicDescriptor>> {
    let json: Value = match serde_json::from_str(raw) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "topic listing is not valid JSON");
            return None;
        }
    };
    if json.get("result").and_then(Value::as_bool) == Some(false) {
        warn!(response = %json, "topic listing service reported failure");
        return None;
    }
    let values = json.get("values")?;
    let topics = string_array(values.get("topics")?)?;
    let types = string_array(values.get("types")?)?;

    if topics.len() != types.len() {
        warn!(
            topics = topics.len(),
            types = types.len(),
            "mismatch in topics and types length"
        );
        return None;
    }

    let mut seen = HashSet::new();
    let listing = topics
        .into_iter()
        .zip(types)
        .filter(|(name, _)| seen.insert(name.clone()))
        .map(|(name, msg_type)| TopicDescriptor { name, msg_type })
        .collect();
    Some(listing)
}

fn string_array(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Take a single sample from `topic`.
///
/// Subscribes under a fresh correlation id, waits up to `timeout`, then
/// unsubscribes whether or not a message arrived.  Returns the parsed
/// inbound envelope.
pub async fn subscribe_once<T>(conn: &mut T, topic: &str, timeout: Duration) -> Option<Value>
where
    T: BridgeTransport + ?Sized,
{
    let id = Uuid::new_v4().to_string();
    let subscribe = Envelope::Subscribe {
        id: id.clone(),
        topic: topic.to_string(),
        msg_type: None,
    };

    let raw = match conn.send(&subscribe).await {
        Ok(()) => conn.recv_timeout(timeout).await,
        Err(e) => {
            warn!(topic, error = %e, "subscribe failed");
            None
        }
    };

    let unsubscribe = Envelope::Unsubscribe {
        id: Some(id),
        topic: topic.to_string(),
    };
    if let Err(e) = conn.send(&unsubscribe).await {
        warn!(topic, error = %e, "unsubscribe failed");
    }

    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(value) => {
            debug!(topic, "sampled topic");
            Some(value)
        }
        Err(e) => {
            warn!(topic, error = %e, "sampled message is not valid JSON");
            None
        }
    }
}
