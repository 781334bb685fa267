//! Velocity command publisher.
//!
//! [`TwistPublisher`] turns loosely typed caller input (JSON numbers or
//! numeric strings) into `geometry_msgs/Twist` publish envelopes:
//!
//! * **Single command** – [`TwistPublisher::publish`] coerces, sends and
//!   returns the exact envelope that went out.
//!
//! * **Timed playback** – [`TwistPublisher::play_uniform`] and
//!   [`TwistPublisher::play_steps`] repeat each command at
//!   [`PUBLISH_RATE_HZ`] for its duration and always finish with a stop
//!   command.

use std::time::Duration;

use rosmcp_types::{BridgeError, Envelope, Twist};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::transport::BridgeTransport;

/// Command repetition rate during playback.
pub const PUBLISH_RATE_HZ: u32 = 10;

/// Coerce a JSON scalar to a finite `f64`.
///
/// Numbers pass through, strings are parsed after trimming and booleans map
/// to `1.0` / `0.0`.  Everything else, including `NaN` and infinities, is
/// rejected.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidNumber`] carrying the offending value.
pub fn to_number(value: &Value) -> Result<f64, BridgeError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(BridgeError::InvalidNumber(value.to_string())),
    }
}

/// Coerce exactly three components.
fn to_vector(label: &str, values: &[Value]) -> Result<[f64; 3], BridgeError> {
    let [x, y, z] = values else {
        return Err(BridgeError::InvalidNumber(format!(
            "{label} must have 3 components, got {}",
            values.len()
        )));
    };
    Ok([to_number(x)?, to_number(y)?, to_number(z)?])
}

/// One step of a playback sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwistStep {
    pub twist: Twist,
    pub duration: Duration,
}

/// Outcome of a playback run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Commands sent, including the trailing stop.
    pub commands_sent: usize,
    /// `true` when the stop signal ended playback early.
    pub cancelled: bool,
}

/// Publishes `geometry_msgs/Twist` on a fixed topic.
#[derive(Debug, Clone)]
pub struct TwistPublisher {
    topic: String,
}

impl TwistPublisher {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Build the publish envelope for `twist` without sending it.
    pub fn envelope(&self, twist: &Twist) -> Result<Envelope, BridgeError> {
        let msg = serde_json::to_value(twist).map_err(|e| BridgeError::Encoding(e.to_string()))?;
        Ok(Envelope::Publish {
            topic: self.topic.clone(),
            msg,
        })
    }

    /// Coerce `linear` / `angular`, publish once and return the envelope sent.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidNumber`] before any I/O when a component does not
    /// coerce; transport errors from the send.
    pub async fn publish<T>(
        &self,
        conn: &mut T,
        linear: &[Value],
        angular: &[Value],
    ) -> Result<Envelope, BridgeError>
    where
        T: BridgeTransport + ?Sized,
    {
        let twist = Twist::planar(to_vector("linear", linear)?, to_vector("angular", angular)?);
        self.send_twist(conn, &twist).await
    }

    async fn send_twist<T>(&self, conn: &mut T, twist: &Twist) -> Result<Envelope, BridgeError>
    where
        T: BridgeTransport + ?Sized,
    {
        let envelope = self.envelope(twist)?;
        conn.send(&envelope).await?;
        Ok(envelope)
    }

    /// Hold one command for each entry of `durations`, in order.
    ///
    /// All input is validated before the first publish.
    pub async fn play_uniform<T>(
        &self,
        conn: &mut T,
        linear: &[Value],
        angular: &[Value],
        durations: &[Value],
        stop: watch::Receiver<bool>,
    ) -> Result<PlaybackReport, BridgeError>
    where
        T: BridgeTransport + ?Sized,
    {
        let twist = Twist::planar(to_vector("linear", linear)?, to_vector("angular", angular)?);
        let steps = durations
            .iter()
            .map(|d| Ok(TwistStep { twist, duration: to_duration(d)? }))
            .collect::<Result<Vec<_>, BridgeError>>()?;
        self.play(conn, &steps, stop).await
    }

    /// Pair `linear_seq[i]`, `angular_seq[i]` with `durations[i]`.
    ///
    /// Entries beyond the shortest of the three lists are ignored.  All
    /// consumed input is validated before the first publish.
    pub async fn play_steps<T>(
        &self,
        conn: &mut T,
        linear_seq: &[Vec<Value>],
        angular_seq: &[Vec<Value>],
        durations: &[Value],
        stop: watch::Receiver<bool>,
    ) -> Result<PlaybackReport, BridgeError>
    where
        T: BridgeTransport + ?Sized,
    {
        let steps = linear_seq
            .iter()
            .zip(angular_seq)
            .zip(durations)
            .map(|((l, a), d)| {
                Ok(TwistStep {
                    twist: Twist::planar(to_vector("linear", l)?, to_vector("angular", a)?),
                    duration: to_duration(d)?,
                })
            })
            .collect::<Result<Vec<_>, BridgeError>>()?;
        self.play(conn, &steps, stop).await
    }

    /// Repeat each step's command at [`PUBLISH_RATE_HZ`] until its duration
    /// has elapsed, then publish [`Twist::stop`].
    ///
    /// The stop command is sent on every exit path: normal completion,
    /// cancellation through `stop`, and a failed publish mid-sequence.
    pub async fn play<T>(
        &self,
        conn: &mut T,
        steps: &[TwistStep],
        mut stop: watch::Receiver<bool>,
    ) -> Result<PlaybackReport, BridgeError>
    where
        T: BridgeTransport + ?Sized,
    {
        let tick = Duration::from_secs(1) / PUBLISH_RATE_HZ;
        let mut sent = 0usize;
        let mut cancelled = false;
        let mut failure = None;

        'steps: for (index, step) in steps.iter().enumerate() {
            info!(
                topic = %self.topic,
                step = index,
                linear_x = step.twist.linear.x,
                angular_z = step.twist.angular.z,
                duration_ms = step.duration.as_millis() as u64,
                "playing twist step"
            );
            let started = Instant::now();
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if stop_requested(&stop) {
                    cancelled = true;
                    break 'steps;
                }
                // The first tick of an interval completes immediately.
                if !wait_tick(&mut ticker, &mut stop).await {
                    cancelled = true;
                    break 'steps;
                }
                if started.elapsed() >= step.duration {
                    break;
                }
                if let Err(e) = self.send_twist(conn, &step.twist).await {
                    failure = Some(e);
                    break 'steps;
                }
                sent += 1;
            }
        }

        if cancelled {
            warn!(topic = %self.topic, "twist playback cancelled");
        }
        match self.send_twist(conn, &Twist::stop()).await {
            Ok(_) => sent += 1,
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "failed to send trailing stop command");
                failure.get_or_insert(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(PlaybackReport {
                commands_sent: sent,
                cancelled,
            }),
        }
    }
}

/// Coerce a duration in seconds; negative or unrepresentable values are
/// rejected.
fn to_duration(value: &Value) -> Result<Duration, BridgeError> {
    let secs = to_number(value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| {
        BridgeError::InvalidNumber(format!(
            "duration {value} must be a non-negative number of seconds in range"
        ))
    })
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

/// Wait for the next tick.  Returns `false` when `stop` fired first.
///
/// A stop channel whose sender is gone can never fire, so it degrades to a
/// plain tick.
async fn wait_tick(ticker: &mut tokio::time::Interval, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = ticker.tick() => true,
        changed = stop.changed() => {
            match changed {
                Ok(()) if *stop.borrow() => false,
                Ok(()) => {
                    ticker.tick().await;
                    true
                }
                Err(_) => {
                    ticker.tick().await;
                    true
                }
            }
        }
    }
}

/// A stop receiver that never fires, for callers without an interrupt source.
pub fn never_stop() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}
