//! Per-tag acquisition state and the snapshot it publishes each tick.

use serde::{Deserialize, Serialize};

use crate::error::SensorError;
use crate::filters::{FusionEngine, MadgwickConfig};
use crate::orientation::yaw_degrees;
use crate::sensors::{Notification, SensorStream};
use crate::types::{Quaternion, TagId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagStatus {
    /// Subscribed, nothing published yet.
    Connecting,
    /// Connected, no non-degenerate triple fused yet.
    WarmingUp,
    Ready,
    /// Connection lost; a reconnect is scheduled.
    Disconnected,
    /// Reconnect attempts exhausted.
    Failed,
}

impl TagStatus {
    /// Terminal for the rest of the run.
    pub fn is_settled(&self) -> bool {
        matches!(self, TagStatus::Ready | TagStatus::Failed)
    }
}

/// Immutable view of one tag, handed from its acquisition task to the
/// aggregator through a `watch` channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TagSnapshot {
    pub status: TagStatus,
    pub quaternion: Quaternion,
    pub fused_updates: u64,
    pub notifications: u64,
    pub rejected: u64,
    /// Bumped on every connection-state change made by the supervisor.
    pub epoch: u64,
    pub reconnects: u32,
}

impl TagSnapshot {
    pub fn connecting(epoch: u64, reconnects: u32) -> Self {
        Self {
            status: TagStatus::Connecting,
            quaternion: Quaternion::IDENTITY,
            fused_updates: 0,
            notifications: 0,
            rejected: 0,
            epoch,
            reconnects,
        }
    }

    /// Yaw to emit, or `None` while the tag is not ready.
    pub fn yaw_degrees(&self) -> Option<f64> {
        (self.status == TagStatus::Ready).then(|| yaw_degrees(&self.quaternion))
    }
}

/// State owned by exactly one acquisition task for the lifetime of one
/// connection. A reconnect starts from a fresh `TagState`.
pub struct TagState {
    id: TagId,
    engine: FusionEngine,
    stream: SensorStream,
    ready: bool,
    epoch: u64,
    reconnects: u32,
    notifications: u64,
}

impl TagState {
    pub fn new(id: TagId, config: &MadgwickConfig, epoch: u64, reconnects: u32) -> Self {
        Self {
            id,
            engine: FusionEngine::from_config(config),
            stream: SensorStream::new(),
            ready: false,
            epoch,
            reconnects,
            notifications: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn engine(&self) -> &FusionEngine {
        &self.engine
    }

    pub fn stream(&self) -> &SensorStream {
        &self.stream
    }

    pub fn apply(&mut self, notification: &Notification) -> Result<(), SensorError> {
        self.notifications += 1;
        self.stream.apply(notification)
    }

    /// Run one filter step on the latest triple.
    ///
    /// Returns `true` on the step that completes warm-up.
    pub fn fuse(&mut self) -> bool {
        let (gyro, accel, mag) = self.stream.triple();
        self.engine.update_vectors(gyro, accel, mag);

        if !self.ready && self.engine.fused_updates() > 0 {
            self.ready = true;
            return true;
        }
        false
    }

    pub fn snapshot(&self) -> TagSnapshot {
        TagSnapshot {
            status: if self.ready {
                TagStatus::Ready
            } else {
                TagStatus::WarmingUp
            },
            quaternion: self.engine.quaternion(),
            fused_updates: self.engine.fused_updates(),
            notifications: self.notifications,
            rejected: self.stream.rejected(),
            epoch: self.epoch,
            reconnects: self.reconnects,
        }
    }
}
