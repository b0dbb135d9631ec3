//! Synthetic tags for running the pipeline without hardware.
//!
//! Each simulated tag lies flat and turns about the vertical axis at a
//! constant rate. Readings are quantised to the same raw i16 triples the
//! movement service would send, so they go through the normal decoders.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, Instant};

use crate::error::PipelineError;
use crate::replay::ReplayRecord;
use crate::sensors::{Notification, ACCEL_SCALE, GYRO_SCALE, MAG_SCALE};
use crate::source::{NotificationSource, TagEvent, EVENT_BUFFER};
use crate::types::{Modality, TagId};

/// Horizontal and vertical earth-field components in µT (mid-latitude).
pub const FIELD_HORIZONTAL: f64 = 20.0;
pub const FIELD_VERTICAL: f64 = -40.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulatedTag {
    /// Heading at the moment the session opens, degrees.
    pub heading_deg: f64,
    /// Constant turn rate, degrees per second.
    pub yaw_rate_deg_s: f64,
}

impl SimulatedTag {
    pub fn heading_at(&self, elapsed_secs: f64) -> f64 {
        self.heading_deg + self.yaw_rate_deg_s * elapsed_secs
    }

    /// Raw `(gyro, accel, mag)` triples after `elapsed_secs`.
    pub fn raw_at(&self, elapsed_secs: f64) -> ([i16; 3], [i16; 3], [i16; 3]) {
        let yaw = self.heading_at(elapsed_secs).to_radians();
        let gyro = [0, 0, quantise(self.yaw_rate_deg_s / GYRO_SCALE)];
        let accel = [0, 0, quantise(1.0 / ACCEL_SCALE)];
        let mag = [
            quantise(FIELD_HORIZONTAL * yaw.cos() / MAG_SCALE),
            quantise(-FIELD_HORIZONTAL * yaw.sin() / MAG_SCALE),
            quantise(FIELD_VERTICAL / MAG_SCALE),
        ];
        (gyro, accel, mag)
    }

    pub fn frame_at(&self, elapsed_secs: f64) -> Notification {
        let (gyro, accel, mag) = self.raw_at(elapsed_secs);
        Notification::movement_frame(gyro, accel, mag)
    }
}

fn quantise(value: f64) -> i16 {
    value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

pub struct SimulatedSource {
    tags: HashMap<TagId, SimulatedTag>,
    notify_period: Duration,
}

impl SimulatedSource {
    pub fn new(notify_period: Duration) -> Self {
        Self {
            tags: HashMap::new(),
            notify_period,
        }
    }

    pub fn with_tag(mut self, tag: &str, heading_deg: f64, yaw_rate_deg_s: f64) -> Self {
        self.tags.insert(
            tag.to_string(),
            SimulatedTag {
                heading_deg,
                yaw_rate_deg_s,
            },
        );
        self
    }

    /// Per-modality log records covering `duration_secs` for the given tags,
    /// ordered by time.
    pub fn synthesize_records(&self, tags: &[TagId], duration_secs: f64) -> Vec<ReplayRecord> {
        let step = self.notify_period.as_secs_f64();
        let mut records = Vec::new();
        let mut k = 0u64;
        loop {
            let t = k as f64 * step;
            if t > duration_secs + 1e-9 {
                break;
            }
            for tag in tags {
                let Some(sim) = self.tags.get(tag) else {
                    continue;
                };
                let (gyro, accel, mag) = sim.raw_at(t);
                for (modality, raw) in Modality::ALL.into_iter().zip([gyro, accel, mag]) {
                    records.push(ReplayRecord {
                        t,
                        tag: tag.clone(),
                        modality,
                        raw,
                    });
                }
            }
            k += 1;
        }
        records
    }
}

impl NotificationSource for SimulatedSource {
    fn subscribe(&self, tag: &str) -> Result<mpsc::Receiver<TagEvent>, PipelineError> {
        let sim = *self.tags.get(tag).ok_or_else(|| PipelineError::SubscribeFailed {
            tag: tag.to_string(),
            reason: "unknown simulated tag".to_string(),
        })?;
        let handle = Handle::try_current().map_err(|err| PipelineError::SubscribeFailed {
            tag: tag.to_string(),
            reason: err.to_string(),
        })?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        handle.spawn(sim_loop(tag.to_string(), sim, tx, self.notify_period));
        info!(
            "Simulating tag {} (heading {:.1}°, {:.1}°/s)",
            tag, sim.heading_deg, sim.yaw_rate_deg_s
        );
        Ok(rx)
    }
}

async fn sim_loop(tag: TagId, sim: SimulatedTag, tx: mpsc::Sender<TagEvent>, period: Duration) {
    let mut interval = interval(period);
    let start = Instant::now();
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;

        let frame = sim.frame_at(start.elapsed().as_secs_f64());
        match tx.try_send(TagEvent::Notification(frame)) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 1000 == 0 {
                    debug!("[sim {}] {} frames", tag, sample_count);
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("[sim {}] Channel closed after {} frames", tag, sample_count);
                break;
            }
            Err(TrySendError::Full(_)) => {
                // Channel full, drop this frame
            }
        }
    }
}
