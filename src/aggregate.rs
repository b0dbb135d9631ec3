//! Tick assembly: decides, once per aggregation period, whether the current
//! set of tag snapshots becomes an `AggregateTick`.

use log::{debug, info};

use crate::tag::{TagSnapshot, TagStatus};
use crate::types::{AggregateTick, OrientationSample, TagId};

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    Emit(AggregateTick),
    /// Not every tag has warmed up yet, or no tag is currently ready.
    Withheld,
    /// A tag's connection epoch changed while the snapshots were read.
    Dropped,
}

/// True when every snapshot still carries the epoch observed afterwards.
pub fn epochs_consistent(snapshots: &[TagSnapshot], epochs_after: &[u64]) -> bool {
    snapshots.len() == epochs_after.len()
        && snapshots
            .iter()
            .zip(epochs_after)
            .all(|(snapshot, epoch)| snapshot.epoch == *epoch)
}

pub struct TickAssembler {
    tags: Vec<TagId>,
    seen_ready: Vec<bool>,
    armed: bool,
    emitted: u64,
    withheld: u64,
    dropped: u64,
}

impl TickAssembler {
    pub fn new(tags: Vec<TagId>) -> Self {
        let seen_ready = vec![false; tags.len()];
        Self {
            tags,
            seen_ready,
            armed: false,
            emitted: 0,
            withheld: 0,
            dropped: 0,
        }
    }

    pub fn tags(&self) -> &[TagId] {
        &self.tags
    }

    /// Every tag has been ready at least once (or failed for good).
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn withheld(&self) -> u64 {
        self.withheld
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// `snapshots` are in registration order; `epochs_after` is a second read
    /// of each tag's epoch taken after all snapshots were collected.
    pub fn assemble(
        &mut self,
        timestamp: f64,
        snapshots: &[TagSnapshot],
        epochs_after: &[u64],
    ) -> TickOutcome {
        if snapshots.len() != self.tags.len() || !epochs_consistent(snapshots, epochs_after) {
            debug!("Dropping tick at {:.3}: connection epoch changed mid-read", timestamp);
            self.dropped += 1;
            return TickOutcome::Dropped;
        }

        for (seen, snapshot) in self.seen_ready.iter_mut().zip(snapshots) {
            *seen |= snapshot.status == TagStatus::Ready;
        }

        if !self.armed {
            self.armed = self
                .seen_ready
                .iter()
                .zip(snapshots)
                .all(|(seen, snapshot)| *seen || snapshot.status == TagStatus::Failed);
            if !self.armed {
                self.withheld += 1;
                return TickOutcome::Withheld;
            }
            info!("All {} tags warmed up, emitting ticks", self.tags.len());
        }

        if !snapshots.iter().any(|s| s.status == TagStatus::Ready) {
            self.withheld += 1;
            return TickOutcome::Withheld;
        }

        let samples = self
            .tags
            .iter()
            .zip(snapshots)
            .map(|(tag_id, snapshot)| OrientationSample {
                tag_id: tag_id.clone(),
                yaw_degrees: snapshot.yaw_degrees(),
            })
            .collect();

        self.emitted += 1;
        TickOutcome::Emit(AggregateTick { timestamp, samples })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::quaternion_from_euler;

    fn snapshot(status: TagStatus, yaw_deg: f64, epoch: u64) -> TagSnapshot {
        TagSnapshot {
            status,
            quaternion: quaternion_from_euler(0.0, 0.0, yaw_deg.to_radians()),
            fused_updates: 1,
            notifications: 1,
            rejected: 0,
            epoch,
            reconnects: 0,
        }
    }

    fn epochs(snapshots: &[TagSnapshot]) -> Vec<u64> {
        snapshots.iter().map(|s| s.epoch).collect()
    }

    fn assembler() -> TickAssembler {
        TickAssembler::new(vec!["a".into(), "b".into(), "c".into()])
    }

    #[test]
    fn test_withheld_until_every_tag_ready() {
        let mut asm = assembler();
        let mut snaps = vec![
            snapshot(TagStatus::Ready, 10.0, 0),
            snapshot(TagStatus::WarmingUp, 0.0, 0),
            snapshot(TagStatus::Ready, 30.0, 0),
        ];
        assert_eq!(asm.assemble(1.0, &snaps, &epochs(&snaps)), TickOutcome::Withheld);
        assert!(!asm.is_armed());

        snaps[1] = snapshot(TagStatus::Ready, 20.0, 0);
        let TickOutcome::Emit(tick) = asm.assemble(1.1, &snaps, &epochs(&snaps)) else {
            panic!("expected tick");
        };
        assert_eq!(tick.yaws(), vec![Some(10.0), Some(20.0), Some(30.0)]);
        assert_eq!(tick.samples[1].tag_id, "b");
        assert_eq!(asm.emitted(), 1);
        assert_eq!(asm.withheld(), 1);
    }

    #[test]
    fn test_ready_once_is_enough_to_arm() {
        let mut asm = assembler();
        let first = vec![
            snapshot(TagStatus::Ready, 1.0, 0),
            snapshot(TagStatus::WarmingUp, 0.0, 0),
            snapshot(TagStatus::WarmingUp, 0.0, 0),
        ];
        assert_eq!(asm.assemble(1.0, &first, &epochs(&first)), TickOutcome::Withheld);

        // Tag a drops while b and c warm up
        let second = vec![
            snapshot(TagStatus::Disconnected, 0.0, 1),
            snapshot(TagStatus::Ready, 2.0, 0),
            snapshot(TagStatus::Ready, 3.0, 0),
        ];
        let TickOutcome::Emit(tick) = asm.assemble(1.1, &second, &epochs(&second)) else {
            panic!("expected tick");
        };
        assert_eq!(tick.yaws(), vec![None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_failed_tag_does_not_block_arming() {
        let mut asm = assembler();
        let snaps = vec![
            snapshot(TagStatus::Ready, 5.0, 0),
            snapshot(TagStatus::Failed, 0.0, 4),
            snapshot(TagStatus::Ready, 6.0, 0),
        ];
        let TickOutcome::Emit(tick) = asm.assemble(2.0, &snaps, &epochs(&snaps)) else {
            panic!("expected tick");
        };
        assert_eq!(tick.samples.len(), 3);
        assert_eq!(tick.included_count(), 2);
    }

    #[test]
    fn test_no_ready_tag_withholds_after_arming() {
        let mut asm = assembler();
        let ready = vec![snapshot(TagStatus::Ready, 0.0, 0); 3];
        assert!(matches!(asm.assemble(1.0, &ready, &epochs(&ready)), TickOutcome::Emit(_)));

        let down = vec![snapshot(TagStatus::Disconnected, 0.0, 1); 3];
        assert_eq!(asm.assemble(1.1, &down, &epochs(&down)), TickOutcome::Withheld);
        assert!(asm.is_armed());
    }

    #[test]
    fn test_epoch_change_mid_read_drops_tick() {
        let mut asm = assembler();
        let snaps = vec![snapshot(TagStatus::Ready, 0.0, 0); 3];
        assert_eq!(asm.assemble(1.0, &snaps, &[0, 1, 0]), TickOutcome::Dropped);
        assert_eq!(asm.dropped(), 1);
        assert_eq!(asm.emitted(), 0);

        // Wrong arity is never emitted either
        assert_eq!(asm.assemble(1.1, &snaps[..2], &[0, 0]), TickOutcome::Dropped);
    }

    #[test]
    fn test_zero_yaw_is_emitted_once_ready() {
        let mut asm = TickAssembler::new(vec!["north".into()]);
        let snaps = vec![snapshot(TagStatus::Ready, 0.0, 0)];
        let TickOutcome::Emit(tick) = asm.assemble(1.0, &snaps, &epochs(&snaps)) else {
            panic!("expected tick");
        };
        assert_eq!(tick.yaws(), vec![Some(0.0)]);
    }
}
