use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::aggregate::TickAssembler;
use crate::tag::{TagSnapshot, TagStatus};
use crate::types::TagId;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TagStatusEntry {
    pub tag_id: TagId,
    pub status: TagStatus,
    pub yaw_degrees: Option<f64>,
    pub notifications: u64,
    pub rejected: u64,
    pub fused_updates: u64,
    pub reconnects: u32,
    pub epoch: u64,
}

impl TagStatusEntry {
    pub fn from_snapshot(tag_id: &str, snapshot: &TagSnapshot) -> Self {
        Self {
            tag_id: tag_id.to_string(),
            status: snapshot.status,
            yaw_degrees: snapshot.yaw_degrees(),
            notifications: snapshot.notifications,
            rejected: snapshot.rejected,
            fused_updates: snapshot.fused_updates,
            reconnects: snapshot.reconnects,
            epoch: snapshot.epoch,
        }
    }
}

/// Live pipeline status, refreshed every aggregation tick
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PipelineStatus {
    pub timestamp: f64,
    pub uptime_seconds: f64,
    pub armed: bool,
    pub ticks_emitted: u64,
    pub ticks_withheld: u64,
    pub ticks_dropped: u64,
    pub tags: Vec<TagStatusEntry>,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            ..Self::default()
        }
    }

    pub fn capture(
        timestamp: f64,
        uptime_seconds: f64,
        assembler: &TickAssembler,
        snapshots: &[TagSnapshot],
    ) -> Self {
        Self {
            timestamp,
            uptime_seconds,
            armed: assembler.is_armed(),
            ticks_emitted: assembler.emitted(),
            ticks_withheld: assembler.withheld(),
            ticks_dropped: assembler.dropped(),
            tags: assembler
                .tags()
                .iter()
                .zip(snapshots)
                .map(|(tag, snapshot)| TagStatusEntry::from_snapshot(tag, snapshot))
                .collect(),
        }
    }

    pub fn ready_count(&self) -> usize {
        self.tags
            .iter()
            .filter(|t| t.status == TagStatus::Ready)
            .count()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Quaternion;

    #[test]
    fn test_capture_and_save() {
        let assembler = TickAssembler::new(vec!["a".into(), "b".into()]);
        let mut ready = TagSnapshot::connecting(2, 1);
        ready.status = TagStatus::Ready;
        ready.quaternion = Quaternion::IDENTITY;
        let snapshots = vec![ready, TagSnapshot::connecting(0, 0)];

        let status = PipelineStatus::capture(100.0, 1.5, &assembler, &snapshots);
        assert_eq!(status.tags.len(), 2);
        assert_eq!(status.ready_count(), 1);
        assert_eq!(status.tags[0].yaw_degrees, Some(0.0));
        assert_eq!(status.tags[1].status, TagStatus::Connecting);

        let path = std::env::temp_dir().join(format!("pipeline_status_{}.json", std::process::id()));
        status.save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let back: PipelineStatus = serde_json::from_str(&text).unwrap();
        assert_eq!(back, status);
        assert!(text.contains("\"connecting\""));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_new_has_wall_clock_timestamp() {
        assert!(PipelineStatus::new().timestamp > 1_600_000_000.0);
    }
}
