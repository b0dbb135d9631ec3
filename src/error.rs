use thiserror::Error;

use crate::types::{Modality, TagId};

/// Rejection of a hardware payload at the sensor-stream boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("{modality} payload must be {expected} bytes, got {actual}")]
    PayloadLength {
        modality: Modality,
        expected: usize,
        actual: usize,
    },

    #[error("Movement frame must be {expected} bytes, got {actual}")]
    FrameLength { expected: usize, actual: usize },
}

/// Invalid pipeline configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("No tags configured")]
    NoTags,

    #[error("Tag configured twice: {0}")]
    DuplicateTag(TagId),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Subscribe failed for tag {tag}: {reason}")]
    SubscribeFailed { tag: TagId, reason: String },

    #[error("Tag {tag} disconnected: {reason}")]
    TagDisconnected { tag: TagId, reason: String },

    #[error("Tag {tag} silent for {silent_secs:.1}s")]
    TagSilent { tag: TagId, silent_secs: f64 },

    #[error("Sink closed")]
    SinkClosed,

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("All tags failed")]
    AllTagsFailed,

    #[error("Invalid log record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("Task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Per-tag failures that the scheduler absorbs by excluding the tag.
    pub fn is_tag_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::TagDisconnected { .. }
                | PipelineError::TagSilent { .. }
                | PipelineError::SubscribeFailed { .. }
        )
    }
}
