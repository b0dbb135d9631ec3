//! Multi-tag orientation tracking.
//!
//! Raw movement-sensor notifications from several wearable tags are decoded
//! by a [`sensors::SensorStream`], fused by a per-tag
//! [`filters::FusionEngine`] (Madgwick gradient descent) and aggregated once
//! per period into an [`types::AggregateTick`] of yaw headings by the
//! [`pipeline::PipelineScheduler`].

pub mod aggregate;
pub mod config;
pub mod error;
pub mod filters;
pub mod orientation;
pub mod pipeline;
pub mod reconnect;
pub mod replay;
pub mod sensors;
pub mod sim;
pub mod sink;
pub mod source;
pub mod status;
pub mod tag;
pub mod types;

pub use config::PipelineConfig;
pub use error::{ConfigError, PipelineError, SensorError};
pub use filters::{FusionEngine, MadgwickConfig};
pub use pipeline::{PipelineScheduler, PipelineSummary};
pub use types::{AggregateTick, OrientationSample, Quaternion, Vec3};
