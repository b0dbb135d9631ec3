// Pipeline configuration
//
// Every field has a default so a JSON file only needs to list what it
// changes. CLI flags in the binaries override file values.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PipelineError};
use crate::filters::MadgwickConfig;
use crate::sensors::MovementConfig;
use crate::types::TagId;

/// Upper bound for every duration-valued field, in seconds.
pub const MAX_DURATION_SECS: f64 = 86_400.0;

fn check_seconds(field: &'static str, value: f64) -> Result<(), ConfigError> {
    match Duration::try_from_secs_f64(value) {
        Ok(_) if value <= MAX_DURATION_SECS => Ok(()),
        _ => Err(ConfigError::InvalidValue {
            field,
            reason: format!("must be at most {}s, got {}", MAX_DURATION_SECS, value),
        }),
    }
}

/// Validated fields never hit the fallback.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.min(MAX_DURATION_SECS)).unwrap_or_default()
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tags in registration order; fixed for the run.
    pub tags: Vec<TagId>,

    // ── Fusion ──
    pub sample_period: f64,
    pub beta: f64,

    // ── Connection health ──
    pub silence_timeout: f64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_cooldown: f64,

    // ── Hardware ──
    pub movement: MovementConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            sample_period: 0.1,
            beta: 3.0,
            silence_timeout: 2.0,
            max_reconnect_attempts: 5,
            reconnect_base_cooldown: 1.0,
            movement: MovementConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TagId>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parse a JSON config without validating it, for callers that fill in
    /// tags or overrides afterwards.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tags.is_empty() {
            return Err(ConfigError::NoTags);
        }
        let mut seen = HashSet::new();
        for tag in &self.tags {
            if !seen.insert(tag.as_str()) {
                return Err(ConfigError::DuplicateTag(tag.clone()));
            }
        }
        if !(self.sample_period.is_finite() && self.sample_period > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "sample_period",
                reason: format!("must be a positive number of seconds, got {}", self.sample_period),
            });
        }
        if !(self.beta.is_finite() && self.beta >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "beta",
                reason: format!("must be finite and non-negative, got {}", self.beta),
            });
        }
        if !(self.silence_timeout.is_finite() && self.silence_timeout > self.sample_period) {
            return Err(ConfigError::InvalidValue {
                field: "silence_timeout",
                reason: format!(
                    "must exceed sample_period ({}s), got {}",
                    self.sample_period, self.silence_timeout
                ),
            });
        }
        if !(self.reconnect_base_cooldown.is_finite() && self.reconnect_base_cooldown >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "reconnect_base_cooldown",
                reason: format!("must be finite and non-negative, got {}", self.reconnect_base_cooldown),
            });
        }
        check_seconds("sample_period", self.sample_period)?;
        check_seconds("silence_timeout", self.silence_timeout)?;
        check_seconds("reconnect_base_cooldown", self.reconnect_base_cooldown)?;
        Ok(())
    }

    pub fn madgwick(&self) -> MadgwickConfig {
        MadgwickConfig {
            sample_period: self.sample_period,
            beta: self.beta,
        }
    }

    pub fn tick_period(&self) -> Duration {
        seconds(self.sample_period)
    }

    pub fn silence_duration(&self) -> Duration {
        seconds(self.silence_timeout)
    }

    pub fn base_cooldown(&self) -> Duration {
        seconds(self.reconnect_base_cooldown)
    }
}
