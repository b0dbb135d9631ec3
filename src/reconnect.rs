use std::time::Duration;

use log::{info, warn};

use crate::types::TagId;

/// Upper bound on the reconnect cooldown.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(30);

/// Tracks reconnect state for a single tag
#[derive(Clone, Debug)]
pub struct RestartState {
    pub tag: TagId,
    pub attempts: u32,
    pub max_attempts: u32,
    pub base_cooldown: Duration,
    pub current_cooldown: Duration,
    /// Sessions started after the first one.
    pub reconnects: u32,
    pub gave_up: bool,
}

impl RestartState {
    pub fn new(tag: &str, max_attempts: u32, base_cooldown: Duration) -> Self {
        RestartState {
            tag: tag.to_string(),
            attempts: 0,
            max_attempts,
            base_cooldown,
            current_cooldown: base_cooldown,
            reconnects: 0,
            gave_up: false,
        }
    }

    /// Record a lost or refused connection and return how long to wait before
    /// the next attempt, or `None` once `max_attempts` retries have been spent.
    pub fn record_failed_attempt(&mut self) -> Option<Duration> {
        if !self.can_restart() {
            warn!(
                "[RECONNECT] {} giving up after {} attempt(s)",
                self.tag, self.attempts
            );
            self.gave_up = true;
            return None;
        }
        self.attempts += 1;

        let wait = self.current_cooldown;
        // Exponential backoff: multiply cooldown by 1.5 each time, cap at 30 seconds
        self.current_cooldown = Duration::from_secs_f64(
            (self.current_cooldown.as_secs_f64() * 1.5).min(MAX_COOLDOWN.as_secs_f64()),
        );

        info!(
            "[RECONNECT] {} attempt {}/{} failed, next retry in {:.1}s",
            self.tag,
            self.attempts,
            self.max_attempts,
            wait.as_secs_f64()
        );
        Some(wait)
    }

    /// Record a session that reached ready and reset the backoff
    pub fn record_success(&mut self) {
        if self.attempts > 0 {
            info!(
                "[RECONNECT] {} recovered after {} attempt(s)",
                self.tag, self.attempts
            );
        }
        self.attempts = 0;
        self.current_cooldown = self.base_cooldown;
    }

    pub fn record_reconnect(&mut self) {
        self.reconnects += 1;
    }

    /// Check if another retry is allowed
    pub fn can_restart(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Get formatted status
    pub fn status(&self) -> String {
        if self.attempts == 0 {
            return format!("{}: OK", self.tag);
        }
        if self.gave_up {
            return format!("{}: MAX_ATTEMPTS_EXCEEDED", self.tag);
        }
        format!(
            "{}: RECONNECTING (attempt {}/{}, cooldown {:.1}s)",
            self.tag,
            self.attempts,
            self.max_attempts,
            self.current_cooldown.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let mut state = RestartState::new("test", 10, Duration::from_secs(1));

        // First retry waits the base cooldown
        assert_eq!(state.record_failed_attempt(), Some(Duration::from_secs(1)));
        assert_eq!(state.attempts, 1);

        // Second attempt: ~1.5s cooldown
        let second = state.record_failed_attempt().unwrap();
        assert!((second.as_secs_f64() - 1.5).abs() < 1e-9);

        let third = state.record_failed_attempt().unwrap();
        assert!(third > second);
    }

    #[test]
    fn test_backoff_capped() {
        let mut state = RestartState::new("test", 100, Duration::from_secs(10));
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            last = state.record_failed_attempt().unwrap();
        }
        assert_eq!(last, MAX_COOLDOWN);
    }

    #[test]
    fn test_max_attempts() {
        let mut state = RestartState::new("test", 2, Duration::from_secs(1));
        assert!(state.can_restart());

        assert!(state.record_failed_attempt().is_some());
        assert!(state.can_restart());
        assert!(state.record_failed_attempt().is_some());
        assert!(!state.can_restart());

        assert!(state.record_failed_attempt().is_none());
        assert!(state.gave_up);
        assert_eq!(state.status(), "test: MAX_ATTEMPTS_EXCEEDED");
    }

    #[test]
    fn test_success_resets() {
        let mut state = RestartState::new("test", 5, Duration::from_secs(2));
        state.record_failed_attempt();
        state.record_failed_attempt();
        assert!(state.status().starts_with("test: RECONNECTING (attempt 2/5"));

        state.record_success();
        assert_eq!(state.attempts, 0);
        assert_eq!(state.current_cooldown, Duration::from_secs(2));
        assert_eq!(state.status(), "test: OK");
    }
}
