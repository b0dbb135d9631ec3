//! Where notifications come from.
//!
//! The transport is external; the pipeline only needs a per-tag channel of
//! events. A source is asked for a fresh channel on every (re)connect.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::sensors::Notification;
use crate::types::TagId;

/// Default per-tag notification buffer.
pub const EVENT_BUFFER: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub enum TagEvent {
    Notification(Notification),
    Disconnected { reason: String },
}

pub trait NotificationSource: Send + Sync {
    /// Open a session for `tag`. Called once at start and again on every
    /// reconnect attempt.
    fn subscribe(&self, tag: &str) -> Result<mpsc::Receiver<TagEvent>, PipelineError>;
}

/// Hand-fed source: each `register` call queues one session for a tag and
/// returns the sending half.
#[derive(Default)]
pub struct ChannelSource {
    sessions: Mutex<HashMap<TagId, VecDeque<mpsc::Receiver<TagEvent>>>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tag: &str) -> mpsc::Sender<TagEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.entry(tag.to_string()).or_default().push_back(rx);
        tx
    }

    pub fn pending(&self, tag: &str) -> usize {
        self.sessions
            .lock()
            .map(|s| s.get(tag).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }
}

impl NotificationSource for ChannelSource {
    fn subscribe(&self, tag: &str) -> Result<mpsc::Receiver<TagEvent>, PipelineError> {
        let mut sessions = self.sessions.lock().map_err(|_| PipelineError::SubscribeFailed {
            tag: tag.to_string(),
            reason: "session table poisoned".to_string(),
        })?;
        sessions
            .get_mut(tag)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| PipelineError::SubscribeFailed {
                tag: tag.to_string(),
                reason: "no session available".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Modality;

    #[tokio::test]
    async fn test_sessions_are_handed_out_in_order() {
        let source = ChannelSource::new();
        let first = source.register("a");
        let second = source.register("a");
        assert_eq!(source.pending("a"), 2);

        let mut rx1 = source.subscribe("a").unwrap();
        let mut rx2 = source.subscribe("a").unwrap();
        assert_eq!(source.pending("a"), 0);

        let event = TagEvent::Notification(Notification::triple(Modality::Gyroscope, [1, 2, 3]));
        first.send(event.clone()).await.unwrap();
        second
            .send(TagEvent::Disconnected { reason: "gone".into() })
            .await
            .unwrap();

        assert_eq!(rx1.recv().await, Some(event));
        assert!(matches!(rx2.recv().await, Some(TagEvent::Disconnected { .. })));
    }

    #[test]
    fn test_unknown_tag_fails_to_subscribe() {
        let source = ChannelSource::new();
        let err = source.subscribe("missing").unwrap_err();
        assert!(err.is_tag_failure());
        assert_eq!(err.to_string(), "Subscribe failed for tag missing: no session available");
    }
}
