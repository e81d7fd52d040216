//! Engine event broadcaster.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the engine for observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// The job list changed (a job was created, settled, or mutated).
    JobsChanged,
    /// The campaign list changed (status transition, config update).
    CampaignsChanged,
    /// Free-text progress for a running job.
    #[serde(rename_all = "camelCase")]
    JobProgress {
        job_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Creates a progress event stamped with the current time.
    pub fn progress(job_id: &str, message: &str) -> Self {
        EngineEvent::JobProgress {
            job_id: job_id.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts engine events for streaming.
#[derive(Clone)]
pub struct EngineEventBroadcaster {
    sender: Arc<broadcast::Sender<EngineEvent>>,
}

impl EngineEventBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: EngineEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EngineEventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = EngineEventBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(EngineEvent::JobsChanged);

        let received = rx.try_recv().unwrap();
        assert_eq!(received, EngineEvent::JobsChanged);
    }

    #[test]
    fn test_send_without_receivers_is_fine() {
        let broadcaster = EngineEventBroadcaster::default();
        broadcaster.send(EngineEvent::CampaignsChanged);
    }

    #[test]
    fn test_progress_event_serializes_camel_case() {
        let event = EngineEvent::progress("job-1", "uploading 40%");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"jobId\":\"job-1\""));
        assert!(json.contains("jobProgress"));
    }
}
