//! Job events published to any number of subscribers.
//!
//! [`JobEvents`] wraps a `tokio::sync::broadcast` channel. Hosts subscribe
//! to drive progress bars and status lines; nothing in the executor depends
//! on anyone listening.

use cyanic_core::types::LayerId;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::job::{JobId, JobState};

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    StateChanged {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },
    Progress {
        job_id: JobId,
        /// Completion in `0.0..=1.0`.
        fraction: f64,
    },
    PreviewUpdated {
        job_id: JobId,
        layer: LayerId,
    },
    Completed {
        job_id: JobId,
        layers: Vec<LayerId>,
        caption: Option<String>,
    },
    Cancelled {
        job_id: JobId,
    },
    Failed {
        job_id: JobId,
        error: String,
    },
}

/// Fan-out channel for [`JobEvent`]s.
#[derive(Debug, Clone)]
pub struct JobEvents {
    sender: broadcast::Sender<JobEvent>,
}

impl JobEvents {
    /// Create a channel with a specific capacity. Slow receivers observe
    /// `RecvError::Lagged` once it fills.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if there are none.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
