//! The Job record and its state machine.

use chrono::Utc;
use cyanic_core::instructions::ProcessingInstructions;
use cyanic_core::types::{LayerId, Mapping, Region, RequestKind, Timestamp};
use serde::Serialize;

use crate::error::OrchestratorError;
use crate::preview::PreviewRenderer;

pub type JobId = uuid::Uuid;

/// Lifecycle of one submission.
///
/// `Idle -> Dispatching -> Running -> {Completed, Cancelled, Failed} -> Idle`.
/// A build failure goes straight from `Dispatching` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Dispatching,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Idle, Dispatching)
                | (Dispatching, Running)
                | (Dispatching, Failed)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Running, Failed)
                | (Completed | Cancelled | Failed, Idle)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One submission's lifecycle record, owned by the executor's task.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub kind: RequestKind,
    pub state: JobState,
    pub started_at: Timestamp,
    /// Where results land, before any resize directive is applied.
    pub region: Region,
    /// The normalised wire payload. Not modified after dispatch.
    pub payload: Mapping,
    pub instructions: ProcessingInstructions,
    /// `batch_size * batch_count` once the response declares it.
    pub expected_images: Option<usize>,
    pub preview: PreviewRenderer,
}

impl Job {
    pub fn new(
        id: JobId,
        kind: RequestKind,
        region: Region,
        payload: Mapping,
        instructions: ProcessingInstructions,
    ) -> Self {
        Self {
            id,
            kind,
            state: JobState::Idle,
            started_at: Utc::now(),
            region,
            payload,
            instructions,
            expected_images: None,
            preview: PreviewRenderer::new(),
        }
    }

    pub fn anchor_layer(&self) -> Option<LayerId> {
        self.instructions.anchor_layer
    }

    /// The region results (and previews) occupy in the document.
    pub fn placement_region(&self) -> Region {
        match self.instructions.placement_size() {
            Some(size) => self.region.with_size(size),
            None => self.region,
        }
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&mut self, next: JobState) -> JobState {
        let from = self.state;
        if !from.can_transition_to(next) {
            tracing::warn!(job_id = %self.id, %from, to = %next, "Unexpected job transition");
        }
        self.state = next;
        from
    }
}

/// How a job ended.
#[derive(Debug)]
pub enum JobOutcome {
    Completed {
        /// Result layers in placement order, top first.
        layers: Vec<LayerId>,
        /// Group created around multiple results.
        group: Option<LayerId>,
        /// Interrogation caption, if any.
        caption: Option<String>,
    },
    /// Cancelled locally or interrupted on the server.
    Cancelled,
    Failed(OrchestratorError),
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            Self::Completed { .. } => JobState::Completed,
            Self::Cancelled => JobState::Cancelled,
            Self::Failed(_) => JobState::Failed,
        }
    }
}

/// Summary returned when a job has been torn down.
#[derive(Debug)]
pub struct JobReport {
    pub job_id: JobId,
    pub kind: RequestKind,
    pub outcome: JobOutcome,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// Preview layer still owned by the job after teardown. Always `None`
    /// unless removing it failed on the host.
    pub preview_layer: Option<LayerId>,
}
