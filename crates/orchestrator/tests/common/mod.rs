//! Shared fakes for the orchestrator integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cyanic_core::backend::BackendProfile;
use cyanic_core::document::MemoryDocument;
use cyanic_core::imaging::{encode_png_base64, Pixels};
use cyanic_core::result::{GenerationInfo, ResultSet};
use cyanic_core::types::{Mapping, ProgressSnapshot, RequestKind, Size};
use cyanic_orchestrator::backend::GenerationBackend;
use cyanic_orchestrator::config::OrchestratorConfig;
use cyanic_orchestrator::error::OrchestratorError;
use cyanic_orchestrator::events::JobEvent;
use cyanic_orchestrator::executor::Orchestrator;
use cyanic_orchestrator::job::JobState;
use tokio::sync::broadcast;

/// What the fake server answers to a generation request.
#[derive(Debug, Clone)]
pub enum Reply {
    Results(ResultSet),
    ConnectionLost,
    Malformed,
}

/// What one progress poll returns.
#[derive(Debug, Clone)]
pub enum Poll {
    Snapshot(ProgressSnapshot),
    Unreachable,
    /// The server accepts the connection and never answers.
    Hang,
}

/// A scripted generation server.
///
/// `submit` sleeps for `delay` then answers with `reply`. Each progress
/// poll pops the next scripted answer; once the script runs out the last
/// answer repeats.
pub struct FakeBackend {
    reply: Reply,
    delay: Duration,
    polls: Mutex<VecDeque<Poll>>,
    last_poll: Mutex<Poll>,
    hang_interrupt: bool,
    pub submitted: Mutex<Vec<(RequestKind, Mapping)>>,
    pub interrupts: AtomicUsize,
    pub progress_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(reply: Reply, delay: Duration) -> Self {
        Self {
            reply,
            delay,
            polls: Mutex::new(VecDeque::new()),
            last_poll: Mutex::new(Poll::Snapshot(ProgressSnapshot::idle())),
            hang_interrupt: false,
            submitted: Mutex::new(Vec::new()),
            interrupts: AtomicUsize::new(0),
            progress_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_polls(self, polls: impl IntoIterator<Item = Poll>) -> Self {
        *self.polls.lock().unwrap() = polls.into_iter().collect();
        self
    }

    /// Interrupt requests are counted but never answered.
    pub fn with_hanging_interrupt(mut self) -> Self {
        self.hang_interrupt = true;
        self
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn last_payload(&self) -> Mapping {
        self.submitted
            .lock()
            .unwrap()
            .last()
            .map(|(_, payload)| payload.clone())
            .expect("nothing was submitted")
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn submit(&self, kind: RequestKind, payload: Mapping) -> Result<ResultSet, OrchestratorError> {
        self.submitted.lock().unwrap().push((kind, payload));
        tokio::time::sleep(self.delay).await;
        match &self.reply {
            Reply::Results(results) => Ok(results.clone()),
            Reply::ConnectionLost => Err(OrchestratorError::Connection("connection reset".into())),
            Reply::Malformed => Err(OrchestratorError::MalformedResponse("missing images".into())),
        }
    }

    async fn progress(&self) -> Result<ProgressSnapshot, OrchestratorError> {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.polls.lock().unwrap().pop_front();
        let poll = match next {
            Some(poll) => {
                *self.last_poll.lock().unwrap() = poll.clone();
                poll
            }
            None => self.last_poll.lock().unwrap().clone(),
        };
        match poll {
            Poll::Snapshot(snapshot) => Ok(snapshot),
            Poll::Unreachable => Err(OrchestratorError::Connection("connection refused".into())),
            Poll::Hang => std::future::pending().await,
        }
    }

    async fn interrupt(&self) -> Result<(), OrchestratorError> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        if self.hang_interrupt {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// A solid base64 PNG.
pub fn png(width: u32, height: u32) -> String {
    encode_png_base64(&Pixels {
        size: Size::new(width, height),
        rgba: vec![90; (width * height * 4) as usize],
    })
    .unwrap()
}

pub fn mapping(value: serde_json::Value) -> Mapping {
    match value {
        serde_json::Value::Object(m) => m,
        other => panic!("not an object: {other}"),
    }
}

/// `count` images generated as one batch of `count`, seeds from 100.
pub fn batch(count: usize) -> ResultSet {
    ResultSet {
        images: (0..count).map(|_| png(8, 8)).collect(),
        info: Some(GenerationInfo {
            all_seeds: (0..count as i64).map(|i| 100 + i).collect(),
            ..Default::default()
        }),
        parameters: Some(mapping(serde_json::json!({"batch_size": count, "n_iter": 1}))),
        caption: None,
    }
}

pub fn progress(fraction: f64) -> Poll {
    Poll::Snapshot(ProgressSnapshot {
        fraction,
        preview_image: None,
        terminal: false,
    })
}

pub fn progress_with_preview(fraction: f64) -> Poll {
    Poll::Snapshot(ProgressSnapshot {
        fraction,
        preview_image: Some(png(4, 4)),
        terminal: false,
    })
}

pub fn interrupted(fraction: f64) -> Poll {
    Poll::Snapshot(ProgressSnapshot {
        fraction,
        preview_image: None,
        terminal: true,
    })
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        poll_interval: Duration::from_secs(1),
        previews_enabled: true,
        idle_timeout: None,
        ..Default::default()
    }
}

pub fn orchestrator(backend: FakeBackend, document: MemoryDocument) -> Orchestrator<FakeBackend, MemoryDocument> {
    Orchestrator::new(backend, document, test_config(), BackendProfile::default())
}

/// Every event published so far.
pub fn drain(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// The `to` side of every state change, in order.
pub fn states(events: &[JobEvent]) -> Vec<JobState> {
    events
        .iter()
        .filter_map(|event| match event {
            JobEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}
