//! The Job Executor.
//!
//! [`Orchestrator::submit`] drives one job from `Idle` back to `Idle`:
//! build and normalise the payload, spawn the generation request on its own
//! task, poll progress on a ticker, paint previews, and finally place the
//! results. Only the submitting task touches the document; the spawned
//! request hands its Result Set back through its `JoinHandle`.
//!
//! Cancellation is cooperative. A [`Canceller`] trips the job's
//! `CancellationToken`; the poll loop then interrupts the server and tears
//! the job down. The request task is left to finish on its own and its
//! result is dropped unread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use cyanic_core::backend::{normalize, BackendProfile};
use cyanic_core::contributor::Contributor;
use cyanic_core::document::{default_region, ensure_open, Document};
use cyanic_core::request::RequestBuilder;
use cyanic_core::result::ResultSet;
use cyanic_core::types::{Mapping, Region, RequestKind};
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backend::GenerationBackend;
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::events::{JobEvent, JobEvents};
use crate::job::{Job, JobId, JobOutcome, JobReport, JobState};
use crate::reconciler::{self, Placement};

/// Lower bound on how long one progress poll may take before it counts as
/// no progress.
const MIN_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// How long teardown waits for the server to acknowledge an interrupt.
const INTERRUPT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Everything needed to start one job.
pub struct Submission {
    pub kind: RequestKind,
    /// Asked for a snapshot once each, in order.
    pub contributors: Vec<Box<dyn Contributor>>,
    /// Target region. `None` uses the selection, or the whole canvas when
    /// nothing is selected.
    pub region: Option<Region>,
}

impl Submission {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            contributors: Vec::new(),
            region: None,
        }
    }

    pub fn with_contributor(mut self, contributor: impl Contributor + 'static) -> Self {
        self.contributors.push(Box::new(contributor));
        self
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.contributors.iter().map(|c| c.name()).collect();
        f.debug_struct("Submission")
            .field("kind", &self.kind)
            .field("contributors", &names)
            .field("region", &self.region)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Active job slot and cancellation
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ActiveJob {
    id: JobId,
    state: JobState,
    cancel: CancellationToken,
}

type Slot = Arc<Mutex<Option<ActiveJob>>>;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancels whatever job is active on an [`Orchestrator`].
///
/// Cheap to clone and usable from any task or thread.
#[derive(Debug, Clone)]
pub struct Canceller {
    slot: Slot,
}

impl Canceller {
    /// Request cancellation of the active job.
    ///
    /// Returns `true` if a job was signalled. Cancelling twice, cancelling
    /// a job that already finished, or cancelling with no job at all does
    /// nothing and returns `false`.
    pub fn cancel(&self) -> bool {
        let slot = lock(&self.slot);
        match slot.as_ref() {
            Some(job) if !job.state.is_terminal() && !job.cancel.is_cancelled() => {
                tracing::info!(job_id = %job.id, state = %job.state, "Cancellation requested");
                job.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// State of the active job, or `Idle` when there is none.
    pub fn state(&self) -> JobState {
        lock(&self.slot).as_ref().map_or(JobState::Idle, |job| job.state)
    }

    pub fn active_job(&self) -> Option<JobId> {
        lock(&self.slot).as_ref().map(|job| job.id)
    }
}

/// Frees the slot when a job ends, however it ends.
struct SlotGuard {
    slot: Slot,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        lock(&self.slot).take();
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs generation jobs against one backend and one document, one job at
/// a time.
pub struct Orchestrator<B, D> {
    backend: Arc<B>,
    document: Arc<Mutex<D>>,
    config: OrchestratorConfig,
    profile: BackendProfile,
    events: JobEvents,
    slot: Slot,
}

impl<B, D> Orchestrator<B, D>
where
    B: GenerationBackend,
    D: Document,
{
    pub fn new(backend: B, document: D, config: OrchestratorConfig, profile: BackendProfile) -> Self {
        Self {
            backend: Arc::new(backend),
            document: Arc::new(Mutex::new(document)),
            config,
            profile,
            events: JobEvents::default(),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Shorthand for `self.canceller().cancel()`.
    pub fn cancel(&self) -> bool {
        self.canceller().cancel()
    }

    pub fn state(&self) -> JobState {
        self.canceller().state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: OrchestratorConfig) {
        self.config = config;
    }

    pub fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    /// Replace the backend profile, e.g. after reconnecting to a different
    /// server.
    pub fn set_profile(&mut self, profile: BackendProfile) {
        self.profile = profile;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run `f` with exclusive access to the document.
    pub fn with_document<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut lock(&self.document))
    }

    /// Run one job to completion.
    ///
    /// Returns `Err(JobInProgress)` if another job is active. Every other
    /// failure is reported through [`JobOutcome::Failed`] after cleanup.
    pub async fn submit(&self, submission: Submission) -> Result<JobReport, OrchestratorError> {
        let job_id = JobId::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut slot = lock(&self.slot);
            if let Some(active) = slot.as_ref() {
                tracing::warn!(active = %active.id, "Rejected submission while a job is active");
                return Err(OrchestratorError::JobInProgress);
            }
            *slot = Some(ActiveJob {
                id: job_id,
                state: JobState::Idle,
                cancel: cancel.clone(),
            });
        }
        let _guard = SlotGuard {
            slot: Arc::clone(&self.slot),
        };

        let kind = submission.kind;
        let started_at = Utc::now();
        self.publish_transition(job_id, JobState::Idle, JobState::Dispatching);

        let mut job = match self.prepare(job_id, submission) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(job_id = %job_id, %kind, error = %e, "Cannot build request");
                self.publish_transition(job_id, JobState::Dispatching, JobState::Failed);
                self.events.publish(JobEvent::Failed {
                    job_id,
                    error: e.to_string(),
                });
                self.publish_transition(job_id, JobState::Failed, JobState::Idle);
                return Ok(JobReport {
                    job_id,
                    kind,
                    outcome: JobOutcome::Failed(e),
                    started_at,
                    finished_at: Utc::now(),
                    preview_layer: None,
                });
            }
        };
        job.started_at = started_at;

        let outcome = self.run(&mut job, &cancel).await;
        let outcome = self.finish(&mut job, outcome, &cancel);

        self.transition(&mut job, outcome.state());
        match &outcome {
            JobOutcome::Completed { layers, caption, .. } => self.events.publish(JobEvent::Completed {
                job_id,
                layers: layers.clone(),
                caption: caption.clone(),
            }),
            JobOutcome::Cancelled => self.events.publish(JobEvent::Cancelled { job_id }),
            JobOutcome::Failed(e) => {
                tracing::error!(job_id = %job_id, %kind, error = %e, "Job failed");
                self.events.publish(JobEvent::Failed {
                    job_id,
                    error: e.to_string(),
                });
            }
        }
        self.transition(&mut job, JobState::Idle);

        Ok(JobReport {
            job_id,
            kind,
            outcome,
            started_at,
            finished_at: Utc::now(),
            preview_layer: job.preview.layer_id(),
        })
    }

    // ---- private helpers ----

    /// Resolve the region and build the wire payload.
    fn prepare(&self, job_id: JobId, mut submission: Submission) -> Result<Job, OrchestratorError> {
        let kind = submission.kind;
        let region = {
            let mut document = lock(&self.document);
            ensure_open(&mut *document).map_err(|e| OrchestratorError::DocumentUnavailable(e.to_string()))?;
            match submission.region {
                Some(region) => region,
                None => default_region(&*document)?,
            }
        };

        let builder = RequestBuilder::new(self.config.limits).with_base(self.base_fields(kind));
        let built = builder.build(kind, &mut submission.contributors, region)?;
        let payload = if kind.is_normalized() {
            normalize(&built.payload, &self.profile)
        } else {
            built.payload
        };

        tracing::info!(
            job_id = %job_id,
            %kind,
            flavor = %self.profile.flavor,
            x = region.x,
            y = region.y,
            width = region.width,
            height = region.height,
            resized = built.instructions.resize.is_some(),
            "Built request",
        );
        Ok(Job::new(job_id, kind, region, payload, built.instructions))
    }

    fn base_fields(&self, kind: RequestKind) -> Mapping {
        let mut base = Mapping::new();
        if kind.has_dimensions() && self.config.save_images {
            base.insert("save_images".into(), true.into());
        }
        base
    }

    /// Dispatch and poll until the request finishes, the job is cancelled
    /// or polling fails. Returns the Result Set on success.
    async fn run(&self, job: &mut Job, cancel: &CancellationToken) -> Result<ResultSet, Stop> {
        let mut worker = {
            let backend = Arc::clone(&self.backend);
            let kind = job.kind;
            let payload = job.payload.clone();
            tokio::spawn(async move { backend.submit(kind, payload).await })
        };
        self.transition(job, JobState::Running);

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the first poll waits one interval.
        ticker.tick().await;
        let poll_timeout = self.config.poll_interval.max(MIN_POLL_TIMEOUT);

        let mut last_fraction = 0.0_f64;
        let mut last_change = Instant::now();
        let mut seen_running = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.interrupt_remote(job.id).await;
                    return Err(Stop::Cancelled);
                }
                joined = &mut worker => return joined_result(joined),
                _ = ticker.tick() => {}
            }

            // Cancel and the request task still win while a poll is outstanding.
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.interrupt_remote(job.id).await;
                    return Err(Stop::Cancelled);
                }
                joined = &mut worker => return joined_result(joined),
                polled = tokio::time::timeout(poll_timeout, self.backend.progress()) => polled,
            };
            let snapshot = match polled {
                Ok(Ok(snapshot)) => Some(snapshot),
                Ok(Err(e)) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Progress poll failed");
                    self.interrupt_remote(job.id).await;
                    return Err(Stop::Failed(e));
                }
                Err(_) => {
                    tracing::debug!(
                        job_id = %job.id,
                        timeout_ms = poll_timeout.as_millis() as u64,
                        "Progress poll timed out",
                    );
                    None
                }
            };

            if let Some(snapshot) = &snapshot {
                tracing::trace!(
                    job_id = %job.id,
                    fraction = snapshot.fraction,
                    preview = snapshot.preview_image.is_some(),
                    terminal = snapshot.terminal,
                    "Progress",
                );

                // A stale interrupt flag from an earlier job is ignored
                // until this one has been seen running.
                if snapshot.terminal && seen_running {
                    tracing::info!(job_id = %job.id, "Server reports the job was interrupted");
                    return Err(Stop::Cancelled);
                }
                if snapshot.fraction > 0.0 {
                    seen_running = true;
                }
            }

            // An unanswered poll counts as no progress.
            match snapshot.as_ref().map(|s| s.fraction) {
                Some(fraction) if fraction != last_fraction => {
                    last_fraction = fraction;
                    last_change = Instant::now();
                    self.events.publish(JobEvent::Progress {
                        job_id: job.id,
                        fraction,
                    });
                }
                _ => {
                    if let Some(limit) = self.config.idle_timeout {
                        if last_change.elapsed() >= limit {
                            tracing::warn!(
                                job_id = %job.id,
                                idle_secs = limit.as_secs(),
                                "No progress, abandoning job",
                            );
                            self.interrupt_remote(job.id).await;
                            return Err(Stop::Failed(OrchestratorError::IdleTimeout {
                                seconds: limit.as_secs(),
                            }));
                        }
                    }
                }
            }

            if self.config.previews_enabled {
                if let Some(image) = snapshot.as_ref().and_then(|s| s.preview_image.as_deref()) {
                    self.render_preview(job, image);
                }
            }
        }
    }

    /// Tear down polling state and place results if the job still wants
    /// them.
    fn finish(&self, job: &mut Job, result: Result<ResultSet, Stop>, cancel: &CancellationToken) -> JobOutcome {
        let mut document = lock(&self.document);
        job.preview.clear(&mut *document);

        let results = match result {
            Ok(results) if cancel.is_cancelled() => {
                tracing::info!(
                    job_id = %job.id,
                    images = results.images.len(),
                    "Discarding result of cancelled job",
                );
                None
            }
            Ok(results) => Some(results),
            Err(Stop::Cancelled) => None,
            Err(Stop::Failed(e)) => {
                reconciler::restore_visibility(&mut *document, &job.instructions.restore_visibility);
                return JobOutcome::Failed(e);
            }
        };

        let Some(results) = results else {
            reconciler::restore_visibility(&mut *document, &job.instructions.restore_visibility);
            return JobOutcome::Cancelled;
        };

        job.expected_images = results.expected_count();
        tracing::debug!(
            job_id = %job.id,
            received = results.images.len(),
            expected = ?job.expected_images,
            "Request finished",
        );

        if let Err(e) = ensure_open(&mut *document) {
            return JobOutcome::Failed(OrchestratorError::DocumentUnavailable(e.to_string()));
        }
        match reconciler::reconcile(
            &mut *document,
            &results,
            job.region,
            &job.instructions,
            self.profile.returns_grid,
        ) {
            Ok(Placement { layers, group }) => JobOutcome::Completed {
                layers,
                group,
                caption: results.caption,
            },
            Err(e) => JobOutcome::Failed(e),
        }
    }

    fn render_preview(&self, job: &mut Job, image: &str) {
        let region = job.placement_region();
        let rendered = {
            let mut document = lock(&self.document);
            job.preview.render(&mut *document, image, region)
        };
        match rendered {
            Ok(layer) => self.events.publish(JobEvent::PreviewUpdated { job_id: job.id, layer }),
            Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Cannot render preview"),
        }
    }

    /// Best effort: a failed or unanswered interrupt is logged and the
    /// teardown carries on.
    async fn interrupt_remote(&self, job_id: JobId) {
        match tokio::time::timeout(INTERRUPT_TIMEOUT, self.backend.interrupt()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(job_id = %job_id, error = %e, "Interrupt request failed"),
            Err(_) => tracing::warn!(
                job_id = %job_id,
                timeout_secs = INTERRUPT_TIMEOUT.as_secs(),
                "Interrupt request timed out",
            ),
        }
    }

    fn transition(&self, job: &mut Job, next: JobState) {
        let from = job.transition(next);
        self.publish_transition(job.id, from, next);
    }

    fn publish_transition(&self, job_id: JobId, from: JobState, to: JobState) {
        if let Some(active) = lock(&self.slot).as_mut().filter(|active| active.id == job_id) {
            active.state = to;
        }
        tracing::info!(job_id = %job_id, %from, %to, "Job state changed");
        self.events.publish(JobEvent::StateChanged { job_id, from, to });
    }
}

/// Why polling stopped without a Result Set.
enum Stop {
    Cancelled,
    Failed(OrchestratorError),
}

fn joined_result(
    joined: Result<Result<ResultSet, OrchestratorError>, tokio::task::JoinError>,
) -> Result<ResultSet, Stop> {
    match joined {
        Ok(Ok(results)) => Ok(results),
        Ok(Err(e)) => Err(Stop::Failed(e)),
        Err(e) => Err(Stop::Failed(OrchestratorError::Worker(e.to_string()))),
    }
}
