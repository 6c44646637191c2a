//! The conversion view state machine.
//!
//! ```text
//! idle --view--> loading --fetch--> ready | processing | failed | not_supported
//! loading --202, first status check terminal--> ready | failed | not_supported
//! processing --poll succeeded--> loading --re-fetch--> ready | failed | not_supported
//! processing --poll failed | timed out--> failed
//! processing --poll unsupported--> not_supported
//! any --reset--> idle
//! any --view | force_refresh--> loading
//! ```
//!
//! [`transition`] is the pure table. [`ConversionViewer`] drives it for one
//! attachment at a time: each `view` / `force_refresh` bumps a generation
//! and cancels the previous run, so a late result from a superseded run is
//! dropped before it can touch the state. The artifact handle is allocated
//! only while entering `ready` and released exactly once when leaving it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use servicedesk_core::types::DbId;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::api::{Artifact, ConversionSource, FetchOutcome, JobStatus};
use crate::artifact::{ArtifactHandle, ArtifactStore};
use crate::poller::{JobPoller, PollOutcome, MAX_POLL_ATTEMPTS, POLL_INTERVAL};

/// Capacity of the transition broadcast channel.
const TRANSITION_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    #[default]
    Idle,
    Loading,
    Processing,
    Ready,
    Failed,
    NotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionEvent {
    View,
    ForceRefresh,
    Reset,
    FetchReady,
    FetchProcessing,
    FetchFailed,
    FetchNotSupported,
    PollSucceeded,
    PollFailed,
    PollUnsupported,
    PollTimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("No transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: ConversionStatus,
    pub event: ConversionEvent,
}

/// The transition table.
pub fn transition(
    from: ConversionStatus,
    event: ConversionEvent,
) -> Result<ConversionStatus, InvalidTransition> {
    use ConversionEvent as E;
    use ConversionStatus as S;

    let to = match (from, event) {
        (_, E::Reset) => S::Idle,
        (_, E::View | E::ForceRefresh) => S::Loading,
        (S::Loading, E::FetchReady) => S::Ready,
        (S::Loading, E::FetchProcessing) => S::Processing,
        (S::Loading, E::FetchFailed) => S::Failed,
        (S::Loading, E::FetchNotSupported) => S::NotSupported,
        (S::Processing, E::PollSucceeded) => S::Loading,
        (S::Processing, E::PollFailed | E::PollTimedOut) => S::Failed,
        (S::Processing, E::PollUnsupported) => S::NotSupported,
        _ => return Err(InvalidTransition { from, event }),
    };
    Ok(to)
}

/// Observable state of the viewer's current job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionJob {
    pub attachment_id: Option<DbId>,
    pub status: ConversionStatus,
    /// Status checks performed by the current run.
    pub poll_count: u32,
    #[serde(skip)]
    pub artifact: Option<ArtifactHandle>,
    /// Set in `failed` and `not_supported`.
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            max_poll_attempts: MAX_POLL_ATTEMPTS,
        }
    }
}

struct Inner {
    job: ConversionJob,
    generation: u64,
    cancel: CancellationToken,
}

/// State shared between the viewer handle and its run task.
struct Shared {
    inner: Mutex<Inner>,
    artifacts: Arc<ArtifactStore>,
    state_tx: watch::Sender<ConversionJob>,
    transition_tx: broadcast::Sender<ConversionStatus>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `event` for run `generation`. Returns `false` when the run was
    /// superseded or the event is not valid in the current state.
    fn apply<F>(&self, generation: u64, event: ConversionEvent, update: F) -> bool
    where
        F: FnOnce(&mut ConversionJob, &ArtifactStore),
    {
        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::debug!(?event, "Dropping event from superseded conversion run");
            return false;
        }
        self.step(&mut inner, event, update)
    }

    fn step<F>(&self, inner: &mut Inner, event: ConversionEvent, update: F) -> bool
    where
        F: FnOnce(&mut ConversionJob, &ArtifactStore),
    {
        let next = match transition(inner.job.status, event) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring invalid conversion transition");
                return false;
            }
        };

        if inner.job.status == ConversionStatus::Ready {
            if let Some(handle) = inner.job.artifact.take() {
                self.artifacts.release(handle);
            }
        }
        inner.job.status = next;
        update(&mut inner.job, &self.artifacts);

        tracing::debug!(
            attachment_id = ?inner.job.attachment_id,
            status = ?next,
            "Conversion state changed"
        );
        self.state_tx.send_replace(inner.job.clone());
        let _ = self.transition_tx.send(next);
        true
    }

    /// Supersede the current run and apply `event` (view, force refresh or
    /// reset). Returns the new run's generation and cancel token.
    fn restart(&self, event: ConversionEvent, attachment_id: Option<DbId>) -> (u64, CancellationToken) {
        let mut inner = self.lock();
        inner.cancel.cancel();
        inner.cancel = CancellationToken::new();
        inner.generation += 1;
        self.step(&mut inner, event, |job, _| {
            job.attachment_id = attachment_id;
            job.poll_count = 0;
            job.error_message = None;
        });
        (inner.generation, inner.cancel.clone())
    }

    fn record_poll(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation {
            inner.job.poll_count += 1;
            self.state_tx.send_replace(inner.job.clone());
        }
    }
}

/// Drives the conversion view for one attachment at a time.
///
/// Dropping the viewer behaves like [`reset`](Self::reset).
pub struct ConversionViewer {
    shared: Arc<Shared>,
    source: Arc<dyn ConversionSource>,
    config: ViewerConfig,
}

impl ConversionViewer {
    pub fn new(source: Arc<dyn ConversionSource>, artifacts: Arc<ArtifactStore>) -> Self {
        Self::with_config(source, artifacts, ViewerConfig::default())
    }

    pub fn with_config(
        source: Arc<dyn ConversionSource>,
        artifacts: Arc<ArtifactStore>,
        config: ViewerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConversionJob::default());
        let (transition_tx, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                job: ConversionJob::default(),
                generation: 0,
                cancel: CancellationToken::new(),
            }),
            artifacts,
            state_tx,
            transition_tx,
        });
        Self {
            shared,
            source,
            config,
        }
    }

    /// Start viewing `attachment_id`, superseding any current run.
    pub fn view(&self, attachment_id: DbId) {
        self.launch(attachment_id, false);
    }

    /// Like [`view`](Self::view), but the first fetch bypasses the server's
    /// cached artifact.
    pub fn force_refresh(&self, attachment_id: DbId) {
        self.launch(attachment_id, true);
    }

    /// Cancel any run, release any held artifact and return to `idle`.
    pub fn reset(&self) {
        self.shared.restart(ConversionEvent::Reset, None);
    }

    pub fn state(&self) -> ConversionJob {
        self.shared.lock().job.clone()
    }

    pub fn status(&self) -> ConversionStatus {
        self.shared.lock().job.status
    }

    /// Latest-state receiver.
    pub fn watch(&self) -> watch::Receiver<ConversionJob> {
        self.shared.state_tx.subscribe()
    }

    /// Every status transition, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversionStatus> {
        self.shared.transition_tx.subscribe()
    }

    /// The artifact behind the current `ready` state.
    pub fn artifact(&self) -> Option<Arc<Artifact>> {
        let handle = self.shared.lock().job.artifact?;
        self.shared.artifacts.get(handle)
    }

    fn launch(&self, attachment_id: DbId, refresh: bool) {
        let event = if refresh {
            ConversionEvent::ForceRefresh
        } else {
            ConversionEvent::View
        };
        let (generation, cancel) = self.shared.restart(event, Some(attachment_id));
        tracing::info!(attachment_id, refresh, "Viewing attachment");

        let run = Run {
            shared: Arc::clone(&self.shared),
            source: Arc::clone(&self.source),
            config: self.config.clone(),
            attachment_id,
            generation,
        };
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = run.drive(refresh) => {}
            }
        });
    }
}

impl Drop for ConversionViewer {
    fn drop(&mut self) {
        self.reset();
    }
}

/// One view / force-refresh run.
struct Run {
    shared: Arc<Shared>,
    source: Arc<dyn ConversionSource>,
    config: ViewerConfig,
    attachment_id: DbId,
    generation: u64,
}

impl Run {
    async fn drive(self, refresh: bool) {
        if !self.fetch(refresh).await {
            return;
        }

        let poller = JobPoller::new(self.config.poll_interval, self.config.max_poll_attempts);
        let report = poller
            .start(|| {
                self.shared.record_poll(self.generation);
                let source = Arc::clone(&self.source);
                let attachment_id = self.attachment_id;
                async move { source.check_status(attachment_id).await }
            })
            .await;
        tracing::debug!(
            attachment_id = self.attachment_id,
            attempts = report.attempts,
            outcome = ?report.outcome,
            "Conversion polling finished"
        );

        match report.outcome {
            PollOutcome::Succeeded => {
                if self.apply(ConversionEvent::PollSucceeded, None) {
                    self.refetch().await;
                }
            }
            PollOutcome::Failed(message) => {
                self.apply(ConversionEvent::PollFailed, Some(message));
            }
            PollOutcome::Unsupported(message) => {
                self.apply(ConversionEvent::PollUnsupported, Some(message));
            }
            PollOutcome::TimedOut => {
                let message = format!(
                    "Conversion did not finish after {} status checks",
                    report.attempts
                );
                self.apply(ConversionEvent::PollTimedOut, Some(message));
            }
            PollOutcome::Cancelled => {}
        }
    }

    /// Initial fetch. Returns `true` when the job is still processing and
    /// polling should start.
    async fn fetch(&self, refresh: bool) -> bool {
        match self.source.fetch_artifact(self.attachment_id, refresh).await {
            Ok(FetchOutcome::Processing) => self.first_status().await,
            other => {
                self.settle(other);
                false
            }
        }
    }

    /// Status check right after the server accepted the job, before any
    /// poll tick. A job that is already settled never enters `processing`.
    async fn first_status(&self) -> bool {
        match self.source.check_status(self.attachment_id).await {
            Ok(JobStatus::Pending) => self.apply(ConversionEvent::FetchProcessing, None),
            Ok(JobStatus::Completed | JobStatus::Passthrough) => {
                self.refetch().await;
                false
            }
            Ok(JobStatus::Failed(message)) => {
                self.apply(ConversionEvent::FetchFailed, Some(message));
                false
            }
            Ok(JobStatus::NotSupported(message)) => {
                self.apply(ConversionEvent::FetchNotSupported, Some(message));
                false
            }
            Err(e) => {
                tracing::warn!(attachment_id = self.attachment_id, error = %e, "Conversion status check failed");
                self.apply(ConversionEvent::FetchProcessing, None)
            }
        }
    }

    /// Fetch after the job reported success. Still processing at this point
    /// is a failure.
    async fn refetch(&self) {
        match self.source.fetch_artifact(self.attachment_id, false).await {
            Ok(FetchOutcome::Processing) => {
                self.apply(
                    ConversionEvent::FetchFailed,
                    Some("Conversion finished but the preview is not available".to_string()),
                );
            }
            other => self.settle(other),
        }
    }

    fn settle(&self, outcome: Result<FetchOutcome, crate::api::ConversionApiError>) {
        match outcome {
            Ok(FetchOutcome::Ready(artifact)) => {
                self.shared
                    .apply(self.generation, ConversionEvent::FetchReady, |job, artifacts| {
                        job.artifact = Some(artifacts.allocate(artifact));
                        job.error_message = None;
                    });
            }
            Ok(FetchOutcome::NotSupported(message)) => {
                self.apply(ConversionEvent::FetchNotSupported, Some(message));
            }
            Ok(FetchOutcome::Failed(message)) => {
                self.apply(ConversionEvent::FetchFailed, Some(message));
            }
            Ok(FetchOutcome::Processing) => {
                self.apply(ConversionEvent::FetchProcessing, None);
            }
            Err(e) => {
                tracing::warn!(attachment_id = self.attachment_id, error = %e, "Artifact fetch failed");
                self.apply(ConversionEvent::FetchFailed, Some(e.to_string()));
            }
        }
    }

    fn apply(&self, event: ConversionEvent, error_message: Option<String>) -> bool {
        self.shared.apply(self.generation, event, |job, _| {
            job.error_message = error_message;
        })
    }
}
