//! Behaviour tests for `ConversionViewer`, driven by a scripted source on a
//! paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use servicedesk_conversion::{
    Artifact, ArtifactStore, ConversionApiError, ConversionJob, ConversionSource, ConversionStatus,
    ConversionViewer, FetchOutcome, JobStatus, MAX_POLL_ATTEMPTS,
};
use servicedesk_core::types::DbId;
use tokio::sync::broadcast;
use tokio::time::Instant;

use ConversionStatus::{Failed, Loading, NotSupported, Processing, Ready};

// ---------------------------------------------------------------------------
// Scripted source
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedSource {
    /// Each fetch answers with the next entry after its delay.
    fetches: Mutex<VecDeque<(Duration, Result<FetchOutcome, u16>)>>,
    /// Each status check answers with the next entry, then `Pending`.
    statuses: Mutex<VecDeque<JobStatus>>,
    status_calls: AtomicU32,
    fetch_log: Mutex<Vec<(DbId, bool)>>,
}

impl ScriptedSource {
    fn new(fetches: Vec<FetchOutcome>, statuses: Vec<JobStatus>) -> Arc<Self> {
        let source = Self::default();
        source
            .fetches
            .lock()
            .unwrap()
            .extend(fetches.into_iter().map(|f| (Duration::ZERO, Ok(f))));
        source.statuses.lock().unwrap().extend(statuses);
        Arc::new(source)
    }

    fn push_fetch(&self, delay: Duration, outcome: Result<FetchOutcome, u16>) {
        self.fetches.lock().unwrap().push_back((delay, outcome));
    }

    fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn fetch_log(&self) -> Vec<(DbId, bool)> {
        self.fetch_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversionSource for ScriptedSource {
    async fn check_status(&self, _attachment_id: DbId) -> Result<JobStatus, ConversionApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(JobStatus::Pending))
    }

    async fn fetch_artifact(
        &self,
        attachment_id: DbId,
        refresh: bool,
    ) -> Result<FetchOutcome, ConversionApiError> {
        self.fetch_log.lock().unwrap().push((attachment_id, refresh));
        let next = self.fetches.lock().unwrap().pop_front();
        let (delay, outcome) = next.expect("unscripted fetch");
        tokio::time::sleep(delay).await;
        outcome.map_err(|status| ConversionApiError::Api {
            status,
            body: "upstream error".into(),
        })
    }
}

fn pdf(tag: &str) -> FetchOutcome {
    FetchOutcome::Ready(Artifact {
        bytes: format!("%PDF-1.7 {tag}").into_bytes(),
        content_type: "application/pdf".into(),
    })
}

fn viewer(source: &Arc<ScriptedSource>) -> (ConversionViewer, Arc<ArtifactStore>) {
    let artifacts = Arc::new(ArtifactStore::new());
    let viewer = ConversionViewer::new(source.clone(), artifacts.clone());
    (viewer, artifacts)
}

/// Collect transitions up to and including the next settled status.
async fn until_settled(transitions: &mut broadcast::Receiver<ConversionStatus>) -> Vec<ConversionStatus> {
    let mut seen = Vec::new();
    loop {
        let status = transitions.recv().await.unwrap();
        seen.push(status);
        if matches!(status, Ready | Failed | NotSupported) {
            return seen;
        }
    }
}

// ---------------------------------------------------------------------------
// Accepted job: pending at first, three poll ticks, then the artifact
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn processing_job_is_polled_until_ready() {
    let source = ScriptedSource::new(
        vec![FetchOutcome::Processing, pdf("42")],
        vec![
            JobStatus::Pending,
            JobStatus::Pending,
            JobStatus::Pending,
            JobStatus::Completed,
        ],
    );
    let (viewer, artifacts) = viewer(&source);
    let mut transitions = viewer.subscribe();
    let started = Instant::now();

    viewer.view(42);

    assert_eq!(
        until_settled(&mut transitions).await,
        vec![Loading, Processing, Loading, Ready]
    );
    assert_eq!(started.elapsed(), Duration::from_secs(6));
    // One check on acceptance, then one per tick.
    assert_eq!(source.status_calls(), 4);

    let state = viewer.state();
    assert_eq!(state.attachment_id, Some(42));
    assert_eq!(state.poll_count, 3);
    assert!(state.artifact.is_some());
    assert_eq!(state.error_message, None);
    assert_eq!(viewer.artifact().unwrap().content_type, "application/pdf");
    assert_eq!(artifacts.live_count(), 1);
}

// ---------------------------------------------------------------------------
// Settled jobs never poll
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unsupported_on_first_status_check_never_polls() {
    let source = ScriptedSource::new(
        vec![FetchOutcome::Processing],
        vec![JobStatus::NotSupported("Preview is not available for .dwg files".into())],
    );
    let (viewer, artifacts) = viewer(&source);
    let mut transitions = viewer.subscribe();

    viewer.view(7);

    assert_eq!(until_settled(&mut transitions).await, vec![Loading, NotSupported]);
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(source.status_calls(), 1);
    let state = viewer.state();
    assert_eq!(state.status, NotSupported);
    assert_eq!(state.poll_count, 0);
    assert_eq!(
        state.error_message.as_deref(),
        Some("Preview is not available for .dwg files")
    );
    assert_eq!(artifacts.allocated_total(), 0);
}

#[tokio::test(start_paused = true)]
async fn unsupported_fetch_response_settles_without_status_checks() {
    let source = ScriptedSource::new(
        vec![FetchOutcome::NotSupported("Preview is not available for .dwg files".into())],
        vec![],
    );
    let (viewer, _artifacts) = viewer(&source);
    let mut transitions = viewer.subscribe();

    viewer.view(7);

    assert_eq!(until_settled(&mut transitions).await, vec![Loading, NotSupported]);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn job_already_completed_on_first_check_is_fetched_without_polling() {
    let source = ScriptedSource::new(
        vec![FetchOutcome::Processing, pdf("fast")],
        vec![JobStatus::Completed],
    );
    let (viewer, _artifacts) = viewer(&source);
    let mut transitions = viewer.subscribe();
    let started = Instant::now();

    viewer.view(11);

    assert_eq!(until_settled(&mut transitions).await, vec![Loading, Ready]);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(viewer.state().poll_count, 0);
    assert_eq!(viewer.artifact().unwrap().bytes, b"%PDF-1.7 fast".to_vec());
}

#[tokio::test(start_paused = true)]
async fn unsupported_reported_by_later_poll_stops_polling() {
    let source = ScriptedSource::new(
        vec![FetchOutcome::Processing],
        vec![JobStatus::Pending, JobStatus::NotSupported("Encrypted document".into())],
    );
    let (viewer, _artifacts) = viewer(&source);
    let mut transitions = viewer.subscribe();

    viewer.view(7);

    assert_eq!(
        until_settled(&mut transitions).await,
        vec![Loading, Processing, NotSupported]
    );
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.status_calls(), 2);
    assert_eq!(viewer.state().poll_count, 1);
}

// ---------------------------------------------------------------------------
// Failure paths
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn job_that_never_finishes_times_out_as_failed() {
    let source = ScriptedSource::new(vec![FetchOutcome::Processing], vec![]);
    let (viewer, _artifacts) = viewer(&source);
    let mut transitions = viewer.subscribe();

    viewer.view(9);

    assert_eq!(until_settled(&mut transitions).await, vec![Loading, Processing, Failed]);
    assert_eq!(source.status_calls(), MAX_POLL_ATTEMPTS + 1);
    let state = viewer.state();
    assert_eq!(state.poll_count, MAX_POLL_ATTEMPTS);
    assert!(state.error_message.unwrap().contains("60"));
}

#[tokio::test(start_paused = true)]
async fn job_failure_carries_server_message() {
    let source = ScriptedSource::new(
        vec![FetchOutcome::Processing],
        vec![
            JobStatus::Pending,
            JobStatus::Pending,
            JobStatus::Failed("LibreOffice crashed".into()),
        ],
    );
    let (viewer, _artifacts) = viewer(&source);
    let mut transitions = viewer.subscribe();

    viewer.view(9);

    assert_eq!(until_settled(&mut transitions).await, vec![Loading, Processing, Failed]);
    assert_eq!(viewer.state().error_message.as_deref(), Some("LibreOffice crashed"));
}

#[tokio::test(start_paused = true)]
async fn transport_error_on_fetch_is_a_failed_state() {
    let source = ScriptedSource::new(vec![], vec![]);
    source.push_fetch(Duration::ZERO, Err(500));
    let (viewer, _artifacts) = viewer(&source);
    let mut transitions = viewer.subscribe();

    viewer.view(3);

    assert_eq!(until_settled(&mut transitions).await, vec![Loading, Failed]);
    assert_eq!(
        viewer.state().error_message.as_deref(),
        Some("Conversion API error (500): upstream error")
    );
}

// ---------------------------------------------------------------------------
// Artifact handle lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn every_handle_is_released_exactly_once() {
    let source = ScriptedSource::new(vec![pdf("a"), pdf("b")], vec![]);
    let (viewer, artifacts) = viewer(&source);
    let mut transitions = viewer.subscribe();

    viewer.view(1);
    until_settled(&mut transitions).await;
    assert_eq!(artifacts.live_count(), 1);

    // Superseding view leaves ready: first handle released.
    viewer.view(2);
    until_settled(&mut transitions).await;
    assert_eq!(artifacts.allocated_total(), 2);
    assert_eq!(artifacts.released_total(), 1);
    assert_eq!(artifacts.live_count(), 1);

    viewer.reset();
    assert_eq!(viewer.state(), ConversionJob::default());
    assert_eq!(artifacts.released_total(), 2);

    viewer.reset();
    drop(viewer);
    assert_eq!(artifacts.released_total(), 2);
    assert_eq!(artifacts.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn superseded_fetch_never_allocates() {
    let source = ScriptedSource::new(vec![], vec![]);
    source.push_fetch(Duration::from_secs(5), Ok(pdf("stale")));
    source.push_fetch(Duration::ZERO, Ok(pdf("fresh")));
    let (viewer, artifacts) = viewer(&source);

    viewer.view(1);
    tokio::time::sleep(Duration::from_secs(1)).await;
    viewer.view(2);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(artifacts.allocated_total(), 1);
    assert_eq!(viewer.state().attachment_id, Some(2));
    assert_eq!(viewer.artifact().unwrap().bytes, b"%PDF-1.7 fresh".to_vec());
}

#[tokio::test(start_paused = true)]
async fn force_refresh_bypasses_cache_and_replaces_handle() {
    let source = ScriptedSource::new(vec![pdf("v1"), pdf("v2")], vec![]);
    let (viewer, artifacts) = viewer(&source);
    let mut transitions = viewer.subscribe();

    viewer.view(5);
    until_settled(&mut transitions).await;
    viewer.force_refresh(5);
    assert_eq!(until_settled(&mut transitions).await, vec![Loading, Ready]);

    assert_eq!(source.fetch_log(), vec![(5, false), (5, true)]);
    assert_eq!(artifacts.released_total(), 1);
    assert_eq!(viewer.artifact().unwrap().bytes, b"%PDF-1.7 v2".to_vec());
}

#[tokio::test(start_paused = true)]
async fn dropping_viewer_stops_polling() {
    let source = ScriptedSource::new(vec![FetchOutcome::Processing], vec![]);
    let (viewer, _artifacts) = viewer(&source);

    viewer.view(8);
    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert_eq!(source.status_calls(), 3);

    drop(viewer);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(source.status_calls(), 3);
}
