//! Bounded polling of a conversion job's status.
//!
//! [`JobPoller::start`] ticks every [`POLL_INTERVAL`], calling the supplied
//! status check once per tick, until the job reports a terminal status or
//! [`MAX_POLL_ATTEMPTS`] ticks have passed. Running out of attempts is
//! reported as [`PollOutcome::TimedOut`], distinct from a job that failed.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use servicedesk_core::timer::Ticker;
use tokio_util::sync::CancellationToken;

use crate::api::JobStatus;

/// Delay between status checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Status checks before giving up (about two minutes at [`POLL_INTERVAL`]).
pub const MAX_POLL_ATTEMPTS: u32 = 60;

/// How a polling run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// `completed` or `passthrough`: the artifact can be fetched.
    Succeeded,
    Failed(String),
    Unsupported(String),
    /// The attempt budget ran out while the job was still pending.
    TimedOut,
    /// [`JobPoller::stop`] was called, or a newer run superseded this one.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub outcome: PollOutcome,
    /// Status checks performed.
    pub attempts: u32,
}

pub struct JobPoller {
    interval: Duration,
    max_attempts: u32,
    current: Mutex<CancellationToken>,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self::new(POLL_INTERVAL, MAX_POLL_ATTEMPTS)
    }
}

impl JobPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            current: Mutex::new(CancellationToken::new()),
        }
    }

    /// Poll `check_status` until a terminal status, the attempt budget, or
    /// [`stop`](Self::stop).
    ///
    /// Starting a new run stops the previous one. A failed check (transport
    /// error) is logged and counts as an attempt.
    pub async fn start<F, Fut, E>(&self, mut check_status: F) -> PollReport
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<JobStatus, E>>,
        E: Display,
    {
        let cancel = self.supersede();
        let mut ticker = Ticker::new();
        if let Err(e) = ticker.start(self.interval) {
            tracing::error!(error = %e, "Cannot poll conversion job");
            return PollReport {
                outcome: PollOutcome::Failed(e.to_string()),
                attempts: 0,
            };
        }
        let mut attempts = 0;

        let outcome = loop {
            if attempts >= self.max_attempts {
                tracing::warn!(attempts, "Conversion job still pending, giving up");
                break PollOutcome::TimedOut;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break PollOutcome::Cancelled,
                _ = ticker.tick() => {}
            }
            attempts += 1;

            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => break PollOutcome::Cancelled,
                status = check_status() => status,
            };

            match status {
                Ok(JobStatus::Pending) => {
                    tracing::debug!(attempt = attempts, "Conversion job pending");
                }
                Ok(JobStatus::Completed | JobStatus::Passthrough) => break PollOutcome::Succeeded,
                Ok(JobStatus::Failed(message)) => break PollOutcome::Failed(message),
                Ok(JobStatus::NotSupported(message)) => break PollOutcome::Unsupported(message),
                Err(e) => {
                    tracing::warn!(attempt = attempts, error = %e, "Conversion status check failed");
                }
            }
        };

        ticker.stop();
        PollReport { outcome, attempts }
    }

    /// Cancel the run in progress. No further check fires, even one whose
    /// tick is already due.
    pub fn stop(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    fn supersede(&self) -> CancellationToken {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.cancel();
        *current = CancellationToken::new();
        current.clone()
    }
}
