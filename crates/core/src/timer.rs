//! Cancellable timers for use inside `tokio::select!` loops.
//!
//! A [`Timer`] is a one-shot deadline that can be re-armed or cancelled;
//! a [`Ticker`] is a periodic interval that can be started or stopped.
//! While unarmed/stopped, waiting on either never completes, so a select
//! branch on an idle timer is simply inert. Teardown is a matter of
//! calling `cancel()` / `stop()` on every timer the owner holds.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};

use crate::error::CoreError;

/// A one-shot, re-armable deadline.
#[derive(Debug, Default)]
pub struct Timer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to fire after `delay`, replacing any pending deadline.
    pub fn arm(&mut self, delay: Duration) {
        self.sleep = Some(Box::pin(tokio::time::sleep(delay)));
    }

    /// Cancel the pending deadline. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.sleep.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolve when the armed deadline passes; pend forever when unarmed.
    ///
    /// Cancel safe: dropping the future before it resolves leaves the
    /// deadline armed.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending::<()>().await,
        }
    }
}

/// A stoppable periodic tick.
#[derive(Debug, Default)]
pub struct Ticker {
    interval: Option<Interval>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking every `period`, first tick one period from now.
    ///
    /// Restarting an already running ticker resets its phase. A zero
    /// period is refused and leaves the ticker stopped.
    pub fn start(&mut self, period: Duration) -> Result<(), CoreError> {
        if period.is_zero() {
            self.interval = None;
            return Err(CoreError::Validation("ticker period must be non-zero".into()));
        }
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        Ok(())
    }

    /// Stop ticking. Returns whether the ticker was running.
    pub fn stop(&mut self) -> bool {
        self.interval.take().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Resolve on the next tick; pend forever when stopped.
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => pending().await,
        }
    }
}
