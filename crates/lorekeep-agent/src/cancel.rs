//! Cooperative cancellation and the per-run wall-clock budget.
//!
//! Nothing here interrupts a call in flight. Stages check the budget before
//! each external call and wait only through [`RunBudget::sleep`], which wakes
//! early when the token is cancelled or the deadline passes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::ExternalError;

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Cancellation plus an optional deadline for one run.
#[derive(Debug, Clone)]
pub struct RunBudget {
    token: CancelToken,
    deadline: Option<Instant>,
}

impl RunBudget {
    /// Budget ending `limit` from now.
    #[must_use]
    pub fn new(token: CancelToken, limit: Duration) -> Self {
        Self {
            token,
            deadline: Instant::now().checked_add(limit),
        }
    }

    /// No deadline; only the token stops work.
    #[must_use]
    pub const fn unlimited(token: CancelToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    #[must_use]
    pub const fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Time left before the deadline. `None` when unlimited.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// `Err` once cancelled or out of time.
    pub fn check(&self) -> Result<(), ExternalError> {
        if self.token.is_cancelled() {
            return Err(ExternalError::Cancelled);
        }
        if self.remaining().is_some_and(|left| left.is_zero()) {
            return Err(ExternalError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Sleep for `duration`, returning early with `Err` on cancellation or
    /// when the deadline passes first.
    pub fn sleep(&self, duration: Duration) -> Result<(), ExternalError> {
        let wake = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= wake {
                return Ok(());
            }
            let mut slice = SLEEP_SLICE.min(wake - now);
            if let Some(left) = self.remaining() {
                slice = slice.min(left);
            }
            std::thread::sleep(slice);
        }
    }
}
