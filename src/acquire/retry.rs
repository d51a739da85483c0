//! Fixed-offset retry schedule for detection attempts.
//!
//! Publisher PDFs frequently render after the "page load finished" signal, so
//! one acquisition runs several detection attempts on a short fixed schedule.
//!
//! # Overview
//!
//! [`RetryScheduler`] runs attempt `n` at `offsets[n]` measured from the start
//! of the acquisition (not from the end of the previous attempt). Before each
//! attempt it re-checks whether a capture already exists and short-circuits;
//! after a successful attempt nothing further is scheduled. Cancellation is
//! honored while waiting and between attempts.
//!
//! # Example
//!
//! ```
//! use capture_core::acquire::{AttemptOutcome, RetryScheduler, ScheduleOutcome};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let scheduler = RetryScheduler::from_millis(&[0, 5]);
//! let report = scheduler
//!     .run(&CancellationToken::new(), || false, |_attempt| async {
//!         AttemptOutcome::NotPdf
//!     })
//!     .await;
//! assert_eq!(report.outcome, ScheduleOutcome::Exhausted);
//! assert_eq!(report.attempts.len(), 2);
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Attempt offsets from acquisition start: 0, 1000, 2000 and 3000 ms.
pub const DEFAULT_RETRY_OFFSETS: [Duration; 4] = [
    Duration::from_millis(0),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
    Duration::from_millis(3000),
];

/// Result of one detection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Not run yet, or interrupted before it could finish.
    Pending,
    /// Strategies ran but no payload passed the magic-byte check.
    NotPdf,
    /// At least one strategy failed at the transport or auth level.
    NetworkError,
    /// A validated PDF was delivered.
    Success,
}

/// One scheduled detection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionAttempt {
    /// 1-based attempt number.
    pub attempt_number: usize,
    /// Offset from acquisition start.
    #[serde(serialize_with = "serialize_millis")]
    pub scheduled_delay: Duration,
    /// What the attempt produced.
    pub outcome: AttemptOutcome,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_millis<S: serde::Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
}

/// How a schedule ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleOutcome {
    /// A capture exists (from an attempt or a faster path).
    Succeeded,
    /// Every attempt ran without a capture.
    Exhausted,
    /// The cancellation token fired.
    Cancelled,
}

/// Outcome plus the attempts that ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    /// How the schedule ended.
    pub outcome: ScheduleOutcome,
    /// Attempts that ran, in order.
    pub attempts: Vec<AcquisitionAttempt>,
}

/// Runs detection attempts at fixed offsets.
///
/// # Default Values
///
/// - offsets: 0, 1000, 2000, 3000 ms
/// - maximum attempts: one per offset (4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryScheduler {
    offsets: Vec<Duration>,
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self {
            offsets: DEFAULT_RETRY_OFFSETS.to_vec(),
        }
    }
}

impl RetryScheduler {
    /// Creates a scheduler with custom offsets.
    ///
    /// Offsets are sorted; an empty list falls back to the defaults.
    #[must_use]
    pub fn new(mut offsets: Vec<Duration>) -> Self {
        if offsets.is_empty() {
            return Self::default();
        }
        offsets.sort();
        Self { offsets }
    }

    /// Creates a scheduler from millisecond offsets.
    #[must_use]
    pub fn from_millis(offsets_ms: &[u64]) -> Self {
        Self::new(offsets_ms.iter().copied().map(Duration::from_millis).collect())
    }

    /// Offsets from acquisition start.
    #[must_use]
    pub fn offsets(&self) -> &[Duration] {
        &self.offsets
    }

    /// Hard cap on attempts per acquisition.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.offsets.len()
    }

    /// Runs attempts until one succeeds, the budget is spent, or `cancel` fires.
    ///
    /// Offsets are measured from now. `already_captured` is consulted before
    /// and after every attempt.
    pub async fn run<C, F, Fut>(
        &self,
        cancel: &CancellationToken,
        already_captured: C,
        attempt: F,
    ) -> ScheduleReport
    where
        C: Fn() -> bool,
        F: FnMut(AcquisitionAttempt) -> Fut,
        Fut: Future<Output = AttemptOutcome>,
    {
        self.run_from(Instant::now(), cancel, already_captured, attempt)
            .await
    }

    /// Like [`run`](Self::run), with offsets measured from `start`.
    ///
    /// Offsets already in the past fire immediately, one attempt at a time.
    #[instrument(skip_all, fields(max_attempts = self.offsets.len()))]
    pub async fn run_from<C, F, Fut>(
        &self,
        start: Instant,
        cancel: &CancellationToken,
        already_captured: C,
        mut attempt: F,
    ) -> ScheduleReport
    where
        C: Fn() -> bool,
        F: FnMut(AcquisitionAttempt) -> Fut,
        Fut: Future<Output = AttemptOutcome>,
    {
        let mut attempts = Vec::with_capacity(self.offsets.len());
        let finish = |outcome, attempts| ScheduleReport { outcome, attempts };

        for (index, offset) in self.offsets.iter().enumerate() {
            let scheduled = AcquisitionAttempt {
                attempt_number: index + 1,
                scheduled_delay: *offset,
                outcome: AttemptOutcome::Pending,
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(attempt = scheduled.attempt_number, "cancelled while waiting");
                    return finish(ScheduleOutcome::Cancelled, attempts);
                }
                () = sleep_until(start + *offset) => {}
            }

            if already_captured() {
                debug!(attempt = scheduled.attempt_number, "already captured; short-circuit");
                return finish(ScheduleOutcome::Succeeded, attempts);
            }

            debug!(
                attempt = scheduled.attempt_number,
                offset_ms = u64::try_from(offset.as_millis()).unwrap_or(u64::MAX),
                "running attempt"
            );
            let outcome = attempt(scheduled.clone()).await;
            attempts.push(AcquisitionAttempt {
                outcome,
                ..scheduled
            });

            if outcome == AttemptOutcome::Success || already_captured() {
                return finish(ScheduleOutcome::Succeeded, attempts);
            }
            if cancel.is_cancelled() {
                return finish(ScheduleOutcome::Cancelled, attempts);
            }
        }

        debug!(attempts = attempts.len(), "retry budget exhausted");
        finish(ScheduleOutcome::Exhausted, attempts)
    }
}
