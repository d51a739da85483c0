//! Acquisition: turning "the session shows a paper" into one validated PDF.
//!
//! # Architecture
//!
//! - [`DetectionOrchestrator`] - per-session state machine consuming
//!   [`crate::session::SessionEvent`]s
//! - [`RetryScheduler`] - fixed-offset attempt timing with cancellation
//! - [`CaptureSink`] - at-most-once delivery of the captured bytes
//! - [`suggested_filename`] - filename derivation for the host's save dialog
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use capture_core::acquire::{DetectionOrchestrator, Trigger};
//! use capture_core::config::EngineConfig;
//! use capture_core::session::HttpSession;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Arc::new(HttpSession::new(Vec::new(), None)?);
//! let orchestrator = DetectionOrchestrator::new(session, &EngineConfig::default(), |capture| {
//!     println!("captured {} bytes as {}", capture.bytes.len(), capture.suggested_filename);
//! });
//! let report = orchestrator.acquire(Trigger::Manual).await?;
//! println!("{:?}", report.status);
//! # Ok(())
//! # }
//! ```

mod error;
mod filename;
mod orchestrator;
mod retry;
mod sink;
mod state;

pub use error::AcquireError;
pub use filename::{PublicationHint, resolve_unique_path, suggested_filename};
pub use orchestrator::DetectionOrchestrator;
pub use retry::{
    AcquisitionAttempt, AttemptOutcome, DEFAULT_RETRY_OFFSETS, RetryScheduler, ScheduleOutcome,
    ScheduleReport,
};
pub use sink::{CaptureResult, CaptureSink};
pub use state::{AcquisitionState, CaptureReport, CaptureStatus, Trigger};
