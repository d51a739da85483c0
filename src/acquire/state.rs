//! Observable orchestrator state and acquisition reports.

use std::path::PathBuf;

use serde::Serialize;

use super::error::AcquireError;
use super::retry::AcquisitionAttempt;
use super::sink::CaptureResult;
use crate::session::{ResponseSignal, SourceKind};

/// What started an acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The host reported a finished navigation with this response.
    NavigationFinished(ResponseSignal),
    /// The user asked to capture the displayed resource.
    Manual,
}

impl Trigger {
    pub(crate) fn signal(&self) -> Option<&ResponseSignal> {
        match self {
            Self::NavigationFinished(signal) => Some(signal),
            Self::Manual => None,
        }
    }
}

/// Orchestrator state, published on a `watch` channel.
///
/// `Idle -> AwaitingSignal -> Attempting -> {Succeeded | Exhausted | Cancelled}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AcquisitionState {
    /// No acquisition has started.
    Idle,
    /// A trigger arrived; the response signal is being classified.
    AwaitingSignal,
    /// Detection attempt `attempt` is running.
    Attempting {
        /// 1-based attempt number.
        attempt: usize,
    },
    /// A capture was delivered.
    Succeeded {
        /// URL the bytes came from.
        source_url: String,
    },
    /// The retry budget ran out.
    Exhausted {
        /// Attempts that ran.
        attempts: usize,
        /// User-facing message.
        message: String,
    },
    /// Invalidated by navigation or teardown.
    Cancelled,
}

impl AcquisitionState {
    /// True for `Succeeded`, `Exhausted` and `Cancelled`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Exhausted { .. } | Self::Cancelled
        )
    }
}

/// Final status of an acquisition, for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    /// A PDF was captured.
    Captured,
    /// Every attempt failed.
    Exhausted,
    /// The acquisition was invalidated.
    Cancelled,
    /// The engine could not run (no URL, unusable temp directory).
    Failed,
}

/// Serializable summary of one acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureReport {
    /// Final status.
    pub status: CaptureStatus,
    /// URL displayed when the acquisition started.
    pub url: String,
    /// URL the bytes came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// How the source URL was discovered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<SourceKind>,
    /// Filename offered to the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_filename: Option<String>,
    /// Size of the captured document.
    pub bytes: usize,
    /// Where the host saved the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<PathBuf>,
    /// Detection attempts that ran.
    pub attempts: Vec<AcquisitionAttempt>,
    /// User-facing message for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CaptureReport {
    pub(crate) fn captured(url: &str, result: &CaptureResult) -> Self {
        Self {
            status: CaptureStatus::Captured,
            url: url.to_string(),
            source_url: Some(result.source_url.clone()),
            source_kind: Some(result.source_kind),
            suggested_filename: Some(result.suggested_filename.clone()),
            bytes: result.bytes.len(),
            saved_to: None,
            attempts: Vec::new(),
            message: None,
        }
    }

    /// Builds the report for a failed acquisition of `url`.
    #[must_use]
    pub fn from_error(url: &str, error: &AcquireError) -> Self {
        let (status, attempts) = match error {
            AcquireError::Exhausted { attempts, .. } => (CaptureStatus::Exhausted, attempts.clone()),
            AcquireError::Cancelled => (CaptureStatus::Cancelled, Vec::new()),
            AcquireError::NoCurrentUrl | AcquireError::TempDir { .. } => {
                (CaptureStatus::Failed, Vec::new())
            }
        };
        Self {
            status,
            url: url.to_string(),
            source_url: None,
            source_kind: None,
            suggested_filename: None,
            bytes: 0,
            saved_to: None,
            attempts,
            message: error.is_user_visible().then(|| error.to_string()),
        }
    }

    /// Records where the host saved the document.
    #[must_use]
    pub fn with_saved_to(mut self, path: PathBuf) -> Self {
        self.saved_to = Some(path);
        self
    }
}
