//! Errors an acquisition surfaces to the host.

use std::path::PathBuf;

use thiserror::Error;

use super::retry::AcquisitionAttempt;

/// Manual fallback offered when every strategy failed.
pub(crate) const MANUAL_FALLBACK_SUGGESTION: &str =
    "Save the document from the viewer manually, or capture the full page instead.";

/// Terminal failures of an acquisition.
///
/// Strategy-level failures never appear here; the orchestrator absorbs them.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Every attempt ran without a validated PDF.
    #[error(
        "no PDF found at {url} after {count} attempts\n  Suggestion: {manual}{proxy}",
        count = .attempts.len(),
        manual = MANUAL_FALLBACK_SUGGESTION,
        proxy = proxy_suggestion(.proxy_retry_url.as_deref())
    )]
    Exhausted {
        /// URL displayed when the acquisition started.
        url: String,
        /// Attempts that ran.
        attempts: Vec<AcquisitionAttempt>,
        /// Last strategy failure, for diagnostics.
        last_failure: Option<String>,
        /// Proxy-prefixed URL the user can retry through.
        proxy_retry_url: Option<String>,
    },

    /// The acquisition was invalidated by navigation, teardown or a prior
    /// capture. Never shown to the user.
    #[error("acquisition cancelled")]
    Cancelled,

    /// The session displays nothing to capture.
    #[error("browsing session has no current URL")]
    NoCurrentUrl,

    /// The configured temp directory cannot be used.
    #[error("temp directory {path} is not usable: {source}")]
    TempDir {
        /// Configured directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

fn proxy_suggestion(proxy_retry_url: Option<&str>) -> String {
    proxy_retry_url
        .map(|url| format!("\n  Retry through the library proxy: {url}"))
        .unwrap_or_default()
}

impl AcquireError {
    /// True when the host should show this error to the user.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
