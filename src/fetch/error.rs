//! Error types for the fetch strategies.
//!
//! Every variant carries the URL that failed so diagnostics stay useful once
//! the orchestrator has absorbed the error and moved on to the next strategy.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionError;

/// Errors from a single fetch or download strategy.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP status other than an auth challenge.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Authentication challenge or login-page redirect.
    ///
    /// Status is 401, 403, 407, or 0 for a login redirect.
    #[error(
        "[AUTH] authentication required for {domain} (HTTP {status}) fetching {url}\n  Suggestion: {suggestion}"
    )]
    AuthRequired {
        /// The URL that requires authentication.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The domain requiring authentication.
        domain: String,
        /// User-facing suggestion for resolving the auth issue.
        suggestion: &'static str,
    },

    /// The URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Temp file error during a native download.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The host session's own network stack failed.
    #[error("native download of {url} failed: {source}")]
    Session {
        /// The URL being downloaded.
        url: String,
        /// The host error.
        #[source]
        source: SessionError,
    },

    /// The acquisition was cancelled while this strategy was in flight.
    #[error("cancelled while fetching {url}")]
    Cancelled {
        /// The URL being fetched.
        url: String,
    },
}

/// Coarse classification used for attempt bookkeeping and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport failure; try the next strategy.
    Network,
    /// Auth challenge; treated like a network failure for retries.
    AuthenticationRequired,
    /// Local failure (temp storage, malformed URL).
    Local,
    /// Acquisition invalidated; discard silently.
    Cancelled,
}

impl FetchError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Wraps a host session failure.
    pub fn session(url: impl Into<String>, source: SessionError) -> Self {
        Self::Session {
            url: url.into(),
            source,
        }
    }

    /// Creates a cancellation marker.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates an authentication-required error.
    ///
    /// 407 suggests checking the library proxy; everything else suggests
    /// signing in through the browsing session.
    pub fn auth_required(url: impl Into<String>, status: u16, domain: impl Into<String>) -> Self {
        let suggestion = if status == 407 {
            "Check the library proxy URL and proxy credentials."
        } else {
            "Sign in through the browsing session, then capture again."
        };
        Self::AuthRequired {
            url: url.into(),
            status,
            domain: domain.into(),
            suggestion,
        }
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::HttpStatus { .. }
            | Self::Session { .. } => FailureKind::Network,
            Self::AuthRequired { .. } => FailureKind::AuthenticationRequired,
            Self::InvalidUrl { .. } | Self::Io { .. } => FailureKind::Local,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    /// True for errors that later attempts or other strategies may get past.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::Network | FailureKind::AuthenticationRequired
        )
    }
}
