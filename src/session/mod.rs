//! The host seam: what the engine reads from a live browsing session.
//!
//! The engine never owns the session. It reads a cookie snapshot, the user
//! agent and a few engine-level signals per attempt, and asks the session to
//! run downloads through its own network stack when cookie replay is not
//! enough.
//!
//! # Architecture
//!
//! - [`BrowsingSession`] - Async trait the host implements
//! - [`SessionEvent`] - Messages the host submits into the orchestrator
//! - [`ResponseSignal`] - Response metadata reported once per navigation
//! - [`RedirectChain`] - URLs visited during the current navigation
//! - [`HttpSession`] - Headless reqwest-backed host used by the CLI

mod cookies;
mod dom;
mod http;

pub use cookies::{
    CookieError, CookieFile, CookieScope, CookieSnapshot, SessionCookie, SkippedLine,
    jar_from_snapshot, parse_netscape_cookies,
};
pub use http::HttpSession;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

/// One event of a native (engine-stack) download.
///
/// A well-formed stream yields `Started`, any number of `Chunk`s, and exactly
/// one terminal `Finished` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeDownloadEvent {
    /// Response headers arrived.
    Started {
        /// Expected total size, when the server declared one.
        expected_len: Option<u64>,
    },
    /// A chunk of the body.
    Chunk(Vec<u8>),
    /// The body completed.
    Finished,
    /// The download failed.
    Failed(String),
}

/// Boxed stream of native download events.
pub type NativeDownloadStream = BoxStream<'static, NativeDownloadEvent>;

/// Errors raised by host primitives.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is gone (window closed, engine torn down).
    #[error("browsing session unavailable")]
    Unavailable,

    /// The host's network stack returned a non-success status.
    #[error("HTTP {status} from session for {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Transport failure inside the host's network stack.
    #[error("session transport error for {url}: {message}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Error description from the host.
        message: String,
    },
}

/// A live browsing session owned by the host.
///
/// Every method is a suspension point and may be slow. Signals the host
/// cannot compute fall back to their defaults.
#[async_trait]
pub trait BrowsingSession: Send + Sync {
    /// URL currently displayed, if any.
    async fn current_url(&self) -> Option<String>;

    /// Title of the current page, if any.
    async fn page_title(&self) -> Option<String> {
        None
    }

    /// Point-in-time copy of the session's cookies.
    async fn cookie_snapshot(&self) -> Vec<SessionCookie>;

    /// User agent the session presents to servers.
    fn user_agent(&self) -> String;

    /// Whether the rendering surface currently shows a native PDF view.
    async fn probe_native_display(&self) -> bool {
        false
    }

    /// Sub-resource URLs (frames, embeds) found in the current document.
    async fn frame_candidates(&self) -> Vec<String> {
        Vec::new()
    }

    /// Starts a download through the session's own network stack.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the download cannot be started.
    async fn native_download(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<NativeDownloadStream, SessionError>;
}

/// Response metadata for one navigation, reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSignal {
    /// Final URL of the response.
    pub url: String,
    /// Declared MIME type.
    pub mime_type: Option<String>,
    /// Raw Content-Disposition header.
    pub content_disposition: Option<String>,
    /// Declared content length.
    pub content_length: Option<u64>,
    /// HTTP status code.
    pub status_code: u16,
}

impl ResponseSignal {
    /// Creates a signal for a URL with no declared metadata.
    #[must_use]
    pub fn for_url(url: impl Into<String>, status_code: u16) -> Self {
        Self {
            url: url.into(),
            mime_type: None,
            content_disposition: None,
            content_length: None,
            status_code,
        }
    }

    /// True when the server declared a PDF MIME type.
    #[must_use]
    pub fn declares_pdf_mime(&self) -> bool {
        self.mime_type.as_deref().is_some_and(|mime| {
            let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            matches!(essence.as_str(), "application/pdf" | "application/x-pdf")
        })
    }

    /// True when the response is served as an attachment.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.content_disposition.as_deref().is_some_and(|value| {
            value
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("attachment")
        })
    }

    /// High-confidence candidate: explicit PDF MIME or attachment disposition.
    #[must_use]
    pub fn is_high_confidence(&self) -> bool {
        self.declares_pdf_mime() || self.is_attachment()
    }
}

/// Where a candidate URL came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// The URL the session currently displays.
    Primary,
    /// An earlier hop of the current navigation.
    RedirectChainMember,
    /// An embedded frame or plugin source.
    Iframe,
}

/// A URL considered during one detection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateUrl {
    /// The URL.
    pub url: String,
    /// Where it came from.
    pub source_kind: SourceKind,
}

impl CandidateUrl {
    /// Creates a candidate.
    #[must_use]
    pub fn new(url: impl Into<String>, source_kind: SourceKind) -> Self {
        Self {
            url: url.into(),
            source_kind,
        }
    }
}

/// Ordered URLs visited during one navigation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectChain {
    urls: Vec<String>,
}

impl RedirectChain {
    /// Starts a new navigation at `url`, discarding the previous chain.
    pub fn reset(&mut self, url: impl Into<String>) {
        self.urls.clear();
        self.urls.push(url.into());
    }

    /// Appends a hop; consecutive duplicates are ignored.
    pub fn push(&mut self, url: impl Into<String>) {
        let url = url.into();
        if self.urls.last() != Some(&url) {
            self.urls.push(url);
        }
    }

    /// All hops in visit order.
    #[must_use]
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Hops other than `current`, most recent first, without duplicates.
    #[must_use]
    pub fn members_except(&self, current: &str) -> Vec<CandidateUrl> {
        let mut seen: Vec<&str> = Vec::new();
        self.urls
            .iter()
            .rev()
            .filter(|url| url.as_str() != current)
            .filter(|url| {
                if seen.contains(&url.as_str()) {
                    false
                } else {
                    seen.push(url.as_str());
                    true
                }
            })
            .map(|url| CandidateUrl::new(url.clone(), SourceKind::RedirectChainMember))
            .collect()
    }

    /// True when no navigation has started.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Messages the host submits into the orchestrator's context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new top-level navigation began.
    NavigationStarted {
        /// Requested URL.
        url: String,
    },
    /// The navigation was redirected.
    Redirected {
        /// Next hop.
        url: String,
    },
    /// The navigation finished with this response.
    NavigationFinished(ResponseSignal),
    /// The user asked to capture the current resource.
    ManualCaptureRequested,
    /// The session is being torn down.
    SessionClosed,
}
