//! Transport strategies that turn a candidate URL into bytes.
//!
//! Three mechanisms are available, tried in this order by the orchestrator:
//!
//! - [`AuthenticatedFetcher`] - generic HTTP client rebuilt per call from the
//!   session's cookie snapshot and user agent
//! - [`NativeSessionDownloader`] - download through the host's own network
//!   stack, streamed to a self-deleting temp file
//! - [`FrameProbe`] - lightweight HEAD probing of embedded frame sources
//!
//! None of them decide success. Every payload is validated with
//! [`crate::sniff::is_pdf`] before it can become a capture.
//!
//! # Example
//!
//! ```no_run
//! use capture_core::fetch::{AcceptProfile, AuthenticatedFetcher};
//! use capture_core::session::HttpSession;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = HttpSession::new(Vec::new(), None)?;
//! let fetcher = AuthenticatedFetcher::new();
//! let resource = fetcher
//!     .fetch(&session, "https://example.com/paper.pdf", AcceptProfile::Pdf)
//!     .await?;
//! println!("{} bytes", resource.bytes.len());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
mod frames;
mod native;

pub use client::{AuthenticatedFetcher, FetchedResource, ResponseMeta};
pub(crate) use constants::MAX_REDIRECTS;
pub use constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
pub use error::{FailureKind, FetchError};
pub use frames::{FrameProbe, FrameProbeOutcome};
pub use native::{DownloadProgress, NativeSessionDownloader, ProgressCallback};

use crate::session::SourceKind;

/// Accept header variants.
///
/// Some servers branch on `Accept`: a browser-like value gets the HTML
/// viewer, an explicit `application/pdf` gets the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptProfile {
    /// Browser-like value that still admits PDFs.
    Permissive,
    /// `application/pdf` only.
    Pdf,
}

impl AcceptProfile {
    /// The `Accept` header value for this profile.
    #[must_use]
    pub fn header_value(self) -> &'static str {
        match self {
            Self::Permissive => {
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/pdf,*/*;q=0.8"
            }
            Self::Pdf => "application/pdf",
        }
    }
}

/// Bytes that passed magic-byte validation, with their provenance.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidatedPdf {
    /// The PDF bytes.
    pub bytes: Vec<u8>,
    /// URL the bytes were fetched from.
    pub source_url: String,
    /// How the URL was discovered.
    pub source_kind: SourceKind,
}

impl std::fmt::Debug for ValidatedPdf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedPdf")
            .field("bytes", &self.bytes.len())
            .field("source_url", &self.source_url)
            .field("source_kind", &self.source_kind)
            .finish()
    }
}
