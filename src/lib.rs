//! Paper Capture Core Library
//!
//! This library turns a live, authenticated browsing session plus a candidate
//! URL into validated PDF bytes, or a definitive failure.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`sniff`] - Magic-byte PDF classification and payload diagnostics
//! - [`heuristics`] - URL and DOM heuristics used to order strategies
//! - [`session`] - The host seam: browsing session trait, events, cookies
//! - [`fetch`] - Authenticated fetcher, native session downloader, frame probe
//! - [`acquire`] - Detection orchestrator, retry scheduler, capture sink
//! - [`config`] - Engine configuration and proxy settings

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod acquire;
pub mod config;
pub mod fetch;
pub mod heuristics;
pub mod session;
pub mod sniff;
mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use acquire::{
    AcquireError, AcquisitionAttempt, AcquisitionState, AttemptOutcome, CaptureReport,
    CaptureResult, CaptureSink, CaptureStatus, DEFAULT_RETRY_OFFSETS, DetectionOrchestrator,
    PublicationHint, RetryScheduler, Trigger, suggested_filename,
};
pub use config::{EngineConfig, ProxySettings};
pub use fetch::{
    AcceptProfile, AuthenticatedFetcher, DownloadProgress, FetchError, FetchedResource,
    FrameProbe, NativeSessionDownloader,
};
pub use heuristics::{DomSummary, NativeDisplayHeuristic, UrlHeuristics, looks_like_pdf_url};
pub use session::{
    BrowsingSession, CandidateUrl, HttpSession, RedirectChain, ResponseSignal, SessionCookie,
    SessionError, SessionEvent, SourceKind,
};
pub use sniff::is_pdf;
