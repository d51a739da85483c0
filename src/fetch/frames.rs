//! Lightweight probing of embedded frame sources.

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::client::AuthenticatedFetcher;
use super::error::{FailureKind, FetchError};
use super::{AcceptProfile, ValidatedPdf};
use crate::session::{BrowsingSession, SourceKind};
use crate::sniff::{describe_payload, is_pdf};

/// Result of probing a candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameProbeOutcome {
    /// A candidate yielded validated PDF bytes.
    Found(ValidatedPdf),
    /// No candidate matched. Not an error; other strategies continue.
    NotFound {
        /// Candidates whose full fetch failed at the transport level.
        network_errors: usize,
    },
    /// The acquisition was cancelled mid-probe.
    Cancelled,
}

/// Probes frame sources with `HEAD`, falling back to a full `GET`.
///
/// A `HEAD` that declares a PDF type is followed by a full fetch. A `HEAD`
/// that fails or is rejected (405, 501, transport errors) falls back to a
/// full fetch directly. A `HEAD` that succeeds with a non-PDF type skips the
/// candidate.
#[derive(Debug, Clone, Default)]
pub struct FrameProbe {
    fetcher: AuthenticatedFetcher,
}

impl FrameProbe {
    /// Creates a probe that issues requests through `fetcher`.
    #[must_use]
    pub fn new(fetcher: AuthenticatedFetcher) -> Self {
        Self { fetcher }
    }

    /// Probes `candidates` in order and stops at the first validated PDF.
    #[instrument(skip(self, session, candidates, cancel), fields(candidates = candidates.len()))]
    pub async fn probe(
        &self,
        session: &dyn BrowsingSession,
        candidates: &[String],
        cancel: &CancellationToken,
    ) -> FrameProbeOutcome {
        let mut network_errors = 0;

        for candidate in candidates {
            if cancel.is_cancelled() {
                return FrameProbeOutcome::Cancelled;
            }
            if !is_fetchable(candidate) {
                debug!(candidate = %candidate, "skipping non-http frame source");
                continue;
            }

            let full_fetch = match self.fetcher.probe(session, candidate).await {
                Ok(meta) if meta.declares_pdf() => true,
                Ok(meta) => {
                    debug!(
                        candidate = %candidate,
                        content_type = meta.content_type.as_deref().unwrap_or(""),
                        "frame source is not a PDF"
                    );
                    false
                }
                Err(e) => {
                    debug!(candidate = %candidate, error = %e, "HEAD failed; falling back to GET");
                    true
                }
            };
            if !full_fetch {
                continue;
            }

            match self.fetch_validated(session, candidate).await {
                Ok(Some(found)) => return FrameProbeOutcome::Found(found),
                Ok(None) => {}
                Err(e) if e.kind() == FailureKind::Cancelled => return FrameProbeOutcome::Cancelled,
                Err(e) => {
                    debug!(candidate = %candidate, error = %e, "frame fetch failed");
                    network_errors += 1;
                }
            }
        }

        FrameProbeOutcome::NotFound { network_errors }
    }

    async fn fetch_validated(
        &self,
        session: &dyn BrowsingSession,
        candidate: &str,
    ) -> Result<Option<ValidatedPdf>, FetchError> {
        let resource = self
            .fetcher
            .fetch(session, candidate, AcceptProfile::Pdf)
            .await?;
        if is_pdf(&resource.bytes) {
            debug!(candidate = %candidate, bytes = resource.bytes.len(), "frame source is a PDF");
            return Ok(Some(ValidatedPdf {
                bytes: resource.bytes,
                source_url: candidate.to_string(),
                source_kind: SourceKind::Iframe,
            }));
        }
        debug!(
            candidate = %candidate,
            payload = %describe_payload(&resource.bytes),
            "frame body failed magic-byte check"
        );
        Ok(None)
    }
}

fn is_fetchable(candidate: &str) -> bool {
    let lower = candidate.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedSession;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    #[tokio::test]
    async fn test_probe_skips_non_pdf_and_finds_declared_pdf() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("HEAD"))
            .and(path("/ads"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "text/html"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ads"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-ad".to_vec()))
            .expect(0)
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/viewer/file"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Content-Type", "application/pdf"),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/viewer/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 frame".to_vec()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let candidates = vec![
            format!("{}/ads", mock_server.uri()),
            format!("{}/viewer/file", mock_server.uri()),
        ];
        let session = ScriptedSession::new(mock_server.uri());
        let outcome = FrameProbe::default()
            .probe(&session, &candidates, &CancellationToken::new())
            .await;

        match outcome {
            FrameProbeOutcome::Found(found) => {
                assert_eq!(found.bytes, b"%PDF-1.7 frame");
                assert_eq!(found.source_kind, SourceKind::Iframe);
                assert!(found.source_url.ends_with("/viewer/file"));
            }
            other => panic!("Expected Found, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_get_when_head_rejected() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("HEAD"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.3".to_vec()))
            .mount(&mock_server)
            .await;

        let candidates = vec![format!("{}/embed", mock_server.uri())];
        let session = ScriptedSession::new(mock_server.uri());
        let outcome = FrameProbe::default()
            .probe(&session, &candidates, &CancellationToken::new())
            .await;
        assert!(matches!(outcome, FrameProbeOutcome::Found(_)));
    }

    #[tokio::test]
    async fn test_probe_declared_pdf_with_html_body_is_not_found() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("HEAD"))
            .and(path("/liar"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Content-Type", "application/pdf"),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/liar"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(b"<html>session expired</html>".to_vec()),
            )
            .mount(&mock_server)
            .await;

        let candidates = vec![format!("{}/liar", mock_server.uri())];
        let session = ScriptedSession::new(mock_server.uri());
        let outcome = FrameProbe::default()
            .probe(&session, &candidates, &CancellationToken::new())
            .await;
        assert_eq!(outcome, FrameProbeOutcome::NotFound { network_errors: 0 });
    }

    #[tokio::test]
    async fn test_probe_empty_and_non_http_candidates() {
        let session = ScriptedSession::new("https://x.org/");
        let probe = FrameProbe::default();
        let cancel = CancellationToken::new();

        assert_eq!(
            probe.probe(&session, &[], &cancel).await,
            FrameProbeOutcome::NotFound { network_errors: 0 }
        );
        let odd = vec!["about:blank".to_string(), "data:application/pdf;base64,JVBERg==".to_string()];
        assert_eq!(
            probe.probe(&session, &odd, &cancel).await,
            FrameProbeOutcome::NotFound { network_errors: 0 }
        );
    }

    #[tokio::test]
    async fn test_probe_stops_when_cancelled() {
        let session = ScriptedSession::new("https://x.org/");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let candidates = vec!["https://x.org/frame.pdf".to_string()];
        assert_eq!(
            FrameProbe::default().probe(&session, &candidates, &cancel).await,
            FrameProbeOutcome::Cancelled
        );
    }

    #[test]
    fn test_is_fetchable() {
        assert!(is_fetchable("https://x.org/a"));
        assert!(is_fetchable("HTTP://x.org/a"));
        assert!(!is_fetchable("javascript:void(0)"));
        assert!(!is_fetchable("blob:https://x.org/uuid"));
    }
}
