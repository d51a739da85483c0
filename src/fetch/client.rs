//! Out-of-band HTTP fetches that replay the browsing session's credentials.
//!
//! Ordinary HTTP clients cannot see the cookies held by an embedded browsing
//! engine. [`AuthenticatedFetcher`] therefore builds a fresh client for every
//! call from a cookie snapshot and the session's user agent, taken at call
//! time so concurrent cookie mutation in the session never races a request.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::redirect::Policy;
use tracing::{debug, instrument};
use url::Url;

use super::AcceptProfile;
use super::constants::{CONNECT_TIMEOUT_SECS, LOGIN_PATTERNS, MAX_REDIRECTS, READ_TIMEOUT_SECS};
use super::error::FetchError;
use crate::heuristics::UrlHeuristics;
use crate::session::{BrowsingSession, ResponseSignal, jar_from_snapshot};

/// Response metadata captured before the body is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    /// URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Declared Content-Type.
    pub content_type: Option<String>,
    /// Raw Content-Disposition header.
    pub content_disposition: Option<String>,
    /// Declared Content-Length.
    pub content_length: Option<u64>,
}

impl ResponseMeta {
    fn from_response(response: &reqwest::Response) -> Self {
        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string)
        };
        Self {
            final_url: response.url().to_string(),
            status: response.status().as_u16(),
            content_type: header(CONTENT_TYPE),
            content_disposition: header(CONTENT_DISPOSITION),
            content_length: header(CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok()),
        }
    }

    /// Converts the metadata into a navigation signal.
    #[must_use]
    pub fn to_signal(&self) -> ResponseSignal {
        ResponseSignal {
            url: self.final_url.clone(),
            mime_type: self.content_type.clone(),
            content_disposition: self.content_disposition.clone(),
            content_length: self.content_length,
            status_code: self.status,
        }
    }

    /// True when the server declared a PDF MIME type.
    #[must_use]
    pub fn declares_pdf(&self) -> bool {
        self.to_signal().declares_pdf_mime()
    }

    fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
    }
}

/// A fetched body with its response metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct FetchedResource {
    /// Response body.
    pub bytes: Vec<u8>,
    /// Response metadata.
    pub meta: ResponseMeta,
}

impl std::fmt::Debug for FetchedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedResource")
            .field("bytes", &self.bytes.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// HTTP fetcher that reuses a browsing session's cookies and user agent.
///
/// A non-PDF `200` is not an error: it is returned as-is so the caller can
/// validate it and move on to the next strategy.
#[derive(Debug, Clone)]
pub struct AuthenticatedFetcher {
    connect_timeout: Duration,
    read_timeout: Duration,
    heuristics: UrlHeuristics,
}

impl Default for AuthenticatedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthenticatedFetcher {
    /// Creates a fetcher with default timeouts (30s connect, 2min read).
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a fetcher with explicit timeout values.
    #[must_use]
    pub fn with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        Self {
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            read_timeout: Duration::from_secs(read_timeout_secs),
            heuristics: UrlHeuristics::default(),
        }
    }

    /// Uses these URL heuristics for login-redirect detection.
    #[must_use]
    pub fn with_heuristics(mut self, heuristics: UrlHeuristics) -> Self {
        self.heuristics = heuristics;
        self
    }

    /// Fetches `url` with the session's credentials.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when:
    /// - The URL is not an absolute http(s) URL
    /// - The transport fails or times out
    /// - The server answers with an auth challenge (401/403/407) or redirects
    ///   a PDF-looking request to a login page
    /// - The server answers with any other non-success status
    #[instrument(skip(self, session), fields(url = %url, accept = ?accept))]
    pub async fn fetch(
        &self,
        session: &dyn BrowsingSession,
        url: &str,
        accept: AcceptProfile,
    ) -> Result<FetchedResource, FetchError> {
        let parsed = parse_http_url(url)?;
        let client = self.client_for(session, url).await?;

        let response = client
            .get(parsed)
            .header(ACCEPT, accept.header_value())
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        let meta = ResponseMeta::from_response(&response);
        check_status(url, &meta)?;
        if let Some(auth_err) = self.detect_login_redirect(url, &meta) {
            return Err(auth_err);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        debug!(
            status = meta.status,
            bytes = bytes.len(),
            content_type = meta.content_type.as_deref().unwrap_or(""),
            final_url = %meta.final_url,
            "fetched"
        );

        Ok(FetchedResource {
            bytes: bytes.to_vec(),
            meta,
        })
    }

    /// Issues a metadata-only `HEAD` request with the session's credentials.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`fetch`](Self::fetch); servers that reject
    /// `HEAD` surface as [`FetchError::HttpStatus`] (typically 405 or 501).
    #[instrument(skip(self, session), fields(url = %url))]
    pub async fn probe(
        &self,
        session: &dyn BrowsingSession,
        url: &str,
    ) -> Result<ResponseMeta, FetchError> {
        let parsed = parse_http_url(url)?;
        let client = self.client_for(session, url).await?;

        let response = client
            .head(parsed)
            .header(ACCEPT, AcceptProfile::Permissive.header_value())
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        let meta = ResponseMeta::from_response(&response);
        check_status(url, &meta)?;
        debug!(
            status = meta.status,
            content_type = meta.content_type.as_deref().unwrap_or(""),
            "probed"
        );
        Ok(meta)
    }

    /// Builds a client from a fresh cookie snapshot.
    async fn client_for(
        &self,
        session: &dyn BrowsingSession,
        url: &str,
    ) -> Result<Client, FetchError> {
        let snapshot = session.cookie_snapshot().await;
        let jar = jar_from_snapshot(&snapshot);

        Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .gzip(true)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(session.user_agent())
            .cookie_provider(jar)
            .build()
            .map_err(|e| FetchError::network(url, e))
    }

    /// Detects a login redirect: HTML served at a login/SSO URL for a
    /// request that looked like a PDF endpoint.
    fn detect_login_redirect(&self, original_url: &str, meta: &ResponseMeta) -> Option<FetchError> {
        if !self.heuristics.looks_like_pdf_url(original_url) || !meta.is_html() {
            return None;
        }

        let response_url = meta.final_url.to_lowercase();
        if !LOGIN_PATTERNS
            .iter()
            .any(|pattern| response_url.contains(pattern))
        {
            return None;
        }

        let domain = Url::parse(&meta.final_url)
            .ok()
            .and_then(|u| u.host_str().map(std::string::ToString::to_string))
            .unwrap_or_else(|| "unknown".to_string());

        debug!(
            url = %original_url,
            response_url = %meta.final_url,
            domain = %domain,
            "login redirect detected"
        );
        Some(FetchError::auth_required(original_url, 0, domain))
    }
}

/// Parses an absolute http(s) URL.
pub(crate) fn parse_http_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
    if matches!(parsed.scheme(), "http" | "https") {
        Ok(parsed)
    } else {
        Err(FetchError::invalid_url(url))
    }
}

/// Maps non-success statuses; auth challenges are promoted to `AuthRequired`.
fn check_status(url: &str, meta: &ResponseMeta) -> Result<(), FetchError> {
    if (200..300).contains(&meta.status) {
        return Ok(());
    }
    if matches!(meta.status, 401 | 403 | 407) {
        let domain = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(std::string::ToString::to_string))
            .unwrap_or_else(|| url.to_string());
        return Err(FetchError::auth_required(url, meta.status, domain));
    }
    Err(FetchError::http_status(url, meta.status))
}
