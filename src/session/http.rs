//! Headless browsing session backed by reqwest.
//!
//! Stands in for an embedded browser when the engine runs from the command
//! line: it keeps a persistent cookie jar, follows redirects itself so every
//! hop is reported as a [`SessionEvent::Redirected`], and derives the DOM
//! signals a rendering engine would report from the HTML it loaded.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, future, stream};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, instrument, warn};
use url::Url;

use super::cookies::{CookieSnapshot, SessionCookie, jar_from_snapshot};
use super::dom::analyze_html;
use super::{
    BrowsingSession, NativeDownloadEvent, NativeDownloadStream, ResponseSignal, SessionError,
    SessionEvent,
};
use crate::fetch::{AcceptProfile, MAX_REDIRECTS};
use crate::heuristics::{DomSummary, NativeDisplayHeuristic};
use crate::user_agent::default_session_user_agent;

/// Recently requested URLs whose cookies feed snapshots.
const MAX_TRACKED_URLS: usize = 32;

/// What the session currently displays.
#[derive(Debug, Default)]
struct PageState {
    current_url: Option<String>,
    title: Option<String>,
    /// The response declared a PDF type; a browser would show its viewer.
    declared_pdf: bool,
    dom: Option<DomSummary>,
    frames: Vec<String>,
    /// Recently requested URLs without query or fragment, oldest first.
    recent: VecDeque<Url>,
}

/// A reqwest-backed [`BrowsingSession`].
pub struct HttpSession {
    client: Client,
    download_client: Client,
    jar: Arc<Jar>,
    seed_cookies: Vec<SessionCookie>,
    user_agent: String,
    native_display: NativeDisplayHeuristic,
    page: RwLock<PageState>,
}

impl std::fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSession")
            .field("seed_cookies", &self.seed_cookies.len())
            .field("user_agent", &self.user_agent)
            .field("native_display", &self.native_display)
            .finish_non_exhaustive()
    }
}

impl HttpSession {
    /// Creates a session seeded with `seed_cookies`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (TLS backend
    /// initialization failure).
    pub fn new(
        seed_cookies: Vec<SessionCookie>,
        user_agent: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let jar = jar_from_snapshot(&seed_cookies);
        let user_agent = user_agent.unwrap_or_else(default_session_user_agent);

        let client = Client::builder()
            .redirect(Policy::none())
            .gzip(true)
            .user_agent(&user_agent)
            .cookie_provider(Arc::clone(&jar))
            .build()?;
        let download_client = Client::builder()
            .redirect(Policy::limited(MAX_REDIRECTS))
            .gzip(true)
            .user_agent(&user_agent)
            .cookie_provider(Arc::clone(&jar))
            .build()?;

        Ok(Self {
            client,
            download_client,
            jar,
            seed_cookies,
            user_agent,
            native_display: NativeDisplayHeuristic::default(),
            page: RwLock::new(PageState::default()),
        })
    }

    /// Uses these thresholds when judging whether a page is a PDF viewer.
    #[must_use]
    pub fn with_native_display_heuristic(mut self, heuristic: NativeDisplayHeuristic) -> Self {
        self.native_display = heuristic;
        self
    }

    /// Loads `url` as a top-level navigation, reporting progress on `events`.
    ///
    /// Emits `NavigationStarted`, one `Redirected` per hop, then
    /// `NavigationFinished`. Non-success statuses still finish the navigation,
    /// as a browser would display the error page.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] for malformed URLs, transport
    /// failures and redirect loops, and [`SessionError::Unavailable`] when
    /// the event receiver is gone.
    #[instrument(skip(self, events), fields(url = %url))]
    pub async fn navigate(
        &self,
        url: &str,
        events: &mpsc::Sender<SessionEvent>,
    ) -> Result<ResponseSignal, SessionError> {
        let mut current = Url::parse(url).map_err(|e| transport(url, e.to_string()))?;
        emit(
            events,
            SessionEvent::NavigationStarted {
                url: current.to_string(),
            },
        )
        .await?;

        for hop in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(current.clone())
                .header(ACCEPT, AcceptProfile::Permissive.header_value())
                .send()
                .await
                .map_err(|e| transport(current.as_str(), e.to_string()))?;
            self.record_visit(&current).await;

            if response.status().is_redirection() {
                let Some(next) = redirect_target(&current, &response) else {
                    // A redirect without a usable Location is displayed as-is.
                    return self.finish(current, response, events).await;
                };
                if hop == MAX_REDIRECTS {
                    return Err(transport(
                        current.as_str(),
                        format!("more than {MAX_REDIRECTS} redirects"),
                    ));
                }
                debug!(from = %current, to = %next, "redirect");
                emit(
                    events,
                    SessionEvent::Redirected {
                        url: next.to_string(),
                    },
                )
                .await?;
                current = next;
                continue;
            }

            return self.finish(current, response, events).await;
        }

        Err(transport(url, format!("more than {MAX_REDIRECTS} redirects")))
    }

    /// Records the displayed page and emits `NavigationFinished`.
    async fn finish(
        &self,
        url: Url,
        response: Response,
        events: &mpsc::Sender<SessionEvent>,
    ) -> Result<ResponseSignal, SessionError> {
        let signal = signal_from_response(&url, &response);

        let mut next_page = PageState {
            current_url: Some(url.to_string()),
            declared_pdf: signal.declares_pdf_mime(),
            ..PageState::default()
        };

        // The engine fetches PDF bytes itself; only markup is read here.
        if !next_page.declared_pdf && !signal.is_attachment() {
            match response.text().await {
                Ok(html) => {
                    let analysis = analyze_html(&html, &url);
                    next_page.title = analysis.title;
                    next_page.dom = Some(analysis.summary);
                    next_page.frames = analysis.frames;
                }
                Err(e) => warn!(url = %url, error = %e, "failed to read page body"),
            }
        }

        {
            let mut page = self.page.write().await;
            next_page.recent = std::mem::take(&mut page.recent);
            *page = next_page;
        }

        debug!(
            status = signal.status_code,
            mime = signal.mime_type.as_deref().unwrap_or(""),
            "navigation finished"
        );
        emit(events, SessionEvent::NavigationFinished(signal.clone())).await?;
        Ok(signal)
    }

    async fn record_visit(&self, url: &Url) {
        let mut tracked = url.clone();
        tracked.set_query(None);
        tracked.set_fragment(None);

        let mut page = self.page.write().await;
        page.recent.retain(|known| known != &tracked);
        page.recent.push_back(tracked);
        while page.recent.len() > MAX_TRACKED_URLS {
            page.recent.pop_front();
        }
    }
}

#[async_trait]
impl BrowsingSession for HttpSession {
    async fn current_url(&self) -> Option<String> {
        self.page.read().await.current_url.clone()
    }

    async fn page_title(&self) -> Option<String> {
        self.page.read().await.title.clone()
    }

    /// Seed cookies, updated with what the jar now sends to recent URLs.
    async fn cookie_snapshot(&self) -> Vec<SessionCookie> {
        let mut snapshot = CookieSnapshot::from_cookies(self.seed_cookies.iter().cloned());
        let page = self.page.read().await;

        for url in &page.recent {
            if let Some(header) = self.jar.cookies(url)
                && let Ok(header) = header.to_str()
            {
                snapshot.absorb_request_header(url, header);
            }
        }

        snapshot.into_cookies()
    }

    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    async fn probe_native_display(&self) -> bool {
        let page = self.page.read().await;
        page.declared_pdf
            || page
                .dom
                .as_ref()
                .is_some_and(|dom| self.native_display.evaluate(dom))
    }

    async fn frame_candidates(&self) -> Vec<String> {
        self.page.read().await.frames.clone()
    }

    #[instrument(skip(self, headers), fields(url = %url))]
    async fn native_download(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<NativeDownloadStream, SessionError> {
        let parsed = Url::parse(url).map_err(|e| transport(url, e.to_string()))?;
        let mut request = self.download_client.get(parsed.clone());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport(url, e.to_string()))?;
        self.record_visit(&parsed).await;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let expected_len = response.content_length();
        let started = stream::once(future::ready(NativeDownloadEvent::Started { expected_len }));
        let body = response.bytes_stream().map(|chunk| match chunk {
            Ok(bytes) => NativeDownloadEvent::Chunk(bytes.to_vec()),
            Err(e) => NativeDownloadEvent::Failed(e.to_string()),
        });
        let finished = stream::once(future::ready(NativeDownloadEvent::Finished));

        // Nothing follows the first terminal event.
        let events = started
            .chain(body)
            .chain(finished)
            .scan(false, |terminated, event| {
                if *terminated {
                    return future::ready(None);
                }
                *terminated = matches!(
                    event,
                    NativeDownloadEvent::Finished | NativeDownloadEvent::Failed(_)
                );
                future::ready(Some(event))
            });

        Ok(events.boxed())
    }
}

fn redirect_target(current: &Url, response: &Response) -> Option<Url> {
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}

fn signal_from_response(url: &Url, response: &Response) -> ResponseSignal {
    let header = |name| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string)
    };
    ResponseSignal {
        url: url.to_string(),
        mime_type: header(CONTENT_TYPE),
        content_disposition: header(CONTENT_DISPOSITION),
        content_length: header(CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok()),
        status_code: response.status().as_u16(),
    }
}

async fn emit(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) -> Result<(), SessionError> {
    events
        .send(event)
        .await
        .map_err(|_| SessionError::Unavailable)
}

fn transport(url: &str, message: String) -> SessionError {
    SessionError::Transport {
        url: url.to_string(),
        message,
    }
}
