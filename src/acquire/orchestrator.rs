//! The detection state machine.
//!
//! [`DetectionOrchestrator`] owns one browsing session's acquisitions. Host
//! callbacks never touch its state directly: they submit [`SessionEvent`]s
//! that [`DetectionOrchestrator::run`] consumes sequentially, and every
//! strategy result is handled back in the orchestrator's own context.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::AcquireError;
use super::filename::{PublicationHint, suggested_filename};
use super::retry::{AcquisitionAttempt, AttemptOutcome, RetryScheduler, ScheduleOutcome};
use super::sink::{CaptureResult, CaptureSink};
use super::state::{AcquisitionState, CaptureReport, Trigger};
use crate::config::{EngineConfig, ProxySettings};
use crate::fetch::{
    AcceptProfile, AuthenticatedFetcher, FailureKind, FetchError, FrameProbe, FrameProbeOutcome,
    NativeSessionDownloader, ProgressCallback, ValidatedPdf,
};
use crate::heuristics::UrlHeuristics;
use crate::session::{BrowsingSession, RedirectChain, ResponseSignal, SessionEvent, SourceKind};
use crate::sniff::{describe_payload, is_pdf};

/// Per-acquisition context shared by its attempts.
struct AttemptContext {
    /// URL displayed when the acquisition started.
    url: String,
    trigger: Trigger,
    cancel: CancellationToken,
    last_failure: Mutex<Option<String>>,
    /// Set when no later attempt can do better than the last one.
    abandoned: AtomicBool,
}

impl AttemptContext {
    /// Stops the schedule after the current attempt.
    fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn note_failure(&self, error: &FetchError) {
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
    }

    fn last_failure(&self) -> Option<String> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// What the strategies of one attempt ran into.
#[derive(Debug, Default)]
struct AttemptTally {
    /// Failures a later attempt may get past.
    network_errors: usize,
    /// Local failures (malformed URL, temp storage) that retrying cannot fix.
    fatal_errors: usize,
    auth_required: bool,
    /// Responses that arrived but failed the magic-byte check.
    non_pdf_responses: usize,
    /// The displayed URL looks like a PDF endpoint yet served something else.
    pdf_url_served_other: bool,
}

impl AttemptTally {
    fn record(&mut self, ctx: &AttemptContext, url: &str, error: &FetchError) {
        let retryable = error.is_retryable();
        debug!(url = %url, error = %error, retryable, "strategy failed");
        if error.kind() == FailureKind::AuthenticationRequired {
            self.auth_required = true;
        }
        if retryable {
            self.network_errors += 1;
        } else {
            self.fatal_errors += 1;
        }
        ctx.note_failure(error);
    }

    /// Every strategy failed locally and nothing reached a server.
    fn is_hopeless(&self) -> bool {
        self.fatal_errors > 0 && self.network_errors == 0 && self.non_pdf_responses == 0
    }
}

/// Whether an attempt may continue with its next strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Stop,
}

/// Drives acquisitions for one browsing session.
///
/// At most one capture is ever delivered: once `on_captured` has fired, every
/// later acquisition ends as [`AcquireError::Cancelled`].
pub struct DetectionOrchestrator {
    session: Arc<dyn BrowsingSession>,
    fetcher: AuthenticatedFetcher,
    native: NativeSessionDownloader,
    frames: FrameProbe,
    heuristics: UrlHeuristics,
    scheduler: RetryScheduler,
    proxy: ProxySettings,
    temp_dir: Option<PathBuf>,
    hint: PublicationHint,
    sink: CaptureSink,
    state: watch::Sender<AcquisitionState>,
    chain: Mutex<RedirectChain>,
    captured: Mutex<Option<CaptureReport>>,
    root: CancellationToken,
}

impl std::fmt::Debug for DetectionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionOrchestrator")
            .field("scheduler", &self.scheduler)
            .field("sink", &self.sink)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl DetectionOrchestrator {
    /// Creates an orchestrator for `session`.
    ///
    /// `on_captured` is invoked at most once, with the first validated PDF.
    pub fn new(
        session: Arc<dyn BrowsingSession>,
        config: &EngineConfig,
        on_captured: impl FnOnce(CaptureResult) + Send + 'static,
    ) -> Self {
        let fetcher =
            AuthenticatedFetcher::with_timeouts(config.connect_timeout_secs, config.read_timeout_secs)
                .with_heuristics(config.heuristics.clone());
        let native = match &config.temp_dir {
            Some(dir) => NativeSessionDownloader::new().with_temp_dir(dir.clone()),
            None => NativeSessionDownloader::new(),
        };
        let (state, _) = watch::channel(AcquisitionState::Idle);

        Self {
            session,
            frames: FrameProbe::new(fetcher.clone()),
            fetcher,
            native,
            heuristics: config.heuristics.clone(),
            scheduler: RetryScheduler::new(config.retry_offsets.clone()),
            proxy: config.proxy.clone(),
            temp_dir: config.temp_dir.clone(),
            hint: PublicationHint::default(),
            sink: CaptureSink::new(on_captured),
            state,
            chain: Mutex::new(RedirectChain::default()),
            captured: Mutex::new(None),
            root: CancellationToken::new(),
        }
    }

    /// Metadata used when the capturing URL yields no filename.
    #[must_use]
    pub fn with_publication_hint(mut self, hint: PublicationHint) -> Self {
        self.hint = hint;
        self
    }

    /// Reports native download progress to `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.native = self.native.with_progress(callback);
        self
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AcquisitionState> {
        self.state.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AcquisitionState {
        self.state.borrow().clone()
    }

    /// URLs visited by the current navigation.
    #[must_use]
    pub fn redirect_chain(&self) -> RedirectChain {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Cancels every current and future acquisition (session teardown).
    pub fn cancel(&self) {
        self.root.cancel();
    }

    /// Consumes host events until a capture, teardown, or the end of input.
    ///
    /// - `NavigationStarted` resets the redirect chain and invalidates any
    ///   in-flight acquisition.
    /// - `Redirected` extends the chain.
    /// - `NavigationFinished` and `ManualCaptureRequested` start an
    ///   acquisition; events arriving meanwhile are queued and handled after it.
    /// - `SessionClosed` cancels everything and ends the loop.
    ///
    /// An exhausted acquisition does not end the loop; it waits for the next
    /// navigation. When the channel closes, any in-flight acquisition runs to
    /// completion and the loop ends.
    ///
    /// # Errors
    ///
    /// Returns the most recent [`AcquireError::Exhausted`] (or
    /// [`AcquireError::NoCurrentUrl`]) when input ends without a capture,
    /// [`AcquireError::Cancelled`] otherwise, and [`AcquireError::TempDir`]
    /// as soon as it occurs.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<SessionEvent>,
    ) -> Result<CaptureReport, AcquireError> {
        let mut backlog: VecDeque<SessionEvent> = VecDeque::new();
        let mut open = true;
        let mut last_failure: Option<AcquireError> = None;

        loop {
            let event = if let Some(event) = backlog.pop_front() {
                event
            } else if open {
                tokio::select! {
                    biased;
                    () = self.root.cancelled() => {
                        self.publish(AcquisitionState::Cancelled);
                        return Err(AcquireError::Cancelled);
                    }
                    received = events.recv() => match received {
                        Some(event) => event,
                        None => {
                            open = false;
                            continue;
                        }
                    }
                }
            } else {
                return Err(last_failure.unwrap_or(AcquireError::Cancelled));
            };

            let trigger = match event {
                SessionEvent::NavigationStarted { url } => {
                    debug!(url = %url, "navigation started");
                    self.with_chain(|chain| chain.reset(url));
                    last_failure = None;
                    self.publish(AcquisitionState::Idle);
                    continue;
                }
                SessionEvent::Redirected { url } => {
                    debug!(url = %url, "redirected");
                    self.with_chain(|chain| chain.push(url));
                    continue;
                }
                SessionEvent::NavigationFinished(signal) => {
                    let url = signal.url.clone();
                    self.with_chain(|chain| chain.push(url));
                    Trigger::NavigationFinished(signal)
                }
                SessionEvent::ManualCaptureRequested => Trigger::Manual,
                SessionEvent::SessionClosed => {
                    debug!("session closed");
                    self.root.cancel();
                    self.publish(AcquisitionState::Cancelled);
                    return Err(last_failure.unwrap_or(AcquireError::Cancelled));
                }
            };

            let token = self.root.child_token();
            let acquisition = self.acquire_with(trigger, token.clone());
            tokio::pin!(acquisition);

            let result = loop {
                tokio::select! {
                    result = &mut acquisition => break result,
                    received = events.recv(), if open => match received {
                        Some(
                            event @ (SessionEvent::NavigationStarted { .. }
                            | SessionEvent::SessionClosed),
                        ) => {
                            debug!(event = ?event, "invalidating in-flight acquisition");
                            token.cancel();
                            backlog.push_back(event);
                        }
                        Some(event) => backlog.push_back(event),
                        None => open = false,
                    }
                }
            };

            match result {
                Ok(report) => return Ok(report),
                Err(AcquireError::Cancelled) => {}
                Err(error @ (AcquireError::Exhausted { .. } | AcquireError::NoCurrentUrl)) => {
                    last_failure = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Runs one acquisition for the displayed resource.
    ///
    /// # Errors
    ///
    /// - [`AcquireError::Exhausted`] when no attempt yields a validated PDF,
    ///   or early when every strategy fails in a way retrying cannot fix
    /// - [`AcquireError::Cancelled`] after [`cancel`](Self::cancel) or when a
    ///   capture was already delivered
    /// - [`AcquireError::NoCurrentUrl`] when nothing is displayed
    /// - [`AcquireError::TempDir`] when the configured temp directory is unusable
    pub async fn acquire(&self, trigger: Trigger) -> Result<CaptureReport, AcquireError> {
        self.acquire_with(trigger, self.root.child_token()).await
    }

    #[instrument(skip_all, fields(manual = matches!(trigger, Trigger::Manual)))]
    async fn acquire_with(
        &self,
        trigger: Trigger,
        cancel: CancellationToken,
    ) -> Result<CaptureReport, AcquireError> {
        let started = Instant::now();
        if self.sink.is_delivered() || cancel.is_cancelled() {
            self.publish(AcquisitionState::Cancelled);
            return Err(AcquireError::Cancelled);
        }
        self.publish(AcquisitionState::AwaitingSignal);

        if let Err(error) = self.check_temp_dir().await {
            self.publish(AcquisitionState::Idle);
            return Err(error);
        }

        let url = match self.session.current_url().await {
            Some(url) => url,
            None => match trigger.signal() {
                Some(signal) => signal.url.clone(),
                None => {
                    self.publish(AcquisitionState::Idle);
                    return Err(AcquireError::NoCurrentUrl);
                }
            },
        };
        info!(url = %url, "acquisition started");

        let ctx = AttemptContext {
            url,
            trigger,
            cancel,
            last_failure: Mutex::new(None),
            abandoned: AtomicBool::new(false),
        };

        if let Some(signal) = ctx.trigger.signal().filter(|s| s.is_high_confidence()) {
            debug!(
                url = %signal.url,
                mime = signal.mime_type.as_deref().unwrap_or(""),
                attachment = signal.is_attachment(),
                "high-confidence signal; fetching with explicit accept"
            );
            let mut tally = AttemptTally::default();
            let url = signal.url.clone();
            self.fetch_step(&ctx, &mut tally, &url, AcceptProfile::Pdf, SourceKind::Primary)
                .await;
            if self.sink.is_delivered() {
                return self.take_captured(Vec::new());
            }
        }

        let this = self;
        let ctx_ref = &ctx;
        let report = self
            .scheduler
            .run_from(
                started,
                &ctx.cancel,
                || this.sink.is_delivered(),
                move |attempt| this.run_attempt(attempt, ctx_ref),
            )
            .await;

        match report.outcome {
            ScheduleOutcome::Succeeded => self.take_captured(report.attempts),
            ScheduleOutcome::Cancelled if ctx.is_abandoned() => {
                self.exhausted(&ctx, report.attempts)
            }
            ScheduleOutcome::Cancelled => {
                debug!(url = %ctx.url, "acquisition cancelled");
                self.publish(AcquisitionState::Cancelled);
                Err(AcquireError::Cancelled)
            }
            ScheduleOutcome::Exhausted => self.exhausted(&ctx, report.attempts),
        }
    }

    fn exhausted(
        &self,
        ctx: &AttemptContext,
        attempts: Vec<AcquisitionAttempt>,
    ) -> Result<CaptureReport, AcquireError> {
        let attempt_count = attempts.len();
        let last_failure = ctx.last_failure();
        warn!(
            url = %ctx.url,
            attempts = attempt_count,
            last_failure = last_failure.as_deref().unwrap_or("none"),
            "no PDF found"
        );
        let error = AcquireError::Exhausted {
            url: ctx.url.clone(),
            attempts,
            last_failure,
            proxy_retry_url: self.proxy.retry_url(&ctx.url),
        };
        self.publish(AcquisitionState::Exhausted {
            attempts: attempt_count,
            message: error.to_string(),
        });
        Err(error)
    }

    /// One detection attempt: every strategy in order, stopping at the
    /// first validated PDF.
    #[instrument(skip_all, fields(attempt = attempt.attempt_number))]
    async fn run_attempt(&self, attempt: AcquisitionAttempt, ctx: &AttemptContext) -> AttemptOutcome {
        self.publish(AcquisitionState::Attempting {
            attempt: attempt.attempt_number,
        });
        let mut tally = AttemptTally::default();
        let session = self.session.as_ref();

        let current = session
            .current_url()
            .await
            .unwrap_or_else(|| ctx.url.clone());
        let native_display = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return self.stopped_outcome(),
            shown = session.probe_native_display() => shown,
        };
        let mut native_tried = false;

        // (a) The surface already shows a PDF viewer.
        if native_display {
            debug!(url = %current, "native PDF view detected");
            if self
                .fetch_step(ctx, &mut tally, &current, AcceptProfile::Pdf, SourceKind::Primary)
                .await
                == Step::Stop
            {
                return self.stopped_outcome();
            }
            native_tried = true;
            if self.native_step(ctx, &mut tally, &current).await == Step::Stop {
                return self.stopped_outcome();
            }
        }

        // (b) Plain fetch of the current URL.
        if self
            .fetch_step(
                ctx,
                &mut tally,
                &current,
                AcceptProfile::Permissive,
                SourceKind::Primary,
            )
            .await
            == Step::Stop
        {
            return self.stopped_outcome();
        }

        // (c) Content negotiation for PDF-looking endpoints.
        if !native_display
            && self.heuristics.looks_like_pdf_url(&current)
            && self
                .fetch_step(ctx, &mut tally, &current, AcceptProfile::Pdf, SourceKind::Primary)
                .await
                == Step::Stop
        {
            return self.stopped_outcome();
        }

        // (d) Earlier hops of the navigation.
        for member in self.redirect_chain().members_except(&current) {
            if self
                .fetch_step(
                    ctx,
                    &mut tally,
                    &member.url,
                    AcceptProfile::Permissive,
                    member.source_kind,
                )
                .await
                == Step::Stop
            {
                return self.stopped_outcome();
            }
        }

        // Embedded frame sources.
        if self.frame_step(ctx, &mut tally).await == Step::Stop {
            return self.stopped_outcome();
        }

        // (e) Strong signal but nothing validated: go through the engine.
        let strong_signal = native_display
            || tally.auth_required
            || tally.pdf_url_served_other
            || ctx
                .trigger
                .signal()
                .is_some_and(ResponseSignal::is_high_confidence);
        if strong_signal
            && !native_tried
            && self.native_step(ctx, &mut tally, &current).await == Step::Stop
        {
            return self.stopped_outcome();
        }

        if tally.is_hopeless() {
            warn!(url = %current, "no strategy can reach this URL; ending schedule early");
            ctx.abandon();
        }
        if tally.network_errors + tally.fatal_errors > 0 {
            AttemptOutcome::NetworkError
        } else {
            AttemptOutcome::NotPdf
        }
    }

    async fn fetch_step(
        &self,
        ctx: &AttemptContext,
        tally: &mut AttemptTally,
        url: &str,
        accept: AcceptProfile,
        source_kind: SourceKind,
    ) -> Step {
        if self.interrupted(ctx) {
            return Step::Stop;
        }
        let result = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Step::Stop,
            result = self.fetcher.fetch(self.session.as_ref(), url, accept) => result,
        };

        match result {
            Ok(resource) if is_pdf(&resource.bytes) => {
                self.deliver(
                    ctx,
                    ValidatedPdf {
                        bytes: resource.bytes,
                        source_url: resource.meta.final_url,
                        source_kind,
                    },
                );
                Step::Stop
            }
            Ok(resource) => {
                debug!(
                    url = %url,
                    accept = ?accept,
                    payload = %describe_payload(&resource.bytes),
                    "not a PDF"
                );
                tally.non_pdf_responses += 1;
                if source_kind == SourceKind::Primary && self.heuristics.looks_like_pdf_url(url) {
                    tally.pdf_url_served_other = true;
                }
                Step::Continue
            }
            Err(error) => {
                tally.record(ctx, url, &error);
                Step::Continue
            }
        }
    }

    async fn native_step(&self, ctx: &AttemptContext, tally: &mut AttemptTally, url: &str) -> Step {
        if self.interrupted(ctx) {
            return Step::Stop;
        }
        match self
            .native
            .download(self.session.as_ref(), url, AcceptProfile::Pdf, &ctx.cancel)
            .await
        {
            Ok(bytes) if is_pdf(&bytes) => {
                self.deliver(
                    ctx,
                    ValidatedPdf {
                        bytes,
                        source_url: url.to_string(),
                        source_kind: SourceKind::Primary,
                    },
                );
                Step::Stop
            }
            Ok(bytes) => {
                debug!(url = %url, payload = %describe_payload(&bytes), "native download is not a PDF");
                tally.non_pdf_responses += 1;
                Step::Continue
            }
            Err(error) if error.kind() == FailureKind::Cancelled => Step::Stop,
            Err(error) => {
                tally.record(ctx, url, &error);
                Step::Continue
            }
        }
    }

    async fn frame_step(&self, ctx: &AttemptContext, tally: &mut AttemptTally) -> Step {
        if self.interrupted(ctx) {
            return Step::Stop;
        }
        let candidates = self.session.frame_candidates().await;
        if candidates.is_empty() {
            return Step::Continue;
        }
        match self
            .frames
            .probe(self.session.as_ref(), &candidates, &ctx.cancel)
            .await
        {
            FrameProbeOutcome::Found(pdf) => {
                self.deliver(ctx, pdf);
                Step::Stop
            }
            FrameProbeOutcome::NotFound { network_errors } => {
                tally.network_errors += network_errors;
                Step::Continue
            }
            FrameProbeOutcome::Cancelled => Step::Stop,
        }
    }

    /// Hands validated bytes to the sink; the first delivery wins.
    fn deliver(&self, ctx: &AttemptContext, pdf: ValidatedPdf) {
        let result = CaptureResult {
            suggested_filename: suggested_filename(&pdf.source_url, &self.hint),
            bytes: pdf.bytes,
            source_url: pdf.source_url,
            source_kind: pdf.source_kind,
        };
        let report = CaptureReport::captured(&ctx.url, &result);
        let source_url = result.source_url.clone();

        if self.sink.deliver(result) {
            *self
                .captured
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(report);
            self.publish(AcquisitionState::Succeeded { source_url });
        }
    }

    fn take_captured(
        &self,
        attempts: Vec<AcquisitionAttempt>,
    ) -> Result<CaptureReport, AcquireError> {
        let captured = self
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match captured {
            Some(mut report) => {
                report.attempts = attempts;
                Ok(report)
            }
            None => Err(AcquireError::Cancelled),
        }
    }

    fn interrupted(&self, ctx: &AttemptContext) -> bool {
        ctx.cancel.is_cancelled() || self.sink.is_delivered()
    }

    fn stopped_outcome(&self) -> AttemptOutcome {
        if self.sink.is_delivered() {
            AttemptOutcome::Success
        } else {
            AttemptOutcome::Pending
        }
    }

    async fn check_temp_dir(&self) -> Result<(), AcquireError> {
        let Some(dir) = &self.temp_dir else {
            return Ok(());
        };
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(AcquireError::TempDir {
                path: dir.clone(),
                source: std::io::Error::other("not a directory"),
            }),
            Err(source) => Err(AcquireError::TempDir {
                path: dir.clone(),
                source,
            }),
        }
    }

    fn with_chain(&self, update: impl FnOnce(&mut RedirectChain)) {
        update(&mut self.chain.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn publish(&self, state: AcquisitionState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::acquire::CaptureStatus;
    use crate::test_support::ScriptedSession;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PDF: &[u8] = b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n";
    const HTML: &[u8] = b"<!DOCTYPE html><html><body><p>Abstract</p></body></html>";

    fn fast_config() -> EngineConfig {
        EngineConfig::default().with_retry_offsets_ms(&[0, 10, 20, 30])
    }

    /// Orchestrator plus a counter of `on_captured` invocations.
    fn orchestrator(
        session: &Arc<ScriptedSession>,
        config: &EngineConfig,
    ) -> (DetectionOrchestrator, Arc<Mutex<Vec<CaptureResult>>>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let session: Arc<dyn BrowsingSession> = session.clone();
        let orchestrator = DetectionOrchestrator::new(session, config, move |result| {
            sink.lock().unwrap().push(result);
        });
        (orchestrator, delivered)
    }

    async fn mount_get(server: &MockServer, at: &str, body: &[u8], content_type: &str) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", content_type)
                    .set_body_bytes(body.to_vec()),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_direct_pdf_signal_captures_without_retry() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_get(&server, "/paper.pdf", PDF, "application/pdf").await;

        let url = format!("{}/paper.pdf", server.uri());
        let session = Arc::new(ScriptedSession::new(&url));
        let (orchestrator, delivered) = orchestrator(&session, &fast_config());

        let mut signal = ResponseSignal::for_url(&url, 200);
        signal.mime_type = Some("application/pdf".to_string());
        let report = orchestrator
            .acquire(Trigger::NavigationFinished(signal))
            .await
            .unwrap();

        assert_eq!(report.status, CaptureStatus::Captured);
        assert_eq!(report.suggested_filename.as_deref(), Some("paper.pdf"));
        assert_eq!(report.bytes, PDF.len());
        assert!(report.attempts.is_empty());

        let delivered = delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].bytes, PDF);
        assert_eq!(delivered[0].source_kind, SourceKind::Primary);
        assert!(matches!(
            orchestrator.state(),
            AcquisitionState::Succeeded { .. }
        ));
    }

    #[tokio::test]
    async fn test_native_view_falls_back_to_session_download() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_get(&server, "/viewer", HTML, "text/html").await;

        let temp = tempfile::tempdir().unwrap();
        let session = Arc::new(
            ScriptedSession::new(format!("{}/viewer", server.uri()))
                .with_native_display(true)
                .with_native_body(PDF),
        );
        let config = fast_config().with_temp_dir(temp.path());
        let (orchestrator, delivered) = orchestrator(&session, &config);

        let report = orchestrator.acquire(Trigger::Manual).await.unwrap();

        assert_eq!(report.status, CaptureStatus::Captured);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::Success);
        assert_eq!(session.native_calls(), 1);
        assert_eq!(delivered.lock().unwrap()[0].bytes, PDF);
        assert_eq!(
            std::fs::read_dir(temp.path()).unwrap().count(),
            0,
            "native download artifact must be removed"
        );
    }

    #[tokio::test]
    async fn test_pdf_endpoint_retried_with_explicit_accept() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/doi/pdf/10.1/x"))
            .and(header("Accept", "application/pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF.to_vec()))
            .mount(&server)
            .await;
        mount_get(&server, "/doi/pdf/10.1/x", HTML, "text/html").await;

        let session = Arc::new(ScriptedSession::new(format!("{}/doi/pdf/10.1/x", server.uri())));
        let (orchestrator, delivered) = orchestrator(&session, &fast_config());

        let report = orchestrator.acquire(Trigger::Manual).await.unwrap();
        assert_eq!(report.status, CaptureStatus::Captured);
        assert_eq!(delivered.lock().unwrap().len(), 1);
        assert_eq!(session.native_calls(), 0);
    }

    #[tokio::test]
    async fn test_pdf_url_serving_html_falls_back_to_session_download() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_get(&server, "/doi/pdf/10.1/x", HTML, "text/html").await;

        let temp = tempfile::tempdir().unwrap();
        let session = Arc::new(
            ScriptedSession::new(format!("{}/doi/pdf/10.1/x", server.uri()))
                .with_native_display(false)
                .with_native_body(PDF),
        );
        let config = fast_config().with_temp_dir(temp.path());
        let (orchestrator, delivered) = orchestrator(&session, &config);

        let report = orchestrator.acquire(Trigger::Manual).await.unwrap();

        assert_eq!(report.status, CaptureStatus::Captured);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.source_kind, Some(SourceKind::Primary));
        assert_eq!(session.native_calls(), 1);
        assert_eq!(delivered.lock().unwrap()[0].bytes, PDF);
    }

    #[tokio::test]
    async fn test_server_errors_use_every_attempt() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/article/busy"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4)
            .mount(&server)
            .await;

        let session = Arc::new(ScriptedSession::new(format!("{}/article/busy", server.uri())));
        let (orchestrator, _) = orchestrator(&session, &fast_config());

        match orchestrator.acquire(Trigger::Manual).await.unwrap_err() {
            AcquireError::Exhausted { attempts, .. } => {
                assert_eq!(attempts.len(), 4);
                assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::NetworkError));
            }
            other => panic!("Expected Exhausted, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unfetchable_url_ends_schedule_after_first_attempt() {
        let session = Arc::new(ScriptedSession::new("about:blank"));
        let (orchestrator, _) = orchestrator(&session, &EngineConfig::default());

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(900),
            orchestrator.acquire(Trigger::Manual),
        )
        .await
        .expect("must not wait for the 1000ms attempt");

        match result.unwrap_err() {
            AcquireError::Exhausted {
                attempts,
                last_failure,
                ..
            } => {
                assert_eq!(attempts.len(), 1);
                assert_eq!(attempts[0].outcome, AttemptOutcome::NetworkError);
                assert!(last_failure.unwrap().contains("invalid URL"));
            }
            other => panic!("Expected Exhausted, got: {other:?}"),
        }
        assert!(matches!(
            orchestrator.state(),
            AcquisitionState::Exhausted { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_no_pdf_exhausts_four_attempts() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/article/abstract"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/html")
                    .set_body_bytes(HTML.to_vec()),
            )
            .expect(4)
            .mount(&server)
            .await;

        let url = format!("{}/article/abstract", server.uri());
        let session = Arc::new(ScriptedSession::new(&url));
        let config = fast_config().with_proxy(ProxySettings::enabled("https://proxy.lib.edu/login?url="));
        let (orchestrator, delivered) = orchestrator(&session, &config);

        let error = orchestrator.acquire(Trigger::Manual).await.unwrap_err();
        match &error {
            AcquireError::Exhausted {
                attempts,
                proxy_retry_url,
                ..
            } => {
                assert_eq!(attempts.len(), 4);
                assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::NotPdf));
                assert_eq!(
                    proxy_retry_url.as_deref(),
                    Some(format!("https://proxy.lib.edu/login?url={url}").as_str())
                );
            }
            other => panic!("Expected Exhausted, got: {other:?}"),
        }
        assert!(delivered.lock().unwrap().is_empty());
        assert!(matches!(
            orchestrator.state(),
            AcquisitionState::Exhausted { attempts: 4, .. }
        ));
        assert_eq!(session.native_calls(), 0);
    }

    #[tokio::test]
    async fn test_redirect_chain_member_yields_pdf() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_get(&server, "/files/42", PDF, "application/octet-stream").await;
        mount_get(&server, "/landing", HTML, "text/html").await;

        let first = format!("{}/files/42", server.uri());
        let last = format!("{}/landing", server.uri());
        let session = Arc::new(ScriptedSession::new(&last));
        let (orchestrator, delivered) = orchestrator(&session, &fast_config());

        let (tx, rx) = mpsc::channel(8);
        tx.send(SessionEvent::NavigationStarted { url: first.clone() })
            .await
            .unwrap();
        tx.send(SessionEvent::Redirected { url: last.clone() })
            .await
            .unwrap();
        tx.send(SessionEvent::NavigationFinished(ResponseSignal::for_url(
            &last, 200,
        )))
        .await
        .unwrap();
        drop(tx);

        let report = orchestrator.run(rx).await.unwrap();
        assert_eq!(report.source_url.as_deref(), Some(first.as_str()));
        assert_eq!(report.source_kind, Some(SourceKind::RedirectChainMember));
        assert_eq!(delivered.lock().unwrap().len(), 1);
        assert_eq!(orchestrator.redirect_chain().urls(), [first, last]);
    }

    #[tokio::test]
    async fn test_frame_source_yields_pdf() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_get(&server, "/article", HTML, "text/html").await;
        Mock::given(method("HEAD"))
            .and(path("/embedded/file"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "application/pdf"))
            .mount(&server)
            .await;
        mount_get(&server, "/embedded/file", PDF, "application/pdf").await;

        let session = Arc::new(
            ScriptedSession::new(format!("{}/article", server.uri()))
                .with_frames(vec![format!("{}/embedded/file", server.uri())]),
        );
        let (orchestrator, delivered) = orchestrator(&session, &fast_config());

        let report = orchestrator.acquire(Trigger::Manual).await.unwrap();
        assert_eq!(report.source_kind, Some(SourceKind::Iframe));
        assert_eq!(delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_acquisition_after_capture_is_cancelled() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_get(&server, "/paper.pdf", PDF, "application/pdf").await;

        let session = Arc::new(ScriptedSession::new(format!("{}/paper.pdf", server.uri())));
        let (orchestrator, delivered) = orchestrator(&session, &fast_config());

        orchestrator.acquire(Trigger::Manual).await.unwrap();
        let again = orchestrator.acquire(Trigger::Manual).await;

        assert!(matches!(again, Err(AcquireError::Cancelled)));
        assert_eq!(delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_acquisitions_deliver_once() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_get(&server, "/paper.pdf", PDF, "application/pdf").await;

        let session = Arc::new(ScriptedSession::new(format!("{}/paper.pdf", server.uri())));
        let (orchestrator, delivered) = orchestrator(&session, &fast_config());

        let (first, second) = tokio::join!(
            orchestrator.acquire(Trigger::Manual),
            orchestrator.acquire(Trigger::Manual)
        );

        let captured = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(captured, 1, "first: {first:?}, second: {second:?}");
        assert_eq!(delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_current_url() {
        let session = Arc::new(ScriptedSession::new("unused"));
        session.set_current_url(None);
        let (orchestrator, _) = orchestrator(&session, &fast_config());

        let error = orchestrator.acquire(Trigger::Manual).await.unwrap_err();
        assert!(matches!(error, AcquireError::NoCurrentUrl));
        assert_eq!(orchestrator.state(), AcquisitionState::Idle);
    }

    #[tokio::test]
    async fn test_missing_temp_dir_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("nope");
        let session = Arc::new(ScriptedSession::new("https://x.org/a"));
        let (orchestrator, _) = orchestrator(&session, &fast_config().with_temp_dir(&missing));

        let error = orchestrator.acquire(Trigger::Manual).await.unwrap_err();
        match error {
            AcquireError::TempDir { path, .. } => assert_eq!(path, missing),
            other => panic!("Expected TempDir, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_session_closed_cancels_in_flight_acquisition() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(PDF.to_vec())
                    .set_delay(std::time::Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let session = Arc::new(ScriptedSession::new(format!("{}/slow", server.uri())));
        let (orchestrator, delivered) = orchestrator(&session, &fast_config());

        let (tx, rx) = mpsc::channel(8);
        tx.send(SessionEvent::ManualCaptureRequested).await.unwrap();
        tx.send(SessionEvent::SessionClosed).await.unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), orchestrator.run(rx))
            .await
            .expect("run must end promptly after SessionClosed");

        assert!(matches!(result, Err(AcquireError::Cancelled)));
        assert_eq!(orchestrator.state(), AcquisitionState::Cancelled);
        assert!(delivered.lock().unwrap().is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn test_run_returns_last_exhaustion_when_input_ends() {
        let session = Arc::new(ScriptedSession::new("about:blank"));
        let config = EngineConfig::default().with_retry_offsets_ms(&[0, 1]);
        let (orchestrator, _) = orchestrator(&session, &config);

        let (tx, rx) = mpsc::channel(8);
        tx.send(SessionEvent::ManualCaptureRequested).await.unwrap();
        drop(tx);

        let error = orchestrator.run(rx).await.unwrap_err();
        match error {
            AcquireError::Exhausted {
                attempts,
                last_failure,
                ..
            } => {
                assert_eq!(attempts.len(), 1);
                assert_eq!(attempts[0].outcome, AttemptOutcome::NetworkError);
                assert!(last_failure.unwrap().contains("invalid URL"));
            }
            other => panic!("Expected Exhausted, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_before_run_ends_immediately() {
        let session = Arc::new(ScriptedSession::new("about:blank"));
        let (orchestrator, _) = orchestrator(&session, &fast_config());
        let (_tx, rx) = mpsc::channel(8);

        orchestrator.cancel();
        let result = orchestrator.run(rx).await;
        assert!(matches!(result, Err(AcquireError::Cancelled)));
    }

    #[tokio::test]
    async fn test_state_transitions_are_observable() {
        let session = Arc::new(ScriptedSession::new("about:blank"));
        let config = EngineConfig::default().with_retry_offsets_ms(&[0]);
        let (orchestrator, _) = orchestrator(&session, &config);
        let mut states = orchestrator.subscribe();
        let seen = Arc::new(AtomicUsize::new(0));

        let watcher = {
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                while states.changed().await.is_ok() {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if states.borrow_and_update().is_terminal() {
                        break;
                    }
                }
            })
        };

        let _ = orchestrator.acquire(Trigger::Manual).await;
        drop(orchestrator);
        watcher.await.unwrap();
        assert!(seen.load(Ordering::SeqCst) >= 1);
    }
}
