//! A browsing session whose engine-level signals are fixed by the test.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use capture_core::session::{
    BrowsingSession, NativeDownloadEvent, NativeDownloadStream, SessionCookie, SessionError,
};
use futures_util::StreamExt;

pub struct FakeSession {
    url: Mutex<Option<String>>,
    native_display: bool,
    native_body: Option<Vec<u8>>,
    native_calls: AtomicUsize,
}

impl FakeSession {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Mutex::new(Some(url.into())),
            native_display: false,
            native_body: None,
            native_calls: AtomicUsize::new(0),
        }
    }

    /// Shows a native PDF view whose engine download yields `body`.
    pub fn with_native_view(mut self, body: &[u8]) -> Self {
        self.native_display = true;
        self.native_body = Some(body.to_vec());
        self
    }

    pub fn native_calls(&self) -> usize {
        self.native_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowsingSession for FakeSession {
    async fn current_url(&self) -> Option<String> {
        self.url.lock().unwrap().clone()
    }

    async fn cookie_snapshot(&self) -> Vec<SessionCookie> {
        Vec::new()
    }

    fn user_agent(&self) -> String {
        "FakeSession/1.0".to_string()
    }

    async fn probe_native_display(&self) -> bool {
        self.native_display
    }

    async fn native_download(
        &self,
        _url: &str,
        _headers: &[(String, String)],
    ) -> Result<NativeDownloadStream, SessionError> {
        self.native_calls.fetch_add(1, Ordering::SeqCst);
        let Some(body) = self.native_body.clone() else {
            return Err(SessionError::Unavailable);
        };
        let events = vec![
            NativeDownloadEvent::Started {
                expected_len: Some(body.len() as u64),
            },
            NativeDownloadEvent::Chunk(body),
            NativeDownloadEvent::Finished,
        ];
        Ok(futures_util::stream::iter(events).boxed())
    }
}
