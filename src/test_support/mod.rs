//! Shared fixtures for unit tests.

#![allow(clippy::unwrap_used)]

pub mod socket_guard;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::session::{
    BrowsingSession, NativeDownloadEvent, NativeDownloadStream, SessionCookie, SessionError,
};

/// What the fake host's network stack does when asked for a native download.
#[derive(Debug, Clone)]
enum NativeScript {
    Unavailable,
    Events(Vec<NativeDownloadEvent>),
}

/// A browsing session whose signals are set up front by the test.
#[derive(Debug)]
pub struct ScriptedSession {
    current_url: Mutex<Option<String>>,
    cookies: Mutex<Vec<SessionCookie>>,
    user_agent: String,
    native_display: AtomicBool,
    frames: Mutex<Vec<String>>,
    native_script: Mutex<NativeScript>,
    native_calls: AtomicUsize,
    native_headers: Mutex<Vec<(String, String)>>,
}

impl ScriptedSession {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            current_url: Mutex::new(Some(url.into())),
            cookies: Mutex::new(Vec::new()),
            user_agent: "ScriptedSession/1.0".to_string(),
            native_display: AtomicBool::new(false),
            frames: Mutex::new(Vec::new()),
            native_script: Mutex::new(NativeScript::Unavailable),
            native_calls: AtomicUsize::new(0),
            native_headers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn with_cookies(self, cookies: Vec<SessionCookie>) -> Self {
        self.set_cookies(cookies);
        self
    }

    pub fn with_native_display(self, native: bool) -> Self {
        self.native_display.store(native, Ordering::SeqCst);
        self
    }

    pub fn with_frames(self, frames: Vec<String>) -> Self {
        *self.frames.lock().unwrap() = frames;
        self
    }

    /// Native downloads succeed with `body`, split into two chunks.
    pub fn with_native_body(self, body: &[u8]) -> Self {
        let mid = body.len() / 2;
        self.with_native_events(vec![
            NativeDownloadEvent::Started {
                expected_len: Some(body.len() as u64),
            },
            NativeDownloadEvent::Chunk(body[..mid].to_vec()),
            NativeDownloadEvent::Chunk(body[mid..].to_vec()),
            NativeDownloadEvent::Finished,
        ])
    }

    pub fn with_native_events(self, events: Vec<NativeDownloadEvent>) -> Self {
        *self.native_script.lock().unwrap() = NativeScript::Events(events);
        self
    }

    pub fn set_cookies(&self, cookies: Vec<SessionCookie>) {
        *self.cookies.lock().unwrap() = cookies;
    }

    pub fn set_current_url(&self, url: Option<&str>) {
        *self.current_url.lock().unwrap() = url.map(str::to_string);
    }

    pub fn native_calls(&self) -> usize {
        self.native_calls.load(Ordering::SeqCst)
    }

    pub fn last_native_headers(&self) -> Vec<(String, String)> {
        self.native_headers.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowsingSession for ScriptedSession {
    async fn current_url(&self) -> Option<String> {
        self.current_url.lock().unwrap().clone()
    }

    async fn cookie_snapshot(&self) -> Vec<SessionCookie> {
        self.cookies.lock().unwrap().clone()
    }

    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    async fn probe_native_display(&self) -> bool {
        self.native_display.load(Ordering::SeqCst)
    }

    async fn frame_candidates(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    async fn native_download(
        &self,
        _url: &str,
        headers: &[(String, String)],
    ) -> Result<NativeDownloadStream, SessionError> {
        self.native_calls.fetch_add(1, Ordering::SeqCst);
        *self.native_headers.lock().unwrap() = headers.to_vec();
        let script = self.native_script.lock().unwrap().clone();
        match script {
            NativeScript::Unavailable => Err(SessionError::Unavailable),
            NativeScript::Events(events) => Ok(futures_util::stream::iter(events).boxed()),
        }
    }
}
