//! Engine configuration.
//!
//! Every heuristic constant the engine uses is data here, with the observed
//! publisher defaults, so hosts can tune or replace them.

use std::path::PathBuf;
use std::time::Duration;

use crate::acquire::DEFAULT_RETRY_OFFSETS;
use crate::fetch::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::heuristics::{NativeDisplayHeuristic, UrlHeuristics};

/// Placeholder for the target URL inside a proxy template.
const PROXY_URL_PLACEHOLDER: &str = "{url}";

/// Library proxy settings surfaced to the user as a retry suggestion.
///
/// The engine never rewrites navigation through the proxy itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    /// Proxy prefix (`https://proxy.lib.edu/login?url=`) or template
    /// containing `{url}`.
    pub library_proxy_url: Option<String>,
    /// Whether the user enabled the proxy.
    pub enabled: bool,
}

impl ProxySettings {
    /// Creates enabled settings for `library_proxy_url`.
    #[must_use]
    pub fn enabled(library_proxy_url: impl Into<String>) -> Self {
        Self {
            library_proxy_url: Some(library_proxy_url.into()),
            enabled: true,
        }
    }

    /// The URL to retry `url` through, when the proxy is enabled and set.
    ///
    /// Returns `None` when `url` already goes through the proxy.
    #[must_use]
    pub fn retry_url(&self, url: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let proxy = self.library_proxy_url.as_deref()?.trim();
        if proxy.is_empty() || url.trim().is_empty() {
            return None;
        }

        if proxy.contains(PROXY_URL_PLACEHOLDER) {
            let prefix = proxy.split(PROXY_URL_PLACEHOLDER).next().unwrap_or(proxy);
            if !prefix.is_empty() && url.starts_with(prefix) {
                return None;
            }
            return Some(proxy.replace(PROXY_URL_PLACEHOLDER, url));
        }
        if url.starts_with(proxy) {
            return None;
        }
        Some(format!("{proxy}{url}"))
    }
}

/// Configuration for one [`crate::DetectionOrchestrator`] and its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// HTTP connect timeout for out-of-band fetches.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout for out-of-band fetches.
    pub read_timeout_secs: u64,
    /// Attempt offsets from acquisition start.
    pub retry_offsets: Vec<Duration>,
    /// Directory for native download temp artifacts (system default if unset).
    pub temp_dir: Option<PathBuf>,
    /// PDF endpoint URL tables.
    pub heuristics: UrlHeuristics,
    /// Thresholds for recognizing a native PDF view.
    pub native_display: NativeDisplayHeuristic,
    /// Library proxy settings.
    pub proxy: ProxySettings,
    /// User agent override for the headless host.
    pub user_agent: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            retry_offsets: DEFAULT_RETRY_OFFSETS.to_vec(),
            temp_dir: None,
            heuristics: UrlHeuristics::default(),
            native_display: NativeDisplayHeuristic::default(),
            proxy: ProxySettings::default(),
            user_agent: None,
        }
    }
}

impl EngineConfig {
    /// Replaces the retry schedule with millisecond offsets.
    #[must_use]
    pub fn with_retry_offsets_ms(mut self, offsets_ms: &[u64]) -> Self {
        self.retry_offsets = offsets_ms.iter().copied().map(Duration::from_millis).collect();
        self
    }

    /// Sets the temp directory for native downloads.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Sets the proxy settings.
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = proxy;
        self
    }
}
