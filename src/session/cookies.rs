//! Cookie snapshots handed from a browsing session to out-of-band requests.
//!
//! The embedded engine's cookie store is private to it. Every fetch the
//! engine makes rebuilds a fresh `reqwest::cookie::Jar` from a point-in-time
//! [`CookieSnapshot`] instead of sharing a live store, so a sign-in that
//! happens between attempts is picked up by the next one.
//!
//! Snapshots can be seeded from a Netscape `cookies.txt` export, the format
//! browser extensions and `curl -c` write.

use std::fmt;
use std::io::BufRead;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::cookie::Jar;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

/// Prefix curl and browser exports put on `HttpOnly` cookie lines.
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// Which hosts a cookie is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieScope {
    /// Exactly this host.
    Host(String),
    /// This domain and every subdomain.
    Domain(String),
}

impl CookieScope {
    /// The host or domain, lowercase and without a leading dot.
    #[must_use]
    pub fn host(&self) -> &str {
        match self {
            Self::Host(host) | Self::Domain(host) => host,
        }
    }

    fn matches_host(&self, host: &str) -> bool {
        match self {
            Self::Host(own) => host.eq_ignore_ascii_case(own),
            Self::Domain(own) => {
                let host = host.to_ascii_lowercase();
                host == *own
                    || host
                        .strip_suffix(own.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            }
        }
    }
}

/// A cookie copied out of a browsing session.
///
/// Debug output never includes the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCookie {
    scope: CookieScope,
    path: String,
    secure: bool,
    /// Unix seconds; `None` for a session cookie.
    expires: Option<u64>,
    name: String,
    value: String,
}

impl SessionCookie {
    /// A session cookie for exactly `host`, scoped to `/`.
    #[must_use]
    pub fn host_only(
        host: impl Into<String>,
        secure: bool,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            scope: CookieScope::Host(normalize_host(&host.into())),
            path: "/".to_string(),
            secure,
            expires: None,
            name: name.into(),
            value: value.into(),
        }
    }

    /// A session cookie for `domain` and its subdomains, scoped to `/`.
    #[must_use]
    pub fn for_domain(
        domain: impl Into<String>,
        secure: bool,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            scope: CookieScope::Domain(normalize_host(&domain.into())),
            ..Self::host_only("", secure, name, value)
        }
    }

    /// Restricts the cookie to `path`.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') { path } else { "/".to_string() };
        self
    }

    /// Expires the cookie at `unix_secs`.
    #[must_use]
    pub fn expiring_at(mut self, unix_secs: u64) -> Self {
        self.expires = Some(unix_secs);
        self
    }

    /// Hosts the cookie is sent to.
    #[must_use]
    pub fn scope(&self) -> &CookieScope {
        &self.scope
    }

    /// Host or domain the cookie belongs to.
    #[must_use]
    pub fn host(&self) -> &str {
        self.scope.host()
    }

    /// Cookie name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cookie value. Sensitive; never log it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Path scope.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the cookie is only sent over HTTPS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// True once the expiry has passed. Session cookies never expire here.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires.is_some_and(|secs| {
            UNIX_EPOCH
                .checked_add(Duration::from_secs(secs))
                .is_some_and(|expiry| expiry <= now)
        })
    }

    /// True when a browser would send this cookie with a request to `url`.
    #[must_use]
    pub fn applies_to(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        if self.secure && url.scheme() != "https" {
            return false;
        }
        self.scope.matches_host(host) && path_matches(&self.path, url.path())
    }

    /// Origin the cookie is registered under in a reqwest jar.
    fn origin(&self) -> Option<Url> {
        let scheme = if self.secure { "https" } else { "http" };
        Url::parse(&format!("{scheme}://{}{}", self.host(), self.path)).ok()
    }

    /// `Set-Cookie` header value reproducing this cookie's scope.
    fn set_cookie_header(&self) -> String {
        let mut header = format!("{}={}; Path={}", self.name, self.value, self.path);
        if let CookieScope::Domain(domain) = &self.scope {
            header.push_str("; Domain=");
            header.push_str(domain);
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if let Some(expiry) = self
            .expires
            .and_then(|secs| UNIX_EPOCH.checked_add(Duration::from_secs(secs)))
        {
            header.push_str("; Expires=");
            header.push_str(&httpdate::fmt_http_date(expiry));
        }
        header
    }
}

impl fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookie")
            .field("scope", &self.scope)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// RFC 6265 path-match.
fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    request_path == cookie_path
        || request_path.strip_prefix(cookie_path).is_some_and(|rest| {
            cookie_path.ends_with('/') || rest.starts_with('/')
        })
}

/// The cookies one request is made with.
///
/// A cookie is identified by scope host, path and name; inserting a cookie
/// with the same identity replaces the older value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieSnapshot {
    cookies: Vec<SessionCookie>,
}

impl CookieSnapshot {
    /// Starts a snapshot from known cookies.
    #[must_use]
    pub fn from_cookies(cookies: impl IntoIterator<Item = SessionCookie>) -> Self {
        let mut snapshot = Self::default();
        for cookie in cookies {
            snapshot.insert(cookie);
        }
        snapshot
    }

    /// Adds `cookie`, replacing one with the same identity.
    pub fn insert(&mut self, cookie: SessionCookie) {
        let existing = self.cookies.iter_mut().find(|known| {
            known.host() == cookie.host() && known.path == cookie.path && known.name == cookie.name
        });
        match existing {
            Some(known) => *known = cookie,
            None => self.cookies.push(cookie),
        }
    }

    /// Merges a `Cookie` request header a live store produced for `url`.
    ///
    /// A pair that a known cookie already covers updates that cookie's
    /// value; anything else becomes a host-only cookie for `url`'s host.
    pub fn absorb_request_header(&mut self, url: &Url, header: &str) {
        let Some(host) = url.host_str() else {
            return;
        };
        for pair in header.split(';') {
            let Some((name, value)) = pair.trim().split_once('=') else {
                continue;
            };
            let covered = self
                .cookies
                .iter_mut()
                .find(|known| known.name == name && known.applies_to(url));
            match covered {
                Some(known) => value.clone_into(&mut known.value),
                None => self.cookies.push(SessionCookie::host_only(
                    host,
                    url.scheme() == "https",
                    name,
                    value,
                )),
            }
        }
    }

    /// Number of cookies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// True when the snapshot holds no cookies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// The cookies, in insertion order.
    #[must_use]
    pub fn into_cookies(self) -> Vec<SessionCookie> {
        self.cookies
    }
}

/// Builds a fresh jar holding every unexpired cookie of `cookies`.
#[instrument(level = "debug", skip(cookies), fields(count = cookies.len()))]
pub fn jar_from_snapshot(cookies: &[SessionCookie]) -> Arc<Jar> {
    let jar = Arc::new(Jar::default());
    let now = SystemTime::now();

    for cookie in cookies {
        if cookie.is_expired_at(now) {
            debug!(host = %cookie.host(), name = %cookie.name, "dropping expired cookie");
            continue;
        }
        match cookie.origin() {
            Some(origin) => jar.add_cookie_str(&cookie.set_cookie_header(), &origin),
            None => warn!(host = %cookie.host(), name = %cookie.name, "cookie host is not a valid URL host"),
        }
    }

    jar
}

/// Why a `cookies.txt` could not be used.
#[derive(Debug, Error)]
pub enum CookieError {
    /// The source could not be read.
    #[error("failed to read cookies: {0}")]
    Io(#[from] std::io::Error),

    /// Entries were present but none of them parsed.
    #[error("no usable cookies found ({skipped} entries skipped)")]
    NoCookiesFound {
        /// Entries that failed to parse.
        skipped: usize,
    },
}

/// A `cookies.txt` entry that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number.
    pub line: usize,
    /// Why it was skipped. Never contains the cookie value.
    pub reason: String,
}

/// Cookies read from a `cookies.txt` export.
#[derive(Debug, Default)]
pub struct CookieFile {
    /// Usable cookies.
    pub cookies: Vec<SessionCookie>,
    /// Entries that were skipped.
    pub skipped: Vec<SkippedLine>,
}

/// Reads a Netscape `cookies.txt` export.
///
/// Entries are `domain, include-subdomains, path, secure, expiry, name,
/// value`, separated by tabs. `#HttpOnly_` lines are entries; other `#`
/// lines are comments. A missing value field reads as an empty value.
/// Entries that fail to parse are skipped and reported.
///
/// # Errors
///
/// Returns [`CookieError::Io`] when reading fails and
/// [`CookieError::NoCookiesFound`] when every entry was skipped.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<CookieFile, CookieError> {
    let mut file = CookieFile::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let entry = line.trim_end_matches(['\r', '\n']);
        let entry = entry.strip_prefix(HTTP_ONLY_PREFIX).unwrap_or(entry);
        if entry.trim().is_empty() || entry.starts_with('#') {
            continue;
        }

        match parse_entry(entry) {
            Ok(cookie) => file.cookies.push(cookie),
            Err(reason) => {
                warn!(line = index + 1, reason, "skipping cookie entry");
                file.skipped.push(SkippedLine {
                    line: index + 1,
                    reason: reason.to_string(),
                });
            }
        }
    }

    if file.cookies.is_empty() && !file.skipped.is_empty() {
        return Err(CookieError::NoCookiesFound {
            skipped: file.skipped.len(),
        });
    }
    debug!(count = file.cookies.len(), skipped = file.skipped.len(), "read cookies.txt");
    Ok(file)
}

fn parse_entry(entry: &str) -> Result<SessionCookie, &'static str> {
    let fields: Vec<&str> = entry.split('\t').collect();
    let [domain, subdomains, path, secure, expiry, name, rest @ ..] = fields.as_slice() else {
        return Err("expected 7 tab-separated fields");
    };
    let value = match rest {
        [] => "",
        [value] => *value,
        _ => return Err("expected 7 tab-separated fields"),
    };

    if domain.trim().trim_start_matches('.').is_empty() {
        return Err("empty domain");
    }
    if name.is_empty() {
        return Err("empty cookie name");
    }
    let subdomains = parse_flag(subdomains).ok_or("include-subdomains flag must be TRUE or FALSE")?;
    let secure = parse_flag(secure).ok_or("secure flag must be TRUE or FALSE")?;
    let expiry: u64 = expiry
        .parse()
        .map_err(|_| "expiry must be a non-negative integer")?;

    let cookie = if subdomains {
        SessionCookie::for_domain(*domain, secure, *name, value)
    } else {
        SessionCookie::host_only(*domain, secure, *name, value)
    };
    let cookie = cookie.with_path(*path);
    Ok(if expiry == 0 {
        cookie
    } else {
        cookie.expiring_at(expiry)
    })
}

fn parse_flag(field: &str) -> Option<bool> {
    if field.eq_ignore_ascii_case("TRUE") {
        Some(true)
    } else if field.eq_ignore_ascii_case("FALSE") {
        Some(false)
    } else {
        None
    }
}
