//! Default User-Agent for the headless browsing session.
//!
//! Publishers route obvious bots to challenge pages, so the string leads with
//! a browser-compatible product token and still names the tool.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/paper-capture";

/// Browser-compatible prefix presented by the headless session.
const BROWSER_COMPAT_PREFIX: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)";

/// Default User-Agent for the headless session and its out-of-band fetches.
#[must_use]
pub(crate) fn default_session_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{BROWSER_COMPAT_PREFIX} paper-capture/{version} (+{PROJECT_UA_URL})")
}
