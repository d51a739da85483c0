//! Constants for the fetch module (timeouts, login patterns).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (2 minutes; publisher PDFs are rarely huge).
pub const READ_TIMEOUT_SECS: u64 = 120;

/// Maximum redirect hops followed by the out-of-band client.
pub(crate) const MAX_REDIRECTS: usize = 10;

/// Common URL patterns indicating a login/SSO redirect.
pub(crate) const LOGIN_PATTERNS: &[&str] = &[
    "/login",
    "/signin",
    "/sign-in",
    "/auth/",
    "/sso",
    "/cas/login",
    "/saml",
    "/oauth",
    "/openid",
    "/idp/",
];
