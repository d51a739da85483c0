//! URL and DOM heuristics for PDF endpoints.
//!
//! These tables are accreted from observed publisher behavior. They decide
//! fetch order and how eagerly to fall back, never whether a capture
//! succeeded: only [`crate::sniff::is_pdf`] can do that. Every table is plain
//! data so configuration can extend or replace it.

use url::Url;

/// Path suffixes that mark a PDF endpoint.
const DEFAULT_PATH_SUFFIXES: &[&str] = &[".pdf", "/pdf"];

/// Publisher path fragments that commonly serve PDFs.
const DEFAULT_PATH_PATTERNS: &[&str] = &[
    "/pdf/",
    "/doi/pdf/",
    "/epdf/",
    "/article/pdf/",
    "/download",
    "/getpdf",
    "/viewpdf",
];

/// Query fragments that explicitly request a PDF representation.
const DEFAULT_QUERY_MARKERS: &[&str] = &["format=pdf", "type=pdf"];

/// Query tokens that weakly suggest a download endpoint.
const DEFAULT_WEAK_QUERY_TOKENS: &[&str] = &["doi", "urlid"];

/// Default ceiling on body child elements for a native PDF view.
const DEFAULT_MAX_CHILD_ELEMENTS: usize = 2;

/// Default ceiling on visible text characters for a native PDF view.
const DEFAULT_MAX_TEXT_CHARS: usize = 50;

/// Pattern tables scoring a URL for "looks like a PDF endpoint".
///
/// All comparisons are case-insensitive; patterns are stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlHeuristics {
    path_suffixes: Vec<String>,
    path_patterns: Vec<String>,
    query_markers: Vec<String>,
    weak_query_tokens: Vec<String>,
}

impl Default for UrlHeuristics {
    fn default() -> Self {
        Self {
            path_suffixes: lowercase_all(DEFAULT_PATH_SUFFIXES),
            path_patterns: lowercase_all(DEFAULT_PATH_PATTERNS),
            query_markers: lowercase_all(DEFAULT_QUERY_MARKERS),
            weak_query_tokens: lowercase_all(DEFAULT_WEAK_QUERY_TOKENS),
        }
    }
}

impl UrlHeuristics {
    /// Adds publisher path fragments on top of the current table.
    #[must_use]
    pub fn with_extra_path_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = pattern.as_ref().trim().to_lowercase();
            if !pattern.is_empty() && !self.path_patterns.contains(&pattern) {
                self.path_patterns.push(pattern);
            }
        }
        self
    }

    /// Drops the weak query signals (`doi`, `urlid`), which are over-broad on
    /// some landing pages.
    #[must_use]
    pub fn without_weak_query_tokens(mut self) -> Self {
        self.weak_query_tokens.clear();
        self
    }

    /// Returns the configured path fragments.
    #[must_use]
    pub fn path_patterns(&self) -> &[String] {
        &self.path_patterns
    }

    /// Returns true when the URL's path or query looks like a PDF endpoint.
    #[must_use]
    pub fn looks_like_pdf_url(&self, url: &str) -> bool {
        let (path, query) = split_path_and_query(url);

        if self.path_suffixes.iter().any(|suffix| path.ends_with(suffix.as_str())) {
            return true;
        }
        if self.path_patterns.iter().any(|pattern| path.contains(pattern.as_str())) {
            return true;
        }

        let Some(query) = query else {
            return false;
        };
        if self.query_markers.iter().any(|marker| query.contains(marker.as_str())) {
            return true;
        }
        if query.contains("pdf") && query.contains("download") {
            return true;
        }
        self.weak_query_tokens
            .iter()
            .any(|token| query.contains(token.as_str()))
    }
}

/// Scores a URL against the default tables.
#[must_use]
pub fn looks_like_pdf_url(url: &str) -> bool {
    UrlHeuristics::default().looks_like_pdf_url(url)
}

/// Lowercased path and optional query of a URL.
///
/// Unparseable input is split on the first `?` so relative or malformed
/// strings still get scored.
fn split_path_and_query(url: &str) -> (String, Option<String>) {
    if let Ok(parsed) = Url::parse(url) {
        return (
            parsed.path().to_lowercase(),
            parsed.query().map(str::to_lowercase),
        );
    }
    let without_fragment = url.split('#').next().unwrap_or(url);
    match without_fragment.split_once('?') {
        Some((path, query)) => (path.to_lowercase(), Some(query.to_lowercase())),
        None => (without_fragment.to_lowercase(), None),
    }
}

fn lowercase_all(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_lowercase()).collect()
}

/// Coarse shape of a loaded document, as reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomSummary {
    /// Element children directly under the document body.
    pub child_elements: usize,
    /// Visible text characters in the body.
    pub text_chars: usize,
    /// Whether an `<embed>`/`<object>` declares `application/pdf`.
    pub has_pdf_embed: bool,
}

/// Thresholds for recognizing a rendering surface that shows a native PDF
/// viewer rather than an HTML page.
///
/// A viewer page is nearly empty: a single plugin element and no prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeDisplayHeuristic {
    /// Maximum body child elements.
    pub max_child_elements: usize,
    /// Visible text must be strictly shorter than this.
    pub max_text_chars: usize,
}

impl Default for NativeDisplayHeuristic {
    fn default() -> Self {
        Self {
            max_child_elements: DEFAULT_MAX_CHILD_ELEMENTS,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }
}

impl NativeDisplayHeuristic {
    /// Returns true when the document looks like a native PDF view.
    #[must_use]
    pub fn evaluate(&self, summary: &DomSummary) -> bool {
        summary.has_pdf_embed
            || (summary.child_elements <= self.max_child_elements
                && summary.text_chars < self.max_text_chars)
    }
}
