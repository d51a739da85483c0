//! Coarse HTML analysis for the headless host.
//!
//! A real rendering engine reports these signals from its live DOM. The
//! headless session approximates them from the markup it loaded.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::heuristics::DomSummary;

/// Compiles a regex at static init; panics on invalid pattern.
fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static BODY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<body\b[^>]*>(.*?)(?:</body\s*>|\z)"));

static SCRIPT_STYLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<!--.*?-->",
    )
});

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)\b[^>]*?(/?)>"));

static ANY_TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"<[^>]*>"));

static TITLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<title\b[^>]*>(.*?)</title\s*>"));

static PDF_EMBED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<(?:embed|object)\b[^>]*\btype\s*=\s*["']?application/(?:x-)?pdf"#)
});

static FRAME_SOURCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<(?:iframe|frame|embed|object)\b[^>]*?\b(?:src|data)\s*=\s*["']([^"']+)["']"#,
    )
});

/// Elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Signals derived from one loaded HTML document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PageAnalysis {
    pub summary: DomSummary,
    pub frames: Vec<String>,
    pub title: Option<String>,
}

/// Analyzes `html` loaded from `base`.
pub(crate) fn analyze_html(html: &str, base: &Url) -> PageAnalysis {
    let cleaned = SCRIPT_STYLE_PATTERN.replace_all(html, " ");
    let body = BODY_PATTERN
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .map_or(cleaned.as_ref(), |m| m.as_str());

    let summary = DomSummary {
        child_elements: count_top_level_elements(body),
        text_chars: visible_text(body).chars().count(),
        has_pdf_embed: PDF_EMBED_PATTERN.is_match(body),
    };

    PageAnalysis {
        summary,
        frames: frame_sources(body, base),
        title: TITLE_PATTERN
            .captures(&cleaned)
            .and_then(|caps| caps.get(1))
            .map(|m| collapse_whitespace(m.as_str()))
            .filter(|title| !title.is_empty()),
    }
}

fn count_top_level_elements(body: &str) -> usize {
    let mut depth: usize = 0;
    let mut count = 0;
    for caps in TAG_PATTERN.captures_iter(body) {
        let closing = !caps[1].is_empty();
        let self_closing = !caps[3].is_empty();
        let name = caps[2].to_ascii_lowercase();

        if closing {
            depth = depth.saturating_sub(1);
            continue;
        }
        if depth == 0 {
            count += 1;
        }
        if !self_closing && !VOID_ELEMENTS.contains(&name.as_str()) {
            depth += 1;
        }
    }
    count
}

fn visible_text(body: &str) -> String {
    collapse_whitespace(&ANY_TAG_PATTERN.replace_all(body, " "))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Absolute frame sources in document order, without duplicates.
fn frame_sources(body: &str, base: &Url) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for caps in FRAME_SOURCE_PATTERN.captures_iter(body) {
        let raw = caps[1].trim().replace("&amp;", "&");
        let Ok(resolved) = base.join(&raw) else {
            continue;
        };
        let resolved = resolved.to_string();
        if !sources.contains(&resolved) {
            sources.push(resolved);
        }
    }
    sources
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://publisher.example/article/10.1/abc").unwrap()
    }

    #[test]
    fn test_static_patterns_compile() {
        for pattern in [
            &BODY_PATTERN,
            &SCRIPT_STYLE_PATTERN,
            &TAG_PATTERN,
            &ANY_TAG_PATTERN,
            &TITLE_PATTERN,
            &PDF_EMBED_PATTERN,
            &FRAME_SOURCE_PATTERN,
        ] {
            assert!(!LazyLock::force(pattern).as_str().is_empty());
        }
    }

    #[test]
    #[should_panic(expected = "invalid static regex")]
    fn test_compile_static_regex_panics_on_bad_pattern() {
        let _ = compile_static_regex("(unclosed");
    }

    #[test]
    fn test_viewer_page_is_near_empty() {
        let html = r#"<html><head><title>paper.pdf</title><style>body{margin:0}</style></head>
            <body><embed src="/content/paper.pdf" type="application/pdf" width="100%"></body></html>"#;
        let analysis = analyze_html(html, &base());
        assert_eq!(analysis.summary.child_elements, 1);
        assert_eq!(analysis.summary.text_chars, 0);
        assert!(analysis.summary.has_pdf_embed);
        assert_eq!(analysis.frames, ["https://publisher.example/content/paper.pdf"]);
        assert_eq!(analysis.title.as_deref(), Some("paper.pdf"));
    }

    #[test]
    fn test_article_page_has_prose_and_structure() {
        let html = "<html><body><header><nav><a href='/'>Home</a></nav></header>\
            <main><h1>Title</h1><p>This abstract describes a long experiment with many words in it.</p></main>\
            <footer>(c) Publisher</footer><script>var x = '<div>';</script></body></html>";
        let analysis = analyze_html(html, &base());
        assert_eq!(analysis.summary.child_elements, 3);
        assert!(analysis.summary.text_chars > 50);
        assert!(!analysis.summary.has_pdf_embed);
        assert!(analysis.frames.is_empty());
    }

    #[test]
    fn test_void_and_self_closing_elements_do_not_nest() {
        let html = "<body><img src='a.png'><br/><div><span>x</span></div></body>";
        let analysis = analyze_html(html, &base());
        assert_eq!(analysis.summary.child_elements, 3);
        assert_eq!(analysis.summary.text_chars, 1);
    }

    #[test]
    fn test_frame_sources_resolved_and_deduplicated() {
        let html = r#"<body>
            <iframe src="viewer?file=1&amp;type=pdf"></iframe>
            <iframe src="https://cdn.example/doc.pdf"></iframe>
            <object data="https://cdn.example/doc.pdf"></object>
        </body>"#;
        let analysis = analyze_html(html, &base());
        assert_eq!(
            analysis.frames,
            [
                "https://publisher.example/article/10.1/viewer?file=1&type=pdf",
                "https://cdn.example/doc.pdf",
            ]
        );
    }

    #[test]
    fn test_document_without_body_tag() {
        let analysis = analyze_html("plain text response", &base());
        assert_eq!(analysis.summary.child_elements, 0);
        assert_eq!(analysis.summary.text_chars, "plain text response".len());
        assert!(analysis.title.is_none());
    }
}
