//! Suggested filenames for captured documents, and unique output paths.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use url::Url;

/// Publication metadata the host knows about the document being captured.
///
/// Only used when the capturing URL has no usable last path segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublicationHint {
    /// Family name of the first author.
    pub first_author_surname: Option<String>,
    /// Publication year.
    pub year: Option<String>,
    /// Title; only its first word is used.
    pub title: Option<String>,
}

impl PublicationHint {
    /// Builds a hint from an author list such as `"Curie, Marie; Curie, Pierre"`.
    #[must_use]
    pub fn from_authors(authors: &str, year: Option<&str>, title: Option<&str>) -> Self {
        Self {
            first_author_surname: extract_primary_author(authors),
            year: year.map(str::to_string),
            title: title.map(str::to_string),
        }
    }

    /// `{Surname|Unknown}_{year|NoYear}_{FirstTitleWord|Untitled}.pdf`
    #[must_use]
    pub fn fallback_filename(&self) -> String {
        let author = non_empty_component(self.first_author_surname.as_deref())
            .unwrap_or_else(|| "Unknown".to_string());
        let year = non_empty_component(self.year.as_deref()).unwrap_or_else(|| "NoYear".to_string());
        let title_word = self
            .title
            .as_deref()
            .and_then(|title| {
                title
                    .split_whitespace()
                    .map(sanitize_filename_component)
                    .find(|word| !word.is_empty())
            })
            .unwrap_or_else(|| "Untitled".to_string());
        format!("{author}_{year}_{title_word}.pdf")
    }
}

/// Derives the filename for bytes captured from `source_url`.
///
/// - Last path segment ending in `.pdf` (any case): used as-is.
/// - Other non-empty last segment: `.pdf` appended.
/// - Otherwise: [`PublicationHint::fallback_filename`].
#[must_use]
pub fn suggested_filename(source_url: &str, hint: &PublicationHint) -> String {
    let Some(segment) = last_path_segment(source_url) else {
        return hint.fallback_filename();
    };
    let name = sanitize_filename(&segment);
    if name.trim_matches('_').is_empty() {
        return hint.fallback_filename();
    }
    if name.to_ascii_lowercase().ends_with(".pdf") {
        name
    } else {
        format!("{name}.pdf")
    }
}

/// Decoded last path segment, if non-empty.
fn last_path_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    let trimmed = decoded.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub(crate) fn extract_primary_author(authors: &str) -> Option<String> {
    let first = authors.split(';').next().map_or("", str::trim);
    if first.is_empty() {
        return None;
    }
    let family = first
        .split(',')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(first);
    let normalized = sanitize_filename_component(family);
    (!normalized.is_empty()).then_some(normalized)
}

fn non_empty_component(value: Option<&str>) -> Option<String> {
    let cleaned = sanitize_filename_component(value?);
    (!cleaned.is_empty()).then_some(cleaned)
}

pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            c if c.is_alphanumeric() || matches!(c, '-' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches('_').to_string()
}

/// Replaces characters that are invalid on common filesystems.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Resolves a path in `dir` that does not exist yet.
///
/// `paper.pdf`, then `paper_1.pdf`, `paper_2.pdf`, ...
#[must_use]
pub fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let filename = {
        let sanitized = sanitize_filename(filename);
        if sanitized.trim_matches('_').is_empty() {
            "capture.pdf".to_string()
        } else {
            sanitized
        }
    };
    let base_path = dir.join(&filename);
    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in 1..1000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}
