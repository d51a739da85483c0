//! Magic-byte classification of downloaded payloads.
//!
//! Success is only ever declared on bytes that pass [`is_pdf`]. Content-Type
//! headers and URL shapes are hints; publishers lie about both.

use std::fmt::Write;

/// The `%PDF` signature every PDF file starts with.
pub const PDF_MAGIC: [u8; 4] = [0x25, 0x50, 0x44, 0x46];

/// Maximum number of characters kept in a textual payload preview.
const PREVIEW_CHARS: usize = 120;

/// Returns true iff the buffer starts with `%PDF`.
///
/// Buffers shorter than four bytes are never PDFs.
#[must_use]
pub fn is_pdf(buffer: &[u8]) -> bool {
    buffer.len() >= PDF_MAGIC.len() && buffer[..PDF_MAGIC.len()] == PDF_MAGIC
}

/// Hex rendering of the first bytes of a payload, e.g. `3C 21 44 4F`.
#[must_use]
pub fn magic_hex(buffer: &[u8]) -> String {
    let mut out = String::new();
    for (idx, byte) in buffer.iter().take(PDF_MAGIC.len()).enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02X}");
    }
    if out.is_empty() {
        out.push_str("<empty>");
    }
    out
}

/// Single-line preview of a textual payload (HTML login pages, error pages).
///
/// Returns `None` for binary data.
#[must_use]
pub fn text_preview(buffer: &[u8]) -> Option<String> {
    let head = &buffer[..buffer.len().min(PREVIEW_CHARS * 4)];
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        // Cut mid-character; keep the valid prefix.
        Err(err) if err.error_len().is_none() => {
            std::str::from_utf8(&head[..err.valid_up_to()]).ok()?
        }
        Err(_) => return None,
    };
    if text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return None;
    }
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(PREVIEW_CHARS).collect())
}

/// Diagnostic description of a rejected payload for log output.
#[must_use]
pub fn describe_payload(buffer: &[u8]) -> String {
    match text_preview(buffer) {
        Some(preview) => format!(
            "{} bytes, magic={}, preview=\"{preview}\"",
            buffer.len(),
            magic_hex(buffer)
        ),
        None => format!("{} bytes, magic={}", buffer.len(), magic_hex(buffer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pdf_accepts_pdf_header() {
        assert!(is_pdf(b"%PDF-1.7\n%\xE2\xE3\xCF\xD3"));
        assert!(is_pdf(&[0x25, 0x50, 0x44, 0x46]));
    }

    #[test]
    fn test_is_pdf_rejects_short_buffers() {
        assert!(!is_pdf(b""));
        assert!(!is_pdf(b"%"));
        assert!(!is_pdf(b"%PD"));
    }

    #[test]
    fn test_is_pdf_rejects_html() {
        assert!(!is_pdf(b"<!DOCTYPE html><html></html>"));
        assert!(!is_pdf(b"<html>%PDF</html>"));
    }

    #[test]
    fn test_is_pdf_rejects_other_binary() {
        assert!(!is_pdf(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A]));
        assert!(!is_pdf(&[0x50, 0x4B, 0x03, 0x04]));
        // Leading whitespace before the signature is not accepted.
        assert!(!is_pdf(b" %PDF-1.4"));
    }

    #[test]
    fn test_magic_hex_formats_first_four_bytes() {
        assert_eq!(magic_hex(b"<!DOCTYPE"), "3C 21 44 4F");
        assert_eq!(magic_hex(b"ab"), "61 62");
        assert_eq!(magic_hex(b""), "<empty>");
    }

    #[test]
    fn test_text_preview_collapses_whitespace() {
        let preview = text_preview(b"<html>\n  <body>Please   log in</body>\n</html>").unwrap();
        assert_eq!(preview, "<html> <body>Please log in</body> </html>");
    }

    #[test]
    fn test_text_preview_none_for_binary() {
        assert!(text_preview(&[0x00, 0x01, 0x02, 0xFF]).is_none());
        assert!(text_preview(b"   ").is_none());
    }

    #[test]
    fn test_describe_payload_includes_magic_and_preview() {
        let described = describe_payload(b"<html>denied</html>");
        assert!(described.contains("magic=3C 68 74 6D"), "{described}");
        assert!(described.contains("preview=\"<html>denied</html>\""), "{described}");
    }
}
