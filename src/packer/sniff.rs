//! Content-type detection for packed assets.
//!
//! Detection order: a caller-supplied type always wins; otherwise the first
//! 512 bytes are sniffed for well-known signatures, falling back to the
//! file extension. Sniffed `text/plain` and `text/xml` results are fixed up
//! by extension for the web types whose signatures are indistinguishable
//! from plain text (stylesheets, scripts, JSON, SVG).

use std::path::Path;

/// How many leading bytes participate in sniffing.
pub const SNIFF_LEN: usize = 512;

/// Determine the content type for a file, given its path and leading bytes.
pub fn detect(path: &Path, head: &[u8]) -> String {
    let head = &head[..head.len().min(SNIFF_LEN)];
    let sniffed = sniff(head);

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    if sniffed.starts_with("text/plain") {
        match ext.as_str() {
            "css" => return "text/css".to_string(),
            "js" => return "application/javascript".to_string(),
            "json" => return "application/json".to_string(),
            "svg" => return "image/svg+xml".to_string(),
            _ => {}
        }
    }
    if sniffed.starts_with("text/xml") && ext == "svg" {
        return "image/svg+xml".to_string();
    }

    if sniffed == "application/octet-stream" {
        // Opaque bytes: trust the extension if it maps to a known type.
        if let Some(mime) = mime_guess::from_path(path).first_raw() {
            return mime.to_string();
        }
    }

    sniffed.to_string()
}

/// Sniff a content type from leading bytes: binary signatures first, then
/// markup prefixes, then a text/binary split.
fn sniff(head: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"\x1f\x8b\x08", "application/x-gzip"),
        (b"PK\x03\x04", "application/zip"),
        (b"wOFF", "font/woff"),
        (b"wOF2", "font/woff2"),
        (b"\x00asm", "application/wasm"),
        (b"OggS", "application/ogg"),
    ];
    for (sig, mime) in SIGNATURES {
        if head.starts_with(sig) {
            return mime;
        }
    }
    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return "image/webp";
    }

    let trimmed = skip_text_prefix(head);
    for (prefix, mime) in [
        ("<!DOCTYPE HTML", "text/html; charset=utf-8"),
        ("<HTML", "text/html; charset=utf-8"),
        ("<SVG", "image/svg+xml"),
        ("<?XML", "text/xml; charset=utf-8"),
    ] {
        if starts_with_ignore_case(trimmed, prefix) {
            return mime;
        }
    }

    if looks_textual(head) {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

/// Skip a UTF-8 BOM and leading whitespace before markup sniffing.
fn skip_text_prefix(head: &[u8]) -> &[u8] {
    let head = head.strip_prefix(b"\xef\xbb\xbf".as_slice()).unwrap_or(head);
    let start = head
        .iter()
        .position(|b| !b" \t\r\n".contains(b))
        .unwrap_or(head.len());
    &head[start..]
}

fn starts_with_ignore_case(data: &[u8], prefix: &str) -> bool {
    data.len() >= prefix.len()
        && data[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// A buffer is treated as text when it holds no control bytes outside the
/// usual whitespace set.
fn looks_textual(head: &[u8]) -> bool {
    !head
        .iter()
        .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c))
}
