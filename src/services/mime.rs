//! Content-type sniffing over the leading bytes of an upload.
//!
//! Detection looks at no more than the first 512 bytes and returns a bare
//! media type (no parameters). Anything unrecognised is classified as
//! `text/plain` when it contains no binary control bytes and as
//! `application/octet-stream` otherwise.

use crate::error::{AppError, Result};

const SNIFF_LEN: usize = 512;

/// Byte-prefix signatures, first match wins
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"BM", "image/bmp"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"\x00\x00\x02\x00", "image/x-icon"),
    (b"ID3", "audio/mpeg"),
    (b"OggS\x00", "application/ogg"),
    (b"MThd\x00\x00\x00\x06", "audio/midi"),
    (b"fLaC", "audio/flac"),
    (b"\x1a\x45\xdf\xa3", "video/webm"),
    (b"\x1f\x8b\x08", "application/x-gzip"),
    (b"PK\x03\x04", "application/zip"),
    (b"Rar!\x1a\x07\x00", "application/x-rar-compressed"),
    (b"Rar!\x1a\x07\x01\x00", "application/x-rar-compressed"),
    (b"7z\xbc\xaf\x27\x1c", "application/x-7z-compressed"),
    (b"\x00asm", "application/wasm"),
    (b"wOFF", "font/woff"),
    (b"wOF2", "font/woff2"),
];

/// RIFF containers, identified by the form type at offset 8
const RIFF_FORMS: &[(&[u8], &str)] = &[
    (b"WEBPVP", "image/webp"),
    (b"WAVE", "audio/wave"),
    (b"AVI ", "video/avi"),
];

/// Tags that mark a document as HTML when followed by a space or `>`
const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

/// Detect the media type of `data` from its leading bytes
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let head = &data[..data.len().min(SNIFF_LEN)];

    if head.starts_with(b"\xfe\xff") || head.starts_with(b"\xff\xfe") || head.starts_with(b"\xef\xbb\xbf") {
        return "text/plain";
    }

    let trimmed = skip_whitespace(head);
    if HTML_TAGS.iter().any(|tag| matches_html_tag(trimmed, tag)) {
        return "text/html";
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml";
    }

    if let Some((_, mime)) = SIGNATURES.iter().find(|(sig, _)| head.starts_with(sig)) {
        return *mime;
    }

    if head.len() >= 12 && head.starts_with(b"RIFF") {
        let form = &head[8..];
        if let Some((_, mime)) = RIFF_FORMS.iter().find(|(sig, _)| form.starts_with(sig)) {
            return *mime;
        }
    }

    if is_mp4(head) {
        return "video/mp4";
    }

    if head.iter().any(|b| is_binary_byte(*b)) {
        "application/octet-stream"
    } else {
        "text/plain"
    }
}

/// Reduce a declared Content-Type to its lowercase essence (`type/subtype`)
pub fn normalize(declared: &str) -> Option<String> {
    let essence = declared.split(';').next()?.trim().to_ascii_lowercase();
    let (kind, subtype) = essence.split_once('/')?;
    if kind.is_empty() || subtype.is_empty() || subtype.contains('/') {
        return None;
    }
    Some(essence)
}

/// Check the declared type against the sniffed one, returning the canonical
/// media type to record for the content
pub fn validate(declared: Option<&str>, data: &[u8]) -> Result<String> {
    let declared = declared
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or(AppError::MimeMissing)?;

    let declared_essence = normalize(declared).ok_or_else(|| {
        AppError::BadRequest(format!("Invalid Content-Type header format: {}", declared))
    })?;

    let detected = detect_content_type(data);
    if declared_essence != detected {
        return Err(AppError::MimeMismatch {
            declared: declared_essence,
            detected: detected.to_string(),
        });
    }

    Ok(declared_essence)
}

fn skip_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

fn matches_html_tag(data: &[u8], tag: &[u8]) -> bool {
    if data.len() <= tag.len() {
        return false;
    }
    let prefix_matches = data
        .iter()
        .zip(tag)
        .all(|(d, t)| d.to_ascii_uppercase() == *t);
    prefix_matches && matches!(data[tag.len()], b' ' | b'>')
}

fn is_mp4(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if box_size < 12 || box_size % 4 != 0 || data.len() < box_size || &data[4..8] != b"ftyp" {
        return false;
    }
    // Major brand at 8..12, compatible brands from 16 onwards
    (8..box_size)
        .step_by(4)
        .filter(|&st| st != 12)
        .any(|st| data.get(st..st + 3) == Some(&b"mp4"[..]))
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f)
}
