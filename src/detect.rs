//! Format detection: classifies raw bytes plus caller-supplied hints into
//! a closed set of format tags the extractor dispatches on.
//!
//! Grounded in the MIME-constant tables already used by `extract.rs` and a
//! `BINARY_EXTENSIONS` map of common office/archive extensions, generalized
//! into a single magic-byte-first, extension-fallback detector (no
//! MIME-sniffing crate appears anywhere in the reference corpus, so this
//! stays hand-written).

use crate::extract::{MIME_DOCX, MIME_PDF, MIME_PPTX, MIME_XLSX};

/// Closed set of format tags the extractor dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    PlainText,
    Markdown,
    Code,
    Json,
    Xml,
    Yaml,
    Csv,
    Html,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    ArchiveZip,
    ArchiveTar,
    Image,
    Audio,
    Video,
    Unknown,
}

impl FormatTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::PlainText => "text/plain",
            FormatTag::Markdown => "text/markdown",
            FormatTag::Code => "text/x-code",
            FormatTag::Json => "application/json",
            FormatTag::Xml => "application/xml",
            FormatTag::Yaml => "text/yaml",
            FormatTag::Csv => "text/csv",
            FormatTag::Html => "text/html",
            FormatTag::Pdf => MIME_PDF,
            FormatTag::Docx => MIME_DOCX,
            FormatTag::Pptx => MIME_PPTX,
            FormatTag::Xlsx => MIME_XLSX,
            FormatTag::ArchiveZip => "archive:zip",
            FormatTag::ArchiveTar => "archive:tar",
            FormatTag::Image => "image",
            FormatTag::Audio => "audio",
            FormatTag::Video => "video",
            FormatTag::Unknown => "application/octet-stream",
        }
    }
}

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "jsx", "tsx", "go", "java", "c", "h", "cpp", "hpp", "cs", "rb", "php",
    "sh", "bash", "sql", "toml", "ini", "cfg",
];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tiff"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];

/// Detects a format tag from magic bytes first, then extension, then a
/// UTF-8/printable-character heuristic (spec §4.1).
pub fn detect_format(bytes: &[u8], extension: Option<&str>, url_hint: bool) -> FormatTag {
    if let Some(tag) = detect_magic(bytes) {
        return tag;
    }

    let ext = extension.map(|e| e.trim_start_matches('.').to_lowercase());
    if let Some(ext) = ext.as_deref() {
        if let Some(tag) = detect_by_extension(ext) {
            return tag;
        }
    }

    if url_hint && looks_like_html(bytes) {
        return FormatTag::Html;
    }

    if is_probably_text(bytes) {
        FormatTag::PlainText
    } else {
        FormatTag::Unknown
    }
}

fn detect_magic(bytes: &[u8]) -> Option<FormatTag> {
    if bytes.starts_with(b"%PDF-") {
        return Some(FormatTag::Pdf);
    }
    if bytes.starts_with(&[0x50, 0x4B, 0x03, 0x04]) || bytes.starts_with(&[0x50, 0x4B, 0x05, 0x06])
    {
        // A generic zip signature; OOXML formats are zips with a specific
        // internal layout, distinguished later by the extractor itself.
        return Some(FormatTag::ArchiveZip);
    }
    if bytes.len() >= 262 && &bytes[257..262] == b"ustar" {
        return Some(FormatTag::ArchiveTar);
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some(FormatTag::Image);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(FormatTag::Image);
    }
    None
}

fn detect_by_extension(ext: &str) -> Option<FormatTag> {
    match ext {
        "md" | "markdown" => Some(FormatTag::Markdown),
        "json" => Some(FormatTag::Json),
        "xml" => Some(FormatTag::Xml),
        "yaml" | "yml" => Some(FormatTag::Yaml),
        "csv" | "tsv" => Some(FormatTag::Csv),
        "html" | "htm" => Some(FormatTag::Html),
        "pdf" => Some(FormatTag::Pdf),
        "docx" => Some(FormatTag::Docx),
        "pptx" => Some(FormatTag::Pptx),
        "xlsx" => Some(FormatTag::Xlsx),
        "zip" => Some(FormatTag::ArchiveZip),
        "tar" | "tar.gz" | "tgz" => Some(FormatTag::ArchiveTar),
        "txt" => Some(FormatTag::PlainText),
        _ if CODE_EXTENSIONS.contains(&ext) => Some(FormatTag::Code),
        _ if IMAGE_EXTENSIONS.contains(&ext) => Some(FormatTag::Image),
        _ if AUDIO_EXTENSIONS.contains(&ext) => Some(FormatTag::Audio),
        _ if VIDEO_EXTENSIONS.contains(&ext) => Some(FormatTag::Video),
        _ => None,
    }
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let lower = String::from_utf8_lossy(head).to_lowercase();
    lower.contains("<html") || lower.contains("<!doctype html")
}

fn is_probably_text(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return true;
    }
    let sample = &bytes[..bytes.len().min(8192)];
    match std::str::from_utf8(sample) {
        Ok(s) => {
            let printable = s
                .chars()
                .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
                .count();
            printable as f64 / s.chars().count().max(1) as f64 > 0.95
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_pdf_by_magic() {
        assert_eq!(detect_format(b"%PDF-1.4 ...", None, false), FormatTag::Pdf);
    }

    #[test]
    fn detects_by_extension_when_magic_is_silent() {
        assert_eq!(
            detect_format(b"# hello", Some("md"), false),
            FormatTag::Markdown
        );
        assert_eq!(
            detect_format(b"fn main() {}", Some("rs"), false),
            FormatTag::Code
        );
    }

    #[test]
    fn falls_back_to_plain_text_for_printable_unknown_extension() {
        assert_eq!(
            detect_format(b"just some prose", Some("weird"), false),
            FormatTag::PlainText
        );
    }

    #[test]
    fn binary_garbage_is_unknown() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        assert_eq!(detect_format(&bytes, None, false), FormatTag::Unknown);
    }

    #[test]
    fn tar_magic_detected() {
        let mut bytes = vec![0u8; 512];
        bytes[257..262].copy_from_slice(b"ustar");
        assert_eq!(detect_format(&bytes, None, false), FormatTag::ArchiveTar);
    }
}
