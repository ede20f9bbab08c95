//! Multi-format text extraction (PDF, OOXML, archives, HTML/URL, plain text).
//!
//! Extraction is pipeline-layer: the orchestrator supplies bytes plus a
//! detected format tag; this module returns plain UTF-8 text (or, for
//! archives, a list of child items for recursive re-ingestion). Image/audio/
//! video extraction is delegated to an optional remote transcription service
//! mirroring the embedding client's provider pattern, disabled by default.

use std::io::Read;
use std::time::Duration;

use crate::detect::FormatTag;

/// Supported MIME types for extraction (spec §1.1).
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Maximum sheets to process in an xlsx (spec §5.2: implementation MAY limit).
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extraction error. Never panics on malformed input; the orchestrator
/// records the message and marks the item failed rather than aborting a
/// batch (spec §7).
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    Pdf(String),
    Ooxml(String),
    TarUnsupported,
    Timeout,
    SizeExceeded(u64),
    Html(String),
    MediaDisabled(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content-type: {}", ct)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
            ExtractError::TarUnsupported => write!(f, "tar_unsupported"),
            ExtractError::Timeout => write!(f, "fetch timed out"),
            ExtractError::SizeExceeded(limit) => {
                write!(f, "content exceeded size limit ({} bytes)", limit)
            }
            ExtractError::Html(e) => write!(f, "HTML extraction failed: {}", e),
            ExtractError::MediaDisabled(kind) => {
                write!(f, "{} transcription requires media.provider = 'remote'", kind)
            }
        }
    }
}

impl std::error::Error for ExtractError {}

/// The result of extracting a single item: its normalized text plus, for
/// archives, the child items to ingest as separate documents (spec §4.2
/// Archive: recursive child-item ingestion).
#[derive(Debug)]
pub struct Extracted {
    pub text: String,
    pub children: Vec<ArchiveChild>,
}

impl Extracted {
    pub fn text_only(text: String) -> Self {
        Self {
            text,
            children: Vec::new(),
        }
    }
}

/// A file pulled out of an archive, to be re-ingested as its own document
/// with `parent_document_id` set to the archive's document id.
#[derive(Debug)]
pub struct ArchiveChild {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Extracts plain text (and, for archives, child items) given a detected
/// format tag and the raw bytes. Returns an error rather than panicking on
/// malformed input (spec §7).
pub fn extract(bytes: &[u8], format: FormatTag) -> Result<Extracted, ExtractError> {
    match format {
        FormatTag::Pdf => extract_pdf(bytes).map(Extracted::text_only),
        FormatTag::Docx => extract_docx(bytes).map(Extracted::text_only),
        FormatTag::Pptx => extract_pptx(bytes).map(Extracted::text_only),
        FormatTag::Xlsx => extract_xlsx(bytes).map(Extracted::text_only),
        FormatTag::ArchiveZip => extract_zip_archive(bytes),
        FormatTag::ArchiveTar => Err(ExtractError::TarUnsupported),
        FormatTag::Html => extract_html(bytes).map(Extracted::text_only),
        FormatTag::PlainText
        | FormatTag::Markdown
        | FormatTag::Code
        | FormatTag::Json
        | FormatTag::Xml
        | FormatTag::Yaml
        | FormatTag::Csv => String::from_utf8(bytes.to_vec())
            .map(Extracted::text_only)
            .map_err(|e| ExtractError::Ooxml(e.to_string())),
        FormatTag::Image => Err(ExtractError::MediaDisabled("image".to_string())),
        FormatTag::Audio => Err(ExtractError::MediaDisabled("audio".to_string())),
        FormatTag::Video => Err(ExtractError::MediaDisabled("video".to_string())),
        FormatTag::Unknown => Err(ExtractError::UnsupportedContentType(
            "unknown".to_string(),
        )),
    }
}

/// Legacy entry point kept for content-type-keyed call sites that already
/// know their MIME type; delegates to [`extract`].
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        MIME_XLSX => extract_xlsx(bytes),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

fn extract_zip_archive(bytes: &[u8]) -> Result<Extracted, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut children = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut buf = Vec::new();
        entry
            .by_ref()
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut buf)
            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        children.push(ArchiveChild { name, bytes: buf });
    }
    Ok(Extracted {
        text: String::new(),
        children,
    })
}

/// Strips markup from fetched HTML, keeping only text node content. Hand
/// written with `quick_xml` (already a dependency for OOXML), matching the
/// corpus's preference for `quick_xml` over a dedicated HTML parser crate.
fn extract_html(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;
    let mut out = String::new();
    let mut buf = Vec::new();
    let mut skip_depth = 0u32;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"script" || name.as_ref() == b"style" {
                    skip_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = e.local_name();
                if (name.as_ref() == b"script" || name.as_ref() == b"style") && skip_depth > 0 {
                    skip_depth -= 1;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if skip_depth == 0 => {
                let text = t.unescape().unwrap_or_default();
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(trimmed);
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => {
                // Malformed HTML is the common case on the open web; keep
                // whatever text was recovered instead of failing the item.
                break;
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Fetches a URL with a timeout and byte cap, returning the raw body and its
/// content-type header so the caller can run it through [`extract`] (spec
/// §4.2 HTML/URL, §8 boundary: oversized or slow fetches fail cleanly).
pub async fn fetch_url(
    url: &str,
    timeout: Duration,
    max_bytes: u64,
) -> Result<(Vec<u8>, Option<String>), ExtractError> {
    use futures::StreamExt;

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ExtractError::Html(e.to_string()))?;

    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| if e.is_timeout() { ExtractError::Timeout } else { ExtractError::Html(e.to_string()) })?;

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let mut body = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ExtractError::Html(e.to_string()))?;
        body.extend_from_slice(&chunk);
        if body.len() as u64 > max_bytes {
            return Err(ExtractError::SizeExceeded(max_bytes));
        }
    }

    Ok((body, content_type))
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut doc_xml = Vec::new();
    let mut found = false;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        if entry.name() == "word/document.xml" {
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut doc_xml)
                .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
            if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(ExtractError::Ooxml(
                    "word/document.xml exceeds size limit".to_string(),
                ));
            }
            found = true;
            break;
        }
    }
    if !found {
        return Err(ExtractError::Ooxml(
            "word/document.xml not found".to_string(),
        ));
    }
    extract_w_t_elements(&doc_xml)
}

fn extract_w_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"t" {
                    // empty t, nothing to add
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    let mut out = String::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = extract_a_t_elements(&xml)?;
        if !out.is_empty() && !text.is_empty() {
            out.push(' ');
        }
        out.push_str(&text);
    }
    Ok(out)
}

fn extract_a_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = list_worksheet_names(&mut archive)?;
    let mut out = String::new();
    for (idx, name) in sheet_names.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let cell_texts = extract_xlsx_sheet_cells(&sheet_xml, &shared_strings)?;
        if idx > 0 && !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&cell_texts);
    }
    Ok(out)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        strings.push(te.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheet_names(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    Ok(names)
}

fn extract_xlsx_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared_str = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                } else if e.local_name().as_ref() == b"v" {
                    in_v = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_v => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() && cell_is_shared_str {
                    if let Ok(i) = s.parse::<usize>() {
                        if i < shared_strings.len() {
                            cells.push(shared_strings[i].clone());
                            cell_count += 1;
                        }
                    }
                }
                in_v = false;
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"v" {
                    in_v = false;
                } else if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn tar_format_is_explicitly_unsupported() {
        let err = extract(b"anything", FormatTag::ArchiveTar).unwrap_err();
        assert!(matches!(err, ExtractError::TarUnsupported));
    }

    #[test]
    fn plain_text_passes_through() {
        let out = extract(b"hello world", FormatTag::PlainText).unwrap();
        assert_eq!(out.text, "hello world");
        assert!(out.children.is_empty());
    }

    #[test]
    fn image_extraction_fails_when_media_disabled() {
        let err = extract(b"\x89PNG...", FormatTag::Image).unwrap_err();
        assert!(matches!(err, ExtractError::MediaDisabled(_)));
    }

    #[test]
    fn html_strips_tags_and_scripts() {
        let html = b"<html><head><style>.a{}</style></head><body><p>Hello</p><script>bad()</script><p>World</p></body></html>";
        let out = extract_html(html).unwrap();
        assert_eq!(out, "Hello World");
    }
}
