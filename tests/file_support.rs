//! Integration tests for multi-format file support: PDF and Office (docx)
//! documents flow through the same detect → extract → chunk → index
//! pipeline as plain text, and a corrupt file doesn't abort ingestion of
//! the others.

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn fk_binary() -> std::path::PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("fk");
    path
}

/// Minimal valid PDF containing the given phrase, with correct xref byte offsets
/// so pdf-extract can parse it.
fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET\n", phrase);
    out.extend_from_slice(format!("4 0 obj << /Length {} >> stream\n{}endstream endobj\n", stream.len(), stream).as_bytes());
    let o5 = out.len();
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o3).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o4).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o5).as_bytes());
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Minimal docx (ZIP) containing word/document.xml with <w:t>{phrase}</w:t>.
fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn setup_file_support_env() -> (TempDir, std::path::PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/findkeep.sqlite"

[chunking]
max_tokens = 700

[retrieval]

[server]
bind = "127.0.0.1:7331"
"#,
        root.display()
    );

    fs::write(root.join("config").join("findkeep.toml"), config_content).unwrap();

    fs::write(
        files_dir.join("readme.md"),
        "# Readme\n\nPlain text file for tests.\n",
    )
    .unwrap();

    (tmp, root.join("config").join("findkeep.toml"))
}

fn run_fk(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = fk_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run fk: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn ingest_file(config_path: &Path, path: &Path) -> (String, String, bool) {
    run_fk(config_path, &["ingest-file", path.to_str().unwrap()])
}

#[test]
fn file_support_pdf_ingest_and_query() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    let pdf_path = files_dir.join("spec.pdf");
    fs::write(&pdf_path, minimal_pdf_with_phrase("findkeeper phrase")).unwrap();

    run_fk(&config_path, &["init"]);
    let (stdout, stderr, success) = ingest_file(&config_path, &pdf_path);
    assert!(success, "ingest-file failed: stdout={}, stderr={}", stdout, stderr);

    let (query_out, _, success) = run_fk(
        &config_path,
        &["query", "findkeeper phrase", "--mode", "keyword"],
    );
    assert!(success, "query failed");
    assert!(
        query_out.contains("findkeeper phrase") || query_out.contains("spec.pdf") || query_out.contains("spec"),
        "query should surface the pdf document, got: {}",
        query_out
    );
}

#[test]
fn file_support_idempotent_reingest() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    let pdf_path = files_dir.join("spec.pdf");
    fs::write(&pdf_path, minimal_pdf_with_phrase("repeat phrase")).unwrap();

    run_fk(&config_path, &["init"]);
    let (_, stderr1, success1) = ingest_file(&config_path, &pdf_path);
    let (_, stderr2, success2) = ingest_file(&config_path, &pdf_path);
    assert!(success1 && success2, "stderr1={}, stderr2={}", stderr1, stderr2);

    let (stdout, _, success) = run_fk(&config_path, &["stats"]);
    assert!(success);
    assert!(
        stdout.contains("Documents:   2"),
        "readme.md + spec.pdf, no duplicate from reingest, got: {}",
        stdout
    );
}

#[test]
fn file_support_corrupt_file_does_not_abort_others() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    let bad_path = files_dir.join("bad.pdf");
    fs::write(&bad_path, b"not a valid pdf").unwrap();
    let good_path = files_dir.join("good.md");
    fs::write(&good_path, "# Good\n\nThis is good.\n").unwrap();

    run_fk(&config_path, &["init"]);
    let (_, _, bad_success) = ingest_file(&config_path, &bad_path);
    assert!(!bad_success, "corrupt pdf should fail its own ingest-file call");

    let (stdout, stderr, success) = ingest_file(&config_path, &good_path);
    assert!(success, "good.md ingest should still succeed: stdout={}, stderr={}", stdout, stderr);

    let (query_out, _, success) = run_fk(&config_path, &["query", "This is good", "--mode", "keyword"]);
    assert!(success);
    assert!(
        query_out.contains("good.md") || query_out.contains("Good"),
        "good.md should still be searchable despite bad.pdf: {}",
        query_out
    );
}

#[test]
fn file_support_content_type_stored() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    let pdf_path = files_dir.join("spec.pdf");
    fs::write(&pdf_path, minimal_pdf_with_phrase("content type phrase")).unwrap();

    run_fk(&config_path, &["init"]);
    ingest_file(&config_path, &pdf_path);
    let (query_out, _, _) = run_fk(
        &config_path,
        &["query", "content type phrase", "--mode", "keyword"],
    );
    let id = query_out
        .lines()
        .find_map(|l| l.split('(').nth(1))
        .and_then(|rest| rest.split(')').next())
        .map(|s| s.trim().to_string());

    if let Some(doc_id) = id {
        let (get_out, _, _) = run_fk(&config_path, &["get", &doc_id]);
        assert!(
            get_out.contains("application/pdf"),
            "stored document should have content_type application/pdf, got: {}",
            get_out
        );
    }
}

#[test]
fn file_support_office_format_docx() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    let docx_path = files_dir.join("spec.docx");
    fs::write(&docx_path, minimal_docx_with_text("office test phrase")).unwrap();

    run_fk(&config_path, &["init"]);
    let (stdout, stderr, success) = ingest_file(&config_path, &docx_path);
    assert!(success, "ingest-file failed: stdout={}, stderr={}", stdout, stderr);

    let (query_out, _, success) = run_fk(
        &config_path,
        &["query", "office test phrase", "--mode", "keyword"],
    );
    assert!(success);
    assert!(
        query_out.contains("office test phrase") || query_out.contains("spec.docx") || query_out.contains("spec"),
        "query should return phrase or filename: {}",
        query_out
    );
}
