use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn fk_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("fk");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    ).unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    ).unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    ).unwrap();

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

    let config_path = config_dir.join("findkeep.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_fk(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = fk_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run fk binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn ingest_all(config_path: &Path, tmp: &TempDir) {
    let files_dir = tmp.path().join("files");
    for name in ["alpha.md", "beta.md", "gamma.txt"] {
        let path = files_dir.join(name);
        let (stdout, stderr, success) =
            run_fk(config_path, &["ingest-file", path.to_str().unwrap()]);
        assert!(success, "ingest-file {name} failed: stdout={stdout}, stderr={stderr}");
    }
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_fk(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_fk(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_fk(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_file() {
    let (tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    let path = tmp.path().join("files").join("alpha.md");
    let (stdout, stderr, success) =
        run_fk(&config_path, &["ingest-file", path.to_str().unwrap()]);
    assert!(success, "ingest-file failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("processed"), "got: {}", stdout);
}

#[test]
fn test_ingest_file_dedupes_identical_content() {
    let (tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    let path = tmp.path().join("files").join("alpha.md");
    run_fk(&config_path, &["ingest-file", path.to_str().unwrap()]);
    run_fk(&config_path, &["ingest-file", path.to_str().unwrap()]);

    let (stdout, _, success) = run_fk(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:   1"), "expected a single document, got: {}", stdout);
}

#[test]
fn test_ingest_file_force_reingests() {
    let (tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    let path = tmp.path().join("files").join("alpha.md");
    run_fk(&config_path, &["ingest-file", path.to_str().unwrap()]);
    let (_, stderr, success) =
        run_fk(&config_path, &["ingest-file", "--force", path.to_str().unwrap()]);
    assert!(success, "forced reingest failed: {}", stderr);
}

#[test]
fn test_query_keyword() {
    let (tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    ingest_all(&config_path, &tmp);

    let (stdout, _, success) = run_fk(
        &config_path,
        &["query", "Rust programming", "--mode", "keyword"],
    );
    assert!(success, "query failed");
    assert!(
        stdout.contains("alpha.md") || stdout.contains("Alpha"),
        "Expected alpha.md in results, got: {}",
        stdout
    );
}

#[test]
fn test_query_deterministic() {
    let (tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    ingest_all(&config_path, &tmp);

    let (stdout1, _, _) = run_fk(&config_path, &["query", "document", "--mode", "keyword"]);
    let (stdout2, _, _) = run_fk(&config_path, &["query", "document", "--mode", "keyword"]);
    assert_eq!(
        stdout1, stdout2,
        "Query results should be deterministic across runs"
    );
}

#[test]
fn test_query_empty_string() {
    let (_tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    let (stdout, _, success) = run_fk(&config_path, &["query", "", "--mode", "keyword"]);
    assert!(success, "Empty query should not error");
    assert!(stdout.contains("No results"));
}

#[test]
fn test_query_no_results() {
    let (tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    ingest_all(&config_path, &tmp);

    let (stdout, _, success) = run_fk(
        &config_path,
        &["query", "xyznonexistent", "--mode", "keyword"],
    );
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn test_get_document() {
    let (tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    ingest_all(&config_path, &tmp);

    let (query_out, _, _) = run_fk(&config_path, &["query", "Rust", "--mode", "keyword"]);
    let id = query_out
        .lines()
        .find_map(|l| l.split('(').nth(1))
        .and_then(|rest| rest.split(')').next())
        .map(|s| s.trim().to_string());

    if let Some(doc_id) = id {
        let (stdout, _, success) = run_fk(&config_path, &["get", &doc_id]);
        assert!(success, "get should succeed");
        assert!(stdout.contains("Document"));
        assert!(stdout.contains(&doc_id));
    }
}

#[test]
fn test_get_missing_document() {
    let (_tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);

    let (_, stderr, success) = run_fk(&config_path, &["get", "nonexistent-id"]);
    assert!(!success, "get with missing ID should fail");
    assert!(
        stderr.contains("not found") || stderr.contains("invalid document id"),
        "Should report an error, got: {}",
        stderr
    );
}

#[test]
fn test_query_mode_vector_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    let (_, stderr, success) = run_fk(&config_path, &["query", "test", "--mode", "vector"]);
    assert!(!success, "Vector mode should fail when embeddings disabled");
    assert!(
        stderr.contains("embeddings"),
        "Should mention embeddings, got: {}",
        stderr
    );
}

#[test]
fn test_query_mode_hybrid_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    let (_, stderr, success) = run_fk(&config_path, &["query", "test", "--mode", "hybrid"]);
    assert!(!success, "Hybrid mode should fail when embeddings disabled");
    assert!(
        stderr.contains("embeddings"),
        "Should mention embeddings, got: {}",
        stderr
    );
}

#[test]
fn test_embed_pending_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    let (_, stderr, success) = run_fk(&config_path, &["embed", "pending"]);
    assert!(!success, "embed pending should fail when provider disabled");
    assert!(stderr.contains("disabled"), "got: {}", stderr);
}

#[test]
fn test_embed_rebuild_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    let (_, stderr, success) = run_fk(&config_path, &["embed", "rebuild"]);
    assert!(!success, "embed rebuild should fail when provider disabled");
    assert!(stderr.contains("disabled"), "got: {}", stderr);
}

#[test]
fn test_stats_reports_counts() {
    let (tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    ingest_all(&config_path, &tmp);

    let (stdout, _, success) = run_fk(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:"));
    assert!(stdout.contains("Chunks:"));
}

#[test]
fn test_export_writes_json() {
    let (tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    ingest_all(&config_path, &tmp);

    let out_path = tmp.path().join("export.json");
    let (_, stderr, success) = run_fk(
        &config_path,
        &["export", "--output", out_path.to_str().unwrap()],
    );
    assert!(success, "export failed: {}", stderr);
    let contents = fs::read_to_string(&out_path).unwrap();
    assert!(contents.contains("\"documents\""));
    assert!(contents.contains("\"chunks\""));
}

#[test]
fn test_query_unknown_mode_errors() {
    let (_tmp, config_path) = setup_test_env();

    run_fk(&config_path, &["init"]);
    let (_, stderr, success) = run_fk(&config_path, &["query", "test", "--mode", "invalid"]);
    assert!(!success, "Unknown mode should fail");
    assert!(
        stderr.contains("unknown query mode"),
        "Should mention unknown mode, got: {}",
        stderr
    );
}
