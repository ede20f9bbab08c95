//! Database statistics and health overview.
//!
//! Provides a quick summary of what's indexed: document counts, chunk
//! counts, `index_state` breakdown (so a stuck `rv_only`/`graph_pending`
//! backlog is visible without querying the DB directly), per-project
//! embedding coverage, and session/action log volume. Used by `fk stats`
//! to give confidence that ingestion, repair, and the session log are
//! keeping up.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-project breakdown of document and embedding coverage.
struct ProjectStats {
    project: String,
    doc_count: i64,
    chunk_count: i64,
    embedded_count: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;

    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;

    let total_embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path).map(|m| m.len()).unwrap_or(0);

    println!("FindersKeepers — Database Stats");
    println!("================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", total_docs);
    println!("  Chunks:      {}", total_chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        total_embedded,
        total_chunks,
        if total_chunks > 0 {
            (total_embedded * 100) / total_chunks
        } else {
            0
        }
    );

    // index_state breakdown (spec §4.4 atomicity contract: rv_only and
    // graph_pending documents are still searchable but waiting on repair).
    let state_rows = sqlx::query(
        "SELECT index_state, COUNT(*) AS n FROM documents GROUP BY index_state ORDER BY n DESC",
    )
    .fetch_all(&pool)
    .await?;

    if !state_rows.is_empty() {
        println!();
        println!("  By index_state:");
        for row in &state_rows {
            let state: String = row.get("index_state");
            let n: i64 = row.get("n");
            println!("    {:<14} {}", state, n);
        }
    }

    // Per-project embedding coverage.
    let project_rows = sqlx::query(
        r#"
        SELECT
            d.project,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(DISTINCT c.id) AS chunk_count,
            COUNT(DISTINCT cv.chunk_id) AS embedded_count
        FROM documents d
        LEFT JOIN chunks c ON c.document_id = d.id
        LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.id
        GROUP BY d.project
        ORDER BY doc_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let project_stats: Vec<ProjectStats> = project_rows
        .iter()
        .map(|row| ProjectStats {
            project: row.get("project"),
            doc_count: row.get("doc_count"),
            chunk_count: row.get("chunk_count"),
            embedded_count: row.get("embedded_count"),
        })
        .collect();

    if !project_stats.is_empty() {
        println!();
        println!("  By project:");
        println!(
            "  {:<24} {:>6} {:>8} {:>10}",
            "PROJECT", "DOCS", "CHUNKS", "EMBEDDED"
        );
        println!("  {}", "-".repeat(52));
        for p in &project_stats {
            println!(
                "  {:<24} {:>6} {:>8} {:>10}",
                p.project, p.doc_count, p.chunk_count, p.embedded_count
            );
        }
    }

    // Session & Action Log volume (spec §3, §4.8).
    let total_sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
        .fetch_one(&pool)
        .await?;
    let active_sessions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE status = 'active'")
            .fetch_one(&pool)
            .await?;
    let total_actions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM actions")
        .fetch_one(&pool)
        .await?;

    println!();
    println!("  Sessions:    {} ({} active)", total_sessions, active_sessions);
    println!("  Actions:     {}", total_actions);
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_picks_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
