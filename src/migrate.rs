//! Database schema migrations.
//!
//! Creates all required tables (documents, chunks, chunks_fts, embeddings,
//! chunk_vectors, sessions, actions, conversation_messages, code_snippets,
//! graph_nodes, graph_edges) and ensures idempotent execution. Run via
//! `fk init`. RV, VI, and GR (spec §4.6) are three logical stores backed by
//! the same physical SQLite database — kept in one migration file since
//! they share one pool and one set of foreign-key relationships.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn run_migrations_on(pool: &sqlx::SqlitePool) -> Result<()> {
    // RV: documents
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            project TEXT NOT NULL DEFAULT 'default',
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            source_url TEXT,
            title TEXT,
            author TEXT,
            doc_type TEXT NOT NULL DEFAULT 'file',
            mime TEXT NOT NULL DEFAULT 'text/plain',
            size_bytes INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            body TEXT NOT NULL,
            index_state TEXT NOT NULL DEFAULT 'rv_only',
            parent_document_id TEXT,
            UNIQUE(project, content_hash),
            FOREIGN KEY (parent_document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // RV: chunks
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            token_estimate INTEGER NOT NULL DEFAULT 0,
            offset_start INTEGER NOT NULL DEFAULT 0,
            offset_end INTEGER NOT NULL DEFAULT 0,
            hash TEXT NOT NULL,
            UNIQUE(document_id, ordinal),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // RV: keyword search over chunk text (spec §4.9 keyword path).
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // RV: embedding metadata (for staleness detection against chunk hash).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            hash TEXT NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // VI: chunk vectors (little-endian f32 BLOB — spec §4.6 ViStore).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            project TEXT NOT NULL DEFAULT 'default',
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Session & Action Log (spec §3, §4.8).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            agent_type TEXT NOT NULL,
            user_id TEXT NOT NULL,
            project TEXT NOT NULL DEFAULT 'default',
            start_time INTEGER NOT NULL,
            end_time INTEGER,
            status TEXT NOT NULL DEFAULT 'active',
            context_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS actions (
            action_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            action_type TEXT NOT NULL,
            description TEXT NOT NULL,
            details_json TEXT NOT NULL DEFAULT '{}',
            files_affected_json TEXT NOT NULL DEFAULT '[]',
            success INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES sessions(session_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_messages (
            message_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            message_type TEXT NOT NULL,
            content TEXT NOT NULL,
            context_json TEXT NOT NULL DEFAULT '{}',
            reasoning TEXT,
            tools_used_json TEXT NOT NULL DEFAULT '[]',
            files_referenced_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES sessions(session_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS code_snippets (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            language TEXT NOT NULL,
            code TEXT NOT NULL,
            extracted_at INTEGER NOT NULL,
            FOREIGN KEY (message_id) REFERENCES conversation_messages(message_id),
            FOREIGN KEY (session_id) REFERENCES sessions(session_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // GR: entity graph, simplified to tables in the same database (spec
    // §4.6, §9 Open Question — no graph-database dependency is justified
    // by the rest of the stack).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS graph_nodes (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            label TEXT NOT NULL,
            ref_id TEXT,
            project TEXT NOT NULL DEFAULT 'default',
            UNIQUE(kind, label, project)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS graph_edges (
            id TEXT PRIMARY KEY,
            src_id TEXT NOT NULL,
            dst_id TEXT NOT NULL,
            edge_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(src_id, dst_id, edge_type),
            FOREIGN KEY (src_id) REFERENCES graph_nodes(id),
            FOREIGN KEY (dst_id) REFERENCES graph_nodes(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_updated_at ON documents(updated_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_index_state ON documents(index_state)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_document_id ON chunk_vectors(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_project ON chunk_vectors(project)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_actions_session_id ON actions(session_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversation_messages_session_id ON conversation_messages(session_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_graph_edges_src ON graph_edges(src_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_graph_edges_dst ON graph_edges(dst_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations_on(&pool).await.unwrap();
        run_migrations_on(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        for expected in [
            "actions",
            "chunk_vectors",
            "chunks",
            "code_snippets",
            "conversation_messages",
            "documents",
            "embeddings",
            "graph_edges",
            "graph_nodes",
            "sessions",
        ] {
            assert!(
                tables.iter().any(|t| t == expected),
                "missing table: {expected}"
            );
        }
    }
}
