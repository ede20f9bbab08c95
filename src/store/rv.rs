//! RV: the relational store — documents, chunks, keyword index, embedding
//! metadata, and the session/action log tables (spec §4.6 RvStore).

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{FkError, StoreKind};
use crate::models::{
    Action, CodeSnippet, Chunk, ConversationMessage, Document, DocType, IndexState, MessageType,
    Session, SessionStatus,
};

#[derive(Clone)]
pub struct RvStore {
    pool: Arc<SqlitePool>,
}

impl RvStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Looks up a document by its dedup key, used by the orchestrator's
    /// duplicate-detection step (spec §4.4 step 2, §8 idempotence).
    pub async fn find_by_content_hash(
        &self,
        project: &str,
        content_hash: &str,
    ) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE project = ? AND content_hash = ?")
            .bind(project)
            .bind(content_hash)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(|r| row_to_document(&r)))
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Document> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool.as_ref())
            .await?
            .ok_or_else(|| FkError::NotFound(format!("document {id}")))?;
        Ok(row_to_document(&row))
    }

    pub async fn upsert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, project, source, source_id, source_url, title, author, doc_type, mime,
                 size_bytes, created_at, updated_at, content_hash, metadata_json, body,
                 index_state, parent_document_id)
            VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT(project, content_hash) DO UPDATE SET
                source = excluded.source,
                source_id = excluded.source_id,
                source_url = excluded.source_url,
                title = excluded.title,
                author = excluded.author,
                doc_type = excluded.doc_type,
                mime = excluded.mime,
                size_bytes = excluded.size_bytes,
                updated_at = excluded.updated_at,
                metadata_json = excluded.metadata_json,
                body = excluded.body,
                index_state = excluded.index_state,
                parent_document_id = excluded.parent_document_id
            "#,
        )
        .bind(doc.id.to_string())
        .bind(&doc.project)
        .bind(&doc.source)
        .bind(&doc.source_id)
        .bind(&doc.source_url)
        .bind(&doc.title)
        .bind(&doc.author)
        .bind(doc.doc_type.as_str())
        .bind(&doc.mime)
        .bind(doc.size_bytes)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .bind(&doc.content_hash)
        .bind(&doc.metadata_json)
        .bind(&doc.body)
        .bind(doc.index_state.as_str())
        .bind(doc.parent_document_id.map(|id| id.to_string()))
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| FkError::StoreWriteFailed {
            store: StoreKind::Rv,
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Transitions `index_state` (spec §4.4 atomicity contract). Called
    /// after each store in the RV→VI→GR write sequence completes or fails.
    pub async fn set_index_state(&self, id: Uuid, state: IndexState) -> Result<()> {
        sqlx::query("UPDATE documents SET index_state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(id.to_string())
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    /// Documents stuck short of `ok` for longer than the repair worker's
    /// max age, ordered oldest first (spec §4.4 repair worker, §7 fatal
    /// threshold).
    pub async fn find_stuck_documents(
        &self,
        older_than_unix: i64,
    ) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE index_state != 'ok' AND updated_at < ? ORDER BY updated_at ASC",
        )
        .bind(older_than_unix)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    /// Replaces all chunks for a document (delete + insert), keeping the
    /// `chunks_fts` keyword index in sync (spec §4.9 keyword path).
    pub async fn replace_chunks(&self, document_id: Uuid, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let doc_id_str = document_id.to_string();

        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(&doc_id_str)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&doc_id_str)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, document_id, ordinal, text, token_estimate, offset_start, offset_end, hash)
                VALUES (?,?,?,?,?,?,?,?)
                "#,
            )
            .bind(chunk.id.to_string())
            .bind(&doc_id_str)
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .bind(chunk.token_estimate)
            .bind(chunk.offset_start)
            .bind(chunk.offset_end)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?,?,?)")
                .bind(chunk.id.to_string())
                .bind(&doc_id_str)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await.map_err(|e| FkError::StoreWriteFailed {
            store: StoreKind::Rv,
            reason: e.to_string(),
        })?;
        Ok(())
    }

    pub async fn get_chunk(&self, chunk_id: Uuid) -> Result<Option<Chunk>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(chunk_id.to_string())
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.as_ref().map(row_to_chunk))
    }

    pub async fn get_chunks(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY ordinal ASC")
            .bind(document_id.to_string())
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    /// Chunks with no embedding row, or whose embedding hash is stale
    /// against the current chunk hash (spec §4.5).
    pub async fn find_pending_chunks(&self, limit: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.* FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_id = c.id
            WHERE e.chunk_id IS NULL OR e.hash != c.hash
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    pub async fn upsert_embedding_meta(
        &self,
        chunk_id: Uuid,
        model: &str,
        dims: usize,
        created_at: i64,
        hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, model, dims, created_at, hash)
            VALUES (?,?,?,?,?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model, dims = excluded.dims,
                created_at = excluded.created_at, hash = excluded.hash
            "#,
        )
        .bind(chunk_id.to_string())
        .bind(model)
        .bind(dims as i64)
        .bind(created_at)
        .bind(hash)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn upsert_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (session_id, agent_type, user_id, project, start_time, end_time, status, context_json)
            VALUES (?,?,?,?,?,?,?,?)
            ON CONFLICT(session_id) DO UPDATE SET
                end_time = excluded.end_time,
                status = excluded.status,
                context_json = excluded.context_json
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.agent_type)
        .bind(&session.user_id)
        .bind(&session.project)
        .bind(session.start_time)
        .bind(session.end_time)
        .bind(session.status.as_str())
        .bind(&session.context_json)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(|r| row_to_session(&r)))
    }

    pub async fn insert_action(&self, action: &Action) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO actions
                (action_id, session_id, action_type, description, details_json,
                 files_affected_json, success, created_at)
            VALUES (?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(&action.action_id)
        .bind(&action.session_id)
        .bind(&action.action_type)
        .bind(&action.description)
        .bind(&action.details_json)
        .bind(&action.files_affected_json)
        .bind(action.success)
        .bind(action.created_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn insert_message(&self, message: &ConversationMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO conversation_messages
                (message_id, session_id, message_type, content, context_json, reasoning,
                 tools_used_json, files_referenced_json, created_at)
            VALUES (?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(&message.message_id)
        .bind(&message.session_id)
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(&message.context_json)
        .bind(&message.reasoning)
        .bind(&message.tools_used_json)
        .bind(&message.files_referenced_json)
        .bind(message.created_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn insert_code_snippet(&self, snippet: &CodeSnippet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO code_snippets
                (id, message_id, session_id, language, code, extracted_at)
            VALUES (?,?,?,?,?,?)
            "#,
        )
        .bind(&snippet.id)
        .bind(&snippet.message_id)
        .bind(&snippet.session_id)
        .bind(&snippet.language)
        .bind(&snippet.code)
        .bind(snippet.extracted_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<ConversationMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM conversation_messages WHERE session_id = ? ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    pub async fn list_actions(&self, session_id: &str) -> Result<Vec<Action>> {
        let rows =
            sqlx::query("SELECT * FROM actions WHERE session_id = ? ORDER BY created_at ASC")
                .bind(session_id)
                .fetch_all(self.pool.as_ref())
                .await?;
        Ok(rows.iter().map(row_to_action).collect())
    }

    pub async fn keyword_search(
        &self,
        project: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<(Uuid, Uuid, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT f.chunk_id, f.document_id, rank
            FROM chunks_fts f
            JOIN documents d ON d.id = f.document_id
            WHERE chunks_fts MATCH ? AND d.project = ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(project)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let chunk_id: String = row.get("chunk_id");
            let document_id: String = row.get("document_id");
            out.push((
                Uuid::parse_str(&chunk_id)?,
                Uuid::parse_str(&document_id)?,
                i as i64,
            ));
        }
        Ok(out)
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
    let doc_type_str: String = row.get("doc_type");
    let index_state_str: String = row.get("index_state");
    let parent: Option<String> = row.get("parent_document_id");
    let id_str: String = row.get("id");
    Document {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        project: row.get("project"),
        source: row.get("source"),
        source_id: row.get("source_id"),
        source_url: row.get("source_url"),
        title: row.get("title"),
        author: row.get("author"),
        doc_type: DocType::parse(&doc_type_str).unwrap_or(DocType::File),
        mime: row.get("mime"),
        size_bytes: row.get("size_bytes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        content_hash: row.get("content_hash"),
        metadata_json: row.get("metadata_json"),
        body: row.get("body"),
        index_state: IndexState::parse(&index_state_str),
        parent_document_id: parent.and_then(|p| Uuid::parse_str(&p).ok()),
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let id_str: String = row.get("id");
    let doc_id_str: String = row.get("document_id");
    Chunk {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        document_id: Uuid::parse_str(&doc_id_str).unwrap_or_else(|_| Uuid::nil()),
        ordinal: row.get("ordinal"),
        text: row.get("text"),
        token_estimate: row.get("token_estimate"),
        offset_start: row.get("offset_start"),
        offset_end: row.get("offset_end"),
        hash: row.get("hash"),
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Session {
    let status: String = row.get("status");
    Session {
        session_id: row.get("session_id"),
        agent_type: row.get("agent_type"),
        user_id: row.get("user_id"),
        project: row.get("project"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        status: match status.as_str() {
            "ended" => SessionStatus::Ended,
            "crashed" => SessionStatus::Crashed,
            _ => SessionStatus::Active,
        },
        context_json: row.get("context_json"),
    }
}

fn row_to_action(row: &sqlx::sqlite::SqliteRow) -> Action {
    Action {
        action_id: row.get("action_id"),
        session_id: row.get("session_id"),
        action_type: row.get("action_type"),
        description: row.get("description"),
        details_json: row.get("details_json"),
        files_affected_json: row.get("files_affected_json"),
        success: row.get("success"),
        created_at: row.get("created_at"),
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> ConversationMessage {
    let msg_type: String = row.get("message_type");
    ConversationMessage {
        message_id: row.get("message_id"),
        session_id: row.get("session_id"),
        message_type: MessageType::parse(&msg_type),
        content: row.get("content"),
        context_json: row.get("context_json"),
        reasoning: row.get("reasoning"),
        tools_used_json: row.get("tools_used_json"),
        files_referenced_json: row.get("files_referenced_json"),
        created_at: row.get("created_at"),
    }
}
