//! VI: the vector index (spec §4.6 ViStore). Stores one row per chunk
//! embedding, scoped by project, and answers brute-force cosine-similarity
//! kNN queries. No ANN index crate appears in the reference corpus for
//! this architecture's scale, so a full scan over `chunk_vectors` is the
//! documented simplification (see `DESIGN.md`).

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{FkError, StoreKind};

#[derive(Clone)]
pub struct ViStore {
    pool: Arc<SqlitePool>,
}

/// One candidate returned from a vector search, ranked by descending similarity.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub score: f32,
}

impl ViStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub async fn upsert_vector(
        &self,
        chunk_id: Uuid,
        document_id: Uuid,
        project: &str,
        vector: &[f32],
    ) -> Result<()> {
        let blob = vec_to_blob(vector);
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, project, dims, vector)
            VALUES (?,?,?,?,?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                project = excluded.project,
                dims = excluded.dims,
                vector = excluded.vector
            "#,
        )
        .bind(chunk_id.to_string())
        .bind(document_id.to_string())
        .bind(project)
        .bind(vector.len() as i64)
        .bind(blob)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| FkError::StoreWriteFailed {
            store: StoreKind::Vi,
            reason: e.to_string(),
        })?;
        Ok(())
    }

    pub async fn delete_for_document(&self, document_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id.to_string())
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    /// Brute-force cosine-similarity kNN within a project, descending by score.
    pub async fn search(
        &self,
        project: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let rows = sqlx::query("SELECT chunk_id, document_id, vector FROM chunk_vectors WHERE project = ?")
            .bind(project)
            .fetch_all(self.pool.as_ref())
            .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk_id: String = row.get("chunk_id");
            let document_id: String = row.get("document_id");
            let blob: Vec<u8> = row.get("vector");
            let vector = blob_to_vec(&blob);
            let score = cosine_similarity(query_vector, &vector);
            hits.push(VectorHit {
                chunk_id: Uuid::parse_str(&chunk_id)?,
                document_id: Uuid::parse_str(&document_id)?,
                score,
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn count_for_project(&self, project: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM chunk_vectors WHERE project = ?")
            .bind(project)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(row.get("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations_on(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn upsert_and_search_ranks_by_similarity() {
        let pool = Arc::new(test_pool().await);
        let store = ViStore::new(pool);
        let doc_id = Uuid::new_v4();

        let close = Uuid::new_v4();
        let far = Uuid::new_v4();
        store
            .upsert_vector(close, doc_id, "default", &[1.0, 0.0, 0.0])
            .await
            .unwrap();
        store
            .upsert_vector(far, doc_id, "default", &[0.0, 1.0, 0.0])
            .await
            .unwrap();

        let hits = store.search("default", &[1.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(hits[0].chunk_id, close);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn delete_for_document_removes_all_its_vectors() {
        let pool = Arc::new(test_pool().await);
        let store = ViStore::new(pool);
        let doc_id = Uuid::new_v4();
        store
            .upsert_vector(Uuid::new_v4(), doc_id, "default", &[1.0, 0.0])
            .await
            .unwrap();

        store.delete_for_document(doc_id).await.unwrap();
        assert_eq!(store.count_for_project("default").await.unwrap(), 0);
    }
}
