//! GR: the entity graph (spec §4.6 GrStore, §4.9 graph-augmented mode).
//! Nodes and edges are ordinary SQLite tables (`graph_nodes`/`graph_edges`)
//! behind a traversal-shaped API — see `store/mod.rs` for why no graph
//! database is used.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{FkError, StoreKind};
use crate::models::EntityKind;

#[derive(Clone)]
pub struct GrStore {
    pool: Arc<SqlitePool>,
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: i64,
    pub kind: String,
    pub label: String,
    pub ref_id: Option<String>,
    pub project: String,
}

#[derive(Debug, Clone)]
pub struct GraphNeighbor {
    pub node: GraphNode,
    pub edge_type: String,
}

impl GrStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Gets an existing node by (kind, label, project) or inserts one.
    pub async fn get_or_create_node(
        &self,
        kind: EntityKind,
        label: &str,
        ref_id: Option<&str>,
        project: &str,
    ) -> Result<i64> {
        if let Some(row) = sqlx::query(
            "SELECT id FROM graph_nodes WHERE kind = ? AND label = ? AND project = ?",
        )
        .bind(kind.as_str())
        .bind(label)
        .bind(project)
        .fetch_optional(self.pool.as_ref())
        .await?
        {
            return Ok(row.get("id"));
        }

        let result = sqlx::query(
            "INSERT INTO graph_nodes (kind, label, ref_id, project) VALUES (?,?,?,?)",
        )
        .bind(kind.as_str())
        .bind(label)
        .bind(ref_id)
        .bind(project)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| FkError::StoreWriteFailed {
            store: StoreKind::Gr,
            reason: e.to_string(),
        })?;
        Ok(result.last_insert_rowid())
    }

    pub async fn upsert_edge(&self, src_id: i64, dst_id: i64, edge_type: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO graph_edges (src_id, dst_id, edge_type) VALUES (?,?,?)",
        )
        .bind(src_id)
        .bind(dst_id)
        .bind(edge_type)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// One-hop neighbors in either direction, used by graph-augmented
    /// search to expand a document's candidate set (spec §4.9).
    pub async fn neighbors(&self, node_id: i64, edge_type: &str) -> Result<Vec<GraphNeighbor>> {
        let rows = sqlx::query(
            r#"
            SELECT n.*, e.edge_type as edge_type FROM graph_edges e
            JOIN graph_nodes n ON n.id = e.dst_id
            WHERE e.src_id = ? AND e.edge_type = ?
            UNION
            SELECT n.*, e.edge_type as edge_type FROM graph_edges e
            JOIN graph_nodes n ON n.id = e.src_id
            WHERE e.dst_id = ? AND e.edge_type = ?
            "#,
        )
        .bind(node_id)
        .bind(edge_type)
        .bind(node_id)
        .bind(edge_type)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows
            .iter()
            .map(|row| GraphNeighbor {
                node: GraphNode {
                    id: row.get("id"),
                    kind: row.get("kind"),
                    label: row.get("label"),
                    ref_id: row.get("ref_id"),
                    project: row.get("project"),
                },
                edge_type: row.get("edge_type"),
            })
            .collect())
    }

    pub async fn find_node_by_ref(
        &self,
        kind: EntityKind,
        ref_id: &str,
        project: &str,
    ) -> Result<Option<GraphNode>> {
        let row = sqlx::query(
            "SELECT * FROM graph_nodes WHERE kind = ? AND ref_id = ? AND project = ?",
        )
        .bind(kind.as_str())
        .bind(ref_id)
        .bind(project)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row.map(|r| GraphNode {
            id: r.get("id"),
            kind: r.get("kind"),
            label: r.get("label"),
            ref_id: r.get("ref_id"),
            project: r.get("project"),
        }))
    }

    /// Creates `RELATES_TO` edges between Document nodes that share at
    /// least two Tag neighbors (spec §4.4 step 9 background graph pass).
    pub async fn compute_tag_relations(&self, project: &str) -> Result<usize> {
        let doc_rows = sqlx::query(
            "SELECT id FROM graph_nodes WHERE kind = ? AND project = ?",
        )
        .bind(EntityKind::Document.as_str())
        .bind(project)
        .fetch_all(self.pool.as_ref())
        .await?;

        let mut tags_by_doc: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in &doc_rows {
            let doc_id: i64 = row.get("id");
            let tags = self.neighbors(doc_id, "TAGGED_WITH").await?;
            tags_by_doc.insert(doc_id, tags.into_iter().map(|n| n.node.id).collect());
        }

        let doc_ids: Vec<i64> = tags_by_doc.keys().copied().collect();
        let mut created = 0;
        for i in 0..doc_ids.len() {
            for j in (i + 1)..doc_ids.len() {
                let a = &tags_by_doc[&doc_ids[i]];
                let b = &tags_by_doc[&doc_ids[j]];
                let shared = a.iter().filter(|t| b.contains(t)).count();
                if shared >= 2 {
                    self.upsert_edge(doc_ids[i], doc_ids[j], "RELATES_TO").await?;
                    created += 1;
                }
            }
        }
        Ok(created)
    }

    /// Deletes nodes with no remaining edges, run periodically alongside
    /// the repair worker.
    pub async fn gc_orphaned_nodes(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM graph_nodes
            WHERE id NOT IN (SELECT src_id FROM graph_edges)
              AND id NOT IN (SELECT dst_id FROM graph_edges)
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected())
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
    async fn get_or_create_node_is_idempotent() {
        let pool = Arc::new(test_pool().await);
        let store = GrStore::new(pool);
        let a = store
            .get_or_create_node(EntityKind::Tag, "rust", None, "default")
            .await
            .unwrap();
        let b = store
            .get_or_create_node(EntityKind::Tag, "rust", None, "default")
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn shared_tags_create_relates_to_edge() {
        let pool = Arc::new(test_pool().await);
        let store = GrStore::new(pool);

        let doc_a = store
            .get_or_create_node(EntityKind::Document, "doc-a", Some("doc-a"), "default")
            .await
            .unwrap();
        let doc_b = store
            .get_or_create_node(EntityKind::Document, "doc-b", Some("doc-b"), "default")
            .await
            .unwrap();
        let tag1 = store
            .get_or_create_node(EntityKind::Tag, "rust", None, "default")
            .await
            .unwrap();
        let tag2 = store
            .get_or_create_node(EntityKind::Tag, "sqlite", None, "default")
            .await
            .unwrap();

        store.upsert_edge(doc_a, tag1, "TAGGED_WITH").await.unwrap();
        store.upsert_edge(doc_a, tag2, "TAGGED_WITH").await.unwrap();
        store.upsert_edge(doc_b, tag1, "TAGGED_WITH").await.unwrap();
        store.upsert_edge(doc_b, tag2, "TAGGED_WITH").await.unwrap();

        let created = store.compute_tag_relations("default").await.unwrap();
        assert_eq!(created, 1);

        let neighbors = store.neighbors(doc_a, "RELATES_TO").await.unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].node.id, doc_b);
    }

    #[tokio::test]
    async fn gc_removes_orphans_only() {
        let pool = Arc::new(test_pool().await);
        let store = GrStore::new(pool);
        let connected_a = store
            .get_or_create_node(EntityKind::Document, "a", None, "default")
            .await
            .unwrap();
        let connected_b = store
            .get_or_create_node(EntityKind::Document, "b", None, "default")
            .await
            .unwrap();
        store
            .get_or_create_node(EntityKind::Document, "orphan", None, "default")
            .await
            .unwrap();
        store.upsert_edge(connected_a, connected_b, "RELATES_TO").await.unwrap();

        let removed = store.gc_orphaned_nodes().await.unwrap();
        assert_eq!(removed, 1);
    }
}
