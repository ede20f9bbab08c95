//! Document retrieval by ID.
//!
//! Fetches a full document and its chunks through [`RvStore`]. Used by both
//! the `fk get` CLI command and `POST /tools/get` HTTP endpoint.

use anyhow::{bail, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::store::RvStore;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub project: String,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub doc_type: String,
    pub created_at: String,
    pub updated_at: String,
    pub content_type: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub index_state: String,
    pub chunks: Vec<ChunkResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub ordinal: i64,
    pub text: String,
}

pub async fn get_document(config: &Config, id: &str) -> Result<DocumentResponse> {
    let pool = std::sync::Arc::new(db::connect(config).await?);
    let rv = RvStore::new(pool.clone());

    let doc_id = Uuid::parse_str(id).map_err(|_| anyhow::anyhow!("invalid document id: {id}"))?;
    let doc = match rv.get_document(doc_id).await {
        Ok(d) => d,
        Err(e) => {
            pool.close().await;
            bail!("document not found: {} ({e})", id);
        }
    };

    let chunks = rv.get_chunks(doc_id).await?;
    let metadata: serde_json::Value =
        serde_json::from_str(&doc.metadata_json).unwrap_or(serde_json::json!({}));

    pool.close().await;

    Ok(DocumentResponse {
        id: doc.id.to_string(),
        project: doc.project,
        source: doc.source,
        source_id: doc.source_id,
        source_url: doc.source_url,
        title: doc.title,
        author: doc.author,
        doc_type: doc.doc_type.as_str().to_string(),
        created_at: format_ts_iso(doc.created_at),
        updated_at: format_ts_iso(doc.updated_at),
        content_type: doc.mime,
        body: doc.body,
        metadata,
        index_state: doc.index_state.as_str().to_string(),
        chunks: chunks
            .into_iter()
            .map(|c| ChunkResponse {
                ordinal: c.ordinal,
                text: c.text,
            })
            .collect(),
    })
}

/// CLI entry point — calls get_document and prints to stdout.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let doc = match get_document(config, id).await {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("project:      {}", doc.project);
    println!(
        "title:        {}",
        doc.title.as_deref().unwrap_or("(untitled)")
    );
    println!("source:       {}", doc.source);
    println!("source_id:    {}", doc.source_id);
    if let Some(ref url) = doc.source_url {
        println!("source_url:   {}", url);
    }
    if let Some(ref auth) = doc.author {
        println!("author:       {}", auth);
    }
    println!("doc_type:     {}", doc.doc_type);
    println!("created_at:   {}", doc.created_at);
    println!("updated_at:   {}", doc.updated_at);
    println!("content_type: {}", doc.content_type);
    println!("index_state:  {}", doc.index_state);
    println!("metadata:     {}", doc.metadata);
    println!();

    println!("--- Body ---");
    println!("{}", doc.body);
    println!();

    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        println!("[chunk {}]", chunk.ordinal);
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
