//! Embedding maintenance commands: `fk embed pending` and `fk embed rebuild`.
//!
//! Both walk chunks via [`RvStore::find_pending_chunks`], embed them in
//! batches, and persist the vector in [`ViStore`] alongside embedding
//! metadata in [`RvStore`] for staleness detection.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::models::Chunk;
use crate::store::{RvStore, ViStore};

/// Find and embed chunks that are missing or have stale embeddings.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pool = Arc::new(db::connect(config).await?);
    let rv = RvStore::new(pool.clone());
    let vi = ViStore::new(pool);

    let limit_val = limit.map(|l| l as i64).unwrap_or(i64::MAX);
    let pending = rv.find_pending_chunks(limit_val).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all chunks up to date");
        return Ok(());
    }

    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_max);
    let (embedded, failed) = embed_and_store(config, &rv, &vi, &pending, batch_size).await?;

    println!("embed pending");
    println!("  total pending: {}", pending.len());
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);
    Ok(())
}

/// Delete all embeddings and regenerate for every chunk.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pool = Arc::new(db::connect(config).await?);
    let rv = RvStore::new(pool.clone());
    let vi = ViStore::new(pool.clone());

    sqlx::query("DELETE FROM chunk_vectors").execute(pool.as_ref()).await?;
    sqlx::query("DELETE FROM embeddings").execute(pool.as_ref()).await?;
    println!("embed rebuild — cleared existing embeddings");

    let all_chunks = rv.find_pending_chunks(i64::MAX).await?;
    if all_chunks.is_empty() {
        println!("  no chunks to embed");
        return Ok(());
    }

    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_max);
    let (embedded, failed) = embed_and_store(config, &rv, &vi, &all_chunks, batch_size).await?;

    println!("embed rebuild");
    println!("  total chunks: {}", all_chunks.len());
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);
    Ok(())
}

/// Embed chunks during sync (inline, called from the orchestrator). Non-fatal on failure.
pub async fn embed_chunks_inline(config: &Config, rv: &RvStore, vi: &ViStore, chunks: &[Chunk]) -> (u64, u64) {
    if !config.embedding.is_enabled() || chunks.is_empty() {
        return (0, 0);
    }
    match embed_and_store(config, rv, vi, chunks, config.embedding.batch_max).await {
        Ok((embedded, failed)) => (embedded, failed),
        Err(e) => {
            eprintln!("Warning: could not create embedding provider: {}", e);
            (0, chunks.len() as u64)
        }
    }
}

/// Embed `chunks` in batches of `batch_size`, writing the vector to VI and
/// the staleness hash to RV. Looks up each chunk's owning document to
/// resolve the project the vector should be scoped to, caching the lookup
/// per document within this call.
async fn embed_and_store(
    config: &Config,
    rv: &RvStore,
    vi: &ViStore,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<(u64, u64)> {
    let provider = embedding::create_provider(&config.embedding)?;
    let model_name = provider.model_name().to_string();
    let now = chrono::Utc::now().timestamp();

    let mut project_cache: HashMap<Uuid, String> = HashMap::new();
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        match embedding::embed_texts(provider.as_ref(), &config.embedding, &texts).await {
            Ok(vectors) => {
                for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                    let project = match project_cache.get(&chunk.document_id) {
                        Some(p) => p.clone(),
                        None => {
                            let doc = rv.get_document(chunk.document_id).await?;
                            project_cache.insert(chunk.document_id, doc.project.clone());
                            doc.project
                        }
                    };

                    vi.upsert_vector(chunk.id, chunk.document_id, &project, vector).await?;
                    rv.upsert_embedding_meta(chunk.id, &model_name, provider.dims(), now, &chunk.hash)
                        .await?;
                    embedded += 1;
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                failed += batch.len() as u64;
            }
        }
    }

    Ok((embedded, failed))
}
