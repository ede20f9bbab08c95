//! Query Engine: keyword, semantic, hybrid, and graph-augmented retrieval
//! (spec §4.9).
//!
//! Candidate fetch → per-chunk score → group-by-document → sort/truncate
//! stays the same shape as the teacher's `search_documents`; what changes is
//! the fusion algorithm itself, which switches from min-max normalized
//! weighted-alpha merge to literal reciprocal rank fusion.

use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::config::Config;
use crate::embedding;
use crate::models::{ProvenanceEntry, SearchResult};
use crate::store::{GrStore, RvStore, ViStore};

#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    pub doc_type: Option<String>,
    pub since: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub top_k: i64,
    pub mode: String,
    pub filters: QueryFilters,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            mode: "hybrid".to_string(),
            filters: QueryFilters::default(),
        }
    }
}

struct RankedChunk {
    chunk_id: String,
    document_id: String,
    rank: usize,
}

/// Runs the fused query and returns ranked, deduplicated results with
/// provenance (spec §4.9 steps 1-6).
pub async fn query(
    config: &Config,
    rv: &RvStore,
    vi: &ViStore,
    gr: &GrStore,
    project: &str,
    q: &str,
    options: &QueryOptions,
) -> Result<Vec<SearchResult>> {
    if q.trim().is_empty() {
        return Ok(Vec::new());
    }

    match options.mode.as_str() {
        "vector" | "keyword" | "hybrid" | "graph-augmented" => {}
        other => bail!("unknown query mode: {other}"),
    }

    let needs_vectors = matches!(options.mode.as_str(), "vector" | "hybrid" | "graph-augmented");
    if needs_vectors && !config.embedding.is_enabled() {
        bail!("mode '{}' requires embeddings, but the embedding provider is disabled", options.mode);
    }

    let candidate_k = (4 * options.top_k.max(1)) as usize;

    let keyword_ranked: Vec<RankedChunk> = if matches!(options.mode.as_str(), "keyword" | "hybrid" | "graph-augmented") {
        rv.keyword_search(project, q, candidate_k as i64)
            .await?
            .into_iter()
            .map(|(chunk_id, document_id, rank)| RankedChunk {
                chunk_id: chunk_id.to_string(),
                document_id: document_id.to_string(),
                rank: rank as usize + 1,
            })
            .collect()
    } else {
        Vec::new()
    };

    let vector_ranked: Vec<RankedChunk> = if needs_vectors {
        let provider = embedding::create_provider(&config.embedding)?;
        let q_vec = embedding::embed_query(provider.as_ref(), &config.embedding, q).await?;
        vi.search(project, &q_vec, candidate_k)
            .await?
            .into_iter()
            .enumerate()
            .map(|(i, hit)| RankedChunk {
                chunk_id: hit.chunk_id.to_string(),
                document_id: hit.document_id.to_string(),
                rank: i + 1,
            })
            .collect()
    } else {
        Vec::new()
    };

    if keyword_ranked.is_empty() && vector_ranked.is_empty() {
        return Ok(Vec::new());
    }

    let rrf_k = config.retrieval.rrf_k;

    // chunk_id -> (document_id, rrf_score, provenance, other_chunks_in_same_doc)
    let mut chunk_scores: HashMap<String, (String, f64, Vec<ProvenanceEntry>)> = HashMap::new();

    accumulate(&keyword_ranked, "keyword", rrf_k, &mut chunk_scores);
    accumulate(&vector_ranked, "vector", rrf_k, &mut chunk_scores);

    if options.mode == "graph-augmented" {
        let graph_ranked = graph_expand(gr, project, &chunk_scores).await?;
        accumulate_weighted(&graph_ranked, "graph", rrf_k, config.retrieval.graph_weight, &mut chunk_scores);
    }

    // Collapse to the best-scoring chunk per document, with a saturating
    // multi-chunk bonus (spec §4.9 step 4).
    struct DocAgg {
        best_chunk_id: String,
        best_score: f64,
        other_chunks: usize,
        provenance: Vec<ProvenanceEntry>,
    }
    let mut by_doc: HashMap<String, DocAgg> = HashMap::new();
    for (chunk_id, (doc_id, score, prov)) in &chunk_scores {
        let entry = by_doc.entry(doc_id.clone()).or_insert_with(|| DocAgg {
            best_chunk_id: chunk_id.clone(),
            best_score: *score,
            other_chunks: 0,
            provenance: prov.clone(),
        });
        if *score > entry.best_score {
            entry.other_chunks += 1;
            entry.best_chunk_id = chunk_id.clone();
            entry.best_score = *score;
            entry.provenance = prov.clone();
        } else if chunk_id != &entry.best_chunk_id {
            entry.other_chunks += 1;
        }
    }

    let mut results = Vec::new();
    for (doc_id, agg) in by_doc {
        let doc_uuid = match uuid::Uuid::parse_str(&doc_id) {
            Ok(u) => u,
            Err(_) => continue,
        };
        let doc = match rv.get_document(doc_uuid).await {
            Ok(d) => d,
            Err(_) => continue,
        };

        if let Some(ref dt) = options.filters.doc_type {
            if doc.doc_type.as_str() != dt {
                continue;
            }
        }
        if let Some(since) = options.filters.since {
            if doc.updated_at < since {
                continue;
            }
        }

        let bonus = (agg.other_chunks.min(3)) as f64 * 0.01;
        let score = agg.best_score + bonus;

        let snippet = match uuid::Uuid::parse_str(&agg.best_chunk_id) {
            Ok(cid) => rv
                .get_chunk(cid)
                .await
                .ok()
                .flatten()
                .map(|c| snippet_of(&c.text))
                .unwrap_or_default(),
            Err(_) => String::new(),
        };

        results.push(SearchResult {
            document_id: doc_id,
            title: doc.title,
            source: doc.source,
            source_id: doc.source_id,
            doc_type: doc.doc_type.as_str().to_string(),
            updated_at: format_ts_iso(doc.updated_at),
            score,
            snippet,
            source_url: doc.source_url,
            provenance: agg.provenance,
        });
    }

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.document_id.cmp(&b.document_id))
    });
    results.truncate(options.top_k.max(0) as usize);

    Ok(results)
}

fn accumulate(
    ranked: &[RankedChunk],
    path: &str,
    rrf_k: f64,
    out: &mut HashMap<String, (String, f64, Vec<ProvenanceEntry>)>,
) {
    accumulate_weighted(ranked, path, rrf_k, 1.0, out);
}

fn accumulate_weighted(
    ranked: &[RankedChunk],
    path: &str,
    rrf_k: f64,
    weight: f64,
    out: &mut HashMap<String, (String, f64, Vec<ProvenanceEntry>)>,
) {
    for rc in ranked {
        let contribution = weight / (rrf_k + rc.rank as f64);
        let entry = out
            .entry(rc.chunk_id.clone())
            .or_insert_with(|| (rc.document_id.clone(), 0.0, Vec::new()));
        entry.1 += contribution;
        entry.2.push(ProvenanceEntry {
            path: path.to_string(),
            rank: rc.rank,
            chunk_id: rc.chunk_id.clone(),
            offset_start: 0,
            offset_end: 0,
        });
    }
}

/// One-hop `RELATES_TO` expansion from documents already in the candidate
/// set (spec §4.9 step 5).
async fn graph_expand(
    gr: &GrStore,
    project: &str,
    chunk_scores: &HashMap<String, (String, f64, Vec<ProvenanceEntry>)>,
) -> Result<Vec<RankedChunk>> {
    let mut seed_docs: Vec<&str> = chunk_scores.values().map(|(d, _, _)| d.as_str()).collect();
    seed_docs.sort_unstable();
    seed_docs.dedup();

    let mut expanded = Vec::new();
    for (rank, doc_id) in seed_docs.iter().enumerate() {
        let node = match gr
            .find_node_by_ref(crate::models::EntityKind::Document, doc_id, project)
            .await?
        {
            Some(n) => n,
            None => continue,
        };
        for neighbor in gr.neighbors(node.id, "RELATES_TO").await? {
            if let Some(ref_id) = neighbor.node.ref_id {
                expanded.push(RankedChunk {
                    chunk_id: format!("graph:{ref_id}"),
                    document_id: ref_id,
                    rank: rank + 1,
                });
            }
        }
    }
    Ok(expanded)
}

fn snippet_of(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= 240 {
        trimmed.to_string()
    } else {
        let mut end = 240;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_contribution_uses_configured_k() {
        let ranked = vec![RankedChunk {
            chunk_id: "c1".to_string(),
            document_id: "d1".to_string(),
            rank: 1,
        }];
        let mut out = HashMap::new();
        accumulate(&ranked, "keyword", 60.0, &mut out);
        let (_, score, _) = &out["c1"];
        assert!((*score - 1.0 / 61.0).abs() < 1e-9);
    }

    #[test]
    fn scores_from_both_lists_sum() {
        let kw = vec![RankedChunk {
            chunk_id: "c1".to_string(),
            document_id: "d1".to_string(),
            rank: 1,
        }];
        let vec_ranked = vec![RankedChunk {
            chunk_id: "c1".to_string(),
            document_id: "d1".to_string(),
            rank: 2,
        }];
        let mut out = HashMap::new();
        accumulate(&kw, "keyword", 60.0, &mut out);
        accumulate(&vec_ranked, "vector", 60.0, &mut out);
        let (_, score, prov) = &out["c1"];
        assert!((*score - (1.0 / 61.0 + 1.0 / 62.0)).abs() < 1e-9);
        assert_eq!(prov.len(), 2);
    }

    #[test]
    fn snippet_of_truncates_long_text() {
        let text = "a".repeat(500);
        let snippet = snippet_of(&text);
        assert!(snippet.ends_with("..."));
        assert!(snippet.len() < 500);
    }

    #[test]
    fn snippet_of_keeps_short_text_intact() {
        assert_eq!(snippet_of("  hello world  "), "hello world");
    }
}
