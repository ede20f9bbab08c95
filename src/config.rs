//! Configuration parsing and validation.
//!
//! FindersKeepers is configured via a TOML file (default: `config/fk.toml`).
//! The config defines database paths, chunking parameters, embedding and
//! media-provider settings, retrieval tuning, ingestion worker/timeout
//! settings, URL-fetch limits, repair-worker tuning, and server bind address.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub media: MediaConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub url: UrlConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
}

fn default_target_tokens() -> usize {
    800
}
fn default_max_tokens() -> usize {
    1200
}
fn default_min_tokens() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_top_k")]
    pub default_top_k: i64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_graph_weight")]
    pub graph_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            default_top_k: default_top_k(),
            rrf_k: default_rrf_k(),
            graph_weight: default_graph_weight(),
        }
    }
}

fn default_candidate_k() -> i64 {
    80
}
fn default_top_k() -> i64 {
    10
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_graph_weight() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_max")]
    pub batch_max: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: None,
            model: None,
            dims: None,
            batch_max: default_batch_max(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_max() -> usize {
    32
}
fn default_concurrency() -> usize {
    8
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Remote OCR/ASR provider configuration, mirroring `EmbeddingConfig`'s
/// disabled-by-default posture (spec §4.2 image/audio/video extraction).
#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_ocr_confidence")]
    pub ocr_confidence_threshold: f64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: None,
            ocr_confidence_threshold: default_ocr_confidence(),
        }
    }
}

fn default_ocr_confidence() -> f64 {
    0.5
}

impl MediaConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Ingestion orchestrator / job queue tuning (spec §4.7, §5).
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_worker_pool")]
    pub worker_pool: usize,
    #[serde(default = "default_item_timeout_s")]
    pub item_timeout_s: u64,
    #[serde(default = "default_pool_acquire_timeout_s")]
    pub pool_acquire_timeout_s: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            worker_pool: default_worker_pool(),
            item_timeout_s: default_item_timeout_s(),
            pool_acquire_timeout_s: default_pool_acquire_timeout_s(),
        }
    }
}

fn default_worker_pool() -> usize {
    num_cpus::get().max(1)
}
fn default_item_timeout_s() -> u64 {
    600
}
fn default_pool_acquire_timeout_s() -> u64 {
    5
}

/// URL-fetch extractor limits (spec §4.2 HTML/URL, §8 boundary behavior).
#[derive(Debug, Deserialize, Clone)]
pub struct UrlConfig {
    #[serde(default = "default_fetch_timeout_s")]
    pub fetch_timeout_s: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_s: default_fetch_timeout_s(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_fetch_timeout_s() -> u64 {
    30
}
fn default_max_bytes() -> u64 {
    50 * 1024 * 1024
}

/// Repair-worker tuning (spec §4.4 atomicity contract).
#[derive(Debug, Deserialize, Clone)]
pub struct RepairConfig {
    #[serde(default = "default_max_age_h")]
    pub max_age_h: u64,
    #[serde(default = "default_repair_interval_s")]
    pub scan_interval_s: u64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_age_h: default_max_age_h(),
            scan_interval_s: default_repair_interval_s(),
        }
    }
}

fn default_max_age_h() -> u64 {
    24
}
fn default_repair_interval_s() -> u64 {
    60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.min_tokens == 0 {
        anyhow::bail!("chunking.min_tokens must be > 0");
    }
    if config.chunking.target_tokens < config.chunking.min_tokens
        || config.chunking.max_tokens < config.chunking.target_tokens
    {
        anyhow::bail!(
            "chunking token bounds must satisfy min_tokens <= target_tokens <= max_tokens"
        );
    }

    if config.retrieval.default_top_k < 1 {
        anyhow::bail!("retrieval.default_top_k must be >= 1");
    }
    if config.retrieval.rrf_k <= 0.0 {
        anyhow::bail!("retrieval.rrf_k must be > 0");
    }
    if !(0.0..=1.0).contains(&config.retrieval.graph_weight) {
        anyhow::bail!("retrieval.graph_weight must be in [0.0, 1.0]");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_max == 0 || config.embedding.batch_max > 32 {
            anyhow::bail!("embedding.batch_max must be in 1..=32");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or local.",
            other
        ),
    }

    match config.media.provider.as_str() {
        "disabled" | "remote" => {}
        other => anyhow::bail!(
            "Unknown media provider: '{}'. Must be disabled or remote.",
            other
        ),
    }
    if config.media.is_enabled() && config.media.endpoint.is_none() {
        anyhow::bail!("media.endpoint must be specified when media.provider = 'remote'");
    }

    if config.ingest.worker_pool == 0 {
        anyhow::bail!("ingest.worker_pool must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_cfg(toml: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(toml.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let f = write_cfg(
            r#"
            [db]
            path = "data/fk.sqlite"
            [chunking]
            target_tokens = 800
            max_tokens = 1200
            min_tokens = 200
            [server]
            bind = "127.0.0.1:8080"
            "#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.retrieval.rrf_k, 60.0);
        assert_eq!(cfg.retrieval.graph_weight, 0.2);
        assert_eq!(cfg.embedding.provider, "disabled");
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.ingest.worker_pool, num_cpus::get().max(1));
        assert_eq!(cfg.repair.max_age_h, 24);
    }

    #[test]
    fn invalid_token_bounds_rejected() {
        let f = write_cfg(
            r#"
            [db]
            path = "data/fk.sqlite"
            [chunking]
            target_tokens = 100
            max_tokens = 50
            min_tokens = 200
            [server]
            bind = "127.0.0.1:8080"
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn embedding_enabled_requires_dims_and_model() {
        let f = write_cfg(
            r#"
            [db]
            path = "data/fk.sqlite"
            [chunking]
            target_tokens = 800
            max_tokens = 1200
            min_tokens = 200
            [server]
            bind = "127.0.0.1:8080"
            [embedding]
            provider = "openai"
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn media_remote_requires_endpoint() {
        let f = write_cfg(
            r#"
            [db]
            path = "data/fk.sqlite"
            [chunking]
            target_tokens = 800
            max_tokens = 1200
            min_tokens = 200
            [server]
            bind = "127.0.0.1:8080"
            [media]
            provider = "remote"
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }
}
