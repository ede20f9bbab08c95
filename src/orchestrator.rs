//! Ingestion orchestrator: detect → extract → chunk → embed → store.
//!
//! Generalizes the teacher's synchronous `run_sync` into a `JobId`-returning
//! async API backed by the job queue. `ingest_item`/`ingest_batch` enqueue
//! work and return immediately; a pool of workers drains the queue and runs
//! the nine-step pipeline per item, publishing progress on a broadcast
//! channel per job so both the CLI and the HTTP SSE endpoint can watch the
//! same run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, Mutex, Semaphore};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::chunk::{chunk_text, ChunkPolicy};
use crate::config::Config;
use crate::detect::{detect_format, FormatTag};
use crate::embedding;
use crate::error::FkError;
use crate::extract::{self, Extracted};
use crate::job_queue::{CancelToken, Checkpoint, JobId, JobQueue, Priority};
use crate::models::{DocType, Document, IndexState, SourceItem};
use crate::store::{GrStore, RvStore, ViStore};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub processed_count: usize,
    pub total: usize,
    pub current_item_id: Option<String>,
    pub last_error: Option<String>,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub processed_count: usize,
    pub total: usize,
    pub last_error: Option<String>,
}

struct IngestWork {
    project: String,
    items: Vec<SourceItem>,
    parent_document_id: Option<Uuid>,
    force_reingest: bool,
}

/// Per-document short-lived locks so the orchestrator and the repair worker
/// never race on the same row (spec §5).
type DocLocks = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

pub struct Orchestrator {
    config: Config,
    rv: RvStore,
    vi: ViStore,
    gr: GrStore,
    queue: Arc<JobQueue<IngestWork>>,
    jobs: Arc<StdMutex<HashMap<JobId, JobRecord>>>,
    progress: Arc<StdMutex<HashMap<JobId, broadcast::Sender<ProgressEvent>>>>,
    doc_locks: DocLocks,
    embed_semaphore: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(config: Config, rv: RvStore, vi: ViStore, gr: GrStore) -> Arc<Self> {
        let concurrency = config.embedding.concurrency.max(1);
        Arc::new(Self {
            config,
            rv,
            vi,
            gr,
            queue: JobQueue::new(),
            jobs: Arc::new(StdMutex::new(HashMap::new())),
            progress: Arc::new(StdMutex::new(HashMap::new())),
            doc_locks: Arc::new(StdMutex::new(HashMap::new())),
            embed_semaphore: Arc::new(Semaphore::new(concurrency)),
        })
    }

    /// Spawns the worker pool. Call once at process startup.
    pub fn spawn_workers(self: &Arc<Self>) {
        let worker_count = crate::job_queue::default_worker_count(Some(self.config.ingest.worker_pool));
        for _ in 0..worker_count {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.worker_loop().await });
        }
        let repair = Arc::clone(self);
        tokio::spawn(async move { repair.repair_loop().await });
    }

    async fn worker_loop(self: Arc<Self>) {
        while let Some(job) = self.queue.recv().await {
            self.set_status(job.id, JobStatus::Running);
            let total = job.payload.items.len();
            self.update_total(job.id, total);

            let mut processed = 0usize;
            let mut last_error = None;
            for item in &job.payload.items {
                match self
                    .ingest_one(
                        &job.payload.project,
                        item,
                        job.payload.parent_document_id,
                        job.payload.force_reingest,
                        &job.cancel,
                    )
                    .await
                {
                    Ok(_) => processed += 1,
                    Err(e) => last_error = Some(e.to_string()),
                }
                self.publish(job.id, processed, total, None, last_error.clone(), false);
            }

            let status = if last_error.is_some() {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            };
            self.set_status(job.id, status);
            self.publish(job.id, processed, total, None, last_error, true);
        }
    }

    fn set_status(&self, id: JobId, status: JobStatus) {
        if let Some(rec) = self.jobs.lock().unwrap().get_mut(&id) {
            rec.status = status;
        }
    }

    fn update_total(&self, id: JobId, total: usize) {
        if let Some(rec) = self.jobs.lock().unwrap().get_mut(&id) {
            rec.total = total;
        }
    }

    fn publish(
        &self,
        id: JobId,
        processed: usize,
        total: usize,
        current: Option<String>,
        last_error: Option<String>,
        done: bool,
    ) {
        if let Some(rec) = self.jobs.lock().unwrap().get_mut(&id) {
            rec.processed_count = processed;
            rec.last_error = last_error.clone();
        }
        if let Some(tx) = self.progress.lock().unwrap().get(&id) {
            let _ = tx.send(ProgressEvent {
                job_id: id,
                processed_count: processed,
                total,
                current_item_id: current,
                last_error,
                done,
            });
        }
    }

    /// Enqueues a single item for ingestion and returns immediately.
    pub fn ingest_item(
        &self,
        project: &str,
        item: SourceItem,
        priority: Priority,
        force_reingest: bool,
    ) -> JobId {
        self.ingest_batch(project, vec![item], priority, None, force_reingest)
    }

    pub fn ingest_batch(
        &self,
        project: &str,
        items: Vec<SourceItem>,
        priority: Priority,
        parent_document_id: Option<Uuid>,
        force_reingest: bool,
    ) -> JobId {
        let (id, _cancel) = self.queue.submit(
            priority,
            IngestWork {
                project: project.to_string(),
                items,
                parent_document_id,
                force_reingest,
            },
        );
        self.jobs.lock().unwrap().insert(
            id,
            JobRecord {
                id,
                status: JobStatus::Queued,
                processed_count: 0,
                total: 0,
                last_error: None,
            },
        );
        let (tx, _rx) = broadcast::channel(256);
        self.progress.lock().unwrap().insert(id, tx);
        id
    }

    pub fn get_job(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn subscribe_progress(&self, id: JobId) -> Option<broadcast::Receiver<ProgressEvent>> {
        self.progress.lock().unwrap().get(&id).map(|tx| tx.subscribe())
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut guard = self.doc_locks.lock().unwrap();
        guard.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// The nine-step per-item pipeline (spec §4.4):
    /// 1. single-flight dedup check, 2. detect format, 3. extract text,
    /// 4. normalize into a Document, 5. persist to RV, 6. chunk,
    /// 7. embed (bounded concurrency), 8. persist to VI, 9. persist to GR
    /// and flip `index_state` to `ok`.
    async fn ingest_one(
        &self,
        project: &str,
        item: &SourceItem,
        parent_document_id: Option<Uuid>,
        force_reingest: bool,
        cancel: &CancelToken,
    ) -> Result<Uuid> {
        let raw = item.raw_bytes.as_deref().unwrap_or_else(|| item.body.as_bytes());
        let raw_hash = hash_bytes(raw);
        let dedup_key = format!("{project}:{raw_hash}");
        let lock = self.lock_for(&dedup_key).await;
        let _guard = lock.lock().await;

        let timeout = Duration::from_secs(self.config.ingest.item_timeout_s);
        tokio::time::timeout(
            timeout,
            self.ingest_one_inner(project, item, parent_document_id, force_reingest, cancel),
        )
        .await
        .map_err(|_| anyhow!(FkError::Timeout(timeout)))?
    }

    async fn ingest_one_inner(
        &self,
        project: &str,
        item: &SourceItem,
        parent_document_id: Option<Uuid>,
        force_reingest: bool,
        cancel: &CancelToken,
    ) -> Result<Uuid> {
        cancel.check(Checkpoint::BeforeDetect).map_err(|e| anyhow!(e.to_string()))?;

        let raw = item.raw_bytes.as_deref().unwrap_or_else(|| item.body.as_bytes());
        let extension = item.source_id.rsplit('.').next();
        let format = detect_format(raw, extension, item.source_url.is_some());

        cancel.check(Checkpoint::BeforeExtract).map_err(|e| anyhow!(e.to_string()))?;
        let extracted = self.extract_item(raw, format, item).await?;
        let normalized_text = normalize_text(&extracted.text);
        let content_hash = hash_bytes(normalized_text.as_bytes());

        if !force_reingest {
            if let Some(existing) = self.rv.find_by_content_hash(project, &content_hash).await? {
                return Ok(existing.id);
            }
        }

        cancel.check(Checkpoint::BeforeChunk).map_err(|e| anyhow!(e.to_string()))?;
        let doc_id = Uuid::new_v4();
        let doc_type = infer_doc_type(format, item);
        let doc = Document {
            id: doc_id,
            project: project.to_string(),
            source: item.source.clone(),
            source_id: item.source_id.clone(),
            source_url: item.source_url.clone(),
            title: item.title.clone(),
            author: item.author.clone(),
            doc_type,
            mime: item.content_type.clone(),
            size_bytes: raw.len() as i64,
            created_at: item.created_at.timestamp(),
            updated_at: item.updated_at.timestamp(),
            content_hash,
            metadata_json: item.metadata_json.clone(),
            body: normalized_text.clone(),
            index_state: IndexState::RvOnly,
            parent_document_id,
        };

        self.rv.upsert_document(&doc).await.map_err(|e| {
            anyhow!(FkError::StoreWriteFailed {
                store: crate::error::StoreKind::Rv,
                reason: e.to_string(),
            })
        })?;

        let policy = ChunkPolicy {
            target_tokens: self.config.chunking.target_tokens,
            max_tokens: self.config.chunking.max_tokens,
            min_tokens: self.config.chunking.min_tokens,
            is_code: matches!(format, FormatTag::Code),
        };
        let chunks = chunk_text(doc_id, &normalized_text, &policy);
        self.rv.replace_chunks(doc_id, &chunks).await?;

        cancel.check(Checkpoint::BeforeEmbed).map_err(|e| anyhow!(e.to_string()))?;
        if self.config.embedding.is_enabled() {
            match self.embed_and_store(project, doc_id, &chunks).await {
                Ok(_) => {
                    cancel.check(Checkpoint::BeforeStore).map_err(|e| anyhow!(e.to_string()))?;
                    if let Err(e) = self.gr_pass(project, &doc).await {
                        // GR failed after RV+VI succeeded: vector and keyword search
                        // still work, graph-enriched queries fall back.
                        self.rv.set_index_state(doc_id, IndexState::GraphPending).await?;
                        tracing::warn!(document_id = %doc_id, error = %e, "graph pass failed, marking graph_pending");
                    } else {
                        self.rv.set_index_state(doc_id, IndexState::Ok).await?;
                    }
                }
                Err(e) if is_vi_write_failure(&e) => {
                    // VI failed after exhausting its retries: document stays
                    // retrievable via keyword search, repair worker picks it up.
                    self.rv.set_index_state(doc_id, IndexState::RvOnly).await?;
                    tracing::warn!(document_id = %doc_id, error = %e, "vector index write failed, marking rv_only");
                }
                Err(e) => {
                    self.rv.set_index_state(doc_id, IndexState::Failed).await?;
                    return Err(e);
                }
            }
        } else {
            self.rv.set_index_state(doc_id, IndexState::Ok).await?;
        }

        for child in extracted.children {
            let child_item = SourceItem {
                source: item.source.clone(),
                source_id: format!("{}::{}", item.source_id, child.name),
                source_url: None,
                title: Some(child.name.clone()),
                author: item.author.clone(),
                created_at: item.created_at,
                updated_at: item.updated_at,
                content_type: "application/octet-stream".to_string(),
                body: String::new(),
                metadata_json: "{}".to_string(),
                raw_json: None,
                raw_bytes: Some(child.bytes),
            };
            Box::pin(self.ingest_one_inner(project, &child_item, Some(doc_id), force_reingest, cancel)).await?;
        }

        Ok(doc_id)
    }

    async fn extract_item(
        &self,
        raw: &[u8],
        format: FormatTag,
        item: &SourceItem,
    ) -> Result<Extracted> {
        if matches!(format, FormatTag::Unknown) && !item.body.is_empty() {
            return Ok(Extracted::text_only(item.body.clone()));
        }
        extract::extract(raw, format).map_err(|e| anyhow!(FkError::ExtractionFailed(e.to_string())))
    }

    async fn embed_and_store(&self, project: &str, doc_id: Uuid, chunks: &[crate::models::Chunk]) -> Result<()> {
        let provider = embedding::create_provider(&self.config.embedding)?;
        let model = provider.model_name().to_string();

        for batch in chunks.chunks(self.config.embedding.batch_max) {
            let _permit = self.embed_semaphore.acquire().await?;
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedding::embed_texts(provider.as_ref(), &self.config.embedding, &texts)
                .await
                .map_err(|e| anyhow!(FkError::EmbeddingFailed(e.to_string())))?;

            for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                // RV (embedding metadata) is written before VI, per the
                // atomicity contract's write ordering.
                self.rv
                    .upsert_embedding_meta(chunk.id, &model, provider.dims(), now(), &chunk.hash)
                    .await
                    .map_err(|e| {
                        anyhow!(FkError::StoreWriteFailed {
                            store: crate::error::StoreKind::Rv,
                            reason: e.to_string(),
                        })
                    })?;
                self.write_vector_with_retry(chunk.id, doc_id, project, vector).await?;
            }
        }
        Ok(())
    }

    /// Retries a VI vector write up to 3 times (independent of the embedding
    /// call's own retry/backoff), per the atomicity contract's VI-failure
    /// compensation rule. Exhaustion surfaces as a distinct `StoreWriteFailed`
    /// so the caller can mark the document `rv_only` instead of failing it.
    async fn write_vector_with_retry(
        &self,
        chunk_id: Uuid,
        doc_id: Uuid,
        project: &str,
        vector: &[f32],
    ) -> Result<()> {
        const MAX_ATTEMPTS: u32 = 3;
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.vi.upsert_vector(chunk_id, doc_id, project, vector).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                    }
                }
            }
        }
        Err(anyhow!(FkError::StoreWriteFailed {
            store: crate::error::StoreKind::Vi,
            reason: last_err.map(|e| e.to_string()).unwrap_or_default(),
        }))
    }

    async fn gr_pass(&self, project: &str, doc: &Document) -> Result<()> {
        let _ = self
            .gr
            .get_or_create_node(
                crate::models::EntityKind::Document,
                doc.title.as_deref().unwrap_or(&doc.source_id),
                Some(&doc.id.to_string()),
                project,
            )
            .await?;
        Ok(())
    }

    /// Periodically promotes documents stuck below `ok` (spec §4.4).
    async fn repair_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.repair.scan_interval_s);
        loop {
            tokio::time::sleep(interval).await;
            let threshold = now() - (self.config.repair.max_age_h as i64 * 3600);
            let stuck = match self.rv.find_stuck_documents(threshold).await {
                Ok(docs) => docs,
                Err(_) => continue,
            };
            for doc in stuck {
                let lock = self.lock_for(&format!("{}:{}", doc.project, doc.content_hash)).await;
                let _guard = lock.lock().await;
                if doc.index_state == IndexState::RvOnly {
                    let chunks = match self.rv.get_chunks(doc.id).await {
                        Ok(c) => c,
                        Err(_) => continue,
                    };
                    match self.embed_and_store(&doc.project, doc.id, &chunks).await {
                        Ok(_) => {
                            if self.gr_pass(&doc.project, &doc).await.is_ok() {
                                let _ = self.rv.set_index_state(doc.id, IndexState::Ok).await;
                            } else {
                                let _ = self.rv.set_index_state(doc.id, IndexState::GraphPending).await;
                            }
                        }
                        Err(e) if is_vi_write_failure(&e) => {
                            // Still VI-impaired; leave rv_only for the next repair pass.
                        }
                        Err(_) => {
                            let _ = self.rv.set_index_state(doc.id, IndexState::Failed).await;
                        }
                    }
                } else if doc.index_state == IndexState::GraphPending {
                    if self.gr_pass(&doc.project, &doc).await.is_ok() {
                        let _ = self.rv.set_index_state(doc.id, IndexState::Ok).await;
                    }
                }
            }
        }
    }
}

fn infer_doc_type(format: FormatTag, item: &SourceItem) -> DocType {
    if item.source == "url" {
        return DocType::Url;
    }
    match format {
        FormatTag::Code => DocType::File,
        _ => DocType::File,
    }
}

fn is_vi_write_failure(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<FkError>(),
        Some(FkError::StoreWriteFailed { store: crate::error::StoreKind::Vi, .. })
    )
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// NFC-normalizes text, drops control characters other than `\n`/`\t`, and
/// collapses runs of 3+ blank lines down to 2. `content_hash` is computed
/// over the result of this, not over raw bytes, so two documents that differ
/// only by encoding or incidental whitespace dedupe to the same document.
fn normalize_text(text: &str) -> String {
    let nfc: String = text.nfc().collect();
    let stripped: String = nfc
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    collapse_blank_lines(&stripped)
}

fn collapse_blank_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0usize;
    for line in text.split('\n') {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                lines.push(line);
            }
        } else {
            blank_run = 0;
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
