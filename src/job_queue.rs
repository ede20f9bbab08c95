//! Priority job queue for the ingestion orchestrator (spec §4.4, §7).
//!
//! Three priority bands (interactive > batch > background) are each a
//! `tokio::sync::mpsc` channel; a fixed-size worker pool polls interactive
//! first, then batch, then background, so a large batch ingest never
//! starves a single-file `fk ingest-file` request. Cancellation is
//! cooperative: a
//! running job checks an `AtomicBool` at five points in the pipeline rather
//! than being killed outright, so partial writes stay consistent with the
//! atomicity contract in [`crate::orchestrator`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Background,
    Batch,
    Interactive,
}

/// Where in the per-item pipeline a cancellation check happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    BeforeDetect,
    BeforeExtract,
    BeforeChunk,
    BeforeEmbed,
    BeforeStore,
}

#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Called at each [`Checkpoint`]; returns `Err` if the job was cancelled
    /// since the last check, so the orchestrator can unwind cleanly.
    pub fn check(&self, at: Checkpoint) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError(at))
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CancelledError(pub Checkpoint);

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job cancelled at {:?}", self.0)
    }
}

impl std::error::Error for CancelledError {}

pub struct Job<T> {
    pub id: JobId,
    pub priority: Priority,
    pub payload: T,
    pub cancel: CancelToken,
}

/// Three-band FIFO queue. Enqueue is non-blocking (unbounded channels);
/// backpressure is applied by the orchestrator's semaphore, not here.
pub struct JobQueue<T> {
    interactive_tx: mpsc::UnboundedSender<Job<T>>,
    batch_tx: mpsc::UnboundedSender<Job<T>>,
    background_tx: mpsc::UnboundedSender<Job<T>>,
    interactive_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Job<T>>>,
    batch_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Job<T>>>,
    background_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Job<T>>>,
}

impl<T> JobQueue<T> {
    pub fn new() -> Arc<Self> {
        let (interactive_tx, interactive_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (background_tx, background_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            interactive_tx,
            batch_tx,
            background_tx,
            interactive_rx: tokio::sync::Mutex::new(interactive_rx),
            batch_rx: tokio::sync::Mutex::new(batch_rx),
            background_rx: tokio::sync::Mutex::new(background_rx),
        })
    }

    pub fn submit(&self, priority: Priority, payload: T) -> (JobId, CancelToken) {
        let id = Uuid::new_v4();
        let cancel = CancelToken::new();
        let job = Job {
            id,
            priority,
            payload,
            cancel: cancel.clone(),
        };
        let sent = match priority {
            Priority::Interactive => self.interactive_tx.send(job),
            Priority::Batch => self.batch_tx.send(job),
            Priority::Background => self.background_tx.send(job),
        };
        // Channel only closes if every receiver-holding worker has exited,
        // which means the process is shutting down; dropping the job is fine.
        let _ = sent;
        (id, cancel)
    }

    /// Pops the next job, checking bands in priority order. Yields to the
    /// scheduler between checks so the poll loop doesn't spin when all
    /// bands are empty but not yet closed.
    pub async fn recv(&self) -> Option<Job<T>> {
        loop {
            if let Ok(job) = self.interactive_rx.lock().await.try_recv() {
                return Some(job);
            }
            if let Ok(job) = self.batch_rx.lock().await.try_recv() {
                return Some(job);
            }
            match self.background_rx.lock().await.try_recv() {
                Ok(job) => return Some(job),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if self.interactive_tx.is_closed()
                        && self.batch_tx.is_closed()
                        && self.background_tx.is_closed()
                    {
                        return None;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

/// Sized at `num_cpus::get()` unless overridden by config (spec §7 worker_pool).
pub fn default_worker_count(configured: Option<usize>) -> usize {
    configured.unwrap_or_else(num_cpus::get).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_reports_checkpoint() {
        let token = CancelToken::new();
        assert!(token.check(Checkpoint::BeforeDetect).is_ok());
        token.cancel();
        let err = token.check(Checkpoint::BeforeEmbed).unwrap_err();
        matches!(err.0, Checkpoint::BeforeEmbed);
    }

    #[tokio::test]
    async fn interactive_jobs_are_served_before_background() {
        let queue: Arc<JobQueue<u32>> = JobQueue::new();
        queue.submit(Priority::Background, 1);
        queue.submit(Priority::Batch, 2);
        queue.submit(Priority::Interactive, 3);

        let first = queue.recv().await.unwrap();
        assert_eq!(first.payload, 3);
        let second = queue.recv().await.unwrap();
        assert_eq!(second.payload, 2);
        let third = queue.recv().await.unwrap();
        assert_eq!(third.payload, 1);
    }

    #[test]
    fn default_worker_count_respects_override() {
        assert_eq!(default_worker_count(Some(4)), 4);
        assert_eq!(default_worker_count(Some(0)), 1);
        assert!(default_worker_count(None) >= 1);
    }
}
