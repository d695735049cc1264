//! Delayed, deduplicated background jobs and the pool that runs them.
//!
//! [`JobQueue::schedule`] hands a job to a bounded `mpsc` channel after its
//! delay. While a job is pending (scheduled but not yet picked up) an equal
//! job is dropped, so repeated polls cannot pile up duplicate generations.
//! [`WorkerPool`] drains the channel and runs jobs concurrently up to a
//! semaphore limit.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::hasher::normalize_type_set;
use crate::telemetry;
use crate::types::{ContentType, DocumentId};
use crate::{CardsmithError, Result};

/// Default channel capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default number of jobs run at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Background work for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Initial generation of every requested type.
    Generate { document_id: DocumentId },
    /// Generate types a completed document is missing.
    Backfill {
        document_id: DocumentId,
        content_types: BTreeSet<ContentType>,
    },
}

impl Job {
    pub fn document_id(&self) -> DocumentId {
        match self {
            Job::Generate { document_id } | Job::Backfill { document_id, .. } => *document_id,
        }
    }

    /// Operation label for logs and metrics.
    pub fn operation(&self) -> &'static str {
        match self {
            Job::Generate { .. } => "generate",
            Job::Backfill { .. } => "backfill",
        }
    }

    /// Two jobs with the same key do the same work.
    pub fn dedupe_key(&self) -> String {
        match self {
            Job::Generate { document_id } => format!("generate:{document_id}"),
            Job::Backfill {
                document_id,
                content_types,
            } => format!("backfill:{document_id}:{}", normalize_type_set(content_types)),
        }
    }
}

/// Runs jobs taken off the queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> Result<()>;
}

/// Create a connected queue and receiver.
pub fn job_queue(capacity: usize) -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let pending = moka::sync::Cache::builder().build();
    (
        JobQueue {
            tx,
            pending: pending.clone(),
        },
        JobReceiver { rx, pending },
    )
}

/// Sending half. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    pending: moka::sync::Cache<String, ()>,
}

impl JobQueue {
    /// Schedule `job` to run after `delay`.
    ///
    /// Returns `false` when an equal job is already pending. Fails with
    /// [`CardsmithError::QueueClosed`] once the receiver is gone.
    pub async fn schedule(&self, job: Job, delay: Duration) -> Result<bool> {
        if self.tx.is_closed() {
            return Err(CardsmithError::QueueClosed);
        }

        let key = job.dedupe_key();
        let entry = self.pending.entry(key.clone()).or_insert(());
        if !entry.is_fresh() {
            debug!(job = %key, "equal job already pending");
            return Ok(false);
        }

        debug!(job = %key, delay_ms = delay.as_millis() as u64, "job scheduled");
        if delay.is_zero() {
            if self.tx.send(job).await.is_err() {
                self.pending.invalidate(&key);
                return Err(CardsmithError::QueueClosed);
            }
            return Ok(true);
        }

        let tx = self.tx.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(job).await.is_err() {
                pending.invalidate(&key);
                warn!(job = %key, "job dropped, queue closed");
            }
        });
        Ok(true)
    }

    /// Whether an equal job is scheduled but not yet picked up.
    pub fn is_pending(&self, job: &Job) -> bool {
        self.pending.contains_key(&job.dedupe_key())
    }
}

/// Receiving half, drained by a [`WorkerPool`] or directly in tests.
pub struct JobReceiver {
    rx: mpsc::Receiver<Job>,
    pending: moka::sync::Cache<String, ()>,
}

impl JobReceiver {
    /// Wait for the next due job. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Job> {
        let job = self.rx.recv().await?;
        self.pending.invalidate(&job.dedupe_key());
        Some(job)
    }

    /// Take a due job without waiting.
    pub fn try_recv(&mut self) -> Option<Job> {
        let job = self.rx.try_recv().ok()?;
        self.pending.invalidate(&job.dedupe_key());
        Some(job)
    }
}

/// Runs jobs from a [`JobReceiver`] on the tokio runtime.
pub struct WorkerPool {
    handle: JoinHandle<()>,
}

impl WorkerPool {
    /// Start draining `receiver`, running at most `concurrency` jobs at once.
    pub fn spawn(
        mut receiver: JobReceiver,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let handle = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    run_job(handler.as_ref(), job).await;
                });
            }
            // Wait for in-flight jobs before reporting the pool finished.
            let _ = semaphore.acquire_many(concurrency as u32).await;
            debug!("worker pool drained");
        });

        Self { handle }
    }

    /// Wait until every queue handle is dropped and in-flight jobs finish.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "worker pool task failed");
        }
    }

    /// Stop taking jobs. In-flight jobs are not interrupted.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

async fn run_job(handler: &dyn JobHandler, job: Job) {
    let operation = job.operation();
    let document_id = job.document_id();
    let start = Instant::now();

    let status = match handler.handle(job).await {
        Ok(()) => "ok",
        Err(e) => {
            error!(%document_id, operation, error = %e, "background job failed");
            "error"
        }
    };

    metrics::counter!(telemetry::JOBS_TOTAL, "operation" => operation, "status" => status)
        .increment(1);
    debug!(
        %document_id,
        operation,
        status,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "job finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<Job>>);

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: Job) -> Result<()> {
            self.0.lock().unwrap().push(job);
            Ok(())
        }
    }

    fn backfill(document_id: DocumentId, types: &[ContentType]) -> Job {
        Job::Backfill {
            document_id,
            content_types: types.iter().copied().collect(),
        }
    }

    #[test]
    fn backfill_key_ignores_type_order() {
        let id = DocumentId::new();
        let a = backfill(id, &[ContentType::Quiz, ContentType::Flashcard]);
        let b = backfill(id, &[ContentType::Flashcard, ContentType::Quiz]);
        assert_eq!(a.dedupe_key(), b.dedupe_key());
        assert_ne!(
            a.dedupe_key(),
            Job::Generate { document_id: id }.dedupe_key()
        );
    }

    #[tokio::test]
    async fn duplicate_pending_job_is_dropped() {
        let (queue, mut rx) = job_queue(8);
        let job = Job::Generate {
            document_id: DocumentId::new(),
        };

        assert!(queue.schedule(job.clone(), Duration::ZERO).await.unwrap());
        assert!(!queue.schedule(job.clone(), Duration::ZERO).await.unwrap());
        assert_eq!(rx.recv().await, Some(job.clone()));

        // Picked up, so it may be scheduled again.
        assert!(queue.schedule(job, Duration::ZERO).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_job_arrives_after_delay() {
        let (queue, mut rx) = job_queue(8);
        let job = Job::Generate {
            document_id: DocumentId::new(),
        };
        queue
            .schedule(job.clone(), Duration::from_secs(30))
            .await
            .unwrap();

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_none());
        assert!(queue.is_pending(&job));

        let start = tokio::time::Instant::now();
        assert_eq!(rx.recv().await, Some(job));
        assert!(start.elapsed() >= Duration::from_secs(29));
    }

    #[tokio::test]
    async fn schedule_fails_when_receiver_dropped() {
        let (queue, rx) = job_queue(8);
        drop(rx);
        let result = queue
            .schedule(
                Job::Generate {
                    document_id: DocumentId::new(),
                },
                Duration::ZERO,
            )
            .await;
        assert!(matches!(result, Err(CardsmithError::QueueClosed)));
    }

    #[tokio::test]
    async fn pool_runs_every_job_then_drains() {
        let (queue, rx) = job_queue(8);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let pool = WorkerPool::spawn(rx, recorder.clone(), 2);

        for _ in 0..5 {
            let job = Job::Generate {
                document_id: DocumentId::new(),
            };
            queue.schedule(job, Duration::ZERO).await.unwrap();
        }
        drop(queue);
        pool.join().await;

        assert_eq!(recorder.0.lock().unwrap().len(), 5);
    }
}
