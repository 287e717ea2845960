//! Background index-worker job queue: bounded, deduplicated, cancellable.
//!
//! The queue is pure bookkeeping; the actual work of a job (reindexing a
//! memory, rebuilding the whole index, running sleep consolidation) is
//! supplied by a [`JobRunner`] the caller wires in, so this module never
//! depends on `crate::consolidation` directly.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::time::{timeout, Duration};

use crate::error::{Result, StratumError};
use crate::types::MemoryId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ReindexMemory,
    RebuildIndex,
    SleepConsolidation,
}

impl TaskType {
    fn dedup_key(&self, memory_id: Option<MemoryId>) -> String {
        match self {
            TaskType::ReindexMemory => format!("reindex_memory:{}", memory_id.unwrap_or_default()),
            TaskType::RebuildIndex => "rebuild_index".to_string(),
            TaskType::SleepConsolidation => "sleep_consolidation".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
    Dropped,
}

impl JobStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Dropped)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexJob {
    pub id: String,
    pub task_type: TaskType,
    pub memory_id: Option<MemoryId>,
    pub status: JobStatus,
    pub reason: String,
    pub created_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub enum EnqueueOutcome {
    Queued { job_id: String },
    Deduped { job_id: String },
    Dropped { reason: String },
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, task_type: TaskType, memory_id: Option<MemoryId>) -> Result<()>;
}

struct Inner {
    queue: VecDeque<String>,
    jobs: HashMap<String, IndexJob>,
    pending_dedup_keys: HashMap<String, String>,
    recent_order: VecDeque<String>,
}

pub struct IndexWorker {
    inner: Mutex<Inner>,
    maxsize: usize,
    retention: usize,
    notify_map: Mutex<HashMap<String, Arc<Notify>>>,
    wake: Arc<Notify>,
    cancel_flags: Mutex<HashMap<String, Arc<std::sync::atomic::AtomicBool>>>,
    run_semaphore: Semaphore,
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn new_job_id() -> String {
    format!("job-{}", uuid::Uuid::new_v4())
}

impl IndexWorker {
    pub fn new(maxsize: usize, retention: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                jobs: HashMap::new(),
                pending_dedup_keys: HashMap::new(),
                recent_order: VecDeque::new(),
            }),
            maxsize,
            retention,
            notify_map: Mutex::new(HashMap::new()),
            wake: Arc::new(Notify::new()),
            cancel_flags: Mutex::new(HashMap::new()),
            run_semaphore: Semaphore::new(1),
        })
    }

    pub fn enqueue(&self, task_type: TaskType, memory_id: Option<MemoryId>, reason: &str) -> EnqueueOutcome {
        let dedup_key = task_type.dedup_key(memory_id);
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.pending_dedup_keys.get(&dedup_key) {
            return EnqueueOutcome::Deduped { job_id: existing.clone() };
        }
        if inner.queue.len() >= self.maxsize {
            return EnqueueOutcome::Dropped { reason: "queue_full".to_string() };
        }

        let job_id = new_job_id();
        let job = IndexJob {
            id: job_id.clone(),
            task_type,
            memory_id,
            status: JobStatus::Queued,
            reason: reason.to_string(),
            created_at: now_iso(),
            finished_at: None,
        };
        inner.jobs.insert(job_id.clone(), job);
        inner.queue.push_back(job_id.clone());
        inner.pending_dedup_keys.insert(dedup_key, job_id.clone());
        self.wake.notify_one();

        EnqueueOutcome::Queued { job_id }
    }

    pub fn get(&self, job_id: &str) -> Option<IndexJob> {
        self.inner.lock().jobs.get(job_id).cloned()
    }

    pub async fn wait_for_job(&self, job_id: &str, wait_timeout: Duration) -> Option<IndexJob> {
        if let Some(job) = self.get(job_id) {
            if job.status.is_terminal() {
                return Some(job);
            }
        } else {
            return None;
        }
        let notify = {
            let mut map = self.notify_map.lock();
            map.entry(job_id.to_string()).or_insert_with(|| Arc::new(Notify::new())).clone()
        };
        let _ = timeout(wait_timeout, notify.notified()).await;
        self.get(job_id)
    }

    pub fn cancel_job(&self, job_id: &str, reason: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let job = inner.jobs.get_mut(job_id).ok_or_else(|| StratumError::JobNotFound(job_id.to_string()))?;

        match job.status {
            JobStatus::Queued => {
                job.status = JobStatus::Cancelled;
                job.reason = reason.to_string();
                job.finished_at = Some(now_iso());
                inner.queue.retain(|id| id != job_id);
                Ok(())
            }
            JobStatus::Running => {
                job.status = JobStatus::Cancelling;
                job.reason = reason.to_string();
                drop(inner);
                if let Some(flag) = self.cancel_flags.lock().get(job_id) {
                    flag.store(true, std::sync::atomic::Ordering::SeqCst);
                }
                Ok(())
            }
            _ => Err(StratumError::Conflict(format!("job {job_id} already final"))),
        }
    }

    pub fn retry_index_job(&self, job_id: &str, reason: Option<&str>) -> Result<EnqueueOutcome> {
        let job = self.get(job_id).ok_or_else(|| StratumError::JobNotFound(job_id.to_string()))?;
        if !job.status.is_terminal() {
            return Err(StratumError::Conflict(format!("job {job_id} is not in a terminal state")));
        }
        let retry_reason = reason.map(str::to_string).unwrap_or_else(|| format!("retry:{job_id}"));
        Ok(self.enqueue(job.task_type, job.memory_id, &retry_reason))
    }

    fn finalize(&self, job_id: &str, status: JobStatus) {
        let mut inner = self.inner.lock();
        if let Some(job) = inner.jobs.get_mut(job_id) {
            job.status = status;
            job.finished_at = Some(now_iso());
        }
        inner.recent_order.push_back(job_id.to_string());
        while inner.recent_order.len() > self.retention {
            if let Some(old) = inner.recent_order.pop_front() {
                if inner.jobs.get(&old).is_some_and(|j| j.status.is_terminal()) {
                    inner.jobs.remove(&old);
                }
            }
        }
        self.cancel_flags.lock().remove(job_id);
        if let Some(notify) = self.notify_map.lock().remove(job_id) {
            notify.notify_waiters();
        }
    }

    /// Drain the queue forever, running one job at a time against `runner`.
    /// Intended to be spawned as a single long-lived task.
    pub async fn run_forever(self: Arc<Self>, runner: Arc<dyn JobRunner>) {
        loop {
            let next = {
                let mut inner = self.inner.lock();
                inner.queue.pop_front()
            };
            let Some(job_id) = next else {
                self.wake.notified().await;
                continue;
            };

            let (task_type, memory_id, dedup_key) = {
                let mut inner = self.inner.lock();
                let Some(job) = inner.jobs.get_mut(&job_id) else { continue };
                if job.status != JobStatus::Queued {
                    continue;
                }
                job.status = JobStatus::Running;
                let key = job.task_type.dedup_key(job.memory_id);
                inner.pending_dedup_keys.remove(&key);
                (job.task_type, job.memory_id, key)
            };
            let _ = dedup_key;

            let cancel_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
            self.cancel_flags.lock().insert(job_id.clone(), cancel_flag.clone());

            let _permit = self.run_semaphore.acquire().await.expect("semaphore never closed");
            let outcome = runner.run(task_type, memory_id).await;
            drop(_permit);

            let was_cancelling = self.get(&job_id).map(|j| j.status == JobStatus::Cancelling).unwrap_or(false);
            let final_status = if was_cancelling {
                JobStatus::Cancelled
            } else if cancel_flag.load(std::sync::atomic::Ordering::SeqCst) {
                JobStatus::Cancelled
            } else {
                match outcome {
                    Ok(()) => JobStatus::Completed,
                    Err(_) => JobStatus::Failed,
                }
            };
            self.finalize(&job_id, final_status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner(Arc<AtomicUsize>);

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run(&self, _task_type: TaskType, _memory_id: Option<MemoryId>) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn enqueue_dedupes_reindex_by_memory_id() {
        let worker = IndexWorker::new(10, 30);
        let first = worker.enqueue(TaskType::ReindexMemory, Some(5), "created");
        let second = worker.enqueue(TaskType::ReindexMemory, Some(5), "created again");
        assert!(matches!(first, EnqueueOutcome::Queued { .. }));
        assert!(matches!(second, EnqueueOutcome::Deduped { .. }));
    }

    #[test]
    fn enqueue_drops_when_queue_full() {
        let worker = IndexWorker::new(1, 30);
        worker.enqueue(TaskType::ReindexMemory, Some(1), "a");
        let dropped = worker.enqueue(TaskType::ReindexMemory, Some(2), "b");
        assert!(matches!(dropped, EnqueueOutcome::Dropped { .. }));
    }

    #[test]
    fn cancel_queued_job_marks_cancelled() {
        let worker = IndexWorker::new(10, 30);
        let EnqueueOutcome::Queued { job_id } = worker.enqueue(TaskType::RebuildIndex, None, "r") else {
            panic!()
        };
        worker.cancel_job(&job_id, "user requested").unwrap();
        assert_eq!(worker.get(&job_id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn cancel_unknown_job_errors() {
        let worker = IndexWorker::new(10, 30);
        assert!(worker.cancel_job("nope", "x").is_err());
    }

    #[tokio::test]
    async fn run_forever_completes_queued_jobs() {
        let worker = IndexWorker::new(10, 30);
        let counter = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(CountingRunner(counter.clone()));

        let EnqueueOutcome::Queued { job_id } = worker.enqueue(TaskType::RebuildIndex, None, "boot") else {
            panic!()
        };

        let worker_clone = worker.clone();
        let handle = tokio::spawn(async move { worker_clone.run_forever(runner).await });

        let job = worker.wait_for_job(&job_id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        handle.abort();
    }

    #[test]
    fn retry_requires_terminal_state() {
        let worker = IndexWorker::new(10, 30);
        let EnqueueOutcome::Queued { job_id } = worker.enqueue(TaskType::RebuildIndex, None, "r") else {
            panic!()
        };
        assert!(worker.retry_index_job(&job_id, None).is_err());
    }
}
