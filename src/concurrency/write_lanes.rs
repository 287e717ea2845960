//! Per-session FIFO write lanes over a bounded global semaphore.
//!
//! `run_write` takes a session lock (normalized session id, empty → the
//! literal `"default"` lane) so writes within one session serialize in
//! submission order, then a slot in the global semaphore, whose permit
//! count is the one cross-session concurrency knob.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};

use crate::error::Result;

#[derive(Debug, Clone, serde::Serialize)]
pub struct WriteLaneStatus {
    pub global_concurrency: usize,
    pub active: usize,
    pub waiting: usize,
    pub per_session_waiting: Vec<(String, usize)>,
    pub max_waiting: usize,
}

struct SessionLane {
    lock: AsyncMutex<()>,
    waiting: AtomicUsize,
}

pub struct WriteLaneCoordinator {
    global: Semaphore,
    global_concurrency: usize,
    active: AtomicUsize,
    global_waiting: AtomicUsize,
    max_waiting_seen: AtomicUsize,
    sessions: DashMap<String, Arc<SessionLane>>,
}

fn normalize_session(session_id: &str) -> String {
    let trimmed = session_id.trim();
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}

impl WriteLaneCoordinator {
    pub fn new(global_concurrency: usize) -> Self {
        Self {
            global: Semaphore::new(global_concurrency.max(1)),
            global_concurrency: global_concurrency.max(1),
            active: AtomicUsize::new(0),
            global_waiting: AtomicUsize::new(0),
            max_waiting_seen: AtomicUsize::new(0),
            sessions: DashMap::new(),
        }
    }

    fn lane_for(&self, session_id: &str) -> Arc<SessionLane> {
        self.sessions
            .entry(normalize_session(session_id))
            .or_insert_with(|| Arc::new(SessionLane { lock: AsyncMutex::new(()), waiting: AtomicUsize::new(0) }))
            .clone()
    }

    pub async fn run_write<F, Fut, T>(&self, session_id: &str, _operation: &str, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lane = self.lane_for(session_id);
        lane.waiting.fetch_add(1, Ordering::SeqCst);
        let _session_guard = lane.lock.lock().await;
        lane.waiting.fetch_sub(1, Ordering::SeqCst);

        self.global_waiting.fetch_add(1, Ordering::SeqCst);
        self.max_waiting_seen
            .fetch_max(self.global_waiting.load(Ordering::SeqCst), Ordering::SeqCst);
        let permit = self.global.acquire().await.expect("semaphore never closed");
        self.global_waiting.fetch_sub(1, Ordering::SeqCst);

        self.active.fetch_add(1, Ordering::SeqCst);
        let result = task().await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
        result
    }

    pub fn status(&self) -> WriteLaneStatus {
        let per_session_waiting = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().waiting.load(Ordering::SeqCst)))
            .collect();
        WriteLaneStatus {
            global_concurrency: self.global_concurrency,
            active: self.active.load(Ordering::SeqCst),
            waiting: self.global_waiting.load(Ordering::SeqCst),
            per_session_waiting,
            max_waiting: self.max_waiting_seen.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StratumError;

    #[tokio::test]
    async fn run_write_executes_and_returns_value() {
        let coordinator = WriteLaneCoordinator::new(1);
        let result: Result<i32> = coordinator.run_write("s1", "create", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn same_session_writes_serialize_in_order() {
        let coordinator = Arc::new(WriteLaneCoordinator::new(2));
        let order = Arc::new(AsyncMutex::new(Vec::new()));

        let c1 = coordinator.clone();
        let o1 = order.clone();
        let t1 = tokio::spawn(async move {
            c1.run_write("s1", "op", || async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                o1.lock().await.push(1);
                Ok::<_, StratumError>(())
            })
            .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let c2 = coordinator.clone();
        let o2 = order.clone();
        let t2 = tokio::spawn(async move {
            c2.run_write("s1", "op", || async move {
                o2.lock().await.push(2);
                Ok::<_, StratumError>(())
            })
            .await
        });

        t1.await.unwrap().unwrap();
        t2.await.unwrap().unwrap();
        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn status_reports_configured_concurrency() {
        let coordinator = WriteLaneCoordinator::new(3);
        assert_eq!(coordinator.status().global_concurrency, 3);
    }
}
