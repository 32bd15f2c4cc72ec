//! Priority execution queue with a global concurrency cap.
//!
//! Entries wait in `pending` (highest priority first, FIFO among equals)
//! until a tick promotes them into `running`. A finished entry moves to
//! `completed` when its execution succeeded and to `failed` otherwise.
//! Both histories are trimmed to `history_limit` on every tick.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use devflow_types::execution::{
    ExecutionResult, ExecutionStatus, FinishedExecution, QueueStats, QueuedExecution,
};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::engine::panic_message;

/// Runs one promoted entry to completion. `Err` means the execution was
/// rejected before it started.
pub type ExecutionRunner =
    Arc<dyn Fn(QueuedExecution) -> BoxFuture<'static, Result<ExecutionResult, String>> + Send + Sync>;

/// Point-in-time copy of the four queue lists.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub pending: Vec<QueuedExecution>,
    pub running: Vec<QueuedExecution>,
    pub completed: Vec<FinishedExecution>,
    pub failed: Vec<FinishedExecution>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedExecution>,
    running: Vec<QueuedExecution>,
    completed: VecDeque<FinishedExecution>,
    failed: VecDeque<FinishedExecution>,
}

impl QueueState {
    fn trim(&mut self, limit: usize) {
        while self.completed.len() > limit {
            self.completed.pop_front();
        }
        while self.failed.len() > limit {
            self.failed.pop_front();
        }
    }
}

/// Shared execution queue. Use behind an `Arc`.
pub struct ExecutionQueue {
    state: Mutex<QueueState>,
    max_concurrent: usize,
    tick_interval: Duration,
    history_limit: usize,
    shutdown: CancellationToken,
}

impl ExecutionQueue {
    pub fn new(max_concurrent: usize, tick_interval: Duration, history_limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_concurrent: max_concurrent.max(1),
            tick_interval,
            history_limit,
            shutdown: CancellationToken::new(),
        }
    }

    /// Insert by descending priority, after every entry of equal priority.
    pub async fn add(&self, entry: QueuedExecution) -> Uuid {
        let id = entry.id;
        let mut state = self.state.lock().await;
        let index = state
            .pending
            .iter()
            .position(|e| e.priority < entry.priority)
            .unwrap_or(state.pending.len());
        tracing::debug!(
            queued_id = %id,
            workflow_id = %entry.workflow_id,
            priority = entry.priority,
            position = index,
            "execution queued"
        );
        state.pending.insert(index, entry);
        id
    }

    /// One promotion pass. Returns how many entries were started.
    ///
    /// Promotion stops at the first entry that is not yet due, so a delayed
    /// entry holds back everything queued behind it.
    pub async fn tick(self: &Arc<Self>, runner: &ExecutionRunner) -> usize {
        let mut promoted = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.trim(self.history_limit);

            let now = Utc::now();
            while state.running.len() < self.max_concurrent {
                let Some(entry) = state.pending.pop_front() else {
                    break;
                };
                if entry.scheduled_at > now {
                    state.pending.push_front(entry);
                    break;
                }
                state.running.push(entry.clone());
                promoted.push(entry);
            }
        }

        let count = promoted.len();
        for entry in promoted {
            let queue = Arc::clone(self);
            let runner = Arc::clone(runner);
            tokio::spawn(async move {
                let id = entry.id;
                let outcome = match AssertUnwindSafe(runner(entry)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(queued_id = %id, panic = %message, "queued execution panicked");
                        Err(format!("execution panicked: {message}"))
                    }
                };
                queue.finish(id, outcome).await;
            });
        }
        if count > 0 {
            tracing::debug!(promoted = count, "queue tick");
        }
        count
    }

    /// Promote on every tick interval until [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>, runner: ExecutionRunner) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(queue.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(
                max_concurrent = queue.max_concurrent,
                tick_ms = queue.tick_interval.as_millis() as u64,
                "execution queue started"
            );
            loop {
                tokio::select! {
                    _ = queue.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        queue.tick(&runner).await;
                    }
                }
            }
            tracing::info!("execution queue stopped");
        })
    }

    /// Stop the tick loop. Running entries finish normally.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Remove a pending entry, recording it as cancelled.
    pub async fn cancel_pending(&self, id: Uuid) -> bool {
        let mut state = self.state.lock().await;
        let Some(index) = state.pending.iter().position(|e| e.id == id) else {
            return false;
        };
        let Some(entry) = state.pending.remove(index) else {
            return false;
        };
        state.failed.push_back(FinishedExecution {
            entry,
            status: ExecutionStatus::Cancelled,
            finished_at: Utc::now(),
            error: Some("cancelled before start".to_string()),
        });
        tracing::info!(queued_id = %id, "pending execution cancelled");
        true
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            pending: state.pending.len(),
            running: state.running.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
        }
    }

    /// Position in `pending` (0 is next).
    pub async fn position(&self, id: Uuid) -> Option<usize> {
        self.state
            .lock()
            .await
            .pending
            .iter()
            .position(|e| e.id == id)
    }

    /// A pending entry together with its position.
    pub async fn locate_pending(&self, id: Uuid) -> Option<(usize, QueuedExecution)> {
        self.state
            .lock()
            .await
            .pending
            .iter()
            .enumerate()
            .find(|(_, e)| e.id == id)
            .map(|(i, e)| (i, e.clone()))
    }

    /// An entry that has been promoted and has not finished yet.
    pub async fn locate_running(&self, id: Uuid) -> Option<QueuedExecution> {
        self.state
            .lock()
            .await
            .running
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// History record of a finished entry, if still retained.
    pub async fn finished(&self, id: Uuid) -> Option<FinishedExecution> {
        let state = self.state.lock().await;
        state
            .completed
            .iter()
            .chain(state.failed.iter())
            .find(|f| f.entry.id == id)
            .cloned()
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        QueueSnapshot {
            pending: state.pending.iter().cloned().collect(),
            running: state.running.clone(),
            completed: state.completed.iter().cloned().collect(),
            failed: state.failed.iter().cloned().collect(),
        }
    }

    async fn finish(&self, id: Uuid, outcome: Result<ExecutionResult, String>) {
        let mut state = self.state.lock().await;
        let Some(index) = state.running.iter().position(|e| e.id == id) else {
            return;
        };
        let entry = state.running.swap_remove(index);
        let (status, error) = match outcome {
            Ok(result) => (result.status, result.error),
            Err(e) => (ExecutionStatus::Failure, Some(e)),
        };
        let record = FinishedExecution {
            entry,
            status,
            finished_at: Utc::now(),
            error,
        };
        if status == ExecutionStatus::Success {
            state.completed.push_back(record);
        } else {
            tracing::debug!(queued_id = %id, %status, "queued execution did not succeed");
            state.failed.push_back(record);
        }
    }
}

impl std::fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionQueue")
            .field("max_concurrent", &self.max_concurrent)
            .field("tick_interval", &self.tick_interval)
            .field("history_limit", &self.history_limit)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_types::execution::TriggerEvent;
    use tokio::sync::Semaphore;

    fn entry(priority: i32) -> QueuedExecution {
        QueuedExecution::new(Uuid::now_v7(), TriggerEvent::manual()).with_priority(priority)
    }

    fn result_for(entry: &QueuedExecution, status: ExecutionStatus) -> ExecutionResult {
        let now = Utc::now();
        ExecutionResult {
            execution_id: entry.id,
            workflow_id: entry.workflow_id,
            status,
            started_at: now,
            completed_at: now,
            duration_ms: 0,
            step_results: vec![],
            error: None,
            dry_run: false,
        }
    }

    /// Runner that blocks until the gate hands out a permit.
    fn gated_runner(gate: Arc<Semaphore>) -> ExecutionRunner {
        Arc::new(move |entry: QueuedExecution| {
            let gate = Arc::clone(&gate);
            Box::pin(async move {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
                Ok(result_for(&entry, ExecutionStatus::Success))
            })
        })
    }

    fn status_runner(status: ExecutionStatus) -> ExecutionRunner {
        Arc::new(move |entry: QueuedExecution| {
            Box::pin(async move { Ok(result_for(&entry, status)) })
        })
    }

    async fn settle(queue: &ExecutionQueue, expected_running: usize) {
        for _ in 0..100 {
            if queue.stats().await.running == expected_running {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("queue did not settle at {expected_running} running");
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let queue = ExecutionQueue::new(5, Duration::from_secs(1), 100);
        let low_a = queue.add(entry(0)).await;
        let low_b = queue.add(entry(0)).await;
        let high = queue.add(entry(5)).await;
        let low_c = queue.add(entry(0)).await;
        let mid = queue.add(entry(2)).await;

        let order: Vec<Uuid> = queue.snapshot().await.pending.iter().map(|e| e.id).collect();
        assert_eq!(order, vec![high, mid, low_a, low_b, low_c]);
        assert_eq!(queue.position(low_b).await, Some(3));
        assert_eq!(queue.position(Uuid::now_v7()).await, None);
    }

    // -----------------------------------------------------------------------
    // Promotion
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_cap_limits_running() {
        let queue = Arc::new(ExecutionQueue::new(5, Duration::from_secs(1), 100));
        let gate = Arc::new(Semaphore::new(0));
        let runner = gated_runner(Arc::clone(&gate));
        for _ in 0..8 {
            queue.add(entry(0)).await;
        }

        assert_eq!(queue.tick(&runner).await, 5);
        assert_eq!(queue.tick(&runner).await, 0);
        let stats = queue.stats().await;
        assert_eq!((stats.pending, stats.running), (3, 5));

        gate.add_permits(5);
        settle(&queue, 0).await;
        assert_eq!(queue.stats().await.completed, 5);

        assert_eq!(queue.tick(&runner).await, 3);
        gate.add_permits(3);
        settle(&queue, 0).await;
        assert_eq!(queue.stats().await.completed, 8);
    }

    #[tokio::test]
    async fn test_not_yet_due_entry_stops_promotion() {
        let queue = Arc::new(ExecutionQueue::new(5, Duration::from_secs(1), 100));
        let later = entry(9).scheduled_at(Utc::now() + chrono::Duration::hours(1));
        let later_id = queue.add(later).await;
        queue.add(entry(0)).await;

        let runner = status_runner(ExecutionStatus::Success);
        assert_eq!(queue.tick(&runner).await, 0);
        assert_eq!(queue.position(later_id).await, Some(0));
        assert_eq!(queue.stats().await.pending, 2);
    }

    #[tokio::test]
    async fn test_failures_and_rejections_go_to_failed() {
        let queue = Arc::new(ExecutionQueue::new(5, Duration::from_secs(1), 100));
        let timed_out = queue.add(entry(0)).await;
        queue.tick(&status_runner(ExecutionStatus::Timeout)).await;
        settle(&queue, 0).await;

        let rejected = queue.add(entry(0)).await;
        let reject: ExecutionRunner =
            Arc::new(|_entry| Box::pin(async { Err("workflow disabled".to_string()) }));
        queue.tick(&reject).await;
        settle(&queue, 0).await;

        assert_eq!(queue.finished(timed_out).await.unwrap().status, ExecutionStatus::Timeout);
        let record = queue.finished(rejected).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failure);
        assert_eq!(record.error.as_deref(), Some("workflow disabled"));
        assert_eq!(queue.stats().await.failed, 2);
    }

    #[tokio::test]
    async fn test_panicking_runner_frees_its_slot() {
        let queue = Arc::new(ExecutionQueue::new(1, Duration::from_secs(1), 100));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let runner: ExecutionRunner = {
            let calls = Arc::clone(&calls);
            Arc::new(move |entry: QueuedExecution| {
                let first = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0;
                Box::pin(async move {
                    if first {
                        panic!("repository exploded");
                    }
                    Ok(result_for(&entry, ExecutionStatus::Success))
                })
            })
        };
        let doomed = queue.add(entry(0)).await;
        let next = queue.add(entry(0)).await;

        assert_eq!(queue.tick(&runner).await, 1);
        settle(&queue, 0).await;
        let record = queue.finished(doomed).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failure);
        assert!(record.error.unwrap().contains("repository exploded"));

        assert_eq!(queue.tick(&runner).await, 1);
        settle(&queue, 0).await;
        assert_eq!(queue.finished(next).await.unwrap().status, ExecutionStatus::Success);
        assert_eq!(queue.stats().await.running, 0);
    }

    #[tokio::test]
    async fn test_locate_running() {
        let queue = Arc::new(ExecutionQueue::new(1, Duration::from_secs(1), 100));
        let gate = Arc::new(Semaphore::new(0));
        let id = queue.add(entry(0)).await;
        assert!(queue.locate_running(id).await.is_none());

        queue.tick(&gated_runner(Arc::clone(&gate))).await;
        assert_eq!(queue.locate_running(id).await.map(|e| e.id), Some(id));

        gate.add_permits(1);
        settle(&queue, 0).await;
        assert!(queue.locate_running(id).await.is_none());
    }

    #[tokio::test]
    async fn test_history_trimmed_on_tick() {
        let queue = Arc::new(ExecutionQueue::new(5, Duration::from_secs(1), 2));
        let runner = status_runner(ExecutionStatus::Success);
        for _ in 0..4 {
            queue.add(entry(0)).await;
        }
        queue.tick(&runner).await;
        settle(&queue, 0).await;
        assert_eq!(queue.stats().await.completed, 4);

        queue.tick(&runner).await;
        assert_eq!(queue.stats().await.completed, 2);
    }

    // -----------------------------------------------------------------------
    // Cancellation and lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancel_pending() {
        let queue = ExecutionQueue::new(5, Duration::from_secs(1), 100);
        let id = queue.add(entry(0)).await;

        assert!(queue.cancel_pending(id).await);
        assert!(!queue.cancel_pending(id).await);
        let record = queue.finished(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Cancelled);
        assert_eq!(queue.stats().await.pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_loop_promotes_and_stops() {
        let queue = Arc::new(ExecutionQueue::new(2, Duration::from_millis(100), 100));
        for _ in 0..3 {
            queue.add(entry(0)).await;
        }
        let handle = queue.start(status_runner(ExecutionStatus::Success));

        tokio::time::sleep(Duration::from_millis(350)).await;
        settle(&queue, 0).await;
        assert_eq!(queue.stats().await.completed, 3);

        queue.shutdown();
        handle.await.unwrap();
    }
}
