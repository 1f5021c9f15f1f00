//! Priority-ordered background job queue: a fixed worker pool drains a
//! min-heap of `ScheduleKey`s, dispatching each popped operation to the
//! executor registered for its `OperationKind`.
//!
//! Grounded on the teacher's decoder worker (`Arc<Mutex<State>>` guarding a
//! `BinaryHeap`, an `AtomicBool` stop flag, a polling loop with backoff on
//! idle) generalized from one fixed job type to a registry of named kinds.

use crate::models::{
    LogEntry, LogLevel, Operation, OperationKind, OperationState, Priority, ScheduleKey,
};
use crate::store::Store;
use shelfkeeper_common::events::{Event, EventHub, EventKind};
use shelfkeeper_common::ids::new_id;
use shelfkeeper_common::{Error, Result};
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Minimum interval between progress-event publishes from one operation's
/// high-frequency inner loop, per §4.9's "MUST NOT publish more than a few
/// progress events per second".
const MIN_PROGRESS_EVENT_INTERVAL: Duration = Duration::from_millis(250);

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type Executor =
    Arc<dyn Fn(OperationContext) -> BoxFuture<Result<serde_json::Value>> + Send + Sync>;

/// Handed to an executor: the parameters it was enqueued with, a progress
/// reporter, and a token to check between units of work.
pub struct OperationContext {
    pub operation_id: String,
    pub params: serde_json::Value,
    pub reporter: ProgressReporter,
    pub cancel: CancellationToken,
}

/// Persists progress/log/status mutations on the Operation record and
/// publishes the matching event, rate-limiting progress publishes to avoid
/// flooding subscribers from a tight inner loop.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Store,
    events: EventHub,
    operation_id: String,
    last_publish: Arc<Mutex<std::time::Instant>>,
}

impl ProgressReporter {
    fn new(store: Store, events: EventHub, operation_id: String) -> Self {
        Self {
            store,
            events,
            operation_id,
            last_publish: Arc::new(Mutex::new(
                std::time::Instant::now() - MIN_PROGRESS_EVENT_INTERVAL,
            )),
        }
    }

    fn load(&self) -> Result<Operation> {
        self.store
            .get_operation(&self.operation_id)?
            .ok_or_else(|| Error::NotFound(format!("operation {}", self.operation_id)))
    }

    pub async fn set_total(&self, total: u64) -> Result<()> {
        let mut op = self.load()?;
        op.progress_total = total;
        self.store.put_operation(op)?;
        self.publish_progress_maybe().await;
        Ok(())
    }

    pub async fn advance(&self, delta: u64) -> Result<()> {
        let mut op = self.load()?;
        op.progress_current += delta;
        self.store.put_operation(op)?;
        self.publish_progress_maybe().await;
        Ok(())
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<()> {
        let mut op = self.load()?;
        let entry = LogEntry {
            seq: op.next_log_seq(),
            level,
            message: message.into(),
            timestamp: chrono::Utc::now(),
            fields: serde_json::json!({}),
        };
        op.logs.push(entry.clone());
        self.store.put_operation(op)?;
        self.events
            .publish(Event::new(
                EventKind::OperationLog,
                Some(self.operation_id.clone()),
                serde_json::json!({ "level": level, "message": entry.message }),
            ))
            .await;
        Ok(())
    }

    pub async fn heartbeat(&self) -> Result<()> {
        let mut op = self.load()?;
        op.last_heartbeat = chrono::Utc::now();
        self.store.put_operation(op)?;
        Ok(())
    }

    /// Always persists (at-least-once on the record); publishes only if the
    /// rate-limit window has elapsed (at-least-once on the broadcast, per
    /// the contract's asymmetric guarantee).
    async fn publish_progress_maybe(&self) {
        let mut last = self.last_publish.lock().await;
        if last.elapsed() < MIN_PROGRESS_EVENT_INTERVAL {
            return;
        }
        *last = std::time::Instant::now();
        drop(last);

        if let Ok(op) = self.load() {
            self.events
                .publish(Event::new(
                    EventKind::OperationProgress,
                    Some(self.operation_id.clone()),
                    serde_json::json!({
                        "current": op.progress_current,
                        "total": op.progress_total,
                    }),
                ))
                .await;
        }
    }
}

struct QueueState {
    heap: BinaryHeap<ScheduleKey>,
}

/// A named background job's executor plus its wall-clock timeout.
struct Registration {
    executor: Executor,
    timeout: Duration,
}

pub struct Queue {
    store: Store,
    events: EventHub,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    registrations: Arc<HashMap<OperationKind, Registration>>,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
    worker_count: usize,
    accepting: Arc<AtomicBool>,
}

/// Default per-kind timeout when a kind has no explicit registration.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

impl Queue {
    pub fn new(
        store: Store,
        events: EventHub,
        worker_count: usize,
        executors: HashMap<OperationKind, (Executor, Duration)>,
    ) -> Self {
        let registrations = executors
            .into_iter()
            .map(|(kind, (executor, timeout))| (kind, Registration { executor, timeout }))
            .collect();

        Self {
            store,
            events,
            state: Arc::new(Mutex::new(QueueState {
                heap: BinaryHeap::new(),
            })),
            notify: Arc::new(Notify::new()),
            registrations: Arc::new(registrations),
            running: Arc::new(Mutex::new(HashMap::new())),
            worker_count: worker_count.max(1),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Crash recovery: any `running` Operation is stale (the process that
    /// owned it is gone) and becomes `failed:stale`; any `queued` Operation
    /// is loaded back onto the heap. Call once at startup, before `start`.
    pub async fn recover(&self) -> Result<()> {
        for mut op in self.store.list_operations_by_state(OperationState::Running)? {
            warn!(operation_id = %op.id, "recovering stale running operation as failed");
            op.state = OperationState::Failed;
            op.error_message = Some("stale".to_string());
            op.finished_at = Some(chrono::Utc::now());
            self.store.put_operation(op)?;
        }

        let mut state = self.state.lock().await;
        for op in self.store.list_operations_by_state(OperationState::Queued)? {
            state.heap.push(ScheduleKey {
                priority: op.priority,
                enqueued_at: op.enqueued_at,
                operation_id: op.id,
            });
        }
        Ok(())
    }

    /// Persist a new `queued` Operation, push it onto the heap, and wake a
    /// worker.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        priority: Priority,
        params: serde_json::Value,
        target_key: Option<String>,
    ) -> Result<String> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::InvalidInput("queue is shutting down".to_string()));
        }
        let id = new_id();
        let mut op = Operation::new(id.clone(), kind, priority);
        op.target_key = target_key;
        op.params = params;
        self.store.create_operation(op.clone())?;

        {
            let mut state = self.state.lock().await;
            state.heap.push(ScheduleKey {
                priority: op.priority,
                enqueued_at: op.enqueued_at,
                operation_id: id.clone(),
            });
        }
        self.notify.notify_one();
        self.publish_status(&id, "queued").await;
        Ok(id)
    }

    /// Sets the cancel-requested flag; a queued operation transitions to
    /// `canceled` immediately, a running one is signaled and transitions
    /// once its executor observes the cancellation.
    pub async fn cancel(&self, operation_id: &str) -> Result<()> {
        let Some(mut op) = self.store.get_operation(operation_id)? else {
            return Err(Error::NotFound(format!("operation {operation_id}")));
        };
        op.cancel_requested = true;

        if op.state == OperationState::Queued {
            op.state = OperationState::Canceled;
            op.finished_at = Some(chrono::Utc::now());
            self.store.put_operation(op)?;
            self.publish_status(operation_id, "canceled").await;
            return Ok(());
        }

        self.store.put_operation(op)?;
        if let Some(token) = self.running.lock().await.get(operation_id) {
            token.cancel();
        }
        Ok(())
    }

    pub fn status(&self, operation_id: &str) -> Result<Operation> {
        self.store
            .get_operation(operation_id)?
            .ok_or_else(|| Error::NotFound(format!("operation {operation_id}")))
    }

    pub fn list_active(&self) -> Result<Vec<Operation>> {
        self.store.list_active_operations()
    }

    pub fn logs(&self, operation_id: &str) -> Result<Vec<LogEntry>> {
        Ok(self.status(operation_id)?.logs)
    }

    /// Stops accepting new jobs, waits up to `grace` for running jobs to
    /// finish on their own, then cancels and marks anything still running
    /// (and anything left queued) as `failed` with reason `shutdown`.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        self.accepting.store(false, Ordering::SeqCst);

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.running.lock().await.is_empty() || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let running = self.running.lock().await;
        for token in running.values() {
            token.cancel();
        }
        drop(running);

        for state in [OperationState::Running, OperationState::Queued] {
            for mut op in self.store.list_operations_by_state(state)? {
                op.state = OperationState::Failed;
                op.error_message = Some("shutdown".to_string());
                op.finished_at = Some(chrono::Utc::now());
                self.store.put_operation(op)?;
            }
        }
        Ok(())
    }

    /// Spawns the fixed worker pool. Each worker polls the shared heap,
    /// idling on the shared `Notify` when empty — mirroring the teacher's
    /// poll-with-backoff loop, but woken eagerly on enqueue rather than
    /// always sleeping a fixed interval.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.worker_count)
            .map(|worker_id| {
                let queue = Arc::clone(&self);
                tokio::spawn(async move {
                    info!(worker_id, "queue worker started");
                    queue.worker_loop(worker_id).await;
                    info!(worker_id, "queue worker stopped");
                })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: usize) {
        loop {
            let next = {
                let mut state = self.state.lock().await;
                state.heap.pop()
            };
            let Some(key) = next else {
                self.notify.notified().await;
                continue;
            };
            if let Err(e) = self.run_one(&key.operation_id).await {
                error!(worker_id, operation_id = %key.operation_id, error = %e, "queue worker failed to run operation");
            }
        }
    }

    async fn run_one(&self, operation_id: &str) -> Result<()> {
        let Some(mut op) = self.store.get_operation(operation_id)? else {
            return Ok(());
        };
        if op.state != OperationState::Queued {
            return Ok(());
        }
        if op.cancel_requested {
            op.state = OperationState::Canceled;
            self.store.put_operation(op)?;
            self.publish_status(operation_id, "canceled").await;
            return Ok(());
        }

        let Some(registration) = self.registrations.get(&op.kind) else {
            op.state = OperationState::Failed;
            op.error_message = Some(format!("no executor registered for {}", op.kind.as_str()));
            self.store.put_operation(op)?;
            self.publish_status(operation_id, "failed").await;
            return Ok(());
        };

        let params = op.params.clone();

        op.state = OperationState::Running;
        op.started_at = Some(chrono::Utc::now());
        self.store.put_operation(op.clone())?;
        self.publish_status(operation_id, "running").await;

        let token = CancellationToken::new();
        self.running
            .lock()
            .await
            .insert(operation_id.to_string(), token.clone());

        let reporter = ProgressReporter::new(self.store.clone(), self.events.clone(), operation_id.to_string());
        let ctx = OperationContext {
            operation_id: operation_id.to_string(),
            params,
            reporter,
            cancel: token.clone(),
        };

        let outcome = tokio::select! {
            result = (registration.executor)(ctx) => RunOutcome::Finished(result),
            _ = token.cancelled() => RunOutcome::Canceled,
            _ = tokio::time::sleep(registration.timeout) => RunOutcome::TimedOut,
        };

        self.running.lock().await.remove(operation_id);

        let mut op = self
            .store
            .get_operation(operation_id)?
            .ok_or_else(|| Error::NotFound(format!("operation {operation_id}")))?;
        op.finished_at = Some(chrono::Utc::now());

        match outcome {
            RunOutcome::Finished(Ok(summary)) => {
                op.state = OperationState::Completed;
                op.result_summary = Some(summary);
                self.store.put_operation(op)?;
                self.publish_status(operation_id, "completed").await;
            }
            RunOutcome::Finished(Err(e)) => {
                op.state = OperationState::Failed;
                op.error_message = Some(e.to_string());
                self.store.put_operation(op)?;
                self.publish_status(operation_id, "failed").await;
            }
            RunOutcome::Canceled => {
                op.state = OperationState::Canceled;
                self.store.put_operation(op)?;
                self.publish_status(operation_id, "canceled").await;
            }
            RunOutcome::TimedOut => {
                op.state = OperationState::Failed;
                op.error_message = Some("timeout".to_string());
                self.store.put_operation(op)?;
                self.publish_status(operation_id, "failed").await;
            }
        }

        Ok(())
    }

    async fn publish_status(&self, operation_id: &str, state: &str) {
        self.events
            .publish(Event::new(
                EventKind::OperationStatus,
                Some(operation_id.to_string()),
                serde_json::json!({ "state": state }),
            ))
            .await;
    }
}

enum RunOutcome {
    Finished(Result<serde_json::Value>),
    Canceled,
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    fn noop_executor() -> Executor {
        Arc::new(|_ctx| Box::pin(async move { Ok(serde_json::json!({"ok": true})) }))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueued_operation_runs_to_completion() {
        let (_d, store) = open_store();
        let events = EventHub::new(32, StdDuration::from_secs(3600));
        let mut executors = HashMap::new();
        executors.insert(
            OperationKind::Backup,
            (noop_executor(), StdDuration::from_secs(5)),
        );
        let queue = Arc::new(Queue::new(store.clone(), events, 2, executors));
        queue.recover().await.unwrap();
        let handles = Arc::clone(&queue).start();

        let id = queue
            .enqueue(OperationKind::Backup, Priority::Normal, serde_json::json!({}), None)
            .await
            .unwrap();

        let mut op = queue.status(&id).unwrap();
        for _ in 0..50 {
            if op.state == OperationState::Completed {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            op = queue.status(&id).unwrap();
        }
        assert_eq!(op.state, OperationState::Completed);
        for h in handles {
            h.abort();
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn canceling_a_queued_operation_skips_execution() {
        let (_d, store) = open_store();
        let events = EventHub::new(32, StdDuration::from_secs(3600));
        let mut executors = HashMap::new();
        executors.insert(
            OperationKind::Backup,
            (noop_executor(), StdDuration::from_secs(5)),
        );
        let queue = Queue::new(store, events, 1, executors);
        // Never started: the enqueued operation stays queued until canceled.
        let id = queue
            .enqueue(OperationKind::Backup, Priority::Low, serde_json::json!({}), None)
            .await
            .unwrap();
        queue.cancel(&id).await.unwrap();
        assert_eq!(queue.status(&id).unwrap().state, OperationState::Canceled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn crash_recovery_fails_stale_running_and_requeues_queued() {
        let (_d, store) = open_store();
        let mut running = Operation::new(new_id(), OperationKind::Scan, Priority::Normal);
        running.state = OperationState::Running;
        store.create_operation(running.clone()).unwrap();

        let queued = Operation::new(new_id(), OperationKind::Scan, Priority::Normal);
        store.create_operation(queued.clone()).unwrap();

        let events = EventHub::new(32, StdDuration::from_secs(3600));
        let queue = Queue::new(store.clone(), events, 1, HashMap::new());
        queue.recover().await.unwrap();

        let recovered = store.get_operation(&running.id).unwrap().unwrap();
        assert_eq!(recovered.state, OperationState::Failed);
        assert_eq!(recovered.error_message.as_deref(), Some("stale"));

        let state = queue.state.lock().await;
        assert!(state.heap.iter().any(|k| k.operation_id == queued.id));
    }
}
