//! Bounded classification pool.
//!
//! The scheduler owns the row store for the length of a run:
//! 1. Pending row indices are admitted in input order, at most N at a time
//! 2. Each admitted row is cloned into a task that retries on its own
//! 3. Task outcomes come back through the `JoinSet` and are applied here, one at a time
//! 4. Terminal outcomes feed the checkpoint manager

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointManager;
use crate::domain::{Classification, ClassificationStatus, LossType, PostRow};
use crate::error::Result;
use crate::llm::{Classifier, ClassifyError};
use crate::scheduler::rate_limit::SharedRateLimit;
use crate::scheduler::retry::RetryPolicy;
use crate::store::RowStore;

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum rows in flight (values below 1 are treated as 1).
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    /// Limit for a single classify call; exceeding it is a transient failure.
    pub request_timeout: Duration,
    /// How long in-flight calls may run after a stop before they are aborted.
    pub shutdown_grace: Duration,
    /// Stop the run after this many failed rows in a row (0 = never).
    pub max_consecutive_failures: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(30),
            max_consecutive_failures: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = n;
        self
    }
}

/// Progress notifications for operator output.
#[derive(Debug, Clone, PartialEq)]
pub enum RowEvent {
    Started {
        id: String,
    },
    Retrying {
        id: String,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    Done {
        id: String,
        attempts: u32,
        present: Vec<LossType>,
    },
    Failed {
        id: String,
        attempts: u32,
        reason: String,
    },
    Checkpointed {
        done: usize,
        total: usize,
    },
}

/// Why the scheduler returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Queue empty and nothing in flight
    Drained,
    /// The caller's cancellation token fired
    Interrupted,
    /// A systemic failure stopped admission
    Fatal(String),
}

/// Counts for rows this scheduler run touched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerReport {
    pub completed: usize,
    pub failed: usize,
    /// Rows returned to pending (cancelled, aborted, or the fatal row itself)
    pub abandoned: usize,
    pub stop: StopReason,
}

/// What a task hands back to the coordinator
#[derive(Debug)]
enum TaskOutcome {
    Done { classification: Classification, attempts: u32 },
    Failed { reason: String, attempts: u32 },
    Fatal { reason: String },
    Abandoned,
}

/// Runs classification over a queue of rows with bounded concurrency
pub struct Scheduler {
    classifier: Arc<dyn Classifier>,
    config: SchedulerConfig,
    rate_limit: SharedRateLimit,
}

impl Scheduler {
    pub fn new(classifier: Arc<dyn Classifier>, config: SchedulerConfig) -> Self {
        Self {
            classifier,
            config,
            rate_limit: SharedRateLimit::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn rate_limit(&self) -> SharedRateLimit {
        self.rate_limit.clone()
    }

    /// Classify every queued row, applying results to `store`.
    ///
    /// `queue` holds row indices in the order they should be admitted.
    /// Only checkpoint write failures are returned as errors; row-level
    /// failures are recorded on the rows.
    pub async fn run(
        &self,
        store: &mut RowStore,
        queue: Vec<usize>,
        checkpoint: &mut CheckpointManager,
        cancel: &CancellationToken,
        events: Option<&UnboundedSender<RowEvent>>,
    ) -> Result<SchedulerReport> {
        let halt = cancel.child_token();
        let max_concurrent = self.config.max_concurrent.max(1);

        let mut queue: VecDeque<usize> = queue.into();
        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        let mut in_flight: HashMap<Id, usize> = HashMap::new();

        let mut coordinator = Coordinator {
            store,
            checkpoint,
            events,
            halt: &halt,
            max_consecutive_failures: self.config.max_consecutive_failures,
            consecutive_failures: 0,
            fatal: None,
            completed: 0,
            failed: 0,
            abandoned: 0,
        };

        info!(
            "Scheduling {} rows with {} (max {} concurrent)",
            queue.len(),
            self.classifier.name(),
            max_concurrent
        );

        let mut drain_deadline: Option<Instant> = None;
        loop {
            while !halt.is_cancelled() && tasks.len() < max_concurrent {
                let Some(index) = queue.pop_front() else { break };
                let Some(snapshot) = coordinator.admit(index) else { continue };

                let worker = Worker {
                    classifier: self.classifier.clone(),
                    retry: self.config.retry.clone(),
                    request_timeout: self.config.request_timeout,
                    rate_limit: self.rate_limit.clone(),
                    halt: halt.clone(),
                    events: events.cloned(),
                };
                let handle = tasks.spawn(worker.run(snapshot));
                in_flight.insert(handle.id(), index);
            }

            if tasks.is_empty() {
                break;
            }

            let joined = if halt.is_cancelled() {
                let deadline = *drain_deadline.get_or_insert_with(|| {
                    info!(
                        "Stopping: waiting up to {}s for {} in-flight rows",
                        self.config.shutdown_grace.as_secs(),
                        tasks.len()
                    );
                    Instant::now() + self.config.shutdown_grace
                });
                match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!("Grace period elapsed, aborting {} in-flight rows", tasks.len());
                        tasks.abort_all();
                        while let Some(joined) = tasks.join_next_with_id().await {
                            coordinator.apply_joined(joined, &mut in_flight)?;
                        }
                        break;
                    }
                }
            } else {
                tokio::select! {
                    joined = tasks.join_next_with_id() => joined,
                    _ = halt.cancelled() => continue,
                }
            };

            let Some(joined) = joined else { break };
            coordinator.apply_joined(joined, &mut in_flight)?;
        }

        let stop = match coordinator.fatal.take() {
            Some(reason) => StopReason::Fatal(reason),
            None if cancel.is_cancelled() => StopReason::Interrupted,
            None => StopReason::Drained,
        };

        Ok(SchedulerReport {
            completed: coordinator.completed,
            failed: coordinator.failed,
            abandoned: coordinator.abandoned,
            stop,
        })
    }
}

/// The single writer of row state during a run
struct Coordinator<'a> {
    store: &'a mut RowStore,
    checkpoint: &'a mut CheckpointManager,
    events: Option<&'a UnboundedSender<RowEvent>>,
    halt: &'a CancellationToken,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    fatal: Option<String>,
    completed: usize,
    failed: usize,
    abandoned: usize,
}

impl Coordinator<'_> {
    fn emit(&self, event: RowEvent) {
        if let Some(tx) = self.events {
            let _ = tx.send(event);
        }
    }

    /// Mark a queued row in progress and hand back the copy its task will own
    fn admit(&mut self, index: usize) -> Option<PostRow> {
        let row = self.store.get_mut(index)?;
        if row.status != ClassificationStatus::Pending {
            debug!("Skipping row {} ({}): already {}", index, row.id, row.status);
            return None;
        }
        row.mark_in_progress();
        let snapshot = row.clone();
        self.emit(RowEvent::Started { id: snapshot.id.clone() });
        Some(snapshot)
    }

    fn apply_joined(
        &mut self,
        joined: std::result::Result<(Id, TaskOutcome), JoinError>,
        in_flight: &mut HashMap<Id, usize>,
    ) -> Result<()> {
        match joined {
            Ok((id, outcome)) => {
                if let Some(index) = in_flight.remove(&id) {
                    self.apply(index, outcome)?;
                }
            }
            Err(join_error) => {
                let Some(index) = in_flight.remove(&join_error.id()) else {
                    return Ok(());
                };
                if join_error.is_cancelled() {
                    self.apply(index, TaskOutcome::Abandoned)?;
                } else {
                    error!("Classification task for row {} panicked: {}", index, join_error);
                    self.apply(
                        index,
                        TaskOutcome::Failed {
                            reason: "classification task panicked".to_string(),
                            attempts: 1,
                        },
                    )?;
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, index: usize, outcome: TaskOutcome) -> Result<()> {
        let Some(row) = self.store.get_mut(index) else {
            return Ok(());
        };

        match outcome {
            TaskOutcome::Done {
                classification,
                attempts,
            } => {
                let present = classification.loss.present_types();
                row.complete(classification, attempts);
                let id = row.id.clone();
                self.completed += 1;
                self.consecutive_failures = 0;
                debug!("Row {} done after {} attempt(s)", id, attempts);
                self.emit(RowEvent::Done { id, attempts, present });
                self.record_completion()?;
            }
            TaskOutcome::Failed { reason, attempts } => {
                row.fail(reason.clone(), attempts);
                let id = row.id.clone();
                self.failed += 1;
                self.consecutive_failures += 1;
                warn!("Row {} failed after {} attempt(s): {}", id, attempts, reason);
                self.emit(RowEvent::Failed { id, attempts, reason });
                self.record_completion()?;

                if self.max_consecutive_failures > 0
                    && self.consecutive_failures >= self.max_consecutive_failures
                    && self.fatal.is_none()
                {
                    self.stop(format!(
                        "{} consecutive rows failed; last error: {}",
                        self.consecutive_failures,
                        row_error(self.store.get(index))
                    ));
                }
            }
            TaskOutcome::Fatal { reason } => {
                row.reset_pending();
                self.abandoned += 1;
                error!("Fatal error on row {}: {}", row.id, reason);
                if self.fatal.is_none() {
                    self.stop(reason);
                }
            }
            TaskOutcome::Abandoned => {
                row.reset_pending();
                self.abandoned += 1;
                debug!("Row {} returned to pending", row.id);
            }
        }
        Ok(())
    }

    fn stop(&mut self, reason: String) {
        self.fatal = Some(reason);
        self.halt.cancel();
    }

    fn record_completion(&mut self) -> Result<()> {
        if self.checkpoint.record_completion(self.store)? {
            let counts = self.store.counts();
            self.emit(RowEvent::Checkpointed {
                done: counts.done,
                total: counts.total(),
            });
        }
        Ok(())
    }
}

fn row_error(row: Option<&PostRow>) -> &str {
    row.and_then(|r| r.error_detail.as_deref()).unwrap_or("unknown")
}

/// Everything a task needs, owned
struct Worker {
    classifier: Arc<dyn Classifier>,
    retry: RetryPolicy,
    request_timeout: Duration,
    rate_limit: SharedRateLimit,
    halt: CancellationToken,
    events: Option<UnboundedSender<RowEvent>>,
}

impl Worker {
    async fn run(self, row: PostRow) -> TaskOutcome {
        let mut attempts = 0;
        loop {
            if let Some(wait) = self.rate_limit.remaining_backoff() {
                if !self.sleep_unless_halted(wait).await {
                    return TaskOutcome::Abandoned;
                }
            }
            if self.halt.is_cancelled() {
                return TaskOutcome::Abandoned;
            }

            attempts += 1;
            let result = match tokio::time::timeout(self.request_timeout, self.classifier.classify(&row)).await {
                Ok(result) => result,
                Err(_) => Err(ClassifyError::transient(format!(
                    "request timed out after {}s",
                    self.request_timeout.as_secs_f64()
                ))),
            };

            let err = match result {
                Ok(classification) => {
                    self.rate_limit.record_success();
                    return TaskOutcome::Done {
                        classification,
                        attempts,
                    };
                }
                Err(ClassifyError::Fatal(reason)) => return TaskOutcome::Fatal { reason },
                Err(ClassifyError::Permanent(reason)) => return TaskOutcome::Failed { reason, attempts },
                Err(err) => err,
            };

            if let Some(retry_after) = err.retry_after() {
                self.rate_limit.record_rate_limit(retry_after, self.retry.max_delay);
            }
            if !self.retry.allows_retry(attempts) {
                return TaskOutcome::Failed {
                    reason: err.to_string(),
                    attempts,
                };
            }

            let delay = self.retry.delay_for(attempts);
            debug!(
                "Row {} attempt {} failed ({}), retrying in {:?}",
                row.id, attempts, err, delay
            );
            if let Some(tx) = &self.events {
                let _ = tx.send(RowEvent::Retrying {
                    id: row.id.clone(),
                    attempt: attempts,
                    delay,
                    reason: err.to_string(),
                });
            }
            if !self.sleep_unless_halted(delay).await {
                return TaskOutcome::Abandoned;
            }
        }
    }

    /// Returns false when the run was stopped during the wait
    async fn sleep_unless_halted(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.halt.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LossAssessment, LossFields, Platform, ScalarFields};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn classification() -> Classification {
        let loss = LossFields::from_entries(
            LossType::ALL
                .iter()
                .map(|t| (*t, LossAssessment::new(Some(false), Some(0.3)))),
        )
        .unwrap();
        Classification {
            loss,
            scalars: ScalarFields::default(),
        }
    }

    /// Replays a fixed list of results per call, then succeeds
    struct Scripted {
        script: Mutex<VecDeque<std::result::Result<(), ClassifyError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(script: Vec<std::result::Result<(), ClassifyError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Classifier for Scripted {
        async fn classify(&self, row: &PostRow) -> std::result::Result<Classification, ClassifyError> {
            self.calls.lock().unwrap().push(row.id.clone());
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            next.map(|_| classification())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn store(n: usize) -> RowStore {
        let mut csv = String::from("id,title\n");
        for i in 1..=n {
            csv.push_str(&format!("{},post {}\n", i, i));
        }
        RowStore::from_reader(csv.as_bytes(), &Platform::Tiktok.default_columns(), Path::new("in.csv")).unwrap()
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_max_concurrent(1)
            .with_retry(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_all_rows_done() {
        let temp = TempDir::new().unwrap();
        let mut store = store(3);
        let mut checkpoint = CheckpointManager::new(temp.path().join("out.csv"), 0);
        let scheduler = Scheduler::new(Arc::new(Scripted::new(vec![])), config());

        let report = scheduler
            .run(&mut store, vec![0, 1, 2], &mut checkpoint, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(report.completed, 3);
        assert_eq!(report.stop, StopReason::Drained);
        assert_eq!(store.counts().done, 3);
    }

    #[tokio::test]
    async fn test_transient_then_success_counts_attempts() {
        let temp = TempDir::new().unwrap();
        let mut store = store(1);
        let mut checkpoint = CheckpointManager::new(temp.path().join("out.csv"), 0);
        let classifier = Arc::new(Scripted::new(vec![
            Err(ClassifyError::transient("timeout")),
            Err(ClassifyError::transient("timeout")),
        ]));
        let scheduler = Scheduler::new(classifier.clone(), config());

        scheduler
            .run(&mut store, vec![0], &mut checkpoint, &CancellationToken::new(), None)
            .await
            .unwrap();

        let row = store.get(0).unwrap();
        assert!(row.is_done());
        assert_eq!(row.attempts, 3);
        assert_eq!(classifier.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_fails_after_one_call() {
        let temp = TempDir::new().unwrap();
        let mut store = store(1);
        let mut checkpoint = CheckpointManager::new(temp.path().join("out.csv"), 0);
        let classifier = Arc::new(Scripted::new(vec![Err(ClassifyError::permanent("unsupported media"))]));
        let scheduler = Scheduler::new(classifier.clone(), config());

        let report = scheduler
            .run(&mut store, vec![0], &mut checkpoint, &CancellationToken::new(), None)
            .await
            .unwrap();

        let row = store.get(0).unwrap();
        assert_eq!(row.status, ClassificationStatus::Failed);
        assert_eq!(row.error_detail.as_deref(), Some("unsupported media"));
        assert_eq!(report.failed, 1);
        assert_eq!(classifier.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_stops_admission() {
        let temp = TempDir::new().unwrap();
        let mut store = store(4);
        let mut checkpoint = CheckpointManager::new(temp.path().join("out.csv"), 0);
        let classifier = Arc::new(Scripted::new(vec![Ok(()), Err(ClassifyError::fatal("401 Unauthorized"))]));
        let scheduler = Scheduler::new(classifier.clone(), config());
        let cancel = CancellationToken::new();

        let report = scheduler
            .run(&mut store, vec![0, 1, 2, 3], &mut checkpoint, &cancel, None)
            .await
            .unwrap();

        assert_eq!(report.stop, StopReason::Fatal("401 Unauthorized".to_string()));
        assert_eq!(store.get(0).unwrap().status, ClassificationStatus::Done);
        for i in 1..4 {
            assert_eq!(store.get(i).unwrap().status, ClassificationStatus::Pending);
        }
        assert_eq!(classifier.calls.lock().unwrap().len(), 2);
        // the caller's token is untouched
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_consecutive_failures_stop_run() {
        let temp = TempDir::new().unwrap();
        let mut store = store(5);
        let mut checkpoint = CheckpointManager::new(temp.path().join("out.csv"), 0);
        let classifier = Arc::new(Scripted::new(vec![
            Err(ClassifyError::permanent("bad")),
            Err(ClassifyError::permanent("bad")),
        ]));
        let scheduler = Scheduler::new(classifier, config().with_max_consecutive_failures(2));

        let report = scheduler
            .run(&mut store, (0..5).collect(), &mut checkpoint, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert!(matches!(report.stop, StopReason::Fatal(_)));
        assert_eq!(store.counts().failed, 2);
        assert_eq!(store.counts().pending, 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_touches_nothing() {
        let temp = TempDir::new().unwrap();
        let mut store = store(3);
        let mut checkpoint = CheckpointManager::new(temp.path().join("out.csv"), 0);
        let classifier = Arc::new(Scripted::new(vec![]));
        let scheduler = Scheduler::new(classifier.clone(), config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = scheduler
            .run(&mut store, vec![0, 1, 2], &mut checkpoint, &cancel, None)
            .await
            .unwrap();

        assert_eq!(report.stop, StopReason::Interrupted);
        assert_eq!(store.counts().pending, 3);
        assert!(classifier.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_are_reported() {
        let temp = TempDir::new().unwrap();
        let mut store = store(1);
        let mut checkpoint = CheckpointManager::new(temp.path().join("out.csv"), 1);
        let classifier = Arc::new(Scripted::new(vec![Err(ClassifyError::transient("busy"))]));
        let scheduler = Scheduler::new(classifier, config());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        scheduler
            .run(&mut store, vec![0], &mut checkpoint, &CancellationToken::new(), Some(&tx))
            .await
            .unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events[0], RowEvent::Started { .. }));
        assert!(matches!(events[1], RowEvent::Retrying { attempt: 1, .. }));
        assert!(matches!(events[2], RowEvent::Done { attempts: 2, .. }));
        assert_eq!(events[3], RowEvent::Checkpointed { done: 1, total: 1 });
    }
}
