//! Run controller - drives one input table from load to final checkpoint.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointManager, DEFAULT_EVERY_ROWS, DEFAULT_MARKER, output_path_for};
use crate::domain::{ClassificationStatus, ColumnMapping};
use crate::error::{FloodnelError, Result};
use crate::llm::Classifier;
use crate::scheduler::{RowEvent, Scheduler, SchedulerConfig, StopReason};
use crate::store::RowStore;

/// What to process in a single run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    /// Defaults to `<stem>_<marker>.csv` next to the input
    pub output: Option<PathBuf>,
    pub start_offset: usize,
    /// Cap on rows considered, counted from `start_offset`
    pub max_rows: Option<usize>,
    /// Keep finished rows from an existing output (false = overwrite)
    pub resume: bool,
    pub columns: ColumnMapping,
}

impl RunOptions {
    pub fn new(input: impl Into<PathBuf>, columns: ColumnMapping) -> Self {
        Self {
            input: input.into(),
            output: None,
            start_offset: 0,
            max_rows: None,
            resume: true,
            columns,
        }
    }
}

/// How a run that did not hit a fatal error ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

/// Final accounting for a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub pending: usize,
    /// Rows already done when the run started
    pub resumed: usize,
    /// Rows that reached a terminal state during this run
    pub processed: usize,
    /// Selected rows with no text and no media; left pending, never sent
    pub skipped: usize,
    pub elapsed: Duration,
    pub output: PathBuf,
    /// `(id, reason)` for every failed row, in input order
    pub failures: Vec<(String, String)>,
    pub outcome: RunOutcome,
}

impl RunSummary {
    /// Process exit status for this run
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::Interrupted => 130,
            RunOutcome::Completed if self.failed > 0 => 1,
            RunOutcome::Completed => 0,
        }
    }
}

/// Wires the row store, checkpointing and scheduler together
pub struct RunController {
    classifier: Arc<dyn Classifier>,
    scheduler_config: SchedulerConfig,
    checkpoint_every: usize,
    marker: String,
    warm_up: bool,
    events: Option<UnboundedSender<RowEvent>>,
}

impl RunController {
    pub fn new(classifier: Arc<dyn Classifier>, scheduler_config: SchedulerConfig) -> Self {
        Self {
            classifier,
            scheduler_config,
            checkpoint_every: DEFAULT_EVERY_ROWS,
            marker: DEFAULT_MARKER.to_string(),
            warm_up: false,
            events: None,
        }
    }

    pub fn with_checkpoint_every(mut self, every: usize) -> Self {
        self.checkpoint_every = every;
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_warm_up(mut self, warm_up: bool) -> Self {
        self.warm_up = warm_up;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<RowEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Output path `options` would be written to
    pub fn output_path(&self, options: &RunOptions) -> PathBuf {
        options
            .output
            .clone()
            .unwrap_or_else(|| output_path_for(&options.input, &self.marker))
    }

    /// Classify the pending rows of one input table.
    ///
    /// Interruption is not an error: the summary reports it. A fatal stop
    /// returns [`FloodnelError::FatalRun`] once progress has been flushed.
    pub async fn run(&self, options: &RunOptions, cancel: &CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();

        let output = self.output_path(options);
        if output == options.input {
            return Err(FloodnelError::Config(format!(
                "output path {} would overwrite the input",
                output.display()
            )));
        }

        let fresh = RowStore::load(&options.input, &options.columns)?;
        info!("Loaded {} rows from {}", fresh.len(), options.input.display());

        let mut checkpoint = CheckpointManager::new(&output, self.checkpoint_every);
        let (mut store, resumed) = checkpoint.prepare(fresh, &options.columns, options.resume)?;
        checkpoint.flush(&store)?;

        let end = options
            .max_rows
            .map(|n| options.start_offset.saturating_add(n))
            .unwrap_or(store.len());
        let (queue, empty): (Vec<usize>, Vec<usize>) = store
            .pending_in(options.start_offset..end)
            .into_iter()
            .partition(|&i| store.get(i).is_some_and(|row| !row.is_empty_post()));
        if !empty.is_empty() {
            info!("Skipping {} rows with no text and no media", empty.len());
        }
        info!(
            "{} rows to classify ({} already done) -> {}",
            queue.len(),
            resumed,
            output.display()
        );

        let stop = if queue.is_empty() {
            StopReason::Drained
        } else {
            if self.warm_up {
                self.warm_up(cancel).await;
            }
            let scheduler = Scheduler::new(self.classifier.clone(), self.scheduler_config.clone());
            let report = scheduler
                .run(&mut store, queue, &mut checkpoint, cancel, self.events.as_ref())
                .await?;
            info!(
                "Scheduler finished: {} done, {} failed, {} returned to pending",
                report.completed, report.failed, report.abandoned
            );
            report.stop
        };

        checkpoint.flush(&store)?;

        let counts = store.counts();
        if let StopReason::Fatal(reason) = stop {
            return Err(FloodnelError::FatalRun {
                reason,
                done: counts.done,
                failed: counts.failed,
                output,
            });
        }

        let failures = store
            .rows()
            .iter()
            .filter(|r| r.status == ClassificationStatus::Failed)
            .map(|r| (r.id.clone(), r.error_detail.clone().unwrap_or_default()))
            .collect();

        Ok(RunSummary {
            total: counts.total(),
            done: counts.done,
            failed: counts.failed,
            pending: counts.pending + counts.in_progress,
            resumed,
            processed: (counts.done - resumed.min(counts.done)) + counts.failed,
            skipped: empty.len(),
            elapsed: started.elapsed(),
            output,
            failures,
            outcome: match stop {
                StopReason::Interrupted => RunOutcome::Interrupted,
                _ => RunOutcome::Completed,
            },
        })
    }

    async fn warm_up(&self, cancel: &CancellationToken) {
        info!("Warming up {}", self.classifier.name());
        let call = tokio::time::timeout(self.scheduler_config.request_timeout, self.classifier.warm_up());
        tokio::select! {
            result = call => match result {
                Ok(Ok(())) => info!("Warm-up complete"),
                Ok(Err(e)) => warn!("Warm-up failed, continuing: {}", e),
                Err(_) => warn!("Warm-up timed out, continuing"),
            },
            _ = cancel.cancelled() => {}
        }
    }
}
