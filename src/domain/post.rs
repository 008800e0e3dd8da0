//! Post rows and their classification lifecycle
//!
//! A row moves `Pending -> InProgress -> Done | Failed` at most once per run.
//! The transition methods keep the row's output fields consistent with its
//! status: a `Done` row always carries a full [`Classification`], any other
//! row carries none.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classification::Classification;

/// Status of a row's classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStatus {
    /// Waiting to be scheduled
    Pending,
    /// A classification task owns the row
    InProgress,
    /// Classified; output fields populated
    Done,
    /// Gave up for this run; eligible again on the next run
    Failed,
}

impl ClassificationStatus {
    /// Returns true if the row is finished for the current run
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClassificationStatus::Done | ClassificationStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationStatus::Pending => "pending",
            ClassificationStatus::InProgress => "in_progress",
            ClassificationStatus::Done => "done",
            ClassificationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ClassificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "pending" => Ok(ClassificationStatus::Pending),
            "in_progress" => Ok(ClassificationStatus::InProgress),
            "done" => Ok(ClassificationStatus::Done),
            "failed" => Ok(ClassificationStatus::Failed),
            other => Err(format!("unknown classification status: {}", other)),
        }
    }
}

/// One social-media post and its classification state
#[derive(Debug, Clone, PartialEq)]
pub struct PostRow {
    //=== Input (immutable) ===
    /// Platform post id; unique within a store
    pub id: String,

    /// Caption / tweet text with hashtags merged in
    pub source_text: String,

    /// Local media paths in input order
    pub media_refs: Vec<String>,

    /// Passthrough cells, aligned with the store's passthrough headers
    pub extra: Vec<String>,

    //=== Classification state ===
    pub status: ClassificationStatus,

    /// Classification calls made in the run that produced the current state
    pub attempts: u32,

    pub classification: Option<Classification>,

    /// Last failure reason, only while `Failed`
    pub error_detail: Option<String>,

    pub classified_at: Option<DateTime<Utc>>,
}

impl PostRow {
    /// Create a pending row
    pub fn new(id: impl Into<String>, source_text: impl Into<String>, media_refs: Vec<String>) -> Self {
        Self {
            id: id.into(),
            source_text: source_text.into(),
            media_refs,
            extra: Vec::new(),
            status: ClassificationStatus::Pending,
            attempts: 0,
            classification: None,
            error_detail: None,
            classified_at: None,
        }
    }

    pub fn with_extra(mut self, extra: Vec<String>) -> Self {
        self.extra = extra;
        self
    }

    pub fn is_done(&self) -> bool {
        self.status == ClassificationStatus::Done
    }

    /// Claim the row for a classification task
    pub fn mark_in_progress(&mut self) {
        self.status = ClassificationStatus::InProgress;
        self.classification = None;
        self.error_detail = None;
    }

    /// Store a successful classification; all output fields in one step
    pub fn complete(&mut self, classification: Classification, attempts: u32) {
        self.status = ClassificationStatus::Done;
        self.attempts = attempts;
        self.classification = Some(classification);
        self.error_detail = None;
        self.classified_at = Some(Utc::now());
    }

    /// Record a terminal failure for this run
    pub fn fail(&mut self, reason: impl Into<String>, attempts: u32) {
        self.status = ClassificationStatus::Failed;
        self.attempts = attempts;
        self.classification = None;
        self.error_detail = Some(reason.into());
        self.classified_at = None;
    }

    /// Return the row to the queue with no trace of partial work
    pub fn reset_pending(&mut self) {
        self.status = ClassificationStatus::Pending;
        self.attempts = 0;
        self.classification = None;
        self.error_detail = None;
        self.classified_at = None;
    }

    /// True when there is nothing to send to the classifier
    pub fn is_empty_post(&self) -> bool {
        self.source_text.trim().is_empty() && self.media_refs.is_empty()
    }
}
