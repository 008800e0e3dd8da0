//! Classifier trait and the row-level error taxonomy

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Classification, PostRow};

/// Stateless classification capability - each call is independent.
///
/// Implementations return a result or an error and never touch the row
/// store; the scheduler owns retries and row mutation.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one post from its text and media
    async fn classify(&self, row: &PostRow) -> Result<Classification, ClassifyError>;

    /// Optional one-off request that loads the model before the run
    async fn warm_up(&self) -> Result<(), ClassifyError> {
        Ok(())
    }

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Errors that can occur while classifying a single row
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifyError {
    /// Timeout, rate limit, network fault, or unusable model output
    #[error("{message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The service or the input makes this row unclassifiable
    #[error("{0}")]
    Permanent(String),

    /// Systemic failure (e.g. rejected credentials); aborts the run
    #[error("{0}")]
    Fatal(String),
}

impl ClassifyError {
    pub fn transient(message: impl Into<String>) -> Self {
        ClassifyError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        ClassifyError::Transient {
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ClassifyError::Permanent(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ClassifyError::Fatal(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ClassifyError::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClassifyError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short tag used in logs and failure reasons
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifyError::Transient { .. } => "transient",
            ClassifyError::Permanent(_) => "permanent",
            ClassifyError::Fatal(_) => "fatal",
        }
    }
}
