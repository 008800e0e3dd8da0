//! Error types for floodnel
//!
//! Centralized error handling using thiserror. Row-level classification
//! failures live in [`crate::llm::ClassifyError`] and never escape the
//! scheduler; only the variants below reach the run controller's caller.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed input table. Always fatal, never retried.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Required columns are absent from the header row
    #[error("{path}: missing required columns: {}", missing.join(", "))]
    MissingColumns { path: PathBuf, missing: Vec<String> },

    /// Two rows share the same post id
    #[error("{path}: duplicate post id '{id}' at row {row}")]
    DuplicateId { path: PathBuf, id: String, row: usize },

    /// A row has an empty post id
    #[error("{path}: empty post id at row {row}")]
    EmptyId { path: PathBuf, row: usize },

    /// The file could not be parsed as CSV
    #[error("{path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// All error types that can terminate a floodnel run
#[derive(Debug, Error)]
pub enum FloodnelError {
    /// Input table could not be loaded
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// Systemic failure (bad credentials, repeated consecutive failures).
    /// Progress up to this point has already been flushed to `output`.
    #[error("Run aborted: {reason} ({done} done, {failed} failed, progress saved to {})", output.display())]
    FatalRun {
        reason: String,
        done: usize,
        failed: usize,
        output: PathBuf,
    },

    /// Checkpoint could not be written
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Invalid configuration or options
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FloodnelError {
    /// Whether this error aborted a run after classification had started
    pub fn is_fatal_run(&self) -> bool {
        matches!(self, FloodnelError::FatalRun { .. })
    }
}

/// Result type alias for floodnel operations
pub type Result<T> = std::result::Result<T, FloodnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_error() {
        let err = LoadError::MissingColumns {
            path: PathBuf::from("posts.csv"),
            missing: vec!["id".to_string(), "title".to_string()],
        };
        assert_eq!(err.to_string(), "posts.csv: missing required columns: id, title");
    }

    #[test]
    fn test_duplicate_id_error() {
        let err = LoadError::DuplicateId {
            path: PathBuf::from("posts.csv"),
            id: "42".to_string(),
            row: 7,
        };
        assert_eq!(err.to_string(), "posts.csv: duplicate post id '42' at row 7");
    }

    #[test]
    fn test_load_error_conversion() {
        let err: FloodnelError = LoadError::EmptyId {
            path: PathBuf::from("a.csv"),
            row: 3,
        }
        .into();
        assert!(matches!(err, FloodnelError::Load(_)));
        assert!(err.to_string().starts_with("Load error:"));
        assert!(!err.is_fatal_run());
    }

    #[test]
    fn test_fatal_run_error() {
        let err = FloodnelError::FatalRun {
            reason: "authentication rejected".to_string(),
            done: 3,
            failed: 0,
            output: PathBuf::from("out.csv"),
        };
        assert!(err.is_fatal_run());
        assert_eq!(
            err.to_string(),
            "Run aborted: authentication rejected (3 done, 0 failed, progress saved to out.csv)"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FloodnelError = io_err.into();
        assert!(matches!(err, FloodnelError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: FloodnelError = json_err.into();
        assert!(matches!(err, FloodnelError::Json(_)));
    }
}
