//! Checkpointing and resume for classification runs.
//!
//! Progress is persisted to a single output table next to the input:
//! 1. On start, a previous output (if any) is merged so finished rows are kept
//! 2. Every `every_rows` terminal completions, the whole table is rewritten atomically
//! 3. On shutdown, a final flush captures everything that finished

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::domain::ColumnMapping;
use crate::error::Result;
use crate::store::{RowStore, merge_resume};

/// Default suffix inserted before `.csv` in the output file name
pub const DEFAULT_MARKER: &str = "nel";

/// Default number of terminal completions between flushes
pub const DEFAULT_EVERY_ROWS: usize = 5;

/// Derive the output path for an input table: `<dir>/<stem>_<marker>.csv`
pub fn output_path_for(input: &Path, marker: &str) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    input.with_file_name(format!("{}_{}.csv", stem, marker))
}

/// Whether `path` looks like an output produced with `marker`
pub fn is_output_path(path: &Path, marker: &str) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| stem.ends_with(&format!("_{}", marker)))
}

/// Owns the output path and the flush cadence
#[derive(Debug)]
pub struct CheckpointManager {
    path: PathBuf,
    every: usize,
    since_last: usize,
    flushes: usize,
}

impl CheckpointManager {
    /// `every == 0` disables periodic flushes; only explicit flushes write.
    pub fn new(path: impl Into<PathBuf>, every: usize) -> Self {
        Self {
            path: path.into(),
            every,
            since_last: 0,
            flushes: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of successful writes so far
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Produce the working store for a run.
    ///
    /// With `resume`, finished rows are carried forward from the existing
    /// output (or from the input itself if it already holds results).
    /// Without it, every row starts pending. Returns the store and the
    /// number of rows carried forward as done.
    pub fn prepare(&self, fresh: RowStore, columns: &ColumnMapping, resume: bool) -> Result<(RowStore, usize)> {
        let store = if !resume {
            let mut store = fresh;
            store.reset_all();
            store
        } else if self.path.exists() {
            let previous = RowStore::load(&self.path, columns)?;
            info!(
                "Resuming from {} ({} rows done)",
                self.path.display(),
                previous.counts().done
            );
            merge_resume(&previous, fresh)
        } else {
            let previous = fresh.clone();
            merge_resume(&previous, fresh)
        };

        let resumed = store.counts().done;
        Ok((store, resumed))
    }

    /// Note one terminal completion; flushes when the cadence is reached.
    /// Returns whether a flush happened.
    pub fn record_completion(&mut self, store: &RowStore) -> Result<bool> {
        self.since_last += 1;
        if self.every == 0 || self.since_last < self.every {
            return Ok(false);
        }
        self.flush(store)?;
        Ok(true)
    }

    /// Write the whole store to the output path now
    pub fn flush(&mut self, store: &RowStore) -> Result<()> {
        store.atomic_write(&self.path)?;
        self.since_last = 0;
        self.flushes += 1;
        debug!("Checkpoint written to {} ({} rows)", self.path.display(), store.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Classification, ClassificationStatus, LossAssessment, LossFields, LossType, Platform, ScalarFields};
    use tempfile::TempDir;

    fn columns() -> ColumnMapping {
        Platform::Tiktok.default_columns()
    }

    fn store_from(csv: &str) -> RowStore {
        RowStore::from_reader(csv.as_bytes(), &columns(), Path::new("input.csv")).unwrap()
    }

    fn classification() -> Classification {
        let loss = LossFields::from_entries(
            LossType::ALL
                .iter()
                .map(|t| (*t, LossAssessment::new(Some(false), Some(0.1)))),
        )
        .unwrap();
        Classification {
            loss,
            scalars: ScalarFields::default(),
        }
    }

    #[test]
    fn test_output_path_for() {
        assert_eq!(
            output_path_for(Path::new("/data/posts.csv"), "nel"),
            PathBuf::from("/data/posts_nel.csv")
        );
        assert_eq!(
            output_path_for(Path::new("posts.tsv"), "run2"),
            PathBuf::from("posts_run2.csv")
        );
    }

    #[test]
    fn test_is_output_path() {
        assert!(is_output_path(Path::new("/data/posts_nel.csv"), "nel"));
        assert!(!is_output_path(Path::new("/data/posts.csv"), "nel"));
        assert!(!is_output_path(Path::new("/data/channel.csv"), "nel"));
    }

    #[test]
    fn test_record_completion_cadence() {
        let temp = TempDir::new().unwrap();
        let store = store_from("id,title\n1,a\n");
        let mut manager = CheckpointManager::new(temp.path().join("out.csv"), 3);

        assert!(!manager.record_completion(&store).unwrap());
        assert!(!manager.record_completion(&store).unwrap());
        assert!(manager.record_completion(&store).unwrap());
        assert!(!manager.record_completion(&store).unwrap());
        assert_eq!(manager.flushes(), 1);
        assert!(manager.path().exists());
    }

    #[test]
    fn test_zero_cadence_only_flushes_explicitly() {
        let temp = TempDir::new().unwrap();
        let store = store_from("id,title\n1,a\n");
        let mut manager = CheckpointManager::new(temp.path().join("out.csv"), 0);

        for _ in 0..10 {
            assert!(!manager.record_completion(&store).unwrap());
        }
        assert!(!manager.path().exists());

        manager.flush(&store).unwrap();
        assert!(manager.path().exists());
    }

    #[test]
    fn test_prepare_resumes_from_existing_output() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("posts_nel.csv");

        let mut previous = store_from("id,title\n1,a\n2,b\n3,c\n");
        previous.get_mut(0).unwrap().complete(classification(), 1);
        previous.get_mut(1).unwrap().fail("bad image", 1);
        previous.get_mut(2).unwrap().mark_in_progress();
        previous.atomic_write(&output).unwrap();

        let manager = CheckpointManager::new(&output, 5);
        let (store, resumed) = manager
            .prepare(store_from("id,title\n1,a\n2,b\n3,c\n"), &columns(), true)
            .unwrap();

        assert_eq!(resumed, 1);
        assert_eq!(store.get(0).unwrap().status, ClassificationStatus::Done);
        assert_eq!(store.get(1).unwrap().status, ClassificationStatus::Pending);
        assert_eq!(store.get(2).unwrap().status, ClassificationStatus::Pending);
    }

    #[test]
    fn test_prepare_overwrite_ignores_existing_output() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("posts_nel.csv");

        let mut previous = store_from("id,title\n1,a\n");
        previous.get_mut(0).unwrap().complete(classification(), 1);
        previous.atomic_write(&output).unwrap();

        let manager = CheckpointManager::new(&output, 5);
        let (store, resumed) = manager.prepare(store_from("id,title\n1,a\n"), &columns(), false).unwrap();

        assert_eq!(resumed, 0);
        assert_eq!(store.counts().pending, 1);
    }

    #[test]
    fn test_prepare_without_output_starts_fresh() {
        let temp = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp.path().join("posts_nel.csv"), 5);

        let (store, resumed) = manager.prepare(store_from("id,title\n1,a\n2,b\n"), &columns(), true).unwrap();

        assert_eq!(resumed, 0);
        assert_eq!(store.counts().pending, 2);
    }
}
