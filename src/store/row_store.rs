//! CSV-backed row store.
//!
//! The store keeps rows in input order and is only ever mutated by the single
//! coordinator that owns it. Persistence goes through [`RowStore::atomic_write`],
//! which writes a sibling temp file, fsyncs it, and renames it into place.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::columns;
use crate::domain::{ClassificationStatus, ColumnMapping, PostRow};
use crate::error::{FloodnelError, LoadError, Result};

/// Per-status row counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.done + self.failed
    }
}

/// Ordered table of posts plus the passthrough columns they came with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowStore {
    headers: Vec<String>,
    rows: Vec<PostRow>,
}

impl RowStore {
    /// Build a store directly. Every row's `extra` must align with `headers`.
    pub fn new(headers: Vec<String>, rows: Vec<PostRow>) -> Self {
        Self { headers, rows }
    }

    /// Load a CSV file. Fails with [`LoadError`] on a malformed schema.
    pub fn load(path: &Path, columns: &ColumnMapping) -> Result<Self> {
        let file = File::open(path)?;
        let store = Self::from_reader(file, columns, path)?;
        debug!("Loaded {} rows from {}", store.len(), path.display());
        Ok(store)
    }

    /// Load from any reader; `origin` is only used in error messages.
    pub fn from_reader<R: io::Read>(reader: R, columns: &ColumnMapping, origin: &Path) -> Result<Self> {
        let csv_err = |source: csv::Error| LoadError::Csv {
            path: origin.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new().from_reader(reader);
        let header_record = reader.headers().map_err(csv_err)?.clone();
        let index: HashMap<&str, usize> = header_record.iter().enumerate().map(|(i, h)| (h, i)).collect();

        let missing: Vec<String> = columns
            .required()
            .into_iter()
            .filter(|name| !index.contains_key(name))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(LoadError::MissingColumns {
                path: origin.to_path_buf(),
                missing,
            }
            .into());
        }
        for media in &columns.media {
            if !index.contains_key(media.as_str()) {
                warn!("{}: media column '{}' not found, treating as empty", origin.display(), media);
            }
        }

        let output: HashSet<String> = columns::output_headers().into_iter().collect();
        let passthrough: Vec<usize> = (0..header_record.len())
            .filter(|i| !output.contains(&header_record[*i]))
            .collect();
        let headers: Vec<String> = passthrough.iter().map(|i| header_record[*i].to_string()).collect();
        let has_state = index.contains_key(columns::STATUS);

        let mut rows = Vec::new();
        let mut seen = HashSet::new();
        for (n, record) in reader.records().enumerate() {
            let record = record.map_err(csv_err)?;
            let row_number = n + 1;
            let cell = |name: &str| index.get(name).and_then(|i| record.get(*i));

            let id = cell(&columns.id).unwrap_or("").trim().to_string();
            if id.is_empty() {
                return Err(LoadError::EmptyId {
                    path: origin.to_path_buf(),
                    row: row_number,
                }
                .into());
            }
            if !seen.insert(id.clone()) {
                return Err(LoadError::DuplicateId {
                    path: origin.to_path_buf(),
                    id,
                    row: row_number,
                }
                .into());
            }

            let text = build_text(columns.text.iter().filter_map(|c| cell(c)), columns.hashtags.as_deref().and_then(cell));
            let media = columns
                .media
                .iter()
                .filter_map(|c| cell(c))
                .flat_map(parse_media_cell)
                .collect();
            let extra = passthrough
                .iter()
                .map(|i| record.get(*i).unwrap_or("").to_string())
                .collect();

            let mut row = PostRow::new(id, text, media).with_extra(extra);
            if has_state {
                apply_saved_state(&mut row, cell, origin, row_number);
            }
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    /// Write the whole store to `path` without ever exposing a partial file
    pub fn atomic_write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp_path = temp_path_for(path);
        let result = self.write_temp(&temp_path).and_then(|()| {
            fs::rename(&temp_path, path).map_err(|e| {
                FloodnelError::Checkpoint(format!(
                    "Failed to rename {} to {}: {}",
                    temp_path.display(),
                    path.display(),
                    e
                ))
            })
        });

        if result.is_err() {
            if let Err(e) = fs::remove_file(&temp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", temp_path.display(), e);
                }
            }
        }
        result
    }

    fn write_temp(&self, temp_path: &Path) -> Result<()> {
        let file = File::create(temp_path)?;
        let file = self.write_to(file)?;
        file.sync_all()?;
        Ok(())
    }

    /// Serialize as CSV and hand the writer back
    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<W> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        let mut header = self.headers.clone();
        header.extend(columns::output_headers());
        csv_writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = row.extra.clone();
            record.resize(self.headers.len(), String::new());
            record.extend(columns::encode(row));
            csv_writer.write_record(&record)?;
        }

        csv_writer.flush()?;
        csv_writer
            .into_inner()
            .map_err(|e| FloodnelError::Checkpoint(format!("Failed to flush CSV writer: {}", e)))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[PostRow] {
        &self.rows
    }

    pub fn get(&self, index: usize) -> Option<&PostRow> {
        self.rows.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PostRow> {
        self.rows.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for row in &self.rows {
            match row.status {
                ClassificationStatus::Pending => counts.pending += 1,
                ClassificationStatus::InProgress => counts.in_progress += 1,
                ClassificationStatus::Done => counts.done += 1,
                ClassificationStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Indices of pending rows inside `range`, in input order
    pub fn pending_in(&self, range: Range<usize>) -> Vec<usize> {
        let end = range.end.min(self.rows.len());
        let start = range.start.min(end);
        (start..end)
            .filter(|i| self.rows[*i].status == ClassificationStatus::Pending)
            .collect()
    }

    /// Reset every row to pending (overwrite mode)
    pub fn reset_all(&mut self) {
        for row in &mut self.rows {
            row.reset_pending();
        }
    }
}

/// Carry finished work from `previous` into `fresh`.
///
/// Fresh order and passthrough cells win. A row whose id is `done` in
/// `previous` keeps that classification; every other row (new, failed, or
/// interrupted mid-request) is reset to pending.
pub fn merge_resume(previous: &RowStore, mut fresh: RowStore) -> RowStore {
    let done: HashMap<&str, &PostRow> = previous
        .rows
        .iter()
        .filter(|r| r.is_done() && r.classification.is_some())
        .map(|r| (r.id.as_str(), r))
        .collect();

    let mut carried = 0;
    for row in &mut fresh.rows {
        match done.get(row.id.as_str()) {
            Some(prev) => {
                row.status = ClassificationStatus::Done;
                row.attempts = prev.attempts;
                row.classification = prev.classification.clone();
                row.classified_at = prev.classified_at;
                row.error_detail = None;
                carried += 1;
            }
            None => row.reset_pending(),
        }
    }

    let dropped = done.len() - carried;
    if dropped > 0 {
        warn!("{} classified rows in the previous output are no longer in the input", dropped);
    }
    fresh
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn is_blank(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("nan")
}

/// Join text cells and append hashtags as `#tag` words
fn build_text<'a>(texts: impl Iterator<Item = &'a str>, hashtags: Option<&str>) -> String {
    let mut text = texts
        .filter(|t| !is_blank(t))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");

    if let Some(tags) = hashtags.filter(|h| !is_blank(h)) {
        let tags = tags
            .split(',')
            .map(|t| t.trim().trim_start_matches('#'))
            .filter(|t| !t.is_empty())
            .map(|t| format!("#{}", t))
            .collect::<Vec<_>>()
            .join(" ");
        if !tags.is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&tags);
        }
    }
    text
}

/// A media cell is either a JSON array of paths or a single path
fn parse_media_cell(cell: &str) -> Vec<String> {
    if is_blank(cell) {
        return Vec::new();
    }
    let trimmed = cell.trim();
    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<String>>(trimmed) {
            Ok(paths) => paths.into_iter().filter(|p| !is_blank(p)).collect(),
            Err(e) => {
                warn!("Unparseable media list {}: {}", trimmed, e);
                Vec::new()
            }
        }
    } else {
        vec![trimmed.to_string()]
    }
}

fn apply_saved_state<'a, F>(row: &mut PostRow, cell: F, origin: &Path, row_number: usize)
where
    F: Fn(&str) -> Option<&'a str>,
{
    match columns::decode(cell) {
        Ok(state) => {
            row.status = state.status;
            row.attempts = state.attempts;
            row.error_detail = state.error_detail;
            row.classified_at = state.classified_at;
            row.classification = state.classification;
        }
        Err(e) => {
            warn!(
                "{}: row {} ({}) has unreadable classification columns, re-queueing: {}",
                origin.display(),
                row_number,
                row.id,
                e
            );
            row.reset_pending();
        }
    }
}
