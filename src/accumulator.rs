//! Append-only per-window artifacts under `<root>/<container>/<date>/`.
//!
//! All accumulated state lives in these files; nothing is kept in memory
//! between collection ticks.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::harvest::record::LogRecord;
use crate::window::{ArtifactKind, HourBucket, WindowKey};

#[derive(Debug, Error)]
pub enum AccumulatorError {
    #[error("failed to create window directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to append to {path} after {written} line(s): {source}")]
    Append {
        path: PathBuf,
        written: usize,
        #[source]
        source: io::Error,
    },
}

impl AccumulatorError {
    /// Lines that reached the file before the failure.
    pub fn written(&self) -> usize {
        match self {
            Self::CreateDir { .. } => 0,
            Self::Append { written, .. } => *written,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub window: WindowKey,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AppendSummary {
    pub all_lines: usize,
    pub error_lines: usize,
    /// Error lines present in `_all` that could not be written to `_errors`.
    pub dropped_error_lines: usize,
}

/// Outcome of one partitioned append. The first `summary.all_lines`
/// records reached `_all`, in order, even when `failure` is set.
#[derive(Debug)]
pub struct PartitionedAppend {
    pub summary: AppendSummary,
    pub failure: Option<AccumulatorError>,
}

#[derive(Debug, Clone)]
pub struct WindowAccumulator {
    root: PathBuf,
}

impl WindowAccumulator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn window_dir(&self, key: &WindowKey) -> PathBuf {
        self.root.join(&key.container).join(key.bucket.date_label())
    }

    pub fn artifact_path(&self, key: &WindowKey, kind: ArtifactKind) -> PathBuf {
        self.window_dir(key).join(kind.file_name(&key.bucket))
    }

    /// Appends each record's payload as one line. Nothing is created when
    /// `records` is empty; existing content is never truncated. On failure
    /// the error carries how many lines were written first.
    pub fn append(
        &self,
        key: &WindowKey,
        kind: ArtifactKind,
        records: &[&LogRecord],
    ) -> Result<usize, AccumulatorError> {
        if records.is_empty() {
            return Ok(0);
        }

        let dir = self.window_dir(key);
        fs::create_dir_all(&dir).map_err(|source| AccumulatorError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let path = self.artifact_path(key, kind);
        let mut file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(source) => {
                return Err(AccumulatorError::Append {
                    path,
                    written: 0,
                    source,
                })
            }
        };

        let mut line = Vec::new();
        for (written, record) in records.iter().enumerate() {
            line.clear();
            line.extend_from_slice(record.payload.as_bytes());
            line.push(b'\n');
            // One write per line keeps each line whole under O_APPEND.
            if let Err(source) = file.write_all(&line) {
                return Err(AccumulatorError::Append {
                    path,
                    written,
                    source,
                });
            }
        }

        Ok(records.len())
    }

    /// Writes every record to `_all`, then the stderr ones among those that
    /// reached `_all` to `_errors`, so an error line is never present
    /// without its `_all` counterpart.
    pub fn append_partitioned(&self, key: &WindowKey, records: &[LogRecord]) -> PartitionedAppend {
        let all: Vec<&LogRecord> = records.iter().collect();
        let (all_lines, all_failure) = match self.append(key, ArtifactKind::All, &all) {
            Ok(written) => (written, None),
            Err(e) => (e.written(), Some(e)),
        };

        let errors: Vec<&LogRecord> = records[..all_lines]
            .iter()
            .filter(|r| r.is_error())
            .collect();
        let (error_lines, errors_failure) = match self.append(key, ArtifactKind::Errors, &errors) {
            Ok(written) => (written, None),
            Err(e) => (e.written(), Some(e)),
        };

        PartitionedAppend {
            summary: AppendSummary {
                all_lines,
                error_lines,
                dropped_error_lines: errors.len() - error_lines,
            },
            failure: all_failure.or(errors_failure),
        }
    }

    /// Every plaintext artifact currently on disk. Hidden entries (staging,
    /// cursor database) and unrecognised files are ignored.
    pub fn scan(&self) -> Vec<Artifact> {
        let mut artifacts = Vec::new();
        for (container, container_dir) in visible_dirs(&self.root) {
            for (date_label, date_dir) in visible_dirs(&container_dir) {
                let Some(date) = HourBucket::parse_date_label(&date_label) else {
                    continue;
                };
                let Ok(entries) = fs::read_dir(&date_dir) else {
                    continue;
                };
                for entry in entries.filter_map(Result::ok) {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let Some((hour, kind)) = ArtifactKind::parse_file_name(&name) else {
                        continue;
                    };
                    let Some(bucket) = HourBucket::new(date, hour) else {
                        continue;
                    };
                    artifacts.push(Artifact {
                        path: entry.path(),
                        kind,
                        window: WindowKey::new(container.clone(), bucket),
                    });
                }
            }
        }
        artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        artifacts
    }

    /// Artifacts belonging to `bucket`, across every container.
    pub fn artifacts_for(&self, bucket: &HourBucket) -> Vec<Artifact> {
        self.scan()
            .into_iter()
            .filter(|artifact| artifact.window.bucket == *bucket)
            .collect()
    }
}

fn visible_dirs(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .filter(|(name, _)| !name.starts_with('.'))
        .collect()
}
