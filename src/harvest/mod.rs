//! Incremental reading of container JSON log files.
//!
//! Source files are never opened directly for parsing: each one is copied
//! to a private [`TempCopy`] first, which is removed before `harvest`
//! returns.

pub mod names;
pub mod record;
pub mod temp;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::constants::{SOURCE_LOG_SUFFIX, STAGING_DIR};
use names::{resolve_name, NameResolver};
use record::{decode_line, parse_line, LineError, LogRecord};
use temp::TempCopy;

/// Per-harvest counters. Every dropped line is counted under its reason.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HarvestStats {
    pub files: usize,
    pub failed_files: usize,
    pub lines: usize,
    pub kept: usize,
    pub malformed: usize,
    pub missing_timestamp: usize,
    pub bad_timestamp: usize,
    pub before_cutoff: usize,
    pub fallback_decoded: usize,
}

impl HarvestStats {
    /// Lines that could not be decoded into a record.
    pub fn invalid(&self) -> usize {
        self.malformed + self.missing_timestamp + self.bad_timestamp
    }

    /// Every line read but not kept.
    pub fn dropped(&self) -> usize {
        self.invalid() + self.before_cutoff
    }
}

#[derive(Debug, Default)]
pub struct Harvest {
    pub records: Vec<LogRecord>,
    pub stats: HarvestStats,
}

#[derive(Debug, Clone)]
pub struct SourceLogReader<R> {
    containers_dir: PathBuf,
    staging_dir: PathBuf,
    resolver: R,
}

impl<R: NameResolver> SourceLogReader<R> {
    pub fn new(containers_dir: impl Into<PathBuf>, harvest_dir: &Path, resolver: R) -> Self {
        Self {
            containers_dir: containers_dir.into(),
            staging_dir: harvest_dir.join(STAGING_DIR),
            resolver,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Container ids with a log directory. A missing root is an empty list.
    pub fn list_containers(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.containers_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(
                    dir = %self.containers_dir.display(),
                    "Container log directory absent, nothing to collect"
                );
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(
                    dir = %self.containers_dir.display(),
                    error = %e,
                    "Failed to list container log directory"
                );
                return Vec::new();
            }
        };

        let mut ids: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        ids.sort();
        ids
    }

    pub async fn container_name(&self, container_id: &str) -> String {
        resolve_name(&self.resolver, container_id).await
    }

    /// Source files for a container, rotated files (`-json.log.N`) oldest
    /// first and the live file last, so records come out in write order.
    pub fn source_files(&self, container_id: &str) -> Vec<PathBuf> {
        let dir = self.containers_dir.join(container_id);
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut files: Vec<(u32, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                rotation_index(&name).map(|idx| (idx, entry.path()))
            })
            .collect();
        files.sort_by(|a, b| b.0.cmp(&a.0));
        files.into_iter().map(|(_, path)| path).collect()
    }

    /// Reads every source file of `container_id` and keeps records with
    /// `timestamp >= cutoff`. A file that cannot be copied or read is
    /// skipped; lines that fail to decode are counted and skipped.
    pub fn harvest(&self, container_id: &str, cutoff: DateTime<Utc>) -> Harvest {
        let mut harvest = Harvest::default();

        for source in self.source_files(container_id) {
            harvest.stats.files += 1;
            let copy = match TempCopy::create(&source, &self.staging_dir, container_id) {
                Ok(copy) => copy,
                Err(e) => {
                    harvest.stats.failed_files += 1;
                    tracing::warn!(
                        container_id,
                        file = %source.display(),
                        error = %e,
                        "Failed to copy source log, skipping file"
                    );
                    continue;
                }
            };

            let bytes = match fs::read(copy.path()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    harvest.stats.failed_files += 1;
                    tracing::warn!(
                        container_id,
                        file = %source.display(),
                        error = %e,
                        "Failed to read temp copy, skipping file"
                    );
                    continue;
                }
            };
            drop(copy);

            parse_into(&bytes, cutoff, &mut harvest);
        }

        tracing::debug!(
            container_id,
            files = harvest.stats.files,
            lines = harvest.stats.lines,
            kept = harvest.stats.kept,
            invalid = harvest.stats.invalid(),
            before_cutoff = harvest.stats.before_cutoff,
            fallback_decoded = harvest.stats.fallback_decoded,
            "Harvested container logs"
        );
        harvest
    }
}

fn parse_into(bytes: &[u8], cutoff: DateTime<Utc>, harvest: &mut Harvest) {
    for raw in bytes.split(|b| *b == b'\n') {
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        harvest.stats.lines += 1;

        let (line, fallback) = decode_line(raw);
        if fallback {
            harvest.stats.fallback_decoded += 1;
        }

        match parse_line(&line) {
            Ok(record) if record.timestamp >= cutoff => {
                harvest.stats.kept += 1;
                harvest.records.push(record);
            }
            Ok(_) => harvest.stats.before_cutoff += 1,
            Err(LineError::Malformed(reason)) => {
                harvest.stats.malformed += 1;
                tracing::debug!(reason = %reason, "Skipping malformed log line");
            }
            Err(LineError::MissingTimestamp) => {
                harvest.stats.missing_timestamp += 1;
                tracing::debug!("Skipping log line without a timestamp");
            }
            Err(LineError::BadTimestamp(value)) => {
                harvest.stats.bad_timestamp += 1;
                tracing::debug!(value = %value, "Skipping line with unparseable timestamp");
            }
        }
    }
}

/// `0` for the live `<id>-json.log`, `N` for `<id>-json.log.N`, `None` for
/// anything else (including compressed rotations).
fn rotation_index(file_name: &str) -> Option<u32> {
    if file_name.ends_with(SOURCE_LOG_SUFFIX) {
        return Some(0);
    }
    let (base, index) = file_name.rsplit_once('.')?;
    if !base.ends_with(SOURCE_LOG_SUFFIX) {
        return None;
    }
    index.parse::<u32>().ok().filter(|n| *n > 0)
}
