//! Age-based cleanup of local artifacts and remote objects.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use crate::constants::{COMPRESSED_EXTENSION, SECS_PER_DAY, STAGING_DIR};
use crate::harvest::temp::TempCopy;
use crate::remote::{identity_prefix, ObjectStore};
use crate::window::ArtifactKind;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LocalSweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
    pub bytes_freed: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemoteSweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
    pub bytes_freed: u64,
    /// False when a listing call failed and the scan stopped early.
    pub complete: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RetentionSweeper {
    local_max_age: Duration,
    remote_max_age: Duration,
}

impl RetentionSweeper {
    pub fn new(local_max_age: Duration, remote_max_age: Duration) -> Self {
        Self {
            local_max_age,
            remote_max_age,
        }
    }

    pub fn from_days(local_days: u64, remote_days: u64) -> Self {
        Self::new(
            Duration::from_secs(local_days * SECS_PER_DAY),
            Duration::from_secs(remote_days * SECS_PER_DAY),
        )
    }

    /// Deletes artifacts, compressed transients and temp copies under
    /// `root` whose modification time is older than the local threshold,
    /// whether or not they were uploaded. Emptied window directories are
    /// removed too.
    pub fn sweep_local(&self, root: &Path, now: DateTime<Utc>) -> LocalSweepReport {
        let mut report = LocalSweepReport::default();
        let now = SystemTime::from(now);

        for (container_name, container_dir) in subdirs(root) {
            if container_name == STAGING_DIR {
                self.sweep_dir(&container_dir, now, is_temp_file, &mut report);
                continue;
            }
            if container_name.starts_with('.') {
                continue;
            }
            for (_, date_dir) in subdirs(&container_dir) {
                self.sweep_dir(&date_dir, now, is_artifact_file, &mut report);
                remove_if_empty(&date_dir);
            }
            remove_if_empty(&container_dir);
        }

        if report.deleted > 0 || report.failed > 0 {
            tracing::info!(
                scanned = report.scanned,
                deleted = report.deleted,
                failed = report.failed,
                freed = %format_bytes(report.bytes_freed),
                "Local retention sweep complete"
            );
        }
        report
    }

    fn sweep_dir(
        &self,
        dir: &Path,
        now: SystemTime,
        matches: fn(&str) -> bool,
        report: &mut LocalSweepReport,
    ) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !matches(&name) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            report.scanned += 1;

            let age = meta
                .modified()
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .unwrap_or_default();
            if age <= self.local_max_age {
                continue;
            }

            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => {
                    report.deleted += 1;
                    report.bytes_freed += meta.len();
                    tracing::info!(
                        path = %path.display(),
                        age_days = age.as_secs() / SECS_PER_DAY,
                        "Deleted expired local file"
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to delete expired local file"
                    );
                }
            }
        }
    }

    /// Deletes remote objects under the identity prefix last modified
    /// before `now - remote_max_age`. A failed delete is logged and the
    /// scan continues; a failed listing ends the scan.
    pub async fn sweep_remote<S: ObjectStore>(
        &self,
        store: &S,
        identity: &str,
        now: DateTime<Utc>,
    ) -> RemoteSweepReport {
        let mut report = RemoteSweepReport::default();
        let max_age = chrono::Duration::from_std(self.remote_max_age)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(max_age).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let prefix = identity_prefix(identity);

        tracing::info!(prefix = %prefix, cutoff = %cutoff, "Starting remote retention sweep");

        let mut continuation = None;
        loop {
            let page = match store.list_page(&prefix, continuation.take()).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(
                        prefix = %prefix,
                        error = %e,
                        "Remote listing failed, stopping sweep"
                    );
                    return report;
                }
            };

            for object in page.objects {
                report.scanned += 1;
                if object.last_modified >= cutoff {
                    continue;
                }
                match store.delete(&object.key).await {
                    Ok(()) => {
                        report.deleted += 1;
                        report.bytes_freed += object.size;
                        tracing::info!(
                            key = %object.key,
                            size = %format_bytes(object.size),
                            last_modified = %object.last_modified,
                            "Deleted expired remote object"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::error!(
                            key = %object.key,
                            error = %e,
                            "Failed to delete remote object"
                        );
                    }
                }
            }

            match page.next_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        report.complete = true;
        tracing::info!(
            scanned = report.scanned,
            deleted = report.deleted,
            failed = report.failed,
            freed = %format_bytes(report.bytes_freed),
            "Remote retention sweep complete"
        );
        report
    }
}

fn is_artifact_file(name: &str) -> bool {
    let plaintext = name
        .strip_suffix(&format!(".{COMPRESSED_EXTENSION}"))
        .unwrap_or(name);
    ArtifactKind::parse_file_name(plaintext).is_some()
}

fn is_temp_file(name: &str) -> bool {
    TempCopy::is_temp_copy(name)
}

fn subdirs(dir: &Path) -> Vec<(String, std::path::PathBuf)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .collect()
}

fn remove_if_empty(dir: &Path) {
    let is_empty = fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if is_empty {
        let _ = fs::remove_dir(dir);
    }
}

/// Human-readable size: `B`, `KB`, `MB` or `GB` with two decimals.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.2} KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.2} MB", b / (KB * KB))
    } else {
        format!("{:.2} GB", b / (KB * KB * KB))
    }
}
