//! The collection and upload passes, wired from explicit components.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};

use crate::accumulator::{AppendSummary, WindowAccumulator};
use crate::config::CutoffPolicy;
use crate::constants::MAX_CONCURRENT_CONTAINERS;
use crate::harvest::names::NameResolver;
use crate::harvest::SourceLogReader;
use crate::remote::ObjectStore;
use crate::retention::{LocalSweepReport, RemoteSweepReport, RetentionSweeper};
use crate::store::Store;
use crate::upload::{UploadCoordinator, UploadReport};
use crate::window::{TimeWindower, WindowKey};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectReport {
    pub containers: usize,
    pub failed_containers: usize,
    /// Lines written to `_all`, including those of containers whose append
    /// failed part way.
    pub all_lines: usize,
    pub error_lines: usize,
    /// Error lines written to `_all` but not to `_errors`.
    pub dropped_error_lines: usize,
    /// Malformed lines and lines with a missing or unparseable timestamp.
    pub skipped_lines: usize,
    /// Valid lines older than the cutoff or already covered by the cursor.
    pub filtered_lines: usize,
    pub failed_files: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ContainerOutcome {
    summary: AppendSummary,
    skipped: usize,
    filtered: usize,
    failed_files: usize,
    failed: bool,
}

/// Everything one harvester process needs, built once at start-up and
/// shared by reference with every pass.
pub struct Pipeline<R, S> {
    pub windower: TimeWindower,
    pub reader: SourceLogReader<R>,
    pub accumulator: WindowAccumulator,
    pub store: Arc<Store>,
    pub remote: S,
    pub sweeper: RetentionSweeper,
    pub cutoff: CutoffPolicy,
    pub identity: String,
    /// Held for the whole of a collect, upload or local sweep pass, so an
    /// upload never reads a window a running collection still writes to.
    pub pass_lock: Mutex<()>,
}

impl<R: NameResolver, S: ObjectStore> Pipeline<R, S> {
    /// One collection tick: every container's new records are appended to
    /// the window of the hour current at the moment they are written.
    pub async fn collect_tick(&self) -> CollectReport {
        let _pass = self.pass_lock.lock().await;
        let ids = self.reader.list_containers();

        let permits = Semaphore::new(MAX_CONCURRENT_CONTAINERS);
        let permits = &permits;
        let pending: Vec<_> = ids
            .iter()
            .map(|id| async move {
                let _permit = permits.acquire().await.ok();
                self.collect_container(id).await
            })
            .collect();
        let outcomes = join_all(pending).await;

        let mut report = CollectReport {
            containers: ids.len(),
            ..CollectReport::default()
        };
        for outcome in outcomes {
            report.all_lines += outcome.summary.all_lines;
            report.error_lines += outcome.summary.error_lines;
            report.dropped_error_lines += outcome.summary.dropped_error_lines;
            report.skipped_lines += outcome.skipped;
            report.filtered_lines += outcome.filtered;
            report.failed_files += outcome.failed_files;
            if outcome.failed {
                report.failed_containers += 1;
            }
        }

        if !ids.is_empty() {
            match self.store.prune_cursors(&ids) {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Pruned cursors of removed containers"),
                Err(e) => tracing::warn!(error = %e, "Failed to prune harvest cursors"),
            }
        }

        tracing::info!(
            containers = report.containers,
            failed_containers = report.failed_containers,
            all_lines = report.all_lines,
            error_lines = report.error_lines,
            dropped_error_lines = report.dropped_error_lines,
            skipped_lines = report.skipped_lines,
            filtered_lines = report.filtered_lines,
            "Collection tick complete"
        );
        report
    }

    async fn collect_container(&self, container_id: &str) -> ContainerOutcome {
        let name = self.reader.container_name(container_id).await;

        let cursor = match self.store.get_cursor(container_id) {
            Ok(cursor) => cursor.map(|c| c.last_timestamp),
            Err(e) => {
                tracing::warn!(container_id, error = %e, "Unreadable harvest cursor, ignoring it");
                None
            }
        };
        let cutoff = self.cutoff.cutoff(self.windower.now_utc(), cursor);

        let harvest = self.reader.harvest(container_id, cutoff);
        let stats = harvest.stats;
        let mut records: Vec<_> = harvest
            .records
            .into_iter()
            .filter(|r| cursor.map_or(true, |c| r.timestamp > c))
            .collect();
        let already_collected = stats.kept - records.len();
        // Written prefix must end at its newest record for the cursor to be exact.
        records.sort_by_key(|r| r.timestamp);

        let mut outcome = ContainerOutcome {
            skipped: stats.invalid(),
            filtered: stats.before_cutoff + already_collected,
            failed_files: stats.failed_files,
            ..ContainerOutcome::default()
        };

        if !records.is_empty() {
            let key = WindowKey::new(name.clone(), self.windower.current_bucket());
            let appended = self.accumulator.append_partitioned(&key, &records);
            outcome.summary = appended.summary;

            if let Some(newest) = records[..appended.summary.all_lines].last() {
                if let Err(e) = self.store.advance_cursor(container_id, newest.timestamp) {
                    tracing::error!(
                        container = %name,
                        error = %e,
                        "Failed to advance harvest cursor, records may be appended again"
                    );
                }
            }

            if let Some(e) = appended.failure {
                outcome.failed = true;
                tracing::error!(
                    container = %name,
                    window = %key.bucket,
                    error = %e,
                    pending = records.len(),
                    all_lines = appended.summary.all_lines,
                    dropped_error_lines = appended.summary.dropped_error_lines,
                    "Failed to append records"
                );
            }
        }

        tracing::info!(
            container = %name,
            all_lines = outcome.summary.all_lines,
            error_lines = outcome.summary.error_lines,
            malformed = stats.malformed,
            missing_timestamp = stats.missing_timestamp,
            bad_timestamp = stats.bad_timestamp,
            before_cutoff = stats.before_cutoff,
            already_collected,
            fallback_decoded = stats.fallback_decoded,
            failed_files = stats.failed_files,
            "Collected container logs"
        );
        outcome
    }

    /// Waits for a running collection before touching the closed window.
    pub async fn upload_tick(&self) -> UploadReport {
        let _pass = self.pass_lock.lock().await;
        UploadCoordinator::new(&self.windower, &self.accumulator, &self.remote, &self.identity)
            .upload_closed_window()
            .await
    }

    pub async fn sweep_local(&self) -> LocalSweepReport {
        let _pass = self.pass_lock.lock().await;
        self.sweeper
            .sweep_local(self.accumulator.root(), self.windower.now_utc())
    }

    pub async fn sweep_remote(&self) -> RemoteSweepReport {
        self.sweeper
            .sweep_remote(&self.remote, &self.identity, self.windower.now_utc())
            .await
    }
}
