pub mod collect;
pub mod remote_sweep;
pub mod upload;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::ScheduleConfig;
use crate::harvest::names::NameResolver;
use crate::pipeline::Pipeline;
use crate::remote::ObjectStore;

/// Timeout for individual worker invocations (5 minutes).
const WORKER_TIMEOUT: Duration = Duration::from_secs(300);

/// Drain period before scheduler shutdown to let in-flight tasks complete.
#[cfg(test)]
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);
#[cfg(not(test))]
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerName {
    Collect,
    Upload,
    RemoteSweep,
}

impl WorkerName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::Upload => "upload",
            Self::RemoteSweep => "remote_sweep",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: WorkerName,
    pub cron: String,
    pub enabled: bool,
}

pub struct WorkerManager<R, S> {
    pipeline: Arc<Pipeline<R, S>>,
    shutdown_rx: broadcast::Receiver<()>,
    config: ScheduleConfig,
}

impl<R, S> WorkerManager<R, S>
where
    R: NameResolver + 'static,
    S: ObjectStore + 'static,
{
    pub fn new(
        pipeline: Arc<Pipeline<R, S>>,
        shutdown_rx: broadcast::Receiver<()>,
        config: &ScheduleConfig,
    ) -> Self {
        Self {
            pipeline,
            shutdown_rx,
            config: config.clone(),
        }
    }

    /// Single source of truth for all planned jobs and their cron schedules.
    /// Collection runs on the short period, upload (plus local sweep) on
    /// the long one.
    pub fn planned_jobs(&self) -> Vec<JobSpec> {
        vec![
            JobSpec {
                name: WorkerName::Collect,
                cron: self.config.collect_cron.clone(),
                enabled: true,
            },
            JobSpec {
                name: WorkerName::Upload,
                cron: self.config.upload_cron.clone(),
                enabled: true,
            },
            JobSpec {
                name: WorkerName::RemoteSweep,
                cron: self.config.remote_sweep_cron.clone(),
                enabled: self.config.enable_remote_sweep,
            },
        ]
    }

    /// Runs one collection immediately, then the scheduler until a shutdown
    /// signal arrives.
    pub async fn start(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        collect::run(&self.pipeline).await;

        let mut scheduler = JobScheduler::new().await?;

        self.register_jobs(&scheduler).await;

        scheduler.start().await?;

        tracing::info!("Worker manager started");
        let _ = self.shutdown_rx.recv().await;

        tracing::info!(
            "Worker manager shutting down, draining for {}s",
            DRAIN_TIMEOUT.as_secs()
        );
        tokio::time::sleep(DRAIN_TIMEOUT).await;
        let _ = scheduler.shutdown().await;
        Ok(())
    }

    async fn register_jobs(&self, scheduler: &JobScheduler) {
        for spec in self.planned_jobs() {
            if !spec.enabled {
                tracing::info!(name = spec.name.as_str(), "Skipping disabled worker");
                continue;
            }

            let pipeline = self.pipeline.clone();
            let name_str = spec.name.as_str();

            match spec.name {
                WorkerName::Collect => {
                    add_job(scheduler, &spec.cron, name_str, move || {
                        let pipeline = pipeline.clone();
                        async move {
                            collect::run(&pipeline).await;
                        }
                    })
                    .await;
                }
                WorkerName::Upload => {
                    add_job(scheduler, &spec.cron, name_str, move || {
                        let pipeline = pipeline.clone();
                        async move {
                            upload::run(&pipeline).await;
                        }
                    })
                    .await;
                }
                WorkerName::RemoteSweep => {
                    add_job(scheduler, &spec.cron, name_str, move || {
                        let pipeline = pipeline.clone();
                        async move {
                            remote_sweep::run(&pipeline).await;
                        }
                    })
                    .await;
                }
            }
            tracing::info!(name = name_str, cron = %spec.cron, "Registered worker");
        }
    }
}

/// One collection-and-upload pass for externally scheduled runs.
pub async fn run_once<R: NameResolver, S: ObjectStore>(pipeline: &Pipeline<R, S>) {
    collect::run(pipeline).await;
    upload::run(pipeline).await;
}

/// Add a job to the scheduler with an overlap guard and timeout wrapper.
async fn add_job<Fut, F>(scheduler: &JobScheduler, cron: &str, name: &'static str, mut run: F)
where
    F: FnMut() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(false));

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let guard = running.clone();

        if guard
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(
                worker = name,
                "Skipping worker invocation: previous run still in progress"
            );
            return Box::pin(async {});
        }

        let fut = run();
        Box::pin(async move {
            match tokio::time::timeout(WORKER_TIMEOUT, fut).await {
                Ok(()) => {}
                Err(_) => {
                    tracing::error!(
                        worker = name,
                        timeout_secs = WORKER_TIMEOUT.as_secs(),
                        "Worker timed out"
                    );
                }
            }
            guard.store(false, Ordering::SeqCst);
        })
    });

    match job {
        Ok(job) => {
            if let Err(err) = scheduler.add(job).await {
                tracing::error!(error=%err, cron, worker = name, "Failed to add worker job");
            }
        }
        Err(err) => tracing::error!(error=%err, cron, worker = name, "Failed to create worker job"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::constants::DEFAULT_UPLOAD_GRACE_MINUTES;

    #[test]
    fn all_worker_names_have_str() {
        for name in [WorkerName::Collect, WorkerName::Upload, WorkerName::RemoteSweep] {
            assert!(!name.as_str().is_empty(), "{:?} has empty str", name);
        }
    }

    #[tokio::test]
    async fn default_crons_are_accepted_by_scheduler() {
        let cfg = Config::from_env();
        for cron in [
            &cfg.schedule.collect_cron,
            &cfg.schedule.upload_cron,
            &cfg.schedule.remote_sweep_cron,
        ] {
            let job = Job::new_async(cron.as_str(), |_uuid, _lock| Box::pin(async {}));
            assert!(job.is_ok(), "cron {cron} should parse");
        }
    }

    #[test]
    fn default_upload_minutes_fall_inside_grace_window() {
        let cfg = Config::from_env();
        let minutes = cfg
            .schedule
            .upload_cron
            .split_whitespace()
            .nth(1)
            .expect("minute field");
        for minute in minutes.split(',') {
            let minute: u32 = minute.parse().expect("numeric minute");
            assert!(minute < DEFAULT_UPLOAD_GRACE_MINUTES);
        }
    }
}
