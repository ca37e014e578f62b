use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use docker_log_harvester::accumulator::WindowAccumulator;
use docker_log_harvester::cli::{Cli, Command};
use docker_log_harvester::config::{load_credentials, Config};
use docker_log_harvester::harvest::names::DockerNameResolver;
use docker_log_harvester::harvest::SourceLogReader;
use docker_log_harvester::logging::{init_tracing, LogConfig};
use docker_log_harvester::pipeline::Pipeline;
use docker_log_harvester::remote::s3::S3Client;
use docker_log_harvester::retention::RetentionSweeper;
use docker_log_harvester::store::Store;
use docker_log_harvester::window::{SystemClock, TimeWindower};
use docker_log_harvester::workers::{self, WorkerManager};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&LogConfig::from_env());

    let mut config = Config::from_env();
    cli.apply(&mut config);
    tracing::info!(
        identity = %config.identity,
        command = ?cli.command(),
        "Starting docker-log-harvester"
    );

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }

    let credentials = match load_credentials(&config.credentials_file) {
        Ok(credentials) => credentials,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load remote-store credentials");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        bucket = %credentials.bucket,
        region = %credentials.region,
        "Loaded credentials"
    );

    let remote = S3Client::new(
        &credentials,
        Duration::from_secs(config.remote_timeout_secs),
    )
    .await;

    if let Err(e) = std::fs::create_dir_all(&config.harvest_dir) {
        tracing::error!(
            dir = %config.harvest_dir.display(),
            error = %e,
            "Failed to create harvest directory"
        );
        return ExitCode::FAILURE;
    }

    let store = match Store::open(&config.cursor_db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(
                path = %config.cursor_db_path.display(),
                error = %e,
                "Failed to open cursor database (is another instance running?)"
            );
            return ExitCode::FAILURE;
        }
    };

    let resolver = DockerNameResolver::new(
        config.docker_binary.clone(),
        Duration::from_secs(config.name_lookup_timeout_secs),
    );
    let pipeline = Arc::new(Pipeline {
        windower: TimeWindower::new(
            Arc::new(SystemClock),
            config.timezone,
            config.upload_grace_minutes,
        ),
        reader: SourceLogReader::new(&config.containers_dir, &config.harvest_dir, resolver),
        accumulator: WindowAccumulator::new(&config.harvest_dir),
        store: store.clone(),
        remote,
        sweeper: RetentionSweeper::from_days(
            config.retention.local_days,
            config.retention.remote_days,
        ),
        cutoff: config.cutoff,
        identity: config.identity.clone(),
        pass_lock: Default::default(),
    });

    match cli.command() {
        Command::Once => workers::run_once(&pipeline).await,
        Command::SweepRemote => {
            let report = pipeline.sweep_remote().await;
            if !report.complete {
                flush_store(&store);
                return ExitCode::FAILURE;
            }
        }
        Command::Run => {
            let (shutdown_tx, _) = broadcast::channel::<()>(8);
            let manager =
                WorkerManager::new(pipeline.clone(), shutdown_tx.subscribe(), &config.schedule);
            let handle = tokio::spawn(async move {
                if let Err(e) = manager.start().await {
                    tracing::error!(error = %e, "Worker manager failed");
                }
            });

            shutdown_signal(shutdown_tx).await;
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }

    flush_store(&store);
    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}

fn flush_store(store: &Store) {
    if let Err(e) = store.flush() {
        tracing::error!(error = %e, "Failed to flush cursor database before exit");
    }
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
