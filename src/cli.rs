use clap::{Parser, Subcommand};

use crate::config::Config;

/// Harvests container JSON logs into hourly windows and ships them to
/// object storage.
#[derive(Debug, Parser)]
#[command(name = "docker-log-harvester", version, about)]
pub struct Cli {
    /// Identity prefix for remote keys (defaults to the host name)
    #[arg(long, env = "IDENTITY", global = true)]
    pub identity: Option<String>,

    /// Remote retention in days
    #[arg(long = "retention-days", global = true)]
    pub retention_days: Option<u64>,

    /// Local retention in days
    #[arg(long = "local-retention-days", global = true)]
    pub local_retention_days: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Long-lived scheduler (default)
    Run,
    /// One collection + upload + local sweep pass, then exit
    Once,
    /// Remote retention sweep only
    SweepRemote,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }

    /// Command-line values take precedence over the environment.
    pub fn apply(&self, config: &mut Config) {
        if let Some(identity) = &self.identity {
            config.identity = identity.clone();
        }
        if let Some(days) = self.retention_days {
            config.retention.remote_days = days;
        }
        if let Some(days) = self.local_retention_days {
            config.retention.local_days = days;
        }
    }
}
