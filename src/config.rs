use std::collections::{BTreeSet, HashMap};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::constants::{DEFAULT_TIMEZONE, DEFAULT_UPLOAD_GRACE_MINUTES};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read credentials file {path}: {source}")]
    CredentialsFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("missing required credential(s): {0:?}")]
    MissingCredential(Vec<&'static str>),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub containers_dir: PathBuf,
    pub harvest_dir: PathBuf,
    pub cursor_db_path: PathBuf,
    pub identity: String,
    pub timezone: Tz,
    pub upload_grace_minutes: u32,
    pub cutoff: CutoffPolicy,
    pub schedule: ScheduleConfig,
    pub retention: RetentionConfig,
    pub docker_binary: String,
    pub name_lookup_timeout_secs: u64,
    pub remote_timeout_secs: u64,
    pub credentials_file: PathBuf,
}

/// How far back a collection tick looks for records. Either way the
/// per-container cursor raises the floor so nothing is appended twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoffPolicy {
    /// Short window ending now, sized to cover a delayed collection tick.
    Sliding { window: Duration },
    /// Fixed look-back such as "the last hour".
    Lookback { window: Duration },
}

impl CutoffPolicy {
    pub fn window(&self) -> Duration {
        match self {
            Self::Sliding { window } | Self::Lookback { window } => *window,
        }
    }

    pub fn cutoff(&self, now: DateTime<Utc>, cursor: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let window = chrono::Duration::from_std(self.window()).unwrap_or(chrono::Duration::zero());
        let floor = now - window;
        match cursor {
            Some(cursor) if cursor > floor => cursor,
            _ => floor,
        }
    }

    fn from_env() -> Self {
        match env_or("CUTOFF_POLICY", "sliding").trim().to_ascii_lowercase().as_str() {
            "lookback" => Self::Lookback {
                window: Duration::from_secs(env_or_parse("CUTOFF_WINDOW_SECS", 3600_u64)),
            },
            "sliding" => Self::Sliding {
                window: Duration::from_secs(env_or_parse("CUTOFF_WINDOW_SECS", 300_u64)),
            },
            other => {
                tracing::warn!(value = other, "Unknown CUTOFF_POLICY, using sliding");
                Self::Sliding {
                    window: Duration::from_secs(env_or_parse("CUTOFF_WINDOW_SECS", 300_u64)),
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub collect_cron: String,
    pub upload_cron: String,
    pub remote_sweep_cron: String,
    pub enable_remote_sweep: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    pub local_days: u64,
    pub remote_days: u64,
}

/// Remote-store credentials and bucket identity.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    pub endpoint_url: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***REDACTED***")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Self {
        let harvest_dir = PathBuf::from(env_or("HARVEST_DIR", "/tmp/docker-logs"));
        let cursor_db_path = env::var("CURSOR_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| harvest_dir.join(".cursors.sled"));
        let timezone = match env_or("TIMEZONE", DEFAULT_TIMEZONE).parse::<Tz>() {
            Ok(tz) => tz,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid TIMEZONE, using {DEFAULT_TIMEZONE}");
                chrono_tz::Europe::Paris
            }
        };

        Self {
            containers_dir: PathBuf::from(env_or(
                "DOCKER_CONTAINERS_DIR",
                "/var/lib/docker/containers",
            )),
            harvest_dir,
            cursor_db_path,
            identity: env::var("IDENTITY").unwrap_or_else(|_| default_identity()),
            timezone,
            upload_grace_minutes: env_or_parse("UPLOAD_GRACE_MINUTES", DEFAULT_UPLOAD_GRACE_MINUTES)
                .min(59),
            cutoff: CutoffPolicy::from_env(),
            schedule: ScheduleConfig {
                collect_cron: env_or("COLLECT_CRON", "0 */2 * * * *"),
                upload_cron: env_or("UPLOAD_CRON", "30 1,6 * * * *"),
                remote_sweep_cron: env_or("REMOTE_SWEEP_CRON", "0 0 4 * * *"),
                enable_remote_sweep: env_or_bool("ENABLE_REMOTE_SWEEP", true),
            },
            retention: RetentionConfig {
                local_days: env_or_parse("LOCAL_RETENTION_DAYS", 7_u64),
                remote_days: env_or_parse("REMOTE_RETENTION_DAYS", 45_u64),
            },
            docker_binary: env_or("DOCKER_BIN", "docker"),
            name_lookup_timeout_secs: env_or_parse("NAME_LOOKUP_TIMEOUT_SECS", 30_u64),
            remote_timeout_secs: env_or_parse("REMOTE_TIMEOUT_SECS", 60_u64),
            credentials_file: PathBuf::from(env_or(
                "CREDENTIALS_FILE",
                "/etc/docker-log-harvester.env",
            )),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.trim().is_empty() || self.identity.contains('/') {
            return Err(ConfigError::Invalid {
                key: "IDENTITY",
                message: format!("'{}' must be non-empty and contain no '/'", self.identity),
            });
        }
        if self.retention.remote_days < 1 {
            return Err(ConfigError::Invalid {
                key: "REMOTE_RETENTION_DAYS",
                message: "must be at least 1".to_string(),
            });
        }
        if self.retention.local_days < 1 {
            return Err(ConfigError::Invalid {
                key: "LOCAL_RETENTION_DAYS",
                message: "must be at least 1".to_string(),
            });
        }
        if self.retention.remote_days < 7 {
            tracing::warn!(
                days = self.retention.remote_days,
                "Remote retention is shorter than a week"
            );
        }
        self.validate_upload_cron()
    }

    /// Upload firings outside the grace window are skipped, so a schedule
    /// with none inside it would never upload anything.
    fn validate_upload_cron(&self) -> Result<(), ConfigError> {
        let cron = &self.schedule.upload_cron;
        let grace = self.upload_grace_minutes;
        let Some(minutes) = cron_minutes(cron) else {
            return Ok(());
        };

        let outside: Vec<u32> = minutes.iter().copied().filter(|m| *m >= grace).collect();
        if outside.len() == minutes.len() {
            return Err(ConfigError::Invalid {
                key: "UPLOAD_CRON",
                message: format!(
                    "'{cron}' never fires within the first {grace} minute(s) of the hour"
                ),
            });
        }
        if !outside.is_empty() {
            tracing::warn!(
                cron = %cron,
                grace_minutes = grace,
                ?outside,
                "Some upload firings fall outside the grace window and will do nothing"
            );
        }
        Ok(())
    }
}

/// Minutes matched by the second field of a six-field cron expression.
/// `None` when the field uses syntax this check does not understand; the
/// scheduler reports those itself.
fn cron_minutes(expr: &str) -> Option<BTreeSet<u32>> {
    let field = expr.split_whitespace().nth(1)?;
    let mut minutes = BTreeSet::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step.parse::<u32>().ok().filter(|s| *s > 0)?)),
            None => (item, None),
        };
        let (first, last) = match range {
            "*" => (0, 59),
            _ => match range.split_once('-') {
                Some((a, b)) => (a.parse().ok()?, b.parse().ok()?),
                None => {
                    let at: u32 = range.parse().ok()?;
                    (at, if step.is_some() { 59 } else { at })
                }
            },
        };
        if first > last || last > 59 {
            return None;
        }
        minutes.extend((first..=last).step_by(step.unwrap_or(1) as usize));
    }

    Some(minutes)
}

/// Loads credentials from the side file, letting process environment
/// values override it.
pub fn load_credentials(path: &Path) -> Result<Credentials, ConfigError> {
    let from_file = if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::CredentialsFileUnreadable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        parse_env_file(&raw)
    } else {
        HashMap::new()
    };

    let lookup = |key: &str| -> Option<String> {
        env::var(key)
            .ok()
            .or_else(|| from_file.get(key).cloned())
            .filter(|v| !v.trim().is_empty())
    };

    let required = [
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_REGION",
        "AWS_LOGS_BUCKET",
    ];
    let missing: Vec<&'static str> = required
        .iter()
        .copied()
        .filter(|key| lookup(key).is_none())
        .collect();
    if !missing.is_empty() {
        if !path.exists() {
            tracing::error!(path = %path.display(), "Credentials file not found");
        }
        return Err(ConfigError::MissingCredential(missing));
    }

    Ok(Credentials {
        access_key_id: lookup("AWS_ACCESS_KEY_ID").unwrap_or_default(),
        secret_access_key: lookup("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
        region: lookup("AWS_REGION").unwrap_or_default(),
        bucket: lookup("AWS_LOGS_BUCKET").unwrap_or_default(),
        endpoint_url: lookup("AWS_ENDPOINT_URL"),
    })
}

/// Parses `export KEY="value"` / `KEY=value` lines; comments and blank
/// lines are ignored.
pub fn parse_env_file(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

fn default_identity() -> String {
    env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    key,
                    value = %raw,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
