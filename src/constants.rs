/// Default reference timezone for bucket naming
pub const DEFAULT_TIMEZONE: &str = "Europe/Paris";

/// Minutes after each hour boundary during which the previous window may be uploaded
pub const DEFAULT_UPLOAD_GRACE_MINUTES: u32 = 10;

/// Docker writes one `<id>-json.log` (plus rotated `<id>-json.log.N`) per container
pub const SOURCE_LOG_SUFFIX: &str = "-json.log";

/// Suffix marking a per-tick private copy of a source log file
pub const TEMP_COPY_SUFFIX: &str = "_temp";

/// Directory (under the harvest dir) holding temp copies
pub const STAGING_DIR: &str = ".staging";

/// Plaintext artifact extension
pub const ARTIFACT_EXTENSION: &str = "log";

/// Extension appended to the compressed transient copy and to remote keys
pub const COMPRESSED_EXTENSION: &str = "gz";

/// Length of the container id prefix used when the name lookup fails
pub const SHORT_ID_LEN: usize = 12;

/// Upper bound on containers harvested concurrently
pub const MAX_CONCURRENT_CONTAINERS: usize = 4;

/// Seconds per day
pub const SECS_PER_DAY: u64 = 86_400;
