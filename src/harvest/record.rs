//! Strict decode of one Docker `json-file` log line.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("stderr") => Self::Stderr,
            _ => Self::Stdout,
        }
    }
}

/// One parsed source line. `payload` is the original line, without its
/// trailing newline, exactly as it is written to artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub stream: Stream,
    pub payload: String,
}

impl LogRecord {
    pub fn is_error(&self) -> bool {
        self.stream == Stream::Stderr
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("malformed json: {0}")]
    Malformed(String),
    #[error("record has no timestamp")]
    MissingTimestamp,
    #[error("unparseable timestamp: {0}")]
    BadTimestamp(String),
}

#[derive(Deserialize)]
struct RawLine {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    time: Option<String>,
}

pub fn parse_line(line: &str) -> Result<LogRecord, LineError> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let raw: RawLine =
        serde_json::from_str(trimmed).map_err(|e| LineError::Malformed(e.to_string()))?;

    let time = raw
        .time
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(LineError::MissingTimestamp)?;
    let timestamp = DateTime::parse_from_rfc3339(time)
        .map_err(|_| LineError::BadTimestamp(time.to_string()))?
        .with_timezone(&Utc);

    Ok(LogRecord {
        timestamp,
        stream: Stream::from_label(raw.stream.as_deref()),
        payload: trimmed.to_string(),
    })
}

/// Decodes one raw line as UTF-8, falling back to Latin-1 (every byte maps
/// to a char) when it is not valid UTF-8. The flag reports the fallback.
pub fn decode_line(bytes: &[u8]) -> (String, bool) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), false),
        Err(_) => (bytes.iter().map(|&b| b as char).collect(), true),
    }
}
