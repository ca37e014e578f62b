//! Remote object storage boundary.

pub mod s3;

use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::constants::COMPRESSED_EXTENSION;
use crate::window::{ArtifactKind, WindowKey};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote request timed out")]
    Timeout,
    #[error("remote network error: {0}")]
    Network(String),
    #[error("remote returned status={status}, body={body}")]
    Status { status: u16, body: String },
    #[error("failed to decode remote response: {0}")]
    Decode(String),
    #[error("invalid remote request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<RemoteObject>,
    pub next_token: Option<String>,
}

/// Black-box blob store scoped to one bucket. Implementations must bound
/// every call by a timeout.
pub trait ObjectStore: Send + Sync {
    fn put(
        &self,
        key: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> impl Future<Output = Result<ListPage, RemoteError>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// `<identity>/`, the prefix every key of this deployment lives under.
pub fn identity_prefix(identity: &str) -> String {
    format!("{identity}/")
}

/// `<identity>/<container>/<YYYY-MM-DD>/<HHh00min>_<kind>.log.gz`
pub fn remote_key(identity: &str, window: &WindowKey, kind: ArtifactKind) -> String {
    format!(
        "{}{}/{}/{}.{}",
        identity_prefix(identity),
        window.container,
        window.bucket.date_label(),
        kind.file_name(&window.bucket),
        COMPRESSED_EXTENSION
    )
}
