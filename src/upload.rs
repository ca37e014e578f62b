//! Compress-and-ship of closed windows.
//!
//! A plaintext artifact is removed if and only if the remote put for its
//! key succeeded in the current pass. On failure only the compressed
//! transient copy is removed so the next pass can retry.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::accumulator::{Artifact, WindowAccumulator};
use crate::constants::COMPRESSED_EXTENSION;
use crate::remote::{remote_key, ObjectStore, RemoteError};
use crate::window::TimeWindower;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to compress {path}: {source}")]
    Compress {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read compressed copy {path}: {source}")]
    ReadCompressed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("remote put failed: {0}")]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    /// False when the pass was skipped because "now" is outside the grace window.
    pub ran: bool,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes_uploaded: u64,
}

pub struct UploadCoordinator<'a, S> {
    windower: &'a TimeWindower,
    accumulator: &'a WindowAccumulator,
    store: &'a S,
    identity: &'a str,
}

impl<'a, S: ObjectStore> UploadCoordinator<'a, S> {
    pub fn new(
        windower: &'a TimeWindower,
        accumulator: &'a WindowAccumulator,
        store: &'a S,
        identity: &'a str,
    ) -> Self {
        Self {
            windower,
            accumulator,
            store,
            identity,
        }
    }

    /// Uploads every artifact of the previous hour. Outside the grace
    /// window this is a no-op. One artifact failing never stops the others.
    pub async fn upload_closed_window(&self) -> UploadReport {
        let mut report = UploadReport::default();
        if !self.windower.is_upload_grace_window() {
            tracing::debug!(
                now = %self.windower.now_in_zone(),
                "Outside upload grace window, skipping upload"
            );
            return report;
        }
        report.ran = true;

        let bucket = self.windower.previous_bucket();
        let artifacts = self.accumulator.artifacts_for(&bucket);
        if artifacts.is_empty() {
            tracing::info!(window = %bucket, "No artifacts to upload");
            return report;
        }

        for artifact in &artifacts {
            report.attempted += 1;
            match self.upload_artifact(artifact).await {
                Ok(bytes) => {
                    report.succeeded += 1;
                    report.bytes_uploaded += bytes;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        path = %artifact.path.display(),
                        error = %e,
                        "Upload failed, plaintext kept for retry"
                    );
                }
            }
        }

        tracing::info!(
            window = %bucket,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            bytes = report.bytes_uploaded,
            "Upload pass complete"
        );
        report
    }

    async fn upload_artifact(&self, artifact: &Artifact) -> Result<u64, UploadError> {
        let key = remote_key(self.identity, &artifact.window, artifact.kind);
        let compressed = compressed_path(&artifact.path);

        let result = self.compress_and_put(artifact, &compressed, &key).await;
        remove_if_exists(&compressed);

        let bytes = result?;
        tracing::info!(key = %key, bytes, "Uploaded artifact");
        if let Err(e) = fs::remove_file(&artifact.path) {
            tracing::warn!(
                path = %artifact.path.display(),
                error = %e,
                "Uploaded artifact could not be removed locally"
            );
        }
        Ok(bytes)
    }

    async fn compress_and_put(
        &self,
        artifact: &Artifact,
        compressed: &Path,
        key: &str,
    ) -> Result<u64, UploadError> {
        gzip_file(&artifact.path, compressed).map_err(|source| UploadError::Compress {
            path: artifact.path.clone(),
            source,
        })?;
        let body = fs::read(compressed).map_err(|source| UploadError::ReadCompressed {
            path: compressed.to_path_buf(),
            source,
        })?;
        let bytes = body.len() as u64;
        self.store.put(key, body).await?;
        Ok(bytes)
    }
}

/// `<artifact>.gz`, next to the plaintext.
pub fn compressed_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(".");
    name.push(COMPRESSED_EXTENSION);
    PathBuf::from(name)
}

fn gzip_file(source: &Path, dest: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(source)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(dest)?), Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to remove compressed copy"
        ),
    }
}
