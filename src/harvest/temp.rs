use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::constants::TEMP_COPY_SUFFIX;

/// Private copy of a source log file, owned by one collection tick.
/// The file is removed when the guard drops, whether the copy or the
/// parse succeeded or not.
#[derive(Debug)]
pub struct TempCopy {
    path: PathBuf,
}

impl TempCopy {
    pub fn create(source: &Path, staging_dir: &Path, container_id: &str) -> io::Result<Self> {
        fs::create_dir_all(staging_dir)?;
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        let guard = Self {
            path: staging_dir.join(format!("{container_id}_{file_name}{TEMP_COPY_SUFFIX}")),
        };
        // Guard exists before the copy so a half-written copy is removed too.
        fs::copy(source, &guard.path)?;
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temp_copy(file_name: &str) -> bool {
        file_name.ends_with(TEMP_COPY_SUFFIX)
    }
}

impl Drop for TempCopy {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::trace!(path = %self.path.display(), "Removed temp copy"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove temp copy"
            ),
        }
    }
}
