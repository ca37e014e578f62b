//! Container display-name lookup.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use crate::constants::SHORT_ID_LEN;

#[derive(Debug, Error)]
pub enum NameLookupError {
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn lookup command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("lookup exited with status {0}")]
    Status(i32),
    #[error("lookup returned an unusable name: {0:?}")]
    Unusable(String),
}

pub trait NameResolver: Send + Sync {
    fn lookup(
        &self,
        container_id: &str,
    ) -> impl Future<Output = Result<String, NameLookupError>> + Send;
}

/// Resolves names with `docker inspect --format {{.Name}} <id>`.
#[derive(Debug, Clone)]
pub struct DockerNameResolver {
    binary: String,
    timeout: Duration,
}

impl DockerNameResolver {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

impl NameResolver for DockerNameResolver {
    async fn lookup(&self, container_id: &str) -> Result<String, NameLookupError> {
        let output = Command::new(&self.binary)
            .args(["inspect", "--format", "{{.Name}}", container_id])
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| NameLookupError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(NameLookupError::Status(output.status.code().unwrap_or(-1)));
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        sanitize_name(&raw).ok_or_else(|| NameLookupError::Unusable(raw.trim().to_string()))
    }
}

/// Accepts Docker's name alphabet only; the leading `/` Docker reports is
/// stripped. Anything else could escape the artifact tree or collide in
/// remote keys.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let name = raw.trim().trim_start_matches('/');
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    valid.then(|| name.to_string())
}

/// Stable fallback when the lookup fails: the short container id.
pub fn fallback_name(container_id: &str) -> String {
    container_id.chars().take(SHORT_ID_LEN).collect()
}

/// Never fails: a lookup error is logged and replaced by the short id.
pub async fn resolve_name<R: NameResolver>(resolver: &R, container_id: &str) -> String {
    match resolver.lookup(container_id).await {
        Ok(name) => name,
        Err(e) => {
            let fallback = fallback_name(container_id);
            tracing::warn!(
                container_id,
                fallback = %fallback,
                error = %e,
                "Container name lookup failed, using short id"
            );
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl NameResolver for Failing {
        async fn lookup(&self, _container_id: &str) -> Result<String, NameLookupError> {
            Err(NameLookupError::Status(1))
        }
    }

    #[test]
    fn strips_leading_slash_and_rejects_paths() {
        assert_eq!(sanitize_name("/web-backend\n"), Some("web-backend".to_string()));
        assert_eq!(sanitize_name("db_1.primary"), Some("db_1.primary".to_string()));
        assert_eq!(sanitize_name(""), None);
        assert_eq!(sanitize_name("/.."), None);
        assert_eq!(sanitize_name("a/b"), None);
        assert_eq!(sanitize_name(".hidden"), None);
    }

    #[tokio::test]
    async fn lookup_failure_falls_back_to_short_id() {
        let id = "4f66ad9a0b2e5b7c1d3e8f90a1b2c3d4e5f60718293a4b5c6d7e8f9012345678";
        assert_eq!(resolve_name(&Failing, id).await, "4f66ad9a0b2e");
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let resolver = DockerNameResolver::new(
            "/nonexistent/docker-binary-for-tests",
            Duration::from_secs(1),
        );
        let err = resolver.lookup("abc").await.unwrap_err();
        assert!(matches!(err, NameLookupError::Spawn(_)));
    }
}
