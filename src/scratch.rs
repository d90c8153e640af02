use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::PreviewError;

/// Per-run scratch directory with guaranteed teardown.
///
/// The directory and everything inside it belong exclusively to one pipeline
/// run. Dropping the guard removes the directory regardless of how the run
/// ended; `cleanup` does the same eagerly and reports failures.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    /// Create a fresh scratch directory under `parent`.
    pub async fn create(parent: &Path) -> Result<Self, PreviewError> {
        let path = parent.join(format!("preview-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "Created scratch directory");
        Ok(Self {
            path,
            removed: false,
        })
    }

    /// Create a scratch directory under the system temp location.
    pub async fn create_in_temp() -> Result<Self, PreviewError> {
        Self::create(&std::env::temp_dir()).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now instead of waiting for `Drop`.
    pub async fn cleanup(mut self) -> Result<(), PreviewError> {
        self.removed = true;
        tokio::fs::remove_dir_all(&self.path).await?;
        debug!(path = %self.path.display(), "Removed scratch directory");
        Ok(())
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove scratch directory"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scratch_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(base.path()).await.unwrap();
        let path = scratch.path().to_path_buf();
        assert!(path.is_dir());

        tokio::fs::write(path.join("download"), b"bytes").await.unwrap();
        drop(scratch);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_scratch_eager_cleanup() {
        let base = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(base.path()).await.unwrap();
        let path = scratch.path().to_path_buf();

        scratch.cleanup().await.unwrap();
        assert!(!path.exists());
    }
}
