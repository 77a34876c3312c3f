//! Per-run workspace directories.
//!
//! Every assessment run owns one uniquely named directory; nothing outside
//! the owning run touches it, and it is removed best-effort on every exit
//! path.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Exclusively-owned filesystem scope for one assessment run.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    created_at: Instant,
}

impl Workspace {
    /// Create a fresh uniquely named workspace under the system temp root.
    pub fn create(prefix: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{prefix}-"))
            .tempdir()
            .with_context(|| format!("failed to create workspace for '{prefix}'"))?;
        // Ownership of the directory moves to this struct; cleanup is
        // explicit so a failure can be logged instead of silently dropped.
        let root = dir.keep();
        debug!(path = %root.display(), "workspace created");
        Ok(Self {
            root,
            created_at: Instant::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Delete the workspace. Best-effort: failure is logged, never raised.
    pub async fn cleanup(self) {
        let lived_ms = self.created_at.elapsed().as_millis() as u64;
        if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
            warn!(path = %self.root.display(), error = %e, "workspace cleanup failed");
        } else {
            debug!(path = %self.root.display(), lived_ms, "workspace removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn workspaces_are_unique_and_independent() {
        let a = Workspace::create("assess-test").unwrap();
        let b = Workspace::create("assess-test").unwrap();
        assert_ne!(a.path(), b.path());

        std::fs::write(a.path().join("marker.txt"), "a").unwrap();
        std::fs::write(b.path().join("marker.txt"), "b").unwrap();

        let b_marker = b.path().join("marker.txt");
        a.cleanup().await;

        // Deleting one run's workspace must not affect the other's.
        assert_eq!(std::fs::read_to_string(&b_marker).unwrap(), "b");
        b.cleanup().await;
    }

    #[tokio::test]
    async fn cleanup_tolerates_missing_directory() {
        let ws = Workspace::create("assess-test").unwrap();
        std::fs::remove_dir_all(ws.path()).unwrap();
        // Must not panic or error out.
        ws.cleanup().await;
    }
}
