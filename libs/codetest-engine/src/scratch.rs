//! Ephemeral per-run working directories.
//!
//! Every runner call gets its own directory holding the submitted code. Names
//! come from the allocator (random suffix via `tempfile`), never from callers,
//! so concurrent runs of the same or different submissions cannot collide.
//! The directory is removed when the [`ScratchUnit`] is dropped, which covers
//! normal returns, early `?` returns, panics and task abortion alike.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const SCRATCH_PREFIX: &str = "codetest-";

#[derive(Debug, Clone)]
pub struct ScratchAllocator {
    root: PathBuf,
    script_name: String,
}

impl ScratchAllocator {
    /// `root` defaults to the system temp dir.
    pub fn new(root: Option<PathBuf>, script_name: impl Into<String>) -> Self {
        Self {
            root: root.unwrap_or_else(std::env::temp_dir),
            script_name: script_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, uniquely named scratch directory.
    pub fn allocate(&self) -> io::Result<ScratchUnit> {
        std::fs::create_dir_all(&self.root)?;

        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.root)?;
        let script_path = dir.path().join(&self.script_name);

        debug!(path = %dir.path().display(), "Allocated scratch unit");

        Ok(ScratchUnit { dir, script_path })
    }
}

/// Scratch directory plus the path the code is written to.
#[derive(Debug)]
pub struct ScratchUnit {
    dir: TempDir,
    script_path: PathBuf,
}

impl ScratchUnit {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub async fn write_code(&self, code: &str) -> io::Result<()> {
        tokio::fs::write(&self.script_path, code).await
    }

    /// Remove the directory now, logging instead of failing if that does not work.
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove scratch unit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_allocate_write_release() {
        let root = tempfile::tempdir().unwrap();
        let allocator = ScratchAllocator::new(Some(root.path().to_path_buf()), "main.py");

        let unit = allocator.allocate().unwrap();
        unit.write_code("print(1)").await.unwrap();

        let dir = unit.path().to_path_buf();
        assert!(dir.starts_with(root.path()));
        assert_eq!(
            std::fs::read_to_string(unit.script_path()).unwrap(),
            "print(1)"
        );

        unit.release();
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let allocator = ScratchAllocator::new(Some(root.path().to_path_buf()), "main.py");

        let dir = {
            let unit = allocator.allocate().unwrap();
            unit.path().to_path_buf()
        };

        assert!(!dir.exists());
    }

    #[test]
    fn test_names_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let allocator = ScratchAllocator::new(Some(root.path().to_path_buf()), "main.py");

        let units: Vec<_> = (0..32).map(|_| allocator.allocate().unwrap()).collect();
        let paths: HashSet<_> = units.iter().map(|u| u.path().to_path_buf()).collect();

        assert_eq!(paths.len(), 32);
    }

    #[test]
    fn test_missing_root_is_created() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        let allocator = ScratchAllocator::new(Some(nested.clone()), "main.py");

        let unit = allocator.allocate().unwrap();
        assert!(unit.path().starts_with(&nested));
    }
}
