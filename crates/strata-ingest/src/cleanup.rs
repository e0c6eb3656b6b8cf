use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Files created by an ingest that is not yet committed.
///
/// Dropping the guard deletes every tracked file unless [`keep`](Self::keep)
/// was called, so early returns and unwinding both clean up.
#[derive(Debug, Default)]
pub struct WrittenFiles {
    paths: Vec<PathBuf>,
}

impl WrittenFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a file this ingest created. Only call after an exclusive create
    /// succeeded, so a pre-existing file is never removed.
    pub fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Move another guard's files into this one.
    pub fn absorb(&mut self, mut other: WrittenFiles) {
        self.paths.append(&mut other.paths);
    }

    /// Stop tracking: the files belong to committed rows now.
    pub fn keep(mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.paths)
    }

    /// Delete every tracked file now.
    pub fn remove_all(&mut self) {
        for path in self.paths.drain(..) {
            remove_quietly(&path);
        }
    }
}

impl Drop for WrittenFiles {
    fn drop(&mut self) {
        self.remove_all();
    }
}

/// Remove a file, logging instead of failing. A file that is already gone
/// counts as removed.
pub fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed file");
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "file already absent");
            false
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove file");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn drop_removes_tracked_files() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();
        {
            let mut files = WrittenFiles::new();
            files.track(a.clone());
        }
        assert!(!a.exists());
        assert!(b.exists());
    }

    #[test]
    fn keep_disarms() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        fs::write(&a, b"a").unwrap();
        let mut files = WrittenFiles::new();
        files.track(a.clone());
        assert_eq!(files.keep(), vec![a.clone()]);
        assert!(a.exists());
    }

    #[test]
    fn absorb_and_missing_files() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        fs::write(&a, b"a").unwrap();
        let mut outer = WrittenFiles::new();
        let mut inner = WrittenFiles::new();
        inner.track(a.clone());
        inner.track(dir.path().join("never-written"));
        outer.absorb(inner);
        assert_eq!(outer.paths().len(), 2);
        outer.remove_all();
        assert!(outer.is_empty());
        assert!(!a.exists());
    }
}
