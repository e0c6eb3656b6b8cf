use std::path::{Path, PathBuf};

/// Errors from shard tree and allocator operations.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    /// The configured root does not exist (incomplete installation).
    #[error("shard root does not exist: {0}")]
    RootMissing(PathBuf),

    /// The configured root exists but is not a directory.
    #[error("shard root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    /// Every directory in the tree is full. Operators must add capacity;
    /// retrying cannot succeed.
    #[error("shard tree under {root} is exhausted")]
    StoreExhausted { root: PathBuf },

    /// The tree on disk contradicts the numbering scheme (a directory that
    /// should not exist does, or a name does not parse).
    #[error("shard tree inconsistent at {path}: {reason}")]
    TreeInconsistent { path: PathBuf, reason: String },

    /// I/O failure while listing or creating a directory.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A thread panicked while holding the allocator's cursor.
    #[error("allocator lock poisoned")]
    LockPoisoned,
}

impl ShardError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::StoreExhausted { .. })
    }

    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn inconsistent(path: &Path, reason: impl Into<String>) -> Self {
        Self::TreeInconsistent {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Result alias for shard operations.
pub type ShardResult<T> = Result<T, ShardError>;
