use std::path::{Path, PathBuf};

use crate::error::ShardResult;

/// Filesystem state of a bounded-fanout shard tree.
///
/// All directory scanning goes through this trait so that allocation policy
/// ([`crate::BlobShardAllocator`]) never touches the filesystem directly.
/// Implementations must satisfy these invariants:
/// - `initialize` and `advance` return a leaf exactly `depth` levels below
///   the root.
/// - `advance` only ever returns a leaf that sorts after its input.
/// - Exhaustion is reported as [`crate::ShardError::StoreExhausted`] and
///   leaves the tree unchanged.
pub trait ShardLayout: Send + Sync {
    /// The root of the tree.
    fn root(&self) -> &Path;

    /// Walk from the root to the current leaf, creating `0..0` directories
    /// where a level is empty.
    fn initialize(&self) -> ShardResult<PathBuf>;

    /// Whether `leaf` holds at least `limit` counted entries.
    fn is_full(&self, leaf: &Path, limit: u32) -> ShardResult<bool>;

    /// Move past a full leaf to the next one, creating it.
    fn advance(&self, leaf: &Path) -> ShardResult<PathBuf>;

    /// Highest sequential file number already present in `leaf`, if any.
    ///
    /// Content-addressed layouts return `Ok(None)`.
    fn last_sequence(&self, leaf: &Path) -> ShardResult<Option<u64>>;
}
