use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use strata_config::KindConfig;
use strata_types::{ContentKind, NamingMode};
use tracing::{debug, info};

use crate::error::{ShardError, ShardResult};
use crate::naming::sequential_name;
use crate::traits::ShardLayout;
use crate::tree::ShardTree;

/// Where the next blob of a kind should be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// The leaf directory to write into.
    pub directory: PathBuf,
    /// Allocator-chosen file name in sequential mode; `None` when the caller
    /// names the file itself.
    pub sequential_name: Option<String>,
}

impl Allocation {
    /// Full path of the file to create. `caller_name` is used only in
    /// content-addressed mode.
    pub fn file_path(&self, caller_name: &str) -> PathBuf {
        match &self.sequential_name {
            Some(name) => self.directory.join(name),
            None => self.directory.join(caller_name),
        }
    }
}

/// The cached current leaf.
#[derive(Debug)]
struct Cursor {
    leaf: PathBuf,
    /// Next sequential file number in `leaf`. Unused in content-addressed mode.
    next_seq: AtomicU64,
}

impl Cursor {
    fn new(leaf: PathBuf, next_seq: u64) -> Arc<Self> {
        Arc::new(Self {
            leaf,
            next_seq: AtomicU64::new(next_seq),
        })
    }
}

/// Hands out write locations inside one kind's shard tree.
///
/// The common case reads the cached leaf under a shared lock and checks its
/// fullness without serializing callers. Only initialization and crossing a
/// leaf boundary take the exclusive advance lock, and both re-check state
/// after acquiring it.
///
/// Validation and the caller's write are not atomic. In content-addressed
/// mode, writers that race past the fullness check may overfill a leaf by at
/// most the number of concurrent writers. Sequential mode reserves names
/// atomically, so its leaves never exceed the fanout.
pub struct BlobShardAllocator<L: ShardLayout = ShardTree> {
    layout: L,
    kind: ContentKind,
    naming: NamingMode,
    fanout: u32,
    name_width: usize,
    extension: String,
    cursor: RwLock<Option<Arc<Cursor>>>,
    advance_lock: Mutex<()>,
}

impl BlobShardAllocator<ShardTree> {
    /// Build an allocator over the kind's configured tree.
    ///
    /// Fails if the root is missing or not a directory; the tree itself is
    /// not scanned until the first allocation.
    pub fn open(config: &KindConfig) -> ShardResult<Self> {
        let tree = ShardTree::from_config(config)?;
        Ok(Self::with_layout(tree, config))
    }
}

impl<L: ShardLayout> BlobShardAllocator<L> {
    pub fn with_layout(layout: L, config: &KindConfig) -> Self {
        Self {
            layout,
            kind: config.kind,
            naming: config.naming,
            fanout: config.fanout,
            name_width: config.name_width,
            extension: config.extension.clone().unwrap_or_default(),
            cursor: RwLock::new(None),
            advance_lock: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn naming(&self) -> NamingMode {
        self.naming
    }

    pub fn layout(&self) -> &L {
        &self.layout
    }

    /// The cached leaf, if the allocator has been initialized.
    pub fn current_leaf(&self) -> ShardResult<Option<PathBuf>> {
        Ok(self.load()?.map(|c| c.leaf.clone()))
    }

    /// Forget the cached cursor. The next allocation rescans the tree, as
    /// after a process restart.
    pub fn reset(&self) -> ShardResult<()> {
        let _guard = self.advance_lock.lock().map_err(|_| ShardError::LockPoisoned)?;
        *self.cursor.write().map_err(|_| ShardError::LockPoisoned)? = None;
        Ok(())
    }

    /// Choose the location of the next blob.
    pub fn allocate(&self) -> ShardResult<Allocation> {
        let cursor = match self.load()? {
            Some(cursor) => cursor,
            None => self.initialize()?,
        };

        if !self.is_full(&cursor)? {
            if let Some(allocation) = self.reserve(&cursor) {
                debug!(kind = %self.kind, dir = %allocation.directory.display(), "allocated");
                return Ok(allocation);
            }
        }
        self.advance()
    }

    fn load(&self) -> ShardResult<Option<Arc<Cursor>>> {
        let guard = self.cursor.read().map_err(|_| ShardError::LockPoisoned)?;
        Ok(guard.clone())
    }

    fn store(&self, cursor: Arc<Cursor>) -> ShardResult<()> {
        *self.cursor.write().map_err(|_| ShardError::LockPoisoned)? = Some(cursor);
        Ok(())
    }

    fn initialize(&self) -> ShardResult<Arc<Cursor>> {
        let _guard = self.advance_lock.lock().map_err(|_| ShardError::LockPoisoned)?;
        if let Some(cursor) = self.load()? {
            return Ok(cursor);
        }

        let leaf = self.layout.initialize()?;
        let next_seq = self.recover_sequence(&leaf)?;
        let cursor = Cursor::new(leaf, next_seq);
        info!(
            kind = %self.kind,
            leaf = %cursor.leaf.display(),
            next_seq,
            "allocator cursor initialized"
        );
        self.store(cursor.clone())?;
        Ok(cursor)
    }

    fn recover_sequence(&self, leaf: &Path) -> ShardResult<u64> {
        if self.naming != NamingMode::Sequential {
            return Ok(0);
        }
        Ok(self.layout.last_sequence(leaf)?.map_or(0, |n| n + 1))
    }

    fn is_full(&self, cursor: &Cursor) -> ShardResult<bool> {
        if self.naming == NamingMode::Sequential
            && cursor.next_seq.load(Ordering::Acquire) >= u64::from(self.fanout)
        {
            return Ok(true);
        }
        self.layout.is_full(&cursor.leaf, self.fanout)
    }

    /// Hand out a location in `cursor`'s leaf, or `None` if sequential names
    /// for this leaf are used up.
    fn reserve(&self, cursor: &Cursor) -> Option<Allocation> {
        let sequential_name = match self.naming {
            NamingMode::ContentAddressed => None,
            NamingMode::Sequential => {
                let n = cursor.next_seq.fetch_add(1, Ordering::AcqRel);
                if n >= u64::from(self.fanout) {
                    return None;
                }
                Some(sequential_name(n, self.name_width, &self.extension))
            }
        };
        Some(Allocation {
            directory: cursor.leaf.clone(),
            sequential_name,
        })
    }

    fn advance(&self) -> ShardResult<Allocation> {
        let _guard = self.advance_lock.lock().map_err(|_| ShardError::LockPoisoned)?;
        loop {
            // Another thread may have advanced while we waited for the lock.
            let cursor = match self.load()? {
                Some(cursor) => cursor,
                None => {
                    let leaf = self.layout.initialize()?;
                    let next_seq = self.recover_sequence(&leaf)?;
                    let cursor = Cursor::new(leaf, next_seq);
                    self.store(cursor.clone())?;
                    cursor
                }
            };
            if !self.is_full(&cursor)? {
                if let Some(allocation) = self.reserve(&cursor) {
                    return Ok(allocation);
                }
            }

            let leaf = self.layout.advance(&cursor.leaf)?;
            info!(kind = %self.kind, leaf = %leaf.display(), "allocator cursor advanced");
            self.store(Cursor::new(leaf, 0))?;
        }
    }
}

impl<L: ShardLayout> std::fmt::Debug for BlobShardAllocator<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let leaf = self.load().ok().flatten().map(|c| c.leaf.clone());
        f.debug_struct("BlobShardAllocator")
            .field("kind", &self.kind)
            .field("naming", &self.naming)
            .field("fanout", &self.fanout)
            .field("leaf", &leaf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;

    use proptest::prelude::*;
    use tempfile::TempDir;

    fn documents(dir: &TempDir, depth: u32, fanout: u32) -> BlobShardAllocator {
        let config =
            KindConfig::content_addressed(ContentKind::Document, dir.path(), depth, fanout).unwrap();
        BlobShardAllocator::open(&config).unwrap()
    }

    fn images(dir: &TempDir, depth: u32, fanout: u32) -> BlobShardAllocator {
        let config =
            KindConfig::sequential(ContentKind::Image, dir.path(), depth, fanout, "jpg").unwrap();
        BlobShardAllocator::open(&config).unwrap()
    }

    /// Allocate and immediately write a file, the way the ingest writer does.
    fn allocate_and_write(alloc: &BlobShardAllocator, name: &str) -> PathBuf {
        let allocation = alloc.allocate().unwrap();
        let path = allocation.file_path(name);
        fs::write(&path, b"blob").unwrap();
        path
    }

    fn leaf_file_counts(root: &Path, depth: u32) -> Vec<usize> {
        fn walk(dir: &Path, remaining: u32, out: &mut Vec<usize>) {
            if remaining == 0 {
                out.push(fs::read_dir(dir).unwrap().count());
                return;
            }
            let mut children: Vec<_> = fs::read_dir(dir)
                .unwrap()
                .map(|e| e.unwrap().path())
                .filter(|p| p.is_dir())
                .collect();
            children.sort();
            for child in children {
                walk(&child, remaining - 1, out);
            }
        }
        let mut out = Vec::new();
        walk(root, depth, &mut out);
        out
    }

    #[test]
    fn open_requires_existing_root() {
        let dir = TempDir::new().unwrap();
        let config =
            KindConfig::content_addressed(ContentKind::Document, dir.path().join("missing"), 2, 10)
                .unwrap();
        assert!(matches!(
            BlobShardAllocator::open(&config),
            Err(ShardError::RootMissing(_))
        ));
    }

    #[test]
    fn first_allocation_initializes_cursor() {
        let dir = TempDir::new().unwrap();
        let alloc = documents(&dir, 2, 10);
        assert!(alloc.current_leaf().unwrap().is_none());
        let a = alloc.allocate().unwrap();
        assert!(a.sequential_name.is_none());
        assert_eq!(alloc.current_leaf().unwrap(), Some(a.directory.clone()));
        assert!(a.directory.ends_with("0/0"));
    }

    #[test]
    fn content_addressed_bounded_leaves() {
        let dir = TempDir::new().unwrap();
        let alloc = documents(&dir, 2, 3);
        for i in 0..9 {
            allocate_and_write(&alloc, &format!("doc-{i}"));
        }
        assert_eq!(leaf_file_counts(alloc.layout().root(), 2), vec![3, 3, 3]);
    }

    #[test]
    fn sequential_names_restart_per_leaf() {
        let dir = TempDir::new().unwrap();
        let alloc = images(&dir, 1, 3);
        let names: Vec<String> = (0..5)
            .map(|_| {
                let a = alloc.allocate().unwrap();
                let path = a.file_path("ignored");
                fs::write(&path, b"img").unwrap();
                format!(
                    "{}/{}",
                    a.directory.file_name().unwrap().to_string_lossy(),
                    a.sequential_name.unwrap()
                )
            })
            .collect();
        assert_eq!(names, vec!["0/0.jpg", "0/1.jpg", "0/2.jpg", "1/0.jpg", "1/1.jpg"]);
    }

    #[test]
    fn each_allocation_reserves_a_name() {
        let dir = TempDir::new().unwrap();
        let alloc = images(&dir, 1, 2);
        // A name is handed out once per call, written or not.
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        let c = alloc.allocate().unwrap();
        assert_eq!(a.sequential_name.as_deref(), Some("0.jpg"));
        assert_eq!(b.sequential_name.as_deref(), Some("1.jpg"));
        assert_eq!(c.sequential_name.as_deref(), Some("0.jpg"));
        assert_ne!(a.directory, c.directory);
    }

    #[test]
    fn exhaustion_with_depth_one_fanout_two() {
        let dir = TempDir::new().unwrap();
        let alloc = documents(&dir, 1, 2);
        for i in 0..4 {
            allocate_and_write(&alloc, &format!("doc-{i}"));
        }
        let err = alloc.allocate().unwrap_err();
        assert!(err.is_exhausted());

        let mut dirs: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        dirs.sort();
        assert_eq!(dirs, vec!["0", "1"]);
        // Still exhausted on retry.
        assert!(alloc.allocate().unwrap_err().is_exhausted());
    }

    #[test]
    fn restart_resumes_from_largest_leaf() {
        let dir = TempDir::new().unwrap();
        let first = documents(&dir, 2, 2);
        for i in 0..5 {
            allocate_and_write(&first, &format!("doc-{i}"));
        }
        let last_leaf = first.current_leaf().unwrap().unwrap();
        drop(first);

        let restarted = documents(&dir, 2, 2);
        let a = restarted.allocate().unwrap();
        assert_eq!(a.directory, last_leaf);
        assert!(a.directory.ends_with("1/0"));
    }

    #[test]
    fn restart_recovers_sequence_counter() {
        let dir = TempDir::new().unwrap();
        let first = images(&dir, 1, 10);
        for _ in 0..3 {
            allocate_and_write(&first, "ignored");
        }
        first.reset().unwrap();
        let a = first.allocate().unwrap();
        assert_eq!(a.sequential_name.as_deref(), Some("3.jpg"));
    }

    #[test]
    fn foreign_files_fill_content_addressed_leaves() {
        let dir = TempDir::new().unwrap();
        let alloc = documents(&dir, 1, 2);
        let leaf = alloc.allocate().unwrap().directory;
        fs::write(leaf.join(".DS_Store"), b"x").unwrap();
        fs::write(leaf.join("notes"), b"x").unwrap();
        let next = alloc.allocate().unwrap().directory;
        assert_ne!(leaf, next);
    }

    #[test]
    fn concurrent_allocation_stays_monotonic() {
        let dir = TempDir::new().unwrap();
        let alloc = Arc::new(images(&dir, 2, 5));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    for _ in 0..5 {
                        let a = alloc.allocate().unwrap();
                        let path = a.file_path("ignored");
                        fs::OpenOptions::new()
                            .write(true)
                            .create_new(true)
                            .open(&path)
                            .unwrap();
                        seen.push(a.directory);
                    }
                    seen
                })
            })
            .collect();

        for handle in handles {
            let seen = handle.join().unwrap();
            assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        }
        // Sequential reservations are unique, so no leaf exceeds the fanout.
        assert!(leaf_file_counts(alloc.layout().root(), 2).iter().all(|&n| n <= 5));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn cursor_never_moves_backward(fanout in 2u32..5, depth in 1u32..3, writes in 1usize..20) {
            let dir = TempDir::new().unwrap();
            let alloc = documents(&dir, depth, fanout);
            let mut previous: Option<PathBuf> = None;
            for i in 0..writes {
                let allocation = match alloc.allocate() {
                    Ok(a) => a,
                    Err(e) => {
                        prop_assert!(e.is_exhausted());
                        break;
                    }
                };
                if let Some(prev) = &previous {
                    prop_assert!(allocation.directory >= *prev);
                }
                fs::write(allocation.file_path(&format!("f{i}")), b"x").unwrap();
                previous = Some(allocation.directory);
            }
            for count in leaf_file_counts(alloc.layout().root(), depth) {
                prop_assert!(count <= fanout as usize);
            }
        }
    }
}
