use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use strata_config::KindConfig;
use strata_types::NamingMode;
use tracing::{debug, info, warn};

use crate::error::{ShardError, ShardResult};
use crate::naming::{format_name, parse_name, parse_sequential, width_for};
use crate::traits::ShardLayout;

/// Which entries of a leaf count toward its limit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeafFilter {
    /// Every entry counts, foreign files included. A content-addressed leaf
    /// exists only to bound directory size.
    AllEntries,
    /// Only files named `[0-9]+.<extension>` count. Derived artifacts such
    /// as thumbnails sit alongside without consuming slots.
    SequentialFiles { extension: String },
}

/// Directory-listing implementation of [`ShardLayout`].
///
/// Branch levels are counted with a numeric-name filter (foreign entries
/// are ignored), while leaf fullness uses the [`LeafFilter`] for the kind.
#[derive(Clone, Debug)]
pub struct ShardTree {
    root: PathBuf,
    depth: u32,
    fanout: u32,
    width: usize,
    filter: LeafFilter,
}

impl ShardTree {
    /// Build a tree over an existing root directory.
    pub fn new(root: impl Into<PathBuf>, depth: u32, fanout: u32, filter: LeafFilter) -> ShardResult<Self> {
        let root = root.into();
        check_root(&root)?;
        let root = fs::canonicalize(&root).map_err(ShardError::io(&root))?;
        Ok(Self {
            root,
            depth,
            fanout,
            width: width_for(fanout),
            filter,
        })
    }

    /// Build the tree described by a validated kind configuration.
    pub fn from_config(config: &KindConfig) -> ShardResult<Self> {
        let filter = match (config.naming, config.extension.as_deref()) {
            (NamingMode::Sequential, Some(ext)) => LeafFilter::SequentialFiles {
                extension: ext.to_string(),
            },
            _ => LeafFilter::AllEntries,
        };
        Self::new(&config.root, config.depth, config.fanout, filter)
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn fanout(&self) -> u32 {
        self.fanout
    }

    pub fn filter(&self) -> &LeafFilter {
        &self.filter
    }

    /// Directory name for child number `n`.
    fn name(&self, n: u64) -> String {
        format_name(n, self.width)
    }

    /// Largest child number that still fits the tree's fanout.
    fn max_child(&self) -> u64 {
        u64::from(self.fanout) - 1
    }

    /// Numerically named subdirectories of `dir`, sorted by name.
    fn numeric_children(&self, dir: &Path) -> ShardResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(ShardError::io(dir))? {
            let entry = entry.map_err(ShardError::io(dir))?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if parse_name(&name).is_none() {
                continue;
            }
            let file_type = entry.file_type().map_err(ShardError::io(dir))?;
            if file_type.is_dir() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Number of entries in `leaf` that count toward its limit.
    pub fn leaf_entry_count(&self, leaf: &Path) -> ShardResult<usize> {
        let mut count = 0;
        for entry in fs::read_dir(leaf).map_err(ShardError::io(leaf))? {
            let entry = entry.map_err(ShardError::io(leaf))?;
            match &self.filter {
                LeafFilter::AllEntries => count += 1,
                LeafFilter::SequentialFiles { extension } => {
                    let counted = entry
                        .file_name()
                        .to_str()
                        .and_then(|name| parse_sequential(name, extension))
                        .is_some();
                    if counted {
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }

    fn child_number(&self, dir: &Path) -> ShardResult<u64> {
        dir.file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_name)
            .ok_or_else(|| ShardError::inconsistent(dir, "directory name is not numeric"))
    }

    /// Create a directory that must not exist yet.
    fn create_new_dir(&self, dir: &Path) -> ShardResult<()> {
        match fs::create_dir(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(ShardError::inconsistent(
                dir,
                "directory already exists; another writer is modifying the tree",
            )),
            Err(e) => Err(ShardError::Io {
                path: dir.to_path_buf(),
                source: e,
            }),
        }
    }
}

fn check_root(root: &Path) -> ShardResult<()> {
    match fs::metadata(root) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(ShardError::RootNotDirectory(root.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(ShardError::RootMissing(root.to_path_buf()))
        }
        Err(e) => Err(ShardError::Io {
            path: root.to_path_buf(),
            source: e,
        }),
    }
}

impl ShardLayout for ShardTree {
    fn root(&self) -> &Path {
        &self.root
    }

    fn initialize(&self) -> ShardResult<PathBuf> {
        check_root(&self.root)?;

        let mut current = self.root.clone();
        let mut level = 0;
        while level < self.depth {
            let children = self.numeric_children(&current)?;

            if children.is_empty() {
                let first = current.join(self.name(0));
                match fs::create_dir(&first) {
                    Ok(()) => debug!(dir = %first.display(), "created first shard directory"),
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(ShardError::Io { path: first, source: e }),
                }
                current = first;
                level += 1;
            } else if children.len() > self.fanout as usize {
                warn!(
                    dir = %current.display(),
                    children = children.len(),
                    fanout = self.fanout,
                    "shard directory holds more children than its fanout; moving to next sibling"
                );
                // Same level, fresh directory; the next pass fills in its
                // first child.
                current = self.advance(&current)?;
            } else {
                let largest = children.last().cloned().unwrap_or_default();
                current = current.join(largest);
                level += 1;
            }
        }

        let leaf = current;
        info!(leaf = %leaf.display(), "shard tree initialized");
        Ok(leaf)
    }

    fn is_full(&self, leaf: &Path, limit: u32) -> ShardResult<bool> {
        Ok(self.leaf_entry_count(leaf)? >= limit as usize)
    }

    fn advance(&self, leaf: &Path) -> ShardResult<PathBuf> {
        let mut current = leaf.to_path_buf();
        let mut climbed = 0u32;

        loop {
            if current == self.root {
                error_exhausted(&self.root);
                return Err(ShardError::StoreExhausted {
                    root: self.root.clone(),
                });
            }
            let number = self.child_number(&current)?;
            let parent = current
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| ShardError::inconsistent(&current, "leaf has no parent"))?;

            let siblings = self.numeric_children(&parent)?.len();
            if siblings < self.fanout as usize && number < self.max_child() {
                let mut next = parent.join(self.name(number + 1));
                self.create_new_dir(&next)?;
                for _ in 0..climbed {
                    next = next.join(self.name(0));
                    self.create_new_dir(&next)?;
                }
                info!(
                    from = %leaf.display(),
                    to = %next.display(),
                    climbed,
                    "advanced to new shard leaf"
                );
                return Ok(next);
            }

            if parent == self.root {
                error_exhausted(&self.root);
                return Err(ShardError::StoreExhausted {
                    root: self.root.clone(),
                });
            }
            current = parent;
            climbed += 1;
        }
    }

    fn last_sequence(&self, leaf: &Path) -> ShardResult<Option<u64>> {
        let LeafFilter::SequentialFiles { extension } = &self.filter else {
            return Ok(None);
        };
        let mut last = None;
        for entry in fs::read_dir(leaf).map_err(ShardError::io(leaf))? {
            let entry = entry.map_err(ShardError::io(leaf))?;
            if let Some(n) = entry
                .file_name()
                .to_str()
                .and_then(|name| parse_sequential(name, extension))
            {
                last = last.max(Some(n));
            }
        }
        Ok(last)
    }
}

fn error_exhausted(root: &Path) {
    tracing::error!(root = %root.display(), "shard tree exhausted; no capacity left for new content");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(dir: &TempDir, depth: u32, fanout: u32) -> ShardTree {
        ShardTree::new(dir.path(), depth, fanout, LeafFilter::AllEntries).unwrap()
    }

    fn fill(dir: &Path, n: usize) {
        for i in 0..n {
            fs::write(dir.join(format!("file-{i}")), b"x").unwrap();
        }
    }

    fn rel(tree: &ShardTree, path: &Path) -> String {
        path.strip_prefix(tree.root())
            .unwrap()
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn missing_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = ShardTree::new(dir.path().join("nope"), 1, 10, LeafFilter::AllEntries).unwrap_err();
        assert!(matches!(err, ShardError::RootMissing(_)));
    }

    #[test]
    fn file_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        let err = ShardTree::new(&file, 1, 10, LeafFilter::AllEntries).unwrap_err();
        assert!(matches!(err, ShardError::RootNotDirectory(_)));
    }

    #[test]
    fn initialize_empty_root_creates_zero_path() {
        let dir = TempDir::new().unwrap();
        let t = tree(&dir, 3, 1000);
        let leaf = t.initialize().unwrap();
        assert_eq!(rel(&t, &leaf), "000/000/000");
        assert!(leaf.is_dir());
    }

    #[test]
    fn initialize_descends_into_largest() {
        let dir = TempDir::new().unwrap();
        for p in ["00/00", "00/05", "03/01", "03/02", "01/09"] {
            fs::create_dir_all(dir.path().join(p)).unwrap();
        }
        let t = tree(&dir, 2, 100);
        assert_eq!(rel(&t, &t.initialize().unwrap()), "03/02");
    }

    #[test]
    fn initialize_ignores_foreign_entries() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("1/0")).unwrap();
        fs::create_dir_all(dir.path().join("lost+found")).unwrap();
        fs::write(dir.path().join("9"), b"numeric file, not a directory").unwrap();
        let t = tree(&dir, 2, 10);
        assert_eq!(rel(&t, &t.initialize().unwrap()), "1/0");
    }

    #[test]
    fn initialize_steps_past_overfull_level() {
        let dir = TempDir::new().unwrap();
        // "0/0" has three children with fanout 2: an inconsistency.
        for p in ["0/0/0", "0/0/1", "0/0/2"] {
            fs::create_dir_all(dir.path().join(p)).unwrap();
        }
        let t = tree(&dir, 3, 2);
        let leaf = t.initialize().unwrap();
        assert_eq!(rel(&t, &leaf), "0/1/0");
    }

    #[test]
    fn initialize_overfull_last_child_climbs() {
        let dir = TempDir::new().unwrap();
        // "0/1" is overfull and already the last name fanout 2 allows.
        for p in ["0/1/0", "0/1/1", "0/1/2"] {
            fs::create_dir_all(dir.path().join(p)).unwrap();
        }
        let t = tree(&dir, 3, 2);
        let leaf = t.initialize().unwrap();
        assert_eq!(rel(&t, &leaf), "1/0/0");
        assert!(!dir.path().join("0/2").exists());
    }

    #[test]
    fn initialize_overfull_last_child_under_full_root_is_exhausted() {
        let dir = TempDir::new().unwrap();
        for p in ["0", "1/0", "1/1", "1/2"] {
            fs::create_dir_all(dir.path().join(p)).unwrap();
        }
        let t = tree(&dir, 2, 2);
        assert!(t.initialize().unwrap_err().is_exhausted());
        assert!(!dir.path().join("2").exists());
    }

    #[test]
    fn initialize_overfull_root_is_exhausted() {
        let dir = TempDir::new().unwrap();
        for p in ["0", "1", "2"] {
            fs::create_dir(dir.path().join(p)).unwrap();
        }
        let t = tree(&dir, 1, 2);
        assert!(t.initialize().unwrap_err().is_exhausted());
    }

    #[test]
    fn content_addressed_fullness_counts_everything() {
        let dir = TempDir::new().unwrap();
        let t = tree(&dir, 1, 3);
        let leaf = t.initialize().unwrap();
        fill(&leaf, 2);
        assert!(!t.is_full(&leaf, 3).unwrap());
        fs::write(leaf.join("README.foreign"), b"x").unwrap();
        assert!(t.is_full(&leaf, 3).unwrap());
    }

    #[test]
    fn sequential_fullness_counts_numeric_files_only() {
        let dir = TempDir::new().unwrap();
        let filter = LeafFilter::SequentialFiles { extension: "jpg".into() };
        let t = ShardTree::new(dir.path(), 1, 2, filter).unwrap();
        let leaf = t.initialize().unwrap();
        fs::write(leaf.join("0.jpg"), b"x").unwrap();
        fs::write(leaf.join("0-s.jpg"), b"thumb").unwrap();
        fs::write(leaf.join("notes.txt"), b"x").unwrap();
        assert!(!t.is_full(&leaf, 2).unwrap());
        assert_eq!(t.last_sequence(&leaf).unwrap(), Some(0));
        fs::write(leaf.join("1.jpg"), b"x").unwrap();
        assert!(t.is_full(&leaf, 2).unwrap());
        assert_eq!(t.last_sequence(&leaf).unwrap(), Some(1));
    }

    #[test]
    fn advance_to_next_sibling() {
        let dir = TempDir::new().unwrap();
        let t = tree(&dir, 2, 3);
        let leaf = t.initialize().unwrap();
        let next = t.advance(&leaf).unwrap();
        assert_eq!(rel(&t, &next), "0/1");
        assert!(next.is_dir());
    }

    #[test]
    fn advance_climbs_and_recreates_zero_path() {
        let dir = TempDir::new().unwrap();
        for p in ["0/0/0", "0/0/1"] {
            fs::create_dir_all(dir.path().join(p)).unwrap();
        }
        let t = tree(&dir, 3, 2);
        let next = t.advance(&t.root().join("0/0/1")).unwrap();
        assert_eq!(rel(&t, &next), "0/1/0");
        assert!(next.is_dir());
    }

    #[test]
    fn advance_climbs_two_levels() {
        let dir = TempDir::new().unwrap();
        for p in ["0/0/0", "0/0/1", "0/1/0", "0/1/1"] {
            fs::create_dir_all(dir.path().join(p)).unwrap();
        }
        let t = tree(&dir, 3, 2);
        let next = t.advance(&t.root().join("0/1/1")).unwrap();
        assert_eq!(rel(&t, &next), "1/0/0");
    }

    #[test]
    fn advance_exhaustion_creates_nothing() {
        let dir = TempDir::new().unwrap();
        for p in ["0", "1"] {
            fs::create_dir(dir.path().join(p)).unwrap();
        }
        let t = tree(&dir, 1, 2);
        let err = t.advance(&t.root().join("1")).unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(t.numeric_children(t.root()).unwrap(), vec!["0", "1"]);
    }

    #[test]
    fn advance_refuses_existing_target() {
        let dir = TempDir::new().unwrap();
        for p in ["0/0", "0/1"] {
            fs::create_dir_all(dir.path().join(p)).unwrap();
        }
        let t = tree(&dir, 2, 10);
        let err = t.advance(&t.root().join("0/0")).unwrap_err();
        assert!(matches!(err, ShardError::TreeInconsistent { .. }));
    }

    #[test]
    fn advance_never_exceeds_name_space() {
        let dir = TempDir::new().unwrap();
        // Gap at 0: only "1" exists, so the level is not counted as full,
        // but "2" would break the one-digit width.
        fs::create_dir(dir.path().join("1")).unwrap();
        let t = tree(&dir, 1, 2);
        assert!(t.advance(&t.root().join("1")).unwrap_err().is_exhausted());
    }
}
