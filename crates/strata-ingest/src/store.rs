use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use strata_config::{KindConfig, StrataConfig};
use strata_shard::{Allocation, BlobShardAllocator};
use strata_types::{ContentKind, ContentRecord, Locator, NamingMode};
use tracing::{debug, info};

use crate::cleanup::WrittenFiles;
use crate::derive::{DerivedArtifact, ImageThumbnailer};
use crate::error::{IngestError, IngestResult};

/// Filesystem side of one content kind: its allocator and optional derived
/// artifact.
pub struct KindStore {
    config: KindConfig,
    allocator: BlobShardAllocator,
    derived: Option<Box<dyn DerivedArtifact>>,
}

impl KindStore {
    pub fn open(config: KindConfig) -> IngestResult<Self> {
        let allocator = BlobShardAllocator::open(&config)?;
        let derived: Option<Box<dyn DerivedArtifact>> = if config.thumbnail {
            Some(Box::new(ImageThumbnailer::default()))
        } else {
            None
        };
        Ok(Self {
            config,
            allocator,
            derived,
        })
    }

    pub fn config(&self) -> &KindConfig {
        &self.config
    }

    pub fn allocator(&self) -> &BlobShardAllocator {
        &self.allocator
    }

    pub fn derived(&self) -> Option<&dyn DerivedArtifact> {
        self.derived.as_deref()
    }

    /// Allocate the blob's final path. Called only once the record's row is
    /// inserted, so a duplicate never consumes a location.
    pub fn place(&self, record: &ContentRecord) -> IngestResult<(PathBuf, Locator)> {
        let allocation = self.allocator.allocate()?;
        let path = self.file_path(&allocation, record);
        let locator = Locator::from_path(&path).map_err(|e| IngestError::FilesystemWrite {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;
        Ok((path, locator))
    }

    fn file_path(&self, allocation: &Allocation, record: &ContentRecord) -> PathBuf {
        match self.config.naming {
            NamingMode::Sequential => allocation.file_path(""),
            NamingMode::ContentAddressed => {
                let name = match record.extension() {
                    Some(ext) => format!("{}.{ext}", record.id),
                    None => record.id.to_string(),
                };
                allocation.file_path(&name)
            }
        }
    }

    /// Create `path` exclusively, write the blob and its derived artifact.
    /// Every file created is tracked in `files`, so a failure part way
    /// leaves nothing behind once the guard is dropped.
    pub fn write(&self, path: &Path, blob: &[u8], files: &mut WrittenFiles) -> IngestResult<()> {
        write_exclusive(path, blob, files)?;
        debug!(path = %path.display(), bytes = blob.len(), "blob written");

        if let Some(derived) = &self.derived {
            let derived_path = derived.path_for(path);
            let bytes = derived.derive(blob).map_err(|source| IngestError::Derived {
                path: path.to_path_buf(),
                source,
            })?;
            write_exclusive(&derived_path, &bytes, files)?;
            debug!(path = %derived_path.display(), "derived artifact written");
        }
        Ok(())
    }

    /// Every file a record with this locator may own.
    pub fn owned_files(&self, primary: &Path) -> Vec<PathBuf> {
        let mut paths = vec![primary.to_path_buf()];
        if let Some(derived) = &self.derived {
            paths.push(derived.path_for(primary));
        }
        paths
    }
}

impl std::fmt::Debug for KindStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindStore")
            .field("config", &self.config)
            .field("allocator", &self.allocator)
            .field("derived", &self.derived.as_ref().map(|d| d.suffix().to_string()))
            .finish()
    }
}

/// Create-if-absent write. An existing file is an error and is left
/// untouched.
fn write_exclusive(path: &Path, bytes: &[u8], files: &mut WrittenFiles) -> IngestResult<()> {
    let fs_err = |source: std::io::Error| IngestError::FilesystemWrite {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(fs_err)?;
    files.track(path.to_path_buf());
    file.write_all(bytes).map_err(fs_err)?;
    file.sync_all().map_err(fs_err)?;
    Ok(())
}

/// One [`KindStore`] per configured blob-storing kind.
#[derive(Debug, Default)]
pub struct BlobStores {
    stores: BTreeMap<ContentKind, KindStore>,
}

impl BlobStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store for every kind configured with a root.
    pub fn from_config(config: &StrataConfig) -> IngestResult<Self> {
        let mut stores = Self::new();
        for kind in config.configured_kinds() {
            if !kind.stores_blobs() {
                continue;
            }
            let kind_config = config.resolve(kind)?;
            info!(
                kind = %kind,
                root = %kind_config.root.display(),
                naming = %kind_config.naming,
                fanout = kind_config.fanout,
                depth = kind_config.depth,
                "blob store configured"
            );
            stores.insert(KindStore::open(kind_config)?);
        }
        Ok(stores)
    }

    pub fn insert(&mut self, store: KindStore) {
        self.stores.insert(store.config.kind, store);
    }

    /// The store for `kind`.
    pub fn get(&self, kind: ContentKind) -> IngestResult<&KindStore> {
        if !kind.stores_blobs() {
            return Err(IngestError::RowOnlyKind(kind));
        }
        self.stores.get(&kind).ok_or(IngestError::NotConfigured(kind))
    }

    pub fn try_get(&self, kind: ContentKind) -> Option<&KindStore> {
        self.stores.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ContentKind> + '_ {
        self.stores.keys().copied()
    }
}

/// Create every configured kind's root directory.
pub fn create_roots(config: &StrataConfig) -> IngestResult<Vec<PathBuf>> {
    let mut created = Vec::new();
    for kind in config.configured_kinds() {
        if !kind.stores_blobs() {
            continue;
        }
        let root = config.resolve(kind)?.root;
        fs::create_dir_all(&root).map_err(|source| IngestError::FilesystemWrite {
            path: root.clone(),
            source,
        })?;
        created.push(root);
    }
    Ok(created)
}
