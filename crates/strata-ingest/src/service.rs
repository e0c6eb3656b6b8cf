use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use strata_config::StrataConfig;
use strata_db::{ContentDatabase, DuplicateClassifier};
use strata_shard::Allocation;
use strata_types::{ContentId, ContentKind, ContentRecord, IngestOutcome, NamingMode};
use tracing::{info, warn};

use crate::batch::{BatchIngestCoordinator, BatchItem};
use crate::cleanup::remove_quietly;
use crate::error::{IngestError, IngestResult};
use crate::store::BlobStores;
use crate::writer::DualResourceIngestWriter;

/// Storage state of one content kind, as reported by [`IngestService::status`].
#[derive(Clone, Debug, Serialize)]
pub struct KindStatus {
    pub kind: ContentKind,
    pub records: u64,
    /// `None` for row-only or unconfigured kinds.
    pub root: Option<PathBuf>,
    pub naming: Option<NamingMode>,
    /// `None` until the first allocation of this process.
    pub current_leaf: Option<PathBuf>,
}

/// Entry point of the ingestion core. Owns one allocator per content kind,
/// the database and the duplicate classifier.
pub struct IngestService {
    db: Arc<dyn ContentDatabase>,
    classifier: Arc<dyn DuplicateClassifier>,
    stores: BlobStores,
}

impl IngestService {
    pub fn new(
        db: Arc<dyn ContentDatabase>,
        classifier: Arc<dyn DuplicateClassifier>,
        stores: BlobStores,
    ) -> Self {
        Self {
            db,
            classifier,
            stores,
        }
    }

    /// Validate every configured kind and open its shard tree. Any
    /// configuration problem fails here, before the first ingest.
    pub fn from_config(
        config: &StrataConfig,
        db: Arc<dyn ContentDatabase>,
        classifier: Arc<dyn DuplicateClassifier>,
    ) -> IngestResult<Self> {
        let stores = BlobStores::from_config(config)?;
        info!(kinds = stores.kinds().count(), "ingest service ready");
        Ok(Self::new(db, classifier, stores))
    }

    pub fn stores(&self) -> &BlobStores {
        &self.stores
    }

    pub fn database(&self) -> &dyn ContentDatabase {
        self.db.as_ref()
    }

    /// Reserve the next blob location for `kind` without writing anything.
    pub fn allocate(&self, kind: ContentKind) -> IngestResult<Allocation> {
        Ok(self.stores.get(kind)?.allocator().allocate()?)
    }

    pub fn writer(&self) -> DualResourceIngestWriter<'_> {
        DualResourceIngestWriter::new(self.db.as_ref(), self.classifier.as_ref(), &self.stores)
    }

    pub fn batch(&self) -> BatchIngestCoordinator<'_> {
        BatchIngestCoordinator::new(self.db.as_ref(), self.classifier.as_ref(), &self.stores)
    }

    pub fn ingest_one(
        &self,
        record: ContentRecord,
        blob: Option<&[u8]>,
    ) -> IngestResult<IngestOutcome> {
        self.writer().ingest_one(record, blob)
    }

    pub fn ingest_batch(&self, items: Vec<BatchItem>) -> IngestResult<Vec<IngestOutcome>> {
        self.batch().ingest_batch(items)
    }

    /// Load a record and, if it has one, its blob.
    pub fn read(&self, id: &ContentId) -> IngestResult<Option<(ContentRecord, Option<Vec<u8>>)>> {
        let Some(record) = self.db.find(id)? else {
            return Ok(None);
        };
        let blob = match &record.locator {
            Some(locator) => {
                let path = locator.path();
                let bytes = fs::read(path).map_err(|source| IngestError::FilesystemRead {
                    path: path.to_path_buf(),
                    source,
                })?;
                Some(bytes)
            }
            None => None,
        };
        Ok(Some((record, blob)))
    }

    /// Delete a record's row, then its files. Returns whether the record
    /// existed. Files already gone are logged and tolerated.
    pub fn delete(&self, id: &ContentId) -> IngestResult<bool> {
        let Some(record) = self.db.find(id)? else {
            return Ok(false);
        };
        if !self.db.delete(id)? {
            return Ok(false);
        }

        if let Some(locator) = &record.locator {
            let primary = locator.path();
            let paths = match self.stores.try_get(record.kind) {
                Some(store) => store.owned_files(primary),
                None => vec![primary.to_path_buf()],
            };
            for (i, path) in paths.iter().enumerate() {
                // Only a missing primary file is worth a warning; derived
                // artifacts are optional.
                if !remove_quietly(path) && i == 0 {
                    warn!(id = %id, path = %path.display(), "record had no file on disk");
                }
            }
        }
        info!(id = %id, kind = %record.kind, "record deleted");
        Ok(true)
    }

    /// Record counts for every kind and shard state for configured ones.
    pub fn status(&self) -> IngestResult<Vec<KindStatus>> {
        ContentKind::ALL
            .iter()
            .map(|&kind| -> IngestResult<KindStatus> {
                let records = self.db.count(kind)?;
                let store = self.stores.try_get(kind);
                let current_leaf = match store {
                    Some(store) => store.allocator().current_leaf()?,
                    None => None,
                };
                Ok(KindStatus {
                    kind,
                    records,
                    root: store.map(|s| s.config().root.clone()),
                    naming: store.map(|s| s.config().naming),
                    current_leaf,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for IngestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestService")
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}
