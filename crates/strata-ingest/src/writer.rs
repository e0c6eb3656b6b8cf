use strata_db::{ContentDatabase, DuplicateClassifier, FailureClass, IngestTransaction};
use strata_types::{ContentRecord, FailureStage, FatalError, IngestOutcome};
use tracing::{debug, warn};

use crate::cleanup::WrittenFiles;
use crate::error::{IngestError, IngestResult};
use crate::store::BlobStores;

/// Writes one database row and, when the record carries a blob, one file,
/// so that after the call either both exist or neither does.
///
/// Protocol for one item:
///
/// 1. begin a transaction and insert the row without a locator
/// 2. allocate the blob's location and point the row at it
/// 3. exclusively create the file and write it, then any derived artifact
/// 4. commit
///
/// A duplicate row rolls back before the allocator or the filesystem is
/// touched. Any later failure deletes the files this call created and rolls
/// the row back.
pub struct DualResourceIngestWriter<'a> {
    db: &'a dyn ContentDatabase,
    classifier: &'a dyn DuplicateClassifier,
    stores: &'a BlobStores,
}

impl<'a> DualResourceIngestWriter<'a> {
    pub fn new(
        db: &'a dyn ContentDatabase,
        classifier: &'a dyn DuplicateClassifier,
        stores: &'a BlobStores,
    ) -> Self {
        Self {
            db,
            classifier,
            stores,
        }
    }

    /// Ingest one record.
    ///
    /// Per-item results, including fatal ones, come back as an
    /// [`IngestOutcome`]. `Err` is reserved for failures no retry of this
    /// item can fix: unconfigured kinds, an exhausted shard tree, or a
    /// database that cannot start a transaction. A retried duplicate is
    /// reported as such even when the tree is exhausted.
    pub fn ingest_one(
        &self,
        mut record: ContentRecord,
        blob: Option<&[u8]>,
    ) -> IngestResult<IngestOutcome> {
        let id = record.id.clone();
        let target = match blob {
            Some(blob) => Some((self.stores.get(record.kind)?, blob)),
            None if record.kind.stores_blobs() => return Err(IngestError::MissingBlob(id)),
            None => None,
        };
        if let Some((_, blob)) = target {
            record.locator = None;
            record.size_bytes = blob.len() as u64;
        }

        let mut tx = self.db.begin()?;
        if let Err(e) = tx.insert(&record) {
            abandon(tx);
            return Ok(match self.classifier.classify(&e) {
                FailureClass::Duplicate => {
                    debug!(id = %id, "duplicate record, nothing written");
                    IngestOutcome::Duplicate { id }
                }
                FailureClass::Fatal => fatal(id, FailureStage::Insert, &e),
            });
        }

        let mut files = WrittenFiles::new();
        if let Some((store, blob)) = target {
            let (path, locator) = match store.place(&record) {
                Ok(placed) => placed,
                Err(e) => {
                    abandon(tx);
                    return Err(e);
                }
            };
            if let Err(e) = tx.set_locator(&id, &locator, record.size_bytes) {
                abandon(tx);
                return Ok(fatal(id, FailureStage::Insert, &e));
            }
            if let Err(e) = store.write(&path, blob, &mut files) {
                let stage = match e {
                    IngestError::Derived { .. } => FailureStage::DerivedArtifact,
                    _ => FailureStage::FilesystemWrite,
                };
                files.remove_all();
                abandon(tx);
                return Ok(fatal(id, stage, &e));
            }
        }

        if let Err(e) = tx.commit() {
            files.remove_all();
            return Ok(fatal(id, FailureStage::Commit, &e));
        }
        files.keep();
        debug!(id = %id, kind = %record.kind, "record committed");
        Ok(IngestOutcome::Committed { id })
    }
}

fn fatal(id: strata_types::ContentId, stage: FailureStage, err: &dyn std::fmt::Display) -> IngestOutcome {
    warn!(id = %id, stage = %stage, error = %err, "ingest failed");
    IngestOutcome::Fatal {
        id,
        error: FatalError::new(stage, err.to_string()),
    }
}

/// Roll back, logging rather than returning a failure so the original error
/// stays the one reported.
pub(crate) fn abandon(tx: Box<dyn IngestTransaction + '_>) {
    if let Err(e) = tx.rollback() {
        warn!(error = %e, "rollback failed");
    }
}
