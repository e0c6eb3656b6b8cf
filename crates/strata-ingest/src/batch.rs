use serde::{Deserialize, Serialize};
use strata_db::{ContentDatabase, DuplicateClassifier, FailureClass, IngestTransaction};
use strata_types::{ContentRecord, IngestOutcome};
use tracing::{debug, error, info, warn};

use crate::cleanup::WrittenFiles;
use crate::error::{IngestError, IngestResult};
use crate::store::BlobStores;
use crate::writer::{abandon, DualResourceIngestWriter};

/// One logical record of a batch, with its attachment if it has one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchItem {
    pub record: ContentRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<Vec<u8>>,
}

impl BatchItem {
    pub fn row(record: ContentRecord) -> Self {
        Self { record, blob: None }
    }

    pub fn with_blob(record: ContentRecord, blob: Vec<u8>) -> Self {
        Self {
            record,
            blob: Some(blob),
        }
    }
}

/// Ingests many records in one outer transaction with a savepoint per item.
///
/// A duplicate item is rolled back to its savepoint and reported; the rest
/// of the batch continues. Any other failure rolls back the whole batch and
/// deletes every file the batch wrote.
pub struct BatchIngestCoordinator<'a> {
    db: &'a dyn ContentDatabase,
    classifier: &'a dyn DuplicateClassifier,
    stores: &'a BlobStores,
}

impl<'a> BatchIngestCoordinator<'a> {
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

    /// Ingest `items` in order. Outcomes line up with the input.
    pub fn ingest_batch(&self, items: Vec<BatchItem>) -> IngestResult<Vec<IngestOutcome>> {
        if !self.db.supports_savepoints() {
            return self.ingest_each(items);
        }

        let total = items.len();
        let mut tx = self.db.begin()?;
        let mut files = WrittenFiles::new();
        let mut outcomes = Vec::with_capacity(total);

        for (index, item) in items.into_iter().enumerate() {
            match self.ingest_item(tx.as_mut(), index, item, &mut files) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(
                        index,
                        total,
                        files = files.paths().len(),
                        error = %e,
                        "batch aborted, rolling back"
                    );
                    files.remove_all();
                    abandon(tx);
                    return Err(e);
                }
            }
        }

        if let Err(e) = tx.commit() {
            error!(total, error = %e, "batch commit failed");
            files.remove_all();
            return Err(IngestError::Db(e));
        }
        files.keep();

        let duplicates = outcomes.iter().filter(|o| o.is_duplicate()).count();
        info!(
            total,
            committed = total - duplicates,
            duplicates,
            "batch committed"
        );
        Ok(outcomes)
    }

    fn ingest_item(
        &self,
        tx: &mut dyn IngestTransaction,
        index: usize,
        item: BatchItem,
        files: &mut WrittenFiles,
    ) -> IngestResult<IngestOutcome> {
        let BatchItem { mut record, blob } = item;
        let id = record.id.clone();

        let store = match &blob {
            Some(blob) => {
                record.locator = None;
                record.size_bytes = blob.len() as u64;
                Some(self.stores.get(record.kind)?)
            }
            None if record.kind.stores_blobs() => return Err(IngestError::MissingBlob(id)),
            None => None,
        };

        let savepoint = format!("item_{index}");
        tx.savepoint(&savepoint)?;
        if let Err(e) = tx.insert(&record) {
            return match self.classifier.classify(&e) {
                FailureClass::Duplicate => {
                    tx.rollback_to(&savepoint)?;
                    tx.release(&savepoint)?;
                    debug!(index, id = %id, "duplicate batch item skipped");
                    Ok(IngestOutcome::Duplicate { id })
                }
                FailureClass::Fatal => Err(IngestError::Structural(e)),
            };
        }

        if let (Some(store), Some(blob)) = (store, blob.as_deref()) {
            let (path, locator) = store.place(&record)?;
            tx.set_locator(&id, &locator, record.size_bytes)
                .map_err(IngestError::Structural)?;
            let mut item_files = WrittenFiles::new();
            let written = store.write(&path, blob, &mut item_files);
            files.absorb(item_files);
            written?;
        }

        tx.release(&savepoint)?;
        debug!(index, id = %id, "batch item staged");
        Ok(IngestOutcome::Committed { id })
    }

    /// Fallback for databases without savepoints: one transaction per item.
    /// Stops at the first fatal item; earlier items stay committed.
    fn ingest_each(&self, items: Vec<BatchItem>) -> IngestResult<Vec<IngestOutcome>> {
        warn!(
            items = items.len(),
            "database has no savepoints, ingesting batch one item at a time"
        );
        let writer = DualResourceIngestWriter::new(self.db, self.classifier, self.stores);
        let mut outcomes = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            match writer.ingest_one(item.record, item.blob.as_deref())? {
                IngestOutcome::Fatal { error, .. } => {
                    error!(index, committed = outcomes.len(), %error, "batch item failed");
                    return Err(IngestError::ItemFailed { index, error });
                }
                outcome => outcomes.push(outcome),
            }
        }
        Ok(outcomes)
    }
}
