use strata_types::{ContentId, ContentKind, ContentRecord, Locator};

use crate::error::DbResult;

/// One open transaction against the content store.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it
/// back. Savepoint names must be plain identifiers.
pub trait IngestTransaction {
    fn insert(&mut self, record: &ContentRecord) -> DbResult<()>;

    /// Point an inserted row at its blob. Fails with
    /// [`DbError::MissingRow`](crate::DbError::MissingRow) if `id` is not
    /// visible to this transaction.
    fn set_locator(&mut self, id: &ContentId, locator: &Locator, size_bytes: u64) -> DbResult<()>;

    /// Delete a row. Returns whether a row existed.
    fn delete(&mut self, id: &ContentId) -> DbResult<bool>;

    fn savepoint(&mut self, name: &str) -> DbResult<()>;

    /// Undo everything since `savepoint(name)`. The savepoint stays open.
    fn rollback_to(&mut self, name: &str) -> DbResult<()>;

    /// Fold the savepoint's changes into the enclosing transaction.
    fn release(&mut self, name: &str) -> DbResult<()>;

    fn commit(self: Box<Self>) -> DbResult<()>;

    fn rollback(self: Box<Self>) -> DbResult<()>;
}

/// Read and transaction boundary of the relational store.
pub trait ContentDatabase: Send + Sync {
    /// Start a write transaction. Writers are serialized.
    fn begin(&self) -> DbResult<Box<dyn IngestTransaction + '_>>;

    fn find(&self, id: &ContentId) -> DbResult<Option<ContentRecord>>;

    fn count(&self, kind: ContentKind) -> DbResult<u64>;

    /// Delete one row in its own transaction.
    fn delete(&self, id: &ContentId) -> DbResult<bool> {
        let mut tx = self.begin()?;
        let removed = tx.delete(id)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Whether transactions support nested savepoints.
    fn supports_savepoints(&self) -> bool {
        true
    }
}
