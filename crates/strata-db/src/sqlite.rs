use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use strata_types::{ContentId, ContentKind, ContentRecord, Locator, OwnerId};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::schema;
use crate::traits::{ContentDatabase, IngestTransaction};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed content store.
///
/// One connection behind a mutex; a transaction holds the lock until it is
/// committed, rolled back or dropped.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Open or create the database file and bring its schema up to date.
    pub fn open(path: &Path) -> DbResult<Self> {
        info!(path = %path.display(), "opening SQLite database");
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database (for tests).
    pub fn open_in_memory() -> DbResult<Self> {
        debug!("opening in-memory SQLite database");
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Register an owner and return its id.
    pub fn add_owner(&self, name: &str) -> DbResult<OwnerId> {
        let conn = self.lock()?;
        conn.execute("INSERT INTO owners (name) VALUES (?1)", params![name])?;
        Ok(OwnerId(conn.last_insert_rowid()))
    }

    /// Id of the named owner, registering it first if needed.
    pub fn ensure_owner(&self, name: &str) -> DbResult<OwnerId> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO owners (name) VALUES (?1)",
            params![name],
        )?;
        let id = conn.query_row(
            "SELECT id FROM owners WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(OwnerId(id))
    }

    pub fn owner_exists(&self, owner: OwnerId) -> DbResult<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row("SELECT 1 FROM owners WHERE id = ?1", params![owner.0], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }
}

impl ContentDatabase for SqliteDatabase {
    fn begin(&self) -> DbResult<Box<dyn IngestTransaction + '_>> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }

    fn find(&self, id: &ContentId) -> DbResult<Option<ContentRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, kind, owner_id, locator, created_at, size_bytes, name, payload
                 FROM content WHERE id = ?1",
                params![id.as_str()],
                RawRecord::from_row,
            )
            .optional()?;
        row.map(RawRecord::decode).transpose()
    }

    fn count(&self, kind: ContentKind) -> DbResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM content WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

/// An open `BEGIN IMMEDIATE` transaction. Rolls back on drop unless
/// committed.
pub struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl SqliteTransaction<'_> {
    fn finish(&mut self, sql: &str) -> DbResult<()> {
        self.conn.execute_batch(sql)?;
        self.finished = true;
        Ok(())
    }
}

impl IngestTransaction for SqliteTransaction<'_> {
    fn insert(&mut self, record: &ContentRecord) -> DbResult<()> {
        let size = to_sql_size(record.size_bytes)?;
        let payload = record
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DbError::Driver(e.to_string()))?;

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO content (id, kind, owner_id, locator, created_at, size_bytes, name, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        stmt.execute(params![
            record.id.as_str(),
            record.kind.as_str(),
            record.owner.0,
            record.locator.as_ref().map(Locator::to_url),
            record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            size,
            record.name,
            payload,
        ])?;
        Ok(())
    }

    fn set_locator(&mut self, id: &ContentId, locator: &Locator, size_bytes: u64) -> DbResult<()> {
        let size = to_sql_size(size_bytes)?;
        let updated = self.conn.execute(
            "UPDATE content SET locator = ?1, size_bytes = ?2 WHERE id = ?3",
            params![locator.to_url(), size, id.as_str()],
        )?;
        if updated == 0 {
            return Err(DbError::MissingRow(id.to_string()));
        }
        Ok(())
    }

    fn delete(&mut self, id: &ContentId) -> DbResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM content WHERE id = ?1", params![id.as_str()])?;
        Ok(removed > 0)
    }

    fn savepoint(&mut self, name: &str) -> DbResult<()> {
        check_savepoint_name(name)?;
        self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(())
    }

    fn rollback_to(&mut self, name: &str) -> DbResult<()> {
        check_savepoint_name(name)?;
        self.conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT {name}"))?;
        Ok(())
    }

    fn release(&mut self, name: &str) -> DbResult<()> {
        check_savepoint_name(name)?;
        self.conn.execute_batch(&format!("RELEASE SAVEPOINT {name}"))?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> DbResult<()> {
        self.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> DbResult<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            warn!(error = %e, "rollback of abandoned transaction failed");
        }
    }
}

fn to_sql_size(size_bytes: u64) -> DbResult<i64> {
    i64::try_from(size_bytes).map_err(|_| DbError::Driver(format!("size {size_bytes} out of range")))
}

/// Savepoint names are interpolated into SQL, so only identifiers pass.
fn check_savepoint_name(name: &str) -> DbResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidSavepoint(name.to_string()))
    }
}

/// Column values as read, before validation.
struct RawRecord {
    id: String,
    kind: String,
    owner: i64,
    locator: Option<String>,
    created_at: String,
    size_bytes: i64,
    name: Option<String>,
    payload: Option<String>,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            owner: row.get(2)?,
            locator: row.get(3)?,
            created_at: row.get(4)?,
            size_bytes: row.get(5)?,
            name: row.get(6)?,
            payload: row.get(7)?,
        })
    }

    fn decode(self) -> DbResult<ContentRecord> {
        let id = self.id;
        let bad = |reason: String| DbError::Decode {
            id: id.clone(),
            reason,
        };

        let content_id = ContentId::parse(id.as_str()).map_err(|e| bad(e.to_string()))?;
        let kind: ContentKind = self
            .kind
            .parse()
            .map_err(|e: strata_types::TypeError| bad(e.to_string()))?;
        let locator = self
            .locator
            .as_deref()
            .map(Locator::parse)
            .transpose()
            .map_err(|e| bad(e.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| bad(format!("created_at: {e}")))?
            .with_timezone(&Utc);
        let size_bytes = u64::try_from(self.size_bytes)
            .map_err(|_| bad(format!("negative size {}", self.size_bytes)))?;
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .map_err(|e| bad(format!("payload: {e}")))?;

        Ok(ContentRecord {
            id: content_id,
            kind,
            owner: OwnerId(self.owner),
            locator,
            created_at,
            size_bytes,
            name: self.name,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{DuplicateClassifier, FailureClass, SqliteClassifier};
    use serde_json::json;
    use tempfile::TempDir;

    fn db_with_owner() -> (SqliteDatabase, OwnerId) {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let owner = db.add_owner("alice").unwrap();
        (db, owner)
    }

    fn record(id: &str, owner: OwnerId) -> ContentRecord {
        ContentRecord::new(ContentId::parse(id).unwrap(), ContentKind::Document, owner)
            .with_name("report.pdf")
    }

    fn insert_committed(db: &SqliteDatabase, rec: &ContentRecord) -> DbResult<()> {
        let mut tx = db.begin()?;
        tx.insert(rec)?;
        tx.commit()
    }

    #[test]
    fn insert_and_find_round_trip() {
        let (db, owner) = db_with_owner();
        let mut rec = record("doc-1", owner).with_payload(json!({"answers": [1, 2]}));
        rec.locator = Some(Locator::from_path("/srv/docs/0/0/doc-1").unwrap());
        insert_committed(&db, &rec).unwrap();

        let found = db.find(&rec.id).unwrap().unwrap();
        assert_eq!(found.id, rec.id);
        assert_eq!(found.kind, ContentKind::Document);
        assert_eq!(found.locator, rec.locator);
        assert_eq!(found.payload, rec.payload);
        assert_eq!(found.size_bytes, rec.size_bytes);
        assert_eq!(found.created_at.timestamp_micros(), rec.created_at.timestamp_micros());
        assert_eq!(db.count(ContentKind::Document).unwrap(), 1);
        assert_eq!(db.count(ContentKind::Image).unwrap(), 0);
    }

    #[test]
    fn set_locator_updates_inserted_row() {
        let (db, owner) = db_with_owner();
        let rec = record("late", owner);
        let locator = Locator::from_path("/srv/docs/0/1/late.pdf").unwrap();

        let mut tx = db.begin().unwrap();
        tx.insert(&rec).unwrap();
        tx.set_locator(&rec.id, &locator, 42).unwrap();
        tx.commit().unwrap();

        let found = db.find(&rec.id).unwrap().unwrap();
        assert_eq!(found.locator, Some(locator));
        assert_eq!(found.size_bytes, 42);
    }

    #[test]
    fn set_locator_on_missing_row_fails() {
        let (db, _) = db_with_owner();
        let locator = Locator::from_path("/srv/docs/0/0/ghost").unwrap();
        let mut tx = db.begin().unwrap();
        let err = tx
            .set_locator(&ContentId::parse("ghost").unwrap(), &locator, 1)
            .unwrap_err();
        assert_eq!(err, DbError::MissingRow("ghost".into()));
    }

    #[test]
    fn find_missing_is_none() {
        let (db, _) = db_with_owner();
        assert!(db.find(&ContentId::parse("nope").unwrap()).unwrap().is_none());
    }

    #[test]
    fn duplicate_primary_key_is_classified_duplicate() {
        let (db, owner) = db_with_owner();
        insert_committed(&db, &record("dup", owner)).unwrap();
        let err = insert_committed(&db, &record("dup", owner)).unwrap_err();
        assert_eq!(SqliteClassifier.classify(&err), FailureClass::Duplicate);
        assert_eq!(db.count(ContentKind::Document).unwrap(), 1);
    }

    #[test]
    fn missing_owner_is_fatal() {
        let (db, _) = db_with_owner();
        let err = insert_committed(&db, &record("orphan", OwnerId(999))).unwrap_err();
        assert_eq!(SqliteClassifier.classify(&err), FailureClass::Fatal);
        assert!(matches!(err, DbError::Engine { code: 787, .. }));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let (db, owner) = db_with_owner();
        {
            let mut tx = db.begin().unwrap();
            tx.insert(&record("gone", owner)).unwrap();
        }
        assert_eq!(db.count(ContentKind::Document).unwrap(), 0);
        // The lock was released and the connection is usable again.
        insert_committed(&db, &record("kept", owner)).unwrap();
        assert_eq!(db.count(ContentKind::Document).unwrap(), 1);
    }

    #[test]
    fn explicit_rollback() {
        let (db, owner) = db_with_owner();
        let mut tx = db.begin().unwrap();
        tx.insert(&record("gone", owner)).unwrap();
        tx.rollback().unwrap();
        assert_eq!(db.count(ContentKind::Document).unwrap(), 0);
    }

    #[test]
    fn savepoints_isolate_items() {
        let (db, owner) = db_with_owner();
        insert_committed(&db, &record("b", owner)).unwrap();

        let mut tx = db.begin().unwrap();
        for (i, id) in ["a", "b", "c"].into_iter().enumerate() {
            let sp = format!("item_{i}");
            tx.savepoint(&sp).unwrap();
            match tx.insert(&record(id, owner)) {
                Ok(()) => tx.release(&sp).unwrap(),
                Err(e) => {
                    assert!(SqliteClassifier.is_duplicate(&e));
                    tx.rollback_to(&sp).unwrap();
                    tx.release(&sp).unwrap();
                }
            }
        }
        tx.commit().unwrap();
        assert_eq!(db.count(ContentKind::Document).unwrap(), 3);
    }

    #[test]
    fn rejects_bad_savepoint_names() {
        let (db, _) = db_with_owner();
        let mut tx = db.begin().unwrap();
        for name in ["", "1abc", "a; DROP TABLE content", "a-b"] {
            assert!(matches!(tx.savepoint(name), Err(DbError::InvalidSavepoint(_))));
        }
        tx.savepoint("_ok_1").unwrap();
    }

    #[test]
    fn delete_reports_existence() {
        let (db, owner) = db_with_owner();
        let rec = record("del", owner);
        insert_committed(&db, &rec).unwrap();
        assert!(db.delete(&rec.id).unwrap());
        assert!(!db.delete(&rec.id).unwrap());
        assert!(db.find(&rec.id).unwrap().is_none());
    }

    #[test]
    fn owners() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let a = db.ensure_owner("alice").unwrap();
        assert_eq!(db.ensure_owner("alice").unwrap(), a);
        assert!(db.owner_exists(a).unwrap());
        assert!(!db.owner_exists(OwnerId(a.0 + 1)).unwrap());
        let err = db.add_owner("alice").unwrap_err();
        assert!(SqliteClassifier.is_duplicate(&err));
    }

    #[test]
    fn file_database_persists_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.db");
        let owner;
        {
            let db = SqliteDatabase::open(&path).unwrap();
            owner = db.add_owner("bob").unwrap();
            insert_committed(&db, &record("persisted", owner)).unwrap();
        }
        let db = SqliteDatabase::open(&path).unwrap();
        let found = db.find(&ContentId::parse("persisted").unwrap()).unwrap().unwrap();
        assert_eq!(found.owner, owner);
    }
}
