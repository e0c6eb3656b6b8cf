//! Duplicate detection from engine error codes.
//!
//! A retried upload re-inserts a row whose primary key already exists. That
//! is the only failure an ingest treats as benign; everything else is fatal.
//! Each engine reports the condition with its own code, so the mapping lives
//! in one adapter per engine and callers never inspect codes or messages.

use crate::error::DbError;

/// `SQLITE_CONSTRAINT_PRIMARYKEY` extended result code.
pub const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
/// `SQLITE_CONSTRAINT_UNIQUE` extended result code.
pub const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;
/// MySQL `ER_DUP_ENTRY`.
pub const MYSQL_ER_DUP_ENTRY: i32 = 1062;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// The row already exists; the item was ingested before.
    Duplicate,
    Fatal,
}

pub trait DuplicateClassifier: Send + Sync {
    fn classify(&self, err: &DbError) -> FailureClass;

    fn is_duplicate(&self, err: &DbError) -> bool {
        self.classify(err) == FailureClass::Duplicate
    }
}

fn classify_codes(err: &DbError, duplicate_codes: &[i32]) -> FailureClass {
    match err.engine_code() {
        Some(code) if duplicate_codes.contains(&code) => FailureClass::Duplicate,
        _ => FailureClass::Fatal,
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteClassifier;

impl DuplicateClassifier for SqliteClassifier {
    fn classify(&self, err: &DbError) -> FailureClass {
        classify_codes(err, &[SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE])
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MySqlClassifier;

impl DuplicateClassifier for MySqlClassifier {
    fn classify(&self, err: &DbError) -> FailureClass {
        classify_codes(err, &[MYSQL_ER_DUP_ENTRY])
    }
}
