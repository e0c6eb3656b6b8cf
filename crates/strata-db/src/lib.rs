//! Relational side of Strata's dual-resource ingest.
//!
//! [`ContentDatabase`] and [`IngestTransaction`] are the only database
//! surface the ingest writer sees. Transactions expose savepoints so a batch
//! can undo one item without abandoning the rest. [`SqliteDatabase`] is the
//! bundled implementation.
//!
//! Engine error codes are never inspected outside [`classify`]: a
//! [`DuplicateClassifier`] turns a [`DbError`] into duplicate or fatal.

pub mod classify;
pub mod error;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use classify::{DuplicateClassifier, FailureClass, MySqlClassifier, SqliteClassifier};
pub use error::{DbError, DbResult};
pub use sqlite::{SqliteDatabase, SqliteTransaction};
pub use traits::{ContentDatabase, IngestTransaction};
