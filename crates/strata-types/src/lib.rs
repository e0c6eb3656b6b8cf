//! Foundation types for Strata content ingestion.
//!
//! This crate provides the identifiers, records, and outcome types shared by
//! every other Strata crate. It has no I/O of its own.
//!
//! # Key Types
//!
//! - [`ContentId`]: Client-supplied or server-generated content identifier
//! - [`ContentKind`]: The kind of uploaded content (document, image, survey, ...)
//! - [`NamingMode`]: How files are named inside a shard directory
//! - [`ContentRecord`]: The persisted row describing one uploaded unit
//! - [`Locator`]: `file://` URL of a stored blob
//! - [`IngestOutcome`]: Per-item result of an ingest: committed, duplicate, or fatal

pub mod error;
pub mod id;
pub mod kind;
pub mod outcome;
pub mod record;

pub use error::TypeError;
pub use id::{ContentId, OwnerId};
pub use kind::{ContentKind, NamingMode};
pub use outcome::{FailureStage, FatalError, IngestOutcome};
pub use record::{ContentRecord, Locator};
