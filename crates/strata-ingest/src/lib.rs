//! Dual-resource ingest for Strata.
//!
//! Every uploaded unit of content becomes one database row and, for
//! blob-carrying kinds, one file in a bounded-fanout shard tree. The two
//! resources do not share a transaction, so this crate orders the writes and
//! cleans up after itself to make them appear atomic:
//!
//! - [`DualResourceIngestWriter`] handles a single item in its own
//!   transaction.
//! - [`BatchIngestCoordinator`] handles many items in one transaction with a
//!   savepoint per item, so a retried (duplicate) item does not abort the
//!   others.
//! - [`IngestService`] owns the database, the duplicate classifier and one
//!   [`KindStore`] per content kind.
//!
//! Duplicates are outcomes, not errors: a client that retries an upload it
//! already completed gets [`IngestOutcome::Duplicate`] and nothing changes.

pub mod batch;
pub mod cleanup;
pub mod derive;
pub mod error;
pub mod service;
pub mod store;
pub mod writer;

pub use batch::{BatchIngestCoordinator, BatchItem};
pub use cleanup::WrittenFiles;
pub use derive::{derived_path, DerivedArtifact, ImageThumbnailer, THUMBNAIL_SUFFIX};
pub use error::{DeriveError, IngestError, IngestResult};
pub use service::{IngestService, KindStatus};
pub use store::{create_roots, BlobStores, KindStore};
pub use writer::DualResourceIngestWriter;

pub use strata_types::{ContentId, ContentKind, ContentRecord, IngestOutcome, OwnerId};
