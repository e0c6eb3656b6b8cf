use std::path::PathBuf;

use strata_types::{ContentId, ContentKind, FatalError};
use thiserror::Error;

/// Failure to build a derived artifact from a stored blob.
#[derive(Debug, Error)]
pub enum DeriveError {
    #[error("image codec: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Other(String),
}

/// Errors that stop an ingest call outright.
///
/// Per-item results of a single-item ingest are reported as
/// [`strata_types::IngestOutcome`] values; these errors cover what cannot be
/// attributed to one item (configuration, exhaustion, an aborted batch).
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(#[from] strata_config::ConfigError),

    #[error("shard error: {0}")]
    Shard(#[from] strata_shard::ShardError),

    #[error("database error: {0}")]
    Db(#[from] strata_db::DbError),

    /// A non-duplicate database failure inside a batch. The whole batch was
    /// rolled back.
    #[error("structural database failure: {0}")]
    Structural(strata_db::DbError),

    #[error("filesystem write failed at {path}: {source}")]
    FilesystemWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    FilesystemRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("derived artifact for {path} failed: {source}")]
    Derived {
        path: PathBuf,
        #[source]
        source: DeriveError,
    },

    #[error("no blob store configured for kind {0}")]
    NotConfigured(ContentKind),

    #[error("kind {0} stores rows only and cannot take a blob")]
    RowOnlyKind(ContentKind),

    #[error("record {0} needs a blob")]
    MissingBlob(ContentId),

    /// An item failed while ingesting a batch one transaction at a time.
    /// Items before `index` stay committed.
    #[error("batch item {index} failed: {error}")]
    ItemFailed { index: usize, error: FatalError },
}

pub type IngestResult<T> = Result<T, IngestError>;
