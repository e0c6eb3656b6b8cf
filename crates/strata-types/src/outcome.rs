use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::ContentId;

/// The step of the ingest protocol at which an item failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureStage {
    /// The metadata insert failed for a reason other than a duplicate key,
    /// or the row could not be pointed at its blob.
    Insert,
    /// Writing the primary blob failed.
    FilesystemWrite,
    /// Generating or writing a derived artifact (thumbnail) failed.
    DerivedArtifact,
    /// The transaction could not be committed.
    Commit,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::FilesystemWrite => write!(f, "filesystem write"),
            Self::DerivedArtifact => write!(f, "derived artifact"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// A fatal, per-item ingest failure.
///
/// Carried by value so that outcomes can be serialized back to the request
/// layer; the underlying error has already been logged by the writer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalError {
    pub stage: FailureStage,
    pub message: String,
}

impl FatalError {
    pub fn new(stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

/// Result of ingesting one item.
///
/// `Duplicate` is not an error: retry-heavy mobile clients treat it as
/// success, but it is reported distinctly so callers can tell nothing new
/// was stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum IngestOutcome {
    Committed { id: ContentId },
    Duplicate { id: ContentId },
    Fatal { id: ContentId, error: FatalError },
}

impl IngestOutcome {
    pub fn id(&self) -> &ContentId {
        match self {
            Self::Committed { id } | Self::Duplicate { id } | Self::Fatal { id, .. } => id,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Whether a client may consider its upload accepted.
    pub fn is_success(&self) -> bool {
        !self.is_fatal()
    }
}

impl fmt::Display for IngestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed { id } => write!(f, "committed {id}"),
            Self::Duplicate { id } => write!(f, "duplicate {id}"),
            Self::Fatal { id, error } => write!(f, "fatal {id}: {error}"),
        }
    }
}
