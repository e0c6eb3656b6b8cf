use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The kind of uploaded content.
///
/// Every kind that stores blobs gets its own shard tree and allocator.
/// Survey responses are row-only: their payload lives in the relational
/// store and no file is written for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Arbitrary documents attached to campaigns or classes.
    Document,
    /// Photos taken as survey prompt responses.
    Image,
    /// Audio recordings.
    Audio,
    /// Video recordings.
    Video,
    /// Generic file prompt responses.
    File,
    /// Survey responses (JSON stored inline in the row).
    Survey,
}

impl ContentKind {
    /// All kinds, in a stable order.
    pub const ALL: [ContentKind; 6] = [
        Self::Document,
        Self::Image,
        Self::Audio,
        Self::Video,
        Self::File,
        Self::Survey,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::File => "file",
            Self::Survey => "survey",
        }
    }

    /// Whether content of this kind is written to the filesystem.
    pub fn stores_blobs(&self) -> bool {
        !matches!(self, Self::Survey)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TypeError::UnknownKind(s.to_string()))
    }
}

/// How files are named inside a leaf shard directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamingMode {
    /// The caller names the file (its content id); the allocator only picks
    /// the directory. Every entry in a leaf counts toward its limit.
    #[default]
    ContentAddressed,
    /// The allocator hands out zero-padded sequential file names local to
    /// the current leaf. Only numerically named files count toward the limit.
    Sequential,
}

impl fmt::Display for NamingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentAddressed => write!(f, "content-addressed"),
            Self::Sequential => write!(f, "sequential"),
        }
    }
}
