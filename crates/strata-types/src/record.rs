use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::{ContentId, OwnerId};
use crate::kind::ContentKind;

const FILE_SCHEME: &str = "file://";

/// Location of a stored blob, rendered as a `file://` URL in the database.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locator(PathBuf);

impl Locator {
    /// Wrap an absolute filesystem path.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, TypeError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(TypeError::InvalidLocator(format!(
                "path must be absolute: {}",
                path.display()
            )));
        }
        Ok(Self(path))
    }

    /// Parse a `file://` URL as stored in the database.
    pub fn parse(url: &str) -> Result<Self, TypeError> {
        let rest = url
            .strip_prefix(FILE_SCHEME)
            .ok_or_else(|| TypeError::InvalidLocator(format!("not a file URL: {url}")))?;
        Self::from_path(rest)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn to_url(&self) -> String {
        format!("{FILE_SCHEME}{}", self.0.display())
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locator({})", self.0.display())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

impl TryFrom<String> for Locator {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.to_url()
    }
}

/// The persisted row describing one uploaded unit of content.
///
/// A record is created inside a single ingest transaction. Either the row
/// and (if it has a locator) the file both exist after commit, or neither
/// does.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Client-supplied or server-generated identifier. Unique per store.
    pub id: ContentId,
    pub kind: ContentKind,
    pub owner: OwnerId,
    /// Where the blob lives; `None` for row-only content such as survey JSON.
    pub locator: Option<Locator>,
    pub created_at: DateTime<Utc>,
    /// Size of the blob (or of the inline payload for row-only content).
    pub size_bytes: u64,
    /// Original file name, informational only.
    pub name: Option<String>,
    /// Inline JSON payload for row-only content.
    pub payload: Option<serde_json::Value>,
}

impl ContentRecord {
    /// A fresh record with no locator, payload, or name.
    pub fn new(id: ContentId, kind: ContentKind, owner: OwnerId) -> Self {
        Self {
            id,
            kind,
            owner,
            locator: None,
            created_at: Utc::now(),
            size_bytes: 0,
            name: None,
            payload: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach an inline JSON payload; the recorded size becomes the length
    /// of its serialized form.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.size_bytes = payload.to_string().len() as u64;
        self.payload = Some(payload);
        self
    }

    /// File extension of the original name, lowercased, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.name.as_deref()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_url_round_trip() {
        let loc = Locator::from_path("/srv/docs/000/001/abc").unwrap();
        assert_eq!(loc.to_url(), "file:///srv/docs/000/001/abc");
        assert_eq!(Locator::parse(&loc.to_url()).unwrap(), loc);
    }

    #[test]
    fn locator_rejects_relative_and_foreign_urls() {
        assert!(Locator::from_path("relative/path").is_err());
        assert!(Locator::parse("http://example.com/x").is_err());
        assert!(Locator::parse("file://relative").is_err());
    }

    #[test]
    fn payload_sets_size() {
        let payload = serde_json::json!({"prompt": "mood", "value": 3});
        let expected = payload.to_string().len() as u64;
        let record = ContentRecord::new(
            ContentId::parse("s1").unwrap(),
            ContentKind::Survey,
            OwnerId(1),
        )
        .with_payload(payload);
        assert_eq!(record.size_bytes, expected);
        assert!(record.locator.is_none());
    }

    #[test]
    fn extension_from_name() {
        let base = ContentRecord::new(ContentId::generate(), ContentKind::Document, OwnerId(1));
        assert_eq!(base.clone().with_name("Report.PDF").extension().as_deref(), Some("pdf"));
        assert_eq!(base.clone().with_name("README").extension(), None);
        assert_eq!(base.clone().with_name(".bashrc").extension(), None);
        assert_eq!(base.extension(), None);
    }
}
