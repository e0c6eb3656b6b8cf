use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_types::{ContentKind, NamingMode};

use crate::error::{ConfigError, ConfigResult};

/// Default maximum number of entries per directory.
pub const DEFAULT_FANOUT: u32 = 1000;
/// Default number of directory levels between a root and its leaves.
pub const DEFAULT_DEPTH: u32 = 3;

/// Largest fanout accepted; directory names stay at most ten digits wide.
const MAX_FANOUT: u32 = 1_000_000_000;
/// Deeper trees than this are almost certainly a typo.
const MAX_DEPTH: u32 = 16;

/// File-level configuration.
///
/// ```toml
/// database = "/var/lib/strata/content.db"
/// max_files_per_directory = 1000
/// hierarchy_depth = 3
///
/// [kinds.document]
/// root = "/var/lib/strata/documents"
///
/// [kinds.image]
/// root = "/var/lib/strata/images"
/// naming = "sequential"
/// extension = "jpg"
/// thumbnail = true
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Path of the SQLite database holding content records.
    pub database: PathBuf,
    /// Fanout used by every kind that does not set its own.
    #[serde(default = "default_fanout")]
    pub max_files_per_directory: u32,
    /// Depth used by every kind that does not set its own.
    #[serde(default = "default_depth")]
    pub hierarchy_depth: u32,
    /// Per-kind sections keyed by kind name (`document`, `image`, ...).
    #[serde(default)]
    pub kinds: BTreeMap<String, KindSection>,
}

fn default_fanout() -> u32 {
    DEFAULT_FANOUT
}

fn default_depth() -> u32 {
    DEFAULT_DEPTH
}

/// One `[kinds.<name>]` section as written in the file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KindSection {
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub naming: NamingMode,
    pub fanout: Option<u32>,
    pub depth: Option<u32>,
    /// Digits in sequential file names; defaults to the width of the fanout.
    pub name_width: Option<usize>,
    /// Extension appended to sequential file names (without the dot).
    pub extension: Option<String>,
    #[serde(default)]
    pub thumbnail: bool,
}

impl StrataConfig {
    /// Load and parse a TOML configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        for name in config.kinds.keys() {
            name.parse::<ContentKind>()
                .map_err(|_| ConfigError::UnknownKind(name.clone()))?;
        }
        Ok(config)
    }

    /// Kinds that have a section in the file, in a stable order.
    pub fn configured_kinds(&self) -> Vec<ContentKind> {
        let mut kinds: Vec<ContentKind> = self
            .kinds
            .keys()
            .filter_map(|name| name.parse().ok())
            .collect();
        kinds.sort();
        kinds
    }

    /// Resolve and validate the settings for one blob-storing kind.
    pub fn resolve(&self, kind: ContentKind) -> ConfigResult<KindConfig> {
        let key = format!("kinds.{kind}");
        if !kind.stores_blobs() {
            return Err(ConfigError::invalid(key, "kind does not store blobs"));
        }
        let section = self
            .kinds
            .get(kind.as_str())
            .ok_or_else(|| ConfigError::Missing { key: key.clone() })?;
        let root = section.root.clone().ok_or_else(|| ConfigError::Missing {
            key: format!("{key}.root"),
        })?;
        let fanout = section.fanout.unwrap_or(self.max_files_per_directory);
        let depth = section.depth.unwrap_or(self.hierarchy_depth);

        let config = KindConfig {
            kind,
            root,
            depth,
            fanout,
            naming: section.naming,
            name_width: section.name_width.unwrap_or_else(|| width_for(fanout)),
            extension: section.extension.clone(),
            thumbnail: section.thumbnail,
        };
        config.validate()?;
        tracing::debug!(
            kind = %kind,
            root = %config.root.display(),
            depth,
            fanout,
            naming = %config.naming,
            "resolved storage config"
        );
        Ok(config)
    }
}

/// Validated storage settings for one content kind.
///
/// This is what a shard allocator is constructed from. Build it through
/// [`StrataConfig::resolve`] or the constructors below, which validate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindConfig {
    pub kind: ContentKind,
    /// Root of this kind's shard tree. Must exist and be absolute.
    pub root: PathBuf,
    /// Number of directory levels between the root and a leaf.
    pub depth: u32,
    /// Maximum children per branch directory and maximum files per leaf.
    pub fanout: u32,
    pub naming: NamingMode,
    /// Digits in sequential file names.
    pub name_width: usize,
    /// Extension of sequential file names, without the dot.
    pub extension: Option<String>,
    /// Whether to write a thumbnail next to every blob.
    pub thumbnail: bool,
}

impl KindConfig {
    /// Settings for a content-addressed kind (documents).
    pub fn content_addressed(
        kind: ContentKind,
        root: impl Into<PathBuf>,
        depth: u32,
        fanout: u32,
    ) -> ConfigResult<Self> {
        let config = Self {
            kind,
            root: root.into(),
            depth,
            fanout,
            naming: NamingMode::ContentAddressed,
            name_width: width_for(fanout),
            extension: None,
            thumbnail: false,
        };
        config.validate()?;
        Ok(config)
    }

    /// Settings for a sequentially named kind (media).
    pub fn sequential(
        kind: ContentKind,
        root: impl Into<PathBuf>,
        depth: u32,
        fanout: u32,
        extension: impl Into<String>,
    ) -> ConfigResult<Self> {
        let config = Self {
            kind,
            root: root.into(),
            depth,
            fanout,
            naming: NamingMode::Sequential,
            name_width: width_for(fanout),
            extension: Some(extension.into()),
            thumbnail: false,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_thumbnail(mut self, thumbnail: bool) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    /// Check every invariant the shard tree relies on.
    pub fn validate(&self) -> ConfigResult<()> {
        let key = |field: &str| format!("kinds.{}.{field}", self.kind);

        if !self.kind.stores_blobs() {
            return Err(ConfigError::invalid(
                format!("kinds.{}", self.kind),
                "kind does not store blobs",
            ));
        }
        if !self.root.is_absolute() {
            return Err(ConfigError::invalid(key("root"), "must be an absolute path"));
        }
        if self.fanout < 2 || self.fanout > MAX_FANOUT {
            return Err(ConfigError::invalid(
                key("fanout"),
                format!("must be between 2 and {MAX_FANOUT}, got {}", self.fanout),
            ));
        }
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(ConfigError::invalid(
                key("depth"),
                format!("must be between 1 and {MAX_DEPTH}, got {}", self.depth),
            ));
        }
        if self.naming == NamingMode::Sequential {
            let needed = width_for(self.fanout);
            if self.name_width < needed {
                return Err(ConfigError::invalid(
                    key("name_width"),
                    format!("fanout {} needs at least {needed} digits", self.fanout),
                ));
            }
            match self.extension.as_deref() {
                None => return Err(ConfigError::Missing { key: key("extension") }),
                Some(ext) if !valid_extension(ext) => {
                    return Err(ConfigError::invalid(
                        key("extension"),
                        "must be non-empty ASCII alphanumerics",
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn valid_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Width of numeric names in a tree with the given fanout: the number of
/// digits in `fanout - 1`. A fanout of 1000 gives `000`..`999`.
pub fn width_for(fanout: u32) -> usize {
    fanout
        .saturating_sub(1)
        .checked_ilog10()
        .map_or(1, |d| d as usize + 1)
}
