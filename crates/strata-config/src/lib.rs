//! Configuration for Strata content ingestion.
//!
//! Storage settings are read once, when the ingest service is constructed.
//! A missing or malformed value is a [`ConfigError`] and the service refuses
//! to start; nothing is looked up per request.
//!
//! - [`StrataConfig`]: the file-level configuration (TOML)
//! - [`KindConfig`]: the validated settings for one content kind

pub mod config;
pub mod error;

pub use config::{width_for, KindConfig, KindSection, StrataConfig, DEFAULT_DEPTH, DEFAULT_FANOUT};
pub use error::{ConfigError, ConfigResult};
