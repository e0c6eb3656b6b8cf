use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid content id {value:?}: {reason}")]
    InvalidContentId { value: String, reason: &'static str },

    #[error("unknown content kind: {0}")]
    UnknownKind(String),

    #[error("invalid locator: {0}")]
    InvalidLocator(String),
}
