/// Errors produced by the relational content store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    /// The engine rejected a statement. `code` is the engine's own
    /// (extended) result code; only a [`crate::DuplicateClassifier`] interprets it.
    #[error("database engine error {code}: {message}")]
    Engine { code: i32, message: String },

    /// A failure inside the driver that carries no engine code.
    #[error("database driver error: {0}")]
    Driver(String),

    /// A stored row could not be turned back into a record.
    #[error("invalid stored row {id}: {reason}")]
    Decode { id: String, reason: String },

    /// An update addressed a row that does not exist in this transaction.
    #[error("no stored row {0}")]
    MissingRow(String),

    #[error("invalid savepoint name: {0}")]
    InvalidSavepoint(String),

    #[error("database lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, message) => Self::Engine {
                code: failure.extended_code,
                message: message.unwrap_or_else(|| failure.to_string()),
            },
            other => Self::Driver(other.to_string()),
        }
    }
}

impl DbError {
    pub fn engine_code(&self) -> Option<i32> {
        match self {
            Self::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
