//! Error types for sync-store.

use sync_types::RevisionId;

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A tag was added to a revision held in neither relation.
    #[error("revision {revision} is not stored")]
    UnknownRevision {
        /// The revision.
        revision: RevisionId,
    },

    /// A stored checkpoint could not be parsed.
    #[error("checkpoint {key} holds invalid timestamp {value:?}")]
    CorruptCheckpoint {
        /// Checkpoint key.
        key: String,
        /// Stored text.
        value: String,
    },
}

impl StorageError {
    /// Whether the database rejected a write because of a constraint.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            StorageError::Database(sqlx::Error::Database(db)) => matches!(
                db.kind(),
                sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation
            ),
            StorageError::UnknownRevision { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
