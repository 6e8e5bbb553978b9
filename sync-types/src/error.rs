//! Error types for revmirror wire data.

use thiserror::Error;

/// Errors raised while interpreting source payloads.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    /// A timestamp in neither ISO-8601 nor 14-digit form.
    #[error("invalid timestamp: {value}")]
    InvalidTimestamp {
        /// The rejected text.
        value: String,
    },

    /// A log entry of a known type is missing a field it must carry.
    #[error("malformed {kind} log entry {logid:?}: {reason}")]
    MalformedLogEntry {
        /// `type/action` of the entry.
        kind: String,
        /// Log ID, when the source reported one.
        logid: Option<u64>,
        /// What is missing or wrong.
        reason: String,
    },
}
