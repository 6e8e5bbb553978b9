//! # sync-store
//!
//! Replica storage for revmirror.
//!
//! The mirror writes through [`ReplicaStore`]: one [`ReplicaTransaction`] per
//! run, executing named [`StorageOp`]s, committed once at the end. Dropping a
//! transaction without committing rolls it back. The checkpoint lives behind
//! [`CheckpointStore`] and is written only after a commit.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use sqlite::{ReplicaStats, RevisionLocation, SqliteReplica, SqliteTransaction, StoredRevision};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sync_core::StorageOp;
use sync_types::TextId;

/// Checkpoint key used when none is configured.
pub const DEFAULT_CHECKPOINT_KEY: &str = "revisions";

/// Trait for replica backends.
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    /// Open the run's transaction.
    async fn begin(&self) -> Result<Box<dyn ReplicaTransaction>, StorageError>;
}

/// All writes of one run.
#[async_trait]
pub trait ReplicaTransaction: Send {
    /// Highest stored text blob ID, `None` when there are none.
    async fn max_text_id(&mut self) -> Result<Option<TextId>, StorageError>;

    /// Empty every revision relation (first sync only).
    async fn clear_revisions(&mut self) -> Result<(), StorageError>;

    /// Execute one operation.
    ///
    /// Returns the number of rows written.
    async fn execute(&mut self, op: &StorageOp) -> Result<u64, StorageError>;

    /// Make every executed operation durable.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}

/// Trait for checkpoint persistence.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the checkpoint, `None` if the mirror was never synced.
    async fn read_checkpoint(&self, key: &str) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// Replace the checkpoint.
    async fn write_checkpoint(&self, key: &str, at: DateTime<Utc>) -> Result<(), StorageError>;
}
