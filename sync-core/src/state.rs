//! Run state machine for revmirror.
//!
//! This module provides a pure, side-effect-free state machine for one
//! synchronization run. It takes events as input and produces a new state
//! plus a list of actions to execute.
//!
//! The actual I/O (reading feeds, writing storage, persisting the checkpoint)
//! is performed by sync-client, not by this module.

use chrono::{DateTime, Utc};
use std::fmt;

/// How a run populates the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// No checkpoint yet: copy everything.
    Bootstrap,
    /// Apply the changes since the checkpoint.
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Bootstrap => write!(f, "bootstrap"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Run state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Populating an empty replica.
    Bootstrap {
        /// When the run started; becomes the checkpoint on success.
        started: DateTime<Utc>,
    },
    /// Applying changes since the last checkpoint.
    Incremental {
        /// The checkpoint the window starts at.
        since: DateTime<Utc>,
        /// When the run started; becomes the checkpoint on success.
        started: DateTime<Utc>,
    },
    /// All writes committed.
    Completed {
        /// Checkpoint recorded by this run.
        checkpoint: DateTime<Utc>,
    },
    /// The run was aborted; the checkpoint is unchanged.
    Failed {
        /// Why it failed.
        reason: String,
    },
}

/// Events that drive a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Every operation succeeded and the transaction committed.
    Committed,
    /// Something went wrong before the commit finished.
    Aborted {
        /// Why.
        reason: String,
    },
}

/// Actions for the coordinator to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAction {
    /// Persist the new checkpoint.
    WriteCheckpoint(DateTime<Utc>),
}

impl RunState {
    /// Pick the mode from the stored checkpoint.
    pub fn start(checkpoint: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match checkpoint {
            None => Self::Bootstrap { started: now },
            Some(since) => Self::Incremental {
                since,
                started: now,
            },
        }
    }

    /// Mode of a run that has not finished yet.
    pub fn mode(&self) -> Option<SyncMode> {
        match self {
            Self::Bootstrap { .. } => Some(SyncMode::Bootstrap),
            Self::Incremental { .. } => Some(SyncMode::Incremental),
            Self::Completed { .. } | Self::Failed { .. } => None,
        }
    }

    /// Start of the window, for incremental runs.
    pub fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Incremental { since, .. } => Some(*since),
            _ => None,
        }
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// Only a commit of a running state yields a checkpoint write.
    pub fn on_event(self, event: RunEvent) -> (Self, Vec<RunAction>) {
        match (self, event) {
            (Self::Bootstrap { started }, RunEvent::Committed)
            | (Self::Incremental { started, .. }, RunEvent::Committed) => (
                Self::Completed {
                    checkpoint: started,
                },
                vec![RunAction::WriteCheckpoint(started)],
            ),
            (Self::Bootstrap { .. } | Self::Incremental { .. }, RunEvent::Aborted { reason }) => {
                (Self::Failed { reason }, vec![])
            }

            // Finished runs ignore further events
            (state, _) => (state, vec![]),
        }
    }
}
