//! # sync-core
//!
//! Pure reconciliation logic for revmirror (no I/O, instant tests).
//!
//! This crate turns drained change feeds into storage operations without any
//! network or disk I/O:
//! - [`resolver`] collapses raw events into canonical [`Action`]s
//! - [`planner`] maps actions to named [`StorageOp`]s
//! - [`allocator`] hands out text blob IDs for one run
//! - [`state`] tracks the run lifecycle and when to advance the checkpoint
//!
//! The actual I/O is performed by `sync-client` and `sync-store`, which
//! execute what this crate produces.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod allocator;
pub mod batch;
pub mod ops;
pub mod planner;
pub mod resolver;
pub mod state;

pub use action::Action;
pub use allocator::TextIdAllocator;
pub use batch::{ChangeBatch, LivePage};
pub use ops::{
    ArchivedPageId, ArchivedRevisionRow, MergeRange, RevisionFields, RevisionRow, StorageOp,
    TagLink, TextRow, Visibility, TEXT_FLAGS,
};
pub use planner::WritePlanner;
pub use resolver::{bootstrap_actions, resolve, PageFates, Resolution, ResolveError, TagLedger};
pub use state::{RunAction, RunEvent, RunState, SyncMode};
