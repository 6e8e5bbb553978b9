//! # sync-types
//!
//! Source wire types for revmirror.
//!
//! This crate provides the foundational types used across all revmirror crates:
//! - [`RevisionId`], [`PageId`], [`TextId`], [`Namespace`] - Identity types
//! - [`PageTitle`] - Titles in database form
//! - [`Revision`], [`ApiPage`], [`PageRevisions`] - Revision records
//! - [`LogEntry`], [`LogEvent`] - Log entries and their typed interpretation
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod log;
mod revision;
pub mod time;
mod title;

pub use error::TypesError;
pub use ids::{Namespace, PageId, RevisionId, TextId};
pub use log::{LogEntry, LogEvent, StructuralEvent, TagChange};
pub use revision::{
    ApiPage, PageRevisions, Revision, Slot, DELETED_COMMENT, DELETED_RESTRICTED, DELETED_TEXT,
    DELETED_USER,
};
pub use title::PageTitle;
