//! # sync-client
//!
//! Source client, change feeds and sync coordinator for revmirror.
//!
//! ## Features
//!
//! - **Source Abstraction**: Pluggable access to the MediaWiki action API
//!   (HTTP, mock) with continuation paging
//! - **Change Feeds**: Drains revisions, archived revisions and log events
//!   for a window
//! - **Coordinator**: Resolves, plans and applies a window in one
//!   transaction, then advances the checkpoint
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{HttpSource, SyncCoordinator, SyncOptions};
//! use sync_store::SqliteReplica;
//!
//! let source = HttpSource::new("https://wiki.example.org/w/api.php", "revmirror/0.1", timeout)?;
//! let replica = SqliteReplica::new(path).await?;
//! let coordinator = SyncCoordinator::new(source, replica, SyncOptions::default());
//!
//! let report = coordinator.run().await?;
//! println!("{report}");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod feed;
pub mod source;

pub use coordinator::{ErrorCategory, RunError, RunReport, SyncCoordinator, SyncOptions};
pub use feed::{ChangeFeed, FeedOptions, DEFAULT_IDS_PER_QUERY};
pub use source::{call, list, ApiParams, HttpSource, MockSource, Pager, Source, SourceError};
