//! Canonical actions.
//!
//! An action is a deduplicated intent derived from raw change events. The
//! resolver produces them; the write planner turns each into storage
//! operations.

use chrono::{DateTime, Utc};
use std::fmt;
use sync_types::{PageId, PageTitle, Revision, RevisionId};

/// A canonical write intent.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Store a revision of a live page.
    AddRevision {
        /// Page the revision belongs to.
        page_id: PageId,
        /// The revision.
        revision: Revision,
    },
    /// Store a revision of a deleted page.
    AddArchivedRevision {
        /// Title of the deleted page.
        title: PageTitle,
        /// Page ID, when the source still reports one.
        page_id: Option<PageId>,
        /// The revision.
        revision: Revision,
    },
    /// Give archived rows of a title the ID their page was restored under.
    SetArchivedPageId {
        /// Title of the restored page.
        title: PageTitle,
        /// ID of the restored page.
        page_id: PageId,
    },
    /// Move a restored page's archived revisions back to live storage.
    RestorePage {
        /// ID of the restored page.
        page_id: PageId,
    },
    /// Reassign revisions of one page to another.
    MergeRevisions {
        /// Page the revisions come from.
        source: PageId,
        /// Page the revisions go to.
        destination: PageTitle,
        /// Revisions at or before this time move.
        merge_point: DateTime<Utc>,
    },
    /// Set the deletion bitmask of a revision wherever it is stored.
    SetDeletionBitmask {
        /// The revision.
        revision: RevisionId,
        /// New bitmask.
        bitmask: u32,
    },
    /// Tag a revision.
    AddTag {
        /// The revision.
        revision: RevisionId,
        /// Tag name.
        tag: String,
    },
    /// Untag a revision.
    RemoveTag {
        /// The revision.
        revision: RevisionId,
        /// Tag name.
        tag: String,
    },
}

impl Action {
    /// Short name used in logs and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::AddRevision { .. } => "AddRevision",
            Action::AddArchivedRevision { .. } => "AddArchivedRevision",
            Action::SetArchivedPageId { .. } => "SetArchivedPageID",
            Action::RestorePage { .. } => "RestorePage",
            Action::MergeRevisions { .. } => "MergeRevisions",
            Action::SetDeletionBitmask { .. } => "SetDeletionBitmask",
            Action::AddTag { .. } => "AddTag",
            Action::RemoveTag { .. } => "RemoveTag",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::AddRevision { page_id, revision } => {
                write!(f, "AddRevision({}, page {})", revision.id, page_id)
            }
            Action::AddArchivedRevision {
                title, revision, ..
            } => write!(f, "AddArchivedRevision({}, {})", revision.id, title),
            Action::SetArchivedPageId { title, page_id } => {
                write!(f, "SetArchivedPageID({}, {})", title, page_id)
            }
            Action::RestorePage { page_id } => write!(f, "RestorePage({})", page_id),
            Action::MergeRevisions {
                source,
                destination,
                merge_point,
            } => write!(
                f,
                "MergeRevisions({} -> {}, <= {})",
                source,
                destination,
                sync_types::time::format_timestamp(merge_point)
            ),
            Action::SetDeletionBitmask { revision, bitmask } => {
                write!(f, "SetDeletionBitmask({}, {})", revision, bitmask)
            }
            Action::AddTag { revision, tag } => write!(f, "AddTag({}, {})", revision, tag),
            Action::RemoveTag { revision, tag } => write!(f, "RemoveTag({}, {})", revision, tag),
        }
    }
}
