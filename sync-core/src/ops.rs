//! Named storage operations.
//!
//! Every write the mirror performs is one of these variants over an explicit
//! parameter struct. Storage backends execute them; nothing else touches the
//! revision relations. All of them are safe to execute more than once.

use chrono::{DateTime, Utc};
use std::fmt;
use sync_types::{Namespace, PageId, PageTitle, RevisionId, TextId};

/// Encoding flag stored with every text blob.
pub const TEXT_FLAGS: &str = "utf-8";

/// A content blob.
///
/// `id` is only used when the revision has no blob yet; a revision that
/// already references one gets it overwritten in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRow {
    /// Surrogate ID for a new blob.
    pub id: TextId,
    /// Revision the content belongs to.
    pub revision: RevisionId,
    /// Content.
    pub text: String,
    /// Encoding flag.
    pub flags: String,
}

/// Revision columns shared by the live and archived relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionFields {
    /// Revision ID.
    pub id: RevisionId,
    /// Content blob, when content was fetched.
    pub text_id: Option<TextId>,
    /// Edit summary.
    pub comment: String,
    /// Author ID (0 for anonymous or hidden).
    pub user_id: u64,
    /// Author name.
    pub user_text: String,
    /// Save time.
    pub timestamp: DateTime<Utc>,
    /// Minor edit flag.
    pub minor_edit: bool,
    /// Deletion bitmask.
    pub deleted: u32,
    /// Content length.
    pub len: Option<u64>,
    /// Parent revision.
    pub parent_id: Option<RevisionId>,
    /// Content hash.
    pub sha1: Option<String>,
    /// Content model.
    pub content_model: Option<String>,
    /// Content format.
    pub content_format: Option<String>,
}

/// A row of the live revision relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRow {
    /// Owning page.
    pub page_id: PageId,
    /// Revision columns.
    pub fields: RevisionFields,
}

/// A row of the archived revision relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedRevisionRow {
    /// Title the page had when deleted.
    pub title: PageTitle,
    /// Page ID, unknown until the page is restored.
    pub page_id: Option<PageId>,
    /// Revision columns.
    pub fields: RevisionFields,
}

/// A (revision, tag) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagLink {
    /// The revision.
    pub revision: RevisionId,
    /// Tag name.
    pub tag: String,
}

/// Page ID assignment for archived rows of a title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedPageId {
    /// Namespace of the title.
    pub namespace: Namespace,
    /// Database title.
    pub db_title: String,
    /// ID to assign where none is set.
    pub page_id: PageId,
}

/// Revisions of a source page at or before a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRange {
    /// Page the revisions belong to now.
    pub source: PageId,
    /// Page they are reassigned to, resolved by title at execution time.
    pub destination: PageTitle,
    /// Inclusive upper bound on revision timestamps.
    pub merge_point: DateTime<Utc>,
}

/// New visibility of one revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    /// The revision.
    pub revision: RevisionId,
    /// New deletion bitmask.
    pub bitmask: u32,
}

/// One idempotent write against the replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Insert a blob; on conflict overwrite content and flags.
    UpsertText(TextRow),
    /// Insert a live revision; on conflict update only the blob reference.
    UpsertRevision(RevisionRow),
    /// Insert an archived revision; on conflict update only the blob reference.
    UpsertArchivedRevision(ArchivedRevisionRow),
    /// Tag a live revision; ignore if present.
    InsertTagLink(TagLink),
    /// Tag an archived revision; ignore if present.
    InsertArchivedTagLink(TagLink),
    /// Tag a revision in whichever relation holds it at execution time.
    InsertTagLinkWhereHeld(TagLink),
    /// Untag a live revision.
    DeleteTagLink(TagLink),
    /// Untag an archived revision.
    DeleteArchivedTagLink(TagLink),
    /// Fill in the page ID of archived rows of a title that have none.
    SetArchivedPageId(ArchivedPageId),
    /// Move tag links of a page's archived revisions to the live relation.
    MoveArchivedTagLinks {
        /// The restored page.
        page_id: PageId,
    },
    /// Move a page's archived revisions to the live relation.
    MoveArchivedRevisions {
        /// The restored page.
        page_id: PageId,
    },
    /// Reassign live revisions of a page to another page.
    MergeRevisions(MergeRange),
    /// Update the bitmask of a live revision if present.
    SetRevisionVisibility(Visibility),
    /// Update the bitmask of an archived revision if present.
    SetArchivedRevisionVisibility(Visibility),
}

impl StorageOp {
    /// Operation name used in logs and error reports.
    pub fn name(&self) -> &'static str {
        match self {
            StorageOp::UpsertText(_) => "upsert_text",
            StorageOp::UpsertRevision(_) => "upsert_revision",
            StorageOp::UpsertArchivedRevision(_) => "upsert_archived_revision",
            StorageOp::InsertTagLink(_) => "insert_tag_link",
            StorageOp::InsertArchivedTagLink(_) => "insert_archived_tag_link",
            StorageOp::InsertTagLinkWhereHeld(_) => "insert_tag_link_where_held",
            StorageOp::DeleteTagLink(_) => "delete_tag_link",
            StorageOp::DeleteArchivedTagLink(_) => "delete_archived_tag_link",
            StorageOp::SetArchivedPageId(_) => "set_archived_page_id",
            StorageOp::MoveArchivedTagLinks { .. } => "move_archived_tag_links",
            StorageOp::MoveArchivedRevisions { .. } => "move_archived_revisions",
            StorageOp::MergeRevisions(_) => "merge_revisions",
            StorageOp::SetRevisionVisibility(_) => "set_revision_visibility",
            StorageOp::SetArchivedRevisionVisibility(_) => "set_archived_revision_visibility",
        }
    }
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageOp::UpsertText(row) => write!(f, "{}({})", self.name(), row.id),
            StorageOp::UpsertRevision(row) => write!(f, "{}({})", self.name(), row.fields.id),
            StorageOp::UpsertArchivedRevision(row) => {
                write!(f, "{}({})", self.name(), row.fields.id)
            }
            StorageOp::InsertTagLink(link)
            | StorageOp::InsertArchivedTagLink(link)
            | StorageOp::InsertTagLinkWhereHeld(link)
            | StorageOp::DeleteTagLink(link)
            | StorageOp::DeleteArchivedTagLink(link) => {
                write!(f, "{}({}, {})", self.name(), link.revision, link.tag)
            }
            StorageOp::SetArchivedPageId(params) => write!(
                f,
                "{}({}:{} = {})",
                self.name(),
                params.namespace,
                params.db_title,
                params.page_id
            ),
            StorageOp::MoveArchivedTagLinks { page_id }
            | StorageOp::MoveArchivedRevisions { page_id } => {
                write!(f, "{}({})", self.name(), page_id)
            }
            StorageOp::MergeRevisions(range) => write!(
                f,
                "{}({} -> {})",
                self.name(),
                range.source,
                range.destination
            ),
            StorageOp::SetRevisionVisibility(v) | StorageOp::SetArchivedRevisionVisibility(v) => {
                write!(f, "{}({}, {})", self.name(), v.revision, v.bitmask)
            }
        }
    }
}
