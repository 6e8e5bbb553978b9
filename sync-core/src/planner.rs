//! Write planning: canonical actions to storage operations.

use crate::action::Action;
use crate::allocator::TextIdAllocator;
use crate::ops::{
    ArchivedPageId, ArchivedRevisionRow, MergeRange, RevisionFields, RevisionRow, StorageOp,
    TagLink, TextRow, Visibility, TEXT_FLAGS,
};
use sync_types::Revision;

/// Maps each canonical action to the operations that realize it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePlanner {
    with_content: bool,
}

impl WritePlanner {
    /// Create a planner; `with_content` stores revision text as blobs.
    pub fn new(with_content: bool) -> Self {
        Self { with_content }
    }

    /// Plan one action.
    ///
    /// Text IDs are drawn from `texts` at plan time, so the caller must
    /// execute the returned operations before planning with another
    /// allocator seeded from the same store.
    pub fn plan(&self, action: &Action, texts: &mut TextIdAllocator) -> Vec<StorageOp> {
        match action {
            Action::AddRevision { page_id, revision } => {
                let mut ops = Vec::with_capacity(2 + revision.tags.len());
                let fields = self.revision_fields(revision, texts, &mut ops);
                ops.push(StorageOp::UpsertRevision(RevisionRow {
                    page_id: *page_id,
                    fields,
                }));
                ops.extend(revision.tags.iter().map(|tag| {
                    StorageOp::InsertTagLink(TagLink {
                        revision: revision.id,
                        tag: tag.clone(),
                    })
                }));
                ops
            }
            Action::AddArchivedRevision {
                title,
                page_id,
                revision,
            } => {
                let mut ops = Vec::with_capacity(2 + revision.tags.len());
                let fields = self.revision_fields(revision, texts, &mut ops);
                ops.push(StorageOp::UpsertArchivedRevision(ArchivedRevisionRow {
                    title: title.clone(),
                    page_id: *page_id,
                    fields,
                }));
                ops.extend(revision.tags.iter().map(|tag| {
                    StorageOp::InsertArchivedTagLink(TagLink {
                        revision: revision.id,
                        tag: tag.clone(),
                    })
                }));
                ops
            }
            Action::SetArchivedPageId { title, page_id } => {
                vec![StorageOp::SetArchivedPageId(ArchivedPageId {
                    namespace: title.namespace(),
                    db_title: title.db_title().to_string(),
                    page_id: *page_id,
                })]
            }
            // Tag links first: they reference the archived rows being moved.
            Action::RestorePage { page_id } => vec![
                StorageOp::MoveArchivedTagLinks { page_id: *page_id },
                StorageOp::MoveArchivedRevisions { page_id: *page_id },
            ],
            Action::MergeRevisions {
                source,
                destination,
                merge_point,
            } => vec![StorageOp::MergeRevisions(MergeRange {
                source: *source,
                destination: destination.clone(),
                merge_point: *merge_point,
            })],
            Action::SetDeletionBitmask { revision, bitmask } => {
                let visibility = Visibility {
                    revision: *revision,
                    bitmask: *bitmask,
                };
                vec![
                    StorageOp::SetRevisionVisibility(visibility),
                    StorageOp::SetArchivedRevisionVisibility(visibility),
                ]
            }
            Action::AddTag { revision, tag } => {
                vec![StorageOp::InsertTagLinkWhereHeld(TagLink {
                    revision: *revision,
                    tag: tag.clone(),
                })]
            }
            Action::RemoveTag { revision, tag } => {
                let link = TagLink {
                    revision: *revision,
                    tag: tag.clone(),
                };
                vec![
                    StorageOp::DeleteTagLink(link.clone()),
                    StorageOp::DeleteArchivedTagLink(link),
                ]
            }
        }
    }

    /// Plan a whole action list with one allocator.
    pub fn plan_all(&self, actions: &[Action], texts: &mut TextIdAllocator) -> Vec<StorageOp> {
        actions
            .iter()
            .flat_map(|action| self.plan(action, texts))
            .collect()
    }

    fn revision_fields(
        &self,
        revision: &Revision,
        texts: &mut TextIdAllocator,
        ops: &mut Vec<StorageOp>,
    ) -> RevisionFields {
        let text_id = match revision.text() {
            Some(text) if self.with_content => {
                let id = texts.allocate();
                ops.push(StorageOp::UpsertText(TextRow {
                    id,
                    revision: revision.id,
                    text: text.to_string(),
                    flags: TEXT_FLAGS.to_string(),
                }));
                Some(id)
            }
            _ => None,
        };

        RevisionFields {
            id: revision.id,
            text_id,
            comment: revision.comment.clone().unwrap_or_default(),
            user_id: revision.user_id.unwrap_or(0),
            user_text: revision.user.clone().unwrap_or_default(),
            timestamp: revision.timestamp,
            minor_edit: revision.minor,
            deleted: revision.deletion_bitmask(),
            len: revision.size,
            parent_id: revision.parent(),
            sha1: revision.sha1.clone(),
            content_model: revision.content_model().map(str::to_string),
            content_format: revision.content_format().map(str::to_string),
        }
    }
}
