//! Conflict resolution.
//!
//! Turns a drained [`ChangeBatch`] into the canonical, minimal list of
//! [`Action`]s for the window. Pure and deterministic: the same batch always
//! yields the same list.
//!
//! Rules:
//! - Per title, only the latest of delete/restore counts. Pages ending the
//!   window restored produce `SetArchivedPageId` + `RestorePage`; pages
//!   ending deleted produce nothing (live rows are archived elsewhere).
//! - Tag changes collapse to their net effect per revision. Revisions created
//!   within the window are skipped; they were fetched with current tags.
//! - A merge whose source page was also moved in the window is refused.
//! - Deletion bitmask changes are kept; the last one per revision wins.

use crate::action::Action;
use crate::batch::ChangeBatch;
use std::collections::{BTreeMap, BTreeSet};
use sync_types::{PageId, PageTitle, RevisionId, StructuralEvent, TagChange};
use thiserror::Error;

/// Reasons a window cannot be resolved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Merging revisions away from a page that was also moved is ambiguous.
    #[error("page {page_id} was merged and moved in the same window")]
    MergeAfterMove {
        /// The page in question.
        page_id: PageId,
    },

    /// One tag event both added and removed the same tag.
    #[error("tag change on revision {revision} adds and removes {tag}")]
    ContradictoryTagChange {
        /// The revision.
        revision: RevisionId,
        /// The tag.
        tag: String,
    },
}

/// Result of resolving one window.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Canonical actions in apply order.
    pub actions: Vec<Action>,
    /// Pages whose last event in the window was a deletion.
    pub ended_deleted: BTreeSet<PageTitle>,
}

/// Where each touched page ended the window.
///
/// The two sets are disjoint: recording a page in one evicts it from the
/// other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageFates {
    deleted: BTreeSet<PageTitle>,
    restored: BTreeMap<PageTitle, PageId>,
}

impl PageFates {
    /// Record a deletion.
    pub fn deleted(&mut self, title: PageTitle) {
        self.restored.remove(&title);
        self.deleted.insert(title);
    }

    /// Record an undeletion under the given page ID.
    pub fn restored(&mut self, title: PageTitle, page_id: PageId) {
        self.deleted.remove(&title);
        self.restored.insert(title, page_id);
    }

    /// Pages that ended deleted.
    pub fn ended_deleted(&self) -> &BTreeSet<PageTitle> {
        &self.deleted
    }

    /// Pages that ended restored, with their IDs.
    pub fn ended_restored(&self) -> &BTreeMap<PageTitle, PageId> {
        &self.restored
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetTag {
    Added,
    Removed,
}

/// Net tag effect per revision.
///
/// An add cancels a pending remove of the same tag and vice versa, so only
/// the tags whose state actually changed across the window survive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagLedger {
    net: BTreeMap<RevisionId, BTreeMap<String, NetTag>>,
}

impl TagLedger {
    /// Fold one tag change into the ledger.
    pub fn record(&mut self, change: &TagChange) -> Result<(), ResolveError> {
        if let Some(tag) = change.added.iter().find(|t| change.removed.contains(t)) {
            return Err(ResolveError::ContradictoryTagChange {
                revision: change.revision,
                tag: tag.clone(),
            });
        }
        let tags = self.net.entry(change.revision).or_default();
        for tag in &change.added {
            flip(tags, tag, NetTag::Added);
        }
        for tag in &change.removed {
            flip(tags, tag, NetTag::Removed);
        }
        if tags.is_empty() {
            self.net.remove(&change.revision);
        }
        Ok(())
    }

    /// Net additions, ordered by revision then tag.
    pub fn added(&self) -> impl Iterator<Item = (RevisionId, &str)> {
        self.with_state(NetTag::Added)
    }

    /// Net removals, ordered by revision then tag.
    pub fn removed(&self) -> impl Iterator<Item = (RevisionId, &str)> {
        self.with_state(NetTag::Removed)
    }

    fn with_state(&self, wanted: NetTag) -> impl Iterator<Item = (RevisionId, &str)> {
        self.net.iter().flat_map(move |(rev, tags)| {
            tags.iter()
                .filter(move |(_, state)| **state == wanted)
                .map(move |(tag, _)| (*rev, tag.as_str()))
        })
    }
}

fn flip(tags: &mut BTreeMap<String, NetTag>, tag: &str, to: NetTag) {
    match tags.get(tag) {
        Some(pending) if *pending != to => {
            tags.remove(tag);
        }
        _ => {
            tags.insert(tag.to_string(), to);
        }
    }
}

/// Resolve an incremental window into canonical actions.
pub fn resolve(batch: ChangeBatch) -> Result<Resolution, ResolveError> {
    let new_revisions = batch.new_revisions();

    let moved: BTreeSet<PageId> = batch
        .structural
        .iter()
        .filter_map(|event| match event {
            StructuralEvent::PageMoved { page_id, .. } => Some(*page_id),
            _ => None,
        })
        .collect();

    let mut fates = PageFates::default();
    let mut merges = Vec::new();
    let mut bitmasks = BTreeMap::new();

    for event in &batch.structural {
        match event {
            StructuralEvent::PageDeleted { title, .. } => fates.deleted(title.clone()),
            StructuralEvent::PageRestored { title, page_id, .. } => {
                fates.restored(title.clone(), *page_id)
            }
            StructuralEvent::RevisionsHidden {
                revisions, bitmask, ..
            } => {
                for rev in revisions {
                    bitmasks.insert(*rev, *bitmask);
                }
            }
            StructuralEvent::PagesMerged {
                source,
                destination,
                merge_point,
                ..
            } => {
                if moved.contains(source) {
                    return Err(ResolveError::MergeAfterMove { page_id: *source });
                }
                merges.push(Action::MergeRevisions {
                    source: *source,
                    destination: destination.clone(),
                    merge_point: *merge_point,
                });
            }
            // Moves only feed the merge check; imports are fetched by the reader.
            StructuralEvent::PageMoved { .. } | StructuralEvent::PageImported { .. } => {}
        }
    }

    let mut ledger = TagLedger::default();
    for change in batch
        .tags
        .iter()
        .filter(|change| !new_revisions.contains(&change.revision))
    {
        ledger.record(change)?;
    }

    let mut actions = Vec::new();

    for page in batch.live {
        let page_id = page.page_id;
        actions.extend(
            page.revisions
                .into_iter()
                .map(|revision| Action::AddRevision { page_id, revision }),
        );
    }

    for (title, page_id) in fates.ended_restored() {
        actions.push(Action::SetArchivedPageId {
            title: title.clone(),
            page_id: *page_id,
        });
        actions.push(Action::RestorePage { page_id: *page_id });
    }

    for page in batch.archived {
        let title = page.title;
        let page_id = page.page_id;
        actions.extend(
            page.revisions
                .into_iter()
                .map(|revision| Action::AddArchivedRevision {
                    title: title.clone(),
                    page_id,
                    revision,
                }),
        );
    }

    actions.extend(merges);

    actions.extend(
        bitmasks
            .into_iter()
            .map(|(revision, bitmask)| Action::SetDeletionBitmask { revision, bitmask }),
    );

    actions.extend(ledger.added().map(|(revision, tag)| Action::AddTag {
        revision,
        tag: tag.to_string(),
    }));
    actions.extend(ledger.removed().map(|(revision, tag)| Action::RemoveTag {
        revision,
        tag: tag.to_string(),
    }));

    Ok(Resolution {
        actions,
        ended_deleted: fates.deleted,
    })
}

/// Actions for the first sync: every revision, nothing to reconcile.
pub fn bootstrap_actions(batch: ChangeBatch) -> Vec<Action> {
    let mut actions = Vec::with_capacity(batch.revision_count());
    for page in batch.live {
        let page_id = page.page_id;
        actions.extend(
            page.revisions
                .into_iter()
                .map(|revision| Action::AddRevision { page_id, revision }),
        );
    }
    for page in batch.archived {
        let title = page.title;
        let page_id = page.page_id;
        actions.extend(
            page.revisions
                .into_iter()
                .map(|revision| Action::AddArchivedRevision {
                    title: title.clone(),
                    page_id,
                    revision,
                }),
        );
    }
    actions
}
