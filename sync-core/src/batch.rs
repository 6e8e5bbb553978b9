//! The fully drained output of one feed read.

use std::collections::BTreeSet;
use sync_types::{PageId, PageRevisions, Revision, RevisionId, StructuralEvent, TagChange};

/// Live revisions of one existing page.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePage {
    /// The page.
    pub page_id: PageId,
    /// Its revisions, in source order.
    pub revisions: Vec<Revision>,
}

/// Everything the feeds produced for one window.
///
/// Events within each sequence are in source order; nothing is known about
/// ordering across sequences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    /// Revisions added to live pages.
    pub live: Vec<LivePage>,
    /// Revisions that are already archived.
    pub archived: Vec<PageRevisions>,
    /// Page and visibility changes from the log.
    pub structural: Vec<StructuralEvent>,
    /// Tag changes from the log.
    pub tags: Vec<TagChange>,
}

impl ChangeBatch {
    /// IDs of every revision created within the window, live or archived.
    pub fn new_revisions(&self) -> BTreeSet<RevisionId> {
        self.live
            .iter()
            .flat_map(|page| page.revisions.iter())
            .chain(self.archived.iter().flat_map(|page| page.revisions.iter()))
            .map(|rev| rev.id)
            .collect()
    }

    /// Total number of revisions in the live and archived sequences.
    pub fn revision_count(&self) -> usize {
        self.live.iter().map(|p| p.revisions.len()).sum::<usize>()
            + self.archived.iter().map(|p| p.revisions.len()).sum::<usize>()
    }
}
