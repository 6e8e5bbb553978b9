//! Revision records as the source reports them (`formatversion=2`).

use crate::time::api_timestamp;
use crate::{Namespace, PageId, PageTitle, RevisionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Revision text is hidden.
pub const DELETED_TEXT: u32 = 1;
/// Edit summary is hidden.
pub const DELETED_COMMENT: u32 = 2;
/// Author is hidden.
pub const DELETED_USER: u32 = 4;
/// Hidden from administrators too.
pub const DELETED_RESTRICTED: u32 = 8;

/// One immutable version of a page plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Source revision ID.
    #[serde(rename = "revid")]
    pub id: RevisionId,
    /// Parent revision; the source sends 0 for the first revision.
    #[serde(rename = "parentid", default)]
    pub parent_id: u64,
    /// Minor edit flag.
    #[serde(default)]
    pub minor: bool,
    /// Author name, absent when hidden.
    #[serde(default)]
    pub user: Option<String>,
    /// Author ID, absent when hidden (0 for anonymous edits).
    #[serde(rename = "userid", default)]
    pub user_id: Option<u64>,
    /// When the revision was saved.
    #[serde(with = "api_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Content length in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    /// Content hash, absent when hidden.
    #[serde(default)]
    pub sha1: Option<String>,
    /// Edit summary, absent when hidden.
    #[serde(default)]
    pub comment: Option<String>,
    /// Content model (legacy single-slot output).
    #[serde(rename = "contentmodel", default)]
    pub content_model: Option<String>,
    /// Content format (legacy single-slot output).
    #[serde(rename = "contentformat", default)]
    pub content_format: Option<String>,
    /// Content text (legacy single-slot output).
    #[serde(default)]
    pub content: Option<String>,
    /// Per-slot output when slots were requested.
    #[serde(default)]
    pub slots: BTreeMap<String, Slot>,
    /// Change tags currently applied.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Text is hidden.
    #[serde(rename = "texthidden", default)]
    pub text_hidden: bool,
    /// Comment is hidden.
    #[serde(rename = "commenthidden", default)]
    pub comment_hidden: bool,
    /// Author is hidden.
    #[serde(rename = "userhidden", default)]
    pub user_hidden: bool,
    /// Hidden from administrators too.
    #[serde(default)]
    pub suppressed: bool,
}

/// Content of one revision slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    /// Content model of the slot.
    #[serde(rename = "contentmodel", default)]
    pub content_model: Option<String>,
    /// Content format of the slot.
    #[serde(rename = "contentformat", default)]
    pub content_format: Option<String>,
    /// Slot text.
    #[serde(default)]
    pub content: Option<String>,
}

impl Revision {
    fn main_slot(&self) -> Option<&Slot> {
        self.slots.get("main")
    }

    /// Parent revision, `None` for the first revision of a page.
    pub fn parent(&self) -> Option<RevisionId> {
        (self.parent_id != 0).then(|| RevisionId::new(self.parent_id))
    }

    /// Content model, from the main slot when slots were requested.
    pub fn content_model(&self) -> Option<&str> {
        self.main_slot()
            .and_then(|slot| slot.content_model.as_deref())
            .or(self.content_model.as_deref())
    }

    /// Content format, from the main slot when slots were requested.
    pub fn content_format(&self) -> Option<&str> {
        self.main_slot()
            .and_then(|slot| slot.content_format.as_deref())
            .or(self.content_format.as_deref())
    }

    /// Content text, if it was fetched and is visible.
    pub fn text(&self) -> Option<&str> {
        self.main_slot()
            .and_then(|slot| slot.content.as_deref())
            .or(self.content.as_deref())
    }

    /// Deletion bitmask derived from the visibility flags (0 = visible).
    pub fn deletion_bitmask(&self) -> u32 {
        let mut bits = 0;
        if self.text_hidden {
            bits |= DELETED_TEXT;
        }
        if self.comment_hidden {
            bits |= DELETED_COMMENT;
        }
        if self.user_hidden {
            bits |= DELETED_USER;
        }
        if self.suppressed {
            bits |= DELETED_RESTRICTED;
        }
        bits
    }
}

/// A page entry of a `query` response.
///
/// `prop=revisions|deletedrevisions` fills both lists; the `all*revisions`
/// lists only fill `revisions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiPage {
    /// Page ID; 0 or absent for pages that no longer exist.
    #[serde(rename = "pageid", default)]
    pub page_id: u64,
    /// Namespace number.
    #[serde(default)]
    pub ns: Namespace,
    /// Prefixed display title.
    pub title: String,
    /// Set when the page does not currently exist.
    #[serde(default)]
    pub missing: bool,
    /// Live (or, for `alldeletedrevisions`, archived) revisions.
    #[serde(default)]
    pub revisions: Vec<Revision>,
    /// Archived revisions from `prop=deletedrevisions`.
    #[serde(rename = "deletedrevisions", default)]
    pub deleted_revisions: Vec<Revision>,
}

impl ApiPage {
    /// Page ID, if the source knows one.
    pub fn page_id(&self) -> Option<PageId> {
        PageId::non_zero(self.page_id)
    }

    /// Database title of this page.
    pub fn title(&self) -> PageTitle {
        PageTitle::from_prefixed(self.ns, &self.title)
    }

    /// Split into the live and archived revision groups.
    ///
    /// Only the live group carries the page ID. The source reports the ID of
    /// whatever page holds the title now (or 0), never the page the archived
    /// revisions belonged to, so the archived group leaves it unknown until a
    /// restore supplies it.
    pub fn split(self) -> (PageRevisions, PageRevisions) {
        let page_id = self.page_id();
        let title = self.title();
        (
            PageRevisions {
                page_id,
                title: title.clone(),
                revisions: self.revisions,
            },
            PageRevisions {
                page_id: None,
                title,
                revisions: self.deleted_revisions,
            },
        )
    }

    /// Treat `revisions` as archived revisions (`list=alldeletedrevisions`).
    ///
    /// The page ID is left unknown, as in [`ApiPage::split`].
    pub fn into_archived(self) -> PageRevisions {
        PageRevisions {
            page_id: None,
            title: self.title(),
            revisions: self.revisions,
        }
    }
}

/// Revisions of one page, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRevisions {
    /// Page the revisions belong to; always `None` for archived groups.
    pub page_id: Option<PageId>,
    /// Title of that page.
    pub title: PageTitle,
    /// The revisions.
    pub revisions: Vec<Revision>,
}
