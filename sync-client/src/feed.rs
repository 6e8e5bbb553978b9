//! Change-feed reader.
//!
//! Drains the source into a [`ChangeBatch`]. Incremental windows read
//! `list=allrevisions` and `list=logevents` concurrently, then look up the
//! archived revisions of pages deleted in the window and the revisions of
//! pages imported in it.

use crate::source::{call, list, pages, ApiParams, Source, SourceError};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use sync_core::{ChangeBatch, LivePage};
use sync_types::time::format_timestamp;
use sync_types::{ApiPage, LogEntry, LogEvent, PageId, PageRevisions, StructuralEvent};

const BASE_PROPS: &str = "ids|flags|timestamp|user|userid|size|sha1|comment|contentmodel|tags";

/// Titles or page IDs per lookup request when not configured.
pub const DEFAULT_IDS_PER_QUERY: usize = 50;

/// What the reader asks the source for.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Request revision content.
    pub with_content: bool,
    /// Titles or page IDs per lookup request.
    pub ids_per_query: usize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            with_content: false,
            ids_per_query: DEFAULT_IDS_PER_QUERY,
        }
    }
}

/// Reads change feeds from a [`Source`].
pub struct ChangeFeed<'a, S: Source + ?Sized> {
    source: &'a S,
    options: FeedOptions,
}

impl<'a, S: Source + ?Sized> ChangeFeed<'a, S> {
    /// Create a reader over `source`.
    pub fn new(source: &'a S, options: FeedOptions) -> Self {
        Self { source, options }
    }

    fn revision_props(&self) -> String {
        if self.options.with_content {
            format!("{BASE_PROPS}|content")
        } else {
            BASE_PROPS.to_string()
        }
    }

    /// Add `{prefix}prop`, `{prefix}slots` and `{prefix}limit`.
    fn with_revision_props(&self, params: ApiParams, prefix: &str) -> ApiParams {
        params
            .set(&format!("{prefix}prop"), self.revision_props())
            .set(&format!("{prefix}slots"), "main")
            .set(&format!("{prefix}limit"), "max")
    }

    /// Every live and archived revision (first sync).
    pub async fn read_full(&self) -> Result<ChangeBatch, SourceError> {
        let live = self.with_revision_props(
            ApiParams::query()
                .set("list", "allrevisions")
                .set("arvdir", "newer"),
            "arv",
        );
        let archived = self.with_revision_props(
            ApiParams::query()
                .set("list", "alldeletedrevisions")
                .set("adrdir", "newer"),
            "adr",
        );

        let (live, archived) = tokio::try_join!(
            list(self.source, live).collect::<ApiPage>("allrevisions"),
            list(self.source, archived).collect::<ApiPage>("alldeletedrevisions"),
        )?;

        let batch = ChangeBatch {
            live: live_pages(live)?,
            archived: archived.into_iter().map(ApiPage::into_archived).collect(),
            structural: Vec::new(),
            tags: Vec::new(),
        };
        tracing::info!(
            "read {} revisions from {} live and {} archived pages",
            batch.revision_count(),
            batch.live.len(),
            batch.archived.len()
        );
        Ok(batch)
    }

    /// Everything that changed at or after `since`.
    pub async fn read_since(&self, since: DateTime<Utc>) -> Result<ChangeBatch, SourceError> {
        let start = format_timestamp(&since);
        let live = self.with_revision_props(
            ApiParams::query()
                .set("list", "allrevisions")
                .set("arvdir", "newer")
                .set("arvstart", start.as_str()),
            "arv",
        );
        let log = ApiParams::query()
            .set("list", "logevents")
            .set("leprop", "ids|title|type|details|timestamp")
            .set("ledir", "newer")
            .set("lestart", start.as_str())
            .set("lelimit", "max");

        let (live, entries) = tokio::try_join!(
            list(self.source, live).collect::<ApiPage>("allrevisions"),
            list(self.source, log).collect::<LogEntry>("logevents"),
        )?;

        let mut batch = ChangeBatch {
            live: live_pages(live)?,
            ..ChangeBatch::default()
        };

        let mut deleted_titles = Vec::new();
        let mut seen_titles = BTreeSet::new();
        let mut imported = Vec::new();
        for entry in &entries {
            let Some(event) = entry.classify()? else {
                continue;
            };
            match event {
                LogEvent::Structural(event) => {
                    match &event {
                        StructuralEvent::PageDeleted { .. } => {
                            if let Some(title) = &entry.title {
                                if seen_titles.insert(title.clone()) {
                                    deleted_titles.push(title.clone());
                                }
                            }
                        }
                        StructuralEvent::PageImported { page_id, .. } => {
                            if !imported.contains(page_id) {
                                imported.push(*page_id);
                            }
                        }
                        _ => {}
                    }
                    batch.structural.push(event);
                }
                LogEvent::Tag(change) => batch.tags.push(change),
            }
        }
        tracing::debug!(
            "{} log entries: {} structural, {} tag changes",
            entries.len(),
            batch.structural.len(),
            batch.tags.len()
        );

        batch
            .archived
            .extend(self.deleted_revisions(&deleted_titles, &start).await?);

        let (live, archived) = self.imported_revisions(&imported).await?;
        batch.live.extend(live);
        batch.archived.extend(archived);

        tracing::info!(
            "window since {}: {} new revisions, {} structural events, {} tag changes",
            start,
            batch.revision_count(),
            batch.structural.len(),
            batch.tags.len()
        );
        Ok(batch)
    }

    /// Archived revisions of deleted pages created at or after `start`.
    async fn deleted_revisions(
        &self,
        titles: &[String],
        start: &str,
    ) -> Result<Vec<PageRevisions>, SourceError> {
        let mut archived = Vec::new();
        for chunk in titles.chunks(self.options.ids_per_query.max(1)) {
            let params = self.with_revision_props(
                ApiParams::query()
                    .set("prop", "deletedrevisions")
                    .set("titles", chunk.join("|"))
                    .set("drvstart", start)
                    .set("drvdir", "newer"),
                "drv",
            );
            let response = call(self.source, &params).await?;
            for page in pages::<ApiPage>(response)? {
                let (_, deleted) = page.split();
                if !deleted.revisions.is_empty() {
                    archived.push(deleted);
                }
            }
        }
        Ok(archived)
    }

    /// All revisions of the imported pages, split into live and archived.
    async fn imported_revisions(
        &self,
        page_ids: &[PageId],
    ) -> Result<(Vec<LivePage>, Vec<PageRevisions>), SourceError> {
        let mut live = Vec::new();
        let mut archived = Vec::new();
        for chunk in page_ids.chunks(self.options.ids_per_query.max(1)) {
            let ids = chunk
                .iter()
                .map(PageId::to_string)
                .collect::<Vec<_>>()
                .join("|");
            let params = self.with_revision_props(
                self.with_revision_props(
                    ApiParams::query()
                        .set("prop", "revisions|deletedrevisions")
                        .set("pageids", ids)
                        .set("rvdir", "newer")
                        .set("drvdir", "newer"),
                    "rv",
                ),
                "drv",
            );
            let response = call(self.source, &params).await?;
            for page in pages::<ApiPage>(response)? {
                let (current, deleted) = page.split();
                if !current.revisions.is_empty() {
                    let page_id = current.page_id.ok_or_else(|| {
                        SourceError::Malformed(format!("imported page {} has no id", current.title))
                    })?;
                    live.push(LivePage {
                        page_id,
                        revisions: current.revisions,
                    });
                }
                if !deleted.revisions.is_empty() {
                    archived.push(deleted);
                }
            }
        }
        tracing::debug!(
            "{} imported pages: {} live, {} archived groups",
            page_ids.len(),
            live.len(),
            archived.len()
        );
        Ok((live, archived))
    }
}

fn live_pages(pages: Vec<ApiPage>) -> Result<Vec<LivePage>, SourceError> {
    pages
        .into_iter()
        .map(|page| {
            let page_id = page.page_id().ok_or_else(|| {
                SourceError::Malformed(format!("live revisions of {} without page id", page.title))
            })?;
            Ok(LivePage {
                page_id,
                revisions: page.revisions,
            })
        })
        .collect()
}
