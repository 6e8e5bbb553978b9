//! Log entries and their typed interpretation.
//!
//! `list=logevents` returns every kind of log entry. The mirror only cares
//! about the ones that change revision storage; [`LogEntry::classify`] turns
//! those into [`LogEvent`]s and ignores the rest.

use crate::time::{api_timestamp, parse_timestamp};
use crate::{Namespace, PageId, PageTitle, RevisionId, TypesError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw log entry (`formatversion=2`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log ID.
    #[serde(default)]
    pub logid: Option<u64>,
    /// Log type (`delete`, `merge`, `tag`, ...).
    #[serde(rename = "type")]
    pub log_type: String,
    /// Action within the type (`delete`, `restore`, `update`, ...).
    pub action: String,
    /// Namespace of the target page.
    #[serde(default)]
    pub ns: Namespace,
    /// Prefixed title of the target page; absent when hidden.
    #[serde(default)]
    pub title: Option<String>,
    /// Page ID the entry was logged against (0 when unknown).
    #[serde(default)]
    pub logpage: u64,
    /// Type-specific parameters.
    #[serde(default)]
    pub params: Value,
    /// When the action happened.
    #[serde(with = "api_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// A log-derived change to page structure or revision visibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralEvent {
    /// A page was deleted; its revisions moved to the archive.
    PageDeleted {
        /// Title of the deleted page.
        title: PageTitle,
        /// When it happened.
        at: DateTime<Utc>,
    },
    /// A page was undeleted.
    PageRestored {
        /// Title of the restored page.
        title: PageTitle,
        /// ID the page has after restoration.
        page_id: PageId,
        /// When it happened.
        at: DateTime<Utc>,
    },
    /// Visibility of individual revisions changed.
    RevisionsHidden {
        /// Affected revisions.
        revisions: Vec<RevisionId>,
        /// New deletion bitmask.
        bitmask: u32,
        /// When it happened.
        at: DateTime<Utc>,
    },
    /// Revisions of one page were merged into another.
    PagesMerged {
        /// Page the revisions were taken from.
        source: PageId,
        /// Page the revisions were given to.
        destination: PageTitle,
        /// Revisions at or before this time were moved.
        merge_point: DateTime<Utc>,
        /// When it happened.
        at: DateTime<Utc>,
    },
    /// A page was renamed.
    PageMoved {
        /// The moved page.
        page_id: PageId,
        /// Its new title.
        target: PageTitle,
        /// When it happened.
        at: DateTime<Utc>,
    },
    /// Revisions were imported into a page.
    PageImported {
        /// The page that received revisions.
        page_id: PageId,
        /// When it happened.
        at: DateTime<Utc>,
    },
}

/// A change to the tags of one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagChange {
    /// The revision whose tags changed.
    pub revision: RevisionId,
    /// Tags added.
    pub added: Vec<String>,
    /// Tags removed.
    pub removed: Vec<String>,
    /// When it happened.
    pub at: DateTime<Utc>,
}

/// A log entry the mirror acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// Page or revision structure changed.
    Structural(StructuralEvent),
    /// Revision tags changed.
    Tag(TagChange),
}

impl LogEntry {
    /// Interpret this entry.
    ///
    /// Returns `Ok(None)` for entries that do not affect revision storage.
    pub fn classify(&self) -> Result<Option<LogEvent>, TypesError> {
        let at = self.timestamp;
        let event = match (self.log_type.as_str(), self.action.as_str()) {
            ("delete", "delete" | "delete_redir") => {
                LogEvent::Structural(StructuralEvent::PageDeleted {
                    title: self.page_title()?,
                    at,
                })
            }
            ("delete", "restore") => LogEvent::Structural(StructuralEvent::PageRestored {
                title: self.page_title()?,
                page_id: self.logged_page()?,
                at,
            }),
            ("delete", "revision") => {
                if self.params.get("type").and_then(Value::as_str) != Some("revision") {
                    return Ok(None);
                }
                let revisions = self
                    .params
                    .get("ids")
                    .and_then(Value::as_array)
                    .ok_or_else(|| self.malformed("missing ids"))?
                    .iter()
                    .map(|v| id_from_value(v).map(RevisionId::new))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| self.malformed("non-numeric revision id"))?;
                let bitmask = self
                    .params
                    .pointer("/new/bitmask")
                    .and_then(id_from_value)
                    .ok_or_else(|| self.malformed("missing new bitmask"))?;
                LogEvent::Structural(StructuralEvent::RevisionsHidden {
                    revisions,
                    bitmask: u32::try_from(bitmask)
                        .map_err(|_| self.malformed("bitmask out of range"))?,
                    at,
                })
            }
            ("merge", "merge") => {
                let dest_ns = self
                    .params
                    .get("dest_ns")
                    .and_then(Value::as_i64)
                    .and_then(|ns| i32::try_from(ns).ok())
                    .ok_or_else(|| self.malformed("missing dest_ns"))?;
                let dest_title = self
                    .params
                    .get("dest_title")
                    .and_then(Value::as_str)
                    .ok_or_else(|| self.malformed("missing dest_title"))?;
                let merge_point = self
                    .params
                    .get("mergepoint")
                    .and_then(Value::as_str)
                    .ok_or_else(|| self.malformed("missing mergepoint"))
                    .and_then(|text| {
                        parse_timestamp(text).map_err(|_| self.malformed("invalid mergepoint"))
                    })?;
                LogEvent::Structural(StructuralEvent::PagesMerged {
                    source: self.logged_page()?,
                    destination: PageTitle::from_prefixed(Namespace::new(dest_ns), dest_title),
                    merge_point,
                    at,
                })
            }
            ("move", "move" | "move_redir") => {
                let target_ns = self
                    .params
                    .get("target_ns")
                    .and_then(Value::as_i64)
                    .and_then(|ns| i32::try_from(ns).ok())
                    .unwrap_or(0);
                let target_title = self
                    .params
                    .get("target_title")
                    .and_then(Value::as_str)
                    .ok_or_else(|| self.malformed("missing target_title"))?;
                LogEvent::Structural(StructuralEvent::PageMoved {
                    page_id: self.logged_page()?,
                    target: PageTitle::from_prefixed(Namespace::new(target_ns), target_title),
                    at,
                })
            }
            ("import", "upload" | "interwiki") => {
                LogEvent::Structural(StructuralEvent::PageImported {
                    page_id: self.logged_page()?,
                    at,
                })
            }
            ("tag", "update") => {
                // Tags on log entries carry no revid.
                let Some(revision) = self.params.get("revid").and_then(id_from_value) else {
                    return Ok(None);
                };
                LogEvent::Tag(TagChange {
                    revision: RevisionId::new(revision),
                    added: string_list(self.params.get("tagsAdded")),
                    removed: string_list(self.params.get("tagsRemoved")),
                    at,
                })
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    fn page_title(&self) -> Result<PageTitle, TypesError> {
        self.title
            .as_deref()
            .map(|title| PageTitle::from_prefixed(self.ns, title))
            .ok_or_else(|| self.malformed("missing title"))
    }

    fn logged_page(&self) -> Result<PageId, TypesError> {
        PageId::non_zero(self.logpage).ok_or_else(|| self.malformed("missing logpage"))
    }

    fn malformed(&self, reason: &str) -> TypesError {
        TypesError::MalformedLogEntry {
            kind: format!("{}/{}", self.log_type, self.action),
            logid: self.logid,
            reason: reason.to_string(),
        }
    }
}

/// Numeric IDs inside log params arrive as numbers or numeric strings.
fn id_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
