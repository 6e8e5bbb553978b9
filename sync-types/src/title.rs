//! Page titles in database form.

use crate::Namespace;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A page title as the replica stores it: namespace number plus the title
/// text without namespace prefix, spaces replaced by underscores.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageTitle {
    namespace: Namespace,
    db_title: String,
}

impl PageTitle {
    /// Build from an already normalized database title.
    pub fn new(namespace: Namespace, db_title: impl Into<String>) -> Self {
        Self {
            namespace,
            db_title: db_title.into(),
        }
    }

    /// Build from the prefixed display title the API reports
    /// (`Talk:Some page` in namespace 1 becomes `Some_page`).
    pub fn from_prefixed(namespace: Namespace, title: &str) -> Self {
        let unprefixed = if namespace == Namespace::MAIN {
            title
        } else {
            title.split_once(':').map(|(_, rest)| rest).unwrap_or(title)
        };
        Self {
            namespace,
            db_title: unprefixed.trim().replace(' ', "_"),
        }
    }

    /// The namespace this title lives in.
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Title text without namespace prefix.
    pub fn db_title(&self) -> &str {
        &self.db_title
    }
}

impl fmt::Display for PageTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.db_title)
    }
}

impl fmt::Debug for PageTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageTitle({}:{})", self.namespace, self.db_title)
    }
}
