//! Remote source abstraction.
//!
//! A [`Source`] performs one request against the MediaWiki action API and
//! returns the decoded JSON body. Everything above it is shared:
//!
//! - [`call`] issues a single request and refuses responses that want to
//!   continue (the caller has no way to resume them)
//! - [`Pager`] follows `continue` blocks lazily, one page per request
//!
//! # Example
//!
//! ```ignore
//! let source = MockSource::new();
//! let mut pager = Pager::new(&source, ApiParams::query().set("list", "logevents"));
//! while let Some(query) = pager.next_page().await? {
//!     // ...
//! }
//! ```

mod http;
mod mock;

pub use http::HttpSource;
pub use mock::MockSource;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use sync_types::TypesError;
use thiserror::Error;

/// Source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP request failed (unreachable, timeout, bad status, bad body).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Source could not be reached.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The API answered with an error object.
    #[error("API error {code}: {info}")]
    Api {
        /// Error code.
        code: String,
        /// Human-readable description.
        info: String,
    },

    /// The response did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A log entry could not be interpreted.
    #[error("invalid log entry: {0}")]
    InvalidEntry(#[from] TypesError),

    /// The response asked to be continued where that is not supported.
    #[error("unsupported continuation parameter {parameter}")]
    UnsupportedContinuation {
        /// The continuation parameter the source sent.
        parameter: String,
    },
}

/// Request parameters, kept sorted for stable logs and matching.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiParams(BTreeMap<String, String>);

impl ApiParams {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters for an `action=query` request.
    pub fn query() -> Self {
        Self::new().set("action", "query")
    }

    /// Builder-style insert.
    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a parameter.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Value of a parameter.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// All parameters, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether every `(key, value)` pair is present.
    pub fn matches(&self, pairs: &[(String, String)]) -> bool {
        pairs.iter().all(|(k, v)| self.get(k) == Some(v.as_str()))
    }

    fn merge_continue(&mut self, block: &Map<String, Value>) -> Result<(), SourceError> {
        for (key, value) in block {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(SourceError::Malformed(format!(
                        "continuation {key} has unexpected value {other}"
                    )))
                }
            };
            self.insert(key, text);
        }
        Ok(())
    }
}

impl fmt::Debug for ApiParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

/// Source trait for reading the remote API.
///
/// Implementations handle the transport (HTTP, mock). They return the raw
/// body; API-level errors are detected by [`call`] and [`Pager`].
#[async_trait]
pub trait Source: Send + Sync {
    /// Perform one request.
    async fn get(&self, params: &ApiParams) -> Result<Value, SourceError>;
}

/// Turn `{"error": ...}` bodies into errors and log warnings.
fn checked(response: Value) -> Result<Value, SourceError> {
    if let Some(error) = response.get("error") {
        let field = |name: &str| {
            error
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        return Err(SourceError::Api {
            code: field("code"),
            info: field("info"),
        });
    }
    if let Some(warnings) = response.get("warnings") {
        tracing::warn!("API warnings: {}", warnings);
    }
    if !response.is_object() {
        return Err(SourceError::Malformed("response is not an object".into()));
    }
    Ok(response)
}

/// Issue a single request that must not continue.
///
/// Any `continue` block is reported as [`SourceError::UnsupportedContinuation`]
/// naming the module-specific parameter (e.g. `drvcontinue`).
pub async fn call<S: Source + ?Sized>(source: &S, params: &ApiParams) -> Result<Value, SourceError> {
    let response = checked(source.get(params).await?)?;
    if let Some(block) = response.get("continue").and_then(Value::as_object) {
        let parameter = block
            .keys()
            .find(|key| key.as_str() != "continue")
            .cloned()
            .unwrap_or_else(|| "continue".to_string());
        return Err(SourceError::UnsupportedContinuation { parameter });
    }
    Ok(response)
}

/// Walk a continued query page by page.
pub fn list<S: Source + ?Sized>(source: &S, params: ApiParams) -> Pager<'_, S> {
    Pager::new(source, params)
}

/// Lazy, restartable walk over a continued query.
pub struct Pager<'a, S: Source + ?Sized> {
    source: &'a S,
    base: ApiParams,
    next: Option<ApiParams>,
    requests: usize,
}

impl<'a, S: Source + ?Sized> Pager<'a, S> {
    /// Start a walk; nothing is requested until [`Pager::next_page`].
    pub fn new(source: &'a S, params: ApiParams) -> Self {
        Self {
            source,
            next: Some(params.clone()),
            base: params,
            requests: 0,
        }
    }

    /// Fetch the next page and return its `query` object.
    ///
    /// Returns `None` once the source stops sending `continue`.
    pub async fn next_page(&mut self) -> Result<Option<Value>, SourceError> {
        let Some(params) = self.next.take() else {
            return Ok(None);
        };
        let mut response = checked(self.source.get(&params).await?)?;
        self.requests += 1;

        if let Some(block) = response.get("continue").and_then(Value::as_object) {
            let mut next = self.base.clone();
            next.merge_continue(block)?;
            self.next = Some(next);
        }

        Ok(Some(
            response
                .get_mut("query")
                .map(Value::take)
                .unwrap_or_else(|| Value::Object(Map::new())),
        ))
    }

    /// Start over from the first page.
    pub fn restart(&mut self) {
        self.next = Some(self.base.clone());
    }

    /// Requests issued so far.
    pub fn requests(&self) -> usize {
        self.requests
    }

    /// Drain every page, collecting the items of the list named `key`.
    pub async fn collect<T: DeserializeOwned>(mut self, key: &str) -> Result<Vec<T>, SourceError> {
        let mut items = Vec::new();
        while let Some(mut query) = self.next_page().await? {
            let Some(list) = query.get_mut(key).map(Value::take) else {
                continue;
            };
            let Value::Array(entries) = list else {
                return Err(SourceError::Malformed(format!("{key} is not a list")));
            };
            for entry in entries {
                items.push(
                    serde_json::from_value(entry)
                        .map_err(|e| SourceError::Malformed(format!("{key} entry: {e}")))?,
                );
            }
        }
        tracing::debug!("collected {} {} in {} requests", items.len(), key, self.requests);
        Ok(items)
    }
}

/// Decode the `query.pages` list of a single response.
pub fn pages<T: DeserializeOwned>(mut response: Value) -> Result<Vec<T>, SourceError> {
    let Some(pages) = response.pointer_mut("/query/pages").map(Value::take) else {
        return Ok(Vec::new());
    };
    serde_json::from_value(pages).map_err(|e| SourceError::Malformed(format!("pages: {e}")))
}
