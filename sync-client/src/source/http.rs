//! HTTP source backed by reqwest.

use super::{ApiParams, Source, SourceError};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Reads a MediaWiki `api.php` endpoint over HTTP(S).
///
/// Every request asks for `format=json` and `formatversion=2`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    api_url: String,
}

impl HttpSource {
    /// Create a source for the given endpoint.
    ///
    /// The timeout applies to each request as a whole.
    pub fn new(api_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
        })
    }

    /// The endpoint this source reads.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn get(&self, params: &ApiParams) -> Result<Value, SourceError> {
        let mut query: Vec<(&str, &str)> = params.iter().collect();
        query.push(("format", "json"));
        query.push(("formatversion", "2"));

        tracing::debug!("GET {} {:?}", self.api_url, params);
        let response = self
            .client
            .get(&self.api_url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Value>().await?)
    }
}
