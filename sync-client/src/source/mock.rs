//! Mock source for testing.
//!
//! Allows routing canned responses by request parameters and capturing
//! requests for verification.

use super::{ApiParams, Source, SourceError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Mock source for testing.
///
/// Responses are queued per matcher (a set of `key=value` pairs the request
/// must contain) and handed out in order. Requests without a matching
/// response get an empty `query` result, so tests only script what matters.
#[derive(Debug, Default)]
pub struct MockSource {
    inner: Arc<Mutex<MockSourceInner>>,
}

#[derive(Debug, Default)]
struct MockSourceInner {
    routes: Vec<Route>,
    requests: Vec<ApiParams>,
    fail_next: Option<String>,
    latency: Option<Duration>,
}

#[derive(Debug)]
struct Route {
    matcher: Vec<(String, String)>,
    responses: VecDeque<Value>,
}

impl MockSource {
    /// Create a new mock source.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockSourceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a response for requests containing every pair in `matcher`.
    pub fn respond(&self, matcher: &[(&str, &str)], response: Value) {
        let matcher: Vec<(String, String)> = matcher
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut inner = self.lock();
        match inner.routes.iter_mut().find(|r| r.matcher == matcher) {
            Some(route) => route.responses.push_back(response),
            None => inner.routes.push(Route {
                matcher,
                responses: VecDeque::from([response]),
            }),
        }
    }

    /// Get all requests that were made.
    pub fn requests(&self) -> Vec<ApiParams> {
        self.lock().requests.clone()
    }

    /// Get the requests containing every pair in `matcher`.
    pub fn requests_matching(&self, matcher: &[(&str, &str)]) -> Vec<ApiParams> {
        let matcher: Vec<(String, String)> = matcher
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.lock()
            .requests
            .iter()
            .filter(|r| r.matches(&matcher))
            .cloned()
            .collect()
    }

    /// Cause the next request to fail with the given error.
    pub fn fail_next(&self, error: &str) {
        self.lock().fail_next = Some(error.to_string());
    }

    /// Delay every response.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Clear all state (routes, requests, failures).
    pub fn reset(&self) {
        *self.lock() = MockSourceInner::default();
    }
}

impl Clone for MockSource {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Source for MockSource {
    async fn get(&self, params: &ApiParams) -> Result<Value, SourceError> {
        let (latency, result) = {
            let mut inner = self.lock();
            inner.requests.push(params.clone());

            // Check for forced failure
            let result = match inner.fail_next.take() {
                Some(error) => Err(SourceError::Unavailable(error)),
                None => Ok(inner
                    .routes
                    .iter_mut()
                    .find(|r| !r.responses.is_empty() && params.matches(&r.matcher))
                    .and_then(|r| r.responses.pop_front())
                    .unwrap_or_else(|| json!({"batchcomplete": true, "query": {}}))),
            };
            (inner.latency, result)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        result
    }
}
