//! HTTP client for the SPARQL endpoint.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use unrest_core::RawRow;

use crate::error::UpstreamError;
use crate::query::{TimeWindow, point_events_query, range_events_query};
use crate::retry::{RetryPolicy, run_with_retries};

pub const DEFAULT_ENDPOINT: &str = "https://query.wikidata.org/sparql";
pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// Source of raw event rows.
///
/// Implemented by [`SparqlClient`]; the request orchestrator depends only on
/// this trait.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn query_recent_point_events(&self, days: u32) -> Result<Vec<RawRow>, UpstreamError>;

    async fn query_recent_range_events(&self, days: u32) -> Result<Vec<RawRow>, UpstreamError>;
}

/// Configuration for [`SparqlClient`].
#[derive(Debug, Clone)]
pub struct SparqlClientConfig {
    pub endpoint: String,
    /// Sent as `User-Agent`; the public endpoint throttles anonymous agents.
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SparqlClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: format!(
                "unrest-map/{} (https://github.com/unrest-map/server-rs)",
                env!("CARGO_PKG_VERSION")
            ),
            connect_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    #[allow(dead_code)]
    head: SparqlHead,
    results: SparqlBindings,
}

#[derive(Debug, Deserialize)]
struct SparqlHead {
    #[allow(dead_code)]
    vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SparqlBindings {
    bindings: Vec<HashMap<String, BindingValue>>,
}

#[derive(Debug, Deserialize)]
struct BindingValue {
    value: String,
}

fn take(binding: &mut HashMap<String, BindingValue>, var: &str) -> Option<String> {
    binding.remove(var).map(|b| b.value)
}

/// Decodes a SPARQL JSON results document into rows, in document order.
pub fn parse_results(body: &[u8]) -> Result<Vec<RawRow>, UpstreamError> {
    let results: SparqlResults =
        serde_json::from_slice(body).map_err(|e| UpstreamError::Malformed(e.to_string()))?;

    Ok(results
        .results
        .bindings
        .into_iter()
        .map(|mut b| RawRow {
            item: take(&mut b, "item"),
            label: take(&mut b, "itemLabel"),
            coord: take(&mut b, "coord"),
            time: take(&mut b, "time"),
            start: take(&mut b, "start"),
            end: take(&mut b, "end"),
            country: take(&mut b, "countryLabel"),
            link: take(&mut b, "article"),
            type_uri: take(&mut b, "type"),
        })
        .collect())
}

/// Retrying client for the event queries.
#[derive(Clone)]
pub struct SparqlClient {
    http: reqwest::Client,
    config: SparqlClientConfig,
}

impl SparqlClient {
    pub fn new(config: SparqlClientConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &SparqlClientConfig {
        &self.config
    }

    /// One POST against the endpoint, no retries.
    pub async fn fetch_once(&self, query: &str) -> Result<Vec<RawRow>, UpstreamError> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .header(ACCEPT, SPARQL_RESULTS_JSON)
            .header(USER_AGENT, &self.config.user_agent)
            .form(&[("query", query)])
            .send()
            .await
            .map_err(UpstreamError::network)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::RateLimited);
        }
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(UpstreamError::network)?;
        let rows = parse_results(&body)?;
        debug!(rows = rows.len(), bytes = body.len(), "upstream query returned");
        Ok(rows)
    }

    /// Runs `query` under the configured retry policy.
    pub async fn run_query(&self, query: &str) -> Result<Vec<RawRow>, UpstreamError> {
        run_with_retries(&self.config.retry, || self.fetch_once(query)).await
    }
}

#[async_trait]
impl EventSource for SparqlClient {
    #[instrument(skip(self))]
    async fn query_recent_point_events(&self, days: u32) -> Result<Vec<RawRow>, UpstreamError> {
        let window = TimeWindow::ending_at(OffsetDateTime::now_utc(), days);
        self.run_query(&point_events_query(&window)).await
    }

    #[instrument(skip(self))]
    async fn query_recent_range_events(&self, days: u32) -> Result<Vec<RawRow>, UpstreamError> {
        let window = TimeWindow::ending_at(OffsetDateTime::now_utc(), days);
        self.run_query(&range_events_query(&window)).await
    }
}
