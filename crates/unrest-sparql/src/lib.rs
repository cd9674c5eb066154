//! Query client for recent unrest events.
//!
//! - [`query`] builds the point-event and range-event SPARQL text.
//! - [`client::SparqlClient`] posts it with the required headers.
//! - [`retry::run_with_retries`] bounds every attempt and retries transient
//!   failures on a fixed, jittered schedule.

pub mod client;
pub mod error;
pub mod query;
pub mod retry;

pub use client::{EventSource, SparqlClient, SparqlClientConfig, parse_results};
pub use error::UpstreamError;
pub use query::{TimeWindow, point_events_query, range_events_query};
pub use retry::{RetryPolicy, run_with_retries};
