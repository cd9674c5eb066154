use std::time::Duration;

use serde_json::json;
use unrest_sparql::{EventSource, RetryPolicy, SparqlClient, SparqlClientConfig, UpstreamError};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn results_body() -> serde_json::Value {
    json!({
        "head": { "vars": ["item", "itemLabel", "coord", "time", "countryLabel", "type"] },
        "results": { "bindings": [{
            "item": { "type": "uri", "value": "http://www.wikidata.org/entity/Q1" },
            "itemLabel": { "type": "literal", "value": "March" },
            "coord": { "type": "literal", "value": "Point(-3.7 40.4)" },
            "time": { "type": "literal", "value": "2025-09-01T00:00:00Z" },
            "countryLabel": { "type": "literal", "value": "Spain" },
            "type": { "type": "uri", "value": "http://www.wikidata.org/entity/Q273120" }
        }] }
    })
}

fn client_for(server: &MockServer) -> SparqlClient {
    SparqlClient::new(SparqlClientConfig {
        endpoint: format!("{}/sparql", server.uri()),
        user_agent: "unrest-map-tests/0.0 (test@example.org)".to_string(),
        connect_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            backoff: vec![Duration::from_millis(10), Duration::from_millis(20)],
            jitter: 0.2,
            attempt_timeout: Duration::from_secs(2),
        },
    })
    .expect("client")
}

#[tokio::test]
async fn sends_query_with_required_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sparql"))
        .and(header("accept", "application/sparql-results+json"))
        .and(header("user-agent", "unrest-map-tests/0.0 (test@example.org)"))
        .and(body_string_contains("query=SELECT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results_body()))
        .expect(1)
        .mount(&server)
        .await;

    let rows = client_for(&server).query_recent_point_events(7).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].country.as_deref(), Some("Spain"));
}

#[tokio::test]
async fn rate_limited_responses_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results_body()))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let rows = client_for(&server).query_recent_range_events(7).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn server_errors_exhaust_the_attempt_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = client_for(&server).query_recent_point_events(7).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Status(503)));
}

#[tokio::test]
async fn malformed_body_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>overloaded</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).query_recent_point_events(7).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Malformed(_)));
}

#[tokio::test]
async fn slow_endpoint_times_out_per_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(results_body())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let mut config = client_for(&server).config().clone();
    config.retry.attempt_timeout = Duration::from_millis(50);
    config.retry.backoff = vec![Duration::from_millis(5)];
    let client = SparqlClient::new(config).unwrap();

    let err = client.query_recent_point_events(7).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Timeout(_)));
}
