//! Resilient client against real HTTP dependencies served by wiremock.

use std::time::Duration;

use resilience::{
    BackoffPolicy, BreakerConfig, CallConfig, CallFailure, CallOutcome, CircuitState,
    DependencyConfig, DependencyRegistry, HttpTransport, Request, ResilientClient,
};
use serde::Deserialize;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize, PartialEq)]
struct ProductView {
    id: i64,
    stock: u32,
}

fn dependency(base_url: String, max_attempts: u32, threshold: u32) -> DependencyConfig {
    DependencyConfig {
        base_url,
        call: CallConfig {
            timeout: Duration::from_millis(300),
            max_attempts,
            backoff: BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(20)),
        },
        breaker: BreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_secs(60),
            half_open_probe_duration: Duration::from_secs(10),
        },
    }
}

fn client_for(name: &str, config: DependencyConfig) -> ResilientClient<HttpTransport> {
    ResilientClient::new(
        HttpTransport::new().unwrap(),
        DependencyRegistry::new().with(name, config),
    )
}

/// An address nothing is listening on.
async fn closed_port() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/api/users")
}

#[tokio::test]
async fn success_body_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/products/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 7, "name": "Widget", "price": 1250, "stock": 12
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for("products", dependency(format!("{}/api/products", server.uri()), 3, 5));
    let outcome: CallOutcome<ProductView> = client
        .send("products", &Request::get("/7"))
        .await
        .decode("products");

    assert_eq!(
        outcome,
        CallOutcome::Success {
            payload: ProductView { id: 7, stock: 12 },
            status: 200
        }
    );
}

#[tokio::test]
async fn not_found_reaches_caller_on_first_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/99"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": "User not found"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for("users", dependency(format!("{}/api/users", server.uri()), 3, 5));
    let report = client
        .call_with_report("users", &Request::get("/99"), Duration::from_millis(300), 3)
        .await;

    assert_eq!(report.attempts, 1);
    assert!(report.outcome.failure().unwrap().is_not_found());
    assert!(matches!(report.outcome, CallOutcome::TerminalFailure(_)));
    assert_eq!(client.registry().breaker("users").unwrap().failure_count(), 0);
}

#[tokio::test]
async fn server_errors_are_terminal_but_count_toward_the_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/1"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for("users", dependency(format!("{}/api/users", server.uri()), 3, 5));
    let outcome = client.send("users", &Request::get("/1")).await;

    assert_eq!(outcome.status(), Some(503));
    assert!(matches!(outcome, CallOutcome::TerminalFailure(_)));
    assert_eq!(client.registry().breaker("users").unwrap().failure_count(), 1);
}

#[tokio::test]
async fn connection_refused_is_retried_up_to_max_attempts() {
    let client = client_for("users", dependency(closed_port().await, 3, 10));

    let report = client
        .call_with_report("users", &Request::get("/1"), Duration::from_millis(300), 3)
        .await;

    assert_eq!(report.attempts, 3);
    assert!(matches!(
        report.outcome,
        CallOutcome::RetryableFailure(CallFailure::Connect { .. })
    ));
    assert_eq!(client.registry().breaker("users").unwrap().failure_count(), 3);
}

#[tokio::test]
async fn slow_responses_time_out_and_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/1"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for("users", dependency(format!("{}/api/users", server.uri()), 2, 5));
    let outcome = client
        .call("users", &Request::get("/1"), Duration::from_millis(100), 2)
        .await;

    assert!(matches!(
        outcome,
        CallOutcome::RetryableFailure(CallFailure::Timeout { .. })
    ));
}

#[tokio::test]
async fn open_breaker_stops_calls_reaching_the_dependency() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for("users", dependency(format!("{}/api/users", server.uri()), 1, 2));
    let request = Request::get("/1");

    client.send("users", &request).await;
    client.send("users", &request).await;
    let breaker = client.registry().breaker("users").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    let outcome = client.send("users", &request).await;
    assert_eq!(
        outcome,
        CallOutcome::TerminalFailure(CallFailure::BreakerOpen {
            target: "users".to_string()
        })
    );
    assert_eq!(outcome.label(), "breaker_open");
}

#[tokio::test]
async fn breakers_are_isolated_per_dependency() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/products/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1, "stock": 3})))
        .mount(&server)
        .await;

    let registry = DependencyRegistry::new()
        .with("users", dependency(closed_port().await, 1, 1))
        .with("products", dependency(format!("{}/api/products", server.uri()), 1, 1));
    let client = ResilientClient::new(HttpTransport::new().unwrap(), registry);

    client.send("users", &Request::get("/1")).await;
    assert_eq!(client.registry().breaker("users").unwrap().state(), CircuitState::Open);

    let outcome = client.send("products", &Request::get("/1")).await;
    assert!(outcome.is_success());
    assert_eq!(
        client.registry().breaker("products").unwrap().state(),
        CircuitState::Closed
    );
}
