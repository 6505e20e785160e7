use pretty_assertions::assert_eq;
use rampart_client::{BackoffStrategy, CircuitState, ClientSettings, RpcError, TransportError};
use rampart_test_utils::{fast_config, fast_settings, test_client_with, FlakyTransport, MockTransport, ScriptedTransport};
use serde_json::{json, Value};
use std::time::Duration;

fn settings_with_retries(max_retries: u32) -> ClientSettings {
    let mut settings = fast_settings();
    settings.defaults.default = fast_config().with_max_retries(max_retries);
    settings
}

#[tokio::test]
async fn test_two_server_errors_then_success_takes_three_attempts() {
    let transport = ScriptedTransport::new();
    transport.script(
        "accounts.getBalance",
        vec![
            Err(TransportError::from_status(503, "unavailable")),
            Err(TransportError::from_status(503, "unavailable")),
            Ok(json!({ "balance": 120 })),
        ],
    );
    let client = test_client_with(transport.clone(), settings_with_retries(2));

    let result: Value = client.call("accounts.getBalance", json!({ "account": "42" })).await.unwrap();

    assert_eq!(result, json!({ "balance": 120 }));
    assert_eq!(transport.calls("accounts.getBalance"), 3);
}

#[tokio::test]
async fn test_failures_are_recorded_even_when_retry_succeeds() {
    let transport = FlakyTransport::new(2, TransportError::Timeout("slow".to_string()), json!("ok"));
    let client = test_client_with(transport.clone(), settings_with_retries(3));

    let result: String = client.call("inventory.reserve", json!({})).await.unwrap();
    assert_eq!(result, "ok");

    let health = client.health_status();
    let metrics = &health["inventory.reserve"];
    assert_eq!(metrics.total_failures, 2);
    assert_eq!(metrics.total_successes, 1);
    assert_eq!(metrics.consecutive_failures, 0);
    assert_eq!(metrics.state, CircuitState::Closed);
}

#[tokio::test]
async fn test_exhausted_retries_report_last_failure() {
    let transport = FlakyTransport::failing(TransportError::ConnectionRefused("10.0.0.1:443".to_string()));
    let client = test_client_with(transport.clone(), settings_with_retries(2));

    let err = client.call_raw("accounts.getBalance", json!({})).await.unwrap_err();

    assert_eq!(transport.attempts(), 3);
    assert_eq!(err.attempts(), 3);
    match err {
        RpcError::Transport { operation, attempts, source } => {
            assert_eq!(operation, "accounts.getBalance");
            assert_eq!(attempts, 3);
            assert_eq!(source, TransportError::ConnectionRefused("10.0.0.1:443".to_string()));
        }
        other => panic!("expected transport failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failures_within_budget_succeed() {
    for failures in 0..=3 {
        let transport = FlakyTransport::new(failures, TransportError::from_status(502, "bad gateway"), json!(1));
        let client = test_client_with(transport.clone(), settings_with_retries(3));

        let result = client.call_raw("op", Value::Null).await;
        assert!(result.is_ok(), "{} failures should fit in 3 retries", failures);
        assert_eq!(transport.attempts(), failures + 1);
    }
}

#[tokio::test]
async fn test_non_retryable_error_is_attempted_once() {
    let mut mock = MockTransport::new();
    mock.expect_invoke().times(1).returning(|_, _| {
        Err(TransportError::Business {
            code: "INSUFFICIENT_FUNDS".to_string(),
            message: "balance too low".to_string(),
        })
    });
    let client = test_client_with(mock, settings_with_retries(5));

    let err = client.call_raw("payments.transfer", json!({ "amount": 1_000 })).await.unwrap_err();

    assert_eq!(err.attempts(), 1);
    assert!(!err.is_resilience_error());
    assert!(matches!(err.transport_error(), Some(TransportError::Business { .. })));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let transport = FlakyTransport::failing(TransportError::from_status(404, "no such account"));
    let client = test_client_with(transport.clone(), settings_with_retries(3));

    let err = client.call_raw("accounts.get", json!({})).await.unwrap_err();
    assert_eq!(transport.attempts(), 1);
    assert_eq!(err.transport_error().and_then(|e| e.status_code()), Some(404));
}

#[tokio::test]
async fn test_throttling_is_retried() {
    let transport = FlakyTransport::new(1, TransportError::from_status(429, "slow down"), json!("done"));
    let client = test_client_with(transport.clone(), settings_with_retries(1));

    let result: String = client.call("reports.export", json!({})).await.unwrap();
    assert_eq!(result, "done");
    assert_eq!(transport.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_between_attempts() {
    let transport = FlakyTransport::new(2, TransportError::Timeout("slow".to_string()), json!(true));
    let mut settings = fast_settings();
    settings.defaults.default = fast_config()
        .with_max_retries(2)
        .with_backoff(BackoffStrategy::exponential(100, 2.0, 1_000));
    let client = test_client_with(transport, settings);

    let started = tokio::time::Instant::now();
    let result: bool = client.call("op", json!({})).await.unwrap();

    assert!(result);
    // 100ms before the first retry, 200ms before the second
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[tokio::test]
async fn test_no_retry_config_attempts_once() {
    let transport = FlakyTransport::failing(TransportError::Timeout("slow".to_string()));
    let client = test_client_with(transport.clone(), settings_with_retries(0));

    assert!(client.call_raw("op", Value::Null).await.is_err());
    assert_eq!(transport.attempts(), 1);
}
