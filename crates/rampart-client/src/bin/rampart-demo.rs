use anyhow::Context;
use rampart_client::{
    transport_fn, BackoffStrategy, ClientSettings, ResilientRpcClient, RpcConfig, TransportError,
};
use rampart_monitoring::{init, shutdown, MonitoringConfig};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Simulated backend: each operation family fails at its own rate
async fn flaky_backend(operation: String, params: Value) -> Result<Value, TransportError> {
    tokio::time::sleep(Duration::from_millis(5)).await;
    let roll: f64 = rand::random();

    match operation.as_str() {
        op if op.starts_with("payments.") && roll < 0.6 => {
            Err(TransportError::Timeout(format!("{} timed out", op)))
        }
        op if op.starts_with("accounts.") && roll < 0.2 => {
            Err(TransportError::from_status(503, "service unavailable"))
        }
        "accounts.close" => Err(TransportError::Business {
            code: "ACCOUNT_HAS_BALANCE".to_string(),
            message: "account still holds funds".to_string(),
        }),
        _ => Ok(json!({ "operation": operation, "params": params, "ok": true })),
    }
}

fn demo_settings() -> anyhow::Result<ClientSettings> {
    if let Ok(path) = std::env::var("RAMPART_CONFIG") {
        let path = PathBuf::from(path);
        return ClientSettings::load(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()));
    }

    let fast_backoff = BackoffStrategy::exponential(20, 2.0, 200);
    let mut settings = ClientSettings::default();
    settings.defaults = settings
        .defaults
        .with_prefix("payments.", RpcConfig::critical().with_backoff(fast_backoff.clone()).with_circuit(3, 500, 1))
        .with_prefix("accounts.", RpcConfig::query().with_backoff(fast_backoff))
        .with_operation("reports.export", RpcConfig::no_retry().with_rate_limit(3, 60_000));
    settings.apply_env_overrides();
    settings.validate()?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let monitoring_config = MonitoringConfig {
        service_name: "rampart-demo".to_string(),
        log_filter: std::env::var("LOG_FILTER").unwrap_or_else(|_| "info,rampart_client=debug".to_string()),
        ..MonitoringConfig::from_env()
    };
    init(monitoring_config).context("Failed to initialize monitoring")?;

    let rounds: usize = std::env::var("RAMPART_DEMO_ROUNDS")
        .ok()
        .and_then(|r| r.parse().ok())
        .unwrap_or(10);

    let client = ResilientRpcClient::builder()
        .transport(transport_fn(flaky_backend))
        .settings(demo_settings()?)
        .build()
        .context("Failed to build client")?;

    for round in 0..rounds {
        let calls = vec![
            ("accounts.getBalance".to_string(), json!({ "account": round })),
            ("payments.transfer".to_string(), json!({ "amount": 10 * round })),
            ("reports.export".to_string(), json!({ "format": "csv" })),
            ("accounts.close".to_string(), json!({ "account": round })),
        ];

        let results: Vec<Result<Value, _>> = client.batch(calls).await;
        for result in results {
            match result {
                Ok(_) => {}
                Err(err) if err.is_resilience_error() => {
                    info!(round, error = %err, retry_after = ?err.retry_after(), "Call rejected")
                }
                Err(err) => warn!(round, attempts = err.attempts(), error = %err, "Call failed"),
            }
        }
    }

    let report = json!({
        "health": client.health_status(),
        "rate_limiters": client.rate_limiter_status(),
        "open_circuits": client.open_circuits(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    shutdown();
    Ok(())
}
