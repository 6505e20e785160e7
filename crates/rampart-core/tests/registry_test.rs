use rampart_core::{CircuitBreakerConfig, Registries, RateLimiterConfig, RpcConfig};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_or_create_returns_singleton() {
    let registries = Arc::new(Registries::default());
    let config = CircuitBreakerConfig::default();

    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let registries = registries.clone();
            let config = config.clone();
            tokio::spawn(async move { registries.circuit_breakers.get_or_create("payments.transfer", &config) })
        })
        .collect();

    let breakers = futures::future::join_all(tasks).await;
    let first = breakers[0].as_ref().unwrap().clone();
    for breaker in breakers {
        assert!(Arc::ptr_eq(&first, &breaker.unwrap()));
    }
    assert_eq!(registries.circuit_breakers.len(), 1);
}

#[test]
fn test_registries_are_isolated_per_name() {
    let registries = Registries::new(RateLimiterConfig { max_requests: 100, window_ms: 60_000 });
    let config = RpcConfig::standard().with_circuit(1, 60_000, 1);

    registries
        .circuit_breakers
        .get_or_create("failing", &config.circuit_breaker_config())
        .record_failure();
    let healthy = registries
        .circuit_breakers
        .get_or_create("healthy", &config.circuit_breaker_config());

    assert!(healthy.can_proceed());
    assert_eq!(registries.circuit_breakers.open_circuits(), vec!["failing".to_string()]);

    registries.reset_all();
    assert!(registries.circuit_breakers.open_circuits().is_empty());

    registries.clear();
    assert!(registries.circuit_breakers.is_empty());
    assert!(registries.rate_limiters.is_empty());
}

#[test]
fn test_shared_registries_are_process_wide() {
    assert!(Arc::ptr_eq(&Registries::shared(), &Registries::shared()));
}
