//! Testing utilities for the Rampart client.
//!
//! Mocks, test implementations (fakes) of the transport and audit sink, and
//! helpers for building clients that do not wait between retries.

pub mod implementations;
pub mod mocks;

use rampart_client::{NoopAuditSink, ResilientRpcClient, RpcTransport};
use rampart_core::{BackoffStrategy, ClientSettings, OperationDefaults, Registries, RpcConfig};
use std::sync::Arc;

/// Re-export commonly used types for convenience
pub use mockall;
pub use rampart_monitoring::init_test_tracing;

pub use implementations::{FlakyTransport, RecordingAuditSink, ScriptedTransport};
pub use mocks::{create_mock_transport, MockTransport};

/// Standard call class without backoff delays
pub fn fast_config() -> RpcConfig {
    RpcConfig::standard().with_backoff(BackoffStrategy::None)
}

/// Settings whose default call class is [`fast_config`]
pub fn fast_settings() -> ClientSettings {
    ClientSettings {
        defaults: OperationDefaults {
            default: fast_config(),
            ..OperationDefaults::default()
        },
        ..ClientSettings::default()
    }
}

/// Client over `transport` with fresh registries, [`fast_settings`] and no audit output
pub fn test_client<T: RpcTransport + 'static>(transport: T) -> ResilientRpcClient {
    test_client_with(transport, fast_settings())
}

/// Like [`test_client`] with custom settings
pub fn test_client_with<T: RpcTransport + 'static>(transport: T, settings: ClientSettings) -> ResilientRpcClient {
    let registries = Arc::new(Registries::new(settings.global_limit()));
    match ResilientRpcClient::builder()
        .transport(transport)
        .registries(registries)
        .settings(settings)
        .audit_sink(NoopAuditSink)
        .build()
    {
        Ok(client) => client,
        Err(err) => panic!("invalid test settings: {}", err),
    }
}
