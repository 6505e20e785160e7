//! Monitoring for the Rampart client.
//!
//! Log initialization lives in [`logging`]; counters, gauges and histograms for
//! calls, attempts, rejections and circuit states live in [`metrics`].

use tracing::info;

pub mod logging;
pub mod metrics;

/// Configuration for initializing the monitoring system
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log level filter (e.g., "info,rampart_client=debug"); `RUST_LOG` wins when set
    pub log_filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logging: bool,
    /// Include file and line of each event
    pub with_source_location: bool,
    /// Environment (dev, staging, prod)
    pub environment: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "rampart".to_string(),
            log_filter: "info".to_string(),
            json_logging: false,
            with_source_location: true,
            environment: "dev".to_string(),
        }
    }
}

impl MonitoringConfig {
    /// Defaults overridden by `RAMPART_LOG_JSON` and `RAMPART_ENV` when present
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("RAMPART_LOG_JSON") {
            config.json_logging = matches!(value.as_str(), "1" | "true" | "yes");
        }
        if let Ok(environment) = std::env::var("RAMPART_ENV") {
            config.environment = environment;
        }
        config
    }
}

/// Initialize monitoring system
pub fn init(config: MonitoringConfig) -> anyhow::Result<()> {
    logging::init_logging(&config)?;
    info!(
        service_name = %config.service_name,
        environment = %config.environment,
        json = config.json_logging,
        "Monitoring initialized"
    );
    Ok(())
}

/// Shutdown the monitoring system
pub fn shutdown() {
    info!("Shutting down monitoring system");
}


pub use crate::logging::{init_logging, init_test_tracing};
pub use crate::metrics::{CallOutcome, RejectionReason, RpcMetrics};
