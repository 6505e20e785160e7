//! Error types for the Rampart remote-call layer
//!
//! Three layers of failure are modelled here:
//! - [`TransportError`]: what the injected transport reports for one attempt
//! - [`ResilienceError`]: denials raised by the protective primitives
//! - [`RpcError`]: the single outcome a caller of the client receives

use std::time::Duration;
use thiserror::Error;

/// Failure reported by the transport for a single attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The remote call did not complete in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Host name could not be resolved
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    /// Remote end refused or reset the connection
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Any other network I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Backend answered with a 5xx-class status
    #[error("Server error {status}: {message}")]
    Server {
        /// Status code returned by the backend
        status: u16,
        /// Error message
        message: String,
    },

    /// Backend throttled the request (429-class)
    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    /// Backend rejected the request (4xx-class other than 429)
    #[error("Client error {status}: {message}")]
    Client {
        /// Status code returned by the backend
        status: u16,
        /// Error message
        message: String,
    },

    /// Response payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Backend reported a domain-level failure
    #[error("Business error {code}: {message}")]
    Business {
        /// Application error code
        code: String,
        /// Error message
        message: String,
    },
}

impl TransportError {
    /// Build a transport error from an HTTP-like status code
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => TransportError::TooManyRequests(message),
            500..=599 => TransportError::Server { status, message },
            _ => TransportError::Client { status, message },
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Network failures and server overload are transient; client, decode
    /// and business errors will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout(_)
            | TransportError::Dns(_)
            | TransportError::ConnectionRefused(_)
            | TransportError::Io(_)
            | TransportError::Server { .. }
            | TransportError::TooManyRequests(_) => true,
            TransportError::Client { .. }
            | TransportError::Decode(_)
            | TransportError::Business { .. } => false,
        }
    }

    /// Status code equivalent of the error, if it has one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Server { status, .. } | TransportError::Client { status, .. } => {
                Some(*status)
            }
            TransportError::TooManyRequests(_) => Some(429),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => TransportError::Timeout(err.to_string()),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                TransportError::ConnectionRefused(err.to_string())
            }
            _ => TransportError::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}

/// Denials and misconfiguration raised by the resilience primitives
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Circuit is open; the dependency is considered unhealthy
    #[error("Circuit breaker open for {name}. Retry after {remaining_cooldown_ms}ms")]
    CircuitOpen {
        /// Operation protected by the breaker
        name: String,
        /// Time left before the breaker will admit a probe
        remaining_cooldown_ms: u64,
    },

    /// Local throttling rejected the request
    #[error("Rate limit exceeded for {name}. Retry after {wait_ms}ms")]
    RateLimited {
        /// Operation being throttled
        name: String,
        /// Time until a slot frees up
        wait_ms: u64,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Outcome of a failed call through the resilient client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Circuit open; no attempt was made
    #[error("Circuit breaker open for {name}. Retry after {remaining_cooldown_ms}ms")]
    CircuitOpen {
        /// Operation name
        name: String,
        /// Time left before the breaker will admit a probe
        remaining_cooldown_ms: u64,
    },

    /// Throttled locally; no attempt was made
    #[error("Rate limit exceeded for {name}. Retry after {wait_ms}ms")]
    RateLimited {
        /// Operation name
        name: String,
        /// Time until a slot frees up
        wait_ms: u64,
    },

    /// The transport failed and retries (if any) were exhausted or not allowed
    #[error("Call to {operation} failed after {attempts} attempt(s): {source}")]
    Transport {
        /// Operation name
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// Last transport failure
        #[source]
        source: TransportError,
    },

    /// Parameters could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Successful response did not match the expected result type
    #[error("Decode error for {operation}: {message}")]
    Decode {
        /// Operation name
        operation: String,
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for client calls
pub type RpcResult<T> = Result<T, RpcError>;

impl From<ResilienceError> for RpcError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::CircuitOpen { name, remaining_cooldown_ms } => {
                RpcError::CircuitOpen { name, remaining_cooldown_ms }
            }
            ResilienceError::RateLimited { name, wait_ms } => RpcError::RateLimited { name, wait_ms },
            ResilienceError::Configuration(msg) => RpcError::Configuration(msg),
        }
    }
}

impl RpcError {
    /// Check if the error is a circuit breaker rejection
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RpcError::CircuitOpen { .. })
    }

    /// Check if the error is a rate limit rejection
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RpcError::RateLimited { .. })
    }

    /// Check if the call was rejected before reaching the transport
    pub fn is_resilience_error(&self) -> bool {
        self.is_circuit_open() || self.is_rate_limited()
    }

    /// The underlying transport failure, if any
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            RpcError::Transport { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Number of transport attempts that were made
    pub fn attempts(&self) -> u32 {
        match self {
            RpcError::Transport { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Suggested wait before calling again, for protective rejections
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RpcError::CircuitOpen { remaining_cooldown_ms, .. } => {
                Some(Duration::from_millis(*remaining_cooldown_ms))
            }
            RpcError::RateLimited { wait_ms, .. } => Some(Duration::from_millis(*wait_ms)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_retryable_classification() {
        let retryable = vec![
            TransportError::Timeout("slow".to_string()),
            TransportError::Dns("no such host".to_string()),
            TransportError::ConnectionRefused("refused".to_string()),
            TransportError::Io("broken pipe".to_string()),
            TransportError::from_status(503, "unavailable"),
            TransportError::from_status(429, "slow down"),
        ];
        for err in retryable {
            assert!(err.is_retryable(), "{:?} should be retryable", err);
        }

        let fatal = vec![
            TransportError::from_status(400, "bad request"),
            TransportError::from_status(404, "missing"),
            TransportError::Decode("unexpected token".to_string()),
            TransportError::Business { code: "INSUFFICIENT_FUNDS".to_string(), message: "no".to_string() },
        ];
        for err in fatal {
            assert!(!err.is_retryable(), "{:?} should not be retryable", err);
        }
    }

    #[test]
    fn test_from_status() {
        assert_eq!(TransportError::from_status(429, "x").status_code(), Some(429));
        assert!(matches!(TransportError::from_status(502, "x"), TransportError::Server { status: 502, .. }));
        assert!(matches!(TransportError::from_status(401, "x"), TransportError::Client { status: 401, .. }));
        assert_eq!(TransportError::Timeout("x".to_string()).status_code(), None);
    }

    #[test]
    fn test_from_io_error() {
        let err: TransportError = IoError::new(ErrorKind::TimedOut, "deadline").into();
        assert!(matches!(err, TransportError::Timeout(_)));

        let err: TransportError = IoError::new(ErrorKind::ConnectionRefused, "nope").into();
        assert!(matches!(err, TransportError::ConnectionRefused(_)));

        let err: TransportError = IoError::new(ErrorKind::Other, "weird").into();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: TransportError = json_error.into();
        match err {
            TransportError::Decode(msg) => assert!(msg.contains("expected value")),
            other => panic!("Expected Decode variant, got {:?}", other),
        }
    }

    #[test]
    fn test_rpc_error_helpers() {
        let open: RpcError = ResilienceError::CircuitOpen {
            name: "getBalance".to_string(),
            remaining_cooldown_ms: 1500,
        }
        .into();
        assert!(open.is_circuit_open());
        assert!(open.is_resilience_error());
        assert_eq!(open.retry_after(), Some(Duration::from_millis(1500)));
        assert_eq!(open.attempts(), 0);

        let failed = RpcError::Transport {
            operation: "getBalance".to_string(),
            attempts: 3,
            source: TransportError::Timeout("slow".to_string()),
        };
        assert!(!failed.is_resilience_error());
        assert_eq!(failed.attempts(), 3);
        assert_eq!(failed.retry_after(), None);
        assert_eq!(
            failed.to_string(),
            "Call to getBalance failed after 3 attempt(s): Request timed out: slow"
        );
    }
}
