//! Mock transport for call-count expectations.

use async_trait::async_trait;
use mockall::mock;
use rampart_client::RpcTransport;
use rampart_core::TransportError;
use serde_json::Value;

mock! {
    pub Transport {}

    #[async_trait]
    impl RpcTransport for Transport {
        async fn invoke(&self, operation: &str, params: Value) -> Result<Value, TransportError>;
    }
}

/// Creates a new mock transport that echoes its parameters.
pub fn create_mock_transport() -> MockTransport {
    let mut mock = MockTransport::new();
    mock.expect_invoke().returning(|_, params| Ok(params));
    mock
}
