use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::provider::{ProviderId, ResponseFormat};

/// Everything the transport layer needs to call one provider.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderCall {
    pub correlation_id: String,
    pub provider_id: ProviderId,
    pub endpoint: String,
    pub response_format: ResponseFormat,
    pub payload: Value,
    pub timeout: Duration,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvocationError {
    #[error("invocation timed out")]
    Timeout,
    #[error("{0}")]
    Transport(String),
}

/// Transport seam. Implementations own retries; the engine makes one call per
/// provider per aggregation and enforces the timeout itself as well.
#[async_trait]
pub trait ProviderInvoker: Send + Sync {
    async fn invoke(&self, call: ProviderCall) -> Result<Vec<u8>, InvocationError>;
}
