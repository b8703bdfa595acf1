use thiserror::Error;

use crate::domain::client::ClientId;
use crate::domain::product::ProductId;
use crate::domain::provider::ProviderId;
use crate::domain::quote::ProviderFailure;
use crate::mapping::format::FormatError;
use crate::mapping::normalize::NormalizeError;
use crate::mapping::request::RequestBuildError;
use crate::mapping::transform::TransformError;

/// Conditions under which a request cannot proceed at all for a client/product.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no active mapping for product `{product_id}` and provider `{provider_id}`")]
    NoActiveMapping { product_id: ProductId, provider_id: ProviderId },
    #[error(
        "multiple active mappings for product `{product_id}` and provider `{provider_id}` (versions {versions:?})"
    )]
    MultipleActiveMappings { product_id: ProductId, provider_id: ProviderId, versions: Vec<u32> },
    #[error("no eligible providers for product `{product_id}` ({} rejected)", .failures.len())]
    NoEligibleProviders { product_id: ProductId, failures: Vec<ProviderFailure> },
    #[error("unknown provider `{provider_id}`")]
    UnknownProvider { provider_id: ProviderId },
    #[error("unknown client `{client_id}`")]
    UnknownClient { client_id: ClientId },
    #[error("client `{client_id}` is inactive")]
    ClientInactive { client_id: ClientId },
    #[error("unknown product `{product_id}`")]
    UnknownProduct { product_id: ProductId },
    #[error("product `{product_id}` is inactive")]
    ProductInactive { product_id: ProductId },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoActiveMapping { .. } => "no_active_mapping",
            Self::MultipleActiveMappings { .. } => "multiple_active_mappings",
            Self::NoEligibleProviders { .. } => "no_eligible_providers",
            Self::UnknownProvider { .. } => "unknown_provider",
            Self::UnknownClient { .. } => "unknown_client",
            Self::ClientInactive { .. } => "client_inactive",
            Self::UnknownProduct { .. } => "unknown_product",
            Self::ProductInactive { .. } => "product_inactive",
        }
    }

    /// Data-integrity violations that must never be resolved silently.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::MultipleActiveMappings { .. })
    }
}

/// Failure scoped to a single provider. Recorded as a [`ProviderFailure`] and
/// never propagated past the aggregator.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ProviderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Request(#[from] RequestBuildError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("provider timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("provider transport failure: {detail}")]
    Transport { detail: String },
    #[error("provider task aborted: {detail}")]
    Aborted { detail: String },
}

impl ProviderError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(error) => error.code(),
            Self::Request(RequestBuildError::MissingCanonicalField { .. }) => {
                "missing_canonical_field"
            }
            Self::Request(RequestBuildError::Path(_)) => "request_path_conflict",
            Self::Normalize(NormalizeError::Format(FormatError::MalformedResponse { .. })) => {
                "malformed_response"
            }
            Self::Normalize(NormalizeError::Format(FormatError::PreParse { .. })) => {
                "pre_parse_failed"
            }
            Self::Normalize(NormalizeError::MissingResponseField { .. }) => "missing_response_field",
            Self::Normalize(NormalizeError::Transform {
                source: TransformError::UnknownTransform { .. },
                ..
            }) => "unknown_transform",
            Self::Normalize(NormalizeError::Transform {
                source: TransformError::TransformFailed { .. },
                ..
            }) => "transform_failed",
            Self::Normalize(NormalizeError::InvalidFieldValue { .. }) => "invalid_field_value",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::Aborted { .. } => "aborted",
        }
    }
}

/// Top-level failure of a quote or aggregation call.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("aggregation cancelled by caller")]
    Cancelled,
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(error) => error.code(),
            Self::Cancelled => "cancelled",
        }
    }
}
