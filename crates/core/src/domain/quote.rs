use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::client::ClientId;
use crate::domain::product::ProductId;
use crate::domain::provider::ProviderId;
use crate::errors::ProviderError;

pub const QUOTE_ID_FIELD: &str = "quoteId";
pub const PREMIUM_FIELD: &str = "premium";
pub const COVERAGE_AMOUNT_FIELD: &str = "coverageAmount";
pub const TERM_FIELD: &str = "term";

/// Canonical response fields a mapping must provide and a response must contain.
pub const REQUIRED_RESPONSE_FIELDS: [&str; 2] = [QUOTE_ID_FIELD, PREMIUM_FIELD];

/// Canonical request: field name -> value, independent of any provider.
pub type CanonicalFields = Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub client_id: ClientId,
    pub product_id: ProductId,
    #[serde(default)]
    pub fields: CanonicalFields,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl QuoteRequest {
    pub fn new(client_id: ClientId, product_id: ProductId, fields: CanonicalFields) -> Self {
        Self { client_id, product_id, fields, correlation_id: None }
    }
}

/// One provider's offer, normalized into the canonical schema.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub provider_id: ProviderId,
    pub quote_id: String,
    pub premium: Decimal,
    pub coverage_amount: Option<Decimal>,
    /// Term in months.
    pub term: Option<u32>,
    /// 1-based position of the provider after preference ordering.
    pub source_rank: usize,
    pub response_time_ms: u64,
    /// Mapped response fields beyond the canonical four.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

/// Recorded in place of a quote when a single provider's path fails.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailure {
    pub provider_id: ProviderId,
    pub source_rank: usize,
    pub code: &'static str,
    pub reason: String,
    #[serde(skip)]
    pub error: ProviderError,
}

impl ProviderFailure {
    pub fn new(provider_id: ProviderId, source_rank: usize, error: ProviderError) -> Self {
        Self { provider_id, source_rank, code: error.code(), reason: error.to_string(), error }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOutcome {
    pub correlation_id: String,
    pub product_id: ProductId,
    pub catalog_fingerprint: String,
    pub quotes: Vec<Quote>,
    pub failures: Vec<ProviderFailure>,
}

impl AggregateOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Quotes ordered by ascending premium; ties keep source rank order.
    pub fn ranked_by_premium(&self) -> Vec<&Quote> {
        let mut ranked: Vec<&Quote> = self.quotes.iter().collect();
        ranked.sort_by(|left, right| {
            left.premium.cmp(&right.premium).then(left.source_rank.cmp(&right.source_rank))
        });
        ranked
    }

    pub fn cheapest(&self) -> Option<&Quote> {
        self.ranked_by_premium().into_iter().next()
    }
}
