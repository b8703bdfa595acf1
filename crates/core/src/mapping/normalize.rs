//! Raw provider response into one canonical quote.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

use crate::domain::provider::{ProviderId, ResponseFormat};
use crate::domain::quote::{
    Quote, COVERAGE_AMOUNT_FIELD, PREMIUM_FIELD, QUOTE_ID_FIELD, REQUIRED_RESPONSE_FIELDS, TERM_FIELD,
};
use crate::mapping::catalog::Mapping;
use crate::mapping::format::{self, FormatError};
use crate::mapping::path::{self, kind_of};
use crate::mapping::transform::{TransformError, TransformRegistry};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("response field `{field}` not found at `{path}`")]
    MissingResponseField { field: String, path: String },
    #[error("response field `{field}`: {source}")]
    Transform { field: String, source: TransformError },
    #[error("response field `{field}` has an invalid value: {detail}")]
    InvalidFieldValue { field: String, detail: String },
}

/// Canonical quote fields before the aggregator stamps provider and rank.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedQuote {
    pub quote_id: String,
    pub premium: Decimal,
    pub coverage_amount: Option<Decimal>,
    pub term: Option<u32>,
    pub attributes: BTreeMap<String, Value>,
}

impl NormalizedQuote {
    pub fn into_quote(self, provider_id: ProviderId, source_rank: usize, response_time_ms: u64) -> Quote {
        Quote {
            provider_id,
            quote_id: self.quote_id,
            premium: self.premium,
            coverage_amount: self.coverage_amount,
            term: self.term,
            source_rank,
            response_time_ms,
            attributes: self.attributes,
        }
    }
}

/// Parses `raw` as `format`, extracts every mapped response field and applies
/// configured transforms. A null value is treated as absent.
pub fn normalize(
    raw: &[u8],
    format: ResponseFormat,
    mapping: &Mapping,
    transforms: &TransformRegistry,
) -> Result<NormalizedQuote, NormalizeError> {
    let tree = format::parse(raw, format)?;

    let mut extracted = BTreeMap::new();
    for rule in &mapping.response {
        let Some(value) = path::get(&tree, &rule.path).filter(|value| !value.is_null()) else {
            if REQUIRED_RESPONSE_FIELDS.contains(&rule.field.as_str()) {
                return Err(NormalizeError::MissingResponseField {
                    field: rule.field.clone(),
                    path: rule.path.to_string(),
                });
            }
            continue;
        };

        let value = match rule.transform.as_deref() {
            Some(name) => transforms
                .apply(name, value)
                .map_err(|source| NormalizeError::Transform { field: rule.field.clone(), source })?,
            None => value.clone(),
        };
        extracted.insert(rule.field.clone(), value);
    }

    let quote_id = quote_id(take_required(&mut extracted, QUOTE_ID_FIELD, mapping)?)?;
    let premium = decimal(PREMIUM_FIELD, take_required(&mut extracted, PREMIUM_FIELD, mapping)?)?;
    if premium.is_sign_negative() && !premium.is_zero() {
        return Err(invalid(PREMIUM_FIELD, format!("premium must not be negative, got {premium}")));
    }
    let coverage_amount = extracted
        .remove(COVERAGE_AMOUNT_FIELD)
        .map(|value| decimal(COVERAGE_AMOUNT_FIELD, value))
        .transpose()?;
    let term = extracted.remove(TERM_FIELD).map(term_months).transpose()?;

    Ok(NormalizedQuote { quote_id, premium, coverage_amount, term, attributes: extracted })
}

fn take_required(
    extracted: &mut BTreeMap<String, Value>,
    field: &str,
    mapping: &Mapping,
) -> Result<Value, NormalizeError> {
    extracted.remove(field).ok_or_else(|| NormalizeError::MissingResponseField {
        field: field.to_string(),
        path: mapping.response_path(field).map(ToString::to_string).unwrap_or_default(),
    })
}

fn invalid(field: &str, detail: impl Into<String>) -> NormalizeError {
    NormalizeError::InvalidFieldValue { field: field.to_string(), detail: detail.into() }
}

fn quote_id(value: Value) -> Result<String, NormalizeError> {
    let id = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        other => {
            return Err(invalid(QUOTE_ID_FIELD, format!("expected text, found {}", kind_of(&other))))
        }
    };

    if id.is_empty() {
        return Err(invalid(QUOTE_ID_FIELD, "quote id is empty"));
    }
    Ok(id)
}

/// Converts through the textual form so `"1199.99"` and `1199.99` yield the same exact amount.
fn decimal(field: &str, value: Value) -> Result<Decimal, NormalizeError> {
    let text = match &value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        other => return Err(invalid(field, format!("expected a number, found {}", kind_of(other)))),
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| invalid(field, format!("`{text}` is not a decimal amount")))
}

fn term_months(value: Value) -> Result<u32, NormalizeError> {
    let months = match &value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number.as_f64().filter(|months| months.fract() == 0.0 && *months >= 0.0).map(|months| months as u64)
        }),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        other => {
            return Err(invalid(TERM_FIELD, format!("expected whole months, found {}", kind_of(other))))
        }
    };

    months
        .and_then(|months| u32::try_from(months).ok())
        .ok_or_else(|| invalid(TERM_FIELD, format!("`{value}` is not a whole number of months (apply toInt to truncate)")))
}
