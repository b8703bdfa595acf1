use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::quote::CanonicalFields;
use crate::mapping::catalog::Mapping;
use crate::mapping::path::{self, PathError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RequestBuildError {
    #[error("canonical request is missing required field `{field}`")]
    MissingCanonicalField { field: String },
    #[error("cannot build provider request: {0}")]
    Path(#[from] PathError),
}

/// Builds a provider-native payload from canonical fields.
///
/// Mapping constants are written first, then every mapped canonical field at
/// its provider path. Canonical fields the mapping does not name are dropped.
/// A null canonical value counts as absent.
pub fn build_request(fields: &CanonicalFields, mapping: &Mapping) -> Result<Value, RequestBuildError> {
    let mut payload = Value::Object(Map::new());

    for (target, value) in &mapping.constants {
        path::set(&mut payload, target, value.clone())?;
    }

    for rule in &mapping.request {
        let value = match fields.get(&rule.field).filter(|value| !value.is_null()) {
            Some(value) => value.clone(),
            None => match (&rule.default, rule.required) {
                (Some(default), _) => default.clone(),
                (None, true) => {
                    return Err(RequestBuildError::MissingCanonicalField { field: rule.field.clone() })
                }
                (None, false) => continue,
            },
        };
        path::set(&mut payload, &rule.path, value)?;
    }

    Ok(payload)
}
