use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::product::ProductId;
use crate::domain::provider::ProviderId;

/// One immutable version of the field-level translation between the canonical
/// schema and a single provider, for a single product.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRecord {
    pub product_id: ProductId,
    pub provider_id: ProviderId,
    pub version: u32,
    pub active: bool,
    pub mapping_config: MappingConfig,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Canonical request field -> provider request path.
    #[serde(default)]
    pub request: BTreeMap<String, RequestField>,
    /// Canonical quote field -> path into the parsed provider response.
    #[serde(default)]
    pub response: BTreeMap<String, String>,
    /// Canonical quote field -> registered transform name.
    #[serde(default)]
    pub transformations: BTreeMap<String, String>,
    /// Provider request path -> literal value sent with every request.
    #[serde(default)]
    pub constants: BTreeMap<String, Value>,
}

/// A request entry is either a bare provider path (required) or a detailed rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestField {
    Path(String),
    Detailed {
        path: String,
        #[serde(default = "required_by_default")]
        required: bool,
        #[serde(default)]
        default: Option<Value>,
    },
}

fn required_by_default() -> bool {
    true
}

impl RequestField {
    pub fn path(&self) -> &str {
        match self {
            Self::Path(path) | Self::Detailed { path, .. } => path,
        }
    }

    pub fn required(&self) -> bool {
        match self {
            Self::Path(_) => true,
            Self::Detailed { required, .. } => *required,
        }
    }

    pub fn default_value(&self) -> Option<&Value> {
        match self {
            Self::Path(_) => None,
            Self::Detailed { default, .. } => default.as_ref(),
        }
    }
}
