use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{record_id, RecordStatus};

record_id!(ProviderId);

/// Wire format of a provider's native response body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseFormat {
    Json,
    Xml,
    Csv,
}

impl ResponseFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::Xml => "XML",
            Self::Csv => "CSV",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "JSON" => Ok(Self::Json),
            "XML" => Ok(Self::Xml),
            "CSV" => Ok(Self::Csv),
            other => Err(format!("unsupported response format `{other}` (expected JSON|XML|CSV)")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub provider_id: ProviderId,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(alias = "providerUrl")]
    pub endpoint: String,
    pub response_format: ResponseFormat,
    /// Name of a registered pre-parser applied to the raw body before format parsing.
    #[serde(default, alias = "adapterArn")]
    pub adapter_ref: Option<String>,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Provider {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
