use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{record_id, RecordStatus};

record_id!(ProductId);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: ProductId,
    #[serde(default)]
    pub product_name: Option<String>,
    pub product_type: String,
    #[serde(default)]
    pub description: Option<String>,
    pub base_premium: Decimal,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Product {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
