use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::provider::ProviderId;
use crate::domain::{record_id, RecordStatus};

record_id!(ClientId);

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub client_id: ClientId,
    #[serde(alias = "clientName")]
    pub name: String,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default)]
    pub contact_info: ContactInfo,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Client {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Provider eligibility rules owned by a single client.
///
/// Every list is optional; an absent field places no constraint of that kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPreferences {
    pub client_id: ClientId,
    #[serde(default)]
    pub allowed_providers: Option<Vec<ProviderId>>,
    #[serde(default)]
    pub blocked_providers: Option<Vec<ProviderId>>,
    #[serde(default)]
    pub preferred_providers: Option<Vec<ProviderId>>,
    #[serde(default)]
    pub max_providers: Option<usize>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ClientPreferences {
    pub fn unconstrained(client_id: ClientId) -> Self {
        Self {
            client_id,
            allowed_providers: None,
            blocked_providers: None,
            preferred_providers: None,
            max_providers: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_allowed(&self, provider_id: &ProviderId) -> bool {
        self.allowed_providers.as_ref().is_some_and(|allowed| allowed.contains(provider_id))
    }

    pub fn is_blocked(&self, provider_id: &ProviderId) -> bool {
        self.blocked_providers.as_ref().is_some_and(|blocked| blocked.contains(provider_id))
    }
}
