use crate::domain::client::{ClientId, ClientPreferences};
use crate::domain::product::ProductId;
use crate::domain::provider::ProviderId;
use crate::errors::ConfigError;
use crate::mapping::catalog::ConfigCatalog;

/// Orders and bounds the providers a client may query.
///
/// Applied in a fixed order: allow-list, block-list, preferred-first ordering,
/// then the `maxProviders` cap. An allow-listed id survives even when it is
/// also blocked. An empty result is valid here.
pub fn select_providers(
    mapped: &[ProviderId],
    preferences: Option<&ClientPreferences>,
) -> Vec<ProviderId> {
    let Some(preferences) = preferences else {
        return mapped.to_vec();
    };

    let permitted: Vec<&ProviderId> = mapped
        .iter()
        .filter(|provider_id| match preferences.allowed_providers {
            Some(_) => preferences.is_allowed(provider_id),
            None => !preferences.is_blocked(provider_id),
        })
        .collect();

    let mut ordered: Vec<ProviderId> = Vec::with_capacity(permitted.len());
    for preferred in preferences.preferred_providers.iter().flatten() {
        if permitted.contains(&preferred) && !ordered.contains(preferred) {
            ordered.push(preferred.clone());
        }
    }
    for provider_id in permitted {
        if !ordered.contains(provider_id) {
            ordered.push(provider_id.clone());
        }
    }

    if let Some(max) = preferences.max_providers {
        ordered.truncate(max);
    }
    ordered
}

/// Providers eligible for `client_id` on `product_id` under the catalog snapshot.
pub fn eligible_providers(
    catalog: &ConfigCatalog,
    client_id: &ClientId,
    product_id: &ProductId,
) -> Result<Vec<ProviderId>, ConfigError> {
    let client = catalog
        .client(client_id)
        .ok_or_else(|| ConfigError::UnknownClient { client_id: client_id.clone() })?;
    if !client.is_active() {
        return Err(ConfigError::ClientInactive { client_id: client_id.clone() });
    }

    let product = catalog
        .product(product_id)
        .ok_or_else(|| ConfigError::UnknownProduct { product_id: product_id.clone() })?;
    if !product.is_active() {
        return Err(ConfigError::ProductInactive { product_id: product_id.clone() });
    }

    let mapped = catalog.mapped_providers(product_id);
    Ok(select_providers(&mapped, catalog.preferences(client_id)))
}
