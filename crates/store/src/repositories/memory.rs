use tokio::sync::RwLock;

use iqq_core::domain::client::{Client, ClientId, ClientPreferences};
use iqq_core::domain::mapping::MappingRecord;
use iqq_core::domain::product::{Product, ProductId};
use iqq_core::domain::provider::{Provider, ProviderId};
use iqq_core::mapping::catalog::ConfigRecords;

use super::{ConfigRepository, RepositoryError};

/// Insertion-ordered in-memory store. Saving an existing key replaces it in place.
#[derive(Default)]
pub struct InMemoryConfigRepository {
    records: RwLock<ConfigRecords>,
}

fn upsert<T>(items: &mut Vec<T>, item: T, same_key: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same_key(existing)) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

impl InMemoryConfigRepository {
    pub fn new(records: ConfigRecords) -> Self {
        Self { records: RwLock::new(records) }
    }

    pub async fn save_client(&self, client: Client) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let key = client.client_id.clone();
        upsert(&mut records.clients, client, |existing| existing.client_id == key);
        Ok(())
    }

    pub async fn save_preferences(
        &self,
        preferences: ClientPreferences,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let key = preferences.client_id.clone();
        upsert(&mut records.preferences, preferences, |existing| existing.client_id == key);
        Ok(())
    }

    pub async fn delete_preferences(&self, client_id: &ClientId) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().await;
        let before = records.preferences.len();
        records.preferences.retain(|existing| &existing.client_id != client_id);
        Ok(records.preferences.len() != before)
    }

    pub async fn save_product(&self, product: Product) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let key = product.product_id.clone();
        upsert(&mut records.products, product, |existing| existing.product_id == key);
        Ok(())
    }

    pub async fn save_provider(&self, provider: Provider) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let key = provider.provider_id.clone();
        upsert(&mut records.providers, provider, |existing| existing.provider_id == key);
        Ok(())
    }

    /// Mapping versions are immutable: re-saving an identical record is a no-op,
    /// a different record under an existing version is rejected.
    pub async fn save_mapping(&self, mapping: MappingRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.mappings.iter().find(|existing| {
            existing.product_id == mapping.product_id
                && existing.provider_id == mapping.provider_id
                && existing.version == mapping.version
        }) {
            if existing == &mapping {
                return Ok(());
            }
            return Err(RepositoryError::ImmutableMapping {
                product_id: mapping.product_id,
                provider_id: mapping.provider_id,
                version: mapping.version,
            });
        }

        records.mappings.push(mapping);
        Ok(())
    }

    /// Flips `active` to `version` and clears it on every other version of the
    /// pair, under a single write lock.
    pub async fn activate_mapping(
        &self,
        product_id: &ProductId,
        provider_id: &ProviderId,
        version: u32,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let pair: Vec<&mut MappingRecord> = records
            .mappings
            .iter_mut()
            .filter(|mapping| &mapping.product_id == product_id && &mapping.provider_id == provider_id)
            .collect();

        if !pair.iter().any(|mapping| mapping.version == version) {
            return Err(RepositoryError::MappingNotFound {
                product_id: product_id.clone(),
                provider_id: provider_id.clone(),
                version,
            });
        }

        for mapping in pair {
            mapping.active = mapping.version == version;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConfigRepository for InMemoryConfigRepository {
    async fn find_client(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.clients.iter().find(|client| &client.client_id == id).cloned())
    }

    async fn find_preferences(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<ClientPreferences>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.preferences.iter().find(|entry| &entry.client_id == client_id).cloned())
    }

    async fn find_product(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.products.iter().find(|product| &product.product_id == id).cloned())
    }

    async fn find_provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.providers.iter().find(|provider| &provider.provider_id == id).cloned())
    }

    async fn list_mappings(
        &self,
        product_id: &ProductId,
        provider_id: &ProviderId,
    ) -> Result<Vec<MappingRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut versions: Vec<MappingRecord> = records
            .mappings
            .iter()
            .filter(|mapping| &mapping.product_id == product_id && &mapping.provider_id == provider_id)
            .cloned()
            .collect();
        versions.sort_by_key(|mapping| mapping.version);
        Ok(versions)
    }

    async fn snapshot(&self) -> Result<ConfigRecords, RepositoryError> {
        Ok(self.records.read().await.clone())
    }
}
