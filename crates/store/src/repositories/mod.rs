use async_trait::async_trait;
use thiserror::Error;

use iqq_core::domain::client::{Client, ClientId, ClientPreferences};
use iqq_core::domain::mapping::MappingRecord;
use iqq_core::domain::product::{Product, ProductId};
use iqq_core::domain::provider::{Provider, ProviderId};
use iqq_core::mapping::catalog::ConfigRecords;

pub mod memory;

pub use memory::InMemoryConfigRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("could not read `{path}`: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("mapping {product_id}/{provider_id} v{version} already exists with different content")]
    ImmutableMapping { product_id: ProductId, provider_id: ProviderId, version: u32 },
    #[error("mapping {product_id}/{provider_id} v{version} not found")]
    MappingNotFound { product_id: ProductId, provider_id: ProviderId, version: u32 },
}

/// Read side of the external configuration store. Lookups are by key only.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn find_client(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError>;

    async fn find_preferences(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<ClientPreferences>, RepositoryError>;

    async fn find_product(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;

    async fn find_provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError>;

    /// Every version for the pair, ordered by version.
    async fn list_mappings(
        &self,
        product_id: &ProductId,
        provider_id: &ProviderId,
    ) -> Result<Vec<MappingRecord>, RepositoryError>;

    /// All records at once, for catalog compilation.
    async fn snapshot(&self) -> Result<ConfigRecords, RepositoryError>;
}
