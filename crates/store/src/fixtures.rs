use std::path::Path;

use serde::Serialize;

use iqq_core::domain::provider::ResponseFormat;
use iqq_core::mapping::catalog::ConfigRecords;

use crate::repositories::{ConfigRepository, InMemoryConfigRepository, RepositoryError};

const SEED_CLIENT_IDS: &[&str] = &["CLI001", "CLI002"];

const SEED_PRODUCT_IDS: &[&str] = &["PROD-MBP-001", "PROD-GAP-001", "PROD-VDP-001"];

/// Seeded providers cover one of each supported response format.
const SEED_PROVIDERS: &[(&str, ResponseFormat)] = &[
    ("PROV-CLIENT", ResponseFormat::Csv),
    ("PROV-ROUTE66", ResponseFormat::Json),
    ("PROV-APCO", ResponseFormat::Xml),
];

const SEED_MAPPED_PRODUCT: &str = "PROD-MBP-001";

/// Deterministic configuration dataset: two clients, three products, three
/// providers (CSV, JSON, XML) and one active v1 mapping per provider for MBP.
pub struct SeedDataset;

impl SeedDataset {
    /// JSON fixture content for the seed dataset.
    pub const JSON: &'static str = include_str!("../../../config/fixtures/seed.json");

    pub fn records() -> Result<ConfigRecords, RepositoryError> {
        Self::parse(Self::JSON)
    }

    pub fn parse(raw: &str) -> Result<ConfigRecords, RepositoryError> {
        serde_json::from_str(raw).map_err(|error| RepositoryError::Decode(error.to_string()))
    }

    /// Reads a seed file from disk instead of the embedded fixture.
    pub async fn read(path: &Path) -> Result<ConfigRecords, RepositoryError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|source| {
            RepositoryError::Read { path: path.display().to_string(), source }
        })?;
        Self::parse(&raw)
    }

    /// Saves every record into the repository. Loading the same dataset twice is a no-op.
    pub async fn load(
        repository: &InMemoryConfigRepository,
        records: ConfigRecords,
    ) -> Result<SeedResult, RepositoryError> {
        let result = SeedResult {
            clients: records.clients.len(),
            preferences: records.preferences.len(),
            products: records.products.len(),
            providers: records.providers.len(),
            mappings: records.mappings.len(),
        };

        for client in records.clients {
            repository.save_client(client).await?;
        }
        for preferences in records.preferences {
            repository.save_preferences(preferences).await?;
        }
        for product in records.products {
            repository.save_product(product).await?;
        }
        for provider in records.providers {
            repository.save_provider(provider).await?;
        }
        for mapping in records.mappings {
            repository.save_mapping(mapping).await?;
        }

        tracing::info!(
            event_name = "store.seed.loaded",
            clients = result.clients,
            products = result.products,
            providers = result.providers,
            mappings = result.mappings,
            "seed dataset loaded"
        );
        Ok(result)
    }

    /// Verify that the seeded records exist and match the contract.
    pub async fn verify(
        repository: &dyn ConfigRepository,
    ) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for client_id in SEED_CLIENT_IDS {
            let client = repository.find_client(&(*client_id).into()).await?;
            checks.push((format!("client:{client_id}"), client.is_some_and(|c| c.is_active())));
        }

        for product_id in SEED_PRODUCT_IDS {
            let product = repository.find_product(&(*product_id).into()).await?;
            checks.push((format!("product:{product_id}"), product.is_some_and(|p| p.is_active())));
        }

        for (provider_id, format) in SEED_PROVIDERS {
            let provider = repository.find_provider(&(*provider_id).into()).await?;
            checks.push((
                format!("provider:{provider_id}"),
                provider.is_some_and(|p| p.is_active() && p.response_format == *format),
            ));

            let versions =
                repository.list_mappings(&SEED_MAPPED_PRODUCT.into(), &(*provider_id).into()).await?;
            let active = versions.iter().filter(|mapping| mapping.active).count();
            checks.push((format!("mapping:{SEED_MAPPED_PRODUCT}/{provider_id}"), active == 1));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub clients: usize,
    pub preferences: usize,
    pub products: usize,
    pub providers: usize,
    pub mappings: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}
