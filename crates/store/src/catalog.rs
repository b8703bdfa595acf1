use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use iqq_core::mapping::catalog::{CatalogError, ConfigCatalog};
use iqq_core::mapping::format::PreParserRegistry;
use iqq_core::mapping::transform::TransformRegistry;

use crate::repositories::{ConfigRepository, RepositoryError};

#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("configuration rejected: {0}")]
    Catalog(#[from] CatalogError),
}

/// Snapshots the repository and compiles it. Any integrity problem rejects the
/// whole load so a bad record never reaches the engine.
pub async fn load_catalog(
    repository: &dyn ConfigRepository,
    transforms: Arc<TransformRegistry>,
    pre_parsers: &PreParserRegistry,
) -> Result<ConfigCatalog, CatalogLoadError> {
    let records = repository.snapshot().await?;

    match ConfigCatalog::compile(records, transforms, pre_parsers) {
        Ok(catalog) => {
            let summary = catalog.summary();
            info!(
                event_name = "store.catalog.loaded",
                fingerprint = %catalog.fingerprint(),
                providers = summary.providers,
                active_mappings = summary.active_mappings,
                "configuration catalog compiled"
            );
            Ok(catalog)
        }
        Err(source) => {
            error!(
                event_name = "store.catalog.rejected",
                error = %source,
                "configuration catalog rejected"
            );
            Err(source.into())
        }
    }
}
