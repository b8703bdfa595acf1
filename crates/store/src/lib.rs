pub mod catalog;
pub mod fixtures;
pub mod repositories;

pub use catalog::{load_catalog, CatalogLoadError};
pub use fixtures::{SeedDataset, SeedResult, VerificationResult};
pub use repositories::{ConfigRepository, InMemoryConfigRepository, RepositoryError};
