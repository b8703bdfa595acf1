pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod mapping;

pub use config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat, SettingsError};
pub use domain::client::{Client, ClientId, ClientPreferences};
pub use domain::mapping::{MappingConfig, MappingRecord, RequestField};
pub use domain::product::{Product, ProductId};
pub use domain::provider::{Provider, ProviderId, ResponseFormat};
pub use domain::quote::{AggregateOutcome, CanonicalFields, ProviderFailure, Quote, QuoteRequest};
pub use domain::RecordStatus;
pub use engine::{
    EngineSettings, InvocationError, ProviderCall, ProviderInvoker, QuoteEngine,
};
pub use errors::{ConfigError, EngineError, ProviderError};
pub use mapping::{
    CatalogError, ConfigCatalog, ConfigRecords, PreParserRegistry, TransformRegistry,
};
