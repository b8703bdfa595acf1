//! Immutable, validated snapshot of every configuration record the engine reads.
//!
//! Compiling a catalog is the single load-time validation point: paths are
//! parsed, transform and pre-parser names are checked against their registries,
//! and record references are resolved. Nothing is looked up ad hoc per call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::client::{Client, ClientId, ClientPreferences};
use crate::domain::mapping::MappingRecord;
use crate::domain::product::{Product, ProductId};
use crate::domain::provider::{Provider, ProviderId};
use crate::domain::quote::REQUIRED_RESPONSE_FIELDS;
use crate::errors::ConfigError;
use crate::mapping::format::{PreParser, PreParserRegistry};
use crate::mapping::path::{FieldPath, PathError};
use crate::mapping::transform::TransformRegistry;

/// Raw configuration records as held by the external store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigRecords {
    pub clients: Vec<Client>,
    pub preferences: Vec<ClientPreferences>,
    pub products: Vec<Product>,
    pub providers: Vec<Provider>,
    pub mappings: Vec<MappingRecord>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("duplicate {kind} record `{id}`")]
    DuplicateRecord { kind: &'static str, id: String },
    #[error("duplicate mapping version {version} for product `{product_id}` and provider `{provider_id}`")]
    DuplicateMappingVersion { product_id: ProductId, provider_id: ProviderId, version: u32 },
    #[error("{kind} record `{owner}` references unknown {target} `{id}`")]
    DanglingReference { kind: &'static str, owner: String, target: &'static str, id: String },
    #[error("mapping {product_id}/{provider_id} v{version} field `{field}`: {source}")]
    InvalidPath {
        product_id: ProductId,
        provider_id: ProviderId,
        version: u32,
        field: String,
        source: PathError,
    },
    #[error("mapping {product_id}/{provider_id} v{version} writes overlapping request paths `{first}` and `{second}`")]
    OverlappingRequestPaths {
        product_id: ProductId,
        provider_id: ProviderId,
        version: u32,
        first: String,
        second: String,
    },
    #[error("mapping {product_id}/{provider_id} v{version} field `{field}` uses unknown transform `{name}`")]
    UnknownTransform {
        product_id: ProductId,
        provider_id: ProviderId,
        version: u32,
        field: String,
        name: String,
    },
    #[error("mapping {product_id}/{provider_id} v{version} transforms `{field}` which has no response path")]
    TransformWithoutResponse {
        product_id: ProductId,
        provider_id: ProviderId,
        version: u32,
        field: String,
    },
    #[error("mapping {product_id}/{provider_id} v{version} has no response path for required field `{field}`")]
    MissingRequiredResponseField {
        product_id: ProductId,
        provider_id: ProviderId,
        version: u32,
        field: &'static str,
    },
    #[error("provider `{provider_id}` references unknown pre-parser `{name}`")]
    UnknownPreParser { provider_id: ProviderId, name: String },
    #[error("failed to fingerprint configuration records: {detail}")]
    Fingerprint { detail: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestRule {
    pub field: String,
    pub path: FieldPath,
    pub required: bool,
    pub default: Option<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResponseRule {
    pub field: String,
    pub path: FieldPath,
    pub transform: Option<String>,
}

/// A compiled mapping version with every path pre-parsed and every transform name validated.
#[derive(Clone, Debug, PartialEq)]
pub struct Mapping {
    pub product_id: ProductId,
    pub provider_id: ProviderId,
    pub version: u32,
    pub active: bool,
    pub request: Vec<RequestRule>,
    pub constants: Vec<(FieldPath, Value)>,
    pub response: Vec<ResponseRule>,
}

impl Mapping {
    pub fn response_path(&self, field: &str) -> Option<&FieldPath> {
        self.response.iter().find(|rule| rule.field == field).map(|rule| &rule.path)
    }
}

#[derive(Clone)]
pub struct CompiledProvider {
    pub record: Provider,
    pub pre_parser: Option<Arc<dyn PreParser>>,
}

impl std::fmt::Debug for CompiledProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledProvider")
            .field("record", &self.record)
            .field("pre_parser", &self.record.adapter_ref)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CatalogSummary {
    pub clients: usize,
    pub preferences: usize,
    pub products: usize,
    pub providers: usize,
    pub mappings: usize,
    pub active_mappings: usize,
}

type MappingKey = (ProductId, ProviderId);

#[derive(Debug)]
pub struct ConfigCatalog {
    clients: HashMap<ClientId, Client>,
    preferences: HashMap<ClientId, ClientPreferences>,
    products: HashMap<ProductId, Product>,
    providers: HashMap<ProviderId, CompiledProvider>,
    provider_order: Vec<ProviderId>,
    mappings: HashMap<MappingKey, Vec<Arc<Mapping>>>,
    transforms: Arc<TransformRegistry>,
    summary: CatalogSummary,
    fingerprint: String,
}

impl ConfigCatalog {
    pub fn compile(
        records: ConfigRecords,
        transforms: Arc<TransformRegistry>,
        pre_parsers: &PreParserRegistry,
    ) -> Result<Self, CatalogError> {
        let fingerprint = fingerprint(&records)?;

        let mut clients = HashMap::new();
        for client in &records.clients {
            insert_unique(&mut clients, client.client_id.clone(), client.clone(), "client")?;
        }

        let mut preferences = HashMap::new();
        for entry in &records.preferences {
            if !clients.contains_key(&entry.client_id) {
                return Err(CatalogError::DanglingReference {
                    kind: "preferences",
                    owner: entry.client_id.to_string(),
                    target: "client",
                    id: entry.client_id.to_string(),
                });
            }
            insert_unique(&mut preferences, entry.client_id.clone(), entry.clone(), "preferences")?;
        }

        let mut products = HashMap::new();
        for product in &records.products {
            insert_unique(&mut products, product.product_id.clone(), product.clone(), "product")?;
        }

        let mut providers = HashMap::new();
        let mut provider_order = Vec::with_capacity(records.providers.len());
        for provider in &records.providers {
            let pre_parser = match provider.adapter_ref.as_deref() {
                Some(name) => Some(pre_parsers.get(name).ok_or_else(|| {
                    CatalogError::UnknownPreParser {
                        provider_id: provider.provider_id.clone(),
                        name: name.to_string(),
                    }
                })?),
                None => None,
            };
            let compiled = CompiledProvider { record: provider.clone(), pre_parser };
            insert_unique(&mut providers, provider.provider_id.clone(), compiled, "provider")?;
            provider_order.push(provider.provider_id.clone());
        }

        let mut mappings: HashMap<MappingKey, Vec<Arc<Mapping>>> = HashMap::new();
        let mut active_mappings = 0;
        for record in &records.mappings {
            if !products.contains_key(&record.product_id) {
                return Err(dangling_mapping(record, "product", record.product_id.to_string()));
            }
            if !providers.contains_key(&record.provider_id) {
                return Err(dangling_mapping(record, "provider", record.provider_id.to_string()));
            }

            let versions = mappings
                .entry((record.product_id.clone(), record.provider_id.clone()))
                .or_default();
            if versions.iter().any(|existing| existing.version == record.version) {
                return Err(CatalogError::DuplicateMappingVersion {
                    product_id: record.product_id.clone(),
                    provider_id: record.provider_id.clone(),
                    version: record.version,
                });
            }

            if record.active {
                active_mappings += 1;
            }
            versions.push(Arc::new(compile_mapping(record, &transforms)?));
        }

        let summary = CatalogSummary {
            clients: clients.len(),
            preferences: preferences.len(),
            products: products.len(),
            providers: providers.len(),
            mappings: records.mappings.len(),
            active_mappings,
        };

        Ok(Self {
            clients,
            preferences,
            products,
            providers,
            provider_order,
            mappings,
            transforms,
            summary,
            fingerprint,
        })
    }

    /// Selects the single active mapping version for the pair.
    ///
    /// Two active versions are a data-integrity violation and are reported,
    /// never resolved by picking one.
    pub fn resolve(
        &self,
        product_id: &ProductId,
        provider_id: &ProviderId,
    ) -> Result<Arc<Mapping>, ConfigError> {
        let versions = self
            .mappings
            .get(&(product_id.clone(), provider_id.clone()))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let active: Vec<&Arc<Mapping>> = versions.iter().filter(|mapping| mapping.active).collect();

        match active.as_slice() {
            [] => Err(ConfigError::NoActiveMapping {
                product_id: product_id.clone(),
                provider_id: provider_id.clone(),
            }),
            [mapping] => Ok(Arc::clone(mapping)),
            many => {
                let mut versions: Vec<u32> = many.iter().map(|mapping| mapping.version).collect();
                versions.sort_unstable();
                Err(ConfigError::MultipleActiveMappings {
                    product_id: product_id.clone(),
                    provider_id: provider_id.clone(),
                    versions,
                })
            }
        }
    }

    /// Active providers holding at least one mapping version for `product_id`,
    /// in provider record order.
    pub fn mapped_providers(&self, product_id: &ProductId) -> Vec<ProviderId> {
        self.provider_order
            .iter()
            .filter(|provider_id| {
                self.providers.get(*provider_id).is_some_and(|provider| provider.record.is_active())
                    && self.mappings.contains_key(&(product_id.clone(), (*provider_id).clone()))
            })
            .cloned()
            .collect()
    }

    pub fn client(&self, client_id: &ClientId) -> Option<&Client> {
        self.clients.get(client_id)
    }

    pub fn preferences(&self, client_id: &ClientId) -> Option<&ClientPreferences> {
        self.preferences.get(client_id)
    }

    pub fn product(&self, product_id: &ProductId) -> Option<&Product> {
        self.products.get(product_id)
    }

    pub fn provider(&self, provider_id: &ProviderId) -> Option<&CompiledProvider> {
        self.providers.get(provider_id)
    }

    pub fn providers(&self) -> impl Iterator<Item = &CompiledProvider> {
        self.provider_order.iter().filter_map(|provider_id| self.providers.get(provider_id))
    }

    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }

    pub fn summary(&self) -> CatalogSummary {
        self.summary
    }

    /// blake3 hex digest of the source records.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn fingerprint(records: &ConfigRecords) -> Result<String, CatalogError> {
    let canonical = serde_json::to_vec(records)
        .map_err(|error| CatalogError::Fingerprint { detail: error.to_string() })?;
    Ok(blake3::hash(&canonical).to_hex().to_string())
}

fn insert_unique<K, V>(
    map: &mut HashMap<K, V>,
    key: K,
    value: V,
    kind: &'static str,
) -> Result<(), CatalogError>
where
    K: std::hash::Hash + Eq + std::fmt::Display,
{
    if map.contains_key(&key) {
        return Err(CatalogError::DuplicateRecord { kind, id: key.to_string() });
    }
    map.insert(key, value);
    Ok(())
}

fn dangling_mapping(record: &MappingRecord, target: &'static str, id: String) -> CatalogError {
    CatalogError::DanglingReference {
        kind: "mapping",
        owner: format!("{}/{} v{}", record.product_id, record.provider_id, record.version),
        target,
        id,
    }
}

fn compile_mapping(
    record: &MappingRecord,
    transforms: &TransformRegistry,
) -> Result<Mapping, CatalogError> {
    let config = &record.mapping_config;
    let parse_path = |field: &str, raw: &str| {
        FieldPath::parse(raw).map_err(|source| CatalogError::InvalidPath {
            product_id: record.product_id.clone(),
            provider_id: record.provider_id.clone(),
            version: record.version,
            field: field.to_string(),
            source,
        })
    };

    let mut request = Vec::with_capacity(config.request.len());
    for (field, rule) in &config.request {
        request.push(RequestRule {
            field: field.clone(),
            path: parse_path(field, rule.path())?,
            required: rule.required(),
            default: rule.default_value().cloned(),
        });
    }

    let mut constants = Vec::with_capacity(config.constants.len());
    for (raw_path, value) in &config.constants {
        constants.push((parse_path(raw_path, raw_path)?, value.clone()));
    }

    let targets: Vec<&FieldPath> =
        constants.iter().map(|(path, _)| path).chain(request.iter().map(|rule| &rule.path)).collect();
    for (position, first) in targets.iter().enumerate() {
        if let Some(second) = targets[position + 1..].iter().find(|other| first.overlaps(other)) {
            return Err(CatalogError::OverlappingRequestPaths {
                product_id: record.product_id.clone(),
                provider_id: record.provider_id.clone(),
                version: record.version,
                first: first.to_string(),
                second: second.to_string(),
            });
        }
    }

    let mut response = Vec::with_capacity(config.response.len());
    for (field, raw_path) in &config.response {
        let transform = config.transformations.get(field).cloned();
        if let Some(name) = transform.as_deref() {
            if !transforms.contains(name) {
                return Err(CatalogError::UnknownTransform {
                    product_id: record.product_id.clone(),
                    provider_id: record.provider_id.clone(),
                    version: record.version,
                    field: field.clone(),
                    name: name.to_string(),
                });
            }
        }
        response.push(ResponseRule { field: field.clone(), path: parse_path(field, raw_path)?, transform });
    }

    let mapped: HashSet<&str> = config.response.keys().map(String::as_str).collect();
    if let Some(field) = config.transformations.keys().find(|field| !mapped.contains(field.as_str())) {
        return Err(CatalogError::TransformWithoutResponse {
            product_id: record.product_id.clone(),
            provider_id: record.provider_id.clone(),
            version: record.version,
            field: field.clone(),
        });
    }
    if let Some(field) = REQUIRED_RESPONSE_FIELDS.into_iter().find(|field| !mapped.contains(field)) {
        return Err(CatalogError::MissingRequiredResponseField {
            product_id: record.product_id.clone(),
            provider_id: record.provider_id.clone(),
            version: record.version,
            field,
        });
    }

    Ok(Mapping {
        product_id: record.product_id.clone(),
        provider_id: record.provider_id.clone(),
        version: record.version,
        active: record.active,
        request,
        constants,
        response,
    })
}
