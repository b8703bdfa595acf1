pub mod config;
pub mod providers;
pub mod quote;
pub mod seed;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use iqq_core::config::{AppConfig, LoadOptions};
use iqq_core::mapping::catalog::ConfigCatalog;
use iqq_core::mapping::format::PreParserRegistry;
use iqq_core::mapping::transform::TransformRegistry;
use iqq_store::{load_catalog, InMemoryConfigRepository, SeedDataset, SeedResult};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: Value,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    /// Success whose message is a structured result document.
    pub fn document(command: &str, document: &impl Serialize) -> Self {
        match serde_json::to_value(document) {
            Ok(message) => Self::success(command, message),
            Err(error) => Self::failure(command, "serialization", error.to_string(), 1),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: Value::String(message.into()),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Error triple threaded through command bodies: class, message, exit code.
pub(crate) type CommandFailure = (&'static str, String, u8);

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

pub(crate) fn build_runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

pub(crate) struct SeededCatalog {
    pub repository: InMemoryConfigRepository,
    pub catalog: ConfigCatalog,
    pub seed: SeedResult,
}

/// Seeds an in-memory repository from the configured seed file, or the
/// embedded dataset, and compiles it.
pub(crate) async fn seeded_catalog(config: &AppConfig) -> Result<SeededCatalog, CommandFailure> {
    let records = match &config.store.seed_path {
        Some(path) => SeedDataset::read(path).await,
        None => SeedDataset::records(),
    }
    .map_err(|error| ("seed_read", error.to_string(), 4u8))?;

    let repository = InMemoryConfigRepository::default();
    let seed = SeedDataset::load(&repository, records)
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

    let catalog = load_catalog(
        &repository,
        Arc::new(TransformRegistry::default()),
        &PreParserRegistry::default(),
    )
    .await
    .map_err(|error| ("catalog_validation", error.to_string(), 5u8))?;

    Ok(SeededCatalog { repository, catalog, seed })
}
