use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use iqq_core::domain::quote::{AggregateOutcome, CanonicalFields, Quote, QuoteRequest};
use iqq_core::engine::{EngineSettings, InvocationError, ProviderCall, ProviderInvoker, QuoteEngine};

use crate::commands::{build_runtime, load_config, seeded_catalog, CommandFailure, CommandResult};

/// Dry-run invoker: answers each call with a recorded response file named
/// `<providerId>.<json|xml|csv>` under a directory.
#[derive(Clone, Debug)]
pub struct FixtureInvoker {
    responses_dir: PathBuf,
}

impl FixtureInvoker {
    pub fn new(responses_dir: impl Into<PathBuf>) -> Self {
        Self { responses_dir: responses_dir.into() }
    }

    pub fn response_path(&self, call: &ProviderCall) -> PathBuf {
        self.responses_dir
            .join(format!("{}.{}", call.provider_id, call.response_format.extension()))
    }
}

#[async_trait]
impl ProviderInvoker for FixtureInvoker {
    async fn invoke(&self, call: ProviderCall) -> Result<Vec<u8>, InvocationError> {
        let path = self.response_path(&call);
        debug!(
            event_name = "cli.fixture.read",
            correlation_id = %call.correlation_id,
            provider_id = %call.provider_id,
            path = %path.display(),
            payload = %call.payload,
            "serving recorded provider response"
        );

        tokio::fs::read(&path).await.map_err(|error| match error.kind() {
            ErrorKind::NotFound => {
                InvocationError::Transport(format!("no recorded response at {}", path.display()))
            }
            _ => InvocationError::Transport(format!("{}: {error}", path.display())),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteOutput<'a> {
    #[serde(flatten)]
    outcome: &'a AggregateOutcome,
    cheapest: Option<&'a Quote>,
}

/// Parses `key=value` arguments into canonical fields. Values that parse as
/// JSON keep their type; anything else is taken as a string.
pub fn parse_fields(raw_fields: &[String]) -> Result<CanonicalFields, String> {
    let mut fields = Map::new();
    for raw in raw_fields {
        let Some((key, value)) = raw.split_once('=') else {
            return Err(format!("field `{raw}` must be written as key=value"));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("field `{raw}` has an empty key"));
        }
        let value =
            serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
        fields.insert(key.to_string(), value);
    }
    Ok(fields)
}

pub fn run(
    client_id: &str,
    product_id: &str,
    raw_fields: &[String],
    responses_dir: &Path,
) -> CommandResult {
    let fields = match parse_fields(raw_fields) {
        Ok(fields) => fields,
        Err(message) => return CommandResult::failure("quote", "invalid_argument", message, 2),
    };
    let config = match load_config("quote") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("quote") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let request = QuoteRequest::new(client_id.into(), product_id.into(), fields);
    let result = runtime.block_on(async {
        let seeded = seeded_catalog(&config).await?;
        let engine = QuoteEngine::new(
            seeded.catalog,
            Arc::new(FixtureInvoker::new(responses_dir)),
            EngineSettings::from(&config.engine),
        );

        let cancellation = CancellationToken::new();
        let interrupt = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(event_name = "cli.quote.interrupted", "interrupt received, cancelling quote");
                interrupt.cancel();
            }
        });

        let outcome = engine
            .quote_with_cancellation(request, cancellation)
            .await
            .map_err(|error| (error.code(), error.to_string(), 7u8))?;
        Ok::<_, CommandFailure>(outcome)
    });

    match result {
        Ok(outcome) => CommandResult::document(
            "quote",
            &QuoteOutput { outcome: &outcome, cheapest: outcome.cheapest() },
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("quote", error_class, message, exit_code)
        }
    }
}
