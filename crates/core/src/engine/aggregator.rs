use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::client::ClientId;
use crate::domain::product::ProductId;
use crate::domain::provider::ProviderId;
use crate::domain::quote::{AggregateOutcome, ProviderFailure, Quote, QuoteRequest};
use crate::engine::invoker::{InvocationError, ProviderCall, ProviderInvoker};
use crate::engine::preferences::eligible_providers;
use crate::engine::EngineSettings;
use crate::errors::{ConfigError, EngineError, ProviderError};
use crate::mapping::catalog::{CompiledProvider, ConfigCatalog, Mapping};
use crate::mapping::format::FormatError;
use crate::mapping::normalize::{normalize, NormalizeError};
use crate::mapping::request::build_request;

/// Fans a canonical request out to every selected provider and collects
/// normalized quotes alongside per-provider failures.
///
/// Each call works on the catalog snapshot current when it started;
/// [`QuoteEngine::replace_catalog`] only affects later calls.
pub struct QuoteEngine {
    catalog: RwLock<Arc<ConfigCatalog>>,
    invoker: Arc<dyn ProviderInvoker>,
    settings: EngineSettings,
}

struct PreparedCall {
    source_rank: usize,
    provider: CompiledProvider,
    mapping: Arc<Mapping>,
    payload: Value,
    timeout: Duration,
}

/// Aborts every spawned provider task when the owning call finishes or is dropped.
struct TaskGuard(Vec<AbortHandle>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

impl QuoteEngine {
    pub fn new(
        catalog: ConfigCatalog,
        invoker: Arc<dyn ProviderInvoker>,
        settings: EngineSettings,
    ) -> Self {
        Self { catalog: RwLock::new(Arc::new(catalog)), invoker, settings }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub async fn snapshot(&self) -> Arc<ConfigCatalog> {
        Arc::clone(&*self.catalog.read().await)
    }

    /// Installs a new catalog and returns the previous one.
    pub async fn replace_catalog(&self, catalog: ConfigCatalog) -> Arc<ConfigCatalog> {
        let mut current = self.catalog.write().await;
        let previous = std::mem::replace(&mut *current, Arc::new(catalog));
        info!(
            event_name = "engine.catalog.replaced",
            previous_fingerprint = %previous.fingerprint(),
            fingerprint = %current.fingerprint(),
            "configuration catalog replaced"
        );
        previous
    }

    pub async fn eligible_providers(
        &self,
        client_id: &ClientId,
        product_id: &ProductId,
    ) -> Result<Vec<ProviderId>, ConfigError> {
        let catalog = self.snapshot().await;
        eligible_providers(&catalog, client_id, product_id)
    }

    /// Full control flow: preference filter, then aggregation over the selection.
    pub async fn quote(&self, request: QuoteRequest) -> Result<AggregateOutcome, EngineError> {
        let catalog = self.snapshot().await;
        let correlation_id = correlation_id(&request);

        let selected = eligible_providers(&catalog, &request.client_id, &request.product_id)
            .map_err(|error| {
                warn!(
                    event_name = "engine.quote.rejected",
                    correlation_id = %correlation_id,
                    client_id = %request.client_id,
                    product_id = %request.product_id,
                    error = %error,
                    "quote request rejected"
                );
                error
            })?;
        debug!(
            event_name = "engine.quote.providers_selected",
            correlation_id = %correlation_id,
            client_id = %request.client_id,
            product_id = %request.product_id,
            selected = ?selected,
            "eligible providers selected"
        );

        self.run(catalog, &selected, &request, correlation_id).await
    }

    /// Like [`QuoteEngine::quote`], returning [`EngineError::Cancelled`] as soon as
    /// `cancellation` fires. Outstanding provider tasks are aborted, not awaited.
    pub async fn quote_with_cancellation(
        &self,
        mut request: QuoteRequest,
        cancellation: CancellationToken,
    ) -> Result<AggregateOutcome, EngineError> {
        let correlation_id = correlation_id(&request);
        request.correlation_id = Some(correlation_id.clone());

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                info!(
                    event_name = "engine.quote.cancelled",
                    correlation_id = %correlation_id,
                    "quote cancelled by caller"
                );
                Err(EngineError::Cancelled)
            }
            outcome = self.quote(request) => outcome,
        }
    }

    /// Aggregates over an explicit provider list; list order is source rank order.
    pub async fn aggregate(
        &self,
        selected: &[ProviderId],
        request: &QuoteRequest,
    ) -> Result<AggregateOutcome, EngineError> {
        let catalog = self.snapshot().await;
        self.run(catalog, selected, request, correlation_id(request)).await
    }

    async fn run(
        &self,
        catalog: Arc<ConfigCatalog>,
        selected: &[ProviderId],
        request: &QuoteRequest,
        correlation_id: String,
    ) -> Result<AggregateOutcome, EngineError> {
        let started = Instant::now();
        let product_id = &request.product_id;
        info!(
            event_name = "engine.aggregate.started",
            correlation_id = %correlation_id,
            product_id = %product_id,
            providers = selected.len(),
            catalog_fingerprint = %catalog.fingerprint(),
            "aggregation started"
        );

        let mut failures = Vec::new();
        let mut prepared = Vec::with_capacity(selected.len());
        let default_timeout = self.settings.default_timeout;
        for (index, provider_id) in selected.iter().enumerate() {
            let source_rank = index + 1;
            match prepare(&catalog, provider_id, source_rank, request, default_timeout) {
                Ok(call) => prepared.push(call),
                Err(ProviderError::Config(error)) if error.is_integrity_violation() => {
                    error!(
                        event_name = "engine.mapping.integrity_violation",
                        correlation_id = %correlation_id,
                        product_id = %product_id,
                        provider_id = %provider_id,
                        error = %error,
                        "mapping integrity violation"
                    );
                    return Err(error.into());
                }
                Err(error) => {
                    failures.push(record_failure(&correlation_id, provider_id, source_rank, error))
                }
            }
        }

        if prepared.is_empty() {
            warn!(
                event_name = "engine.aggregate.no_eligible_providers",
                correlation_id = %correlation_id,
                product_id = %product_id,
                rejected = failures.len(),
                "no usable providers for request"
            );
            return Err(ConfigError::NoEligibleProviders { product_id: product_id.clone(), failures }
                .into());
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        // Never cut a provider off before its own timeout.
        let budget = prepared
            .iter()
            .map(|call| call.timeout)
            .fold(self.settings.global_timeout, Duration::max);
        let deadline = started + budget;
        debug!(
            event_name = "engine.aggregate.dispatched",
            correlation_id = %correlation_id,
            providers = prepared.len(),
            deadline_ms = millis(budget),
            "provider calls dispatched"
        );
        let mut guard = TaskGuard(Vec::with_capacity(prepared.len()));
        let mut pending = Vec::with_capacity(prepared.len());
        for call in prepared {
            let source_rank = call.source_rank;
            let provider_id = call.provider.record.provider_id.clone();
            let handle = tokio::spawn(invoke_and_normalize(
                call,
                Arc::clone(&self.invoker),
                Arc::clone(&semaphore),
                Arc::clone(&catalog),
                correlation_id.clone(),
            ));
            guard.0.push(handle.abort_handle());
            pending.push((source_rank, provider_id, handle));
        }

        let mut quotes = Vec::with_capacity(pending.len());
        for (source_rank, provider_id, mut handle) in pending {
            let result = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => Err(ProviderError::Aborted { detail: join_error.to_string() }),
                Err(_) => {
                    handle.abort();
                    Err(ProviderError::Timeout { timeout_ms: millis(budget) })
                }
            };

            match result {
                Ok(quote) => {
                    debug!(
                        event_name = "engine.provider.quoted",
                        correlation_id = %correlation_id,
                        provider_id = %provider_id,
                        source_rank,
                        premium = %quote.premium,
                        response_time_ms = quote.response_time_ms,
                        "provider quote normalized"
                    );
                    quotes.push(quote);
                }
                Err(error) => {
                    failures.push(record_failure(&correlation_id, &provider_id, source_rank, error))
                }
            }
        }
        drop(guard);

        failures.sort_by_key(|failure| failure.source_rank);
        info!(
            event_name = "engine.aggregate.completed",
            correlation_id = %correlation_id,
            product_id = %product_id,
            quotes = quotes.len(),
            failures = failures.len(),
            elapsed_ms = millis(started.elapsed()),
            "aggregation completed"
        );

        Ok(AggregateOutcome {
            correlation_id,
            product_id: product_id.clone(),
            catalog_fingerprint: catalog.fingerprint().to_string(),
            quotes,
            failures,
        })
    }
}

fn correlation_id(request: &QuoteRequest) -> String {
    request.correlation_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn prepare(
    catalog: &ConfigCatalog,
    provider_id: &ProviderId,
    source_rank: usize,
    request: &QuoteRequest,
    default_timeout: Duration,
) -> Result<PreparedCall, ProviderError> {
    let provider = catalog
        .provider(provider_id)
        .ok_or_else(|| ConfigError::UnknownProvider { provider_id: provider_id.clone() })?;
    let mapping = catalog.resolve(&request.product_id, provider_id)?;
    let payload = build_request(&request.fields, &mapping)?;
    let timeout = provider
        .record
        .timeout_ms
        .filter(|timeout_ms| *timeout_ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(default_timeout);

    Ok(PreparedCall { source_rank, provider: provider.clone(), mapping, payload, timeout })
}

fn record_failure(
    correlation_id: &str,
    provider_id: &ProviderId,
    source_rank: usize,
    error: ProviderError,
) -> ProviderFailure {
    let failure = ProviderFailure::new(provider_id.clone(), source_rank, error);
    warn!(
        event_name = "engine.provider.failed",
        correlation_id = %correlation_id,
        provider_id = %provider_id,
        source_rank,
        code = failure.code,
        reason = %failure.reason,
        "provider excluded from aggregation"
    );
    failure
}

async fn invoke_and_normalize(
    call: PreparedCall,
    invoker: Arc<dyn ProviderInvoker>,
    semaphore: Arc<Semaphore>,
    catalog: Arc<ConfigCatalog>,
    correlation_id: String,
) -> Result<Quote, ProviderError> {
    let PreparedCall { source_rank, provider, mapping, payload, timeout } = call;
    let record = provider.record;

    let permit = semaphore
        .acquire_owned()
        .await
        .map_err(|error| ProviderError::Aborted { detail: error.to_string() })?;
    let started = Instant::now();
    let provider_call = ProviderCall {
        correlation_id,
        provider_id: record.provider_id.clone(),
        endpoint: record.endpoint.clone(),
        response_format: record.response_format,
        payload,
        timeout,
    };

    let body = match tokio::time::timeout(timeout, invoker.invoke(provider_call)).await {
        Ok(Ok(body)) => body,
        Ok(Err(InvocationError::Timeout)) | Err(_) => {
            return Err(ProviderError::Timeout { timeout_ms: millis(timeout) })
        }
        Ok(Err(InvocationError::Transport(detail))) => {
            return Err(ProviderError::Transport { detail })
        }
    };
    let response_time_ms = millis(started.elapsed());
    drop(permit);

    let body = match (provider.pre_parser.as_ref(), record.adapter_ref.as_deref()) {
        (Some(pre_parser), Some(adapter)) => pre_parser.prepare(body).map_err(|detail| {
            NormalizeError::from(FormatError::PreParse { adapter: adapter.to_string(), detail })
        })?,
        _ => body,
    };

    let normalized = normalize(&body, record.response_format, &mapping, catalog.transforms())?;
    Ok(normalized.into_quote(record.provider_id, source_rank, response_time_ms))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use super::QuoteEngine;
    use crate::domain::provider::ProviderId;
    use crate::domain::quote::{CanonicalFields, QuoteRequest};
    use crate::domain::RecordStatus;
    use crate::engine::invoker::{InvocationError, ProviderCall, ProviderInvoker};
    use crate::engine::EngineSettings;
    use crate::errors::{ConfigError, EngineError};
    use crate::mapping::catalog::{ConfigCatalog, ConfigRecords};
    use crate::mapping::format::PreParserRegistry;
    use crate::mapping::transform::TransformRegistry;

    const CLIENT_CSV: &[u8] = b"quote_id,premium,coverage_amt,term_months\nCL-100,1299.50,25000,36\n";
    const ROUTE66_JSON: &[u8] =
        br#"{"quoteId":"R66-7","pricing":{"premium":"1199.99","coverage":25000},"terms":{"months":36}}"#;
    const APCO_XML: &[u8] = b"\xEF\xBB\xBF<QuoteResponse><QuoteID>APCO-1</QuoteID><Premium>1099.00</Premium><Term>24</Term></QuoteResponse>\n";

    #[derive(Clone)]
    enum Reply {
        Body(&'static [u8]),
        Delayed(Duration, &'static [u8]),
        Hang,
        Fail(&'static str),
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct ScriptedInvoker {
        replies: HashMap<ProviderId, Reply>,
        calls: Mutex<Vec<ProviderCall>>,
        abandoned: Arc<AtomicUsize>,
    }

    impl ScriptedInvoker {
        fn new(replies: &[(&str, Reply)]) -> Self {
            Self {
                replies: replies.iter().map(|(id, reply)| (ProviderId::from(*id), reply.clone())).collect(),
                ..Self::default()
            }
        }

        fn payload_for(&self, provider: &str) -> Option<Value> {
            self.calls
                .lock()
                .expect("calls lock")
                .iter()
                .find(|call| call.provider_id.as_str() == provider)
                .map(|call| call.payload.clone())
        }
    }

    #[async_trait]
    impl ProviderInvoker for ScriptedInvoker {
        async fn invoke(&self, call: ProviderCall) -> Result<Vec<u8>, InvocationError> {
            let reply = self.replies.get(&call.provider_id).cloned();
            self.calls.lock().expect("calls lock").push(call);

            match reply {
                Some(Reply::Body(body)) => Ok(body.to_vec()),
                Some(Reply::Delayed(delay, body)) => {
                    tokio::time::sleep(delay).await;
                    Ok(body.to_vec())
                }
                Some(Reply::Hang) => {
                    let _abandoned = DropCounter(Arc::clone(&self.abandoned));
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(InvocationError::Timeout)
                }
                Some(Reply::Fail(detail)) => Err(InvocationError::Transport(detail.to_string())),
                None => Err(InvocationError::Transport("no reply scripted".to_string())),
            }
        }
    }

    fn records() -> ConfigRecords {
        serde_json::from_value(json!({
            "clients": [
                { "clientId": "CLI001", "clientName": "Test Client 1", "status": "ACTIVE" },
                { "clientId": "CLI002", "clientName": "Test Client 2", "status": "ACTIVE" },
                { "clientId": "CLI003", "clientName": "Dormant Client", "status": "INACTIVE" }
            ],
            "preferences": [
                {
                    "clientId": "CLI002",
                    "blockedProviders": ["PROV-CLIENT"],
                    "preferredProviders": ["PROV-APCO"]
                }
            ],
            "products": [
                { "productId": "PROD-MBP-001", "productType": "MBP", "basePremium": "1299.99" }
            ],
            "providers": [
                { "providerId": "PROV-CLIENT", "endpoint": "fixture://client", "responseFormat": "CSV" },
                { "providerId": "PROV-ROUTE66", "endpoint": "fixture://route66", "responseFormat": "JSON" },
                {
                    "providerId": "PROV-APCO",
                    "endpoint": "fixture://apco",
                    "responseFormat": "XML",
                    "adapterRef": "strip-bom"
                }
            ],
            "mappings": [
                {
                    "productId": "PROD-MBP-001",
                    "providerId": "PROV-CLIENT",
                    "version": 1,
                    "active": true,
                    "mappingConfig": {
                        "request": { "vin": "vin_number", "mileage": "odometer" },
                        "constants": { "product_code": "MBP" },
                        "response": {
                            "quoteId": "rows.0.quote_id",
                            "premium": "rows.0.premium",
                            "coverageAmount": "rows.0.coverage_amt",
                            "term": "rows.0.term_months"
                        },
                        "transformations": { "premium": "toFloat", "term": "toInt" }
                    }
                },
                {
                    "productId": "PROD-MBP-001",
                    "providerId": "PROV-ROUTE66",
                    "version": 1,
                    "active": true,
                    "mappingConfig": {
                        "request": { "vin": "vehicle.vin", "mileage": "vehicle.mileage" },
                        "response": {
                            "quoteId": "quoteId",
                            "premium": "pricing.premium",
                            "coverageAmount": "pricing.coverage",
                            "term": "terms.months"
                        },
                        "transformations": { "premium": "parseFloat" }
                    }
                },
                {
                    "productId": "PROD-MBP-001",
                    "providerId": "PROV-APCO",
                    "version": 1,
                    "active": true,
                    "mappingConfig": {
                        "request": {
                            "vin": "Vehicle.VIN",
                            "mileage": "Vehicle.Odometer",
                            "state": { "path": "Applicant.State", "required": true }
                        },
                        "response": {
                            "quoteId": "QuoteResponse.QuoteID",
                            "premium": "QuoteResponse.Premium",
                            "term": "QuoteResponse.Term"
                        },
                        "transformations": { "premium": "parseFloat", "term": "parseInt" }
                    }
                }
            ]
        }))
        .expect("fixture records")
    }

    fn compile(records: ConfigRecords) -> ConfigCatalog {
        ConfigCatalog::compile(
            records,
            Arc::new(TransformRegistry::default()),
            &PreParserRegistry::default(),
        )
        .expect("fixture catalog")
    }

    fn settings(default_timeout_ms: u64, global_timeout_ms: u64) -> EngineSettings {
        EngineSettings {
            default_timeout: Duration::from_millis(default_timeout_ms),
            global_timeout: Duration::from_millis(global_timeout_ms),
            max_concurrency: 8,
        }
    }

    fn engine(
        records: ConfigRecords,
        replies: &[(&str, Reply)],
        settings: EngineSettings,
    ) -> (QuoteEngine, Arc<ScriptedInvoker>) {
        let invoker = Arc::new(ScriptedInvoker::new(replies));
        let engine = QuoteEngine::new(compile(records), invoker.clone(), settings);
        (engine, invoker)
    }

    fn all_replying() -> Vec<(&'static str, Reply)> {
        vec![
            ("PROV-CLIENT", Reply::Body(CLIENT_CSV)),
            ("PROV-ROUTE66", Reply::Body(ROUTE66_JSON)),
            ("PROV-APCO", Reply::Body(APCO_XML)),
        ]
    }

    fn fields(value: Value) -> CanonicalFields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn request(client: &str) -> QuoteRequest {
        let mut request = QuoteRequest::new(
            client.into(),
            "PROD-MBP-001".into(),
            fields(json!({ "vin": "1HGCM82633A004352", "mileage": 42000, "state": "TX" })),
        );
        request.correlation_id = Some("corr-test".to_string());
        request
    }

    fn provider_ids(outcome: &crate::domain::quote::AggregateOutcome) -> Vec<&str> {
        outcome.quotes.iter().map(|quote| quote.provider_id.as_str()).collect()
    }

    #[tokio::test]
    async fn quotes_from_three_formats_keep_source_rank() {
        let (engine, invoker) = engine(records(), &all_replying(), settings(1_000, 5_000));

        let outcome = engine.quote(request("CLI001")).await.expect("outcome");

        assert_eq!(outcome.correlation_id, "corr-test");
        assert!(outcome.is_complete());
        assert_eq!(provider_ids(&outcome), vec!["PROV-CLIENT", "PROV-ROUTE66", "PROV-APCO"]);
        let ranks: Vec<usize> = outcome.quotes.iter().map(|quote| quote.source_rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert_eq!(outcome.quotes[0].premium, Decimal::new(129_950, 2));
        assert_eq!(outcome.quotes[1].premium, Decimal::new(119_999, 2));
        assert_eq!(outcome.quotes[2].term, Some(24));
        assert_eq!(outcome.cheapest().map(|quote| quote.quote_id.as_str()), Some("APCO-1"));

        assert_eq!(
            invoker.payload_for("PROV-CLIENT"),
            Some(json!({ "product_code": "MBP", "vin_number": "1HGCM82633A004352", "odometer": 42000 }))
        );
        assert_eq!(
            invoker.payload_for("PROV-APCO"),
            Some(json!({
                "Vehicle": { "VIN": "1HGCM82633A004352", "Odometer": 42000 },
                "Applicant": { "State": "TX" }
            }))
        );
    }

    #[tokio::test]
    async fn one_timeout_among_three_providers_is_a_failure_not_an_abort() {
        let (engine, invoker) = engine(
            records(),
            &[
                ("PROV-CLIENT", Reply::Body(CLIENT_CSV)),
                ("PROV-ROUTE66", Reply::Hang),
                ("PROV-APCO", Reply::Body(APCO_XML)),
            ],
            settings(50, 5_000),
        );

        let outcome = engine.quote(request("CLI001")).await.expect("partial outcome");

        assert_eq!(outcome.quotes.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        let failure = &outcome.failures[0];
        assert_eq!(failure.provider_id.as_str(), "PROV-ROUTE66");
        assert_eq!(failure.source_rank, 2);
        assert_eq!(failure.code, "timeout");
        assert_eq!(invoker.abandoned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn global_deadline_times_out_providers_still_queued() {
        let (engine, _invoker) = engine(
            records(),
            &[
                ("PROV-CLIENT", Reply::Body(CLIENT_CSV)),
                ("PROV-ROUTE66", Reply::Hang),
                ("PROV-APCO", Reply::Hang),
            ],
            EngineSettings { max_concurrency: 1, ..settings(100, 150) },
        );

        let outcome = engine.quote(request("CLI001")).await.expect("partial outcome");

        assert_eq!(provider_ids(&outcome), vec!["PROV-CLIENT"]);
        let reasons: Vec<&str> = outcome.failures.iter().map(|failure| failure.reason.as_str()).collect();
        assert_eq!(
            reasons,
            vec!["provider timed out after 100ms", "provider timed out after 150ms"]
        );
    }

    #[tokio::test]
    async fn provider_timeout_above_the_global_deadline_is_honoured() {
        let mut records = records();
        records.providers[1].timeout_ms = Some(400);
        let (engine, _invoker) = engine(
            records,
            &[("PROV-ROUTE66", Reply::Delayed(Duration::from_millis(150), ROUTE66_JSON))],
            settings(50, 100),
        );

        let outcome = engine
            .aggregate(&[ProviderId::from("PROV-ROUTE66")], &request("CLI001"))
            .await
            .expect("outcome");

        assert_eq!(provider_ids(&outcome), vec!["PROV-ROUTE66"]);
        assert!(outcome.failures.is_empty(), "unexpected failures: {:?}", outcome.failures);
    }

    #[tokio::test]
    async fn cancellation_aborts_outstanding_provider_tasks() {
        let (engine, invoker) = engine(
            records(),
            &[
                ("PROV-CLIENT", Reply::Hang),
                ("PROV-ROUTE66", Reply::Hang),
                ("PROV-APCO", Reply::Hang),
            ],
            settings(10_000, 10_000),
        );
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = engine.quote_with_cancellation(request("CLI001"), token).await;
        assert_eq!(result, Err(EngineError::Cancelled));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(invoker.abandoned.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn multiple_active_mappings_fail_the_whole_call() {
        let mut records = records();
        let mut duplicate = records.mappings[1].clone();
        duplicate.version = 2;
        records.mappings.push(duplicate);
        let (engine, _invoker) = engine(records, &all_replying(), settings(1_000, 5_000));

        let error = engine.quote(request("CLI001")).await.expect_err("integrity violation");

        assert!(matches!(
            error,
            EngineError::Config(ConfigError::MultipleActiveMappings { ref versions, .. })
                if versions == &vec![1, 2]
        ));
    }

    #[tokio::test]
    async fn missing_canonical_field_fails_only_providers_that_need_it() {
        let (engine, invoker) = engine(records(), &all_replying(), settings(1_000, 5_000));
        let mut partial = request("CLI001");
        partial.fields.remove("state");

        let outcome = engine.quote(partial).await.expect("outcome");
        assert_eq!(provider_ids(&outcome), vec!["PROV-CLIENT", "PROV-ROUTE66"]);
        assert_eq!(outcome.failures[0].code, "missing_canonical_field");
        assert_eq!(outcome.failures[0].source_rank, 3);
        assert_eq!(invoker.payload_for("PROV-APCO"), None);

        let mut empty = request("CLI001");
        empty.fields.clear();
        let error = engine.quote(empty).await.expect_err("no usable providers");
        assert!(matches!(
            error,
            EngineError::Config(ConfigError::NoEligibleProviders { ref failures, .. }) if failures.len() == 3
        ));
    }

    #[tokio::test]
    async fn provider_failures_are_isolated_and_ordered_by_rank() {
        let (engine, _invoker) = engine(
            records(),
            &[
                ("PROV-CLIENT", Reply::Body(b"quote_id,premium\nCL-1,10,extra\n")),
                ("PROV-ROUTE66", Reply::Fail("connection refused")),
                ("PROV-APCO", Reply::Body(APCO_XML)),
            ],
            settings(1_000, 5_000),
        );

        let outcome = engine.quote(request("CLI001")).await.expect("outcome");

        assert_eq!(provider_ids(&outcome), vec!["PROV-APCO"]);
        let codes: Vec<&str> = outcome.failures.iter().map(|failure| failure.code).collect();
        assert_eq!(codes, vec!["malformed_response", "transport"]);
        assert_eq!(outcome.failures[1].reason, "provider transport failure: connection refused");
    }

    #[tokio::test]
    async fn preferences_decide_eligibility_and_rank() {
        let (engine, _invoker) = engine(records(), &all_replying(), settings(1_000, 5_000));

        let outcome = engine.quote(request("CLI002")).await.expect("outcome");
        assert_eq!(provider_ids(&outcome), vec!["PROV-APCO", "PROV-ROUTE66"]);
        assert_eq!(outcome.quotes[0].source_rank, 1);

        assert_eq!(
            engine.quote(request("CLI003")).await,
            Err(EngineError::Config(ConfigError::ClientInactive { client_id: "CLI003".into() }))
        );
        assert_eq!(
            engine.quote(request("CLI404")).await,
            Err(EngineError::Config(ConfigError::UnknownClient { client_id: "CLI404".into() }))
        );
    }

    #[tokio::test]
    async fn explicit_provider_list_is_aggregated_in_given_order() {
        let (engine, _invoker) = engine(records(), &all_replying(), settings(1_000, 5_000));
        let selected = vec![ProviderId::from("PROV-ROUTE66"), ProviderId::from("PROV-UNKNOWN")];

        let outcome = engine.aggregate(&selected, &request("CLI001")).await.expect("outcome");

        assert_eq!(provider_ids(&outcome), vec!["PROV-ROUTE66"]);
        assert_eq!(outcome.failures[0].code, "unknown_provider");
        assert_eq!(outcome.failures[0].source_rank, 2);

        let error = engine.aggregate(&[], &request("CLI001")).await.expect_err("empty selection");
        assert!(matches!(error, EngineError::Config(ConfigError::NoEligibleProviders { .. })));
    }

    #[tokio::test]
    async fn replaced_catalog_applies_to_later_calls() {
        let (engine, _invoker) = engine(records(), &all_replying(), settings(1_000, 5_000));
        let before = engine.snapshot().await;

        let mut updated = records();
        updated.providers[1].status = RecordStatus::Inactive;
        let previous = engine.replace_catalog(compile(updated)).await;

        assert_eq!(previous.fingerprint(), before.fingerprint());
        let eligible = engine
            .eligible_providers(&"CLI001".into(), &"PROD-MBP-001".into())
            .await
            .expect("eligible");
        assert_eq!(eligible, vec![ProviderId::from("PROV-CLIENT"), ProviderId::from("PROV-APCO")]);

        let outcome = engine.quote(request("CLI001")).await.expect("outcome");
        assert_ne!(outcome.catalog_fingerprint, before.fingerprint());
    }
}
