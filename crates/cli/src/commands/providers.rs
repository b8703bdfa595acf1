use serde::Serialize;

use iqq_core::domain::client::ClientId;
use iqq_core::domain::product::ProductId;
use iqq_core::domain::provider::ProviderId;
use iqq_core::engine::eligible_providers;

use crate::commands::{build_runtime, load_config, seeded_catalog, CommandFailure, CommandResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvidersOutput {
    client_id: ClientId,
    product_id: ProductId,
    providers: Vec<ProviderId>,
}

/// Lists the providers a client would be quoted by for a product, in rank order.
pub fn run(client_id: &str, product_id: &str) -> CommandResult {
    let config = match load_config("providers") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("providers") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let client_id = ClientId::new(client_id);
    let product_id = ProductId::new(product_id);
    let result = runtime.block_on(async {
        let seeded = seeded_catalog(&config).await?;
        let providers = eligible_providers(&seeded.catalog, &client_id, &product_id)
            .map_err(|error| (error.code(), error.to_string(), 7u8))?;
        Ok::<_, CommandFailure>(providers)
    });

    match result {
        Ok(providers) => {
            CommandResult::document("providers", &ProvidersOutput { client_id, product_id, providers })
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("providers", error_class, message, exit_code)
        }
    }
}
