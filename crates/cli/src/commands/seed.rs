use serde::Serialize;

use iqq_core::mapping::catalog::CatalogSummary;
use iqq_store::{SeedDataset, SeedResult};

use crate::commands::{build_runtime, load_config, seeded_catalog, CommandFailure, CommandResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SeedOutput {
    source: String,
    seeded: SeedResult,
    catalog: CatalogSummary,
    fingerprint: String,
}

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let seeded = seeded_catalog(&config).await?;

        // Custom seed files carry their own ids; only the embedded dataset has a contract.
        if config.store.seed_path.is_none() {
            let verification = SeedDataset::verify(&seeded.repository)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
            if !verification.all_present {
                let failed_checks = verification
                    .checks
                    .iter()
                    .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                    .collect::<Vec<_>>();
                return Err(("seed_verification", verification_message(&failed_checks), 6u8));
            }
        }

        let source = config
            .store
            .seed_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "embedded".to_string());
        Ok::<_, CommandFailure>(SeedOutput {
            source,
            seeded: seeded.seed,
            catalog: seeded.catalog.summary(),
            fingerprint: seeded.catalog.fingerprint().to_string(),
        })
    });

    match result {
        Ok(output) => CommandResult::document("seed", &output),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
