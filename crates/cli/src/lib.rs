pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "iqq",
    about = "Insurance quote aggregation operator CLI",
    long_about = "Inspect configuration, validate the seed catalog, and run dry-run quote aggregations against recorded provider responses.",
    after_help = "Examples:\n  iqq config\n  iqq seed\n  iqq providers --client CLI002 --product PROD-MBP-001\n  iqq quote --client CLI001 --product PROD-MBP-001 --field vin=1HGCM82633A004352 --responses demos/responses"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Load and verify the seed dataset, then compile it into a catalog")]
    Seed,
    #[command(about = "List eligible providers for a client and product in rank order")]
    Providers {
        #[arg(long)]
        client: String,
        #[arg(long)]
        product: String,
    },
    #[command(about = "Aggregate quotes using recorded provider responses")]
    Quote {
        #[arg(long)]
        client: String,
        #[arg(long)]
        product: String,
        #[arg(long = "field", value_name = "KEY=VALUE", help = "Canonical request field; repeatable")]
        fields: Vec<String>,
        #[arg(long, value_name = "DIR", help = "Directory holding <providerId>.<json|xml|csv> responses")]
        responses: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::config::run(),
        Command::Seed => commands::seed::run(),
        Command::Providers { client, product } => commands::providers::run(&client, &product),
        Command::Quote { client, product, fields, responses } => {
            commands::quote::run(&client, &product, &fields, &responses)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
