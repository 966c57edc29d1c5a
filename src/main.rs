use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod constants;
mod domain;
mod error;
mod logging;
mod observability;
mod pipeline;
mod registry;
mod server;
mod serving;

use crate::config::Config;
use crate::pipeline::tasks::{
    ingest_run, promote_run, train_run, IngestParams, PromoteParams, TrainParams,
};
use crate::registry::{ModelBundle, ModelRegistry, PromotionConfig};
use crate::server::AppState;

#[derive(Parser)]
#[command(name = "auction_pricer")]
#[command(about = "Property-auction price prediction pipeline and serving")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse both sources and write the normalized dataset snapshot
    Ingest {
        /// Bulk auction listing file (source A)
        #[arg(long)]
        baanknet_file: Option<String>,
        /// Directory of per-property detail files (source B)
        #[arg(long)]
        property_details_dir: Option<String>,
        /// Output NDJSON path
        #[arg(long)]
        output: Option<String>,
    },
    /// Fit frozen statistics, train the estimator, write a model bundle
    Train {
        /// Normalized NDJSON snapshot to train on
        #[arg(long)]
        input: Option<String>,
        /// Bundle artifact output path
        #[arg(long)]
        output: Option<String>,
        /// Ridge regularization strength
        #[arg(long)]
        l2: Option<f64>,
    },
    /// Evaluate a challenger bundle and promote it through the gate
    Promote {
        /// Challenger bundle artifact
        #[arg(long)]
        bundle: String,
        /// Normalized NDJSON the held-out set is derived from
        #[arg(long)]
        input: Option<String>,
    },
    /// Serve predictions over HTTP
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
        /// Bundle to install as the initial champion
        #[arg(long)]
        bundle: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    logging::init_logging();
    observability::init_metrics();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Ingest {
            baanknet_file,
            property_details_dir,
            output,
        } => {
            println!("🔄 Running ingestion...");
            let params = IngestParams {
                baanknet_file,
                property_details_dir,
                output,
            };
            match ingest_run(&config, params).await {
                Ok(summary) => {
                    println!("\n📊 Ingestion results:");
                    println!("   Baanknet records:         {}", summary.baanknet_records);
                    println!(
                        "   Property-details records: {}",
                        summary.property_details_records
                    );
                    println!("   Skipped:                  {}", summary.skipped);
                    println!("   Mapping failures:         {}", summary.mapping_failures);
                    println!("   Written:                  {}", summary.written_records);
                    println!("   Output file:              {}", summary.output_file);
                    if !summary.missing_by_field.is_empty() {
                        println!("\n   Missing values per field:");
                        for (field, count) in &summary.missing_by_field {
                            println!("   - {field}: {count}");
                        }
                    }
                }
                Err(e) => {
                    error!("Ingestion failed: {e}");
                    return Err(e.into());
                }
            }
        }
        Commands::Train { input, output, l2 } => {
            println!("🧮 Training model...");
            let params = TrainParams {
                input,
                output,
                l2,
                holdout_fraction: None,
            };
            match train_run(&config, params).await {
                Ok(summary) => {
                    println!("\n📦 Bundle sealed:");
                    println!("   Bundle id:      {}", summary.bundle_id);
                    println!("   Schema version: {}", summary.schema_version);
                    println!("   Train rows:     {}", summary.train_rows);
                    println!("   Held-out rows:  {}", summary.holdout_rows);
                    println!("   RMSE:           {:.2}", summary.rmse);
                    println!("   MAE:            {:.2}", summary.mae);
                    println!("   Artifact:       {}", summary.bundle_file);
                }
                Err(e) => {
                    error!("Training failed: {e}");
                    return Err(e.into());
                }
            }
        }
        Commands::Promote { bundle, input } => {
            println!("⚖️  Evaluating challenger...");
            let registry = bootstrap_registry(&config, None)?;
            let params = PromoteParams {
                bundle,
                input,
                holdout_fraction: None,
            };
            match promote_run(&registry, &config, params).await {
                Ok(summary) => {
                    println!("\n🏆 Challenger promoted:");
                    println!("   New champion:   {}", summary.challenger_id);
                    println!("   Challenger RMSE: {:.2}", summary.challenger_rmse);
                    if let Some(old) = summary.champion_rmse {
                        println!("   Old champion RMSE: {old:.2}");
                    }
                }
                Err(e) => {
                    // Rejection keeps the champion; report it without a stack.
                    println!("⚠️  {e}");
                }
            }
        }
        Commands::Serve { port, bundle } => {
            println!("🌐 Starting prediction service...");
            let registry = bootstrap_registry(&config, bundle.as_deref())?;
            let port = port.unwrap_or(config.server.port);
            let state = Arc::new(AppState::new(config, registry));
            server::start_server(state, port).await?;
        }
    }

    Ok(())
}

/// Build the registry and, when a bundle artifact is available, install it
/// as the initial champion.
fn bootstrap_registry(
    config: &Config,
    bundle_path: Option<&str>,
) -> Result<Arc<ModelRegistry>, Box<dyn std::error::Error>> {
    let registry = Arc::new(ModelRegistry::new(PromotionConfig {
        min_rmse_margin: config.promotion.min_rmse_margin,
    }));

    let path = bundle_path
        .map(str::to_string)
        .unwrap_or_else(|| config.data.bundle_file());
    if Path::new(&path).exists() {
        let bundle = ModelBundle::load(Path::new(&path))?;
        info!(
            "loaded champion bundle {} (schema {})",
            bundle.bundle_id, bundle.schema_version
        );
        registry.install_champion(bundle)?;
        println!("📦 Champion loaded from {path}");
    } else {
        println!("ℹ️  No bundle at {path}; serving will reject requests until one is promoted");
    }
    Ok(registry)
}
