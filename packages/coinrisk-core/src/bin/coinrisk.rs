//! CoinRisk CLI - Command line interface for portfolio risk analysis.
//!
//! Every command prints a JSON `ApiResponse` envelope on stdout. Logs go to
//! stderr and are controlled with `RUST_LOG`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use coinrisk_core::portfolio::{assign_weights, weight_sum_deviation};
use coinrisk_core::snapshot::load_positions;
use coinrisk_core::{ApiResponse, Position, PriceTable, RiskConfig, RiskEngine};

/// Reported weights further than this from summing to one are recomputed.
const WEIGHT_TOLERANCE: f64 = 1e-3;

#[derive(Parser)]
#[command(name = "coinrisk")]
#[command(about = "CoinRisk CLI - portfolio risk metrics, stress tests and optimization")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $COINRISK_CONFIG_FILE or ~/.coinrisk/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calculate the full risk report
    Risk {
        /// JSON array of positions
        #[arg(short, long)]
        positions: PathBuf,
        /// JSON array of historical price points
        #[arg(short = 'r', long)]
        prices: PathBuf,
    },
    /// Run the stress scenarios against current prices
    Stress {
        /// JSON array of positions
        #[arg(short, long)]
        positions: PathBuf,
    },
    /// List the built-in stress scenarios
    Scenarios,
    /// Optimize portfolio weights for minimum variance
    Optimize {
        /// JSON array of positions
        #[arg(short, long)]
        positions: PathBuf,
        /// JSON array of historical price points
        #[arg(short = 'r', long)]
        prices: PathBuf,
        /// Annualized target return (e.g., 0.25)
        #[arg(short, long)]
        target_return: Option<f64>,
        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
    /// Calculate risk figures for each position
    PositionRisk {
        /// JSON array of positions
        #[arg(short, long)]
        positions: PathBuf,
        /// JSON array of historical price points
        #[arg(short = 'r', long)]
        prices: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let output = match run(cli).await {
        Ok(output) => output,
        Err(e) => render(&ApiResponse::<()>::err(e.to_string())),
    };

    println!("{}", output);
}

async fn run(cli: Cli) -> coinrisk_core::Result<String> {
    let config = match &cli.config {
        Some(path) => RiskConfig::load_from_path(path)?,
        None => RiskConfig::load()?,
    };
    let engine = RiskEngine::new(config);

    let output = match cli.command {
        Commands::Risk { positions, prices } => {
            let positions = read_positions(&positions)?;
            let prices = PriceTable::load_json(&prices)?;
            render(&ApiResponse::ok(
                engine.calculate_portfolio_risk(&positions, &prices),
            ))
        }
        Commands::Stress { positions } => {
            let positions = read_positions(&positions)?;
            render(&ApiResponse::ok(json!({
                "stress_test_results": engine.run_stress_tests(&positions),
            })))
        }
        Commands::Scenarios => render(&ApiResponse::ok(json!({
            "scenarios": engine.scenarios(),
            "asset_classes": engine.config().asset_classes,
        }))),
        Commands::Optimize {
            positions,
            prices,
            target_return,
            timeout_secs,
        } => {
            let positions = read_positions(&positions)?;
            let prices = Arc::new(PriceTable::load_json(&prices)?);
            let result = Arc::new(engine)
                .optimize_weights_with_timeout(
                    positions,
                    prices,
                    target_return,
                    Duration::from_secs(timeout_secs),
                )
                .await;
            render(&ApiResponse::ok(result))
        }
        Commands::PositionRisk { positions, prices } => {
            let positions = read_positions(&positions)?;
            let prices = PriceTable::load_json(&prices)?;
            let risks: Vec<_> = positions
                .iter()
                .map(|p| engine.position_risk(p, &prices))
                .collect();
            render(&ApiResponse::ok(json!({
                "positions": risks,
            })))
        }
    };

    Ok(output)
}

/// Load positions, recomputing weights when the reported ones don't add up.
fn read_positions(path: &Path) -> coinrisk_core::Result<Vec<Position>> {
    let positions = load_positions(path)?;
    if !positions.is_empty() && weight_sum_deviation(&positions) > WEIGHT_TOLERANCE {
        warn!(
            path = %path.display(),
            "position weights do not sum to one; recomputing from market values"
        );
        return Ok(assign_weights(&positions));
    }
    Ok(positions)
}

fn render<T: Serialize>(response: &ApiResponse<T>) -> String {
    serde_json::to_string_pretty(response).unwrap_or_else(|e| {
        format!(
            r#"{{"ok":false,"error":"failed to serialize response: {}"}}"#,
            e.to_string().replace('"', "'")
        )
    })
}
