//! Proposal Hydration - command line front end
//!
//! Hydrates wizard records, builds write payloads and applies them, reading
//! records, catalogs and edits from JSON files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proposal_hydration::{
    store::apply_payload, HydrationConfig, HydrationEngine, InMemoryCatalog, Record,
    StepSnapshot, WritePayload,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "proposal-hydration")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Multi-source hydration and write-merge engine for proposal wizards")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PROPOSAL_HYDRATION_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hydrate a record into per-step views
    Hydrate {
        /// Record JSON file
        #[arg(short, long)]
        record: PathBuf,

        /// Catalog JSON file (entity type -> known ids)
        #[arg(long)]
        catalog: PathBuf,

        /// Only print this step
        #[arg(short, long)]
        step: Option<u32>,
    },

    /// Build the write payload for an edit
    Payload {
        /// Record JSON file
        #[arg(short, long)]
        record: PathBuf,

        /// Catalog JSON file (entity type -> known ids)
        #[arg(long)]
        catalog: PathBuf,

        /// Step being saved
        #[arg(short, long)]
        step: u32,

        /// Edit JSON file
        #[arg(short, long)]
        edit: PathBuf,
    },

    /// Apply a write payload to a record
    Apply {
        /// Record JSON file
        #[arg(short, long)]
        record: PathBuf,

        /// Payload JSON file
        #[arg(short, long)]
        payload: PathBuf,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays valid JSON
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("proposal_hydration={}", log_level).into()),
        )
        .with(
            cli.log_json
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!cli.log_json)
                .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Hydrate {
            record,
            catalog,
            step,
        } => {
            run_hydrate(config, &record, &catalog, step).await?;
        }
        Commands::Payload {
            record,
            catalog,
            step,
            edit,
        } => {
            run_payload(config, &record, &catalog, step, &edit).await?;
        }
        Commands::Apply { record, payload } => {
            run_apply(&config, &record, &payload)?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

/// Explicit path, else the default location when present, else built-ins
fn load_config(path: Option<PathBuf>) -> Result<HydrationConfig> {
    let path = match path {
        Some(path) => path,
        None => {
            let default = HydrationConfig::default_path();
            if !default.exists() {
                return Ok(HydrationConfig::default());
            }
            default
        }
    };

    tracing::debug!(path = %path.display(), "Loading configuration");
    HydrationConfig::from_file(&path)
        .with_context(|| format!("Failed to load config {}", path.display()))
}

async fn build_engine(config: HydrationConfig, catalog: &Path) -> Result<HydrationEngine> {
    let catalog = InMemoryCatalog::load(catalog)
        .await
        .with_context(|| format!("Failed to load catalog {}", catalog.display()))?;
    Ok(HydrationEngine::new(config, Arc::new(catalog))?)
}

async fn run_hydrate(
    config: HydrationConfig,
    record: &Path,
    catalog: &Path,
    step: Option<u32>,
) -> Result<()> {
    let engine = build_engine(config, catalog).await?;
    let record: Record = read_json(record)?;
    let hydration = engine.hydrate(&record).await;

    let output = match step {
        Some(step) => serde_json::json!({
            "step": step,
            "view": hydration.view(step),
            "report": hydration.report(step),
        }),
        None => serde_json::to_value(&hydration)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_payload(
    config: HydrationConfig,
    record: &Path,
    catalog: &Path,
    step: u32,
    edit: &Path,
) -> Result<()> {
    let engine = build_engine(config, catalog).await?;
    let record: Record = read_json(record)?;
    let edit: StepSnapshot = read_json(edit)?;

    let payload = engine.build_write_payload(&record, step, &edit).await;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_apply(config: &HydrationConfig, record: &Path, payload: &Path) -> Result<()> {
    let mut record: Record = read_json(record)?;
    let payload: WritePayload = read_json(payload)?;

    apply_payload(&mut record, &payload, &config.layout);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn show_config(config: Option<&HydrationConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    println!("{}", config.to_toml_string()?);
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
