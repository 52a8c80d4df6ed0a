//! Obesity classifier prediction CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use obesity_core::ObesityLevel;
use obesity_registry::{ModelRegistry, RegistryStorage};
use obesity_service::{parse_json_records, read_records, InferencePipeline, ServiceConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "obesity-predict")]
#[command(about = "Classify records with the active obesity model", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Model name (overrides config)
    #[arg(long)]
    name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict from a JSON record or a CSV/JSON file
    Predict {
        /// Inline JSON object or array
        #[arg(long, conflicts_with = "input")]
        json: Option<String>,
        /// CSV or JSON file
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Check a CSV batch for drift against the training profile
    Drift {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Report readiness of the active model
    Health,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ServiceConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(name) = cli.name {
        config.model_name = name;
    }
    init_logging(&config)?;

    let pipeline = open_pipeline(&config)?;

    match cli.command {
        Commands::Predict { json, input } => {
            let records = match (json, input) {
                (Some(text), None) => parse_json_records(&text)?,
                (None, Some(path)) => load_records(&pipeline, &path)?,
                _ => bail!("pass either --json or --input"),
            };
            let predictions = pipeline.predict_batch(&records)?;
            for prediction in &predictions {
                println!("{}", serde_json::to_string(prediction)?);
            }
            if let Some(first) = predictions.first() {
                info!(
                    model = %first.model_name,
                    version = %first.model_version,
                    records = predictions.len(),
                    obese_share = share(&predictions, ObesityLevel::Obese),
                    "Predictions written"
                );
            }
            Ok(())
        }
        Commands::Drift { input } => {
            let records = load_records(&pipeline, &input)?;
            let report = pipeline.check_drift(&records)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Health => {
            let report = pipeline.health();
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_ready() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn open_pipeline(config: &ServiceConfig) -> Result<InferencePipeline> {
    let storage = RegistryStorage::filesystem(&config.registry_dir)
        .with_context(|| format!("Failed to open registry at {}", config.registry_dir.display()))?;
    let registry = ModelRegistry::open(storage).context("Failed to load registry")?;
    Ok(InferencePipeline::new(Arc::new(registry), config.model_name.clone())
        .with_rules(config.rules.clone())
        .with_drift_validator(config.drift_validator()?))
}

fn load_records(pipeline: &InferencePipeline, path: &Path) -> Result<Vec<obesity_core::Record>> {
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    if is_json {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok(parse_json_records(&text)?);
    }
    let schema = pipeline.input_schema().ok();
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(read_records(file, schema.as_ref())?)
}

fn share(predictions: &[obesity_service::Prediction], level: ObesityLevel) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    predictions.iter().filter(|p| p.label == level).count() as f64 / predictions.len() as f64
}

fn init_logging(config: &ServiceConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .context("Failed to set tracing subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init()
            .context("Failed to set tracing subscriber")?;
    }

    Ok(())
}
