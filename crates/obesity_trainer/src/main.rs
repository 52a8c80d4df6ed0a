//! Obesity classifier training CLI
//!
//! Runs the training pipeline and manages registered model versions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use obesity_core::synthetic::{cohort, CohortSpec};
use obesity_core::ObesityLevel;
use obesity_registry::{ModelRegistry, RegistryStorage, VersionId};
use obesity_trainer::{JsonlTracker, Orchestrator, PipelineConfig, TrackingEvent};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "obesity-train")]
#[command(about = "Train, compare and promote obesity classification models", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full training pipeline
    Train {
        /// Input CSV (overrides config)
        #[arg(short, long)]
        data: Option<PathBuf>,
        /// Split and sampling seed (overrides config)
        #[arg(long)]
        seed: Option<u64>,
        /// Register the winner without promoting it
        #[arg(long)]
        no_promote: bool,
        /// Train strategies one at a time
        #[arg(long)]
        sequential: bool,
    },
    /// Make a registered version active
    Promote {
        /// Version, e.g. `v3` or `3`
        version: VersionId,
        #[arg(long)]
        name: Option<String>,
    },
    /// Restore the previously active version
    Rollback {
        #[arg(long)]
        name: Option<String>,
    },
    /// Show registered versions and the active one
    Status {
        #[arg(long)]
        name: Option<String>,
    },
    /// Show recent tracked runs
    History {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Write a synthetic labelled cohort as CSV
    Synth {
        #[arg(short, long)]
        out: PathBuf,
        /// Rows per class
        #[arg(long, default_value = "100")]
        per_class: usize,
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_logging(&config)?;

    match cli.command {
        Commands::Train {
            data,
            seed,
            no_promote,
            sequential,
        } => {
            if let Some(data) = data {
                config.data_path = data;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            if no_promote {
                config.promote_winner = false;
            }
            if sequential {
                config.parallel = false;
            }
            train(config)
        }
        Commands::Promote { version, name } => {
            let name = name.unwrap_or_else(|| config.model_name.clone());
            let registry = open_registry(&config)?;
            registry
                .promote(&name, version)
                .with_context(|| format!("Failed to promote {name} {version}"))?;
            println!("{name}: active version is now {version}");
            Ok(())
        }
        Commands::Rollback { name } => {
            let name = name.unwrap_or_else(|| config.model_name.clone());
            let registry = open_registry(&config)?;
            let version = registry
                .rollback(&name)
                .with_context(|| format!("Failed to roll back {name}"))?;
            println!("{name}: rolled back to {version}");
            Ok(())
        }
        Commands::Status { name } => {
            let registry = open_registry(&config)?;
            let names = match name {
                Some(name) => vec![name],
                None => registry.model_names(),
            };
            if names.is_empty() {
                println!("No registered models in {}", config.registry_dir.display());
            }
            for name in names {
                print_status(&registry, &name);
            }
            Ok(())
        }
        Commands::History { limit } => {
            let events = JsonlTracker::read_all(&config.tracking_path)
                .with_context(|| format!("Failed to read {}", config.tracking_path.display()))?;
            let comparisons: Vec<&TrackingEvent> = events
                .iter()
                .filter(|e| matches!(e, TrackingEvent::Comparison { .. }))
                .collect();
            for event in comparisons.iter().rev().take(limit) {
                if let TrackingEvent::Comparison {
                    run_id,
                    model_name,
                    table,
                    registered_version,
                    promoted,
                    at,
                    ..
                } = event
                {
                    let version = registered_version.map_or_else(|| "-".to_string(), |v| format!("v{v}"));
                    println!("{at} {run_id} {model_name} {version} promoted={promoted}");
                    print!("{table}");
                }
            }
            Ok(())
        }
        Commands::Synth { out, per_class, seed } => {
            let counts: Vec<(ObesityLevel, usize)> =
                ObesityLevel::ALL.iter().map(|level| (*level, per_class)).collect();
            let table = cohort(&CohortSpec::new(&counts, seed).with_lifestyle())?;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("Failed to create {}", out.display()))?;
            table.write_csv(file, &config.target_column)?;
            info!(path = %out.display(), rows = table.len(), "Wrote synthetic cohort");
            Ok(())
        }
    }
}

fn train(config: PipelineConfig) -> Result<()> {
    info!("Obesity Predictor Trainer v{}", env!("CARGO_PKG_VERSION"));
    info!(
        data = %config.data_path.display(),
        registry = %config.registry_dir.display(),
        model = %config.model_name,
        seed = config.seed,
        "Training configuration"
    );

    let orchestrator = Orchestrator::from_config(config).context("Failed to initialise pipeline")?;
    let outcome = orchestrator.run().context("Training run failed")?;

    println!("{}", outcome.table.render());
    println!(
        "{}: registered {} ({}){}",
        outcome.model_name,
        outcome.version,
        outcome.winner,
        if outcome.promoted { ", promoted" } else { "" }
    );
    if let Some(metrics) = &outcome.holdout_metrics {
        println!(
            "holdout: accuracy={:.4} macro_f1={:.4} rows={}",
            metrics.accuracy, metrics.macro_f1, metrics.samples
        );
    }
    Ok(())
}

fn open_registry(config: &PipelineConfig) -> Result<ModelRegistry> {
    let storage = RegistryStorage::filesystem(&config.registry_dir)
        .with_context(|| format!("Failed to open registry at {}", config.registry_dir.display()))?;
    ModelRegistry::open(storage).context("Failed to load registry")
}

fn print_status(registry: &ModelRegistry, name: &str) {
    let Some(entry) = registry.entry(name) else {
        println!("{name}: not registered");
        return;
    };
    println!("{name}");
    for info in &entry.versions {
        let marker = if entry.active == Some(info.version) { "*" } else { " " };
        println!(
            " {marker} {:<5} {:<10} macro_f1={:.4} accuracy={:.4} registered={}",
            info.version.to_string(),
            info.strategy.as_str(),
            info.macro_f1,
            info.accuracy,
            info.registered_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn init_logging(config: &PipelineConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("Failed to set tracing subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("Failed to set tracing subscriber")?;
    }

    Ok(())
}
