//! Adaptive check selection engine
//!
//! Trains per-brand failure models and selects daily checks for stores.

use std::sync::Arc;

use anyhow::Result;
use check_engine::commands;
use check_engine::{Selector, TrainingPipeline};
use check_structs::{HistorySource, Segment};
use clap::{Parser, Subcommand};
use config::{DatabaseConfig, EngineConfig};
use database::{PgHistorySource, create_pool, run_migrations};
use feature_extractor::FeatureExtractor;
use ml_model::LocalPrior;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Adaptive check selection engine
#[derive(Parser)]
#[command(name = "checks")]
#[command(about = "Failure-model training and adaptive check selection")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train failure models (every brand unless --brand is given)
    Train {
        /// Train only this brand
        #[arg(short, long)]
        brand: Option<Uuid>,

        /// Segment scope within --brand (low, medium, high)
        #[arg(short, long)]
        segment: Option<Segment>,

        /// Train and evaluate without publishing
        #[arg(long)]
        dry_run: bool,
    },

    /// Preview the checks selected for a store
    Select {
        /// Store to select for
        #[arg(long)]
        store: Uuid,

        /// Number of checks
        #[arg(short, long, default_value = "5")]
        count: usize,
    },

    /// Inspect or roll back published models
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },

    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// List published versions of a scope
    List {
        #[arg(short, long)]
        brand: Uuid,

        #[arg(short, long)]
        segment: Option<Segment>,
    },

    /// Make an earlier version the latest model
    Rollback {
        #[arg(short, long)]
        brand: Uuid,

        #[arg(short, long)]
        segment: Option<Segment>,

        /// Version key as shown by `models list`
        #[arg(long)]
        version: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = EngineConfig::from_env()?;

    match cli.command {
        Commands::Train {
            brand,
            segment,
            dry_run,
        } => {
            let history = connect().await?;
            let registry = commands::open_registry(&config)?;
            let pipeline = TrainingPipeline::new(
                history,
                registry,
                FeatureExtractor::new(config.selector.history_window_days),
                config.training,
            );
            commands::train::run(&pipeline, brand, segment, dry_run).await?;
        }
        Commands::Select { store, count } => {
            let history = connect().await?;
            let registry = commands::open_registry(&config)?;
            let selector = Selector::new(
                Arc::clone(&history),
                registry,
                LocalPrior::new(config.prior.alpha, config.prior.beta),
                config.selector,
                config.training.scope_mode,
            );
            commands::select::run(&selector, history.as_ref(), store, count).await?;
        }
        Commands::Models { command } => {
            let registry = commands::open_registry(&config)?;
            match command {
                ModelsCommand::List { brand, segment } => {
                    commands::models::list(&registry, brand, segment).await?;
                }
                ModelsCommand::Rollback {
                    brand,
                    segment,
                    version,
                } => {
                    commands::models::rollback(&registry, brand, segment, &version).await?;
                }
            }
        }
        Commands::Migrate => {
            let database = DatabaseConfig::from_env()?;
            let pool = create_pool(&database.url, database.max_connections).await?;
            run_migrations(&pool).await?;
            info!("Migrations completed successfully");
        }
    }

    Ok(())
}

async fn connect() -> Result<Arc<dyn HistorySource>> {
    let database = DatabaseConfig::from_env()?;
    let pool = create_pool(&database.url, database.max_connections).await?;
    Ok(Arc::new(PgHistorySource::new(pool)))
}
