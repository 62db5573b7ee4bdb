mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::AppError;
pub use models::classify_types::{
    Backend, ClassificationRequest, ClassificationResult, FileBlob, ImageQualityReport, ModelInfo,
    WasteCategory,
};
pub use services::classifier::orchestrator::{select_backend, BackendAvailability, WasteClassifier};

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "waste-lense", version, about = "Classify waste item photos")]
pub struct Cli {
    /// JSON config file; environment variables override its values.
    #[arg(long, global = true, env = "WASTE_LENSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seed for the simulated classifier.
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Classify one image.
    Classify {
        path: PathBuf,
        /// Submit the raw file instead of decoding it locally.
        #[arg(long)]
        as_file: bool,
        /// Skip loading the on-device model.
        #[arg(long)]
        no_model: bool,
    },
    /// Print model and cache status.
    Status,
    /// Load the model, filling the offline cache when fetched remotely.
    Load {
        #[arg(long)]
        reload: bool,
    },
    /// Delete the offline model copy.
    ClearCache,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config, AppError> {
    let base = match path {
        Some(p) => Config::from_file(p)?,
        None => Config::default(),
    };
    base.with_env()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Config(format!("Failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

pub async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config.as_deref())?;
    tracing::debug!("Using data dir {}", config.data_dir.display());

    let mut classifier = WasteClassifier::from_config(&config)?;
    if let Some(seed) = cli.seed {
        classifier = classifier.with_seed(seed);
    }

    match cli.command {
        Command::Classify {
            path,
            as_file,
            no_model,
        } => {
            if !no_model {
                if let Err(e) = commands::classifier::load_model(&classifier, false).await {
                    tracing::warn!("Continuing without on-device model: {}", e);
                }
            }
            let result = commands::classifier::classify_image(&classifier, &path, as_file).await?;
            print_json(&result)?;
        }
        Command::Status => {
            print_json(&commands::classifier::get_model_status(&classifier).await)?;
        }
        Command::Load { reload } => {
            let info = commands::classifier::load_model(&classifier, reload).await?;
            print_json(&info)?;
        }
        Command::ClearCache => {
            commands::classifier::clear_cache(&classifier).await?;
        }
    }

    classifier.model_manager().wait_for_persist().await;
    Ok(())
}
