mod config;
mod dataset_validator;
mod download;
mod errors;
mod predictions;
mod report;
mod runner;
mod stages;
mod tools;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::AppConfig;
use crate::runner::ProcessRunner;

/// Curates the legal Q&A dataset and drives LoRA fine-tuning of a causal LM.
#[derive(Parser, Debug)]
#[command(name = "finetune", long_about = None)]
struct Args {
    /// Overrides FT_WORK_DIR
    #[arg(long, value_name = "PATH", global = true)]
    work_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download, clean, filter, format and split the dataset
    Curate {
        /// Re-download the source dataset even if present
        #[arg(long)]
        force: bool,
    },
    /// Download the base checkpoint and convert it for the trainer
    FetchModel {
        /// Re-download and re-convert even if present
        #[arg(long)]
        force: bool,
    },
    /// LoRA fine-tuning on the curated train/val splits
    Train,
    /// Generate tag predictions for the submission set
    Generate,
    /// All stages in order
    Run {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    // the flag wins over FT_WORK_DIR; derived defaults follow it
    let cfg = match args.work_dir {
        Some(dir) => {
            let dir = dir.display().to_string();
            AppConfig::from_lookup(|k| match k {
                "FT_WORK_DIR" => Some(dir.clone()),
                _ => std::env::var(k).ok(),
            })?
        }
        None => AppConfig::from_env()?,
    };
    info!(work_dir = %cfg.work_dir.display(), model_id = %cfg.model_id, device = ?cfg.device, "config loaded");

    let runner = ProcessRunner;
    match args.command {
        Command::Curate { force } => {
            stages::curate::run(&cfg, force).await?;
        }
        Command::FetchModel { force } => {
            stages::model::run(&cfg, &runner, force).await?;
        }
        Command::Train => {
            stages::train::run_train(&cfg, &runner).await?;
        }
        Command::Generate => {
            stages::train::run_generate(&cfg, &runner).await?;
        }
        Command::Run { force } => {
            stages::curate::run(&cfg, force).await?;
            stages::model::run(&cfg, &runner, force).await?;
            stages::train::run_train(&cfg, &runner).await?;
            let report = stages::train::run_generate(&cfg, &runner).await?;
            info!(run_id = %report.run_id, "workflow complete");
        }
    }
    Ok(())
}
