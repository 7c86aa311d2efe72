//! # popcast
//!
//! Command-line front of the forecasting service. Every subcommand prints
//! the same JSON document the service returns and exits non-zero on an
//! error response.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use popcast::config::PipelineConfig;
use popcast::pipeline::Pipeline;
use popcast::service::{is_error, ForecastService};
use popcast::trainer::{Hyperparameters, ModelId};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "popcast")]
#[command(about = "Demography forecasting pipeline", long_about = None)]
struct Cli {
    /// JSON configuration file (defaults to POPCAST_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate raw CSV extracts into the clean Parquet tables
    Prepare,

    /// Train a model and write its artifacts
    Train {
        /// Model id (sarimax, sarimax_pop, prophet, xgb, cat)
        #[arg(short, long)]
        model: String,

        /// Hyperparameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,
    },

    /// Train every registered model in parallel with default parameters
    TrainAll,

    /// Show held-out metrics of a trained model
    Metrics {
        /// Model id
        #[arg(short, long)]
        model: String,
    },

    /// Show the stored prediction table of a trained model
    Predictions {
        /// Model id
        #[arg(short, long)]
        model: String,
    },

    /// Forecast past the last observed year
    Forecast {
        /// Model id
        #[arg(short, long)]
        model: String,

        /// Number of years to forecast
        #[arg(short, long, default_value = "3")]
        years: usize,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => PipelineConfig::from_env().context("loading config from environment"),
    }
}

fn train_all(pipeline: &Pipeline) -> Result<Value> {
    let jobs: Vec<_> = ModelId::ALL
        .iter()
        .map(|id| (*id, Hyperparameters::new()))
        .collect();
    let results = pipeline.train_many(&jobs)?;
    let runs: Vec<Value> = results
        .into_iter()
        .map(|(id, result)| match result {
            Ok(run) => json!({"model_id": id.as_str(), "status": "ok", "run_id": run.run_id()}),
            Err(e) => json!({"model_id": id.as_str(), "status": "error", "detail": e.to_string()}),
        })
        .collect();
    Ok(json!({ "runs": runs }))
}

fn run(cli: Cli) -> Result<Value> {
    let config = load_config(cli.config.as_ref())?;
    let service = ForecastService::new(Pipeline::new(config)?);

    let response = match cli.command {
        Commands::Prepare => {
            let aggregated = service.pipeline().prepare()?;
            json!({
                "status": "ok",
                "years": aggregated.demography.len(),
                "first_year": aggregated.demography.years().first(),
                "last_year": aggregated.demography.years().last(),
            })
        }
        Commands::Train { model, params } => {
            let params: Value =
                serde_json::from_str(&params).context("--params is not valid JSON")?;
            service.train(&model, &params)
        }
        Commands::TrainAll => train_all(service.pipeline())?,
        Commands::Metrics { model } => service.metrics(&model),
        Commands::Predictions { model } => service.predictions(&model),
        Commands::Forecast { model, years } => service.forecast(&model, years),
    };
    Ok(response)
}

fn main() -> Result<ExitCode> {
    popcast::logging::init();
    let response = run(Cli::parse())?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    let failed = is_error(&response)
        || response["runs"]
            .as_array()
            .is_some_and(|runs| runs.iter().any(is_error));
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
