//! # popcast: Demography Forecasting Pipeline
//!
//! popcast turns raw per-(year, age, sex) demographic extracts into yearly
//! totals, trains one of several time-series models on them, scores the
//! model on held-out years and projects it forward.
//!
//! ## Stages
//!
//! - [`aggregate`]: raw CSV → `demography.parquet`, `births_total.parquet`
//! - [`trainer`]: pluggable estimators keyed by [`trainer::ModelId`]
//!   (`sarimax`, `sarimax_pop`, `prophet`, `xgb`, `cat`)
//! - [`evaluate`]: MAE, MSE, MAPE and R² on the held-out years
//! - [`artifact`]: model JSON, metrics and prediction CSVs
//! - [`forecast`]: N-year extension with per-model exogenous policies
//! - [`service`]: JSON-in, JSON-out facade over [`pipeline::Pipeline`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use popcast::config::PipelineConfig;
//! use popcast::pipeline::Pipeline;
//! use popcast::trainer::{Hyperparameters, ModelId};
//!
//! let pipeline = Pipeline::new(PipelineConfig::with_root("data"))?;
//! pipeline.prepare()?;
//! pipeline.train(ModelId::Xgb, &Hyperparameters::new())?;
//!
//! let forecast = pipeline.forecast(ModelId::Xgb, 5)?;
//! println!("{:?}", forecast.years());
//! # Ok::<(), popcast::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod aggregate;
pub mod artifact;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod forecast;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod series;
pub mod service;
pub mod storage;
pub mod trainer;

pub use error::{Error, Result};
