//! End-to-end orchestration
//!
//! ```text
//! raw CSV ──aggregate──> clean Parquet ──trainer──> model + held-out preds
//!                                                  │
//!                                   evaluate ──────┤
//!                                                  ▼
//!                                 models/<id>.json, reports/*_<id>.csv
//!                                                  │
//!                                   forecast <─────┘
//! ```

use crate::aggregate::{self, Aggregated, RawExtracts};
use crate::artifact::{
    ArtifactStore, MetricsRecord, PredictionTable, RunLog, RunRecord,
};
use crate::config::PipelineConfig;
use crate::evaluate::evaluate;
use crate::forecast::{ForecastExtender, ForecastTable};
use crate::series::Field;
use crate::storage;
use crate::trainer::{Hyperparameters, ModelId, TrainerRegistry, TrainingData};
use crate::{Error, Result};
use rayon::prelude::*;
use std::path::Path;
use tracing::{error, info, info_span};

/// Aggregation, training, evaluation, persistence and forecasting over one
/// directory layout.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    registry: TrainerRegistry,
    store: ArtifactStore,
    extender: ForecastExtender,
    runs: RunLog,
}

impl Pipeline {
    /// Pipeline with the default trainer registry.
    ///
    /// # Errors
    ///
    /// Returns `Config` when the configuration is invalid.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_registry(config, TrainerRegistry::with_defaults())
    }

    /// Pipeline with a custom registry.
    ///
    /// # Errors
    ///
    /// Returns `Config` when the configuration is invalid.
    pub fn with_registry(config: PipelineConfig, registry: TrainerRegistry) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: ArtifactStore::from_config(&config),
            extender: ForecastExtender::new(config.max_horizon, config.exog_window),
            registry,
            runs: RunLog::new(),
            config,
        })
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Artifact store in use.
    #[must_use]
    pub const fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Runs started by this pipeline.
    #[must_use]
    pub const fn runs(&self) -> &RunLog {
        &self.runs
    }

    /// Aggregate the raw directory into the clean tables.
    ///
    /// # Errors
    ///
    /// Propagates input-format and storage errors.
    pub fn prepare(&self) -> Result<Aggregated> {
        aggregate::prepare(&self.config)
    }

    /// Aggregate uploaded extracts into the clean tables.
    ///
    /// # Errors
    ///
    /// Propagates input-format and storage errors.
    pub fn prepare_from_bytes(
        &self,
        births: &[u8],
        deaths: &[u8],
        population: &[u8],
        migration: Option<&[u8]>,
    ) -> Result<Aggregated> {
        let extracts = RawExtracts::from_bytes(births, deaths, population, migration)?;
        let aggregated = aggregate::aggregate(&extracts)?;
        aggregate::persist(&aggregated, &self.config)?;
        Ok(aggregated)
    }

    /// Load the clean tables. The demography table is optional.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the births table has not been prepared.
    pub fn load_training_data(&self) -> Result<TrainingData> {
        let births_path = self.config.births_path();
        if !births_path.exists() {
            return Err(missing_clean_table(&births_path));
        }
        let births = storage::read_yearly(&births_path, &[Field::Birth])?;
        let mut data = TrainingData::new(births, self.config.threshold_year);

        let demography_path = self.config.demography_path();
        if demography_path.exists() {
            data = data.with_demography(storage::read_yearly(&demography_path, &Field::ALL)?);
        }
        Ok(data)
    }

    /// Train `id` on the clean tables and write its artifacts.
    ///
    /// The returned run is `Success`; on error the failed run stays in
    /// [`Pipeline::runs`].
    ///
    /// # Errors
    ///
    /// Propagates loading, training, evaluation and storage errors.
    pub fn train(&self, id: ModelId, params: &Hyperparameters) -> Result<RunRecord> {
        let data = self.load_training_data()?;
        self.train_on(id, &data, params)
    }

    /// Train `id` on explicit tables and write its artifacts.
    ///
    /// # Errors
    ///
    /// Propagates training, evaluation and storage errors.
    pub fn train_on(
        &self,
        id: ModelId,
        data: &TrainingData,
        params: &Hyperparameters,
    ) -> Result<RunRecord> {
        let mut run = RunRecord::new(id);
        let _span = info_span!("train", model = %id, run_id = run.run_id()).entered();
        run.start();
        self.runs.record(run.clone());

        match self.fit_and_persist(id, data, params, run.run_id()) {
            Ok(()) => {
                run.succeed();
                self.runs.record(run.clone());
                Ok(run)
            }
            Err(e) => {
                error!(error = %e, "training failed");
                run.fail(e.to_string());
                self.runs.record(run);
                Err(e)
            }
        }
    }

    fn fit_and_persist(
        &self,
        id: ModelId,
        data: &TrainingData,
        params: &Hyperparameters,
        run_id: &str,
    ) -> Result<()> {
        let outcome = self.registry.fit(id, data, params)?;
        let metrics = evaluate(&outcome.ground_truth, &outcome.predictions)?;
        info!(
            mae = metrics.mae,
            mse = metrics.mse,
            mape = metrics.mape,
            r2 = metrics.r2,
            "held-out metrics"
        );

        let model = outcome.model.with_run_id(run_id);
        let record = MetricsRecord::new(id, run_id, metrics);
        let table =
            PredictionTable::build(&outcome.history, &outcome.ground_truth, &outcome.predictions);
        self.store.save(&model, &record, &table)
    }

    /// Train several models in parallel, each against the same clean tables.
    ///
    /// # Errors
    ///
    /// Fails up front only if the clean tables cannot be loaded; per-model
    /// failures are returned alongside their ids.
    pub fn train_many(
        &self,
        jobs: &[(ModelId, Hyperparameters)],
    ) -> Result<Vec<(ModelId, Result<RunRecord>)>> {
        let data = self.load_training_data()?;
        Ok(jobs
            .par_iter()
            .map(|(id, params)| (*id, self.train_on(*id, &data, params)))
            .collect())
    }

    /// Stored metrics of `id`.
    ///
    /// # Errors
    ///
    /// Returns `NotTrained` when no metrics were written.
    pub fn metrics(&self, id: ModelId) -> Result<MetricsRecord> {
        self.store.load_metrics(id)
    }

    /// Stored prediction table of `id`.
    ///
    /// # Errors
    ///
    /// Returns `NotTrained` when no table was written.
    pub fn predictions(&self, id: ModelId) -> Result<PredictionTable> {
        self.store.load_predictions(id)
    }

    /// Forecast `years` years past the last observed year.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a horizon outside `1..=max_horizon`,
    /// `NotTrained` when the model or its predictions are missing, and
    /// propagates estimator errors.
    pub fn forecast(&self, id: ModelId, years: usize) -> Result<ForecastTable> {
        self.extender.check_horizon(years)?;
        let model = self.store.load_model(id)?;
        let table = self.store.load_predictions(id)?;
        self.extender.extend(&model, &table, years)
    }
}

fn missing_clean_table(path: &Path) -> Error {
    Error::InvalidInput(format!(
        "clean table {} not found; run prepare first",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::RunStatus;
    use tempfile::TempDir;

    #[test]
    fn test_train_without_clean_data() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::new(PipelineConfig::with_root(dir.path())).unwrap();
        let err = pipeline.train(ModelId::Xgb, &Hyperparameters::new()).unwrap_err();
        assert!(err.to_string().contains("run prepare first"));
    }

    #[test]
    fn test_failed_run_is_logged() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::new(PipelineConfig::with_root(dir.path())).unwrap();
        let births = crate::series::YearlySeries::new(vec![2020, 2021, 2022])
            .unwrap()
            .with_column(Field::Birth, vec![1.0, 2.0, 3.0])
            .unwrap();
        let data = TrainingData::new(births, 2021);
        let params = Hyperparameters::new().with("bogus", 1);
        assert!(pipeline.train_on(ModelId::Cat, &data, &params).is_err());

        let runs = pipeline.runs().runs_for(ModelId::Cat);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status(), RunStatus::Failed);
    }

    #[test]
    fn test_forecast_horizon_checked_first() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::new(PipelineConfig::with_root(dir.path())).unwrap();
        assert!(matches!(
            pipeline.forecast(ModelId::Sarimax, 0),
            Err(Error::InvalidInput(_))
        ));
        assert!(pipeline.forecast(ModelId::Sarimax, 3).unwrap_err().is_not_trained());
    }
}
