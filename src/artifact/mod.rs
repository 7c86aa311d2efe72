//! Training artifacts
//!
//! ## Layout
//!
//! ```text
//! models/<id>.json           TrainedModel blob
//! reports/metrics_<id>.csv   MAE,MSE,MAPE,R2,Target (one row)
//! reports/preds_<id>.csv     Year,y_hist,y_true,y_pred
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place.
//! Saves for one model id are serialized by a per-id lock; different ids
//! write in parallel. A missing file reads as [`Error::NotTrained`].

mod metrics_record;
mod prediction_table;
mod run_record;

pub use metrics_record::{MetricsRecord, METRICS_HEADER};
pub use prediction_table::{PredictionRow, PredictionTable, PREDICTIONS_HEADER};
pub use run_record::{RunLog, RunRecord, RunStatus};

use crate::config::PipelineConfig;
use crate::storage::write_atomic;
use crate::trainer::{ModelId, TrainedModel};
use crate::{Error, Result};
use dashmap::DashMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Persists and loads the artifacts of every model id.
#[derive(Debug)]
pub struct ArtifactStore {
    models_dir: PathBuf,
    reports_dir: PathBuf,
    locks: DashMap<ModelId, Arc<Mutex<()>>>,
}

impl ArtifactStore {
    /// Store rooted at explicit directories.
    #[must_use]
    pub fn new(models_dir: impl Into<PathBuf>, reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            reports_dir: reports_dir.into(),
            locks: DashMap::new(),
        }
    }

    /// Store using the directories of a pipeline config.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.models_dir, &config.reports_dir)
    }

    /// `models/<id>.json`
    #[must_use]
    pub fn model_path(&self, id: ModelId) -> PathBuf {
        self.models_dir.join(format!("{id}.json"))
    }

    /// `reports/metrics_<id>.csv`
    #[must_use]
    pub fn metrics_path(&self, id: ModelId) -> PathBuf {
        self.reports_dir.join(format!("metrics_{id}.csv"))
    }

    /// `reports/preds_<id>.csv`
    #[must_use]
    pub fn predictions_path(&self, id: ModelId) -> PathBuf {
        self.reports_dir.join(format!("preds_{id}.csv"))
    }

    fn lock_for(&self, id: ModelId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_default().value())
    }

    /// Write all artifacts of one run, replacing the previous ones.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for a poisoned lock and propagates
    /// serialization and IO errors.
    pub fn save(
        &self,
        model: &TrainedModel,
        metrics: &MetricsRecord,
        predictions: &PredictionTable,
    ) -> Result<()> {
        let id = model.model_id();
        let lock = self.lock_for(id);
        let _guard = lock
            .lock()
            .map_err(|_| Error::StorageError(format!("artifact lock for {id} poisoned")))?;

        let blob = serde_json::to_vec_pretty(model)?;
        write_atomic(&self.model_path(id), &blob)?;

        let mut buf = Vec::new();
        metrics.write_csv(&mut buf)?;
        write_atomic(&self.metrics_path(id), &buf)?;

        buf.clear();
        predictions.write_csv(&mut buf)?;
        write_atomic(&self.predictions_path(id), &buf)?;

        info!(
            model = %id,
            run_id = model.run_id(),
            dir = %self.models_dir.display(),
            "artifacts written"
        );
        Ok(())
    }

    /// Load the model blob.
    ///
    /// # Errors
    ///
    /// Returns `NotTrained` when absent and `Json` when corrupt.
    pub fn load_model(&self, id: ModelId) -> Result<TrainedModel> {
        let file = open_artifact(&self.model_path(id), id)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Load the metrics row.
    ///
    /// # Errors
    ///
    /// Returns `NotTrained` when absent and format errors when corrupt.
    pub fn load_metrics(&self, id: ModelId) -> Result<MetricsRecord> {
        let path = self.metrics_path(id);
        let file = open_artifact(&path, id)?;
        MetricsRecord::read_csv(BufReader::new(file), id, &path.display().to_string())
    }

    /// Load the prediction table.
    ///
    /// # Errors
    ///
    /// Returns `NotTrained` when absent and format errors when corrupt.
    pub fn load_predictions(&self, id: ModelId) -> Result<PredictionTable> {
        let path = self.predictions_path(id);
        let file = open_artifact(&path, id)?;
        PredictionTable::read_csv(BufReader::new(file), &path.display().to_string())
    }
}

fn open_artifact(path: &Path, id: ModelId) -> Result<File> {
    File::open(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            Error::NotTrained(id.to_string())
        } else {
            Error::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::Metrics;
    use crate::model::{BoostConfig, BoostedTrees, FittedModel};
    use crate::series::{Field, Series, YearlySeries};
    use crate::trainer::Hyperparameters;
    use tempfile::TempDir;

    fn trained() -> (TrainedModel, MetricsRecord, PredictionTable) {
        let table = YearlySeries::new(vec![2020, 2021, 2022, 2023])
            .unwrap()
            .with_column(Field::Birth, vec![100.0, 110.0, 90.0, 95.0])
            .unwrap();
        let split = table.split(2021).unwrap();
        let trees = BoostedTrees::fit(
            BoostConfig::depthwise(),
            &[vec![0.0], vec![1.0]],
            &[100.0, 110.0],
        )
        .unwrap();
        let model = TrainedModel::new(
            ModelId::Xgb,
            Hyperparameters::new(),
            &split,
            FittedModel::Boosted(trees),
        )
        .with_run_id("run-1");
        let metrics = MetricsRecord::new(
            ModelId::Xgb,
            "run-1",
            Metrics {
                mae: 1.0,
                mse: 2.0,
                mape: 3.0,
                r2: 0.5,
            },
        );
        let preds = PredictionTable::build(
            &split.train().series(Field::Birth).unwrap(),
            &split.test().series(Field::Birth).unwrap(),
            &Series::new(vec![2022, 2023], vec![105.0, 105.0]).unwrap(),
        );
        (model, metrics, preds)
    }

    #[test]
    fn test_missing_artifacts_are_not_trained() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("models"), dir.path().join("reports"));
        assert!(store.load_model(ModelId::Xgb).unwrap_err().is_not_trained());
        assert!(store.load_metrics(ModelId::Xgb).unwrap_err().is_not_trained());
        assert!(store.load_predictions(ModelId::Xgb).unwrap_err().is_not_trained());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("models"), dir.path().join("reports"));
        let (model, metrics, preds) = trained();
        store.save(&model, &metrics, &preds).unwrap();

        assert_eq!(store.load_model(ModelId::Xgb).unwrap(), model);
        assert_eq!(store.load_metrics(ModelId::Xgb).unwrap().metrics(), metrics.metrics());
        assert_eq!(store.load_predictions(ModelId::Xgb).unwrap(), preds);
        assert!(store.model_path(ModelId::Xgb).ends_with("models/xgb.json"));
    }

    #[test]
    fn test_concurrent_saves_leave_whole_files() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("models"), dir.path().join("reports"));
        let (model, metrics, preds) = trained();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| store.save(&model, &metrics, &preds).unwrap());
            }
        });
        assert_eq!(store.load_model(ModelId::Xgb).unwrap(), model);
        let leftovers = std::fs::read_dir(dir.path().join("reports"))
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }
}
