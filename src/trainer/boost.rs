use super::{Hyperparameters, ModelId, TrainOutcome, TrainedModel, Trainer, TrainingData};
use crate::model::{BoostConfig, BoostedTrees, FittedModel, TreeKind};
use crate::{Error, Result};
use tracing::info;

const XGB_KEYS: &[&str] = &[
    "n_estimators",
    "learning_rate",
    "eta",
    "max_depth",
    "min_child_weight",
    "reg_lambda",
    "lambda",
    "gamma",
    "base_score",
    "subsample",
];

const CAT_KEYS: &[&str] = &[
    "iterations",
    "n_estimators",
    "learning_rate",
    "depth",
    "l2_leaf_reg",
    "verbose",
];

/// Integer time index features `start..start + len`.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn index_features(start: usize, len: usize) -> Vec<Vec<f64>> {
    (start..start + len).map(|i| vec![i as f64]).collect()
}

/// Boosted trees on births with the time index as the only feature.
#[derive(Debug, Clone, Copy)]
pub struct BoostTrainer {
    model_id: ModelId,
}

impl BoostTrainer {
    /// Depthwise trees (`xgb`).
    #[must_use]
    pub const fn xgb() -> Self {
        Self {
            model_id: ModelId::Xgb,
        }
    }

    /// Oblivious trees (`cat`).
    #[must_use]
    pub const fn cat() -> Self {
        Self {
            model_id: ModelId::Cat,
        }
    }

    fn config(self, params: &Hyperparameters) -> Result<BoostConfig> {
        let config = match self.model_id {
            ModelId::Cat => {
                params.check_keys(self.model_id.as_str(), CAT_KEYS)?;
                let defaults = BoostConfig::oblivious();
                BoostConfig {
                    n_estimators: params
                        .usize(&["iterations", "n_estimators"])?
                        .unwrap_or(defaults.n_estimators),
                    learning_rate: params
                        .f64(&["learning_rate"])?
                        .unwrap_or(defaults.learning_rate),
                    max_depth: params.usize(&["depth"])?.unwrap_or(defaults.max_depth),
                    reg_lambda: params.f64(&["l2_leaf_reg"])?.unwrap_or(defaults.reg_lambda),
                    ..defaults
                }
            }
            _ => {
                params.check_keys(self.model_id.as_str(), XGB_KEYS)?;
                if params.has("subsample") {
                    return Err(Error::Config(
                        "subsample is not supported: training is deterministic".into(),
                    ));
                }
                let defaults = BoostConfig::depthwise();
                BoostConfig {
                    kind: TreeKind::Depthwise,
                    n_estimators: params
                        .usize(&["n_estimators"])?
                        .unwrap_or(defaults.n_estimators),
                    learning_rate: params
                        .f64(&["learning_rate", "eta"])?
                        .unwrap_or(defaults.learning_rate),
                    max_depth: params.usize(&["max_depth"])?.unwrap_or(defaults.max_depth),
                    min_child_weight: params
                        .f64(&["min_child_weight"])?
                        .unwrap_or(defaults.min_child_weight),
                    reg_lambda: params
                        .f64(&["reg_lambda", "lambda"])?
                        .unwrap_or(defaults.reg_lambda),
                    gamma: params.f64(&["gamma"])?.unwrap_or(defaults.gamma),
                    base_score: params.f64(&["base_score"])?,
                }
            }
        };
        config.validate()?;
        Ok(config)
    }
}

impl Trainer for BoostTrainer {
    fn fit(&self, data: &TrainingData, params: &Hyperparameters) -> Result<TrainOutcome> {
        let config = self.config(params)?;
        let target = self.model_id.target();
        let split = data.split_for(target)?;
        let y = split.train().require(target.field(), target.as_str())?;
        let n_train = split.train().len();

        let fitted = BoostedTrees::fit(config, &index_features(0, n_train), y)?;
        let predictions = fitted.predict(&index_features(n_train, split.test().len()))?;
        info!(
            model = %self.model_id,
            trees = fitted.n_trees(),
            train = n_train,
            "boosted trees fitted"
        );

        let model = TrainedModel::new(
            self.model_id,
            params.clone(),
            &split,
            FittedModel::Boosted(fitted),
        );
        TrainOutcome::from_split(model, &split, target, predictions)
    }
}
