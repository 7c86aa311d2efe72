//! Trainer registry
//!
//! A [`Trainer`] turns a [`TrainingData`] snapshot plus [`Hyperparameters`]
//! into a [`TrainOutcome`]: the fitted model and its predictions on the
//! held-out years. The [`TrainerRegistry`] maps every [`ModelId`] to one
//! trainer.
//!
//! ```rust
//! use popcast::trainer::{ModelId, TrainerRegistry};
//!
//! let registry = TrainerRegistry::with_defaults();
//! let id: ModelId = "sarimax_pop".parse()?;
//! assert!(registry.get(id).is_some());
//! # Ok::<(), popcast::Error>(())
//! ```

mod boost;
mod params;
mod prophet;
mod sarimax;

pub use boost::{index_features, BoostTrainer};
pub use params::Hyperparameters;
pub use prophet::ProphetTrainer;
pub use sarimax::SarimaxTrainer;

use crate::model::FittedModel;
use crate::series::{Field, Series, TrainingSplit, YearlySeries};
use crate::{Error, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelId {
    /// Univariate SARIMAX on births
    Sarimax,
    /// SARIMAX on population with birth/death/migration regressors
    SarimaxPop,
    /// Trend model on births
    Prophet,
    /// Depthwise boosted trees on births
    Xgb,
    /// Oblivious boosted trees on births
    Cat,
}

impl ModelId {
    /// Every identifier.
    pub const ALL: [Self; 5] = [Self::Sarimax, Self::SarimaxPop, Self::Prophet, Self::Xgb, Self::Cat];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sarimax => "sarimax",
            Self::SarimaxPop => "sarimax_pop",
            Self::Prophet => "prophet",
            Self::Xgb => "xgb",
            Self::Cat => "cat",
        }
    }

    /// Series the model predicts.
    #[must_use]
    pub const fn target(self) -> Target {
        match self {
            Self::SarimaxPop => Target::Population,
            _ => Target::Births,
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown model id '{s}'")))
    }
}

/// Predicted quantity, reported in the metrics `Target` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// Yearly births total
    Births,
    /// Yearly population total
    Population,
}

impl Target {
    /// Name used in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Births => "Births",
            Self::Population => "Population",
        }
    }

    /// Column holding the target values.
    #[must_use]
    pub const fn field(self) -> Field {
        match self {
            Self::Births => Field::Birth,
            Self::Population => Field::Population,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Births" => Ok(Self::Births),
            "Population" => Ok(Self::Population),
            other => Err(Error::InvalidInput(format!("unknown target '{other}'"))),
        }
    }
}

/// Clean tables handed to a trainer.
#[derive(Debug, Clone)]
pub struct TrainingData {
    births: YearlySeries,
    demography: Option<YearlySeries>,
    threshold: i32,
}

impl TrainingData {
    /// Births-only data (enough for every model except `sarimax_pop`).
    #[must_use]
    pub const fn new(births: YearlySeries, threshold: i32) -> Self {
        Self {
            births,
            demography: None,
            threshold,
        }
    }

    /// Attach the full demography table.
    #[must_use]
    pub fn with_demography(mut self, demography: YearlySeries) -> Self {
        self.demography = Some(demography);
        self
    }

    /// Train/test threshold year.
    #[must_use]
    pub const fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Births table.
    #[must_use]
    pub const fn births(&self) -> &YearlySeries {
        &self.births
    }

    /// Demography table, when loaded.
    #[must_use]
    pub const fn demography(&self) -> Option<&YearlySeries> {
        self.demography.as_ref()
    }

    /// Table holding `target`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the population target is requested
    /// without a demography table.
    pub fn table_for(&self, target: Target) -> Result<&YearlySeries> {
        match target {
            Target::Births => Ok(&self.births),
            Target::Population => self.demography.as_ref().ok_or_else(|| {
                Error::InvalidInput("population models need the demography table".into())
            }),
        }
    }

    /// Split the table holding `target` at the threshold.
    ///
    /// # Errors
    ///
    /// Propagates [`TrainingData::table_for`] and [`YearlySeries::split`] errors.
    pub fn split_for(&self, target: Target) -> Result<TrainingSplit> {
        self.table_for(target)?.split(self.threshold)
    }
}

/// Observed regressors kept with a model so it can be re-conditioned later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExogHistory {
    /// Regressor columns, in design order
    pub fields: Vec<Field>,
    /// Years of `rows`
    pub years: Vec<i32>,
    /// One row per year
    pub rows: Vec<Vec<f64>>,
}

impl ExogHistory {
    /// Rows for exactly `years`, in order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if any year is not covered.
    pub fn rows_for(&self, years: &[i32]) -> Result<Vec<Vec<f64>>> {
        years
            .iter()
            .map(|year| {
                self.years
                    .binary_search(year)
                    .map(|idx| self.rows[idx].clone())
                    .map_err(|_| {
                        Error::InvalidInput(format!("no exogenous observation for {year}"))
                    })
            })
            .collect()
    }
}

/// A fitted model and the context it was trained in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    model_id: ModelId,
    target: Target,
    params: Hyperparameters,
    run_id: String,
    train_years: (i32, i32),
    test_years: (i32, i32),
    n_observations: usize,
    exog_history: Option<ExogHistory>,
    fitted: FittedModel,
}

impl TrainedModel {
    /// Assemble a trained model from a split and a fitted estimator.
    #[must_use]
    pub fn new(
        model_id: ModelId,
        params: Hyperparameters,
        split: &TrainingSplit,
        fitted: FittedModel,
    ) -> Self {
        let span = |years: &[i32]| {
            (
                years.first().copied().unwrap_or_default(),
                years.last().copied().unwrap_or_default(),
            )
        };
        Self {
            model_id,
            target: model_id.target(),
            params,
            run_id: String::new(),
            train_years: span(split.train().years()),
            test_years: span(split.test().years()),
            n_observations: split.train().len() + split.test().len(),
            exog_history: None,
            fitted,
        }
    }

    /// Keep the observed regressors.
    #[must_use]
    pub fn with_exog_history(mut self, history: ExogHistory) -> Self {
        self.exog_history = Some(history);
        self
    }

    /// Tag with the run that produced the model.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Model identifier.
    #[must_use]
    pub const fn model_id(&self) -> ModelId {
        self.model_id
    }

    /// Predicted quantity.
    #[must_use]
    pub const fn target(&self) -> Target {
        self.target
    }

    /// Hyperparameters used.
    #[must_use]
    pub const fn params(&self) -> &Hyperparameters {
        &self.params
    }

    /// Training run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// First and last training year.
    #[must_use]
    pub const fn train_years(&self) -> (i32, i32) {
        self.train_years
    }

    /// First and last held-out year.
    #[must_use]
    pub const fn test_years(&self) -> (i32, i32) {
        self.test_years
    }

    /// Train plus held-out observation count.
    #[must_use]
    pub const fn n_observations(&self) -> usize {
        self.n_observations
    }

    /// Observed regressors (population model only).
    #[must_use]
    pub const fn exog_history(&self) -> Option<&ExogHistory> {
        self.exog_history.as_ref()
    }

    /// The estimator.
    #[must_use]
    pub const fn fitted(&self) -> &FittedModel {
        &self.fitted
    }
}

/// What a trainer returns.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    /// Fitted model
    pub model: TrainedModel,
    /// Predictions on the held-out years
    pub predictions: Series,
    /// Observed values on the held-out years
    pub ground_truth: Series,
    /// Observed values on the training years
    pub history: Series,
}

impl TrainOutcome {
    /// Bundle a fitted model with its held-out predictions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `predictions` does not match the held-out length.
    pub fn from_split(
        model: TrainedModel,
        split: &TrainingSplit,
        target: Target,
        predictions: Vec<f64>,
    ) -> Result<Self> {
        Ok(Self {
            model,
            predictions: Series::with_axis(split.test().years(), predictions)?,
            ground_truth: split.test().series(target.field())?,
            history: split.train().series(target.field())?,
        })
    }
}

/// Fits one model family.
pub trait Trainer: Send + Sync {
    /// Fit on the training years and predict the held-out years.
    ///
    /// # Errors
    ///
    /// `Config` for unsupported hyperparameters (before any fitting),
    /// `InsufficientData` when the history is too short, `Optimizer` when
    /// the estimator fails.
    fn fit(&self, data: &TrainingData, params: &Hyperparameters) -> Result<TrainOutcome>;
}

/// Map from model id to trainer.
pub struct TrainerRegistry {
    trainers: FxHashMap<ModelId, Box<dyn Trainer>>,
}

impl TrainerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trainers: FxHashMap::default(),
        }
    }

    /// Registry with a trainer for every [`ModelId`].
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ModelId::Sarimax, Box::new(SarimaxTrainer::univariate()));
        registry.register(ModelId::SarimaxPop, Box::new(SarimaxTrainer::population()));
        registry.register(ModelId::Prophet, Box::new(ProphetTrainer));
        registry.register(ModelId::Xgb, Box::new(BoostTrainer::xgb()));
        registry.register(ModelId::Cat, Box::new(BoostTrainer::cat()));
        registry
    }

    /// Add or replace a trainer.
    pub fn register(&mut self, id: ModelId, trainer: Box<dyn Trainer>) {
        self.trainers.insert(id, trainer);
    }

    /// Trainer for `id`.
    #[must_use]
    pub fn get(&self, id: ModelId) -> Option<&dyn Trainer> {
        self.trainers.get(&id).map(AsRef::as_ref)
    }

    /// Fit the model registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an unregistered id and propagates trainer errors.
    pub fn fit(
        &self,
        id: ModelId,
        data: &TrainingData,
        params: &Hyperparameters,
    ) -> Result<TrainOutcome> {
        let trainer = self
            .get(id)
            .ok_or_else(|| Error::Config(format!("no trainer registered for '{id}'")))?;
        trainer.fit(data, params)
    }
}

impl Default for TrainerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for TrainerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.trainers.keys().collect();
        ids.sort();
        f.debug_struct("TrainerRegistry").field("trainers", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn births_table(first: i32, values: &[f64]) -> YearlySeries {
        let years: Vec<i32> = (first..).take(values.len()).collect();
        YearlySeries::new(years)
            .unwrap()
            .with_column(Field::Birth, values.to_vec())
            .unwrap()
    }

    #[test]
    fn test_model_id_round_trip() {
        for id in ModelId::ALL {
            assert_eq!(id.as_str().parse::<ModelId>().unwrap(), id);
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
    }

    #[test]
    fn test_unknown_model_id() {
        let err = "arima".parse::<ModelId>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_targets() {
        assert_eq!(ModelId::SarimaxPop.target(), Target::Population);
        assert_eq!(ModelId::Xgb.target(), Target::Births);
        assert_eq!("Births".parse::<Target>().unwrap(), Target::Births);
    }

    #[test]
    fn test_registry_covers_all_ids() {
        let registry = TrainerRegistry::with_defaults();
        for id in ModelId::ALL {
            assert!(registry.get(id).is_some(), "missing {id}");
        }
    }

    #[test]
    fn test_population_needs_demography() {
        let data = TrainingData::new(births_table(2000, &[1.0, 2.0, 3.0]), 2001);
        let err = data.split_for(Target::Population).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_exog_history_lookup() {
        let history = ExogHistory {
            fields: vec![Field::Birth],
            years: vec![2000, 2001, 2002],
            rows: vec![vec![1.0], vec![2.0], vec![3.0]],
        };
        assert_eq!(history.rows_for(&[2001, 2002]).unwrap(), vec![vec![2.0], vec![3.0]]);
        assert!(history.rows_for(&[1999]).is_err());
    }
}
