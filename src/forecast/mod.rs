//! Forecast extension
//!
//! Projects a trained model `N` years past the last year of its
//! prediction table. Each model family builds its future inputs through
//! an [`ExogenousStrategy`]:
//!
//! | model         | future inputs                                          |
//! |---------------|--------------------------------------------------------|
//! | `sarimax`     | none; re-conditioned on train + held-out history       |
//! | `sarimax_pop` | regressors held at their trailing mean                  |
//! | `prophet`     | future years                                           |
//! | `xgb`, `cat`  | time index continued past the observed count           |

mod strategy;

pub use strategy::{
    strategy_for, ExogenousStrategy, ForecastContext, FutureExogenous, FutureFrame, FutureInputs,
    NextIndex, ObservedHistoryOnly, TrailingMean,
};

use crate::artifact::PredictionTable;
use crate::config::{DEFAULT_EXOG_WINDOW, DEFAULT_MAX_HORIZON};
use crate::model::FittedModel;
use crate::series::Series;
use crate::trainer::{ModelId, TrainedModel};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

/// Predictions for years after the observed history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastTable {
    model_id: ModelId,
    years: Vec<i32>,
    y_pred: Vec<f64>,
    assumptions: Vec<String>,
}

impl ForecastTable {
    /// Model id.
    #[must_use]
    pub const fn model_id(&self) -> ModelId {
        self.model_id
    }

    /// Forecast years.
    #[must_use]
    pub fn years(&self) -> &[i32] {
        &self.years
    }

    /// Point forecasts.
    #[must_use]
    pub fn y_pred(&self) -> &[f64] {
        &self.y_pred
    }

    /// Input assumptions.
    #[must_use]
    pub fn assumptions(&self) -> &[String] {
        &self.assumptions
    }

    /// `{"Year", "y_pred", "assumptions"}` with non-finite predictions as `null`.
    #[must_use]
    pub fn to_response(&self) -> Value {
        let y_pred: Vec<Option<f64>> = self
            .y_pred
            .iter()
            .map(|v| v.is_finite().then_some(*v))
            .collect();
        json!({
            "Year": self.years,
            "y_pred": y_pred,
            "assumptions": self.assumptions,
        })
    }
}

/// Runs forecasts within a horizon limit.
#[derive(Debug, Clone, Copy)]
pub struct ForecastExtender {
    max_horizon: usize,
    exog_window: usize,
}

impl Default for ForecastExtender {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HORIZON, DEFAULT_EXOG_WINDOW)
    }
}

impl ForecastExtender {
    /// Extender accepting horizons `1..=max_horizon`.
    #[must_use]
    pub const fn new(max_horizon: usize, exog_window: usize) -> Self {
        Self {
            max_horizon,
            exog_window,
        }
    }

    /// Reject horizons outside `1..=max_horizon`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput`.
    pub fn check_horizon(&self, years: usize) -> Result<()> {
        if years == 0 || years > self.max_horizon {
            return Err(Error::InvalidInput(format!(
                "years must be between 1 and {}, got {years}",
                self.max_horizon
            )));
        }
        Ok(())
    }

    /// Forecast `years` years after the last year of `table`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a bad horizon or an empty table, and
    /// propagates estimator errors.
    pub fn extend(
        &self,
        model: &TrainedModel,
        table: &PredictionTable,
        years: usize,
    ) -> Result<ForecastTable> {
        self.check_horizon(years)?;
        let last = table
            .last_year()
            .ok_or_else(|| Error::InvalidInput("prediction table is empty".into()))?;
        let horizon = i32::try_from(years)
            .map_err(|_| Error::InvalidInput(format!("horizon {years} too large")))?;
        let future_years: Vec<i32> = (last + 1..=last + horizon).collect();
        let history = table.history()?;

        let ctx = ForecastContext {
            model,
            history: &history,
            future_years: &future_years,
        };
        let future = strategy_for(model.model_id(), self.exog_window).build_future_exogenous(&ctx)?;
        let y_pred = predict(model, &history, &future_years, future.inputs)?;

        info!(
            model = %model.model_id(),
            from = future_years[0],
            to = last + horizon,
            "forecast extended"
        );
        Ok(ForecastTable {
            model_id: model.model_id(),
            years: future_years,
            y_pred,
            assumptions: future.assumptions,
        })
    }
}

fn predict(
    model: &TrainedModel,
    history: &Series,
    future_years: &[i32],
    inputs: FutureInputs,
) -> Result<Vec<f64>> {
    let (_, train_end) = model.train_years();
    let observed: Vec<f64> = history
        .years()
        .iter()
        .zip(history.values())
        .filter(|(y, _)| **y > train_end)
        .map(|(_, v)| *v)
        .collect();
    let steps = future_years.len();

    match (model.fitted(), inputs) {
        (FittedModel::Sarimax(m), FutureInputs::None) => m.append(&observed, None)?.forecast(steps, None),
        (FittedModel::Sarimax(m), FutureInputs::Regressors { observed: rows, future }) => m
            .append(&observed, Some(rows.as_slice()))?
            .forecast(steps, Some(future.as_slice())),
        (FittedModel::Prophet(m), FutureInputs::Years(years)) => Ok(m.predict(&years)),
        (FittedModel::Boosted(m), FutureInputs::Features(rows)) => m.predict(&rows),
        (fitted, _) => Err(Error::InvalidInput(format!(
            "{} model cannot use the inputs built for {}",
            fitted.family(),
            model.model_id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Field, YearlySeries};
    use crate::trainer::{Hyperparameters, Trainer, TrainerRegistry, TrainingData};
    use serde_json::json;

    fn births(n: i32) -> YearlySeries {
        let years: Vec<i32> = (1990..1990 + n).collect();
        let values = years
            .iter()
            .map(|&y| 1500.0 + 10.0 * f64::from(y - 1990) + 5.0 * f64::from(y % 2))
            .collect();
        YearlySeries::new(years)
            .unwrap()
            .with_column(Field::Birth, values)
            .unwrap()
    }

    fn demography(n: i32) -> YearlySeries {
        let years: Vec<i32> = (1990..1990 + n).collect();
        let t: Vec<f64> = years.iter().map(|&y| f64::from(y - 1990)).collect();
        let birth: Vec<f64> = t.iter().map(|t| 100.0 + 2.0 * t + (t * 0.9).sin() * 6.0).collect();
        let death: Vec<f64> = t.iter().map(|t| 90.0 + t + (t * 1.7).cos() * 3.0).collect();
        let migration: Vec<f64> = t.iter().map(|t| 5.0 + (t * 0.5).sin() * 2.0).collect();
        let mut level = 50_000.0;
        let population = birth
            .iter()
            .zip(&death)
            .zip(&migration)
            .map(|((b, d), m)| {
                level += b - d + m;
                level
            })
            .collect();
        YearlySeries::new(years)
            .unwrap()
            .with_column(Field::Population, population)
            .unwrap()
            .with_column(Field::Birth, birth)
            .unwrap()
            .with_column(Field::Death, death)
            .unwrap()
            .with_column(Field::Migration, migration)
            .unwrap()
    }

    fn train(id: ModelId, params: Hyperparameters) -> (TrainedModel, PredictionTable) {
        let data = TrainingData::new(births(34), 2021).with_demography(demography(34));
        let outcome = TrainerRegistry::with_defaults()
            .get(id)
            .unwrap()
            .fit(&data, &params)
            .unwrap();
        let table =
            PredictionTable::build(&outcome.history, &outcome.ground_truth, &outcome.predictions);
        (outcome.model, table)
    }

    #[test]
    fn test_years_follow_last_observation() {
        let (model, table) = train(
            ModelId::Sarimax,
            Hyperparameters::new().with("order", json!([1, 1, 0])),
        );
        let fc = ForecastExtender::default().extend(&model, &table, 3).unwrap();
        assert_eq!(fc.years(), &[2024, 2025, 2026]);
        assert_eq!(fc.y_pred().len(), 3);
        assert!(fc.years().iter().all(|y| !table.years().contains(y)));
    }

    #[test]
    fn test_population_uses_trailing_mean() {
        let (model, table) = train(
            ModelId::SarimaxPop,
            Hyperparameters::new().with("order", json!([1, 1, 0])),
        );
        let fc = ForecastExtender::default().extend(&model, &table, 2).unwrap();
        assert_eq!(fc.years(), &[2024, 2025]);
        assert!(fc.assumptions()[0].contains("2021-2023 mean"));
        assert!(fc.y_pred().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_default_sarimax_models_extend() {
        for id in [ModelId::Sarimax, ModelId::SarimaxPop] {
            let (model, table) = train(id, Hyperparameters::new());
            let fc = ForecastExtender::default().extend(&model, &table, 22).unwrap();
            assert_eq!(fc.years().len(), 22, "{id}");
            assert_eq!(fc.years()[0], 2024, "{id}");
            assert!(fc.y_pred().iter().all(|v| v.is_finite()), "{id}");
        }
    }

    #[test]
    fn test_tree_index_continues_past_observations() {
        let (model, table) = train(
            ModelId::Xgb,
            Hyperparameters::new().with("n_estimators", 20),
        );
        let fc = ForecastExtender::default().extend(&model, &table, 4).unwrap();
        assert!(fc.assumptions()[0].contains("34..37"));
        let first = fc.y_pred()[0];
        assert!(fc.y_pred().iter().all(|v| (v - first).abs() < 1e-9));
    }

    #[test]
    fn test_prophet_frame() {
        let (model, table) = train(ModelId::Prophet, Hyperparameters::new());
        let fc = ForecastExtender::default().extend(&model, &table, 22).unwrap();
        assert_eq!(fc.years().len(), 22);
        assert_eq!(fc.years()[21], 2045);
    }

    #[test]
    fn test_horizon_bounds() {
        let (model, table) = train(
            ModelId::Xgb,
            Hyperparameters::new().with("n_estimators", 5),
        );
        let extender = ForecastExtender::default();
        assert!(matches!(
            extender.extend(&model, &table, 0),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            extender.extend(&model, &table, 23),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_response_nulls_non_finite() {
        let table = ForecastTable {
            model_id: ModelId::Cat,
            years: vec![2024, 2025],
            y_pred: vec![1.0, f64::NAN],
            assumptions: vec![],
        };
        let value = table.to_response();
        assert!(value["y_pred"][1].is_null());
        assert_eq!(value["Year"][1], 2025);
    }
}
