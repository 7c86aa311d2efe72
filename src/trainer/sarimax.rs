use super::{
    ExogHistory, Hyperparameters, ModelId, TrainOutcome, TrainedModel, Trainer, TrainingData,
};
use crate::model::{FittedModel, Order, Sarimax, SarimaxSpec, SeasonalOrder, Trend};
use crate::series::Field;
use crate::{Error, Result};
use tracing::info;

/// Regressors of the population model, in design order.
pub const POPULATION_EXOG: [Field; 3] = [Field::Birth, Field::Death, Field::Migration];

const UNIVARIATE_KEYS: &[&str] = &["order", "seasonal_order", "trend", "maxiter"];
const POPULATION_KEYS: &[&str] = &["order", "seas", "seasonal_order", "trend", "maxiter"];

/// SARIMAX on births (`sarimax`) or on population with regressors (`sarimax_pop`).
#[derive(Debug, Clone, Copy)]
pub struct SarimaxTrainer {
    model_id: ModelId,
}

impl SarimaxTrainer {
    /// Births, no regressors.
    #[must_use]
    pub const fn univariate() -> Self {
        Self {
            model_id: ModelId::Sarimax,
        }
    }

    /// Population with birth, death and migration regressors.
    #[must_use]
    pub const fn population() -> Self {
        Self {
            model_id: ModelId::SarimaxPop,
        }
    }

    const fn with_exog(self) -> bool {
        matches!(self.model_id, ModelId::SarimaxPop)
    }

    fn spec(self, params: &Hyperparameters) -> Result<SarimaxSpec> {
        let keys = if self.with_exog() {
            POPULATION_KEYS
        } else {
            UNIVARIATE_KEYS
        };
        params.check_keys(self.model_id.as_str(), keys)?;

        let order = params
            .usize_array::<3>(&["order"])?
            .map_or_else(Order::default, |[p, d, q]| Order { p, d, q });
        let seasonal_keys: &[&str] = if self.with_exog() {
            &["seas", "seasonal_order"]
        } else {
            &["seasonal_order"]
        };
        let seasonal = params
            .usize_array::<4>(seasonal_keys)?
            .map_or_else(SeasonalOrder::default, |[p, d, q, s]| SeasonalOrder {
                p,
                d,
                q,
                s,
            });
        if seasonal.s == 1 {
            return Err(Error::Config(
                "seasonal period must be 0 (none) or at least 2".into(),
            ));
        }
        let trend = match params.str(&["trend"])? {
            None | Some("n") => Trend::None,
            Some("c") => Trend::Constant,
            Some(other) => {
                return Err(Error::Config(format!(
                    "trend must be \"n\" or \"c\", got \"{other}\""
                )))
            }
        };
        Ok(SarimaxSpec {
            order,
            seasonal,
            trend,
            max_iter: params.usize(&["maxiter"])?,
        })
    }
}

impl Trainer for SarimaxTrainer {
    fn fit(&self, data: &TrainingData, params: &Hyperparameters) -> Result<TrainOutcome> {
        let spec = self.spec(params)?;
        let target = self.model_id.target();
        let split = data.split_for(target)?;
        let table = data.table_for(target)?;
        let source = target.as_str();
        let endog = split.train().require(target.field(), source)?;

        let (fitted, predictions, exog_history) = if self.with_exog() {
            let train_x = split.train().rows(&POPULATION_EXOG)?;
            let test_x = split.test().rows(&POPULATION_EXOG)?;
            let model = Sarimax::fit(spec, endog, Some(train_x.as_slice()))?;
            let predictions = model.forecast(split.test().len(), Some(test_x.as_slice()))?;
            let history = ExogHistory {
                fields: POPULATION_EXOG.to_vec(),
                years: table.years().to_vec(),
                rows: table.rows(&POPULATION_EXOG)?,
            };
            (model, predictions, Some(history))
        } else {
            let model = Sarimax::fit(spec, endog, None)?;
            let predictions = model.forecast(split.test().len(), None)?;
            (model, predictions, None)
        };

        info!(
            model = %self.model_id,
            train = split.train().len(),
            held_out = split.test().len(),
            sigma2 = fitted.sigma2(),
            "sarimax fitted"
        );

        let mut model = TrainedModel::new(
            self.model_id,
            params.clone(),
            &split,
            FittedModel::Sarimax(fitted),
        );
        if let Some(history) = exog_history {
            model = model.with_exog_history(history);
        }
        TrainOutcome::from_split(model, &split, target, predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::YearlySeries;
    use crate::trainer::Target;
    use serde_json::json;

    fn births(n: i32) -> YearlySeries {
        let years: Vec<i32> = (1990..1990 + n).collect();
        let values: Vec<f64> = years
            .iter()
            .map(|&y| 1000.0 + 12.0 * f64::from(y - 1990) + 8.0 * f64::from(y % 3))
            .collect();
        YearlySeries::new(years)
            .unwrap()
            .with_column(Field::Birth, values)
            .unwrap()
    }

    fn demography(n: i32) -> YearlySeries {
        let years: Vec<i32> = (1990..1990 + n).collect();
        let col = |f: &dyn Fn(f64) -> f64| years.iter().map(|&y| f(f64::from(y - 1990))).collect::<Vec<_>>();
        let birth = col(&|t| 100.0 + 2.0 * t + (t * 0.7).sin() * 5.0);
        let death = col(&|t| 80.0 + t + (t * 1.3).cos() * 4.0);
        let migration = col(&|t| 10.0 + (t * 0.4).sin() * 3.0);
        let population: Vec<f64> = birth
            .iter()
            .zip(&death)
            .zip(&migration)
            .scan(10_000.0, |level, ((b, d), m)| {
                *level += b - d + m;
                Some(*level)
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

    #[test]
    fn test_univariate_predicts_held_out_years() {
        let data = TrainingData::new(births(34), 2021);
        let params = Hyperparameters::new().with("order", json!([1, 1, 0])).with("trend", "c");
        let outcome = SarimaxTrainer::univariate().fit(&data, &params).unwrap();
        assert_eq!(outcome.predictions.years(), &[2022, 2023]);
        assert_eq!(outcome.ground_truth.years(), &[2022, 2023]);
        assert_eq!(outcome.history.len(), 32);
        assert!(outcome.predictions.values().iter().all(|v| v.is_finite()));
        assert!(outcome.model.exog_history().is_none());
    }

    #[test]
    fn test_population_keeps_exog_history() {
        let table = demography(34);
        let data = TrainingData::new(births(34), 2021).with_demography(table);
        let params = Hyperparameters::new()
            .with("order", json!([1, 1, 0]))
            .with("seas", json!([0, 0, 0, 0]));
        let outcome = SarimaxTrainer::population().fit(&data, &params).unwrap();
        let history = outcome.model.exog_history().unwrap();
        assert_eq!(history.fields, POPULATION_EXOG.to_vec());
        assert_eq!(history.years.len(), 34);
        assert_eq!(outcome.model.target(), Target::Population);
    }

    #[test]
    fn test_default_hyperparameters_fit_both_targets() {
        let data = TrainingData::new(births(34), 2021).with_demography(demography(34));

        let outcome = SarimaxTrainer::univariate()
            .fit(&data, &Hyperparameters::new())
            .unwrap();
        assert_eq!(outcome.predictions.years(), &[2022, 2023]);
        assert!(outcome.predictions.values().iter().all(|v| v.is_finite()));

        let outcome = SarimaxTrainer::population()
            .fit(&data, &Hyperparameters::new())
            .unwrap();
        assert_eq!(outcome.predictions.years(), &[2022, 2023]);
        assert!(outcome.predictions.values().iter().all(|v| v.is_finite()));
        assert_eq!(outcome.model.target(), Target::Population);
    }

    #[test]
    fn test_oversized_seasonal_period_is_config_error() {
        let data = TrainingData::new(births(34), 2021);
        let params = Hyperparameters::new().with("seasonal_order", json!([1, 0, 0, u64::MAX]));
        let err = SarimaxTrainer::univariate().fit(&data, &params).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");

        let params = Hyperparameters::new().with("order", json!([0, 30_000, 0]));
        let err = SarimaxTrainer::univariate().fit(&data, &params).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn test_seas_key_is_population_only() {
        let data = TrainingData::new(births(34), 2021);
        let params = Hyperparameters::new().with("seas", json!([0, 0, 0, 0]));
        let err = SarimaxTrainer::univariate().fit(&data, &params).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_bad_trend_rejected_before_fit() {
        let data = TrainingData::new(births(3), 2021);
        let params = Hyperparameters::new().with("trend", "ct");
        let err = SarimaxTrainer::univariate().fit(&data, &params).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let years = vec![2020, 2021, 2022, 2023];
        let table = YearlySeries::new(years)
            .unwrap()
            .with_column(Field::Birth, vec![100.0, 110.0, 90.0, 95.0])
            .unwrap();
        let data = TrainingData::new(table, 2021);
        let err = SarimaxTrainer::univariate()
            .fit(&data, &Hyperparameters::new())
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientData { .. }));
    }
}
