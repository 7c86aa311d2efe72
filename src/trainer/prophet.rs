use super::{Hyperparameters, ModelId, TrainOutcome, TrainedModel, Trainer, TrainingData};
use crate::model::{FittedModel, Growth, Prophet, ProphetConfig, SeasonalityMode};
use crate::{Error, Result};
use tracing::{debug, info};

const KEYS: &[&str] = &[
    "growth",
    "n_changepoints",
    "changepoint_range",
    "changepoint_prior_scale",
    "seasonality_mode",
    "seasonality_prior_scale",
    "yearly_seasonality",
    "weekly_seasonality",
    "daily_seasonality",
    "custom_period",
    "fourier_order",
    "interval_width",
];

/// Sub-annual seasonalities; meaningless on one observation per year.
const IGNORED_SEASONALITIES: [&str; 3] =
    ["yearly_seasonality", "weekly_seasonality", "daily_seasonality"];

/// Trend model on births.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProphetTrainer;

impl ProphetTrainer {
    fn config(params: &Hyperparameters) -> Result<ProphetConfig> {
        params.check_keys(ModelId::Prophet.as_str(), KEYS)?;
        let defaults = ProphetConfig::default();

        let growth = match params.str(&["growth"])? {
            None | Some("linear") => Growth::Linear,
            Some("flat") => Growth::Flat,
            Some(other) => {
                return Err(Error::Config(format!(
                    "growth must be \"linear\" or \"flat\", got \"{other}\""
                )))
            }
        };
        let seasonality_mode = match params.str(&["seasonality_mode"])? {
            None | Some("additive") => SeasonalityMode::Additive,
            Some("multiplicative") => SeasonalityMode::Multiplicative,
            Some(other) => {
                return Err(Error::Config(format!(
                    "seasonality_mode must be \"additive\" or \"multiplicative\", got \"{other}\""
                )))
            }
        };
        for key in IGNORED_SEASONALITIES {
            if params.has(key) {
                debug!(key, "sub-annual seasonality ignored on yearly data");
            }
        }
        if let Some(width) = params.f64(&["interval_width"])? {
            if !(width > 0.0 && width < 1.0) {
                return Err(Error::Config(format!(
                    "interval_width must be in (0, 1), got {width}"
                )));
            }
        }

        let config = ProphetConfig {
            growth,
            n_changepoints: params
                .usize(&["n_changepoints"])?
                .unwrap_or(defaults.n_changepoints),
            changepoint_range: params
                .f64(&["changepoint_range"])?
                .unwrap_or(defaults.changepoint_range),
            changepoint_prior_scale: params
                .f64(&["changepoint_prior_scale"])?
                .unwrap_or(defaults.changepoint_prior_scale),
            seasonality_mode,
            seasonality_prior_scale: params
                .f64(&["seasonality_prior_scale"])?
                .unwrap_or(defaults.seasonality_prior_scale),
            custom_period: params.f64(&["custom_period"])?,
            fourier_order: params
                .usize(&["fourier_order"])?
                .unwrap_or(defaults.fourier_order),
        };
        config.validate()?;
        Ok(config)
    }
}

impl Trainer for ProphetTrainer {
    fn fit(&self, data: &TrainingData, params: &Hyperparameters) -> Result<TrainOutcome> {
        let config = Self::config(params)?;
        let target = ModelId::Prophet.target();
        let split = data.split_for(target)?;
        let y = split.train().require(target.field(), target.as_str())?;

        let fitted = Prophet::fit(config, split.train().years(), y)?;
        let predictions = fitted.predict(split.test().years());
        info!(
            model = %ModelId::Prophet,
            train = split.train().len(),
            changepoints = fitted.changepoint_years().len(),
            "trend model fitted"
        );

        let model = TrainedModel::new(
            ModelId::Prophet,
            params.clone(),
            &split,
            FittedModel::Prophet(fitted),
        );
        TrainOutcome::from_split(model, &split, target, predictions)
    }
}
