//! Exogenous input policies for forecasting past the observed years.

use crate::series::Series;
use crate::trainer::{index_features, ModelId, TrainedModel};
use crate::{Error, Result};
use std::fmt::Write as _;

/// Everything a strategy may look at.
#[derive(Debug, Clone, Copy)]
pub struct ForecastContext<'a> {
    /// Model being extended
    pub model: &'a TrainedModel,
    /// Observed target over train and held-out years
    pub history: &'a Series,
    /// Years to forecast
    pub future_years: &'a [i32],
}

/// Model inputs for the future years.
#[derive(Debug, Clone, PartialEq)]
pub enum FutureInputs {
    /// Nothing beyond the observed history
    None,
    /// Regressor rows: observed after the training window, then assumed
    Regressors {
        /// Rows for the held-out years the model is re-conditioned on
        observed: Vec<Vec<f64>>,
        /// One row per future year
        future: Vec<Vec<f64>>,
    },
    /// Bare frame of future years
    Years(Vec<i32>),
    /// Feature rows (time index)
    Features(Vec<Vec<f64>>),
}

/// Inputs plus the human-readable assumptions behind them.
#[derive(Debug, Clone, PartialEq)]
pub struct FutureExogenous {
    /// Model inputs
    pub inputs: FutureInputs,
    /// Assumptions reported with the forecast
    pub assumptions: Vec<String>,
}

/// Builds future model inputs for one model family.
pub trait ExogenousStrategy: Send + Sync {
    /// Inputs for `ctx.future_years`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the model lacks what the policy needs.
    fn build_future_exogenous(&self, ctx: &ForecastContext<'_>) -> Result<FutureExogenous>;
}

/// Years of `history` after the model's training window.
fn years_after_training(ctx: &ForecastContext<'_>) -> Vec<i32> {
    let (_, train_end) = ctx.model.train_years();
    ctx.history
        .years()
        .iter()
        .copied()
        .filter(|&y| y > train_end)
        .collect()
}

/// Each regressor held at the mean of its last `window` observed years.
#[derive(Debug, Clone, Copy)]
pub struct TrailingMean {
    /// Years averaged
    pub window: usize,
}

impl ExogenousStrategy for TrailingMean {
    #[allow(clippy::cast_precision_loss)]
    fn build_future_exogenous(&self, ctx: &ForecastContext<'_>) -> Result<FutureExogenous> {
        let exog = ctx.model.exog_history().ok_or_else(|| {
            Error::InvalidInput(format!(
                "{} has no exogenous history to extend",
                ctx.model.model_id()
            ))
        })?;
        let last_observed = ctx.history.last_year().unwrap_or(i32::MIN);
        let observed_years: Vec<i32> = exog
            .years
            .iter()
            .copied()
            .filter(|&y| y <= last_observed)
            .collect();
        let window = self.window.max(1).min(observed_years.len());
        if window == 0 {
            return Err(Error::InvalidInput("no observed exogenous years".into()));
        }
        let tail_years = &observed_years[observed_years.len() - window..];
        let tail = exog.rows_for(tail_years)?;
        let means: Vec<f64> = (0..exog.fields.len())
            .map(|j| tail.iter().map(|row| row[j]).sum::<f64>() / window as f64)
            .collect();

        let mut note = format!(
            "{} held constant at their {}-{} mean (",
            exog.fields
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            tail_years[0],
            tail_years[window - 1],
        );
        for (i, (field, mean)) in exog.fields.iter().zip(&means).enumerate() {
            if i > 0 {
                note.push_str(", ");
            }
            let _ = write!(note, "{field}={mean:.1}");
        }
        note.push(')');

        Ok(FutureExogenous {
            inputs: FutureInputs::Regressors {
                observed: exog.rows_for(&years_after_training(ctx))?,
                future: vec![means; ctx.future_years.len()],
            },
            assumptions: vec![note],
        })
    }
}

/// No regressors; the model is re-conditioned on the full observed history.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservedHistoryOnly;

impl ExogenousStrategy for ObservedHistoryOnly {
    fn build_future_exogenous(&self, ctx: &ForecastContext<'_>) -> Result<FutureExogenous> {
        let last = ctx.history.last_year().unwrap_or_default();
        Ok(FutureExogenous {
            inputs: FutureInputs::None,
            assumptions: vec![format!(
                "conditioned on observed history through {last}; no exogenous inputs"
            )],
        })
    }
}

/// A frame of future years.
#[derive(Debug, Clone, Copy, Default)]
pub struct FutureFrame;

impl ExogenousStrategy for FutureFrame {
    fn build_future_exogenous(&self, ctx: &ForecastContext<'_>) -> Result<FutureExogenous> {
        Ok(FutureExogenous {
            inputs: FutureInputs::Years(ctx.future_years.to_vec()),
            assumptions: vec!["trend extrapolated from the training window; point forecast only".into()],
        })
    }
}

/// The integer time index continued past the train and held-out count.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextIndex;

impl ExogenousStrategy for NextIndex {
    fn build_future_exogenous(&self, ctx: &ForecastContext<'_>) -> Result<FutureExogenous> {
        let start = ctx.model.n_observations();
        let horizon = ctx.future_years.len();
        Ok(FutureExogenous {
            inputs: FutureInputs::Features(index_features(start, horizon)),
            assumptions: vec![format!(
                "time index continues at {start}..{}",
                start + horizon.saturating_sub(1)
            )],
        })
    }
}

/// Policy used for a model id.
#[must_use]
pub fn strategy_for(id: ModelId, exog_window: usize) -> Box<dyn ExogenousStrategy> {
    match id {
        ModelId::SarimaxPop => Box::new(TrailingMean {
            window: exog_window,
        }),
        ModelId::Sarimax => Box::new(ObservedHistoryOnly),
        ModelId::Prophet => Box::new(FutureFrame),
        ModelId::Xgb | ModelId::Cat => Box::new(NextIndex),
    }
}
