//! Prophet-style additive model for annual series
//!
//! ```text
//! y(t) = g(t) + s(t)            (additive)
//! y(t) = g(t) · (1 + s(t))      (multiplicative)
//! g(t) = k·t + m + Σ δ_j (t - c_j)_+
//! ```
//!
//! `t` is time scaled to `[0, 1]` over the history and `y` is scaled by
//! its maximum magnitude. Changepoints `c_j` sit on evenly spaced
//! observations in the first `changepoint_range` of the history. The MAP
//! fit uses a Laplace prior on `δ` (L1) and normal priors on `k`, `m` and
//! the seasonal coefficients (L2), solved by coordinate descent.
//!
//! Annual data cannot carry yearly, weekly, or daily seasonality; only a
//! multi-year `custom_period` cycle is modelled. Only point forecasts are
//! produced.

use super::linalg::{least_squares, mean};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// Prior scale of the `k` and `m` normal priors (Prophet uses 5).
const TREND_PRIOR_SCALE: f64 = 5.0;
const MAX_SWEEPS: usize = 20_000;
const SWEEP_TOL: f64 = 1e-11;

/// Trend shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Growth {
    /// Piecewise-linear trend
    #[default]
    Linear,
    /// Constant level
    Flat,
}

/// How the seasonal component combines with the trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityMode {
    /// `g + s`
    #[default]
    Additive,
    /// `g · (1 + s)`
    Multiplicative,
}

/// Hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProphetConfig {
    /// Trend shape
    pub growth: Growth,
    /// Requested number of changepoints (capped by history length)
    pub n_changepoints: usize,
    /// Share of the history eligible for changepoints
    pub changepoint_range: f64,
    /// Laplace scale of the changepoint deltas
    pub changepoint_prior_scale: f64,
    /// Seasonal combination
    pub seasonality_mode: SeasonalityMode,
    /// Normal scale of the seasonal coefficients
    pub seasonality_prior_scale: f64,
    /// Multi-year cycle length in years
    pub custom_period: Option<f64>,
    /// Fourier terms for the custom cycle
    pub fourier_order: usize,
}

impl Default for ProphetConfig {
    fn default() -> Self {
        Self {
            growth: Growth::Linear,
            n_changepoints: 25,
            changepoint_range: 0.8,
            changepoint_prior_scale: 0.05,
            seasonality_mode: SeasonalityMode::Additive,
            seasonality_prior_scale: 10.0,
            custom_period: None,
            fourier_order: 3,
        }
    }
}

impl ProphetConfig {
    /// Range checks.
    ///
    /// # Errors
    ///
    /// Returns `Config` for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if !(self.changepoint_range > 0.0 && self.changepoint_range <= 1.0) {
            return Err(Error::Config(format!(
                "changepoint_range must be in (0, 1], got {}",
                self.changepoint_range
            )));
        }
        if !(self.changepoint_prior_scale > 0.0 && self.changepoint_prior_scale.is_finite()) {
            return Err(Error::Config(
                "changepoint_prior_scale must be positive".into(),
            ));
        }
        if !(self.seasonality_prior_scale > 0.0 && self.seasonality_prior_scale.is_finite()) {
            return Err(Error::Config(
                "seasonality_prior_scale must be positive".into(),
            ));
        }
        if let Some(period) = self.custom_period {
            if !(period >= 2.0 && period.is_finite()) {
                return Err(Error::Config(format!(
                    "custom_period must be at least 2 years on annual data, got {period}"
                )));
            }
            if self.fourier_order == 0 {
                return Err(Error::Config("fourier_order must be at least 1".into()));
            }
        }
        Ok(())
    }
}

/// A fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prophet {
    config: ProphetConfig,
    year_start: f64,
    year_span: f64,
    y_scale: f64,
    changepoints: Vec<f64>,
    k: f64,
    m: f64,
    deltas: Vec<f64>,
    seasonal: Vec<f64>,
}

impl Prophet {
    /// Fit on `(years, y)`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for invalid hyperparameters, `InsufficientData`
    /// with fewer than two years, `InvalidInput` for non-finite data, and
    /// `Optimizer` if the fit produces non-finite coefficients.
    pub fn fit(config: ProphetConfig, years: &[i32], y: &[f64]) -> Result<Self> {
        config.validate()?;
        if years.len() != y.len() {
            return Err(Error::InvalidInput(format!(
                "{} years for {} values",
                years.len(),
                y.len()
            )));
        }
        if years.len() < 2 {
            return Err(Error::InsufficientData {
                required: 2,
                actual: years.len(),
            });
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidInput("series contains non-finite values".into()));
        }

        let year_start = f64::from(years[0]);
        let year_span = (f64::from(years[years.len() - 1]) - year_start).max(1.0);
        let y_scale = y.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };
        let t: Vec<f64> = years
            .iter()
            .map(|&yr| (f64::from(yr) - year_start) / year_span)
            .collect();
        let ys: Vec<f64> = y.iter().map(|v| v / y_scale).collect();

        let changepoints = match config.growth {
            Growth::Linear => place_changepoints(&t, config.n_changepoints, config.changepoint_range),
            Growth::Flat => Vec::new(),
        };

        let mut model = Self {
            config,
            year_start,
            year_span,
            y_scale,
            changepoints,
            k: 0.0,
            m: 0.0,
            deltas: Vec::new(),
            seasonal: Vec::new(),
        };

        let (sigma2, base) = model.base_trend(&t, &ys)?;
        let seasonal_rows: Vec<Vec<f64>> = years.iter().map(|&yr| model.fourier(yr)).collect();
        let n_seasonal = seasonal_rows.first().map_or(0, Vec::len);

        match config.seasonality_mode {
            SeasonalityMode::Additive => {
                let (design, penalties) = model.design(&t, Some(seasonal_rows.as_slice()), sigma2);
                let coef = coordinate_descent(&design, &ys, &penalties, &base);
                model.assign(&coef, n_seasonal);
            }
            SeasonalityMode::Multiplicative => {
                let (design, penalties) = model.design(&t, None, sigma2);
                let coef = coordinate_descent(&design, &ys, &penalties, &base);
                model.assign(&coef, 0);
                if n_seasonal > 0 {
                    model.seasonal = model.fit_multiplicative(&t, &ys, &seasonal_rows, sigma2)?;
                }
            }
        }

        let finite = [model.k, model.m]
            .iter()
            .chain(&model.deltas)
            .chain(&model.seasonal)
            .all(|v| v.is_finite());
        if !finite {
            return Err(Error::Optimizer(
                "trend model produced non-finite coefficients".into(),
            ));
        }
        debug!(
            k = model.k,
            m = model.m,
            changepoints = model.changepoints.len(),
            "prophet trend fitted"
        );
        Ok(model)
    }

    /// Point forecasts (`yhat`) for arbitrary years.
    #[must_use]
    pub fn predict(&self, years: &[i32]) -> Vec<f64> {
        years
            .iter()
            .map(|&yr| {
                let t = (f64::from(yr) - self.year_start) / self.year_span;
                let trend = self.trend(t);
                let features = self.fourier(yr);
                let s: f64 = features.iter().zip(&self.seasonal).map(|(f, b)| f * b).sum();
                let yhat = match self.config.seasonality_mode {
                    SeasonalityMode::Additive => trend + s,
                    SeasonalityMode::Multiplicative => trend * (1.0 + s),
                };
                yhat * self.y_scale
            })
            .collect()
    }

    /// Hyperparameters used for the fit.
    #[must_use]
    pub const fn config(&self) -> &ProphetConfig {
        &self.config
    }

    /// Changepoint locations in years.
    #[must_use]
    pub fn changepoint_years(&self) -> Vec<f64> {
        self.changepoints
            .iter()
            .map(|c| self.year_start + c * self.year_span)
            .collect()
    }

    fn trend(&self, t: f64) -> f64 {
        let hinge: f64 = self
            .changepoints
            .iter()
            .zip(&self.deltas)
            .map(|(c, d)| d * (t - c).max(0.0))
            .sum();
        self.k * t + self.m + hinge
    }

    #[allow(clippy::cast_precision_loss)]
    fn fourier(&self, year: i32) -> Vec<f64> {
        let Some(period) = self.config.custom_period else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(2 * self.config.fourier_order);
        for order in 1..=self.config.fourier_order {
            let angle = 2.0 * PI * order as f64 * f64::from(year) / period;
            out.push(angle.sin());
            out.push(angle.cos());
        }
        out
    }

    fn trend_row(&self, t: f64) -> Vec<f64> {
        let mut row = Vec::with_capacity(2 + self.changepoints.len());
        match self.config.growth {
            Growth::Linear => {
                row.push(t);
                row.push(1.0);
                row.extend(self.changepoints.iter().map(|c| (t - c).max(0.0)));
            }
            Growth::Flat => row.push(1.0),
        }
        row
    }

    /// Design matrix and per-column penalties `(l1, l2)`.
    fn design(
        &self,
        t: &[f64],
        seasonal: Option<&[Vec<f64>]>,
        sigma2: f64,
    ) -> (Vec<Vec<f64>>, Vec<(f64, f64)>) {
        let trend_l2 = sigma2 / TREND_PRIOR_SCALE.powi(2);
        let delta_l1 = sigma2 / self.config.changepoint_prior_scale;
        let season_l2 = sigma2 / self.config.seasonality_prior_scale.powi(2);

        let mut penalties = match self.config.growth {
            Growth::Linear => vec![(0.0, trend_l2), (0.0, trend_l2)],
            Growth::Flat => vec![(0.0, trend_l2)],
        };
        penalties.extend(std::iter::repeat((delta_l1, 0.0)).take(self.changepoints.len()));

        let design = t
            .iter()
            .enumerate()
            .map(|(i, &ti)| {
                let mut row = self.trend_row(ti);
                if let Some(rows) = seasonal {
                    row.extend_from_slice(&rows[i]);
                }
                row
            })
            .collect();
        if let Some(first) = seasonal.and_then(|rows| rows.first()) {
            penalties.extend(std::iter::repeat((0.0, season_l2)).take(first.len()));
        }
        (design, penalties)
    }

    fn assign(&mut self, coef: &[f64], n_seasonal: usize) {
        let n_trend = coef.len() - n_seasonal;
        match self.config.growth {
            Growth::Linear => {
                self.k = coef[0];
                self.m = coef[1];
                self.deltas = coef[2..n_trend].to_vec();
            }
            Growth::Flat => {
                self.k = 0.0;
                self.m = coef[0];
                self.deltas = Vec::new();
            }
        }
        self.seasonal = coef[n_trend..].to_vec();
    }

    /// Unpenalised straight-line (or level) fit on the scaled data: the
    /// residual variance and the coefficients used as a warm start.
    #[allow(clippy::cast_precision_loss)]
    fn base_trend(&self, t: &[f64], ys: &[f64]) -> Result<(f64, Vec<f64>)> {
        let rows: Vec<Vec<f64>> = t
            .iter()
            .map(|&ti| match self.config.growth {
                Growth::Linear => vec![ti, 1.0],
                Growth::Flat => vec![1.0],
            })
            .collect();
        let coef = least_squares(&rows, ys, &[])?;
        let resid: Vec<f64> = rows
            .iter()
            .zip(ys)
            .map(|(r, y)| y - r.iter().zip(&coef).map(|(a, b)| a * b).sum::<f64>())
            .collect();
        let var = resid.iter().map(|r| r * r).sum::<f64>() / resid.len() as f64;
        Ok((var.max(1e-8), coef))
    }

    fn fit_multiplicative(
        &self,
        t: &[f64],
        ys: &[f64],
        seasonal_rows: &[Vec<f64>],
        sigma2: f64,
    ) -> Result<Vec<f64>> {
        let mut rows = Vec::new();
        let mut target = Vec::new();
        for ((&ti, &yi), features) in t.iter().zip(ys).zip(seasonal_rows) {
            let g = self.trend(ti);
            if g.abs() > 1e-9 {
                rows.push(features.clone());
                target.push(yi / g - 1.0);
            }
        }
        if rows.is_empty() {
            return Err(Error::Optimizer(
                "trend is zero everywhere; multiplicative seasonality is undefined".into(),
            ));
        }
        let level = mean(&target.iter().map(|v| v.abs()).collect::<Vec<_>>()).max(1e-12);
        let penalty = sigma2 / self.config.seasonality_prior_scale.powi(2) / level;
        let penalties = vec![penalty; seasonal_rows[0].len()];
        least_squares(&rows, &target, &penalties)
    }
}

/// Evenly spaced changepoints over the first `range` of `t` (excluding the first point).
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn place_changepoints(t: &[f64], requested: usize, range: f64) -> Vec<f64> {
    let hist_size = (t.len() as f64 * range).floor() as usize;
    let n = requested.min(hist_size.saturating_sub(1));
    if n == 0 {
        return Vec::new();
    }
    let last = (hist_size - 1) as f64;
    (1..=n)
        .map(|i| {
            let idx = (last * i as f64 / n as f64).round() as usize;
            t[idx.min(t.len() - 1)]
        })
        .collect()
}

/// Minimise `½‖y − Xb‖² + Σ l1_j |b_j| + ½ Σ l2_j b_j²`, starting with
/// the leading coefficients set to `warm`.
fn coordinate_descent(
    x: &[Vec<f64>],
    y: &[f64],
    penalties: &[(f64, f64)],
    warm: &[f64],
) -> Vec<f64> {
    let k = penalties.len();
    let mut beta = vec![0.0; k];
    for (b, w) in beta.iter_mut().zip(warm) {
        *b = *w;
    }
    let mut resid: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(row, yi)| yi - row.iter().zip(&beta).map(|(a, b)| a * b).sum::<f64>())
        .collect();
    let col_sq: Vec<f64> = (0..k)
        .map(|j| x.iter().map(|row| row[j] * row[j]).sum())
        .collect();

    for _ in 0..MAX_SWEEPS {
        let mut max_change = 0.0_f64;
        for j in 0..k {
            let denom = col_sq[j] + penalties[j].1;
            if denom <= 0.0 {
                continue;
            }
            let rho: f64 = x
                .iter()
                .zip(&resid)
                .map(|(row, r)| row[j] * (r + row[j] * beta[j]))
                .sum();
            let l1 = penalties[j].0;
            let updated = soft_threshold(rho, l1) / denom;
            let change = updated - beta[j];
            if change != 0.0 {
                for (row, r) in x.iter().zip(resid.iter_mut()) {
                    *r -= row[j] * change;
                }
                beta[j] = updated;
                max_change = max_change.max(change.abs());
            }
        }
        if max_change < SWEEP_TOL {
            break;
        }
    }
    beta
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}
