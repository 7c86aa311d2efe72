//! SARIMAX: seasonal ARIMA with exogenous regressors
//!
//! The model is a regression with SARIMA errors:
//!
//! ```text
//! Δ(B) y_t = c + Δ(B) x_t' β + u_t
//! φ(B) Φ(B^s) u_t = θ(B) Θ(B^s) e_t
//! Δ(B) = (1 - B)^d (1 - B^s)^D
//! ```
//!
//! Estimation is two-step: `β` (and `c`) by least squares on the
//! differenced data, then the ARMA polynomials by conditional sum of
//! squares minimised with Nelder–Mead. Stationarity and invertibility are
//! not enforced.
//!
//! A fitted model keeps the history it was conditioned on. [`Sarimax::append`]
//! re-conditions the same parameters on a longer history, which is how
//! forecasts past the held-out years are produced.

use super::linalg::{apply_poly, difference_poly, lag_poly, least_squares, mean, poly_mul};
use super::optim::{nelder_mead, NelderMeadOptions};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Non-seasonal order `(p, d, q)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// AR order
    pub p: usize,
    /// Differencing order
    pub d: usize,
    /// MA order
    pub q: usize,
}

impl Default for Order {
    fn default() -> Self {
        Self { p: 1, d: 1, q: 1 }
    }
}

/// Seasonal order `(P, D, Q, s)`; `s = 0` disables seasonality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SeasonalOrder {
    /// Seasonal AR order
    pub p: usize,
    /// Seasonal differencing order
    pub d: usize,
    /// Seasonal MA order
    pub q: usize,
    /// Period
    pub s: usize,
}

impl SeasonalOrder {
    /// True when the seasonal part has any effect.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.s > 1 && (self.p > 0 || self.d > 0 || self.q > 0)
    }
}

/// Deterministic trend term on the differenced scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Trend {
    /// No constant
    #[default]
    None,
    /// Constant (a drift once differenced)
    Constant,
}

/// Model specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SarimaxSpec {
    /// `(p, d, q)`
    pub order: Order,
    /// `(P, D, Q, s)`
    pub seasonal: SeasonalOrder,
    /// Trend term
    pub trend: Trend,
    /// Optimizer iteration cap (`None` = scaled by parameter count)
    pub max_iter: Option<usize>,
}

impl SarimaxSpec {
    fn seasonal_period(&self) -> usize {
        if self.seasonal.is_active() {
            self.seasonal.s
        } else {
            0
        }
    }

    /// Observations needed to fit `n_arma` ARMA parameters and `k_reg`
    /// regressors.
    ///
    /// Orders and periods are bounded by the history length `n` before any
    /// lag arithmetic, so absurd orders fail fast instead of building huge
    /// differencing polynomials.
    fn required_obs(&self, n: usize, k_reg: usize) -> Result<usize> {
        let Order { p, d, q } = self.order;
        if p.max(d).max(q) > n {
            return Err(Error::Config(format!(
                "order ({p}, {d}, {q}) exceeds the {n} observations available"
            )));
        }
        let s = self.seasonal_period();
        let (sp, sd, sq) = if s > 0 {
            (self.seasonal.p, self.seasonal.d, self.seasonal.q)
        } else {
            (0, 0, 0)
        };
        if s > n || sp.max(sd).max(sq) > n {
            return Err(Error::Config(format!(
                "seasonal order ({sp}, {sd}, {sq}, {s}) exceeds the {n} observations available"
            )));
        }

        let diff_lags = sd.checked_mul(s).and_then(|v| v.checked_add(d));
        let ar_lags = sp.checked_mul(s).and_then(|v| v.checked_add(p));
        [diff_lags, ar_lags, Some(sq), Some(q), Some(sp), Some(p), Some(k_reg)]
            .into_iter()
            .try_fold(2_usize, |acc, term| term.and_then(|t| acc.checked_add(t)))
            .ok_or_else(|| Error::Config("model order is too large".to_string()))
    }

    fn differencing(&self) -> Vec<f64> {
        let period = self.seasonal_period();
        let seasonal_d = if period > 0 { self.seasonal.d } else { 0 };
        difference_poly(self.order.d, seasonal_d, period)
    }

    fn arma_dims(&self) -> (usize, usize, usize, usize) {
        if self.seasonal_period() > 0 {
            (self.order.p, self.seasonal.p, self.order.q, self.seasonal.q)
        } else {
            (self.order.p, 0, self.order.q, 0)
        }
    }

    /// Expand raw ARMA parameters into full-lag AR and MA coefficients.
    ///
    /// AR coefficients `a` satisfy `u_t = Σ a_k u_{t-k} + ...`; MA
    /// coefficients `m` satisfy `... + e_t + Σ m_k e_{t-k}`.
    fn expand(&self, params: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let (p, sp, q, sq) = self.arma_dims();
        let s = self.seasonal_period().max(1);
        let (ar, rest) = params.split_at(p);
        let (sar, rest) = rest.split_at(sp);
        let (ma, sma) = rest.split_at(q);
        debug_assert_eq!(sma.len(), sq);

        let ar_poly = poly_mul(&lag_poly(ar, 1, -1.0), &lag_poly(sar, s, -1.0));
        let ma_poly = poly_mul(&lag_poly(ma, 1, 1.0), &lag_poly(sma, s, 1.0));
        (
            ar_poly[1..].iter().map(|c| -c).collect(),
            ma_poly[1..].to_vec(),
        )
    }
}

/// A fitted SARIMAX model together with the history it is conditioned on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sarimax {
    spec: SarimaxSpec,
    /// Raw parameters `[φ.., Φ.., θ.., Θ..]`
    arma_params: Vec<f64>,
    ar: Vec<f64>,
    ma: Vec<f64>,
    intercept: f64,
    beta: Vec<f64>,
    sigma2: f64,
    endog: Vec<f64>,
    exog: Option<Vec<Vec<f64>>>,
}

impl Sarimax {
    /// Fit to `endog`, optionally with row-major `exog` (one row per observation).
    ///
    /// # Errors
    ///
    /// - `Config` if an order or the seasonal period exceeds the history
    /// - `InsufficientData` if the history is too short for the order
    /// - `InvalidInput` for non-finite data or mismatched exog shape
    /// - `Optimizer` if the ARMA estimation does not converge
    pub fn fit(spec: SarimaxSpec, endog: &[f64], exog: Option<&[Vec<f64>]>) -> Result<Self> {
        validate_data(endog, exog)?;

        let k_exog = exog.and_then(|rows| rows.first()).map_or(0, Vec::len);
        let k_reg = k_exog + usize::from(spec.trend == Trend::Constant);
        let required = spec.required_obs(endog.len(), k_reg)?;
        if endog.len() < required {
            return Err(Error::InsufficientData {
                required,
                actual: endog.len(),
            });
        }

        let (p, sp, q, sq) = spec.arma_dims();
        let n_arma = p + sp + q + sq;
        let delta = spec.differencing();
        let w = apply_poly(&delta, endog);
        let xw = exog.map(|rows| difference_rows(&delta, rows));

        let (intercept, beta) = regress(&w, xw.as_deref(), spec.trend)?;
        let u = regression_residuals(&w, xw.as_deref(), intercept, &beta);

        let scale = {
            let m = mean(&u);
            let var = u.iter().map(|v| (v - m).powi(2)).sum::<f64>() / to_f64(u.len());
            if var > 0.0 && var.is_finite() {
                var
            } else {
                1.0
            }
        };

        let objective = |params: &[f64]| -> f64 {
            let (ar, ma) = spec.expand(params);
            let e = css_residuals(&u, &ar, &ma);
            let used = &e[ar.len().min(e.len())..];
            if used.is_empty() {
                return f64::INFINITY;
            }
            used.iter().map(|v| v * v).sum::<f64>() / to_f64(used.len()) / scale
        };

        let mut options = NelderMeadOptions::for_dim(n_arma);
        if let Some(max_iter) = spec.max_iter {
            options.max_iter = max_iter;
        }
        let minimum = nelder_mead(objective, &vec![0.0; n_arma], options)?;
        debug!(
            iterations = minimum.iterations,
            css = minimum.value,
            params = ?minimum.x,
            "sarimax arma estimation"
        );

        let (ar, ma) = spec.expand(&minimum.x);
        let model = Self {
            spec,
            arma_params: minimum.x,
            ar,
            ma,
            intercept,
            beta,
            sigma2: minimum.value * scale,
            endog: endog.to_vec(),
            exog: exog.map(<[Vec<f64>]>::to_vec),
        };
        model.check_finite()?;
        Ok(model)
    }

    /// Same parameters, conditioned on `endog`/`exog` appended to the
    /// current history.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when exog presence or width disagrees with the fit.
    pub fn append(&self, endog: &[f64], exog: Option<&[Vec<f64>]>) -> Result<Self> {
        let mut out = self.clone();
        out.endog.extend_from_slice(endog);
        match (&mut out.exog, exog) {
            (Some(history), Some(rows)) => {
                check_width(rows, self.n_exog())?;
                history.extend_from_slice(rows);
            }
            (None, None) => {}
            (Some(_), None) => {
                return Err(Error::InvalidInput(
                    "model was fitted with exogenous regressors; new rows are required".into(),
                ))
            }
            (None, Some(_)) => {
                return Err(Error::InvalidInput(
                    "model was fitted without exogenous regressors".into(),
                ))
            }
        }
        validate_data(&out.endog, out.exog.as_deref())?;
        Ok(out)
    }

    /// Point forecasts for the next `steps` periods after the history.
    ///
    /// `exog` must supply one row per step when the model has regressors.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the exogenous rows are missing or
    /// mis-shaped.
    pub fn forecast(&self, steps: usize, exog: Option<&[Vec<f64>]>) -> Result<Vec<f64>> {
        if steps == 0 {
            return Ok(Vec::new());
        }
        let delta = self.spec.differencing();
        let lags = delta.len() - 1;

        let future_exog: Option<Vec<Vec<f64>>> = match (&self.exog, exog) {
            (Some(history), Some(rows)) => {
                if rows.len() != steps {
                    return Err(Error::InvalidInput(format!(
                        "need {steps} exogenous rows, got {}",
                        rows.len()
                    )));
                }
                check_width(rows, self.n_exog())?;
                let mut all = history.clone();
                all.extend_from_slice(rows);
                Some(difference_rows(&delta, &all))
            }
            (None, _) => None,
            (Some(_), None) => {
                return Err(Error::InvalidInput(
                    "exogenous rows are required for this model".into(),
                ))
            }
        };

        let w = apply_poly(&delta, &self.endog);
        let n_w = w.len();
        let history_xw = future_exog.as_ref().map(|xw| &xw[..n_w]);
        let mut u = regression_residuals(&w, history_xw, self.intercept, &self.beta);
        let mut e = css_residuals(&u, &self.ar, &self.ma);

        let mut y = self.endog.clone();
        for h in 0..steps {
            let t = u.len();
            let ar_part: f64 = self
                .ar
                .iter()
                .enumerate()
                .filter(|(k, _)| *k < t)
                .map(|(k, a)| a * u[t - k - 1])
                .sum();
            let ma_part: f64 = self
                .ma
                .iter()
                .enumerate()
                .filter(|(k, _)| *k < t)
                .map(|(k, m)| m * e[t - k - 1])
                .sum();
            let u_hat = ar_part + ma_part;
            u.push(u_hat);
            e.push(0.0);

            let regression = self.intercept
                + future_exog.as_ref().map_or(0.0, |xw| dot(&xw[n_w + h], &self.beta));
            let w_hat = regression + u_hat;

            let t_y = y.len();
            let integrated: f64 = (1..=lags).map(|k| delta[k] * y[t_y - k]).sum();
            y.push(w_hat - integrated);
        }

        let out = y.split_off(self.endog.len());
        if out.iter().any(|v| !v.is_finite()) {
            return Err(Error::Optimizer(
                "forecast produced non-finite values".to_string(),
            ));
        }
        Ok(out)
    }

    /// Model specification.
    #[must_use]
    pub const fn spec(&self) -> &SarimaxSpec {
        &self.spec
    }

    /// Raw ARMA parameters `[φ.., Φ.., θ.., Θ..]`.
    #[must_use]
    pub fn arma_params(&self) -> &[f64] {
        &self.arma_params
    }

    /// Regression coefficients for the exogenous columns.
    #[must_use]
    pub fn beta(&self) -> &[f64] {
        &self.beta
    }

    /// Innovation variance estimate.
    #[must_use]
    pub const fn sigma2(&self) -> f64 {
        self.sigma2
    }

    /// Length of the conditioning history.
    #[must_use]
    pub fn n_obs(&self) -> usize {
        self.endog.len()
    }

    /// Number of exogenous columns (0 for a univariate model).
    #[must_use]
    pub fn n_exog(&self) -> usize {
        self.exog
            .as_ref()
            .and_then(|rows| rows.first())
            .map_or(0, Vec::len)
    }

    fn check_finite(&self) -> Result<()> {
        let finite = self
            .arma_params
            .iter()
            .chain(&self.beta)
            .chain(std::iter::once(&self.intercept))
            .chain(std::iter::once(&self.sigma2))
            .all(|v| v.is_finite());
        if finite {
            Ok(())
        } else {
            Err(Error::Optimizer(
                "SARIMAX estimation produced non-finite parameters".to_string(),
            ))
        }
    }
}

/// `e_t = u_t - Σ a_k u_{t-k} - Σ m_k e_{t-k}`, with `e_t = 0` until
/// enough AR lags are available.
fn css_residuals(u: &[f64], ar: &[f64], ma: &[f64]) -> Vec<f64> {
    let start = ar.len();
    let mut e = vec![0.0; u.len()];
    for t in start..u.len() {
        let ar_part: f64 = ar.iter().enumerate().map(|(k, a)| a * u[t - k - 1]).sum();
        let ma_part: f64 = ma
            .iter()
            .enumerate()
            .filter(|(k, _)| *k < t)
            .map(|(k, m)| m * e[t - k - 1])
            .sum();
        e[t] = u[t] - ar_part - ma_part;
    }
    e
}

fn regress(w: &[f64], xw: Option<&[Vec<f64>]>, trend: Trend) -> Result<(f64, Vec<f64>)> {
    let with_const = trend == Trend::Constant;
    let k_exog = xw.and_then(|rows| rows.first()).map_or(0, Vec::len);
    if !with_const && k_exog == 0 {
        return Ok((0.0, Vec::new()));
    }

    let design: Vec<Vec<f64>> = (0..w.len())
        .map(|t| {
            let mut row = Vec::with_capacity(k_exog + 1);
            if with_const {
                row.push(1.0);
            }
            if let Some(rows) = xw {
                row.extend_from_slice(&rows[t]);
            }
            row
        })
        .collect();
    let coef = least_squares(&design, w, &[])?;
    if with_const {
        Ok((coef[0], coef[1..].to_vec()))
    } else {
        Ok((0.0, coef))
    }
}

fn regression_residuals(
    w: &[f64],
    xw: Option<&[Vec<f64>]>,
    intercept: f64,
    beta: &[f64],
) -> Vec<f64> {
    w.iter()
        .enumerate()
        .map(|(t, wt)| {
            let fitted = intercept + xw.map_or(0.0, |rows| dot(&rows[t], beta));
            wt - fitted
        })
        .collect()
}

fn difference_rows(delta: &[f64], rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let k = rows.first().map_or(0, Vec::len);
    let columns: Vec<Vec<f64>> = (0..k)
        .map(|j| {
            let col: Vec<f64> = rows.iter().map(|r| r[j]).collect();
            apply_poly(delta, &col)
        })
        .collect();
    let n = columns.first().map_or(0, Vec::len);
    (0..n).map(|t| columns.iter().map(|c| c[t]).collect()).collect()
}

fn validate_data(endog: &[f64], exog: Option<&[Vec<f64>]>) -> Result<()> {
    if endog.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidInput(
            "endogenous series contains NaN or infinite values".into(),
        ));
    }
    if let Some(rows) = exog {
        if rows.len() != endog.len() {
            return Err(Error::InvalidInput(format!(
                "exog has {} rows for {} observations",
                rows.len(),
                endog.len()
            )));
        }
        let k = rows.first().map_or(0, Vec::len);
        check_width(rows, k)?;
        if rows.iter().flatten().any(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(
                "exogenous regressors contain NaN or infinite values".into(),
            ));
        }
    }
    Ok(())
}

fn check_width(rows: &[Vec<f64>], k: usize) -> Result<()> {
    if let Some(row) = rows.iter().find(|r| r.len() != k) {
        return Err(Error::InvalidInput(format!(
            "exogenous row has {} columns, expected {k}",
            row.len()
        )));
    }
    Ok(())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(n: usize) -> f64 {
    n as f64
}
