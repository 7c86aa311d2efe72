//! Small dense linear algebra: least squares and lag polynomials.
//!
//! Matrices here are a handful of columns wide (exogenous regressors,
//! trend terms), so normal equations with column scaling are enough.

use crate::{Error, Result};

/// Ridge added to the scaled normal matrix diagonal.
const JITTER: f64 = 1e-10;

/// Solve `min ||X b - y||² + Σ penalty_j b_j²` for `b`.
///
/// `rows` is row-major (one row per observation). Columns are scaled to
/// unit RMS before solving, so penalties apply on that scale.
///
/// # Errors
///
/// Returns `InsufficientData` when there are fewer rows than columns and
/// `Optimizer` when the system is numerically singular.
#[allow(clippy::cast_precision_loss)]
pub fn least_squares(rows: &[Vec<f64>], y: &[f64], penalty: &[f64]) -> Result<Vec<f64>> {
    let k = rows.first().map_or(0, Vec::len);
    if k == 0 {
        return Ok(Vec::new());
    }
    if rows.len() < k && penalty.iter().all(|&p| p <= 0.0) {
        return Err(Error::InsufficientData {
            required: k,
            actual: rows.len(),
        });
    }
    if rows.len() != y.len() {
        return Err(Error::InvalidInput(format!(
            "design has {} rows but target has {}",
            rows.len(),
            y.len()
        )));
    }

    let scale: Vec<f64> = (0..k)
        .map(|j| {
            let ms = rows.iter().map(|r| r[j] * r[j]).sum::<f64>() / rows.len() as f64;
            let rms = ms.sqrt();
            if rms > 0.0 && rms.is_finite() {
                rms
            } else {
                1.0
            }
        })
        .collect();

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, &target) in rows.iter().zip(y) {
        for i in 0..k {
            let xi = row[i] / scale[i];
            xty[i] += xi * target;
            for j in 0..k {
                xtx[i][j] += xi * row[j] / scale[j];
            }
        }
    }
    for (i, row) in xtx.iter_mut().enumerate() {
        let diag = row[i];
        let pen = penalty.get(i).copied().unwrap_or(0.0).max(0.0);
        row[i] = diag + pen + JITTER * (1.0 + diag.abs());
    }

    let solved = solve(xtx, xty)?;
    Ok(solved.iter().zip(&scale).map(|(b, s)| b / s).collect())
}

/// Solve a square system by Gaussian elimination with partial pivoting.
///
/// # Errors
///
/// Returns `Optimizer` when a pivot vanishes.
pub fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-300 || !a[pivot][col].is_finite() {
            return Err(Error::Optimizer("singular normal matrix".to_string()));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for c in col..n {
                a[row][c] -= factor * a[col][c];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|c| a[row][c] * x[c]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

/// Multiply two lag polynomials given by coefficient vectors (index = lag).
#[must_use]
pub fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Lag polynomial `1 + sign·Σ c_i B^(i·step)` for `i = 1..=coeffs.len()`.
#[must_use]
pub fn lag_poly(coeffs: &[f64], step: usize, sign: f64) -> Vec<f64> {
    let mut poly = vec![0.0; coeffs.len() * step + 1];
    poly[0] = 1.0;
    for (i, &c) in coeffs.iter().enumerate() {
        poly[(i + 1) * step] = sign * c;
    }
    poly
}

/// Differencing polynomial `(1 - B)^d (1 - B^s)^D`.
#[must_use]
pub fn difference_poly(d: usize, seasonal_d: usize, period: usize) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..d {
        poly = poly_mul(&poly, &[1.0, -1.0]);
    }
    if period > 0 {
        for _ in 0..seasonal_d {
            poly = poly_mul(&poly, &lag_poly(&[1.0], period, -1.0));
        }
    }
    poly
}

/// Apply a lag polynomial: `out[t] = Σ_k poly[k] · x[t + L - k]`, dropping
/// the first `L = poly.len() - 1` points.
#[must_use]
pub fn apply_poly(poly: &[f64], x: &[f64]) -> Vec<f64> {
    let lags = poly.len().saturating_sub(1);
    if x.len() <= lags {
        return Vec::new();
    }
    (lags..x.len())
        .map(|t| poly.iter().enumerate().map(|(k, c)| c * x[t - k]).sum())
        .collect()
}

/// Arithmetic mean (0 for an empty slice).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_least_squares_recovers_line() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![1.0, f64::from(i)]).collect();
        let y: Vec<f64> = (0..10).map(|i| 3.0 + 2.0 * f64::from(i)).collect();
        let beta = least_squares(&rows, &y, &[]).unwrap();
        assert!((beta[0] - 3.0).abs() < 1e-6);
        assert!((beta[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_least_squares_badly_scaled_columns() {
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![1.0e6 + f64::from(i) * 1.0e4, f64::from(i % 3)])
            .collect();
        let y: Vec<f64> = rows.iter().map(|r| 0.5 * r[0] - 7.0 * r[1]).collect();
        let beta = least_squares(&rows, &y, &[]).unwrap();
        assert!((beta[0] - 0.5).abs() < 1e-6);
        assert!((beta[1] + 7.0).abs() < 1e-3);
    }

    #[test]
    fn test_difference_poly() {
        assert_eq!(difference_poly(1, 0, 0), vec![1.0, -1.0]);
        assert_eq!(difference_poly(2, 0, 0), vec![1.0, -2.0, 1.0]);
        assert_eq!(difference_poly(0, 1, 2), vec![1.0, 0.0, -1.0]);
    }

    #[test]
    fn test_apply_poly_first_difference() {
        let diffed = apply_poly(&[1.0, -1.0], &[1.0, 4.0, 9.0, 16.0]);
        assert_eq!(diffed, vec![3.0, 5.0, 7.0]);
    }
}
