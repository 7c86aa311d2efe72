//! Nelder–Mead simplex minimiser
//!
//! Derivative-free, used for the conditional-sum-of-squares objective of
//! the SARIMAX estimator. Non-finite objective values are treated as
//! `+inf` so the simplex steps away from explosive parameter regions.
//!
//! The search stops when either the objective values or the vertices of
//! the simplex agree within tolerance, or when the best value stops
//! improving for a window of iterations. Flat ridges (near-cancelling AR
//! and MA roots) satisfy the first rule long before the second.

use crate::{Error, Result};
use tracing::debug;

/// Stopping rules for [`nelder_mead`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NelderMeadOptions {
    /// Iteration cap; reaching it without converging is an error
    pub max_iter: usize,
    /// Simplex spread in parameter space
    pub x_tol: f64,
    /// Simplex spread in objective value (relative to `1 + |f_best|`)
    pub f_tol: f64,
    /// Edge length of the initial simplex
    pub initial_step: f64,
    /// Iterations without a relative `f_tol` improvement of the best
    /// value before the search is considered stalled
    pub stall_window: usize,
}

impl NelderMeadOptions {
    /// Defaults scaled by problem dimension.
    #[must_use]
    pub const fn for_dim(dim: usize) -> Self {
        Self {
            max_iter: 2000 * (dim + 1),
            x_tol: 1e-7,
            f_tol: 1e-10,
            initial_step: 0.1,
            stall_window: 200 * (dim + 1),
        }
    }
}

/// Result of a converged minimisation.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    /// Arg-min
    pub x: Vec<f64>,
    /// Objective at `x`
    pub value: f64,
    /// Iterations used
    pub iterations: usize,
}

/// Minimise `f` starting from `x0`.
///
/// # Errors
///
/// Returns `Optimizer` when the iteration cap is hit before convergence
/// or when no finite objective value is ever found.
#[allow(clippy::cast_precision_loss)]
pub fn nelder_mead<F>(f: F, x0: &[f64], options: NelderMeadOptions) -> Result<Minimum>
where
    F: Fn(&[f64]) -> f64,
{
    let n = x0.len();
    let eval = |x: &[f64]| {
        let v = f(x);
        if v.is_finite() {
            v
        } else {
            f64::INFINITY
        }
    };

    if n == 0 {
        let value = eval(x0);
        if !value.is_finite() {
            return Err(Error::Optimizer("objective is not finite".to_string()));
        }
        return Ok(Minimum {
            x: Vec::new(),
            value,
            iterations: 0,
        });
    }

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(x0.to_vec());
    for i in 0..n {
        let mut vertex = x0.to_vec();
        vertex[i] += if vertex[i] == 0.0 {
            options.initial_step
        } else {
            options.initial_step * vertex[i].abs().max(1.0)
        };
        simplex.push(vertex);
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| eval(v)).collect();
    let mut anchor = f64::INFINITY;
    let mut anchor_iteration = 0;

    for iteration in 0..options.max_iter {
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let best = values[0];
        let worst = values[n];
        let f_spread = (worst - best).abs();
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0_f64, f64::max);
        let f_close = f_spread <= options.f_tol * (1.0 + best.abs());
        let x_close = x_spread <= options.x_tol.max(options.x_tol * max_abs(&simplex[0]));

        if best < anchor - options.f_tol * (1.0 + best.abs()) {
            anchor = best;
            anchor_iteration = iteration;
        }
        let stalled = iteration - anchor_iteration >= options.stall_window;

        if best.is_finite() && (f_close || x_close || stalled) {
            debug!(
                iterations = iteration,
                value = best,
                stalled,
                "nelder-mead converged"
            );
            return Ok(Minimum {
                x: simplex[0].clone(),
                value: best,
                iterations: iteration,
            });
        }

        let centroid: Vec<f64> = (0..n)
            .map(|j| simplex[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
            .collect();
        let towards = |coef: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&simplex[n])
                .map(|(c, w)| c + coef * (w - c))
                .collect()
        };

        let reflected = towards(-1.0);
        let f_reflected = eval(&reflected);

        if f_reflected < values[0] {
            let expanded = towards(-2.0);
            let f_expanded = eval(&expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
            continue;
        }
        if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
            continue;
        }

        let (contracted, f_contracted) = if f_reflected < values[n] {
            let c = towards(-0.5);
            let fc = eval(&c);
            (c, fc)
        } else {
            let c = towards(0.5);
            let fc = eval(&c);
            (c, fc)
        };
        if f_contracted < values[n].min(f_reflected) {
            simplex[n] = contracted;
            values[n] = f_contracted;
            continue;
        }

        // shrink towards the best vertex
        let best_vertex = simplex[0].clone();
        for i in 1..=n {
            simplex[i] = simplex[i]
                .iter()
                .zip(&best_vertex)
                .map(|(x, b)| b + 0.5 * (x - b))
                .collect();
            values[i] = eval(&simplex[i]);
        }
    }

    let best = values
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);
    Err(Error::Optimizer(format!(
        "Nelder-Mead did not converge in {} iterations (best objective {best})",
        options.max_iter
    )))
}

fn max_abs(x: &[f64]) -> f64 {
    x.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}
