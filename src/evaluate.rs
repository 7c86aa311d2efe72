//! Held-out metrics: MAE, MSE, MAPE (percent) and R².

use crate::series::Series;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Error metrics of one prediction run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Mean absolute error
    pub mae: f64,
    /// Mean squared error
    pub mse: f64,
    /// Mean absolute percentage error, in percent
    pub mape: f64,
    /// Coefficient of determination
    pub r2: f64,
}

/// Compare predictions against ground truth on the same year axis.
///
/// When the truth is constant, R² is 1 for a perfect prediction and 0
/// otherwise.
///
/// # Errors
///
/// Returns `InvalidInput` when the inputs are empty, their year axes
/// differ, or a true value is zero (MAPE undefined; the year is named).
#[allow(clippy::cast_precision_loss)]
pub fn evaluate(y_true: &Series, y_pred: &Series) -> Result<Metrics> {
    if y_true.is_empty() {
        return Err(Error::InvalidInput("cannot evaluate an empty series".into()));
    }
    if y_true.years() != y_pred.years() {
        return Err(Error::InvalidInput(format!(
            "year axes differ: truth covers {:?}, predictions cover {:?}",
            y_true.years(),
            y_pred.years()
        )));
    }
    if let Some(year) = y_true
        .years()
        .iter()
        .zip(y_true.values())
        .find_map(|(year, v)| (*v == 0.0).then_some(*year))
    {
        return Err(Error::InvalidInput(format!(
            "MAPE undefined: true value is zero in {year}"
        )));
    }

    let truth = y_true.values();
    let pred = y_pred.values();
    let n = truth.len() as f64;
    let mean_truth = truth.iter().sum::<f64>() / n;

    let (mut abs, mut sq, mut pct, mut ss_tot) = (0.0, 0.0, 0.0, 0.0);
    for (&t, &p) in truth.iter().zip(pred) {
        let err = t - p;
        abs += err.abs();
        sq += err * err;
        pct += (err / t).abs();
        ss_tot += (t - mean_truth) * (t - mean_truth);
    }

    let r2 = if ss_tot > 0.0 {
        1.0 - sq / ss_tot
    } else if sq == 0.0 {
        1.0
    } else {
        0.0
    };

    Ok(Metrics {
        mae: abs / n,
        mse: sq / n,
        mape: pct / n * 100.0,
        r2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn series(values: &[f64]) -> Series {
        let years: Vec<i32> = (2022..).take(values.len()).collect();
        Series::new(years, values.to_vec()).unwrap()
    }

    #[test]
    fn test_known_values() {
        let m = evaluate(&series(&[100.0, 200.0]), &series(&[110.0, 190.0])).unwrap();
        assert!((m.mae - 10.0).abs() < 1e-12);
        assert!((m.mse - 100.0).abs() < 1e-12);
        assert!((m.mape - 7.5).abs() < 1e-12);
        assert!((m.r2 - (1.0 - 200.0 / 5000.0)).abs() < 1e-12);
    }

    #[test]
    fn test_constant_truth() {
        let perfect = evaluate(&series(&[5.0, 5.0]), &series(&[5.0, 5.0])).unwrap();
        assert_eq!(perfect.r2, 1.0);
        let off = evaluate(&series(&[5.0, 5.0]), &series(&[4.0, 6.0])).unwrap();
        assert_eq!(off.r2, 0.0);
    }

    #[test]
    fn test_zero_truth_names_year() {
        let err = evaluate(&series(&[3.0, 0.0]), &series(&[3.0, 1.0])).unwrap_err();
        assert!(err.to_string().contains("2023"));
    }

    #[test]
    fn test_axis_mismatch() {
        let truth = series(&[1.0, 2.0]);
        let pred = Series::new(vec![2030, 2031], vec![1.0, 2.0]).unwrap();
        assert!(matches!(evaluate(&truth, &pred), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_empty_input() {
        let empty = Series::new(vec![], vec![]).unwrap();
        assert!(evaluate(&empty, &empty).is_err());
    }

    proptest! {
        #[test]
        fn prop_perfect_prediction(values in prop::collection::vec(
            prop_oneof![1.0e-3..1.0e7_f64, -1.0e7..-1.0e-3_f64],
            1..40,
        )) {
            let s = series(&values);
            let m = evaluate(&s, &s).unwrap();
            prop_assert_eq!(m.mae, 0.0);
            prop_assert_eq!(m.mse, 0.0);
            prop_assert_eq!(m.mape, 0.0);
            prop_assert_eq!(m.r2, 1.0);
        }

        #[test]
        fn prop_mse_dominates_mae_squared(
            pairs in prop::collection::vec((1.0..1.0e4_f64, -100.0..100.0_f64), 1..30)
        ) {
            let truth: Vec<f64> = pairs.iter().map(|(t, _)| *t).collect();
            let pred: Vec<f64> = pairs.iter().map(|(t, e)| t + e).collect();
            let m = evaluate(&series(&truth), &series(&pred)).unwrap();
            prop_assert!(m.mse + 1e-9 >= m.mae * m.mae);
            prop_assert!(m.r2 <= 1.0);
        }
    }
}
