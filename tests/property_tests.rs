//! Property-based tests for popcast
//!
//! - Aggregation: one row per distinct year, totals preserved
//! - Prediction tables: axis is the sorted union of the inputs
//! - Forecasts: future years never overlap observed years
//! - Run with ProptestConfig::with_cases(32); model fits are not free

use popcast::aggregate::{aggregate, load_and_clean, RawExtracts, Source};
use popcast::artifact::PredictionTable;
use popcast::forecast::ForecastExtender;
use popcast::series::{Field, Series, YearlySeries};
use popcast::trainer::{Hyperparameters, ModelId, TrainerRegistry, TrainingData};
use proptest::prelude::*;
use std::collections::BTreeSet;

// ============================================================================
// Strategies
// ============================================================================

/// Raw rows `(year, age, sex, value)` over a narrow year range.
fn arb_raw_rows() -> impl Strategy<Value = Vec<(i32, u8, u8, u32)>> {
    proptest::collection::vec((2000i32..2015, 0u8..100, 1u8..=2, 0u32..10_000), 1..200)
}

fn to_csv(header: &str, rows: &[(i32, u8, u8, u32)]) -> String {
    let mut out = format!("{header}\n");
    for (year, age, sex, value) in rows {
        out.push_str(&format!("{year},{age},{sex},1,{value}\n"));
    }
    out
}

/// Strictly increasing years with values.
fn arb_series(len: std::ops::Range<usize>) -> impl Strategy<Value = Series> {
    (1990i32..2000, proptest::collection::vec((1i32..3, 1.0f64..1e4), len)).prop_map(
        |(start, steps)| {
            let mut year = start;
            let mut years = Vec::with_capacity(steps.len());
            let mut values = Vec::with_capacity(steps.len());
            for (gap, value) in steps {
                year += gap;
                years.push(year);
                values.push(value);
            }
            Series::new(years, values).unwrap()
        },
    )
}

// ============================================================================
// Aggregation
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// One output row per distinct births year; each column sums its extract.
    #[test]
    fn prop_aggregate_one_row_per_year(
        births in arb_raw_rows(),
        deaths in arb_raw_rows(),
        population in arb_raw_rows(),
    ) {
        let births_csv = to_csv("Year,Age,ID_sex,ID_np,Birth", &births);
        let deaths_csv = to_csv("Year,Age,ID_sex,ID_np,Death", &deaths);
        let population_csv = to_csv("Year,Age,ID_sex,ID_np,Population", &population);
        let extracts = RawExtracts::from_bytes(
            births_csv.as_bytes(),
            deaths_csv.as_bytes(),
            population_csv.as_bytes(),
            None,
        ).unwrap();
        let out = aggregate(&extracts).unwrap();

        let years: BTreeSet<i32> = births.iter().map(|r| r.0).collect();
        let expected_years: Vec<i32> = years.iter().copied().collect();
        prop_assert_eq!(out.demography.years(), expected_years.as_slice());
        prop_assert_eq!(out.births.years(), out.demography.years());

        let total: f64 = out.births.column(Field::Birth).unwrap().iter().sum();
        let expected: u64 = births.iter().map(|r| u64::from(r.3)).sum();
        #[allow(clippy::cast_precision_loss)]
        let expected = expected as f64;
        prop_assert_eq!(total, expected);

        // Deaths outside the births years are dropped by the left join.
        let joined: f64 = out.demography.column(Field::Death).unwrap().iter().sum();
        let kept: u64 = deaths
            .iter()
            .filter(|r| years.contains(&r.0))
            .map(|r| u64::from(r.3))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let kept = kept as f64;
        prop_assert_eq!(joined, kept);
        prop_assert!(out.demography.column(Field::Migration).unwrap().iter().all(|&m| m == 0.0));
    }

    /// Whole-line quoting never changes the parsed rows.
    #[test]
    fn prop_quoted_lines_parse_like_plain(rows in arb_raw_rows()) {
        let plain = to_csv("Year,Age,ID_sex,ID_np,Birth", &rows);
        let quoted: String = plain.lines().map(|l| format!("\"{l}\"\n")).collect();
        let a = load_and_clean(plain.as_bytes(), Source::Births, "plain").unwrap();
        let b = load_and_clean(quoted.as_bytes(), Source::Births, "quoted").unwrap();
        prop_assert_eq!(a.rows(), b.rows());
        prop_assert_eq!(a.rows().len(), rows.len());
    }
}

// ============================================================================
// Prediction tables
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// The table axis is the sorted union of history, truth and prediction years.
    #[test]
    fn prop_prediction_axis_is_union(
        history in arb_series(0..20),
        truth in arb_series(1..6),
        predicted in arb_series(1..6),
    ) {
        let table = PredictionTable::build(&history, &truth, &predicted);
        let expected: BTreeSet<i32> = history
            .years()
            .iter()
            .chain(truth.years())
            .chain(predicted.years())
            .copied()
            .collect();
        prop_assert_eq!(table.years(), expected.into_iter().collect::<Vec<_>>());

        for row in table.rows() {
            prop_assert_eq!(row.y_pred, predicted.get(row.year));
            prop_assert_eq!(row.y_true, truth.get(row.year));
        }
    }
}

// ============================================================================
// Forecasts
// ============================================================================

fn births_table(values: &[f64]) -> YearlySeries {
    let n = i32::try_from(values.len()).unwrap();
    YearlySeries::new((2000..2000 + n).collect())
        .unwrap()
        .with_column(Field::Birth, values.to_vec())
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Forecast years start right after the last observed year and never
    /// overlap the table.
    #[test]
    fn prop_forecast_years_disjoint_from_history(
        values in proptest::collection::vec(100.0f64..1000.0, 8..20),
        held_out in 1usize..4,
        horizon in 1usize..=22,
    ) {
        let table = births_table(&values);
        let last = *table.years().last().unwrap();
        let threshold = last - i32::try_from(held_out).unwrap();
        let data = TrainingData::new(table, threshold);

        let outcome = TrainerRegistry::with_defaults()
            .fit(ModelId::Xgb, &data, &Hyperparameters::new().with("n_estimators", 10))
            .unwrap();
        let predictions = PredictionTable::build(
            &outcome.history,
            &outcome.ground_truth,
            &outcome.predictions,
        );
        let forecast = ForecastExtender::default()
            .extend(&outcome.model, &predictions, horizon)
            .unwrap();

        prop_assert_eq!(forecast.years().len(), horizon);
        prop_assert_eq!(forecast.years()[0], last + 1);
        prop_assert!(forecast.years().windows(2).all(|w| w[1] == w[0] + 1));
        let observed: BTreeSet<i32> = predictions.years().into_iter().collect();
        prop_assert!(forecast.years().iter().all(|y| !observed.contains(y)));
    }
}
