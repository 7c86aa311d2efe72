//! Prediction Table - observed history and held-out predictions on one year axis

use crate::series::Series;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::io::{Read, Write};

/// CSV header of `preds_<id>.csv`.
pub const PREDICTIONS_HEADER: [&str; 4] = ["Year", "y_hist", "y_true", "y_pred"];

/// One year of the table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    /// Year
    pub year: i32,
    /// Observed value (training or held-out)
    pub y_hist: Option<f64>,
    /// Observed value, held-out years only
    pub y_true: Option<f64>,
    /// Prediction, predicted years only
    pub y_pred: Option<f64>,
}

/// `{Year, y_hist, y_true, y_pred}` on the sorted union of all years.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictionTable {
    rows: Vec<PredictionRow>,
}

impl PredictionTable {
    /// Merge the training-window history, the held-out truth and the
    /// held-out predictions.
    ///
    /// `y_hist` takes the first non-null of history then truth for each year.
    #[must_use]
    pub fn build(history: &Series, truth: &Series, predictions: &Series) -> Self {
        let axis: BTreeSet<i32> = history
            .years()
            .iter()
            .chain(truth.years())
            .chain(predictions.years())
            .copied()
            .collect();
        let rows = axis
            .into_iter()
            .map(|year| PredictionRow {
                year,
                y_hist: [history.get(year), truth.get(year)]
                    .into_iter()
                    .flatten()
                    .find(|v| !v.is_nan()),
                y_true: truth.get(year),
                y_pred: predictions.get(year),
            })
            .collect();
        Self { rows }
    }

    /// Rows in year order.
    #[must_use]
    pub fn rows(&self) -> &[PredictionRow] {
        &self.rows
    }

    /// Year axis.
    #[must_use]
    pub fn years(&self) -> Vec<i32> {
        self.rows.iter().map(|r| r.year).collect()
    }

    /// Last year of the axis.
    #[must_use]
    pub fn last_year(&self) -> Option<i32> {
        self.rows.last().map(|r| r.year)
    }

    /// Observed series over the whole axis (years with a finite `y_hist`).
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the table rows are out of order.
    pub fn history(&self) -> Result<Series> {
        let (years, values) = self
            .rows
            .iter()
            .filter_map(|r| r.y_hist.filter(|v| v.is_finite()).map(|v| (r.year, v)))
            .unzip();
        Series::new(years, values)
    }

    /// Write the CSV form; null and non-finite cells are left empty.
    ///
    /// # Errors
    ///
    /// Propagates CSV and IO errors.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(PREDICTIONS_HEADER)?;
        for row in &self.rows {
            csv.write_record([
                row.year.to_string(),
                cell(row.y_hist),
                cell(row.y_true),
                cell(row.y_pred),
            ])?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Read the CSV form. Empty, `NaN`, `nan`, `inf` and `null` cells read as null.
    ///
    /// # Errors
    ///
    /// Returns `MissingColumn` or `InputFormat` for malformed files and
    /// `InvalidInput` for unsorted years.
    pub fn read_csv<R: Read>(reader: R, name: &str) -> Result<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let headers = csv.headers()?.clone();
        let mut index = [0_usize; 4];
        for (slot, column) in index.iter_mut().zip(PREDICTIONS_HEADER) {
            *slot = headers
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| Error::MissingColumn {
                    file: name.to_string(),
                    column: column.to_string(),
                })?;
        }

        let mut rows = Vec::new();
        for (i, record) in csv.records().enumerate() {
            let record = record?;
            let line = i + 2;
            let get = |col: usize| record.get(index[col]).unwrap_or("").trim();
            let year = get(0).parse::<i32>().map_err(|_| {
                Error::input_format(name, line, "Year", format!("not a year: '{}'", get(0)))
            })?;
            let value = |col: usize| parse_cell(get(col), name, line, PREDICTIONS_HEADER[col]);
            rows.push(PredictionRow {
                year,
                y_hist: value(1)?,
                y_true: value(2)?,
                y_pred: value(3)?,
            });
        }
        if let Some(w) = rows.windows(2).find(|w| w[0].year >= w[1].year) {
            return Err(Error::InvalidInput(format!(
                "{name}: years out of order ({} then {})",
                w[0].year, w[1].year
            )));
        }
        Ok(Self { rows })
    }

    /// `{"Year", "y_hist", "y_true", "y_pred"}` column arrays, non-finite as `null`.
    #[must_use]
    pub fn to_response(&self) -> Value {
        let column = |f: fn(&PredictionRow) -> Option<f64>| -> Vec<Option<f64>> {
            self.rows
                .iter()
                .map(|r| f(r).filter(|v| v.is_finite()))
                .collect()
        };
        json!({
            "Year": self.years(),
            "y_hist": column(|r| r.y_hist),
            "y_true": column(|r| r.y_true),
            "y_pred": column(|r| r.y_pred),
        })
    }
}

fn cell(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => v.to_string(),
        _ => String::new(),
    }
}

fn parse_cell(raw: &str, name: &str, line: usize, column: &str) -> Result<Option<f64>> {
    match raw.to_ascii_lowercase().as_str() {
        "" | "nan" | "null" | "none" | "inf" | "+inf" | "-inf" | "infinity" | "-infinity" => {
            Ok(None)
        }
        _ => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| Error::input_format(name, line, column, format!("not a number: '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PredictionTable {
        let history = Series::new(vec![2020, 2021], vec![100.0, 110.0]).unwrap();
        let truth = Series::new(vec![2022, 2023], vec![90.0, 95.0]).unwrap();
        let preds = Series::new(vec![2022, 2023], vec![92.5, f64::NAN]).unwrap();
        PredictionTable::build(&history, &truth, &preds)
    }

    #[test]
    fn test_axis_is_union() {
        let t = table();
        assert_eq!(t.years(), vec![2020, 2021, 2022, 2023]);
        assert_eq!(t.rows()[0].y_true, None);
        assert_eq!(t.rows()[0].y_pred, None);
        assert_eq!(t.rows()[2].y_hist, Some(90.0));
        assert_eq!(t.rows()[2].y_true, Some(90.0));
    }

    #[test]
    fn test_history_spans_train_and_test() {
        let history = table().history().unwrap();
        assert_eq!(history.years(), &[2020, 2021, 2022, 2023]);
        assert_eq!(history.values(), &[100.0, 110.0, 90.0, 95.0]);
    }

    #[test]
    fn test_nan_written_empty_and_read_back() {
        let mut buf = Vec::new();
        table().write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("Year,y_hist,y_true,y_pred\n"));
        assert!(text.contains("2023,95,95,\n"));

        let back = PredictionTable::read_csv(buf.as_slice(), "p.csv").unwrap();
        assert_eq!(back.rows()[3].y_pred, None);
        assert_eq!(back.rows()[2].y_pred, Some(92.5));
    }

    #[test]
    fn test_reads_nan_spellings() {
        let text = "Year,y_hist,y_true,y_pred\n2020,1,NaN,nan\n2021,2,null,inf\n";
        let t = PredictionTable::read_csv(text.as_bytes(), "p.csv").unwrap();
        assert_eq!(t.rows()[0].y_true, None);
        assert_eq!(t.rows()[1].y_pred, None);
    }

    #[test]
    fn test_response_uses_null() {
        let value = table().to_response();
        assert!(value["y_pred"][3].is_null());
        assert_eq!(value["Year"][0], 2020);
    }

    #[test]
    fn test_bad_cell() {
        let text = "Year,y_hist,y_true,y_pred\n2020,abc,,\n";
        let err = PredictionTable::read_csv(text.as_bytes(), "p.csv").unwrap_err();
        assert!(err.is_input_format());
    }
}
