//! Metrics Record - the single metrics row of a model

use crate::evaluate::Metrics;
use crate::trainer::{ModelId, Target};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{Read, Write};

/// CSV header of `metrics_<id>.csv`.
pub const METRICS_HEADER: [&str; 5] = ["MAE", "MSE", "MAPE", "R2", "Target"];

/// Held-out metrics of one run.
///
/// The CSV form keeps only the five report columns, so `run_id` and
/// `created_at` are absent after a read-back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsRecord {
    model_id: ModelId,
    target: Target,
    metrics: Metrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

impl MetricsRecord {
    /// Metrics produced by `run_id` just now.
    #[must_use]
    pub fn new(model_id: ModelId, run_id: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            model_id,
            target: model_id.target(),
            metrics,
            run_id: Some(run_id.into()),
            created_at: Some(Utc::now()),
        }
    }

    /// Model id.
    #[must_use]
    pub const fn model_id(&self) -> ModelId {
        self.model_id
    }

    /// Predicted quantity.
    #[must_use]
    pub const fn target(&self) -> Target {
        self.target
    }

    /// Metric values.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Producing run, when known.
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Creation time, when known.
    #[must_use]
    pub const fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Write the header and one row.
    ///
    /// # Errors
    ///
    /// Propagates CSV and IO errors.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(METRICS_HEADER)?;
        let m = &self.metrics;
        csv.write_record([
            m.mae.to_string(),
            m.mse.to_string(),
            m.mape.to_string(),
            m.r2.to_string(),
            self.target.to_string(),
        ])?;
        csv.flush()?;
        Ok(())
    }

    /// Read a metrics CSV written by [`MetricsRecord::write_csv`].
    ///
    /// # Errors
    ///
    /// Returns `MissingColumn`/`InputFormat` for malformed files.
    pub fn read_csv<R: Read>(reader: R, model_id: ModelId, name: &str) -> Result<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let headers = csv.headers()?.clone();
        let index = |column: &str| {
            headers
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| Error::MissingColumn {
                    file: name.to_string(),
                    column: column.to_string(),
                })
        };
        let [mae_i, mse_i, mape_i, r2_i, target_i] = [
            index("MAE")?,
            index("MSE")?,
            index("MAPE")?,
            index("R2")?,
            index("Target")?,
        ];

        let record = csv
            .records()
            .next()
            .ok_or_else(|| Error::input_format(name, 2, "MAE", "no metrics row"))??;
        let cell = |i: usize, column: &str| {
            record
                .get(i)
                .ok_or_else(|| Error::input_format(name, 2, column, "missing cell"))
        };
        let number = |i: usize, column: &str| -> Result<f64> {
            let raw = cell(i, column)?;
            raw.trim()
                .parse::<f64>()
                .map_err(|_| Error::input_format(name, 2, column, format!("not a number: '{raw}'")))
        };

        let target = cell(target_i, "Target")?
            .parse::<Target>()
            .map_err(|e| Error::input_format(name, 2, "Target", e.to_string()))?;
        Ok(Self {
            model_id,
            target,
            metrics: Metrics {
                mae: number(mae_i, "MAE")?,
                mse: number(mse_i, "MSE")?,
                mape: number(mape_i, "MAPE")?,
                r2: number(r2_i, "R2")?,
            },
            run_id: None,
            created_at: None,
        })
    }

    /// `{"MAE", "MSE", "MAPE", "R2", "Target"}` with non-finite values as `null`.
    #[must_use]
    pub fn to_response(&self) -> Value {
        let m = &self.metrics;
        json!({
            "MAE": finite(m.mae),
            "MSE": finite(m.mse),
            "MAPE": finite(m.mape),
            "R2": finite(m.r2),
            "Target": self.target.as_str(),
        })
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}
