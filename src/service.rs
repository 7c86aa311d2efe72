//! Transport-agnostic service facade
//!
//! Every call returns a JSON value shaped like the HTTP contract a
//! charting frontend expects. Failures never escape as `Err`; they come
//! back as `{"status": "error", "detail": ...}`.

use crate::pipeline::Pipeline;
use crate::trainer::{Hyperparameters, ModelId};
use crate::{Error, Result};
use serde_json::{json, Value};
use tracing::warn;

/// JSON-in, JSON-out front of a [`Pipeline`].
#[derive(Debug)]
pub struct ForecastService {
    pipeline: Pipeline,
}

impl ForecastService {
    /// Wrap a pipeline.
    #[must_use]
    pub const fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Underlying pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Train a model: `{"status": "ok", "run_id": ...}`.
    #[must_use]
    pub fn train(&self, model_id: &str, params: &Value) -> Value {
        respond(self.try_train(model_id, params), None)
    }

    fn try_train(&self, model_id: &str, params: &Value) -> Result<Value> {
        let id: ModelId = model_id.parse()?;
        let params = Hyperparameters::from_value(params.clone())?;
        let run = self.pipeline.train(id, &params)?;
        Ok(json!({
            "status": "ok",
            "model_id": id.as_str(),
            "run_id": run.run_id(),
        }))
    }

    /// Stored metrics: `{"MAE", "MSE", "MAPE", "R2", "Target"}`.
    #[must_use]
    pub fn metrics(&self, model_id: &str) -> Value {
        let result = model_id
            .parse::<ModelId>()
            .and_then(|id| self.pipeline.metrics(id))
            .map(|record| record.to_response());
        respond(result, Some("metrics file not found"))
    }

    /// Stored predictions: `{"Year", "y_hist", "y_true", "y_pred"}`.
    #[must_use]
    pub fn predictions(&self, model_id: &str) -> Value {
        let result = model_id
            .parse::<ModelId>()
            .and_then(|id| self.pipeline.predictions(id))
            .map(|table| table.to_response());
        respond(result, Some("predictions file not found"))
    }

    /// Forecast: `{"Year", "y_pred", "assumptions"}`.
    #[must_use]
    pub fn forecast(&self, model_id: &str, years: usize) -> Value {
        let result = model_id
            .parse::<ModelId>()
            .and_then(|id| self.pipeline.forecast(id, years))
            .map(|table| table.to_response());
        respond(result, Some("model not trained"))
    }

    /// Aggregate uploaded extracts, persist the clean tables, then train.
    #[must_use]
    pub fn upload_and_train(
        &self,
        births: &[u8],
        deaths: &[u8],
        population: &[u8],
        migration: Option<&[u8]>,
        model_id: &str,
        params: &Value,
    ) -> Value {
        let prepared = model_id.parse::<ModelId>().and_then(|_| {
            self.pipeline
                .prepare_from_bytes(births, deaths, population, migration)
        });
        match prepared {
            Ok(_) => self.train(model_id, params),
            Err(e) => respond(Err(e), None),
        }
    }
}

/// True for a `{"status": "error"}` response.
#[must_use]
pub fn is_error(response: &Value) -> bool {
    response.get("status").and_then(Value::as_str) == Some("error")
}

fn respond(result: Result<Value>, not_trained: Option<&str>) -> Value {
    match result {
        Ok(value) => value,
        Err(e) => {
            let detail = match (&e, not_trained) {
                (Error::NotTrained(_), Some(detail)) => detail.to_string(),
                _ => e.to_string(),
            };
            warn!(error = %e, "request failed");
            json!({ "status": "error", "detail": detail })
        }
    }
}
