//! End-to-end tests: raw extracts on disk through prepare, train, metrics,
//! predictions and forecast.

use popcast::artifact::RunStatus;
use popcast::config::PipelineConfig;
use popcast::pipeline::Pipeline;
use popcast::series::Field;
use popcast::service::{is_error, ForecastService};
use popcast::storage;
use popcast::trainer::{Hyperparameters, ModelId};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::Path;
use tempfile::TempDir;

const FIRST_YEAR: i32 = 1990;
const LAST_YEAR: i32 = 2023;

fn t(year: i32) -> f64 {
    f64::from(year - FIRST_YEAR)
}

/// Two ages by two sexes per year; totals follow smooth demographic curves.
fn extract(header: &str, quoted: bool, value: impl Fn(i32) -> Vec<i64>) -> String {
    let mut out = String::new();
    let line = |s: String| if quoted { format!("\"{s}\"\n") } else { format!("{s}\n") };
    out.push_str(&line(header.to_string()));
    for year in FIRST_YEAR..=LAST_YEAR {
        let mut cell = 0;
        for age in 0..2 {
            for sex in 1..=2 {
                let values = value(year)
                    .iter()
                    .map(|v| (v / 4 + i64::from(cell)).to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                out.push_str(&line(format!("{year},{age},{sex},1,{values}")));
                cell += 1;
            }
        }
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
fn births_at(year: i32) -> i64 {
    (20_000.0 + 150.0 * t(year) + 400.0 * (t(year) * 0.6).sin()) as i64
}

#[allow(clippy::cast_possible_truncation)]
fn deaths_at(year: i32) -> i64 {
    (18_000.0 + 90.0 * t(year) + 300.0 * (t(year) * 0.9).cos()) as i64
}

fn write_raw(dir: &Path, with_migration: bool) {
    std::fs::create_dir_all(dir).unwrap();
    let population = extract("Year,Age,ID_sex,ID_np,Population", true, |y| {
        let level: i64 = (FIRST_YEAR..=y)
            .map(|k| births_at(k) - deaths_at(k) + 500)
            .sum();
        vec![1_000_000 + level]
    });
    let births = extract("Year,Age,ID_sex,ID_np,Birth", true, |y| vec![births_at(y)]);
    let deaths = extract("Year,Age,ID_sex,ID_np,Death", false, |y| vec![deaths_at(y)]);
    std::fs::write(dir.join("Population.csv"), population).unwrap();
    std::fs::write(dir.join("Births.csv"), births).unwrap();
    std::fs::write(dir.join("Deaths.csv"), deaths).unwrap();
    if with_migration {
        let migration = extract("Year,Age,ID_sex,ID_np,M_come,M_out", false, |y| {
            vec![3_000 + 40 * i64::from(y - FIRST_YEAR), 2_500]
        });
        std::fs::write(dir.join("Migration.csv"), migration).unwrap();
    }
}

fn prepared_pipeline(dir: &TempDir) -> Pipeline {
    let config = PipelineConfig::with_root(dir.path());
    write_raw(&config.raw_dir, true);
    let pipeline = Pipeline::new(config).unwrap();
    pipeline.prepare().unwrap();
    pipeline
}

fn params_for(id: ModelId) -> Hyperparameters {
    match id {
        ModelId::Sarimax | ModelId::SarimaxPop => Hyperparameters::new(),
        ModelId::Prophet => Hyperparameters::new().with("growth", "linear"),
        ModelId::Xgb => Hyperparameters::new().with("n_estimators", 50),
        ModelId::Cat => Hyperparameters::new().with("iterations", 200),
    }
}

#[test]
fn test_prepare_writes_clean_tables() {
    let dir = TempDir::new().unwrap();
    let pipeline = prepared_pipeline(&dir);
    let config = pipeline.config();

    let demography = storage::read_yearly(config.demography_path(), &Field::ALL).unwrap();
    let births = storage::read_yearly(config.births_path(), &[Field::Birth]).unwrap();
    assert_eq!(demography.len(), 34);
    assert_eq!(births.years(), demography.years());
    assert_eq!(demography.years().first(), Some(&FIRST_YEAR));
    assert_eq!(demography.years().last(), Some(&LAST_YEAR));

    // Four cells of births_at/4 plus offsets 0..=3.
    let expected = (births_at(2000) / 4) * 4 + 6;
    #[allow(clippy::cast_precision_loss)]
    let expected = expected as f64;
    let idx = demography.years().iter().position(|&y| y == 2000).unwrap();
    assert_eq!(demography.column(Field::Birth).unwrap()[idx], expected);

    let migration = demography.column(Field::Migration).unwrap();
    assert!(migration.iter().all(|&m| m > 0.0));
}

#[test]
fn test_missing_migration_is_zero_filled() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig::with_root(dir.path());
    write_raw(&config.raw_dir, false);
    let pipeline = Pipeline::new(config).unwrap();
    let aggregated = pipeline.prepare().unwrap();
    let migration = aggregated.demography.column(Field::Migration).unwrap();
    assert!(migration.iter().all(|&m| m == 0.0));
}

#[test]
fn test_every_model_trains_and_forecasts() {
    let dir = TempDir::new().unwrap();
    let pipeline = prepared_pipeline(&dir);

    for id in ModelId::ALL {
        let run = pipeline.train(id, &params_for(id)).unwrap();
        assert_eq!(run.status(), RunStatus::Success, "{id}");

        let metrics = pipeline.metrics(id).unwrap();
        assert_eq!(metrics.target(), id.target());
        assert!(metrics.metrics().mae >= 0.0);
        assert!(metrics.metrics().mse >= 0.0);

        let table = pipeline.predictions(id).unwrap();
        assert_eq!(table.last_year(), Some(LAST_YEAR));
        let predicted: Vec<i32> = table
            .rows()
            .iter()
            .filter(|r| r.y_pred.is_some())
            .map(|r| r.year)
            .collect();
        assert_eq!(predicted, vec![2022, 2023], "{id}");

        let forecast = pipeline.forecast(id, 5).unwrap();
        assert_eq!(forecast.years(), &[2024, 2025, 2026, 2027, 2028], "{id}");
        assert!(forecast.y_pred().iter().all(|v| v.is_finite()), "{id}");
        assert!(!forecast.assumptions().is_empty());
    }

    for id in ModelId::ALL {
        assert!(pipeline.store().model_path(id).exists());
        assert!(pipeline.store().metrics_path(id).exists());
        assert!(pipeline.store().predictions_path(id).exists());
    }
}

#[test]
fn test_forecast_before_and_after_training() {
    let dir = TempDir::new().unwrap();
    let service = ForecastService::new(prepared_pipeline(&dir));

    assert_eq!(
        service.forecast("sarimax", 3),
        json!({"status": "error", "detail": "model not trained"})
    );

    let trained = service.train("sarimax", &json!({}));
    assert_eq!(trained["status"], "ok");
    assert!(trained["run_id"].as_str().unwrap().starts_with("sarimax-"));

    let forecast = service.forecast("sarimax", 3);
    assert_eq!(forecast["Year"], json!([2024, 2025, 2026]));
    assert_eq!(forecast["y_pred"].as_array().unwrap().len(), 3);
}

#[test]
fn test_train_all_with_defaults() {
    let dir = TempDir::new().unwrap();
    let pipeline = prepared_pipeline(&dir);
    let jobs: Vec<_> = ModelId::ALL
        .into_iter()
        .map(|id| (id, Hyperparameters::new()))
        .collect();
    for (id, result) in pipeline.train_many(&jobs).unwrap() {
        let run = result.unwrap_or_else(|e| panic!("{id}: {e}"));
        assert_eq!(run.status(), RunStatus::Success, "{id}");
        assert_eq!(pipeline.forecast(id, 3).unwrap().years(), &[2024, 2025, 2026]);
    }
}

#[test]
fn test_service_response_shapes() {
    let dir = TempDir::new().unwrap();
    let service = ForecastService::new(prepared_pipeline(&dir));
    let trained = service.train("xgb", &json!({"n_estimators": 30}));
    assert!(!is_error(&trained));

    let metrics = service.metrics("xgb");
    for key in ["MAE", "MSE", "MAPE", "R2"] {
        assert!(metrics[key].is_number() || metrics[key].is_null(), "{key}");
    }
    assert_eq!(metrics["Target"], "Births");

    let predictions = service.predictions("xgb");
    let years = predictions["Year"].as_array().unwrap();
    assert_eq!(years.len(), 34);
    for key in ["y_hist", "y_true", "y_pred"] {
        assert_eq!(predictions[key].as_array().unwrap().len(), years.len(), "{key}");
    }
    // Training years carry no held-out prediction.
    assert!(predictions["y_pred"][0].is_null());
    assert!(predictions["y_true"][0].is_null());
    assert!(predictions["y_hist"][0].is_number());
}

#[test]
fn test_unknown_hyperparameter_rejected() {
    let dir = TempDir::new().unwrap();
    let service = ForecastService::new(prepared_pipeline(&dir));
    let response = service.train("xgb", &json!({"subsample": 0.5}));
    assert!(is_error(&response));
    assert!(is_error(&service.metrics("xgb")));
}

#[test]
fn test_upload_and_train() {
    let dir = TempDir::new().unwrap();
    let staging = dir.path().join("staging");
    write_raw(&staging, true);
    let read = |name: &str| std::fs::read(staging.join(name)).unwrap();

    let service =
        ForecastService::new(Pipeline::new(PipelineConfig::with_root(dir.path())).unwrap());
    let response = service.upload_and_train(
        &read("Births.csv"),
        &read("Deaths.csv"),
        &read("Population.csv"),
        Some(read("Migration.csv").as_slice()),
        "prophet",
        &Value::Null,
    );
    assert_eq!(response["status"], "ok", "{response}");
    assert!(service.pipeline().config().demography_path().exists());
    assert!(!is_error(&service.forecast("prophet", 22)));
}

#[test]
fn test_upload_with_bad_cell_reports_location() {
    let dir = TempDir::new().unwrap();
    let service =
        ForecastService::new(Pipeline::new(PipelineConfig::with_root(dir.path())).unwrap());
    let births = b"Year,Age,ID_sex,ID_np,Birth\n2020,0,1,1,12x\n";
    let other = b"2020,0,1,1,5\n";
    let response = service.upload_and_train(births, other, other, None, "xgb", &Value::Null);
    assert!(is_error(&response));
    let detail = response["detail"].as_str().unwrap();
    assert!(detail.contains("births"), "{detail}");
    assert!(detail.contains("Birth"), "{detail}");
}

#[test]
fn test_train_many_in_parallel() {
    let dir = TempDir::new().unwrap();
    let pipeline = prepared_pipeline(&dir);
    let jobs: Vec<_> = [ModelId::Xgb, ModelId::Cat, ModelId::Prophet]
        .into_iter()
        .map(|id| (id, params_for(id)))
        .collect();
    let results = pipeline.train_many(&jobs).unwrap();
    assert_eq!(results.len(), 3);
    for (id, result) in results {
        let run = result.unwrap();
        assert_eq!(run.model_id(), id);
        assert_eq!(pipeline.runs().latest_success(id).unwrap().run_id(), run.run_id());
    }
}

#[test]
fn test_retraining_overwrites_artifacts() {
    let dir = TempDir::new().unwrap();
    let pipeline = prepared_pipeline(&dir);
    let first = pipeline.train(ModelId::Xgb, &params_for(ModelId::Xgb)).unwrap();
    let second = pipeline
        .train(ModelId::Xgb, &Hyperparameters::new().with("n_estimators", 5))
        .unwrap();
    assert_ne!(first.run_id(), second.run_id());

    let model = pipeline.store().load_model(ModelId::Xgb).unwrap();
    assert_eq!(model.run_id(), second.run_id());

    let mut names = String::new();
    for entry in std::fs::read_dir(pipeline.config().models_dir.clone()).unwrap() {
        let _ = writeln!(names, "{}", entry.unwrap().file_name().to_string_lossy());
    }
    assert_eq!(names.trim(), "xgb.json");
}
