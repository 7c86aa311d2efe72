//! Pipeline configuration
//!
//! Paths follow the project layout `data/raw`, `data/clean`, `models`,
//! `reports` under a single root. Values can come from the builder, from
//! `POPCAST_*` environment variables, or from a JSON file.

use crate::series::DEFAULT_THRESHOLD_YEAR;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Longest forecast horizon accepted (years past the last observation).
pub const DEFAULT_MAX_HORIZON: usize = 22;

/// Number of trailing years averaged for constant exogenous assumptions.
pub const DEFAULT_EXOG_WINDOW: usize = 3;

/// Runtime configuration for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding `Population.csv`, `Births.csv`, `Deaths.csv`, `Migration.csv`
    pub raw_dir: PathBuf,
    /// Directory for `demography.parquet` and `births_total.parquet`
    pub clean_dir: PathBuf,
    /// Directory for model blobs
    pub models_dir: PathBuf,
    /// Directory for metrics and prediction tables
    pub reports_dir: PathBuf,
    /// Last training year; later years are held out
    pub threshold_year: i32,
    /// Largest accepted forecast horizon
    pub max_horizon: usize,
    /// Trailing window for exogenous persistence
    pub exog_window: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::with_root(".")
    }
}

impl PipelineConfig {
    /// Standard layout under `root`.
    #[must_use]
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            raw_dir: root.join("data").join("raw"),
            clean_dir: root.join("data").join("clean"),
            models_dir: root.join("models"),
            reports_dir: root.join("reports"),
            threshold_year: DEFAULT_THRESHOLD_YEAR,
            max_horizon: DEFAULT_MAX_HORIZON,
            exog_window: DEFAULT_EXOG_WINDOW,
        }
    }

    /// Create a builder rooted at `root`.
    #[must_use]
    pub fn builder(root: impl AsRef<Path>) -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::with_root(root),
        }
    }

    /// Load from the process environment.
    ///
    /// Recognised variables: `POPCAST_ROOT`, `POPCAST_THRESHOLD_YEAR`,
    /// `POPCAST_MAX_HORIZON`, `POPCAST_EXOG_WINDOW`.
    ///
    /// # Errors
    ///
    /// Returns `Config` when a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        let root = std::env::var("POPCAST_ROOT").unwrap_or_else(|_| ".".to_string());
        let mut config = Self::with_root(root);
        if let Some(v) = env_parse::<i32>("POPCAST_THRESHOLD_YEAR")? {
            config.threshold_year = v;
        }
        if let Some(v) = env_parse::<usize>("POPCAST_MAX_HORIZON")? {
            config.max_horizon = v;
        }
        if let Some(v) = env_parse::<usize>("POPCAST_EXOG_WINDOW")? {
            config.exog_window = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an IO/JSON error if the file cannot be read or parsed, or
    /// `Config` if the values are out of range.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Config` for a zero horizon or a zero exogenous window.
    pub fn validate(&self) -> Result<()> {
        if self.max_horizon == 0 {
            return Err(Error::Config("max_horizon must be at least 1".into()));
        }
        if self.exog_window == 0 {
            return Err(Error::Config("exog_window must be at least 1".into()));
        }
        Ok(())
    }

    /// Path of the full aggregate table.
    #[must_use]
    pub fn demography_path(&self) -> PathBuf {
        self.clean_dir.join("demography.parquet")
    }

    /// Path of the births-only aggregate table.
    #[must_use]
    pub fn births_path(&self) -> PathBuf {
        self.clean_dir.join("births_total.parquet")
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Override the raw extracts directory.
    #[must_use]
    pub fn raw_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.raw_dir = dir.into();
        self
    }

    /// Override the split year.
    #[must_use]
    pub const fn threshold_year(mut self, year: i32) -> Self {
        self.config.threshold_year = year;
        self
    }

    /// Override the forecast horizon ceiling.
    #[must_use]
    pub const fn max_horizon(mut self, years: usize) -> Self {
        self.config.max_horizon = years;
        self
    }

    /// Override the exogenous persistence window.
    #[must_use]
    pub const fn exog_window(mut self, years: usize) -> Self {
        self.config.exog_window = years;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` if validation fails.
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key}={raw} is not a valid value"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = PipelineConfig::with_root("/srv/demo");
        assert_eq!(config.raw_dir, PathBuf::from("/srv/demo/data/raw"));
        assert_eq!(
            config.births_path(),
            PathBuf::from("/srv/demo/data/clean/births_total.parquet")
        );
        assert_eq!(config.threshold_year, 2021);
        assert_eq!(config.max_horizon, 22);
    }

    #[test]
    fn test_builder_rejects_zero_horizon() {
        let result = PipelineConfig::builder(".").max_horizon(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_json_partial_config() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"threshold_year": 2019}"#).unwrap();
        assert_eq!(config.threshold_year, 2019);
        assert_eq!(config.exog_window, DEFAULT_EXOG_WINDOW);
    }
}
