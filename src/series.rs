//! Year-keyed tables: the canonical per-year demography table, single
//! year-indexed series, and the temporal train/held-out split.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default split year: training covers `Year <= 2021`.
pub const DEFAULT_THRESHOLD_YEAR: i32 = 2021;

/// Numeric fields of the per-year demography table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    /// Total population
    Population,
    /// Live births
    Birth,
    /// Deaths
    Death,
    /// Net migration (arrivals minus departures)
    Migration,
}

impl Field {
    /// All fields in canonical column order.
    pub const ALL: [Self; 4] = [Self::Population, Self::Birth, Self::Death, Self::Migration];

    /// Column name used in tables.
    #[must_use]
    pub const fn column_name(self) -> &'static str {
        match self {
            Self::Population => "Population",
            Self::Birth => "Birth",
            Self::Death => "Death",
            Self::Migration => "Migration",
        }
    }

    /// Resolve a column name, including the legacy `Births_total_year` alias.
    #[must_use]
    pub fn from_column_name(name: &str) -> Option<Self> {
        match name {
            "Population" => Some(Self::Population),
            "Birth" | "Births_total_year" => Some(Self::Birth),
            "Death" => Some(Self::Death),
            "Migration" => Some(Self::Migration),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// A single year-indexed series (years strictly ascending).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    years: Vec<i32>,
    values: Vec<f64>,
}

impl Series {
    /// Create a series; years must be strictly ascending and match `values` in length.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` on length mismatch or unsorted/duplicate years.
    pub fn new(years: Vec<i32>, values: Vec<f64>) -> Result<Self> {
        if years.len() != values.len() {
            return Err(Error::InvalidInput(format!(
                "series has {} years but {} values",
                years.len(),
                values.len()
            )));
        }
        check_ascending(&years)?;
        Ok(Self { years, values })
    }

    /// Year axis.
    #[must_use]
    pub fn years(&self) -> &[i32] {
        &self.years
    }

    /// Values aligned with [`Series::years`].
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.years.len()
    }

    /// True when the series holds no observations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    /// Value at a given year.
    #[must_use]
    pub fn get(&self, year: i32) -> Option<f64> {
        self.years
            .binary_search(&year)
            .ok()
            .map(|idx| self.values[idx])
    }

    /// Last year of the series.
    #[must_use]
    pub fn last_year(&self) -> Option<i32> {
        self.years.last().copied()
    }

    /// Values looked up on another year axis; absent years map to `None`.
    #[must_use]
    pub fn reindex(&self, axis: &[i32]) -> Vec<Option<f64>> {
        axis.iter().map(|&year| self.get(year)).collect()
    }

    /// Attach a new year axis to position-indexed values.
    ///
    /// Estimators return predictions by position; this puts them back on
    /// the held-out years.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the lengths disagree.
    pub fn with_axis(axis: &[i32], values: Vec<f64>) -> Result<Self> {
        Self::new(axis.to_vec(), values)
    }
}

/// Canonical per-year table `{Year, Population?, Birth?, Death?, Migration?}`.
///
/// Every present column has one value per year; absent source values are
/// stored as zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct YearlySeries {
    years: Vec<i32>,
    columns: BTreeMap<Field, Vec<f64>>,
}

impl YearlySeries {
    /// Create an empty table on a year axis.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the years are not strictly ascending.
    pub fn new(years: Vec<i32>) -> Result<Self> {
        check_ascending(&years)?;
        Ok(Self {
            years,
            columns: BTreeMap::new(),
        })
    }

    /// Add (or replace) a column.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` on length mismatch.
    pub fn with_column(mut self, field: Field, values: Vec<f64>) -> Result<Self> {
        self.insert_column(field, values)?;
        Ok(self)
    }

    /// Add (or replace) a column in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` on length mismatch.
    pub fn insert_column(&mut self, field: Field, values: Vec<f64>) -> Result<()> {
        if values.len() != self.years.len() {
            return Err(Error::InvalidInput(format!(
                "column {field} has {} values for {} years",
                values.len(),
                self.years.len()
            )));
        }
        self.columns.insert(field, values);
        Ok(())
    }

    /// Year axis.
    #[must_use]
    pub fn years(&self) -> &[i32] {
        &self.years
    }

    /// Number of years.
    #[must_use]
    pub fn len(&self) -> usize {
        self.years.len()
    }

    /// True when there are no years.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    /// Fields present, in canonical order.
    #[must_use]
    pub fn fields(&self) -> Vec<Field> {
        self.columns.keys().copied().collect()
    }

    /// Column values, if present.
    #[must_use]
    pub fn column(&self, field: Field) -> Option<&[f64]> {
        self.columns.get(&field).map(Vec::as_slice)
    }

    /// Column values, or a `MissingColumn` error naming `source`.
    ///
    /// # Errors
    ///
    /// Returns `MissingColumn` when the field is absent.
    pub fn require(&self, field: Field, source: &str) -> Result<&[f64]> {
        self.column(field).ok_or_else(|| Error::MissingColumn {
            file: source.to_string(),
            column: field.column_name().to_string(),
        })
    }

    /// One column as a year-indexed series.
    ///
    /// # Errors
    ///
    /// Returns `MissingColumn` when the field is absent.
    pub fn series(&self, field: Field) -> Result<Series> {
        let values = self.require(field, "yearly table")?.to_vec();
        Series::new(self.years.clone(), values)
    }

    /// Row-major matrix of the requested fields (one row per year).
    ///
    /// # Errors
    ///
    /// Returns `MissingColumn` when a field is absent.
    pub fn rows(&self, fields: &[Field]) -> Result<Vec<Vec<f64>>> {
        let cols = fields
            .iter()
            .map(|&f| self.require(f, "yearly table"))
            .collect::<Result<Vec<_>>>()?;
        Ok((0..self.len())
            .map(|i| cols.iter().map(|c| c[i]).collect())
            .collect())
    }

    /// Sub-table keeping rows whose year satisfies `keep`.
    #[must_use]
    pub fn filter_years(&self, keep: impl Fn(i32) -> bool) -> Self {
        let idx: Vec<usize> = (0..self.len()).filter(|&i| keep(self.years[i])).collect();
        Self {
            years: idx.iter().map(|&i| self.years[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(&f, vals)| (f, idx.iter().map(|&i| vals[i]).collect()))
                .collect(),
        }
    }

    /// Temporal split at `threshold`: training keeps `Year <= threshold`,
    /// held-out keeps `Year > threshold`.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` when the training prefix is empty and
    /// `InvalidInput` when nothing is left to hold out.
    pub fn split(&self, threshold: i32) -> Result<TrainingSplit> {
        let train = self.filter_years(|y| y <= threshold);
        let test = self.filter_years(|y| y > threshold);
        if train.is_empty() {
            return Err(Error::InsufficientData {
                required: 1,
                actual: 0,
            });
        }
        if test.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no held-out years after {threshold}"
            )));
        }
        Ok(TrainingSplit {
            threshold,
            train,
            test,
        })
    }
}

/// Training prefix and held-out suffix of a [`YearlySeries`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSplit {
    threshold: i32,
    train: YearlySeries,
    test: YearlySeries,
}

impl TrainingSplit {
    /// Split year.
    #[must_use]
    pub const fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Training prefix.
    #[must_use]
    pub const fn train(&self) -> &YearlySeries {
        &self.train
    }

    /// Held-out suffix.
    #[must_use]
    pub const fn test(&self) -> &YearlySeries {
        &self.test
    }
}

fn check_ascending(years: &[i32]) -> Result<()> {
    if let Some(w) = years.windows(2).find(|w| w[0] >= w[1]) {
        return Err(Error::InvalidInput(format!(
            "years must be unique and ascending, found {} followed by {}",
            w[0], w[1]
        )));
    }
    Ok(())
}
