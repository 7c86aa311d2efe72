//! Data aggregation: raw per-(year, age, sex) extracts → one row per year
//!
//! ## Pipeline
//!
//! ```text
//! Population.csv ─┐
//! Births.csv ─────┼─ clean ─ sum by Year ─ left join on births ─┬─ demography.parquet
//! Deaths.csv ─────┤                                             └─ births_total.parquet
//! Migration.csv ──┘ (optional, zero when absent)
//! ```
//!
//! Raw extracts quote whole lines (`"2020,0,1,1,123"`), may repeat the
//! header as the first data row, and must be integer everywhere else.

use crate::config::PipelineConfig;
use crate::series::{Field, YearlySeries};
use crate::storage;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// A raw extract kind and its column layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// `Year, Age, ID_sex, ID_np, Population`
    Population,
    /// `Year, Age, ID_sex, ID_np, Birth`
    Births,
    /// `Year, Age, ID_sex, ID_np, Death`
    Deaths,
    /// `Year, Age, ID_sex, ID_np, M_come, M_out`
    Migration,
}

impl Source {
    /// Conventional file name in the raw directory.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Population => "Population.csv",
            Self::Births => "Births.csv",
            Self::Deaths => "Deaths.csv",
            Self::Migration => "Migration.csv",
        }
    }

    /// Expected columns, in file order.
    #[must_use]
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Population => &["Year", "Age", "ID_sex", "ID_np", "Population"],
            Self::Births => &["Year", "Age", "ID_sex", "ID_np", "Birth"],
            Self::Deaths => &["Year", "Age", "ID_sex", "ID_np", "Death"],
            Self::Migration => &["Year", "Age", "ID_sex", "ID_np", "M_come", "M_out"],
        }
    }

    /// Field this source contributes to the yearly table.
    #[must_use]
    pub const fn field(self) -> Field {
        match self {
            Self::Population => Field::Population,
            Self::Births => Field::Birth,
            Self::Deaths => Field::Death,
            Self::Migration => Field::Migration,
        }
    }

    /// Metric of one cleaned row (net flow for migration).
    fn metric(self, row: &[i64]) -> Result<i64> {
        match self {
            Self::Migration => row[4].checked_sub(row[5]).ok_or_else(|| {
                Error::input_format(
                    self.file_name(),
                    0,
                    "M_out",
                    format!("net migration {} - {} overflows i64", row[4], row[5]),
                )
            }),
            _ => Ok(row[4]),
        }
    }
}

/// A cleaned raw extract: integer cells in the source's column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    source: Source,
    rows: Vec<Vec<i64>>,
}

impl RawTable {
    /// Source kind.
    #[must_use]
    pub const fn source(&self) -> Source {
        self.source
    }

    /// Cleaned rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<i64>] {
        &self.rows
    }

    /// Sum of the source metric per year, ascending.
    ///
    /// # Errors
    ///
    /// Returns `InputFormat` when a year does not fit in `i32` or a
    /// yearly total overflows `i64`.
    pub fn sum_by_year(&self) -> Result<BTreeMap<i32, i64>> {
        let mut totals = BTreeMap::new();
        for row in &self.rows {
            let year = i32::try_from(row[0]).map_err(|_| {
                Error::input_format(
                    self.source.file_name(),
                    0,
                    "Year",
                    format!("year {} out of range", row[0]),
                )
            })?;
            let value = self.source.metric(row)?;
            let total: &mut i64 = totals.entry(year).or_insert(0);
            *total = total.checked_add(value).ok_or_else(|| {
                Error::input_format(
                    self.source.file_name(),
                    0,
                    self.source.columns()[4],
                    format!("total for year {year} overflows i64"),
                )
            })?;
        }
        Ok(totals)
    }
}

/// Parse and clean one raw extract.
///
/// `name` identifies the input in error messages (a file name or the
/// upload field name).
///
/// # Errors
///
/// Returns `InputFormat` for a malformed line, a wrong cell count, or a
/// cell that is not an integer.
pub fn load_and_clean<R: Read>(reader: R, source: Source, name: &str) -> Result<RawTable> {
    let columns = source.columns();
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    let mut first = true;
    for record in csv_reader.records() {
        let record = record.map_err(|e| Error::input_format(name, 0, "-", e.to_string()))?;
        let line = record.position().map_or(0, |p| usize::try_from(p.line()).unwrap_or(0));

        let cells = split_cells(&record);
        if cells.iter().all(String::is_empty) {
            continue;
        }
        if first {
            first = false;
            if cells.first().map(String::as_str) == Some(columns[0]) {
                continue;
            }
        }
        if cells.len() != columns.len() {
            return Err(Error::input_format(
                name,
                line,
                "-",
                format!("expected {} cells, found {}", columns.len(), cells.len()),
            ));
        }

        let row = cells
            .iter()
            .zip(columns)
            .map(|(cell, column)| {
                cell.parse::<i64>().map_err(|_| {
                    Error::input_format(name, line, *column, format!("'{cell}' is not an integer"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        rows.push(row);
    }

    Ok(RawTable { source, rows })
}

/// Whole-line quoting arrives as a single field; split it ourselves.
fn split_cells(record: &csv::StringRecord) -> Vec<String> {
    let clean = |s: &str| s.trim().trim_matches('"').trim().to_string();
    if record.len() == 1 {
        record[0].split(',').map(clean).collect()
    } else {
        record.iter().map(clean).collect()
    }
}

/// The four raw extracts (migration optional).
#[derive(Debug, Clone)]
pub struct RawExtracts {
    /// Population extract
    pub population: RawTable,
    /// Births extract (the join anchor)
    pub births: RawTable,
    /// Deaths extract
    pub deaths: RawTable,
    /// Migration extract, if supplied
    pub migration: Option<RawTable>,
}

impl RawExtracts {
    /// Read `Population.csv`, `Births.csv`, `Deaths.csv` and (if present)
    /// `Migration.csv` from `dir`.
    ///
    /// # Errors
    ///
    /// Returns IO errors for missing mandatory files and `InputFormat`
    /// for malformed content.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let open = |source: Source| -> Result<RawTable> {
            let path = dir.join(source.file_name());
            let file = std::fs::File::open(&path).map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("{}: {e}", path.display()),
                ))
            })?;
            load_and_clean(file, source, source.file_name())
        };

        let migration_path = dir.join(Source::Migration.file_name());
        let migration = if migration_path.exists() {
            Some(open(Source::Migration)?)
        } else {
            None
        };

        Ok(Self {
            population: open(Source::Population)?,
            births: open(Source::Births)?,
            deaths: open(Source::Deaths)?,
            migration,
        })
    }

    /// Clean in-memory uploads.
    ///
    /// # Errors
    ///
    /// Returns `InputFormat` for malformed content.
    pub fn from_bytes(
        births: &[u8],
        deaths: &[u8],
        population: &[u8],
        migration: Option<&[u8]>,
    ) -> Result<Self> {
        Ok(Self {
            population: load_and_clean(population, Source::Population, "population")?,
            births: load_and_clean(births, Source::Births, "births")?,
            deaths: load_and_clean(deaths, Source::Deaths, "deaths")?,
            migration: migration
                .map(|bytes| load_and_clean(bytes, Source::Migration, "migration"))
                .transpose()?,
        })
    }
}

/// Output of aggregation: the full table and the births-only table.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated {
    /// `{Year, Population, Birth, Death, Migration}`
    pub demography: YearlySeries,
    /// `{Year, Birth}`
    pub births: YearlySeries,
}

/// Aggregate extracts by year and join them on the births years.
///
/// # Errors
///
/// Returns `InputFormat` if the births extract is empty or a year is out
/// of range.
#[allow(clippy::cast_precision_loss)]
pub fn aggregate(extracts: &RawExtracts) -> Result<Aggregated> {
    let births = extracts.births.sum_by_year()?;
    if births.is_empty() {
        return Err(Error::input_format(
            Source::Births.file_name(),
            0,
            "Birth",
            "no data rows",
        ));
    }
    let years: Vec<i32> = births.keys().copied().collect();

    let population = extracts.population.sum_by_year()?;
    let deaths = extracts.deaths.sum_by_year()?;
    let migration = match &extracts.migration {
        Some(table) => table.sum_by_year()?,
        None => {
            warn!("migration extract not found, filling Migration=0");
            years.iter().map(|&y| (y, 0)).collect()
        }
    };

    let align = |totals: &BTreeMap<i32, i64>| -> Vec<f64> {
        years
            .iter()
            .map(|y| totals.get(y).copied().unwrap_or(0) as f64)
            .collect()
    };

    let births_col = align(&births);
    let demography = YearlySeries::new(years.clone())?
        .with_column(Field::Population, align(&population))?
        .with_column(Field::Birth, births_col.clone())?
        .with_column(Field::Death, align(&deaths))?
        .with_column(Field::Migration, align(&migration))?;
    let births_only = YearlySeries::new(years)?.with_column(Field::Birth, births_col)?;

    info!(
        rows = demography.len(),
        first_year = demography.years().first().copied(),
        last_year = demography.years().last().copied(),
        "aggregated demography table"
    );

    Ok(Aggregated {
        demography,
        births: births_only,
    })
}

/// Write both clean tables under `config.clean_dir`.
///
/// The births-only table is written first and independently of the join.
///
/// # Errors
///
/// Propagates storage errors.
pub fn persist(aggregated: &Aggregated, config: &PipelineConfig) -> Result<()> {
    storage::write_yearly(config.births_path(), &aggregated.births)?;
    storage::write_yearly(config.demography_path(), &aggregated.demography)?;
    info!(
        demography = %config.demography_path().display(),
        births = %config.births_path().display(),
        "persisted clean tables"
    );
    Ok(())
}

/// Read the raw directory, aggregate, and persist.
///
/// # Errors
///
/// Propagates input-format and storage errors.
pub fn prepare(config: &PipelineConfig) -> Result<Aggregated> {
    let extracts = RawExtracts::from_dir(&config.raw_dir)?;
    let aggregated = aggregate(&extracts)?;
    persist(&aggregated, config)?;
    Ok(aggregated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_quoted_lines_and_header() {
        let raw = "\"Year,Age,ID_sex,ID_np,Birth\"\n\"2020,0,1,1,5\"\n\"2020,1,2,1,7\"\n";
        let table = load_and_clean(raw.as_bytes(), Source::Births, "Births.csv").unwrap();
        assert_eq!(table.rows().len(), 2);
        assert_eq!(table.sum_by_year().unwrap().get(&2020), Some(&12));
    }

    #[test]
    fn test_plain_csv_without_header() {
        let raw = "2021,0,1,1,3\n2022,0,1,1,4\n";
        let table = load_and_clean(raw.as_bytes(), Source::Deaths, "Deaths.csv").unwrap();
        assert_eq!(table.rows(), &[vec![2021, 0, 1, 1, 3], vec![2022, 0, 1, 1, 4]]);
    }

    #[test]
    fn test_non_integer_cell_is_fatal() {
        let raw = "\"2020,0,1,1,abc\"\n";
        let err = load_and_clean(raw.as_bytes(), Source::Births, "Births.csv").unwrap_err();
        assert!(err.is_input_format());
        let msg = err.to_string();
        assert!(msg.contains("Births.csv"));
        assert!(msg.contains("Birth"));
    }

    #[test]
    fn test_wrong_cell_count_is_fatal() {
        let raw = "\"2020,0,1,1\"\n";
        let err = load_and_clean(raw.as_bytes(), Source::Births, "Births.csv").unwrap_err();
        assert!(err.to_string().contains("expected 5 cells"));
    }

    #[test]
    fn test_migration_is_net_flow() {
        let raw = "2020,0,1,1,10,4\n2020,1,1,1,1,2\n";
        let table = load_and_clean(raw.as_bytes(), Source::Migration, "Migration.csv").unwrap();
        assert_eq!(table.sum_by_year().unwrap().get(&2020), Some(&5));
    }

    #[test]
    fn test_net_migration_overflow_is_input_format() {
        let raw = "2020,0,1,1,-9223372036854775808,1\n";
        let table = load_and_clean(raw.as_bytes(), Source::Migration, "Migration.csv").unwrap();
        let err = table.sum_by_year().unwrap_err();
        assert!(err.is_input_format());
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_yearly_total_overflow_is_input_format() {
        let raw = "2020,0,1,1,9223372036854775807\n2020,1,1,1,1\n2021,0,1,1,3\n";
        let table = load_and_clean(raw.as_bytes(), Source::Births, "Births.csv").unwrap();
        let err = table.sum_by_year().unwrap_err();
        assert!(err.is_input_format());
        let msg = err.to_string();
        assert!(msg.contains("Births.csv"), "{msg}");
        assert!(msg.contains("2020"), "{msg}");

        let extracts = RawExtracts::from_bytes(
            raw.as_bytes(),
            b"2020,0,1,1,1\n".as_slice(),
            b"2020,0,1,1,1\n".as_slice(),
            None,
        )
        .unwrap();
        assert!(aggregate(&extracts).unwrap_err().is_input_format());
    }
}
