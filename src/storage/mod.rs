//! Storage backend (Arrow/Parquet) for the clean per-year tables
//!
//! Tables are written whole (no row updates): the aggregator rebuilds
//! them from the raw extracts on every run. All writes go through
//! [`write_atomic`], so readers see either the previous file or the new
//! one, never a partial write.

use crate::series::{Field, YearlySeries};
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::{DataType, Field as ArrowField, Schema};
use arrow::record_batch::RecordBatch;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Name of the year key column.
pub const YEAR_COLUMN: &str = "Year";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Storage engine for Arrow/Parquet yearly tables
pub struct StorageEngine {
    batches: Vec<RecordBatch>,
}

impl StorageEngine {
    /// Wrap already-decoded batches.
    #[must_use]
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        Self { batches }
    }

    /// Load table from Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        use std::fs::File;

        let file = File::open(path.as_ref()).map_err(|e| {
            Error::StorageError(format!(
                "Failed to open Parquet file {}: {e}",
                path.as_ref().display()
            ))
        })?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            Error::StorageError(format!("Failed to parse Parquet file: {e}"))
        })?;

        let reader = builder.build().map_err(|e| {
            Error::StorageError(format!("Failed to create Parquet reader: {e}"))
        })?;

        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| {
                Error::StorageError(format!("Failed to read record batch: {e}"))
            })?;
            batches.push(batch);
        }

        Ok(Self { batches })
    }

    /// Build a single-batch table from a [`YearlySeries`].
    ///
    /// # Errors
    /// Returns error if Arrow rejects the batch
    pub fn from_series(series: &YearlySeries) -> Result<Self> {
        let mut fields = vec![ArrowField::new(YEAR_COLUMN, DataType::Int32, false)];
        let mut columns: Vec<ArrayRef> = vec![Arc::new(Int32Array::from(series.years().to_vec()))];

        for field in series.fields() {
            let values = series.require(field, "yearly table")?;
            fields.push(ArrowField::new(field.column_name(), DataType::Float64, false));
            columns.push(Arc::new(Float64Array::from(values.to_vec())));
        }

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        Ok(Self::new(vec![batch]))
    }

    /// Total row count across batches
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Decode the batches into a [`YearlySeries`].
    ///
    /// Unknown columns are ignored; nulls in value columns become zero.
    /// `source` names the table in error messages.
    ///
    /// # Errors
    ///
    /// Returns `MissingColumn` if the year column or one of `required`
    /// is absent, and `InputFormat` for unsupported column types.
    pub fn to_series(&self, source: &str, required: &[Field]) -> Result<YearlySeries> {
        let mut years: Vec<i32> = Vec::with_capacity(self.num_rows());
        let mut values: Vec<(Field, Vec<f64>)> = Vec::new();

        for (batch_idx, batch) in self.batches.iter().enumerate() {
            let year_col = batch
                .column_by_name(YEAR_COLUMN)
                .ok_or_else(|| Error::MissingColumn {
                    file: source.to_string(),
                    column: YEAR_COLUMN.to_string(),
                })?;
            years.extend(decode_years(year_col, source)?);

            let schema = batch.schema();
            for (col_idx, arrow_field) in schema.fields().iter().enumerate() {
                let Some(field) = Field::from_column_name(arrow_field.name()) else {
                    continue;
                };
                let decoded = decode_values(batch.column(col_idx), source, arrow_field.name())?;
                if batch_idx == 0 {
                    values.push((field, decoded));
                } else if let Some((_, existing)) = values.iter_mut().find(|(f, _)| *f == field) {
                    existing.extend(decoded);
                }
            }
        }

        for field in required {
            if !values.iter().any(|(f, _)| f == field) {
                return Err(Error::MissingColumn {
                    file: source.to_string(),
                    column: field.column_name().to_string(),
                });
            }
        }

        let mut series = YearlySeries::new(years)?;
        for (field, column) in values {
            series.insert_column(field, column)?;
        }
        Ok(series)
    }

    /// Write all batches to a Parquet file, atomically.
    ///
    /// # Errors
    ///
    /// Returns error if there is nothing to write or the write fails
    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use parquet::arrow::ArrowWriter;

        let schema = self
            .batches
            .first()
            .map(RecordBatch::schema)
            .ok_or_else(|| Error::StorageError("No batches to write".to_string()))?;

        let mut buf: Vec<u8> = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema, None)?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        writer.close()?;

        write_atomic(path.as_ref(), &buf)
    }
}

/// Load a yearly table straight from Parquet.
///
/// # Errors
///
/// Propagates storage and format errors.
pub fn read_yearly<P: AsRef<Path>>(path: P, required: &[Field]) -> Result<YearlySeries> {
    let source = path.as_ref().display().to_string();
    StorageEngine::load_parquet(path.as_ref())?.to_series(&source, required)
}

/// Write a yearly table to Parquet.
///
/// # Errors
///
/// Propagates storage errors.
pub fn write_yearly<P: AsRef<Path>>(path: P, series: &YearlySeries) -> Result<()> {
    StorageEngine::from_series(series)?.write_parquet(path)
}

/// Write `bytes` to a temporary sibling of `path`, then rename over it.
///
/// # Errors
///
/// Returns IO errors from create/write/rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::StorageError(format!("Not a file path: {}", path.display())))?
        .to_string_lossy();
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = (|| -> Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn decode_years(array: &ArrayRef, source: &str) -> Result<Vec<i32>> {
    match array.data_type() {
        DataType::Int32 => {
            let arr = array
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(|| type_error(source, YEAR_COLUMN, array.data_type()))?;
            if arr.null_count() > 0 {
                return Err(Error::input_format(source, 0, YEAR_COLUMN, "null year"));
            }
            Ok(arr.values().to_vec())
        }
        DataType::Int64 => {
            let arr = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| type_error(source, YEAR_COLUMN, array.data_type()))?;
            if arr.null_count() > 0 {
                return Err(Error::input_format(source, 0, YEAR_COLUMN, "null year"));
            }
            arr.values()
                .iter()
                .map(|&y| {
                    i32::try_from(y).map_err(|_| {
                        Error::input_format(source, 0, YEAR_COLUMN, format!("year {y} out of range"))
                    })
                })
                .collect()
        }
        other => Err(type_error(source, YEAR_COLUMN, other)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_values(array: &ArrayRef, source: &str, column: &str) -> Result<Vec<f64>> {
    let out = match array.data_type() {
        DataType::Float64 => {
            let arr = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| type_error(source, column, array.data_type()))?;
            arr.iter().map(|v| v.unwrap_or(0.0)).collect()
        }
        DataType::Int64 => {
            let arr = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| type_error(source, column, array.data_type()))?;
            arr.iter().map(|v| v.map_or(0.0, |x| x as f64)).collect()
        }
        DataType::Int32 => {
            let arr = array
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(|| type_error(source, column, array.data_type()))?;
            arr.iter().map(|v| v.map_or(0.0, f64::from)).collect()
        }
        other => return Err(type_error(source, column, other)),
    };
    Ok(out)
}

fn type_error(source: &str, column: &str, data_type: &DataType) -> Error {
    Error::input_format(
        source,
        0,
        column,
        format!("unsupported column type {data_type:?}"),
    )
}
