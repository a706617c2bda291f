//! Parquet-backed event tables.
//!
//! Each file holds one flat table of event columns. Numeric and boolean
//! columns are read as `f64` (nulls become NaN). A writer may tag the file
//! with a `tree` key-value metadata entry; when present it must match the
//! requested tree name.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use tsf_core::{Error, Result};

use crate::frame::{ColumnSource, LoadedColumns};

/// Key-value metadata entry naming the table stored in a file.
pub const TREE_METADATA_KEY: &str = "tree";

fn data_err(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Data(format!("{}: {}", path.display(), e))
}

fn open_builder(path: &Path) -> Result<ParquetRecordBatchReaderBuilder<File>> {
    let file = File::open(path).map_err(|e| data_err(path, e))?;
    ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| data_err(path, e))
}

/// Lazily read set of Parquet files sharing one table layout.
#[derive(Debug)]
pub struct ParquetSource {
    files: Vec<PathBuf>,
    tree: String,
    columns: Vec<String>,
}

impl ParquetSource {
    /// Inspect the schemas of `files`. Only columns present in every file
    /// are readable.
    pub fn open(files: &[PathBuf], tree: &str) -> Result<Self> {
        if files.is_empty() {
            return Err(Error::Data(format!("empty input file set for tree '{}'", tree)));
        }

        let mut columns: Option<Vec<String>> = None;
        for path in files {
            let builder = open_builder(path)?;
            let tagged = builder
                .metadata()
                .file_metadata()
                .key_value_metadata()
                .and_then(|kv| kv.iter().find(|e| e.key == TREE_METADATA_KEY))
                .and_then(|e| e.value.clone());
            if let Some(found) = tagged
                && found != tree
            {
                return Err(data_err(
                    path,
                    format!("file holds tree '{}', expected '{}'", found, tree),
                ));
            }

            let names: Vec<String> =
                builder.schema().fields().iter().map(|f| f.name().clone()).collect();
            columns = Some(match columns {
                None => names,
                Some(prev) => prev.into_iter().filter(|c| names.contains(c)).collect(),
            });
        }

        let columns = columns.unwrap_or_default();
        tracing::debug!(n_files = files.len(), n_columns = columns.len(), tree, "opened parquet source");
        Ok(Self { files: files.to_vec(), tree: tree.to_string(), columns })
    }

    /// Files of this source, in read order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Table name.
    pub fn tree(&self) -> &str {
        &self.tree
    }
}

impl ColumnSource for ParquetSource {
    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn load(&self, names: &[String]) -> Result<LoadedColumns> {
        let mut acc: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
        let mut n_rows = 0usize;

        for path in &self.files {
            let builder = open_builder(path)?;
            if names.is_empty() {
                n_rows += builder.metadata().file_metadata().num_rows() as usize;
                continue;
            }

            let schema = builder.schema().clone();
            let mut roots = Vec::with_capacity(names.len());
            for name in names {
                let idx = schema.index_of(name).map_err(|_| Error::ColumnNotFound {
                    column: name.clone(),
                    context: format!("file {}", path.display()),
                })?;
                roots.push(idx);
            }
            let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
            let reader = builder.with_projection(mask).build().map_err(|e| data_err(path, e))?;

            for batch in reader {
                let batch = batch.map_err(|e| data_err(path, e))?;
                n_rows += batch.num_rows();
                for (name, out) in names.iter().zip(acc.iter_mut()) {
                    let col = batch.column_by_name(name).ok_or_else(|| Error::ColumnNotFound {
                        column: name.clone(),
                        context: format!("file {}", path.display()),
                    })?;
                    append_f64(path, name, col, out)?;
                }
            }
        }

        let columns = names.iter().cloned().zip(acc.into_iter().map(Arc::new)).collect();
        Ok(LoadedColumns { n_rows, columns })
    }
}

fn append_f64(path: &Path, name: &str, col: &ArrayRef, out: &mut Vec<f64>) -> Result<()> {
    let cast = arrow::compute::cast(col, &DataType::Float64).map_err(|e| {
        data_err(path, format!("column '{}' ({:?}) is not numeric: {}", name, col.data_type(), e))
    })?;
    let arr = cast.as_any().downcast_ref::<Float64Array>().ok_or_else(|| {
        data_err(path, format!("column '{}' did not cast to Float64", name))
    })?;
    if arr.null_count() == 0 {
        out.extend(arr.values().iter().copied());
    } else {
        out.extend(arr.iter().map(|v| v.unwrap_or(f64::NAN)));
    }
    Ok(())
}

/// Write `columns` as a single-table Parquet file tagged with `tree`.
pub fn write_parquet(path: &Path, tree: &str, columns: &[(&str, &[f64])]) -> Result<()> {
    let fields: Vec<Field> =
        columns.iter().map(|(name, _)| Field::new(*name, DataType::Float64, false)).collect();
    let arrays: Vec<ArrayRef> =
        columns.iter().map(|(_, v)| Arc::new(Float64Array::from(v.to_vec())) as ArrayRef).collect();
    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(Arc::clone(&schema), arrays)
        .map_err(|e| Error::Validation(e.to_string()))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(vec![KeyValue::new(
            TREE_METADATA_KEY.to_string(),
            tree.to_string(),
        )]))
        .build();

    let file = File::create(path)?;
    let mut writer =
        ArrowWriter::try_new(file, schema, Some(props)).map_err(|e| data_err(path, e))?;
    writer.write(&batch).map_err(|e| data_err(path, e))?;
    writer.close().map_err(|e| data_err(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_set_is_a_data_error() {
        let err = ParquetSource::open(&[], "ntuple").unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[test]
    fn missing_file_is_a_data_error() {
        let err = ParquetSource::open(&[PathBuf::from("/nonexistent/x.parquet")], "ntuple")
            .unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }
}
