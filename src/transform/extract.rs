//! CSV extraction

use std::path::Path;

use chrono::NaiveDateTime;
use polars::prelude::*;
use tracing::{debug, info};

use super::{TransformError, TransformResult, check_keys, transform_dataset};
use crate::models::{DatasetSpec, Frame};

/// Marker polars appends to the second and later copies of a repeated header
const DUPLICATE_MARKER: &str = "_duplicated_";

/// Read a CSV file with a header row into a raw frame
///
/// Every column is read as text. Empty fields and fields equal to one of `null_values`
/// become NULL. Short records are padded with NULL; a record with more fields than the
/// header is an error, as is a repeated header.
pub fn read_csv(path: &Path, null_values: &[String]) -> TransformResult<Frame> {
    if !path.is_file() {
        return Err(TransformError::FileNotFound(path.to_path_buf()));
    }

    let read_err = |message: String| TransformError::Read {
        path: path.to_path_buf(),
        message,
    };

    let mut parse_options = CsvParseOptions::default();
    if !null_values.is_empty() {
        parse_options = parse_options.with_null_values(Some(NullValues::AllColumns(
            null_values.iter().map(|v| v.as_str().into()).collect(),
        )));
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_parse_options(parse_options)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| read_err(e.to_string()))?;

    let headers: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(read_err("missing header row".to_string()));
    }
    for header in &headers {
        if let Some((base, _)) = header.rsplit_once(DUPLICATE_MARKER) {
            if headers.iter().any(|h| h == base) {
                return Err(read_err(format!("duplicate column '{}'", base)));
            }
        }
    }

    debug!("Read {} rows from {}", df.height(), path.display());
    Ok(Frame::new(df))
}

/// Read and transform one dataset's input file
pub fn load_dataset(
    spec: &DatasetSpec,
    path: &Path,
    run_ts: NaiveDateTime,
) -> TransformResult<Frame> {
    let raw = read_csv(path, &spec.null_values)?;
    let raw_rows = raw.len();
    let frame = transform_dataset(spec, raw, run_ts)?;
    info!(
        "[{}] Transformed {} raw rows into {} rows",
        spec.name,
        raw_rows,
        frame.len()
    );
    Ok(frame)
}

/// Load a dataset, drop exact duplicate rows and check its keys
///
/// The returned frame is ready to be written to the database.
pub fn prepare_dataset(
    spec: &DatasetSpec,
    path: &Path,
    run_ts: NaiveDateTime,
) -> TransformResult<Frame> {
    let mut frame = load_dataset(spec, path, run_ts)?;
    let dropped = frame
        .drop_duplicates()
        .map_err(|source| TransformError::Frame {
            dataset: spec.name.clone(),
            source,
        })?;
    if dropped > 0 {
        info!("[{}] Dropped {} duplicate rows", spec.name, dropped);
    }
    check_keys(spec, &frame)?;
    Ok(frame)
}
