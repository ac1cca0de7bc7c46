//! Download JSON record arrays and write them as CSV inputs
//!
//! Each `api.sources` entry maps a dataset name to a URL returning a JSON array of
//! objects. The records are written to `<output_dir>/<name>.csv`, ready for the loaders.

use std::path::{Path, PathBuf};
use std::time::Duration;

use polars::prelude::{Column, CsvWriter, DataFrame, NamedFrom, PolarsResult, SerWriter, Series};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

use crate::config::EtlConfig;

/// Error type for API fetch operations
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("No api.sources configured")]
    NoSources,

    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("{url} did not return a JSON array of objects: {message}")]
    Body { url: String, message: String },

    #[error("Failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Fetch every configured source and return the written file paths
pub async fn fetch_sources(config: &EtlConfig) -> Result<Vec<PathBuf>, FetchError> {
    let api = match &config.api {
        Some(api) if !api.sources.is_empty() => api,
        _ => return Err(FetchError::NoSources),
    };
    let output_dir = api
        .output_dir
        .clone()
        .unwrap_or_else(|| config.paths.data_root.clone());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(api.timeout_secs))
        .build()
        .map_err(|e| FetchError::Http {
            url: String::new(),
            message: e.to_string(),
        })?;

    let mut written = Vec::with_capacity(api.sources.len());
    for (name, url) in &api.sources {
        let records = fetch_records(&client, url).await?;
        let path = output_dir.join(format!("{}.csv", name));
        write_csv(&path, &records)?;
        info!("[{}] Wrote {} records to {}", name, records.len(), path.display());
        written.push(path);
    }
    Ok(written)
}

async fn fetch_records(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<JsonValue>, FetchError> {
    let response = client.get(url).send().await.map_err(|e| FetchError::Http {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body: JsonValue = response.json().await.map_err(|e| FetchError::Body {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    match body {
        JsonValue::Array(records) if records.iter().all(JsonValue::is_object) => Ok(records),
        JsonValue::Array(_) => Err(FetchError::Body {
            url: url.to_string(),
            message: "array contains non-object elements".to_string(),
        }),
        other => Err(FetchError::Body {
            url: url.to_string(),
            message: format!("expected an array, got {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Render JSON objects as CSV
///
/// The header is the union of keys in first-seen order. `null` and absent keys become
/// empty fields; nested arrays and objects are written as compact JSON.
pub fn records_to_csv(records: &[JsonValue]) -> PolarsResult<String> {
    let mut header: Vec<&str> = Vec::new();
    for record in records {
        if let JsonValue::Object(map) = record {
            for key in map.keys() {
                if !header.contains(&key.as_str()) {
                    header.push(key);
                }
            }
        }
    }

    if header.is_empty() {
        return Ok(String::new());
    }

    let columns: Vec<Column> = header
        .iter()
        .map(|key| {
            let values: Vec<Option<String>> = records
                .iter()
                .map(|record| match record.get(*key) {
                    None | Some(JsonValue::Null) => None,
                    Some(JsonValue::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                })
                .collect();
            Series::new((*key).into(), values).into()
        })
        .collect();
    let mut df = DataFrame::new(columns)?;

    let mut buf = Vec::new();
    CsvWriter::new(&mut buf)
        .include_header(true)
        .finish(&mut df)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_csv(path: &Path, records: &[JsonValue]) -> Result<(), FetchError> {
    let write_err = |message: String| FetchError::Write {
        path: path.to_path_buf(),
        message,
    };
    let content = records_to_csv(records).map_err(|e| write_err(e.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }
    std::fs::write(path, content).map_err(|e| write_err(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_is_union_in_first_seen_order() {
        let records = vec![
            json!({"order_id": 1, "customer_id": 7}),
            json!({"order_id": 2, "store": "Santa Cruz Bikes", "customer_id": 8}),
        ];
        let csv = records_to_csv(&records).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("order_id,customer_id,store"));
        assert_eq!(lines.next(), Some("1,7,"));
        assert_eq!(lines.next(), Some("2,8,Santa Cruz Bikes"));
    }

    #[test]
    fn test_null_and_nested_values() {
        let records = vec![json!({
            "order_id": 1,
            "shipped_date": null,
            "tags": ["a", "b"],
            "paid": true
        })];
        let csv = records_to_csv(&records).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "order_id,shipped_date,tags,paid");
        assert_eq!(lines[1], "1,,\"[\"\"a\"\",\"\"b\"\"]\",true");
    }

    #[test]
    fn test_empty_records() {
        assert_eq!(records_to_csv(&[]).unwrap(), "");
    }

    #[test]
    fn test_write_csv_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("brands.csv");
        write_csv(&path, &[json!({"brand_id": 1, "brand_name": "Acme"})]).unwrap();
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "brand_id,brand_name\n1,Acme\n"
        );
    }
}
