use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;

use super::Exporter;
use crate::models::ResultSet;
use crate::utils::time::file_stamp;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to prepare export directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write CSV export {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to flush CSV export {path}: {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// `query_results_<UTC stamp>.csv` inside `export_dir`.
#[must_use]
pub fn default_export_path(export_dir: &Path, timestamp_unix_ms: u64) -> PathBuf {
    export_dir.join(format!(
        "query_results_{}.csv",
        file_stamp(timestamp_unix_ms)
    ))
}

/// Header row followed by one record per result row.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvExporter;

impl Exporter for CsvExporter {
    fn export(&self, result: &ResultSet, destination: &Path) -> Result<PathBuf, ExportError> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ExportError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let write_error = |source| ExportError::Write {
            path: destination.to_path_buf(),
            source,
        };
        let mut writer = csv::Writer::from_path(destination).map_err(write_error)?;
        writer.write_record(&result.columns).map_err(write_error)?;
        for row in &result.rows {
            writer
                .write_record(row.iter().map(cell_text))
                .map_err(write_error)?;
        }
        writer.flush().map_err(|source| ExportError::Flush {
            path: destination.to_path_buf(),
            source,
        })?;

        info!(
            path = %destination.display(),
            rows = result.row_count(),
            "result set exported"
        );
        Ok(destination.to_path_buf())
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
