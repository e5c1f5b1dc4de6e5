//! Project key resolution and propagation.
//!
//! The project key comes from a small key/value metadata record (JSON or
//! YAML) carrying a `project_key` entry. Without one, the first non-null
//! value found in the batch's project-key column is used. Once resolved, the
//! value is stamped onto every row of every batch in the run. A configured
//! metadata record is also saved whole to the project table.

use std::{collections::BTreeMap, fs, path::Path};

use log::{debug, info};

use crate::{
    batch::RowBatch,
    data::Value,
    error::{IngestError, IngestResult},
};

pub const PROJECT_KEY_ENTRY: &str = "project_key";

/// Project metadata as flat text entries. Nested values keep their JSON
/// text; nulls are dropped.
pub type ProjectRecord = BTreeMap<String, String>;

pub fn load_project_record(path: &Path) -> IngestResult<ProjectRecord> {
    let contents =
        fs::read_to_string(path).map_err(IngestError::io("reading project metadata", path))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let raw: BTreeMap<String, serde_json::Value> = if is_json {
        serde_json::from_str(&contents).map_err(|err| {
            IngestError::Config(format!("parsing project metadata {path:?}: {err}"))
        })?
    } else {
        serde_yaml::from_str(&contents).map_err(|err| {
            IngestError::Config(format!("parsing project metadata {path:?}: {err}"))
        })?
    };
    let record = raw
        .into_iter()
        .filter_map(|(name, value)| {
            let text = match value {
                serde_json::Value::Null => return None,
                serde_json::Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            Some((name, text))
        })
        .collect::<ProjectRecord>();
    debug!("Project metadata {path:?} carries {} entr(ies)", record.len());
    Ok(record)
}

pub fn load_project_metadata(path: &Path) -> IngestResult<Option<String>> {
    let key = load_project_record(path)?
        .remove(PROJECT_KEY_ENTRY)
        .filter(|key| !key.is_empty());
    debug!("Project metadata {path:?} resolved key {key:?}");
    Ok(key)
}

/// First non-blank value of `column` in `batch`.
pub fn scan_project_key(batch: &RowBatch, column: &str) -> Option<String> {
    batch
        .column_values(column)
        .flatten()
        .map(Value::as_display)
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// Resolves the run's project key: metadata first, then the batch.
pub fn resolve_project_key(
    metadata: Option<&Path>,
    batch: Option<&RowBatch>,
    column: &str,
) -> IngestResult<Option<String>> {
    if let Some(path) = metadata
        && let Some(key) = load_project_metadata(path)?
    {
        info!("Using project key '{key}' from {path:?}");
        return Ok(Some(key));
    }
    let scanned = batch.and_then(|b| scan_project_key(b, column));
    match &scanned {
        Some(key) => info!("Using project key '{key}' found in '{column}'"),
        None => info!("No project key resolved; '{column}' values are left as read"),
    }
    Ok(scanned)
}

/// Stamps `project_key` into `column` of every row. Returns false when the
/// batch does not carry the column.
pub fn propagate(batch: &mut RowBatch, column: &str, project_key: &str) -> bool {
    batch.map_column(column, |_| Some(Value::text(project_key)))
}
