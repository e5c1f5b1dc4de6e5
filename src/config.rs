//! Run configuration and the per-run context handed to every stage.
//!
//! Configuration lives in a YAML file:
//!
//! ```yaml
//! database: ./tall.sqlite
//! catalog: ./validation_schemas/LDC_SchemaPlan_1.2.4.csv
//! catalog_encoding: ISO-8859-1
//! natural_keys: ./natural_keys.yaml
//! data_dir: ./data
//! quarantine_dir: ./noprimarykey
//! project_file: ./project.json
//! project_table: tblProject
//! chunk_size: 2000
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::SchemaCatalog,
    coerce::GeometryColumns,
    error::{IngestError, IngestResult},
    keys::NaturalKeyRegistry,
    store::DEFAULT_CHUNK_SIZE,
};

fn default_header_table() -> String {
    "dataHeader".to_string()
}

fn default_project_table() -> String {
    "tblProject".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_catalog_encoding() -> String {
    "windows-1252".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnNames {
    pub primary_key: String,
    pub date_visited: String,
    pub load_date: String,
    pub project_key: String,
    pub discriminator: String,
    pub geometry: String,
    pub longitude: String,
    pub latitude: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            primary_key: "PrimaryKey".to_string(),
            date_visited: "DateVisited".to_string(),
            load_date: "DateLoadedInDb".to_string(),
            project_key: "ProjectKey".to_string(),
            discriminator: "DBKey".to_string(),
            geometry: "wkb_geometry".to_string(),
            longitude: "Longitude_NAD83".to_string(),
            latitude: "Latitude_NAD83".to_string(),
        }
    }
}

impl ColumnNames {
    pub fn geometry_columns(&self) -> GeometryColumns {
        GeometryColumns {
            geometry: self.geometry.clone(),
            longitude: self.longitude.clone(),
            latitude: self.latitude.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    pub database: PathBuf,
    pub catalog: PathBuf,
    #[serde(default = "default_catalog_encoding")]
    pub catalog_encoding: String,
    #[serde(default)]
    pub input_encoding: Option<String>,
    pub natural_keys: PathBuf,
    pub data_dir: PathBuf,
    pub quarantine_dir: PathBuf,
    #[serde(default)]
    pub project_file: Option<PathBuf>,
    #[serde(default = "default_header_table")]
    pub header_table: String,
    #[serde(default = "default_project_table")]
    pub project_table: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub columns: ColumnNames,
}

impl IngestConfig {
    pub fn load(path: &Path) -> IngestResult<Self> {
        let file = File::open(path).map_err(IngestError::io("opening config", path))?;
        let mut config: IngestConfig = serde_yaml::from_reader(BufReader::new(file))
            .map_err(|err| IngestError::Config(format!("parsing {path:?}: {err}")))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.ensure_valid()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.database);
        resolve(&mut self.catalog);
        resolve(&mut self.natural_keys);
        resolve(&mut self.data_dir);
        resolve(&mut self.quarantine_dir);
        if let Some(project) = self.project_file.as_mut() {
            resolve(project);
        }
    }

    pub fn ensure_valid(&self) -> IngestResult<()> {
        if self.chunk_size == 0 {
            return Err(IngestError::Config("chunk_size must be positive".into()));
        }
        if self.header_table.trim().is_empty() {
            return Err(IngestError::Config("header_table cannot be empty".into()));
        }
        if self.project_table.trim().is_empty() {
            return Err(IngestError::Config("project_table cannot be empty".into()));
        }
        Ok(())
    }
}

/// Everything a stage needs to know about the current run. Built once, then
/// shared read-only.
#[derive(Debug)]
pub struct RunContext<'a> {
    pub catalog: &'a SchemaCatalog,
    pub keys: &'a NaturalKeyRegistry,
    pub columns: &'a ColumnNames,
    pub header_table: &'a str,
    pub project_key: Option<String>,
    pub chunk_size: usize,
    pub load_date: NaiveDate,
}

impl RunContext<'_> {
    pub fn is_header(&self, table: &str) -> bool {
        table.eq_ignore_ascii_case(self.header_table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_applies_defaults_and_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.yaml");
        std::fs::write(
            &path,
            "database: tall.sqlite\ncatalog: plan.csv\nnatural_keys: keys.yaml\ndata_dir: data\nquarantine_dir: /tmp/noprimarykey\n",
        )
        .unwrap();
        let config = IngestConfig::load(&path).unwrap();
        assert_eq!(config.database, dir.path().join("tall.sqlite"));
        assert_eq!(config.quarantine_dir, PathBuf::from("/tmp/noprimarykey"));
        assert_eq!(config.header_table, "dataHeader");
        assert_eq!(config.project_table, "tblProject");
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.catalog_encoding, "windows-1252");
        assert_eq!(config.columns.primary_key, "PrimaryKey");
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.yaml");
        std::fs::write(
            &path,
            "database: a\ncatalog: b\nnatural_keys: c\ndata_dir: d\nquarantine_dir: e\nchunk_size: 0\n",
        )
        .unwrap();
        assert!(IngestConfig::load(&path).unwrap_err().is_configuration());
    }
}
