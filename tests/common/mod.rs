#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Three-table catalog in the shape of the LDC schema plan export.
pub const CATALOG_CSV: &str = "\
Table,Field,DataType,Description
dataHeader,PrimaryKey,text,Plot visit key
dataHeader,DBKey,text,Source database
dataHeader,ProjectKey,text,Project
dataHeader,DateVisited,date,Visit date
dataHeader,Latitude_NAD83,numeric,Latitude
dataHeader,Longitude_NAD83,numeric,Longitude
dataHeader,wkb_geometry,geometry,Point
dataHeader,DateLoadedInDb,date,Load date
dataGap,PrimaryKey,text,Plot visit key
dataGap,DBKey,text,Source database
dataGap,ProjectKey,text,Project
dataGap,LineKey,text,Line
dataGap,RecKey,text,Record
dataGap,SeqNo,integer,Sequence
dataGap,Gap,numeric,Gap length
dataGap,RecType,text,Record type
dataGap,Canopy,bit,Canopy gap flag
dataGap,DateVisited,date,Visit date
dataGap,DateLoadedInDb,date,Load date
dataHeight,PrimaryKey,text,Plot visit key
dataHeight,LineKey,text,Line
dataHeight,RecKey,text,Record
dataHeight,PointNbr,integer,Point number
dataHeight,Height,numeric,Height
";

pub const NATURAL_KEYS_YAML: &str = "\
version: \"test\"
tables:
  dataHeader: [PrimaryKey]
  dataGap: [PrimaryKey, LineKey, RecKey, SeqNo, Gap, RecType]
  dataHeight: [PrimaryKey, LineKey, RecKey, PointNbr]
";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes an input export for `table` into the data directory.
    pub fn write_data(&self, table: &str, contents: &str) -> PathBuf {
        self.write(&format!("data/{table}.csv"), contents)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.path().join("data")
    }

    pub fn database(&self) -> PathBuf {
        self.path().join("tall.sqlite")
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.path().join("noprimarykey")
    }

    /// Writes the catalog, the registry, and `ingest.yaml` with the given
    /// chunk size. Returns the config path.
    pub fn write_config(&self, chunk_size: usize) -> PathBuf {
        self.write("catalog.csv", CATALOG_CSV);
        self.write("natural_keys.yaml", NATURAL_KEYS_YAML);
        fs::create_dir_all(self.data_dir()).expect("create data dir");
        self.write(
            "ingest.yaml",
            &format!(
                "database: tall.sqlite\n\
                 catalog: catalog.csv\n\
                 natural_keys: natural_keys.yaml\n\
                 data_dir: data\n\
                 quarantine_dir: noprimarykey\n\
                 chunk_size: {chunk_size}\n"
            ),
        )
    }

    /// Runs a single-value query against the workspace database.
    pub fn query_count(&self, sql: &str) -> i64 {
        let conn = rusqlite::Connection::open(self.database()).expect("open database");
        conn.query_row(sql, [], |row| row.get(0)).expect("query")
    }
}
