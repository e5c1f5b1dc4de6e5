//! Referential gate between dependent tables and the header table.
//!
//! Rows whose key is present in the header table pass through; the rest are
//! orphans and go to a [`QuarantineSink`] instead of the database. The check
//! runs against a point-in-time snapshot of header keys, so it is not a
//! substitute for the foreign key the store declares.

use std::{
    collections::HashSet,
    fs,
    path::PathBuf,
};

use log::{info, warn};

use crate::{
    batch::RowBatch,
    data::Value,
    error::{IngestError, IngestResult},
    io_utils,
};

pub const GENERIC_DISCRIMINATOR: &str = "nodbkey";

/// Write-only destination for orphaned rows, one artifact per
/// (table, discriminator) pair.
pub trait QuarantineSink {
    fn quarantine(&mut self, table: &str, discriminator: &str, rows: &RowBatch)
    -> IngestResult<()>;
}

/// Writes `no_primarykeys_<discriminator>_<table>.csv` files into a directory.
#[derive(Debug, Clone)]
pub struct CsvQuarantine {
    dir: PathBuf,
}

impl CsvQuarantine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, table: &str, discriminator: &str) -> PathBuf {
        let safe = |s: &str| {
            s.chars()
                .map(|c| match c {
                    'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
                    _ => '_',
                })
                .collect::<String>()
        };
        self.dir.join(format!(
            "no_primarykeys_{}_{}.csv",
            safe(discriminator),
            safe(table)
        ))
    }
}

impl QuarantineSink for CsvQuarantine {
    fn quarantine(
        &mut self,
        table: &str,
        discriminator: &str,
        rows: &RowBatch,
    ) -> IngestResult<()> {
        fs::create_dir_all(&self.dir)
            .map_err(IngestError::io("creating quarantine directory", &self.dir))?;
        let path = self.path_for(table, discriminator);
        let mut writer = io_utils::open_csv_writer(Some(&path))?;
        rows.write_csv(&mut writer).map_err(|source| IngestError::Quarantine {
            table: table.to_string(),
            source: Box::new(IngestError::Csv {
                path: path.clone(),
                source,
            }),
        })?;
        warn!(
            "Quarantined {} orphan row(s) of '{table}' to {:?}",
            rows.len(),
            path
        );
        Ok(())
    }
}

/// Splits `batch` into rows whose key is in `header_keys` and orphans.
/// Rows with a null key are always orphans.
pub fn split(
    batch: RowBatch,
    key_column: &str,
    header_keys: &HashSet<String>,
) -> (RowBatch, RowBatch) {
    let idx = batch.column_index(key_column);
    batch.partition(|row| {
        idx.and_then(|i| row[i].as_ref())
            .is_some_and(|key| header_keys.contains(&key.as_display()))
    })
}

/// First non-null value of the discriminator column, or the generic marker.
pub fn discriminator(batch: &RowBatch, column: &str) -> String {
    batch
        .column_values(column)
        .flatten()
        .map(Value::as_display)
        .find(|s| !s.trim().is_empty())
        .unwrap_or_else(|| GENERIC_DISCRIMINATOR.to_string())
}

/// Runs the gate for `table`: orphans are written to `sink` once and the
/// matching rows are returned for ingestion.
pub fn gate(
    batch: RowBatch,
    table: &str,
    key_column: &str,
    discriminator_column: &str,
    header_keys: &HashSet<String>,
    sink: &mut dyn QuarantineSink,
) -> IngestResult<RowBatch> {
    let total = batch.len();
    let (matching, orphaned) = split(batch, key_column, header_keys);
    if !orphaned.is_empty() {
        let tag = discriminator(&orphaned, discriminator_column);
        sink.quarantine(table, &tag, &orphaned)?;
    }
    info!(
        "Referential gate on '{table}': {} of {total} row(s) matched the header table",
        matching.len()
    );
    Ok(matching)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(String, String, RowBatch)>,
    }

    impl QuarantineSink for Recorder {
        fn quarantine(
            &mut self,
            table: &str,
            discriminator: &str,
            rows: &RowBatch,
        ) -> IngestResult<()> {
            self.calls
                .push((table.to_string(), discriminator.to_string(), rows.clone()));
            Ok(())
        }
    }

    fn header(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn split_separates_matching_and_orphans() {
        let batch = RowBatch::from_text(&["PrimaryKey", "Gap"], &[&["A", "1"], &["C", "2"], &["", "3"]]);
        let (matching, orphaned) = split(batch, "PrimaryKey", &header(&["A", "B"]));
        assert_eq!(matching.len(), 1);
        assert_eq!(matching.value(0, "PrimaryKey"), Some(&Value::text("A")));
        assert_eq!(orphaned.len(), 2);
    }

    #[test]
    fn gate_quarantines_orphans_once_with_discriminator() {
        let batch = RowBatch::from_text(
            &["PrimaryKey", "DBKey"],
            &[&["A", "db-2021"], &["C", "db-2021"]],
        );
        let mut sink = Recorder::default();
        let matching = gate(batch, "dataGap", "PrimaryKey", "DBKey", &header(&["A", "B"]), &mut sink)
            .unwrap();
        assert_eq!(matching.len(), 1);
        assert_eq!(sink.calls.len(), 1);
        let (table, tag, rows) = &sink.calls[0];
        assert_eq!(table, "dataGap");
        assert_eq!(tag, "db-2021");
        assert_eq!(rows.value(0, "PrimaryKey"), Some(&Value::text("C")));
    }

    #[test]
    fn gate_skips_sink_without_orphans() {
        let batch = RowBatch::from_text(&["PrimaryKey"], &[&["A"]]);
        let mut sink = Recorder::default();
        gate(batch, "dataGap", "PrimaryKey", "DBKey", &header(&["A"]), &mut sink).unwrap();
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn discriminator_falls_back_to_generic_marker() {
        let batch = RowBatch::from_text(&["PrimaryKey"], &[&["C"]]);
        assert_eq!(discriminator(&batch, "DBKey"), GENERIC_DISCRIMINATOR);
    }

    #[test]
    fn csv_quarantine_writes_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvQuarantine::new(dir.path().join("noprimarykey"));
        let rows = RowBatch::from_text(&["PrimaryKey", "Gap"], &[&["C", "2"]]);
        sink.quarantine("dataGap", "nodbkey", &rows).unwrap();
        let written =
            std::fs::read_to_string(sink.path_for("dataGap", "nodbkey")).unwrap();
        assert_eq!(written, "PrimaryKey,Gap\nC,2\n");
    }
}
