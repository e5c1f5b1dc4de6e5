//! In-memory row batches.
//!
//! A [`RowBatch`] is an ordered column list plus rows of optional typed
//! cells, one cell per column. Batches are read from CSV with every non-empty
//! cell as [`Value::Text`]; the coercers turn them into catalog types later.

use std::{io::Write, path::Path};

use encoding_rs::Encoding;
use log::debug;

use crate::{
    data::Value,
    error::{IngestError, IngestResult},
    io_utils,
};

pub type Row = Vec<Option<Value>>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowBatch {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl RowBatch {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        debug_assert!(rows.iter().all(|row| row.len() == columns.len()));
        Self { columns, rows }
    }

    /// Builds a text batch from string literals; empty strings become null.
    pub fn from_text(columns: &[&str], rows: &[&[&str]]) -> Self {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|cell| text_cell(cell)).collect())
            .collect();
        Self { columns, rows }
    }

    pub fn read_csv(path: &Path, encoding: &'static Encoding) -> IngestResult<Self> {
        let mut reader =
            io_utils::open_csv_reader_from_path(path, io_utils::DEFAULT_CSV_DELIMITER)?;
        let columns = io_utils::reader_headers(&mut reader, encoding, path)?;
        let mut batch = RowBatch::new(columns);
        let mut record = csv::ByteRecord::new();
        while reader
            .read_byte_record(&mut record)
            .map_err(IngestError::csv(path))?
        {
            let decoded = io_utils::decode_record(&record, encoding, path)?;
            batch
                .rows
                .push(decoded.iter().map(|cell| text_cell(cell)).collect());
        }
        debug!(
            "Read {} row(s) across {} column(s) from {:?}",
            batch.rows.len(),
            batch.columns.len(),
            path
        );
        Ok(batch)
    }

    pub fn write_csv<W: Write>(&self, writer: &mut csv::Writer<W>) -> csv::Result<()> {
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(
                row.iter()
                    .map(|cell| cell.as_ref().map(Value::as_display).unwrap_or_default()),
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)?.as_ref()
    }

    /// Iterates the cells of one column, or nothing if the column is absent.
    pub fn column_values<'a>(
        &'a self,
        name: &str,
    ) -> impl Iterator<Item = Option<&'a Value>> + 'a {
        let idx = self.column_index(name);
        self.rows
            .iter()
            .filter_map(move |row| idx.map(|i| row[i].as_ref()))
    }

    /// Returns a batch with exactly `columns`, in that order. Columns missing
    /// from `self` are filled with nulls; extra columns are dropped.
    pub fn select(&self, columns: &[String]) -> RowBatch {
        let sources = columns
            .iter()
            .map(|name| self.column_index(name))
            .collect::<Vec<_>>();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                sources
                    .iter()
                    .map(|source| source.and_then(|idx| row[idx].clone()))
                    .collect()
            })
            .collect();
        RowBatch {
            columns: columns.to_vec(),
            rows,
        }
    }

    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Row) -> bool,
    {
        self.rows.retain(|row| keep(row));
    }

    /// Splits rows by `predicate`; the first batch holds rows where it is true.
    pub fn partition<F>(self, mut predicate: F) -> (RowBatch, RowBatch)
    where
        F: FnMut(&Row) -> bool,
    {
        let (left, right): (Vec<Row>, Vec<Row>) =
            self.rows.into_iter().partition(|row| predicate(row));
        (
            RowBatch {
                columns: self.columns.clone(),
                rows: left,
            },
            RowBatch {
                columns: self.columns,
                rows: right,
            },
        )
    }

    /// Applies `f` to every cell of the named column. Returns false when the
    /// column is absent.
    pub fn map_column<F>(&mut self, name: &str, mut f: F) -> bool
    where
        F: FnMut(Option<Value>) -> Option<Value>,
    {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        for row in &mut self.rows {
            let cell = row[idx].take();
            row[idx] = f(cell);
        }
        true
    }
}

fn text_cell(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        None
    } else {
        Some(Value::text(raw))
    }
}
