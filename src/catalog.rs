//! Authoritative table → field → type catalog ("schema plan").
//!
//! The catalog is read once per run from a CSV export that carries at least
//! the `Table`, `Field`, and `DataType` columns (matched case-insensitively;
//! any other columns such as `Description` are ignored). Field order within a
//! table follows the export's row order and is the canonical column order for
//! everything downstream.

use std::{collections::BTreeMap, path::Path};

use encoding_rs::Encoding;
use log::{debug, info};

use crate::{
    error::{IngestError, IngestResult},
    io_utils,
    types::ColumnType,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogField {
    pub name: String,
    pub declared_type: String,
    pub column_type: ColumnType,
    pub ordinal: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, Vec<CatalogField>>,
}

impl SchemaCatalog {
    pub fn load(path: &Path, encoding: &'static Encoding) -> IngestResult<Self> {
        let mut reader =
            io_utils::open_csv_reader_from_path(path, io_utils::DEFAULT_CSV_DELIMITER)?;
        let headers = io_utils::reader_headers(&mut reader, encoding, path)?;
        let locate = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    IngestError::Config(format!(
                        "schema catalog {path:?} has no '{name}' column"
                    ))
                })
        };
        let table_idx = locate("Table")?;
        let field_idx = locate("Field")?;
        let type_idx = locate("DataType")?;

        let mut catalog = SchemaCatalog::default();
        let mut record = csv::ByteRecord::new();
        while reader
            .read_byte_record(&mut record)
            .map_err(IngestError::csv(path))?
        {
            let decoded = io_utils::decode_record(&record, encoding, path)?;
            let cell = |idx: usize| decoded.get(idx).map(|s| s.trim()).unwrap_or("");
            let (table, field) = (cell(table_idx), cell(field_idx));
            if table.is_empty() || field.is_empty() {
                debug!("Skipping catalog row without table or field: {decoded:?}");
                continue;
            }
            catalog.insert(table, field, cell(type_idx))?;
        }
        info!(
            "Loaded schema catalog with {} table(s) from {:?}",
            catalog.tables.len(),
            path
        );
        Ok(catalog)
    }

    /// Appends a field to `table`. Field names must be unique per table.
    pub fn insert(&mut self, table: &str, field: &str, declared_type: &str) -> IngestResult<()> {
        let fields = self.tables.entry(table.to_string()).or_default();
        if fields.iter().any(|f| f.name == field) {
            return Err(IngestError::Config(format!(
                "field '{field}' is declared more than once for table '{table}'"
            )));
        }
        fields.push(CatalogField {
            name: field.to_string(),
            declared_type: declared_type.to_string(),
            column_type: ColumnType::from_declared(declared_type),
            ordinal: fields.len(),
        });
        Ok(())
    }

    pub fn fields(&self, table: &str) -> IngestResult<&[CatalogField]> {
        self.tables
            .get(table)
            .map(Vec::as_slice)
            .filter(|fields| !fields.is_empty())
            .ok_or_else(|| IngestError::UnknownTable(table.to_string()))
    }

    pub fn field_names(&self, table: &str) -> IngestResult<Vec<String>> {
        Ok(self
            .fields(table)?
            .iter()
            .map(|f| f.name.clone())
            .collect())
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_keep_insertion_order() {
        let mut catalog = SchemaCatalog::default();
        catalog.insert("dataGap", "PrimaryKey", "TEXT").unwrap();
        catalog.insert("dataGap", "SeqNo", "INTEGER").unwrap();
        catalog.insert("dataGap", "Gap", "NUMERIC").unwrap();
        let fields = catalog.fields("dataGap").unwrap();
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["PrimaryKey", "SeqNo", "Gap"]);
        assert_eq!(fields[2].ordinal, 2);
        assert_eq!(fields[2].column_type, ColumnType::Numeric);
    }

    #[test]
    fn unknown_table_is_reported() {
        let catalog = SchemaCatalog::default();
        let err = catalog.fields("dataLPI").unwrap_err();
        assert!(matches!(err, IngestError::UnknownTable(ref t) if t == "dataLPI"));
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let mut catalog = SchemaCatalog::default();
        catalog.insert("dataHeader", "PrimaryKey", "TEXT").unwrap();
        assert!(catalog.insert("dataHeader", "PrimaryKey", "TEXT").is_err());
    }
}
