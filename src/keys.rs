//! Natural-key registry: which columns make a row unique in each table.
//!
//! The registry is a versioned YAML document loaded once per run:
//!
//! ```yaml
//! version: "1.2.4"
//! tables:
//!   dataHeader: [PrimaryKey]
//!   dataGap: [PrimaryKey, LineKey, RecKey, SeqNo, Gap, RecType]
//! ```
//!
//! The same column list drives in-batch deduplication and the upsert conflict
//! target. A table with no entry is a configuration error.

use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    catalog::SchemaCatalog,
    error::{IngestError, IngestResult},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NaturalKeyRegistry {
    #[serde(default)]
    pub version: Option<String>,
    pub tables: BTreeMap<String, Vec<String>>,
}

impl NaturalKeyRegistry {
    pub fn load(path: &Path) -> IngestResult<Self> {
        let file = File::open(path).map_err(IngestError::io("opening natural key registry", path))?;
        let registry: NaturalKeyRegistry = serde_yaml::from_reader(BufReader::new(file))
            .map_err(|err| {
                IngestError::Config(format!("parsing natural key registry {path:?}: {err}"))
            })?;
        registry.ensure_valid()?;
        Ok(registry)
    }

    pub fn from_entries<I, T, C>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, Vec<C>)>,
        T: Into<String>,
        C: Into<String>,
    {
        let tables = entries
            .into_iter()
            .map(|(table, columns)| {
                (
                    table.into(),
                    columns.into_iter().map(Into::into).collect(),
                )
            })
            .collect();
        Self {
            version: None,
            tables,
        }
    }

    fn ensure_valid(&self) -> IngestResult<()> {
        for (table, columns) in &self.tables {
            if columns.is_empty() {
                return Err(IngestError::Config(format!(
                    "natural key for table '{table}' lists no columns"
                )));
            }
            if let Some(dup) = columns
                .iter()
                .enumerate()
                .find(|(idx, c)| columns[..*idx].contains(*c))
                .map(|(_, c)| c)
            {
                return Err(IngestError::Config(format!(
                    "natural key for table '{table}' repeats column '{dup}'"
                )));
            }
        }
        Ok(())
    }

    pub fn key_for(&self, table: &str) -> IngestResult<&[String]> {
        self.tables
            .get(table)
            .map(Vec::as_slice)
            .ok_or_else(|| IngestError::MissingNaturalKey(table.to_string()))
    }

    /// Returns the key for `table` after checking every key column is declared
    /// in the catalog.
    pub fn validated_key_for(
        &self,
        table: &str,
        catalog: &SchemaCatalog,
    ) -> IngestResult<&[String]> {
        let key = self.key_for(table)?;
        let fields = catalog.fields(table)?;
        if let Some(column) = key
            .iter()
            .find(|column| !fields.iter().any(|f| &f.name == *column))
        {
            return Err(IngestError::NaturalKeyColumn {
                table: table.to_string(),
                column: column.clone(),
            });
        }
        Ok(key)
    }
}
