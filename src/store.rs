//! SQLite ingestion engine.
//!
//! Every public operation opens its own connection and closes it on return,
//! so each one is its own transaction boundary and a failed run can simply be
//! repeated: tables and indexes are created conditionally, the natural-key
//! index is dropped and re-created, and rows are upserted rather than
//! inserted.
//!
//! Loading goes through a session-scoped temp table. A batch is cut into
//! chunks of `chunk_size` rows; each chunk is bulk-inserted into the temp
//! table, merged into the target with `INSERT ... ON CONFLICT DO UPDATE`,
//! cleared, and committed. A failing chunk is rolled back and stops the load
//! for that table; chunks committed before it stay committed.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::PathBuf,
};

use chrono::{NaiveDate, NaiveDateTime};
use itertools::Itertools;
use log::{debug, info, warn};
use rusqlite::{
    Connection, OptionalExtension, params_from_iter,
    types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};

use crate::{
    batch::RowBatch,
    catalog::CatalogField,
    data::Value,
    error::{IngestError, IngestResult, Operation},
};

pub const DEFAULT_CHUNK_SIZE: usize = 2000;
const LOOKUP_SLICE: usize = 500;
const IDENTITY_COLUMN: &str = "rid";

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Float(f) => ToSqlOutput::from(*f),
            Value::Boolean(b) => ToSqlOutput::from(i64::from(*b)),
            Value::Date(d) => ToSqlOutput::from(d.format("%Y-%m-%d").to_string()),
            Value::Timestamp(dt) => ToSqlOutput::from(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(Value::Integer(i)),
            ValueRef::Real(f) => Ok(Value::Float(f)),
            ValueRef::Text(_) | ValueRef::Blob(_) => String::column_result(value).map(Value::Text),
            ValueRef::Null => Err(rusqlite::types::FromSqlError::InvalidType),
        }
    }
}

/// Parses a stored date cell back into a [`Value::Date`] where possible.
pub fn stored_date(value: Value) -> Value {
    match &value {
        Value::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Value::Date)
            .or_else(|_| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(Value::Timestamp)
            })
            .unwrap_or(value),
        _ => value,
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote_ident(c)).join(", ")
}

fn key_expressions(natural_key: &[String]) -> String {
    // NULL key parts compare equal so re-running a load stays idempotent.
    natural_key
        .iter()
        .map(|c| format!("IFNULL({}, '')", quote_ident(c)))
        .join(", ")
}

#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn connect(&self, table: &str) -> IngestResult<Connection> {
        let conn = Connection::open(&self.path)
            .map_err(IngestError::database(table, Operation::Connect))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(IngestError::database(table, Operation::Connect))?;
        Ok(conn)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub rows: usize,
    pub chunks: usize,
    pub affected: usize,
}

#[derive(Debug, Clone)]
pub struct IngestionEngine {
    database: Database,
    header_table: String,
    primary_key: String,
}

impl IngestionEngine {
    pub fn new(
        database: Database,
        header_table: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            database,
            header_table: header_table.into(),
            primary_key: primary_key.into(),
        }
    }

    pub fn is_header(&self, table: &str) -> bool {
        table.eq_ignore_ascii_case(&self.header_table)
    }

    /// Creates the table, its lookup index, and its natural-key constraint.
    pub fn ensure_schema(
        &self,
        table: &str,
        fields: &[CatalogField],
        natural_key: &[String],
    ) -> IngestResult<()> {
        if !fields.iter().any(|f| f.name == self.primary_key) {
            return Err(IngestError::MissingColumn {
                table: table.to_string(),
                column: self.primary_key.clone(),
            });
        }
        let mut conn = self.database.connect(table)?;
        let pk = quote_ident(&self.primary_key);

        let mut definitions = vec![format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote_ident(IDENTITY_COLUMN)
        )];
        definitions.extend(
            fields
                .iter()
                .map(|f| format!("{} {}", quote_ident(&f.name), f.column_type.sql_type())),
        );
        if self.is_header(table) {
            definitions.push(format!("UNIQUE ({pk})"));
        } else {
            definitions.push(format!(
                "FOREIGN KEY ({pk}) REFERENCES {}({pk})",
                quote_ident(&self.header_table)
            ));
        }
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            definitions.join(", ")
        );
        debug!("{create}");
        conn.execute(&create, [])
            .map_err(IngestError::database(table, Operation::CreateTable))?;
        info!("Checked or created table '{table}'");

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({pk})",
            quote_ident(&format!("{table}_primarykey_idx")),
            quote_ident(table)
        );
        conn.execute(&index, [])
            .map_err(IngestError::database(table, Operation::CreateIndex))?;
        info!("Checked or created lookup index for '{table}'");

        let constraint = quote_ident(&format!("{table}_natural_key"));
        let tx = conn
            .transaction()
            .map_err(IngestError::database(table, Operation::NaturalKeyConstraint))?;
        tx.execute(&format!("DROP INDEX IF EXISTS {constraint}"), [])
            .map_err(IngestError::database(table, Operation::NaturalKeyConstraint))?;
        tx.execute(
            &format!(
                "CREATE UNIQUE INDEX {constraint} ON {} ({})",
                quote_ident(table),
                key_expressions(natural_key)
            ),
            [],
        )
        .map_err(IngestError::database(table, Operation::NaturalKeyConstraint))?;
        tx.commit()
            .map_err(IngestError::database(table, Operation::NaturalKeyConstraint))?;
        info!("Replaced natural key constraint on '{table}' ({natural_key:?})");
        Ok(())
    }

    /// Stages `batch` through a temp table and upserts it in chunks of
    /// `chunk_size` rows, committing after each chunk.
    pub fn upsert(
        &self,
        table: &str,
        batch: &RowBatch,
        natural_key: &[String],
        chunk_size: usize,
    ) -> IngestResult<UpsertReport> {
        let chunk_size = chunk_size.max(1);
        if batch.is_empty() {
            info!("Nothing to ingest into '{table}'");
            return Ok(UpsertReport::default());
        }
        let mut conn = self.database.connect(table)?;
        let live = live_columns(&conn, table)?;
        for column in batch.columns() {
            if !live.contains(column) {
                warn!("Column '{column}' is not in live table '{table}' and will not be loaded");
            }
        }
        let sources = live
            .iter()
            .map(|name| {
                let source = batch.column_index(name);
                if source.is_none() {
                    debug!("Padding live column '{name}' of '{table}' with nulls");
                }
                source
            })
            .collect::<Vec<_>>();

        let target = quote_ident(table);
        let temp = quote_ident(&format!("{table}_temp"));
        let columns = column_list(&live);
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS temp.{temp};
             CREATE TEMP TABLE {temp} AS SELECT {columns} FROM main.{target} LIMIT 0;"
        ))
        .map_err(IngestError::database(table, Operation::Stage))?;
        debug!("Created temporary table {temp}");

        let placeholders = (1..=live.len()).map(|i| format!("?{i}")).join(", ");
        let stage_sql = format!("INSERT INTO temp.{temp} ({columns}) VALUES ({placeholders})");
        let upsert_sql = upsert_statement(table, &live, natural_key);
        let clear_sql = format!("DELETE FROM temp.{temp}");
        debug!("{upsert_sql}");

        let chunks = batch.len().div_ceil(chunk_size);
        let mut report = UpsertReport {
            rows: batch.len(),
            chunks,
            affected: 0,
        };
        for (idx, chunk) in batch.rows().chunks(chunk_size).enumerate() {
            let number = idx + 1;
            let fail = |operation: Operation| {
                move |source: rusqlite::Error| IngestError::Chunk {
                    table: table.to_string(),
                    chunk: number,
                    chunks,
                    operation,
                    source,
                }
            };
            let tx = conn.transaction().map_err(fail(Operation::Stage))?;
            {
                let mut stage = tx.prepare_cached(&stage_sql).map_err(fail(Operation::Stage))?;
                for row in chunk {
                    let values = sources
                        .iter()
                        .map(|source| source.and_then(|i| row[i].as_ref()));
                    stage
                        .execute(params_from_iter(values))
                        .map_err(fail(Operation::Stage))?;
                }
            }
            let affected = tx.execute(&upsert_sql, []).map_err(fail(Operation::Upsert))?;
            tx.execute(&clear_sql, []).map_err(fail(Operation::Stage))?;
            tx.commit().map_err(fail(Operation::Upsert))?;
            report.affected += affected;
            info!(
                "Chunk {number}/{chunks} of '{table}': {} row(s) staged, {affected} inserted or updated",
                chunk.len()
            );
        }
        info!(
            "Loaded {} row(s) into '{table}' in {} chunk(s)",
            report.rows, report.chunks
        );
        Ok(report)
    }

    /// Current `PrimaryKey` values of the header table. A missing header table
    /// yields an empty set.
    pub fn header_keys(&self) -> IngestResult<HashSet<String>> {
        let table = self.header_table.as_str();
        let conn = self.database.connect(table)?;
        if !table_exists(&conn, table)? {
            warn!("Header table '{table}' does not exist yet; no keys available");
            return Ok(HashSet::new());
        }
        let pk = quote_ident(&self.primary_key);
        let sql = format!(
            "SELECT {pk} FROM {} WHERE {pk} IS NOT NULL",
            quote_ident(table)
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(IngestError::database(table, Operation::HeaderKeys))?;
        let keys = stmt
            .query_map([], |row| row.get::<_, Value>(0))
            .map_err(IngestError::database(table, Operation::HeaderKeys))?
            .map(|key| key.map(|k| k.as_display()))
            .collect::<rusqlite::Result<HashSet<_>>>()
            .map_err(IngestError::database(table, Operation::HeaderKeys))?;
        debug!("Fetched {} key(s) from '{table}'", keys.len());
        Ok(keys)
    }

    /// Visit dates recorded in the header table for `keys`.
    pub fn date_visited(
        &self,
        keys: &[String],
        date_column: &str,
    ) -> IngestResult<HashMap<String, Value>> {
        let table = self.header_table.as_str();
        let conn = self.database.connect(table)?;
        if !table_exists(&conn, table)? || !live_columns(&conn, table)?.iter().any(|c| c == date_column)
        {
            warn!("Header table '{table}' has no '{date_column}' column to backfill from");
            return Ok(HashMap::new());
        }
        let pk = quote_ident(&self.primary_key);
        let date = quote_ident(date_column);
        let mut visits = HashMap::new();
        for slice in keys.chunks(LOOKUP_SLICE) {
            let placeholders = (1..=slice.len()).map(|i| format!("?{i}")).join(", ");
            let sql = format!(
                "SELECT {pk}, {date} FROM {} WHERE {pk} IN ({placeholders}) AND {date} IS NOT NULL",
                quote_ident(table)
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(IngestError::database(table, Operation::DateVisited))?;
            let rows = stmt
                .query_map(params_from_iter(slice.iter()), |row| {
                    Ok((row.get::<_, Value>(0)?, row.get::<_, Value>(1)?))
                })
                .map_err(IngestError::database(table, Operation::DateVisited))?;
            for row in rows {
                let (key, visited) =
                    row.map_err(IngestError::database(table, Operation::DateVisited))?;
                visits.insert(key.as_display(), stored_date(visited));
            }
        }
        debug!(
            "Fetched {} visit date(s) for {} key(s) from '{table}'",
            visits.len(),
            keys.len()
        );
        Ok(visits)
    }

    /// Creates the project table if needed and upserts `record` into it,
    /// keyed on `key_column`. Entries without a column yet are added as TEXT
    /// columns, so a richer metadata record can follow a sparser one.
    pub fn save_project(
        &self,
        table: &str,
        key_column: &str,
        record: &BTreeMap<String, String>,
    ) -> IngestResult<()> {
        if !record.contains_key(key_column) {
            return Err(IngestError::MissingColumn {
                table: table.to_string(),
                column: key_column.to_string(),
            });
        }
        let mut conn = self.database.connect(table)?;
        let tx = conn
            .transaction()
            .map_err(IngestError::database(table, Operation::SaveProject))?;

        let definitions = record
            .keys()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .chain(std::iter::once(format!("UNIQUE ({})", quote_ident(key_column))))
            .join(", ");
        tx.execute(
            &format!("CREATE TABLE IF NOT EXISTS {} ({definitions})", quote_ident(table)),
            [],
        )
        .map_err(IngestError::database(table, Operation::SaveProject))?;
        let live = live_columns(&tx, table)?;
        for column in record.keys().filter(|c| !live.contains(c)) {
            tx.execute(
                &format!(
                    "ALTER TABLE {} ADD COLUMN {} TEXT",
                    quote_ident(table),
                    quote_ident(column)
                ),
                [],
            )
            .map_err(IngestError::database(table, Operation::SaveProject))?;
            info!("Added column '{column}' to project table '{table}'");
        }

        let columns = record.keys().cloned().collect::<Vec<_>>();
        let updates = columns
            .iter()
            .filter(|c| c.as_str() != key_column)
            .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
            .join(", ");
        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {updates}")
        };
        let placeholders = (1..=columns.len()).map(|i| format!("?{i}")).join(", ");
        tx.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({placeholders}) ON CONFLICT ({}) {action}",
                quote_ident(table),
                column_list(&columns),
                quote_ident(key_column)
            ),
            params_from_iter(record.values()),
        )
        .map_err(IngestError::database(table, Operation::SaveProject))?;
        tx.commit()
            .map_err(IngestError::database(table, Operation::SaveProject))?;
        info!(
            "Saved project '{}' to '{table}'",
            record.get(key_column).map(String::as_str).unwrap_or_default()
        );
        Ok(())
    }

    pub fn count_rows(&self, table: &str) -> IngestResult<usize> {
        let conn = self.database.connect(table)?;
        if !table_exists(&conn, table)? {
            return Ok(0);
        }
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), [], |row| {
                row.get(0)
            })
            .map_err(IngestError::database(table, Operation::DescribeTable))?;
        Ok(count as usize)
    }
}

fn upsert_statement(table: &str, live: &[String], natural_key: &[String]) -> String {
    let columns = column_list(live);
    let updates = live
        .iter()
        .filter(|c| !natural_key.contains(c))
        .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
        .join(", ");
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {updates}")
    };
    // `WHERE true` keeps SQLite from reading ON CONFLICT as a join constraint.
    format!(
        "INSERT INTO main.{target} ({columns}) SELECT {columns} FROM temp.{temp} WHERE true \
         ON CONFLICT ({keys}) {action}",
        target = quote_ident(table),
        temp = quote_ident(&format!("{table}_temp")),
        keys = key_expressions(natural_key),
    )
}

fn table_exists(conn: &Connection, table: &str) -> IngestResult<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(IngestError::database(table, Operation::DescribeTable))
}

/// Columns of the live table in declaration order, without the identity column.
fn live_columns(conn: &Connection, table: &str) -> IngestResult<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA main.table_info({})", quote_ident(table)))
        .map_err(IngestError::database(table, Operation::DescribeTable))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(IngestError::database(table, Operation::DescribeTable))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(IngestError::database(table, Operation::DescribeTable))?;
    Ok(columns
        .into_iter()
        .filter(|c| c != IDENTITY_COLUMN)
        .collect())
}
