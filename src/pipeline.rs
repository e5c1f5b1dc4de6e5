//! Per-file ingestion pipeline and run orchestration.
//!
//! For every input batch the stages run in this order:
//!
//! 1. validation against the catalog
//! 2. project key propagation
//! 3. geometry synthesis and load-date stamping
//! 4. deduplication on the table's natural key
//! 5. referential gate and visit-date backfill (dependent tables only)
//! 6. numeric, integer, bit, and date coercion
//! 7. drift reconciliation against the catalog
//! 8. schema creation and chunked upsert
//!
//! Files are processed one at a time with the header table first, so the
//! header rows are committed before any dependent table is gated against
//! them. A failure stops the affected table only; the run moves on.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::Local;
use encoding_rs::Encoding;
use log::{error, info, warn};

use crate::{
    backfill,
    batch::RowBatch,
    catalog::SchemaCatalog,
    coerce,
    config::{IngestConfig, RunContext},
    dedup,
    error::{IngestError, IngestResult},
    io_utils,
    keys::NaturalKeyRegistry,
    project,
    referential::{self, CsvQuarantine, QuarantineSink},
    store::{Database, IngestionEngine, UpsertReport},
    validate,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableReport {
    pub table: String,
    pub rows_read: usize,
    pub duplicates: usize,
    pub orphaned: usize,
    pub upsert: UpsertReport,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub project_key: Option<String>,
    pub reports: Vec<TableReport>,
    pub failures: Vec<(String, IngestError)>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn report(&self, table: &str) -> Option<&TableReport> {
        self.reports.iter().find(|r| r.table == table)
    }
}

/// Table name for an input file: its file stem.
pub fn table_name(path: &Path) -> IngestResult<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::Config(format!("cannot derive a table name from {path:?}")))
}

/// CSV files in `data_dir`, header table first, the rest by file name.
pub fn input_files(data_dir: &Path, header_table: &str) -> IngestResult<Vec<PathBuf>> {
    let entries =
        fs::read_dir(data_dir).map_err(IngestError::io("listing data directory", data_dir))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(IngestError::io("listing data directory", data_dir))?
            .path();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if path.is_file() && is_csv {
            files.push(path);
        }
    }
    files.sort_by_key(|path| {
        let is_header = path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.eq_ignore_ascii_case(header_table));
        (!is_header, path.file_name().map(|n| n.to_os_string()))
    });
    Ok(files)
}

/// Catalog-only stages: validation, project key, geometry, load date, and
/// deduplication. Returns the batch and the number of duplicates removed.
pub fn prepare(ctx: &RunContext<'_>, table: &str, batch: &RowBatch) -> IngestResult<(RowBatch, usize)> {
    let natural_key = ctx.keys.validated_key_for(table, ctx.catalog)?;
    let mut batch = validate::validate(batch, ctx.catalog, table)?;
    if let Some(project_key) = ctx.project_key.as_deref()
        && !project::propagate(&mut batch, &ctx.columns.project_key, project_key)
    {
        info!(
            "'{table}' does not declare '{}'; project key not stamped",
            ctx.columns.project_key
        );
    }
    coerce::geometry_fix(&mut batch, &ctx.columns.geometry_columns());
    coerce::load_timestamp_fix(&mut batch, &ctx.columns.load_date, ctx.load_date);
    let duplicates = dedup::dedup_on(&mut batch, natural_key, ctx.catalog.fields(table)?);
    Ok((batch, duplicates))
}

/// Schema-driven coercion followed by the final drift check.
pub fn finish(ctx: &RunContext<'_>, table: &str, mut batch: RowBatch) -> IngestResult<RowBatch> {
    let fields = ctx.catalog.fields(table)?;
    coerce::apply_schema_coercions(&mut batch, fields);
    validate::reconcile(batch, ctx.catalog, table)
}

/// Runs every stage for one batch destined for `table`.
pub fn ingest_batch(
    ctx: &RunContext<'_>,
    engine: &IngestionEngine,
    sink: &mut dyn QuarantineSink,
    table: &str,
    batch: &RowBatch,
) -> IngestResult<TableReport> {
    let rows_read = batch.len();
    let (mut batch, duplicates) = prepare(ctx, table, batch)?;
    let natural_key = ctx.keys.validated_key_for(table, ctx.catalog)?;
    let mut orphaned = 0usize;

    if !ctx.is_header(table) {
        let header_keys = engine.header_keys()?;
        let before = batch.len();
        batch = referential::gate(
            batch,
            table,
            &ctx.columns.primary_key,
            &ctx.columns.discriminator,
            &header_keys,
            sink,
        )?;
        orphaned = before - batch.len();

        if batch.has_column(&ctx.columns.date_visited) {
            let keys = backfill::distinct_keys(&batch, &ctx.columns.primary_key);
            let visits = engine.date_visited(&keys, &ctx.columns.date_visited)?;
            backfill::backfill_date_visited(
                &mut batch,
                &ctx.columns.primary_key,
                &ctx.columns.date_visited,
                &visits,
            );
        }
    }

    let batch = finish(ctx, table, batch)?;
    engine.ensure_schema(table, ctx.catalog.fields(table)?, natural_key)?;
    let upsert = engine.upsert(table, &batch, natural_key, ctx.chunk_size)?;
    Ok(TableReport {
        table: table.to_string(),
        rows_read,
        duplicates,
        orphaned,
        upsert,
    })
}

/// Reads `path` and ingests it into the table named by its file stem.
pub fn ingest_file(
    ctx: &RunContext<'_>,
    engine: &IngestionEngine,
    sink: &mut dyn QuarantineSink,
    path: &Path,
    encoding: &'static Encoding,
) -> IngestResult<TableReport> {
    let table = table_name(path)?;
    // Surface configuration errors before reading the file.
    ctx.keys.validated_key_for(&table, ctx.catalog)?;
    let batch = RowBatch::read_csv(path, encoding)?;
    info!("Ingesting {} row(s) from {path:?} into '{table}'", batch.len());
    ingest_batch(ctx, engine, sink, &table, &batch)
}

/// Loads the catalog and registry named by `config` and ingests every CSV
/// file of the data directory.
pub fn run(config: &IngestConfig) -> IngestResult<RunSummary> {
    let catalog_encoding = io_utils::resolve_encoding(Some(&config.catalog_encoding))?;
    let input_encoding = io_utils::resolve_encoding(config.input_encoding.as_deref())?;
    let catalog = SchemaCatalog::load(&config.catalog, catalog_encoding)?;
    let keys = NaturalKeyRegistry::load(&config.natural_keys)?;
    let engine = IngestionEngine::new(
        Database::new(&config.database),
        config.header_table.clone(),
        config.columns.primary_key.clone(),
    );
    let mut sink = CsvQuarantine::new(&config.quarantine_dir);
    let files = input_files(&config.data_dir, &config.header_table)?;
    if files.is_empty() {
        warn!("No CSV files found in {:?}", config.data_dir);
    }
    run_files(config, &catalog, &keys, &engine, &mut sink, &files, input_encoding)
}

fn save_project_record(
    config: &IngestConfig,
    engine: &IngestionEngine,
    path: &Path,
    summary: &mut RunSummary,
) {
    let table = config.project_table.as_str();
    let saved = project::load_project_record(path).and_then(|record| {
        if record.contains_key(project::PROJECT_KEY_ENTRY) {
            engine.save_project(table, project::PROJECT_KEY_ENTRY, &record)
        } else {
            warn!("{path:?} has no '{}' entry; project record not saved", project::PROJECT_KEY_ENTRY);
            Ok(())
        }
    });
    if let Err(err) = saved {
        error!("Saving the project record to '{table}' failed ({} error): {err}", err.kind());
        summary.failures.push((table.to_string(), err));
    }
}

/// Ingests `files` in order with an already-loaded catalog and registry.
pub fn run_files(
    config: &IngestConfig,
    catalog: &SchemaCatalog,
    keys: &NaturalKeyRegistry,
    engine: &IngestionEngine,
    sink: &mut dyn QuarantineSink,
    files: &[PathBuf],
    encoding: &'static Encoding,
) -> IngestResult<RunSummary> {
    let mut summary = RunSummary::default();
    let mut first = None;
    if config.project_file.is_none()
        && let Some(path) = files.first()
    {
        match RowBatch::read_csv(path, encoding) {
            Ok(batch) => first = Some(batch),
            Err(err) => warn!("Could not scan {path:?} for a project key: {err}"),
        }
    }
    let project_key = project::resolve_project_key(
        config.project_file.as_deref(),
        first.as_ref(),
        &config.columns.project_key,
    )?;
    let ctx = RunContext {
        catalog,
        keys,
        columns: &config.columns,
        header_table: &config.header_table,
        project_key: project_key.clone(),
        chunk_size: config.chunk_size,
        load_date: Local::now().date_naive(),
    };
    summary.project_key = project_key;
    if let Some(path) = config.project_file.as_deref() {
        save_project_record(config, engine, path, &mut summary);
    }

    for (idx, path) in files.iter().enumerate() {
        let table = match table_name(path) {
            Ok(table) => table,
            Err(err) => {
                error!("Skipping {path:?}: {err}");
                summary.failures.push((path.display().to_string(), err));
                continue;
            }
        };
        let result = match first.take().filter(|_| idx == 0) {
            Some(batch) => ctx
                .keys
                .validated_key_for(&table, ctx.catalog)
                .and_then(|_| ingest_batch(&ctx, engine, sink, &table, &batch)),
            None => ingest_file(&ctx, engine, sink, path, encoding),
        };
        match result {
            Ok(report) => {
                info!(
                    "Ingested {:?} into '{table}': {} read, {} duplicate(s), {} orphan(s), {} loaded",
                    path.file_name().unwrap_or_default(),
                    report.rows_read,
                    report.duplicates,
                    report.orphaned,
                    report.upsert.rows
                );
                summary.reports.push(report);
            }
            Err(err) => {
                error!("Ingestion of '{table}' stopped ({} error): {err}", err.kind());
                summary.failures.push((table, err));
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_files_put_header_first() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["dataGap.csv", "dataHeader.csv", "dataLPI.csv", "notes.txt"] {
            fs::write(dir.path().join(name), "PrimaryKey\n").unwrap();
        }
        let files = input_files(dir.path(), "dataHeader").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["dataHeader.csv", "dataGap.csv", "dataLPI.csv"]);
    }

    #[test]
    fn table_name_uses_file_stem() {
        assert_eq!(table_name(Path::new("/data/dataGap.csv")).unwrap(), "dataGap");
    }
}
