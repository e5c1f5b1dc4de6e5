pub mod backfill;
pub mod batch;
pub mod catalog;
pub mod cli;
pub mod coerce;
pub mod config;
pub mod data;
pub mod dedup;
pub mod error;
pub mod io_utils;
pub mod keys;
pub mod pipeline;
pub mod project;
pub mod referential;
pub mod store;
pub mod types;
pub mod validate;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    batch::RowBatch,
    catalog::SchemaCatalog,
    cli::{Cli, Commands},
    config::{IngestConfig, RunContext},
    keys::NaturalKeyRegistry,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tall_ingester", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => handle_ingest(&args),
        Commands::Validate(args) => handle_validate(&args),
        Commands::Catalog(args) => handle_catalog(&args),
    }
}

fn load_config(path: &std::path::Path) -> Result<IngestConfig> {
    IngestConfig::load(path).with_context(|| format!("Loading configuration from {path:?}"))
}

fn load_catalog(config: &IngestConfig) -> Result<SchemaCatalog> {
    let encoding = io_utils::resolve_encoding(Some(&config.catalog_encoding))?;
    SchemaCatalog::load(&config.catalog, encoding)
        .with_context(|| format!("Loading schema catalog from {:?}", config.catalog))
}

fn handle_ingest(args: &cli::IngestArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(database) = &args.database {
        config.database = database.clone();
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(project) = &args.project_file {
        config.project_file = Some(project.clone());
    }
    config.ensure_valid()?;
    info!(
        "Ingesting {:?} into {:?} in chunks of {}",
        config.data_dir, config.database, config.chunk_size
    );

    let summary = pipeline::run(&config)
        .with_context(|| format!("Ingesting {:?}", config.data_dir))?;
    let loaded: usize = summary.reports.iter().map(|r| r.upsert.rows).sum();
    info!(
        "Loaded {loaded} row(s) across {} table(s); {} table(s) failed",
        summary.reports.len(),
        summary.failures.len()
    );
    if !summary.is_success() {
        let failed = summary
            .failures
            .iter()
            .map(|(table, err)| format!("{table} ({})", err.kind()))
            .collect::<Vec<_>>()
            .join(", ");
        bail!("{} table(s) failed to ingest: {failed}", summary.failures.len());
    }
    Ok(())
}

fn handle_validate(args: &cli::ValidateArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let catalog = load_catalog(&config)?;
    let keys = NaturalKeyRegistry::load(&config.natural_keys)
        .with_context(|| format!("Loading natural keys from {:?}", config.natural_keys))?;
    let table = match &args.table {
        Some(table) => table.clone(),
        None => pipeline::table_name(&args.input)?,
    };
    let encoding = io_utils::resolve_encoding(config.input_encoding.as_deref())?;
    let batch = RowBatch::read_csv(&args.input, encoding)
        .with_context(|| format!("Reading {:?}", args.input))?;
    let project_key = project::resolve_project_key(
        config.project_file.as_deref(),
        Some(&batch),
        &config.columns.project_key,
    )?;
    let ctx = RunContext {
        catalog: &catalog,
        keys: &keys,
        columns: &config.columns,
        header_table: &config.header_table,
        project_key,
        chunk_size: config.chunk_size,
        load_date: Local::now().date_naive(),
    };

    let (prepared, duplicates) = pipeline::prepare(&ctx, &table, &batch)
        .with_context(|| format!("Validating {:?} against '{table}'", args.input))?;
    let aligned = pipeline::finish(&ctx, &table, prepared)?;
    debug!("Aligned columns: {:?}", aligned.columns());

    let mut writer = io_utils::open_csv_writer(args.output.as_deref())?;
    aligned
        .write_csv(&mut writer)
        .with_context(|| "Writing validated rows")?;
    writer.flush().context("Flushing output")?;
    info!(
        "Validated {} row(s) for '{table}' ({duplicates} duplicate(s) removed)",
        aligned.len()
    );
    Ok(())
}

fn handle_catalog(args: &cli::CatalogArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let catalog = load_catalog(&config)?;
    match &args.table {
        Some(table) => {
            for field in catalog.fields(table)? {
                println!(
                    "{}\t{}\t{}",
                    field.name,
                    field.declared_type,
                    field.column_type.as_str()
                );
            }
        }
        None => {
            for table in catalog.tables() {
                let count = catalog.fields(table).map(|f| f.len()).unwrap_or_default();
                println!("{table}\t{count}");
            }
        }
    }
    Ok(())
}
