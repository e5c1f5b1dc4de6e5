use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Validate and upsert tall-table CSV exports", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate, coerce, and upsert every CSV file of the data directory
    Ingest(IngestArgs),
    /// Run the catalog-driven steps on one file without touching the database
    Validate(ValidateArgs),
    /// List the tables of the schema catalog, or one table's fields
    Catalog(CatalogArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Run configuration (YAML)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Directory holding the <table>.csv exports (overrides the config)
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,
    /// SQLite database file (overrides the config)
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Rows per upsert chunk (overrides the config)
    #[arg(long = "chunk-size", value_parser = clap::value_parser!(usize))]
    pub chunk_size: Option<usize>,
    /// Project metadata record carrying a project_key entry (overrides the config)
    #[arg(long = "project-file")]
    pub project_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Run configuration (YAML)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Input CSV file; its file stem names the table unless --table is given
    #[arg(short, long)]
    pub input: PathBuf,
    /// Catalog table to validate against
    #[arg(short, long)]
    pub table: Option<String>,
    /// Output CSV file (omit or use '-' for stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CatalogArgs {
    /// Run configuration (YAML)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Show the fields of a single table
    #[arg(short, long)]
    pub table: Option<String>,
}
