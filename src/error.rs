//! Typed failures raised by the ingestion pipeline.
//!
//! Every error carries enough context (table, operation, chunk) to be logged
//! as one line and classified through [`IngestError::kind`], which decides
//! whether the failure is a configuration problem, an I/O problem, a data
//! problem, or a database problem.

use std::{fmt, path::PathBuf};

use thiserror::Error;

pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Io,
    Data,
    Database,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Io => "io",
            ErrorKind::Data => "data",
            ErrorKind::Database => "database",
        };
        f.write_str(label)
    }
}

/// Database operations named in error context and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    CreateTable,
    CreateIndex,
    NaturalKeyConstraint,
    DescribeTable,
    Stage,
    Upsert,
    HeaderKeys,
    DateVisited,
    SaveProject,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Operation::Connect => "connect",
            Operation::CreateTable => "create table",
            Operation::CreateIndex => "create index",
            Operation::NaturalKeyConstraint => "natural key constraint",
            Operation::DescribeTable => "describe table",
            Operation::Stage => "stage chunk",
            Operation::Upsert => "upsert chunk",
            Operation::HeaderKeys => "header key lookup",
            Operation::DateVisited => "date visited lookup",
            Operation::SaveProject => "save project record",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("table '{0}' has no entries in the schema catalog")]
    UnknownTable(String),

    #[error("no natural key registered for table '{0}'")]
    MissingNaturalKey(String),

    #[error("natural key column '{column}' of table '{table}' is not declared in the catalog")]
    NaturalKeyColumn { table: String, column: String },

    #[error("table '{table}' does not declare required column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{context} {path:?}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("quarantine write for '{table}' failed: {source}")]
    Quarantine {
        table: String,
        #[source]
        source: Box<IngestError>,
    },

    #[error("{operation} on '{table}' failed: {source}")]
    Database {
        table: String,
        operation: Operation,
        #[source]
        source: rusqlite::Error,
    },

    #[error("chunk {chunk}/{chunks} of '{table}' failed during {operation}: {source}")]
    Chunk {
        table: String,
        chunk: usize,
        chunks: usize,
        operation: Operation,
        #[source]
        source: rusqlite::Error,
    },
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::UnknownTable(_)
            | IngestError::MissingNaturalKey(_)
            | IngestError::NaturalKeyColumn { .. }
            | IngestError::MissingColumn { .. }
            | IngestError::Config(_) => ErrorKind::Configuration,
            IngestError::Io { .. } | IngestError::Quarantine { .. } => ErrorKind::Io,
            IngestError::Csv { .. } => ErrorKind::Data,
            IngestError::Database { .. } | IngestError::Chunk { .. } => ErrorKind::Database,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    pub(crate) fn database(
        table: &str,
        operation: Operation,
    ) -> impl FnOnce(rusqlite::Error) -> IngestError + '_ {
        move |source| IngestError::Database {
            table: table.to_string(),
            operation,
            source,
        }
    }

    pub(crate) fn io<'a>(
        context: &'static str,
        path: &'a std::path::Path,
    ) -> impl FnOnce(std::io::Error) -> IngestError + 'a {
        move |source| IngestError::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &std::path::Path) -> impl FnOnce(csv::Error) -> IngestError + '_ {
        move |source| IngestError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}
