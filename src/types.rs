//! Translation from declared catalog type names to pipeline column types.
//!
//! Catalog exports name PostgreSQL-flavoured types (`integer`, `numeric`,
//! `bit`, `character varying(50)`, ...). [`ColumnType::from_declared`] folds
//! them into the handful of types the coercers and the store understand.
//! Unknown names fall back to [`ColumnType::Text`] so new catalog revisions
//! never stop a run.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Integer,
    Numeric,
    Bit,
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn from_declared(declared: &str) -> Self {
        let normalized = declared.trim().to_ascii_lowercase();
        let base = normalized
            .split_once('(')
            .map(|(head, _)| head.trim())
            .unwrap_or(normalized.as_str());
        match base {
            "integer" | "int" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "serial"
            | "bigserial" => ColumnType::Integer,
            "real" | "double precision" | "double" | "float" | "float4" | "float8" | "numeric"
            | "decimal" => ColumnType::Numeric,
            "bit" | "boolean" | "bool" => ColumnType::Bit,
            "date" => ColumnType::Date,
            "timestamp"
            | "timestamp without time zone"
            | "timestamp with time zone"
            | "timestamptz"
            | "datetime" => ColumnType::Timestamp,
            _ => ColumnType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Numeric => "numeric",
            ColumnType::Bit => "bit",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
        }
    }

    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer | ColumnType::Bit => "INTEGER",
            ColumnType::Numeric => "REAL",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
