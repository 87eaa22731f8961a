pub mod sample;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub use sqlite::SqliteDatabase;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("invalid table name {0:?}")]
    InvalidTableName(String),
}

/// Trait defining the interface for database operations
#[async_trait]
pub trait Database: Send + Sync + fmt::Debug {
    /// Execute a query and return the rows it produced.
    /// Headers are `(column_name, column_type)` pairs in select order.
    async fn get_results(&self, query: &str) -> Result<DatabaseResult, DbError>;

    /// Execute an sql statement and return the number of affected rows
    async fn execute(&self, query: &str) -> Result<u64, DbError>;

    /// Get the database schema information: every table with its columns, plus
    /// foreign key references keyed by the referenced `table.column`.
    async fn get_schema(&self) -> Result<Schema, DbError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseResult {
    pub headers: Vec<(String, String)>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub tables: BTreeMap<String, Vec<(String, String)>>,
    pub references: BTreeMap<String, Vec<String>>,
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (table, columns) in &self.tables {
            writeln!(f, "Table {table}:")?;
            for (name, column_type) in columns {
                writeln!(f, "- {name} ({})", column_type.to_lowercase())?;
            }
        }
        for (referenced, referencing) in &self.references {
            writeln!(f, "{referenced} is referenced by {}", referencing.join(", "))?;
        }
        Ok(())
    }
}

/// Quoted SQL identifier. Only plain `[A-Za-z_][A-Za-z0-9_]*` names are accepted.
pub(crate) fn quote_identifier(name: &str) -> Result<String, DbError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(format!("\"{name}\""))
    } else {
        Err(DbError::InvalidTableName(name.to_string()))
    }
}
