use crate::{DatabaseResult, DbError, Schema, quote_identifier, sample};

use super::Database;
use serde_json::{Value, json};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use std::str::FromStr;

/// An in-memory SQLite database.
///
/// The pool holds exactly one connection that never expires, since an
/// in-memory database lives and dies with its connection.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// # Errors
    ///
    /// Fails if SQLite cannot open the in-memory database.
    pub async fn in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Creates `table_name` with the sample transactions, replacing any table
    /// of the same name.
    ///
    /// # Errors
    ///
    /// Fails on an invalid table name or when the connection is read-only.
    pub async fn bootstrap_sample_table(&self, table_name: &str) -> Result<(), DbError> {
        let table = quote_identifier(table_name)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&sample::create_table_sql(&table))
            .execute(&mut *tx)
            .await?;

        let insert = sample::insert_sql(&table);
        for row in sample::TRANSACTIONS {
            sqlx::query(&insert)
                .bind(row.user_id)
                .bind(row.user_name)
                .bind(row.transaction_id)
                .bind(row.amount)
                .bind(row.status)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::debug!(
            table = table_name,
            rows = sample::TRANSACTIONS.len(),
            "seeded sample table"
        );
        Ok(())
    }

    /// Toggles SQLite's `query_only` mode, which rejects every write statement.
    ///
    /// # Errors
    ///
    /// Fails if the pragma cannot be applied.
    pub async fn set_read_only(&self, read_only: bool) -> Result<(), DbError> {
        let value = if read_only { "ON" } else { "OFF" };
        sqlx::query(&format!("PRAGMA query_only = {value}"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn decode_value(row: &SqliteRow, i: usize) -> Value {
    let type_name = match row.try_get_raw(i) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row
            .try_get_unchecked::<i64, _>(i)
            .map(|v| json!(v))
            .unwrap_or(Value::Null),

        "REAL" | "NUMERIC" => row
            .try_get_unchecked::<f64, _>(i)
            .map(|v| json!(v))
            .unwrap_or(Value::Null),

        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(i)
            .map(|bytes| json!(format!("<{} bytes>", bytes.len())))
            .unwrap_or(Value::Null),

        _ => row
            .try_get_unchecked::<String, _>(i)
            .map(|v| json!(v))
            .unwrap_or(Value::Null),
    }
}

#[async_trait::async_trait]
impl Database for SqliteDatabase {
    async fn get_results(&self, query: &str) -> Result<DatabaseResult, DbError> {
        let rows = sqlx::query(query).fetch_all(&self.pool).await?;

        let mut results = DatabaseResult::default();

        if let Some(first) = rows.first() {
            for col in first.columns() {
                results
                    .headers
                    .push((col.name().to_string(), col.type_info().name().to_string()));
            }
        } else {
            // No rows to read column names from, ask the statement instead.
            let describe = (&self.pool).describe(query).await?;
            for col in describe.columns() {
                results
                    .headers
                    .push((col.name().to_string(), col.type_info().name().to_string()));
            }
            return Ok(results);
        }

        for row in &rows {
            let row_data = (0..row.columns().len())
                .map(|i| decode_value(row, i))
                .collect();
            results.rows.push(row_data);
        }

        Ok(results)
    }

    async fn execute(&self, query: &str) -> Result<u64, DbError> {
        let result = sqlx::query(query).execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    async fn get_schema(&self) -> Result<Schema, DbError> {
        let columns = sqlx::query(
            r#"SELECT
                m.name AS table_name,
                p.name AS column_name,
                p.type AS column_type
            FROM sqlite_master m
            JOIN pragma_table_info(m.name) p
            WHERE m.type = 'table'
              AND m.name NOT LIKE 'sqlite_%'
            ORDER BY m.name, p.cid"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut schema = Schema::default();

        for row in columns {
            let table_name: String = row.try_get("table_name")?;
            let column_name: String = row.try_get("column_name")?;
            let column_type: String = row.try_get("column_type")?;

            schema
                .tables
                .entry(table_name)
                .or_default()
                .push((column_name, column_type));
        }

        let fk_rows = sqlx::query(
            r#"SELECT
                m.name AS referencing_table,
                f."from" AS referencing_column,
                f."table" AS referenced_table,
                COALESCE(f."to", '') AS referenced_column
            FROM sqlite_master m
            JOIN pragma_foreign_key_list(m.name) f
            WHERE m.type = 'table'"#,
        )
        .fetch_all(&self.pool)
        .await?;

        for row in fk_rows {
            let referencing_table: String = row.try_get("referencing_table")?;
            let referencing_column: String = row.try_get("referencing_column")?;
            let referenced_table: String = row.try_get("referenced_table")?;
            let referenced_column: String = row.try_get("referenced_column")?;

            let referenced_key = format!("{referenced_table}.{referenced_column}");
            let referencing_key = format!("{referencing_table}.{referencing_column}");

            schema
                .references
                .entry(referenced_key)
                .or_default()
                .push(referencing_key);
        }

        Ok(schema)
    }
}
