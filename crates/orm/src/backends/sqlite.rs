//! SQLite adapter
//!
//! Wraps a single `SqliteConnection` so that transaction and savepoint
//! statements issued by the record layer all act on one session.

use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row as _, Sqlite, TypeInfo, ValueRef};
use tokio::sync::Mutex;

use super::core::{column_definition, Adapter, QueryOutcome, Row, StatementKind};
use super::types::{
    unquote_default, ColumnInfo, ColumnType, FieldOptions, IndexInfo, NativeType, NativeTypeMap,
    TableOptions,
};
use super::AdapterKind;
use crate::config::DatabaseConfig;
use crate::error::{ModelError, ModelResult};
use crate::value::Value;

const SQLITE_TYPES: NativeTypeMap = NativeTypeMap(&[
    NativeType::plain(ColumnType::Binary, "blob"),
    NativeType::plain(ColumnType::Boolean, "boolean"),
    NativeType::plain(ColumnType::Date, "date"),
    NativeType::plain(ColumnType::DateTime, "datetime"),
    NativeType::plain(ColumnType::Float, "float"),
    NativeType::plain(ColumnType::Decimal, "float"),
    NativeType::limited(ColumnType::Integer, "integer", 11),
    NativeType::limited(ColumnType::String, "varchar", 255),
    NativeType::plain(ColumnType::Text, "text"),
    NativeType::plain(ColumnType::RichText, "richtext"),
    NativeType::plain(ColumnType::Time, "time"),
    NativeType::plain(ColumnType::Timestamp, "timestamp"),
]);

/// SQLite backend (file or in-memory)
pub struct SqliteAdapter {
    conn: Mutex<Option<SqliteConnection>>,
    database: String,
}

impl SqliteAdapter {
    /// Open the database named by `config.database`; `:memory:` (or an
    /// empty name) opens a private in-memory database
    pub async fn connect(config: &DatabaseConfig) -> ModelResult<Self> {
        let database = config.database.clone();
        let options = if database.is_empty() || database == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&database)
                .create_if_missing(true)
        };

        let conn = options
            .disable_statement_logging()
            .connect()
            .await
            .map_err(|e| ModelError::Connection(format!("sqlite '{}': {}", database, e)))?;

        tracing::debug!(database = %database, "Opened sqlite connection");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            database,
        })
    }

    async fn execute_plain(&self, sql: &str) -> ModelResult<()> {
        self.query(sql, &[]).await.map(|_| ())
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(i64::from(*b)),
        Value::Integer(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Blob(b) => query.bind(b.clone()),
        Value::Json(j) => query.bind(j.to_string()),
        other => query.bind(other.to_text()),
    }
}

fn convert_row(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    let mut converted = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let type_name = {
            let raw = row.try_get_raw(index)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_ascii_uppercase())
            }
        };

        let value = match type_name.as_deref() {
            None => Value::Null,
            Some("INTEGER") | Some("INT") | Some("BIGINT") | Some("INT8") => {
                Value::Integer(row.try_get_unchecked::<i64, _>(index)?)
            }
            Some("BOOLEAN") => Value::Bool(row.try_get_unchecked::<bool, _>(index)?),
            Some("REAL") | Some("FLOAT") | Some("DOUBLE") | Some("NUMERIC") => {
                Value::Float(row.try_get_unchecked::<f64, _>(index)?)
            }
            Some("BLOB") => Value::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
            Some(_) => Value::Text(row.try_get_unchecked::<String, _>(index)?),
        };
        converted.push(column.name(), value);
    }
    Ok(converted)
}

#[async_trait]
impl Adapter for SqliteAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Sqlite
    }

    fn native_types(&self) -> NativeTypeMap {
        SQLITE_TYPES
    }

    fn supports_count_distinct(&self) -> bool {
        false
    }

    async fn query(&self, sql: &str, values: &[Value]) -> ModelResult<QueryOutcome> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| ModelError::Connection("sqlite connection is closed".to_string()))?;

        let mut query = sqlx::query(sql);
        for value in values {
            query = bind_value(query, value);
        }

        let started = Instant::now();
        let outcome = match StatementKind::detect(sql) {
            StatementKind::Read => {
                let rows = query.fetch_all(&mut *conn).await;
                rows.and_then(|rows| rows.iter().map(convert_row).collect::<Result<Vec<_>, _>>())
                    .map(QueryOutcome::Rows)
            }
            StatementKind::Insert => query.execute(&mut *conn).await.map(|result| QueryOutcome::Inserted {
                id: Some(result.last_insert_rowid()),
                affected: result.rows_affected(),
            }),
            StatementKind::Modify => query
                .execute(&mut *conn)
                .await
                .map(|result| QueryOutcome::Affected(result.rows_affected())),
            StatementKind::Other => query.execute(&mut *conn).await.map(|_| QueryOutcome::Done),
        };

        match outcome {
            Ok(outcome) => {
                tracing::trace!(elapsed_us = started.elapsed().as_micros() as u64, "sqlite statement finished");
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(sql = %sql, error = %e, "sqlite statement failed");
                Err(ModelError::database(sql, e))
            }
        }
    }

    async fn begin_transaction(&self) -> ModelResult<()> {
        self.execute_plain("BEGIN").await
    }

    async fn commit_transaction(&self) -> ModelResult<()> {
        self.execute_plain("COMMIT").await
    }

    async fn rollback_transaction(&self) -> ModelResult<()> {
        self.execute_plain("ROLLBACK").await
    }

    async fn current_database(&self) -> ModelResult<Option<String>> {
        Ok(Some(if self.database.is_empty() {
            ":memory:".to_string()
        } else {
            self.database.clone()
        }))
    }

    async fn tables(&self) -> ModelResult<Vec<String>> {
        let rows = self
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?
            .into_rows();
        Ok(rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::to_text))
            .collect())
    }

    async fn columns(&self, table: &str) -> ModelResult<Vec<ColumnInfo>> {
        let rows = self
            .query(&format!("PRAGMA table_info(\"{}\")", table), &[])
            .await?
            .into_rows();

        if rows.is_empty() {
            return Err(ModelError::Schema(format!("Table '{}' does not exist", table)));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row.get("name").and_then(Value::to_text).unwrap_or_default();
            let sql_type = row.get("type").and_then(Value::to_text).unwrap_or_default();
            let not_null = row.get("notnull").and_then(Value::as_bool).unwrap_or(false);
            let primary = row.get("pk").and_then(Value::as_i64).unwrap_or(0) > 0;
            let (column_type, limit, precision, scale) = SQLITE_TYPES.parse_sql_type(&sql_type);
            let default = match row.get("dflt_value").and_then(Value::to_text) {
                Some(raw) if raw.eq_ignore_ascii_case("null") => Value::Null,
                Some(raw) => Value::Text(unquote_default(&raw)),
                None => Value::Null,
            };
            columns.push(ColumnInfo {
                name,
                column_type,
                sql_type,
                limit,
                precision,
                scale,
                null: !not_null,
                default,
                primary,
            });
        }
        Ok(columns)
    }

    async fn indexes(&self, table: &str) -> ModelResult<Vec<IndexInfo>> {
        let rows = self
            .query(&format!("PRAGMA index_list(\"{}\")", table), &[])
            .await?
            .into_rows();
        Ok(rows
            .iter()
            .filter(|row| row.get("origin").and_then(Value::to_text).as_deref() != Some("pk"))
            .map(|row| IndexInfo {
                table: table.to_string(),
                name: row.get("name").and_then(Value::to_text).unwrap_or_default(),
                unique: row.get("unique").and_then(Value::as_bool).unwrap_or(false),
            })
            .collect())
    }

    async fn create_table(
        &self,
        name: &str,
        fields: &[(String, FieldOptions)],
        options: &TableOptions,
    ) -> ModelResult<()> {
        let mut definitions = Vec::with_capacity(fields.len() + 1);
        if options.primary {
            definitions.push("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string());
        }
        for (column, field) in fields {
            definitions.push(column_definition(&SQLITE_TYPES, column, field, '"')?);
        }
        if definitions.is_empty() {
            return Err(ModelError::Schema(format!("Table '{}' has no columns", name)));
        }

        let mut sql = format!("CREATE TABLE IF NOT EXISTS \"{}\" ({})", name, definitions.join(", "));
        if let Some(suffix) = &options.suffix {
            sql.push(' ');
            sql.push_str(suffix);
        }
        self.execute_plain(&sql).await
    }

    async fn truncate_table(&self, name: &str) -> ModelResult<()> {
        self.execute_plain(&format!("DELETE FROM \"{}\"", name)).await
    }

    async fn rename_table(&self, name: &str, new_name: &str) -> ModelResult<()> {
        self.execute_plain(&format!("ALTER TABLE \"{}\" RENAME TO \"{}\"", name, new_name))
            .await
    }

    async fn add_column(&self, table: &str, column: &str, options: &FieldOptions) -> ModelResult<()> {
        // SQLite rejects NOT NULL columns without a default on ALTER TABLE
        let mut options = options.clone();
        if !options.null && options.default.is_none() {
            options.null = true;
        }
        let definition = column_definition(&SQLITE_TYPES, column, &options, '"')?;
        self.execute_plain(&format!("ALTER TABLE \"{}\" ADD COLUMN {}", table, definition))
            .await
    }

    async fn rename_column(&self, table: &str, column: &str, new_name: &str) -> ModelResult<()> {
        self.execute_plain(&format!(
            "ALTER TABLE \"{}\" RENAME COLUMN \"{}\" TO \"{}\"",
            table, column, new_name
        ))
        .await
    }

    async fn remove_index(&self, _table: &str, name: &str) -> ModelResult<()> {
        self.execute_plain(&format!("DROP INDEX IF EXISTS \"{}\"", name)).await
    }

    async fn close(&self) -> ModelResult<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::types::IndexOptions;

    async fn memory() -> SqliteAdapter {
        SqliteAdapter::connect(&DatabaseConfig::sqlite(":memory:")).await.unwrap()
    }

    #[tokio::test]
    async fn test_query_outcomes() {
        let adapter = memory().await;
        adapter
            .create_table(
                "tags",
                &[("name".to_string(), FieldOptions::new(ColumnType::String))],
                &TableOptions::default(),
            )
            .await
            .unwrap();

        let inserted = adapter
            .query("INSERT INTO tags (name) VALUES (?)", &[Value::from("Summer")])
            .await
            .unwrap();
        assert_eq!(inserted.inserted_id(), Some(1));

        let rows = adapter
            .query("SELECT * FROM tags WHERE name = ?", &[Value::from("Summer")])
            .await
            .unwrap()
            .into_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&Value::Integer(1)));
        assert_eq!(rows[0].get("name"), Some(&Value::from("Summer")));

        let updated = adapter
            .query("UPDATE tags SET name = ? WHERE id = ?", &[Value::from("Winter"), Value::from(1)])
            .await
            .unwrap();
        assert_eq!(updated.affected(), 1);
    }

    #[tokio::test]
    async fn test_malformed_query_is_an_error() {
        let adapter = memory().await;
        let err = adapter.query("SELEC nonsense", &[]).await.unwrap_err();
        assert!(matches!(err, ModelError::Database { .. }));
    }

    #[tokio::test]
    async fn test_introspection() {
        let adapter = memory().await;
        adapter
            .create_table(
                "posts",
                &[
                    ("title".to_string(), FieldOptions::new(ColumnType::String).limit(40)),
                    ("published".to_string(), FieldOptions::new(ColumnType::Boolean).default_value(false)),
                    ("rating".to_string(), FieldOptions::new(ColumnType::Float).nullable()),
                ],
                &TableOptions::default(),
            )
            .await
            .unwrap();
        adapter
            .add_index("posts", &["title"], &IndexOptions { name: None, unique: true })
            .await
            .unwrap();

        assert_eq!(adapter.tables().await.unwrap(), vec!["posts".to_string()]);

        let columns = adapter.columns("posts").await.unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "published", "rating"]);
        assert!(columns[0].primary);
        assert_eq!(columns[1].column_type, Some(ColumnType::String));
        assert_eq!(columns[1].limit, Some(40));
        assert_eq!(columns[2].column_type, Some(ColumnType::Boolean));
        assert_eq!(columns[2].default, Value::from("0"));
        assert!(columns[3].null);

        let indexes = adapter.indexes("posts").await.unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "title");
        assert!(indexes[0].unique);
    }

    #[tokio::test]
    async fn test_query_cache_is_unsupported() {
        let adapter = memory().await;
        assert!(matches!(adapter.cache_on().await, Err(ModelError::Unsupported { .. })));
    }

    #[test]
    fn test_limit_offset_syntax() {
        let adapter = SqliteAdapter {
            conn: Mutex::new(None),
            database: String::new(),
        };
        let mut sql = "SELECT * FROM tags".to_string();
        adapter.add_limit_offset(&mut sql, Some(10), 20);
        assert_eq!(sql, "SELECT * FROM tags LIMIT 20, 10");

        let mut sql = "SELECT * FROM tags".to_string();
        adapter.add_limit_offset(&mut sql, None, 20);
        assert_eq!(sql, "SELECT * FROM tags");
    }
}
