//! MySQL adapter
//!
//! Single-session adapter over `MySqlConnection`. Statements without
//! parameters go through the text protocol so that transaction control and
//! `SHOW` statements are never prepared.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlQueryResult, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Connection, Executor, MySql, Row as _, TypeInfo, ValueRef};
use tokio::sync::Mutex;

use super::core::{column_definition, Adapter, QueryOutcome, Row, StatementKind};
use super::types::{
    default_literal, ColumnInfo, ColumnType, FieldOptions, IndexInfo, NativeType, NativeTypeMap,
    TableOptions,
};
use super::AdapterKind;
use crate::config::DatabaseConfig;
use crate::error::{ModelError, ModelResult};
use crate::value::Value;

const MYSQL_TYPES: NativeTypeMap = NativeTypeMap(&[
    NativeType::limited(ColumnType::Binary, "blob", 16),
    NativeType::limited(ColumnType::Boolean, "tinyint", 1),
    NativeType::plain(ColumnType::Date, "date"),
    NativeType::plain(ColumnType::DateTime, "datetime"),
    NativeType::decimal("decimal", 11, 4),
    NativeType::plain(ColumnType::Float, "float"),
    NativeType::limited(ColumnType::Integer, "int", 11),
    NativeType::limited(ColumnType::String, "varchar", 255),
    NativeType::plain(ColumnType::Text, "text"),
    NativeType::plain(ColumnType::RichText, "longtext"),
    NativeType::plain(ColumnType::Time, "time"),
    NativeType::plain(ColumnType::Timestamp, "timestamp"),
]);

const DEFAULT_ENGINE: &str = "ENGINE=InnoDB";

/// MySQL / MariaDB backend
pub struct MySqlAdapter {
    conn: Mutex<Option<MySqlConnection>>,
}

impl MySqlAdapter {
    pub async fn connect(config: &DatabaseConfig) -> ModelResult<Self> {
        let mut options = MySqlConnectOptions::new()
            .host(config.host.as_deref().unwrap_or("localhost"))
            .port(config.port_or_default())
            .database(&config.database);
        if let Some(username) = &config.username {
            options = options.username(username);
        }
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        if let Some(socket) = &config.socket {
            options = options.socket(socket);
        }
        if let Some(encoding) = &config.encoding {
            options = options.charset(encoding);
        }

        let conn = options
            .disable_statement_logging()
            .connect()
            .await
            .map_err(|e| ModelError::Connection(format!("mysql '{}': {}", config.database, e)))?;

        tracing::debug!(database = %config.database, "Opened mysql connection");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    async fn execute_plain(&self, sql: &str) -> ModelResult<()> {
        self.query(sql, &[]).await.map(|_| ())
    }

    async fn column_row(&self, table: &str, column: &str) -> ModelResult<Row> {
        self.query(&format!("SHOW COLUMNS FROM `{}` LIKE ?", table), &[Value::from(column)])
            .await?
            .into_rows()
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Schema(format!("Column '{}.{}' does not exist", table, column)))
    }
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(i64::from(*b)),
        Value::Integer(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Blob(b) => query.bind(b.clone()),
        Value::Date(d) => query.bind(*d),
        Value::DateTime(dt) => query.bind(*dt),
        Value::Time(t) => query.bind(*t),
        Value::Json(j) => query.bind(j.to_string()),
    }
}

fn convert_row(row: &MySqlRow) -> Result<Row, sqlx::Error> {
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
            Some("BOOLEAN") => Value::Bool(row.try_get_unchecked::<bool, _>(index)?),
            Some(name) if name.ends_with("UNSIGNED") && name.contains("INT") => {
                Value::Integer(row.try_get_unchecked::<u64, _>(index)? as i64)
            }
            Some("TINYINT") | Some("SMALLINT") | Some("MEDIUMINT") | Some("INT") | Some("BIGINT")
            | Some("YEAR") => Value::Integer(row.try_get_unchecked::<i64, _>(index)?),
            Some("FLOAT") => Value::Float(f64::from(row.try_get_unchecked::<f32, _>(index)?)),
            Some("DOUBLE") => Value::Float(row.try_get_unchecked::<f64, _>(index)?),
            Some("DECIMAL") => {
                let text = row.try_get_unchecked::<String, _>(index)?;
                text.parse::<f64>().map(Value::Float).unwrap_or(Value::Text(text))
            }
            Some("DATE") => Value::Date(row.try_get_unchecked::<NaiveDate, _>(index)?),
            Some("DATETIME") | Some("TIMESTAMP") => {
                Value::DateTime(row.try_get_unchecked::<NaiveDateTime, _>(index)?)
            }
            Some("TIME") => match row.try_get_unchecked::<NaiveTime, _>(index) {
                Ok(time) => Value::Time(time),
                Err(_) => Value::Text(row.try_get_unchecked::<String, _>(index)?),
            },
            Some("JSON") => {
                let text = row.try_get_unchecked::<String, _>(index)?;
                serde_json::from_str(&text).map(Value::Json).unwrap_or(Value::Text(text))
            }
            Some("BLOB") | Some("TINYBLOB") | Some("MEDIUMBLOB") | Some("LONGBLOB") | Some("BINARY")
            | Some("VARBINARY") | Some("BIT") | Some("GEOMETRY") => {
                Value::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?)
            }
            Some(_) => Value::Text(row.try_get_unchecked::<String, _>(index)?),
        };
        converted.push(column.name(), value);
    }
    Ok(converted)
}

fn into_outcome(kind: StatementKind, result: MySqlQueryResult) -> QueryOutcome {
    match kind {
        StatementKind::Insert => QueryOutcome::Inserted {
            id: Some(result.last_insert_id() as i64),
            affected: result.rows_affected(),
        },
        StatementKind::Modify => QueryOutcome::Affected(result.rows_affected()),
        _ => QueryOutcome::Done,
    }
}

#[async_trait]
impl Adapter for MySqlAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::MySql
    }

    fn native_types(&self) -> NativeTypeMap {
        MYSQL_TYPES
    }

    async fn query(&self, sql: &str, values: &[Value]) -> ModelResult<QueryOutcome> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| ModelError::Connection("mysql connection is closed".to_string()))?;

        let kind = StatementKind::detect(sql);
        let started = Instant::now();

        let outcome = if values.is_empty() {
            match kind {
                StatementKind::Read => (&mut *conn)
                    .fetch_all(sql)
                    .await
                    .and_then(|rows| rows.iter().map(convert_row).collect::<Result<Vec<_>, _>>())
                    .map(QueryOutcome::Rows),
                _ => (&mut *conn)
                    .execute(sql)
                    .await
                    .map(|result| into_outcome(kind, result)),
            }
        } else {
            let mut query = sqlx::query(sql);
            for value in values {
                query = bind_value(query, value);
            }
            match kind {
                StatementKind::Read => query
                    .fetch_all(&mut *conn)
                    .await
                    .and_then(|rows| rows.iter().map(convert_row).collect::<Result<Vec<_>, _>>())
                    .map(QueryOutcome::Rows),
                _ => query
                    .execute(&mut *conn)
                    .await
                    .map(|result| into_outcome(kind, result)),
            }
        };

        match outcome {
            Ok(outcome) => {
                tracing::trace!(elapsed_us = started.elapsed().as_micros() as u64, "mysql statement finished");
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(sql = %sql, error = %e, "mysql statement failed");
                Err(ModelError::database(sql, e))
            }
        }
    }

    async fn begin_transaction(&self) -> ModelResult<()> {
        self.execute_plain("START TRANSACTION").await
    }

    async fn commit_transaction(&self) -> ModelResult<()> {
        self.execute_plain("COMMIT").await
    }

    async fn rollback_transaction(&self) -> ModelResult<()> {
        self.execute_plain("ROLLBACK").await
    }

    async fn cache_on(&self) -> ModelResult<()> {
        self.execute_plain("SET SESSION query_cache_type = ON").await
    }

    async fn cache_off(&self) -> ModelResult<()> {
        self.execute_plain("SET SESSION query_cache_type = OFF").await
    }

    async fn current_database(&self) -> ModelResult<Option<String>> {
        let rows = self.query("SELECT DATABASE()", &[]).await?.into_rows();
        Ok(rows.first().and_then(Row::first).and_then(Value::to_text))
    }

    async fn tables(&self) -> ModelResult<Vec<String>> {
        let rows = self.query("SHOW TABLES", &[]).await?.into_rows();
        Ok(rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::to_text))
            .collect())
    }

    async fn columns(&self, table: &str) -> ModelResult<Vec<ColumnInfo>> {
        let rows = self
            .query(&format!("SHOW COLUMNS FROM `{}`", table), &[])
            .await?
            .into_rows();

        Ok(rows
            .iter()
            .map(|row| {
                let text = |name: &str| row.get_ignore_case(name).and_then(Value::to_text);
                let sql_type = text("Type").unwrap_or_default();
                let (column_type, limit, precision, scale) = MYSQL_TYPES.parse_sql_type(&sql_type);
                ColumnInfo {
                    name: text("Field").unwrap_or_default(),
                    column_type,
                    sql_type,
                    limit,
                    precision,
                    scale,
                    null: text("Null").map(|n| n.eq_ignore_ascii_case("YES")).unwrap_or(true),
                    default: text("Default").map(Value::Text).unwrap_or(Value::Null),
                    primary: text("Key").as_deref() == Some("PRI"),
                }
            })
            .collect())
    }

    async fn indexes(&self, table: &str) -> ModelResult<Vec<IndexInfo>> {
        let rows = self
            .query(&format!("SHOW INDEX FROM `{}`", table), &[])
            .await?
            .into_rows();

        let mut indexes: Vec<IndexInfo> = Vec::new();
        for row in &rows {
            let name = row.get_ignore_case("Key_name").and_then(Value::to_text).unwrap_or_default();
            if name == "PRIMARY" || indexes.iter().any(|i| i.name == name) {
                continue;
            }
            indexes.push(IndexInfo {
                table: table.to_string(),
                unique: row.get_ignore_case("Non_unique").and_then(Value::as_i64) == Some(0),
                name,
            });
        }
        Ok(indexes)
    }

    async fn create_table(
        &self,
        name: &str,
        fields: &[(String, FieldOptions)],
        options: &TableOptions,
    ) -> ModelResult<()> {
        let mut definitions = Vec::with_capacity(fields.len() + 1);
        if options.primary {
            definitions.push("`id` int(11) NOT NULL AUTO_INCREMENT PRIMARY KEY".to_string());
        }
        for (column, field) in fields {
            definitions.push(column_definition(&MYSQL_TYPES, column, field, '`')?);
        }
        if definitions.is_empty() {
            return Err(ModelError::Schema(format!("Table '{}' has no columns", name)));
        }

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS `{}` ({}) {}",
            name,
            definitions.join(", "),
            options.suffix.as_deref().unwrap_or(DEFAULT_ENGINE)
        );
        self.execute_plain(&sql).await
    }

    async fn truncate_table(&self, name: &str) -> ModelResult<()> {
        self.execute_plain(&format!("TRUNCATE TABLE `{}`", name)).await
    }

    async fn rename_table(&self, name: &str, new_name: &str) -> ModelResult<()> {
        self.execute_plain(&format!("RENAME TABLE `{}` TO `{}`", name, new_name))
            .await
    }

    async fn add_column(&self, table: &str, column: &str, options: &FieldOptions) -> ModelResult<()> {
        let definition = column_definition(&MYSQL_TYPES, column, options, '`')?;
        self.execute_plain(&format!("ALTER TABLE `{}` ADD {}", table, definition))
            .await
    }

    async fn rename_column(&self, table: &str, column: &str, new_name: &str) -> ModelResult<()> {
        let current = self.column_row(table, column).await?;
        let sql_type = current
            .get_ignore_case("Type")
            .and_then(Value::to_text)
            .unwrap_or_default();
        self.execute_plain(&format!(
            "ALTER TABLE `{}` CHANGE `{}` `{}` {}",
            table, column, new_name, sql_type
        ))
        .await
    }

    async fn change_column(&self, table: &str, column: &str, options: &FieldOptions) -> ModelResult<()> {
        let definition = column_definition(&MYSQL_TYPES, column, options, '`')?;
        self.execute_plain(&format!("ALTER TABLE `{}` MODIFY {}", table, definition))
            .await
    }

    async fn change_column_default(&self, table: &str, column: &str, default: &Value) -> ModelResult<()> {
        self.execute_plain(&format!(
            "ALTER TABLE `{}` ALTER COLUMN `{}` SET DEFAULT {}",
            table,
            column,
            default_literal(default)
        ))
        .await
    }

    async fn remove_index(&self, table: &str, name: &str) -> ModelResult<()> {
        self.execute_plain(&format!("DROP INDEX `{}` ON `{}`", name, table))
            .await
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

    #[test]
    fn test_mysql_type_map() {
        assert_eq!(
            MYSQL_TYPES.type_to_sql(ColumnType::Boolean, None, None, None).unwrap(),
            "tinyint(1)"
        );
        assert_eq!(
            MYSQL_TYPES.type_to_sql(ColumnType::Decimal, None, None, None).unwrap(),
            "decimal(11, 4)"
        );
        assert_eq!(
            MYSQL_TYPES.type_to_sql(ColumnType::RichText, None, None, None).unwrap(),
            "longtext"
        );
        assert_eq!(MYSQL_TYPES.parse_sql_type("longtext").0, Some(ColumnType::RichText));
        assert_eq!(MYSQL_TYPES.parse_sql_type("int(11)").0, Some(ColumnType::Integer));
    }

    #[test]
    fn test_mysql_column_definition() {
        let definition = column_definition(
            &MYSQL_TYPES,
            "title",
            &FieldOptions::new(ColumnType::String).limit(40).default_value("untitled"),
            '`',
        )
        .unwrap();
        assert_eq!(definition, "`title` varchar(40) NOT NULL DEFAULT 'untitled'");
    }
}
