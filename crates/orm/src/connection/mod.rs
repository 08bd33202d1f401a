//! Connections
//!
//! A [`Connection`] wraps one adapter, times every statement and tracks
//! transaction state; the [`ConnectionRegistry`] creates at most one
//! connection per configuration key.

pub mod registry;
pub mod statistics;

pub use registry::ConnectionRegistry;
pub use statistics::{ConnectionStats, RegistryStats};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::backends::{
    Adapter, AdapterKind, ColumnInfo, FieldOptions, IndexInfo, IndexOptions, QueryOutcome, Row,
    TableOptions,
};
use crate::error::{ModelError, ModelResult};
use crate::query::Statement;
use crate::value::Value;
use statistics::QueryCounters;

/// Live handle to one configured database
pub struct Connection {
    key: String,
    adapter: Box<dyn Adapter>,
    counters: QueryCounters,
    in_transaction: AtomicBool,
    savepoint_seq: AtomicU64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("adapter", &self.adapter.kind())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

impl Connection {
    pub fn new(key: impl Into<String>, adapter: Box<dyn Adapter>) -> Self {
        Self {
            key: key.into(),
            adapter,
            counters: QueryCounters::new(),
            in_transaction: AtomicBool::new(false),
            savepoint_seq: AtomicU64::new(0),
        }
    }

    /// Registry key (`<environment>[_<name>]`)
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> AdapterKind {
        self.adapter.kind()
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    /// Execute a statement, recording its time in the connection counters
    pub async fn query(&self, sql: &str, values: &[Value]) -> ModelResult<QueryOutcome> {
        let started = Instant::now();
        let result = self.adapter.query(sql, values).await;
        let elapsed = started.elapsed();
        self.counters.record(elapsed, result.is_err());

        tracing::debug!(
            connection = %self.key,
            params = values.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "{}",
            sql
        );
        result
    }

    pub async fn run(&self, statement: &Statement) -> ModelResult<QueryOutcome> {
        self.query(&statement.sql, &statement.values).await
    }

    /// Execute a read statement and return its rows
    pub async fn select(&self, sql: &str, values: &[Value]) -> ModelResult<Vec<Row>> {
        Ok(self.query(sql, values).await?.into_rows())
    }

    /// First column of the first row, or NULL
    pub async fn select_value(&self, sql: &str, values: &[Value]) -> ModelResult<Value> {
        let rows = self.select(sql, values).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_pairs().next().map(|(_, v)| v))
            .unwrap_or(Value::Null))
    }

    /// Append the adapter's pagination clause to `sql`
    pub fn add_limit_offset(&self, sql: &mut String, limit: Option<u64>, offset: u64) {
        self.adapter.add_limit_offset(sql, limit, offset);
    }

    pub fn supports_savepoints(&self) -> bool {
        self.adapter.supports_savepoints()
    }

    pub fn supports_count_distinct(&self) -> bool {
        self.adapter.supports_count_distinct()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    /// Begin a transaction, or continue the open one. Returns true when a
    /// new transaction was started.
    pub async fn begin_transaction(&self) -> ModelResult<bool> {
        if self.in_transaction() {
            tracing::debug!(connection = %self.key, "Continuing open transaction");
            return Ok(false);
        }
        self.adapter.begin_transaction().await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        tracing::debug!(connection = %self.key, "Transaction started");
        Ok(true)
    }

    pub async fn commit_transaction(&self) -> ModelResult<()> {
        if !self.in_transaction() {
            return Err(ModelError::Transaction("No active transaction to commit".to_string()));
        }
        self.adapter.commit_transaction().await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        tracing::debug!(connection = %self.key, "Transaction committed");
        Ok(())
    }

    pub async fn rollback_transaction(&self) -> ModelResult<()> {
        if !self.in_transaction() {
            return Err(ModelError::Transaction("No active transaction to roll back".to_string()));
        }
        self.adapter.rollback_transaction().await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        tracing::debug!(connection = %self.key, "Transaction rolled back");
        Ok(())
    }

    /// Fresh savepoint name, unique for this connection
    pub fn next_savepoint_name(&self) -> String {
        let n = self.savepoint_seq.fetch_add(1, Ordering::SeqCst);
        format!("active_record_{}", n)
    }

    fn require_savepoints(&self) -> ModelResult<()> {
        if self.supports_savepoints() {
            Ok(())
        } else {
            Err(ModelError::unsupported(self.kind().as_str(), "savepoints"))
        }
    }

    pub async fn create_savepoint(&self, name: &str) -> ModelResult<()> {
        self.require_savepoints()?;
        self.adapter
            .create_savepoint(name)
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to create savepoint {}: {}", name, e)))?;
        tracing::debug!(connection = %self.key, savepoint = %name, "Savepoint created");
        Ok(())
    }

    pub async fn rollback_to_savepoint(&self, name: &str) -> ModelResult<()> {
        self.require_savepoints()?;
        self.adapter.rollback_to_savepoint(name).await.map_err(|e| {
            ModelError::Transaction(format!("Failed to rollback to savepoint {}: {}", name, e))
        })?;
        tracing::debug!(connection = %self.key, savepoint = %name, "Rolled back to savepoint");
        Ok(())
    }

    pub async fn release_savepoint(&self, name: &str) -> ModelResult<()> {
        self.require_savepoints()?;
        self.adapter
            .release_savepoint(name)
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to release savepoint {}: {}", name, e)))
    }

    pub async fn cache_on(&self) -> ModelResult<()> {
        self.adapter.cache_on().await
    }

    pub async fn cache_off(&self) -> ModelResult<()> {
        self.adapter.cache_off().await
    }

    pub async fn current_database(&self) -> ModelResult<Option<String>> {
        self.adapter.current_database().await
    }

    pub async fn tables(&self) -> ModelResult<Vec<String>> {
        self.adapter.tables().await
    }

    pub async fn table_exists(&self, table: &str) -> ModelResult<bool> {
        Ok(self.tables().await?.iter().any(|t| t == table))
    }

    pub async fn columns(&self, table: &str) -> ModelResult<Vec<ColumnInfo>> {
        self.adapter.columns(table).await
    }

    pub async fn indexes(&self, table: &str) -> ModelResult<Vec<IndexInfo>> {
        self.adapter.indexes(table).await
    }

    /// Create a table; `polymorphic` fields expand into `<name>_type` and
    /// `<name>_id`
    pub async fn create_table<S: AsRef<str>>(
        &self,
        name: &str,
        fields: &[(S, FieldOptions)],
        options: TableOptions,
    ) -> ModelResult<()> {
        let expanded: Vec<(String, FieldOptions)> = fields
            .iter()
            .flat_map(|(field, opts)| FieldOptions::expand(field.as_ref(), opts))
            .collect();
        self.adapter.create_table(name, &expanded, &options).await?;
        tracing::info!(connection = %self.key, table = %name, "Created table");
        Ok(())
    }

    pub async fn drop_table(&self, name: &str) -> ModelResult<()> {
        self.adapter.drop_table(name).await
    }

    pub async fn truncate_table(&self, name: &str) -> ModelResult<()> {
        self.adapter.truncate_table(name).await
    }

    pub async fn rename_table(&self, name: &str, new_name: &str) -> ModelResult<()> {
        self.adapter.rename_table(name, new_name).await
    }

    /// Add a column; a `polymorphic` column adds both physical columns
    pub async fn add_column(&self, table: &str, column: &str, options: FieldOptions) -> ModelResult<()> {
        for (name, opts) in FieldOptions::expand(column, &options) {
            self.adapter.add_column(table, &name, &opts).await?;
        }
        Ok(())
    }

    pub async fn remove_column(&self, table: &str, column: &str) -> ModelResult<()> {
        self.adapter.remove_column(table, column).await
    }

    pub async fn rename_column(&self, table: &str, column: &str, new_name: &str) -> ModelResult<()> {
        self.adapter.rename_column(table, column, new_name).await
    }

    pub async fn change_column(&self, table: &str, column: &str, options: FieldOptions) -> ModelResult<()> {
        self.adapter.change_column(table, column, &options).await
    }

    pub async fn change_column_default(&self, table: &str, column: &str, default: impl Into<Value>) -> ModelResult<()> {
        self.adapter
            .change_column_default(table, column, &default.into())
            .await
    }

    pub async fn add_index(&self, table: &str, columns: &[&str], options: IndexOptions) -> ModelResult<()> {
        self.adapter.add_index(table, columns, &options).await
    }

    pub async fn remove_index(&self, table: &str, name: &str) -> ModelResult<()> {
        self.adapter.remove_index(table, name).await
    }

    /// Render a semantic type with the adapter's native type table
    pub fn type_to_sql(&self, options: &FieldOptions) -> ModelResult<String> {
        self.adapter.native_types().type_to_sql(
            options.column_type,
            options.limit,
            options.precision,
            options.scale,
        )
    }

    pub fn stats(&self) -> ConnectionStats {
        self.counters.snapshot(&self.key, self.kind())
    }

    pub async fn close(&self) -> ModelResult<()> {
        self.adapter.close().await?;
        tracing::info!(connection = %self.key, "Connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{ColumnType, SqliteAdapter};
    use crate::config::DatabaseConfig;

    async fn memory_connection() -> Connection {
        let adapter = SqliteAdapter::connect(&DatabaseConfig::sqlite(":memory:")).await.unwrap();
        Connection::new("testing", Box::new(adapter))
    }

    #[tokio::test]
    async fn test_statements_are_counted() {
        let conn = memory_connection().await;
        conn.query("SELECT 1", &[]).await.unwrap();
        let _ = conn.query("SELECT * FROM missing", &[]).await;

        let stats = conn.stats();
        assert_eq!(stats.queries, 2);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_polymorphic_columns_expand() {
        let conn = memory_connection().await;
        conn.create_table(
            "comments",
            &[
                ("body", FieldOptions::new(ColumnType::Text)),
                ("commentable", FieldOptions::new(ColumnType::Polymorphic).nullable()),
            ],
            TableOptions::default(),
        )
        .await
        .unwrap();

        let names: Vec<String> = conn
            .columns("comments")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["id", "body", "commentable_type", "commentable_id"]);
    }

    #[tokio::test]
    async fn test_transaction_state() {
        let conn = memory_connection().await;
        assert!(conn.begin_transaction().await.unwrap());
        assert!(!conn.begin_transaction().await.unwrap());
        assert!(conn.in_transaction());
        conn.commit_transaction().await.unwrap();
        assert!(!conn.in_transaction());
        assert!(matches!(
            conn.rollback_transaction().await,
            Err(ModelError::Transaction(_))
        ));
    }

    #[tokio::test]
    async fn test_savepoint_names_are_unique() {
        let conn = memory_connection().await;
        let a = conn.next_savepoint_name();
        let b = conn.next_savepoint_name();
        assert_ne!(a, b);
        assert!(a.starts_with("active_record_"));
    }

    #[tokio::test]
    async fn test_select_value() {
        let conn = memory_connection().await;
        assert_eq!(conn.select_value("SELECT 40 + 2", &[]).await.unwrap(), Value::Integer(42));
    }
}
