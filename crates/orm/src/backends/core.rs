//! Core adapter trait
//!
//! An adapter is the SQL-dialect half of the data layer: it executes
//! `?`-parameterized statements, owns pagination syntax, transaction and
//! savepoint primitives, schema introspection, DDL, and the semantic to
//! native type table.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::types::{ColumnInfo, FieldOptions, IndexInfo, IndexOptions, NativeTypeMap, TableOptions};
use super::AdapterKind;
use crate::error::{ModelError, ModelResult};
use crate::value::Value;

/// One result row, columns kept in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.columns.push(column.into());
        self.values.push(value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Case-insensitive lookup, for engines that upper-case metadata columns
    pub fn get_ignore_case(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|i| &self.values[i])
    }

    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    pub fn into_pairs(self) -> impl Iterator<Item = (String, Value)> {
        self.columns.into_iter().zip(self.values)
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.iter()
                .map(|(c, v)| (c.to_string(), v.to_json()))
                .collect(),
        )
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.push(column, value);
        }
        row
    }
}

/// What kind of answer a statement produces, decided by its leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Insert,
    Modify,
    Other,
}

impl StatementKind {
    pub fn detect(sql: &str) -> Self {
        let keyword = sql
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        match keyword.as_str() {
            "select" | "pragma" | "show" | "describe" | "explain" | "with" | "values" => StatementKind::Read,
            "insert" | "replace" => StatementKind::Insert,
            "update" | "delete" => StatementKind::Modify,
            _ => StatementKind::Other,
        }
    }
}

/// Result of executing one statement
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<Row>),
    Affected(u64),
    Inserted { id: Option<i64>, affected: u64 },
    Done,
}

impl QueryOutcome {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            QueryOutcome::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    pub fn affected(&self) -> u64 {
        match self {
            QueryOutcome::Rows(rows) => rows.len() as u64,
            QueryOutcome::Affected(n) => *n,
            QueryOutcome::Inserted { affected, .. } => *affected,
            QueryOutcome::Done => 0,
        }
    }

    pub fn inserted_id(&self) -> Option<i64> {
        match self {
            QueryOutcome::Inserted { id, .. } => *id,
            _ => None,
        }
    }
}

/// Uniform low-level operations implemented by each database engine
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Engine this adapter talks to
    fn kind(&self) -> AdapterKind;

    /// Semantic to native type table
    fn native_types(&self) -> NativeTypeMap;

    fn supports_savepoints(&self) -> bool {
        true
    }

    /// Whether `COUNT(DISTINCT col)` is available
    fn supports_count_distinct(&self) -> bool {
        true
    }

    /// Execute a `?`-parameterized statement
    async fn query(&self, sql: &str, values: &[Value]) -> ModelResult<QueryOutcome>;

    /// Append the dialect's pagination clause
    fn add_limit_offset(&self, sql: &mut String, limit: Option<u64>, offset: u64) {
        if let Some(limit) = limit {
            if offset > 0 {
                sql.push_str(&format!(" LIMIT {}, {}", offset, limit));
            } else {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
        }
    }

    async fn begin_transaction(&self) -> ModelResult<()>;
    async fn commit_transaction(&self) -> ModelResult<()>;
    async fn rollback_transaction(&self) -> ModelResult<()>;

    async fn create_savepoint(&self, name: &str) -> ModelResult<()> {
        self.query(&format!("SAVEPOINT {}", name), &[]).await.map(|_| ())
    }

    async fn rollback_to_savepoint(&self, name: &str) -> ModelResult<()> {
        self.query(&format!("ROLLBACK TO SAVEPOINT {}", name), &[])
            .await
            .map(|_| ())
    }

    async fn release_savepoint(&self, name: &str) -> ModelResult<()> {
        self.query(&format!("RELEASE SAVEPOINT {}", name), &[])
            .await
            .map(|_| ())
    }

    /// Turn the engine's query cache on for this session
    async fn cache_on(&self) -> ModelResult<()> {
        Err(ModelError::unsupported(self.kind().as_str(), "query cache"))
    }

    async fn cache_off(&self) -> ModelResult<()> {
        Err(ModelError::unsupported(self.kind().as_str(), "query cache"))
    }

    async fn current_database(&self) -> ModelResult<Option<String>>;

    async fn tables(&self) -> ModelResult<Vec<String>>;
    async fn columns(&self, table: &str) -> ModelResult<Vec<ColumnInfo>>;
    async fn indexes(&self, table: &str) -> ModelResult<Vec<IndexInfo>>;

    /// `fields` are already expanded (no polymorphic pseudo columns)
    async fn create_table(
        &self,
        name: &str,
        fields: &[(String, FieldOptions)],
        options: &TableOptions,
    ) -> ModelResult<()>;

    async fn drop_table(&self, name: &str) -> ModelResult<()> {
        self.query(&format!("DROP TABLE IF EXISTS {}", name), &[])
            .await
            .map(|_| ())
    }

    async fn truncate_table(&self, name: &str) -> ModelResult<()>;

    async fn rename_table(&self, name: &str, new_name: &str) -> ModelResult<()>;

    async fn add_column(&self, table: &str, column: &str, options: &FieldOptions) -> ModelResult<()>;

    async fn remove_column(&self, table: &str, column: &str) -> ModelResult<()> {
        self.query(&format!("ALTER TABLE {} DROP COLUMN {}", table, column), &[])
            .await
            .map(|_| ())
    }

    async fn rename_column(&self, table: &str, column: &str, new_name: &str) -> ModelResult<()>;

    async fn change_column(&self, table: &str, column: &str, options: &FieldOptions) -> ModelResult<()> {
        let _ = (table, column, options);
        Err(ModelError::unsupported(self.kind().as_str(), "change_column"))
    }

    async fn change_column_default(&self, table: &str, column: &str, default: &Value) -> ModelResult<()> {
        let _ = (table, column, default);
        Err(ModelError::unsupported(self.kind().as_str(), "change_column_default"))
    }

    async fn add_index(&self, table: &str, columns: &[&str], options: &IndexOptions) -> ModelResult<()> {
        let sql = format!(
            "CREATE {}INDEX {} ON {} ({})",
            if options.unique { "UNIQUE " } else { "" },
            options.resolved_name(columns),
            table,
            columns.join(", ")
        );
        self.query(&sql, &[]).await.map(|_| ())
    }

    async fn remove_index(&self, table: &str, name: &str) -> ModelResult<()>;

    /// Release the underlying driver connection
    async fn close(&self) -> ModelResult<()>;
}

/// Render one column definition for CREATE/ALTER statements
pub(crate) fn column_definition(
    types: &NativeTypeMap,
    name: &str,
    options: &FieldOptions,
    quote: char,
) -> ModelResult<String> {
    let sql_type = types.type_to_sql(options.column_type, options.limit, options.precision, options.scale)?;
    let mut definition = format!("{q}{}{q} {}", name, sql_type, q = quote);
    if !options.null {
        definition.push_str(" NOT NULL");
    }
    if let Some(default) = &options.default {
        definition.push_str(" DEFAULT ");
        definition.push_str(&super::types::default_literal(default));
    }
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_kind() {
        assert_eq!(StatementKind::detect("  SELECT * FROM tags"), StatementKind::Read);
        assert_eq!(StatementKind::detect("pragma table_info(tags)"), StatementKind::Read);
        assert_eq!(StatementKind::detect("insert into tags (name) values (?)"), StatementKind::Insert);
        assert_eq!(StatementKind::detect("DELETE FROM tags"), StatementKind::Modify);
        assert_eq!(StatementKind::detect("SAVEPOINT sp_1"), StatementKind::Other);
        assert_eq!(StatementKind::detect("(select 1)"), StatementKind::Read);
    }

    #[test]
    fn test_row_access() {
        let row: Row = vec![("id", Value::from(1)), ("Name", Value::from("x"))]
            .into_iter()
            .collect();
        assert_eq!(row.get("id"), Some(&Value::Integer(1)));
        assert_eq!(row.get_ignore_case("name"), Some(&Value::from("x")));
        assert_eq!(row.first(), Some(&Value::Integer(1)));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_outcome_accessors() {
        let inserted = QueryOutcome::Inserted { id: Some(5), affected: 1 };
        assert_eq!(inserted.inserted_id(), Some(5));
        assert_eq!(QueryOutcome::Affected(3).affected(), 3);
        assert!(QueryOutcome::Done.into_rows().is_empty());
    }
}
