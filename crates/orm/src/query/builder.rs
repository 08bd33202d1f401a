//! SELECT construction
//!
//! Builds `?`-parameterized SELECT statements from normalized options. The
//! adapter contributes only its pagination syntax.

use super::options::QueryOptions;
use super::Statement;
use crate::backends::Adapter;
use crate::value::Value;

/// Query builder for one SELECT statement
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    select: String,
    from: String,
    /// Values bound inside the FROM clause (eager-load join predicates)
    from_values: Vec<Value>,
    conditions: Vec<String>,
    values: Vec<Value>,
}

impl QueryBuilder {
    /// `SELECT <select> FROM <from>`; without an explicit select list, `*`,
    /// or `<from>.*` when custom joins are present
    pub fn simple(options: &QueryOptions) -> Self {
        let select = match (&options.select, &options.joins) {
            (Some(select), _) => select.clone(),
            (None, Some(_)) => format!("{}.*", options.from),
            (None, None) => "*".to_string(),
        };
        Self {
            select,
            from: options.from.clone(),
            ..Self::default()
        }
    }

    /// Head produced by the eager-load planner
    pub fn with_head(select: String, from: String, from_values: Vec<Value>) -> Self {
        Self {
            select,
            from,
            from_values,
            ..Self::default()
        }
    }

    /// AND the options' conditions into the WHERE clause
    pub fn where_options(mut self, options: &QueryOptions) -> Self {
        if let Some(conditions) = &options.conditions {
            let (sql, values) = conditions.to_sql();
            self.conditions.push(sql);
            self.values.extend(values);
        }
        self
    }

    /// `field = ?` for one id, `field IN (?, ...)` for several
    pub fn where_ids(mut self, field: &str, ids: &[Value]) -> Self {
        if let Some((sql, values)) = ids_condition(field, ids) {
            self.conditions.push(sql);
            self.values.extend(values);
        }
        self
    }

    /// Append the remaining clauses in fixed order: joins, WHERE, GROUP BY,
    /// HAVING, ORDER BY, pagination, lock
    pub fn build(self, options: &QueryOptions, adapter: &dyn Adapter) -> Statement {
        let mut sql = format!("SELECT {} FROM {}", self.select, self.from);
        if let Some(joins) = &options.joins {
            sql.push(' ');
            sql.push_str(joins);
        }
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&join_conditions(&self.conditions));
        }
        if let Some(group) = &options.group {
            sql.push_str(" GROUP BY ");
            sql.push_str(group);
        }
        if let Some(having) = &options.having {
            sql.push_str(" HAVING ");
            sql.push_str(having);
        }
        if let Some(order) = &options.order {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if options.limit.is_some() {
            adapter.add_limit_offset(&mut sql, options.limit, options.offset);
        }
        if let Some(lock) = &options.lock {
            sql.push(' ');
            sql.push_str(lock);
        }

        let mut values = self.from_values;
        values.extend(self.values);
        Statement::new(sql, values)
    }
}

/// `field = ?` / `field IN (?, ?)`; `None` for an empty id list
pub fn ids_condition(field: &str, ids: &[Value]) -> Option<(String, Vec<Value>)> {
    match ids.len() {
        0 => None,
        1 => Some((format!("{} = ?", field), ids.to_vec())),
        n => Some((
            format!("{} IN ({})", field, vec!["?"; n].join(", ")),
            ids.to_vec(),
        )),
    }
}

/// Join condition fragments with AND, parenthesizing when there are several
pub(crate) fn join_conditions(conditions: &[String]) -> String {
    if conditions.len() == 1 {
        conditions[0].clone()
    } else {
        conditions
            .iter()
            .map(|c| format!("({})", c))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqliteAdapter;
    use crate::config::DatabaseConfig;
    use crate::query::options::FindOptions;

    async fn adapter() -> SqliteAdapter {
        SqliteAdapter::connect(&DatabaseConfig::sqlite(":memory:")).await.unwrap()
    }

    #[tokio::test]
    async fn test_simple_select() {
        let adapter = adapter().await;
        let options = QueryOptions::normalize("tags", FindOptions::new());
        let statement = QueryBuilder::simple(&options).where_options(&options).build(&options, &adapter);
        assert_eq!(statement.sql, "SELECT * FROM tags");
        assert!(statement.values.is_empty());
    }

    #[tokio::test]
    async fn test_clause_order() {
        let adapter = adapter().await;
        let options = QueryOptions::normalize(
            "posts",
            FindOptions::new()
                .joins("INNER JOIN users ON users.id = posts.user_id")
                .where_sql("users.name = ?", vec!["ann"])
                .group("posts.user_id")
                .having("COUNT(*) > 1")
                .order("posts.id")
                .limit(10)
                .offset(20)
                .lock(),
        );
        let statement = QueryBuilder::simple(&options)
            .where_options(&options)
            .where_ids("posts.id", &[Value::from(1), Value::from(2)])
            .build(&options, &adapter);
        assert_eq!(
            statement.sql,
            "SELECT posts.* FROM posts INNER JOIN users ON users.id = posts.user_id \
             WHERE (users.name = ?) AND (posts.id IN (?, ?)) GROUP BY posts.user_id \
             HAVING COUNT(*) > 1 ORDER BY posts.id LIMIT 20, 10 FOR UPDATE"
        );
        assert_eq!(statement.values, vec![Value::from("ann"), Value::from(1), Value::from(2)]);
    }

    #[tokio::test]
    async fn test_head_values_come_first() {
        let adapter = adapter().await;
        let options = QueryOptions::normalize("comments", FindOptions::new().where_sql("body <> ?", vec![""]));
        let statement = QueryBuilder::with_head(
            "comments.id AS comments_id".into(),
            "comments LEFT OUTER JOIN posts ON posts.id = comments.commentable_id AND comments.commentable_type = ?".into(),
            vec![Value::from("Post")],
        )
        .where_options(&options)
        .build(&options, &adapter);
        assert_eq!(statement.values, vec![Value::from("Post"), Value::from("")]);
    }

    #[test]
    fn test_ids_condition() {
        assert!(ids_condition("id", &[]).is_none());
        assert_eq!(ids_condition("id", &[Value::from(3)]).unwrap().0, "id = ?");
        assert_eq!(
            ids_condition("tags.id", &[Value::from(3), Value::from(4), Value::from(5)]).unwrap().0,
            "tags.id IN (?, ?, ?)"
        );
    }
}
