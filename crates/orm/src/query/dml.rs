//! INSERT, UPDATE and DELETE statements

use super::builder::join_conditions;
use super::options::Conditions;
use super::Statement;
use crate::value::Value;

/// `INSERT INTO table (a, b) VALUES (?, ?)`. With no columns the primary key
/// is inserted as NULL so the engine assigns it.
pub fn insert(table: &str, primary_key: &str, columns: &[(String, Value)]) -> Statement {
    if columns.is_empty() {
        return Statement::new(
            format!("INSERT INTO {} ({}) VALUES (NULL)", table, primary_key),
            Vec::new(),
        );
    }
    let names: Vec<&str> = columns.iter().map(|(c, _)| c.as_str()).collect();
    Statement::new(
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(", "),
            vec!["?"; columns.len()].join(", ")
        ),
        columns.iter().map(|(_, v)| v.clone()).collect(),
    )
}

/// `UPDATE table SET a = ?, b = ? [WHERE ...]`
pub fn update(table: &str, sets: &[(String, Value)], conditions: Option<&Conditions>) -> Statement {
    let assignments: Vec<String> = sets.iter().map(|(c, _)| format!("{} = ?", c)).collect();
    let mut values: Vec<Value> = sets.iter().map(|(_, v)| v.clone()).collect();
    let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
    append_where(&mut sql, &mut values, conditions);
    Statement::new(sql, values)
}

/// `UPDATE table SET <raw assignments> [WHERE ...]`, for `update_all` and
/// counter updates such as `hits = hits + 1`
pub fn update_raw(table: &str, assignments: &Conditions, conditions: Option<&Conditions>) -> Statement {
    if let Conditions::Equals(pairs) = assignments {
        return update(table, pairs, conditions);
    }
    let (set_sql, mut values) = assignments.to_sql();
    let mut sql = format!("UPDATE {} SET {}", table, set_sql);
    append_where(&mut sql, &mut values, conditions);
    Statement::new(sql, values)
}

/// `DELETE FROM table [WHERE ...]`
pub fn delete(table: &str, conditions: Option<&Conditions>) -> Statement {
    let mut values = Vec::new();
    let mut sql = format!("DELETE FROM {}", table);
    append_where(&mut sql, &mut values, conditions);
    Statement::new(sql, values)
}

fn append_where(sql: &mut String, values: &mut Vec<Value>, conditions: Option<&Conditions>) {
    if let Some(conditions) = conditions.filter(|c| !c.is_empty()) {
        let (where_sql, where_values) = conditions.to_sql();
        sql.push_str(" WHERE ");
        sql.push_str(&join_conditions(&[where_sql]));
        values.extend(where_values);
    }
}
