//! Aggregate statements: COUNT, SUM, AVG, MIN, MAX

use std::fmt;

use super::builder::join_conditions;
use super::options::QueryOptions;
use super::Statement;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calculation {
    Count,
    Sum,
    Average,
    Minimum,
    Maximum,
}

impl Calculation {
    pub fn sql_function(&self) -> &'static str {
        match self {
            Calculation::Count => "COUNT",
            Calculation::Sum => "SUM",
            Calculation::Average => "AVG",
            Calculation::Minimum => "MIN",
            Calculation::Maximum => "MAX",
        }
    }
}

impl fmt::Display for Calculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_function())
    }
}

/// Column alias for an aggregate: lowercased, `*` spelled `all`, every
/// non-word character replaced by `_` (`COUNT(*)` → `count_all`)
pub fn alias_for(parts: &[&str]) -> String {
    parts
        .join(" ")
        .to_lowercase()
        .replace('*', "all")
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Inputs of one aggregate statement
#[derive(Debug, Clone)]
pub struct CalculationQuery<'a> {
    pub operation: Calculation,
    pub column: &'a str,
    pub options: &'a QueryOptions,
    /// FROM clause body, including eager-load joins when `include` is set
    pub from: String,
    pub from_values: Vec<Value>,
    /// Engine lacks `COUNT(DISTINCT ...)`
    pub count_distinct_workaround: bool,
}

impl<'a> CalculationQuery<'a> {
    pub fn new(operation: Calculation, column: &'a str, options: &'a QueryOptions) -> Self {
        Self {
            operation,
            column,
            options,
            from: options.from.clone(),
            from_values: Vec::new(),
            count_distinct_workaround: false,
        }
    }

    pub fn aggregate_alias(&self) -> String {
        alias_for(&[self.operation.sql_function(), self.column])
    }

    pub fn group_alias(&self) -> Option<String> {
        self.options.group.as_deref().map(|g| alias_for(&[g]))
    }

    pub fn build(self) -> Statement {
        let options = self.options;
        let aggregate_alias = self.aggregate_alias();
        let group_alias = self.group_alias();
        let workaround = self.count_distinct_workaround
            && self.operation == Calculation::Count
            && options.distinct;

        let mut values = self.from_values;
        let mut where_sql = String::new();
        if let Some(conditions) = &options.conditions {
            let (sql, condition_values) = conditions.to_sql();
            where_sql = format!(" WHERE {}", join_conditions(&[sql]));
            values.extend(condition_values);
        }
        let joins = options
            .joins
            .as_deref()
            .map(|j| format!(" {}", j))
            .unwrap_or_default();

        let mut sql = if workaround {
            // SELECT COUNT(*) FROM (SELECT DISTINCT col[, group] FROM ...) alias
            let mut inner = format!("SELECT DISTINCT {}", self.column);
            if let (Some(group), Some(alias)) = (&options.group, &group_alias) {
                inner.push_str(&format!(", {} AS {}", group, alias));
            }
            inner.push_str(&format!(" FROM {}{}{}", self.from, joins, where_sql));

            let mut outer = format!("SELECT COUNT(*) AS {}", aggregate_alias);
            if let Some(alias) = &group_alias {
                outer.push_str(&format!(", {}", alias));
            }
            outer.push_str(&format!(" FROM ({}) {}", inner, aggregate_alias));
            if let Some(alias) = &group_alias {
                outer.push_str(&format!(" GROUP BY {}", alias));
            }
            outer
        } else {
            let mut sql = format!(
                "SELECT {}({}{}) AS {}",
                self.operation.sql_function(),
                if options.distinct { "DISTINCT " } else { "" },
                self.column,
                aggregate_alias
            );
            if let (Some(group), Some(alias)) = (&options.group, &group_alias) {
                sql.push_str(&format!(", {} AS {}", group, alias));
            }
            sql.push_str(&format!(" FROM {}{}{}", self.from, joins, where_sql));
            if let Some(group) = &options.group {
                sql.push_str(&format!(" GROUP BY {}", group));
            }
            sql
        };

        if let Some(having) = &options.having {
            sql.push_str(&format!(" HAVING {}", having));
        }
        if let Some(order) = &options.order {
            sql.push_str(&format!(" ORDER BY {}", order));
        }
        Statement::new(sql, values)
    }
}
