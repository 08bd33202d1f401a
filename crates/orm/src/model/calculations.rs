//! Aggregates over a model's table

use crate::error::{ModelError, ModelResult};
use crate::loading;
use crate::query::{Calculation, CalculationQuery, FindOptions, QueryOptions, Statement};
use crate::value::Value;

use super::Model;

impl Model {
    /// `COUNT/SUM/AVG/MIN/MAX(column)` honouring conditions, joins,
    /// include, distinct, group and having. Grouped queries answer with
    /// the first group's value; see [`Model::calculate_grouped`].
    pub async fn calculate(&self, operation: Calculation, column: &str, options: FindOptions) -> ModelResult<Value> {
        let query = QueryOptions::normalize(self.table_name(), options);
        let (statement, aggregate_alias, _) = self.calculation_statement(operation, column, &query).await?;
        let rows = self.connection().run(&statement).await?.into_rows();
        let value = rows
            .first()
            .and_then(|row| row.get(&aggregate_alias).or_else(|| row.first()))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(self.cast_aggregate(operation, column, value))
    }

    /// (group value, aggregate) per group, in result order
    pub async fn calculate_grouped(
        &self,
        operation: Calculation,
        column: &str,
        options: FindOptions,
    ) -> ModelResult<Vec<(Value, Value)>> {
        let query = QueryOptions::normalize(self.table_name(), options);
        if query.group.is_none() {
            return Err(ModelError::Query(format!(
                "{} with grouped results needs a group option",
                operation
            )));
        }
        let (statement, aggregate_alias, group_alias) = self.calculation_statement(operation, column, &query).await?;
        let group_alias = group_alias.unwrap_or_default();
        let rows = self.connection().run(&statement).await?.into_rows();
        Ok(rows
            .into_iter()
            .map(|row| {
                let group = row.get(&group_alias).cloned().unwrap_or(Value::Null);
                let value = row.get(&aggregate_alias).cloned().unwrap_or(Value::Null);
                (group, self.cast_aggregate(operation, column, value))
            })
            .collect())
    }

    pub async fn count(&self, options: FindOptions) -> ModelResult<i64> {
        self.count_column("*", options).await
    }

    pub async fn count_column(&self, column: &str, options: FindOptions) -> ModelResult<i64> {
        Ok(self
            .calculate(Calculation::Count, column, options)
            .await?
            .as_i64()
            .unwrap_or(0))
    }

    pub async fn sum(&self, column: &str, options: FindOptions) -> ModelResult<Value> {
        self.calculate(Calculation::Sum, column, options).await
    }

    pub async fn average(&self, column: &str, options: FindOptions) -> ModelResult<Value> {
        self.calculate(Calculation::Average, column, options).await
    }

    pub async fn minimum(&self, column: &str, options: FindOptions) -> ModelResult<Value> {
        self.calculate(Calculation::Minimum, column, options).await
    }

    pub async fn maximum(&self, column: &str, options: FindOptions) -> ModelResult<Value> {
        self.calculate(Calculation::Maximum, column, options).await
    }

    async fn calculation_statement(
        &self,
        operation: Calculation,
        column: &str,
        query: &QueryOptions,
    ) -> ModelResult<(Statement, String, Option<String>)> {
        let mut calculation = CalculationQuery::new(operation, column, query);
        calculation.count_distinct_workaround = !self.connection().supports_count_distinct();
        if query.has_include() {
            let plan = loading::plan(self, &query.include).await?;
            calculation.from = plan.from;
            calculation.from_values = plan.values;
        }
        let aggregate_alias = calculation.aggregate_alias();
        let group_alias = calculation.group_alias();
        Ok((calculation.build(), aggregate_alias, group_alias))
    }

    /// Counts are integers, averages floats; sums and extremes take the
    /// column's type
    fn cast_aggregate(&self, operation: Calculation, column: &str, value: Value) -> Value {
        match operation {
            Calculation::Count => Value::Integer(value.as_i64().unwrap_or(0)),
            Calculation::Average => value.as_f64().map(Value::Float).unwrap_or(Value::Null),
            _ => {
                let bare = column.rsplit('.').next().unwrap_or(column);
                match self.meta().column(bare) {
                    Some(info) => info.cast(value),
                    None => value,
                }
            }
        }
    }
}
