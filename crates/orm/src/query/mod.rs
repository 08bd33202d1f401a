//! Query construction
//!
//! Option normalization, include trees and the SQL builders. Every
//! statement is `?`-parameterized; adapters own binding and pagination.

pub mod builder;
pub mod calculation;
pub mod dml;
pub mod includes;
pub mod options;

pub use builder::QueryBuilder;
pub use calculation::{Calculation, CalculationQuery};
pub use includes::IncludeTree;
pub use options::{Conditions, FindArg, FindMode, FindOptions, QueryOptions};

use crate::value::Value;

/// SQL text plus the values bound to its placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub values: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }
}
