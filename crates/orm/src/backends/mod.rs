//! Database adapters
//!
//! One adapter per engine (SQLite, MySQL) behind the [`Adapter`] trait. The
//! record layer only ever talks to `dyn Adapter`.

pub mod core;
pub mod mysql;
pub mod sqlite;
pub mod types;

pub use self::core::{Adapter, QueryOutcome, Row, StatementKind};
pub use mysql::MySqlAdapter;
pub use sqlite::SqliteAdapter;
pub use types::{
    ColumnInfo, ColumnType, FieldOptions, IndexInfo, IndexOptions, NativeType, NativeTypeMap,
    TableOptions,
};

use crate::config::DatabaseConfig;
use crate::error::{ModelError, ModelResult};

/// Database engine enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Sqlite,
    MySql,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Sqlite => "sqlite",
            AdapterKind::MySql => "mysql",
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AdapterKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(AdapterKind::Sqlite),
            "mysql" | "mysqli" | "mariadb" => Ok(AdapterKind::MySql),
            _ => Err(ModelError::Configuration(format!("Invalid database adapter: {}", s))),
        }
    }
}

/// Open the adapter described by a configuration entry
pub async fn connect(config: &DatabaseConfig) -> ModelResult<Box<dyn Adapter>> {
    match config.adapter.parse::<AdapterKind>()? {
        AdapterKind::Sqlite => Ok(Box::new(SqliteAdapter::connect(config).await?)),
        AdapterKind::MySql => Ok(Box::new(MySqlAdapter::connect(config).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_kind_parsing() {
        assert_eq!("SQLite".parse::<AdapterKind>().unwrap(), AdapterKind::Sqlite);
        assert_eq!("mysqli".parse::<AdapterKind>().unwrap(), AdapterKind::MySql);
        assert!("oracle".parse::<AdapterKind>().is_err());
        assert_eq!(AdapterKind::MySql.to_string(), "mysql");
    }
}
