//! Shared setup for integration tests: an in-memory sqlite database with
//! the schema each test file needs

use strata_orm::{DatabaseConfig, DatabaseConfigs, Environment, Orm};

pub async fn orm_with(schema: &[&str]) -> Orm {
    let configs = DatabaseConfigs::new().with(Environment::Testing, None, DatabaseConfig::sqlite(":memory:"));
    let orm = Orm::from_configs(Environment::Testing, configs);
    let conn = orm.connection(None).await.unwrap();
    for sql in schema {
        conn.query(sql, &[]).await.unwrap();
    }
    orm
}
