//! Migration runner
//!
//! Each migration runs inside its own transaction together with the
//! bookkeeping row, so a failed step leaves neither schema changes (where
//! the engine supports transactional DDL) nor a recorded version behind.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crate::backends::{ColumnType, FieldOptions, TableOptions};
use crate::connection::Connection;
use crate::error::{ModelError, ModelResult};
use crate::value::Value;

use super::Migration;

pub const MIGRATIONS_TABLE: &str = "schema_migrations";

/// Applied state of one known migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: i64,
    pub name: String,
    pub applied: bool,
}

/// Applies and reverts a set of migrations on one connection
pub struct MigrationRunner {
    connection: Arc<Connection>,
    migrations: Vec<Box<dyn Migration>>,
}

impl std::fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRunner")
            .field("connection", &self.connection.key())
            .field("migrations", &self.migrations.iter().map(|m| m.version()).collect::<Vec<_>>())
            .finish()
    }
}

impl MigrationRunner {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            migrations: Vec::new(),
        }
    }

    /// Register a migration. Versions must be unique.
    pub fn add(mut self, migration: impl Migration + 'static) -> ModelResult<Self> {
        let version = migration.version();
        if self.migrations.iter().any(|m| m.version() == version) {
            return Err(ModelError::Migration(format!(
                "Duplicate migration version {}",
                version
            )));
        }
        self.migrations.push(Box::new(migration));
        self.migrations.sort_by_key(|m| m.version());
        Ok(self)
    }

    /// Apply every pending migration in version order, returning the
    /// versions applied
    pub async fn migrate(&self) -> ModelResult<Vec<i64>> {
        let start_time = Instant::now();
        self.ensure_migrations_table().await?;
        let applied = self.applied_versions().await?;

        let mut applied_now = Vec::new();
        for migration in &self.migrations {
            if applied.contains(&migration.version()) {
                continue;
            }
            tracing::info!(
                version = migration.version(),
                name = %migration.name(),
                "Applying migration"
            );
            self.run_step(migration.as_ref(), true).await?;
            applied_now.push(migration.version());
        }

        tracing::info!(
            applied = applied_now.len(),
            skipped = applied.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Migrations complete"
        );
        Ok(applied_now)
    }

    /// Revert the `steps` most recently applied migrations, newest first,
    /// returning the versions reverted
    pub async fn rollback(&self, steps: usize) -> ModelResult<Vec<i64>> {
        self.ensure_migrations_table().await?;
        let applied = self.applied_versions().await?;

        let mut reverted = Vec::new();
        for version in applied.iter().rev().take(steps) {
            let migration = self
                .migrations
                .iter()
                .find(|m| m.version() == *version)
                .ok_or_else(|| {
                    ModelError::Migration(format!(
                        "Applied migration {} is not registered with this runner",
                        version
                    ))
                })?;
            tracing::info!(version = *version, name = %migration.name(), "Rolling back migration");
            self.run_step(migration.as_ref(), false).await?;
            reverted.push(*version);
        }
        Ok(reverted)
    }

    /// Every registered migration with whether it has been applied
    pub async fn status(&self) -> ModelResult<Vec<MigrationStatus>> {
        self.ensure_migrations_table().await?;
        let applied = self.applied_versions().await?;
        Ok(self
            .migrations
            .iter()
            .map(|m| MigrationStatus {
                version: m.version(),
                name: m.name().to_string(),
                applied: applied.contains(&m.version()),
            })
            .collect())
    }

    async fn run_step(&self, migration: &dyn Migration, up: bool) -> ModelResult<()> {
        let started = self.connection.begin_transaction().await?;
        let result = async {
            if up {
                migration.up(&self.connection).await?;
                self.connection
                    .query(
                        &format!("INSERT INTO {} (version) VALUES (?)", MIGRATIONS_TABLE),
                        &[Value::Integer(migration.version())],
                    )
                    .await?;
            } else {
                migration.down(&self.connection).await?;
                self.connection
                    .query(
                        &format!("DELETE FROM {} WHERE version = ?", MIGRATIONS_TABLE),
                        &[Value::Integer(migration.version())],
                    )
                    .await?;
            }
            Ok::<_, ModelError>(())
        }
        .await;

        match result {
            Ok(()) => {
                if started {
                    self.connection.commit_transaction().await?;
                }
                Ok(())
            }
            Err(e) => {
                if started {
                    self.connection.rollback_transaction().await?;
                }
                Err(ModelError::Migration(format!(
                    "Migration {} ({}) failed: {}",
                    migration.version(),
                    migration.name(),
                    e
                )))
            }
        }
    }

    async fn ensure_migrations_table(&self) -> ModelResult<()> {
        if self.connection.table_exists(MIGRATIONS_TABLE).await? {
            return Ok(());
        }
        self.connection
            .create_table(
                MIGRATIONS_TABLE,
                &[("version", FieldOptions::new(ColumnType::Integer))],
                TableOptions::without_primary_key(),
            )
            .await
    }

    async fn applied_versions(&self) -> ModelResult<BTreeSet<i64>> {
        let rows = self
            .connection
            .select(&format!("SELECT version FROM {}", MIGRATIONS_TABLE), &[])
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_i64))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqliteAdapter;
    use crate::config::DatabaseConfig;
    use async_trait::async_trait;

    struct CreateWidgets;

    #[async_trait]
    impl Migration for CreateWidgets {
        fn version(&self) -> i64 {
            1
        }

        fn name(&self) -> &str {
            "create_widgets"
        }

        async fn up(&self, connection: &Connection) -> ModelResult<()> {
            connection
                .create_table(
                    "widgets",
                    &[("name", FieldOptions::new(ColumnType::String))],
                    TableOptions::default(),
                )
                .await
        }

        async fn down(&self, connection: &Connection) -> ModelResult<()> {
            connection.drop_table("widgets").await
        }
    }

    struct AddOwner;

    #[async_trait]
    impl Migration for AddOwner {
        fn version(&self) -> i64 {
            2
        }

        fn name(&self) -> &str {
            "add_owner_to_widgets"
        }

        async fn up(&self, connection: &Connection) -> ModelResult<()> {
            connection
                .add_column("widgets", "owner", FieldOptions::new(ColumnType::Polymorphic).nullable())
                .await
        }

        async fn down(&self, connection: &Connection) -> ModelResult<()> {
            connection.remove_column("widgets", "owner_type").await?;
            connection.remove_column("widgets", "owner_id").await
        }
    }

    async fn connection() -> Arc<Connection> {
        let adapter = SqliteAdapter::connect(&DatabaseConfig::sqlite(":memory:")).await.unwrap();
        Arc::new(Connection::new("test", Box::new(adapter)))
    }

    #[tokio::test]
    async fn test_migrate_applies_pending_in_order() {
        let conn = connection().await;
        let runner = MigrationRunner::new(conn.clone())
            .add(AddOwner)
            .unwrap()
            .add(CreateWidgets)
            .unwrap();

        assert_eq!(runner.migrate().await.unwrap(), vec![1, 2]);
        assert!(runner.migrate().await.unwrap().is_empty());

        let columns: Vec<String> = conn
            .columns("widgets")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(columns.contains(&"owner_type".to_string()));
        assert!(columns.contains(&"owner_id".to_string()));
    }

    #[tokio::test]
    async fn test_rollback_and_status() {
        let conn = connection().await;
        let runner = MigrationRunner::new(conn.clone())
            .add(CreateWidgets)
            .unwrap()
            .add(AddOwner)
            .unwrap();
        runner.migrate().await.unwrap();

        assert_eq!(runner.rollback(1).await.unwrap(), vec![2]);
        let status = runner.status().await.unwrap();
        assert!(status[0].applied);
        assert!(!status[1].applied);

        assert_eq!(runner.rollback(5).await.unwrap(), vec![1]);
        assert!(!conn.table_exists("widgets").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_version_rejected() {
        let conn = connection().await;
        let result = MigrationRunner::new(conn).add(CreateWidgets).unwrap().add(CreateWidgets);
        assert!(matches!(result, Err(ModelError::Migration(_))));
    }
}
