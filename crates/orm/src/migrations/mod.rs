//! Schema migrations
//!
//! A migration is a versioned pair of `up`/`down` steps run against a
//! [`Connection`]. The [`MigrationRunner`] records applied versions in the
//! `schema_migrations` table and applies or reverts them in version order.

pub mod runner;

pub use runner::{MigrationRunner, MigrationStatus};

use async_trait::async_trait;

use crate::connection::Connection;
use crate::error::ModelResult;

/// One reversible schema change
#[async_trait]
pub trait Migration: Send + Sync {
    /// Ordering key; applied versions are recorded by this number
    fn version(&self) -> i64;

    fn name(&self) -> &str;

    async fn up(&self, connection: &Connection) -> ModelResult<()>;

    async fn down(&self, connection: &Connection) -> ModelResult<()>;
}
