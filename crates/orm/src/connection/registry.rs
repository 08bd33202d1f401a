//! Connection registry
//!
//! Maps a logical database name to its live [`Connection`]. Each key is
//! connected lazily, at most once, even under concurrent first use.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use super::statistics::RegistryStats;
use super::Connection;
use crate::backends;
use crate::config::{DatabaseConfigs, Environment};
use crate::error::{ModelError, ModelResult};

type Slot = Arc<OnceCell<Arc<Connection>>>;

/// Lazily-connected, environment-keyed set of connections
pub struct ConnectionRegistry {
    environment: Environment,
    configs: DatabaseConfigs,
    connections: DashMap<String, Slot>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("environment", &self.environment)
            .field("connected", &self.connected_keys())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new(environment: Environment, configs: DatabaseConfigs) -> Self {
        Self {
            environment,
            configs,
            connections: DashMap::new(),
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn configs(&self) -> &DatabaseConfigs {
        &self.configs
    }

    /// Configuration key for a logical database name
    pub fn key_for(&self, name: Option<&str>) -> String {
        self.environment.connection_key(name)
    }

    /// Connection for `name` (the environment default when `None`),
    /// connecting on first use
    pub async fn get(&self, name: Option<&str>) -> ModelResult<Arc<Connection>> {
        let key = self.key_for(name);
        let slot: Slot = self
            .connections
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let connection = slot
            .get_or_try_init(|| async {
                let config = self.configs.get(&key).ok_or_else(|| {
                    ModelError::Configuration(format!("No database configuration for '{}'", key))
                })?;
                let adapter = backends::connect(config).await?;
                tracing::info!(
                    connection = %key,
                    adapter = %adapter.kind(),
                    database = %config.database,
                    "Database connected"
                );
                Ok::<_, ModelError>(Arc::new(Connection::new(key.clone(), adapter)))
            })
            .await?;
        Ok(connection.clone())
    }

    /// Keys with an established connection
    pub fn connected_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .connections
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn live(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut connections: Vec<_> = self.live().iter().map(|c| c.stats()).collect();
        connections.sort_by(|a, b| a.key.cmp(&b.key));
        RegistryStats { connections }
    }

    /// Statements executed across all connections
    pub fn total_queries(&self) -> u64 {
        self.stats().total_queries()
    }

    /// Time spent executing statements across all connections
    pub fn total_time(&self) -> Duration {
        self.stats().total_time()
    }

    /// Close every connection and forget them
    pub async fn close_all(&self) -> ModelResult<()> {
        let live = self.live();
        self.connections.clear();
        for connection in live {
            connection.close().await?;
        }
        Ok(())
    }
}
