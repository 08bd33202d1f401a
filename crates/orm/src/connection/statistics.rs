//! Connection statistics
//!
//! Cumulative query count and time per connection, and totals across a
//! registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::backends::AdapterKind;

/// Live counters owned by a connection
#[derive(Debug)]
pub(crate) struct QueryCounters {
    queries: AtomicU64,
    errors: AtomicU64,
    nanos: AtomicU64,
    created_at: Instant,
}

impl QueryCounters {
    pub(crate) fn new() -> Self {
        Self {
            queries: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            nanos: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn record(&self, elapsed: Duration, failed: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.nanos
            .fetch_add(elapsed.as_nanos().min(u128::from(u64::MAX)) as u64, Ordering::Relaxed);
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self, key: &str, adapter: AdapterKind) -> ConnectionStats {
        ConnectionStats {
            key: key.to_string(),
            adapter,
            queries: self.queries.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_time: Duration::from_nanos(self.nanos.load(Ordering::Relaxed)),
            created_at: self.created_at,
        }
    }
}

/// Point-in-time statistics of one connection
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub key: String,
    pub adapter: AdapterKind,
    pub queries: u64,
    pub errors: u64,
    pub total_time: Duration,
    pub created_at: Instant,
}

impl ConnectionStats {
    /// Mean time per statement
    pub fn average_time(&self) -> Duration {
        if self.queries == 0 {
            Duration::ZERO
        } else {
            self.total_time / self.queries as u32
        }
    }

    /// Calculate the error rate as a percentage
    pub fn error_rate(&self) -> f64 {
        if self.queries > 0 {
            (self.errors as f64 / self.queries as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Totals over a set of connection snapshots
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub connections: Vec<ConnectionStats>,
}

impl RegistryStats {
    pub fn total_queries(&self) -> u64 {
        self.connections.iter().map(|c| c.queries).sum()
    }

    pub fn total_time(&self) -> Duration {
        self.connections.iter().map(|c| c.total_time).sum()
    }

    pub fn get(&self, key: &str) -> Option<&ConnectionStats> {
        self.connections.iter().find(|c| c.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let counters = QueryCounters::new();
        counters.record(Duration::from_millis(4), false);
        counters.record(Duration::from_millis(6), true);

        let stats = counters.snapshot("development", AdapterKind::Sqlite);
        assert_eq!(stats.queries, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.total_time, Duration::from_millis(10));
        assert_eq!(stats.average_time(), Duration::from_millis(5));
        assert_eq!(stats.error_rate(), 50.0);
    }

    #[test]
    fn test_registry_totals() {
        let a = QueryCounters::new();
        a.record(Duration::from_millis(1), false);
        let b = QueryCounters::new();
        b.record(Duration::from_millis(2), false);
        b.record(Duration::from_millis(2), false);

        let stats = RegistryStats {
            connections: vec![
                a.snapshot("development", AdapterKind::Sqlite),
                b.snapshot("development_archive", AdapterKind::MySql),
            ],
        };
        assert_eq!(stats.total_queries(), 3);
        assert_eq!(stats.total_time(), Duration::from_millis(5));
        assert!(stats.get("development_archive").is_some());
    }
}
