//! Savepoint stack
//!
//! `start(true)` begins (or continues) the connection transaction and
//! pushes a fresh savepoint; `rollback` undoes to the most recent
//! savepoint, or the whole transaction once the stack is empty.

use crate::connection::Connection;
use crate::error::ModelResult;

/// Ordered savepoint names owned by one unit of work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavepointStack {
    names: Vec<String>,
}

impl SavepointStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin or continue a transaction, optionally pushing a savepoint.
    /// Returns true when a new transaction was opened.
    pub async fn start(&mut self, conn: &Connection, create_savepoint: bool) -> ModelResult<bool> {
        let started = conn.begin_transaction().await?;
        if create_savepoint {
            let name = conn.next_savepoint_name();
            conn.create_savepoint(&name).await?;
            self.names.push(name);
        }
        Ok(started)
    }

    /// Roll back to the most recent savepoint, or the whole transaction
    pub async fn rollback(&mut self, conn: &Connection) -> ModelResult<()> {
        match self.names.pop() {
            Some(name) => conn.rollback_to_savepoint(&name).await,
            None => conn.rollback_transaction().await,
        }
    }

    /// Commit the connection transaction; outstanding savepoints go with it
    pub async fn commit(&mut self, conn: &Connection) -> ModelResult<()> {
        conn.commit_transaction().await?;
        self.names.clear();
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqliteAdapter;
    use crate::config::DatabaseConfig;

    async fn connection() -> Connection {
        let adapter = SqliteAdapter::connect(&DatabaseConfig::sqlite(":memory:")).await.unwrap();
        let conn = Connection::new("testing", Box::new(adapter));
        conn.query("CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)", &[])
            .await
            .unwrap();
        conn
    }

    async fn count(conn: &Connection) -> i64 {
        conn.select_value("SELECT COUNT(*) FROM tags", &[])
            .await
            .unwrap()
            .as_i64()
            .unwrap()
    }

    #[tokio::test]
    async fn test_rollback_to_savepoint_keeps_outer_work() {
        let conn = connection().await;
        let mut stack = SavepointStack::new();

        assert!(stack.start(&conn, false).await.unwrap());
        conn.query("INSERT INTO tags (name) VALUES ('outer')", &[]).await.unwrap();

        assert!(!stack.start(&conn, true).await.unwrap());
        assert_eq!(stack.depth(), 1);
        conn.query("INSERT INTO tags (name) VALUES ('inner')", &[]).await.unwrap();

        stack.rollback(&conn).await.unwrap();
        assert!(stack.is_empty());
        assert!(conn.in_transaction());

        stack.commit(&conn).await.unwrap();
        assert_eq!(count(&conn).await, 1);
    }

    #[tokio::test]
    async fn test_empty_stack_rolls_back_everything() {
        let conn = connection().await;
        let mut stack = SavepointStack::new();

        stack.start(&conn, false).await.unwrap();
        conn.query("INSERT INTO tags (name) VALUES ('gone')", &[]).await.unwrap();
        stack.rollback(&conn).await.unwrap();

        assert!(!conn.in_transaction());
        assert_eq!(count(&conn).await, 0);
    }
}
