//! SQLite pool creation.
//!
//! File databases run in WAL mode with foreign keys on. In-memory databases
//! are pinned to a single long-lived connection, since every new SQLite
//! connection to `:memory:` would see an empty database.

use crate::error::Result;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the metadata database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    Memory,
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub location: DbLocation,
    /// Maximum connections in the pool
    pub max_connections: u32,
    /// Fail instead of creating the file when it is missing
    pub must_exist: bool,
}

impl DbConfig {
    /// SQLite file configuration.
    pub fn sqlite(path: impl AsRef<Path>) -> Self {
        Self {
            location: DbLocation::File(path.as_ref().to_path_buf()),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            must_exist: false,
        }
    }

    /// In-memory SQLite configuration (for testing).
    pub fn sqlite_memory() -> Self {
        Self {
            location: DbLocation::Memory,
            max_connections: 1,
            must_exist: false,
        }
    }

    /// Set maximum connections. Ignored for in-memory databases.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn existing_only(mut self) -> Self {
        self.must_exist = true;
        self
    }

    pub fn describe(&self) -> String {
        match &self.location {
            DbLocation::File(path) => path.display().to_string(),
            DbLocation::Memory => ":memory:".to_string(),
        }
    }
}

/// Create a connection pool from configuration.
pub async fn create_pool(config: &DbConfig) -> Result<SqlitePool> {
    let pool = match &config.location {
        DbLocation::File(path) => {
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(!config.must_exist)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .foreign_keys(true)
                .busy_timeout(BUSY_TIMEOUT);

            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(options)
                .await?
        }
        DbLocation::Memory => {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        }
    };

    info!(database = %config.describe(), "Connected to metadata database");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_pool_keeps_state_across_queries() {
        let pool = create_pool(&DbConfig::sqlite_memory()).await.unwrap();
        sqlx::query("CREATE TABLE t (x INTEGER)").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO t VALUES (1)").execute(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_existing_only_refuses_missing_file() {
        let tmp = TempDir::new().unwrap();
        let config = DbConfig::sqlite(tmp.path().join("missing.db")).existing_only();
        assert!(create_pool(&config).await.is_err());
    }
}
