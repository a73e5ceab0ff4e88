//! Metadata store for Tessera
//!
//! Durable home of entity definitions, enum definitions, the DDL audit log
//! and provisioning records. Published entity tables live in the same
//! SQLite database, so a single transaction can cover both the metadata
//! write and the DDL that realizes it.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tessera_db::{MetaDb, EntityDefinition, FieldMetadata, FieldDataType};
//!
//! let db = MetaDb::open("~/.tessera/tessera.sqlite3").await?;
//! let order = EntityDefinition::new("Crm", "Order")
//!     .with_field(FieldMetadata::new("Name", FieldDataType::String).required());
//! db.create_entity(&order).await?;
//! ```
//!
//! Functions in [`entities`] and [`ddl_log`] take `&mut SqliteConnection`
//! so the engine can call them inside its own transactions.

mod error;
mod pool;
mod schema;
mod types;

pub mod ddl_log;
pub mod entities;

pub use error::{DbError, Result};
pub use pool::{create_pool, DbConfig, DbLocation};
pub use types::*;

use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use tracing::info;

/// Handle to the metadata database.
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all metadata tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Self::connect(DbConfig::sqlite(path)).await?;
        info!(path = %path.display(), "Metadata database opened");
        Ok(db)
    }

    /// Open an existing database (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DbError::NotFound(format!(
                "Database not found: {}",
                path.display()
            )));
        }

        Self::connect(DbConfig::sqlite(path).existing_only()).await
    }

    /// Fresh in-memory database (for testing).
    pub async fn open_in_memory() -> Result<Self> {
        Self::connect(DbConfig::sqlite_memory()).await
    }

    /// Connect with an explicit configuration and bootstrap the schema.
    pub async fn connect(config: DbConfig) -> Result<Self> {
        let pool = create_pool(&config).await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Get the underlying connection pool.
    ///
    /// Prefer using the typed methods instead.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction on a pooled connection.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("meta.db");

        let db = MetaDb::open(&db_path).await.unwrap();
        assert!(db_path.exists());

        db.close().await;
    }

    #[tokio::test]
    async fn test_open_existing_fails_if_not_exists() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nonexistent.db");

        let result = MetaDb::open_existing(&db_path).await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_schema_bootstrap_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("meta.db");

        let entity = EntityDefinition::new("Crm", "Order");
        {
            let db = MetaDb::open(&db_path).await.unwrap();
            db.create_entity(&entity).await.unwrap();
            db.close().await;
        }

        let db = MetaDb::open_existing(&db_path).await.unwrap();
        assert!(db.get_entity(entity.id).await.unwrap().is_some());
    }
}
