//! Metadata schema creation.
//!
//! All CREATE TABLE statements for Tessera's own bookkeeping live here.
//! Tables created by publishing entities are not listed: they are derived
//! from metadata at runtime.

use crate::error::Result;
use crate::MetaDb;
use tracing::info;

impl MetaDb {
    /// Ensure all metadata tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        self.create_definition_tables().await?;
        self.create_audit_tables().await?;
        self.create_provisioning_tables().await?;

        info!("Metadata schema verified");
        Ok(())
    }

    /// Entity and enum definitions.
    async fn create_definition_tables(&self) -> Result<()> {
        // Fields and interfaces are owned by their entity and stored inline.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS entity_definitions (
                id TEXT PRIMARY KEY,
                namespace TEXT NOT NULL,
                entity_name TEXT NOT NULL,
                entity_route TEXT NOT NULL,
                structure_type TEXT NOT NULL DEFAULT 'Single',
                parent_entity_id TEXT,
                display_name TEXT,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'Draft',
                source TEXT NOT NULL DEFAULT 'Custom',
                is_locked INTEGER NOT NULL DEFAULT 0,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                interfaces_json TEXT NOT NULL DEFAULT '[]',
                fields_json TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                created_by TEXT,
                updated_by TEXT,
                UNIQUE(namespace, entity_name),
                CHECK(status IN ('Draft', 'Published', 'Modified', 'Withdrawn')),
                CHECK(source IN ('System', 'Custom'))
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entity_definitions_name ON entity_definitions(entity_name COLLATE NOCASE)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entity_definitions_parent ON entity_definitions(parent_entity_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS enum_definitions (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                display_name TEXT,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                options_json TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// DDL audit log. No foreign key: audit rows outlive their entity.
    async fn create_audit_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS ddl_scripts (
                id TEXT PRIMARY KEY,
                entity_definition_id TEXT NOT NULL,
                script_type TEXT NOT NULL,
                sql_script TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'Pending',
                error_message TEXT,
                created_by TEXT,
                created_at TEXT NOT NULL,
                executed_at TEXT,
                CHECK(script_type IN ('Create', 'Alter', 'Drop', 'Rollback')),
                CHECK(status IN ('Pending', 'Success', 'Failed', 'RolledBack'))
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ddl_scripts_entity ON ddl_scripts(entity_definition_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Function-node tree and form templates.
    async fn create_provisioning_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS function_nodes (
                id TEXT PRIMARY KEY,
                parent_id TEXT REFERENCES function_nodes(id),
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                route TEXT,
                icon TEXT,
                is_menu INTEGER NOT NULL DEFAULT 1,
                sort_order INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS form_templates (
                id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                usage_type TEXT NOT NULL,
                name TEXT NOT NULL,
                layout_json TEXT NOT NULL,
                is_system_default INTEGER NOT NULL DEFAULT 0,
                created_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(entity_type, usage_type, name)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS template_bindings (
                id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                usage_type TEXT NOT NULL,
                template_id TEXT NOT NULL REFERENCES form_templates(id),
                updated_by TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE(entity_type, usage_type)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
