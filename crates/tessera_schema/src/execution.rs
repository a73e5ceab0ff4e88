//! DDL execution, audit and live-schema introspection.
//!
//! Every executed script produces exactly one `ddl_scripts` row. SQL errors
//! are recorded on that row as `Failed`; only infrastructure failures
//! (connection loss, audit write failure) surface as `Err`.
//!
//! Code running inside an orchestrator transaction uses [`DdlJournal`]
//! instead of writing audit rows directly: the journal keeps the rows in
//! memory until the caller knows whether the transaction committed.

use crate::ddl::quote_ident;
use sqlx::{Row, SqliteConnection};
use tessera_db::{ddl_log, DbError, DdlScript, MetaDb, ScriptStatus, ScriptType};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Metadata store error: {0}")]
    Db(#[from] DbError),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("DDL script {0} not found")]
    ScriptNotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, ExecError>;

/// A live column as reported by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    /// Declared type, verbatim.
    pub data_type: String,
    pub max_length: Option<u32>,
    pub is_nullable: bool,
    pub default_value: Option<String>,
}

impl TableColumn {
    /// Lowercased type name without length or precision.
    pub fn base_type(&self) -> String {
        base_type(&self.data_type)
    }
}

pub(crate) fn base_type(declared: &str) -> String {
    declared
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// `VARCHAR(200)` → 200. Multi-argument types have no max length.
fn parse_max_length(declared: &str) -> Option<u32> {
    let open = declared.find('(')?;
    let close = declared[open..].find(')')? + open;
    let base = base_type(declared);
    if !matches!(base.as_str(), "varchar" | "char" | "character" | "character varying" | "nvarchar") {
        return None;
    }
    declared[open + 1..close].trim().parse().ok()
}

// ============================================================================
// Connection-level primitives
// ============================================================================

/// Run `script.sql_script` and record the outcome on the script.
///
/// SQL errors mark the script `Failed`; other errors are returned.
pub async fn run_script(conn: &mut SqliteConnection, script: &mut DdlScript) -> Result<()> {
    if script.sql_script.trim().is_empty() {
        script.mark_failed("DDL script is empty");
        return Ok(());
    }

    debug!(script_type = %script.script_type, sql = %script.sql_script, "Executing DDL");
    match sqlx::raw_sql(&script.sql_script).execute(&mut *conn).await {
        Ok(_) => {
            script.mark_success();
            Ok(())
        }
        Err(sqlx::Error::Database(e)) => {
            warn!(script_id = %script.id, error = %e, "DDL failed");
            script.mark_failed(e.message());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn table_exists(conn: &mut SqliteConnection, table: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ? COLLATE NOCASE",
    )
    .bind(table)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

/// Columns of `table` in declaration order. Empty when the table is missing.
pub async fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<TableColumn>> {
    let rows = sqlx::query(r#"SELECT name, type, "notnull", dflt_value FROM pragma_table_info(?)"#)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| {
            let data_type: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            Ok(TableColumn {
                name: row.try_get("name")?,
                max_length: parse_max_length(&data_type),
                data_type,
                is_nullable: not_null == 0,
                default_value: row.try_get("dflt_value")?,
            })
        })
        .collect()
}

pub async fn row_count(conn: &mut SqliteConnection, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *conn).await?;
    Ok(count)
}

// ============================================================================
// In-transaction journal
// ============================================================================

/// Audit rows produced inside a caller-owned transaction.
#[derive(Debug, Default)]
pub struct DdlJournal {
    scripts: Vec<DdlScript>,
}

impl DdlJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute one script on `conn` and remember its audit row.
    pub async fn execute(
        &mut self,
        conn: &mut SqliteConnection,
        entity_id: Uuid,
        script_type: ScriptType,
        sql: &str,
        actor: Option<&str>,
    ) -> Result<DdlScript> {
        let mut script = DdlScript::pending(entity_id, script_type, sql, actor);
        run_script(conn, &mut script).await?;
        self.scripts.push(script.clone());
        Ok(script)
    }

    pub fn scripts(&self) -> &[DdlScript] {
        &self.scripts
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn last_failure(&self) -> Option<&DdlScript> {
        self.scripts
            .iter()
            .rev()
            .find(|s| s.status == ScriptStatus::Failed)
    }

    /// After a rollback: applied scripts did not survive.
    pub fn mark_rolled_back(&mut self) {
        for script in &mut self.scripts {
            if script.status == ScriptStatus::Success {
                script.status = ScriptStatus::RolledBack;
            }
        }
    }

    /// Write every row on `conn`.
    pub async fn persist(&self, conn: &mut SqliteConnection) -> Result<()> {
        for script in &self.scripts {
            ddl_log::insert_script(conn, script).await?;
        }
        Ok(())
    }

    pub fn into_scripts(self) -> Vec<DdlScript> {
        self.scripts
    }
}

// ============================================================================
// Batch result
// ============================================================================

/// Outcome of [`DdlExecutor::execute_ddl_batch`].
#[derive(Debug, Clone)]
pub struct DdlBatch {
    /// One row per attempted statement, in order.
    pub scripts: Vec<DdlScript>,
    /// Index of the statement that failed, if any.
    pub failed_index: Option<usize>,
}

impl DdlBatch {
    pub fn is_success(&self) -> bool {
        self.failed_index.is_none()
    }

    pub fn failure(&self) -> Option<&DdlScript> {
        self.failed_index.and_then(|i| self.scripts.get(i))
    }
}

// ============================================================================
// Pool-level executor
// ============================================================================

/// Executes and audits DDL against the metadata database.
#[derive(Clone)]
pub struct DdlExecutor {
    db: MetaDb,
}

impl DdlExecutor {
    pub fn new(db: MetaDb) -> Self {
        Self { db }
    }

    /// Run one script in its own transaction and audit it.
    pub async fn execute_ddl(
        &self,
        entity_id: Uuid,
        script_type: ScriptType,
        sql: &str,
        actor: Option<&str>,
    ) -> Result<DdlScript> {
        let mut script = DdlScript::pending(entity_id, script_type, sql, actor);
        {
            let mut conn = self.db.pool().acquire().await?;
            ddl_log::insert_script(&mut conn, &script).await?;
        }

        let mut tx = self.db.begin().await?;
        let outcome = run_script(&mut tx, &mut script).await;
        match (&outcome, script.status) {
            (Ok(()), ScriptStatus::Success) => tx.commit().await?,
            _ => tx.rollback().await?,
        }

        if let Err(e) = outcome {
            script.mark_failed(e.to_string());
        }
        {
            let mut conn = self.db.pool().acquire().await?;
            ddl_log::update_script_outcome(&mut conn, &script).await?;
        }

        info!(
            entity_id = %entity_id,
            script_type = %script_type,
            status = %script.status,
            "DDL executed"
        );
        Ok(script)
    }

    /// Run statements in order in one transaction, stopping at the first
    /// failure. On failure the statements already applied are reverted and
    /// their rows recorded `RolledBack`.
    pub async fn execute_ddl_batch(
        &self,
        entity_id: Uuid,
        statements: &[(ScriptType, String)],
        actor: Option<&str>,
    ) -> Result<DdlBatch> {
        let mut journal = DdlJournal::new();
        let mut failed_index = None;

        let mut tx = self.db.begin().await?;
        for (index, (script_type, sql)) in statements.iter().enumerate() {
            let script = journal.execute(&mut tx, entity_id, *script_type, sql, actor).await?;
            if !script.is_success() {
                failed_index = Some(index);
                break;
            }
        }

        if failed_index.is_none() {
            journal.persist(&mut tx).await?;
            tx.commit().await?;
        } else {
            tx.rollback().await?;
            journal.mark_rolled_back();
            self.persist_journal(&journal).await?;
        }

        Ok(DdlBatch {
            scripts: journal.into_scripts(),
            failed_index,
        })
    }

    /// Persist journal rows outside any transaction (after a rollback).
    pub async fn persist_journal(&self, journal: &DdlJournal) -> Result<()> {
        let mut conn = self.db.pool().acquire().await?;
        journal.persist(&mut conn).await
    }

    /// Execute `rollback_sql` for a previously executed script. On success
    /// the original script is marked `RolledBack`.
    pub async fn rollback_ddl(&self, script_id: Uuid, rollback_sql: &str, actor: Option<&str>) -> Result<DdlScript> {
        let original = self
            .db
            .get_script(script_id)
            .await?
            .ok_or(ExecError::ScriptNotFound(script_id))?;

        let rollback = self
            .execute_ddl(original.entity_definition_id, ScriptType::Rollback, rollback_sql, actor)
            .await?;

        if rollback.is_success() {
            let mut conn = self.db.pool().acquire().await?;
            ddl_log::set_script_status(&mut conn, script_id, ScriptStatus::RolledBack).await?;
            info!(script_id = %script_id, "DDL script rolled back");
        }
        Ok(rollback)
    }

    /// Scripts for an entity, newest first.
    pub async fn history(&self, entity_id: Uuid) -> Result<Vec<DdlScript>> {
        Ok(self.db.ddl_history(entity_id).await?)
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let mut conn = self.db.pool().acquire().await?;
        table_exists(&mut conn, table).await
    }

    pub async fn table_columns(&self, table: &str) -> Result<Vec<TableColumn>> {
        let mut conn = self.db.pool().acquire().await?;
        table_columns(&mut conn, table).await
    }

    pub async fn row_count(&self, table: &str) -> Result<i64> {
        let mut conn = self.db.pool().acquire().await?;
        row_count(&mut conn, table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn executor() -> (MetaDb, DdlExecutor) {
        let db = MetaDb::open_in_memory().await.unwrap();
        (db.clone(), DdlExecutor::new(db))
    }

    #[test]
    fn test_parse_max_length() {
        assert_eq!(parse_max_length("VARCHAR(200)"), Some(200));
        assert_eq!(parse_max_length("varchar( 12 )"), Some(12));
        assert_eq!(parse_max_length("NUMERIC(18,2)"), None);
        assert_eq!(parse_max_length("TEXT"), None);
        assert_eq!(base_type("TIMESTAMP WITHOUT TIME ZONE"), "timestamp without time zone");
    }

    #[tokio::test]
    async fn test_execute_ddl_success_is_audited() {
        let (_db, exec) = executor().await;
        let entity_id = Uuid::new_v4();

        let script = exec
            .execute_ddl(entity_id, ScriptType::Create, "CREATE TABLE \"Things\" (\"Id\" UUID)", Some("ops"))
            .await
            .unwrap();

        assert_eq!(script.status, ScriptStatus::Success);
        assert!(script.executed_at.is_some());
        assert!(exec.table_exists("things").await.unwrap());

        let history = exec.history(entity_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ScriptStatus::Success);
        assert_eq!(history[0].created_by.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn test_execute_ddl_sql_error_is_recorded_not_returned() {
        let (_db, exec) = executor().await;
        let entity_id = Uuid::new_v4();

        let script = exec
            .execute_ddl(entity_id, ScriptType::Create, "CREATE TABLE (", None)
            .await
            .unwrap();

        assert_eq!(script.status, ScriptStatus::Failed);
        assert!(script.error_message.as_deref().unwrap_or_default().contains("syntax error"));

        let history = exec.history(entity_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ScriptStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_multi_statement_script_leaves_nothing_behind() {
        let (_db, exec) = executor().await;
        let sql = "CREATE TABLE \"Partial\" (\"Id\" UUID); CREATE TABLE (";
        let script = exec
            .execute_ddl(Uuid::new_v4(), ScriptType::Create, sql, None)
            .await
            .unwrap();

        assert_eq!(script.status, ScriptStatus::Failed);
        assert!(!exec.table_exists("Partial").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_failure_rolls_back_earlier_statements() {
        let (_db, exec) = executor().await;
        let entity_id = Uuid::new_v4();
        let statements = vec![
            (ScriptType::Create, "CREATE TABLE \"Widgets\" (\"Id\" UUID)".to_string()),
            (ScriptType::Alter, "ALTER TABLE \"Widgets\" ADD COLUMN \"Size\" INTEGER".to_string()),
            (ScriptType::Alter, "ALTER TABLE \"Missing\" ADD COLUMN \"X\" INTEGER".to_string()),
            (ScriptType::Alter, "ALTER TABLE \"Widgets\" ADD COLUMN \"Never\" INTEGER".to_string()),
        ];

        let batch = exec.execute_ddl_batch(entity_id, &statements, None).await.unwrap();

        assert!(!batch.is_success());
        assert_eq!(batch.failed_index, Some(2));
        assert_eq!(batch.scripts.len(), 3);
        assert_eq!(batch.scripts[0].status, ScriptStatus::RolledBack);
        assert_eq!(batch.scripts[1].status, ScriptStatus::RolledBack);
        assert_eq!(batch.failure().map(|s| s.status), Some(ScriptStatus::Failed));
        assert!(!exec.table_exists("Widgets").await.unwrap());

        let history = exec.history(entity_id).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_batch_success_commits_all() {
        let (_db, exec) = executor().await;
        let statements = vec![
            (ScriptType::Create, "CREATE TABLE \"Gadgets\" (\"Id\" UUID, \"Name\" VARCHAR(40) NOT NULL)".to_string()),
            (ScriptType::Alter, "INSERT INTO \"Gadgets\" VALUES ('a', 'one')".to_string()),
        ];
        let batch = exec.execute_ddl_batch(Uuid::new_v4(), &statements, None).await.unwrap();

        assert!(batch.is_success());
        assert!(batch.scripts.iter().all(|s| s.is_success()));
        assert_eq!(exec.row_count("Gadgets").await.unwrap(), 1);

        let columns = exec.table_columns("Gadgets").await.unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].name, "Name");
        assert_eq!(columns[1].max_length, Some(40));
        assert!(!columns[1].is_nullable);
        assert!(columns[0].is_nullable);
    }

    #[tokio::test]
    async fn test_rollback_ddl() {
        let (_db, exec) = executor().await;
        let entity_id = Uuid::new_v4();
        let create = exec
            .execute_ddl(entity_id, ScriptType::Create, "CREATE TABLE \"Temp\" (\"Id\" UUID)", None)
            .await
            .unwrap();

        let rollback = exec
            .rollback_ddl(create.id, "DROP TABLE \"Temp\"", Some("ops"))
            .await
            .unwrap();
        assert_eq!(rollback.script_type, ScriptType::Rollback);
        assert!(rollback.is_success());
        assert!(!exec.table_exists("Temp").await.unwrap());

        let history = exec.history(entity_id).await.unwrap();
        let original = history.iter().find(|s| s.id == create.id).unwrap();
        assert_eq!(original.status, ScriptStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_rollback_unknown_script_is_not_found() {
        let (_db, exec) = executor().await;
        let err = exec.rollback_ddl(Uuid::new_v4(), "SELECT 1", None).await.unwrap_err();
        assert!(matches!(err, ExecError::ScriptNotFound(_)));
    }

    #[tokio::test]
    async fn test_journal_marks_only_applied_rows() {
        let (db, _exec) = executor().await;
        let mut journal = DdlJournal::new();
        let entity_id = Uuid::new_v4();

        let mut tx = db.begin().await.unwrap();
        journal
            .execute(&mut tx, entity_id, ScriptType::Create, "CREATE TABLE \"J\" (\"Id\" UUID)", None)
            .await
            .unwrap();
        journal
            .execute(&mut tx, entity_id, ScriptType::Alter, "ALTER TABLE \"Nope\" ADD COLUMN \"X\" INTEGER", None)
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        journal.mark_rolled_back();
        let statuses: Vec<ScriptStatus> = journal.scripts().iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![ScriptStatus::RolledBack, ScriptStatus::Failed]);
        assert!(journal.last_failure().is_some());
    }
}
