//! DDL audit log persistence.

use crate::entities::parse_uuid;
use crate::error::{DbError, Result};
use crate::types::*;
use crate::MetaDb;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

const SCRIPT_COLUMNS: &str = "id, entity_definition_id, script_type, sql_script, status, error_message, \
    created_by, created_at, executed_at";

pub async fn insert_script(conn: &mut SqliteConnection, script: &DdlScript) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ddl_scripts (id, entity_definition_id, script_type, sql_script, status,
            error_message, created_by, created_at, executed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(script.id.to_string())
    .bind(script.entity_definition_id.to_string())
    .bind(script.script_type.as_str())
    .bind(&script.sql_script)
    .bind(script.status.as_str())
    .bind(&script.error_message)
    .bind(&script.created_by)
    .bind(script.created_at)
    .bind(script.executed_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Record the execution outcome on an existing row.
pub async fn update_script_outcome(conn: &mut SqliteConnection, script: &DdlScript) -> Result<()> {
    let result = sqlx::query(
        "UPDATE ddl_scripts SET status = ?, error_message = ?, executed_at = ? WHERE id = ?",
    )
    .bind(script.status.as_str())
    .bind(&script.error_message)
    .bind(script.executed_at)
    .bind(script.id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(script_not_found(script.id));
    }
    Ok(())
}

pub async fn set_script_status(conn: &mut SqliteConnection, id: Uuid, status: ScriptStatus) -> Result<()> {
    let result = sqlx::query("UPDATE ddl_scripts SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(script_not_found(id));
    }
    Ok(())
}

pub async fn fetch_script(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<DdlScript>> {
    let sql = format!("SELECT {} FROM ddl_scripts WHERE id = ?", SCRIPT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_script).transpose()
}

/// Scripts for one entity, newest first.
pub async fn fetch_history(conn: &mut SqliteConnection, entity_id: Uuid) -> Result<Vec<DdlScript>> {
    let sql = format!(
        "SELECT {} FROM ddl_scripts WHERE entity_definition_id = ? ORDER BY created_at DESC, rowid DESC",
        SCRIPT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(entity_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(row_to_script).collect()
}

fn script_not_found(id: Uuid) -> DbError {
    DbError::not_found(format!("DDL script {} not found", id))
}

fn row_to_script(row: &SqliteRow) -> Result<DdlScript> {
    let script_type: String = row.try_get("script_type")?;
    let status: String = row.try_get("status")?;

    Ok(DdlScript {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        entity_definition_id: parse_uuid(&row.try_get::<String, _>("entity_definition_id")?)?,
        script_type: ScriptType::parse(&script_type)
            .ok_or_else(|| DbError::invalid_data(format!("script type '{}'", script_type)))?,
        sql_script: row.try_get("sql_script")?,
        status: ScriptStatus::parse(&status)
            .ok_or_else(|| DbError::invalid_data(format!("script status '{}'", status)))?,
        error_message: row.try_get("error_message")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        executed_at: row.try_get::<Option<DateTime<Utc>>, _>("executed_at")?,
    })
}

impl MetaDb {
    pub async fn get_script(&self, id: Uuid) -> Result<Option<DdlScript>> {
        let mut conn = self.pool.acquire().await?;
        fetch_script(&mut conn, id).await
    }

    /// DDL history for an entity, newest first.
    pub async fn ddl_history(&self, entity_id: Uuid) -> Result<Vec<DdlScript>> {
        let mut conn = self.pool.acquire().await?;
        fetch_history(&mut conn, entity_id).await
    }
}
