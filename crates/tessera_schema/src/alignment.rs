//! Schema alignment: bring a live table up to its metadata.
//!
//! Alignment only ever adds. Extra live columns and type drift are logged
//! and reported as warnings; nothing is dropped, narrowed or altered.

use crate::config::WithdrawalMode;
use crate::ddl::{DdlSynthesizer, SqlDialect};
use crate::execution::{self, DdlExecutor, DdlJournal, ExecError, TableColumn};
use crate::lock::LockError;
use serde::{Deserialize, Serialize};
use tessera_db::{
    entities, DbError, DdlScript, EntityDefinition, EntitySource, EntityStatus, FieldDataType, FieldSource, MetaDb,
    ScriptType,
};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Columns managed by the platform; never reported as drift.
const SYSTEM_COLUMNS: [&str; 5] = ["id", "createdat", "updatedat", "createdby", "updatedby"];

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("Metadata store error: {0}")]
    Db(#[from] DbError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Entity definition {0} not found")]
    EntityNotFound(Uuid),

    #[error("Field '{field}' not found on entity '{entity}'")]
    FieldNotFound { entity: String, field: String },

    #[error("DDL failed for '{entity}': {message}")]
    DdlFailed { entity: String, message: String },
}

impl From<sqlx::Error> for AlignmentError {
    fn from(e: sqlx::Error) -> Self {
        Self::Db(DbError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, AlignmentError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignmentStatus {
    AlreadyAligned,
    Aligned,
}

#[derive(Debug, Clone)]
pub struct AlignmentOutcome {
    pub entity_name: String,
    pub status: AlignmentStatus,
    /// Columns added (or created with the table).
    pub added_columns: Vec<String>,
    pub warnings: Vec<String>,
    pub scripts: Vec<DdlScript>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentSummary {
    pub aligned: usize,
    pub already_aligned: usize,
    pub failed: usize,
    /// `(entity name, error)` per failure.
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct DeleteFieldOutcome {
    pub entity: EntityDefinition,
    pub dropped_column: bool,
    pub script: Option<DdlScript>,
}

/// Coarse type family, for drift warnings.
fn type_family(base: &str) -> &str {
    match base {
        "varchar" | "character varying" | "char" | "character" | "nvarchar" | "text" | "clob" => "text",
        "integer" | "int" | "int4" | "smallint" | "int2" => "integer",
        "bigint" | "int8" => "bigint",
        "numeric" | "decimal" => "numeric",
        "boolean" | "bool" => "boolean",
        "json" | "jsonb" => "json",
        "datetime" => "timestamp without time zone",
        other => other,
    }
}

/// The field type a live column's declared SQL type corresponds to.
pub(crate) fn live_data_type(declared: &str) -> Option<FieldDataType> {
    let base = execution::base_type(declared);
    let data_type = match type_family(&base) {
        "text" => FieldDataType::String,
        "integer" => FieldDataType::Integer,
        "bigint" => FieldDataType::Long,
        "numeric" => FieldDataType::Decimal,
        "boolean" => FieldDataType::Boolean,
        "json" => FieldDataType::Json,
        "timestamp without time zone" | "timestamp" => FieldDataType::DateTime,
        "date" => FieldDataType::Date,
        "uuid" => FieldDataType::Guid,
        _ => return None,
    };
    Some(data_type)
}

fn find_column<'a>(live: &'a [TableColumn], name: &str) -> Option<&'a TableColumn> {
    live.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

pub(crate) fn types_compatible(expected: &str, live: &str) -> bool {
    let expected = execution::base_type(expected);
    let live = execution::base_type(live);
    type_family(&expected) == type_family(&live)
}

/// Reconciles live tables with entity metadata.
#[derive(Clone)]
pub struct SchemaAlignment {
    db: MetaDb,
    executor: DdlExecutor,
    ddl: DdlSynthesizer,
}

impl SchemaAlignment {
    pub fn new(db: MetaDb) -> Self {
        Self {
            executor: DdlExecutor::new(db.clone()),
            db,
            ddl: DdlSynthesizer::new(SqlDialect::Sqlite),
        }
    }

    pub async fn align_entity_schema(&self, entity: &EntityDefinition, actor: Option<&str>) -> Result<AlignmentOutcome> {
        let span = info_span!("align", entity = %entity.entity_name);
        self.align_inner(entity, actor).instrument(span).await
    }

    async fn align_inner(&self, entity: &EntityDefinition, actor: Option<&str>) -> Result<AlignmentOutcome> {
        let table = entity.table_name();
        let expected = self.ddl.expected_columns(entity);

        if !self.executor.table_exists(&table).await? {
            let catalog = self.db.list_entities().await?;
            let script = self
                .executor
                .execute_ddl(entity.id, ScriptType::Create, &self.ddl.create_table_sql_in(entity, &catalog), actor)
                .await?;
            if !script.is_success() {
                return Err(ddl_failed(entity, &script));
            }
            info!(table = %table, "Missing table created");
            return Ok(AlignmentOutcome {
                entity_name: entity.entity_name.clone(),
                status: AlignmentStatus::Aligned,
                added_columns: expected.iter().map(|c| c.name().to_string()).collect(),
                warnings: Vec::new(),
                scripts: vec![script],
            });
        }

        let live = self.executor.table_columns(&table).await?;

        let mut warnings = Vec::new();
        let mut missing = Vec::new();
        for column in &expected {
            match find_column(&live, column.name()) {
                None => missing.push(column),
                Some(existing) => {
                    let expected_type = self.ddl.column_type(&column.field);
                    if !types_compatible(&expected_type, &existing.data_type) {
                        let message = format!(
                            "Column '{}' is {} in the table but {} in metadata",
                            existing.name, existing.data_type, expected_type
                        );
                        warn!(table = %table, "{}", message);
                        warnings.push(message);
                    }
                }
            }
        }

        for column in &live {
            let known = expected.iter().any(|c| c.field.name_matches(&column.name));
            if !known && !SYSTEM_COLUMNS.contains(&column.name.to_lowercase().as_str()) {
                let message = format!("Column '{}' exists in the table but not in metadata", column.name);
                warn!(table = %table, "{}", message);
                warnings.push(message);
            }
        }

        if missing.is_empty() {
            return Ok(AlignmentOutcome {
                entity_name: entity.entity_name.clone(),
                status: AlignmentStatus::AlreadyAligned,
                added_columns: Vec::new(),
                warnings,
                scripts: Vec::new(),
            });
        }

        let statements: Vec<(ScriptType, String)> = missing
            .iter()
            .flat_map(|column| self.ddl.add_column_statements(entity, &column.field))
            .map(|sql| (ScriptType::Alter, sql))
            .collect();
        let batch = self.executor.execute_ddl_batch(entity.id, &statements, actor).await?;
        if let Some(failed) = batch.failure() {
            return Err(ddl_failed(entity, failed));
        }

        let added: Vec<String> = missing.iter().map(|c| c.name().to_string()).collect();
        info!(table = %table, columns = ?added, "Missing columns added");
        Ok(AlignmentOutcome {
            entity_name: entity.entity_name.clone(),
            status: AlignmentStatus::Aligned,
            added_columns: added,
            warnings,
            scripts: batch.scripts,
        })
    }

    /// Align every Published, Custom entity. Failures are counted, not fatal.
    pub async fn align_all_published_entities(&self, actor: Option<&str>) -> Result<AlignmentSummary> {
        let published = self
            .db
            .list_entities_by_status(EntityStatus::Published, Some(EntitySource::Custom))
            .await?;

        let mut summary = AlignmentSummary::default();
        for entity in &published {
            match self.align_entity_schema(entity, actor).await {
                Ok(outcome) => match outcome.status {
                    AlignmentStatus::Aligned => summary.aligned += 1,
                    AlignmentStatus::AlreadyAligned => summary.already_aligned += 1,
                },
                Err(e) => {
                    warn!(entity = %entity.entity_name, error = %e, "Alignment failed");
                    summary.failed += 1;
                    summary.failures.push((entity.entity_name.clone(), e.to_string()));
                }
            }
        }

        info!(
            aligned = summary.aligned,
            already_aligned = summary.already_aligned,
            failed = summary.failed,
            "Alignment sweep finished"
        );
        Ok(summary)
    }

    /// Remove a custom field from metadata. In physical mode the column is
    /// dropped too, in the same transaction.
    pub async fn delete_field(
        &self,
        entity_id: Uuid,
        property_name: &str,
        mode: WithdrawalMode,
        actor: Option<&str>,
    ) -> Result<DeleteFieldOutcome> {
        let mut tx = self.db.begin().await?;
        let mut entity = entities::fetch_entity(&mut tx, entity_id)
            .await?
            .ok_or(AlignmentError::EntityNotFound(entity_id))?;

        let field = entity
            .field(property_name)
            .cloned()
            .ok_or_else(|| AlignmentError::FieldNotFound {
                entity: entity.entity_name.clone(),
                field: property_name.to_string(),
            })?;
        if field.source != FieldSource::Custom {
            return Err(LockError::FieldProtectedBySource(vec![format!(
                "Field '{}' ({}) cannot be removed",
                field.property_name, field.source
            )])
            .into());
        }

        entity.fields.retain(|f| f.id != field.id);
        entity.updated_by = actor.map(str::to_string).or(entity.updated_by.take());
        entities::update_entity(&mut tx, &entity).await?;

        let table = entity.table_name();
        let column_exists = mode == WithdrawalMode::Physical
            && execution::table_columns(&mut tx, &table)
                .await?
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&field.property_name));

        if !column_exists {
            tx.commit().await?;
            info!(entity = %entity.entity_name, field = %field.property_name, "Field removed from metadata");
            return Ok(DeleteFieldOutcome {
                entity,
                dropped_column: false,
                script: None,
            });
        }

        let mut journal = DdlJournal::new();
        let sql = self.ddl.drop_column_sql(&entity, &field.property_name);
        let script = journal
            .execute(&mut tx, entity.id, ScriptType::Alter, &sql, actor)
            .await?;

        if !script.is_success() {
            tx.rollback().await?;
            journal.mark_rolled_back();
            self.executor.persist_journal(&journal).await?;
            return Err(ddl_failed(&entity, &script));
        }

        journal.persist(&mut tx).await?;
        tx.commit().await?;
        info!(entity = %entity.entity_name, field = %field.property_name, "Field and column dropped");
        Ok(DeleteFieldOutcome {
            entity,
            dropped_column: true,
            script: Some(script),
        })
    }
}

fn ddl_failed(entity: &EntityDefinition, script: &DdlScript) -> AlignmentError {
    AlignmentError::DdlFailed {
        entity: entity.entity_name.clone(),
        message: script.error_message.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_compatibility() {
        assert!(types_compatible("VARCHAR(200)", "VARCHAR(100)"));
        assert!(types_compatible("TEXT", "varchar(20)"));
        assert!(types_compatible("NUMERIC(18,2)", "DECIMAL(10,4)"));
        assert!(types_compatible("JSON", "jsonb"));
        assert!(!types_compatible("INTEGER", "TEXT"));
        assert!(!types_compatible("UUID", "INTEGER"));

        assert_eq!(live_data_type("VARCHAR(50)"), Some(FieldDataType::String));
        assert_eq!(live_data_type("BIGINT"), Some(FieldDataType::Long));
        assert_eq!(live_data_type("TIMESTAMP WITHOUT TIME ZONE"), Some(FieldDataType::DateTime));
        assert_eq!(live_data_type("BLOB"), None);
    }
}
