//! Migration impact evaluation.
//!
//! Compares the persisted field list of an entity with a proposed one and
//! classifies each difference by data-loss risk, using the live row count.
//! Evaluation is read-only: it renders SQL previews but never runs them.

use crate::ddl::{quote_ident, DdlSynthesizer, SqlDialect};
use crate::execution::{self, ExecError};
use serde::{Deserialize, Serialize};
use tessera_db::{entities, DbError, EntityDefinition, EntityStatus, FieldDataType, FieldMetadata, MetaDb};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ImpactError {
    #[error("Metadata store error: {0}")]
    Db(#[from] DbError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationOperationType {
    AddColumn,
    DropColumn,
    AlterColumn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOperation {
    pub operation_type: MigrationOperationType,
    pub field_name: String,
    pub old_data_type: Option<FieldDataType>,
    pub new_data_type: Option<FieldDataType>,
    pub may_lose_data: bool,
    pub requires_conversion: bool,
    pub description: String,
    pub sql_preview: String,
    pub risk: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationImpact {
    pub entity_name: String,
    pub table_name: String,
    pub affected_rows: i64,
    pub operations: Vec<MigrationOperation>,
    pub risk_level: RiskLevel,
    pub is_safe: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl MigrationImpact {
    fn empty(entity: &EntityDefinition, affected_rows: i64) -> Self {
        Self {
            entity_name: entity.entity_name.clone(),
            table_name: entity.table_name(),
            affected_rows,
            operations: Vec::new(),
            risk_level: RiskLevel::Low,
            is_safe: true,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn has_data_loss(&self) -> bool {
        self.operations.iter().any(|op| op.may_lose_data)
    }

    fn finish(mut self) -> Self {
        self.risk_level = self
            .operations
            .iter()
            .map(|op| op.risk)
            .max()
            .unwrap_or(RiskLevel::Low);
        self.is_safe = self.risk_level <= RiskLevel::Medium && self.errors.is_empty();
        self
    }
}

/// Whether converting stored values from `from` to `to` never loses data.
///
/// Directional: `Integer → Long` is safe, `Long → Integer` is not.
pub fn is_safe_conversion(from: FieldDataType, to: FieldDataType) -> bool {
    use FieldDataType::*;

    if from == to {
        return true;
    }
    match (from, to) {
        (Integer, Long) | (Integer, Decimal) | (Long, Decimal) => true,
        (Date, DateTime) => true,
        (String, Text) => true,
        (Json, _) | (Text, String) => false,
        (_, String) | (_, Text) => true,
        _ => false,
    }
}

fn describe_length(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "unbounded".to_string())
}

/// Pure impact assessment for a known row count.
pub fn assess_impact(
    entity: &EntityDefinition,
    proposed: &[FieldMetadata],
    affected_rows: i64,
    dialect: SqlDialect,
) -> MigrationImpact {
    let mut impact = MigrationImpact::empty(entity, affected_rows);

    if entity.status == EntityStatus::Draft {
        impact
            .warnings
            .push("Draft entity has no enforced schema yet; no data migration needed".to_string());
        return impact.finish();
    }

    let ddl = DdlSynthesizer::new(dialect);
    let table = entity.table_name();

    for new in proposed {
        match entity.field(&new.property_name) {
            None => {
                let op = assess_add(&ddl, &table, new, affected_rows, &mut impact);
                impact.operations.push(op);
            }
            Some(old) => {
                if let Some(op) = assess_alter(&ddl, entity, old, new, affected_rows, &mut impact) {
                    impact.operations.push(op);
                }
            }
        }
    }

    for old in &entity.fields {
        if proposed.iter().any(|f| f.name_matches(&old.property_name)) {
            continue;
        }
        let may_lose_data = affected_rows > 0;
        let risk = if may_lose_data {
            impact.errors.push(format!(
                "Dropping column '{}' will cause data loss for {} rows",
                old.property_name, affected_rows
            ));
            RiskLevel::Critical
        } else {
            RiskLevel::High
        };
        impact.operations.push(MigrationOperation {
            operation_type: MigrationOperationType::DropColumn,
            field_name: old.property_name.clone(),
            old_data_type: Some(old.data_type),
            new_data_type: None,
            may_lose_data,
            requires_conversion: false,
            description: format!("Drop column '{}'", old.property_name),
            sql_preview: ddl.drop_column_sql(entity, &old.property_name),
            risk,
        });
    }

    debug!(
        entity = %entity.entity_name,
        operations = impact.operations.len(),
        rows = affected_rows,
        "Migration impact assessed"
    );
    impact.finish()
}

fn assess_add(
    ddl: &DdlSynthesizer,
    table: &str,
    field: &FieldMetadata,
    affected_rows: i64,
    impact: &mut MigrationImpact,
) -> MigrationOperation {
    let mut risk = RiskLevel::Low;
    if field.is_required {
        if !field.has_default() && affected_rows > 0 {
            impact.errors.push(format!(
                "Adding required column '{}' without default value would fail on {} existing rows",
                field.property_name, affected_rows
            ));
            risk = RiskLevel::Critical;
        } else if field.has_default() {
            impact.warnings.push(format!(
                "Required column '{}' will be filled with its default value on existing rows",
                field.property_name
            ));
        }
    }

    MigrationOperation {
        operation_type: MigrationOperationType::AddColumn,
        field_name: field.property_name.clone(),
        old_data_type: None,
        new_data_type: Some(field.data_type),
        may_lose_data: false,
        requires_conversion: false,
        description: format!("Add column '{}' ({})", field.property_name, field.data_type),
        sql_preview: format!(
            "ALTER TABLE {} ADD COLUMN {};",
            quote_ident(table),
            ddl.column_definition(field)
        ),
        risk,
    }
}

fn assess_alter(
    ddl: &DdlSynthesizer,
    entity: &EntityDefinition,
    old: &FieldMetadata,
    new: &FieldMetadata,
    affected_rows: i64,
    impact: &mut MigrationImpact,
) -> Option<MigrationOperation> {
    let mut changes = Vec::new();
    let mut loss_candidate = false;

    let type_changed = old.data_type != new.data_type;
    if type_changed {
        changes.push(format!("type changed from {} to {}", old.data_type, new.data_type));
        if !is_safe_conversion(old.data_type, new.data_type) {
            loss_candidate = true;
        }
    }

    if old.length != new.length {
        changes.push(format!(
            "length changed from {} to {}",
            describe_length(old.length),
            describe_length(new.length)
        ));
        let narrowed = match (old.length, new.length) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(o), Some(n)) => n < o,
        };
        if narrowed && new.data_type == FieldDataType::String {
            loss_candidate = true;
        }
    }

    if old.precision != new.precision {
        changes.push(format!(
            "precision changed from {} to {}",
            describe_length(old.precision),
            describe_length(new.precision)
        ));
        if new.precision.unwrap_or(18) < old.precision.unwrap_or(18) {
            loss_candidate = true;
        }
    }

    if old.scale != new.scale {
        changes.push(format!(
            "scale changed from {} to {}",
            describe_length(old.scale),
            describe_length(new.scale)
        ));
    }

    if old.is_required != new.is_required {
        changes.push(format!(
            "required changed from {} to {}",
            old.is_required, new.is_required
        ));
        if new.is_required {
            loss_candidate = true;
        }
    }

    if changes.is_empty() {
        return None;
    }

    let may_lose_data = loss_candidate && affected_rows > 0;
    let mut risk = RiskLevel::Low;
    if type_changed || loss_candidate {
        risk = RiskLevel::Medium;
    }
    if may_lose_data {
        risk = RiskLevel::High;
        impact.warnings.push(format!(
            "Altering column '{}' may lose data in {} existing rows",
            new.property_name, affected_rows
        ));
    }

    Some(MigrationOperation {
        operation_type: MigrationOperationType::AlterColumn,
        field_name: new.property_name.clone(),
        old_data_type: Some(old.data_type),
        new_data_type: Some(new.data_type),
        may_lose_data,
        requires_conversion: type_changed,
        description: format!("Alter column '{}': {}", new.property_name, changes.join("; ")),
        sql_preview: ddl.alter_column_sql(entity, new),
        risk,
    })
}

/// Evaluates proposed field lists against persisted metadata and live data.
#[derive(Clone)]
pub struct MigrationEvaluator {
    db: MetaDb,
    dialect: SqlDialect,
}

impl MigrationEvaluator {
    pub fn new(db: MetaDb) -> Self {
        Self {
            db,
            dialect: SqlDialect::default(),
        }
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub async fn evaluate_impact(
        &self,
        entity_id: Uuid,
        proposed: &[FieldMetadata],
    ) -> Result<MigrationImpact, ImpactError> {
        let mut conn = self.db.pool().acquire().await.map_err(DbError::from)?;
        let entity = entities::require_entity(&mut conn, entity_id).await?;

        let rows = if entity.status == EntityStatus::Draft
            || !execution::table_exists(&mut conn, &entity.table_name()).await?
        {
            0
        } else {
            execution::row_count(&mut conn, &entity.table_name()).await?
        };

        Ok(assess_impact(&entity, proposed, rows, self.dialect))
    }
}
