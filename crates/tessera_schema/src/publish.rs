//! Publishing orchestrator.
//!
//! Drives the entity lifecycle:
//!
//! ```text
//! Draft ──publish_new──▶ Published ──edit──▶ Modified
//!                          ▲   │                │
//!                          │   └──withdraw──▶ Withdrawn
//!                          └──publish_changes───┘
//! ```
//!
//! Every entry point runs in a single transaction. DDL executes inside it,
//! so a failure anywhere (validation, DDL, locking, provisioning) leaves
//! metadata and tables exactly as they were. Audit rows for scripts that
//! ran are still written: `Failed` for the failing one, `RolledBack` for
//! the ones that were reverted.
//!
//! Outcomes are returned as a [`PublishResult`] value, never as `Err`.

use crate::config::{PublishingConfig, WithdrawalMode};
use crate::ddl::{self, DdlSynthesizer, SqlDialect};
use crate::execution::{self, DdlExecutor, DdlJournal, ExecError, TableColumn};
use crate::alignment;
use crate::graph::{self, GraphError};
use crate::lock::{EntityLockService, EntityLocking, LockError};
use crate::migration;
use crate::provisioning::{MenuRegistration, ProvisionError, SqliteProvisioner, TemplateProvisioner, TemplateProvisioning};
use crate::registry::{CompileOutcome, DescriptorCompiler, TypeCompiler, TypeRegistry};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::sync::Arc;
use tessera_db::{
    entities, DbError, DdlScript, EntityDefinition, EntitySource, EntityStatus, FieldDataType, FieldMetadata,
    ForeignKeyAction, MetaDb, ScriptType,
};
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Entity definition {0} not found")]
    EntityNotFound(Uuid),

    #[error("Entity status is {actual}, expected {expected}")]
    InvalidStatus {
        entity: String,
        actual: EntityStatus,
        expected: EntityStatus,
    },

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error(transparent)]
    Dependency(#[from] GraphError),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' does not exist. Use publish_new instead.")]
    TableMissing(String),

    #[error("DDL failed for '{entity}': {message}")]
    DdlFailed { entity: String, message: String },

    #[error("Entity is locked. Only adding fields or increasing field lengths is allowed.")]
    LockedDestructiveChange,

    #[error("Entity lock failed: {0}")]
    LockFailed(#[source] LockError),

    #[error("Default template failed: {0}")]
    TemplateFailed(#[source] ProvisionError),

    #[error("Entity menu registration failed: {0}")]
    MenuFailed(#[source] ProvisionError),

    #[error("Entity '{entity}' is {status} and cannot be withdrawn")]
    NotWithdrawable { entity: String, status: EntityStatus },

    #[error("Entity '{entity}' is referenced by {}", .referrers.join(", "))]
    Referenced { entity: String, referrers: Vec<String> },

    #[error("Metadata store error: {0}")]
    Db(#[from] DbError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl From<sqlx::Error> for PublishError {
    fn from(e: sqlx::Error) -> Self {
        Self::Db(DbError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, PublishError>;

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeAction {
    /// Draft dependency: table created, locked, Published.
    Created,
    /// Withdrawn dependency: Published again (table recreated if gone).
    Republished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeStep {
    pub entity_id: Uuid,
    pub entity_name: String,
    pub action: CascadeAction,
}

/// A field whose metadata type no longer matches its live column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeChange {
    pub field: FieldMetadata,
    /// Declared SQL type of the live column.
    pub live_type: String,
    /// Existing values may not survive the conversion.
    pub lossy: bool,
}

/// Live-table diff behind `publish_changes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAnalysis {
    pub new_fields: Vec<FieldMetadata>,
    /// `(field, new length)`
    pub length_increases: Vec<(FieldMetadata, u32)>,
    pub length_decreases: Vec<(FieldMetadata, u32)>,
    pub type_changes: Vec<TypeChange>,
    pub removed_columns: Vec<String>,
}

impl ChangeAnalysis {
    pub fn has_destructive_changes(&self) -> bool {
        !self.length_decreases.is_empty()
            || !self.removed_columns.is_empty()
            || self.type_changes.iter().any(|c| c.lossy)
    }

    pub fn is_empty(&self) -> bool {
        self.new_fields.is_empty()
            && self.length_increases.is_empty()
            && self.length_decreases.is_empty()
            && self.type_changes.is_empty()
            && self.removed_columns.is_empty()
    }
}

#[derive(Debug)]
pub struct PublishResult {
    pub entity_id: Uuid,
    pub success: bool,
    pub error: Option<PublishError>,
    /// Audit rows written by this operation, in execution order.
    pub scripts: Vec<DdlScript>,
    pub cascaded: Vec<CascadeStep>,
    pub change_analysis: Option<ChangeAnalysis>,
    pub templates: Option<TemplateProvisioning>,
    pub menu: Option<MenuRegistration>,
    /// Set after a successful commit.
    pub compile: Option<CompileOutcome>,
}

impl PublishResult {
    fn new(entity_id: Uuid) -> Self {
        Self {
            entity_id,
            success: false,
            error: None,
            scripts: Vec::new(),
            cascaded: Vec::new(),
            change_analysis: None,
            templates: None,
            menu: None,
            compile: None,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    /// Whether any DDL was attempted (audited) by this operation.
    pub fn attempted_ddl(&self) -> bool {
        !self.scripts.is_empty()
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Pre-flight checks on one entity's own fields.
async fn validate_fields(conn: &mut SqliteConnection, entity: &EntityDefinition) -> Result<Vec<String>> {
    let mut errors = Vec::new();

    if entity.fields.is_empty() && entity.interfaces.is_empty() {
        errors.push(format!("Entity '{}' defines no columns", entity.entity_name));
    }

    for field in &entity.fields {
        if field.data_type == FieldDataType::Enum {
            match field.enum_definition_id {
                None => errors.push(format!(
                    "Field '{}' of '{}' is an Enum but EnumDefinitionId is null",
                    field.property_name, entity.entity_name
                )),
                Some(enum_id) => match entities::fetch_enum(conn, enum_id).await? {
                    None => errors.push(format!(
                        "Field '{}' of '{}' references enum definition {} which does not exist",
                        field.property_name, entity.entity_name, enum_id
                    )),
                    Some(definition) if !definition.is_enabled => errors.push(format!(
                        "Field '{}' of '{}' references enum '{}' which is disabled",
                        field.property_name, entity.entity_name, definition.code
                    )),
                    Some(_) => {}
                },
            }
        }

        if let Some(problem) = ddl::default_value_error(field) {
            errors.push(format!("{} on '{}'", problem, entity.entity_name));
        }

        if field.lookup_target().is_some() && field.foreign_key_action == ForeignKeyAction::SetNull && field.is_required
        {
            errors.push(format!(
                "Field '{}' of '{}' is required but uses ForeignKeyAction=SetNull",
                field.property_name, entity.entity_name
            ));
        }
    }
    Ok(errors)
}

/// Diff metadata against live columns.
pub fn analyze_changes(ddl: &DdlSynthesizer, entity: &EntityDefinition, live: &[TableColumn]) -> ChangeAnalysis {
    let expected = ddl.expected_columns(entity);
    let mut analysis = ChangeAnalysis::default();

    for column in &expected {
        let Some(existing) = live.iter().find(|c| c.name.eq_ignore_ascii_case(column.name())) else {
            analysis.new_fields.push(column.field.clone());
            continue;
        };
        if !alignment::types_compatible(&ddl.column_type(&column.field), &existing.data_type) {
            let lossy = alignment::live_data_type(&existing.data_type)
                .map(|from| !migration::is_safe_conversion(from, column.field.data_type))
                .unwrap_or(true);
            analysis.type_changes.push(TypeChange {
                field: column.field.clone(),
                live_type: existing.data_type.clone(),
                lossy,
            });
            continue;
        }
        if let (Some(wanted), Some(current)) = (column.field.length, existing.max_length) {
            if wanted > current {
                analysis.length_increases.push((column.field.clone(), wanted));
            } else if wanted < current {
                analysis.length_decreases.push((column.field.clone(), wanted));
            }
        }
    }

    for column in live {
        if !expected.iter().any(|c| c.field.name_matches(&column.name)) {
            analysis.removed_columns.push(column.name.clone());
        }
    }
    analysis
}

// ============================================================================
// Service
// ============================================================================

/// Orchestrates publish, publish-changes and withdraw.
#[derive(Clone)]
pub struct PublishingService {
    db: MetaDb,
    config: PublishingConfig,
    ddl: DdlSynthesizer,
    locking: Arc<dyn EntityLocking>,
    provisioner: Arc<dyn TemplateProvisioner>,
    compiler: Arc<dyn TypeCompiler>,
}

impl PublishingService {
    /// Service with the default lock service, provisioner and compiler.
    pub fn new(db: MetaDb, config: PublishingConfig) -> Self {
        let registry = Arc::new(TypeRegistry::new());
        Self {
            locking: Arc::new(EntityLockService::new(db.clone())),
            provisioner: Arc::new(SqliteProvisioner::new()),
            compiler: Arc::new(DescriptorCompiler::new(registry)),
            ddl: DdlSynthesizer::new(SqlDialect::Sqlite),
            db,
            config,
        }
    }

    pub fn with_locking(mut self, locking: Arc<dyn EntityLocking>) -> Self {
        self.locking = locking;
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn TemplateProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn TypeCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn config(&self) -> &PublishingConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // publish_new
    // ------------------------------------------------------------------------

    /// Publish a Draft entity, cascading to the lookup targets it needs.
    pub async fn publish_new(&self, entity_id: Uuid, actor: Option<&str>) -> PublishResult {
        let span = info_span!("publish", entity_id = %entity_id, op = "new");
        async move {
            let mut result = PublishResult::new(entity_id);
            let mut journal = DdlJournal::new();

            let mut tx = match self.db.begin().await {
                Ok(tx) => tx,
                Err(e) => return self.fail(result, e.into()),
            };
            let outcome = self.publish_new_in_tx(&mut tx, entity_id, actor, &mut journal, &mut result).await;
            let (outcome, scripts) = self.settle(tx, journal, outcome).await;
            result.scripts = scripts;

            match outcome {
                Ok(published) => {
                    result.compile = Some(self.compile(&published));
                    result.success = true;
                    info!(cascaded = result.cascaded.len(), "Entity published");
                    result
                }
                Err(e) => {
                    result.cascaded.clear();
                    result.templates = None;
                    result.menu = None;
                    self.fail(result, e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Returns every entity published, root last.
    async fn publish_new_in_tx(
        &self,
        conn: &mut SqliteConnection,
        entity_id: Uuid,
        actor: Option<&str>,
        journal: &mut DdlJournal,
        result: &mut PublishResult,
    ) -> Result<Vec<EntityDefinition>> {
        let entity = entities::fetch_entity(conn, entity_id)
            .await?
            .ok_or(PublishError::EntityNotFound(entity_id))?;
        require_status(&entity, EntityStatus::Draft)?;

        let errors = validate_fields(conn, &entity).await?;
        if !errors.is_empty() {
            return Err(PublishError::Validation(errors));
        }

        let catalog = entities::fetch_all_entities(conn).await?;
        let order: Vec<EntityDefinition> = graph::publish_order(&entity, &catalog)?
            .into_iter()
            .cloned()
            .collect();

        let mut errors = Vec::new();
        for dependency in &order[..order.len() - 1] {
            errors.extend(validate_fields(conn, dependency).await?);
        }
        if !errors.is_empty() {
            return Err(PublishError::Validation(errors));
        }

        let mut published = Vec::with_capacity(order.len());
        for dependency in &order[..order.len() - 1] {
            let step = match dependency.status {
                EntityStatus::Withdrawn => self.republish_dependency(conn, dependency, actor, journal).await?,
                _ => self.create_dependency(conn, dependency, actor, journal).await?,
            };
            info!(dependency = %dependency.entity_name, action = ?step.action, "Dependency published");
            result.cascaded.push(step);
            published.push(self.reload(conn, dependency.id).await?);
        }

        self.create_table(conn, &entity, actor, journal).await?;
        self.lock(conn, entity.id).await?;
        entities::set_entity_status(conn, entity.id, EntityStatus::Published, actor).await?;
        let entity = self.reload(conn, entity.id).await?;

        result.templates = Some(
            self.provisioner
                .ensure_templates(conn, &entity, actor, false)
                .await
                .map_err(PublishError::TemplateFailed)?,
        );
        result.menu = Some(
            self.provisioner
                .register_menu(conn, &entity, actor)
                .await
                .map_err(PublishError::MenuFailed)?,
        );

        published.push(entity);
        Ok(published)
    }

    async fn create_dependency(
        &self,
        conn: &mut SqliteConnection,
        dependency: &EntityDefinition,
        actor: Option<&str>,
        journal: &mut DdlJournal,
    ) -> Result<CascadeStep> {
        self.create_table(conn, dependency, actor, journal).await?;
        self.lock(conn, dependency.id).await?;
        entities::set_entity_status(conn, dependency.id, EntityStatus::Published, actor).await?;
        Ok(CascadeStep {
            entity_id: dependency.id,
            entity_name: dependency.entity_name.clone(),
            action: CascadeAction::Created,
        })
    }

    async fn republish_dependency(
        &self,
        conn: &mut SqliteConnection,
        dependency: &EntityDefinition,
        actor: Option<&str>,
        journal: &mut DdlJournal,
    ) -> Result<CascadeStep> {
        if !execution::table_exists(conn, &dependency.table_name()).await? {
            self.create_table(conn, dependency, actor, journal).await?;
        }
        let mut revived = dependency.clone();
        revived.status = EntityStatus::Published;
        revived.is_enabled = true;
        revived.source = EntitySource::System;
        revived.updated_by = actor.map(str::to_string).or(revived.updated_by);
        entities::update_entity(conn, &revived).await?;
        self.lock(conn, dependency.id).await?;
        Ok(CascadeStep {
            entity_id: dependency.id,
            entity_name: dependency.entity_name.clone(),
            action: CascadeAction::Republished,
        })
    }

    async fn create_table(
        &self,
        conn: &mut SqliteConnection,
        entity: &EntityDefinition,
        actor: Option<&str>,
        journal: &mut DdlJournal,
    ) -> Result<()> {
        let table = entity.table_name();
        if execution::table_exists(conn, &table).await? {
            return Err(PublishError::TableExists(table));
        }
        let catalog = entities::fetch_all_entities(conn).await?;
        let sql = self.ddl.create_table_sql_in(entity, &catalog);
        let script = journal.execute(conn, entity.id, ScriptType::Create, &sql, actor).await?;
        if !script.is_success() {
            return Err(ddl_failed(entity, &script));
        }
        Ok(())
    }

    async fn lock(&self, conn: &mut SqliteConnection, entity_id: Uuid) -> Result<()> {
        let locked = if self.config.lock_hierarchy {
            self.locking.lock_hierarchy(conn, entity_id).await.map(|_| ())
        } else {
            self.locking.lock(conn, entity_id).await
        };
        locked.map_err(PublishError::LockFailed)
    }

    async fn reload(&self, conn: &mut SqliteConnection, entity_id: Uuid) -> Result<EntityDefinition> {
        entities::fetch_entity(conn, entity_id)
            .await?
            .ok_or(PublishError::EntityNotFound(entity_id))
    }

    // ------------------------------------------------------------------------
    // publish_changes
    // ------------------------------------------------------------------------

    /// Apply a Modified entity's metadata to its table and re-publish it.
    pub async fn publish_changes(&self, entity_id: Uuid, actor: Option<&str>) -> PublishResult {
        let span = info_span!("publish", entity_id = %entity_id, op = "changes");
        async move {
            let mut result = PublishResult::new(entity_id);
            let mut journal = DdlJournal::new();

            let mut tx = match self.db.begin().await {
                Ok(tx) => tx,
                Err(e) => return self.fail(result, e.into()),
            };
            let outcome = self
                .publish_changes_in_tx(&mut tx, entity_id, actor, &mut journal, &mut result)
                .await;
            let (outcome, scripts) = self.settle(tx, journal, outcome).await;
            result.scripts = scripts;

            match outcome {
                Ok(entity) => {
                    result.compile = Some(self.compile(std::slice::from_ref(&entity)));
                    result.success = true;
                    info!(entity = %entity.entity_name, "Entity changes published");
                    result
                }
                Err(e) => {
                    result.templates = None;
                    self.fail(result, e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn publish_changes_in_tx(
        &self,
        conn: &mut SqliteConnection,
        entity_id: Uuid,
        actor: Option<&str>,
        journal: &mut DdlJournal,
        result: &mut PublishResult,
    ) -> Result<EntityDefinition> {
        let entity = entities::fetch_entity(conn, entity_id)
            .await?
            .ok_or(PublishError::EntityNotFound(entity_id))?;
        require_status(&entity, EntityStatus::Modified)?;

        let errors = validate_fields(conn, &entity).await?;
        if !errors.is_empty() {
            return Err(PublishError::Validation(errors));
        }
        let catalog = entities::fetch_all_entities(conn).await?;
        let missing = graph::missing_targets(&entity, &catalog);
        if !missing.is_empty() {
            return Err(GraphError::MissingTargets(missing).into());
        }

        let table = entity.table_name();
        if !execution::table_exists(conn, &table).await? {
            return Err(PublishError::TableMissing(table));
        }

        let live = execution::table_columns(conn, &table).await?;
        let analysis = analyze_changes(&self.ddl, &entity, &live);
        result.change_analysis = Some(analysis.clone());

        if analysis.has_destructive_changes() {
            if entity.is_locked {
                return Err(PublishError::LockedDestructiveChange);
            }
            warn!(
                entity = %entity.entity_name,
                removed = ?analysis.removed_columns,
                "Destructive changes left unapplied on unlocked entity"
            );
        }
        for change in &analysis.type_changes {
            info!(
                field = %change.field.property_name,
                from = %change.live_type,
                to = %change.field.data_type,
                lossy = change.lossy,
                "Column type differs from metadata; table not rebuilt"
            );
        }

        let mut statements: Vec<String> = analysis
            .new_fields
            .iter()
            .flat_map(|field| self.ddl.add_column_statements(&entity, field))
            .collect();
        let lengths = self.ddl.alter_column_length_sql(&entity, &analysis.length_increases);
        if !lengths.is_empty() {
            statements.push(lengths);
        }

        if statements.is_empty() {
            info!(entity = %entity.entity_name, "No schema changes to apply");
        } else {
            let sql = statements.join("\n");
            let script = journal.execute(conn, entity.id, ScriptType::Alter, &sql, actor).await?;
            if !script.is_success() {
                return Err(ddl_failed(&entity, &script));
            }
        }

        entities::set_entity_status(conn, entity.id, EntityStatus::Published, actor).await?;
        let entity = self.reload(conn, entity.id).await?;

        result.templates = Some(
            self.provisioner
                .ensure_templates(conn, &entity, actor, false)
                .await
                .map_err(PublishError::TemplateFailed)?,
        );
        Ok(entity)
    }

    // ------------------------------------------------------------------------
    // withdraw
    // ------------------------------------------------------------------------

    /// Take a Published entity out of service. In physical mode its table
    /// is dropped as well.
    pub async fn withdraw(&self, entity_id: Uuid, actor: Option<&str>) -> PublishResult {
        let span = info_span!("publish", entity_id = %entity_id, op = "withdraw");
        async move {
            let mut result = PublishResult::new(entity_id);
            let mut journal = DdlJournal::new();

            let mut tx = match self.db.begin().await {
                Ok(tx) => tx,
                Err(e) => return self.fail(result, e.into()),
            };
            let outcome = self.withdraw_in_tx(&mut tx, entity_id, actor, &mut journal).await;
            let (outcome, scripts) = self.settle(tx, journal, outcome).await;
            result.scripts = scripts;

            match outcome {
                Ok(entity) => {
                    result.success = true;
                    info!(
                        entity = %entity.entity_name,
                        mode = %self.config.withdrawal_mode,
                        "Entity withdrawn"
                    );
                    result
                }
                Err(e) => self.fail(result, e),
            }
        }
        .instrument(span)
        .await
    }

    async fn withdraw_in_tx(
        &self,
        conn: &mut SqliteConnection,
        entity_id: Uuid,
        actor: Option<&str>,
        journal: &mut DdlJournal,
    ) -> Result<EntityDefinition> {
        let entity = entities::fetch_entity(conn, entity_id)
            .await?
            .ok_or(PublishError::EntityNotFound(entity_id))?;
        if entity.status != EntityStatus::Published {
            return Err(PublishError::NotWithdrawable {
                entity: entity.entity_name.clone(),
                status: entity.status,
            });
        }

        let referrers: Vec<String> = entities::fetch_referencing_entities(conn, &entity)
            .await?
            .into_iter()
            .filter(|e| e.status == EntityStatus::Published)
            .map(|e| e.entity_name)
            .collect();
        if !referrers.is_empty() {
            return Err(PublishError::Referenced {
                entity: entity.entity_name.clone(),
                referrers,
            });
        }

        if self.config.withdrawal_mode == WithdrawalMode::Physical {
            let sql = self.ddl.drop_table_sql(&entity);
            let script = journal.execute(conn, entity.id, ScriptType::Drop, &sql, actor).await?;
            if !script.is_success() {
                return Err(ddl_failed(&entity, &script));
            }
        }

        let mut withdrawn = entity;
        withdrawn.status = EntityStatus::Withdrawn;
        withdrawn.is_enabled = false;
        withdrawn.updated_by = actor.map(str::to_string).or(withdrawn.updated_by);
        entities::update_entity(conn, &withdrawn).await?;
        Ok(withdrawn)
    }

    // ------------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------------

    /// Commit or roll back, then make sure the journal reaches the audit log.
    async fn settle<T>(
        &self,
        tx: Transaction<'static, Sqlite>,
        mut journal: DdlJournal,
        outcome: Result<T>,
    ) -> (Result<T>, Vec<DdlScript>) {
        let error = match outcome {
            Ok(value) => match commit(tx, &journal).await {
                Ok(()) => return (Ok(value), journal.into_scripts()),
                Err(e) => e,
            },
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    error!(error = %rollback, "Rollback failed");
                }
                e
            }
        };

        journal.mark_rolled_back();
        if !journal.is_empty() {
            if let Err(e) = DdlExecutor::new(self.db.clone()).persist_journal(&journal).await {
                error!(error = %e, "Failed to record DDL audit after rollback");
            }
        }
        (Err(error), journal.into_scripts())
    }

    fn fail(&self, mut result: PublishResult, error: PublishError) -> PublishResult {
        error!(entity_id = %result.entity_id, error = %error, "Publish operation rolled back");
        result.success = false;
        result.error = Some(error);
        result
    }

    /// Post-commit type compilation. Failures are reported, not undone.
    fn compile(&self, entities: &[EntityDefinition]) -> CompileOutcome {
        let mut combined = CompileOutcome {
            success: true,
            ..Default::default()
        };
        for entity in entities {
            let source = self.compiler.generate_code(entity);
            let outcome = self.compiler.compile(&source, &assembly_name(entity));
            if !outcome.success {
                warn!(entity = %entity.entity_name, errors = ?outcome.errors, "Type compilation failed");
                combined.success = false;
            }
            combined.errors.extend(outcome.errors);
            combined.loaded_type_names.extend(outcome.loaded_type_names);
        }
        combined
    }
}

async fn commit(mut tx: Transaction<'static, Sqlite>, journal: &DdlJournal) -> Result<()> {
    journal.persist(&mut tx).await?;
    tx.commit().await?;
    Ok(())
}

pub fn assembly_name(entity: &EntityDefinition) -> String {
    format!("Tessera.Dynamic.{}", entity.full_type_name())
}

fn require_status(entity: &EntityDefinition, expected: EntityStatus) -> Result<()> {
    if entity.status != expected {
        return Err(PublishError::InvalidStatus {
            entity: entity.entity_name.clone(),
            actual: entity.status,
            expected,
        });
    }
    Ok(())
}

fn ddl_failed(entity: &EntityDefinition, script: &DdlScript) -> PublishError {
    PublishError::DdlFailed {
        entity: entity.entity_name.clone(),
        message: script.error_message.clone().unwrap_or_default(),
    }
}
