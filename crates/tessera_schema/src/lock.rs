//! Entity locking and field provenance rules.
//!
//! Once an entity leaves Draft it is locked: identity properties (name,
//! namespace, route, structure, interfaces) become read-only. Field
//! editability is separate and depends only on where the field came from.

use crate::migration;
use crate::provisioning;
use crate::store::EntityUpdate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::{HashSet, VecDeque};
use tessera_db::{entities, DbError, EntityDefinition, EntityStatus, FieldMetadata, FieldSource, MetaDb};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Metadata store error: {0}")]
    Db(#[from] DbError),

    #[error("Entity definition {0} not found")]
    EntityNotFound(Uuid),

    #[error("Field changes rejected: {}", .0.join("; "))]
    FieldProtectedBySource(Vec<String>),
}

impl From<sqlx::Error> for LockError {
    fn from(e: sqlx::Error) -> Self {
        Self::Db(DbError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, LockError>;

/// Entity properties frozen while the entity is locked.
pub const LOCKED_PROPERTIES: [&str; 6] = [
    "Namespace",
    "EntityName",
    "EntityRoute",
    "FullTypeName",
    "StructureType",
    "Interfaces",
];

pub fn is_locked_property(property: &str) -> bool {
    LOCKED_PROPERTIES.iter().any(|p| p.eq_ignore_ascii_case(property.trim()))
}

/// Editable aspects of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldProperty {
    PropertyName,
    DisplayName,
    DataType,
    Length,
    Precision,
    Scale,
    IsRequired,
    DefaultValue,
    SortOrder,
    Lookup,
    EnumDefinition,
    IsMultiSelect,
    Source,
}

impl FieldProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PropertyName => "PropertyName",
            Self::DisplayName => "DisplayName",
            Self::DataType => "DataType",
            Self::Length => "Length",
            Self::Precision => "Precision",
            Self::Scale => "Scale",
            Self::IsRequired => "IsRequired",
            Self::DefaultValue => "DefaultValue",
            Self::SortOrder => "SortOrder",
            Self::Lookup => "Lookup",
            Self::EnumDefinition => "EnumDefinition",
            Self::IsMultiSelect => "IsMultiSelect",
            Self::Source => "Source",
        }
    }

    /// Properties that differ between two versions of a field.
    pub fn changed(old: &FieldMetadata, new: &FieldMetadata) -> Vec<FieldProperty> {
        let mut changed = Vec::new();
        if old.property_name != new.property_name {
            changed.push(Self::PropertyName);
        }
        if old.display_name != new.display_name {
            changed.push(Self::DisplayName);
        }
        if old.data_type != new.data_type {
            changed.push(Self::DataType);
        }
        if old.length != new.length {
            changed.push(Self::Length);
        }
        if old.precision != new.precision {
            changed.push(Self::Precision);
        }
        if old.scale != new.scale {
            changed.push(Self::Scale);
        }
        if old.is_required != new.is_required {
            changed.push(Self::IsRequired);
        }
        if old.default_value != new.default_value {
            changed.push(Self::DefaultValue);
        }
        if old.sort_order != new.sort_order {
            changed.push(Self::SortOrder);
        }
        if old.lookup_target() != new.lookup_target() || old.foreign_key_action != new.foreign_key_action {
            changed.push(Self::Lookup);
        }
        if old.enum_definition_id != new.enum_definition_id {
            changed.push(Self::EnumDefinition);
        }
        if old.is_multi_select != new.is_multi_select {
            changed.push(Self::IsMultiSelect);
        }
        if old.source != new.source {
            changed.push(Self::Source);
        }
        changed
    }
}

/// Whether a field from `source` may have `property` edited.
pub fn is_field_property_editable(source: FieldSource, property: FieldProperty) -> bool {
    match source {
        FieldSource::Custom => true,
        FieldSource::Interface => matches!(
            property,
            FieldProperty::DisplayName | FieldProperty::SortOrder | FieldProperty::DefaultValue
        ),
        FieldSource::System => matches!(property, FieldProperty::DisplayName | FieldProperty::SortOrder),
    }
}

/// Check field edits and removals against provenance rules.
///
/// Edits are matched to existing fields by id, then by property name. All
/// violations are collected; any violation rejects the whole payload.
pub fn validate_field_updates(
    entity: &EntityDefinition,
    updates: &[FieldMetadata],
    removals: &[String],
) -> Result<()> {
    let mut violations = Vec::new();

    for update in updates {
        let existing = entity
            .fields
            .iter()
            .find(|f| f.id == update.id)
            .or_else(|| entity.field(&update.property_name));
        let Some(existing) = existing else {
            continue;
        };

        let denied: Vec<&str> = FieldProperty::changed(existing, update)
            .into_iter()
            .filter(|p| !is_field_property_editable(existing.source, *p))
            .map(|p| p.as_str())
            .collect();
        if !denied.is_empty() {
            violations.push(format!(
                "Field '{}' ({}) cannot change {}",
                existing.property_name,
                existing.source,
                denied.join(", ")
            ));
        }
    }

    for name in removals {
        if let Some(existing) = entity.field(name) {
            if existing.source != FieldSource::Custom {
                violations.push(format!(
                    "Field '{}' ({}) cannot be removed",
                    existing.property_name, existing.source
                ));
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(LockError::FieldProtectedBySource(violations))
    }
}

/// Answer to "may this property change?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyCheck {
    pub allowed: bool,
    pub reason: Option<String>,
}

pub fn check_property(entity: &EntityDefinition, property: &str) -> PropertyCheck {
    if entity.is_locked && is_locked_property(property) {
        PropertyCheck {
            allowed: false,
            reason: Some(format!(
                "Property '{}' cannot be modified because entity '{}' is locked",
                property.trim(),
                entity.entity_name
            )),
        }
    } else {
        PropertyCheck {
            allowed: true,
            reason: None,
        }
    }
}

/// Why an entity is (or would be) locked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub entity_id: Uuid,
    pub entity_name: String,
    pub is_locked: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Pure validation of an update against an entity snapshot.
pub fn validate_update(entity: &EntityDefinition, update: &EntityUpdate) -> ValidationReport {
    let mut report = ValidationReport::default();

    for property in update.changed_properties(entity) {
        let check = check_property(entity, property);
        if let Some(reason) = check.reason {
            report.errors.push(reason);
        }
    }

    if let Err(LockError::FieldProtectedBySource(violations)) =
        validate_field_updates(entity, &update.fields, &update.removed_fields)
    {
        report.errors.extend(violations);
    }

    if entity.is_locked {
        for name in &update.removed_fields {
            if entity.field(name).is_some() {
                report.warnings.push(format!(
                    "Removing field '{}' from a locked entity will be rejected at publish",
                    name
                ));
            }
        }
        for field in &update.fields {
            let Some(existing) = entity.field(&field.property_name) else {
                continue;
            };
            if !migration::is_safe_conversion(existing.data_type, field.data_type) {
                report.warnings.push(format!(
                    "Changing '{}' from {} to {} on a locked entity may lose data and will be rejected at publish",
                    field.property_name, existing.data_type, field.data_type
                ));
            }
            if let (Some(old), Some(new)) = (existing.length, field.length) {
                if new < old {
                    report.warnings.push(format!(
                        "Shortening '{}' from {} to {} on a locked entity will be rejected at publish",
                        field.property_name, old, new
                    ));
                }
            }
        }
    }

    if entity.status == EntityStatus::Published {
        report
            .warnings
            .push(format!("Entity '{}' will become Modified", entity.entity_name));
    }

    report.is_valid = report.errors.is_empty();
    report
}

// ============================================================================
// Connection-level operations
// ============================================================================

pub async fn lock_entity_on(conn: &mut SqliteConnection, entity_id: Uuid) -> Result<()> {
    if !entities::set_entity_locked(conn, entity_id, true).await? {
        return Err(LockError::EntityNotFound(entity_id));
    }
    debug!(entity_id = %entity_id, "Entity locked");
    Ok(())
}

/// Lock `root` and every descendant by `parent_entity_id`.
/// Returns how many entities were locked.
pub async fn lock_hierarchy_on(conn: &mut SqliteConnection, root: Uuid) -> Result<usize> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([root]);
    let mut locked = 0;

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        if entities::set_entity_locked(conn, id, true).await? {
            locked += 1;
        } else if id == root {
            return Err(LockError::EntityNotFound(root));
        }
        for child in entities::fetch_children(conn, id).await? {
            queue.push_back(child.id);
        }
    }

    debug!(root = %root, count = locked, "Entity hierarchy locked");
    Ok(locked)
}

pub async fn lock_info_on(conn: &mut SqliteConnection, entity_id: Uuid) -> Result<LockInfo> {
    let entity = entities::fetch_entity(conn, entity_id)
        .await?
        .ok_or(LockError::EntityNotFound(entity_id))?;

    let mut reasons = Vec::new();
    if matches!(entity.status, EntityStatus::Published | EntityStatus::Modified) {
        reasons.push(format!("Entity is {}", entity.status));
    }

    let templates = provisioning::count_templates(conn, &entity.full_type_name()).await?;
    if templates > 0 {
        reasons.push(format!("{} form template(s) reference this entity", templates));
    }

    let children = entities::fetch_children(conn, entity_id).await?;
    if !children.is_empty() {
        let names: Vec<&str> = children.iter().map(|c| c.entity_name.as_str()).collect();
        reasons.push(format!("Has child entities: {}", names.join(", ")));
    }

    let referencing = entities::fetch_referencing_entities(conn, &entity).await?;
    if !referencing.is_empty() {
        let names: Vec<&str> = referencing.iter().map(|e| e.entity_name.as_str()).collect();
        reasons.push(format!("Referenced by lookups in: {}", names.join(", ")));
    }

    Ok(LockInfo {
        entity_id,
        entity_name: entity.entity_name,
        is_locked: entity.is_locked,
        reasons,
    })
}

/// In-transaction lock acquisition used by the publishing orchestrator.
#[async_trait]
pub trait EntityLocking: Send + Sync {
    async fn lock(&self, conn: &mut SqliteConnection, entity_id: Uuid) -> Result<()>;

    async fn lock_hierarchy(&self, conn: &mut SqliteConnection, root: Uuid) -> Result<usize>;
}

// ============================================================================
// Service
// ============================================================================

#[derive(Clone)]
pub struct EntityLockService {
    db: MetaDb,
}

impl EntityLockService {
    pub fn new(db: MetaDb) -> Self {
        Self { db }
    }

    async fn load(&self, entity_id: Uuid) -> Result<EntityDefinition> {
        self.db
            .get_entity(entity_id)
            .await?
            .ok_or(LockError::EntityNotFound(entity_id))
    }

    pub async fn can_modify_property(&self, entity_id: Uuid, property: &str) -> Result<PropertyCheck> {
        let entity = self.load(entity_id).await?;
        Ok(check_property(&entity, property))
    }

    pub async fn lock_entity(&self, entity_id: Uuid) -> Result<()> {
        let mut conn = self.db.pool().acquire().await?;
        lock_entity_on(&mut conn, entity_id).await?;
        info!(entity_id = %entity_id, "Entity locked");
        Ok(())
    }

    pub async fn unlock_entity(&self, entity_id: Uuid) -> Result<()> {
        let mut conn = self.db.pool().acquire().await?;
        if !entities::set_entity_locked(&mut conn, entity_id, false).await? {
            return Err(LockError::EntityNotFound(entity_id));
        }
        info!(entity_id = %entity_id, "Entity unlocked");
        Ok(())
    }

    pub async fn is_entity_locked(&self, entity_id: Uuid) -> Result<bool> {
        Ok(self.load(entity_id).await?.is_locked)
    }

    pub async fn lock_entity_hierarchy(&self, root: Uuid) -> Result<usize> {
        let mut tx = self.db.begin().await?;
        let count = lock_hierarchy_on(&mut tx, root).await?;
        tx.commit().await?;
        info!(root = %root, count, "Entity hierarchy locked");
        Ok(count)
    }

    pub async fn lock_info(&self, entity_id: Uuid) -> Result<LockInfo> {
        let mut conn = self.db.pool().acquire().await?;
        lock_info_on(&mut conn, entity_id).await
    }

    pub async fn validate_modification(&self, entity_id: Uuid, update: &EntityUpdate) -> Result<ValidationReport> {
        let entity = self.load(entity_id).await?;
        Ok(validate_update(&entity, update))
    }
}

#[async_trait]
impl EntityLocking for EntityLockService {
    async fn lock(&self, conn: &mut SqliteConnection, entity_id: Uuid) -> Result<()> {
        lock_entity_on(conn, entity_id).await
    }

    async fn lock_hierarchy(&self, conn: &mut SqliteConnection, root: Uuid) -> Result<usize> {
        lock_hierarchy_on(conn, root).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_db::FieldDataType;

    fn locked_entity() -> EntityDefinition {
        let mut entity = EntityDefinition::new("Crm", "Order")
            .with_status(EntityStatus::Published)
            .with_field(
                FieldMetadata::new("Id", FieldDataType::Guid)
                    .required()
                    .with_source(FieldSource::System),
            )
            .with_field(
                FieldMetadata::new("Code", FieldDataType::String)
                    .with_length(100)
                    .with_source(FieldSource::Interface),
            )
            .with_field(FieldMetadata::new("Notes", FieldDataType::Text));
        entity.is_locked = true;
        entity
    }

    #[test]
    fn test_locked_properties_denied_case_insensitively() {
        let entity = locked_entity();
        for property in ["EntityName", "namespace", "ENTITYROUTE", "FullTypeName", "StructureType", "Interfaces"] {
            let check = check_property(&entity, property);
            assert!(!check.allowed, "{}", property);
            assert!(check.reason.is_some());
        }
        assert!(check_property(&entity, "DisplayName").allowed);
    }

    #[test]
    fn test_unlocked_allows_everything() {
        let mut entity = locked_entity();
        entity.is_locked = false;
        assert!(check_property(&entity, "EntityName").allowed);
    }

    #[test]
    fn test_source_rules() {
        use FieldProperty::*;
        assert!(is_field_property_editable(FieldSource::System, DisplayName));
        assert!(is_field_property_editable(FieldSource::System, SortOrder));
        assert!(!is_field_property_editable(FieldSource::System, DefaultValue));
        assert!(is_field_property_editable(FieldSource::Interface, DefaultValue));
        assert!(!is_field_property_editable(FieldSource::Interface, Length));
        assert!(is_field_property_editable(FieldSource::Custom, DataType));
    }

    #[test]
    fn test_field_updates_reject_whole_payload() {
        let entity = locked_entity();
        let mut id = entity.fields[0].clone();
        id.data_type = FieldDataType::String;
        let mut code = entity.fields[1].clone();
        code.length = Some(50);
        let mut notes = entity.fields[2].clone();
        notes.data_type = FieldDataType::String;

        let err = validate_field_updates(&entity, &[id, code, notes], &[]).unwrap_err();
        match err {
            LockError::FieldProtectedBySource(violations) => {
                assert_eq!(violations.len(), 2);
                assert!(violations[0].contains("'Id' (System) cannot change DataType"));
                assert!(violations[1].contains("'Code' (Interface) cannot change Length"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_allowed_field_edits_pass() {
        let entity = locked_entity();
        let id = entity.fields[0].clone().with_display_name("Identifier").with_sort_order(5);
        let code = entity.fields[1].clone().with_default("N/A");
        validate_field_updates(&entity, &[id, code], &[]).unwrap();
    }

    #[test]
    fn test_removing_protected_field_is_rejected() {
        let entity = locked_entity();
        let err = validate_field_updates(&entity, &[], &["code".to_string()]).unwrap_err();
        assert!(err.to_string().contains("'Code' (Interface) cannot be removed"));
        validate_field_updates(&entity, &[], &["Notes".to_string()]).unwrap();
    }

    #[test]
    fn test_validate_update_reports_errors_and_warnings() {
        let entity = locked_entity();
        let update = EntityUpdate {
            entity_name: Some("Purchase".to_string()),
            removed_fields: vec!["Notes".to_string()],
            ..Default::default()
        };
        let report = validate_update(&entity, &update);
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.warnings.iter().any(|w| w.contains("Removing field 'Notes'")));
        assert!(report.warnings.iter().any(|w| w.contains("will become Modified")));
    }

    #[test]
    fn test_only_lossy_type_changes_warn_on_locked_entity() {
        let mut entity = locked_entity();
        entity.fields.push(FieldMetadata::new("Qty", FieldDataType::Integer));

        let mut notes = entity.fields[2].clone();
        notes.data_type = FieldDataType::Integer;
        let mut qty = entity.fields[3].clone();
        qty.data_type = FieldDataType::Long;
        let update = EntityUpdate::default().with_field(notes).with_field(qty);

        let report = validate_update(&entity, &update);
        let type_warnings: Vec<&String> = report.warnings.iter().filter(|w| w.contains("may lose data")).collect();
        assert_eq!(type_warnings.len(), 1);
        assert_eq!(
            type_warnings[0],
            "Changing 'Notes' from Text to Integer on a locked entity may lose data and will be rejected at publish"
        );
    }

    #[tokio::test]
    async fn test_lock_hierarchy_is_cycle_safe() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let mut root = EntityDefinition::new("Crm", "Order");
        let child = EntityDefinition::new("Crm", "OrderLine").with_parent(root.id);
        let grandchild = EntityDefinition::new("Crm", "OrderLineNote").with_parent(child.id);
        // A malformed cycle: root points back at the grandchild.
        root.parent_entity_id = Some(grandchild.id);
        for entity in [&root, &child, &grandchild] {
            db.create_entity(entity).await.unwrap();
        }

        let service = EntityLockService::new(db.clone());
        let count = service.lock_entity_hierarchy(root.id).await.unwrap();
        assert_eq!(count, 3);
        assert!(service.is_entity_locked(grandchild.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_unlock_and_info() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let customer = EntityDefinition::new("Crm", "Customer").with_status(EntityStatus::Published);
        let order = EntityDefinition::new("Crm", "Order").with_field(
            FieldMetadata::new("CustomerId", FieldDataType::Guid)
                .with_lookup("Customer", tessera_db::ForeignKeyAction::Restrict),
        );
        db.create_entity(&customer).await.unwrap();
        db.create_entity(&order).await.unwrap();

        let service = EntityLockService::new(db.clone());
        service.lock_entity(customer.id).await.unwrap();
        assert!(service.is_entity_locked(customer.id).await.unwrap());

        let info = service.lock_info(customer.id).await.unwrap();
        assert!(info.is_locked);
        assert!(info.reasons.iter().any(|r| r == "Entity is Published"));
        assert!(info.reasons.iter().any(|r| r.contains("Referenced by lookups in: Order")));

        let check = service.can_modify_property(customer.id, "EntityName").await.unwrap();
        assert!(!check.allowed);

        service.unlock_entity(customer.id).await.unwrap();
        assert!(!service.is_entity_locked(customer.id).await.unwrap());

        let missing = service.lock_entity(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(missing, LockError::EntityNotFound(_)));
    }
}
