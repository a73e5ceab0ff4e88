//! Metadata edits.
//!
//! [`EntityStore::apply_update`] is the only way a Published entity becomes
//! Modified: the edit is checked by the lock service, applied to a snapshot
//! and written back in one transaction.

use crate::lock::{self, LockError};
use serde::{Deserialize, Serialize};
use tessera_db::{
    entities, DbError, EntityDefinition, EntityStatus, FieldMetadata, InterfaceType, MetaDb, StructureType,
};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Metadata store error: {0}")]
    Db(#[from] DbError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Entity definition {0} not found")]
    EntityNotFound(Uuid),

    #[error("Update rejected: {}", .0.join("; "))]
    Rejected(Vec<String>),
}

/// A proposed edit. `None` properties are left unchanged; `fields` are
/// upserts matched by id, then by property name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityUpdate {
    pub namespace: Option<String>,
    pub entity_name: Option<String>,
    pub entity_route: Option<String>,
    pub structure_type: Option<StructureType>,
    pub interfaces: Option<Vec<InterfaceType>>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub fields: Vec<FieldMetadata>,
    pub removed_fields: Vec<String>,
}

impl EntityUpdate {
    pub fn with_field(mut self, field: FieldMetadata) -> Self {
        self.fields.push(field);
        self
    }

    pub fn remove_field(mut self, property_name: impl Into<String>) -> Self {
        self.removed_fields.push(property_name.into());
        self
    }

    /// Entity-level properties this update actually changes.
    pub fn changed_properties(&self, entity: &EntityDefinition) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if differs(&self.namespace, &entity.namespace) {
            changed.push("Namespace");
        }
        if differs(&self.entity_name, &entity.entity_name) {
            changed.push("EntityName");
        }
        if differs(&self.entity_route, &entity.entity_route) {
            changed.push("EntityRoute");
        }
        if self.structure_type.is_some_and(|s| s != entity.structure_type) {
            changed.push("StructureType");
        }
        if let Some(interfaces) = &self.interfaces {
            let mut proposed = interfaces.clone();
            let mut current = entity.interfaces.clone();
            proposed.sort();
            current.sort();
            if proposed != current {
                changed.push("Interfaces");
            }
        }
        if self.display_name.is_some() && self.display_name != entity.display_name {
            changed.push("DisplayName");
        }
        if self.description.is_some() && self.description != entity.description {
            changed.push("Description");
        }
        changed
    }

    /// New snapshot with this update applied.
    pub fn apply_to(&self, entity: &EntityDefinition) -> EntityDefinition {
        let mut next = entity.clone();
        if let Some(namespace) = &self.namespace {
            next.namespace = namespace.clone();
        }
        if let Some(name) = &self.entity_name {
            next.entity_name = name.clone();
        }
        if let Some(route) = &self.entity_route {
            next.entity_route = route.clone();
        }
        if let Some(structure) = self.structure_type {
            next.structure_type = structure;
        }
        if let Some(interfaces) = &self.interfaces {
            next.interfaces = interfaces.clone();
        }
        if self.display_name.is_some() {
            next.display_name = self.display_name.clone();
        }
        if self.description.is_some() {
            next.description = self.description.clone();
        }

        for update in &self.fields {
            let position = next
                .fields
                .iter()
                .position(|f| f.id == update.id)
                .or_else(|| next.fields.iter().position(|f| f.name_matches(&update.property_name)));
            match position {
                Some(i) => {
                    let id = next.fields[i].id;
                    next.fields[i] = update.clone();
                    next.fields[i].id = id;
                }
                None => next.fields.push(update.clone()),
            }
        }
        next.fields
            .retain(|f| !self.removed_fields.iter().any(|name| f.name_matches(name)));
        next
    }
}

fn differs(proposed: &Option<String>, current: &str) -> bool {
    proposed.as_deref().is_some_and(|p| p != current)
}

/// Applies metadata edits under lock and provenance rules.
#[derive(Clone)]
pub struct EntityStore {
    db: MetaDb,
}

impl EntityStore {
    pub fn new(db: MetaDb) -> Self {
        Self { db }
    }

    /// Validate and apply an edit. A Published entity becomes Modified.
    pub async fn apply_update(
        &self,
        entity_id: Uuid,
        update: &EntityUpdate,
        actor: Option<&str>,
    ) -> Result<EntityDefinition, StoreError> {
        let mut tx = self.db.begin().await?;
        let entity = entities::fetch_entity(&mut tx, entity_id)
            .await?
            .ok_or(StoreError::EntityNotFound(entity_id))?;

        lock::validate_field_updates(&entity, &update.fields, &update.removed_fields)?;
        let report = lock::validate_update(&entity, update);
        if !report.is_valid {
            return Err(StoreError::Rejected(report.errors));
        }

        let mut next = update.apply_to(&entity);
        if next.status == EntityStatus::Published {
            next.status = EntityStatus::Modified;
        }
        next.updated_by = actor.map(str::to_string).or(next.updated_by);

        entities::update_entity(&mut tx, &next).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            entity = %next.entity_name,
            from = %entity.status,
            to = %next.status,
            "Entity metadata updated"
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_db::{FieldDataType, FieldSource};

    async fn published(db: &MetaDb) -> EntityDefinition {
        let mut entity = EntityDefinition::new("Crm", "Order")
            .with_status(EntityStatus::Published)
            .with_field(FieldMetadata::new("Name", FieldDataType::String).with_length(200))
            .with_field(
                FieldMetadata::new("Code", FieldDataType::String)
                    .with_length(100)
                    .with_source(FieldSource::Interface),
            );
        entity.is_locked = true;
        db.create_entity(&entity).await.unwrap();
        entity
    }

    #[tokio::test]
    async fn test_published_entity_becomes_modified() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let entity = published(&db).await;
        let store = EntityStore::new(db.clone());

        let update = EntityUpdate::default().with_field(FieldMetadata::new("NewField", FieldDataType::Integer));
        let updated = store.apply_update(entity.id, &update, Some("ops")).await.unwrap();

        assert_eq!(updated.status, EntityStatus::Modified);
        assert_eq!(updated.fields.len(), 3);
        let stored = db.get_entity(entity.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EntityStatus::Modified);
        assert_eq!(stored.updated_by.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn test_locked_identity_change_is_rejected() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let entity = published(&db).await;
        let store = EntityStore::new(db.clone());

        let update = EntityUpdate {
            entity_name: Some("Purchase".to_string()),
            ..Default::default()
        };
        let err = store.apply_update(entity.id, &update, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));

        let stored = db.get_entity(entity.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EntityStatus::Published);
        assert_eq!(stored.entity_name, "Order");
    }

    #[tokio::test]
    async fn test_protected_field_edit_rejects_whole_payload() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let entity = published(&db).await;
        let store = EntityStore::new(db.clone());

        let mut code = entity.fields[1].clone();
        code.length = Some(20);
        let update = EntityUpdate::default()
            .with_field(FieldMetadata::new("Extra", FieldDataType::Integer))
            .with_field(code);

        let err = store.apply_update(entity.id, &update, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Lock(LockError::FieldProtectedBySource(_))));

        let stored = db.get_entity(entity.id).await.unwrap().unwrap();
        assert_eq!(stored.fields.len(), 2);
    }

    #[test]
    fn test_apply_to_upserts_by_name_and_keeps_id() {
        let entity = EntityDefinition::new("Crm", "Order")
            .with_field(FieldMetadata::new("Name", FieldDataType::String).with_length(200))
            .with_field(FieldMetadata::new("Old", FieldDataType::Integer));
        let original_id = entity.fields[0].id;

        let update = EntityUpdate::default()
            .with_field(FieldMetadata::new("name", FieldDataType::String).with_length(300))
            .remove_field("OLD");
        let next = update.apply_to(&entity);

        assert_eq!(next.fields.len(), 1);
        assert_eq!(next.fields[0].id, original_id);
        assert_eq!(next.fields[0].length, Some(300));
    }

    #[test]
    fn test_changed_properties_ignores_equal_values() {
        let entity = EntityDefinition::new("Crm", "Order");
        let update = EntityUpdate {
            entity_name: Some("Order".to_string()),
            namespace: Some("Sales".to_string()),
            interfaces: Some(vec![InterfaceType::Base]),
            ..Default::default()
        };
        assert_eq!(update.changed_properties(&entity), vec!["Namespace"]);
    }
}
