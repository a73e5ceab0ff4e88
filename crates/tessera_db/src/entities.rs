//! Entity and enum definition persistence.
//!
//! The free functions take a borrowed connection so callers can run them
//! inside their own transaction; `MetaDb` methods are pool-level wrappers.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::MetaDb;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::HashSet;
use uuid::Uuid;

const ENTITY_COLUMNS: &str = "id, namespace, entity_name, entity_route, structure_type, parent_entity_id, \
    display_name, description, status, source, is_locked, is_enabled, interfaces_json, fields_json, \
    created_at, updated_at, created_by, updated_by";

// ============================================================================
// Entity definitions
// ============================================================================

/// Insert a new entity definition.
pub async fn insert_entity(conn: &mut SqliteConnection, entity: &EntityDefinition) -> Result<()> {
    check_field_names(entity)?;

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM entity_definitions WHERE entity_name = ? COLLATE NOCASE",
    )
    .bind(&entity.entity_name)
    .fetch_one(&mut *conn)
    .await?;
    if existing > 0 {
        return Err(DbError::constraint(format!(
            "Entity '{}' is already defined",
            entity.entity_name
        )));
    }

    let interfaces_json = serde_json::to_string(&entity.interfaces)?;
    let fields_json = serde_json::to_string(&entity.fields)?;

    sqlx::query(
        r#"
        INSERT INTO entity_definitions (id, namespace, entity_name, entity_route, structure_type,
            parent_entity_id, display_name, description, status, source, is_locked, is_enabled,
            interfaces_json, fields_json, created_at, updated_at, created_by, updated_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entity.id.to_string())
    .bind(&entity.namespace)
    .bind(&entity.entity_name)
    .bind(&entity.entity_route)
    .bind(entity.structure_type.as_str())
    .bind(entity.parent_entity_id.map(|id| id.to_string()))
    .bind(&entity.display_name)
    .bind(&entity.description)
    .bind(entity.status.as_str())
    .bind(entity.source.as_str())
    .bind(entity.is_locked)
    .bind(entity.is_enabled)
    .bind(&interfaces_json)
    .bind(&fields_json)
    .bind(entity.created_at)
    .bind(entity.updated_at)
    .bind(&entity.created_by)
    .bind(&entity.updated_by)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Overwrite every mutable column of an existing definition.
pub async fn update_entity(conn: &mut SqliteConnection, entity: &EntityDefinition) -> Result<()> {
    check_field_names(entity)?;

    let interfaces_json = serde_json::to_string(&entity.interfaces)?;
    let fields_json = serde_json::to_string(&entity.fields)?;

    let result = sqlx::query(
        r#"
        UPDATE entity_definitions SET
            namespace = ?,
            entity_name = ?,
            entity_route = ?,
            structure_type = ?,
            parent_entity_id = ?,
            display_name = ?,
            description = ?,
            status = ?,
            source = ?,
            is_locked = ?,
            is_enabled = ?,
            interfaces_json = ?,
            fields_json = ?,
            updated_at = ?,
            updated_by = ?
        WHERE id = ?
        "#,
    )
    .bind(&entity.namespace)
    .bind(&entity.entity_name)
    .bind(&entity.entity_route)
    .bind(entity.structure_type.as_str())
    .bind(entity.parent_entity_id.map(|id| id.to_string()))
    .bind(&entity.display_name)
    .bind(&entity.description)
    .bind(entity.status.as_str())
    .bind(entity.source.as_str())
    .bind(entity.is_locked)
    .bind(entity.is_enabled)
    .bind(&interfaces_json)
    .bind(&fields_json)
    .bind(Utc::now())
    .bind(&entity.updated_by)
    .bind(entity.id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(entity_not_found(entity.id));
    }
    Ok(())
}

pub async fn fetch_entity(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<EntityDefinition>> {
    let sql = format!("SELECT {} FROM entity_definitions WHERE id = ?", ENTITY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_entity).transpose()
}

/// Fetch an entity or fail with a NotFound error.
pub async fn require_entity(conn: &mut SqliteConnection, id: Uuid) -> Result<EntityDefinition> {
    fetch_entity(conn, id)
        .await?
        .ok_or_else(|| entity_not_found(id))
}

/// Case-insensitive lookup by entity name (lookup fields reference names).
pub async fn fetch_entity_by_name(
    conn: &mut SqliteConnection,
    entity_name: &str,
) -> Result<Option<EntityDefinition>> {
    let sql = format!(
        "SELECT {} FROM entity_definitions WHERE entity_name = ? COLLATE NOCASE ORDER BY created_at LIMIT 1",
        ENTITY_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(entity_name.trim())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_entity).transpose()
}

pub async fn fetch_all_entities(conn: &mut SqliteConnection) -> Result<Vec<EntityDefinition>> {
    let sql = format!(
        "SELECT {} FROM entity_definitions ORDER BY namespace, entity_name",
        ENTITY_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows.iter().map(row_to_entity).collect()
}

pub async fn fetch_entities_by_status(
    conn: &mut SqliteConnection,
    status: EntityStatus,
    source: Option<EntitySource>,
) -> Result<Vec<EntityDefinition>> {
    let rows = match source {
        Some(source) => {
            let sql = format!(
                "SELECT {} FROM entity_definitions WHERE status = ? AND source = ? ORDER BY namespace, entity_name",
                ENTITY_COLUMNS
            );
            sqlx::query(&sql)
                .bind(status.as_str())
                .bind(source.as_str())
                .fetch_all(&mut *conn)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM entity_definitions WHERE status = ? ORDER BY namespace, entity_name",
                ENTITY_COLUMNS
            );
            sqlx::query(&sql)
                .bind(status.as_str())
                .fetch_all(&mut *conn)
                .await?
        }
    };
    rows.iter().map(row_to_entity).collect()
}

/// Direct children (by `parent_entity_id`).
pub async fn fetch_children(conn: &mut SqliteConnection, parent_id: Uuid) -> Result<Vec<EntityDefinition>> {
    let sql = format!(
        "SELECT {} FROM entity_definitions WHERE parent_entity_id = ? ORDER BY entity_name",
        ENTITY_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(parent_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(row_to_entity).collect()
}

/// Entities other than `target` with a lookup that resolves to `target`.
pub async fn fetch_referencing_entities(
    conn: &mut SqliteConnection,
    target: &EntityDefinition,
) -> Result<Vec<EntityDefinition>> {
    let all = fetch_all_entities(conn).await?;
    Ok(all
        .into_iter()
        .filter(|candidate| candidate.id != target.id)
        .filter(|candidate| candidate.lookup_targets().iter().any(|key| target.answers_to(key)))
        .collect())
}

pub async fn set_entity_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    status: EntityStatus,
    actor: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE entity_definitions SET status = ?, updated_at = ?, updated_by = COALESCE(?, updated_by) WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(Utc::now())
    .bind(actor)
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(entity_not_found(id));
    }
    Ok(())
}

/// Set the lock flag. Returns `false` when the entity does not exist.
pub async fn set_entity_locked(conn: &mut SqliteConnection, id: Uuid, locked: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE entity_definitions SET is_locked = ?, updated_at = ? WHERE id = ?")
        .bind(locked)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a definition that nothing references.
pub async fn delete_entity(conn: &mut SqliteConnection, id: Uuid) -> Result<()> {
    let entity = require_entity(conn, id).await?;
    if matches!(entity.status, EntityStatus::Published | EntityStatus::Modified) {
        return Err(DbError::invalid_state(format!(
            "Entity '{}' is {}; withdraw it before deleting",
            entity.entity_name, entity.status
        )));
    }

    let referencing = fetch_referencing_entities(conn, &entity).await?;
    if !referencing.is_empty() {
        let names: Vec<&str> = referencing.iter().map(|e| e.entity_name.as_str()).collect();
        return Err(DbError::constraint(format!(
            "Entity '{}' is referenced by {}",
            entity.entity_name,
            names.join(", ")
        )));
    }

    sqlx::query("DELETE FROM entity_definitions WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn check_field_names(entity: &EntityDefinition) -> Result<()> {
    let mut seen = HashSet::new();
    for field in &entity.fields {
        let name = field.property_name.trim();
        if name.is_empty() {
            return Err(DbError::constraint(format!(
                "Entity '{}' has a field without a property name",
                entity.entity_name
            )));
        }
        if !seen.insert(name.to_lowercase()) {
            return Err(DbError::constraint(format!(
                "Duplicate property name '{}' in entity '{}'",
                name, entity.entity_name
            )));
        }
    }
    Ok(())
}

fn entity_not_found(id: Uuid) -> DbError {
    DbError::not_found(format!("Entity definition {} not found", id))
}

fn row_to_entity(row: &SqliteRow) -> Result<EntityDefinition> {
    let status: String = row.try_get("status")?;
    let source: String = row.try_get("source")?;
    let structure: String = row.try_get("structure_type")?;
    let interfaces_json: String = row.try_get("interfaces_json")?;
    let fields_json: String = row.try_get("fields_json")?;
    let parent: Option<String> = row.try_get("parent_entity_id")?;

    Ok(EntityDefinition {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        namespace: row.try_get("namespace")?,
        entity_name: row.try_get("entity_name")?,
        entity_route: row.try_get("entity_route")?,
        structure_type: StructureType::parse(&structure)
            .ok_or_else(|| DbError::invalid_data(format!("structure type '{}'", structure)))?,
        parent_entity_id: parent.as_deref().map(parse_uuid).transpose()?,
        display_name: row.try_get("display_name")?,
        description: row.try_get("description")?,
        status: EntityStatus::parse(&status)
            .ok_or_else(|| DbError::invalid_data(format!("entity status '{}'", status)))?,
        source: EntitySource::parse(&source)
            .ok_or_else(|| DbError::invalid_data(format!("entity source '{}'", source)))?,
        is_locked: row.try_get("is_locked")?,
        is_enabled: row.try_get("is_enabled")?,
        interfaces: serde_json::from_str(&interfaces_json)?,
        fields: serde_json::from_str(&fields_json)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        created_by: row.try_get("created_by")?,
        updated_by: row.try_get("updated_by")?,
    })
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| DbError::invalid_data(format!("id '{}': {}", value, e)))
}

// ============================================================================
// Enum definitions
// ============================================================================

pub async fn insert_enum(conn: &mut SqliteConnection, definition: &EnumDefinition) -> Result<()> {
    let options_json = serde_json::to_string(&definition.options)?;
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO enum_definitions (id, code, display_name, is_enabled, options_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            code = excluded.code,
            display_name = excluded.display_name,
            is_enabled = excluded.is_enabled,
            options_json = excluded.options_json,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(definition.id.to_string())
    .bind(&definition.code)
    .bind(&definition.display_name)
    .bind(definition.is_enabled)
    .bind(&options_json)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn fetch_enum(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<EnumDefinition>> {
    let row = sqlx::query(
        "SELECT id, code, display_name, is_enabled, options_json FROM enum_definitions WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_enum).transpose()
}

fn row_to_enum(row: &SqliteRow) -> Result<EnumDefinition> {
    let options_json: String = row.try_get("options_json")?;
    Ok(EnumDefinition {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        code: row.try_get("code")?,
        display_name: row.try_get("display_name")?,
        is_enabled: row.try_get("is_enabled")?,
        options: serde_json::from_str(&options_json)?,
    })
}

// ============================================================================
// Pool-level wrappers
// ============================================================================

impl MetaDb {
    /// Store a new entity definition.
    pub async fn create_entity(&self, entity: &EntityDefinition) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_entity(&mut conn, entity).await
    }

    /// Overwrite an existing entity definition.
    pub async fn save_entity(&self, entity: &EntityDefinition) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        update_entity(&mut conn, entity).await
    }

    pub async fn get_entity(&self, id: Uuid) -> Result<Option<EntityDefinition>> {
        let mut conn = self.pool.acquire().await?;
        fetch_entity(&mut conn, id).await
    }

    pub async fn get_entity_by_name(&self, entity_name: &str) -> Result<Option<EntityDefinition>> {
        let mut conn = self.pool.acquire().await?;
        fetch_entity_by_name(&mut conn, entity_name).await
    }

    pub async fn list_entities(&self) -> Result<Vec<EntityDefinition>> {
        let mut conn = self.pool.acquire().await?;
        fetch_all_entities(&mut conn).await
    }

    pub async fn list_entities_by_status(
        &self,
        status: EntityStatus,
        source: Option<EntitySource>,
    ) -> Result<Vec<EntityDefinition>> {
        let mut conn = self.pool.acquire().await?;
        fetch_entities_by_status(&mut conn, status, source).await
    }

    pub async fn delete_entity(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_entity(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert or replace an enum definition.
    pub async fn save_enum(&self, definition: &EnumDefinition) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_enum(&mut conn, definition).await
    }

    pub async fn get_enum(&self, id: Uuid) -> Result<Option<EnumDefinition>> {
        let mut conn = self.pool.acquire().await?;
        fetch_enum(&mut conn, id).await
    }
}

#[cfg(test)]
mod tests {
    use crate::MetaDb;
    use crate::types::*;

    #[tokio::test]
    async fn test_entity_round_trip() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let entity = EntityDefinition::new("Crm", "Order")
            .with_interface(InterfaceType::Audit)
            .with_field(FieldMetadata::new("Name", FieldDataType::String).with_length(200).required());

        db.create_entity(&entity).await.unwrap();
        let loaded = db.get_entity(entity.id).await.unwrap().unwrap();

        assert_eq!(loaded.entity_name, "Order");
        assert_eq!(loaded.interfaces, vec![InterfaceType::Base, InterfaceType::Audit]);
        assert_eq!(loaded.fields.len(), 1);
        assert_eq!(loaded.fields[0].length, Some(200));
        assert!(loaded.fields[0].is_required);
        assert_eq!(loaded.status, EntityStatus::Draft);
    }

    #[tokio::test]
    async fn test_duplicate_property_names_rejected() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let entity = EntityDefinition::new("Crm", "Order")
            .with_field(FieldMetadata::new("Name", FieldDataType::String))
            .with_field(FieldMetadata::new("NAME", FieldDataType::Text));

        let err = db.create_entity(&entity).await.unwrap_err();
        assert!(err.to_string().contains("Duplicate property name"));
    }

    #[tokio::test]
    async fn test_lookup_by_name_is_case_insensitive() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let entity = EntityDefinition::new("Crm", "Customer");
        db.create_entity(&entity).await.unwrap();

        let found = db.get_entity_by_name("customer").await.unwrap();
        assert_eq!(found.map(|e| e.id), Some(entity.id));
    }

    #[tokio::test]
    async fn test_delete_refuses_referenced_entity() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let customer = EntityDefinition::new("Crm", "Customer");
        let order = EntityDefinition::new("Crm", "Order").with_field(
            FieldMetadata::new("CustomerId", FieldDataType::Guid)
                .with_lookup("Customer", ForeignKeyAction::Restrict),
        );
        db.create_entity(&customer).await.unwrap();
        db.create_entity(&order).await.unwrap();

        let err = db.delete_entity(customer.id).await.unwrap_err();
        assert!(err.to_string().contains("referenced by Order"));

        db.delete_entity(order.id).await.unwrap();
        db.delete_entity(customer.id).await.unwrap();
        assert!(db.list_entities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_referencing_entities_match_full_type_name() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let customer = EntityDefinition::new("Crm", "Customer");
        let order = EntityDefinition::new("Crm", "Order").with_field(
            FieldMetadata::new("CustomerId", FieldDataType::Guid)
                .with_lookup("crm.customer", ForeignKeyAction::Restrict),
        );
        let other = EntityDefinition::new("Sales", "Quote").with_field(
            FieldMetadata::new("CustomerId", FieldDataType::Guid)
                .with_lookup("Sales.Customer", ForeignKeyAction::Restrict),
        );
        db.create_entity(&customer).await.unwrap();
        db.create_entity(&order).await.unwrap();
        db.create_entity(&other).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let referrers = super::fetch_referencing_entities(&mut conn, &customer).await.unwrap();
        let names: Vec<&str> = referrers.iter().map(|e| e.entity_name.as_str()).collect();
        assert_eq!(names, vec!["Order"]);
    }

    #[tokio::test]
    async fn test_enum_round_trip() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let def = EnumDefinition::new("order_state")
            .with_option("open", "Open")
            .with_option("closed", "Closed");
        db.save_enum(&def).await.unwrap();

        let loaded = db.get_enum(def.id).await.unwrap().unwrap();
        assert_eq!(loaded.options.len(), 2);
        assert!(loaded.is_enabled);
    }
}
