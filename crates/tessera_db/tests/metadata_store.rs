//! Metadata store tests against file-backed SQLite databases.

use tempfile::TempDir;
use tessera_db::{
    entities, DdlScript, EntityDefinition, EntityStatus, FieldDataType, FieldMetadata, ForeignKeyAction,
    InterfaceType, MetaDb, ScriptStatus, ScriptType,
};

fn customer() -> EntityDefinition {
    EntityDefinition::new("Crm", "Customer")
        .with_interface(InterfaceType::Audit)
        .with_field(FieldMetadata::new("Name", FieldDataType::String).with_length(120).required())
        .with_field(FieldMetadata::new("Credit", FieldDataType::Decimal).with_precision(12, 2))
}

#[tokio::test]
async fn test_definitions_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("meta").join("tessera.sqlite3");

    let entity = customer();
    {
        let db = MetaDb::open(&path).await.unwrap();
        db.create_entity(&entity).await.unwrap();

        let mut script = DdlScript::pending(entity.id, ScriptType::Create, "CREATE TABLE x (y INTEGER);", Some("ops"));
        script.mark_success();
        let mut conn = db.pool().acquire().await.unwrap();
        tessera_db::ddl_log::insert_script(&mut conn, &script).await.unwrap();
        drop(conn);
        db.close().await;
    }

    let db = MetaDb::open_existing(&path).await.unwrap();
    let stored = db.get_entity_by_name("customer").await.unwrap().unwrap();
    assert_eq!(stored.id, entity.id);
    assert_eq!(stored.full_type_name(), entity.full_type_name());
    assert_eq!(stored.fields, entity.fields);
    assert!(stored.has_interface(InterfaceType::Audit));

    let history = db.ddl_history(entity.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ScriptStatus::Success);
    assert_eq!(history[0].created_by.as_deref(), Some("ops"));
}

#[tokio::test]
async fn test_status_queries_and_transactions() {
    let tmp = TempDir::new().unwrap();
    let db = MetaDb::open(tmp.path().join("tessera.sqlite3")).await.unwrap();

    let customer = customer();
    let invoice = EntityDefinition::new("Crm", "Invoice").with_field(
        FieldMetadata::new("CustomerId", FieldDataType::Guid).with_lookup("Customer", ForeignKeyAction::Cascade),
    );
    db.create_entity(&customer).await.unwrap();
    db.create_entity(&invoice).await.unwrap();

    // Uncommitted changes are discarded.
    {
        let mut tx = db.begin().await.unwrap();
        entities::set_entity_status(&mut tx, customer.id, EntityStatus::Published, Some("ops"))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
    }
    assert!(db
        .list_entities_by_status(EntityStatus::Published, None)
        .await
        .unwrap()
        .is_empty());

    let mut tx = db.begin().await.unwrap();
    entities::set_entity_status(&mut tx, customer.id, EntityStatus::Published, Some("ops"))
        .await
        .unwrap();
    assert!(entities::set_entity_locked(&mut tx, customer.id, true).await.unwrap());
    tx.commit().await.unwrap();

    let published = db.list_entities_by_status(EntityStatus::Published, None).await.unwrap();
    assert_eq!(published.len(), 1);
    assert!(published[0].is_locked);
    assert_eq!(published[0].updated_by.as_deref(), Some("ops"));

    let mut conn = db.pool().acquire().await.unwrap();
    let referrers = entities::fetch_referencing_entities(&mut conn, &published[0]).await.unwrap();
    assert_eq!(referrers.len(), 1);
    assert_eq!(referrers[0].entity_name, "Invoice");
}
