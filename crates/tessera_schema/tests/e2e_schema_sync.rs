//! End-to-end tests for schema synchronization around published entities:
//! alignment, migration impact, locking and field deletion.

use tessera_db::{
    EntityDefinition, EntityStatus, FieldDataType, FieldMetadata, FieldSource, MetaDb, ScriptStatus, ScriptType,
};
use tessera_schema::{
    execution, AlignmentError, AlignmentStatus, DdlExecutor, EntityLockService, LockError, MigrationEvaluator,
    MigrationOperationType, PublishingConfig, PublishingService, RiskLevel, SchemaAlignment, SqlDialect,
    WithdrawalMode,
};

async fn published_order(db: &MetaDb) -> EntityDefinition {
    let entity = EntityDefinition::new("Crm", "Order")
        .with_field(FieldMetadata::new("Name", FieldDataType::String).with_length(200).required())
        .with_field(FieldMetadata::new("Notes", FieldDataType::Text));
    db.create_entity(&entity).await.unwrap();

    let result = PublishingService::new(db.clone(), PublishingConfig::default())
        .publish_new(entity.id, None)
        .await;
    assert!(result.success, "{:?}", result.error_message());
    db.get_entity(entity.id).await.unwrap().unwrap()
}

async fn insert_orders(db: &MetaDb, count: usize) {
    for i in 0..count {
        sqlx::query(r#"INSERT INTO "Orders" ("Name") VALUES (?)"#)
            .bind(format!("order-{}", i))
            .execute(db.pool())
            .await
            .unwrap();
    }
}

async fn live_columns(db: &MetaDb, table: &str) -> Vec<String> {
    let mut conn = db.pool().acquire().await.unwrap();
    execution::table_columns(&mut conn, table)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect()
}

// =============================================================================
// ALIGNMENT
// =============================================================================

#[tokio::test]
async fn test_extra_live_column_is_reported_not_dropped() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let entity = published_order(&db).await;
    sqlx::query(r#"ALTER TABLE "Orders" ADD COLUMN "Legacy" TEXT"#)
        .execute(db.pool())
        .await
        .unwrap();

    let outcome = SchemaAlignment::new(db.clone())
        .align_entity_schema(&entity, None)
        .await
        .unwrap();

    assert_eq!(outcome.status, AlignmentStatus::AlreadyAligned);
    assert!(outcome.scripts.is_empty());
    assert!(outcome.warnings.iter().any(|w| w.contains("Legacy")));
    assert!(live_columns(&db, "Orders").await.contains(&"Legacy".to_string()));
    assert_eq!(db.ddl_history(entity.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_column_is_added_with_backfill() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let mut entity = published_order(&db).await;
    insert_orders(&db, 2).await;

    entity.fields.push(FieldMetadata::new("Priority", FieldDataType::Integer).required());
    db.save_entity(&entity).await.unwrap();

    let outcome = SchemaAlignment::new(db.clone())
        .align_entity_schema(&entity, Some("ops"))
        .await
        .unwrap();

    assert_eq!(outcome.status, AlignmentStatus::Aligned);
    assert_eq!(outcome.added_columns, vec!["Priority"]);
    assert!(outcome.scripts.iter().all(|s| s.status == ScriptStatus::Success));

    let nulls: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "Orders" WHERE "Priority" IS NULL"#)
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(nulls, 0);
}

#[tokio::test]
async fn test_missing_table_is_created() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let entity = published_order(&db).await;
    sqlx::query(r#"DROP TABLE "Orders""#).execute(db.pool()).await.unwrap();

    let alignment = SchemaAlignment::new(db.clone());
    let outcome = alignment.align_entity_schema(&entity, None).await.unwrap();
    assert_eq!(outcome.status, AlignmentStatus::Aligned);
    assert_eq!(outcome.scripts[0].script_type, ScriptType::Create);

    let again = alignment.align_entity_schema(&entity, None).await.unwrap();
    assert_eq!(again.status, AlignmentStatus::AlreadyAligned);
}

#[tokio::test]
async fn test_align_all_counts_outcomes() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let mut entity = published_order(&db).await;
    entity.fields.push(FieldMetadata::new("Region", FieldDataType::String).with_length(50));
    db.save_entity(&entity).await.unwrap();

    let summary = SchemaAlignment::new(db.clone())
        .align_all_published_entities(None)
        .await
        .unwrap();
    assert_eq!(summary.aligned, 1);
    assert_eq!(summary.failed, 0);

    let summary = SchemaAlignment::new(db.clone())
        .align_all_published_entities(None)
        .await
        .unwrap();
    assert_eq!(summary.already_aligned, 1);
}

// =============================================================================
// MIGRATION IMPACT
// =============================================================================

#[tokio::test]
async fn test_nullable_add_is_low_risk() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let entity = published_order(&db).await;
    insert_orders(&db, 3).await;

    let mut proposed = entity.fields.clone();
    proposed.push(FieldMetadata::new("Comment", FieldDataType::String).with_length(500));
    let impact = MigrationEvaluator::new(db.clone())
        .evaluate_impact(entity.id, &proposed)
        .await
        .unwrap();

    assert_eq!(impact.affected_rows, 3);
    assert_eq!(impact.operations.len(), 1);
    assert_eq!(impact.operations[0].operation_type, MigrationOperationType::AddColumn);
    assert_eq!(impact.risk_level, RiskLevel::Low);
    assert!(impact.is_safe);
}

#[tokio::test]
async fn test_shortening_with_rows_may_lose_data() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let entity = published_order(&db).await;
    insert_orders(&db, 5).await;

    let mut proposed = entity.fields.clone();
    proposed[0].length = Some(100);
    let impact = MigrationEvaluator::new(db.clone())
        .with_dialect(SqlDialect::Postgres)
        .evaluate_impact(entity.id, &proposed)
        .await
        .unwrap();

    let op = &impact.operations[0];
    assert_eq!(op.operation_type, MigrationOperationType::AlterColumn);
    assert!(op.may_lose_data);
    assert!(op.description.contains("length changed from 200 to 100"));
    assert!(impact.risk_level >= RiskLevel::High);
    assert!(!impact.is_safe);
}

#[tokio::test]
async fn test_drop_with_rows_is_data_loss() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let entity = published_order(&db).await;
    insert_orders(&db, 4).await;

    let proposed = vec![entity.fields[0].clone()];
    let impact = MigrationEvaluator::new(db.clone())
        .evaluate_impact(entity.id, &proposed)
        .await
        .unwrap();

    assert_eq!(impact.operations[0].operation_type, MigrationOperationType::DropColumn);
    assert!(impact.has_data_loss());
    assert!(impact.errors.iter().any(|e| e.contains("data loss for 4 rows")));
    assert_eq!(impact.risk_level, RiskLevel::Critical);
}

#[tokio::test]
async fn test_draft_entity_has_no_affected_rows() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let entity = EntityDefinition::new("Crm", "Lead")
        .with_field(FieldMetadata::new("Name", FieldDataType::String).with_length(100));
    db.create_entity(&entity).await.unwrap();

    let impact = MigrationEvaluator::new(db.clone())
        .evaluate_impact(entity.id, &[])
        .await
        .unwrap();
    assert_eq!(impact.affected_rows, 0);
    assert!(impact.operations.is_empty());
    assert!(impact.is_safe);
}

// =============================================================================
// LOCKING
// =============================================================================

#[tokio::test]
async fn test_lock_info_after_publish() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let entity = published_order(&db).await;
    let locks = EntityLockService::new(db.clone());

    let info = locks.lock_info(entity.id).await.unwrap();
    assert!(info.is_locked);
    assert!(info.reasons.contains(&"Entity is Published".to_string()));
    assert!(info.reasons.iter().any(|r| r.starts_with("3 form template(s)")));

    let check = locks.can_modify_property(entity.id, "EntityName").await.unwrap();
    assert!(!check.allowed);
    assert!(locks.can_modify_property(entity.id, "DisplayName").await.unwrap().allowed);

    locks.unlock_entity(entity.id).await.unwrap();
    assert!(!locks.is_entity_locked(entity.id).await.unwrap());
}

#[tokio::test]
async fn test_hierarchy_lock_on_publish() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let parent = EntityDefinition::new("Crm", "Order")
        .with_field(FieldMetadata::new("Name", FieldDataType::String).with_length(200));
    let child = EntityDefinition::new("Crm", "OrderLine")
        .with_parent(parent.id)
        .with_field(FieldMetadata::new("Sku", FieldDataType::String).with_length(50));
    db.create_entity(&parent).await.unwrap();
    db.create_entity(&child).await.unwrap();

    let config = PublishingConfig {
        lock_hierarchy: true,
        ..Default::default()
    };
    let result = PublishingService::new(db.clone(), config).publish_new(parent.id, None).await;
    assert!(result.success, "{:?}", result.error_message());

    let child = db.get_entity(child.id).await.unwrap().unwrap();
    assert!(child.is_locked);
    assert_eq!(child.status, EntityStatus::Draft);
}

// =============================================================================
// FIELD DELETION
// =============================================================================

#[tokio::test]
async fn test_physical_field_deletion_drops_column() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let entity = published_order(&db).await;

    let outcome = SchemaAlignment::new(db.clone())
        .delete_field(entity.id, "Notes", WithdrawalMode::Physical, Some("ops"))
        .await
        .unwrap();

    assert!(outcome.dropped_column);
    assert!(outcome.entity.field("Notes").is_none());
    assert!(!live_columns(&db, "Orders").await.contains(&"Notes".to_string()));

    let history = DdlExecutor::new(db.clone()).history(entity.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|s| s.script_type == ScriptType::Alter).count(), 1);
}

#[tokio::test]
async fn test_logical_field_deletion_keeps_column() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let entity = published_order(&db).await;

    let outcome = SchemaAlignment::new(db.clone())
        .delete_field(entity.id, "notes", WithdrawalMode::Logical, None)
        .await
        .unwrap();

    assert!(!outcome.dropped_column);
    assert!(outcome.script.is_none());
    assert!(live_columns(&db, "Orders").await.contains(&"Notes".to_string()));
    let stored = db.get_entity(entity.id).await.unwrap().unwrap();
    assert_eq!(stored.fields.len(), 1);
    assert_eq!(stored.status, EntityStatus::Published);
}

#[tokio::test]
async fn test_protected_field_cannot_be_deleted() {
    let db = MetaDb::open_in_memory().await.unwrap();
    let entity = EntityDefinition::new("Crm", "Account").with_field(
        FieldMetadata::new("Code", FieldDataType::String)
            .with_length(50)
            .with_source(FieldSource::System),
    );
    db.create_entity(&entity).await.unwrap();

    let alignment = SchemaAlignment::new(db.clone());
    let err = alignment
        .delete_field(entity.id, "Code", WithdrawalMode::Physical, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AlignmentError::Lock(LockError::FieldProtectedBySource(_))));

    let err = alignment
        .delete_field(entity.id, "Missing", WithdrawalMode::Logical, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AlignmentError::FieldNotFound { .. }));
}
