//! Form templates and menu registration for published entities.
//!
//! The orchestrator calls a [`TemplateProvisioner`] on its own transaction
//! connection, so provisioning commits or rolls back with the publish.
//! [`SqliteProvisioner`] is the default implementation, writing to the
//! `form_templates`, `template_bindings` and `function_nodes` tables.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tessera_db::{
    EntityDefinition, EntitySource, FieldMetadata, FormTemplate, FunctionNode, TemplateBinding, TemplateUsage,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const ROOT_FUNCTION_CODE: &str = "APP.ROOT";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

#[derive(Debug, Clone, Default)]
pub struct TemplateProvisioning {
    pub templates: Vec<FormTemplate>,
    pub bindings: Vec<TemplateBinding>,
    pub created: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuRegistration {
    pub function_node_id: Uuid,
    pub function_code: String,
    pub domain_code: String,
}

#[async_trait]
pub trait TemplateProvisioner: Send + Sync {
    /// Create or refresh the default Detail/Edit/List templates and bind
    /// them. With `force`, existing bindings are repointed at the defaults.
    async fn ensure_templates(
        &self,
        conn: &mut SqliteConnection,
        entity: &EntityDefinition,
        actor: Option<&str>,
        force: bool,
    ) -> Result<TemplateProvisioning>;

    /// Find or create the entity's function node. Idempotent.
    async fn register_menu(
        &self,
        conn: &mut SqliteConnection,
        entity: &EntityDefinition,
        actor: Option<&str>,
    ) -> Result<MenuRegistration>;
}

// ============================================================================
// Naming
// ============================================================================

pub fn domain_code(entity: &EntityDefinition) -> &'static str {
    match entity.source {
        EntitySource::System => "SYS",
        EntitySource::Custom => "CUSTOM",
    }
}

fn code_segment(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "ENTITY".to_string();
    }
    trimmed.replace(['-', ' '], "_").to_uppercase()
}

/// `<domain>.ENTITY.<ROUTE>`
pub fn entity_function_code(entity: &EntityDefinition) -> String {
    let segment = if entity.entity_route.trim().is_empty() {
        code_segment(&entity.entity_name)
    } else {
        code_segment(&entity.entity_route)
    };
    format!("{}.ENTITY.{}", domain_code(entity), segment)
}

fn layout_json(entity: &EntityDefinition, usage: TemplateUsage) -> Result<String> {
    let mut fields: Vec<&FieldMetadata> = entity.fields.iter().collect();
    fields.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.property_name.cmp(&b.property_name))
    });

    let columns = if usage == TemplateUsage::List { 4 } else { 2 };
    let width = 100 / columns;
    let items: Vec<serde_json::Value> = fields
        .iter()
        .enumerate()
        .map(|(order, field)| {
            json!({
                "field": field.property_name,
                "label": field.display_name.as_deref().unwrap_or(&field.property_name),
                "dataType": field.data_type.as_str(),
                "required": field.is_required,
                "widthPercent": width,
                "order": order,
            })
        })
        .collect();

    Ok(serde_json::to_string(&json!({
        "usage": usage.as_str(),
        "columns": columns,
        "items": items,
    }))?)
}

// ============================================================================
// Queries
// ============================================================================

pub async fn count_templates(conn: &mut SqliteConnection, entity_type: &str) -> std::result::Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM form_templates WHERE entity_type = ?")
        .bind(entity_type)
        .fetch_one(&mut *conn)
        .await
}

pub async fn fetch_templates(conn: &mut SqliteConnection, entity_type: &str) -> Result<Vec<FormTemplate>> {
    let rows = sqlx::query(
        "SELECT id, entity_type, usage_type, name, layout_json, is_system_default \
         FROM form_templates WHERE entity_type = ? ORDER BY usage_type, name",
    )
    .bind(entity_type)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(row_to_template).collect()
}

pub async fn fetch_bindings(conn: &mut SqliteConnection, entity_type: &str) -> Result<Vec<TemplateBinding>> {
    let rows = sqlx::query(
        "SELECT id, entity_type, usage_type, template_id FROM template_bindings WHERE entity_type = ? ORDER BY usage_type",
    )
    .bind(entity_type)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(row_to_binding).collect()
}

pub async fn fetch_function_node(conn: &mut SqliteConnection, code: &str) -> Result<Option<FunctionNode>> {
    let row = sqlx::query(
        "SELECT id, parent_id, code, name, route, icon, is_menu, sort_order FROM function_nodes WHERE code = ?",
    )
    .bind(code)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(row_to_node).transpose()
}

pub async fn fetch_function_nodes(conn: &mut SqliteConnection) -> Result<Vec<FunctionNode>> {
    let rows = sqlx::query(
        "SELECT id, parent_id, code, name, route, icon, is_menu, sort_order FROM function_nodes ORDER BY code",
    )
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(row_to_node).collect()
}

fn parse_id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| ProvisionError::InvalidData(format!("id '{}': {}", value, e)))
}

fn parse_usage(value: &str) -> Result<TemplateUsage> {
    TemplateUsage::parse(value).ok_or_else(|| ProvisionError::InvalidData(format!("usage type '{}'", value)))
}

fn row_to_template(row: &SqliteRow) -> Result<FormTemplate> {
    Ok(FormTemplate {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        entity_type: row.try_get("entity_type")?,
        usage_type: parse_usage(&row.try_get::<String, _>("usage_type")?)?,
        name: row.try_get("name")?,
        layout_json: row.try_get("layout_json")?,
        is_system_default: row.try_get("is_system_default")?,
    })
}

fn row_to_binding(row: &SqliteRow) -> Result<TemplateBinding> {
    Ok(TemplateBinding {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        entity_type: row.try_get("entity_type")?,
        usage_type: parse_usage(&row.try_get::<String, _>("usage_type")?)?,
        template_id: parse_id(&row.try_get::<String, _>("template_id")?)?,
    })
}

fn row_to_node(row: &SqliteRow) -> Result<FunctionNode> {
    let parent: Option<String> = row.try_get("parent_id")?;
    Ok(FunctionNode {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        parent_id: parent.as_deref().map(parse_id).transpose()?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        route: row.try_get("route")?,
        icon: row.try_get("icon")?,
        is_menu: row.try_get("is_menu")?,
        sort_order: row.try_get("sort_order")?,
    })
}

// ============================================================================
// Default implementation
// ============================================================================

/// Provisioner backed by the metadata database's own tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProvisioner;

impl SqliteProvisioner {
    pub fn new() -> Self {
        Self
    }

    async fn find_system_template(
        conn: &mut SqliteConnection,
        entity_type: &str,
        usage: TemplateUsage,
    ) -> Result<Option<FormTemplate>> {
        let row = sqlx::query(
            "SELECT id, entity_type, usage_type, name, layout_json, is_system_default \
             FROM form_templates WHERE entity_type = ? AND usage_type = ? AND is_system_default = 1",
        )
        .bind(entity_type)
        .bind(usage.as_str())
        .fetch_optional(&mut *conn)
        .await?;
        row.as_ref().map(row_to_template).transpose()
    }

    async fn bind(
        conn: &mut SqliteConnection,
        template: &FormTemplate,
        actor: Option<&str>,
        force: bool,
    ) -> Result<TemplateBinding> {
        let existing = sqlx::query(
            "SELECT id, entity_type, usage_type, template_id FROM template_bindings \
             WHERE entity_type = ? AND usage_type = ?",
        )
        .bind(&template.entity_type)
        .bind(template.usage_type.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = existing {
            let mut binding = row_to_binding(&row)?;
            if force && binding.template_id != template.id {
                sqlx::query("UPDATE template_bindings SET template_id = ?, updated_by = ?, updated_at = ? WHERE id = ?")
                    .bind(template.id.to_string())
                    .bind(actor)
                    .bind(Utc::now())
                    .bind(binding.id.to_string())
                    .execute(&mut *conn)
                    .await?;
                binding.template_id = template.id;
            }
            return Ok(binding);
        }

        let binding = TemplateBinding {
            id: Uuid::new_v4(),
            entity_type: template.entity_type.clone(),
            usage_type: template.usage_type,
            template_id: template.id,
        };
        sqlx::query(
            "INSERT INTO template_bindings (id, entity_type, usage_type, template_id, updated_by, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(binding.id.to_string())
        .bind(&binding.entity_type)
        .bind(binding.usage_type.as_str())
        .bind(binding.template_id.to_string())
        .bind(actor)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
        Ok(binding)
    }

    /// Find a node by code or create it under `parent`.
    async fn ensure_node(
        conn: &mut SqliteConnection,
        parent: Option<Uuid>,
        code: &str,
        name: &str,
        route: Option<&str>,
        icon: &str,
        sort_order: i32,
    ) -> Result<FunctionNode> {
        if let Some(mut node) = fetch_function_node(conn, code).await? {
            let route = route.map(str::to_string);
            if node.parent_id != parent || node.name != name || node.route != route {
                sqlx::query("UPDATE function_nodes SET parent_id = ?, name = ?, route = ? WHERE id = ?")
                    .bind(parent.map(|id| id.to_string()))
                    .bind(name)
                    .bind(&route)
                    .bind(node.id.to_string())
                    .execute(&mut *conn)
                    .await?;
                node.parent_id = parent;
                node.name = name.to_string();
                node.route = route;
            }
            return Ok(node);
        }

        let node = FunctionNode {
            id: Uuid::new_v4(),
            parent_id: parent,
            code: code.to_string(),
            name: name.to_string(),
            route: route.map(str::to_string),
            icon: Some(icon.to_string()),
            is_menu: true,
            sort_order,
        };
        sqlx::query(
            "INSERT INTO function_nodes (id, parent_id, code, name, route, icon, is_menu, sort_order, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(node.id.to_string())
        .bind(node.parent_id.map(|id| id.to_string()))
        .bind(&node.code)
        .bind(&node.name)
        .bind(&node.route)
        .bind(&node.icon)
        .bind(node.is_menu)
        .bind(node.sort_order)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
        debug!(code = %node.code, "Function node created");
        Ok(node)
    }
}

#[async_trait]
impl TemplateProvisioner for SqliteProvisioner {
    async fn ensure_templates(
        &self,
        conn: &mut SqliteConnection,
        entity: &EntityDefinition,
        actor: Option<&str>,
        force: bool,
    ) -> Result<TemplateProvisioning> {
        let entity_type = entity.full_type_name();
        let mut result = TemplateProvisioning::default();

        if entity.fields.is_empty() {
            warn!(entity = %entity_type, "Entity has no fields; skipping template generation");
            return Ok(result);
        }

        for usage in TemplateUsage::ALL {
            let layout = layout_json(entity, usage)?;
            let template = match Self::find_system_template(conn, &entity_type, usage).await? {
                Some(mut template) => {
                    if force || template.layout_json != layout {
                        sqlx::query("UPDATE form_templates SET layout_json = ?, updated_at = ? WHERE id = ?")
                            .bind(&layout)
                            .bind(Utc::now())
                            .bind(template.id.to_string())
                            .execute(&mut *conn)
                            .await?;
                        template.layout_json = layout;
                        result.updated += 1;
                    }
                    template
                }
                None => {
                    let template = FormTemplate {
                        id: Uuid::new_v4(),
                        entity_type: entity_type.clone(),
                        usage_type: usage,
                        name: format!("{} {} Template", entity.entity_name, usage),
                        layout_json: layout,
                        is_system_default: true,
                    };
                    let now = Utc::now();
                    sqlx::query(
                        "INSERT INTO form_templates (id, entity_type, usage_type, name, layout_json, \
                         is_system_default, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)",
                    )
                    .bind(template.id.to_string())
                    .bind(&template.entity_type)
                    .bind(usage.as_str())
                    .bind(&template.name)
                    .bind(&template.layout_json)
                    .bind(actor)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *conn)
                    .await?;
                    result.created += 1;
                    template
                }
            };

            let binding = Self::bind(conn, &template, actor, force).await?;
            result.templates.push(template);
            result.bindings.push(binding);
        }

        info!(
            entity = %entity_type,
            created = result.created,
            updated = result.updated,
            "Default templates ensured"
        );
        Ok(result)
    }

    async fn register_menu(
        &self,
        conn: &mut SqliteConnection,
        entity: &EntityDefinition,
        _actor: Option<&str>,
    ) -> Result<MenuRegistration> {
        let domain = domain_code(entity);
        let domain_name = match entity.source {
            EntitySource::System => "System",
            EntitySource::Custom => "Custom",
        };

        let root = Self::ensure_node(conn, None, ROOT_FUNCTION_CODE, "Application", None, "appstore", 0).await?;
        let domain_node = Self::ensure_node(conn, Some(root.id), domain, domain_name, None, "appstore", 10).await?;
        let module_code = format!("{}.ENTITY", domain);
        let module = Self::ensure_node(
            conn,
            Some(domain_node.id),
            &module_code,
            "Business Entities",
            None,
            "database",
            domain_node.sort_order + 1,
        )
        .await?;

        let code = entity_function_code(entity);
        let route = format!("/dynamic-entity/{}", entity.full_type_name());
        let node = Self::ensure_node(
            conn,
            Some(module.id),
            &code,
            entity.display_label(),
            Some(&route),
            "appstore",
            module.sort_order + 10,
        )
        .await?;

        info!(entity = %entity.entity_name, code = %node.code, "Menu registered");
        Ok(MenuRegistration {
            function_node_id: node.id,
            function_code: node.code,
            domain_code: domain.to_string(),
        })
    }
}
