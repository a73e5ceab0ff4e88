//! Entity commands: import, list, show, ddl.

use crate::cli::context::AppContext;
use crate::cli::error::HelpfulError;
use crate::cli::manifest::{self, EnumManifest};
use crate::cli::output::{color_for_status, format_time, print_table, print_table_colored};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tessera_db::{EntityDefinition, EntityStatus, EnumDefinition};
use tessera_schema::{DdlSynthesizer, EntityLockService, EntityStore, SqlDialect};
use tracing::info;

#[derive(Debug, clap::Args)]
pub struct ImportArgs {
    /// JSON manifest of entities (and optionally enums)
    pub file: PathBuf,

    /// Update entities that already exist instead of failing
    #[arg(long)]
    pub update: bool,
}

#[derive(Debug, clap::Args)]
pub struct ListArgs {
    /// Only entities in this status (Draft, Published, Modified, Withdrawn)
    #[arg(long)]
    pub status: Option<EntityStatus>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Args)]
pub struct ShowArgs {
    /// Entity id or name
    pub entity: String,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Args)]
pub struct DdlArgs {
    /// Entity id or name
    pub entity: String,

    /// SQL dialect (defaults to the configured one)
    #[arg(long)]
    pub dialect: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportAction {
    Created,
    Replaced,
    Modified,
}

impl ImportAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Replaced => "replaced",
            Self::Modified => "updated (Modified)",
        }
    }
}

// =============================================================================
// IMPORT
// =============================================================================

pub async fn run_import(ctx: &AppContext, args: ImportArgs) -> Result<()> {
    if !args.file.exists() {
        return Err(HelpfulError::manifest_not_found(&args.file).into());
    }
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let parsed = manifest::parse_manifest(&text)
        .map_err(|e| HelpfulError::manifest_parse_error(&args.file, &e.to_string()))?;

    let enums: Vec<EnumDefinition> = parsed.enums.iter().map(EnumManifest::to_definition).collect();
    for definition in &enums {
        ctx.db.save_enum(definition).await?;
    }
    let codes = manifest::enum_codes(&enums);

    let store = EntityStore::new(ctx.db.clone());
    let mut rows = Vec::new();
    for spec in &parsed.entities {
        let parent_id = match &spec.parent {
            Some(name) => Some(ctx.resolve_entity(name).await?.id),
            None => None,
        };

        let existing = ctx.db.get_entity_by_name(&spec.entity_name).await?;
        let (entity, action) = match existing {
            None => {
                let entity = spec.to_definition(&codes, parent_id, None)?;
                ctx.db.create_entity(&entity).await?;
                (entity, ImportAction::Created)
            }
            Some(existing) if !args.update => {
                return Err(HelpfulError::entity_exists(&existing.entity_name).into());
            }
            Some(existing) if matches!(existing.status, EntityStatus::Published | EntityStatus::Modified) => {
                let update = spec.to_update(&codes, &existing)?;
                let entity = store
                    .apply_update(existing.id, &update, ctx.actor())
                    .await
                    .with_context(|| format!("Failed to update '{}'", existing.entity_name))?;
                (entity, ImportAction::Modified)
            }
            Some(existing) => {
                let mut entity = spec.to_definition(&codes, parent_id.or(existing.parent_entity_id), Some(&existing))?;
                entity.updated_by = ctx.actor().map(str::to_string);
                ctx.db.save_entity(&entity).await?;
                (entity, ImportAction::Replaced)
            }
        };

        info!(entity = %entity.full_type_name(), action = action.as_str(), "Imported entity");
        rows.push(vec![
            entity.full_type_name(),
            entity.status.to_string(),
            entity.fields.len().to_string(),
            action.as_str().to_string(),
        ]);
    }

    if !enums.is_empty() {
        println!("Imported {} enum definition(s).", enums.len());
    }
    if rows.is_empty() {
        println!("No entities in manifest.");
    } else {
        print_table(&["ENTITY", "STATUS", "FIELDS", "ACTION"], rows);
    }
    Ok(())
}

// =============================================================================
// LIST / SHOW
// =============================================================================

pub async fn run_list(ctx: &AppContext, args: ListArgs) -> Result<()> {
    let entities = match args.status {
        Some(status) => ctx.db.list_entities_by_status(status, None).await?,
        None => ctx.db.list_entities().await?,
    };

    if args.json {
        let items: Vec<serde_json::Value> = entities.iter().map(entity_summary_json).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if entities.is_empty() {
        println!("No entities defined.");
        println!();
        println!("Import definitions with:");
        println!("  tessera import entities.json");
        return Ok(());
    }

    let rows = entities
        .iter()
        .map(|e| {
            vec![
                (e.full_type_name(), None),
                (e.table_name(), None),
                (e.status.to_string(), Some(color_for_status(e.status))),
                (if e.is_locked { "yes" } else { "no" }.to_string(), None),
                (e.fields.len().to_string(), None),
                (format_time(e.updated_at), None),
            ]
        })
        .collect();
    print_table_colored(&["ENTITY", "TABLE", "STATUS", "LOCKED", "FIELDS", "UPDATED"], rows);
    Ok(())
}

fn entity_summary_json(entity: &EntityDefinition) -> serde_json::Value {
    serde_json::json!({
        "id": entity.id,
        "name": entity.entity_name,
        "fullTypeName": entity.full_type_name(),
        "table": entity.table_name(),
        "status": entity.status,
        "source": entity.source,
        "locked": entity.is_locked,
        "fields": entity.fields.len(),
    })
}

pub async fn run_show(ctx: &AppContext, args: ShowArgs) -> Result<()> {
    let entity = ctx.resolve_entity(&args.entity).await?;
    let lock_info = EntityLockService::new(ctx.db.clone())
        .lock_info(entity.id)
        .await
        .context("Failed to compute lock state")?;

    if args.json {
        let value = serde_json::json!({
            "entity": entity,
            "table": entity.table_name(),
            "lock": lock_info,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{} ({})", entity.full_type_name(), entity.display_label());
    println!("  Id:         {}", entity.id);
    println!("  Table:      {}", entity.table_name());
    println!("  Status:     {}", entity.status);
    println!("  Source:     {}", entity.source);
    println!("  Structure:  {}", entity.structure_type);
    let interfaces: Vec<&str> = entity.interfaces.iter().map(|i| i.as_str()).collect();
    println!("  Interfaces: {}", interfaces.join(", "));
    println!(
        "  Locked:     {}",
        if lock_info.is_locked { "yes" } else { "no" }
    );
    for reason in &lock_info.reasons {
        println!("    - {}", reason);
    }
    println!();

    if entity.fields.is_empty() {
        println!("No fields.");
        return Ok(());
    }

    let rows = entity
        .ordered_fields()
        .into_iter()
        .map(|f| {
            let size = match (f.length, f.precision, f.scale) {
                (Some(len), _, _) => len.to_string(),
                (None, Some(p), Some(s)) => format!("{},{}", p, s),
                (None, Some(p), None) => p.to_string(),
                _ => String::new(),
            };
            vec![
                f.property_name.clone(),
                f.data_type.to_string(),
                size,
                if f.is_required { "yes" } else { "" }.to_string(),
                f.default_value.clone().unwrap_or_default(),
                f.lookup_entity_name
                    .as_deref()
                    .map(|t| format!("{} ({})", t, f.foreign_key_action))
                    .unwrap_or_default(),
                f.source.to_string(),
            ]
        })
        .collect();
    print_table(&["FIELD", "TYPE", "SIZE", "REQUIRED", "DEFAULT", "LOOKUP", "SOURCE"], rows);
    Ok(())
}

// =============================================================================
// DDL PREVIEW
// =============================================================================

pub async fn run_ddl(ctx: &AppContext, args: DdlArgs) -> Result<()> {
    let dialect = match args.dialect.as_deref() {
        Some(name) => SqlDialect::parse(name).ok_or_else(|| {
            HelpfulError::new(format!("Unknown SQL dialect: '{}'", name))
                .with_suggestion("TRY: --dialect postgres or --dialect sqlite")
        })?,
        None => ctx.config.publishing.dialect,
    };
    let entity = ctx.resolve_entity(&args.entity).await?;
    let catalog = ctx.db.list_entities().await?;
    println!("{}", DdlSynthesizer::new(dialect).create_table_sql_in(&entity, &catalog));
    Ok(())
}
