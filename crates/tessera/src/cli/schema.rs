//! Live-schema commands: align, impact, history.

use crate::cli::context::AppContext;
use crate::cli::error::HelpfulError;
use crate::cli::manifest::{self, EnumManifest};
use crate::cli::output::{color_for_risk, color_for_script, format_time, format_time_absolute, print_table_colored, sql_summary};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tessera_db::{EntityDefinition, EnumDefinition, FieldMetadata};
use tessera_schema::{AlignmentStatus, DdlExecutor, MigrationEvaluator, SchemaAlignment};

#[derive(Debug, clap::Args)]
pub struct AlignArgs {
    /// Entity id or name; all Published custom entities when omitted
    pub entity: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct ImpactArgs {
    /// Entity id or name
    pub entity: String,

    /// Manifest holding the proposed field list for this entity
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Field to remove from the proposed list (repeatable)
    #[arg(long = "drop")]
    pub drop: Vec<String>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Args)]
pub struct HistoryArgs {
    /// Entity id or name
    pub entity: String,

    /// Print full SQL of every script
    #[arg(long)]
    pub sql: bool,

    #[arg(long)]
    pub json: bool,
}

// =============================================================================
// ALIGN
// =============================================================================

pub async fn run_align(ctx: &AppContext, args: AlignArgs) -> Result<()> {
    let alignment = SchemaAlignment::new(ctx.db.clone());

    let Some(key) = args.entity else {
        let summary = alignment.align_all_published_entities(ctx.actor()).await?;
        println!(
            "Aligned: {}  Already aligned: {}  Failed: {}",
            summary.aligned, summary.already_aligned, summary.failed
        );
        for (entity, error) in &summary.failures {
            eprintln!("  {}: {}", entity, error);
        }
        if summary.failed > 0 {
            return Err(HelpfulError::new(format!("{} entity table(s) could not be aligned", summary.failed))
                .with_suggestion("TRY: Align one entity to see its DDL: tessera align <entity>")
                .into());
        }
        return Ok(());
    };

    let entity = ctx.resolve_entity(&key).await?;
    let outcome = alignment
        .align_entity_schema(&entity, ctx.actor())
        .await
        .with_context(|| format!("Failed to align '{}'", entity.entity_name))?;

    for warning in &outcome.warnings {
        eprintln!("Warning: {}", warning);
    }
    match outcome.status {
        AlignmentStatus::AlreadyAligned => println!("{} is already aligned.", entity.table_name()),
        AlignmentStatus::Aligned => {
            println!(
                "Aligned {}: {}",
                entity.table_name(),
                if outcome.added_columns.is_empty() {
                    "table created".to_string()
                } else {
                    format!("added {}", outcome.added_columns.join(", "))
                }
            );
        }
    }
    Ok(())
}

// =============================================================================
// IMPACT
// =============================================================================

pub async fn run_impact(ctx: &AppContext, args: ImpactArgs) -> Result<()> {
    let entity = ctx.resolve_entity(&args.entity).await?;

    let mut proposed = match &args.manifest {
        Some(path) => proposed_from_manifest(path, &entity)?,
        None => entity.fields.clone(),
    };
    proposed.retain(|f| !args.drop.iter().any(|name| f.name_matches(name)));

    let impact = MigrationEvaluator::new(ctx.db.clone())
        .with_dialect(ctx.config.publishing.dialect)
        .evaluate_impact(entity.id, &proposed)
        .await
        .with_context(|| format!("Failed to evaluate impact for '{}'", entity.entity_name))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&impact)?);
        return Ok(());
    }

    println!(
        "{} ({} rows): risk {}, {}",
        impact.table_name,
        impact.affected_rows,
        impact.risk_level,
        if impact.is_safe { "safe" } else { "NOT safe" }
    );
    if !impact.operations.is_empty() {
        let rows = impact
            .operations
            .iter()
            .map(|op| {
                vec![
                    (format!("{:?}", op.operation_type), None),
                    (op.field_name.clone(), None),
                    (op.risk.to_string(), Some(color_for_risk(op.risk))),
                    (if op.may_lose_data { "yes" } else { "no" }.to_string(), None),
                    (op.description.clone(), None),
                ]
            })
            .collect();
        print_table_colored(&["OPERATION", "FIELD", "RISK", "DATA LOSS", "DESCRIPTION"], rows);
    }
    for warning in &impact.warnings {
        println!("Warning: {}", warning);
    }
    for error in &impact.errors {
        println!("Error: {}", error);
    }
    Ok(())
}

fn proposed_from_manifest(path: &Path, entity: &EntityDefinition) -> Result<Vec<FieldMetadata>> {
    let text = std::fs::read_to_string(path).map_err(|_| HelpfulError::manifest_not_found(path))?;
    let parsed =
        manifest::parse_manifest(&text).map_err(|e| HelpfulError::manifest_parse_error(path, &e.to_string()))?;
    let enums: Vec<EnumDefinition> = parsed.enums.iter().map(EnumManifest::to_definition).collect();
    let codes = manifest::enum_codes(&enums);

    let spec = parsed
        .entities
        .iter()
        .find(|e| e.entity_name.eq_ignore_ascii_case(&entity.entity_name))
        .ok_or_else(|| {
            HelpfulError::new(format!("Manifest has no entry for '{}'", entity.entity_name))
                .with_context(format!("Manifest: {}", path.display()))
        })?;
    Ok(spec.to_definition(&codes, entity.parent_entity_id, Some(entity))?.fields)
}

// =============================================================================
// HISTORY
// =============================================================================

pub async fn run_history(ctx: &AppContext, args: HistoryArgs) -> Result<()> {
    let entity = ctx.resolve_entity(&args.entity).await?;
    let history = DdlExecutor::new(ctx.db.clone()).history(entity.id).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("No DDL recorded for {}.", entity.full_type_name());
        return Ok(());
    }

    if args.sql {
        for script in &history {
            println!(
                "-- {} {} {} by {}",
                format_time_absolute(script.created_at),
                script.script_type,
                script.status,
                script.created_by.as_deref().unwrap_or("-")
            );
            if let Some(error) = &script.error_message {
                println!("-- error: {}", error);
            }
            println!("{}", script.sql_script);
            println!();
        }
        return Ok(());
    }

    let rows: Vec<Vec<(String, Option<comfy_table::Color>)>> = history
        .iter()
        .map(|s| {
            vec![
                (format_time(s.created_at), None),
                (s.script_type.to_string(), None),
                (s.status.to_string(), Some(color_for_script(s.status))),
                (s.created_by.clone().unwrap_or_default(), None),
                (sql_summary(&s.sql_script, 50), None),
                (s.error_message.clone().unwrap_or_default(), None),
            ]
        })
        .collect();
    print_table_colored(&["WHEN", "TYPE", "STATUS", "BY", "SQL", "ERROR"], rows);
    Ok(())
}
