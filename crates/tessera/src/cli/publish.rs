//! Lifecycle commands: publish, publish-changes, withdraw.

use crate::cli::context::AppContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{color_for_script, print_table_colored, sql_summary};
use anyhow::Result;
use tessera_schema::{CascadeAction, PublishResult, WithdrawalMode};

#[derive(Debug, clap::Args)]
pub struct EntityArg {
    /// Entity id or name
    pub entity: String,
}

#[derive(Debug, clap::Args)]
pub struct WithdrawArgs {
    /// Entity id or name
    pub entity: String,

    /// logical (keep the table) or physical (drop it); defaults to config
    #[arg(long)]
    pub mode: Option<String>,
}

pub async fn run_publish(ctx: &AppContext, args: EntityArg) -> Result<()> {
    let entity = ctx.resolve_entity(&args.entity).await?;
    let result = ctx.publishing().publish_new(entity.id, ctx.actor()).await;
    report(&result, "Publish", &entity.entity_name)?;

    for step in &result.cascaded {
        let verb = match step.action {
            CascadeAction::Created => "published dependency",
            CascadeAction::Republished => "republished dependency",
        };
        println!("  {} {}", verb, step.entity_name);
    }
    if let Some(templates) = &result.templates {
        println!(
            "  form templates: {} created, {} refreshed",
            templates.created, templates.updated
        );
    }
    if let Some(menu) = &result.menu {
        println!("  menu node: {}", menu.function_code);
    }
    print_compile(&result);
    println!("Published {}.", entity.full_type_name());
    Ok(())
}

pub async fn run_publish_changes(ctx: &AppContext, args: EntityArg) -> Result<()> {
    let entity = ctx.resolve_entity(&args.entity).await?;
    let result = ctx.publishing().publish_changes(entity.id, ctx.actor()).await;
    report(&result, "Publish changes", &entity.entity_name)?;

    if let Some(analysis) = &result.change_analysis {
        for field in &analysis.new_fields {
            println!("  added column {}", field.property_name);
        }
        for (field, length) in &analysis.length_increases {
            println!("  widened {} to {}", field.property_name, length);
        }
        for (field, length) in &analysis.length_decreases {
            println!("  ignored shortening of {} to {}", field.property_name, length);
        }
        for change in &analysis.type_changes {
            println!(
                "  kept {} as {} (metadata says {}{})",
                change.field.property_name,
                change.live_type,
                change.field.data_type,
                if change.lossy { ", lossy" } else { "" }
            );
        }
        for column in &analysis.removed_columns {
            println!("  kept column {} (no longer in metadata)", column);
        }
        if analysis.is_empty() {
            println!("  no schema changes");
        }
    }
    print_compile(&result);
    println!("Published changes to {}.", entity.full_type_name());
    Ok(())
}

pub async fn run_withdraw(ctx: &AppContext, args: WithdrawArgs) -> Result<()> {
    let mut config = ctx.config.publishing.clone();
    if let Some(mode) = args.mode.as_deref() {
        config.withdrawal_mode = WithdrawalMode::parse(mode).ok_or_else(|| {
            HelpfulError::new(format!("Unknown withdrawal mode: '{}'", mode))
                .with_suggestion("TRY: --mode logical or --mode physical")
        })?;
    }
    let mode = config.withdrawal_mode;

    let entity = ctx.resolve_entity(&args.entity).await?;
    let result = ctx.publishing_with(config).withdraw(entity.id, ctx.actor()).await;
    report(&result, "Withdraw", &entity.entity_name)?;

    match mode {
        WithdrawalMode::Physical => println!("Withdrew {} and dropped {}.", entity.full_type_name(), entity.table_name()),
        WithdrawalMode::Logical => println!("Withdrew {} (table kept).", entity.full_type_name()),
    }
    Ok(())
}

/// Print the audited DDL and turn a failed result into an error.
fn report(result: &PublishResult, operation: &str, entity_name: &str) -> Result<()> {
    if result.attempted_ddl() {
        let rows = result
            .scripts
            .iter()
            .map(|s| {
                vec![
                    (s.script_type.to_string(), None),
                    (s.status.to_string(), Some(color_for_script(s.status))),
                    (sql_summary(&s.sql_script, 60), None),
                    (s.error_message.clone().unwrap_or_default(), None),
                ]
            })
            .collect();
        print_table_colored(&["TYPE", "STATUS", "SQL", "ERROR"], rows);
    }

    match result.error_message() {
        None if result.success => Ok(()),
        message => {
            let reason = message.unwrap_or_else(|| "unknown error".to_string());
            Err(HelpfulError::operation_failed(operation, entity_name, &reason).into())
        }
    }
}

fn print_compile(result: &PublishResult) {
    if let Some(compile) = &result.compile {
        if compile.success {
            println!("  runtime types: {}", compile.loaded_type_names.join(", "));
        } else {
            for error in &compile.errors {
                eprintln!("Warning: runtime type compilation failed: {}", error);
            }
        }
    }
}
