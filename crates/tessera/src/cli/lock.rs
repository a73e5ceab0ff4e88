//! Lock and unlock commands.

use crate::cli::context::AppContext;
use crate::cli::publish::EntityArg;
use anyhow::{Context, Result};
use tessera_schema::EntityLockService;

#[derive(Debug, clap::Args)]
pub struct LockArgs {
    /// Entity id or name
    pub entity: String,

    /// Also lock child entities, recursively
    #[arg(long)]
    pub hierarchy: bool,
}

pub async fn run_lock(ctx: &AppContext, args: LockArgs) -> Result<()> {
    let entity = ctx.resolve_entity(&args.entity).await?;
    let locks = EntityLockService::new(ctx.db.clone());

    if args.hierarchy {
        let count = locks
            .lock_entity_hierarchy(entity.id)
            .await
            .with_context(|| format!("Failed to lock '{}' and its children", entity.entity_name))?;
        println!("Locked {} entit{} under {}.", count, if count == 1 { "y" } else { "ies" }, entity.entity_name);
    } else {
        locks
            .lock_entity(entity.id)
            .await
            .with_context(|| format!("Failed to lock '{}'", entity.entity_name))?;
        println!("Locked {}.", entity.entity_name);
    }
    Ok(())
}

pub async fn run_unlock(ctx: &AppContext, args: EntityArg) -> Result<()> {
    let entity = ctx.resolve_entity(&args.entity).await?;
    let locks = EntityLockService::new(ctx.db.clone());
    locks
        .unlock_entity(entity.id)
        .await
        .with_context(|| format!("Failed to unlock '{}'", entity.entity_name))?;

    let info = locks.lock_info(entity.id).await?;
    if info.is_locked {
        println!("Unlocked {}, but it is still locked by:", entity.entity_name);
        for reason in &info.reasons {
            println!("  - {}", reason);
        }
    } else {
        println!("Unlocked {}.", entity.entity_name);
    }
    Ok(())
}
