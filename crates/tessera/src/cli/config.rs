//! Config command: show resolved paths and publishing settings.
//!
//! All paths are under ~/.tessera/ unless overridden.

use crate::cli::context::{load_config, GlobalArgs, Paths};
use anyhow::{Context, Result};
use tessera_schema::EngineConfig;

/// Arguments for the config command
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    /// Show resolved configuration in JSON format
    #[arg(long)]
    pub json: bool,

    /// Write a tessera.toml with default settings if none exists
    #[arg(long)]
    pub init: bool,
}

pub fn run(globals: &GlobalArgs, args: ConfigArgs) -> Result<()> {
    let config = load_config(globals)?;
    let paths = Paths::resolve(globals, &config);

    if args.init {
        if paths.config.exists() {
            eprintln!("Config already exists: {}", paths.config.display());
        } else {
            EngineConfig::default()
                .save(&paths.config)
                .with_context(|| format!("Failed to write {}", paths.config.display()))?;
            eprintln!("Wrote default config: {}", paths.config.display());
        }
    }

    let publishing = &config.publishing;
    if args.json {
        let value = serde_json::json!({
            "home": paths.home.to_string_lossy(),
            "config": {
                "path": paths.config.to_string_lossy(),
                "exists": paths.config.exists(),
            },
            "database": {
                "path": paths.database.to_string_lossy(),
                "exists": paths.database.exists(),
            },
            "logs": paths.home.join("logs").to_string_lossy(),
            "publishing": publishing,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("TESSERA CONFIGURATION");
        println!("=====================");
        println!();
        println!("Home:      {}", paths.home.display());
        println!(
            "Config:    {} ({})",
            paths.config.display(),
            if paths.config.exists() { "exists" } else { "defaults" }
        );
        println!(
            "Database:  {} ({})",
            paths.database.display(),
            if paths.database.exists() { "exists" } else { "not found" }
        );
        println!("Logs:      {}", paths.home.join("logs").display());
        println!();
        println!("[publishing]");
        println!("  withdrawal_mode = {}", publishing.withdrawal_mode);
        println!("  lock_hierarchy  = {}", publishing.lock_hierarchy);
        println!("  dialect         = {}", publishing.dialect.as_str());
    }

    Ok(())
}
