//! Tessera command-line interface
//!
//! Author entity definitions as JSON manifests, then drive them through
//! the publishing lifecycle against a local metadata database.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tessera_logging::{init_logging, LogConfig};

mod cli;

use cli::context::GlobalArgs;

#[derive(Parser, Debug)]
#[command(name = "tessera", version, about = "Metadata-driven entity publishing")]
struct Cli {
    /// Enable verbose logging (all engine events to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Only warnings and errors on stderr
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Tessera home directory (config, logs, default database)
    #[arg(long, global = true, env = "TESSERA_HOME")]
    home: Option<PathBuf>,

    /// Metadata database path (overrides tessera.toml)
    #[arg(long, global = true, env = "TESSERA_DATABASE")]
    database: Option<PathBuf>,

    /// Name recorded as the actor of changes and DDL
    #[arg(long, global = true, env = "TESSERA_ACTOR")]
    actor: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import entity and enum definitions from a JSON manifest
    Import(cli::entity::ImportArgs),

    /// List entity definitions
    List(cli::entity::ListArgs),

    /// Show an entity definition, its fields and lock state
    Show(cli::entity::ShowArgs),

    /// Print the CREATE TABLE statement for an entity
    Ddl(cli::entity::DdlArgs),

    /// Publish a Draft entity (and its Draft lookup targets)
    Publish(cli::publish::EntityArg),

    /// Apply metadata edits of a Modified entity to its table
    #[command(name = "publish-changes")]
    PublishChanges(cli::publish::EntityArg),

    /// Withdraw a Published entity
    Withdraw(cli::publish::WithdrawArgs),

    /// Add missing columns to live tables
    Align(cli::schema::AlignArgs),

    /// Estimate the data-loss risk of a proposed field list
    Impact(cli::schema::ImpactArgs),

    /// Show the DDL audit history of an entity
    History(cli::schema::HistoryArgs),

    /// Lock an entity (optionally with its children)
    Lock(cli::lock::LockArgs),

    /// Unlock an entity
    Unlock(cli::publish::EntityArg),

    /// Show or initialize configuration
    Config(cli::config::ConfigArgs),
}

impl Commands {
    fn wants_json(&self) -> bool {
        match self {
            Commands::List(args) => args.json,
            Commands::Show(args) => args.json,
            Commands::History(args) => args.json,
            Commands::Impact(args) => args.json,
            Commands::Config(args) => args.json,
            _ => false,
        }
    }
}

fn run_command(cli: Cli) -> Result<()> {
    let globals = GlobalArgs {
        home: cli.home,
        database: cli.database,
        actor: cli.actor,
    };

    let command = match cli.command {
        Commands::Config(args) => return cli::config::run(&globals, args),
        command => command,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        let ctx = cli::context::AppContext::open(&globals).await?;
        let result = match command {
            Commands::Import(args) => cli::entity::run_import(&ctx, args).await,
            Commands::List(args) => cli::entity::run_list(&ctx, args).await,
            Commands::Show(args) => cli::entity::run_show(&ctx, args).await,
            Commands::Ddl(args) => cli::entity::run_ddl(&ctx, args).await,
            Commands::Publish(args) => cli::publish::run_publish(&ctx, args).await,
            Commands::PublishChanges(args) => cli::publish::run_publish_changes(&ctx, args).await,
            Commands::Withdraw(args) => cli::publish::run_withdraw(&ctx, args).await,
            Commands::Align(args) => cli::schema::run_align(&ctx, args).await,
            Commands::Impact(args) => cli::schema::run_impact(&ctx, args).await,
            Commands::History(args) => cli::schema::run_history(&ctx, args).await,
            Commands::Lock(args) => cli::lock::run_lock(&ctx, args).await,
            Commands::Unlock(args) => cli::lock::run_unlock(&ctx, args).await,
            Commands::Config(_) => Ok(()),
        };
        ctx.close().await;
        result
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = cli.command.wants_json();

    let log_config = LogConfig {
        verbose: cli.verbose,
        quiet: cli.quiet || json_mode,
        log_dir: cli.home.as_ref().map(|home| home.join("logs")),
        ..LogConfig::new("tessera")
    };
    if let Err(err) = init_logging(log_config) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else {
                eprintln!("{:?}", err);
            }
            ExitCode::from(1)
        }
    }
}
