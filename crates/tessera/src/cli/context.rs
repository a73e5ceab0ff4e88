//! Shared state for commands: resolved paths, configuration and the
//! open metadata database.

use crate::cli::error::HelpfulError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tessera_db::{EntityDefinition, MetaDb};
use tessera_schema::{EngineConfig, PublishingConfig, PublishingService};
use tracing::debug;
use uuid::Uuid;

pub const CONFIG_FILE: &str = "tessera.toml";
pub const DATABASE_FILE: &str = "tessera.sqlite3";

/// Global flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub home: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub actor: Option<String>,
}

/// Where things live for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub home: PathBuf,
    pub config: PathBuf,
    pub database: PathBuf,
}

impl Paths {
    /// Priority for the database: `--database`/`TESSERA_DATABASE`, then
    /// `database` in tessera.toml, then `$TESSERA_HOME/tessera.sqlite3`.
    pub fn resolve(globals: &GlobalArgs, config: &EngineConfig) -> Self {
        let home = home_dir(globals);
        let default_db = home.join(DATABASE_FILE);
        let database = match &globals.database {
            Some(path) => expand_tilde(path),
            None => expand_tilde(&config.database_path(&default_db)),
        };
        Self {
            config: home.join(CONFIG_FILE),
            home,
            database,
        }
    }
}

pub fn home_dir(globals: &GlobalArgs) -> PathBuf {
    globals
        .home
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(tessera_logging::tessera_home)
}

pub fn load_config(globals: &GlobalArgs) -> Result<EngineConfig> {
    let path = home_dir(globals).join(CONFIG_FILE);
    EngineConfig::load(&path).with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

pub struct AppContext {
    pub paths: Paths,
    pub config: EngineConfig,
    pub db: MetaDb,
    pub actor: Option<String>,
}

impl AppContext {
    pub async fn open(globals: &GlobalArgs) -> Result<Self> {
        let config = load_config(globals)?;
        let paths = Paths::resolve(globals, &config);
        debug!(database = %paths.database.display(), "Opening metadata database");

        let db = MetaDb::open(&paths.database)
            .await
            .map_err(|e| HelpfulError::database_open_failed(&paths.database, &e.to_string()))?;

        Ok(Self {
            paths,
            config,
            db,
            actor: globals.actor.clone(),
        })
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    pub fn publishing(&self) -> PublishingService {
        self.publishing_with(self.config.publishing.clone())
    }

    pub fn publishing_with(&self, config: PublishingConfig) -> PublishingService {
        PublishingService::new(self.db.clone(), config)
    }

    /// Find an entity by id or (case-insensitive) name.
    pub async fn resolve_entity(&self, key: &str) -> Result<EntityDefinition> {
        let found = match Uuid::parse_str(key.trim()) {
            Ok(id) => self.db.get_entity(id).await?,
            Err(_) => self.db.get_entity_by_name(key).await?,
        };
        found.ok_or_else(|| HelpfulError::entity_not_found(key).into())
    }

    pub async fn close(self) {
        self.db.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_database_flag_wins() {
        let globals = GlobalArgs {
            home: Some(PathBuf::from("/srv/tessera")),
            database: Some(PathBuf::from("/data/meta.db")),
            actor: None,
        };
        let config = EngineConfig {
            database: Some(PathBuf::from("/etc/ignored.db")),
            ..Default::default()
        };
        let paths = Paths::resolve(&globals, &config);
        assert_eq!(paths.database, PathBuf::from("/data/meta.db"));
        assert_eq!(paths.config, PathBuf::from("/srv/tessera/tessera.toml"));
    }

    #[test]
    fn test_config_database_then_default() {
        let globals = GlobalArgs {
            home: Some(PathBuf::from("/srv/tessera")),
            ..Default::default()
        };
        let config = EngineConfig {
            database: Some(PathBuf::from("/var/lib/tessera.db")),
            ..Default::default()
        };
        assert_eq!(
            Paths::resolve(&globals, &config).database,
            PathBuf::from("/var/lib/tessera.db")
        );
        assert_eq!(
            Paths::resolve(&globals, &EngineConfig::default()).database,
            PathBuf::from("/srv/tessera/tessera.sqlite3")
        );
    }

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde(Path::new("/abs/path")), PathBuf::from("/abs/path"));
        assert_eq!(expand_tilde(Path::new("rel/path")), PathBuf::from("rel/path"));
    }

    #[tokio::test]
    async fn test_resolve_entity_by_name_and_id() {
        let tmp = TempDir::new().unwrap();
        let globals = GlobalArgs {
            home: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let ctx = AppContext::open(&globals).await.unwrap();
        assert!(ctx.paths.database.starts_with(tmp.path()));

        let entity = EntityDefinition::new("Crm", "Order");
        ctx.db.create_entity(&entity).await.unwrap();

        assert_eq!(ctx.resolve_entity("order").await.unwrap().id, entity.id);
        assert_eq!(ctx.resolve_entity(&entity.id.to_string()).await.unwrap().id, entity.id);

        let err = ctx.resolve_entity("Missing").await.unwrap_err();
        assert!(err.to_string().contains("Entity not found: Missing"));
        ctx.close().await;
    }
}
