//! Configuration loading and config file resolution

use crate::schema::EntityDefinition;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "GROUNDWORK_CONFIG";

/// One entry of the `import_services` tree
///
/// ```toml
/// import_services = [
///     "company",
///     { customer = ["order", "address"] },
///     ["tag", "post"],
/// ]
/// ```
///
/// A table groups child services under a parent service; the parent is
/// imported first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceNode {
    Name(String),
    List(Vec<ServiceNode>),
    Group(BTreeMap<String, Vec<ServiceNode>>),
}

/// Groundwork configuration (TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundworkConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Dispatch server listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory scanned for `<service>.csv` files
    #[serde(default)]
    pub import_directory: Option<PathBuf>,

    /// Services to import, in declaration order
    #[serde(default)]
    pub import_services: Vec<ServiceNode>,

    /// Tables emptied by `groundwork-import --drop-tables`
    #[serde(default)]
    pub foreign_key_tables_to_delete: Vec<String>,

    /// Delete without `isHardDelete` soft-deletes archivable entities
    #[serde(default)]
    pub is_archive: bool,

    /// Entity type declarations (`[[entity]]` tables)
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntityDefinition>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("groundwork.db")
}

fn default_listen() -> String {
    "127.0.0.1:5780".to_string()
}

impl Default for GroundworkConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            listen: default_listen(),
            import_directory: None,
            import_services: Vec::new(),
            foreign_key_tables_to_delete: Vec::new(),
            is_archive: false,
            entities: Vec::new(),
        }
    }
}

impl GroundworkConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Load configuration from a file
    ///
    /// Relative `database_path` and `import_directory` values are resolved
    /// against the config file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;

        if let Some(base) = path.parent() {
            if config.database_path.is_relative() {
                config.database_path = base.join(&config.database_path);
            }
            if let Some(dir) = config.import_directory.as_mut() {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
        }

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the config file and load it; no file means defaults
    pub fn load_resolved(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg)? {
            Some(path) => Self::load(&path),
            None => {
                info!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Config file resolution following priority order:
/// 1. Command-line argument (highest priority)
/// 2. `GROUNDWORK_CONFIG` environment variable
/// 3. User config dir (`<config_dir>/groundwork/config.toml`)
/// 4. `./groundwork.toml` (fallback)
///
/// An explicit path (1 or 2) that does not exist is an error; the implicit
/// locations are skipped when absent.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return explicit_path(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return explicit_path(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory
    if let Some(path) = dirs::config_dir().map(|d| d.join("groundwork").join("config.toml")) {
        if path.exists() {
            return Ok(Some(path));
        }
        debug!("No user config at {}", path.display());
    }

    // Priority 4: Working directory
    let local = PathBuf::from("groundwork.toml");
    if local.exists() {
        return Ok(Some(local));
    }

    Ok(None)
}

fn explicit_path(path: PathBuf) -> Result<Option<PathBuf>> {
    if path.exists() {
        Ok(Some(path))
    } else {
        Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )))
    }
}
