//! Layered configuration.
//!
//! Later layers override earlier ones:
//!
//! 1. built-in defaults
//! 2. user config, `<config dir>/docshift/config.toml`
//! 3. project config, `docshift.toml` (or the file passed with `--config`)
//! 4. `DOCSHIFT_DATABASE_URL`
//! 5. command-line flags, applied by the caller with [`Config::apply`]
//!
//! ```toml
//! models_dir = "src/models"
//! migrations_dir = "migrations"
//! database_url = "jsondb://./data"
//! executed_by = "ci"
//! lock_ttl_secs = 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{MigrateError, Result};
use crate::migrate::DEFAULT_LOCK_TTL;

pub const DATABASE_URL_ENV: &str = "DOCSHIFT_DATABASE_URL";
pub const PROJECT_CONFIG: &str = "docshift.toml";

/// One configuration file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub models_dir: Option<PathBuf>,
    pub migrations_dir: Option<PathBuf>,
    pub database_url: Option<String>,
    pub executed_by: Option<String>,
    pub lock_ttl_secs: Option<u64>,
}

impl ConfigFile {
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| MigrateError::Config(format!("{}: {}", origin.display(), e)))
    }

    /// Read a config file; `Ok(None)` if it does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MigrateError::io(path, e)),
        }
    }
}

/// Resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub models_dir: PathBuf,
    pub migrations_dir: PathBuf,
    pub database_url: Option<String>,
    pub executed_by: String,
    pub lock_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            migrations_dir: PathBuf::from("migrations"),
            database_url: None,
            executed_by: default_executed_by(),
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }
}

impl Config {
    /// Load defaults, user config, project config and environment.
    ///
    /// An explicit `path` must exist; the implicit project and user files
    /// are skipped when absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(user) = user_config_path() {
            if let Some(file) = ConfigFile::read(&user)? {
                tracing::debug!(path = %user.display(), "loaded user config");
                config.apply(file);
            }
        }

        match path {
            Some(explicit) => {
                let file = ConfigFile::read(explicit)?.ok_or_else(|| {
                    MigrateError::Config(format!("config file {} not found", explicit.display()))
                })?;
                config.apply(file);
            }
            None => {
                if let Some(file) = ConfigFile::read(Path::new(PROJECT_CONFIG))? {
                    tracing::debug!(path = PROJECT_CONFIG, "loaded project config");
                    config.apply(file);
                }
            }
        }

        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.database_url = Some(url);
            }
        }

        Ok(config)
    }

    /// Override with every key set in `file`.
    pub fn apply(&mut self, file: ConfigFile) {
        if let Some(dir) = file.models_dir {
            self.models_dir = dir;
        }
        if let Some(dir) = file.migrations_dir {
            self.migrations_dir = dir;
        }
        if let Some(url) = file.database_url {
            self.database_url = Some(url);
        }
        if let Some(who) = file.executed_by {
            self.executed_by = who;
        }
        if let Some(secs) = file.lock_ttl_secs {
            self.lock_ttl = Duration::from_secs(secs);
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("docshift").join("config.toml"))
}

/// `$USER`, then `$USERNAME`, then `unknown`.
pub fn default_executed_by() -> String {
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
