//! Application configuration: where the store, models and rule files live.
//!
//! Each setting resolves in order:
//! 1. command-line flag
//! 2. environment variable
//! 3. `urbanfix.toml` in the working directory (optional)
//! 4. compiled default

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "urbanfix.toml";
pub const ENV_DB: &str = "URBANFIX_DB";
pub const ENV_MODELS_DIR: &str = "URBANFIX_MODELS_DIR";
pub const ENV_RULES_DIR: &str = "URBANFIX_RULES_DIR";

const DEFAULT_DB: &str = "urbanfix.db";
const DEFAULT_MODELS_DIR: &str = "models";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub models_dir: PathBuf,
    /// `None` means compiled-in rules.
    pub rules_dir: Option<PathBuf>,
}

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub db_path: Option<PathBuf>,
    pub models_dir: Option<PathBuf>,
    pub rules_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    db_path: Option<PathBuf>,
    models_dir: Option<PathBuf>,
    rules_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB),
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
            rules_dir: None,
        }
    }
}

impl AppConfig {
    /// Resolves against the process environment and `./urbanfix.toml`.
    pub fn resolve(overrides: Overrides) -> Result<Self> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok(), Path::new(CONFIG_FILE))
    }

    /// Resolution with an injectable environment lookup and config file path.
    pub fn resolve_with(
        overrides: Overrides,
        env: impl Fn(&str) -> Option<String>,
        config_file: &Path,
    ) -> Result<Self> {
        let file = load_config_file(config_file)?;
        let env_path = |key: &str| env(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);
        let defaults = AppConfig::default();

        Ok(Self {
            db_path: overrides
                .db_path
                .or_else(|| env_path(ENV_DB))
                .or(file.db_path)
                .unwrap_or(defaults.db_path),
            models_dir: overrides
                .models_dir
                .or_else(|| env_path(ENV_MODELS_DIR))
                .or(file.models_dir)
                .unwrap_or(defaults.models_dir),
            rules_dir: overrides
                .rules_dir
                .or_else(|| env_path(ENV_RULES_DIR))
                .or(file.rules_dir),
        })
    }
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|err| Error::Config(format!("{}: {err}", path.display())))
}
