use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::store::default_catalog_path;

pub const CONFIG_ENV: &str = "CF_CATALOG_CONFIG";

/// On-disk configuration: where the catalog lives and which collection the
/// user worked with last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog_path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub last_collection: Option<String>,
}

impl Config {
    pub fn catalog_path(&self) -> Result<Utf8PathBuf, CatalogError> {
        match &self.catalog_path {
            Some(path) => Ok(path.clone()),
            None => default_catalog_path(),
        }
    }
}

/// Explicit session context handed to presentation-layer calls. The engine
/// itself never sees a "current collection".
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub collection: Option<String>,
}

impl Session {
    /// The collection for this invocation: an explicit flag wins over the
    /// remembered one.
    pub fn resolve(flag: Option<String>, config: &Config) -> Self {
        Self {
            collection: flag.or_else(|| config.last_collection.clone()),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from `path`, else `$CF_CATALOG_CONFIG`, else
    /// `~/.cf-catalog/config.json`. A missing file yields the defaults.
    pub fn resolve(path: Option<&str>) -> Result<(Config, PathBuf), CatalogError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => match std::env::var(CONFIG_ENV) {
                Ok(value) if !value.is_empty() => PathBuf::from(value),
                _ => default_config_path()?,
            },
        };

        if !config_path.exists() {
            return Ok((Config::default(), config_path));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CatalogError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CatalogError::ConfigParse(err.to_string()))?;
        Ok((config, config_path))
    }

    pub fn save(config: &Config, path: &Path) -> Result<(), CatalogError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        }
        let json = serde_json::to_string_pretty(config)
            .map_err(|err| CatalogError::ConfigParse(err.to_string()))?;
        fs::write(path, json).map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf, CatalogError> {
    let dirs = BaseDirs::new()
        .ok_or_else(|| CatalogError::Filesystem("unable to resolve home directory".to_string()))?;
    Ok(dirs.home_dir().join(".cf-catalog").join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_prefers_explicit_flag() {
        let config = Config {
            catalog_path: None,
            last_collection: Some("remembered".to_string()),
        };
        let session = Session::resolve(Some("explicit".to_string()), &config);
        assert_eq!(session.collection.as_deref(), Some("explicit"));

        let session = Session::resolve(None, &config);
        assert_eq!(session.collection.as_deref(), Some("remembered"));

        let session = Session::resolve(None, &Config::default());
        assert_eq!(session.collection, None);
    }
}
