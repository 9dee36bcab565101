use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::CatalogError;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCatalog {
    schema_version: u32,
    saved_at: String,
    catalog: Catalog,
}

/// Owns the on-disk location of the catalog. The whole catalog is one JSON
/// document, written atomically; a missing file means an empty catalog.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: Utf8PathBuf,
}

impl CatalogStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn at_default_location() -> Result<Self, CatalogError> {
        Ok(Self::new(default_catalog_path()?))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn load(&self) -> Result<Catalog, CatalogError> {
        if !self.path.as_std_path().exists() {
            return Ok(Catalog::new());
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|_| CatalogError::CatalogRead(self.path.clone()))?;
        let persisted: PersistedCatalog = serde_json::from_str(&content)
            .map_err(|err| CatalogError::CatalogParse(err.to_string()))?;
        if persisted.schema_version != SCHEMA_VERSION {
            return Err(CatalogError::SchemaVersion {
                found: persisted.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(persisted.catalog)
    }

    pub fn save(&self, catalog: &Catalog) -> Result<(), CatalogError> {
        let persisted = PersistedCatalog {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now().to_rfc3339(),
            catalog: catalog.clone(),
        };
        let json = serde_json::to_string_pretty(&persisted)
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;

        let parent = self
            .path
            .parent()
            .ok_or_else(|| CatalogError::CatalogWrite(self.path.clone()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("cf-catalog")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), json).map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        temp.persist(self.path.as_std_path())
            .map_err(|_| CatalogError::CatalogWrite(self.path.clone()))?;
        Ok(())
    }
}

pub fn default_catalog_path() -> Result<Utf8PathBuf, CatalogError> {
    let dirs = BaseDirs::new()
        .ok_or_else(|| CatalogError::Filesystem("unable to resolve home directory".to_string()))?;
    Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cf-catalog").join("catalog.json"))
        .map_err(|_| CatalogError::Filesystem("invalid home directory path".to_string()))
}
