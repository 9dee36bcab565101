use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::properties::PropertyValue;

/// How strictly an incoming file record is matched against files already in
/// the catalog before it is treated as a replica of an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStrictness {
    /// Match by path and name only.
    PathName,
    /// Match by path, name and size.
    PathNameSize,
    /// Match by path, name and checksum.
    PathNameChecksum,
}

impl fmt::Display for MatchStrictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStrictness::PathName => write!(f, "path-name"),
            MatchStrictness::PathNameSize => write!(f, "path-name-size"),
            MatchStrictness::PathNameChecksum => write!(f, "path-name-checksum"),
        }
    }
}

/// Criterion used by the replicant detector when comparing files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReplicantCheck {
    Name,
    Size,
    Both,
}

impl fmt::Display for ReplicantCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicantCheck::Name => write!(f, "name"),
            ReplicantCheck::Size => write!(f, "size"),
            ReplicantCheck::Both => write!(f, "both"),
        }
    }
}

impl FromStr for ReplicantCheck {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "name" => Ok(ReplicantCheck::Name),
            "size" => Ok(ReplicantCheck::Size),
            "both" => Ok(ReplicantCheck::Both),
            _ => Err(CatalogError::InvalidName {
                kind: "replicant check",
                value: value.to_string(),
            }),
        }
    }
}

/// A plain file record handed over by an ingestion collaborator (POSIX
/// walker, remote walker, archive importer). The catalog performs no path
/// resolution or file reading itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub path: Utf8PathBuf,
    pub size: u64,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub checksum_method: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

impl FileRecord {
    pub fn new(path: impl Into<Utf8PathBuf>, name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size,
            checksum: None,
            checksum_method: None,
            format: None,
        }
    }

    /// Format from the record if supplied, else the file-name extension.
    pub fn resolved_format(&self) -> String {
        match &self.format {
            Some(format) => format.clone(),
            None => Utf8Path::new(&self.name)
                .extension()
                .map(|ext| format!(".{ext}"))
                .unwrap_or_default(),
        }
    }
}

/// A per-variable record supplied by the scientific-metadata collaborator.
/// Property values arrive as JSON and are narrowed to the four supported
/// typed-property kinds at ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableRecord {
    #[serde(default)]
    pub standard_name: Option<String>,
    #[serde(default)]
    pub long_name: Option<String>,
    pub size: u64,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub cell_methods: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Filters for `retrieve_collections`. At most one may be populated.
#[derive(Debug, Clone, Default)]
pub struct CollectionFilters {
    pub name_contains: Option<String>,
    pub description_contains: Option<String>,
    pub contains: Option<String>,
    pub tag: Option<String>,
    pub facet: Option<(String, String)>,
}

impl CollectionFilters {
    pub fn name_contains(value: impl Into<String>) -> Self {
        Self {
            name_contains: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn description_contains(value: impl Into<String>) -> Self {
        Self {
            description_contains: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Self {
            contains: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn tag(value: impl Into<String>) -> Self {
        Self {
            tag: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn facet(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            facet: Some((key.into(), value.into())),
            ..Self::default()
        }
    }

    pub fn populated(&self) -> usize {
        [
            self.name_contains.is_some(),
            self.description_contains.is_some(),
            self.contains.is_some(),
            self.tag.is_some(),
            self.facet.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

/// A single-field variable lookup.
#[derive(Debug, Clone)]
pub enum VariableQuery {
    Identity(String),
    StandardName(String),
    LongName(String),
    Size(u64),
    Domain(String),
    Property(String, PropertyValue),
}

/// Validate an entity name supplied by a caller: trimmed and non-empty.
pub fn validate_name(kind: &'static str, value: &str) -> Result<String, CatalogError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::InvalidName {
            kind,
            value: value.to_string(),
        });
    }
    Ok(trimmed.to_string())
}
