use std::path::PathBuf;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("no such collection: {0}")]
    CollectionNotFound(String),

    #[error("no such storage location: {0}")]
    LocationNotFound(String),

    #[error("no such tag: {0}")]
    TagNotFound(String),

    #[error("no such variable: {0}")]
    VariableNotFound(String),

    #[error("file not found in catalog: {path}/{name}")]
    FileNotFound { path: Utf8PathBuf, name: String },

    #[error("{count} file(s) not known to the catalog, nothing was organised")]
    UnknownFiles { count: usize, paths: Vec<String> },

    #[error("collection already exists: {0}")]
    DuplicateCollection(String),

    #[error("storage location already exists: {0}")]
    DuplicateLocation(String),

    #[error("tag already exists: {0}")]
    DuplicateTag(String),

    #[error("protocol already exists: {0}")]
    DuplicateProtocol(String),

    #[error("cell method already exists: {axis}: {method}")]
    DuplicateCellMethod { axis: String, method: String },

    #[error("file already catalogued and updates are disallowed: {path}/{name}")]
    DuplicateFile { path: Utf8PathBuf, name: String },

    #[error("collection {name} is not empty (contains {count} files)")]
    CollectionNotEmpty { name: String, count: usize },

    #[error("storage location {name} is not empty (holds {count} files)")]
    LocationNotEmpty { name: String, count: usize },

    #[error("file {name} is not a member of collection {collection}")]
    FileNotInCollection { name: String, collection: String },

    #[error("tag {tag} is not attached to collection {collection}")]
    TagNotOnCollection { tag: String, collection: String },

    #[error("collection {0} is reserved and cannot be deleted")]
    ReservedCollection(String),

    #[error("reverse candidate search is not implemented")]
    ReverseSearchUnimplemented,

    #[error("collection {collection} has no facet {key}")]
    UnknownFacet { key: String, collection: String },

    #[error("unsupported property type for key {key}: {found}")]
    UnsupportedPropertyType { key: String, found: String },

    #[error("malformed cell_methods string: {0}")]
    MalformedCellMethods(String),

    #[error("cell method has {intervals} intervals for {axes} axes")]
    IntervalAxisMismatch { intervals: usize, axes: usize },

    #[error("cannot search on more than one of name, description, tag and facet")]
    ConflictingFilters,

    #[error("files can be refined by size or checksum, not both")]
    SizeAndChecksum,

    #[error("{count} files match {path}/{name}, refine by size or checksum")]
    AmbiguousFile {
        path: Utf8PathBuf,
        name: String,
        count: usize,
    },

    #[error("invalid {kind} name: {value:?}")]
    InvalidName { kind: &'static str, value: String },

    #[error("catalog file has schema version {found}, expected {expected}")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("failed to read catalog file at {0}")]
    CatalogRead(Utf8PathBuf),

    #[error("failed to parse catalog file: {0}")]
    CatalogParse(String),

    #[error("failed to write catalog file at {0}")]
    CatalogWrite(Utf8PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
