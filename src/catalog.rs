use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cell_methods::parse_cell_methods;
use crate::domain::{
    CollectionFilters, FileRecord, MatchStrictness, VariableQuery, VariableRecord, validate_name,
};
use crate::error::CatalogError;
use crate::output::byte_format;
use crate::properties::{PropertyStore, PropertyValue};

pub type EntityId = u64;

/// Name of the reserved collection which adopts files that lose their last
/// collection membership. Created lazily, never deletable.
pub const UNLISTED: &str = "unlisted";

const PLACEHOLDER_NAME: &str = "unknown";

/// A named, user-curated group of files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub volume: u64,
    pub is_batch: bool,
    pub properties: PropertyStore,
    pub tags: BTreeSet<EntityId>,
    pub files: BTreeSet<EntityId>,
}

impl Collection {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: EntityId,
    pub name: String,
    pub path: Utf8PathBuf,
    pub size: u64,
    pub checksum: Option<String>,
    pub checksum_method: Option<String>,
    pub format: String,
    pub replicas: BTreeSet<EntityId>,
    pub in_collections: BTreeSet<EntityId>,
    pub attributes: PropertyStore,
}

impl File {
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.path, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageLocation {
    pub id: EntityId,
    pub name: String,
    pub volume: u64,
    pub protocols: BTreeSet<EntityId>,
    pub holds_files: BTreeSet<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageProtocol {
    pub id: EntityId,
    pub name: String,
    pub used_by: BTreeSet<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: EntityId,
    pub name: String,
    pub in_collections: BTreeSet<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: EntityId,
    pub standard_name: Option<String>,
    pub long_name: Option<String>,
    pub size: u64,
    pub domain: String,
    pub properties: PropertyStore,
    pub cell_methods: BTreeSet<EntityId>,
    pub in_files: BTreeSet<EntityId>,
    pub in_collections: BTreeSet<EntityId>,
}

impl Variable {
    /// Fallback label: the standard name, else the long name. One of the
    /// two is always present (a placeholder is substituted at creation).
    pub fn identity(&self) -> &str {
        self.standard_name
            .as_deref()
            .or(self.long_name.as_deref())
            .unwrap_or(PLACEHOLDER_NAME)
    }
}

/// One (axis, method) pair, deduplicated catalog-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellMethod {
    pub id: EntityId,
    pub axis: String,
    pub method: String,
    pub used_by: BTreeSet<EntityId>,
}

/// Outcome of uploading a batch of file records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub created: usize,
    pub updated: usize,
}

/// Outcome of ingesting a single variable record.
#[derive(Debug, Clone, Serialize)]
pub struct VariableIngest {
    pub id: EntityId,
    pub unresolved_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedVariable {
    pub identity: String,
    pub reason: String,
}

/// Outcome of ingesting a batch of variable records. Malformed records are
/// skipped with a diagnostic, they never abort the batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub added: Vec<EntityId>,
    pub skipped: Vec<SkippedVariable>,
}

/// The catalog engine: every entity table, the name indexes, and the
/// relationship edge table. All mutation goes through methods on this type
/// so that volume counters and membership sets can never drift apart;
/// mutations take `&mut self` (single writer) and reads take `&self` (a
/// consistent snapshot for the duration of the borrow).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Catalog {
    next_id: EntityId,
    collections: BTreeMap<EntityId, Collection>,
    files: BTreeMap<EntityId, File>,
    locations: BTreeMap<EntityId, StorageLocation>,
    protocols: BTreeMap<EntityId, StorageProtocol>,
    tags: BTreeMap<EntityId, Tag>,
    variables: BTreeMap<EntityId, Variable>,
    cell_methods: BTreeMap<EntityId, CellMethod>,
    // subject -> predicate -> objects, in link order
    edges: BTreeMap<EntityId, BTreeMap<String, Vec<EntityId>>>,
    collection_names: BTreeMap<String, EntityId>,
    location_names: BTreeMap<String, EntityId>,
    protocol_names: BTreeMap<String, EntityId>,
    tag_names: BTreeMap<String, EntityId>,
    // "path/name" -> file ids, for duplicate-aware lookup
    file_paths: BTreeMap<String, Vec<EntityId>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> EntityId {
        self.next_id += 1;
        self.next_id
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    pub fn create_collection(
        &mut self,
        name: &str,
        description: &str,
        properties: BTreeMap<String, String>,
    ) -> Result<EntityId, CatalogError> {
        let name = validate_name("collection", name)?;
        if self.collection_names.contains_key(&name) {
            return Err(CatalogError::DuplicateCollection(name));
        }
        let description = if description.trim().is_empty() {
            "No Description".to_string()
        } else {
            description.to_string()
        };
        let id = self.allocate_id();
        let mut store = PropertyStore::new();
        for (key, value) in properties {
            store.set(key, value);
        }
        debug!(collection = %name, id, "creating collection");
        self.collection_names.insert(name.clone(), id);
        self.collections.insert(
            id,
            Collection {
                id,
                name,
                description,
                volume: 0,
                is_batch: false,
                properties: store,
                tags: BTreeSet::new(),
                files: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    pub fn retrieve_collection(&self, name: &str) -> Result<&Collection, CatalogError> {
        self.collection_names
            .get(name)
            .and_then(|id| self.collections.get(id))
            .ok_or_else(|| CatalogError::CollectionNotFound(name.to_string()))
    }

    fn collection_id(&self, name: &str) -> Result<EntityId, CatalogError> {
        self.collection_names
            .get(name)
            .copied()
            .ok_or_else(|| CatalogError::CollectionNotFound(name.to_string()))
    }

    pub fn retrieve_collections(
        &self,
        filters: &CollectionFilters,
    ) -> Result<Vec<&Collection>, CatalogError> {
        if filters.populated() > 1 {
            return Err(CatalogError::ConflictingFilters);
        }
        // The name index keeps results in name order.
        let all = || {
            self.collection_names
                .values()
                .filter_map(|id| self.collections.get(id))
        };

        if let Some(needle) = &filters.name_contains {
            Ok(all().filter(|c| c.name.contains(needle)).collect())
        } else if let Some(needle) = &filters.description_contains {
            Ok(all().filter(|c| c.description.contains(needle)).collect())
        } else if let Some(needle) = &filters.contains {
            Ok(all()
                .filter(|c| c.name.contains(needle) || c.description.contains(needle))
                .collect())
        } else if let Some(tag) = &filters.tag {
            let tag = self
                .tag_names
                .get(tag)
                .and_then(|id| self.tags.get(id))
                .ok_or_else(|| CatalogError::TagNotFound(tag.clone()))?;
            Ok(all().filter(|c| tag.in_collections.contains(&c.id)).collect())
        } else if let Some((key, value)) = &filters.facet {
            let value = PropertyValue::from(value.as_str());
            Ok(all().filter(|c| c.properties.matches(key, &value)).collect())
        } else {
            Ok(all().collect())
        }
    }

    /// One-line summary: name, human-formatted volume, file count.
    pub fn collection_info(&self, name: &str) -> Result<String, CatalogError> {
        let c = self.retrieve_collection(name)?;
        Ok(format!(
            "Collection <{}> has {} in {} files",
            c.name,
            byte_format(c.volume),
            c.file_count()
        ))
    }

    pub fn delete_collection(&mut self, name: &str, force: bool) -> Result<(), CatalogError> {
        if name == UNLISTED {
            return Err(CatalogError::ReservedCollection(name.to_string()));
        }
        let id = self.collection_id(name)?;
        let member_files: Vec<EntityId> = self
            .collections
            .get(&id)
            .map(|c| c.files.iter().copied().collect())
            .unwrap_or_default();

        if !member_files.is_empty() {
            if !force {
                return Err(CatalogError::CollectionNotEmpty {
                    name: name.to_string(),
                    count: member_files.len(),
                });
            }
            for file_id in member_files {
                self.detach_file_from_collection(file_id, id)?;
                self.adopt_if_orphaned(file_id)?;
            }
        }

        debug!(collection = name, "deleting collection");
        self.collection_names.remove(name);
        self.collections.remove(&id);
        for tag in self.tags.values_mut() {
            tag.in_collections.remove(&id);
        }
        for variable in self.variables.values_mut() {
            variable.in_collections.remove(&id);
        }
        self.edges.remove(&id);
        for predicates in self.edges.values_mut() {
            for objects in predicates.values_mut() {
                objects.retain(|object| *object != id);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Volume bookkeeping. These four helpers are the only code that
    // touches the volume counters, in the same step as the membership
    // change they account for.
    // ------------------------------------------------------------------

    fn attach_file_to_collection(&mut self, file_id: EntityId, collection_id: EntityId) -> bool {
        let Some(file) = self.files.get_mut(&file_id) else {
            return false;
        };
        let Some(collection) = self.collections.get_mut(&collection_id) else {
            return false;
        };
        if !collection.files.insert(file_id) {
            return false;
        }
        file.in_collections.insert(collection_id);
        collection.volume += file.size;
        true
    }

    fn detach_file_from_collection(
        &mut self,
        file_id: EntityId,
        collection_id: EntityId,
    ) -> Result<(), CatalogError> {
        let Some(file) = self.files.get_mut(&file_id) else {
            return Ok(());
        };
        let Some(collection) = self.collections.get_mut(&collection_id) else {
            return Ok(());
        };
        if !collection.files.remove(&file_id) {
            return Err(CatalogError::FileNotInCollection {
                name: file.name.clone(),
                collection: collection.name.clone(),
            });
        }
        file.in_collections.remove(&collection_id);
        collection.volume = collection.volume.saturating_sub(file.size);
        Ok(())
    }

    fn attach_file_to_location(&mut self, file_id: EntityId, location_id: EntityId) -> bool {
        let Some(file) = self.files.get_mut(&file_id) else {
            return false;
        };
        let Some(location) = self.locations.get_mut(&location_id) else {
            return false;
        };
        if !location.holds_files.insert(file_id) {
            return false;
        }
        file.replicas.insert(location_id);
        location.volume += file.size;
        true
    }

    /// A file with no remaining collection memberships joins the reserved
    /// `unlisted` collection rather than disappearing from the catalog.
    fn adopt_if_orphaned(&mut self, file_id: EntityId) -> Result<(), CatalogError> {
        let orphaned = self
            .files
            .get(&file_id)
            .map(|f| f.in_collections.is_empty())
            .unwrap_or(false);
        if !orphaned {
            return Ok(());
        }
        let unlisted_id = match self.collection_names.get(UNLISTED) {
            Some(id) => *id,
            None => self.create_collection(UNLISTED, "Holds unlisted files", BTreeMap::new())?,
        };
        self.attach_file_to_collection(file_id, unlisted_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    pub fn retrieve_file(
        &self,
        path: &Utf8Path,
        name: &str,
        size: Option<u64>,
        checksum: Option<&str>,
    ) -> Result<&File, CatalogError> {
        if size.is_some() && checksum.is_some() {
            return Err(CatalogError::SizeAndChecksum);
        }
        let matches: Vec<&File> = self
            .files_at(path, name)
            .filter(|f| size.is_none_or(|s| f.size == s))
            .filter(|f| checksum.is_none_or(|c| f.checksum.as_deref() == Some(c)))
            .collect();
        match matches.len() {
            0 => Err(CatalogError::FileNotFound {
                path: path.to_owned(),
                name: name.to_string(),
            }),
            1 => Ok(matches[0]),
            count => Err(CatalogError::AmbiguousFile {
                path: path.to_owned(),
                name: name.to_string(),
                count,
            }),
        }
    }

    /// Like `retrieve_file` but with a combined path, returning the first
    /// match or `None` instead of an error.
    pub fn retrieve_file_if_present(
        &self,
        full_path: &str,
        size: Option<u64>,
        checksum: Option<&str>,
    ) -> Result<Option<&File>, CatalogError> {
        if size.is_some() && checksum.is_some() {
            return Err(CatalogError::SizeAndChecksum);
        }
        let full = Utf8Path::new(full_path);
        let (path, name) = match (full.parent(), full.file_name()) {
            (Some(path), Some(name)) => (path, name),
            _ => return Ok(None),
        };
        Ok(self.files_at(path, name).find(|f| {
            size.is_none_or(|s| f.size == s)
                && (checksum.is_none() || f.checksum.as_deref() == checksum)
        }))
    }

    fn files_at<'a>(&'a self, path: &Utf8Path, name: &str) -> impl Iterator<Item = &'a File> {
        self.file_paths
            .get(&format!("{path}/{name}"))
            .into_iter()
            .flatten()
            .filter_map(|id| self.files.get(id))
    }

    pub fn retrieve_files_which_match(&self, needle: &str) -> Vec<&File> {
        self.files
            .values()
            .filter(|f| f.name.contains(needle) || f.path.as_str().contains(needle))
            .collect()
    }

    pub fn retrieve_files_in_collection(
        &self,
        collection: &str,
        matching: Option<&str>,
        replicants: bool,
    ) -> Result<Vec<&File>, CatalogError> {
        let c = self.retrieve_collection(collection)?;
        Ok(c.files
            .iter()
            .filter_map(|id| self.files.get(id))
            .filter(|f| {
                matching.is_none_or(|m| f.name.contains(m) || f.path.as_str().contains(m))
            })
            .filter(|f| !replicants || f.replicas.len() > 1)
            .collect())
    }

    pub fn files(&self) -> impl Iterator<Item = &File> {
        self.files.values()
    }

    pub fn file(&self, id: EntityId) -> Option<&File> {
        self.files.get(&id)
    }

    pub fn collection(&self, id: EntityId) -> Option<&Collection> {
        self.collections.get(&id)
    }

    pub fn upload_files(
        &mut self,
        location: &str,
        collection: &str,
        records: &[FileRecord],
        strictness: MatchStrictness,
        update: bool,
    ) -> Result<UploadReport, CatalogError> {
        let collection_id = self.collection_id(collection)?;
        let location_id = self
            .location_names
            .get(location)
            .copied()
            .ok_or_else(|| CatalogError::LocationNotFound(location.to_string()))?;

        // Validate the whole batch before touching any table, so a rejected
        // record cannot leave volumes and memberships half-updated.
        if !update {
            let mut incoming = BTreeSet::new();
            for record in records {
                let exists = self.match_record(record, strictness).is_some();
                let repeated = !incoming.insert(format!("{}/{}", record.path, record.name));
                if exists || repeated {
                    return Err(CatalogError::DuplicateFile {
                        path: record.path.clone(),
                        name: record.name.clone(),
                    });
                }
            }
        }

        let mut report = UploadReport::default();
        for record in records {
            match self.match_record(record, strictness) {
                Some(file_id) => {
                    self.attach_file_to_location(file_id, location_id);
                    self.attach_file_to_collection(file_id, collection_id);
                    report.updated += 1;
                }
                None => {
                    let file_id = self.insert_file(record);
                    self.attach_file_to_location(file_id, location_id);
                    self.attach_file_to_collection(file_id, collection_id);
                    report.created += 1;
                }
            }
        }
        if let Some(c) = self.collections.get_mut(&collection_id) {
            c.is_batch = true;
        }
        debug!(
            collection,
            location,
            created = report.created,
            updated = report.updated,
            "uploaded file batch"
        );
        Ok(report)
    }

    fn match_record(&self, record: &FileRecord, strictness: MatchStrictness) -> Option<EntityId> {
        self.files_at(&record.path, &record.name)
            .find(|f| match strictness {
                MatchStrictness::PathName => true,
                MatchStrictness::PathNameSize => f.size == record.size,
                MatchStrictness::PathNameChecksum => f.checksum == record.checksum,
            })
            .map(|f| f.id)
    }

    fn insert_file(&mut self, record: &FileRecord) -> EntityId {
        let id = self.allocate_id();
        let file = File {
            id,
            name: record.name.clone(),
            path: record.path.clone(),
            size: record.size,
            checksum: record.checksum.clone(),
            checksum_method: record.checksum_method.clone(),
            format: record.resolved_format(),
            replicas: BTreeSet::new(),
            in_collections: BTreeSet::new(),
            attributes: PropertyStore::new(),
        };
        self.file_paths
            .entry(file.full_path())
            .or_default()
            .push(id);
        self.files.insert(id, file);
        id
    }

    /// Attach already-known files to a collection, creating the collection
    /// first if needed. If any path is unknown the whole operation fails
    /// and nothing is changed.
    pub fn organise(
        &mut self,
        collection: &str,
        file_paths: &[String],
        description: Option<&str>,
    ) -> Result<usize, CatalogError> {
        let mut resolved = Vec::with_capacity(file_paths.len());
        let mut missing = Vec::new();
        for full_path in file_paths {
            match self.retrieve_file_if_present(full_path, None, None)? {
                Some(file) => resolved.push(file.id),
                None => missing.push(full_path.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(CatalogError::UnknownFiles {
                count: missing.len(),
                paths: missing,
            });
        }

        let collection_id = match self.collection_names.get(collection) {
            Some(id) => *id,
            None => self.create_collection(
                collection,
                description.unwrap_or("Manually organised collection"),
                BTreeMap::new(),
            )?,
        };
        let mut attached = 0;
        for file_id in resolved {
            if self.attach_file_to_collection(file_id, collection_id) {
                attached += 1;
            }
        }
        Ok(attached)
    }

    /// Remove a file from a collection, migrating it to `unlisted` if that
    /// was its last membership.
    pub fn remove_file_from_collection(
        &mut self,
        collection: &str,
        path: &Utf8Path,
        name: &str,
    ) -> Result<(), CatalogError> {
        let file_id = self.retrieve_file(path, name, None, None)?.id;
        let collection_id = self.collection_id(collection)?;
        self.detach_file_from_collection(file_id, collection_id)?;
        self.adopt_if_orphaned(file_id)
    }

    pub fn set_file_attribute(
        &mut self,
        path: &Utf8Path,
        name: &str,
        key: &str,
        value: PropertyValue,
    ) -> Result<(), CatalogError> {
        let id = self.retrieve_file(path, name, None, None)?.id;
        if let Some(file) = self.files.get_mut(&id) {
            file.attributes.set(key, value);
        }
        Ok(())
    }

    pub fn file_attribute(
        &self,
        path: &Utf8Path,
        name: &str,
        key: &str,
    ) -> Result<Option<&PropertyValue>, CatalogError> {
        Ok(self.retrieve_file(path, name, None, None)?.attributes.get(key))
    }

    pub fn files_with_attribute(&self, key: &str, value: &PropertyValue) -> Vec<&File> {
        self.files
            .values()
            .filter(|f| f.attributes.matches(key, value))
            .collect()
    }

    // ------------------------------------------------------------------
    // Locations and protocols
    // ------------------------------------------------------------------

    pub fn create_location(
        &mut self,
        name: &str,
        protocols: &[&str],
    ) -> Result<EntityId, CatalogError> {
        let name = validate_name("location", name)?;
        if self.location_names.contains_key(&name) {
            return Err(CatalogError::DuplicateLocation(name));
        }
        let id = self.allocate_id();
        self.location_names.insert(name.clone(), id);
        self.locations.insert(
            id,
            StorageLocation {
                id,
                name,
                volume: 0,
                protocols: BTreeSet::new(),
                holds_files: BTreeSet::new(),
            },
        );
        for protocol in protocols {
            let protocol_id = self.protocol_get_or_make(protocol)?;
            self.link_location_protocol(id, protocol_id);
        }
        Ok(id)
    }

    pub fn retrieve_location(&self, name: &str) -> Result<&StorageLocation, CatalogError> {
        self.location_names
            .get(name)
            .and_then(|id| self.locations.get(id))
            .ok_or_else(|| CatalogError::LocationNotFound(name.to_string()))
    }

    pub fn retrieve_locations(&self) -> Vec<&StorageLocation> {
        self.location_names
            .values()
            .filter_map(|id| self.locations.get(id))
            .collect()
    }

    pub fn location_info(&self, name: &str) -> Result<String, CatalogError> {
        let loc = self.retrieve_location(name)?;
        Ok(format!(
            "Location <{}> has {} in {} files",
            loc.name,
            byte_format(loc.volume),
            loc.holds_files.len()
        ))
    }

    pub fn delete_location(&mut self, name: &str) -> Result<(), CatalogError> {
        let loc = self.retrieve_location(name)?;
        if !loc.holds_files.is_empty() {
            return Err(CatalogError::LocationNotEmpty {
                name: name.to_string(),
                count: loc.holds_files.len(),
            });
        }
        let id = loc.id;
        self.location_names.remove(name);
        self.locations.remove(&id);
        for protocol in self.protocols.values_mut() {
            protocol.used_by.remove(&id);
        }
        Ok(())
    }

    pub fn add_protocol(
        &mut self,
        name: &str,
        locations: &[&str],
    ) -> Result<EntityId, CatalogError> {
        let name = validate_name("protocol", name)?;
        if self.protocol_names.contains_key(&name) {
            return Err(CatalogError::DuplicateProtocol(name));
        }
        let id = self.allocate_id();
        self.protocol_names.insert(name.clone(), id);
        self.protocols.insert(
            id,
            StorageProtocol {
                id,
                name,
                used_by: BTreeSet::new(),
            },
        );
        for location in locations {
            let location_id = match self.location_names.get(*location) {
                Some(existing) => *existing,
                None => self.create_location(location, &[])?,
            };
            self.link_location_protocol(location_id, id);
        }
        Ok(id)
    }

    fn protocol_get_or_make(&mut self, name: &str) -> Result<EntityId, CatalogError> {
        match self.protocol_names.get(name) {
            Some(id) => Ok(*id),
            None => self.add_protocol(name, &[]),
        }
    }

    fn link_location_protocol(&mut self, location_id: EntityId, protocol_id: EntityId) {
        if let Some(location) = self.locations.get_mut(&location_id) {
            location.protocols.insert(protocol_id);
        }
        if let Some(protocol) = self.protocols.get_mut(&protocol_id) {
            protocol.used_by.insert(location_id);
        }
    }

    pub fn retrieve_protocols(&self) -> Vec<&StorageProtocol> {
        self.protocol_names
            .values()
            .filter_map(|id| self.protocols.get(id))
            .collect()
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    pub fn create_tag(&mut self, name: &str) -> Result<EntityId, CatalogError> {
        let name = validate_name("tag", name)?;
        if self.tag_names.contains_key(&name) {
            return Err(CatalogError::DuplicateTag(name));
        }
        let id = self.allocate_id();
        self.tag_names.insert(name.clone(), id);
        self.tags.insert(
            id,
            Tag {
                id,
                name,
                in_collections: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    /// Attach a tag to a collection, creating the tag if it is new.
    pub fn tag_collection(&mut self, collection: &str, tag: &str) -> Result<(), CatalogError> {
        let collection_id = self.collection_id(collection)?;
        let tag_id = match self.tag_names.get(tag) {
            Some(id) => *id,
            None => self.create_tag(tag)?,
        };
        if let Some(tag) = self.tags.get_mut(&tag_id) {
            tag.in_collections.insert(collection_id);
        }
        if let Some(collection) = self.collections.get_mut(&collection_id) {
            collection.tags.insert(tag_id);
        }
        Ok(())
    }

    pub fn remove_tag_from_collection(
        &mut self,
        tag: &str,
        collection: &str,
    ) -> Result<(), CatalogError> {
        let collection_id = self.collection_id(collection)?;
        let tag_id = self
            .tag_names
            .get(tag)
            .copied()
            .ok_or_else(|| CatalogError::TagNotFound(tag.to_string()))?;
        let attached = self
            .collections
            .get_mut(&collection_id)
            .map(|c| c.tags.remove(&tag_id))
            .unwrap_or(false);
        if !attached {
            return Err(CatalogError::TagNotOnCollection {
                tag: tag.to_string(),
                collection: collection.to_string(),
            });
        }
        if let Some(tag) = self.tags.get_mut(&tag_id) {
            tag.in_collections.remove(&collection_id);
        }
        Ok(())
    }

    pub fn delete_tag(&mut self, name: &str) -> Result<(), CatalogError> {
        let id = self
            .tag_names
            .get(name)
            .copied()
            .ok_or_else(|| CatalogError::TagNotFound(name.to_string()))?;
        self.tag_names.remove(name);
        self.tags.remove(&id);
        for collection in self.collections.values_mut() {
            collection.tags.remove(&id);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Facets
    // ------------------------------------------------------------------

    pub fn add_facet(
        &mut self,
        collection: &str,
        key: &str,
        value: &str,
    ) -> Result<(), CatalogError> {
        let id = self.collection_id(collection)?;
        if let Some(c) = self.collections.get_mut(&id) {
            c.properties.set(key, value);
        }
        Ok(())
    }

    pub fn remove_facet(&mut self, collection: &str, key: &str) -> Result<(), CatalogError> {
        let id = self.collection_id(collection)?;
        let removed = self
            .collections
            .get_mut(&id)
            .and_then(|c| c.properties.remove(key));
        if removed.is_none() {
            return Err(CatalogError::UnknownFacet {
                key: key.to_string(),
                collection: collection.to_string(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Relationships. Plain directed edges: no reciprocal edge is ever
    // created by the storage layer itself.
    // ------------------------------------------------------------------

    pub fn link_one_way(
        &mut self,
        subject: &str,
        object: &str,
        predicate: &str,
    ) -> Result<(), CatalogError> {
        let subject_id = self.collection_id(subject)?;
        let object_id = self.collection_id(object)?;
        self.insert_edge(subject_id, predicate, object_id);
        Ok(())
    }

    pub fn link_symmetric(
        &mut self,
        collection_one: &str,
        collection_two: &str,
        predicate: &str,
    ) -> Result<(), CatalogError> {
        self.link_pair(collection_one, collection_two, predicate, Some(predicate))
    }

    pub fn link_pair(
        &mut self,
        collection_one: &str,
        collection_two: &str,
        predicate_12: &str,
        predicate_21: Option<&str>,
    ) -> Result<(), CatalogError> {
        let one = self.collection_id(collection_one)?;
        let two = self.collection_id(collection_two)?;
        self.insert_edge(one, predicate_12, two);
        if let Some(predicate_21) = predicate_21 {
            if one != two {
                self.insert_edge(two, predicate_21, one);
            }
        }
        Ok(())
    }

    fn insert_edge(&mut self, subject: EntityId, predicate: &str, object: EntityId) {
        let objects = self
            .edges
            .entry(subject)
            .or_default()
            .entry(predicate.to_string())
            .or_default();
        if !objects.contains(&object) {
            objects.push(object);
        }
    }

    /// Collections reachable from `collection` via exactly `predicate`,
    /// in link order. Empty when none exist.
    pub fn related(
        &self,
        collection: &str,
        predicate: &str,
    ) -> Result<Vec<&Collection>, CatalogError> {
        let id = self.collection_id(collection)?;
        Ok(self
            .edges
            .get(&id)
            .and_then(|predicates| predicates.get(predicate))
            .into_iter()
            .flatten()
            .filter_map(|object| self.collections.get(object))
            .collect())
    }

    /// All outgoing predicates of `collection`, mapped to object names.
    pub fn relationships(
        &self,
        collection: &str,
    ) -> Result<BTreeMap<String, Vec<String>>, CatalogError> {
        let id = self.collection_id(collection)?;
        let mut out = BTreeMap::new();
        if let Some(predicates) = self.edges.get(&id) {
            for (predicate, objects) in predicates {
                let names = objects
                    .iter()
                    .filter_map(|object| self.collections.get(object))
                    .map(|c| c.name.clone())
                    .collect();
                out.insert(predicate.clone(), names);
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Variables and cell methods
    // ------------------------------------------------------------------

    pub fn add_variable(&mut self, record: &VariableRecord) -> Result<VariableIngest, CatalogError> {
        // Narrow properties and parse cell methods before creating
        // anything, so a malformed record leaves no partial variable.
        let mut properties = PropertyStore::new();
        for (key, value) in &record.properties {
            properties.set(key.clone(), PropertyValue::from_json(key, value)?);
        }
        let parsed = match &record.cell_methods {
            Some(text) => parse_cell_methods(text)?,
            None => Vec::new(),
        };

        let standard_name = record.standard_name.clone();
        let mut long_name = record.long_name.clone();
        if standard_name.is_none() && long_name.is_none() {
            long_name = Some(PLACEHOLDER_NAME.to_string());
        }

        let id = self.allocate_id();
        let mut cell_method_ids = BTreeSet::new();
        for parsed_cm in &parsed {
            for axis in &parsed_cm.axes {
                let cm_id = self.cell_method_get_or_make(axis, &parsed_cm.method);
                cell_method_ids.insert(cm_id);
                if let Some(cm) = self.cell_methods.get_mut(&cm_id) {
                    cm.used_by.insert(id);
                }
            }
        }

        let mut in_files = BTreeSet::new();
        let mut unresolved = Vec::new();
        for full_path in &record.files {
            match self.retrieve_file_if_present(full_path, None, None)? {
                Some(file) => {
                    in_files.insert(file.id);
                }
                None => unresolved.push(full_path.clone()),
            }
        }

        self.variables.insert(
            id,
            Variable {
                id,
                standard_name,
                long_name,
                size: record.size,
                domain: record.domain.clone(),
                properties,
                cell_methods: cell_method_ids,
                in_files,
                in_collections: BTreeSet::new(),
            },
        );
        Ok(VariableIngest {
            id,
            unresolved_files: unresolved,
        })
    }

    /// Ingest a batch of variable records, skipping malformed ones with a
    /// diagnostic instead of aborting the batch.
    pub fn add_variables(&mut self, records: &[VariableRecord]) -> IngestReport {
        let mut report = IngestReport::default();
        for record in records {
            let identity = record
                .standard_name
                .as_deref()
                .or(record.long_name.as_deref())
                .unwrap_or(PLACEHOLDER_NAME)
                .to_string();
            match self.add_variable(record) {
                Ok(ingest) => report.added.push(ingest.id),
                Err(err) => {
                    warn!(variable = %identity, error = %err, "skipping variable");
                    report.skipped.push(SkippedVariable {
                        identity,
                        reason: err.to_string(),
                    });
                }
            }
        }
        report
    }

    pub fn add_variable_to_collection(
        &mut self,
        collection: &str,
        variable_id: EntityId,
    ) -> Result<(), CatalogError> {
        let collection_id = self.collection_id(collection)?;
        let variable = self
            .variables
            .get_mut(&variable_id)
            .ok_or_else(|| CatalogError::VariableNotFound(variable_id.to_string()))?;
        variable.in_collections.insert(collection_id);
        Ok(())
    }

    pub fn retrieve_variables(&self, query: &VariableQuery) -> Vec<&Variable> {
        self.variables
            .values()
            .filter(|v| match query {
                VariableQuery::Identity(value) => v.identity() == value,
                VariableQuery::StandardName(value) => v.standard_name.as_deref() == Some(value),
                VariableQuery::LongName(value) => v.long_name.as_deref() == Some(value),
                VariableQuery::Size(value) => v.size == *value,
                VariableQuery::Domain(value) => &v.domain == value,
                VariableQuery::Property(key, value) => v.properties.matches(key, value),
            })
            .collect()
    }

    pub fn search_variables(&self, needle: &str) -> Vec<&Variable> {
        self.variables
            .values()
            .filter(|v| v.identity().contains(needle))
            .collect()
    }

    pub fn retrieve_variables_in_collection(
        &self,
        collection: &str,
    ) -> Result<Vec<&Variable>, CatalogError> {
        let id = self.collection_id(collection)?;
        Ok(self
            .variables
            .values()
            .filter(|v| v.in_collections.contains(&id))
            .collect())
    }

    /// Which collections hold files of this variable, with per-collection
    /// file counts.
    pub fn collections_with_variable(
        &self,
        variable_id: EntityId,
    ) -> Result<BTreeMap<String, usize>, CatalogError> {
        let variable = self
            .variables
            .get(&variable_id)
            .ok_or_else(|| CatalogError::VariableNotFound(variable_id.to_string()))?;
        let mut counts = BTreeMap::new();
        for file_id in &variable.in_files {
            let Some(file) = self.files.get(file_id) else {
                continue;
            };
            for collection_id in &file.in_collections {
                if let Some(collection) = self.collections.get(collection_id) {
                    *counts.entry(collection.name.clone()).or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }

    pub fn delete_variable(&mut self, variable_id: EntityId) -> Result<(), CatalogError> {
        let variable = self
            .variables
            .remove(&variable_id)
            .ok_or_else(|| CatalogError::VariableNotFound(variable_id.to_string()))?;
        for cm_id in &variable.cell_methods {
            if let Some(cm) = self.cell_methods.get_mut(cm_id) {
                cm.used_by.remove(&variable_id);
            }
        }
        Ok(())
    }

    pub fn cell_method(&self, axis: &str, method: &str) -> Option<&CellMethod> {
        self.cell_methods
            .values()
            .find(|cm| cm.axis == axis && cm.method == method)
    }

    pub fn cell_method_add(&mut self, axis: &str, method: &str) -> Result<EntityId, CatalogError> {
        if self.cell_method(axis, method).is_some() {
            return Err(CatalogError::DuplicateCellMethod {
                axis: axis.to_string(),
                method: method.to_string(),
            });
        }
        let id = self.allocate_id();
        self.cell_methods.insert(
            id,
            CellMethod {
                id,
                axis: axis.to_string(),
                method: method.to_string(),
                used_by: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    pub fn cell_method_get_or_make(&mut self, axis: &str, method: &str) -> EntityId {
        if let Some(cm) = self.cell_method(axis, method) {
            return cm.id;
        }
        let id = self.allocate_id();
        self.cell_methods.insert(
            id,
            CellMethod {
                id,
                axis: axis.to_string(),
                method: method.to_string(),
                used_by: BTreeSet::new(),
            },
        );
        id
    }
}
