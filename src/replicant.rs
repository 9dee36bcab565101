use std::collections::BTreeSet;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::catalog::{Catalog, EntityId, File};
use crate::domain::ReplicantCheck;
use crate::error::CatalogError;

/// Options for a replicant search.
#[derive(Debug, Clone)]
pub struct ReplicantOptions {
    /// Literal prefix removed from each source file's path before
    /// comparison, when the path starts with it.
    pub strip_base: Option<String>,
    /// Require the candidate path to match the (stripped) source path.
    pub match_full_path: bool,
    pub check: ReplicantCheck,
    /// Secondary pass reporting collections which hold a match for every
    /// file in the source collection.
    pub match_entire_collection: bool,
    /// Deliberate placeholder: searching from the larger candidate set
    /// toward the smaller source set. Always fails.
    pub try_reverse_for_speed: bool,
}

impl Default for ReplicantOptions {
    fn default() -> Self {
        Self {
            strip_base: None,
            match_full_path: false,
            check: ReplicantCheck::Both,
            match_entire_collection: false,
            try_reverse_for_speed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileSummary {
    pub name: String,
    pub path: Utf8PathBuf,
    pub size: u64,
}

impl FileSummary {
    fn of(file: &File) -> Self {
        Self {
            name: file.name.clone(),
            path: file.path.clone(),
            size: file.size,
        }
    }
}

/// The source files of the searched collection and, for each, its matching
/// candidates from the whole file table. A source file with more than one
/// candidate has probable replicas (the file itself always matches).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplicantReport {
    pub sources: Vec<FileSummary>,
    pub matches: Vec<Vec<FileSummary>>,
    pub duplicate_collections: Vec<String>,
}

impl ReplicantReport {
    pub fn has_replicas(&self, index: usize) -> bool {
        self.matches
            .get(index)
            .map(|candidates| candidates.len() > 1)
            .unwrap_or(false)
    }
}

/// Find files elsewhere in the catalog that are probably copies of files in
/// `collection`, by heuristic name/size/path comparison rather than the
/// already-known replica relation. Read-only: the `&Catalog` borrow is the
/// consistent snapshot for the whole search.
pub fn locate_replicants(
    catalog: &Catalog,
    collection: &str,
    options: &ReplicantOptions,
) -> Result<ReplicantReport, CatalogError> {
    if options.try_reverse_for_speed {
        return Err(CatalogError::ReverseSearchUnimplemented);
    }

    let sources = catalog.retrieve_files_in_collection(collection, None, false)?;
    let strip_base = options.strip_base.as_deref().unwrap_or("");

    let mut report = ReplicantReport::default();
    let mut match_ids: Vec<Vec<EntityId>> = Vec::with_capacity(sources.len());
    for source in &sources {
        let stripped = strip(source.path.as_str(), strip_base);
        let candidates: Vec<&File> = catalog
            .files()
            .filter(|candidate| satisfies_check(candidate, source, options.check))
            .filter(|candidate| {
                !options.match_full_path || path_matches(candidate.path.as_str(), stripped)
            })
            .collect();
        match_ids.push(candidates.iter().map(|c| c.id).collect());
        report.sources.push(FileSummary::of(source));
        report
            .matches
            .push(candidates.iter().map(|c| FileSummary::of(c)).collect());
    }

    if options.match_entire_collection && !sources.is_empty() {
        report.duplicate_collections = wholesale_duplicates(catalog, collection, &match_ids);
    }

    Ok(report)
}

fn satisfies_check(candidate: &File, source: &File, check: ReplicantCheck) -> bool {
    match check {
        ReplicantCheck::Name => candidate.name == source.name,
        ReplicantCheck::Size => candidate.size == source.size,
        ReplicantCheck::Both => candidate.name == source.name && candidate.size == source.size,
    }
}

/// If `path` starts with `stem`, return the remainder, else the whole path.
fn strip<'a>(path: &'a str, stem: &str) -> &'a str {
    if stem.is_empty() {
        return path;
    }
    path.strip_prefix(stem).unwrap_or(path)
}

/// A candidate path matches when it equals the stripped source path or ends
/// with it on a path-component boundary (a relocated tree keeps its suffix).
fn path_matches(candidate: &str, stripped_source: &str) -> bool {
    if candidate == stripped_source {
        return true;
    }
    if stripped_source.is_empty() {
        return false;
    }
    let suffix = if stripped_source.starts_with('/') {
        stripped_source.to_string()
    } else {
        format!("/{stripped_source}")
    };
    candidate.ends_with(&suffix)
}

/// Collections, other than the source, which contain a candidate match for
/// every file in the source collection.
fn wholesale_duplicates(
    catalog: &Catalog,
    collection: &str,
    match_ids: &[Vec<EntityId>],
) -> Vec<String> {
    let mut survivors: Option<BTreeSet<EntityId>> = None;
    for candidates in match_ids {
        let mut holders = BTreeSet::new();
        for candidate_id in candidates {
            if let Some(candidate) = catalog.file(*candidate_id) {
                holders.extend(candidate.in_collections.iter().copied());
            }
        }
        survivors = Some(match survivors {
            Some(previous) => previous.intersection(&holders).copied().collect(),
            None => holders,
        });
        if survivors.as_ref().is_some_and(|s| s.is_empty()) {
            break;
        }
    }

    survivors
        .unwrap_or_default()
        .into_iter()
        .filter_map(|id| catalog.collection(id))
        .filter(|c| c.name != collection)
        .map(|c| c.name.clone())
        .collect()
}
