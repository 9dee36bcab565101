use std::collections::BTreeMap;

use assert_matches::assert_matches;

use cf_catalog::catalog::Catalog;
use cf_catalog::domain::{FileRecord, MatchStrictness, ReplicantCheck};
use cf_catalog::error::CatalogError;
use cf_catalog::replicant::{ReplicantOptions, locate_replicants};

fn upload(db: &mut Catalog, collection: &str, path: &str, name: &str, size: u64) {
    db.upload_files(
        "loc",
        collection,
        &[FileRecord::new(path, name, size)],
        MatchStrictness::PathNameSize,
        true,
    )
    .unwrap();
}

/// Two collections holding a file of the same name and size at different
/// paths, plus an unrelated file.
fn two_copies() -> Catalog {
    let mut db = Catalog::new();
    db.create_location("loc", &[]).unwrap();
    db.create_collection("run1", "first copy", BTreeMap::new()).unwrap();
    db.create_collection("run2", "second copy", BTreeMap::new()).unwrap();
    upload(&mut db, "run1", "/gws/run1/data", "a.nc", 100);
    upload(&mut db, "run2", "/archive/run2/data", "a.nc", 100);
    upload(&mut db, "run2", "/archive/run2/data", "other.nc", 7);
    db
}

fn options(check: ReplicantCheck) -> ReplicantOptions {
    ReplicantOptions {
        check,
        ..ReplicantOptions::default()
    }
}

#[test]
fn name_and_size_copies_are_found() {
    let db = two_copies();
    let report = locate_replicants(&db, "run1", &options(ReplicantCheck::Both)).unwrap();
    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.matches[0].len(), 2);
    assert!(report.has_replicas(0));
}

#[test]
fn size_check_ignores_names() {
    let mut db = two_copies();
    // rename-style copy: same size, different name
    upload(&mut db, "run2", "/archive/run2/data", "a_renamed.nc", 100);

    let report = locate_replicants(&db, "run1", &options(ReplicantCheck::Size)).unwrap();
    assert_eq!(report.matches[0].len(), 3);

    let report = locate_replicants(&db, "run1", &options(ReplicantCheck::Name)).unwrap();
    assert_eq!(report.matches[0].len(), 2);
}

#[test]
fn full_path_mode_filters_relocated_copies() {
    let db = two_copies();
    let opts = ReplicantOptions {
        match_full_path: true,
        ..options(ReplicantCheck::Both)
    };
    let report = locate_replicants(&db, "run1", &opts).unwrap();
    // only the source file itself matches its own path
    assert_eq!(report.matches[0].len(), 1);
    assert!(!report.has_replicas(0));
}

#[test]
fn strip_base_matches_relocated_trees() {
    let mut db = Catalog::new();
    db.create_location("loc", &[]).unwrap();
    db.create_collection("disk", "working copy", BTreeMap::new()).unwrap();
    db.create_collection("tape", "archived copy", BTreeMap::new()).unwrap();
    upload(&mut db, "disk", "/gws/nopw/run5/day", "ta.nc", 10);
    upload(&mut db, "tape", "/backup/gws/nopw/run5/day", "ta.nc", 10);

    // without stripping, full-path mode sees only the source itself
    let opts = ReplicantOptions {
        match_full_path: true,
        ..options(ReplicantCheck::Both)
    };
    let report = locate_replicants(&db, "disk", &opts).unwrap();
    assert_eq!(report.matches[0].len(), 1);

    // stripping the disk prefix leaves a suffix the tape copy ends with
    let opts = ReplicantOptions {
        strip_base: Some("/gws/nopw".to_string()),
        match_full_path: true,
        ..options(ReplicantCheck::Both)
    };
    let report = locate_replicants(&db, "disk", &opts).unwrap();
    assert_eq!(report.matches[0].len(), 2);
    assert!(report.has_replicas(0));
}

#[test]
fn entire_collection_pass_reports_wholesale_duplicates() {
    let mut db = two_copies();
    upload(&mut db, "run2", "/archive/run2/extra", "b.nc", 5);
    // run2 holds a match for every run1 file, not the other way round
    let opts = ReplicantOptions {
        match_entire_collection: true,
        ..options(ReplicantCheck::Both)
    };
    let report = locate_replicants(&db, "run1", &opts).unwrap();
    assert_eq!(report.duplicate_collections, vec!["run2".to_string()]);

    let report = locate_replicants(&db, "run2", &opts).unwrap();
    assert!(report.duplicate_collections.is_empty());
}

#[test]
fn empty_collection_has_no_replicas() {
    let mut db = two_copies();
    db.create_collection("empty", "nothing here", BTreeMap::new()).unwrap();
    let opts = ReplicantOptions {
        match_entire_collection: true,
        ..options(ReplicantCheck::Both)
    };
    let report = locate_replicants(&db, "empty", &opts).unwrap();
    assert!(report.sources.is_empty());
    assert!(report.duplicate_collections.is_empty());
}

#[test]
fn reverse_search_is_a_placeholder() {
    let db = two_copies();
    let opts = ReplicantOptions {
        try_reverse_for_speed: true,
        ..ReplicantOptions::default()
    };
    let err = locate_replicants(&db, "run1", &opts).unwrap_err();
    assert_matches!(err, CatalogError::ReverseSearchUnimplemented);
}

#[test]
fn unknown_collection_is_an_error() {
    let db = two_copies();
    let err = locate_replicants(&db, "absent", &ReplicantOptions::default()).unwrap_err();
    assert_matches!(err, CatalogError::CollectionNotFound(_));
}
