use std::collections::BTreeMap;
use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use cf_catalog::catalog::Catalog;
use cf_catalog::domain::{CollectionFilters, FileRecord, MatchStrictness};
use cf_catalog::error::CatalogError;
use cf_catalog::store::CatalogStore;

fn scratch_store(dir: &tempfile::TempDir) -> CatalogStore {
    let path = Utf8PathBuf::from_path_buf(dir.path().join("catalog.json")).unwrap();
    CatalogStore::new(path)
}

fn populated() -> Catalog {
    let mut db = Catalog::new();
    db.create_location("disk", &["posix"]).unwrap();
    db.create_collection("run1", "first", BTreeMap::new()).unwrap();
    db.create_collection("run2", "second", BTreeMap::new()).unwrap();
    db.upload_files(
        "disk",
        "run1",
        &[
            FileRecord::new("/data", "a.nc", 10),
            FileRecord::new("/data", "b.nc", 20),
        ],
        MatchStrictness::PathName,
        true,
    )
    .unwrap();
    db.tag_collection("run1", "ocean").unwrap();
    db.add_facet("run1", "resolution", "N512").unwrap();
    db.link_symmetric("run1", "run2", "sibling").unwrap();
    db
}

#[test]
fn missing_file_loads_an_empty_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let store = scratch_store(&dir);
    let catalog = store.load().unwrap();
    assert!(catalog
        .retrieve_collections(&CollectionFilters::default())
        .unwrap()
        .is_empty());
}

#[test]
fn save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = scratch_store(&dir);
    let original = populated();
    store.save(&original).unwrap();

    let loaded = store.load().unwrap();
    let run1 = loaded.retrieve_collection("run1").unwrap();
    assert_eq!(run1.volume, 30);
    assert_eq!(run1.file_count(), 2);
    assert!(run1.is_batch);

    let files = loaded.retrieve_files_in_collection("run1", None, false).unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(loaded.retrieve_location("disk").unwrap().volume, 30);

    let tagged = loaded
        .retrieve_collections(&CollectionFilters::tag("ocean"))
        .unwrap();
    assert_eq!(tagged.len(), 1);
    let faceted = loaded
        .retrieve_collections(&CollectionFilters::facet("resolution", "N512"))
        .unwrap();
    assert_eq!(faceted.len(), 1);

    let related = loaded.related("run2", "sibling").unwrap();
    assert_eq!(related[0].name, "run1");
}

#[test]
fn ids_keep_advancing_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let store = scratch_store(&dir);
    store.save(&populated()).unwrap();

    let mut loaded = store.load().unwrap();
    loaded
        .create_collection("run3", "third", BTreeMap::new())
        .unwrap();
    let run2 = loaded.retrieve_collection("run2").unwrap().id;
    let run3 = loaded.retrieve_collection("run3").unwrap().id;
    assert!(run3 > run2);
}

#[test]
fn corrupt_files_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = scratch_store(&dir);
    fs::write(store.path().as_std_path(), "not json at all").unwrap();
    assert_matches!(store.load().unwrap_err(), CatalogError::CatalogParse(_));
}

#[test]
fn schema_version_is_checked() {
    let dir = tempfile::tempdir().unwrap();
    let store = scratch_store(&dir);
    store.save(&Catalog::new()).unwrap();
    let rewritten = fs::read_to_string(store.path().as_std_path())
        .unwrap()
        .replace("\"schema_version\": 1", "\"schema_version\": 99");
    fs::write(store.path().as_std_path(), rewritten).unwrap();
    assert_matches!(
        store.load().unwrap_err(),
        CatalogError::SchemaVersion {
            found: 99,
            expected: 1,
        }
    );
}

#[test]
fn saving_overwrites_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let store = scratch_store(&dir);
    store.save(&populated()).unwrap();

    let mut updated = store.load().unwrap();
    updated.delete_collection("run2", false).unwrap();
    store.save(&updated).unwrap();

    let reloaded = store.load().unwrap();
    assert!(reloaded.retrieve_collection("run2").is_err());
    assert!(reloaded.retrieve_collection("run1").is_ok());
}
