use std::fs;
use std::path::Path;

use playout_engine::catalog::{Catalog, CatalogError, PlaylistOrder};

fn touch(root: &Path, rel: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, b"x").unwrap();
}

fn names(c: &Catalog) -> Vec<String> {
    c.items()
        .iter()
        .map(|i| i.path.strip_prefix(c.root()).unwrap().to_string_lossy().replace('\\', "/"))
        .collect()
}

fn exts(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn walks_subdirectories_and_matches_extensions_case_insensitively() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "b.MKV");
    touch(dir.path(), "a.mkv");
    touch(dir.path(), "season 2/c.mp4");
    touch(dir.path(), "notes.txt");
    touch(dir.path(), "noext");

    let c = Catalog::open(dir.path(), &exts(&["mkv", "mp4"]), PlaylistOrder::Path).unwrap();
    assert_eq!(names(&c), vec!["a.mkv", "b.MKV", "season 2/c.mp4"]);
}

#[test]
fn ordering_is_stable_across_rescans() {
    let dir = tempfile::tempdir().unwrap();
    for f in ["z.mkv", "m.mkv", "a/1.mkv", "a/2.mkv"] {
        touch(dir.path(), f);
    }

    let mut c = Catalog::open(dir.path(), &exts(&["mkv"]), PlaylistOrder::Path).unwrap();
    let first = names(&c);
    assert_eq!(c.rescan().unwrap(), 4);
    assert_eq!(names(&c), first);

    touch(dir.path(), "b.mkv");
    assert_eq!(c.rescan().unwrap(), 5);
    assert_eq!(names(&c), vec!["a/1.mkv", "a/2.mkv", "b.mkv", "m.mkv", "z.mkv"]);
}

#[test]
fn episode_order_spans_folders() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "Season 2/Show S02E01.mkv");
    touch(dir.path(), "Season 1/Show S01E10.mkv");
    touch(dir.path(), "Season 1/Show S01E02.mkv");
    touch(dir.path(), "bonus.mkv");

    let c = Catalog::open(dir.path(), &exts(&["mkv"]), PlaylistOrder::Episode).unwrap();
    let titles: Vec<&str> = c.items().iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, ["S01E02", "S01E10", "S02E01", "bonus"]);
    assert_eq!(c.find_start("S01E10"), Some(1));
}

#[test]
fn empty_directory_is_an_empty_catalog() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "readme.md");
    let c = Catalog::open(dir.path(), &exts(&["mkv"]), PlaylistOrder::Path).unwrap();
    assert!(c.is_empty());
}

#[test]
fn missing_or_non_directory_roots_are_errors() {
    let dir = tempfile::tempdir().unwrap();

    let err = Catalog::open(dir.path().join("nope"), &exts(&["mkv"]), PlaylistOrder::Path).unwrap_err();
    assert!(matches!(err, CatalogError::Missing(_)));

    touch(dir.path(), "file.mkv");
    let err = Catalog::open(dir.path().join("file.mkv"), &exts(&["mkv"]), PlaylistOrder::Path).unwrap_err();
    assert!(matches!(err, CatalogError::NotADirectory(_)));
}

#[test]
fn failed_rescan_keeps_the_previous_list() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("lib");
    touch(&root, "a.mkv");

    let mut c = Catalog::open(&root, &exts(&["mkv"]), PlaylistOrder::Path).unwrap();
    fs::remove_dir_all(&root).unwrap();
    assert!(c.rescan().is_err());
    assert_eq!(names(&c), vec!["a.mkv"]);
}
