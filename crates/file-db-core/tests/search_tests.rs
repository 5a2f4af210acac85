#![cfg(unix)]

use file_db_core::hasher::HashAlgorithm;
use file_db_core::search::{
    find_duplicate_directory, find_duplicate_files, search_directories, search_files, search_hash,
    FileSearch, MatchKind,
};
use file_db_core::storage::models::{DigestResult, DirStatus, FileEntry, Snapshot, SubdirEntry};
use file_db_core::storage::Database;
use file_db_core::{CrawlFrequency, CrawlPriority};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const NOW: i64 = 1_700_000_000;

fn file(name: &str, size: i64, mtime: i64) -> FileEntry {
    FileEntry {
        name: name.to_string(),
        size,
        ctime: Some(mtime),
        mtime: Some(mtime),
        atime: None,
    }
}

/// Catalog `/photos`, `/backup`, `/backup/old` and `/misc`, then hash every file
/// with the digests given per path.
fn build_catalog() -> Database {
    let db = Database::open_in_memory().unwrap();
    let tree: Vec<(&str, Vec<FileEntry>, Vec<&str>)> = vec![
        ("/photos", vec![file("a.jpg", 10, NOW - 500), file("b.PNG", 30, NOW - 10)], vec![]),
        (
            "/backup",
            vec![file("a.jpg", 10, NOW - 400), file("copy.bin", 10, NOW - 400)],
            vec!["old"],
        ),
        ("/backup/old", vec![file("b.png", 30, NOW - 300)], vec![]),
        ("/misc", vec![file("a.jpg", 10, NOW - 200), file("a.jpg.txt", 99, NOW - 200)], vec![]),
    ];

    for (dir_path, _, _) in &tree {
        if *dir_path != "/backup/old" {
            db.add_root_directory(dir_path, None, None, 86_400, NOW).unwrap();
        }
    }

    for (dir_path, files, subdirs) in tree {
        db.trigger_crawl(dir_path, NOW).unwrap();
        let tasks = db
            .claim_due_directories("indexer", 100, NOW, &CrawlPriority::default())
            .unwrap();
        let task = tasks.into_iter().find(|t| t.dir_path == dir_path).unwrap();
        let snapshot = Snapshot {
            dir_id: task.dir_id,
            dir_path: task.dir_path.clone(),
            claimed_by: task.claimed_by.clone(),
            status: DirStatus::Present,
            crawled_on: NOW,
            files,
            subdirs: subdirs
                .into_iter()
                .map(|name| SubdirEntry {
                    name: name.to_string(),
                    ctime: None,
                    mtime: None,
                })
                .collect(),
            complete: true,
        };
        db.stage_snapshots(&[snapshot]).unwrap();
        db.reconcile(NOW, &CrawlFrequency::default()).unwrap();
        db.recover().unwrap();
    }

    // Same xxh64 for both 10-byte backups, but only one BLAKE3 agrees with the photo.
    let digests: HashMap<&str, (&str, &str)> = HashMap::from([
        ("/photos/a.jpg", ("00000000000000aa", "b3-photo")),
        ("/photos/b.PNG", ("00000000000000bb", "b3-png")),
        ("/backup/a.jpg", ("00000000000000aa", "b3-photo")),
        ("/backup/copy.bin", ("00000000000000aa", "b3-other")),
        ("/backup/old/b.png", ("00000000000000bb", "b3-png")),
        ("/misc/a.jpg", ("00000000000000cc", "b3-misc")),
        ("/misc/a.jpg.txt", ("00000000000000dd", "b3-txt")),
    ]);
    let tasks = db.claim_files_to_hash("hasher", 100, NOW).unwrap();
    let results: Vec<DigestResult> = tasks
        .iter()
        .map(|task| {
            let (xxh64, blake3) = digests[task.path.to_str().unwrap()];
            DigestResult {
                file_id: task.file_id,
                claimed_by: task.claimed_by.clone(),
                size: task.size,
                mtime: task.mtime,
                xxh64: xxh64.to_string(),
                blake3: blake3.to_string(),
                hashed_on: NOW,
            }
        })
        .collect();
    db.stage_digests(&results).unwrap();
    assert_eq!(db.merge_hash_batch().unwrap().merged, 7);
    db
}

fn paths_of(matches: &[file_db_core::search::DuplicateMatch]) -> Vec<(PathBuf, MatchKind)> {
    matches
        .iter()
        .map(|m| (m.file.full_path(), m.matched_on))
        .collect()
}

#[test]
fn test_duplicate_file_uses_strongest_shared_digest() {
    let db = build_catalog();
    let matches = find_duplicate_files(&db, Path::new("/photos/a.jpg")).unwrap().unwrap();
    assert_eq!(
        paths_of(&matches),
        vec![
            (PathBuf::from("/photos/a.jpg"), MatchKind::Requested),
            (PathBuf::from("/backup/a.jpg"), MatchKind::Digest(HashAlgorithm::Blake3)),
        ]
    );
    assert!(matches.iter().all(|m| m.needle == Path::new("/photos/a.jpg")));
}

#[test]
fn test_duplicate_file_not_catalogued() {
    let db = build_catalog();
    assert!(find_duplicate_files(&db, Path::new("/photos/nope.jpg")).unwrap().is_none());
    assert!(find_duplicate_files(&db, Path::new("/nowhere/a.jpg")).unwrap().is_none());
}

#[test]
fn test_unique_file_reports_only_itself() {
    let db = build_catalog();
    let matches = find_duplicate_files(&db, Path::new("/misc/a.jpg.txt")).unwrap().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].matched_on, MatchKind::Requested);
}

#[test]
fn test_duplicate_directory_by_digest() {
    let db = build_catalog();
    let matches = find_duplicate_directory(&db, Path::new("/photos"), false).unwrap().unwrap();
    assert_eq!(
        paths_of(&matches),
        vec![
            (PathBuf::from("/photos/a.jpg"), MatchKind::Requested),
            (PathBuf::from("/backup/a.jpg"), MatchKind::Digest(HashAlgorithm::Blake3)),
            (PathBuf::from("/photos/b.PNG"), MatchKind::Requested),
            (PathBuf::from("/backup/old/b.png"), MatchKind::Digest(HashAlgorithm::Blake3)),
        ]
    );
}

#[test]
fn test_duplicate_directory_with_name_match() {
    let db = build_catalog();
    let matches = find_duplicate_directory(&db, Path::new("/photos"), true).unwrap().unwrap();
    let for_a: Vec<(PathBuf, MatchKind)> = paths_of(&matches)
        .into_iter()
        .filter(|(path, _)| path.file_name().and_then(|n| n.to_str()) == Some("a.jpg"))
        .collect();
    assert_eq!(
        for_a,
        vec![
            (PathBuf::from("/photos/a.jpg"), MatchKind::Requested),
            (PathBuf::from("/backup/a.jpg"), MatchKind::Digest(HashAlgorithm::Blake3)),
            (PathBuf::from("/misc/a.jpg"), MatchKind::Name),
        ]
    );
}

#[test]
fn test_duplicate_directory_unknown() {
    let db = build_catalog();
    assert!(find_duplicate_directory(&db, Path::new("/absent"), true).unwrap().is_none());
}

#[test]
fn test_search_files_by_name_and_extension() {
    let db = build_catalog();

    let jpgs = search_files(
        &db,
        &FileSearch {
            name: Some("*.jpg".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    let dirs: Vec<&str> = jpgs.iter().map(|f| f.dir_path.as_str()).collect();
    assert_eq!(dirs, vec!["/backup", "/misc", "/photos"]);

    let pngs = search_files(
        &db,
        &FileSearch {
            extension: Some(".PNG".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(pngs.len(), 2);
}

#[test]
fn test_search_files_by_size_time_and_subtree() {
    let db = build_catalog();

    let under_backup = search_files(
        &db,
        &FileSearch {
            under: Some("/backup".to_string()),
            min_size: Some(20),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(under_backup.len(), 1);
    assert_eq!(under_backup[0].full_path(), PathBuf::from("/backup/old/b.png"));

    let recent = search_files(
        &db,
        &FileSearch {
            modified_after: Some(NOW - 250),
            order_by: Some("size desc".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    let sizes: Vec<i64> = recent.iter().map(|f| f.size).collect();
    assert_eq!(sizes, vec![99, 30, 10]);

    let limited = search_files(
        &db,
        &FileSearch {
            limit: Some(2),
            order_by: Some("size; DROP TABLE file".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(limited.len(), 2);
}

#[test]
fn test_search_hash_either_column() {
    let db = build_catalog();
    let by_xxh = search_hash(&db, "00000000000000AA", None).unwrap();
    assert_eq!(by_xxh.len(), 3);

    let by_blake = search_hash(&db, "b3-photo", Some(HashAlgorithm::Blake3)).unwrap();
    assert_eq!(by_blake.len(), 2);

    assert!(search_hash(&db, "b3-photo", Some(HashAlgorithm::Xxh64)).unwrap().is_empty());
}

#[test]
fn test_search_directories_by_wildcard() {
    let db = build_catalog();
    let found = search_directories(&db, "/backup*", None, None).unwrap();
    let paths: Vec<&str> = found.iter().map(|d| d.dir_path.as_str()).collect();
    assert_eq!(paths, vec!["/backup", "/backup/old"]);

    let limited = search_directories(&db, "*", Some("dir_path desc"), Some(1)).unwrap();
    assert_eq!(limited[0].dir_path, "/photos");
}
