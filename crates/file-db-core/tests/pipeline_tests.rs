#![cfg(unix)]

use file_db_core::config::{TimerIntervals, WorkerCounts};
use file_db_core::scanner::{DirListing, FilesystemProbe};
use file_db_core::search::{find_duplicate_files, MatchKind};
use file_db_core::storage::Database;
use file_db_core::{AppConfig, CrawlService, ServiceTotals, SilentReporter};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn fast_config(database_path: &Path, roots: Vec<String>) -> AppConfig {
    AppConfig {
        database_path: database_path.to_string_lossy().into_owned(),
        root_paths: roots,
        workers: WorkerCounts { crawl: 2, hash: 2 },
        timers: TimerIntervals {
            crawl_poll_ms: 20,
            stage_flush_ms: 20,
            reconcile_ms: 20,
            hash_poll_ms: 20,
            hash_flush_ms: 20,
            removal_ms: 20,
            idle_sleep_ms: 5,
        },
        ..AppConfig::default()
    }
}

struct RunningService {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<file_db_core::Result<ServiceTotals>>,
}

impl RunningService {
    fn start(service: CrawlService) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || service.run(flag, Arc::new(SilentReporter)));
        Self { shutdown, handle }
    }

    fn stop(self) -> ServiceTotals {
        self.shutdown.store(true, Ordering::SeqCst);
        self.handle.join().unwrap().unwrap()
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(25));
    }
    panic!("timed out waiting for {}", what);
}

#[test]
fn test_service_catalogs_and_hashes_a_tree() {
    let workspace = tempfile::tempdir().unwrap();
    let root = workspace.path().join("root");
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("a.txt"), "hello").unwrap();
    fs::write(root.join("sub").join("b.txt"), "hello").unwrap();
    fs::write(root.join("sub").join("c.txt"), "something else").unwrap();

    let db_path = workspace.path().join("catalog.db");
    let config = fast_config(&db_path, vec![root.to_string_lossy().into_owned()]);
    let running = RunningService::start(CrawlService::new(config).unwrap());

    let db_text = db_path.to_string_lossy().into_owned();
    wait_until("three hashed files", || {
        Database::open(&db_text)
            .and_then(|db| db.catalog_stats(0))
            .map(|stats| stats.files == 3 && stats.hashed_files == 3)
            .unwrap_or(false)
    });

    let db = Database::open(&db_text).unwrap();
    let matches = find_duplicate_files(&db, &root.join("a.txt")).unwrap().unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].matched_on, MatchKind::Requested);
    assert!(matches[1].file.full_path().ends_with("sub/b.txt"));
    assert!(matches!(matches[1].matched_on, MatchKind::Digest(_)));

    // Catalog-only removal is picked up by the running drainer.
    let sub = db
        .get_directory_by_path(&root.join("sub").to_string_lossy())
        .unwrap()
        .unwrap();
    db.request_directory_removal(&[sub.id], true, 0).unwrap();
    wait_until("queued removal to drain", || {
        db.get_directory(sub.id).map(|d| d.is_none()).unwrap_or(false)
    });
    assert!(root.join("sub").join("b.txt").exists());

    let totals = running.stop();
    assert!(totals.directories_crawled >= 2);
    assert!(totals.hashes_merged >= 3);
    assert!(totals.removals >= 1);
    assert_eq!(db.catalog_stats(0).unwrap().crawl_claims, 0);
}

#[test]
fn test_restart_picks_up_changes() {
    let workspace = tempfile::tempdir().unwrap();
    let root = workspace.path().join("root");
    fs::create_dir_all(&root).unwrap();
    let target = root.join("notes.txt");
    fs::write(&target, "first").unwrap();

    let db_path = workspace.path().join("catalog.db");
    let db_text = db_path.to_string_lossy().into_owned();
    let roots = vec![root.to_string_lossy().into_owned()];

    let hashed_size = |db_text: &str| -> Option<i64> {
        let db = Database::open(db_text).ok()?;
        let file = db.get_file_by_path(&target).ok()??;
        file.blake3_hash.as_ref()?;
        Some(file.size)
    };

    let running = RunningService::start(CrawlService::new(fast_config(&db_path, roots.clone())).unwrap());
    wait_until("first hash", || hashed_size(&db_text) == Some(5));
    running.stop();

    fs::write(&target, "second, and longer").unwrap();

    let running = RunningService::start(CrawlService::new(fast_config(&db_path, roots)).unwrap());
    wait_until("rehash after restart", || hashed_size(&db_text) == Some(18));
    running.stop();

    let db = Database::open(&db_text).unwrap();
    let stats = db.catalog_stats(0).unwrap();
    assert_eq!(stats.files, 1);
    assert_eq!(stats.staged_rows, 0);
}

/// Reports every path as absent.
struct EmptyProbe;

impl FilesystemProbe for EmptyProbe {
    fn list_children(&self, _path: &Path) -> io::Result<Option<DirListing>> {
        Ok(None)
    }
}

#[test]
fn test_missing_root_is_flagged_and_backed_off() {
    let workspace = tempfile::tempdir().unwrap();
    let db_path = workspace.path().join("catalog.db");
    let db_text = db_path.to_string_lossy().into_owned();
    let config = fast_config(&db_path, vec!["/file-db-test/does/not/exist".to_string()]);
    let missing_interval = config.frequency.missing_interval_secs;

    let running = RunningService::start(CrawlService::with_probe(config, Arc::new(EmptyProbe)));
    wait_until("missing flag", || {
        Database::open(&db_text)
            .and_then(|db| db.catalog_stats(0))
            .map(|stats| stats.missing_directories == 1)
            .unwrap_or(false)
    });
    running.stop();

    let db = Database::open(&db_text).unwrap();
    let dir = db
        .get_directory_by_path("/file-db-test/does/not/exist")
        .unwrap()
        .unwrap();
    let control = db.get_crawl_control(dir.id).unwrap().unwrap();
    assert!(control.dir_missing);
    assert_eq!(control.crawl_interval, missing_interval);
    assert!(control.claimed_by.is_none());
}

/// `target` spelled relative to the current directory.
fn relative_to_cwd(target: &Path) -> std::path::PathBuf {
    let cwd = std::env::current_dir().unwrap();
    let mut relative = std::path::PathBuf::new();
    for _ in cwd.components().skip(1) {
        relative.push("..");
    }
    relative.join(target.strip_prefix("/").unwrap())
}

#[test]
fn test_relative_root_is_seeded_as_absolute() {
    let workspace = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(workspace.path()).unwrap().join("root");
    fs::create_dir(&root).unwrap();
    let relative = relative_to_cwd(&root);
    assert!(relative.is_relative());

    let db_path = workspace.path().join("catalog.db");
    let config = fast_config(&db_path, vec![relative.to_string_lossy().into_owned()]);
    let seeded = CrawlService::new(config).unwrap().prepare(&SilentReporter).unwrap();
    assert_eq!(seeded, 1);

    let db = Database::open(&db_path.to_string_lossy()).unwrap();
    let absolute = root.to_string_lossy().into_owned();
    let record = db.get_directory_by_path(&absolute).unwrap().unwrap();
    assert_eq!(record.dir_path, absolute);
    assert_eq!(db.catalog_stats(0).unwrap().directories, 1);
}

#[test]
fn test_symlinked_root_alias_is_seeded_once() {
    let workspace = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(workspace.path()).unwrap().join("root");
    fs::create_dir(&root).unwrap();
    let alias = workspace.path().join("alias");
    std::os::unix::fs::symlink(&root, &alias).unwrap();

    let db_path = workspace.path().join("catalog.db");
    let config = fast_config(
        &db_path,
        vec![
            root.to_string_lossy().into_owned(),
            alias.to_string_lossy().into_owned(),
        ],
    );
    let seeded = CrawlService::new(config).unwrap().prepare(&SilentReporter).unwrap();
    assert_eq!(seeded, 1);

    let db = Database::open(&db_path.to_string_lossy()).unwrap();
    assert!(db.get_directory_by_path(&root.to_string_lossy()).unwrap().is_some());
    assert!(db.get_directory_by_path(&alias.to_string_lossy()).unwrap().is_none());
}
