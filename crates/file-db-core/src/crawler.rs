use crate::scanner::FilesystemProbe;
use crate::storage::models::{CrawlTask, DirStatus, Snapshot};
use std::path::Path;
use tracing::{debug, warn};

/// Crawl one claimed directory. Never fails: a vanished directory yields a
/// `Missing` snapshot and an unlistable one an `Unreadable` snapshot.
pub fn scrape(probe: &dyn FilesystemProbe, task: &CrawlTask, now: i64) -> Snapshot {
    let mut snapshot = Snapshot {
        dir_id: task.dir_id,
        dir_path: task.dir_path.clone(),
        claimed_by: task.claimed_by.clone(),
        status: DirStatus::Present,
        crawled_on: now,
        files: Vec::new(),
        subdirs: Vec::new(),
        complete: true,
    };

    match probe.list_children(Path::new(&task.dir_path)) {
        Ok(Some(listing)) => {
            for path in &listing.skipped {
                warn!(dir_id = task.dir_id, "Name not representable in the catalog: {:?}", path);
            }
            snapshot.complete = !listing.partial;
            snapshot.files = listing.files;
            snapshot.subdirs = listing.subdirs;
            debug!(
                dir_id = task.dir_id,
                files = snapshot.file_count(),
                subdirs = snapshot.subdir_count(),
                "Crawled {}",
                task.dir_path
            );
        }
        Ok(None) => {
            debug!(dir_id = task.dir_id, "Directory missing: {}", task.dir_path);
            snapshot.status = DirStatus::Missing;
        }
        Err(err) => {
            warn!(dir_id = task.dir_id, "Unable to list {}: {}", task.dir_path, err);
            snapshot.status = DirStatus::Unreadable;
        }
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::DirListing;
    use crate::storage::models::FileEntry;
    use std::io;

    struct FixedProbe(io::Result<Option<DirListing>>);

    impl FilesystemProbe for FixedProbe {
        fn list_children(&self, _path: &Path) -> io::Result<Option<DirListing>> {
            match &self.0 {
                Ok(listing) => Ok(listing.clone()),
                Err(err) => Err(io::Error::new(err.kind(), err.to_string())),
            }
        }
    }

    fn task() -> CrawlTask {
        CrawlTask {
            dir_id: 7,
            dir_path: "/a".to_string(),
            last_crawled: None,
            claimed_by: "worker-1".to_string(),
        }
    }

    #[test]
    fn test_present_snapshot_carries_children() {
        let listing = DirListing {
            files: vec![FileEntry {
                name: "f1".to_string(),
                size: 3,
                ctime: None,
                mtime: Some(10),
                atime: None,
            }],
            ..Default::default()
        };
        let snapshot = scrape(&FixedProbe(Ok(Some(listing))), &task(), 100);
        assert_eq!(snapshot.status, DirStatus::Present);
        assert_eq!(snapshot.file_count(), 1);
        assert_eq!(snapshot.crawled_on, 100);
        assert_eq!(snapshot.claimed_by, "worker-1");
        assert!(snapshot.complete);
    }

    #[test]
    fn test_missing_snapshot_has_zero_counts() {
        let snapshot = scrape(&FixedProbe(Ok(None)), &task(), 100);
        assert_eq!(snapshot.status, DirStatus::Missing);
        assert_eq!(snapshot.file_count(), 0);
        assert_eq!(snapshot.subdir_count(), 0);
    }

    #[test]
    fn test_io_error_is_unreadable() {
        let probe = FixedProbe(Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")));
        let snapshot = scrape(&probe, &task(), 100);
        assert_eq!(snapshot.status, DirStatus::Unreadable);
    }

    #[test]
    fn test_partial_listing_disables_delete_missing() {
        let listing = DirListing {
            partial: true,
            ..Default::default()
        };
        let snapshot = scrape(&FixedProbe(Ok(Some(listing))), &task(), 100);
        assert!(!snapshot.complete);
    }
}
