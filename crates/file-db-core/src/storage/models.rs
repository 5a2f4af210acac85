use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A catalogued directory. Identity is the full path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub id: i64,
    pub dir_path: String,
    pub parent_path: Option<String>,
    pub ctime: Option<i64>,
    pub mtime: Option<i64>,
    pub inserted_on: i64,
    pub updated_on: Option<i64>,
}

/// A catalogued file, identified by (dir_id, name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub dir_id: i64,
    pub name: String,
    pub extension: Option<String>,
    pub size: i64,
    pub ctime: Option<i64>,
    pub mtime: Option<i64>,
    pub atime: Option<i64>,
    pub inserted_on: i64,
    pub updated_on: Option<i64>,
}

/// A file joined with its directory path and digests (`vw_file_detail`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDetail {
    pub file_id: i64,
    pub dir_id: i64,
    pub dir_path: String,
    pub name: String,
    pub extension: Option<String>,
    pub size: i64,
    pub ctime: Option<i64>,
    pub mtime: Option<i64>,
    pub atime: Option<i64>,
    pub xxh64_hash: Option<String>,
    pub blake3_hash: Option<String>,
}

impl FileDetail {
    pub fn full_path(&self) -> PathBuf {
        Path::new(&self.dir_path).join(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRecord {
    pub file_id: i64,
    pub xxh64_hash: Option<String>,
    pub xxh64_hashed_on: Option<i64>,
    pub blake3_hash: Option<String>,
    pub blake3_hashed_on: Option<i64>,
}

/// Crawl scheduling state for one directory.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlControl {
    pub dir_id: i64,
    pub file_count: i64,
    pub subdir_count: i64,
    pub next_due: i64,
    pub crawl_interval: i64,
    pub last_crawled: Option<i64>,
    pub last_activity: Option<i64>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
    pub dir_missing: bool,
    pub inserted_on: i64,
}

/// A file awaiting a (re)hash, with the metadata captured when it was scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashControl {
    pub file_id: i64,
    pub mtime: Option<i64>,
    pub file_size: i64,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
    pub inserted_on: i64,
}

/// A claimed directory handed to a crawl worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTask {
    pub dir_id: i64,
    pub dir_path: String,
    pub last_crawled: Option<i64>,
    pub claimed_by: String,
}

/// A claimed file handed to a hash worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTask {
    pub file_id: i64,
    pub path: PathBuf,
    pub size: i64,
    pub mtime: Option<i64>,
    pub claimed_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirStatus {
    Present,
    /// The directory no longer exists. Feeds the fallback reschedule.
    Missing,
    /// The directory exists but could not be listed.
    Unreadable,
}

impl DirStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirStatus::Present => "present",
            DirStatus::Missing => "missing",
            DirStatus::Unreadable => "unreadable",
        }
    }
}

impl fmt::Display for DirStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(DirStatus::Present),
            "missing" => Ok(DirStatus::Missing),
            "unreadable" => Ok(DirStatus::Unreadable),
            other => Err(format!("unknown directory status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: i64,
    pub ctime: Option<i64>,
    pub mtime: Option<i64>,
    pub atime: Option<i64>,
}

impl FileEntry {
    /// Lower-cased text after the last dot, ignoring leading-dot names.
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.name)
    }
}

pub fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_lowercase())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdirEntry {
    pub name: String,
    pub ctime: Option<i64>,
    pub mtime: Option<i64>,
}

/// One crawl of one directory, as produced by a crawl worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub dir_id: i64,
    pub dir_path: String,
    pub claimed_by: String,
    pub status: DirStatus,
    pub crawled_on: i64,
    pub files: Vec<FileEntry>,
    pub subdirs: Vec<SubdirEntry>,
    /// False when some children could not be inspected; disables delete-missing.
    pub complete: bool,
}

impl Snapshot {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn subdir_count(&self) -> usize {
        self.subdirs.len()
    }
}

/// Digests computed by a hash worker, with the metadata observed at hashing time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestResult {
    pub file_id: i64,
    pub claimed_by: String,
    pub size: i64,
    pub mtime: Option<i64>,
    pub xxh64: String,
    pub blake3: String,
    pub hashed_on: i64,
}

/// What a hash worker hands back for one claimed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOutcome {
    Hashed(DigestResult),
    /// The file could not be read; its claim is released so it is offered again.
    Failed { file_id: i64, claimed_by: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Entities given new crawl or hash scheduling state.
    pub scheduled: usize,
}

impl MergeStats {
    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub directories: MergeStats,
    pub files: MergeStats,
    pub crawled: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    pub staged: usize,
    /// Snapshots whose claim was no longer held when they reached staging.
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashMergeStats {
    pub merged: usize,
    /// File changed since scheduling; claim released for a retry.
    pub released: usize,
    /// No matching claim; digest discarded.
    pub dropped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionOutcome {
    pub directories: Vec<i64>,
    pub files: Vec<i64>,
    /// Descendant directories handed to the removal queue.
    pub queued: Vec<i64>,
}

impl DeletionOutcome {
    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.files.is_empty() && self.queued.is_empty()
    }

    pub(crate) fn absorb(&mut self, other: DeletionOutcome) {
        self.directories.extend(other.directories);
        self.files.extend(other.files);
        self.queued.extend(other.queued);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub staged_rows_cleared: usize,
    pub crawl_claims_released: usize,
    pub hash_claims_released: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub directories: i64,
    pub files: i64,
    pub total_bytes: i64,
    pub hashed_files: i64,
    pub crawls_due: i64,
    pub crawl_claims: i64,
    pub missing_directories: i64,
    pub hashes_pending: i64,
    pub hash_claims: i64,
    pub staged_rows: i64,
    pub archived_directories: i64,
    pub archived_files: i64,
    pub queued_removals: i64,
}

/// A directory's crawl schedule, for display and administration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub dir_id: i64,
    pub dir_path: String,
    pub next_due: i64,
    pub crawl_interval: i64,
    pub last_crawled: Option<i64>,
    pub file_count: i64,
    pub subdir_count: i64,
    pub claimed_by: Option<String>,
    pub dir_missing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryArchive {
    pub id: i64,
    pub dir_path: String,
    pub parent_path: Option<String>,
    pub ctime: Option<i64>,
    pub mtime: Option<i64>,
    pub original_inserted_on: i64,
    pub original_updated_on: Option<i64>,
    pub deleted_on: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArchive {
    pub id: i64,
    pub dir_id: i64,
    pub dir_path: Option<String>,
    pub name: String,
    pub extension: Option<String>,
    pub size: i64,
    pub ctime: Option<i64>,
    pub mtime: Option<i64>,
    pub atime: Option<i64>,
    pub xxh64_hash: Option<String>,
    pub blake3_hash: Option<String>,
    pub original_inserted_on: i64,
    pub original_updated_on: Option<i64>,
    pub deleted_on: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_lowercased() {
        assert_eq!(file_extension("Photo.JPG"), Some("jpg".to_string()));
        assert_eq!(file_extension("archive.tar.gz"), Some("gz".to_string()));
    }

    #[test]
    fn test_extension_absent() {
        assert_eq!(file_extension("Makefile"), None);
        assert_eq!(file_extension(".bashrc"), None);
    }

    #[test]
    fn test_dir_status_round_trips_through_text() {
        for status in [DirStatus::Present, DirStatus::Missing, DirStatus::Unreadable] {
            assert_eq!(status.as_str().parse::<DirStatus>(), Ok(status));
        }
        assert!("gone".parse::<DirStatus>().is_err());
    }
}
