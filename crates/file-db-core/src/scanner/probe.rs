use crate::error::Result;
use crate::storage::models::{FileEntry, SubdirEntry};
use dashmap::{DashMap, DashSet};
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Immediate children of one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    pub files: Vec<FileEntry>,
    pub subdirs: Vec<SubdirEntry>,
    /// Children whose names are not valid UTF-8; they are not catalogued.
    pub skipped: Vec<PathBuf>,
    /// Some child could not be inspected, so the listing may be incomplete.
    pub partial: bool,
}

/// Lists a directory one level deep.
pub trait FilesystemProbe: Send + Sync {
    /// `Ok(None)` when the directory does not exist.
    fn list_children(&self, path: &Path) -> io::Result<Option<DirListing>>;
}

/// Probe over the local filesystem. Children are stat'ed in parallel,
/// symlinks are skipped, and paths matching an ignore pattern are left out.
pub struct LocalProbe {
    ignore_patterns: Vec<Pattern>,
}

impl LocalProbe {
    pub fn new(ignore_globs: &[String]) -> Result<Self> {
        let ignore_patterns = ignore_globs
            .iter()
            .map(|glob| Pattern::new(glob))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { ignore_patterns })
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }
}

impl FilesystemProbe for LocalProbe {
    fn list_children(&self, path: &Path) -> io::Result<Option<DirListing>> {
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        }

        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        let files: DashMap<String, FileEntry> = DashMap::new();
        let subdirs: DashMap<String, SubdirEntry> = DashMap::new();
        let skipped: DashSet<PathBuf> = DashSet::new();
        let partial = AtomicBool::new(false);

        entries.par_bridge().for_each(|entry_result| {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Error reading entry in directory {}: {}", path.display(), err);
                    partial.store(true, Ordering::Relaxed);
                    return;
                }
            };

            let child = entry.path();
            if self.is_ignored(&child) {
                return;
            }

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping non UTF-8 name in {}: {:?}", path.display(), entry.file_name());
                skipped.insert(child);
                return;
            };

            let metadata = match fs::symlink_metadata(&child) {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return,
                Err(err) => {
                    warn!("Error getting metadata for {}: {}", child.display(), err);
                    partial.store(true, Ordering::Relaxed);
                    return;
                }
            };

            let file_type = metadata.file_type();
            if file_type.is_symlink() {
                return;
            }

            let ctime = metadata.created().ok().and_then(unix_seconds);
            let mtime = metadata.modified().ok().and_then(unix_seconds);
            if file_type.is_dir() {
                subdirs.insert(name.clone(), SubdirEntry { name, ctime, mtime });
            } else if file_type.is_file() {
                files.insert(
                    name.clone(),
                    FileEntry {
                        name,
                        size: metadata.len() as i64,
                        ctime,
                        mtime,
                        atime: metadata.accessed().ok().and_then(unix_seconds),
                    },
                );
            }
        });

        let mut listing = DirListing {
            files: files.into_iter().map(|(_, file)| file).collect(),
            subdirs: subdirs.into_iter().map(|(_, dir)| dir).collect(),
            skipped: skipped.into_iter().collect(),
            partial: partial.load(Ordering::Relaxed),
        };
        listing.files.sort_by(|a, b| a.name.cmp(&b.name));
        listing.subdirs.sort_by(|a, b| a.name.cmp(&b.name));
        listing.skipped.sort();
        Ok(Some(listing))
    }
}

pub(crate) fn unix_seconds(time: SystemTime) -> Option<i64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .map(|elapsed| elapsed.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn test_lists_files_and_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = File::create(dir.path().join("f1.txt")).unwrap();
        f.write_all(b"hello").unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();

        let listing = LocalProbe::new(&[])
            .unwrap()
            .list_children(dir.path())
            .unwrap()
            .unwrap();

        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "f1.txt");
        assert_eq!(listing.files[0].size, 5);
        assert!(listing.files[0].mtime.is_some());
        assert_eq!(listing.subdirs.len(), 1);
        assert_eq!(listing.subdirs[0].name, "b");
        assert!(!listing.partial);
    }

    #[test]
    fn test_missing_directory_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let probe = LocalProbe::new(&[]).unwrap();
        assert!(probe.list_children(&dir.path().join("gone")).unwrap().is_none());
    }

    #[test]
    fn test_regular_file_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        File::create(&path).unwrap();
        let probe = LocalProbe::new(&[]).unwrap();
        assert!(probe.list_children(&path).unwrap().is_none());
    }

    #[test]
    fn test_ignore_patterns_exclude_children() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("keep.txt")).unwrap();
        File::create(dir.path().join("skip.tmp")).unwrap();

        let probe = LocalProbe::new(&["*.tmp".to_string()]).unwrap();
        let listing = probe.list_children(dir.path()).unwrap().unwrap();
        let names: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["keep.txt"]);
    }

    #[test]
    fn test_invalid_ignore_pattern_is_rejected() {
        assert!(LocalProbe::new(&["[".to_string()]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("target.txt")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("target.txt"), dir.path().join("link.txt")).unwrap();

        let listing = LocalProbe::new(&[])
            .unwrap()
            .list_children(dir.path())
            .unwrap()
            .unwrap();
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "target.txt");
    }
}
