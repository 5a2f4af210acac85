pub mod digest;

pub use digest::{hash_file, hash_reader, FileDigest, DEFAULT_BUFFER_SIZE};

use crate::storage::models::{DigestResult, HashTask};
use std::fmt;
use std::fs;
use std::str::FromStr;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Digest algorithms recorded in the catalog, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Xxh64,
    Blake3,
}

impl HashAlgorithm {
    pub fn column(&self) -> &'static str {
        match self {
            HashAlgorithm::Xxh64 => "xxh64_hash",
            HashAlgorithm::Blake3 => "blake3_hash",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Xxh64 => "xxh64",
            HashAlgorithm::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xxh64" | "xxhash" => Ok(HashAlgorithm::Xxh64),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(format!("unknown hash algorithm '{}'", other)),
        }
    }
}

/// Hash one claimed file. Any I/O failure, or a file that changed size while
/// being read, yields `None`; the file stays scheduled and is retried later.
pub fn hash_task(task: &HashTask, buffer_size: usize, now: i64) -> Option<DigestResult> {
    let metadata = match fs::metadata(&task.path) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(file_id = task.file_id, "Unable to stat {}: {}", task.path.display(), err);
            return None;
        }
    };
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_secs() as i64);

    let digest = match hash_file(&task.path, buffer_size) {
        Ok(digest) => digest,
        Err(err) => {
            warn!(file_id = task.file_id, "Unable to hash {}: {}", task.path.display(), err);
            return None;
        }
    };

    if digest.bytes != metadata.len() {
        warn!(
            file_id = task.file_id,
            "{} changed while hashing ({} bytes read, {} expected)",
            task.path.display(),
            digest.bytes,
            metadata.len()
        );
        return None;
    }

    debug!(file_id = task.file_id, bytes = digest.bytes, "Hashed {}", task.path.display());
    Some(DigestResult {
        file_id: task.file_id,
        claimed_by: task.claimed_by.clone(),
        size: metadata.len() as i64,
        mtime,
        xxh64: digest.xxh64,
        blake3: digest.blake3,
        hashed_on: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn test_hash_task_reports_observed_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f1");
        File::create(&path).unwrap().write_all(b"abc").unwrap();

        let task = HashTask {
            file_id: 1,
            path: path.clone(),
            size: 3,
            mtime: None,
            claimed_by: "hasher".to_string(),
        };
        let result = hash_task(&task, DEFAULT_BUFFER_SIZE, 42).unwrap();
        assert_eq!(result.size, 3);
        assert!(result.mtime.is_some());
        assert_eq!(result.hashed_on, 42);
        assert_eq!(result.claimed_by, "hasher");
        assert_eq!(result.blake3, blake3::hash(b"abc").to_hex().to_string());
    }

    #[test]
    fn test_vanished_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let task = HashTask {
            file_id: 1,
            path: dir.path().join("gone"),
            size: 3,
            mtime: None,
            claimed_by: "hasher".to_string(),
        };
        assert!(hash_task(&task, DEFAULT_BUFFER_SIZE, 42).is_none());
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("BLAKE3".parse::<HashAlgorithm>(), Ok(HashAlgorithm::Blake3));
        assert_eq!("xxh64".parse::<HashAlgorithm>(), Ok(HashAlgorithm::Xxh64));
        assert!("md5".parse::<HashAlgorithm>().is_err());
        assert_eq!(HashAlgorithm::Blake3.column(), "blake3_hash");
    }
}
