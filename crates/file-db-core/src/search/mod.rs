pub mod query;

pub use query::{
    sanitize_order_by, search_directories, search_files, search_hash, wildcard_to_like, FileSearch,
    DIRECTORY_ORDER_COLUMNS, FILE_ORDER_COLUMNS,
};

use crate::hasher::HashAlgorithm;
use crate::paths;
use crate::storage::models::FileDetail;
use crate::storage::queries::{row_to_file_detail, FILE_DETAIL_COLUMNS};
use crate::storage::Database;
use ahash::AHashSet;
use rusqlite::{params, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The file that was searched for.
    Requested,
    Digest(HashAlgorithm),
    /// Same name and size, no digest agreement.
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateMatch {
    pub file: FileDetail,
    pub matched_on: MatchKind,
    /// Path of the requested file this one duplicates.
    pub needle: PathBuf,
}

/// Decide whether two catalogued files hold the same content.
///
/// Sizes must be equal. BLAKE3 decides when both files have it, otherwise
/// xxh64 decides when both have it; the weaker digest is never consulted when
/// the stronger one is present on both sides.
pub fn digest_match(a: &FileDetail, b: &FileDetail) -> Option<HashAlgorithm> {
    if a.size != b.size {
        return None;
    }
    if let (Some(x), Some(y)) = (&a.blake3_hash, &b.blake3_hash) {
        return (x == y).then_some(HashAlgorithm::Blake3);
    }
    match (&a.xxh64_hash, &b.xxh64_hash) {
        (Some(x), Some(y)) if x == y => Some(HashAlgorithm::Xxh64),
        _ => None,
    }
}

/// Every catalogued copy of the file at `path`, the file itself first.
/// `Ok(None)` when `path` is not in the catalog.
pub fn find_duplicate_files(db: &Database, path: &Path) -> Result<Option<Vec<DuplicateMatch>>> {
    let Some(needle) = db.get_file_by_path(path)? else {
        return Ok(None);
    };
    let needle_path = needle.full_path();

    let mut matches = vec![DuplicateMatch {
        file: needle.clone(),
        matched_on: MatchKind::Requested,
        needle: needle_path.clone(),
    }];
    for candidate in digest_candidates(db, &needle)? {
        if let Some(algorithm) = digest_match(&needle, &candidate) {
            matches.push(DuplicateMatch {
                file: candidate,
                matched_on: MatchKind::Digest(algorithm),
                needle: needle_path.clone(),
            });
        }
    }
    Ok(Some(matches))
}

/// Duplicates, anywhere in the catalog, of each file directly inside `path`.
/// With `name_match`, files sharing a name and size are reported too.
pub fn find_duplicate_directory(
    db: &Database,
    path: &Path,
    name_match: bool,
) -> Result<Option<Vec<DuplicateMatch>>> {
    let Some(dir_path) = paths::path_to_string(path) else {
        return Ok(None);
    };
    let Some(directory) = db.get_directory_by_path(&dir_path)? else {
        return Ok(None);
    };

    let mut matches = Vec::new();
    for needle in db.files_in_directory(directory.id)? {
        let needle_path = needle.full_path();
        let mut seen: AHashSet<i64> = AHashSet::new();
        seen.insert(needle.file_id);

        for candidate in digest_candidates(db, &needle)? {
            if let Some(algorithm) = digest_match(&needle, &candidate) {
                seen.insert(candidate.file_id);
                matches.push(DuplicateMatch {
                    file: candidate,
                    matched_on: MatchKind::Digest(algorithm),
                    needle: needle_path.clone(),
                });
            }
        }

        if name_match {
            for candidate in name_candidates(db, &needle)? {
                if seen.insert(candidate.file_id) {
                    matches.push(DuplicateMatch {
                        file: candidate,
                        matched_on: MatchKind::Name,
                        needle: needle_path.clone(),
                    });
                }
            }
        }

        matches.push(DuplicateMatch {
            file: needle,
            matched_on: MatchKind::Requested,
            needle: needle_path,
        });
    }

    matches.sort_by(|a, b| {
        a.needle
            .cmp(&b.needle)
            .then((a.matched_on != MatchKind::Requested).cmp(&(b.matched_on != MatchKind::Requested)))
            .then(a.file.full_path().cmp(&b.file.full_path()))
    });
    Ok(Some(matches))
}

/// Same-size files sharing either digest with `needle`, excluding `needle`.
fn digest_candidates(db: &Database, needle: &FileDetail) -> Result<Vec<FileDetail>> {
    if needle.xxh64_hash.is_none() && needle.blake3_hash.is_none() {
        return Ok(Vec::new());
    }
    let mut stmt = db.connection().prepare_cached(&format!(
        "SELECT {} FROM vw_file_detail \
         WHERE size = ?1 AND file_id != ?2 AND (blake3_hash = ?3 OR xxh64_hash = ?4) \
         ORDER BY dir_path, name",
        FILE_DETAIL_COLUMNS
    ))?;
    let files = stmt
        .query_map(
            params![needle.size, needle.file_id, needle.blake3_hash, needle.xxh64_hash],
            row_to_file_detail,
        )?
        .collect::<Result<Vec<_>>>()?;
    Ok(files)
}

fn name_candidates(db: &Database, needle: &FileDetail) -> Result<Vec<FileDetail>> {
    let mut stmt = db.connection().prepare_cached(&format!(
        "SELECT {} FROM vw_file_detail WHERE name = ?1 AND size = ?2 AND file_id != ?3 \
         ORDER BY dir_path",
        FILE_DETAIL_COLUMNS
    ))?;
    let files = stmt
        .query_map(params![needle.name, needle.size, needle.file_id], row_to_file_detail)?
        .collect::<Result<Vec<_>>>()?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(size: i64, xxh64: Option<&str>, blake3: Option<&str>) -> FileDetail {
        FileDetail {
            file_id: 1,
            dir_id: 1,
            dir_path: "/a".to_string(),
            name: "f".to_string(),
            extension: None,
            size,
            ctime: None,
            mtime: None,
            atime: None,
            xxh64_hash: xxh64.map(str::to_string),
            blake3_hash: blake3.map(str::to_string),
        }
    }

    #[test]
    fn test_stronger_digest_wins() {
        let a = detail(10, Some("x1"), Some("b1"));
        let b = detail(10, Some("x1"), Some("b2"));
        // Weak digests collide but BLAKE3 disagrees.
        assert_eq!(digest_match(&a, &b), None);

        let c = detail(10, Some("x9"), Some("b1"));
        assert_eq!(digest_match(&a, &c), Some(HashAlgorithm::Blake3));
    }

    #[test]
    fn test_falls_back_to_weaker_digest() {
        let a = detail(10, Some("x1"), Some("b1"));
        let b = detail(10, Some("x1"), None);
        assert_eq!(digest_match(&a, &b), Some(HashAlgorithm::Xxh64));
    }

    #[test]
    fn test_size_always_required() {
        let a = detail(10, Some("x1"), Some("b1"));
        let b = detail(11, Some("x1"), Some("b1"));
        assert_eq!(digest_match(&a, &b), None);
    }

    #[test]
    fn test_unhashed_never_matches() {
        let a = detail(10, None, None);
        let b = detail(10, None, None);
        assert_eq!(digest_match(&a, &b), None);
    }
}
