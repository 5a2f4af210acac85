use super::models::*;
use super::sqlite::Database;
use crate::paths;
use rusqlite::{params, OptionalExtension, Result, Row};
use std::path::Path;

pub(crate) const FILE_DETAIL_COLUMNS: &str = "file_id, dir_id, dir_path, name, extension, size, \
     ctime, mtime, atime, xxh64_hash, blake3_hash";

pub(crate) fn row_to_directory(row: &Row) -> Result<Directory> {
    Ok(Directory {
        id: row.get(0)?,
        dir_path: row.get(1)?,
        parent_path: row.get(2)?,
        ctime: row.get(3)?,
        mtime: row.get(4)?,
        inserted_on: row.get(5)?,
        updated_on: row.get(6)?,
    })
}

pub(crate) fn row_to_file(row: &Row) -> Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        dir_id: row.get(1)?,
        name: row.get(2)?,
        extension: row.get(3)?,
        size: row.get(4)?,
        ctime: row.get(5)?,
        mtime: row.get(6)?,
        atime: row.get(7)?,
        inserted_on: row.get(8)?,
        updated_on: row.get(9)?,
    })
}

pub(crate) fn row_to_file_detail(row: &Row) -> Result<FileDetail> {
    Ok(FileDetail {
        file_id: row.get(0)?,
        dir_id: row.get(1)?,
        dir_path: row.get(2)?,
        name: row.get(3)?,
        extension: row.get(4)?,
        size: row.get(5)?,
        ctime: row.get(6)?,
        mtime: row.get(7)?,
        atime: row.get(8)?,
        xxh64_hash: row.get(9)?,
        blake3_hash: row.get(10)?,
    })
}

impl Database {
    // ── Directories ──────────────────────────────────────────────

    pub fn get_directory(&self, dir_id: i64) -> Result<Option<Directory>> {
        self.connection()
            .query_row(
                "SELECT id, dir_path, parent_path, ctime, mtime, inserted_on, updated_on \
                 FROM directory WHERE id = ?1",
                params![dir_id],
                row_to_directory,
            )
            .optional()
    }

    pub fn get_directory_by_path(&self, dir_path: &str) -> Result<Option<Directory>> {
        self.connection()
            .query_row(
                "SELECT id, dir_path, parent_path, ctime, mtime, inserted_on, updated_on \
                 FROM directory WHERE dir_path = ?1",
                params![dir_path],
                row_to_directory,
            )
            .optional()
    }

    /// Immediate subdirectories of `dir_path`, by path.
    pub fn subdirectories(&self, dir_path: &str) -> Result<Vec<Directory>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT id, dir_path, parent_path, ctime, mtime, inserted_on, updated_on \
             FROM directory WHERE parent_path = ?1 ORDER BY dir_path",
        )?;
        let dirs = stmt
            .query_map(params![dir_path], row_to_directory)?
            .collect::<Result<Vec<_>>>()?;
        Ok(dirs)
    }

    // ── Files ────────────────────────────────────────────────────

    pub fn get_file(&self, dir_id: i64, name: &str) -> Result<Option<FileRecord>> {
        self.connection()
            .query_row(
                "SELECT id, dir_id, name, extension, size, ctime, mtime, atime, inserted_on, updated_on \
                 FROM file WHERE dir_id = ?1 AND name = ?2",
                params![dir_id, name],
                row_to_file,
            )
            .optional()
    }

    pub fn get_file_detail(&self, file_id: i64) -> Result<Option<FileDetail>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM vw_file_detail WHERE file_id = ?1", FILE_DETAIL_COLUMNS),
                params![file_id],
                row_to_file_detail,
            )
            .optional()
    }

    /// Looks a file up by its full path. `Ok(None)` when it is not catalogued.
    pub fn get_file_by_path(&self, path: &Path) -> Result<Option<FileDetail>> {
        let Some((dir_path, name)) = paths::split_file_path(path) else {
            return Ok(None);
        };
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM vw_file_detail WHERE dir_path = ?1 AND name = ?2",
                    FILE_DETAIL_COLUMNS
                ),
                params![dir_path, name],
                row_to_file_detail,
            )
            .optional()
    }

    pub fn files_in_directory(&self, dir_id: i64) -> Result<Vec<FileDetail>> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "SELECT {} FROM vw_file_detail WHERE dir_id = ?1 ORDER BY name",
            FILE_DETAIL_COLUMNS
        ))?;
        let files = stmt
            .query_map(params![dir_id], row_to_file_detail)?
            .collect::<Result<Vec<_>>>()?;
        Ok(files)
    }

    // ── Hashes and scheduling state ──────────────────────────────

    pub fn get_hash(&self, file_id: i64) -> Result<Option<HashRecord>> {
        self.connection()
            .query_row(
                "SELECT file_id, xxh64_hash, xxh64_hashed_on, blake3_hash, blake3_hashed_on \
                 FROM hash WHERE file_id = ?1",
                params![file_id],
                |row| {
                    Ok(HashRecord {
                        file_id: row.get(0)?,
                        xxh64_hash: row.get(1)?,
                        xxh64_hashed_on: row.get(2)?,
                        blake3_hash: row.get(3)?,
                        blake3_hashed_on: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    pub fn get_hash_control(&self, file_id: i64) -> Result<Option<HashControl>> {
        self.connection()
            .query_row(
                "SELECT file_id, mtime, file_size, claimed_by, claimed_at, inserted_on \
                 FROM hash_control WHERE file_id = ?1",
                params![file_id],
                |row| {
                    Ok(HashControl {
                        file_id: row.get(0)?,
                        mtime: row.get(1)?,
                        file_size: row.get(2)?,
                        claimed_by: row.get(3)?,
                        claimed_at: row.get(4)?,
                        inserted_on: row.get(5)?,
                    })
                },
            )
            .optional()
    }

    pub fn get_crawl_control(&self, dir_id: i64) -> Result<Option<CrawlControl>> {
        self.connection()
            .query_row(
                "SELECT dir_id, file_count, subdir_count, next_due, crawl_interval, last_crawled, \
                        last_activity, claimed_by, claimed_at, dir_missing, inserted_on \
                 FROM crawl_control WHERE dir_id = ?1",
                params![dir_id],
                |row| {
                    Ok(CrawlControl {
                        dir_id: row.get(0)?,
                        file_count: row.get(1)?,
                        subdir_count: row.get(2)?,
                        next_due: row.get(3)?,
                        crawl_interval: row.get(4)?,
                        last_crawled: row.get(5)?,
                        last_activity: row.get(6)?,
                        claimed_by: row.get(7)?,
                        claimed_at: row.get(8)?,
                        dir_missing: row.get(9)?,
                        inserted_on: row.get(10)?,
                    })
                },
            )
            .optional()
    }

    // ── Archives ─────────────────────────────────────────────────

    pub fn directory_archive(&self) -> Result<Vec<DirectoryArchive>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, dir_path, parent_path, ctime, mtime, original_inserted_on, \
                    original_updated_on, deleted_on \
             FROM directory_archive ORDER BY deleted_on, id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DirectoryArchive {
                    id: row.get(0)?,
                    dir_path: row.get(1)?,
                    parent_path: row.get(2)?,
                    ctime: row.get(3)?,
                    mtime: row.get(4)?,
                    original_inserted_on: row.get(5)?,
                    original_updated_on: row.get(6)?,
                    deleted_on: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn file_archive(&self) -> Result<Vec<FileArchive>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, dir_id, dir_path, name, extension, size, ctime, mtime, atime, \
                    xxh64_hash, blake3_hash, original_inserted_on, original_updated_on, deleted_on \
             FROM file_archive ORDER BY deleted_on, id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FileArchive {
                    id: row.get(0)?,
                    dir_id: row.get(1)?,
                    dir_path: row.get(2)?,
                    name: row.get(3)?,
                    extension: row.get(4)?,
                    size: row.get(5)?,
                    ctime: row.get(6)?,
                    mtime: row.get(7)?,
                    atime: row.get(8)?,
                    xxh64_hash: row.get(9)?,
                    blake3_hash: row.get(10)?,
                    original_inserted_on: row.get(11)?,
                    original_updated_on: row.get(12)?,
                    deleted_on: row.get(13)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Summary ──────────────────────────────────────────────────

    pub fn catalog_stats(&self, now: i64) -> Result<CatalogStats> {
        let conn = self.connection();
        let count = |sql: &str| -> Result<i64> { conn.query_row(sql, [], |row| row.get(0)) };

        Ok(CatalogStats {
            directories: count("SELECT COUNT(*) FROM directory")?,
            files: count("SELECT COUNT(*) FROM file")?,
            total_bytes: count("SELECT COALESCE(SUM(size), 0) FROM file")?,
            hashed_files: count("SELECT COUNT(*) FROM hash")?,
            crawls_due: conn.query_row(
                "SELECT COUNT(*) FROM crawl_control WHERE claimed_by IS NULL AND next_due <= ?1",
                params![now],
                |row| row.get(0),
            )?,
            crawl_claims: count("SELECT COUNT(*) FROM crawl_control WHERE claimed_by IS NOT NULL")?,
            missing_directories: count("SELECT COUNT(*) FROM crawl_control WHERE dir_missing = 1")?,
            hashes_pending: count("SELECT COUNT(*) FROM hash_control")?,
            hash_claims: count("SELECT COUNT(*) FROM hash_control WHERE claimed_by IS NOT NULL")?,
            staged_rows: count(
                "SELECT (SELECT COUNT(*) FROM directory_stage) \
                      + (SELECT COUNT(*) FROM file_stage) \
                      + (SELECT COUNT(*) FROM crawl_control_process) \
                      + (SELECT COUNT(*) FROM hash_stage)",
            )?,
            archived_directories: count("SELECT COUNT(*) FROM directory_archive")?,
            archived_files: count("SELECT COUNT(*) FROM file_archive")?,
            queued_removals: count(
                "SELECT (SELECT COUNT(*) FROM removal_file_queue) \
                      + (SELECT COUNT(*) FROM removal_directory_queue)",
            )?,
        })
    }
}
