use super::models::DeletionOutcome;
use super::sqlite::Database;
use crate::paths;
use rusqlite::{params, Connection, OptionalExtension, Result};
use tracing::{debug, info};

impl Database {
    // ── Deletion ─────────────────────────────────────────────────

    /// Archive and remove files. Unknown ids are skipped; the removed ids are returned.
    pub fn delete_files(&self, file_ids: &[i64], now: i64) -> Result<Vec<i64>> {
        let tx = self.write_transaction()?;
        let mut removed = Vec::new();
        for &file_id in file_ids {
            if remove_file_row(&tx, file_id, now)? {
                removed.push(file_id);
            }
        }
        tx.commit()?;
        debug!(requested = file_ids.len(), removed = removed.len(), "Files deleted");
        Ok(removed)
    }

    /// Archive and remove directories with their files.
    ///
    /// With `recursive`, every descendant directory (by path prefix) goes too:
    /// removed in this transaction when `inline`, otherwise handed to the
    /// removal queue for `process_removal_queue`.
    pub fn delete_directories(
        &self,
        dir_ids: &[i64],
        recursive: bool,
        inline: bool,
        now: i64,
    ) -> Result<DeletionOutcome> {
        let tx = self.write_transaction()?;
        let mut outcome = DeletionOutcome::default();
        for &dir_id in dir_ids {
            outcome.absorb(delete_directory_tree(&tx, dir_id, recursive, inline, now)?);
        }
        tx.commit()?;
        info!(
            directories = outcome.directories.len(),
            files = outcome.files.len(),
            queued = outcome.queued.len(),
            "Directories deleted"
        );
        Ok(outcome)
    }

    pub fn request_file_removal(&self, file_ids: &[i64], now: i64) -> Result<usize> {
        let tx = self.write_transaction()?;
        let mut queued = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO removal_file_queue (file_id, requested_on) VALUES (?1, ?2)",
            )?;
            for &file_id in file_ids {
                queued += stmt.execute(params![file_id, now])?;
            }
        }
        tx.commit()?;
        Ok(queued)
    }

    pub fn request_directory_removal(&self, dir_ids: &[i64], recursive: bool, now: i64) -> Result<usize> {
        let tx = self.write_transaction()?;
        for &dir_id in dir_ids {
            enqueue_directory_removal(&tx, dir_id, recursive, None, now)?;
        }
        tx.commit()?;
        Ok(dir_ids.len())
    }

    /// Drain up to `limit` entries from each removal queue in one transaction.
    pub fn process_removal_queue(&self, limit: usize, now: i64) -> Result<DeletionOutcome> {
        let tx = self.write_transaction()?;
        let mut outcome = DeletionOutcome::default();

        let file_ids = tx
            .prepare_cached("SELECT file_id FROM removal_file_queue ORDER BY requested_on, file_id LIMIT ?1")?
            .query_map([limit as i64], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>>>()?;
        for file_id in file_ids {
            if remove_file_row(&tx, file_id, now)? {
                outcome.files.push(file_id);
            }
            tx.prepare_cached("DELETE FROM removal_file_queue WHERE file_id = ?1")?
                .execute([file_id])?;
        }

        let dir_requests = tx
            .prepare_cached(
                "SELECT dir_id, recursive, vanished_parent FROM removal_directory_queue \
                 ORDER BY requested_on, dir_id LIMIT ?1",
            )?
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>>>()?;
        for (dir_id, recursive, vanished_parent) in dir_requests {
            tx.prepare_cached("DELETE FROM removal_directory_queue WHERE dir_id = ?1")?
                .execute([dir_id])?;
            if let Some(parent) = vanished_parent {
                if directory_path_exists(&tx, &parent)? {
                    debug!(dir_id, "Parent {} is catalogued again, keeping queued directory", parent);
                    continue;
                }
            }
            outcome.absorb(delete_directory_tree(&tx, dir_id, recursive, false, now)?);
        }

        tx.commit()?;
        if !outcome.is_empty() {
            debug!(
                directories = outcome.directories.len(),
                files = outcome.files.len(),
                queued = outcome.queued.len(),
                "Removal queue drained"
            );
        }
        Ok(outcome)
    }

    pub fn pending_removals(&self) -> Result<i64> {
        self.connection().query_row(
            "SELECT (SELECT COUNT(*) FROM removal_file_queue) \
                  + (SELECT COUNT(*) FROM removal_directory_queue)",
            [],
            |row| row.get(0),
        )
    }
}

fn delete_directory_tree(
    conn: &Connection,
    dir_id: i64,
    recursive: bool,
    inline: bool,
    now: i64,
) -> Result<DeletionOutcome> {
    let mut outcome = DeletionOutcome::default();

    let dir_path: Option<String> = conn
        .prepare_cached("SELECT dir_path FROM directory WHERE id = ?1")?
        .query_row([dir_id], |row| row.get(0))
        .optional()?;
    let Some(dir_path) = dir_path else {
        return Ok(outcome);
    };

    if recursive {
        for descendant_id in descendant_ids(conn, &dir_path)? {
            if inline {
                if let Some(files) = remove_directory_row(conn, descendant_id, now)? {
                    outcome.files.extend(files);
                    outcome.directories.push(descendant_id);
                }
            } else {
                enqueue_directory_removal(conn, descendant_id, false, None, now)?;
                outcome.queued.push(descendant_id);
            }
        }
    }

    if let Some(files) = remove_directory_row(conn, dir_id, now)? {
        outcome.files.extend(files);
        outcome.directories.push(dir_id);
    }
    Ok(outcome)
}

/// Descendant directory ids, deepest paths first.
pub(crate) fn descendant_ids(conn: &Connection, dir_path: &str) -> Result<Vec<i64>> {
    let prefix = paths::descendant_prefix(dir_path);
    let ids = conn
        .prepare_cached(
            "SELECT id FROM directory WHERE substr(dir_path, 1, ?2) = ?1 \
             ORDER BY length(dir_path) DESC, id",
        )?
        .query_map(params![prefix, prefix.chars().count() as i64], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>>>()?;
    Ok(ids)
}

/// Queue a directory for removal. `vanished_parent` marks a request made only
/// because that parent disappeared; it lapses if the parent is catalogued again
/// before the queue is drained. An unconditional request always wins.
pub(crate) fn enqueue_directory_removal(
    conn: &Connection,
    dir_id: i64,
    recursive: bool,
    vanished_parent: Option<&str>,
    now: i64,
) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO removal_directory_queue (dir_id, recursive, vanished_parent, requested_on) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(dir_id) DO UPDATE SET \
             recursive = MAX(recursive, excluded.recursive), \
             vanished_parent = CASE WHEN vanished_parent = excluded.vanished_parent \
                                    THEN vanished_parent ELSE NULL END",
    )?
    .execute(params![dir_id, recursive, vanished_parent, now])?;
    Ok(())
}

fn directory_path_exists(conn: &Connection, dir_path: &str) -> Result<bool> {
    conn.prepare_cached("SELECT EXISTS(SELECT 1 FROM directory WHERE dir_path = ?1)")?
        .query_row([dir_path], |row| row.get(0))
}

/// Archive then remove one file and its hash state. Returns false for an unknown id.
pub(crate) fn remove_file_row(conn: &Connection, file_id: i64, now: i64) -> Result<bool> {
    let archived = conn
        .prepare_cached(
            "INSERT INTO file_archive \
                 (id, dir_id, dir_path, name, extension, size, ctime, mtime, atime, \
                  xxh64_hash, blake3_hash, original_inserted_on, original_updated_on, deleted_on) \
             SELECT f.id, f.dir_id, d.dir_path, f.name, f.extension, f.size, f.ctime, f.mtime, f.atime, \
                    h.xxh64_hash, h.blake3_hash, f.inserted_on, f.updated_on, ?2 \
             FROM file f \
             LEFT JOIN directory d ON d.id = f.dir_id \
             LEFT JOIN hash h ON h.file_id = f.id \
             WHERE f.id = ?1",
        )?
        .execute(params![file_id, now])?;
    if archived == 0 {
        return Ok(false);
    }

    conn.prepare_cached("DELETE FROM hash WHERE file_id = ?1")?
        .execute([file_id])?;
    conn.prepare_cached("DELETE FROM hash_control WHERE file_id = ?1")?
        .execute([file_id])?;
    conn.prepare_cached("DELETE FROM hash_stage WHERE file_id = ?1")?
        .execute([file_id])?;
    conn.prepare_cached("DELETE FROM removal_file_queue WHERE file_id = ?1")?
        .execute([file_id])?;
    let removed = conn
        .prepare_cached("DELETE FROM file WHERE id = ?1")?
        .execute([file_id])?;
    Ok(removed > 0)
}

/// Archive then remove one directory, its files and its crawl state.
/// Returns the removed file ids, or `None` for an unknown id.
pub(crate) fn remove_directory_row(conn: &Connection, dir_id: i64, now: i64) -> Result<Option<Vec<i64>>> {
    let file_ids = conn
        .prepare_cached("SELECT id FROM file WHERE dir_id = ?1 ORDER BY id")?
        .query_map([dir_id], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>>>()?;

    let mut removed_files = Vec::with_capacity(file_ids.len());
    for file_id in file_ids {
        if remove_file_row(conn, file_id, now)? {
            removed_files.push(file_id);
        }
    }

    let archived = conn
        .prepare_cached(
            "INSERT INTO directory_archive \
                 (id, dir_path, parent_path, ctime, mtime, original_inserted_on, original_updated_on, deleted_on) \
             SELECT id, dir_path, parent_path, ctime, mtime, inserted_on, updated_on, ?2 \
             FROM directory WHERE id = ?1",
        )?
        .execute(params![dir_id, now])?;
    if archived == 0 {
        return Ok(None);
    }

    conn.prepare_cached("DELETE FROM crawl_control WHERE dir_id = ?1")?
        .execute([dir_id])?;
    conn.prepare_cached("DELETE FROM removal_directory_queue WHERE dir_id = ?1")?
        .execute([dir_id])?;
    conn.prepare_cached("DELETE FROM directory WHERE id = ?1")?
        .execute([dir_id])?;
    Ok(Some(removed_files))
}
