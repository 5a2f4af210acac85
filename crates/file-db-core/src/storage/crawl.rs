use super::deletion::{enqueue_directory_removal, remove_directory_row, remove_file_row};
use super::models::*;
use super::sqlite::Database;
use crate::paths;
use crate::schedule::{CrawlFrequency, CrawlPriority};
use ahash::{AHashMap, AHashSet};
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::cmp::Ordering;
use tracing::{debug, warn};

struct StagedDirectory {
    dir_path: String,
    ctime: Option<i64>,
    mtime: Option<i64>,
}

struct StagedFile {
    name: String,
    extension: Option<String>,
    size: i64,
    ctime: Option<i64>,
    mtime: Option<i64>,
    atime: Option<i64>,
}

struct CrawlCompletion {
    dir_id: i64,
    claimed_by: String,
    status: String,
    file_count: i64,
    subdir_count: i64,
    crawled_on: i64,
}

impl Database {
    // ── Crawl claims ─────────────────────────────────────────────

    /// Atomically claim up to `limit` due, unclaimed directories for `claimant`,
    /// highest priority first.
    pub fn claim_due_directories(
        &self,
        claimant: &str,
        limit: usize,
        now: i64,
        priority: &CrawlPriority,
    ) -> Result<Vec<CrawlTask>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let tx = self.write_transaction()?;
        let sql = format!(
            "UPDATE crawl_control SET claimed_by = ?1, claimed_at = ?2 \
             WHERE dir_id IN ( \
                 SELECT dir_id FROM crawl_control \
                 WHERE claimed_by IS NULL AND next_due <= ?2 \
                 ORDER BY {} DESC, dir_id \
                 LIMIT ?4) \
             RETURNING dir_id, next_due, file_count, subdir_count, last_crawled",
            CrawlPriority::sql_score("?2", "?3")
        );

        let claimed = {
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![claimant, now, priority.size_divisor.max(1), limit as i64],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, Option<i64>>(4)?,
                        ))
                    },
                )?
                .collect::<Result<Vec<_>>>()?;
            rows
        };

        let mut scored = Vec::with_capacity(claimed.len());
        {
            let mut path_stmt = tx.prepare_cached("SELECT dir_path FROM directory WHERE id = ?1")?;
            for (dir_id, next_due, file_count, subdir_count, last_crawled) in claimed {
                let dir_path: String = path_stmt.query_row([dir_id], |row| row.get(0))?;
                let score = priority.score(now, next_due, file_count, subdir_count);
                scored.push((
                    score,
                    CrawlTask {
                        dir_id,
                        dir_path,
                        last_crawled,
                        claimed_by: claimant.to_string(),
                    },
                ));
            }
        }
        tx.commit()?;

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.dir_id.cmp(&b.1.dir_id))
        });
        let tasks: Vec<CrawlTask> = scored.into_iter().map(|(_, task)| task).collect();
        debug!(claimant, claimed = tasks.len(), "Claimed directories for crawling");
        Ok(tasks)
    }

    // ── Staging ──────────────────────────────────────────────────

    /// Buffer crawl snapshots for the next reconcile. A snapshot whose claim is
    /// no longer held by its crawler is discarded.
    pub fn stage_snapshots(&self, snapshots: &[Snapshot]) -> Result<StageStats> {
        let tx = self.write_transaction()?;
        let mut stats = StageStats::default();

        for snapshot in snapshots {
            if !crawl_claim_held(&tx, snapshot.dir_id, &snapshot.claimed_by)? {
                warn!(
                    dir_id = snapshot.dir_id,
                    claimant = %snapshot.claimed_by,
                    "Crawl claim no longer held, dropping snapshot of {}",
                    snapshot.dir_path
                );
                stats.rejected += 1;
                continue;
            }
            stage_snapshot(&tx, snapshot)?;
            stats.staged += 1;
        }

        tx.commit()?;
        debug!(staged = stats.staged, rejected = stats.rejected, "Snapshots staged");
        Ok(stats)
    }

    // ── Reconcile ────────────────────────────────────────────────

    pub fn merge_directory_batch(&self, now: i64, frequency: &CrawlFrequency) -> Result<MergeStats> {
        let tx = self.write_transaction()?;
        let stats = apply_directory_batch(&tx, now, frequency)?;
        tx.commit()?;
        Ok(stats)
    }

    pub fn merge_file_batch(&self, now: i64) -> Result<MergeStats> {
        let tx = self.write_transaction()?;
        let stats = apply_file_batch(&tx, now)?;
        tx.commit()?;
        Ok(stats)
    }

    /// Release and reschedule every crawled directory whose staged data is fully merged.
    pub fn mark_crawled(&self, frequency: &CrawlFrequency) -> Result<usize> {
        let tx = self.write_transaction()?;
        let crawled = apply_mark_crawled(&tx, frequency)?;
        tx.commit()?;
        Ok(crawled)
    }

    /// Directory merge, file merge and mark-crawled as one transaction.
    pub fn reconcile(&self, now: i64, frequency: &CrawlFrequency) -> Result<ReconcileStats> {
        let tx = self.write_transaction()?;
        let directories = apply_directory_batch(&tx, now, frequency)?;
        let files = apply_file_batch(&tx, now)?;
        let crawled = apply_mark_crawled(&tx, frequency)?;
        tx.commit()?;

        let stats = ReconcileStats {
            directories,
            files,
            crawled,
        };
        debug!(?stats, "Reconcile complete");
        Ok(stats)
    }
}

fn crawl_claim_held(conn: &Connection, dir_id: i64, claimant: &str) -> Result<bool> {
    let holder: Option<Option<String>> = conn
        .prepare_cached("SELECT claimed_by FROM crawl_control WHERE dir_id = ?1")?
        .query_row([dir_id], |row| row.get(0))
        .optional()?;
    Ok(matches!(holder, Some(Some(ref held)) if held == claimant))
}

fn stage_snapshot(conn: &Connection, snapshot: &Snapshot) -> Result<()> {
    // The newest snapshot of a directory replaces anything staged before it.
    conn.prepare_cached("DELETE FROM directory_stage WHERE parent_id = ?1")?
        .execute([snapshot.dir_id])?;
    conn.prepare_cached("DELETE FROM file_stage WHERE dir_id = ?1")?
        .execute([snapshot.dir_id])?;
    conn.prepare_cached("DELETE FROM directory_stage_process WHERE parent_id = ?1")?
        .execute([snapshot.dir_id])?;
    conn.prepare_cached("DELETE FROM file_stage_process WHERE dir_id = ?1")?
        .execute([snapshot.dir_id])?;

    if snapshot.status == DirStatus::Present {
        let mut dir_stmt = conn.prepare_cached(
            "INSERT OR REPLACE INTO directory_stage (dir_path, parent_id, ctime, mtime) \
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for subdir in &snapshot.subdirs {
            dir_stmt.execute(params![
                paths::join(&snapshot.dir_path, &subdir.name),
                snapshot.dir_id,
                subdir.ctime,
                subdir.mtime
            ])?;
        }

        let mut file_stmt = conn.prepare_cached(
            "INSERT OR REPLACE INTO file_stage (dir_id, name, extension, size, ctime, mtime, atime) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for file in &snapshot.files {
            file_stmt.execute(params![
                snapshot.dir_id,
                file.name,
                file.extension(),
                file.size,
                file.ctime,
                file.mtime,
                file.atime
            ])?;
        }

        conn.prepare_cached(
            "INSERT INTO directory_stage_process (parent_id, delete_missing) VALUES (?1, ?2)",
        )?
        .execute(params![snapshot.dir_id, snapshot.complete])?;
        conn.prepare_cached("INSERT INTO file_stage_process (dir_id, delete_missing) VALUES (?1, ?2)")?
            .execute(params![snapshot.dir_id, snapshot.complete])?;
    }

    conn.prepare_cached(
        "INSERT OR REPLACE INTO crawl_control_process \
         (dir_id, claimed_by, status, file_count, subdir_count, crawled_on) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?
    .execute(params![
        snapshot.dir_id,
        snapshot.claimed_by,
        snapshot.status.as_str(),
        snapshot.file_count() as i64,
        snapshot.subdir_count() as i64,
        snapshot.crawled_on
    ])?;
    Ok(())
}

fn apply_directory_batch(conn: &Connection, now: i64, frequency: &CrawlFrequency) -> Result<MergeStats> {
    let mut stats = MergeStats::default();

    let markers = conn
        .prepare_cached("SELECT parent_id, delete_missing FROM directory_stage_process")?
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?)))?
        .collect::<Result<Vec<_>>>()?;

    for (parent_id, delete_missing) in markers {
        let parent_path: Option<String> = conn
            .prepare_cached("SELECT dir_path FROM directory WHERE id = ?1")?
            .query_row([parent_id], |row| row.get(0))
            .optional()?;

        match parent_path {
            Some(parent_path) => {
                merge_subdirectories(conn, parent_id, &parent_path, delete_missing, now, frequency, &mut stats)?;
            }
            None => debug!(parent_id, "Parent directory removed before merge, dropping staged subdirectories"),
        }

        conn.prepare_cached("DELETE FROM directory_stage WHERE parent_id = ?1")?
            .execute([parent_id])?;
        conn.prepare_cached("DELETE FROM directory_stage_process WHERE parent_id = ?1")?
            .execute([parent_id])?;
    }

    Ok(stats)
}

fn merge_subdirectories(
    conn: &Connection,
    parent_id: i64,
    parent_path: &str,
    delete_missing: bool,
    now: i64,
    frequency: &CrawlFrequency,
    stats: &mut MergeStats,
) -> Result<()> {
    let staged = conn
        .prepare_cached("SELECT dir_path, ctime, mtime FROM directory_stage WHERE parent_id = ?1")?
        .query_map([parent_id], |row| {
            Ok(StagedDirectory {
                dir_path: row.get(0)?,
                ctime: row.get(1)?,
                mtime: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    let mut seen: AHashSet<String> = AHashSet::with_capacity(staged.len());

    for dir in staged {
        let existing: Option<(i64, Option<i64>, Option<i64>)> = conn
            .prepare_cached("SELECT id, ctime, mtime FROM directory WHERE dir_path = ?1")?
            .query_row([&dir.dir_path], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .optional()?;

        let dir_id = match existing {
            None => {
                conn.prepare_cached(
                    "INSERT INTO directory (dir_path, parent_path, ctime, mtime, inserted_on) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?
                .execute(params![dir.dir_path, parent_path, dir.ctime, dir.mtime, now])?;
                stats.inserted += 1;
                conn.last_insert_rowid()
            }
            Some((id, ctime, mtime)) => {
                if ctime != dir.ctime || mtime != dir.mtime {
                    conn.prepare_cached(
                        "UPDATE directory SET ctime = ?1, mtime = ?2, updated_on = ?3 WHERE id = ?4",
                    )?
                    .execute(params![dir.ctime, dir.mtime, now, id])?;
                    stats.updated += 1;
                } else {
                    stats.unchanged += 1;
                }
                // A directory seen again after being flagged missing is crawled promptly.
                conn.prepare_cached(
                    "UPDATE crawl_control SET next_due = MIN(next_due, ?1) \
                     WHERE dir_id = ?2 AND dir_missing = 1",
                )?
                .execute(params![now, id])?;
                id
            }
        };

        let scheduled = conn
            .prepare_cached(
                "INSERT OR IGNORE INTO crawl_control (dir_id, next_due, crawl_interval, inserted_on) \
                 VALUES (?1, ?2, ?3, ?2)",
            )?
            .execute(params![dir_id, now, frequency.default_interval])?;
        stats.scheduled += scheduled;

        seen.insert(dir.dir_path);
    }

    if delete_missing {
        let children = conn
            .prepare_cached("SELECT id, dir_path FROM directory WHERE parent_path = ?1")?
            .query_map([parent_path], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>>>()?;

        for (child_id, child_path) in children {
            if seen.contains(&child_path) {
                continue;
            }
            // Only the child goes now; anything nested below it is left to the removal queue.
            let nested = conn
                .prepare_cached("SELECT id FROM directory WHERE parent_path = ?1")?
                .query_map([&child_path], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>>>()?;
            for nested_id in nested {
                enqueue_directory_removal(conn, nested_id, true, Some(&child_path), now)?;
            }
            if remove_directory_row(conn, child_id, now)?.is_some() {
                debug!(dir_id = child_id, "Removed vanished directory {}", child_path);
                stats.deleted += 1;
            }
        }
    }

    Ok(())
}

fn apply_file_batch(conn: &Connection, now: i64) -> Result<MergeStats> {
    let mut stats = MergeStats::default();

    let markers = conn
        .prepare_cached("SELECT dir_id, delete_missing FROM file_stage_process")?
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?)))?
        .collect::<Result<Vec<_>>>()?;

    for (dir_id, delete_missing) in markers {
        let exists: bool = conn
            .prepare_cached("SELECT EXISTS(SELECT 1 FROM directory WHERE id = ?1)")?
            .query_row([dir_id], |row| row.get(0))?;

        if exists {
            merge_directory_files(conn, dir_id, delete_missing, now, &mut stats)?;
        } else {
            debug!(dir_id, "Directory removed before merge, dropping staged files");
        }

        conn.prepare_cached("DELETE FROM file_stage WHERE dir_id = ?1")?
            .execute([dir_id])?;
        conn.prepare_cached("DELETE FROM file_stage_process WHERE dir_id = ?1")?
            .execute([dir_id])?;
    }

    Ok(stats)
}

fn merge_directory_files(
    conn: &Connection,
    dir_id: i64,
    delete_missing: bool,
    now: i64,
    stats: &mut MergeStats,
) -> Result<()> {
    let staged = conn
        .prepare_cached(
            "SELECT name, extension, size, ctime, mtime, atime FROM file_stage WHERE dir_id = ?1",
        )?
        .query_map([dir_id], |row| {
            Ok(StagedFile {
                name: row.get(0)?,
                extension: row.get(1)?,
                size: row.get(2)?,
                ctime: row.get(3)?,
                mtime: row.get(4)?,
                atime: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    let mut existing: AHashMap<String, FileRecord> = conn
        .prepare_cached(
            "SELECT id, dir_id, name, extension, size, ctime, mtime, atime, inserted_on, updated_on \
             FROM file WHERE dir_id = ?1",
        )?
        .query_map([dir_id], super::queries::row_to_file)?
        .map(|record| record.map(|r| (r.name.clone(), r)))
        .collect::<Result<AHashMap<_, _>>>()?;

    for file in staged {
        match existing.remove(&file.name) {
            None => {
                conn.prepare_cached(
                    "INSERT INTO file (dir_id, name, extension, size, ctime, mtime, atime, inserted_on) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?
                .execute(params![
                    dir_id,
                    file.name,
                    file.extension,
                    file.size,
                    file.ctime,
                    file.mtime,
                    file.atime,
                    now
                ])?;
                let file_id = conn.last_insert_rowid();
                schedule_hash(conn, file_id, file.mtime, file.size, now)?;
                stats.inserted += 1;
                stats.scheduled += 1;
            }
            Some(record) => {
                let content_changed = record.size != file.size || record.mtime != file.mtime;
                let changed = content_changed
                    || record.ctime != file.ctime
                    || record.atime != file.atime
                    || record.extension != file.extension;

                if changed {
                    conn.prepare_cached(
                        "UPDATE file SET extension = ?1, size = ?2, ctime = ?3, mtime = ?4, atime = ?5, \
                         updated_on = ?6 WHERE id = ?7",
                    )?
                    .execute(params![
                        file.extension,
                        file.size,
                        file.ctime,
                        file.mtime,
                        file.atime,
                        now,
                        record.id
                    ])?;
                    stats.updated += 1;
                } else {
                    stats.unchanged += 1;
                }

                if content_changed {
                    conn.prepare_cached("DELETE FROM hash WHERE file_id = ?1")?
                        .execute([record.id])?;
                    schedule_hash(conn, record.id, file.mtime, file.size, now)?;
                    stats.scheduled += 1;
                } else if !hash_state_exists(conn, record.id)? {
                    schedule_hash(conn, record.id, file.mtime, file.size, now)?;
                    stats.scheduled += 1;
                }
            }
        }
    }

    if delete_missing {
        for record in existing.into_values() {
            if remove_file_row(conn, record.id, now)? {
                debug!(file_id = record.id, "Removed vanished file {}", record.name);
                stats.deleted += 1;
            }
        }
    }

    Ok(())
}

/// (Re)creates the file's hash control row unclaimed, with the given metadata.
fn schedule_hash(conn: &Connection, file_id: i64, mtime: Option<i64>, size: i64, now: i64) -> Result<()> {
    conn.prepare_cached(
        "INSERT OR REPLACE INTO hash_control (file_id, mtime, file_size, claimed_by, claimed_at, inserted_on) \
         VALUES (?1, ?2, ?3, NULL, NULL, ?4)",
    )?
    .execute(params![file_id, mtime, size, now])?;
    Ok(())
}

fn hash_state_exists(conn: &Connection, file_id: i64) -> Result<bool> {
    conn.prepare_cached(
        "SELECT EXISTS(SELECT 1 FROM hash WHERE file_id = ?1) \
             OR EXISTS(SELECT 1 FROM hash_control WHERE file_id = ?1)",
    )?
    .query_row([file_id], |row| row.get(0))
}

fn apply_mark_crawled(conn: &Connection, frequency: &CrawlFrequency) -> Result<usize> {
    let completions = conn
        .prepare_cached(
            "SELECT p.dir_id, p.claimed_by, p.status, p.file_count, p.subdir_count, p.crawled_on \
             FROM crawl_control_process p \
             WHERE NOT EXISTS (SELECT 1 FROM file_stage s WHERE s.dir_id = p.dir_id) \
               AND NOT EXISTS (SELECT 1 FROM file_stage_process s WHERE s.dir_id = p.dir_id) \
               AND NOT EXISTS (SELECT 1 FROM directory_stage s WHERE s.parent_id = p.dir_id) \
               AND NOT EXISTS (SELECT 1 FROM directory_stage_process s WHERE s.parent_id = p.dir_id)",
        )?
        .query_map([], |row| {
            Ok(CrawlCompletion {
                dir_id: row.get(0)?,
                claimed_by: row.get(1)?,
                status: row.get(2)?,
                file_count: row.get(3)?,
                subdir_count: row.get(4)?,
                crawled_on: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    let mut crawled = 0;
    for completion in completions {
        if complete_crawl(conn, &completion, frequency)? {
            crawled += 1;
        }
        conn.prepare_cached("DELETE FROM crawl_control_process WHERE dir_id = ?1")?
            .execute([completion.dir_id])?;
    }
    Ok(crawled)
}

fn complete_crawl(conn: &Connection, completion: &CrawlCompletion, frequency: &CrawlFrequency) -> Result<bool> {
    let status = completion.status.parse::<DirStatus>().unwrap_or_else(|e| {
        warn!(dir_id = completion.dir_id, "{}; treating as unreadable", e);
        DirStatus::Unreadable
    });

    let current: Option<(String, Option<i64>, Option<i64>, i64, i64, i64)> = conn
        .prepare_cached(
            "SELECT d.dir_path, d.ctime, d.mtime, c.inserted_on, c.file_count, c.subdir_count \
             FROM crawl_control c JOIN directory d ON d.id = c.dir_id \
             WHERE c.dir_id = ?1",
        )?
        .query_row([completion.dir_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
        })
        .optional()?;

    let Some((dir_path, ctime, mtime, inserted_on, prev_files, prev_subdirs)) = current else {
        debug!(dir_id = completion.dir_id, "Directory removed before it was marked crawled");
        return Ok(false);
    };

    let (last_activity, file_count, subdir_count) = match status {
        DirStatus::Present => {
            let newest_child: Option<i64> = conn
                .prepare_cached(
                    "SELECT MAX(t) FROM ( \
                         SELECT COALESCE(ctime, mtime) AS t FROM file WHERE dir_id = ?1 \
                         UNION ALL \
                         SELECT COALESCE(ctime, mtime) AS t FROM directory WHERE parent_path = ?2)",
                )?
                .query_row(params![completion.dir_id, dir_path], |row| row.get(0))?;
            let last = newest_child.or(ctime).or(mtime).unwrap_or(inserted_on);
            (Some(last), completion.file_count, completion.subdir_count)
        }
        DirStatus::Missing => (None, 0, 0),
        DirStatus::Unreadable => (None, prev_files, prev_subdirs),
    };

    let interval = frequency.interval_for(
        status,
        completion.crawled_on,
        last_activity.unwrap_or(completion.crawled_on),
    );

    let updated = conn
        .prepare_cached(
            "UPDATE crawl_control SET \
                 last_crawled = ?1, next_due = ?2, crawl_interval = ?3, \
                 last_activity = COALESCE(?4, last_activity), \
                 file_count = ?5, subdir_count = ?6, dir_missing = ?7, \
                 claimed_by = NULL, claimed_at = NULL \
             WHERE dir_id = ?8 AND (claimed_by IS NULL OR claimed_by = ?9)",
        )?
        .execute(params![
            completion.crawled_on,
            completion.crawled_on + interval,
            interval,
            last_activity,
            file_count,
            subdir_count,
            status == DirStatus::Missing,
            completion.dir_id,
            completion.claimed_by
        ])?;

    if updated == 0 {
        warn!(
            dir_id = completion.dir_id,
            claimant = %completion.claimed_by,
            "Directory was reclaimed before its crawl completed; schedule left untouched"
        );
    }
    Ok(updated > 0)
}
