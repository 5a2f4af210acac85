use super::models::{DigestResult, HashMergeStats, HashTask};
use super::sqlite::Database;
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::path::Path;
use tracing::debug;

struct StagedDigest {
    file_id: i64,
    claimed_by: String,
    mtime: Option<i64>,
    file_size: i64,
    xxh64_hash: String,
    blake3_hash: String,
    hashed_on: i64,
}

impl Database {
    // ── Hash claims ──────────────────────────────────────────────

    /// Atomically claim up to `limit` unclaimed files awaiting a hash, smallest first.
    pub fn claim_files_to_hash(&self, claimant: &str, limit: usize, now: i64) -> Result<Vec<HashTask>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let tx = self.write_transaction()?;
        let claimed = tx
            .prepare_cached(
                "UPDATE hash_control SET claimed_by = ?1, claimed_at = ?2 \
                 WHERE file_id IN ( \
                     SELECT file_id FROM hash_control \
                     WHERE claimed_by IS NULL \
                     ORDER BY file_size, file_id \
                     LIMIT ?3) \
                 RETURNING file_id, file_size, mtime",
            )?
            .query_map(params![claimant, now, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>>>()?;

        let mut tasks = Vec::with_capacity(claimed.len());
        {
            let mut path_stmt = tx.prepare_cached(
                "SELECT d.dir_path, f.name FROM file f JOIN directory d ON d.id = f.dir_id \
                 WHERE f.id = ?1",
            )?;
            for (file_id, size, mtime) in claimed {
                let (dir_path, name): (String, String) =
                    path_stmt.query_row([file_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
                tasks.push(HashTask {
                    file_id,
                    path: Path::new(&dir_path).join(name),
                    size,
                    mtime,
                    claimed_by: claimant.to_string(),
                });
            }
        }
        tx.commit()?;

        tasks.sort_by(|a, b| a.size.cmp(&b.size).then(a.file_id.cmp(&b.file_id)));
        debug!(claimant, claimed = tasks.len(), "Claimed files for hashing");
        Ok(tasks)
    }

    // ── Hash staging and merge ───────────────────────────────────

    pub fn stage_digests(&self, digests: &[DigestResult]) -> Result<usize> {
        let tx = self.write_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO hash_stage \
                 (file_id, claimed_by, mtime, file_size, xxh64_hash, blake3_hash, hashed_on) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for digest in digests {
                stmt.execute(params![
                    digest.file_id,
                    digest.claimed_by,
                    digest.mtime,
                    digest.size,
                    digest.xxh64,
                    digest.blake3,
                    digest.hashed_on
                ])?;
            }
        }
        tx.commit()?;
        Ok(digests.len())
    }

    /// Release hash claims still held by the given claimants, leaving the files scheduled.
    pub fn release_hash_claims(&self, claims: &[(i64, String)]) -> Result<usize> {
        let tx = self.write_transaction()?;
        let mut released = 0;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE hash_control SET claimed_by = NULL, claimed_at = NULL \
                 WHERE file_id = ?1 AND claimed_by = ?2",
            )?;
            for (file_id, claimant) in claims {
                released += stmt.execute(params![file_id, claimant])?;
            }
        }
        tx.commit()?;
        Ok(released)
    }

    /// Move staged digests into `hash`, clearing each file's hash control row in
    /// the same transaction.
    pub fn merge_hash_batch(&self) -> Result<HashMergeStats> {
        let tx = self.write_transaction()?;
        let stats = apply_hash_batch(&tx)?;
        tx.commit()?;
        if stats.merged + stats.released + stats.dropped > 0 {
            debug!(
                merged = stats.merged,
                released = stats.released,
                dropped = stats.dropped,
                "Hash batch merged"
            );
        }
        Ok(stats)
    }
}

fn apply_hash_batch(conn: &Connection) -> Result<HashMergeStats> {
    let mut stats = HashMergeStats::default();

    let staged = conn
        .prepare_cached(
            "SELECT file_id, claimed_by, mtime, file_size, xxh64_hash, blake3_hash, hashed_on \
             FROM hash_stage",
        )?
        .query_map([], |row| {
            Ok(StagedDigest {
                file_id: row.get(0)?,
                claimed_by: row.get(1)?,
                mtime: row.get(2)?,
                file_size: row.get(3)?,
                xxh64_hash: row.get(4)?,
                blake3_hash: row.get(5)?,
                hashed_on: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    for digest in staged {
        let control: Option<(Option<i64>, i64, Option<String>)> = conn
            .prepare_cached("SELECT mtime, file_size, claimed_by FROM hash_control WHERE file_id = ?1")?
            .query_row([digest.file_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .optional()?;

        match control {
            Some((mtime, size, Some(holder))) if holder == digest.claimed_by => {
                if mtime == digest.mtime && size == digest.file_size {
                    conn.prepare_cached(
                        "INSERT INTO hash (file_id, xxh64_hash, xxh64_hashed_on, blake3_hash, blake3_hashed_on) \
                         VALUES (?1, ?2, ?3, ?4, ?3) \
                         ON CONFLICT(file_id) DO UPDATE SET \
                             xxh64_hash = excluded.xxh64_hash, xxh64_hashed_on = excluded.xxh64_hashed_on, \
                             blake3_hash = excluded.blake3_hash, blake3_hashed_on = excluded.blake3_hashed_on",
                    )?
                    .execute(params![
                        digest.file_id,
                        digest.xxh64_hash,
                        digest.hashed_on,
                        digest.blake3_hash
                    ])?;
                    conn.prepare_cached("DELETE FROM hash_control WHERE file_id = ?1")?
                        .execute([digest.file_id])?;
                    stats.merged += 1;
                } else {
                    // Changed since it was scheduled; offer it again with the current claim cleared.
                    conn.prepare_cached(
                        "UPDATE hash_control SET claimed_by = NULL, claimed_at = NULL WHERE file_id = ?1",
                    )?
                    .execute([digest.file_id])?;
                    stats.released += 1;
                }
            }
            _ => {
                debug!(file_id = digest.file_id, claimant = %digest.claimed_by, "Hash claim not held, dropping digest");
                stats.dropped += 1;
            }
        }
    }

    conn.execute("DELETE FROM hash_stage", [])?;
    Ok(stats)
}
