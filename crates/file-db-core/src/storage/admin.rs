use super::models::ScheduleEntry;
use super::sqlite::Database;
use crate::paths;
use crate::search::sanitize_order_by;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Result};
use tracing::info;

pub const SCHEDULE_ORDER_COLUMNS: &[&str] = &[
    "dir_path",
    "next_due",
    "crawl_interval",
    "last_crawled",
    "file_count",
    "subdir_count",
];

/// Selects directories from the crawl schedule.
#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    /// Exact directory path, or the subtree root when `recursive`.
    pub path: Option<String>,
    pub recursive: bool,
    /// Pre-translated SQL LIKE pattern over the directory path.
    pub path_like: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

impl Database {
    // ── Schedule administration ──────────────────────────────────

    /// Catalog `dir_path` (if new) and make it due for crawling now.
    pub fn add_root_directory(
        &self,
        dir_path: &str,
        ctime: Option<i64>,
        mtime: Option<i64>,
        default_interval: i64,
        now: i64,
    ) -> Result<i64> {
        let tx = self.write_transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM directory WHERE dir_path = ?1",
                params![dir_path],
                |row| row.get(0),
            )
            .optional()?;

        let dir_id = match existing {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO directory (dir_path, parent_path, ctime, mtime, inserted_on) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![dir_path, paths::parent_path(dir_path), ctime, mtime, now],
                )?;
                tx.last_insert_rowid()
            }
        };

        let scheduled = tx.execute(
            "INSERT OR IGNORE INTO crawl_control (dir_id, next_due, crawl_interval, inserted_on) \
             VALUES (?1, ?2, ?3, ?2)",
            params![dir_id, now, default_interval],
        )?;
        if scheduled == 0 {
            tx.execute(
                "UPDATE crawl_control SET next_due = MIN(next_due, ?1) WHERE dir_id = ?2",
                params![now, dir_id],
            )?;
        }
        tx.commit()?;

        info!(dir_id, "Directory {} added to the crawl schedule", dir_path);
        Ok(dir_id)
    }

    pub fn view_schedule(&self, filter: &ScheduleFilter) -> Result<Vec<ScheduleEntry>> {
        let mut sql = String::from(
            "SELECT c.dir_id, d.dir_path, c.next_due, c.crawl_interval, c.last_crawled, \
                    c.file_count, c.subdir_count, c.claimed_by, c.dir_missing \
             FROM crawl_control c JOIN directory d ON d.id = c.dir_id WHERE 1 = 1",
        );
        let mut values: Vec<Value> = Vec::new();

        if let Some(path) = &filter.path {
            if filter.recursive {
                let prefix = paths::descendant_prefix(path);
                values.push(Value::Text(path.clone()));
                values.push(Value::Integer(prefix.chars().count() as i64));
                values.push(Value::Text(prefix));
                sql.push_str(&format!(
                    " AND (d.dir_path = ?{} OR substr(d.dir_path, 1, ?{}) = ?{})",
                    values.len() - 2,
                    values.len() - 1,
                    values.len()
                ));
            } else {
                values.push(Value::Text(path.clone()));
                sql.push_str(&format!(" AND d.dir_path = ?{}", values.len()));
            }
        }
        if let Some(pattern) = &filter.path_like {
            values.push(Value::Text(pattern.clone()));
            sql.push_str(&format!(" AND d.dir_path LIKE ?{} ESCAPE '\\'", values.len()));
        }

        let order = sanitize_order_by(filter.order_by.as_deref(), SCHEDULE_ORDER_COLUMNS, "next_due");
        sql.push_str(&format!(" ORDER BY {}, c.dir_id", order));
        if let Some(limit) = filter.limit {
            values.push(Value::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        let mut stmt = self.connection().prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values), |row| {
                Ok(ScheduleEntry {
                    dir_id: row.get(0)?,
                    dir_path: row.get(1)?,
                    next_due: row.get(2)?,
                    crawl_interval: row.get(3)?,
                    last_crawled: row.get(4)?,
                    file_count: row.get(5)?,
                    subdir_count: row.get(6)?,
                    claimed_by: row.get(7)?,
                    dir_missing: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Override a directory's interval and/or next due time. False when the path is not scheduled.
    pub fn reschedule_directory(
        &self,
        dir_path: &str,
        interval: Option<i64>,
        next_due: Option<i64>,
    ) -> Result<bool> {
        let tx = self.write_transaction()?;
        let updated = tx.execute(
            "UPDATE crawl_control SET \
                 crawl_interval = COALESCE(?1, crawl_interval), \
                 next_due = COALESCE(?2, next_due) \
             WHERE dir_id = (SELECT id FROM directory WHERE dir_path = ?3)",
            params![interval, next_due, dir_path],
        )?;
        tx.commit()?;
        Ok(updated > 0)
    }

    /// Make a directory due immediately.
    pub fn trigger_crawl(&self, dir_path: &str, now: i64) -> Result<bool> {
        self.reschedule_directory(dir_path, None, Some(now))
    }
}
