use crate::hasher::HashAlgorithm;
use crate::paths;
use crate::storage::models::{Directory, FileDetail};
use crate::storage::queries::{row_to_directory, row_to_file_detail, FILE_DETAIL_COLUMNS};
use crate::storage::Database;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Result};

pub const FILE_ORDER_COLUMNS: &[&str] = &[
    "name", "extension", "size", "ctime", "mtime", "atime", "dir_path",
];

pub const DIRECTORY_ORDER_COLUMNS: &[&str] = &["dir_path", "ctime", "mtime", "inserted_on"];

/// Translate a shell-style wildcard into a SQL LIKE pattern escaped with `\`.
pub fn wildcard_to_like(pattern: &str) -> String {
    let mut like = String::with_capacity(pattern.len() + 2);
    for ch in pattern.chars() {
        match ch {
            '*' => like.push('%'),
            '?' => like.push('_'),
            '%' | '_' | '\\' => {
                like.push('\\');
                like.push(ch);
            }
            other => like.push(other),
        }
    }
    like
}

/// Build an ORDER BY clause from user input, keeping only allow-listed columns.
///
/// Accepts `col`, `col asc`, `col desc`, comma separated. Falls back to `default`
/// when nothing usable remains.
pub fn sanitize_order_by(input: Option<&str>, allowed: &[&str], default: &str) -> String {
    let Some(input) = input else {
        return default.to_string();
    };

    let terms: Vec<String> = input
        .split(',')
        .filter_map(|term| {
            let mut words = term.split_whitespace();
            let column = words.next()?.to_ascii_lowercase();
            let column = allowed.iter().find(|candidate| **candidate == column)?;
            let direction = match words.next().map(|d| d.to_ascii_lowercase()) {
                None => "ASC",
                Some(d) if d == "asc" => "ASC",
                Some(d) if d == "desc" => "DESC",
                Some(_) => return None,
            };
            if words.next().is_some() {
                return None;
            }
            Some(format!("{} {}", column, direction))
        })
        .collect();

    if terms.is_empty() {
        default.to_string()
    } else {
        terms.join(", ")
    }
}

/// Predicate search over catalogued files. Every set field narrows the result.
#[derive(Debug, Clone, Default)]
pub struct FileSearch {
    /// Wildcard over the file name (`*` and `?`), case-insensitive.
    pub name: Option<String>,
    pub extension: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub modified_after: Option<i64>,
    pub modified_before: Option<i64>,
    /// Restrict to files at or below this directory.
    pub under: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

pub fn search_files(db: &Database, search: &FileSearch) -> Result<Vec<FileDetail>> {
    let mut sql = format!("SELECT {} FROM vw_file_detail WHERE 1 = 1", FILE_DETAIL_COLUMNS);
    let mut values: Vec<Value> = Vec::new();
    let mut bind = |sql: &mut String, clause: &str, value: Value| {
        values.push(value);
        sql.push_str(&clause.replace("?#", &format!("?{}", values.len())));
    };

    if let Some(name) = &search.name {
        bind(&mut sql, " AND name LIKE ?# ESCAPE '\\'", Value::Text(wildcard_to_like(name)));
    }
    if let Some(extension) = &search.extension {
        let extension = extension.trim_start_matches('.').to_lowercase();
        bind(&mut sql, " AND extension = ?#", Value::Text(extension));
    }
    if let Some(min) = search.min_size {
        bind(&mut sql, " AND size >= ?#", Value::Integer(min));
    }
    if let Some(max) = search.max_size {
        bind(&mut sql, " AND size <= ?#", Value::Integer(max));
    }
    if let Some(after) = search.modified_after {
        bind(&mut sql, " AND mtime >= ?#", Value::Integer(after));
    }
    if let Some(before) = search.modified_before {
        bind(&mut sql, " AND mtime < ?#", Value::Integer(before));
    }
    if let Some(under) = &search.under {
        let prefix = paths::descendant_prefix(under);
        bind(&mut sql, " AND (dir_path = ?#", Value::Text(under.clone()));
        bind(
            &mut sql,
            " OR substr(dir_path, 1, ?#)",
            Value::Integer(prefix.chars().count() as i64),
        );
        bind(&mut sql, " = ?#)", Value::Text(prefix));
    }

    let order = sanitize_order_by(search.order_by.as_deref(), FILE_ORDER_COLUMNS, "dir_path, name");
    sql.push_str(&format!(" ORDER BY {}, file_id", order));
    if let Some(limit) = search.limit {
        bind(&mut sql, " LIMIT ?#", Value::Integer(limit as i64));
    }

    let mut stmt = db.connection().prepare(&sql)?;
    let files = stmt
        .query_map(params_from_iter(values), row_to_file_detail)?
        .collect::<Result<Vec<_>>>()?;
    Ok(files)
}

/// Directories whose full path matches a wildcard.
pub fn search_directories(
    db: &Database,
    pattern: &str,
    order_by: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<Directory>> {
    let order = sanitize_order_by(order_by, DIRECTORY_ORDER_COLUMNS, "dir_path");
    let sql = format!(
        "SELECT id, dir_path, parent_path, ctime, mtime, inserted_on, updated_on \
         FROM directory WHERE dir_path LIKE ?1 ESCAPE '\\' ORDER BY {}, id LIMIT ?2",
        order
    );
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = db.connection().prepare(&sql)?;
    let dirs = stmt
        .query_map(
            params_from_iter([Value::Text(wildcard_to_like(pattern)), Value::Integer(limit)]),
            row_to_directory,
        )?
        .collect::<Result<Vec<_>>>()?;
    Ok(dirs)
}

/// Files carrying the given digest, in either column unless an algorithm is named.
pub fn search_hash(db: &Database, hash: &str, algorithm: Option<HashAlgorithm>) -> Result<Vec<FileDetail>> {
    let hash = hash.trim().to_ascii_lowercase();
    let predicate = match algorithm {
        Some(algorithm) => format!("{} = ?1", algorithm.column()),
        None => "(xxh64_hash = ?1 OR blake3_hash = ?1)".to_string(),
    };
    let sql = format!(
        "SELECT {} FROM vw_file_detail WHERE {} ORDER BY dir_path, name, file_id",
        FILE_DETAIL_COLUMNS, predicate
    );
    let mut stmt = db.connection().prepare(&sql)?;
    let files = stmt
        .query_map([hash], row_to_file_detail)?
        .collect::<Result<Vec<_>>>()?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards_translate() {
        assert_eq!(wildcard_to_like("*.JPG"), "%.JPG");
        assert_eq!(wildcard_to_like("file?.txt"), "file_.txt");
    }

    #[test]
    fn test_like_metacharacters_escaped() {
        assert_eq!(wildcard_to_like("50%_off"), "50\\%\\_off");
        assert_eq!(wildcard_to_like("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_order_by_allowlist() {
        let allowed = &["name", "size"];
        assert_eq!(sanitize_order_by(Some("size desc"), allowed, "name"), "size DESC");
        assert_eq!(
            sanitize_order_by(Some("SIZE, name asc"), allowed, "name"),
            "size ASC, name ASC"
        );
    }

    #[test]
    fn test_order_by_rejects_injection() {
        let allowed = &["name", "size"];
        assert_eq!(
            sanitize_order_by(Some("name; DROP TABLE file"), allowed, "name"),
            "name"
        );
        assert_eq!(sanitize_order_by(Some("size sideways"), allowed, "name"), "name");
        assert_eq!(sanitize_order_by(Some("password"), allowed, "name"), "name");
        assert_eq!(sanitize_order_by(None, allowed, "name"), "name");
    }
}
