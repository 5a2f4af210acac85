use anyhow::Result;
use chrono::{DateTime, Local};
use colored::*;
use file_db_core::search::{DuplicateMatch, MatchKind};
use file_db_core::storage::models::{CatalogStats, Directory, FileDetail, ScheduleEntry};
use std::io;
use std::path::Path;

pub fn format_timestamp(secs: Option<i64>) -> String {
    secs.and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|time| time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn format_duration(secs: i64) -> String {
    match secs {
        s if s >= 86_400 => format!("{:.1}d", s as f64 / 86_400.0),
        s if s >= 3_600 => format!("{:.1}h", s as f64 / 3_600.0),
        s if s >= 60 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

fn optional(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn write_csv(header: &[&str], rows: Vec<Vec<String>>) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(io::stdout());
    wtr.write_record(header)?;
    for row in rows {
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn print_files(files: &[FileDetail], csv: bool) -> Result<()> {
    if csv {
        let rows = files
            .iter()
            .map(|f| {
                vec![
                    f.file_id.to_string(),
                    f.full_path().display().to_string(),
                    f.size.to_string(),
                    format_timestamp(f.mtime),
                    optional(&f.xxh64_hash).to_string(),
                    optional(&f.blake3_hash).to_string(),
                ]
            })
            .collect();
        return write_csv(&["file_id", "path", "size", "modified", "xxh64", "blake3"], rows);
    }

    for f in files {
        println!(
            "{:>10}  {}  {}",
            format_size(f.size).cyan(),
            format_timestamp(f.mtime).dimmed(),
            f.full_path().display()
        );
    }
    eprintln!("{} file(s)", files.len().to_string().bold());
    Ok(())
}

pub fn print_directories(dirs: &[Directory], csv: bool) -> Result<()> {
    if csv {
        let rows = dirs
            .iter()
            .map(|d| {
                vec![
                    d.id.to_string(),
                    d.dir_path.clone(),
                    format_timestamp(d.mtime),
                    format_timestamp(Some(d.inserted_on)),
                ]
            })
            .collect();
        return write_csv(&["dir_id", "path", "modified", "catalogued"], rows);
    }

    for d in dirs {
        println!("{}  {}", format_timestamp(d.mtime).dimmed(), d.dir_path);
    }
    eprintln!("{} directory(ies)", dirs.len().to_string().bold());
    Ok(())
}

pub fn print_schedule(entries: &[ScheduleEntry], now: i64, csv: bool) -> Result<()> {
    if csv {
        let rows = entries
            .iter()
            .map(|e| {
                vec![
                    e.dir_id.to_string(),
                    e.dir_path.clone(),
                    format_timestamp(Some(e.next_due)),
                    e.crawl_interval.to_string(),
                    format_timestamp(e.last_crawled),
                    e.file_count.to_string(),
                    e.subdir_count.to_string(),
                    optional(&e.claimed_by).to_string(),
                    e.dir_missing.to_string(),
                ]
            })
            .collect();
        return write_csv(
            &[
                "dir_id",
                "path",
                "next_due",
                "interval_secs",
                "last_crawled",
                "files",
                "subdirs",
                "claimed_by",
                "missing",
            ],
            rows,
        );
    }

    for e in entries {
        let due = if e.next_due <= now {
            "due".green().to_string()
        } else {
            format!("in {}", format_duration(e.next_due - now))
        };
        let mut flags = String::new();
        if e.dir_missing {
            flags.push_str(&" missing".red().to_string());
        }
        if let Some(claimant) = &e.claimed_by {
            flags.push_str(&format!(" claimed by {}", claimant).yellow().to_string());
        }
        println!(
            "{:>10}  every {:>6}  {:>6} files {:>5} dirs  {}{}",
            due,
            format_duration(e.crawl_interval),
            e.file_count,
            e.subdir_count,
            e.dir_path,
            flags
        );
    }
    eprintln!("{} scheduled directory(ies)", entries.len().to_string().bold());
    Ok(())
}

fn match_label(kind: MatchKind) -> String {
    match kind {
        MatchKind::Requested => "requested".to_string(),
        MatchKind::Digest(algorithm) => algorithm.to_string(),
        MatchKind::Name => "name".to_string(),
    }
}

fn print_duplicates(matches: &[DuplicateMatch], csv: bool) -> Result<()> {
    if csv {
        let rows = matches
            .iter()
            .map(|m| {
                vec![
                    m.needle.display().to_string(),
                    m.file.full_path().display().to_string(),
                    match_label(m.matched_on),
                    m.file.size.to_string(),
                ]
            })
            .collect();
        return write_csv(&["needle", "path", "matched_on", "size"], rows);
    }

    let mut current = None;
    let mut copies = 0;
    for m in matches {
        if current != Some(&m.needle) {
            println!("{}", m.needle.display().to_string().bold());
            current = Some(&m.needle);
        }
        if m.matched_on == MatchKind::Requested {
            continue;
        }
        copies += 1;
        let label = match m.matched_on {
            MatchKind::Name => match_label(m.matched_on).yellow(),
            _ => match_label(m.matched_on).green(),
        };
        println!("  {:>9}  {}", label, m.file.full_path().display());
    }
    eprintln!("{} copy(ies) found", copies.to_string().bold());
    Ok(())
}

/// Print the result of a duplicate lookup; a path outside the catalog is
/// reported rather than treated as an error.
pub fn print_duplicate_search(path: &Path, matches: Option<Vec<DuplicateMatch>>, csv: bool) -> Result<()> {
    match matches {
        Some(matches) => print_duplicates(&matches, csv),
        None => {
            let message = format!("{} not found in the catalog", path.display());
            if csv {
                eprintln!("{}", message);
            } else {
                println!("{}", message.yellow());
            }
            Ok(())
        }
    }
}

pub fn print_stats(stats: &CatalogStats) {
    let line = |label: &str, value: String| println!("  {:<22} {}", label, value);
    println!("{}", "Catalog".bold());
    line("directories", stats.directories.to_string());
    line("files", stats.files.to_string());
    line("total size", format_size(stats.total_bytes));
    line("hashed files", stats.hashed_files.to_string());
    println!("{}", "Scheduling".bold());
    line("crawls due", stats.crawls_due.to_string());
    line("crawl claims", stats.crawl_claims.to_string());
    line("missing directories", stats.missing_directories.to_string());
    line("hashes pending", stats.hashes_pending.to_string());
    line("hash claims", stats.hash_claims.to_string());
    line("staged rows", stats.staged_rows.to_string());
    println!("{}", "Deletion".bold());
    line("archived directories", stats.archived_directories.to_string());
    line("archived files", stats.archived_files.to_string());
    line("queued removals", stats.queued_removals.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(900), "15m");
        assert_eq!(format_duration(7_200), "2.0h");
        assert_eq!(format_duration(172_800), "2.0d");
    }

    #[test]
    fn test_uncatalogued_duplicate_lookup_succeeds() {
        let path = Path::new("/not/catalogued.txt");
        assert!(print_duplicate_search(path, None, false).is_ok());
        assert!(print_duplicate_search(path, None, true).is_ok());
        assert!(print_duplicate_search(path, Some(Vec::new()), false).is_ok());
    }

    #[test]
    fn test_missing_timestamp() {
        assert_eq!(format_timestamp(None), "-");
    }
}
