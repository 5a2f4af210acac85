mod commands;
mod logging;
mod output;
mod progress;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, DeleteCommand, FileFilterArgs, ScheduleArgs, SearchCommand};
use dotenv::dotenv;
use file_db_core::hasher::HashAlgorithm;
use file_db_core::paths;
use file_db_core::search::{self, FileSearch};
use file_db_core::storage::{Database, ScheduleFilter};
use file_db_core::{unix_now, AppConfig, CrawlService};
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match file_db_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Crawl) => run_crawl(config),
        Some(Commands::Add { paths }) => run_add(&config, &paths),
        Some(Commands::Recover) => run_recover(&config),
        Some(Commands::Stats) => run_stats(&config),
        Some(Commands::Schedule(args)) => run_schedule(&config, args),
        Some(Commands::Reschedule {
            path,
            interval,
            due_in,
            now,
        }) => run_reschedule(&config, &path, interval, due_in, now),
        Some(Commands::Search(command)) => run_search(&config, command),
        Some(Commands::Delete(command)) => run_delete(&config, command),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn open_catalog(config: &AppConfig) -> Result<Database> {
    Database::open(&config.database_path)
        .with_context(|| format!("Failed to open catalog {}", config.database_path))
}

/// Absolute, symlink-free form of a path given on the command line.
fn resolve(path: &Path) -> Result<PathBuf> {
    paths::resolve_path(path).with_context(|| format!("Cannot resolve {}", path.display()))
}

fn catalog_path(path: &Path) -> Result<String> {
    let resolved = resolve(path)?;
    paths::path_to_string(&resolved).ok_or_else(|| anyhow!("{} is not valid UTF-8", resolved.display()))
}

fn run_crawl(config: AppConfig) -> Result<()> {
    if config.root_paths.is_empty() {
        warn!("No root_paths configured; only directories already in the catalog will be crawled");
    }
    let service = CrawlService::new(config).context("Failed to initialize crawl service")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing in-flight work...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let totals = service.run(shutdown, Arc::new(CliReporter::new()))?;
    info!(
        "{} directories crawled, {} files hashed",
        totals.directories_crawled.to_string().green(),
        totals.hashes_merged.to_string().green()
    );
    Ok(())
}

fn run_add(config: &AppConfig, dirs: &[PathBuf]) -> Result<()> {
    let db = open_catalog(config)?;
    let now = unix_now();
    for dir in dirs {
        let absolute = fs::canonicalize(dir).with_context(|| format!("Cannot resolve {}", dir.display()))?;
        let metadata = fs::metadata(&absolute)?;
        if !metadata.is_dir() {
            bail!("{} is not a directory", absolute.display());
        }
        let dir_path = catalog_path(&absolute)?;
        let to_secs = |time: io::Result<std::time::SystemTime>| {
            time.ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
        };
        db.add_root_directory(
            &dir_path,
            to_secs(metadata.created()),
            to_secs(metadata.modified()),
            config.frequency.default_interval_secs,
            now,
        )?;
        println!("{} {}", "scheduled".green(), dir_path);
    }
    Ok(())
}

fn run_recover(config: &AppConfig) -> Result<()> {
    let stats = open_catalog(config)?.recover()?;
    println!(
        "Cleared {} staged rows, released {} crawl claims and {} hash claims",
        stats.staged_rows_cleared, stats.crawl_claims_released, stats.hash_claims_released
    );
    Ok(())
}

fn run_stats(config: &AppConfig) -> Result<()> {
    let stats = open_catalog(config)?.catalog_stats(unix_now())?;
    output::print_stats(&stats);
    Ok(())
}

fn run_schedule(config: &AppConfig, args: ScheduleArgs) -> Result<()> {
    let db = open_catalog(config)?;
    let filter = ScheduleFilter {
        path: args.path.as_deref().map(catalog_path).transpose()?,
        recursive: args.recursive,
        path_like: args.like.as_deref().map(search::wildcard_to_like),
        order_by: args.order_by,
        limit: args.limit,
    };
    let entries = db.view_schedule(&filter)?;
    output::print_schedule(&entries, unix_now(), args.csv)
}

fn run_reschedule(
    config: &AppConfig,
    path: &Path,
    interval: Option<i64>,
    due_in: Option<i64>,
    now: bool,
) -> Result<()> {
    if interval.is_none() && due_in.is_none() && !now {
        bail!("Nothing to change: pass --interval, --due-in or --now");
    }
    if matches!(interval, Some(secs) if secs <= 0) {
        bail!("--interval must be positive");
    }
    let db = open_catalog(config)?;
    let dir_path = catalog_path(path)?;
    let current = unix_now();
    let next_due = if now { Some(current) } else { due_in.map(|secs| current + secs) };
    if !db.reschedule_directory(&dir_path, interval, next_due)? {
        bail!("{} is not in the crawl schedule", dir_path);
    }
    println!("{} {}", "rescheduled".green(), dir_path);
    Ok(())
}

/// Accepts `YYYY-MM-DD` (local midnight) or RFC 3339.
fn parse_time(text: &str) -> Result<i64> {
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Ok(time.timestamp());
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .with_context(|| format!("Unrecognized date '{}'", text))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| naive.and_local_timezone(chrono::Local).earliest())
        .ok_or_else(|| anyhow!("'{}' does not exist in the local timezone", text))?;
    Ok(midnight.timestamp())
}

fn file_search(filter: FileFilterArgs) -> Result<(FileSearch, bool)> {
    let search = FileSearch {
        extension: filter.ext,
        min_size: filter.min_size,
        max_size: filter.max_size,
        under: filter.under.as_deref().map(catalog_path).transpose()?,
        order_by: filter.order_by,
        limit: filter.limit,
        ..FileSearch::default()
    };
    Ok((search, filter.csv))
}

fn run_search(config: &AppConfig, command: SearchCommand) -> Result<()> {
    let db = open_catalog(config)?;
    match command {
        SearchCommand::Name { pattern, filter } => {
            let (mut query, csv) = file_search(filter)?;
            query.name = Some(pattern);
            output::print_files(&search::search_files(&db, &query)?, csv)
        }
        SearchCommand::Modified { after, before, filter } => {
            if after.is_none() && before.is_none() {
                bail!("Pass --after and/or --before");
            }
            let (mut query, csv) = file_search(filter)?;
            query.modified_after = after.as_deref().map(parse_time).transpose()?;
            query.modified_before = before.as_deref().map(parse_time).transpose()?;
            output::print_files(&search::search_files(&db, &query)?, csv)
        }
        SearchCommand::Dirs {
            pattern,
            order_by,
            limit,
            csv,
        } => {
            let dirs = search::search_directories(&db, &pattern, order_by.as_deref(), limit)?;
            output::print_directories(&dirs, csv)
        }
        SearchCommand::Hash { value, algorithm, csv } => {
            let algorithm = algorithm
                .as_deref()
                .map(str::parse::<HashAlgorithm>)
                .transpose()
                .map_err(|e| anyhow!(e))?;
            output::print_files(&search::search_hash(&db, &value, algorithm)?, csv)
        }
        SearchCommand::DupeFile { path, csv } => {
            let path = resolve(&path)?;
            output::print_duplicate_search(&path, search::find_duplicate_files(&db, &path)?, csv)
        }
        SearchCommand::DupeDir {
            path,
            name_match,
            csv,
        } => {
            let path = resolve(&path)?;
            let matches = search::find_duplicate_directory(&db, &path, name_match)?;
            output::print_duplicate_search(&path, matches, csv)
        }
    }
}

fn run_delete(config: &AppConfig, command: DeleteCommand) -> Result<()> {
    let db = open_catalog(config)?;
    let now = unix_now();
    match command {
        DeleteCommand::File { paths, queue, yes } => {
            let mut ids = Vec::with_capacity(paths.len());
            for path in &paths {
                let path = resolve(path)?;
                match db.get_file_by_path(&path)? {
                    Some(file) => ids.push(file.file_id),
                    None => bail!("{} is not in the catalog", path.display()),
                }
            }
            if !yes && !prompt_confirm(&format!("Remove {} file(s) from the catalog?", ids.len()), Some(false))? {
                return Ok(());
            }
            if queue {
                let queued = db.request_file_removal(&ids, now)?;
                println!("{} file removal(s) queued", queued);
            } else {
                let removed = db.delete_files(&ids, now)?;
                println!("{} file(s) archived and removed", removed.len());
            }
        }
        DeleteCommand::Dir {
            paths,
            recursive,
            queue,
            yes,
        } => {
            let mut ids = Vec::with_capacity(paths.len());
            for path in &paths {
                let dir_path = catalog_path(path)?;
                match db.get_directory_by_path(&dir_path)? {
                    Some(dir) => ids.push(dir.id),
                    None => bail!("{} is not in the catalog", dir_path),
                }
            }
            let prompt = if recursive {
                format!("Remove {} directory tree(s) from the catalog?", ids.len())
            } else {
                format!("Remove {} directory(ies) and their files from the catalog?", ids.len())
            };
            if !yes && !prompt_confirm(&prompt, Some(false))? {
                return Ok(());
            }
            if queue {
                db.request_directory_removal(&ids, recursive, now)?;
                println!("{} directory removal(s) queued", ids.len());
            } else {
                let outcome = db.delete_directories(&ids, recursive, true, now)?;
                println!(
                    "{} directory(ies) and {} file(s) archived and removed",
                    outcome.directories.len(),
                    outcome.files.len()
                );
            }
        }
    }
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(default.unwrap_or(false));
        }

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
