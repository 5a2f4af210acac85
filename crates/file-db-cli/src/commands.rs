use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "file-db")]
#[command(about = "Filesystem catalog with scheduled crawling, hashing and duplicate search", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the crawl and hash service until interrupted
    Crawl,
    /// Add directories to the crawl schedule, due immediately
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Clear staged work and release every claim left by a previous run
    Recover,
    /// Print catalog and scheduling totals
    Stats,
    /// Show the crawl schedule
    Schedule(ScheduleArgs),
    /// Change when and how often a directory is crawled
    Reschedule {
        path: PathBuf,
        /// New crawl interval in seconds
        #[arg(long)]
        interval: Option<i64>,
        /// Make the directory due this many seconds from now
        #[arg(long, conflicts_with = "now")]
        due_in: Option<i64>,
        /// Make the directory due immediately
        #[arg(long)]
        now: bool,
    },
    /// Query the catalog
    #[command(subcommand)]
    Search(SearchCommand),
    /// Remove entries from the catalog (files on disk are never touched)
    #[command(subcommand)]
    Delete(DeleteCommand),
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    /// Only this directory, or its subtree with --recursive
    #[arg(long)]
    pub path: Option<PathBuf>,
    #[arg(long, requires = "path")]
    pub recursive: bool,
    /// Wildcard over the directory path (`*` and `?`)
    #[arg(long)]
    pub like: Option<String>,
    /// e.g. "next_due desc" or "file_count desc, dir_path"
    #[arg(long)]
    pub order_by: Option<String>,
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub csv: bool,
}

#[derive(Debug, Args)]
pub struct FileFilterArgs {
    /// Only files with this extension
    #[arg(long)]
    pub ext: Option<String>,
    #[arg(long)]
    pub min_size: Option<i64>,
    #[arg(long)]
    pub max_size: Option<i64>,
    /// Only files at or below this directory
    #[arg(long)]
    pub under: Option<PathBuf>,
    #[arg(long)]
    pub order_by: Option<String>,
    #[arg(long)]
    pub limit: Option<usize>,
    /// Write CSV to stdout instead of a table
    #[arg(long)]
    pub csv: bool,
}

#[derive(Debug, Subcommand)]
pub enum SearchCommand {
    /// Files whose name matches a wildcard
    Name {
        pattern: String,
        #[command(flatten)]
        filter: FileFilterArgs,
    },
    /// Files modified within a time range (YYYY-MM-DD or RFC 3339)
    Modified {
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        before: Option<String>,
        #[command(flatten)]
        filter: FileFilterArgs,
    },
    /// Directories whose full path matches a wildcard
    Dirs {
        pattern: String,
        #[arg(long)]
        order_by: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        csv: bool,
    },
    /// Files carrying a digest value
    Hash {
        value: String,
        /// xxh64 or blake3; both columns are searched when omitted
        #[arg(long)]
        algorithm: Option<String>,
        #[arg(long)]
        csv: bool,
    },
    /// Catalogued copies of one file
    DupeFile {
        path: PathBuf,
        #[arg(long)]
        csv: bool,
    },
    /// Copies, anywhere in the catalog, of the files in one directory
    DupeDir {
        path: PathBuf,
        /// Also report files with the same name and size
        #[arg(long)]
        name_match: bool,
        #[arg(long)]
        csv: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum DeleteCommand {
    /// Archive and remove catalogued files
    File {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Hand the request to a running service instead of deleting now
        #[arg(long)]
        queue: bool,
        #[arg(long, short)]
        yes: bool,
    },
    /// Archive and remove catalogued directories and their files
    Dir {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Include every directory below
        #[arg(long, short)]
        recursive: bool,
        #[arg(long)]
        queue: bool,
        #[arg(long, short)]
        yes: bool,
    },
}
