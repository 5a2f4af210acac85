pub mod config;
pub mod crawler;
pub mod error;
pub mod hasher;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod scanner;
pub mod schedule;
pub mod search;
pub mod storage;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use pipeline::CrawlService;
pub use progress::{QueueDepths, ServiceTotals, SilentReporter, StatusReporter};
pub use schedule::{CrawlFrequency, CrawlPriority};
pub use storage::Database;

/// Current wall-clock time as Unix seconds, the catalog's timestamp unit.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
