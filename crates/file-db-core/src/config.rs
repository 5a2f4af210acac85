use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::schedule::{CrawlFrequency, CrawlPriority};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite catalog file shared by every stage.
    pub database_path: String,
    /// Directories seeded into the crawl schedule at service start.
    pub root_paths: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub workers: WorkerCounts,
    pub queues: QueueLimits,
    pub timers: TimerIntervals,
    pub frequency: FrequencyConfig,
    /// Child counts are divided by this before they weigh into the claim priority.
    pub priority_size_divisor: i64,
    /// Maximum rows drained from each deletion request queue per tick.
    pub removal_batch_limit: usize,
    /// Read buffer used while streaming file content through the digests.
    pub hash_buffer_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "file_db.db".to_string(),
            root_paths: Vec::new(),
            ignore_patterns: Vec::new(),
            workers: WorkerCounts::default(),
            queues: QueueLimits::default(),
            timers: TimerIntervals::default(),
            frequency: FrequencyConfig::default(),
            priority_size_divisor: 100,
            removal_batch_limit: 10_000,
            hash_buffer_size: 128 * 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerCounts {
    pub crawl: usize,
    pub hash: usize,
}

impl Default for WorkerCounts {
    fn default() -> Self {
        Self { crawl: 4, hash: 2 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueLimits {
    /// Claimed directories waiting for a crawl worker.
    pub crawl: usize,
    /// Snapshots waiting to be staged.
    pub snapshot: usize,
    /// Claimed files waiting for a hash worker.
    pub hash: usize,
    /// Digests waiting to be staged and merged.
    pub digest: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            crawl: 1_000,
            snapshot: 1_000,
            hash: 500,
            digest: 5_000,
        }
    }
}

/// Per-stage timer intervals, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimerIntervals {
    pub crawl_poll_ms: u64,
    pub stage_flush_ms: u64,
    pub reconcile_ms: u64,
    pub hash_poll_ms: u64,
    pub hash_flush_ms: u64,
    pub removal_ms: u64,
    pub idle_sleep_ms: u64,
}

impl Default for TimerIntervals {
    fn default() -> Self {
        Self {
            crawl_poll_ms: 5_000,
            stage_flush_ms: 5_000,
            reconcile_ms: 5_000,
            hash_poll_ms: 5_000,
            hash_flush_ms: 5_000,
            removal_ms: 1_000,
            idle_sleep_ms: 200,
        }
    }
}

impl TimerIntervals {
    pub fn crawl_poll(&self) -> Duration {
        Duration::from_millis(self.crawl_poll_ms)
    }

    pub fn stage_flush(&self) -> Duration {
        Duration::from_millis(self.stage_flush_ms)
    }

    pub fn reconcile(&self) -> Duration {
        Duration::from_millis(self.reconcile_ms)
    }

    pub fn hash_poll(&self) -> Duration {
        Duration::from_millis(self.hash_poll_ms)
    }

    pub fn hash_flush(&self) -> Duration {
        Duration::from_millis(self.hash_flush_ms)
    }

    pub fn removal(&self) -> Duration {
        Duration::from_millis(self.removal_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

/// Crawl-frequency tuning, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrequencyConfig {
    pub divisor: f64,
    pub min_interval_secs: i64,
    pub max_interval_secs: i64,
    pub missing_interval_secs: i64,
    pub default_interval_secs: i64,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        let frequency = CrawlFrequency::default();
        Self {
            divisor: frequency.divisor,
            min_interval_secs: frequency.min_interval,
            max_interval_secs: frequency.max_interval,
            missing_interval_secs: frequency.missing_interval,
            default_interval_secs: frequency.default_interval,
        }
    }
}

impl AppConfig {
    pub fn crawl_frequency(&self) -> CrawlFrequency {
        CrawlFrequency {
            divisor: self.frequency.divisor,
            min_interval: self.frequency.min_interval_secs,
            max_interval: self.frequency.max_interval_secs,
            missing_interval: self.frequency.missing_interval_secs,
            default_interval: self.frequency.default_interval_secs,
        }
    }

    pub fn crawl_priority(&self) -> CrawlPriority {
        CrawlPriority {
            size_divisor: self.priority_size_divisor.max(1),
        }
    }
}

/// Reads `Config.toml` (optional) and `FILE_DB__*` environment overrides.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("FILE_DB")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("root_paths")
                .with_list_parse_key("ignore_patterns")
                .try_parsing(true),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Drop roots nested under another root; the outer crawl reaches them anyway.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        if result.iter().any(|kept| dir_path.starts_with(Path::new(kept))) {
            continue;
        }
        result.retain(|kept| !Path::new(kept).starts_with(dir_path));
        result.push(dir);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_overlapping_no_overlap() {
        let dirs = vec![
            "/home/user/photos".to_string(),
            "/home/user/docs".to_string(),
            "/var/data".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_non_overlapping_parent_after_child() {
        let dirs = vec![
            "/home/user/docs".to_string(),
            "/home/user/photos".to_string(),
            "/home/user".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result, vec!["/home/user".to_string()]);
    }

    #[test]
    fn test_non_overlapping_sibling_prefix_is_not_nested() {
        let dirs = vec!["/data".to_string(), "/data2".to_string()];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_defaults_are_usable() {
        let config = AppConfig::default();
        assert!(config.workers.crawl > 0);
        assert!(config.workers.hash > 0);
        let frequency = config.crawl_frequency();
        assert!(frequency.min_interval <= frequency.max_interval);
        assert_eq!(config.crawl_priority().size_divisor, 100);
    }
}
