use colored::*;
use file_db_core::progress::{QueueDepths, ServiceTotals, StatusReporter};
use file_db_core::storage::models::RecoveryStats;
use file_db_core::Error;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner that tracks the running service: queue depths and running totals.
pub struct CliReporter {
    bar: ProgressBar,
}

impl CliReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(style);
        bar.set_message("Starting...");
        Self { bar }
    }
}

impl StatusReporter for CliReporter {
    fn on_recovered(&self, stats: &RecoveryStats) {
        if stats.staged_rows_cleared + stats.crawl_claims_released + stats.hash_claims_released > 0 {
            self.bar.println(format!(
                "  {} Recovered: {} staged rows, {} crawl claims, {} hash claims",
                "↺".yellow(),
                stats.staged_rows_cleared,
                stats.crawl_claims_released,
                stats.hash_claims_released
            ));
        }
    }

    fn on_service_start(&self, roots: usize) {
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.bar
            .set_message(format!("Crawling {} root(s), Ctrl-C to stop", roots));
    }

    fn on_queue_depths(&self, depths: QueueDepths, totals: &ServiceTotals) {
        self.bar.set_message(format!(
            "dirs crawled {} | files hashed {} | removed {} | queues crawl {} snap {} hash {} digest {}",
            totals.directories_crawled,
            totals.hashes_merged,
            totals.removals,
            depths.crawl,
            depths.snapshot,
            depths.hash,
            depths.digest
        ));
    }

    fn on_tick_error(&self, stage: &str, error: &Error) {
        self.bar
            .println(format!("  {} {}: {}", "✗".red(), stage, error));
    }

    fn on_service_stop(&self, totals: &ServiceTotals) {
        self.bar.finish_and_clear();
        eprintln!(
            "  {} Stopped: {} directories crawled, {} files hashed, {} removals, {} failed ticks",
            "✓".green(),
            totals.directories_crawled,
            totals.hashes_merged,
            totals.removals,
            totals.failed_ticks
        );
    }
}
