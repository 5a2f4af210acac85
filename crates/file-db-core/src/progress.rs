use crate::error::Error;
use crate::storage::models::{
    DeletionOutcome, HashMergeStats, ReconcileStats, RecoveryStats, StageStats,
};

/// Current depth of each inter-stage queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepths {
    pub crawl: usize,
    pub snapshot: usize,
    pub hash: usize,
    pub digest: usize,
}

/// Running totals kept by the crawl service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceTotals {
    pub directories_claimed: u64,
    pub snapshots_staged: u64,
    pub snapshots_rejected: u64,
    pub directories_crawled: u64,
    pub files_claimed: u64,
    pub files_hashed: u64,
    pub hashes_merged: u64,
    pub removals: u64,
    pub failed_ticks: u64,
}

/// Trait for reporting crawl service activity.
///
/// The CLI renders it with tracing and an indicatif spinner.
/// All methods have default no-op implementations.
pub trait StatusReporter: Send + Sync {
    fn on_service_start(&self, _roots: usize) {}
    fn on_recovered(&self, _stats: &RecoveryStats) {}
    fn on_directories_claimed(&self, _count: usize) {}
    fn on_snapshots_staged(&self, _stats: &StageStats) {}
    fn on_reconciled(&self, _stats: &ReconcileStats) {}
    fn on_files_claimed(&self, _count: usize) {}
    fn on_hashes_merged(&self, _stats: &HashMergeStats) {}
    fn on_removals(&self, _outcome: &DeletionOutcome) {}
    fn on_queue_depths(&self, _depths: QueueDepths, _totals: &ServiceTotals) {}
    fn on_tick_error(&self, _stage: &str, _error: &Error) {}
    fn on_service_stop(&self, _totals: &ServiceTotals) {}
}

/// No-op reporter for silent operation.
pub struct SilentReporter;

impl StatusReporter for SilentReporter {}
