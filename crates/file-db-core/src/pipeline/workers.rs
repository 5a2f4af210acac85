//! Stage loops of the crawl service. Each loop owns its own catalog
//! connection, ticks on its own timer, and returns once shutdown is
//! signalled (producers) or once every upstream sender is gone (stagers).

use crate::config::AppConfig;
use crate::crawler;
use crate::error::{Error, Result};
use crate::hasher;
use crate::progress::{ServiceTotals, StatusReporter};
use crate::scanner::FilesystemProbe;
use crate::storage::models::{CrawlTask, DigestResult, HashOutcome, HashTask, Snapshot};
use crate::storage::Database;
use crate::unix_now;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    directories_claimed: AtomicU64,
    snapshots_staged: AtomicU64,
    snapshots_rejected: AtomicU64,
    directories_crawled: AtomicU64,
    files_claimed: AtomicU64,
    files_hashed: AtomicU64,
    hashes_merged: AtomicU64,
    removals: AtomicU64,
    failed_ticks: AtomicU64,
}

impl PipelineCounters {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn totals(&self) -> ServiceTotals {
        ServiceTotals {
            directories_claimed: self.directories_claimed.load(Ordering::Relaxed),
            snapshots_staged: self.snapshots_staged.load(Ordering::Relaxed),
            snapshots_rejected: self.snapshots_rejected.load(Ordering::Relaxed),
            directories_crawled: self.directories_crawled.load(Ordering::Relaxed),
            files_claimed: self.files_claimed.load(Ordering::Relaxed),
            files_hashed: self.files_hashed.load(Ordering::Relaxed),
            hashes_merged: self.hashes_merged.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_crawled(&self, n: usize) {
        Self::add(&self.directories_crawled, n);
    }

    pub(crate) fn record_hashes_merged(&self, n: usize) {
        Self::add(&self.hashes_merged, n);
    }

    pub(crate) fn record_staged(&self, staged: usize, rejected: usize) {
        Self::add(&self.snapshots_staged, staged);
        Self::add(&self.snapshots_rejected, rejected);
    }
}

/// Everything a stage loop shares with the rest of the service.
#[derive(Clone)]
pub(crate) struct StageContext {
    pub config: Arc<AppConfig>,
    pub shutdown: Arc<AtomicBool>,
    pub reporter: Arc<dyn StatusReporter>,
    pub counters: Arc<PipelineCounters>,
}

impl StageContext {
    pub fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn open_db(&self) -> Result<Database> {
        Ok(Database::open(&self.config.database_path)?)
    }

    /// Sleep for `duration` in short slices. Returns false once shutdown is signalled.
    pub fn pause(&self, duration: Duration) -> bool {
        let slice = self.config.timers.idle_sleep().max(Duration::from_millis(1));
        let deadline = Instant::now() + duration;
        loop {
            if self.stopping() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(slice.min(deadline - now));
        }
    }

    pub fn tick_failed(&self, stage: &str, err: Error) {
        error!(stage, "Tick failed, retrying next interval: {}", err);
        self.counters.failed_ticks.fetch_add(1, Ordering::Relaxed);
        self.reporter.on_tick_error(stage, &err);
    }
}

/// Send `item`, blocking while the queue is full, until shutdown.
/// Returns false if the item could not be delivered.
fn send_until_shutdown<T>(ctx: &StageContext, tx: &Sender<T>, mut item: T) -> bool {
    let wait = ctx.config.timers.idle_sleep().max(Duration::from_millis(1));
    loop {
        match tx.send_timeout(item, wait) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if ctx.stopping() {
                    return false;
                }
                item = returned;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// How many new claims fit downstream: none while the queue is at least half
/// full, otherwise the free capacity.
pub(crate) fn claim_budget(queued: usize, capacity: usize) -> usize {
    if queued * 2 >= capacity {
        0
    } else {
        capacity - queued
    }
}

// ── Crawl side ───────────────────────────────────────────────────

pub(crate) fn crawl_scheduler(ctx: StageContext, claimant: String, tx: Sender<CrawlTask>) -> Result<()> {
    let db = ctx.open_db()?;
    let priority = ctx.config.crawl_priority();
    let capacity = ctx.config.queues.crawl.max(1);

    while !ctx.stopping() {
        let budget = claim_budget(tx.len(), capacity);
        let mut claimed = 0;
        if budget > 0 {
            match db.claim_due_directories(&claimant, budget, unix_now(), &priority) {
                Ok(tasks) => {
                    claimed = tasks.len();
                    if claimed > 0 {
                        PipelineCounters::add(&ctx.counters.directories_claimed, claimed);
                        ctx.reporter.on_directories_claimed(claimed);
                    }
                    for task in tasks {
                        if !send_until_shutdown(&ctx, &tx, task) {
                            return Ok(());
                        }
                    }
                }
                Err(err) => ctx.tick_failed("crawl-scheduler", err.into()),
            }
        }

        let wait = if claimed > 0 {
            ctx.config.timers.idle_sleep()
        } else {
            ctx.config.timers.crawl_poll()
        };
        if !ctx.pause(wait) {
            break;
        }
    }
    debug!("Crawl scheduler stopped");
    Ok(())
}

pub(crate) fn crawl_worker(
    ctx: StageContext,
    probe: Arc<dyn FilesystemProbe>,
    rx: Receiver<CrawlTask>,
    tx: Sender<Snapshot>,
) -> Result<()> {
    let wait = ctx.config.timers.idle_sleep().max(Duration::from_millis(1));
    while !ctx.stopping() {
        let task = match rx.recv_timeout(wait) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let snapshot = crawler::scrape(probe.as_ref(), &task, unix_now());
        if !send_until_shutdown(&ctx, &tx, snapshot) {
            break;
        }
    }
    Ok(())
}

/// Batches snapshots and stages them on the flush timer or when the batch is full.
pub(crate) fn snapshot_stager(ctx: StageContext, rx: Receiver<Snapshot>) -> Result<()> {
    let db = ctx.open_db()?;
    let flush_every = ctx.config.timers.stage_flush();
    let batch_limit = ctx.config.queues.snapshot.max(1);
    let wait = ctx.config.timers.idle_sleep().max(Duration::from_millis(1));

    let mut pending: Vec<Snapshot> = Vec::new();
    let mut last_flush = Instant::now();

    loop {
        if pending.len() >= batch_limit {
            flush_snapshots(&ctx, &db, &mut pending);
            last_flush = Instant::now();
            if pending.len() >= batch_limit {
                // Catalog unavailable; stop taking input so upstream blocks.
                if ctx.stopping() {
                    break;
                }
                std::thread::sleep(flush_every);
                continue;
            }
        }

        match rx.recv_timeout(wait) {
            Ok(snapshot) => pending.push(snapshot),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if !pending.is_empty() && last_flush.elapsed() >= flush_every {
            flush_snapshots(&ctx, &db, &mut pending);
            last_flush = Instant::now();
        }
    }

    flush_snapshots(&ctx, &db, &mut pending);
    debug!("Snapshot stager stopped");
    Ok(())
}

fn flush_snapshots(ctx: &StageContext, db: &Database, pending: &mut Vec<Snapshot>) {
    if pending.is_empty() {
        return;
    }
    match db.stage_snapshots(pending) {
        Ok(stats) => {
            ctx.counters.record_staged(stats.staged, stats.rejected);
            ctx.reporter.on_snapshots_staged(&stats);
            pending.clear();
        }
        Err(err) => ctx.tick_failed("snapshot-stager", err.into()),
    }
}

pub(crate) fn reconciler(ctx: StageContext) -> Result<()> {
    let db = ctx.open_db()?;
    let frequency = ctx.config.crawl_frequency();

    while ctx.pause(ctx.config.timers.reconcile()) {
        match db.reconcile(unix_now(), &frequency) {
            Ok(stats) => {
                ctx.counters.record_crawled(stats.crawled);
                if stats.crawled > 0 || stats.directories.writes() + stats.files.writes() > 0 {
                    info!(
                        crawled = stats.crawled,
                        dirs_inserted = stats.directories.inserted,
                        dirs_deleted = stats.directories.deleted,
                        files_inserted = stats.files.inserted,
                        files_updated = stats.files.updated,
                        files_deleted = stats.files.deleted,
                        "Reconciled staged crawl data"
                    );
                }
                ctx.reporter.on_reconciled(&stats);
            }
            Err(err) => ctx.tick_failed("reconciler", err.into()),
        }
    }
    debug!("Reconciler stopped");
    Ok(())
}

pub(crate) fn removal_drainer(ctx: StageContext) -> Result<()> {
    let db = ctx.open_db()?;
    let limit = ctx.config.removal_batch_limit.max(1);

    while ctx.pause(ctx.config.timers.removal()) {
        match db.process_removal_queue(limit, unix_now()) {
            Ok(outcome) => {
                if !outcome.is_empty() {
                    let removed = outcome.directories.len() + outcome.files.len();
                    PipelineCounters::add(&ctx.counters.removals, removed);
                    ctx.reporter.on_removals(&outcome);
                }
            }
            Err(err) => ctx.tick_failed("removal-drainer", err.into()),
        }
    }
    Ok(())
}

// ── Hash side ────────────────────────────────────────────────────

pub(crate) fn hash_scheduler(ctx: StageContext, claimant: String, tx: Sender<HashTask>) -> Result<()> {
    let db = ctx.open_db()?;
    let capacity = ctx.config.queues.hash.max(1);

    while !ctx.stopping() {
        let budget = claim_budget(tx.len(), capacity);
        let mut claimed = 0;
        if budget > 0 {
            match db.claim_files_to_hash(&claimant, budget, unix_now()) {
                Ok(tasks) => {
                    claimed = tasks.len();
                    if claimed > 0 {
                        PipelineCounters::add(&ctx.counters.files_claimed, claimed);
                        ctx.reporter.on_files_claimed(claimed);
                    }
                    for task in tasks {
                        if !send_until_shutdown(&ctx, &tx, task) {
                            return Ok(());
                        }
                    }
                }
                Err(err) => ctx.tick_failed("hash-scheduler", err.into()),
            }
        }

        let wait = if claimed > 0 {
            ctx.config.timers.idle_sleep()
        } else {
            ctx.config.timers.hash_poll()
        };
        if !ctx.pause(wait) {
            break;
        }
    }
    debug!("Hash scheduler stopped");
    Ok(())
}

pub(crate) fn hash_worker(ctx: StageContext, rx: Receiver<HashTask>, tx: Sender<HashOutcome>) -> Result<()> {
    let wait = ctx.config.timers.idle_sleep().max(Duration::from_millis(1));
    let buffer_size = ctx.config.hash_buffer_size;
    while !ctx.stopping() {
        let task = match rx.recv_timeout(wait) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let outcome = match hasher::hash_task(&task, buffer_size, unix_now()) {
            Some(digest) => {
                PipelineCounters::add(&ctx.counters.files_hashed, 1);
                HashOutcome::Hashed(digest)
            }
            None => HashOutcome::Failed {
                file_id: task.file_id,
                claimed_by: task.claimed_by,
            },
        };
        if !send_until_shutdown(&ctx, &tx, outcome) {
            break;
        }
    }
    Ok(())
}

#[derive(Default)]
struct DigestBatch {
    digests: Vec<DigestResult>,
    failed: Vec<(i64, String)>,
}

impl DigestBatch {
    fn len(&self) -> usize {
        self.digests.len() + self.failed.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, outcome: HashOutcome) {
        match outcome {
            HashOutcome::Hashed(digest) => self.digests.push(digest),
            HashOutcome::Failed { file_id, claimed_by } => self.failed.push((file_id, claimed_by)),
        }
    }
}

/// Batches hash outcomes. Digests are staged and merged, failures have their
/// claims released, on the flush timer or when the batch is full.
pub(crate) fn digest_loader(ctx: StageContext, rx: Receiver<HashOutcome>) -> Result<()> {
    let db = ctx.open_db()?;
    let flush_every = ctx.config.timers.hash_flush();
    let batch_limit = ctx.config.queues.digest.max(1);
    let wait = ctx.config.timers.idle_sleep().max(Duration::from_millis(1));

    let mut pending = DigestBatch::default();
    let mut last_flush = Instant::now();

    loop {
        if pending.len() >= batch_limit {
            flush_digests(&ctx, &db, &mut pending);
            last_flush = Instant::now();
            if pending.len() >= batch_limit {
                if ctx.stopping() {
                    break;
                }
                std::thread::sleep(flush_every);
                continue;
            }
        }

        match rx.recv_timeout(wait) {
            Ok(outcome) => pending.push(outcome),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if !pending.is_empty() && last_flush.elapsed() >= flush_every {
            flush_digests(&ctx, &db, &mut pending);
            last_flush = Instant::now();
        }
    }

    flush_digests(&ctx, &db, &mut pending);
    debug!("Digest loader stopped");
    Ok(())
}

fn flush_digests(ctx: &StageContext, db: &Database, pending: &mut DigestBatch) {
    if !pending.failed.is_empty() {
        match db.release_hash_claims(&pending.failed) {
            Ok(released) => {
                debug!(released, "Released claims of unhashable files");
                pending.failed.clear();
            }
            Err(err) => ctx.tick_failed("digest-loader", err.into()),
        }
    }

    if pending.digests.is_empty() {
        return;
    }
    let merged = db
        .stage_digests(&pending.digests)
        .and_then(|_| db.merge_hash_batch());
    match merged {
        Ok(stats) => {
            ctx.counters.record_hashes_merged(stats.merged);
            ctx.reporter.on_hashes_merged(&stats);
            pending.digests.clear();
        }
        Err(err) => ctx.tick_failed("digest-loader", err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_budget_backpressure() {
        assert_eq!(claim_budget(0, 100), 100);
        assert_eq!(claim_budget(49, 100), 51);
        assert_eq!(claim_budget(50, 100), 0);
        assert_eq!(claim_budget(100, 100), 0);
        assert_eq!(claim_budget(0, 1), 1);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = PipelineCounters::default();
        counters.record_staged(3, 1);
        counters.record_crawled(2);
        let totals = counters.totals();
        assert_eq!(totals.snapshots_staged, 3);
        assert_eq!(totals.snapshots_rejected, 1);
        assert_eq!(totals.directories_crawled, 2);
    }
}
