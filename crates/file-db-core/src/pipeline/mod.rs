mod workers;

use crate::config::{self, AppConfig};
use crate::error::{Error, Result};
use crate::paths;
use crate::progress::{QueueDepths, ServiceTotals, StatusReporter};
use crate::scanner::probe::unix_seconds;
use crate::scanner::{FilesystemProbe, LocalProbe};
use crate::storage::Database;
use crate::unix_now;
use crossbeam_channel::bounded;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use workers::{PipelineCounters, StageContext};

const DEPTH_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// The long-running crawl and hash service.
///
/// Runs the stage loops on named threads connected by bounded queues:
///
/// ```text
/// crawl-scheduler -> crawl-worker-N -> snapshot-stager      reconciler
/// hash-scheduler  -> hash-worker-N  -> digest-loader        removal-drainer
/// ```
///
/// Every loop opens its own catalog connection. Work survives only once it is
/// committed; anything in flight at a crash is handed back by recovery at the
/// next start.
pub struct CrawlService {
    config: Arc<AppConfig>,
    probe: Arc<dyn FilesystemProbe>,
    crawl_claimant: String,
    hash_claimant: String,
}

impl CrawlService {
    pub fn new(config: AppConfig) -> Result<Self> {
        let probe = LocalProbe::new(&config.ignore_patterns)?;
        Ok(Self::with_probe(config, Arc::new(probe)))
    }

    pub fn with_probe(config: AppConfig, probe: Arc<dyn FilesystemProbe>) -> Self {
        let pid = std::process::id();
        Self {
            config: Arc::new(config),
            probe,
            crawl_claimant: format!("pid{}-crawl", pid),
            hash_claimant: format!("pid{}-hash", pid),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Recover interrupted work and seed the configured roots. Returns the
    /// number of roots scheduled.
    pub fn prepare(&self, reporter: &dyn StatusReporter) -> Result<usize> {
        let db = Database::open(&self.config.database_path)?;
        let recovered = db.recover()?;
        reporter.on_recovered(&recovered);

        let mut resolved = Vec::with_capacity(self.config.root_paths.len());
        for root in &self.config.root_paths {
            let absolute = match paths::resolve_path(Path::new(root)) {
                Ok(absolute) => absolute,
                Err(err) => {
                    warn!("Skipping root {}: {}", root, err);
                    continue;
                }
            };
            match paths::path_to_string(&absolute) {
                Some(dir_path) => resolved.push(dir_path),
                None => warn!("Skipping root with a non UTF-8 path: {}", absolute.display()),
            }
        }
        let roots = config::non_overlapping_directories(resolved);
        let default_interval = self.config.frequency.default_interval_secs;
        let now = unix_now();
        let mut seeded = 0;
        for dir_path in roots {
            let (ctime, mtime) = match fs::metadata(&dir_path) {
                Ok(metadata) => (
                    metadata.created().ok().and_then(unix_seconds),
                    metadata.modified().ok().and_then(unix_seconds),
                ),
                Err(err) => {
                    warn!("Root {} is not accessible yet: {}", dir_path, err);
                    (None, None)
                }
            };
            db.add_root_directory(&dir_path, ctime, mtime, default_interval, now)?;
            seeded += 1;
        }
        Ok(seeded)
    }

    /// Run until `shutdown` is set, then drain in-flight work and stop.
    pub fn run(&self, shutdown: Arc<AtomicBool>, reporter: Arc<dyn StatusReporter>) -> Result<ServiceTotals> {
        let roots = self.prepare(reporter.as_ref())?;
        info!(roots, "Crawl service starting");
        reporter.on_service_start(roots);

        let counters = Arc::new(PipelineCounters::default());
        let ctx = StageContext {
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&shutdown),
            reporter: Arc::clone(&reporter),
            counters: Arc::clone(&counters),
        };

        let queues = &self.config.queues;
        let (crawl_tx, crawl_rx) = bounded(queues.crawl.max(1));
        let (snapshot_tx, snapshot_rx) = bounded(queues.snapshot.max(1));
        let (hash_tx, hash_rx) = bounded(queues.hash.max(1));
        let (digest_tx, digest_rx) = bounded(queues.digest.max(1));

        let mut handles: Vec<(String, JoinHandle<Result<()>>)> = Vec::new();

        {
            let ctx = ctx.clone();
            let claimant = self.crawl_claimant.clone();
            let tx = crawl_tx.clone();
            handles.push(spawn_stage("crawl-scheduler", move || workers::crawl_scheduler(ctx, claimant, tx))?);
        }
        for id in 0..self.config.workers.crawl.max(1) {
            let ctx = ctx.clone();
            let probe = Arc::clone(&self.probe);
            let rx = crawl_rx.clone();
            let tx = snapshot_tx.clone();
            handles.push(spawn_stage(&format!("crawl-worker-{}", id), move || {
                workers::crawl_worker(ctx, probe, rx, tx)
            })?);
        }
        {
            let ctx = ctx.clone();
            let rx = snapshot_rx.clone();
            handles.push(spawn_stage("snapshot-stager", move || workers::snapshot_stager(ctx, rx))?);
        }
        {
            let ctx = ctx.clone();
            handles.push(spawn_stage("reconciler", move || workers::reconciler(ctx))?);
        }
        {
            let ctx = ctx.clone();
            handles.push(spawn_stage("removal-drainer", move || workers::removal_drainer(ctx))?);
        }
        {
            let ctx = ctx.clone();
            let claimant = self.hash_claimant.clone();
            let tx = hash_tx.clone();
            handles.push(spawn_stage("hash-scheduler", move || workers::hash_scheduler(ctx, claimant, tx))?);
        }
        for id in 0..self.config.workers.hash.max(1) {
            let ctx = ctx.clone();
            let rx = hash_rx.clone();
            let tx = digest_tx.clone();
            handles.push(spawn_stage(&format!("hash-worker-{}", id), move || {
                workers::hash_worker(ctx, rx, tx)
            })?);
        }
        {
            let ctx = ctx.clone();
            let rx = digest_rx.clone();
            handles.push(spawn_stage("digest-loader", move || workers::digest_loader(ctx, rx))?);
        }

        // Stagers exit once every producer has dropped its sender.
        drop(crawl_tx);
        drop(snapshot_tx);
        drop(hash_tx);
        drop(digest_tx);

        let mut last_report = Instant::now();
        while ctx.pause(self.config.timers.idle_sleep()) {
            if last_report.elapsed() >= DEPTH_REPORT_INTERVAL {
                let depths = QueueDepths {
                    crawl: crawl_rx.len(),
                    snapshot: snapshot_rx.len(),
                    hash: hash_rx.len(),
                    digest: digest_rx.len(),
                };
                reporter.on_queue_depths(depths, &counters.totals());
                last_report = Instant::now();
            }
        }

        info!("Shutdown requested, waiting for stages to finish");
        drop((crawl_rx, snapshot_rx, hash_rx, digest_rx));

        let mut first_failure: Option<Error> = None;
        for (name, handle) in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(stage = %name, "Stage exited with error: {}", err);
                    first_failure.get_or_insert(err);
                }
                Err(_) => {
                    error!(stage = %name, "Stage panicked");
                    first_failure.get_or_insert(Error::Other(format!("stage {} panicked", name)));
                }
            }
        }

        // Fold whatever the stagers committed on their way out.
        let db = Database::open(&self.config.database_path)?;
        let reconciled = db.reconcile(unix_now(), &self.config.crawl_frequency())?;
        counters.record_crawled(reconciled.crawled);
        let merged = db.merge_hash_batch()?;
        counters.record_hashes_merged(merged.merged);

        let totals = counters.totals();
        info!(
            crawled = totals.directories_crawled,
            hashed = totals.hashes_merged,
            failed_ticks = totals.failed_ticks,
            "Crawl service stopped"
        );
        reporter.on_service_stop(&totals);

        match first_failure {
            Some(err) => Err(err),
            None => Ok(totals),
        }
    }
}

fn spawn_stage<F>(name: &str, body: F) -> Result<(String, JoinHandle<Result<()>>)>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let handle = thread::Builder::new().name(name.to_string()).spawn(body)?;
    Ok((name.to_string(), handle))
}
