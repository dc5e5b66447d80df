use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use chrono::Utc;

use crate::classify::{Selector, select};
use crate::coordinator::ParallelCoordinator;
use crate::domain::{BucketName, Direction, EntryStatus, ManifestEntry, RemoteLocator, human_size};
use crate::error::SyncError;
use crate::executor::{DownloadExecutor, TimeoutExecutor, TransferExecutor, UploadExecutor};
use crate::manifest::Manifest;
use crate::planner::{
    DestinationListing, Plan, TransferPlanner, ensure_buckets, ensure_download_root,
    probe_buckets, upload_buckets,
};
use crate::report::{AccessDescriptor, DEFAULT_ACCESS_VALIDITY, ResultAggregator, SyncReport};
use crate::transport::{DownloadTransport, ObjectStore};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub workers: usize,
    pub dry_run: bool,
    /// Per-transfer deadline; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub presign_expiry: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            workers: ParallelCoordinator::DEFAULT_WORKERS,
            dry_run: false,
            timeout: None,
            presign_expiry: DEFAULT_ACCESS_VALIDITY,
        }
    }
}

/// Runs select, plan, transfer and aggregate for one manifest.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    coordinator: ParallelCoordinator,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(options: SyncOptions) -> Result<Self, SyncError> {
        Ok(Self {
            coordinator: ParallelCoordinator::new(options.workers)?,
            options,
        })
    }

    pub fn download<T>(
        &self,
        manifest: Manifest,
        selector: &Selector,
        root: &Utf8Path,
        transport: T,
        sink: &dyn ProgressSink,
    ) -> Result<SyncReport, SyncError>
    where
        T: DownloadTransport + 'static,
    {
        let Some(entries) = self.select(manifest, selector, sink) else {
            return Ok(SyncReport::empty(Direction::Download, self.options.dry_run));
        };

        if !self.options.dry_run {
            ensure_download_root(root)?;
        }
        let plan = TransferPlanner::download().plan(entries)?;
        let executor = TimeoutExecutor::new(DownloadExecutor::new(transport), self.options.timeout);
        let aggregator = self.run_plan(Direction::Download, plan, &executor, sink)?;
        self.finish(aggregator, sink)
    }

    pub fn upload<S>(
        &self,
        manifest: Manifest,
        selector: &Selector,
        store: Arc<S>,
        sink: &dyn ProgressSink,
    ) -> Result<SyncReport, SyncError>
    where
        S: ObjectStore + ?Sized + 'static,
    {
        let Some(entries) = self.select(manifest, selector, sink) else {
            return Ok(SyncReport::empty(Direction::Upload, self.options.dry_run));
        };

        let mut presence = probe_buckets(store.as_ref(), &upload_buckets(&entries))?;
        if !self.options.dry_run {
            ensure_buckets(store.as_ref(), &mut presence)?;
        }
        let listing = DestinationListing::fetch(store.as_ref(), &presence)?;
        let plan = TransferPlanner::upload(&listing).plan(entries)?;

        let executor =
            TimeoutExecutor::new(UploadExecutor::new(Arc::clone(&store)), self.options.timeout);
        let mut aggregator = self.run_plan(Direction::Upload, plan, &executor, sink)?;
        if !self.options.dry_run {
            self.issue_access(&mut aggregator, store.as_ref(), sink);
        }
        self.finish(aggregator, sink)
    }

    fn select(
        &self,
        manifest: Manifest,
        selector: &Selector,
        sink: &dyn ProgressSink,
    ) -> Option<Vec<ManifestEntry>> {
        let listed = manifest.len();
        let entries = select(manifest.into_entries(), selector);
        if entries.is_empty() {
            tracing::info!(listed, "no entries matched the selection; nothing to do");
            sink.event(ProgressEvent {
                message: "phase=Select; no matching entries".to_string(),
                elapsed: None,
            });
            return None;
        }
        let total: u64 = entries.iter().map(ManifestEntry::size_bytes).sum();
        tracing::info!(
            listed,
            selected = entries.len(),
            total = %human_size(total),
            "selected entries"
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Select; {} of {listed} entries, {} total",
                entries.len(),
                human_size(total)
            ),
            elapsed: None,
        });
        Some(entries)
    }

    fn run_plan<E>(
        &self,
        direction: Direction,
        plan: Plan,
        executor: &E,
        sink: &dyn ProgressSink,
    ) -> Result<ResultAggregator, SyncError>
    where
        E: TransferExecutor + ?Sized,
    {
        let required_bytes = plan.required_bytes();
        let Plan {
            candidates,
            required,
            satisfied,
        } = plan;
        let mut aggregator =
            ResultAggregator::new(direction, candidates).dry_run(self.options.dry_run);

        sink.event(ProgressEvent {
            message: format!(
                "phase=Plan; {} to transfer ({}), {} already satisfied",
                required.len(),
                human_size(required_bytes),
                satisfied.len()
            ),
            elapsed: None,
        });
        for entry in satisfied {
            aggregator.record_skipped(entry, "already satisfied")?;
        }

        if self.options.dry_run {
            for (entry, reason) in required {
                tracing::info!(entry = entry.display_name(), %reason, "dry run: would transfer");
                aggregator.record_skipped(entry, &format!("dry run: would transfer ({reason})"))?;
            }
            return Ok(aggregator);
        }

        let total = required.len();
        let entries = required.into_iter().map(|(entry, _)| entry).collect();
        let mut done = 0usize;
        let mut errors = Vec::new();
        self.coordinator.run(entries, executor, |outcome| {
            done += 1;
            let state = if outcome.result.is_ok() { "done" } else { "failed" };
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Transfer; [{done}/{total}] {} {state}",
                    outcome.entry.display_name()
                ),
                elapsed: Some(outcome.elapsed),
            });
            if let Err(err) = aggregator.record_outcome(outcome) {
                errors.push(err);
            }
        });
        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(aggregator),
        }
    }

    /// Presigns every uploaded or already-present object. A failed presign
    /// leaves that row without a link.
    fn issue_access<S>(&self, aggregator: &mut ResultAggregator, store: &S, sink: &dyn ProgressSink)
    where
        S: ObjectStore + ?Sized,
    {
        let targets: Vec<(String, BucketName, String)> = aggregator
            .settled()
            .filter(|entry| {
                matches!(entry.status(), EntryStatus::Succeeded | EntryStatus::Skipped(_))
            })
            .filter_map(|entry| match entry.remote() {
                RemoteLocator::S3 { bucket, key } => {
                    Some((entry.identifier().to_string(), bucket.clone(), key.clone()))
                }
                _ => None,
            })
            .collect();
        if targets.is_empty() {
            return;
        }

        sink.event(ProgressEvent {
            message: format!("phase=Share; presigning {} objects", targets.len()),
            elapsed: None,
        });
        let expiry = self.options.presign_expiry;
        for (identifier, bucket, key) in targets {
            match store.presign(&bucket, &key, expiry) {
                Ok(url) => {
                    let access = AccessDescriptor::new(url, Utc::now(), expiry);
                    aggregator.attach_access(&identifier, access);
                }
                Err(err) => {
                    tracing::warn!(%bucket, key, error = %err, "failed to presign object");
                }
            }
        }
    }

    fn finish(
        &self,
        aggregator: ResultAggregator,
        sink: &dyn ProgressSink,
    ) -> Result<SyncReport, SyncError> {
        let report = aggregator.finish()?;
        let summary = report.summary;
        tracing::info!(
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            transferred = %human_size(summary.transferred_bytes),
            "sync finished"
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; success={} skipped={} failed={}",
                summary.succeeded, summary.skipped, summary.failed
            ),
            elapsed: None,
        });
        Ok(report)
    }
}
