use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;

use crate::domain::ManifestEntry;
use crate::error::{SyncError, TransferError};
use crate::executor::TransferExecutor;

/// Result of one attempted transfer. The entry is still `Pending`; settling
/// it is the aggregator's job.
#[derive(Debug)]
pub struct TransferOutcome {
    pub entry: ManifestEntry,
    pub result: Result<(), TransferError>,
    pub elapsed: Duration,
}

/// Runs transfers on a fixed pool of `W` worker threads.
#[derive(Debug, Clone, Copy)]
pub struct ParallelCoordinator {
    workers: NonZeroUsize,
}

impl ParallelCoordinator {
    pub const DEFAULT_WORKERS: usize = 4;

    pub fn new(workers: usize) -> Result<Self, SyncError> {
        NonZeroUsize::new(workers)
            .map(|workers| Self { workers })
            .ok_or(SyncError::InvalidWorkers(workers))
    }

    pub fn workers(&self) -> usize {
        self.workers.get()
    }

    /// Attempts every entry exactly once and hands each outcome to
    /// `on_complete` on the calling thread, in completion order. Returns the
    /// number of attempted entries once every worker has joined.
    pub fn run<E, F>(&self, entries: Vec<ManifestEntry>, executor: &E, mut on_complete: F) -> usize
    where
        E: TransferExecutor + ?Sized,
        F: FnMut(TransferOutcome),
    {
        let total = entries.len();
        if total == 0 {
            return 0;
        }
        let pool = self.workers.get().min(total);
        tracing::info!(entries = total, workers = pool, "dispatching transfers");

        let (job_tx, job_rx) = unbounded::<ManifestEntry>();
        let (done_tx, done_rx) = unbounded::<TransferOutcome>();
        for entry in entries {
            // the receiver is alive until the scope below ends
            let _ = job_tx.send(entry);
        }
        drop(job_tx);

        let mut delivered = 0usize;
        thread::scope(|scope| {
            for _ in 0..pool {
                let jobs = job_rx.clone();
                let done = done_tx.clone();
                scope.spawn(move || {
                    for entry in jobs.iter() {
                        let started = Instant::now();
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            executor.execute(&entry)
                        }))
                        .unwrap_or_else(|_| {
                            Err(TransferError::Worker("transfer panicked".to_string()))
                        });
                        let outcome = TransferOutcome {
                            entry,
                            result,
                            elapsed: started.elapsed(),
                        };
                        if done.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            for outcome in done_rx.iter() {
                delivered += 1;
                on_complete(outcome);
            }
        });

        tracing::debug!(attempted = delivered, "all transfer workers joined");
        delivered
    }
}

impl Default for ParallelCoordinator {
    fn default() -> Self {
        Self {
            workers: NonZeroUsize::new(Self::DEFAULT_WORKERS).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;
    use crate::domain::{EntryKind, RemoteLocator};

    fn entries(count: usize) -> Vec<ManifestEntry> {
        (0..count)
            .map(|index| {
                let name = format!("S{index}_R1.fastq.gz");
                ManifestEntry::new(
                    format!("fil.{index}"),
                    name.clone(),
                    EntryKind::File,
                    index as u64,
                    RemoteLocator::Http {
                        url: format!("https://example.org/{name}"),
                    },
                    Utf8PathBuf::from("/out").join(name),
                )
                .unwrap()
            })
            .collect()
    }

    /// Tracks how many calls overlap; earlier entries sleep longer so they
    /// finish after later ones.
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        fail_identifier: Option<&'static str>,
    }

    impl Gauge {
        fn new(fail_identifier: Option<&'static str>) -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                fail_identifier,
            }
        }
    }

    impl TransferExecutor for Gauge {
        fn execute(&self, entry: &ManifestEntry) -> Result<(), TransferError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = 40u64.saturating_sub(entry.size_bytes() * 4);
            thread::sleep(Duration::from_millis(delay));
            self.active.fetch_sub(1, Ordering::SeqCst);
            if Some(entry.identifier()) == self.fail_identifier {
                return Err(TransferError::Http("connection reset".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn rejects_zero_workers() {
        assert_matches!(ParallelCoordinator::new(0), Err(SyncError::InvalidWorkers(0)));
    }

    #[test]
    fn respects_concurrency_bound() {
        for workers in [1, 2, 3, 8] {
            let gauge = Gauge::new(None);
            let coordinator = ParallelCoordinator::new(workers).unwrap();
            let attempted = coordinator.run(entries(10), &gauge, |_| {});
            assert_eq!(attempted, 10);
            assert_eq!(gauge.calls.load(Ordering::SeqCst), 10);
            assert!(gauge.peak.load(Ordering::SeqCst) <= workers);
        }
    }

    #[test]
    fn delivers_every_entry_once() {
        let gauge = Gauge::new(None);
        let coordinator = ParallelCoordinator::new(2).unwrap();
        let mut seen = Vec::new();
        coordinator.run(entries(10), &gauge, |outcome| {
            seen.push(outcome.entry.identifier().to_string());
        });
        let unique = seen.iter().collect::<HashSet<_>>();
        assert_eq!(seen.len(), 10);
        assert_eq!(unique.len(), 10);
    }

    /// Holds `fil.0` until every other outcome has reached the consumer.
    struct HoldFirst<'a> {
        delivered: &'a AtomicUsize,
        others: usize,
    }

    impl TransferExecutor for HoldFirst<'_> {
        fn execute(&self, entry: &ManifestEntry) -> Result<(), TransferError> {
            if entry.identifier() == "fil.0" {
                let deadline = Instant::now() + Duration::from_secs(10);
                while self.delivered.load(Ordering::SeqCst) < self.others {
                    if Instant::now() > deadline {
                        return Err(TransferError::Worker("latch never released".to_string()));
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            }
            Ok(())
        }
    }

    #[test]
    fn delivers_in_completion_order() {
        let delivered = AtomicUsize::new(0);
        let executor = HoldFirst {
            delivered: &delivered,
            others: 9,
        };
        let coordinator = ParallelCoordinator::new(2).unwrap();
        let mut seen = Vec::new();
        coordinator.run(entries(10), &executor, |outcome| {
            assert!(outcome.result.is_ok());
            seen.push(outcome.entry.identifier().to_string());
            delivered.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(seen.len(), 10);
        assert_eq!(seen.last().map(String::as_str), Some("fil.0"));
        assert_ne!(seen[0], "fil.0");
    }

    #[test]
    fn failure_is_isolated() {
        let gauge = Gauge::new(Some("fil.3"));
        let coordinator = ParallelCoordinator::new(4).unwrap();
        let mut failed = Vec::new();
        let mut succeeded = 0;
        coordinator.run(entries(6), &gauge, |outcome| match outcome.result {
            Ok(()) => succeeded += 1,
            Err(_) => failed.push(outcome.entry.identifier().to_string()),
        });
        assert_eq!(failed, vec!["fil.3".to_string()]);
        assert_eq!(succeeded, 5);
    }

    #[test]
    fn panic_becomes_failure() {
        struct Panics;
        impl TransferExecutor for Panics {
            fn execute(&self, _entry: &ManifestEntry) -> Result<(), TransferError> {
                panic!("transport bug")
            }
        }
        let coordinator = ParallelCoordinator::new(2).unwrap();
        let mut failures = 0;
        coordinator.run(entries(3), &Panics, |outcome| {
            assert_matches!(outcome.result, Err(TransferError::Worker(_)));
            failures += 1;
        });
        assert_eq!(failures, 3);
    }

    #[test]
    fn empty_input_dispatches_nothing() {
        let gauge = Gauge::new(None);
        let attempted = ParallelCoordinator::default().run(Vec::new(), &gauge, |_| {});
        assert_eq!(attempted, 0);
        assert_eq!(gauge.calls.load(Ordering::SeqCst), 0);
    }
}
