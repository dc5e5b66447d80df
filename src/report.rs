use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Duration;

use camino::Utf8Path;
use chrono::{DateTime, Local, TimeDelta, Utc};
use serde::Serialize;

use crate::coordinator::TransferOutcome;
use crate::domain::{Direction, EntryStatus, ManifestEntry, human_size};
use crate::error::SyncError;

/// One week, the default validity of a shared download link.
pub const DEFAULT_ACCESS_VALIDITY: Duration = Duration::from_secs(604_800);

const REPORT_TIME_FORMAT: &str = "%Y-%m-%d %I:%M:%S %p";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_candidates: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub transferred_bytes: u64,
}

impl Summary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Time-bounded shareable link to an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDescriptor {
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessDescriptor {
    pub fn new(url: impl Into<String>, created_at: DateTime<Utc>, validity: Duration) -> Self {
        let expires_at = TimeDelta::from_std(validity)
            .ok()
            .and_then(|delta| created_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            url: url.into(),
            created_at,
            expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub identifier: String,
    pub name: String,
    pub size: String,
    pub bytes: u64,
    pub status: String,
    pub reason: Option<String>,
    pub source: String,
    pub destination: String,
    pub access: Option<AccessDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub direction: Direction,
    pub dry_run: bool,
    pub summary: Summary,
    pub rows: Vec<ReportRow>,
}

impl SyncReport {
    pub fn empty(direction: Direction, dry_run: bool) -> Self {
        Self {
            direction,
            dry_run,
            summary: Summary::default(),
            rows: Vec::new(),
        }
    }

    /// Tab-separated rendering, one line per entry after a header.
    pub fn to_tsv(&self) -> String {
        let mut out = String::from(
            "name\tsize\tbytes\tstatus\tdestination\taccess_url\tcreated_at\texpires_at\n",
        );
        for row in &self.rows {
            let (url, created, expires) = match &row.access {
                Some(access) => (
                    access.url.clone(),
                    local_time(access.created_at),
                    local_time(access.expires_at),
                ),
                None => (String::new(), String::new(), String::new()),
            };
            let bytes = row.bytes.to_string();
            let fields = [
                row.name.as_str(),
                row.size.as_str(),
                bytes.as_str(),
                row.status.as_str(),
                row.destination.as_str(),
                url.as_str(),
                created.as_str(),
                expires.as_str(),
            ];
            out.push_str(&fields.join("\t"));
            out.push('\n');
        }
        out
    }

    pub fn write_tsv(&self, path: &Utf8Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        }
        fs::write(path.as_std_path(), self.to_tsv())
            .map_err(|err| SyncError::Filesystem(format!("{path}: {err}")))
    }
}

fn local_time(value: DateTime<Utc>) -> String {
    value
        .with_timezone(&Local)
        .format(REPORT_TIME_FORMAT)
        .to_string()
}

/// Single consumer of the outcome stream. Every candidate must be presented
/// exactly once, either as a skip or as a transfer outcome.
#[derive(Debug)]
pub struct ResultAggregator {
    direction: Direction,
    dry_run: bool,
    order: Vec<String>,
    members: HashSet<String>,
    settled: HashMap<String, ManifestEntry>,
    access: HashMap<String, AccessDescriptor>,
    summary: Summary,
}

impl ResultAggregator {
    pub fn new(direction: Direction, candidates: Vec<String>) -> Self {
        Self {
            direction,
            dry_run: false,
            summary: Summary {
                total_candidates: candidates.len(),
                ..Summary::default()
            },
            members: candidates.iter().cloned().collect(),
            order: candidates,
            settled: HashMap::new(),
            access: HashMap::new(),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    /// Records an entry that needs no transfer. Pending entries are settled
    /// here; entries the planner already settled keep their reason.
    pub fn record_skipped(
        &mut self,
        mut entry: ManifestEntry,
        reason: &str,
    ) -> Result<(), SyncError> {
        self.check_new(&entry)?;
        if !entry.status().is_final() {
            entry.settle(EntryStatus::Skipped(reason.to_string()))?;
        }
        self.insert(entry)
    }

    pub fn record_outcome(&mut self, outcome: TransferOutcome) -> Result<(), SyncError> {
        let TransferOutcome {
            mut entry,
            result,
            elapsed,
        } = outcome;
        self.check_new(&entry)?;
        match result {
            Ok(()) => {
                tracing::info!(
                    entry = entry.display_name(),
                    size = %entry.size_readable(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "transfer complete"
                );
                entry.settle(EntryStatus::Succeeded)?;
            }
            Err(err) => {
                tracing::warn!(entry = entry.display_name(), error = %err, "transfer failed");
                entry.settle(EntryStatus::Failed(err.to_string()))?;
            }
        }
        self.insert(entry)
    }

    pub fn attach_access(&mut self, identifier: &str, access: AccessDescriptor) {
        self.access.insert(identifier.to_string(), access);
    }

    pub fn settled(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.order
            .iter()
            .filter_map(|identifier| self.settled.get(identifier))
    }

    pub fn finish(mut self) -> Result<SyncReport, SyncError> {
        let mut rows = Vec::with_capacity(self.order.len());
        for identifier in &self.order {
            let entry = self
                .settled
                .remove(identifier)
                .ok_or_else(|| SyncError::UnsettledEntry(identifier.clone()))?;
            rows.push(ReportRow {
                identifier: identifier.clone(),
                name: entry.display_name().to_string(),
                size: human_size(entry.size_bytes()),
                bytes: entry.size_bytes(),
                status: entry.status().label().to_string(),
                reason: entry.status().reason().map(str::to_string),
                source: match self.direction {
                    Direction::Download => entry.remote().to_string(),
                    Direction::Upload => entry.local_path().to_string(),
                },
                destination: match self.direction {
                    Direction::Download => entry.local_path().to_string(),
                    Direction::Upload => entry.remote().to_string(),
                },
                access: self.access.remove(identifier),
            });
        }
        Ok(SyncReport {
            direction: self.direction,
            dry_run: self.dry_run,
            summary: self.summary,
            rows,
        })
    }

    fn check_new(&self, entry: &ManifestEntry) -> Result<(), SyncError> {
        if self.settled.contains_key(entry.identifier()) {
            return Err(SyncError::DuplicateReportEntry(entry.identifier().to_string()));
        }
        if !self.members.contains(entry.identifier()) {
            return Err(SyncError::UnknownReportEntry(entry.identifier().to_string()));
        }
        Ok(())
    }

    fn insert(&mut self, entry: ManifestEntry) -> Result<(), SyncError> {
        match entry.status() {
            EntryStatus::Succeeded => {
                self.summary.succeeded += 1;
                self.summary.transferred_bytes += entry.size_bytes();
            }
            EntryStatus::Skipped(_) => self.summary.skipped += 1,
            EntryStatus::Failed(_) => self.summary.failed += 1,
            EntryStatus::Pending => {
                return Err(SyncError::UnsettledEntry(entry.identifier().to_string()));
            }
        }
        self.settled.insert(entry.identifier().to_string(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;
    use chrono::TimeZone;

    use super::*;
    use crate::domain::{EntryKind, RemoteLocator};
    use crate::error::TransferError;

    fn entry(id: &str, size: u64) -> ManifestEntry {
        ManifestEntry::new(
            id,
            format!("{id}.fastq.gz"),
            EntryKind::File,
            size,
            RemoteLocator::Http {
                url: format!("https://example.org/{id}"),
            },
            Utf8PathBuf::from("/out").join(format!("{id}.fastq.gz")),
        )
        .unwrap()
    }

    fn outcome(id: &str, ok: bool) -> TransferOutcome {
        TransferOutcome {
            entry: entry(id, 2048),
            result: if ok {
                Ok(())
            } else {
                Err(TransferError::Http("reset".to_string()))
            },
            elapsed: Duration::from_millis(5),
        }
    }

    fn candidates(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn counts_add_up_and_rows_keep_order() {
        let mut aggregator =
            ResultAggregator::new(Direction::Download, candidates(&["a", "b", "c"]));
        aggregator.record_outcome(outcome("c", false)).unwrap();
        aggregator.record_skipped(entry("a", 10), "already present").unwrap();
        aggregator.record_outcome(outcome("b", true)).unwrap();

        let report = aggregator.finish().unwrap();
        let summary = report.summary;
        assert_eq!(summary.total_candidates, 3);
        assert_eq!(
            summary.succeeded + summary.skipped + summary.failed,
            summary.total_candidates
        );
        assert_eq!((summary.succeeded, summary.skipped, summary.failed), (1, 1, 1));
        assert_eq!(summary.transferred_bytes, 2048);
        assert!(!summary.is_success());

        let names = report.rows.iter().map(|row| row.identifier.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(report.rows[1].size, "2.0KB");
        assert_eq!(report.rows[2].status, "failed");
        assert!(report.rows[2].reason.as_deref().unwrap().contains("reset"));
    }

    #[test]
    fn duplicate_and_unknown_entries_are_rejected() {
        let mut aggregator = ResultAggregator::new(Direction::Download, candidates(&["a"]));
        aggregator.record_outcome(outcome("a", true)).unwrap();
        assert_matches!(
            aggregator.record_outcome(outcome("a", true)),
            Err(SyncError::DuplicateReportEntry(_))
        );
        assert_matches!(
            aggregator.record_outcome(outcome("z", true)),
            Err(SyncError::UnknownReportEntry(_))
        );
    }

    #[test]
    fn missing_entry_fails_finish() {
        let aggregator = ResultAggregator::new(Direction::Download, candidates(&["a"]));
        assert_matches!(aggregator.finish(), Err(SyncError::UnsettledEntry(_)));
    }

    #[test]
    fn access_expiry_is_created_plus_validity() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let access = AccessDescriptor::new("https://signed", created, DEFAULT_ACCESS_VALIDITY);
        assert_eq!(
            access.expires_at,
            Utc.with_ymd_and_hms(2024, 3, 8, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn tsv_includes_access_columns() {
        let mut aggregator = ResultAggregator::new(Direction::Upload, candidates(&["a"]));
        aggregator.record_outcome(outcome("a", true)).unwrap();
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        aggregator.attach_access(
            "a",
            AccessDescriptor::new("https://signed/a", created, Duration::from_secs(3600)),
        );
        let tsv = aggregator.finish().unwrap().to_tsv();
        let mut lines = tsv.lines();
        assert!(lines.next().unwrap().starts_with("name\tsize\tbytes\tstatus"));
        let row = lines.next().unwrap().split('\t').collect::<Vec<_>>();
        assert_eq!(row.len(), 8);
        assert_eq!(row[0], "a.fastq.gz");
        assert_eq!(row[3], "succeeded");
        assert_eq!(row[5], "https://signed/a");
    }
}
