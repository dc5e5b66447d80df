use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io;

use camino::Utf8Path;

use crate::domain::{BucketName, Direction, EntryKind, EntryStatus, ManifestEntry, RemoteLocator};
use crate::error::SyncError;
use crate::transport::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredReason {
    Missing,
    SizeMismatch { local: u64, expected: u64 },
}

impl fmt::Display for RequiredReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequiredReason::Missing => write!(f, "missing"),
            RequiredReason::SizeMismatch { local, expected } => {
                write!(f, "size mismatch ({local} of {expected} bytes)")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanDecision {
    Required(RequiredReason),
    AlreadySatisfied,
}

/// Objects currently present in each destination bucket, read once per run.
#[derive(Debug, Clone, Default)]
pub struct DestinationListing {
    objects: HashMap<BucketName, HashSet<String>>,
}

impl DestinationListing {
    /// Lists every bucket in `presence` that exists; missing buckets are
    /// treated as empty.
    pub fn fetch<S: ObjectStore + ?Sized>(
        store: &S,
        presence: &BucketPresence,
    ) -> Result<Self, SyncError> {
        let mut objects = HashMap::new();
        for (bucket, &exists) in presence {
            let keys = if exists {
                store
                    .list_objects(bucket)
                    .map_err(|err| planning(bucket, err))?
                    .into_iter()
                    .collect()
            } else {
                tracing::info!(%bucket, "bucket does not exist yet; treating as empty");
                HashSet::new()
            };
            tracing::debug!(%bucket, objects = keys.len(), "listed destination bucket");
            objects.insert(bucket.clone(), keys);
        }
        Ok(Self { objects })
    }

    pub fn insert(&mut self, bucket: BucketName, key: impl Into<String>) {
        self.objects.entry(bucket).or_default().insert(key.into());
    }

    pub fn contains(&self, bucket: &BucketName, key: &str) -> bool {
        self.objects
            .get(bucket)
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }
}

/// Entries split into what must move and what already matches. Satisfied
/// entries leave the planner settled as `Skipped`.
#[derive(Debug, Default)]
pub struct Plan {
    pub candidates: Vec<String>,
    pub required: Vec<(ManifestEntry, RequiredReason)>,
    pub satisfied: Vec<ManifestEntry>,
}

impl Plan {
    pub fn total_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn required_bytes(&self) -> u64 {
        self.required
            .iter()
            .map(|(entry, _)| entry.size_bytes())
            .sum()
    }
}

/// Compares a download entry against the local filesystem as it is now.
pub fn plan_download(entry: &ManifestEntry) -> Result<PlanDecision, SyncError> {
    let path = entry.local_path();
    let metadata = match fs::metadata(path.as_std_path()) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(PlanDecision::Required(RequiredReason::Missing));
        }
        Err(err) => {
            return Err(SyncError::Planning {
                target: path.to_string(),
                message: err.to_string(),
            });
        }
    };

    if entry.kind() == EntryKind::Folder {
        return Ok(if metadata.is_dir() {
            PlanDecision::AlreadySatisfied
        } else {
            PlanDecision::Required(RequiredReason::Missing)
        });
    }

    let local = if metadata.is_file() { metadata.len() } else { 0 };
    if metadata.is_file() && local == entry.size_bytes() {
        Ok(PlanDecision::AlreadySatisfied)
    } else {
        Ok(PlanDecision::Required(RequiredReason::SizeMismatch {
            local,
            expected: entry.size_bytes(),
        }))
    }
}

/// An upload is satisfied when the bucket already holds an object with the
/// same name. Sizes are not compared.
pub fn plan_upload(entry: &ManifestEntry, listing: &DestinationListing) -> PlanDecision {
    match entry.remote() {
        RemoteLocator::S3 { bucket, key } if listing.contains(bucket, key) => {
            PlanDecision::AlreadySatisfied
        }
        _ => PlanDecision::Required(RequiredReason::Missing),
    }
}

/// Creates the local download root. Idempotent.
pub fn ensure_download_root(root: &Utf8Path) -> Result<(), SyncError> {
    fs::create_dir_all(root.as_std_path()).map_err(|err| SyncError::Planning {
        target: root.to_string(),
        message: err.to_string(),
    })
}

/// Whether each destination bucket exists, asked once per run.
pub type BucketPresence = BTreeMap<BucketName, bool>;

pub fn probe_buckets<S: ObjectStore + ?Sized>(
    store: &S,
    buckets: &BTreeSet<BucketName>,
) -> Result<BucketPresence, SyncError> {
    buckets
        .iter()
        .map(|bucket| {
            let exists = store
                .bucket_exists(bucket)
                .map_err(|err| planning(bucket, err))?;
            tracing::debug!(%bucket, exists, "probed destination bucket");
            Ok::<_, SyncError>((bucket.clone(), exists))
        })
        .collect()
}

/// Creates every bucket `presence` marks missing and records it as present.
pub fn ensure_buckets<S: ObjectStore + ?Sized>(
    store: &S,
    presence: &mut BucketPresence,
) -> Result<(), SyncError> {
    for (bucket, exists) in presence.iter_mut().filter(|(_, exists)| !**exists) {
        tracing::info!(%bucket, "creating destination bucket");
        store
            .create_bucket(bucket)
            .map_err(|err| planning(bucket, err))?;
        *exists = true;
    }
    Ok(())
}

pub fn upload_buckets(entries: &[ManifestEntry]) -> BTreeSet<BucketName> {
    entries
        .iter()
        .filter_map(|entry| match entry.remote() {
            RemoteLocator::S3 { bucket, .. } => Some(bucket.clone()),
            _ => None,
        })
        .collect()
}

pub struct TransferPlanner<'a> {
    direction: Direction,
    listing: Option<&'a DestinationListing>,
}

impl<'a> TransferPlanner<'a> {
    pub fn download() -> Self {
        Self {
            direction: Direction::Download,
            listing: None,
        }
    }

    pub fn upload(listing: &'a DestinationListing) -> Self {
        Self {
            direction: Direction::Upload,
            listing: Some(listing),
        }
    }

    pub fn decide(&self, entry: &ManifestEntry) -> Result<PlanDecision, SyncError> {
        match (self.direction, self.listing) {
            (Direction::Download, _) => plan_download(entry),
            (Direction::Upload, Some(listing)) => Ok(plan_upload(entry, listing)),
            (Direction::Upload, None) => Ok(PlanDecision::Required(RequiredReason::Missing)),
        }
    }

    pub fn plan(&self, entries: Vec<ManifestEntry>) -> Result<Plan, SyncError> {
        let mut plan = Plan::default();
        for mut entry in entries {
            plan.candidates.push(entry.identifier().to_string());
            match self.decide(&entry)? {
                PlanDecision::AlreadySatisfied => {
                    tracing::debug!(entry = entry.display_name(), "already satisfied");
                    let reason = match self.direction {
                        Direction::Download => {
                            format!("already present ({})", entry.size_readable())
                        }
                        Direction::Upload => "already uploaded".to_string(),
                    };
                    entry.settle(EntryStatus::Skipped(reason))?;
                    plan.satisfied.push(entry);
                }
                PlanDecision::Required(reason) => {
                    tracing::debug!(entry = entry.display_name(), %reason, "transfer required");
                    plan.required.push((entry, reason));
                }
            }
        }
        Ok(plan)
    }
}

fn planning(bucket: &BucketName, err: SyncError) -> SyncError {
    match err {
        SyncError::Planning { .. } => err,
        other => SyncError::Planning {
            target: format!("s3://{bucket}"),
            message: other.to_string(),
        },
    }
}
