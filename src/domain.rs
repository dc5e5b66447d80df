use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    File,
    Folder,
    Unknown,
}

impl EntryKind {
    pub fn from_data_type(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "FILE" => EntryKind::File,
            "FOLDER" => EntryKind::Folder,
            _ => EntryKind::Unknown,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => write!(f, "FILE"),
            EntryKind::Folder => write!(f, "FOLDER"),
            EntryKind::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// File-type classification of an entry. Each category owns its local
/// subfolder and the suffix used when building artifact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Fastq,
    Cram,
    Gvcf,
    Vcf,
    Cnv,
    Sv,
    Other,
}

impl Category {
    /// Secondary-analysis artifacts kept per sample on the archive host.
    pub const ARCHIVE: [Category; 5] = [
        Category::Cram,
        Category::Gvcf,
        Category::Vcf,
        Category::Cnv,
        Category::Sv,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Category::Fastq => ".fastq.gz",
            Category::Cram => ".cram",
            Category::Gvcf => ".hard-filtered.gvcf.gz",
            Category::Vcf => ".hard-filtered.vcf.gz",
            Category::Cnv => ".cnv.vcf.gz",
            Category::Sv => ".sv.vcf.gz",
            Category::Other => "",
        }
    }

    pub fn subfolder(self) -> &'static str {
        match self {
            Category::Fastq => "fastq",
            Category::Cram => "cram",
            Category::Gvcf => "gvcf",
            Category::Vcf => "vcf",
            Category::Cnv => "cnv",
            Category::Sv => "sv",
            Category::Other => "other",
        }
    }

    pub fn classify(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".cnv.vcf.gz") {
            Category::Cnv
        } else if lower.ends_with(".sv.vcf.gz") {
            Category::Sv
        } else if lower.ends_with(".gvcf.gz") || lower.ends_with(".gvcf") {
            Category::Gvcf
        } else if lower.ends_with(".vcf.gz") || lower.ends_with(".vcf") {
            Category::Vcf
        } else if lower.ends_with(".cram") {
            Category::Cram
        } else if [".fastq.gz", ".fq.gz", ".fastq", ".fq"]
            .iter()
            .any(|suffix| lower.ends_with(suffix))
        {
            Category::Fastq
        } else {
            Category::Other
        }
    }

    /// `root/<subfolder>/<base><suffix>`
    pub fn local_path(self, root: &Utf8Path, base: &str) -> Utf8PathBuf {
        root.join(self.subfolder())
            .join(format!("{base}{}", self.suffix()))
    }

    /// `root/Sample_<sample>/<sample><suffix>`
    pub fn remote_sample_path(self, root: &Utf8Path, sample: &SampleId) -> Utf8PathBuf {
        root.join(format!("Sample_{sample}"))
            .join(format!("{sample}{}", self.suffix()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subfolder())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// How local destinations are derived from an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalLayout {
    /// `root/<display name>`
    Flat(Utf8PathBuf),
    /// `root/<category subfolder>/<base><category suffix>`
    ByCategory(Utf8PathBuf),
}

impl LocalLayout {
    pub fn root(&self) -> &Utf8Path {
        match self {
            LocalLayout::Flat(root) | LocalLayout::ByCategory(root) => root,
        }
    }

    pub fn local_path(&self, category: Category, display_name: &str, base: &str) -> Utf8PathBuf {
        match self {
            LocalLayout::Flat(root) => root.join(display_name),
            LocalLayout::ByCategory(root) => category.local_path(root, base),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteLocator {
    Ica {
        project_id: ProjectId,
        data_id: String,
        path: String,
    },
    S3 {
        bucket: BucketName,
        key: String,
    },
    Http {
        url: String,
    },
    Rsync {
        user: String,
        host: String,
        path: Utf8PathBuf,
    },
}

impl RemoteLocator {
    /// Path used by prefix selection: the project path, object key, URL, or
    /// remote filesystem path.
    pub fn logical_path(&self) -> &str {
        match self {
            RemoteLocator::Ica { path, .. } => path,
            RemoteLocator::S3 { key, .. } => key,
            RemoteLocator::Http { url } => url,
            RemoteLocator::Rsync { path, .. } => path.as_str(),
        }
    }
}

impl fmt::Display for RemoteLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteLocator::Ica {
                project_id,
                data_id,
                ..
            } => write!(f, "ica://{project_id}/{data_id}"),
            RemoteLocator::S3 { bucket, key } => write!(f, "s3://{bucket}/{key}"),
            RemoteLocator::Http { url } => write!(f, "{url}"),
            RemoteLocator::Rsync { user, host, path } => write!(f, "{user}@{host}:{path}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Skipped(String),
    Succeeded,
    Failed(String),
}

impl EntryStatus {
    pub fn label(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Skipped(_) => "skipped",
            EntryStatus::Succeeded => "succeeded",
            EntryStatus::Failed(_) => "failed",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            EntryStatus::Skipped(reason) | EntryStatus::Failed(reason) => Some(reason),
            EntryStatus::Pending | EntryStatus::Succeeded => None,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, EntryStatus::Pending)
    }
}

/// A remote object and the local artifact it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    identifier: String,
    display_name: String,
    kind: EntryKind,
    category: Category,
    size_bytes: u64,
    remote: RemoteLocator,
    local_path: Utf8PathBuf,
    status: EntryStatus,
}

impl ManifestEntry {
    /// Builds a pending entry; the category is classified from the display
    /// name.
    pub fn new(
        identifier: impl Into<String>,
        display_name: impl Into<String>,
        kind: EntryKind,
        size_bytes: u64,
        remote: RemoteLocator,
        local_path: Utf8PathBuf,
    ) -> Result<Self, SyncError> {
        let identifier = identifier.into();
        let display_name = display_name.into();
        if identifier.trim().is_empty() {
            return Err(SyncError::Manifest("empty identifier".to_string()));
        }
        if display_name.trim().is_empty() {
            return Err(SyncError::Manifest(format!(
                "entry {identifier} has an empty name"
            )));
        }
        let category = Category::classify(&display_name);
        Ok(Self {
            identifier,
            display_name,
            kind,
            category,
            size_bytes,
            remote,
            local_path,
            status: EntryStatus::Pending,
        })
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn size_readable(&self) -> String {
        human_size(self.size_bytes)
    }

    pub fn remote(&self) -> &RemoteLocator {
        &self.remote
    }

    pub fn local_path(&self) -> &Utf8Path {
        &self.local_path
    }

    pub fn status(&self) -> &EntryStatus {
        &self.status
    }

    /// Moves the entry out of `Pending`. Each entry settles exactly once.
    pub fn settle(&mut self, status: EntryStatus) -> Result<(), SyncError> {
        if self.status.is_final() || !status.is_final() {
            return Err(SyncError::AlreadySettled(self.identifier.clone()));
        }
        self.status = status;
        Ok(())
    }
}

/// Binary units, one decimal place: 1536 bytes is "1.5KB".
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.1}{unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1}PB")
}

/// Object name for an upload: the explicit override, or the file's base
/// name.
pub fn object_name_for(path: &Utf8Path, object_override: Option<&str>) -> Option<String> {
    match object_override.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => Some(name.to_string()),
        None => path.file_name().map(str::to_string),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !is_valid {
            return Err(SyncError::InvalidProjectId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketName(String);

impl BucketName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BucketName {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let edge_ok = |ch: Option<char>| {
            ch.map(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
                .unwrap_or(false)
        };
        let is_valid = (3..=63).contains(&normalized.len())
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '.')
            && edge_ok(normalized.chars().next())
            && edge_ok(normalized.chars().last())
            && !normalized.contains("..");
        if !is_valid {
            return Err(SyncError::InvalidBucketName(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleId(String);

impl SampleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !is_valid {
            return Err(SyncError::InvalidSampleId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}
