use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{BucketName, EntryKind, ManifestEntry, RemoteLocator, object_name_for};
use crate::error::SyncError;

/// Validated, ordered set of entries for one run.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Rejects duplicate identifiers and entries sharing a local path.
    pub fn new(entries: Vec<ManifestEntry>) -> Result<Self, SyncError> {
        let mut identifiers = HashSet::new();
        let mut destinations = HashSet::new();
        for entry in &entries {
            if !identifiers.insert(entry.identifier()) {
                return Err(SyncError::DuplicateIdentifier(entry.identifier().to_string()));
            }
            if !destinations.insert(entry.local_path()) {
                return Err(SyncError::DuplicateDestination(entry.local_path().to_string()));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ManifestEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(ManifestEntry::size_bytes).sum()
    }
}

/// Upload manifest file:
/// `{"bucket_name": "...", "uploads": ["path", {"file_path": "...", ...}]}`, where
/// a detailed entry may also carry `bucket_name` and `object_name`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UploadManifestFile {
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub uploads: Vec<UploadEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum UploadEntry {
    Shorthand(String),
    Detailed(UploadEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UploadEntryObject {
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub object_name: Option<String>,
}

pub fn load_upload_manifest(path: &Utf8Path) -> Result<Manifest, SyncError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|_| SyncError::ManifestRead(path.as_std_path().to_path_buf()))?;
    let file: UploadManifestFile =
        serde_json::from_str(&content).map_err(|err| SyncError::Manifest(err.to_string()))?;
    upload_manifest(file)
}

/// Builds upload entries from the local files. Records naming a file that
/// does not exist are dropped with a warning; records missing a field fail
/// the whole manifest.
pub fn upload_manifest(file: UploadManifestFile) -> Result<Manifest, SyncError> {
    let default_bucket = file.bucket_name;
    let mut entries = Vec::new();

    for (index, record) in file.uploads.into_iter().enumerate() {
        let record = match record {
            UploadEntry::Shorthand(file_path) => UploadEntryObject {
                file_path: Some(file_path),
                bucket_name: None,
                object_name: None,
            },
            UploadEntry::Detailed(obj) => obj,
        };

        let file_path = record
            .file_path
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| SyncError::Manifest(format!("upload #{index}: missing file_path")))?;
        let bucket: BucketName = record
            .bucket_name
            .or_else(|| default_bucket.clone())
            .ok_or_else(|| {
                SyncError::Manifest(format!("upload #{index}: missing bucket_name"))
            })?
            .parse()?;

        let local_path = Utf8PathBuf::from(file_path.trim());
        let metadata = match fs::metadata(local_path.as_std_path()) {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                tracing::warn!(path = %local_path, "skipping upload of missing file");
                continue;
            }
        };

        let key = object_name_for(&local_path, record.object_name.as_deref()).ok_or_else(|| {
            SyncError::Manifest(format!("upload #{index}: cannot derive object name"))
        })?;
        let entry = ManifestEntry::new(
            local_path.to_string(),
            key.clone(),
            EntryKind::File,
            metadata.len(),
            RemoteLocator::S3 { bucket, key },
            local_path,
        )?;
        entries.push(entry);
    }

    Manifest::new(entries)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn locator(url: &str) -> RemoteLocator {
        RemoteLocator::Http {
            url: url.to_string(),
        }
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let a = ManifestEntry::new(
            "id-1",
            "a.fq.gz",
            EntryKind::File,
            1,
            locator("https://x/a"),
            "/out/a.fq.gz".into(),
        )
        .unwrap();
        let b = ManifestEntry::new(
            "id-1",
            "b.fq.gz",
            EntryKind::File,
            1,
            locator("https://x/b"),
            "/out/b.fq.gz".into(),
        )
        .unwrap();
        assert_matches!(
            Manifest::new(vec![a, b]),
            Err(SyncError::DuplicateIdentifier(_))
        );
    }

    #[test]
    fn rejects_shared_destination() {
        let a = ManifestEntry::new(
            "id-1",
            "a.fq.gz",
            EntryKind::File,
            1,
            locator("https://x/a"),
            "/out/a.fq.gz".into(),
        )
        .unwrap();
        let b = ManifestEntry::new(
            "id-2",
            "a.fq.gz",
            EntryKind::File,
            1,
            locator("https://y/a"),
            "/out/a.fq.gz".into(),
        )
        .unwrap();
        assert_matches!(
            Manifest::new(vec![a, b]),
            Err(SyncError::DuplicateDestination(_))
        );
    }

    #[test]
    fn upload_manifest_drops_missing_files() {
        let temp = tempfile::tempdir().unwrap();
        let present = temp.path().join("S1_R1.fastq.gz");
        fs::write(&present, b"@read\nACGT\n+\n!!!!\n").unwrap();
        let missing = temp.path().join("gone.fastq.gz");

        let file = UploadManifestFile {
            bucket_name: Some("share-bucket".to_string()),
            uploads: vec![
                UploadEntry::Shorthand(present.to_string_lossy().to_string()),
                UploadEntry::Detailed(UploadEntryObject {
                    file_path: Some(missing.to_string_lossy().to_string()),
                    bucket_name: None,
                    object_name: None,
                }),
            ],
        };
        let manifest = upload_manifest(file).unwrap();
        assert_eq!(manifest.len(), 1);
        let entry = &manifest.entries()[0];
        assert_eq!(entry.display_name(), "S1_R1.fastq.gz");
        assert_eq!(entry.size_bytes(), 18);
        assert_eq!(entry.remote().to_string(), "s3://share-bucket/S1_R1.fastq.gz");
    }

    #[test]
    fn upload_manifest_requires_bucket() {
        let file = UploadManifestFile {
            bucket_name: None,
            uploads: vec![UploadEntry::Shorthand("/data/a.bam".to_string())],
        };
        assert_matches!(upload_manifest(file), Err(SyncError::Manifest(_)));
    }

    #[test]
    fn parse_mixed_upload_entries() {
        let json = r#"{
            "bucket_name": "share-bucket",
            "uploads": [
                "/data/a.bam",
                {
                    "file_path": "/data/b.bam",
                    "bucket_name": "other-bucket",
                    "object_name": "x/b.bam"
                }
            ]
        }"#;
        let file: UploadManifestFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.uploads.len(), 2);
        assert_matches!(file.uploads[0], UploadEntry::Shorthand(_));
        assert_matches!(file.uploads[1], UploadEntry::Detailed(_));
    }
}
