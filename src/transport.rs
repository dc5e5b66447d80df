use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;

use crate::domain::{BucketName, ManifestEntry};
use crate::error::{SyncError, TransferError};

/// Moves one remote object to a local path.
pub trait DownloadTransport: Send + Sync {
    fn fetch(&self, entry: &ManifestEntry, destination: &Utf8Path) -> Result<(), TransferError>;
}

/// Bucket-style destination for uploads. Listing and bucket management
/// happen at planning time and fail the run; `put_object` and `presign` are
/// per-entry and only fail that entry.
pub trait ObjectStore: Send + Sync {
    fn bucket_exists(&self, bucket: &BucketName) -> Result<bool, SyncError>;
    fn create_bucket(&self, bucket: &BucketName) -> Result<(), SyncError>;
    fn list_objects(&self, bucket: &BucketName) -> Result<Vec<String>, SyncError>;
    fn put_object(
        &self,
        source: &Utf8Path,
        bucket: &BucketName,
        key: &str,
    ) -> Result<(), TransferError>;
    fn presign(
        &self,
        bucket: &BucketName,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, TransferError>;
}

impl<T: DownloadTransport + ?Sized> DownloadTransport for Arc<T> {
    fn fetch(&self, entry: &ManifestEntry, destination: &Utf8Path) -> Result<(), TransferError> {
        (**self).fetch(entry, destination)
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn bucket_exists(&self, bucket: &BucketName) -> Result<bool, SyncError> {
        (**self).bucket_exists(bucket)
    }

    fn create_bucket(&self, bucket: &BucketName) -> Result<(), SyncError> {
        (**self).create_bucket(bucket)
    }

    fn list_objects(&self, bucket: &BucketName) -> Result<Vec<String>, SyncError> {
        (**self).list_objects(bucket)
    }

    fn put_object(
        &self,
        source: &Utf8Path,
        bucket: &BucketName,
        key: &str,
    ) -> Result<(), TransferError> {
        (**self).put_object(source, bucket, key)
    }

    fn presign(
        &self,
        bucket: &BucketName,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, TransferError> {
        (**self).presign(bucket, key, expires_in)
    }
}
