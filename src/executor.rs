use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use crate::domain::{EntryKind, ManifestEntry, RemoteLocator};
use crate::error::TransferError;
use crate::transport::{DownloadTransport, ObjectStore};

/// Performs one transfer. Every failure comes back as a `TransferError`;
/// implementations must be callable concurrently for different entries.
pub trait TransferExecutor: Send + Sync {
    fn execute(&self, entry: &ManifestEntry) -> Result<(), TransferError>;
}

impl<E: TransferExecutor + ?Sized> TransferExecutor for Arc<E> {
    fn execute(&self, entry: &ManifestEntry) -> Result<(), TransferError> {
        (**self).execute(entry)
    }
}

pub struct DownloadExecutor<T> {
    transport: T,
}

impl<T: DownloadTransport> DownloadExecutor<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl<T: DownloadTransport> TransferExecutor for DownloadExecutor<T> {
    fn execute(&self, entry: &ManifestEntry) -> Result<(), TransferError> {
        let destination = entry.local_path();
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| TransferError::Filesystem(format!("{parent}: {err}")))?;
        }

        self.transport.fetch(entry, destination)?;

        if entry.kind() == EntryKind::Folder {
            return Ok(());
        }
        let actual = fs::metadata(destination.as_std_path())
            .map_err(|err| TransferError::Filesystem(format!("{destination}: {err}")))?
            .len();
        if actual != entry.size_bytes() {
            return Err(TransferError::SizeMismatch {
                expected: entry.size_bytes(),
                actual,
            });
        }
        Ok(())
    }
}

pub struct UploadExecutor<S> {
    store: S,
}

impl<S: ObjectStore> UploadExecutor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: ObjectStore> TransferExecutor for UploadExecutor<S> {
    fn execute(&self, entry: &ManifestEntry) -> Result<(), TransferError> {
        match entry.remote() {
            RemoteLocator::S3 { bucket, key } => {
                self.store.put_object(entry.local_path(), bucket, key)
            }
            other => Err(TransferError::UnsupportedLocator(other.to_string())),
        }
    }
}

/// Bounds each call to `timeout`. The call runs on a helper thread; past the
/// deadline the entry fails, but the calling worker stays occupied until the
/// helper returns, so no more than `W` transfers are ever running. Transports
/// that spawn external tools should kill them at the same deadline.
pub struct TimeoutExecutor<E> {
    inner: Arc<E>,
    timeout: Option<Duration>,
}

impl<E: TransferExecutor + 'static> TimeoutExecutor<E> {
    pub fn new(inner: E, timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }
}

impl<E: TransferExecutor + 'static> TransferExecutor for TimeoutExecutor<E> {
    fn execute(&self, entry: &ManifestEntry) -> Result<(), TransferError> {
        let Some(timeout) = self.timeout else {
            return self.inner.execute(entry);
        };

        let (tx, rx) = crossbeam_channel::bounded(1);
        let inner = Arc::clone(&self.inner);
        let owned = entry.clone();
        let helper = thread::Builder::new()
            .name(format!("transfer-{}", entry.display_name()))
            .spawn(move || {
                let _ = tx.send(inner.execute(&owned));
            })
            .map_err(|err| TransferError::Worker(err.to_string()))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => {
                let _ = helper.join();
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    entry = entry.display_name(),
                    ?timeout,
                    "transfer timed out; waiting for it to stop"
                );
                let _ = helper.join();
                Err(TransferError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(TransferError::Worker(
                "transfer thread exited without a result".to_string(),
            )),
        }
    }
}
