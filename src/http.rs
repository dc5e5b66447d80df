use std::fs;
use std::io;
use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::domain::{Category, EntryKind, LocalLayout, ManifestEntry, RemoteLocator};
use crate::error::{SyncError, TransferError};
use crate::manifest::Manifest;
use crate::transport::DownloadTransport;

#[derive(Debug, Deserialize)]
pub struct HttpManifestFile {
    pub downloads: Vec<HttpDownload>,
}

#[derive(Debug, Deserialize)]
pub struct HttpDownload {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    pub size: Option<u64>,
}

impl HttpDownload {
    fn file_name(&self) -> Option<String> {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|name| !name.is_empty()) {
            return Some(name.to_string());
        }
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        path.rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty() && !segment.contains(':'))
            .map(str::to_string)
    }
}

/// Reads `{"downloads": [{"url", "name"?, "size"}]}`. Sizes are required
/// since resume decisions depend on them.
pub fn load_http_manifest(path: &Utf8Path, output_dir: &Utf8Path) -> Result<Manifest, SyncError> {
    let contents = fs::read_to_string(path.as_std_path())
        .map_err(|_| SyncError::ManifestRead(path.as_std_path().to_path_buf()))?;
    let file: HttpManifestFile =
        serde_json::from_str(&contents).map_err(|err| SyncError::Manifest(err.to_string()))?;
    http_manifest(file, &LocalLayout::Flat(output_dir.to_path_buf()))
}

pub fn http_manifest(file: HttpManifestFile, layout: &LocalLayout) -> Result<Manifest, SyncError> {
    let entries = file
        .downloads
        .into_iter()
        .map(|download| {
            let size = download
                .size
                .ok_or_else(|| SyncError::Manifest(format!("{}: missing size", download.url)))?;
            let name = download.file_name().ok_or_else(|| {
                SyncError::Manifest(format!("{}: cannot derive a file name", download.url))
            })?;
            let category = Category::classify(&name);
            let local_path = layout.local_path(category, &name, &name);
            ManifestEntry::new(
                download.url.clone(),
                name,
                EntryKind::File,
                size,
                RemoteLocator::Http { url: download.url },
                local_path,
            )
        })
        .collect::<Result<Vec<_>, SyncError>>()?;
    Manifest::new(entries)
}

/// Plain HTTP(S) GET downloads with retries on transient failures.
#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(timeout: Option<Duration>) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ngs-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::Configuration(err.to_string()))?,
        );
        let mut builder = Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| SyncError::Configuration(err.to_string()))?;
        Ok(Self { client })
    }

    fn handle_status(response: Response) -> Result<Response, TransferError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .ok()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| "download failed".to_string());
        Err(TransferError::Status { status, message })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, TransferError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        tracing::debug!(status, attempt, "retrying HTTP request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        tracing::debug!(error = %err, attempt, "retrying HTTP request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(TransferError::Http(err.to_string()));
                }
            }
        }
    }
}

impl DownloadTransport for HttpDownloader {
    fn fetch(&self, entry: &ManifestEntry, destination: &Utf8Path) -> Result<(), TransferError> {
        let RemoteLocator::Http { url } = entry.remote() else {
            return Err(TransferError::UnsupportedLocator(entry.remote().to_string()));
        };
        let response = self.send_with_retries(|| self.client.get(url.as_str()))?;
        let mut response = Self::handle_status(response)?;

        // stream into a sibling temp file so a partial body never sits at the
        // destination path
        let dir = destination.parent().unwrap_or(Utf8Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir.as_std_path())
            .map_err(|err| TransferError::Filesystem(format!("{dir}: {err}")))?;
        io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| TransferError::Http(err.to_string()))?;
        temp.persist(destination.as_std_path())
            .map_err(|err| TransferError::Filesystem(format!("{destination}: {}", err.error)))?;
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
