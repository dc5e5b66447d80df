use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("invalid manifest record: {0}")]
    #[diagnostic(code(ngs_sync::manifest))]
    Manifest(String),

    #[error("duplicate identifier in manifest: {0}")]
    #[diagnostic(code(ngs_sync::manifest))]
    DuplicateIdentifier(String),

    #[error("two manifest entries target the same destination: {0}")]
    #[diagnostic(code(ngs_sync::manifest))]
    DuplicateDestination(String),

    #[error("failed to read manifest at {0}")]
    #[diagnostic(code(ngs_sync::manifest))]
    ManifestRead(PathBuf),

    #[error("failed to prepare destination {target}: {message}")]
    #[diagnostic(
        code(ngs_sync::planning),
        help("check that the destination exists and is writable")
    )]
    Planning { target: String, message: String },

    #[error("invalid configuration: {0}")]
    #[diagnostic(code(ngs_sync::config))]
    Configuration(String),

    #[error("invalid selector: {0}")]
    #[diagnostic(code(ngs_sync::config))]
    InvalidSelector(String),

    #[error("concurrency bound must be at least 1, got {0}")]
    #[diagnostic(code(ngs_sync::config))]
    InvalidWorkers(usize),

    #[error("failed to read config file at {0}")]
    #[diagnostic(code(ngs_sync::config))]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    #[diagnostic(code(ngs_sync::config))]
    ConfigParse(String),

    #[error("invalid ICA project id: {0}")]
    InvalidProjectId(String),

    #[error("invalid S3 bucket name: {0}")]
    InvalidBucketName(String),

    #[error("invalid sample id: {0}")]
    InvalidSampleId(String),

    #[error("required tool not found: {0}")]
    #[diagnostic(help("install the tool and make sure it is on PATH"))]
    MissingTool(String),

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("unexpected {tool} output: {message}")]
    Response { tool: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("entry {0} has already reached a final status")]
    AlreadySettled(String),

    #[error("entry {0} was reported more than once")]
    DuplicateReportEntry(String),

    #[error("entry {0} is not part of the selection")]
    UnknownReportEntry(String),

    #[error("entry {0} never reached a final status")]
    UnsettledEntry(String),

    #[error("{failed} of {total} transfers failed")]
    #[diagnostic(code(ngs_sync::transfer), help("re-run to retry; completed files are skipped"))]
    TransfersFailed { failed: usize, total: usize },
}

/// Failure of a single transfer. Never aborts a run; the executor turns it
/// into a `Failed` status on the entry.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("server returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("size mismatch after transfer: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport cannot handle {0}")]
    UnsupportedLocator(String),

    #[error("transfer worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("required tool not found: {0}")]
    Missing(String),

    #[error("failed to start {tool}: {message}")]
    Spawn { tool: String, message: String },

    #[error("{tool} exited with status {code}: {message}")]
    Failed {
        tool: String,
        code: String,
        message: String,
    },

    #[error("{tool} killed after {after:?}")]
    TimedOut { tool: String, after: Duration },
}

impl From<ToolError> for SyncError {
    fn from(value: ToolError) -> Self {
        match value {
            ToolError::Missing(tool) => SyncError::MissingTool(tool),
            ToolError::Spawn { tool, message } => SyncError::Tool { tool, message },
            ToolError::Failed { tool, message, .. } => SyncError::Tool { tool, message },
            ToolError::TimedOut { tool, after } => SyncError::Tool {
                tool,
                message: format!("timed out after {after:?}"),
            },
        }
    }
}
