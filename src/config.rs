use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::Deserialize;

use crate::classify::FASTQ_SUFFIXES;
use crate::coordinator::ParallelCoordinator;
use crate::error::SyncError;
use crate::report::DEFAULT_ACCESS_VALIDITY;
use crate::rsync::RsyncConfig;
use crate::s3::DEFAULT_REGION;

pub const CONFIG_FILE: &str = "ngs-sync.json";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub presign_expiry_secs: Option<u64>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub fastq_suffixes: Option<Vec<String>>,
    #[serde(default)]
    pub rsync: Option<RsyncEntry>,
}

/// `"user@host:/remote/root"` or the full object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RsyncEntry {
    Shorthand(String),
    Detailed(RsyncConfig),
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub source: Option<PathBuf>,
    pub workers: usize,
    pub timeout: Option<Duration>,
    pub presign_expiry: Duration,
    pub region: String,
    pub fastq_suffixes: Vec<String>,
    pub rsync: Option<RsyncConfig>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            source: None,
            workers: ParallelCoordinator::DEFAULT_WORKERS,
            timeout: None,
            presign_expiry: DEFAULT_ACCESS_VALIDITY,
            region: DEFAULT_REGION.to_string(),
            fastq_suffixes: FASTQ_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            rsync: None,
        }
    }
}

impl ResolvedConfig {
    pub fn rsync(&self) -> Result<&RsyncConfig, SyncError> {
        self.rsync.as_ref().ok_or_else(|| {
            SyncError::Configuration(format!("no `rsync` block in {CONFIG_FILE}"))
        })
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist. Otherwise `./ngs-sync.json` is tried,
    /// then the user config directory, then built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SyncError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };
        let Some(config_path) = config_path else {
            tracing::debug!("no config file found; using defaults");
            return Ok(ResolvedConfig::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SyncError::ConfigParse(err.to_string()))?;
        tracing::debug!(path = %config_path.display(), "loaded config");

        let mut resolved = Self::resolve_config(config)?;
        resolved.source = Some(config_path);
        Ok(resolved)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("ngs-sync").join(CONFIG_FILE))
            .filter(|path| path.is_file())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SyncError> {
        let defaults = ResolvedConfig::default();

        let workers = config.workers.unwrap_or(defaults.workers);
        ParallelCoordinator::new(workers)?;

        let timeout = match config.timeout_secs {
            Some(0) => {
                return Err(SyncError::Configuration(
                    "timeout_secs must be positive".to_string(),
                ));
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };
        let presign_expiry = match config.presign_expiry_secs {
            Some(0) => {
                return Err(SyncError::Configuration(
                    "presign_expiry_secs must be positive".to_string(),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.presign_expiry,
        };

        let region = match config.region.map(|region| region.trim().to_string()) {
            Some(region) if region.is_empty() => {
                return Err(SyncError::Configuration("region is empty".to_string()));
            }
            Some(region) => region,
            None => defaults.region,
        };

        let fastq_suffixes = match config.fastq_suffixes {
            Some(suffixes) if suffixes.iter().all(|s| s.trim().is_empty()) => {
                return Err(SyncError::Configuration(
                    "fastq_suffixes must name at least one suffix".to_string(),
                ));
            }
            Some(suffixes) => suffixes
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.fastq_suffixes,
        };

        let rsync = config.rsync.map(resolve_rsync).transpose()?;

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            source: None,
            workers,
            timeout,
            presign_expiry,
            region,
            fastq_suffixes,
            rsync,
        })
    }
}

fn resolve_rsync(entry: RsyncEntry) -> Result<RsyncConfig, SyncError> {
    let config = match entry {
        RsyncEntry::Shorthand(value) => {
            let invalid = || {
                SyncError::Configuration(format!(
                    "rsync remote `{value}` is not in user@host:/path form"
                ))
            };
            let (login, remote_root) = value.split_once(':').ok_or_else(invalid)?;
            let (user, host) = login.split_once('@').ok_or_else(invalid)?;
            RsyncConfig {
                user: user.to_string(),
                host: host.to_string(),
                remote_root: Utf8PathBuf::from(remote_root),
                local_root: Utf8PathBuf::from("."),
                log_dir: Utf8PathBuf::from("ngs-sync.log"),
            }
        }
        RsyncEntry::Detailed(config) => config,
    };
    if config.user.is_empty() || config.host.is_empty() || config.remote_root.as_str().is_empty()
    {
        return Err(SyncError::Configuration(
            "rsync user, host and remote_root are required".to_string(),
        ));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.workers, 4);
        assert_eq!(resolved.presign_expiry, Duration::from_secs(604_800));
        assert_eq!(resolved.region, "ap-northeast-2");
        assert_eq!(resolved.fastq_suffixes, vec![".fq.gz", ".fastq.gz"]);
        assert!(resolved.timeout.is_none());
        assert!(resolved.rsync.is_none());
    }

    #[test]
    fn zero_workers_rejected() {
        let config = Config {
            workers: Some(0),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(SyncError::InvalidWorkers(0))
        );
    }

    #[test]
    fn rsync_shorthand() {
        let config: Config =
            serde_json::from_str(r#"{"rsync": "seq@archive01:/data/analysis"}"#).unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        let rsync = resolved.rsync().unwrap();
        assert_eq!(rsync.user, "seq");
        assert_eq!(rsync.host, "archive01");
        assert_eq!(rsync.remote_root, "/data/analysis");
    }

    #[test]
    fn rsync_shorthand_needs_login() {
        let config: Config = serde_json::from_str(r#"{"rsync": "archive01:/data"}"#).unwrap();
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(SyncError::Configuration(_))
        );
    }
}
