use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use ngs_sync::config::{Config, ConfigLoader, RsyncEntry};
use ngs_sync::error::SyncError;

#[test]
fn resolve_from_explicit_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ngs-sync.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "workers": 8,
            "timeout_secs": 3600,
            "presign_expiry_secs": 86400,
            "region": "us-west-2",
            "fastq_suffixes": [".fastq.gz"],
            "rsync": {
                "user": "seq",
                "host": "archive01",
                "remote_root": "/data/analysis",
                "local_root": "/archive"
            }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.source.as_deref(), Some(path.as_path()));
    assert_eq!(resolved.workers, 8);
    assert_eq!(resolved.timeout, Some(Duration::from_secs(3600)));
    assert_eq!(resolved.presign_expiry, Duration::from_secs(86_400));
    assert_eq!(resolved.region, "us-west-2");
    assert_eq!(resolved.fastq_suffixes, vec![".fastq.gz"]);
    let rsync = resolved.rsync().unwrap();
    assert_eq!(rsync.local_root, "/archive");
    assert_eq!(rsync.log_dir, "ngs-sync.log");
}

#[test]
fn explicit_file_must_exist() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(SyncError::ConfigRead(_))
    );
}

#[test]
fn malformed_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ngs-sync.json");
    fs::write(&path, "{ workers: 4").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(SyncError::ConfigParse(_))
    );
}

#[test]
fn untagged_rsync_entry() {
    let config: Config = serde_json::from_str(r#"{"rsync": "seq@archive01:/data"}"#).unwrap();
    assert_matches!(config.rsync, Some(RsyncEntry::Shorthand(_)));

    let config: Config = serde_json::from_str(
        r#"{"rsync": {"user": "seq", "host": "h", "remote_root": "/d", "local_root": "/l"}}"#,
    )
    .unwrap();
    assert_matches!(config.rsync, Some(RsyncEntry::Detailed(_)));
}

#[test]
fn archive_needs_rsync_block() {
    let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert_matches!(resolved.rsync(), Err(SyncError::Configuration(_)));
}

#[test]
fn rejects_zero_durations() {
    let config = Config {
        presign_expiry_secs: Some(0),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(SyncError::Configuration(_))
    );

    let config = Config {
        timeout_secs: Some(0),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(SyncError::Configuration(_))
    );
}
