use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::domain::{Category, EntryKind, ManifestEntry, RemoteLocator, SampleId};
use crate::error::{SyncError, ToolError, TransferError};
use crate::manifest::Manifest;
use crate::tool::{ToolInfo, ToolRunner};
use crate::transport::DownloadTransport;

/// rsync exit status for "some files could not be transferred", which is
/// what a missing source path produces.
const PARTIAL_TRANSFER: &str = "23";

/// Where per-sample artifacts live on the archive host and where they land
/// locally.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RsyncConfig {
    pub user: String,
    pub host: String,
    pub remote_root: Utf8PathBuf,
    pub local_root: Utf8PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: Utf8PathBuf,
}

fn default_log_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("ngs-sync.log")
}

/// Reads one sample id per line; blank lines and `#` comments are ignored.
pub fn read_sample_ids(path: &Utf8Path) -> Result<Vec<SampleId>, SyncError> {
    let contents = fs::read_to_string(path.as_std_path())
        .map_err(|_| SyncError::ManifestRead(path.as_std_path().to_path_buf()))?;
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::parse)
        .collect()
}

/// Size column of an `rsync --list-only` line, e.g.
/// `-rw-r--r--  1,234,567 2024/03/01 10:00:00 S1.cram`.
pub fn parse_list_only_size(line: &str) -> Option<u64> {
    line.split_whitespace()
        .nth(1)
        .and_then(|size| size.replace(',', "").parse().ok())
}

/// `$ command`, then stdout, then stderr, each part ending in a newline.
fn log_record(command: &str, stdout: &str, stderr: &str) -> String {
    let mut text = format!("$ {command}\n");
    for part in [stdout, stderr] {
        if part.is_empty() {
            continue;
        }
        text.push_str(part);
        if !part.ends_with('\n') {
            text.push('\n');
        }
    }
    text
}

pub struct RsyncClient {
    rsync: ToolRunner,
    config: RsyncConfig,
    log_lock: Mutex<()>,
    transfer_timeout: Option<Duration>,
}

impl RsyncClient {
    pub fn new(config: RsyncConfig) -> Self {
        Self::with_runner(ToolRunner::locate("rsync"), config)
    }

    pub fn with_runner(rsync: ToolRunner, config: RsyncConfig) -> Self {
        Self {
            rsync,
            config,
            log_lock: Mutex::new(()),
            transfer_timeout: None,
        }
    }

    /// Kills an `rsync -Plrvh` that runs past `timeout`.
    pub fn with_transfer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn config(&self) -> &RsyncConfig {
        &self.config
    }

    pub fn tool_info(&self) -> ToolInfo {
        self.rsync.info(&["--version"])
    }

    fn locator(&self, path: Utf8PathBuf) -> RemoteLocator {
        RemoteLocator::Rsync {
            user: self.config.user.clone(),
            host: self.config.host.clone(),
            path,
        }
    }

    /// Remote file size, or `None` when the path does not exist.
    pub fn remote_size(&self, remote: &RemoteLocator) -> Result<Option<u64>, SyncError> {
        let args = vec!["--list-only".to_string(), remote.to_string()];
        match self.rsync.run(&args) {
            Ok(output) => Ok(output.stdout.lines().find_map(parse_list_only_size)),
            Err(ToolError::Failed { code, .. }) if code == PARTIAL_TRANSFER => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// One entry per sample and category. Artifacts missing on the remote
    /// host are left out with a warning.
    pub fn sample_manifest(
        &self,
        samples: &[SampleId],
        categories: &[Category],
    ) -> Result<Manifest, SyncError> {
        let mut entries = Vec::with_capacity(samples.len() * categories.len());
        for sample in samples {
            for &category in categories {
                let remote_path = category.remote_sample_path(&self.config.remote_root, sample);
                let remote = self.locator(remote_path);
                let Some(size) = self.remote_size(&remote)? else {
                    tracing::warn!(
                        %sample,
                        %category,
                        remote = %remote,
                        "artifact not found on remote host"
                    );
                    continue;
                };
                let entry = ManifestEntry::new(
                    format!("{sample}:{category}"),
                    format!("{sample}{}", category.suffix()),
                    EntryKind::File,
                    size,
                    remote,
                    category.local_path(&self.config.local_root, sample.as_str()),
                )?
                .with_category(category);
                entries.push(entry);
            }
        }
        Manifest::new(entries)
    }

    fn log_path(&self, entry: &ManifestEntry) -> Utf8PathBuf {
        let sample = entry
            .identifier()
            .split_once(':')
            .map(|(sample, _)| sample)
            .unwrap_or(entry.identifier());
        self.config.log_dir.join(format!("{sample}.log"))
    }

    fn append_log(
        &self,
        path: &Utf8Path,
        command: &str,
        stdout: &str,
        stderr: &str,
    ) -> std::io::Result<()> {
        let _guard = self
            .log_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())?;
        file.write_all(log_record(command, stdout, stderr).as_bytes())
    }
}

impl DownloadTransport for RsyncClient {
    fn fetch(&self, entry: &ManifestEntry, destination: &Utf8Path) -> Result<(), TransferError> {
        if !matches!(entry.remote(), RemoteLocator::Rsync { .. }) {
            return Err(TransferError::UnsupportedLocator(entry.remote().to_string()));
        }
        let args = vec![
            "-Plrvh".to_string(),
            entry.remote().to_string(),
            destination.to_string(),
        ];
        let log = self.log_path(entry);
        tracing::info!(entry = entry.display_name(), log = %log, "starting rsync");

        let output = self.rsync.output_within(&args, self.transfer_timeout)?;
        let command = format!("rsync {}", args.join(" "));
        if let Err(err) = self.append_log(&log, &command, &output.stdout, &output.stderr) {
            tracing::warn!(log = %log, error = %err, "failed to write rsync log");
        }
        if output.success {
            return Ok(());
        }
        Err(ToolError::Failed {
            tool: self.rsync.name().to_string(),
            code: output
                .code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            message: format!("see {log}"),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Utf8Path) -> RsyncConfig {
        RsyncConfig {
            user: "seq".to_string(),
            host: "archive01".to_string(),
            remote_root: "/data/analysis".into(),
            local_root: root.join("local"),
            log_dir: root.join("logs"),
        }
    }

    fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, root)
    }

    #[test]
    fn list_only_sizes() {
        assert_eq!(
            parse_list_only_size("-rw-r--r--  1,234,567 2024/03/01 10:00:00 S1.cram"),
            Some(1_234_567)
        );
        assert_eq!(parse_list_only_size("receiving file list ... done"), None);
        assert_eq!(parse_list_only_size(""), None);
    }

    #[test]
    fn sample_ids_skip_comments() {
        let (_temp, root) = temp_root();
        let path = root.join("samples.txt");
        fs::write(&path, "# batch 7\nNA12878\n\n  NA12891  \n").unwrap();
        let ids = read_sample_ids(&path).unwrap();
        let ids = ids.iter().map(SampleId::as_str).collect::<Vec<_>>();
        assert_eq!(ids, vec!["NA12878", "NA12891"]);
    }

    #[test]
    fn bad_sample_id() {
        let (_temp, root) = temp_root();
        let path = root.join("samples.txt");
        fs::write(&path, "NA 12878\n").unwrap();
        assert!(read_sample_ids(&path).is_err());
    }

    #[cfg(unix)]
    fn fake_rsync(root: &Utf8Path, body: &str) -> ToolRunner {
        use std::os::unix::fs::PermissionsExt;
        let script = root.join("rsync");
        fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        ToolRunner::with_program("rsync", script.as_std_path())
    }

    #[cfg(unix)]
    #[test]
    fn manifest_uses_archive_layout_and_drops_missing() {
        let (_temp, root) = temp_root();
        let rsync = fake_rsync(
            &root,
            r#"case "$2" in
  *.cram) echo "-rw-r--r--  2,048 2024/03/01 10:00:00 x.cram" ;;
  *) echo "rsync: link_stat failed" >&2; exit 23 ;;
esac"#,
        );
        let client = RsyncClient::with_runner(rsync, config(&root));
        let samples = vec!["NA12878".parse().unwrap()];
        let manifest = client
            .sample_manifest(&samples, &[Category::Cram, Category::Gvcf])
            .unwrap();

        assert_eq!(manifest.len(), 1);
        let entry = &manifest.entries()[0];
        assert_eq!(entry.identifier(), "NA12878:cram");
        assert_eq!(entry.size_bytes(), 2048);
        assert_eq!(entry.local_path(), root.join("local/cram/NA12878.cram"));
        assert_eq!(
            entry.remote().to_string(),
            "seq@archive01:/data/analysis/Sample_NA12878/NA12878.cram"
        );
    }

    #[cfg(unix)]
    #[test]
    fn fetch_appends_stdout_then_stderr() {
        let (_temp, root) = temp_root();
        let rsync = fake_rsync(&root, "echo sent; echo warn >&2; printf 'ACGT' > \"$3\"");
        let client = RsyncClient::with_runner(rsync, config(&root));
        let entry = ManifestEntry::new(
            "NA12878:cram",
            "NA12878.cram",
            EntryKind::File,
            4,
            client.locator("/data/analysis/Sample_NA12878/NA12878.cram".into()),
            root.join("NA12878.cram"),
        )
        .unwrap();

        client.fetch(&entry, entry.local_path()).unwrap();
        client.fetch(&entry, entry.local_path()).unwrap();

        let log = fs::read_to_string(root.join("logs/NA12878.log")).unwrap();
        let lines = log.lines().filter(|line| !line.starts_with('$')).collect::<Vec<_>>();
        assert_eq!(lines, vec!["sent", "warn", "sent", "warn"]);
    }

    #[test]
    fn log_record_keeps_streams_on_separate_lines() {
        assert_eq!(
            log_record("rsync -Plrvh a b", "sent 4 bytes", "warning: partial"),
            "$ rsync -Plrvh a b\nsent 4 bytes\nwarning: partial\n"
        );
        assert_eq!(log_record("rsync x", "done\n", ""), "$ rsync x\ndone\n");
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_log_does_not_fail_transfer() {
        let (_temp, root) = temp_root();
        fs::write(root.join("blocker"), b"").unwrap();
        let rsync = fake_rsync(&root, "echo sent; printf 'ACGT' > \"$3\"");
        let mut config = config(&root);
        config.log_dir = root.join("blocker").join("logs");
        let client = RsyncClient::with_runner(rsync, config);
        let entry = ManifestEntry::new(
            "NA12878:cram",
            "NA12878.cram",
            EntryKind::File,
            4,
            client.locator("/data/analysis/Sample_NA12878/NA12878.cram".into()),
            root.join("NA12878.cram"),
        )
        .unwrap();

        client.fetch(&entry, entry.local_path()).unwrap();
        assert_eq!(fs::read(root.join("NA12878.cram")).unwrap(), b"ACGT");
    }

    #[cfg(unix)]
    #[test]
    fn failed_rsync_is_a_transfer_error() {
        let (_temp, root) = temp_root();
        let rsync = fake_rsync(&root, "echo 'connection refused' >&2; exit 12");
        let client = RsyncClient::with_runner(rsync, config(&root));
        let entry = ManifestEntry::new(
            "S1:vcf",
            "S1.hard-filtered.vcf.gz",
            EntryKind::File,
            4,
            client.locator("/data/analysis/Sample_S1/S1.hard-filtered.vcf.gz".into()),
            root.join("S1.hard-filtered.vcf.gz"),
        )
        .unwrap();
        let err = client.fetch(&entry, entry.local_path()).unwrap_err();
        assert!(err.to_string().contains("status 12"));
    }
}
