use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Category, EntryKind, LocalLayout, ManifestEntry, ProjectId, RemoteLocator, human_size,
};
use crate::error::{SyncError, TransferError};
use crate::manifest::Manifest;
use crate::tool::{ToolInfo, ToolRunner};
use crate::transport::DownloadTransport;

#[derive(Debug, Clone, Serialize)]
pub struct IcaProject {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub tenant: String,
    pub region: String,
    pub active: bool,
    pub data_sharing_enabled: bool,
    pub billing_mode: String,
    pub time_created: String,
    pub time_modified: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IcaProjectData {
    pub id: String,
    pub name: String,
    pub data_type: EntryKind,
    pub path: String,
    pub file_size: u64,
    pub format: Option<String>,
    pub status: String,
    pub time_created: String,
    pub time_modified: String,
    pub project_id: String,
    pub project_name: String,
}

impl IcaProjectData {
    pub fn file_size_readable(&self) -> String {
        human_size(self.file_size)
    }

    pub fn into_entry(
        self,
        project: &ProjectId,
        layout: &LocalLayout,
    ) -> Result<ManifestEntry, SyncError> {
        let local_path = layout.local_path(Category::classify(&self.name), &self.name, &self.name);
        ManifestEntry::new(
            self.id.clone(),
            self.name,
            self.data_type,
            self.file_size,
            RemoteLocator::Ica {
                project_id: project.clone(),
                data_id: self.id,
                path: self.path,
            },
            local_path,
        )
    }
}

/// Builds a manifest from listed project data.
pub fn project_data_manifest(
    data: Vec<IcaProjectData>,
    project: &ProjectId,
    layout: &LocalLayout,
) -> Result<Manifest, SyncError> {
    let entries = data
        .into_iter()
        .map(|item| item.into_entry(project, layout))
        .collect::<Result<Vec<_>, SyncError>>()?;
    Manifest::new(entries)
}

pub trait IcaClient: Send + Sync {
    fn list_projects(&self) -> Result<Vec<IcaProject>, SyncError>;
    fn list_project_data(&self, project: &ProjectId) -> Result<Vec<IcaProjectData>, SyncError>;
    fn download_data(
        &self,
        project: &ProjectId,
        data_id: &str,
        destination: &Utf8Path,
    ) -> Result<(), TransferError>;
    fn tool_info(&self) -> ToolInfo;
}

impl<C: IcaClient + ?Sized> IcaClient for Arc<C> {
    fn list_projects(&self) -> Result<Vec<IcaProject>, SyncError> {
        (**self).list_projects()
    }

    fn list_project_data(&self, project: &ProjectId) -> Result<Vec<IcaProjectData>, SyncError> {
        (**self).list_project_data(project)
    }

    fn download_data(
        &self,
        project: &ProjectId,
        data_id: &str,
        destination: &Utf8Path,
    ) -> Result<(), TransferError> {
        (**self).download_data(project, data_id, destination)
    }

    fn tool_info(&self) -> ToolInfo {
        (**self).tool_info()
    }
}

/// Talks to ICA through the `icav2` command-line client.
#[derive(Debug, Clone)]
pub struct IcaCliClient {
    icav2: ToolRunner,
    transfer_timeout: Option<Duration>,
}

impl IcaCliClient {
    pub fn new() -> Self {
        Self::with_runner(ToolRunner::locate("icav2"))
    }

    pub fn with_runner(icav2: ToolRunner) -> Self {
        Self {
            icav2,
            transfer_timeout: None,
        }
    }

    /// Kills a `projectdata download` that runs past `timeout`. Listing
    /// commands are not bounded.
    pub fn with_transfer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transfer_timeout = timeout;
        self
    }
}

impl Default for IcaCliClient {
    fn default() -> Self {
        Self::new()
    }
}

impl IcaClient for IcaCliClient {
    fn list_projects(&self) -> Result<Vec<IcaProject>, SyncError> {
        let args = ["projects", "list", "--output-format", "json"].map(String::from);
        let output = self.icav2.run(&args)?;
        parse_projects(&output.stdout)
    }

    fn list_project_data(&self, project: &ProjectId) -> Result<Vec<IcaProjectData>, SyncError> {
        let args = vec![
            "projectdata".to_string(),
            "list".to_string(),
            "--project-id".to_string(),
            project.as_str().to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ];
        let output = self.icav2.run(&args)?;
        parse_project_data(&output.stdout)
    }

    fn download_data(
        &self,
        project: &ProjectId,
        data_id: &str,
        destination: &Utf8Path,
    ) -> Result<(), TransferError> {
        let args = vec![
            "projectdata".to_string(),
            "download".to_string(),
            "--project-id".to_string(),
            project.as_str().to_string(),
            data_id.to_string(),
            destination.to_string(),
        ];
        self.icav2.run_within(&args, self.transfer_timeout)?;
        Ok(())
    }

    fn tool_info(&self) -> ToolInfo {
        self.icav2.info(&["version"])
    }
}

/// Download transport backed by an [`IcaClient`].
pub struct IcaTransport<C> {
    client: C,
}

impl<C: IcaClient> IcaTransport<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C: IcaClient> DownloadTransport for IcaTransport<C> {
    fn fetch(&self, entry: &ManifestEntry, destination: &Utf8Path) -> Result<(), TransferError> {
        match entry.remote() {
            RemoteLocator::Ica {
                project_id,
                data_id,
                ..
            } => self.client.download_data(project_id, data_id, destination),
            other => Err(TransferError::UnsupportedLocator(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ItemsResponse<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProject {
    id: String,
    name: String,
    owner_id: String,
    tenant_name: String,
    region: RawRegion,
    active: bool,
    data_sharing_enabled: bool,
    billing_mode: String,
    time_created: String,
    time_modified: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRegion {
    city_name: String,
}

#[derive(Debug, Deserialize)]
struct RawDataItem {
    id: Option<String>,
    details: Option<RawDataDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawDataDetails {
    name: Option<String>,
    data_type: Option<String>,
    path: Option<String>,
    file_size_in_bytes: Option<u64>,
    format: Option<RawFormat>,
    status: Option<String>,
    time_created: Option<String>,
    time_modified: Option<String>,
    owning_project_id: Option<String>,
    owning_project_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFormat {
    code: Option<String>,
}

pub fn parse_projects(json: &str) -> Result<Vec<IcaProject>, SyncError> {
    let response: ItemsResponse<RawProject> =
        serde_json::from_str(json).map_err(|err| SyncError::Response {
            tool: "icav2".to_string(),
            message: err.to_string(),
        })?;
    Ok(response
        .items
        .into_iter()
        .map(|raw| IcaProject {
            id: raw.id,
            name: raw.name,
            owner: raw.owner_id,
            tenant: raw.tenant_name,
            region: raw.region.city_name,
            active: raw.active,
            data_sharing_enabled: raw.data_sharing_enabled,
            billing_mode: raw.billing_mode,
            time_created: raw.time_created,
            time_modified: raw.time_modified,
        })
        .collect())
}

/// Parses `projectdata list` output. Items without an id, details or name
/// are rejected; missing sizes default to zero (folders carry none).
pub fn parse_project_data(json: &str) -> Result<Vec<IcaProjectData>, SyncError> {
    let response: ItemsResponse<RawDataItem> =
        serde_json::from_str(json).map_err(|err| SyncError::Manifest(err.to_string()))?;

    response
        .items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let id = item
                .id
                .filter(|id| !id.trim().is_empty())
                .ok_or_else(|| SyncError::Manifest(format!("project data #{index}: missing id")))?;
            let details = item.details.ok_or_else(|| {
                SyncError::Manifest(format!("project data {id}: missing details"))
            })?;
            let name = details
                .name
                .filter(|name| !name.trim().is_empty())
                .ok_or_else(|| SyncError::Manifest(format!("project data {id}: missing name")))?;
            Ok(IcaProjectData {
                id,
                name,
                data_type: details
                    .data_type
                    .as_deref()
                    .map(EntryKind::from_data_type)
                    .unwrap_or(EntryKind::Unknown),
                path: details.path.unwrap_or_default(),
                file_size: details.file_size_in_bytes.unwrap_or(0),
                format: details.format.and_then(|format| format.code),
                status: details.status.unwrap_or_else(|| "UNKNOWN".to_string()),
                time_created: details.time_created.unwrap_or_default(),
                time_modified: details.time_modified.unwrap_or_default(),
                project_id: details.owning_project_id.unwrap_or_default(),
                project_name: details.owning_project_name.unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const DATA_JSON: &str = r#"{
        "items": [
            {
                "id": "fil.a1",
                "details": {
                    "name": "S1_R1.fastq.gz",
                    "dataType": "FILE",
                    "path": "/run1/S1_R1.fastq.gz",
                    "fileSizeInBytes": 2048,
                    "format": {"code": "FASTQ"},
                    "status": "AVAILABLE",
                    "owningProjectId": "proj-1",
                    "owningProjectName": "wgs"
                }
            },
            {
                "id": "fol.b2",
                "details": {"name": "run1", "dataType": "FOLDER", "path": "/run1/"}
            }
        ]
    }"#;

    #[test]
    fn parse_data_listing() {
        let data = parse_project_data(DATA_JSON).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].data_type, EntryKind::File);
        assert_eq!(data[0].format.as_deref(), Some("FASTQ"));
        assert_eq!(data[0].file_size_readable(), "2.0KB");
        assert_eq!(data[1].data_type, EntryKind::Folder);
        assert_eq!(data[1].file_size, 0);
        assert_eq!(data[1].status, "UNKNOWN");
    }

    #[test]
    fn missing_id_is_a_manifest_error() {
        let json = r#"{"items": [{"details": {"name": "x.fq.gz"}}]}"#;
        assert_matches!(parse_project_data(json), Err(SyncError::Manifest(_)));
    }

    #[test]
    fn empty_listing() {
        assert!(parse_project_data("{}").unwrap().is_empty());
    }

    #[test]
    fn parse_project_listing() {
        let json = r#"{"items": [{
            "id": "proj-1", "name": "wgs", "ownerId": "u1", "tenantName": "lab",
            "region": {"cityName": "Seoul"}, "active": true, "dataSharingEnabled": false,
            "billingMode": "PROJECT", "timeCreated": "2024-01-01T00:00:00Z",
            "timeModified": "2024-01-02T00:00:00Z", "tags": {}
        }]}"#;
        let projects = parse_projects(json).unwrap();
        assert_eq!(projects[0].region, "Seoul");
        assert!(projects[0].active);
    }

    #[test]
    fn entries_land_in_output_dir() {
        let project: ProjectId = "proj-1".parse().unwrap();
        let layout = LocalLayout::Flat("/out".into());
        let manifest =
            project_data_manifest(parse_project_data(DATA_JSON).unwrap(), &project, &layout)
                .unwrap();
        let entry = &manifest.entries()[0];
        assert_eq!(entry.local_path(), "/out/S1_R1.fastq.gz");
        assert_eq!(entry.remote().to_string(), "ica://proj-1/fil.a1");
        assert_eq!(entry.remote().logical_path(), "/run1/S1_R1.fastq.gz");
    }

    #[cfg(unix)]
    #[test]
    fn hung_download_is_killed_at_deadline() {
        use std::os::unix::fs::PermissionsExt;

        use crate::error::ToolError;

        let temp = tempfile::tempdir().unwrap();
        let script = temp.path().join("icav2");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let client = IcaCliClient::with_runner(ToolRunner::with_program("icav2", &script))
            .with_transfer_timeout(Some(Duration::from_millis(100)));
        let project: ProjectId = "proj-1".parse().unwrap();
        let started = std::time::Instant::now();
        let err = client
            .download_data(&project, "fil.a1", Utf8Path::new("/tmp/S1_R1.fastq.gz"))
            .unwrap_err();
        assert_matches!(err, TransferError::Tool(ToolError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
