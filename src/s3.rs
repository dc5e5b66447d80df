use std::time::Duration;

use camino::Utf8Path;
use serde::Deserialize;

use crate::domain::BucketName;
use crate::error::{SyncError, TransferError};
use crate::tool::{ToolInfo, ToolRunner};
use crate::transport::ObjectStore;

pub const DEFAULT_REGION: &str = "ap-northeast-2";

/// S3 access through the `aws` CLI. Credentials come from the CLI's own
/// profile chain.
#[derive(Debug, Clone)]
pub struct AwsCliStore {
    aws: ToolRunner,
    region: String,
    transfer_timeout: Option<Duration>,
}

impl AwsCliStore {
    pub fn new(region: impl Into<String>) -> Self {
        Self::with_runner(ToolRunner::locate("aws"), region)
    }

    pub fn with_runner(aws: ToolRunner, region: impl Into<String>) -> Self {
        Self {
            aws,
            region: region.into(),
            transfer_timeout: None,
        }
    }

    /// Kills an `s3 cp` that runs past `timeout`.
    pub fn with_transfer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn tool_info(&self) -> ToolInfo {
        self.aws.info(&["--version"])
    }

    fn args(&self, args: &[&str]) -> Vec<String> {
        args.iter()
            .map(|arg| arg.to_string())
            .chain(["--region".to_string(), self.region.clone()])
            .collect()
    }
}

impl ObjectStore for AwsCliStore {
    fn bucket_exists(&self, bucket: &BucketName) -> Result<bool, SyncError> {
        let output = self
            .aws
            .run(&self.args(&["s3api", "list-buckets", "--output", "json"]))?;
        Ok(parse_bucket_names(&output.stdout)?
            .iter()
            .any(|name| name == bucket.as_str()))
    }

    fn create_bucket(&self, bucket: &BucketName) -> Result<(), SyncError> {
        let mut args = vec![
            "s3api".to_string(),
            "create-bucket".to_string(),
            "--bucket".to_string(),
            bucket.to_string(),
        ];
        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            args.push("--create-bucket-configuration".to_string());
            args.push(format!("LocationConstraint={}", self.region));
        }
        args.push("--region".to_string());
        args.push(self.region.clone());
        self.aws.run(&args)?;
        tracing::info!(%bucket, region = %self.region, "created bucket");
        Ok(())
    }

    fn list_objects(&self, bucket: &BucketName) -> Result<Vec<String>, SyncError> {
        let output = self.aws.run(&self.args(&[
            "s3api",
            "list-objects-v2",
            "--bucket",
            bucket.as_str(),
            "--output",
            "json",
        ]))?;
        parse_object_keys(&output.stdout)
    }

    fn put_object(
        &self,
        source: &Utf8Path,
        bucket: &BucketName,
        key: &str,
    ) -> Result<(), TransferError> {
        let target = format!("s3://{bucket}/{key}");
        let args = self.args(&[
            "s3",
            "cp",
            "--only-show-errors",
            source.as_str(),
            target.as_str(),
        ]);
        self.aws.run_within(&args, self.transfer_timeout)?;
        Ok(())
    }

    fn presign(
        &self,
        bucket: &BucketName,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, TransferError> {
        let target = format!("s3://{bucket}/{key}");
        let expires = expires_in.as_secs().to_string();
        let output = self.aws.run(&self.args(&[
            "s3",
            "presign",
            target.as_str(),
            "--expires-in",
            expires.as_str(),
        ]))?;
        let url = output.stdout.trim();
        if url.is_empty() {
            return Err(TransferError::Http(format!("empty presigned URL for {target}")));
        }
        Ok(url.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketsResponse {
    #[serde(default)]
    buckets: Vec<BucketItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BucketItem {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListObjectsResponse {
    #[serde(default)]
    contents: Vec<ObjectItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectItem {
    key: String,
}

fn response_error(err: serde_json::Error) -> SyncError {
    SyncError::Response {
        tool: "aws".to_string(),
        message: err.to_string(),
    }
}

pub fn parse_bucket_names(json: &str) -> Result<Vec<String>, SyncError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let response: ListBucketsResponse = serde_json::from_str(json).map_err(response_error)?;
    Ok(response.buckets.into_iter().map(|item| item.name).collect())
}

/// Keys from `list-objects-v2`. An empty bucket prints no `Contents` (or
/// nothing at all).
pub fn parse_object_keys(json: &str) -> Result<Vec<String>, SyncError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let response: ListObjectsResponse = serde_json::from_str(json).map_err(response_error)?;
    Ok(response.contents.into_iter().map(|item| item.key).collect())
}
