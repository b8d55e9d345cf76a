//! Photo server client
//!
//! This module provides functionality for:
//! 1. The `ServerClient` trait the pipeline talks to
//! 2. Request and response types shared by every implementation
//! 3. Server error classification into recovery kinds
//!
//! Implementations: the HTTP client (`immich`), a dry-run wrapper that
//! short-circuits mutations, and an in-memory server for tests.

pub mod dry_run;
#[cfg(test)]
pub mod fake;
pub mod immich;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingest::asset::UploadContent;

/// Error types for server calls
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{endpoint}: status {status}: {message}")]
    Status {
        status: u16,
        endpoint: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type ServerResult<T> = Result<T, ServerError>;

/// How the pipeline recovers from an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NetworkTransient,
    ServerReject,
    ClientBug,
    IoReadable,
    ConfigFatal,
    CancelledContext,
}

impl ServerError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ServerError::Status { status, .. } => Some(*status),
            ServerError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::Status { status, .. } => match *status {
                408 | 429 | 500..=599 => ErrorKind::NetworkTransient,
                _ => ErrorKind::ServerReject,
            },
            ServerError::Http(e) => {
                if e.is_builder() || e.is_decode() {
                    ErrorKind::ClientBug
                } else if e.is_timeout() || e.is_connect() || e.is_request() {
                    ErrorKind::NetworkTransient
                } else if let Some(status) = e.status() {
                    if status.is_server_error() || status.as_u16() == 429 {
                        ErrorKind::NetworkTransient
                    } else {
                        ErrorKind::ServerReject
                    }
                } else {
                    ErrorKind::NetworkTransient
                }
            }
            ServerError::Io(_) => ErrorKind::IoReadable,
            ServerError::Json(_) => ErrorKind::ClientBug,
            ServerError::Config(_) => ErrorKind::ConfigFatal,
            ServerError::Cancelled => ErrorKind::CancelledContext,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::NetworkTransient
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub version: String,
    #[serde(default)]
    pub build: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetType {
    Image,
    Video,
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetType::Image => write!(f, "IMAGE"),
            AssetType::Video => write!(f, "VIDEO"),
        }
    }
}

/// An asset as the server knows it
#[derive(Debug, Clone, PartialEq)]
pub struct ServerAsset {
    pub id: String,
    pub device_asset_id: String,
    pub original_file_name: String,
    /// Base64 SHA-1 of the original
    pub checksum: String,
    pub size: u64,
    pub asset_type: AssetType,
    pub captured_at: Option<DateTime<Utc>>,
    pub albums: Vec<String>,
}

/// Fields sent along with an upload
#[derive(Debug, Clone)]
pub struct UploadMeta {
    pub device_asset_id: String,
    pub file_name: String,
    pub asset_type: AssetType,
    pub mime_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub favorite: bool,
    pub archived: bool,
    pub sidecar: Option<(String, Vec<u8>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Created,
    Duplicate,
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub id: String,
    pub status: UploadStatus,
}

/// Metadata pushed after upload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetUpdate {
    pub description: Option<String>,
    pub date_time_original: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub rating: Option<u8>,
    pub favorite: Option<bool>,
    pub archived: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerAlbum {
    pub id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerTag {
    pub id: String,
    pub name: String,
}

/// Queue state of one background job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobStatus {
    pub name: String,
    pub active: u64,
    pub waiting: u64,
    pub paused: bool,
}

/// Query for listing the assets of an account
#[derive(Debug, Clone, Default)]
pub struct AssetQuery {
    pub album: Option<String>,
    pub taken_after: Option<DateTime<Utc>>,
    pub taken_before: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ServerClient: Send + Sync {
    async fn ping(&self) -> ServerResult<()>;

    async fn validate_connection(&self) -> ServerResult<User>;

    async fn get_about(&self) -> ServerResult<ServerInfo>;

    fn set_device_uuid(&self, uuid: &str);

    fn device_uuid(&self) -> String;

    /// Find the server asset matching a local one: same device asset id,
    /// else same original file name (and capture time when both are known).
    async fn asset_by_signature(
        &self,
        device_asset_id: &str,
        original_file_name: &str,
        captured_at: Option<DateTime<Utc>>,
    ) -> ServerResult<Option<ServerAsset>>;

    /// Upload a file; with `replace` the new file takes over the given asset.
    async fn upload_asset(
        &self,
        content: UploadContent,
        meta: &UploadMeta,
        replace: Option<&str>,
    ) -> ServerResult<UploadResponse>;

    async fn update_asset(&self, id: &str, update: &AssetUpdate) -> ServerResult<()>;

    async fn get_albums(&self) -> ServerResult<Vec<ServerAlbum>>;

    async fn create_album(&self, title: &str, description: &str, asset_ids: &[String]) -> ServerResult<ServerAlbum>;

    async fn add_to_album(&self, album_id: &str, asset_ids: &[String]) -> ServerResult<()>;

    async fn upsert_tags(&self, names: &[String]) -> ServerResult<Vec<ServerTag>>;

    async fn tag_assets(&self, tag_id: &str, asset_ids: &[String]) -> ServerResult<()>;

    /// Stack assets; the first id is the cover.
    async fn create_stack(&self, asset_ids: &[String]) -> ServerResult<String>;

    async fn get_jobs(&self) -> ServerResult<Vec<JobStatus>>;

    async fn pause_job(&self, name: &str) -> ServerResult<()>;

    async fn resume_job(&self, name: &str) -> ServerResult<()>;

    async fn list_assets(&self, query: &AssetQuery) -> ServerResult<Vec<ServerAsset>>;

    async fn download_original(&self, id: &str) -> ServerResult<Vec<u8>>;
}
