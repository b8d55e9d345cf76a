//! HTTP client for the Immich API
//!
//! This module provides functionality for:
//! 1. A pooled `reqwest` client authenticated with an API key
//! 2. Retries with exponential backoff, honouring `retry-after` on 429
//! 3. Streaming uploads straight from disk
//! 4. An optional API trace file, one line per call

use std::fs::OpenOptions;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::*;

const PAGE_SIZE: usize = 1000;

/// Connection settings for one server account
#[derive(Debug, Clone)]
pub struct ImmichConfig {
    pub url: String,
    pub api_key: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub skip_tls_verify: bool,
    pub retry_attempts: usize,
    pub base_retry_delay_ms: u64,
    pub api_trace: Option<PathBuf>,
}

impl Default for ImmichConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            user_agent: format!("photo_ingest/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 300,
            skip_tls_verify: false,
            retry_attempts: 3,
            base_retry_delay_ms: 1000,
            api_trace: None,
        }
    }
}

pub struct ImmichClient {
    config: ImmichConfig,
    base_url: String,
    client: Client,
    device_uuid: RwLock<String>,
    trace: Option<Mutex<std::fs::File>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetResponse {
    id: String,
    #[serde(default)]
    device_asset_id: String,
    #[serde(default)]
    original_file_name: String,
    #[serde(default)]
    checksum: String,
    #[serde(rename = "type", default)]
    asset_type: String,
    #[serde(default)]
    file_created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    exif_info: Option<ExifResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExifResponse {
    #[serde(default)]
    file_size_in_byte: Option<u64>,
    #[serde(default)]
    date_time_original: Option<DateTime<Utc>>,
}

impl From<AssetResponse> for ServerAsset {
    fn from(a: AssetResponse) -> Self {
        let (size, taken) = match &a.exif_info {
            Some(exif) => (exif.file_size_in_byte.unwrap_or(0), exif.date_time_original),
            None => (0, None),
        };
        ServerAsset {
            id: a.id,
            device_asset_id: a.device_asset_id,
            original_file_name: a.original_file_name,
            checksum: a.checksum,
            size,
            asset_type: if a.asset_type.eq_ignore_ascii_case("video") {
                AssetType::Video
            } else {
                AssetType::Image
            },
            captured_at: taken.or(a.file_created_at),
            albums: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    assets: SearchPage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    items: Vec<AssetResponse>,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumResponse {
    id: String,
    album_name: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct IdStatus {
    id: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct TagResponse {
    id: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    name: String,
}

impl ImmichClient {
    /// Create a new client
    pub fn new(config: ImmichConfig) -> ServerResult<Self> {
        if config.url.trim().is_empty() {
            return Err(ServerError::Config("missing server URL".to_string()));
        }
        if config.api_key.trim().is_empty() {
            return Err(ServerError::Config("missing API key".to_string()));
        }

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(30))
            .gzip(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .danger_accept_invalid_certs(config.skip_tls_verify)
            .build()?;

        let trace = match &config.api_trace {
            Some(path) => Some(Mutex::new(OpenOptions::new().create(true).append(true).open(path)?)),
            None => None,
        };

        let base_url = config
            .url
            .trim()
            .trim_end_matches('/')
            .trim_end_matches("/api")
            .to_string();
        info!(url = %base_url, "Initialized server client");

        Ok(Self {
            config,
            base_url,
            client,
            device_uuid: RwLock::new(String::new()),
            trace,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Host part of the URL, used to name remote sources
    pub fn host(&self) -> String {
        self.base_url
            .split("://")
            .last()
            .unwrap_or(&self.base_url)
            .split('/')
            .next()
            .unwrap_or("")
            .to_string()
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, endpoint))
            .header("x-api-key", &self.config.api_key)
            .header("Accept", "application/json")
    }

    fn trace_call(&self, method: &str, endpoint: &str, status: Option<StatusCode>, elapsed: Duration) {
        if let Some(trace) = &self.trace {
            let status = status.map(|s| s.as_u16().to_string()).unwrap_or_else(|| "ERR".to_string());
            let mut file = trace.lock();
            let _ = writeln!(
                file,
                "{} {} {} {} {}ms",
                Utc::now().to_rfc3339(),
                method,
                endpoint,
                status,
                elapsed.as_millis()
            );
        }
    }

    /// Calculate the backoff duration using exponential backoff
    fn calculate_backoff(attempt: usize, base_delay_ms: u64) -> u64 {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let max_delay = 60_000;
        let delay = (1u64 << exponent) * base_delay_ms;
        std::cmp::min(delay, max_delay)
    }

    /// Send a request built by `build`, retrying transient failures.
    ///
    /// Non-success statuses that are not worth retrying come back as `ServerError::Status`.
    async fn send_with_retry<F, Fut>(&self, method: &str, endpoint: &str, build: F) -> ServerResult<Response>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ServerResult<RequestBuilder>>,
    {
        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            if attempts > 1 {
                debug!(endpoint, attempt = attempts, "Retrying server call");
            }

            let started = Instant::now();
            let response = match build().await?.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    self.trace_call(method, endpoint, None, started.elapsed());
                    warn!(endpoint, error = %e, "Request error");
                    let err = ServerError::Http(e);
                    if !err.is_transient() || attempts >= max_attempts {
                        return Err(err);
                    }
                    let backoff = Self::calculate_backoff(attempts, self.config.base_retry_delay_ms);
                    info!("Backing off for {}ms before retry", backoff);
                    sleep(Duration::from_millis(backoff)).await;
                    continue;
                }
            };
            let status = response.status();
            self.trace_call(method, endpoint, Some(status), started.elapsed());

            if status == StatusCode::TOO_MANY_REQUESTS && attempts < max_attempts {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(self.config.base_retry_delay_ms / 1000);
                info!("Backing off for {}s due to rate limiting", retry_after);
                sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            if status.is_success() {
                return Ok(response);
            }

            if status.is_server_error() && attempts < max_attempts {
                warn!(endpoint, %status, "Server error");
                let backoff = Self::calculate_backoff(attempts, self.config.base_retry_delay_ms);
                info!("Backing off for {}ms before retry", backoff);
                sleep(Duration::from_millis(backoff)).await;
                continue;
            }

            let message = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&message)
                .ok()
                .and_then(|v| v.get("message").map(|m| m.to_string().trim_matches('"').to_string()))
                .unwrap_or(message);
            return Err(ServerError::Status {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
                message,
            });
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> ServerResult<T> {
        let resp = self
            .send_with_retry("GET", endpoint, || async { Ok(self.request(Method::GET, endpoint)) })
            .await?;
        Ok(resp.json().await?)
    }

    async fn send_json(&self, method: Method, endpoint: &str, body: &Value) -> ServerResult<Response> {
        let name = method.to_string();
        self.send_with_retry(&name, endpoint, || {
            let method = method.clone();
            async move { Ok(self.request(method, endpoint).json(body)) }
        })
        .await
    }

    async fn search(&self, mut filter: Value) -> ServerResult<Vec<ServerAsset>> {
        let mut out = Vec::new();
        let mut page = 1;
        loop {
            filter["page"] = json!(page);
            filter["size"] = json!(PAGE_SIZE);
            filter["withExif"] = json!(true);
            let resp = self.send_json(Method::POST, "/api/search/metadata", &filter).await?;
            let result: SearchResponse = resp.json().await?;
            out.extend(result.assets.items.into_iter().map(ServerAsset::from));
            match result.assets.next_page.and_then(|p| p.parse::<usize>().ok()) {
                Some(next) => page = next,
                None => break,
            }
        }
        Ok(out)
    }

    async fn upload_form(&self, content: UploadContent, meta: &UploadMeta) -> ServerResult<Form> {
        let body_part = match content {
            UploadContent::File(path) => {
                let file = tokio::fs::File::open(&path).await?;
                Part::stream_with_length(Body::from(file), meta.size)
            }
            UploadContent::Bytes(bytes) => Part::bytes(bytes),
        };
        let body_part = body_part
            .file_name(meta.file_name.clone())
            .mime_str(&meta.mime_type)?;

        let mut form = Form::new()
            .text("deviceAssetId", meta.device_asset_id.clone())
            .text("deviceId", self.device_uuid())
            .text("assetType", meta.asset_type.to_string())
            .text("fileCreatedAt", meta.created_at.to_rfc3339())
            .text("fileModifiedAt", meta.modified_at.to_rfc3339())
            .text("isFavorite", meta.favorite.to_string())
            .text("fileExtension", crate::ingest::media::extension(&meta.file_name))
            .text("duration", "0:00:00.000000")
            .text("isReadOnly", "false")
            .part("assetData", body_part);
        if meta.archived {
            form = form.text("visibility", "archive");
        }
        if let Some((name, bytes)) = &meta.sidecar {
            form = form.part(
                "sidecarData",
                Part::bytes(bytes.clone())
                    .file_name(name.clone())
                    .mime_str("application/xml")?,
            );
        }
        Ok(form)
    }
}

#[async_trait]
impl ServerClient for ImmichClient {
    async fn ping(&self) -> ServerResult<()> {
        let v: Value = self.get_json("/api/server/ping").await?;
        if v.get("res").and_then(|r| r.as_str()) == Some("pong") {
            Ok(())
        } else {
            Err(ServerError::Status {
                status: 200,
                endpoint: "/api/server/ping".to_string(),
                message: format!("unexpected answer: {}", v),
            })
        }
    }

    #[instrument(skip(self))]
    async fn validate_connection(&self) -> ServerResult<User> {
        let user: User = self.get_json("/api/users/me").await?;
        info!(user = %user.email, "Connected to server");
        Ok(user)
    }

    async fn get_about(&self) -> ServerResult<ServerInfo> {
        self.get_json("/api/server/about").await
    }

    fn set_device_uuid(&self, uuid: &str) {
        *self.device_uuid.write() = uuid.to_string();
    }

    fn device_uuid(&self) -> String {
        self.device_uuid.read().clone()
    }

    async fn asset_by_signature(
        &self,
        device_asset_id: &str,
        original_file_name: &str,
        captured_at: Option<DateTime<Utc>>,
    ) -> ServerResult<Option<ServerAsset>> {
        let by_id = self
            .search(json!({ "deviceAssetId": device_asset_id, "deviceId": self.device_uuid() }))
            .await?;
        if let Some(found) = by_id.into_iter().next() {
            return Ok(Some(found));
        }
        let by_name = self.search(json!({ "originalFileName": original_file_name })).await?;
        Ok(by_name.into_iter().find(|a| {
            a.original_file_name == original_file_name
                && match (a.captured_at, captured_at) {
                    (Some(x), Some(y)) => (x - y).num_seconds().abs() < 1,
                    _ => true,
                }
        }))
    }

    #[instrument(skip(self, content, meta), fields(file = %meta.file_name))]
    async fn upload_asset(
        &self,
        content: UploadContent,
        meta: &UploadMeta,
        replace: Option<&str>,
    ) -> ServerResult<UploadResponse> {
        let result = self
            .send_with_retry("POST", "/api/assets", || {
                let content = content.clone();
                async move { Ok(self.request(Method::POST, "/api/assets").multipart(self.upload_form(content, meta).await?)) }
            })
            .await;
        let resp = match result {
            Err(ServerError::Status { status: 413, endpoint, .. }) => {
                return Err(ServerError::Status {
                    status: 413,
                    endpoint,
                    message: format!("file too large ({:.1} MB)", meta.size as f64 / (1024.0 * 1024.0)),
                });
            }
            other => other?,
        };
        let created: IdStatus = resp.json().await?;
        if created.status == "duplicate" {
            return Ok(UploadResponse {
                id: created.id,
                status: UploadStatus::Duplicate,
            });
        }

        let Some(old_id) = replace else {
            return Ok(UploadResponse {
                id: created.id,
                status: UploadStatus::Created,
            });
        };

        // Carry albums, stacks and favorites over, then drop the old asset.
        self.send_json(
            Method::PUT,
            "/api/assets/copy",
            &json!({ "sourceId": old_id, "targetId": created.id }),
        )
        .await?;
        self.send_json(Method::DELETE, "/api/assets", &json!({ "ids": [old_id], "force": true }))
            .await?;
        Ok(UploadResponse {
            id: created.id,
            status: UploadStatus::Replaced,
        })
    }

    async fn update_asset(&self, id: &str, update: &AssetUpdate) -> ServerResult<()> {
        let mut body = json!({});
        if let Some(d) = &update.description {
            body["description"] = json!(d);
        }
        if let Some(t) = update.date_time_original {
            body["dateTimeOriginal"] = json!(t.to_rfc3339());
        }
        if let (Some(lat), Some(lon)) = (update.latitude, update.longitude) {
            body["latitude"] = json!(lat);
            body["longitude"] = json!(lon);
        }
        if let Some(r) = update.rating {
            body["rating"] = json!(r);
        }
        if let Some(f) = update.favorite {
            body["isFavorite"] = json!(f);
        }
        if let Some(true) = update.archived {
            body["visibility"] = json!("archive");
        }
        self.send_json(Method::PUT, &format!("/api/assets/{}", id), &body).await?;
        Ok(())
    }

    async fn get_albums(&self) -> ServerResult<Vec<ServerAlbum>> {
        let albums: Vec<AlbumResponse> = self.get_json("/api/albums").await?;
        Ok(albums
            .into_iter()
            .map(|a| ServerAlbum {
                id: a.id,
                title: a.album_name,
                description: a.description,
            })
            .collect())
    }

    async fn create_album(&self, title: &str, description: &str, asset_ids: &[String]) -> ServerResult<ServerAlbum> {
        let resp = self
            .send_json(
                Method::POST,
                "/api/albums",
                &json!({ "albumName": title, "description": description, "assetIds": asset_ids }),
            )
            .await?;
        let album: AlbumResponse = resp.json().await?;
        Ok(ServerAlbum {
            id: album.id,
            title: album.album_name,
            description: album.description,
        })
    }

    async fn add_to_album(&self, album_id: &str, asset_ids: &[String]) -> ServerResult<()> {
        self.send_json(
            Method::PUT,
            &format!("/api/albums/{}/assets", album_id),
            &json!({ "ids": asset_ids }),
        )
        .await?;
        Ok(())
    }

    async fn upsert_tags(&self, names: &[String]) -> ServerResult<Vec<ServerTag>> {
        let resp = self.send_json(Method::PUT, "/api/tags", &json!({ "tags": names })).await?;
        let tags: Vec<TagResponse> = resp.json().await?;
        Ok(tags
            .into_iter()
            .map(|t| ServerTag {
                id: t.id,
                name: if t.value.is_empty() { t.name } else { t.value },
            })
            .collect())
    }

    async fn tag_assets(&self, tag_id: &str, asset_ids: &[String]) -> ServerResult<()> {
        self.send_json(
            Method::PUT,
            &format!("/api/tags/{}/assets", tag_id),
            &json!({ "ids": asset_ids }),
        )
        .await?;
        Ok(())
    }

    async fn create_stack(&self, asset_ids: &[String]) -> ServerResult<String> {
        let resp = self
            .send_json(Method::POST, "/api/stacks", &json!({ "assetIds": asset_ids }))
            .await?;
        let stack: IdOnly = resp.json().await?;
        Ok(stack.id)
    }

    async fn get_jobs(&self) -> ServerResult<Vec<JobStatus>> {
        let jobs: serde_json::Map<String, Value> = self.get_json("/api/jobs").await?;
        Ok(jobs
            .into_iter()
            .map(|(name, v)| JobStatus {
                name,
                active: v["jobCounts"]["active"].as_u64().unwrap_or(0),
                waiting: v["jobCounts"]["waiting"].as_u64().unwrap_or(0),
                paused: v["queueStatus"]["isPaused"].as_bool().unwrap_or(false),
            })
            .collect())
    }

    async fn pause_job(&self, name: &str) -> ServerResult<()> {
        self.send_json(
            Method::PUT,
            &format!("/api/jobs/{}", name),
            &json!({ "command": "pause", "force": false }),
        )
        .await?;
        Ok(())
    }

    async fn resume_job(&self, name: &str) -> ServerResult<()> {
        self.send_json(
            Method::PUT,
            &format!("/api/jobs/{}", name),
            &json!({ "command": "resume", "force": false }),
        )
        .await?;
        Ok(())
    }

    async fn list_assets(&self, query: &AssetQuery) -> ServerResult<Vec<ServerAsset>> {
        let mut filter = json!({});
        if let Some(after) = query.taken_after {
            filter["takenAfter"] = json!(after.to_rfc3339());
        }
        if let Some(before) = query.taken_before {
            filter["takenBefore"] = json!(before.to_rfc3339());
        }
        if let Some(title) = &query.album {
            let albums = self.get_albums().await?;
            let Some(album) = albums.into_iter().find(|a| &a.title == title) else {
                warn!(album = %title, "Album not found on server");
                return Ok(Vec::new());
            };
            filter["albumIds"] = json!([album.id]);
        }
        self.search(filter).await
    }

    async fn download_original(&self, id: &str) -> ServerResult<Vec<u8>> {
        let endpoint = format!("/api/assets/{}/original", id);
        let resp = self
            .send_with_retry("GET", &endpoint, || async { Ok(self.request(Method::GET, &endpoint)) })
            .await?;
        let mut body = Vec::with_capacity(resp.content_length().unwrap_or(0) as usize);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body)
    }
}
