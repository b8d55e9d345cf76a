//! In-memory server used by tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::*;
use crate::ingest::hasher::sha1_bytes;

#[derive(Default)]
struct FakeState {
    assets: Vec<ServerAsset>,
    contents: HashMap<String, Vec<u8>>,
    albums: Vec<(ServerAlbum, Vec<String>)>,
    tags: Vec<(ServerTag, HashSet<String>)>,
    stacks: Vec<Vec<String>>,
    paused: HashSet<String>,
    updates: Vec<(String, AssetUpdate)>,
    fail_uploads: HashMap<String, u16>,
    device_uuid: String,
}

#[derive(Default)]
pub struct FakeServer {
    state: Mutex<FakeState>,
    pub upload_calls: AtomicUsize,
    pub pause_calls: AtomicUsize,
    pub resume_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_id(&self, prefix: &str) -> String {
        format!("{}-{:04}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Put an asset on the server before a run
    pub fn seed_asset(&self, device_asset_id: &str, file_name: &str, content: &[u8]) -> String {
        let id = self.new_id("asset");
        let mut state = self.state.lock();
        state.assets.push(ServerAsset {
            id: id.clone(),
            device_asset_id: device_asset_id.to_string(),
            original_file_name: file_name.to_string(),
            checksum: sha1_bytes(content),
            size: content.len() as u64,
            asset_type: AssetType::Image,
            captured_at: None,
            albums: Vec::new(),
        });
        state.contents.insert(id.clone(), content.to_vec());
        id
    }

    /// Reject uploads of `file_name` with the given status
    pub fn fail_upload(&self, file_name: &str, status: u16) {
        self.state.lock().fail_uploads.insert(file_name.to_string(), status);
    }

    pub fn assets(&self) -> Vec<ServerAsset> {
        self.state.lock().assets.clone()
    }

    pub fn album_members(&self) -> BTreeMap<String, Vec<String>> {
        self.state
            .lock()
            .albums
            .iter()
            .map(|(a, ids)| (a.title.clone(), ids.clone()))
            .collect()
    }

    pub fn tag_members(&self, name: &str) -> usize {
        self.state
            .lock()
            .tags
            .iter()
            .find(|(t, _)| t.name == name)
            .map(|(_, ids)| ids.len())
            .unwrap_or(0)
    }

    pub fn stacks(&self) -> Vec<Vec<String>> {
        self.state.lock().stacks.clone()
    }

    pub fn paused_jobs(&self) -> Vec<String> {
        let mut jobs: Vec<String> = self.state.lock().paused.iter().cloned().collect();
        jobs.sort();
        jobs
    }

    pub fn updates(&self) -> usize {
        self.state.lock().updates.len()
    }
}

fn read_content(content: UploadContent) -> ServerResult<Vec<u8>> {
    match content {
        UploadContent::File(path) => Ok(std::fs::read(path)?),
        UploadContent::Bytes(bytes) => Ok(bytes),
    }
}

#[async_trait]
impl ServerClient for FakeServer {
    async fn ping(&self) -> ServerResult<()> {
        Ok(())
    }

    async fn validate_connection(&self) -> ServerResult<User> {
        Ok(User {
            id: "user-1".to_string(),
            email: "test@example.com".to_string(),
            name: "Test".to_string(),
            is_admin: true,
        })
    }

    async fn get_about(&self) -> ServerResult<ServerInfo> {
        Ok(ServerInfo {
            version: "v1.130.0".to_string(),
            build: String::new(),
        })
    }

    fn set_device_uuid(&self, uuid: &str) {
        self.state.lock().device_uuid = uuid.to_string();
    }

    fn device_uuid(&self) -> String {
        self.state.lock().device_uuid.clone()
    }

    async fn asset_by_signature(
        &self,
        device_asset_id: &str,
        original_file_name: &str,
        captured_at: Option<DateTime<Utc>>,
    ) -> ServerResult<Option<ServerAsset>> {
        let state = self.state.lock();
        if let Some(a) = state.assets.iter().find(|a| a.device_asset_id == device_asset_id) {
            return Ok(Some(a.clone()));
        }
        Ok(state
            .assets
            .iter()
            .find(|a| {
                a.original_file_name == original_file_name
                    && match (a.captured_at, captured_at) {
                        (Some(x), Some(y)) => x == y,
                        _ => true,
                    }
            })
            .cloned())
    }

    async fn upload_asset(
        &self,
        content: UploadContent,
        meta: &UploadMeta,
        replace: Option<&str>,
    ) -> ServerResult<UploadResponse> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.state.lock().fail_uploads.get(&meta.file_name) {
            return Err(ServerError::Status {
                status: *status,
                endpoint: "/api/assets".to_string(),
                message: "rejected".to_string(),
            });
        }
        let bytes = read_content(content)?;
        let checksum = sha1_bytes(&bytes);

        let mut state = self.state.lock();
        if let Some(existing) = state.assets.iter().find(|a| a.checksum == checksum) {
            return Ok(UploadResponse {
                id: existing.id.clone(),
                status: UploadStatus::Duplicate,
            });
        }

        let asset = ServerAsset {
            id: String::new(),
            device_asset_id: meta.device_asset_id.clone(),
            original_file_name: meta.file_name.clone(),
            checksum,
            size: bytes.len() as u64,
            asset_type: meta.asset_type,
            captured_at: Some(meta.created_at),
            albums: Vec::new(),
        };

        if let Some(old_id) = replace {
            if let Some(old) = state.assets.iter_mut().find(|a| a.id == old_id) {
                let id = old.id.clone();
                *old = ServerAsset { id: id.clone(), ..asset };
                state.contents.insert(id.clone(), bytes);
                return Ok(UploadResponse {
                    id,
                    status: UploadStatus::Replaced,
                });
            }
        }

        drop(state);
        let id = self.new_id("asset");
        let mut state = self.state.lock();
        state.assets.push(ServerAsset { id: id.clone(), ..asset });
        state.contents.insert(id.clone(), bytes);
        Ok(UploadResponse {
            id,
            status: UploadStatus::Created,
        })
    }

    async fn update_asset(&self, id: &str, update: &AssetUpdate) -> ServerResult<()> {
        let mut state = self.state.lock();
        if let Some(date) = update.date_time_original {
            if let Some(a) = state.assets.iter_mut().find(|a| a.id == id) {
                a.captured_at = Some(date);
            }
        }
        state.updates.push((id.to_string(), update.clone()));
        Ok(())
    }

    async fn get_albums(&self) -> ServerResult<Vec<ServerAlbum>> {
        Ok(self.state.lock().albums.iter().map(|(a, _)| a.clone()).collect())
    }

    async fn create_album(&self, title: &str, description: &str, asset_ids: &[String]) -> ServerResult<ServerAlbum> {
        let album = ServerAlbum {
            id: self.new_id("album"),
            title: title.to_string(),
            description: description.to_string(),
        };
        self.state.lock().albums.push((album.clone(), asset_ids.to_vec()));
        Ok(album)
    }

    async fn add_to_album(&self, album_id: &str, asset_ids: &[String]) -> ServerResult<()> {
        let mut state = self.state.lock();
        let Some((_, members)) = state.albums.iter_mut().find(|(a, _)| a.id == album_id) else {
            return Err(ServerError::Status {
                status: 404,
                endpoint: format!("/api/albums/{}/assets", album_id),
                message: "album not found".to_string(),
            });
        };
        for id in asset_ids {
            if !members.contains(id) {
                members.push(id.clone());
            }
        }
        Ok(())
    }

    async fn upsert_tags(&self, names: &[String]) -> ServerResult<Vec<ServerTag>> {
        let mut out = Vec::new();
        for name in names {
            let existing = self.state.lock().tags.iter().find(|(t, _)| &t.name == name).map(|(t, _)| t.clone());
            let tag = match existing {
                Some(tag) => tag,
                None => {
                    let tag = ServerTag {
                        id: self.new_id("tag"),
                        name: name.clone(),
                    };
                    self.state.lock().tags.push((tag.clone(), HashSet::new()));
                    tag
                }
            };
            out.push(tag);
        }
        Ok(out)
    }

    async fn tag_assets(&self, tag_id: &str, asset_ids: &[String]) -> ServerResult<()> {
        let mut state = self.state.lock();
        if let Some((_, members)) = state.tags.iter_mut().find(|(t, _)| t.id == tag_id) {
            members.extend(asset_ids.iter().cloned());
        }
        Ok(())
    }

    async fn create_stack(&self, asset_ids: &[String]) -> ServerResult<String> {
        let id = self.new_id("stack");
        self.state.lock().stacks.push(asset_ids.to_vec());
        Ok(id)
    }

    async fn get_jobs(&self) -> ServerResult<Vec<JobStatus>> {
        let state = self.state.lock();
        Ok(["thumbnailGeneration", "metadataExtraction", "videoConversion", "faceDetection", "smartSearch"]
            .iter()
            .map(|name| JobStatus {
                name: name.to_string(),
                active: 0,
                waiting: state.assets.len() as u64,
                paused: state.paused.contains(*name),
            })
            .collect())
    }

    async fn pause_job(&self, name: &str) -> ServerResult<()> {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().paused.insert(name.to_string());
        Ok(())
    }

    async fn resume_job(&self, name: &str) -> ServerResult<()> {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().paused.remove(name);
        Ok(())
    }

    async fn list_assets(&self, _query: &AssetQuery) -> ServerResult<Vec<ServerAsset>> {
        Ok(self.state.lock().assets.clone())
    }

    async fn download_original(&self, id: &str) -> ServerResult<Vec<u8>> {
        self.state.lock().contents.get(id).cloned().ok_or_else(|| ServerError::Status {
            status: 404,
            endpoint: format!("/api/assets/{}/original", id),
            message: "asset not found".to_string(),
        })
    }
}
