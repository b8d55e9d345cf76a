//! Dry-run wrapper: reads go to the wrapped server, mutations succeed without touching it

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::*;

pub struct DryRun {
    inner: Arc<dyn ServerClient>,
}

impl DryRun {
    pub fn new(inner: Arc<dyn ServerClient>) -> Self {
        Self { inner }
    }

    fn synthetic_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl ServerClient for DryRun {
    async fn ping(&self) -> ServerResult<()> {
        self.inner.ping().await
    }

    async fn validate_connection(&self) -> ServerResult<User> {
        self.inner.validate_connection().await
    }

    async fn get_about(&self) -> ServerResult<ServerInfo> {
        self.inner.get_about().await
    }

    fn set_device_uuid(&self, uuid: &str) {
        self.inner.set_device_uuid(uuid)
    }

    fn device_uuid(&self) -> String {
        self.inner.device_uuid()
    }

    async fn asset_by_signature(
        &self,
        device_asset_id: &str,
        original_file_name: &str,
        captured_at: Option<DateTime<Utc>>,
    ) -> ServerResult<Option<ServerAsset>> {
        self.inner
            .asset_by_signature(device_asset_id, original_file_name, captured_at)
            .await
    }

    async fn upload_asset(
        &self,
        _content: UploadContent,
        meta: &UploadMeta,
        replace: Option<&str>,
    ) -> ServerResult<UploadResponse> {
        debug!(file = %meta.file_name, "Dry run: upload skipped");
        Ok(UploadResponse {
            id: Self::synthetic_id(),
            status: if replace.is_some() {
                UploadStatus::Replaced
            } else {
                UploadStatus::Created
            },
        })
    }

    async fn update_asset(&self, _id: &str, _update: &AssetUpdate) -> ServerResult<()> {
        Ok(())
    }

    async fn get_albums(&self) -> ServerResult<Vec<ServerAlbum>> {
        self.inner.get_albums().await
    }

    async fn create_album(&self, title: &str, description: &str, _asset_ids: &[String]) -> ServerResult<ServerAlbum> {
        Ok(ServerAlbum {
            id: Self::synthetic_id(),
            title: title.to_string(),
            description: description.to_string(),
        })
    }

    async fn add_to_album(&self, _album_id: &str, _asset_ids: &[String]) -> ServerResult<()> {
        Ok(())
    }

    async fn upsert_tags(&self, names: &[String]) -> ServerResult<Vec<ServerTag>> {
        Ok(names
            .iter()
            .map(|name| ServerTag {
                id: Self::synthetic_id(),
                name: name.clone(),
            })
            .collect())
    }

    async fn tag_assets(&self, _tag_id: &str, _asset_ids: &[String]) -> ServerResult<()> {
        Ok(())
    }

    async fn create_stack(&self, _asset_ids: &[String]) -> ServerResult<String> {
        Ok(Self::synthetic_id())
    }

    async fn get_jobs(&self) -> ServerResult<Vec<JobStatus>> {
        self.inner.get_jobs().await
    }

    async fn pause_job(&self, name: &str) -> ServerResult<()> {
        debug!(job = name, "Dry run: pause skipped");
        Ok(())
    }

    async fn resume_job(&self, name: &str) -> ServerResult<()> {
        debug!(job = name, "Dry run: resume skipped");
        Ok(())
    }

    async fn list_assets(&self, query: &AssetQuery) -> ServerResult<Vec<ServerAsset>> {
        self.inner.list_assets(query).await
    }

    async fn download_original(&self, id: &str) -> ServerResult<Vec<u8>> {
        self.inner.download_original(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::server::fake::FakeServer;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_mutations_short_circuit() {
        let fake = Arc::new(FakeServer::new());
        let dry = DryRun::new(fake.clone());
        let meta = UploadMeta {
            device_asset_id: "a.jpg-3".to_string(),
            file_name: "a.jpg".to_string(),
            asset_type: AssetType::Image,
            mime_type: "image/jpeg".to_string(),
            size: 3,
            created_at: Utc::now(),
            modified_at: Utc::now(),
            favorite: false,
            archived: false,
            sidecar: None,
        };
        let resp = dry
            .upload_asset(UploadContent::Bytes(b"abc".to_vec()), &meta, None)
            .await
            .unwrap();
        assert_eq!(resp.status, UploadStatus::Created);
        dry.create_album("Trip", "", &[resp.id.clone()]).await.unwrap();
        dry.pause_job("smartSearch").await.unwrap();

        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 0);
        assert!(fake.assets().is_empty());
        assert!(fake.album_members().is_empty());
        assert!(fake.paused_jobs().is_empty());
        assert!(dry.ping().await.is_ok());
    }
}
