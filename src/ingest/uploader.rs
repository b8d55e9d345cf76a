//! Uploader
//!
//! This module provides functionality for:
//! 1. Comparing each asset with what the server already holds
//! 2. Uploading new and better files, with bounded concurrency
//! 3. Album, tag and stack side effects, batched per album and per tag
//! 4. Recording the terminal transition of every asset it receives
//! 5. Counting server errors against the run's error budget

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::ingest::analyzer::DecidedGroup;
use crate::ingest::asset::{Album, Asset, GroupKind};
use crate::ingest::cancel::CancelToken;
use crate::ingest::events::EventCode;
use crate::ingest::file_processor::FileProcessor;
use crate::ingest::media;
use crate::ingest::server::{
    AssetType, AssetUpdate, ErrorKind, ServerClient, ServerError, UploadMeta, UploadStatus,
};
use crate::ingest::server_errors::{ErrorBudget, ErrorPolicy};

/// Assets sent per album or tag membership call
const BATCH_SIZE: usize = 50;

/// Error types for the uploader
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Server error budget exceeded after {count} errors, first: {first}")]
    BudgetExceeded { count: u64, first: String },

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Debug, Clone)]
pub struct UploaderOptions {
    /// Groups uploaded at the same time, 1..=20
    pub concurrent_jobs: usize,
    /// Replace server assets even when they are not smaller
    pub overwrite: bool,
    pub on_server_errors: ErrorPolicy,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        Self {
            concurrent_jobs: num_cpus::get().clamp(1, 20),
            overwrite: false,
            on_server_errors: ErrorPolicy::Stop,
        }
    }
}

/// Server-side state of one asset after its upload decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Uploaded,
    Upgraded,
    ServerDuplicate,
    UploadedDuplicate,
    ServerBetter,
}

impl Outcome {
    fn code(self) -> EventCode {
        match self {
            Outcome::Uploaded => EventCode::Uploaded,
            Outcome::Upgraded => EventCode::UploadUpgraded,
            Outcome::ServerDuplicate => EventCode::UploadServerDuplicate,
            Outcome::UploadedDuplicate => EventCode::UploadedServerDuplicate,
            Outcome::ServerBetter => EventCode::UploadServerBetter,
        }
    }

    /// The local file went to the server
    fn sent(self) -> bool {
        matches!(self, Outcome::Uploaded | Outcome::Upgraded)
    }
}

/// Asset ids waiting to be attached to an album or a tag
#[derive(Default)]
struct Memberships {
    pending: Mutex<HashMap<String, Vec<String>>>,
}

impl Memberships {
    /// Queue an asset; returns a full batch when one is ready
    fn push(&self, target: &str, asset_id: String) -> Option<Vec<String>> {
        let mut pending = self.pending.lock();
        let ids = pending.entry(target.to_string()).or_default();
        ids.push(asset_id);
        if ids.len() >= BATCH_SIZE {
            return Some(std::mem::take(ids));
        }
        None
    }

    fn drain(&self) -> Vec<(String, Vec<String>)> {
        self.pending
            .lock()
            .drain()
            .filter(|(_, ids)| !ids.is_empty())
            .collect()
    }
}

pub struct Uploader {
    client: Arc<dyn ServerClient>,
    processor: Arc<FileProcessor>,
    options: UploaderOptions,
    budget: ErrorBudget,
    cancel: CancelToken,
    /// Album ids by title, created at most once per run
    albums: DashMap<String, String>,
    album_lock: tokio::sync::Mutex<()>,
    /// Tag ids by name, upserted at most once per run
    tags: DashMap<String, String>,
    tag_lock: tokio::sync::Mutex<()>,
    album_members: Memberships,
    tag_members: Memberships,
}

impl Uploader {
    pub fn new(
        client: Arc<dyn ServerClient>,
        processor: Arc<FileProcessor>,
        mut options: UploaderOptions,
        cancel: CancelToken,
    ) -> Self {
        options.concurrent_jobs = options.concurrent_jobs.clamp(1, 20);
        Self {
            client,
            processor,
            budget: ErrorBudget::new(options.on_server_errors),
            options,
            cancel,
            albums: DashMap::new(),
            album_lock: tokio::sync::Mutex::new(()),
            tags: DashMap::new(),
            tag_lock: tokio::sync::Mutex::new(()),
            album_members: Memberships::default(),
            tag_members: Memberships::default(),
        }
    }

    /// Load the albums already on the server so none is created twice
    pub async fn load_albums(&self) -> UploadResult<()> {
        for album in self.client.get_albums().await? {
            self.albums.entry(album.title).or_insert(album.id);
        }
        debug!(albums = self.albums.len(), "Server albums loaded");
        Ok(())
    }

    /// Upload decided groups until the analyzer is done, the run is cancelled or the budget runs out
    #[instrument(skip_all, fields(concurrent_jobs = self.options.concurrent_jobs))]
    pub async fn run(self: Arc<Self>, rx: flume::Receiver<DecidedGroup>) -> UploadResult<()> {
        if let Err(e) = self.load_albums().await {
            warn!(error = %e, "Could not list server albums");
        }

        let semaphore = Arc::new(Semaphore::new(self.options.concurrent_jobs));
        let mut tasks = JoinSet::new();

        while let Ok(group) = rx.recv_async().await {
            if self.cancel.is_cancelled() {
                info!("Uploader stopped by cancellation");
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let this = self.clone();
            tasks.spawn(async move {
                this.process_group(group).await;
                drop(permit);
            });
        }
        drop(rx);

        while let Some(result) = tasks.join_next().await {
            result?;
        }
        self.flush().await;

        if self.budget.is_exceeded() {
            return Err(UploadError::BudgetExceeded {
                count: self.budget.count(),
                first: self.budget.first_error().unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Upload a group in cover-first order, then stack what reached the server
    pub async fn process_group(&self, group: DecidedGroup) {
        let stacked = group.is_stacked();
        let kind = group.kind;
        let mut ids = Vec::with_capacity(group.len());
        let mut files = Vec::with_capacity(group.len());

        for decision in group.entries {
            if self.cancel.is_cancelled() {
                return;
            }
            let file = decision.asset.file.clone();
            let is_video = decision.asset.is_video();
            if let Some(id) = self.process_asset(decision.asset).await {
                if kind == GroupKind::LivePhoto && is_video {
                    self.processor
                        .record_asset_event(&file, EventCode::LivePhoto, &[("asset_id", id.clone())]);
                }
                ids.push(id);
                files.push(file);
            }
        }

        if stacked && ids.len() > 1 {
            match self.client.create_stack(&ids).await {
                Ok(stack_id) => {
                    for file in &files {
                        self.processor
                            .record_asset_event(file, EventCode::Stacked, &[("stack", stack_id.clone())]);
                    }
                }
                Err(e) => {
                    let msg = e.to_string();
                    for file in &files {
                        self.processor.record_asset_event(file, EventCode::Error, &[("error", msg.clone())]);
                    }
                    self.count_error(&msg);
                }
            }
        }
    }

    /// Decide and execute one asset; returns its server id when it is on the server afterwards.
    async fn process_asset(&self, mut asset: Asset) -> Option<String> {
        let existing = match self
            .client
            .asset_by_signature(&asset.device_asset_id(), &asset.upload_file_name(), asset.capture_date)
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                self.fail(&asset, &e);
                return None;
            }
        };

        let decided = match existing {
            None => self.upload(&asset, None).await,
            Some(server) => {
                let checksum = match asset.compute_checksum().await {
                    Ok(sum) => sum,
                    Err(e) => {
                        let msg = e.to_string();
                        self.processor
                            .record_asset_error(&asset.file, EventCode::ErrorUploadFailed, &msg);
                        return None;
                    }
                };
                if checksum == server.checksum {
                    Ok((server.id, Outcome::ServerDuplicate))
                } else if self.options.overwrite || asset.size > server.size {
                    self.upload(&asset, Some(&server.id)).await
                } else if asset.size < server.size {
                    Ok((server.id, Outcome::ServerBetter))
                } else {
                    self.upload(&asset, None).await
                }
            }
        };

        let (id, outcome) = match decided {
            Ok(decided) => decided,
            Err(e) => {
                self.fail(&asset, &e);
                return None;
            }
        };

        match outcome {
            Outcome::ServerDuplicate => {
                self.processor
                    .record_asset_discarded(&asset.file, outcome.code(), "already on the server")
            }
            Outcome::ServerBetter => {
                self.processor
                    .record_asset_discarded(&asset.file, outcome.code(), "server has a better quality")
            }
            _ => self.processor.record_asset_processed(&asset.file, outcome.code()),
        }
        debug!(file = %asset.file, id = %id, ?outcome, "Asset decided");

        if outcome.sent() && asset.from_application {
            self.update_metadata(&asset, &id).await;
        }
        for album in &asset.albums {
            self.add_to_album(&asset, album, &id).await;
        }
        for tag in &asset.tags {
            self.tag_asset(&asset, tag, &id).await;
        }
        Some(id)
    }

    async fn upload(&self, asset: &Asset, replace: Option<&str>) -> Result<(String, Outcome), ServerError> {
        let content = asset.upload_content().await.map_err(|e| match e {
            crate::ingest::asset::AssetError::Server(e) => e,
            other => ServerError::Io(std::io::Error::other(other.to_string())),
        })?;

        let created_at = asset.best_date().unwrap_or_else(Utc::now);
        let meta = UploadMeta {
            device_asset_id: asset.device_asset_id(),
            file_name: asset.upload_file_name(),
            asset_type: if asset.is_video() { AssetType::Video } else { AssetType::Image },
            mime_type: media::mime_type(asset.ext()).to_string(),
            size: asset.size,
            created_at,
            modified_at: asset.file_date.unwrap_or(created_at),
            favorite: asset.favorite,
            archived: asset.archived,
            sidecar: asset.sidecar_bytes(),
        };

        let response = self.client.upload_asset(content, &meta, replace).await?;
        let outcome = match (response.status, replace) {
            (UploadStatus::Duplicate, _) => Outcome::UploadedDuplicate,
            (_, Some(_)) | (UploadStatus::Replaced, _) => Outcome::Upgraded,
            (UploadStatus::Created, None) => Outcome::Uploaded,
        };
        Ok((response.id, outcome))
    }

    async fn update_metadata(&self, asset: &Asset, id: &str) {
        let update = AssetUpdate {
            description: Some(asset.description.clone()).filter(|d| !d.is_empty()),
            date_time_original: asset.capture_date,
            latitude: asset.has_gps().then_some(asset.latitude),
            longitude: asset.has_gps().then_some(asset.longitude),
            rating: (asset.rating > 0).then_some(asset.rating),
            favorite: asset.favorite.then_some(true),
            archived: asset.archived.then_some(true),
        };
        if update == AssetUpdate::default() {
            return;
        }
        if let Err(e) = self.client.update_asset(id, &update).await {
            warn!(file = %asset.file, error = %e, "Could not update asset metadata");
            self.processor
                .record_asset_event(&asset.file, EventCode::Error, &[("error", e.to_string())]);
        }
    }

    /// Album id for a title, creating the album on first use
    async fn album_id(&self, asset: &Asset, album: &Album) -> Result<String, ServerError> {
        if let Some(id) = self.albums.get(&album.title) {
            return Ok(id.clone());
        }
        let _guard = self.album_lock.lock().await;
        if let Some(id) = self.albums.get(&album.title) {
            return Ok(id.clone());
        }
        let created = self.client.create_album(&album.title, &album.description, &[]).await?;
        info!(album = %album.title, id = %created.id, "Album created");
        self.processor.record_asset_event(
            &asset.file,
            EventCode::UploadAlbumCreated,
            &[("album", album.title.clone())],
        );
        self.albums.insert(album.title.clone(), created.id.clone());
        Ok(created.id)
    }

    async fn add_to_album(&self, asset: &Asset, album: &Album, id: &str) {
        let album_id = match self.album_id(asset, album).await {
            Ok(album_id) => album_id,
            Err(e) => {
                warn!(album = %album.title, error = %e, "Could not create album");
                self.processor
                    .record_asset_event(&asset.file, EventCode::Error, &[("error", e.to_string())]);
                return;
            }
        };
        self.processor
            .record_asset_event(&asset.file, EventCode::UploadAddToAlbum, &[("album", album.title.clone())]);
        if let Some(batch) = self.album_members.push(&album_id, id.to_string()) {
            self.send_album_batch(&album_id, &batch).await;
        }
    }

    async fn send_album_batch(&self, album_id: &str, ids: &[String]) {
        if let Err(e) = self.client.add_to_album(album_id, ids).await {
            warn!(album = %album_id, assets = ids.len(), error = %e, "Could not add assets to album");
            self.count_error(&e.to_string());
        }
    }

    async fn tag_id(&self, name: &str) -> Result<String, ServerError> {
        if let Some(id) = self.tags.get(name) {
            return Ok(id.clone());
        }
        let _guard = self.tag_lock.lock().await;
        if let Some(id) = self.tags.get(name) {
            return Ok(id.clone());
        }
        let upserted = self.client.upsert_tags(&[name.to_string()]).await?;
        let tag = upserted
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ServerError::Status {
                status: 500,
                endpoint: "/api/tags".to_string(),
                message: format!("tag {} missing from upsert response", name),
            })?;
        self.tags.insert(name.to_string(), tag.id.clone());
        Ok(tag.id)
    }

    async fn tag_asset(&self, asset: &Asset, tag: &str, id: &str) {
        let tag_id = match self.tag_id(tag).await {
            Ok(tag_id) => tag_id,
            Err(e) => {
                warn!(tag, error = %e, "Could not create tag");
                self.processor
                    .record_asset_event(&asset.file, EventCode::Error, &[("error", e.to_string())]);
                return;
            }
        };
        self.processor
            .record_asset_event(&asset.file, EventCode::Tagged, &[("tag", tag.to_string())]);
        if let Some(batch) = self.tag_members.push(&tag_id, id.to_string()) {
            self.send_tag_batch(&tag_id, &batch).await;
        }
    }

    async fn send_tag_batch(&self, tag_id: &str, ids: &[String]) {
        if let Err(e) = self.client.tag_assets(tag_id, ids).await {
            warn!(tag = %tag_id, assets = ids.len(), error = %e, "Could not tag assets");
            self.count_error(&e.to_string());
        }
    }

    /// Send the album and tag memberships still queued
    pub async fn flush(&self) {
        for (album_id, ids) in self.album_members.drain() {
            self.send_album_batch(&album_id, &ids).await;
        }
        for (tag_id, ids) in self.tag_members.drain() {
            self.send_tag_batch(&tag_id, &ids).await;
        }
    }

    /// Record a failed asset; only server-side failures count against the budget
    fn fail(&self, asset: &Asset, e: &ServerError) {
        let msg = match e.status() {
            Some(413) => format!("file too large ({:.1} MB): {}", asset.size as f64 / 1_048_576.0, e),
            _ => e.to_string(),
        };
        let code = match e.kind() {
            ErrorKind::ServerReject => EventCode::UploadServerError,
            _ => EventCode::ErrorUploadFailed,
        };
        self.processor.record_asset_error(&asset.file, code, &msg);
        if matches!(e.kind(), ErrorKind::ServerReject | ErrorKind::NetworkTransient) {
            self.count_error(&msg);
        }
    }

    fn count_error(&self, msg: &str) {
        if self.budget.record(msg) {
            warn!("Aborting the run");
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::analyzer::{Action, Decision};
    use crate::ingest::file_processor::init_file_processor;
    use crate::ingest::fsys::{FsEntry, SourceFs};
    use crate::ingest::server::fake::FakeServer;
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        fs: Arc<SourceFs>,
        processor: Arc<FileProcessor>,
        server: Arc<FakeServer>,
    }

    impl Fixture {
        fn new(files: &[(&str, &[u8])]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for (path, content) in files {
                fs::write(dir.path().join(path), content).unwrap();
            }
            Self {
                fs: Arc::new(SourceFs::open_dir(dir.path()).unwrap()),
                _dir: dir,
                processor: init_file_processor(true),
                server: Arc::new(FakeServer::new()),
            }
        }

        fn asset(&self, path: &str) -> Asset {
            let size = self.fs.stat(path).unwrap().size;
            let entry = FsEntry {
                path: path.to_string(),
                is_dir: false,
                size,
                modified: None,
            };
            let asset = Asset::from_entry(&self.fs, &entry);
            self.processor
                .record_asset_discovered(&asset.file, asset.size, EventCode::DiscoveredImage);
            asset
        }

        fn uploader(&self, options: UploaderOptions) -> Uploader {
            Uploader::new(self.server.clone(), self.processor.clone(), options, CancelToken::new())
        }
    }

    fn single(asset: Asset) -> DecidedGroup {
        DecidedGroup {
            kind: GroupKind::None,
            entries: vec![Decision {
                asset,
                action: Action::Upload,
            }],
        }
    }

    fn count(processor: &FileProcessor, code: EventCode) -> i64 {
        processor.get_event_counts().get(&code).copied().unwrap_or(0)
    }

    #[tokio::test]
    async fn test_server_decisions() {
        let f = Fixture::new(&[
            ("new.jpg", b"brand new"),
            ("dup.jpg", b"same bytes"),
            ("bigger.jpg", b"a much larger file"),
            ("smaller.jpg", b"tiny"),
        ]);
        f.server.seed_asset("dup.jpg-10", "dup.jpg", b"same bytes");
        f.server.seed_asset("bigger.jpg-5", "bigger.jpg", b"small");
        f.server.seed_asset("smaller.jpg-20", "smaller.jpg", b"a server side better");

        let uploader = f.uploader(UploaderOptions::default());
        for name in ["new.jpg", "dup.jpg", "bigger.jpg", "smaller.jpg"] {
            uploader.process_group(single(f.asset(name))).await;
        }

        assert_eq!(count(&f.processor, EventCode::Uploaded), 1);
        assert_eq!(count(&f.processor, EventCode::UploadServerDuplicate), 1);
        assert_eq!(count(&f.processor, EventCode::UploadUpgraded), 1);
        assert_eq!(count(&f.processor, EventCode::UploadServerBetter), 1);
        assert!(f.processor.is_complete());
        assert_eq!(f.server.assets().len(), 4);
    }

    #[tokio::test]
    async fn test_albums_tags_and_stacks() {
        let f = Fixture::new(&[("a.jpg", b"aaa"), ("b.jpg", b"bbbb")]);
        let uploader = f.uploader(UploaderOptions::default());

        let mut entries = Vec::new();
        for name in ["a.jpg", "b.jpg"] {
            let mut asset = f.asset(name);
            asset.add_album(Album::named("Trip"));
            asset.add_tag("{immich-go}/run");
            entries.push(Decision {
                asset,
                action: Action::UploadAndStack,
            });
        }
        uploader
            .process_group(DecidedGroup {
                kind: GroupKind::Burst,
                entries,
            })
            .await;
        uploader.flush().await;

        assert_eq!(count(&f.processor, EventCode::Uploaded), 2);
        assert_eq!(count(&f.processor, EventCode::UploadAlbumCreated), 1);
        assert_eq!(count(&f.processor, EventCode::UploadAddToAlbum), 2);
        assert_eq!(count(&f.processor, EventCode::Tagged), 2);
        assert_eq!(count(&f.processor, EventCode::Stacked), 2);
        assert_eq!(f.server.album_members()["Trip"].len(), 2);
        assert_eq!(f.server.tag_members("{immich-go}/run"), 2);
        assert_eq!(f.server.stacks().len(), 1);
    }

    #[tokio::test]
    async fn test_error_budget() {
        let f = Fixture::new(&[("a.jpg", b"a"), ("b.jpg", b"bb"), ("c.jpg", b"ccc")]);
        f.server.fail_upload("a.jpg", 400);
        f.server.fail_upload("b.jpg", 400);

        let options = UploaderOptions {
            on_server_errors: ErrorPolicy::Budget(1),
            ..Default::default()
        };
        let uploader = f.uploader(options);
        uploader.process_group(single(f.asset("a.jpg"))).await;
        assert!(!uploader.cancel.is_cancelled());
        uploader.process_group(single(f.asset("b.jpg"))).await;
        assert!(uploader.cancel.is_cancelled());

        assert_eq!(count(&f.processor, EventCode::UploadServerError), 2);
        assert_eq!(uploader.budget.count(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_file_skipped() {
        let f = Fixture::new(&[("gone.jpg", b"gone"), ("b.jpg", b"bb")]);
        let gone = f.asset("gone.jpg");
        fs::remove_file(f._dir.path().join("gone.jpg")).unwrap();

        let uploader = f.uploader(UploaderOptions::default());
        uploader.process_group(single(gone)).await;
        assert!(!uploader.cancel.is_cancelled());
        assert_eq!(uploader.budget.count(), 0);
        uploader.process_group(single(f.asset("b.jpg"))).await;

        assert_eq!(count(&f.processor, EventCode::ErrorUploadFailed), 1);
        assert_eq!(count(&f.processor, EventCode::Uploaded), 1);
        assert!(f.processor.is_complete());
    }

    #[tokio::test]
    async fn test_run_reports_budget() {
        let f = Fixture::new(&[("a.jpg", b"a"), ("b.jpg", b"bb")]);
        f.server.fail_upload("a.jpg", 400);
        let uploader = Arc::new(f.uploader(UploaderOptions {
            concurrent_jobs: 1,
            ..Default::default()
        }));

        let (tx, rx) = flume::unbounded();
        tx.send(single(f.asset("a.jpg"))).unwrap();
        drop(tx);
        let result = uploader.run(rx).await;
        assert!(matches!(result, Err(UploadError::BudgetExceeded { count: 1, .. })));
    }
}
