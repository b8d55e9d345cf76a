//! Source Readers
//!
//! This module provides functionality for:
//! 1. Turning a source (folders, iCloud or Picasa exports, Takeout archives,
//!    another server account) into a finite stream of asset groups
//! 2. Recording discovery events for every file a reader looks at
//! 3. Options shared by every reader: ban list, extension filters, run tags
//!
//! Readers only discover. An asset a reader does not want uploaded carries a
//! `Rejection`; the analyzer turns it into the terminal transition.

pub mod folder;
pub mod icloud;
pub mod picasa;
pub mod remote;
pub mod sidecars;
pub mod takeout;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use crate::ingest::asset::{Asset, Group};
use crate::ingest::ban_list::BanList;
use crate::ingest::cancel::CancelToken;
use crate::ingest::events::EventCode;
use crate::ingest::file_processor::FileProcessor;
use crate::ingest::fsys::{FsEntry, FsError, SourceFs};
use crate::ingest::media::{self, MediaType};
use crate::ingest::server::ServerError;
use crate::ingest::analyzer::groups::GroupingOptions;

pub use folder::{AlbumMode, FolderFlavor, FolderOptions, FolderReader};
pub use remote::RemoteReader;
pub use takeout::{TakeoutOptions, TakeoutReader};

/// Error types for readers
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Invalid source: {0}")]
    Invalid(String),

    #[error("Downstream stage closed")]
    Closed,

    #[error("Operation cancelled")]
    Cancelled,
}

pub type ReaderResult<T> = Result<T, ReaderError>;

/// Options every reader honours
#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    pub ban_list: BanList,
    /// Lower-cased extensions with their dot; empty accepts every media extension
    pub include_extensions: Vec<String>,
    pub exclude_extensions: Vec<String>,
    pub date_from_name: bool,
    pub tags: Vec<String>,
    pub session_tag: Option<String>,
    pub grouping: GroupingOptions,
}

impl ReaderOptions {
    /// Reason a media extension is filtered out, if it is
    pub fn extension_rejection(&self, ext: &str) -> Option<&'static str> {
        let ext = ext.to_lowercase();
        if !self.include_extensions.is_empty() && !self.include_extensions.contains(&ext) {
            return Some("extension not selected");
        }
        if self.exclude_extensions.contains(&ext) {
            return Some("extension excluded");
        }
        None
    }

    /// Configured tags and the session tag
    pub fn add_run_tags(&self, asset: &mut Asset) {
        for tag in &self.tags {
            asset.add_tag(tag.clone());
        }
        if let Some(tag) = &self.session_tag {
            asset.add_tag(tag.clone());
        }
    }
}

/// Normalize `jpg`, `.JPG` to `.jpg`
pub fn normalize_extensions(list: &[String]) -> Vec<String> {
    list.iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| if e.starts_with('.') { e } else { format!(".{}", e) })
        .collect()
}

/// What a reader needs from the run
#[derive(Clone)]
pub struct BrowseContext {
    pub processor: Arc<FileProcessor>,
    pub cancel: CancelToken,
    pub tx: flume::Sender<Group>,
}

impl BrowseContext {
    pub fn check_cancelled(&self) -> ReaderResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ReaderError::Cancelled);
        }
        Ok(())
    }

    /// Hand a group to the analyzer, blocking while its queue is full
    pub fn emit(&self, group: Group) -> ReaderResult<()> {
        self.check_cancelled()?;
        self.tx.send(group).map_err(|_| ReaderError::Closed)
    }

    pub async fn emit_async(&self, group: Group) -> ReaderResult<()> {
        self.check_cancelled()?;
        self.tx.send_async(group).await.map_err(|_| ReaderError::Closed)
    }

    /// Banned media is discovered and discarded at once; anything else is only told about.
    pub fn record_banned(&self, fs: &SourceFs, entry: &FsEntry) {
        let file = fs.file_id(&entry.path);
        if media::type_from_name(&entry.path).is_asset() {
            self.processor
                .record_asset_discarded_immediately(&file, entry.size, EventCode::DiscardedBanned, "banned file");
        } else {
            self.processor.record_non_asset(
                &file,
                entry.size,
                EventCode::DiscoveredBanned,
                &[("reason", "banned file".to_string())],
            );
        }
    }

    /// Record an image or video entering the pipeline
    pub fn discover(&self, fs: &Arc<SourceFs>, entry: &FsEntry) -> Asset {
        let asset = Asset::from_entry(fs, entry);
        let code = match asset.media {
            MediaType::Video => EventCode::DiscoveredVideo,
            _ => EventCode::DiscoveredImage,
        };
        self.processor.record_asset_discovered(&asset.file, asset.size, code);
        asset
    }
}

/// Every kind of source the pipeline can read
pub enum Reader {
    Folder(FolderReader),
    Takeout(TakeoutReader),
    Remote(RemoteReader),
}

impl Reader {
    pub fn name(&self) -> String {
        match self {
            Reader::Folder(r) => r.name(),
            Reader::Takeout(r) => r.name(),
            Reader::Remote(r) => r.name(),
        }
    }

    pub fn identity(&self) -> String {
        match self {
            Reader::Folder(r) => r.identity(),
            Reader::Takeout(r) => r.identity(),
            Reader::Remote(r) => r.name(),
        }
    }

    /// Stream this source's groups into `ctx.tx`; file readers run on the blocking pool.
    #[instrument(skip_all, fields(reader = %self.name()))]
    pub async fn browse(self, ctx: BrowseContext) -> ReaderResult<()> {
        info!("Reading source");
        match self {
            Reader::Folder(r) => tokio::task::spawn_blocking(move || r.browse(&ctx)).await?,
            Reader::Takeout(r) => tokio::task::spawn_blocking(move || r.browse(&ctx)).await?,
            Reader::Remote(r) => r.browse(&ctx).await,
        }
    }
}

/// Assets of one directory in grouping order: radical, then capture date, then identity
pub fn sort_for_grouping(assets: &mut [Asset]) {
    assets.sort_by(|a, b| {
        a.name_info
            .radical
            .cmp(&b.name_info.radical)
            .then(a.capture_date.cmp(&b.capture_date))
            .then(a.file.cmp(&b.file))
    });
}
