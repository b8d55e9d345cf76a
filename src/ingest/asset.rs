//! Assets, albums and groups
//!
//! This module provides functionality for:
//! 1. The asset value passed between stages, with its metadata and content handle
//! 2. Sidecar metadata and how it is merged into an asset
//! 3. Groups of related assets and their cover
//! 4. The identifiers the server uses to recognize an asset

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ingest::analyzer::groups::pair_cover;
use crate::ingest::events::EventCode;
use crate::ingest::fsys::{FileId, FsEntry, FsError, SourceFs};
use crate::ingest::media::MediaType;
use crate::ingest::names::{NameInfo, local_to_utc, name_info};
use crate::ingest::server::{ServerClient, ServerError};

/// Error types for asset content access
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type AssetResult<T> = Result<T, AssetError>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Album {
    pub title: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Album {
    pub fn named(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Where the capture date came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateSource {
    #[default]
    Unknown,
    Sidecar,
    Exif,
    Name,
    ModTime,
}

/// Metadata carried by a sidecar (Takeout JSON, XMP, previous export JSON, CSV)
#[derive(Debug, Clone, Default)]
pub struct SidecarMetadata {
    pub file_name: Option<String>,
    pub date_taken: Option<DateTime<Utc>>,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub rating: u8,
    pub favorite: bool,
    pub archived: bool,
    pub trashed: bool,
    pub from_partner: bool,
    pub albums: Vec<Album>,
    pub tags: Vec<String>,
}

/// A reader's verdict that an asset must not be uploaded.
///
/// Readers only discover; the analyzer turns the verdict into the terminal transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub code: EventCode,
    pub reason: String,
}

impl Rejection {
    pub fn discarded(reason: impl Into<String>) -> Self {
        Self {
            code: EventCode::DiscardedDiscarded,
            reason: reason.into(),
        }
    }

    pub fn local_duplicate(reason: impl Into<String>) -> Self {
        Self {
            code: EventCode::DiscardedLocalDuplicate,
            reason: reason.into(),
        }
    }
}

/// How to read an asset's bytes
#[derive(Clone)]
pub enum Content {
    Fs(Arc<SourceFs>),
    Remote {
        client: Arc<dyn ServerClient>,
        asset_id: String,
    },
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Fs(fs) => write!(f, "Fs({})", fs.name()),
            Content::Remote { asset_id, .. } => write!(f, "Remote({})", asset_id),
        }
    }
}

/// Upload body
#[derive(Debug, Clone)]
pub enum UploadContent {
    File(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Asset {
    pub file: FileId,
    pub content: Content,
    pub size: u64,
    /// Name the asset had on the device, title from a sidecar when known
    pub original_file_name: String,
    pub name_info: NameInfo,
    pub media: MediaType,
    pub file_date: Option<DateTime<Utc>>,
    pub capture_date: Option<DateTime<Utc>>,
    pub date_source: DateSource,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub rating: u8,
    pub favorite: bool,
    pub archived: bool,
    pub trashed: bool,
    pub from_partner: bool,
    pub albums: Vec<Album>,
    pub tags: Vec<String>,
    /// XMP file sent along with the upload
    pub sidecar: Option<FileId>,
    /// Metadata came from a sidecar and is pushed to the server after upload
    pub from_application: bool,
    pub checksum: Option<String>,
    /// Identity of the cover this asset is stacked under
    pub stack_parent: Option<String>,
    pub rejected: Option<Rejection>,
}

impl Asset {
    /// Build an asset for a file of a source
    pub fn from_entry(fs: &Arc<SourceFs>, entry: &FsEntry) -> Self {
        Self::new(fs.file_id(&entry.path), Content::Fs(fs.clone()), entry.size, entry.modified)
    }

    pub fn new(file: FileId, content: Content, size: u64, file_date: Option<DateTime<Utc>>) -> Self {
        let name = file.name().to_string();
        let info = name_info(&name);
        Self {
            file,
            content,
            size,
            original_file_name: name,
            media: info.media,
            name_info: info,
            file_date,
            capture_date: None,
            date_source: DateSource::Unknown,
            description: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            rating: 0,
            favorite: false,
            archived: false,
            trashed: false,
            from_partner: false,
            albums: Vec::new(),
            tags: Vec::new(),
            sidecar: None,
            from_application: false,
            checksum: None,
            stack_parent: None,
            rejected: None,
        }
    }

    pub fn ext(&self) -> &str {
        &self.name_info.ext
    }

    pub fn is_image(&self) -> bool {
        self.media == MediaType::Image
    }

    pub fn is_video(&self) -> bool {
        self.media == MediaType::Video
    }

    pub fn has_gps(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }

    /// The capture date when known, the file date otherwise
    pub fn best_date(&self) -> Option<DateTime<Utc>> {
        self.capture_date.or(self.file_date)
    }

    /// Name used for the upload (`No Name` for empty stems, `.MP` sent as `.MP4`)
    pub fn upload_file_name(&self) -> String {
        let name = self.original_file_name.rsplit('/').next().unwrap_or(&self.original_file_name);
        let ext_start = name.rfind('.').unwrap_or(name.len());
        let (stem, ext) = name.split_at(ext_start);
        let ext = if ext.eq_ignore_ascii_case(".mp") {
            format!("{}4", ext)
        } else {
            ext.to_string()
        };
        if stem.is_empty() {
            format!("No Name{}", ext)
        } else {
            format!("{}{}", stem, ext)
        }
    }

    /// Stable per-device identifier the server matches re-uploads with
    pub fn device_asset_id(&self) -> String {
        let base = self.original_file_name.rsplit('/').next().unwrap_or(&self.original_file_name);
        format!("{}-{}", base, self.size)
    }

    pub fn add_album(&mut self, album: Album) {
        if album.title.is_empty() {
            return;
        }
        if let Some(existing) = self.albums.iter_mut().find(|a| a.title == album.title) {
            if existing.description.is_empty() {
                existing.description = album.description;
            }
            if existing.latitude == 0.0 && existing.longitude == 0.0 {
                existing.latitude = album.latitude;
                existing.longitude = album.longitude;
            }
            return;
        }
        self.albums.push(album);
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !tag.is_empty() && !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// Merge sidecar metadata; sidecar values win over what the file said.
    pub fn apply_metadata(&mut self, md: &SidecarMetadata) {
        if let Some(name) = &md.file_name {
            if !name.is_empty() {
                self.original_file_name = name.clone();
            }
        }
        if let Some(date) = md.date_taken {
            self.capture_date = Some(date);
            self.date_source = DateSource::Sidecar;
        }
        if !md.description.is_empty() {
            self.description = md.description.clone();
        }
        if md.latitude != 0.0 || md.longitude != 0.0 {
            self.latitude = md.latitude;
            self.longitude = md.longitude;
        }
        if md.rating > 0 {
            self.rating = md.rating;
        }
        self.favorite |= md.favorite;
        self.archived |= md.archived;
        self.trashed |= md.trashed;
        self.from_partner |= md.from_partner;
        for album in &md.albums {
            self.add_album(album.clone());
        }
        for tag in &md.tags {
            self.add_tag(tag.clone());
        }
        self.from_application = true;
    }

    /// Capture date from the file name or its directories
    pub fn date_from_name(&mut self) -> bool {
        let taken = self
            .name_info
            .taken
            .or_else(|| crate::ingest::names::take_time_from_path(self.file.path()));
        match taken {
            Some(t) => {
                self.capture_date = Some(local_to_utc(t));
                self.date_source = DateSource::Name;
                true
            }
            None => false,
        }
    }

    /// SHA-1 of the content, computed once
    pub async fn compute_checksum(&mut self) -> AssetResult<String> {
        if let Some(sum) = &self.checksum {
            return Ok(sum.clone());
        }
        let sum = match &self.content {
            Content::Fs(fs) => {
                let fs = fs.clone();
                let path = self.file.path().to_string();
                tokio::task::spawn_blocking(move || crate::ingest::hasher::hash_file(&fs, &path)).await??
            }
            Content::Remote { client, asset_id } => {
                let bytes = client.download_original(asset_id).await?;
                crate::ingest::hasher::sha1_bytes(&bytes)
            }
        };
        self.checksum = Some(sum.clone());
        Ok(sum)
    }

    /// Body for the upload request: a local path when possible, bytes otherwise
    pub async fn upload_content(&self) -> AssetResult<UploadContent> {
        match &self.content {
            Content::Fs(fs) => {
                if let Some(path) = fs.local_path(self.file.path()) {
                    return Ok(UploadContent::File(path));
                }
                let fs = fs.clone();
                let path = self.file.path().to_string();
                let bytes = tokio::task::spawn_blocking(move || fs.read_all(&path)).await??;
                Ok(UploadContent::Bytes(bytes))
            }
            Content::Remote { client, asset_id } => Ok(UploadContent::Bytes(client.download_original(asset_id).await?)),
        }
    }

    /// Raw bytes of the XMP sidecar, when there is one on the same source
    pub fn sidecar_bytes(&self) -> Option<(String, Vec<u8>)> {
        let sidecar = self.sidecar.as_ref()?;
        match &self.content {
            Content::Fs(fs) => fs
                .read_all(sidecar.path())
                .ok()
                .map(|b| (sidecar.name().to_string(), b)),
            Content::Remote { .. } => None,
        }
    }
}

/// Kind of relation between the assets of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// Single asset or no relation
    None,
    Burst,
    RawJpg,
    HeicJpg,
    LivePhoto,
    FastFoto,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupKind::None => "none",
            GroupKind::Burst => "burst",
            GroupKind::RawJpg => "raw+jpeg",
            GroupKind::HeicJpg => "heic+jpeg",
            GroupKind::LivePhoto => "live photo",
            GroupKind::FastFoto => "epson fastfoto",
        };
        write!(f, "{}", s)
    }
}

/// Assets the server should treat as related
#[derive(Debug, Clone)]
pub struct Group {
    pub kind: GroupKind,
    pub assets: Vec<Asset>,
    pub cover: usize,
}

impl Group {
    pub fn single(asset: Asset) -> Self {
        Self {
            kind: GroupKind::None,
            assets: vec![asset],
            cover: 0,
        }
    }

    pub fn new(kind: GroupKind, assets: Vec<Asset>, cover: usize) -> Self {
        let cover = if cover < assets.len() { cover } else { 0 };
        Self { kind, assets, cover }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn cover_asset(&self) -> Option<&Asset> {
        self.assets.get(self.cover)
    }

    /// Remove the asset at `index`, keeping the cover pointing at the same asset when it survives.
    ///
    /// Losing the cover elects a new one: pairs rank by format, bursts and
    /// scans fall back to their first remaining frame.
    pub fn remove(&mut self, index: usize) -> Asset {
        let asset = self.assets.remove(index);
        if index < self.cover {
            self.cover -= 1;
        } else if index == self.cover || self.cover >= self.assets.len() {
            self.cover = match self.kind {
                GroupKind::RawJpg | GroupKind::HeicJpg | GroupKind::LivePhoto => pair_cover(&self.assets),
                GroupKind::None | GroupKind::Burst | GroupKind::FastFoto => 0,
            };
        }
        if self.assets.len() < 2 {
            self.kind = GroupKind::None;
        }
        asset
    }

    /// Cover first, the rest in reader order
    pub fn cover_first_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.assets.len());
        if !self.assets.is_empty() {
            order.push(self.cover);
        }
        order.extend((0..self.assets.len()).filter(|i| *i != self.cover));
        order
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ingest::fsys::SourceFs;

    /// Asset on a throwaway directory source, for grouping and policy tests
    pub(crate) fn test_asset(path: &str, size: u64, date: Option<DateTime<Utc>>) -> Asset {
        let fs = Arc::new(SourceFs::open_dir(std::env::temp_dir()).unwrap());
        let entry = FsEntry {
            path: path.to_string(),
            is_dir: false,
            size,
            modified: None,
        };
        let mut asset = Asset::from_entry(&fs, &entry);
        asset.capture_date = date;
        asset
    }

    #[test]
    fn test_upload_names() {
        let mut a = test_asset("dir/IMG_1.jpg", 10, None);
        assert_eq!(a.device_asset_id(), "IMG_1.jpg-10");
        assert_eq!(a.upload_file_name(), "IMG_1.jpg");

        a.original_file_name = ".jpg".to_string();
        assert_eq!(a.upload_file_name(), "No Name.jpg");

        a.original_file_name = "PXL_1.MP".to_string();
        assert_eq!(a.upload_file_name(), "PXL_1.MP4");
    }

    #[test]
    fn test_apply_metadata() {
        let mut a = test_asset("IMG_1.jpg", 10, None);
        let md = SidecarMetadata {
            file_name: Some("Holiday.jpg".to_string()),
            date_taken: Some(Utc::now()),
            latitude: 1.5,
            longitude: 2.5,
            albums: vec![Album::named("Trip"), Album::named("Trip")],
            tags: vec!["People/Ann".to_string()],
            ..Default::default()
        };
        a.apply_metadata(&md);
        assert_eq!(a.original_file_name, "Holiday.jpg");
        assert_eq!(a.date_source, DateSource::Sidecar);
        assert_eq!(a.albums.len(), 1);
        assert!(a.has_gps());
        assert!(a.from_application);
    }

    #[test]
    fn test_group_remove_keeps_cover() {
        let assets = vec![
            test_asset("a.jpg", 1, None),
            test_asset("b.jpg", 1, None),
            test_asset("c.jpg", 1, None),
        ];
        let mut g = Group::new(GroupKind::Burst, assets, 2);
        g.remove(0);
        assert_eq!(g.cover_asset().unwrap().file.name(), "c.jpg");
        assert_eq!(g.cover_first_order(), vec![1, 0]);
        g.remove(0);
        assert_eq!(g.kind, GroupKind::None);
    }

    #[test]
    fn test_group_remove_elects_new_cover() {
        let assets = vec![
            test_asset("IMG_1.jpg", 10, None),
            test_asset("IMG_1.heic", 20, None),
            test_asset("IMG_1.nef", 30, None),
        ];
        let mut g = Group::new(GroupKind::RawJpg, assets, 2);
        g.remove(2);
        assert_eq!(g.cover_asset().unwrap().file.name(), "IMG_1.heic");
        assert_eq!(g.cover_first_order(), vec![1, 0]);

        let scans = vec![
            test_asset("Scan_0001.jpg", 10, None),
            test_asset("Scan_0001_a.jpg", 10, None),
            test_asset("Scan_0001_b.jpg", 10, None),
        ];
        let mut g = Group::new(GroupKind::FastFoto, scans, 1);
        g.remove(1);
        assert_eq!(g.cover_asset().unwrap().file.name(), "Scan_0001.jpg");
        assert_eq!(g.kind, GroupKind::FastFoto);
    }
}
