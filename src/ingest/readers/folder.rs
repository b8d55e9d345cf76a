//! Local folder reader
//!
//! This module provides functionality for:
//! 1. Walking directory trees and ZIP files, directory by directory in sorted order
//! 2. Binding XMP and export JSON sidecars to their assets
//! 3. Albums from folder names, a forced album, Picasa ini files or iCloud CSVs
//! 4. Grouping the assets of each directory before handing them on

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::icloud::{self, ICloudIndex};
use super::picasa;
use super::sidecars::{self, EXPORT_MARKER};
use super::{BrowseContext, ReaderError, ReaderOptions, ReaderResult, sort_for_grouping};
use crate::ingest::analyzer::dates::resolve_capture_date;
use crate::ingest::analyzer::groups::group_assets;
use crate::ingest::asset::{Album, Asset, DateSource};
use crate::ingest::ban_list::BanList;
use crate::ingest::events::EventCode;
use crate::ingest::fsys::{FsEntry, SourceFs, base_name, dir_name, join_path};
use crate::ingest::media::{self, MediaType};

/// How folder names turn into albums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlbumMode {
    #[default]
    None,
    /// The innermost folder name
    Folder,
    /// The whole path, joined with the configured separator
    Path,
}

impl FromStr for AlbumMode {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(AlbumMode::None),
            "folder" => Ok(AlbumMode::Folder),
            "path" => Ok(AlbumMode::Path),
            other => Err(ReaderError::Invalid(format!("unknown folder album mode: {}", other))),
        }
    }
}

/// Export layouts with extra metadata files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FolderFlavor {
    #[default]
    Plain,
    ICloud { memories_as_albums: bool },
    Picasa,
}

#[derive(Debug, Clone)]
pub struct FolderOptions {
    pub recursive: bool,
    pub into_album: Option<String>,
    pub folder_as_album: AlbumMode,
    pub album_path_joiner: String,
    pub folder_as_tags: bool,
    pub ignore_sidecars: bool,
    pub flavor: FolderFlavor,
}

impl Default for FolderOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            into_album: None,
            folder_as_album: AlbumMode::None,
            album_path_joiner: " / ".to_string(),
            folder_as_tags: false,
            ignore_sidecars: false,
            flavor: FolderFlavor::Plain,
        }
    }
}

impl FolderOptions {
    pub fn validate(&self) -> ReaderResult<()> {
        if self.into_album.is_some() && self.folder_as_album != AlbumMode::None {
            return Err(ReaderError::Invalid(
                "into_album and folder_as_album cannot be used together".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct FolderReader {
    sources: Vec<Arc<SourceFs>>,
    options: FolderOptions,
    common: Arc<ReaderOptions>,
}

/// Topmost banned directory on the way to `dir`
fn banned_root(ban_list: &BanList, dir: &str) -> Option<String> {
    if dir == "." {
        return None;
    }
    let mut prefix = String::new();
    for part in dir.split('/') {
        prefix = join_path(&prefix, part);
        if ban_list.is_banned_dir(&prefix) {
            return Some(prefix);
        }
    }
    None
}

impl FolderReader {
    /// Create a new folder reader over already opened sources
    pub fn new(mut sources: Vec<Arc<SourceFs>>, options: FolderOptions, common: Arc<ReaderOptions>) -> ReaderResult<Self> {
        options.validate()?;
        sources.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(Self {
            sources,
            options,
            common,
        })
    }

    pub fn name(&self) -> String {
        match self.options.flavor {
            FolderFlavor::Plain => "folder".to_string(),
            FolderFlavor::ICloud { .. } => "icloud".to_string(),
            FolderFlavor::Picasa => "picasa".to_string(),
        }
    }

    /// Reader name and its sources, unique enough to order readers by
    pub fn identity(&self) -> String {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name().as_ref()).collect();
        format!("{}:{}", self.name(), names.join(","))
    }

    pub fn browse(&self, ctx: &BrowseContext) -> ReaderResult<()> {
        for fs in &self.sources {
            self.browse_source(ctx, fs)?;
        }
        Ok(())
    }

    fn browse_source(&self, ctx: &BrowseContext, fs: &Arc<SourceFs>) -> ReaderResult<()> {
        let entries = fs.walk()?;
        info!(source = %fs.name(), files = entries.len(), "Source listed");

        let icloud = match self.options.flavor {
            FolderFlavor::ICloud { memories_as_albums } => {
                Some(icloud::read_metadata(ctx, fs, &entries, memories_as_albums))
            }
            _ => None,
        };

        let mut dirs: BTreeMap<String, Vec<FsEntry>> = BTreeMap::new();
        for entry in entries {
            dirs.entry(dir_name(&entry.path).to_string()).or_default().push(entry);
        }

        let mut banned_dirs = HashSet::new();
        for (dir, files) in dirs {
            ctx.check_cancelled()?;
            if !self.options.recursive && dir != "." {
                continue;
            }
            if let Some(root) = banned_root(&self.common.ban_list, &dir) {
                if banned_dirs.insert(root.clone()) {
                    ctx.processor.record_non_asset(
                        &fs.file_id(&root),
                        0,
                        EventCode::DiscoveredBanned,
                        &[("reason", "banned folder".to_string())],
                    );
                }
                continue;
            }
            self.read_dir(ctx, fs, &dir, &files, icloud.as_ref())?;
        }
        Ok(())
    }

    fn read_dir(
        &self,
        ctx: &BrowseContext,
        fs: &Arc<SourceFs>,
        dir: &str,
        files: &[FsEntry],
        icloud: Option<&ICloudIndex>,
    ) -> ReaderResult<()> {
        let lower_paths: HashMap<String, String> =
            files.iter().map(|e| (e.path.to_lowercase(), e.path.clone())).collect();
        let mut picasa_album = None;
        let mut assets = Vec::new();
        let mut sidecar_entries = Vec::new();

        for entry in files {
            let name = entry.name();
            let file = fs.file_id(&entry.path);

            if self.common.ban_list.is_banned(&entry.path) {
                ctx.record_banned(fs, entry);
                continue;
            }

            if self.options.flavor == FolderFlavor::Picasa && picasa::is_picasa_ini(name) {
                match picasa::read_album(fs, &entry.path) {
                    Ok(album) => {
                        info!(file = %file, album = %album.title, "Picasa album detected");
                        ctx.processor.record_non_asset(&file, entry.size, EventCode::Metadata, &[]);
                        picasa_album = Some(album);
                    }
                    Err(e) => ctx
                        .processor
                        .record_non_asset(&file, entry.size, EventCode::Error, &[("error", e.to_string())]),
                }
                continue;
            }

            let ext = media::extension(name);
            if matches!(self.options.flavor, FolderFlavor::ICloud { .. }) && ext == ".csv" {
                continue;
            }

            if media::is_useless(name) {
                ctx.processor.record_non_asset(&file, entry.size, EventCode::DiscoveredUseless, &[]);
                continue;
            }

            match media::type_from_ext(&ext) {
                MediaType::Unknown => ctx.processor.record_non_asset(
                    &file,
                    entry.size,
                    EventCode::DiscoveredUnsupported,
                    &[("reason", "unsupported file type".to_string())],
                ),
                MediaType::Useless => {
                    ctx.processor.record_non_asset(&file, entry.size, EventCode::DiscoveredUseless, &[])
                }
                MediaType::Sidecar => {
                    if self.options.ignore_sidecars {
                        ctx.processor.record_non_asset(
                            &file,
                            entry.size,
                            EventCode::DiscoveredDiscarded,
                            &[("reason", "sidecar file ignored".to_string())],
                        );
                    } else {
                        ctx.processor.record_non_asset(&file, entry.size, EventCode::DiscoveredSidecar, &[]);
                        sidecar_entries.push(entry);
                    }
                }
                MediaType::Image | MediaType::Video => {
                    if let Some(reason) = self.common.extension_rejection(&ext) {
                        ctx.processor.record_asset_discarded_immediately(
                            &file,
                            entry.size,
                            EventCode::DiscoveredDiscarded,
                            reason,
                        );
                        continue;
                    }
                    assets.push(ctx.discover(fs, entry));
                }
            }
        }

        let mut bound = HashSet::new();
        for asset in assets.iter_mut() {
            self.attach_metadata(ctx, fs, asset, &lower_paths, icloud, &mut bound);
        }
        for entry in sidecar_entries.into_iter().filter(|e| !bound.contains(&e.path)) {
            debug!(file = %fs.file_id(&entry.path), "Sidecar without asset");
            ctx.processor.record_non_asset(
                &fs.file_id(&entry.path),
                entry.size,
                EventCode::AnalysisMissingAssociatedMetadata,
                &[("reason", "no asset for this sidecar".to_string())],
            );
        }

        // EXIF reads dominate a directory, spread them over the rayon pool
        let date_from_name = self.common.date_from_name;
        assets.par_iter_mut().for_each(|asset| {
            let source = resolve_capture_date(asset, date_from_name);
            debug!(file = %asset.file, ?source, "Capture date resolved");
        });

        for asset in assets.iter_mut() {
            self.label(fs, dir, asset, picasa_album.as_ref());
        }

        sort_for_grouping(&mut assets);
        for group in group_assets(assets, self.common.grouping) {
            ctx.emit(group)?;
        }
        Ok(())
    }

    /// Read a sidecar's bytes, recording a failure against the sidecar
    fn read_sidecar(&self, ctx: &BrowseContext, fs: &SourceFs, path: &str) -> Option<Vec<u8>> {
        match fs.read_all(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                ctx.processor
                    .record_non_asset(&fs.file_id(path), 0, EventCode::Error, &[("error", e.to_string())]);
                None
            }
        }
    }

    /// Read the JSON and XMP sidecars of an asset, adding their paths to `bound`
    fn apply_sidecars(
        &self,
        ctx: &BrowseContext,
        fs: &SourceFs,
        asset: &mut Asset,
        lower_paths: &HashMap<String, String>,
        bound: &mut HashSet<String>,
    ) {
        let path = asset.file.path().to_string();

        if let Some(json) = sidecars::find_sidecar(lower_paths, &path, ".json") {
            bound.insert(json.clone());
            if let Some(bytes) = self.read_sidecar(ctx, fs, &json) {
                if bytes.windows(EXPORT_MARKER.len()).any(|w| w == EXPORT_MARKER) {
                    match sidecars::parse_export_json(&bytes) {
                        Ok(md) => {
                            asset.apply_metadata(&md);
                            ctx.processor.record_asset_event(
                                &asset.file,
                                EventCode::AnalysisAssociatedMetadata,
                                &[("sidecar", base_name(&json).to_string())],
                            );
                        }
                        Err(e) => ctx.processor.record_non_asset(
                            &fs.file_id(&json),
                            bytes.len() as u64,
                            EventCode::Error,
                            &[("error", e.to_string())],
                        ),
                    }
                } else {
                    warn!(file = %fs.file_id(&json), "JSON file detected but not written by an export");
                }
            }
        }

        if let Some(xmp) = sidecars::find_sidecar(lower_paths, &path, ".xmp") {
            bound.insert(xmp.clone());
            if let Some(bytes) = self.read_sidecar(ctx, fs, &xmp) {
                let md = sidecars::parse_xmp(&bytes);
                let from_application = asset.from_application;
                asset.apply_metadata(&md);
                // the server reads the XMP itself
                asset.from_application = from_application;
                asset.sidecar = Some(fs.file_id(&xmp));
                ctx.processor.record_asset_event(
                    &asset.file,
                    EventCode::AnalysisAssociatedMetadata,
                    &[("sidecar", base_name(&xmp).to_string())],
                );
            }
        }
    }

    /// Album named after the directory per the configured mode
    fn folder_album(&self, fs: &SourceFs, dir: &str) -> Option<String> {
        match self.options.folder_as_album {
            AlbumMode::None => None,
            AlbumMode::Folder => {
                if dir == "." {
                    Some(fs.name().to_string())
                } else {
                    Some(base_name(dir).to_string())
                }
            }
            AlbumMode::Path => {
                let mut parts = vec![fs.name().to_string()];
                if dir != "." {
                    parts.extend(dir.split('/').map(str::to_string));
                }
                Some(parts.join(&self.options.album_path_joiner))
            }
        }
    }

    /// Sidecar and iCloud metadata for one asset
    fn attach_metadata(
        &self,
        ctx: &BrowseContext,
        fs: &SourceFs,
        asset: &mut Asset,
        lower_paths: &HashMap<String, String>,
        icloud: Option<&ICloudIndex>,
        bound: &mut HashSet<String>,
    ) {
        if !self.options.ignore_sidecars {
            self.apply_sidecars(ctx, fs, asset, lower_paths, bound);
        }

        if let Some(meta) = icloud.and_then(|index| index.get(asset.file.name())) {
            if let Some(created) = meta.created {
                asset.capture_date = Some(created);
                asset.date_source = DateSource::Sidecar;
            }
            for album in &meta.albums {
                asset.add_album(album.clone());
            }
        }
    }

    /// Run tags, folder tags and the album of an asset
    fn label(&self, fs: &SourceFs, dir: &str, asset: &mut Asset, picasa_album: Option<&Album>) {
        self.common.add_run_tags(asset);
        if self.options.folder_as_tags {
            let tag = if dir == "." {
                fs.name().to_string()
            } else {
                join_path(fs.name(), dir)
            };
            asset.add_tag(tag);
        }

        if let Some(album) = &self.options.into_album {
            asset.albums = vec![Album::named(album.clone())];
        } else if let Some(album) = picasa_album.filter(|a| !a.title.is_empty()) {
            asset.add_album(album.clone());
        } else if let Some(title) = self.folder_album(fs, dir) {
            asset.add_album(Album::named(title));
        }
    }
}
