//! Google Photos Takeout reader
//!
//! This module provides functionality for:
//! 1. Cataloguing media and JSON files of every directory, across all archive parts
//! 2. Binding each JSON to its media files with Google's naming rules
//! 3. Dropping copies of an asset already seen in another directory, merging their albums
//! 4. Archived, trashed, partner and album filters, then grouping per directory
//!
//! Takeout splits a library over several ZIP parts; a directory's files and
//! their JSON may sit in different parts, so the catalogue is keyed by the
//! path inside the archive, not by the archive.

pub mod json;
pub mod matchers;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use self::json::GoogleMetaData;
use self::matchers::{MATCHERS, clean_json_name};
use super::{BrowseContext, ReaderOptions, ReaderResult, sort_for_grouping};
use crate::ingest::analyzer::dates::resolve_capture_date;
use crate::ingest::analyzer::groups::group_assets;
use crate::ingest::asset::{Album, Asset, DateSource, Group, Rejection};
use crate::ingest::events::EventCode;
use crate::ingest::fsys::{FileId, FsEntry, SourceFs, base_name, dir_name};
use crate::ingest::media::{self, MediaType};
use crate::ingest::names::name_info;

static YEAR_FOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Photos from \d{4}$").unwrap());
static PART_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\d+$").unwrap());

/// Folder names Takeout uses for its own layout
const LAYOUT_FOLDERS: [&str; 5] = ["Takeout", "Google Photos", "Google Foto", "Google Fotos", "Failed Videos"];

const EXPORT_JSON_MARKER: &str = "immich-go version:";

#[derive(Debug, Clone)]
pub struct TakeoutOptions {
    /// Keep media files no JSON describes
    pub include_unmatched: bool,
    pub include_archived: bool,
    pub include_partner: bool,
    pub include_trashed: bool,
    /// Only assets belonging to this album
    pub from_album_name: Option<String>,
    /// Album every partner asset joins
    pub partner_shared_album: Option<String>,
    pub into_album: Option<String>,
    pub people_tag: bool,
    pub takeout_tag: bool,
}

impl Default for TakeoutOptions {
    fn default() -> Self {
        Self {
            include_unmatched: false,
            include_archived: true,
            include_partner: true,
            include_trashed: false,
            from_album_name: None,
            partner_shared_album: None,
            into_album: None,
            people_tag: true,
            takeout_tag: true,
        }
    }
}

/// An asset JSON and the file it was read from
struct JsonSidecar {
    file: FileId,
    size: u64,
    md: GoogleMetaData,
}

/// Files of one directory, across all parts
#[derive(Default)]
struct DirCatalog {
    jsons: BTreeMap<String, JsonSidecar>,
    unmatched: BTreeMap<String, Asset>,
    matched: BTreeMap<String, Asset>,
    motion_parts: Vec<(Arc<SourceFs>, FsEntry)>,
}

#[derive(Default)]
struct Catalog {
    dirs: BTreeMap<String, DirCatalog>,
    albums: HashMap<String, Album>,
    /// Directories where each `(base name, size)` was seen
    keys: HashMap<(String, u64), Vec<String>>,
}

/// `takeout-20230101T000000Z-001.zip` -> `takeout-20230101T000000Z`
pub fn archive_name(source: &str) -> String {
    let name = if source.to_lowercase().ends_with(".zip") {
        &source[..source.len() - 4]
    } else {
        source
    };
    PART_SUFFIX.replace(name, "").to_string()
}

/// Stem shared by a motion photo and its video part (`PXL_1.MP.jpg` / `PXL_1.MP`)
fn motion_stem(name: &str) -> String {
    let stem = media::stem(name);
    if stem.to_lowercase().ends_with(".mp") {
        stem[..stem.len() - 3].to_string()
    } else {
        stem.to_string()
    }
}

/// Title with the media file's extension, as Google sometimes converts formats
fn fixed_title(title: &str, file_name: &str) -> String {
    let file_ext = matchers::ext(file_name);
    let title_ext = matchers::ext(title);
    if title_ext == file_ext {
        return title.to_string();
    }
    let title = matchers::trim_ext(title);
    if matchers::ext(title) == file_ext {
        return title.to_string();
    }
    format!("{}{}", matchers::trim_ext(title), file_ext)
}

fn rejected(mut asset: Asset, rejection: Rejection) -> Group {
    asset.rejected = Some(rejection);
    Group::single(asset)
}

pub struct TakeoutReader {
    sources: Vec<Arc<SourceFs>>,
    options: TakeoutOptions,
    common: Arc<ReaderOptions>,
}

impl TakeoutReader {
    pub fn new(mut sources: Vec<Arc<SourceFs>>, options: TakeoutOptions, common: Arc<ReaderOptions>) -> Self {
        sources.sort_by(|a, b| a.name().cmp(b.name()));
        Self {
            sources,
            options,
            common,
        }
    }

    pub fn name(&self) -> String {
        "google_photos".to_string()
    }

    /// Reader name and its sources, unique enough to order readers by
    pub fn identity(&self) -> String {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name().as_ref()).collect();
        format!("{}:{}", self.name(), names.join(","))
    }

    pub fn browse(&self, ctx: &BrowseContext) -> ReaderResult<()> {
        let mut catalog = Catalog::default();
        for fs in &self.sources {
            self.pass_one(ctx, fs, &mut catalog)?;
        }
        self.resolve_motion_parts(ctx, &mut catalog)?;
        self.solve_puzzle(ctx, &mut catalog)?;
        self.pass_two(ctx, catalog)
    }

    fn pass_one(&self, ctx: &BrowseContext, fs: &Arc<SourceFs>, catalog: &mut Catalog) -> ReaderResult<()> {
        let entries = fs.walk()?;
        info!(source = %fs.name(), files = entries.len(), "Cataloguing takeout part");

        for entry in entries {
            ctx.check_cancelled()?;
            let name = entry.name().to_string();
            let dir = dir_name(&entry.path).to_string();
            let file = fs.file_id(&entry.path);

            if self.common.ban_list.is_banned(&entry.path) {
                ctx.record_banned(fs, &entry);
                continue;
            }

            if media::is_motion_part(&name) {
                catalog.dirs.entry(dir).or_default().motion_parts.push((fs.clone(), entry));
                continue;
            }

            if media::is_useless(&name) {
                ctx.processor.record_non_asset(&file, entry.size, EventCode::DiscoveredUseless, &[]);
                continue;
            }

            let ext = media::extension(&name);
            if ext == ".json" {
                self.catalog_json(ctx, fs, &entry, &dir, catalog);
                continue;
            }

            match media::type_from_ext(&ext) {
                MediaType::Image | MediaType::Video => {}
                MediaType::Sidecar => {
                    ctx.processor.record_non_asset(&file, entry.size, EventCode::DiscoveredSidecar, &[]);
                    continue;
                }
                MediaType::Useless => {
                    ctx.processor.record_non_asset(&file, entry.size, EventCode::DiscoveredUseless, &[]);
                    continue;
                }
                MediaType::Unknown => {
                    ctx.processor.record_non_asset(
                        &file,
                        entry.size,
                        EventCode::DiscoveredUnsupported,
                        &[("reason", "unsupported file type".to_string())],
                    );
                    continue;
                }
            }

            if let Some(reason) = self.common.extension_rejection(&ext) {
                ctx.processor.record_asset_discarded_immediately(
                    &file,
                    entry.size,
                    EventCode::DiscoveredDiscarded,
                    reason,
                );
                continue;
            }

            let asset = ctx.discover(fs, &entry);
            if entry.path.contains("Failed Videos") {
                ctx.emit(rejected(asset, Rejection::discarded("can't upload failed videos")))?;
                continue;
            }

            let dirs = catalog.keys.entry((name.clone(), entry.size)).or_default();
            if !dirs.contains(&dir) {
                dirs.push(dir.clone());
            }

            let dir_catalog = catalog.dirs.entry(dir).or_default();
            if dir_catalog.unmatched.contains_key(&name) {
                ctx.emit(rejected(asset, Rejection::local_duplicate("duplicated in the directory")))?;
                continue;
            }
            dir_catalog.unmatched.insert(name, asset);
        }
        Ok(())
    }

    fn catalog_json(&self, ctx: &BrowseContext, fs: &SourceFs, entry: &FsEntry, dir: &str, catalog: &mut Catalog) {
        let file = fs.file_id(&entry.path);
        let bytes = match fs.read_all(&entry.path) {
            Ok(b) => b,
            Err(e) => {
                ctx.processor
                    .record_non_asset(&file, entry.size, EventCode::Error, &[("error", e.to_string())]);
                return;
            }
        };

        if String::from_utf8_lossy(&bytes).contains(EXPORT_JSON_MARKER) {
            ctx.processor.record_non_asset(
                &file,
                entry.size,
                EventCode::DiscoveredSidecar,
                &[("type", "immich-go metadata".to_string())],
            );
            return;
        }

        match GoogleMetaData::parse(&bytes) {
            Ok(md) if md.is_asset() => {
                catalog
                    .dirs
                    .entry(dir.to_string())
                    .or_default()
                    .jsons
                    .insert(
                        clean_json_name(entry.name()),
                        JsonSidecar {
                            file: file.clone(),
                            size: entry.size,
                            md,
                        },
                    );
                ctx.processor.record_non_asset(
                    &file,
                    entry.size,
                    EventCode::DiscoveredSidecar,
                    &[("type", "asset metadata".to_string())],
                );
            }
            Ok(md) if md.is_album() => {
                let album = md.as_album(base_name(dir));
                debug!(file = %file, album = %album.title, "Album metadata");
                catalog.albums.insert(dir.to_string(), album);
                ctx.processor.record_non_asset(
                    &file,
                    entry.size,
                    EventCode::DiscoveredSidecar,
                    &[("type", "album metadata".to_string())],
                );
            }
            _ => ctx.processor.record_non_asset(
                &file,
                entry.size,
                EventCode::DiscoveredUnsupported,
                &[("reason", "unknown JSON file".to_string())],
            ),
        }
    }

    /// Motion-photo video parts are by-products when their still image was exported too
    fn resolve_motion_parts(&self, ctx: &BrowseContext, catalog: &mut Catalog) -> ReaderResult<()> {
        for dir_catalog in catalog.dirs.values_mut() {
            let stills: HashSet<String> = dir_catalog
                .unmatched
                .values()
                .filter(|a| a.is_image())
                .map(|a| motion_stem(a.file.name()))
                .collect();

            for (fs, entry) in std::mem::take(&mut dir_catalog.motion_parts) {
                let file = fs.file_id(&entry.path);
                if stills.contains(&motion_stem(entry.name())) {
                    ctx.processor
                        .record_asset_discovered(&file, entry.size, EventCode::DiscoveredVideo);
                    let asset = Asset::from_entry(&fs, &entry);
                    ctx.emit(rejected(asset, Rejection::discarded("motion photo by-product")))?;
                } else {
                    ctx.processor
                        .record_non_asset(&file, entry.size, EventCode::DiscoveredUseless, &[]);
                }
            }
        }
        Ok(())
    }

    /// Bind JSON files to media files, directory by directory
    fn solve_puzzle(&self, ctx: &BrowseContext, catalog: &mut Catalog) -> ReaderResult<()> {
        for (dir, dir_catalog) in catalog.dirs.iter_mut() {
            ctx.check_cancelled()?;
            let mut used: HashSet<String> = HashSet::new();
            for (matcher_name, matcher) in MATCHERS.iter() {
                for (json_name, json) in &dir_catalog.jsons {
                    let bound: Vec<String> = dir_catalog
                        .unmatched
                        .keys()
                        .filter(|f| matcher(json_name, f))
                        .cloned()
                        .collect();
                    for name in bound {
                        let Some(mut asset) = dir_catalog.unmatched.remove(&name) else {
                            continue;
                        };
                        self.make_asset(&mut asset, &json.md);
                        used.insert(json_name.clone());
                        ctx.processor.record_asset_event(
                            &asset.file,
                            EventCode::AnalysisAssociatedMetadata,
                            &[
                                ("json", json_name.clone()),
                                ("matcher", matcher_name.to_string()),
                            ],
                        );
                        dir_catalog.matched.insert(name, asset);
                    }
                }
            }

            for (json_name, json) in &dir_catalog.jsons {
                if !used.contains(json_name) {
                    debug!(dir = %dir, json = %json_name, "JSON describes no file");
                    ctx.processor.record_non_asset(
                        &json.file,
                        json.size,
                        EventCode::AnalysisMissingAssociatedMetadata,
                        &[("reason", "no media file for this JSON".to_string())],
                    );
                }
            }

            for (name, asset) in std::mem::take(&mut dir_catalog.unmatched) {
                ctx.processor
                    .record_asset_event(&asset.file, EventCode::AnalysisMissingAssociatedMetadata, &[]);
                if self.options.include_unmatched {
                    dir_catalog.matched.insert(name, asset);
                } else {
                    debug!(dir = %dir, file = %asset.file, "No JSON for file");
                    ctx.emit(rejected(asset, Rejection::discarded("no associated metadata")))?;
                }
            }
        }
        Ok(())
    }

    fn make_asset(&self, asset: &mut Asset, md: &GoogleMetaData) {
        let metadata = md.as_metadata(self.options.people_tag);
        asset.apply_metadata(&metadata);
        let title = if md.title.is_empty() {
            asset.file.name().to_string()
        } else {
            fixed_title(&md.sanitized_title(), asset.file.name())
        };
        asset.name_info = name_info(&title);
        asset.original_file_name = title;
    }

    /// Album of a directory: its album JSON, else a folder that is not part of Takeout's layout
    fn dir_album(&self, catalog: &Catalog, dir: &str) -> Option<Album> {
        if let Some(album) = catalog.albums.get(dir) {
            return Some(album.clone());
        }
        let base = base_name(dir);
        if dir == "." || YEAR_FOLDER.is_match(base) || LAYOUT_FOLDERS.contains(&base) {
            return None;
        }
        Some(Album::named(base))
    }

    fn filter_reason(&self, asset: &Asset) -> Option<&'static str> {
        if asset.trashed && !self.options.include_trashed {
            return Some("discarding trashed file");
        }
        if asset.archived && !self.options.include_archived {
            return Some("discarding archived file");
        }
        if asset.from_partner && !self.options.include_partner {
            return Some("discarding partner file");
        }
        None
    }

    fn pass_two(&self, ctx: &BrowseContext, mut catalog: Catalog) -> ReaderResult<()> {
        let mut done: HashSet<(String, u64)> = HashSet::new();
        let dirs: Vec<String> = catalog.dirs.keys().cloned().collect();

        for dir in dirs {
            ctx.check_cancelled()?;
            let matched = match catalog.dirs.get_mut(&dir) {
                Some(c) => std::mem::take(&mut c.matched),
                None => continue,
            };

            let mut assets = Vec::new();
            for (name, mut asset) in matched {
                let key = (name, asset.size);
                if !done.insert(key.clone()) {
                    ctx.emit(rejected(asset, Rejection::local_duplicate("local duplicate")))?;
                    continue;
                }
                if let Some(reason) = self.filter_reason(&asset) {
                    ctx.emit(rejected(asset, Rejection::discarded(reason)))?;
                    continue;
                }

                let mut albums = Vec::new();
                for album_dir in catalog.keys.get(&key).map(Vec::as_slice).unwrap_or(&[]) {
                    if let Some(album) = self.dir_album(&catalog, album_dir) {
                        albums.push(album);
                    }
                }

                if let Some(wanted) = &self.options.from_album_name {
                    if !albums.iter().any(|a| &a.title == wanted) {
                        ctx.emit(rejected(
                            asset,
                            Rejection::discarded(format!("not in album {}", wanted)),
                        ))?;
                        continue;
                    }
                }

                if asset.date_source != DateSource::Sidecar || asset.capture_date.is_none() {
                    resolve_capture_date(&mut asset, self.common.date_from_name);
                }

                if let Some(album) = &self.options.into_album {
                    asset.albums = vec![Album::named(album.clone())];
                } else {
                    for album in albums {
                        if !asset.has_gps() && (album.latitude != 0.0 || album.longitude != 0.0) {
                            asset.latitude = album.latitude;
                            asset.longitude = album.longitude;
                        }
                        asset.add_album(album);
                    }
                    if asset.from_partner {
                        if let Some(partner) = &self.options.partner_shared_album {
                            asset.add_album(Album::named(partner.clone()));
                        }
                    }
                }

                self.common.add_run_tags(&mut asset);
                if self.options.takeout_tag {
                    let tag = format!("{{takeout}}/{}", archive_name(asset.file.source()));
                    asset.add_tag(tag);
                }
                assets.push(asset);
            }

            if assets.is_empty() {
                continue;
            }
            sort_for_grouping(&mut assets);
            for group in group_assets(assets, self.common.grouping) {
                ctx.emit(group)?;
            }
        }

        if catalog.dirs.is_empty() {
            warn!("No Takeout content found");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fsys::tests::write_zip;
    use crate::ingest::readers::tests::test_context;
    use std::fs;
    use std::path::Path;

    fn write(root: &Path, path: &str, content: &[u8]) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    fn asset_json(title: &str, ts: i64) -> String {
        format!(
            r#"{{"title":"{}","photoTakenTime":{{"timestamp":"{}"}},"geoData":{{"latitude":0.0,"longitude":0.0}}}}"#,
            title, ts
        )
    }

    fn reader(sources: Vec<Arc<SourceFs>>, options: TakeoutOptions) -> TakeoutReader {
        TakeoutReader::new(sources, options, Arc::new(ReaderOptions::default()))
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(archive_name("takeout-20230101T000000Z-001.zip"), "takeout-20230101T000000Z");
        assert_eq!(archive_name("Takeout"), "Takeout");
    }

    #[test]
    fn test_fixed_title() {
        assert_eq!(fixed_title("IMG_1.HEIC", "IMG_1.JPG"), "IMG_1.JPG");
        assert_eq!(fixed_title("IMG_1.jpg", "IMG_1.jpg"), "IMG_1.jpg");
        assert_eq!(fixed_title("Holiday", "IMG_1.jpg"), "Holiday.jpg");
        assert_eq!(fixed_title("clip.mp4.jpg", "clip.mp4"), "clip.mp4");
    }

    #[test]
    fn test_album_copies_merge_into_first() {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=5 {
            let name = format!("IMG_000{}.jpg", i);
            let json = asset_json(&name, 1_672_574_400 + i * 3600);
            let content = format!("image-{}", i);
            for folder in ["Photos from 2023", "Trip"] {
                write(dir.path(), &format!("Takeout/Google Photos/{}/{}", folder, name), content.as_bytes());
                write(
                    dir.path(),
                    &format!("Takeout/Google Photos/{}/{}.json", folder, name),
                    json.as_bytes(),
                );
            }
        }
        write(
            dir.path(),
            "Takeout/Google Photos/Trip/metadata.json",
            br#"{"title":"Trip","description":"Summer trip"}"#,
        );

        let src = Arc::new(SourceFs::open_dir(dir.path()).unwrap());
        let (ctx, rx) = test_context(64);
        reader(vec![src], TakeoutOptions::default()).browse(&ctx).unwrap();

        let counts = ctx.processor.get_event_counts();
        assert_eq!(counts[&EventCode::AnalysisAssociatedMetadata], 10);
        assert_eq!(counts[&EventCode::AnalysisMissingAssociatedMetadata], 0);

        let assets: Vec<Asset> = rx.try_iter().flat_map(|g| g.assets).collect();
        assert_eq!(assets.len(), 10);
        let (kept, dups): (Vec<&Asset>, Vec<&Asset>) = assets.iter().partition(|a| a.rejected.is_none());
        assert_eq!(kept.len(), 5);
        assert_eq!(dups.len(), 5);
        for a in &kept {
            assert!(a.file.path().contains("Photos from 2023"));
            assert_eq!(a.albums.len(), 1);
            assert_eq!(a.albums[0].title, "Trip");
            assert_eq!(a.date_source, DateSource::Sidecar);
            assert_eq!(a.tags.len(), 1);
            assert!(a.tags[0].starts_with("{takeout}/"));
        }
        for a in &dups {
            assert_eq!(a.rejected.as_ref().unwrap().code, EventCode::DiscardedLocalDuplicate);
        }
    }

    #[test]
    fn test_stale_json_reported() {
        let dir = tempfile::tempdir().unwrap();
        let root = "Takeout/Google Photos/Photos from 2023";
        write(dir.path(), &format!("{}/a.jpg", root), b"a");
        write(dir.path(), &format!("{}/a.jpg.json", root), asset_json("a.jpg", 1_672_574_400).as_bytes());
        write(dir.path(), &format!("{}/gone.jpg.json", root), asset_json("gone.jpg", 1_672_574_400).as_bytes());

        let src = Arc::new(SourceFs::open_dir(dir.path()).unwrap());
        let (ctx, rx) = test_context(64);
        reader(vec![src], TakeoutOptions::default()).browse(&ctx).unwrap();

        let counts = ctx.processor.get_event_counts();
        assert_eq!(counts[&EventCode::AnalysisAssociatedMetadata], 1);
        assert_eq!(counts[&EventCode::AnalysisMissingAssociatedMetadata], 1);
        let kept: Vec<Asset> = rx.try_iter().flat_map(|g| g.assets).filter(|a| a.rejected.is_none()).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].file.name(), "a.jpg");
    }

    #[test]
    fn test_byproducts_and_unmatched() {
        let dir = tempfile::tempdir().unwrap();
        let root = "Takeout/Google Photos/Photos from 2023";
        write(dir.path(), &format!("{}/PXL_20230101_120000000.MP.jpg", root), b"still");
        write(
            dir.path(),
            &format!("{}/PXL_20230101_120000000.MP.jpg.json", root),
            asset_json("PXL_20230101_120000000.MP.jpg", 1_672_574_400).as_bytes(),
        );
        write(dir.path(), &format!("{}/PXL_20230101_120000000.MP", root), b"motion");
        write(dir.path(), &format!("{}/lonely.jpg", root), b"lonely");
        write(dir.path(), "Takeout/Google Photos/Failed Videos/clip.mp4", b"clip");
        write(dir.path(), &format!("{}/print-subscriptions.json", root), b"[]");

        let src = Arc::new(SourceFs::open_dir(dir.path()).unwrap());
        let (ctx, rx) = test_context(64);
        reader(vec![src.clone()], TakeoutOptions::default()).browse(&ctx).unwrap();

        let counts = ctx.processor.get_event_counts();
        assert_eq!(counts[&EventCode::AnalysisMissingAssociatedMetadata], 1);
        assert_eq!(counts[&EventCode::DiscoveredUnsupported], 1);

        let assets: Vec<Asset> = rx.try_iter().flat_map(|g| g.assets).collect();
        let reason = |name: &str| {
            assets
                .iter()
                .find(|a| a.file.name() == name)
                .and_then(|a| a.rejected.as_ref())
                .map(|r| r.reason.clone())
        };
        assert_eq!(reason("PXL_20230101_120000000.MP").as_deref(), Some("motion photo by-product"));
        assert_eq!(reason("lonely.jpg").as_deref(), Some("no associated metadata"));
        assert_eq!(reason("clip.mp4").as_deref(), Some("can't upload failed videos"));
        assert_eq!(reason("PXL_20230101_120000000.MP.jpg"), None);

        let options = TakeoutOptions {
            include_unmatched: true,
            ..Default::default()
        };
        let (ctx, rx) = test_context(64);
        reader(vec![src], options).browse(&ctx).unwrap();
        let lonely = rx
            .try_iter()
            .flat_map(|g| g.assets)
            .find(|a| a.file.name() == "lonely.jpg")
            .unwrap();
        assert!(lonely.rejected.is_none());
    }

    #[test]
    fn test_multipart_zip_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let root = "Takeout/Google Photos/Photos from 2022";
        let archived = r#"{"title":"IMG_2.jpg","photoTakenTime":{"timestamp":"1650000000"},"archived":true,"googlePhotosOrigin":{"fromPartnerSharing":{}}}"#;
        let part1 = dir.path().join("takeout-20230101T000000Z-001.zip");
        let part2 = dir.path().join("takeout-20230101T000000Z-002.zip");
        let json1 = format!("{}/IMG_1.jpg.json", root);
        let json2 = format!("{}/IMG_2.jpg.json", root);
        let img1 = format!("{}/IMG_1.jpg", root);
        let img2 = format!("{}/IMG_2.jpg", root);
        let meta1 = asset_json("IMG_1.jpg", 1_640_000_000);
        write_zip(
            &part1,
            &[(json1.as_str(), meta1.as_bytes()), (json2.as_str(), archived.as_bytes())],
        );
        write_zip(
            &part2,
            &[(img1.as_str(), b"one".as_slice()), (img2.as_str(), b"two".as_slice())],
        );

        let sources = vec![
            Arc::new(SourceFs::open_zip(&part2).unwrap()),
            Arc::new(SourceFs::open_zip(&part1).unwrap()),
        ];
        let options = TakeoutOptions {
            include_archived: false,
            partner_shared_album: Some("Partner".to_string()),
            ..Default::default()
        };
        let (ctx, rx) = test_context(64);
        reader(sources, options).browse(&ctx).unwrap();

        let assets: Vec<Asset> = rx.try_iter().flat_map(|g| g.assets).collect();
        let one = assets.iter().find(|a| a.file.name() == "IMG_1.jpg").unwrap();
        assert!(one.rejected.is_none());
        assert!(one.albums.is_empty());
        assert_eq!(one.tags, vec!["{takeout}/takeout-20230101T000000Z".to_string()]);

        let two = assets.iter().find(|a| a.file.name() == "IMG_2.jpg").unwrap();
        assert_eq!(two.rejected.as_ref().unwrap().reason, "discarding archived file");
    }

    #[test]
    fn test_from_album_name() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Takeout/Google Photos/Trip/a.jpg", b"a");
        write(dir.path(), "Takeout/Google Photos/Trip/a.jpg.json", asset_json("a.jpg", 1_600_000_000).as_bytes());
        write(dir.path(), "Takeout/Google Photos/Home/b.jpg", b"b");
        write(dir.path(), "Takeout/Google Photos/Home/b.jpg.json", asset_json("b.jpg", 1_600_000_000).as_bytes());

        let options = TakeoutOptions {
            from_album_name: Some("Trip".to_string()),
            takeout_tag: false,
            ..Default::default()
        };
        let src = Arc::new(SourceFs::open_dir(dir.path()).unwrap());
        let (ctx, rx) = test_context(64);
        reader(vec![src], options).browse(&ctx).unwrap();

        let assets: Vec<Asset> = rx.try_iter().flat_map(|g| g.assets).collect();
        let kept: Vec<&Asset> = assets.iter().filter(|a| a.rejected.is_none()).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].file.name(), "a.jpg");
        assert!(kept[0].tags.is_empty());
    }
}
