//! Source Filesystems
//!
//! This module provides functionality for:
//! 1. A uniform read interface over OS directory trees and ZIP archives
//! 2. Stable `(source, path)` file identities
//! 3. Expanding multi-part archive globs (`takeout-*.zip`)
//! 4. Extracting ZIPs nested inside archives into the run's temp directory

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

/// Error types for filesystem access
#[derive(Error, Debug)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Unsupported input: {0}")]
    Unsupported(String),
}

/// Result type for filesystem operations
pub type FsResult<T> = Result<T, FsError>;

/// Identity of a file within a run: the source name plus a forward-slash path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId {
    source: Arc<str>,
    path: String,
}

impl FileId {
    pub fn new(source: impl Into<Arc<str>>, path: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            path: path.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        base_name(&self.path)
    }

    /// Parent directory, `"."` for root-level files
    pub fn dir(&self) -> &str {
        dir_name(&self.path)
    }

    /// The formatted identity used for equality and ordering across readers.
    pub fn identity(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}:{}", self.source, self.path)
        }
    }
}

impl PartialOrd for FileId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.identity().cmp(&other.identity())
    }
}

/// One directory or file inside a source
#[derive(Debug, Clone)]
pub struct FsEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl FsEntry {
    pub fn name(&self) -> &str {
        base_name(&self.path)
    }
}

/// Plain directory tree rooted at `root`
#[derive(Debug)]
pub struct DirFs {
    name: Arc<str>,
    root: PathBuf,
}

/// A temp file removed when the owning source is dropped
#[derive(Debug)]
struct TempExtraction {
    path: PathBuf,
}

impl Drop for TempExtraction {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove extracted archive");
        } else {
            debug!(path = %self.path.display(), "Removed extracted archive");
        }
    }
}

/// A ZIP archive. Entries are indexed once at open time.
pub struct ZipFs {
    name: Arc<str>,
    archive: Mutex<ZipArchive<fs::File>>,
    entries: BTreeMap<String, FsEntry>,
    _extracted: Option<TempExtraction>,
}

impl fmt::Debug for ZipFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipFs")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// A readable source of files
#[derive(Debug)]
pub enum SourceFs {
    Dir(DirFs),
    Zip(ZipFs),
}

impl SourceFs {
    /// Open a directory tree
    pub fn open_dir(root: impl AsRef<Path>) -> FsResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(FsError::NotFound(root.display().to_string()));
        }
        let name = root
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| root.display().to_string());
        Ok(SourceFs::Dir(DirFs {
            name: name.into(),
            root,
        }))
    }

    /// Open a ZIP archive, leaving nested archives in place
    pub fn open_zip(path: impl AsRef<Path>) -> FsResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self::open_zip_named(path, name, None)
    }

    fn open_zip_named(path: &Path, name: String, extracted: Option<TempExtraction>) -> FsResult<Self> {
        let file = fs::File::open(path)?;
        let mut archive = ZipArchive::new(file)?;
        let mut entries = BTreeMap::new();

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            let raw_name = entry.name().replace('\\', "/");
            let is_dir = entry.is_dir();
            let entry_path = raw_name.trim_end_matches('/').to_string();
            if entry_path.is_empty() {
                continue;
            }
            let modified = entry.last_modified().and_then(zip_time_to_utc);
            let size = entry.size();
            drop(entry);

            add_parent_dirs(&mut entries, &entry_path);
            entries.insert(
                entry_path.clone(),
                FsEntry {
                    path: entry_path,
                    is_dir,
                    size: if is_dir { 0 } else { size },
                    modified,
                },
            );
        }

        debug!(archive = %name, entries = entries.len(), "Indexed ZIP archive");
        Ok(SourceFs::Zip(ZipFs {
            name: name.into(),
            archive: Mutex::new(archive),
            entries,
            _extracted: extracted,
        }))
    }

    pub fn name(&self) -> &Arc<str> {
        match self {
            SourceFs::Dir(d) => &d.name,
            SourceFs::Zip(z) => &z.name,
        }
    }

    pub fn file_id(&self, path: &str) -> FileId {
        FileId::new(self.name().clone(), path)
    }

    /// Direct children of `dir`, sorted by name. `"."` or `""` is the root.
    pub fn list_dir(&self, dir: &str) -> FsResult<Vec<FsEntry>> {
        let dir = normalize_dir(dir);
        match self {
            SourceFs::Dir(d) => {
                let full = if dir.is_empty() { d.root.clone() } else { d.root.join(&dir) };
                let mut out = Vec::new();
                for entry in fs::read_dir(&full)? {
                    let entry = entry?;
                    let meta = entry.metadata()?;
                    let name = entry.file_name().to_string_lossy().to_string();
                    out.push(FsEntry {
                        path: join_path(&dir, &name),
                        is_dir: meta.is_dir(),
                        size: if meta.is_dir() { 0 } else { meta.len() },
                        modified: meta.modified().ok().map(DateTime::<Utc>::from),
                    });
                }
                out.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(out)
            }
            SourceFs::Zip(z) => Ok(z
                .entries
                .values()
                .filter(|e| dir_name(&e.path) == if dir.is_empty() { "." } else { dir.as_str() })
                .cloned()
                .collect()),
        }
    }

    /// Every file of the source, sorted by path
    pub fn walk(&self) -> FsResult<Vec<FsEntry>> {
        match self {
            SourceFs::Dir(d) => {
                let mut out = Vec::new();
                for entry in WalkDir::new(&d.root).follow_links(true) {
                    let entry = entry?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = match entry.path().strip_prefix(&d.root) {
                        Ok(rel) => rel,
                        Err(_) => continue,
                    };
                    let meta = entry.metadata()?;
                    out.push(FsEntry {
                        path: to_slash(rel),
                        is_dir: false,
                        size: meta.len(),
                        modified: meta.modified().ok().map(DateTime::<Utc>::from),
                    });
                }
                out.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(out)
            }
            SourceFs::Zip(z) => Ok(z.entries.values().filter(|e| !e.is_dir).cloned().collect()),
        }
    }

    pub fn stat(&self, path: &str) -> FsResult<FsEntry> {
        match self {
            SourceFs::Dir(d) => {
                let meta = fs::metadata(d.root.join(path))?;
                Ok(FsEntry {
                    path: path.to_string(),
                    is_dir: meta.is_dir(),
                    size: meta.len(),
                    modified: meta.modified().ok().map(DateTime::<Utc>::from),
                })
            }
            SourceFs::Zip(z) => z
                .entries
                .get(path)
                .cloned()
                .ok_or_else(|| FsError::NotFound(format!("{}:{}", z.name, path))),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.stat(path).is_ok()
    }

    /// Open a file for reading. ZIP members are inflated into memory.
    pub fn open(&self, path: &str) -> FsResult<Box<dyn Read + Send>> {
        match self {
            SourceFs::Dir(d) => Ok(Box::new(fs::File::open(d.root.join(path))?)),
            SourceFs::Zip(_) => Ok(Box::new(Cursor::new(self.read_all(path)?))),
        }
    }

    pub fn read_all(&self, path: &str) -> FsResult<Vec<u8>> {
        match self {
            SourceFs::Dir(d) => Ok(fs::read(d.root.join(path))?),
            SourceFs::Zip(z) => {
                let mut archive = z.archive.lock();
                let mut member = archive.by_name(path)?;
                let mut buf = Vec::with_capacity(member.size() as usize);
                member.read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }

    /// On-disk location of the file when the source is a plain directory
    pub fn local_path(&self, path: &str) -> Option<PathBuf> {
        match self {
            SourceFs::Dir(d) => Some(d.root.join(path)),
            SourceFs::Zip(_) => None,
        }
    }

    fn nested_archives(&self) -> Vec<String> {
        match self {
            SourceFs::Zip(z) => z
                .entries
                .values()
                .filter(|e| !e.is_dir && e.path.to_lowercase().ends_with(".zip"))
                .map(|e| e.path.clone())
                .collect(),
            SourceFs::Dir(_) => Vec::new(),
        }
    }

    fn hide_entries(&mut self, paths: &[String]) {
        if let SourceFs::Zip(z) = self {
            for p in paths {
                z.entries.remove(p);
            }
        }
    }
}

/// Open every input, expanding globs and extracting nested archives into `temp_dir`.
pub fn open_sources(inputs: &[String], temp_dir: &Path) -> FsResult<Vec<Arc<SourceFs>>> {
    let mut sources = Vec::new();
    for input in inputs {
        for path in expand_glob(input)? {
            if path.is_dir() {
                sources.push(Arc::new(SourceFs::open_dir(&path)?));
                continue;
            }
            let is_zip = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("zip"))
                .unwrap_or(false);
            if !is_zip {
                return Err(FsError::Unsupported(path.display().to_string()));
            }

            let mut outer = SourceFs::open_zip(&path)?;
            let nested = outer.nested_archives();
            if !nested.is_empty() {
                fs::create_dir_all(temp_dir)?;
            }
            for member in &nested {
                let file_name = base_name(member).to_string();
                let target = temp_dir.join(format!("{}-{}", uuid::Uuid::new_v4(), file_name));
                fs::write(&target, outer.read_all(member)?)?;
                info!(archive = %outer.name(), member = %member, "Extracted nested archive");
                let guard = TempExtraction { path: target.clone() };
                sources.push(Arc::new(SourceFs::open_zip_named(&target, file_name, Some(guard))?));
            }
            outer.hide_entries(&nested);
            sources.push(Arc::new(outer));
        }
    }
    Ok(sources)
}

/// Expand `*` and `?` in the last path segment; other inputs pass through.
pub fn expand_glob(input: &str) -> FsResult<Vec<PathBuf>> {
    let path = PathBuf::from(input);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if !file_name.contains('*') && !file_name.contains('?') {
        if !path.exists() {
            return Err(FsError::NotFound(input.to_string()));
        }
        return Ok(vec![path]);
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut pattern = String::from("(?i)^");
    for c in file_name.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    pattern.push('$');
    let re = Regex::new(&pattern).map_err(|e| FsError::Unsupported(e.to_string()))?;

    let mut matches: Vec<PathBuf> = fs::read_dir(&parent)?
        .filter_map(|e| e.ok())
        .filter(|e| re.is_match(&e.file_name().to_string_lossy()))
        .map(|e| e.path())
        .collect();
    matches.sort();
    if matches.is_empty() {
        return Err(FsError::NotFound(input.to_string()));
    }
    Ok(matches)
}

pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn dir_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => ".",
    }
}

pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "." {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn normalize_dir(dir: &str) -> String {
    let d = dir.trim_matches('/');
    if d == "." { String::new() } else { d.to_string() }
}

fn to_slash(p: &Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn add_parent_dirs(entries: &mut BTreeMap<String, FsEntry>, path: &str) {
    let mut dir = dir_name(path);
    while dir != "." && !entries.contains_key(dir) {
        entries.insert(
            dir.to_string(),
            FsEntry {
                path: dir.to_string(),
                is_dir: true,
                size: 0,
                modified: None,
            },
        );
        dir = dir_name(dir);
    }
}

fn zip_time_to_utc(t: zip::DateTime) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(t.year() as i32, t.month() as u32, t.day() as u32)?;
    let naive = date.and_hms_opt(t.hour() as u32, t.minute() as u32, t.second() as u32)?;
    Some(Utc.from_utc_datetime(&naive))
}
