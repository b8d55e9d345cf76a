//! Media classification by file extension

use std::collections::HashMap;

use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Image,
    Video,
    Sidecar,
    Useless,
    Unknown,
}

impl MediaType {
    pub fn is_asset(self) -> bool {
        matches!(self, MediaType::Image | MediaType::Video)
    }
}

static SUPPORTED_MEDIA: Lazy<HashMap<&'static str, MediaType>> = Lazy::new(|| {
    let videos = [
        ".3gp", ".avi", ".flv", ".insv", ".m2ts", ".m4v", ".mkv", ".mov", ".mp4", ".mpg", ".mts", ".webm",
        ".wmv",
    ];
    let images = [
        ".3fr", ".ari", ".arw", ".avif", ".bmp", ".cap", ".cin", ".cr2", ".cr3", ".crw", ".dcr", ".dng",
        ".erf", ".fff", ".gif", ".heic", ".heif", ".hif", ".iiq", ".insp", ".jpe", ".jpeg", ".jpg", ".jxl",
        ".k25", ".kdc", ".mrw", ".nef", ".orf", ".ori", ".pef", ".png", ".psd", ".raf", ".raw", ".rw2",
        ".rwl", ".sr2", ".srf", ".srw", ".tif", ".tiff", ".webp", ".x3f",
    ];
    let mut map = HashMap::new();
    for ext in videos {
        map.insert(ext, MediaType::Video);
    }
    for ext in images {
        map.insert(ext, MediaType::Image);
    }
    map.insert(".xmp", MediaType::Sidecar);
    map.insert(".json", MediaType::Sidecar);
    map.insert(".mp", MediaType::Useless);
    map
});

const RAW_EXTENSIONS: [&str; 30] = [
    ".3fr", ".ari", ".arw", ".cap", ".cin", ".cr2", ".cr3", ".crw", ".dcr", ".dng", ".erf", ".fff",
    ".iiq", ".k25", ".kdc", ".mrw", ".nef", ".nrw", ".orf", ".ori", ".pef", ".psd", ".raf", ".raw",
    ".rw2", ".rwl", ".sr2", ".srf", ".srw", ".x3f",
];

/// Lower-cased extension including the dot, `""` when there is none
pub fn extension(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    match base.rfind('.') {
        Some(i) => base[i..].to_lowercase(),
        None => String::new(),
    }
}

/// Name without its extension
pub fn stem(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    match base.rfind('.') {
        Some(i) => &base[..i],
        None => base,
    }
}

pub fn type_from_ext(ext: &str) -> MediaType {
    let mut ext = ext.to_lowercase();
    if ext.starts_with(".mp~") {
        ext = ".mp".to_string();
    }
    SUPPORTED_MEDIA.get(ext.as_str()).copied().unwrap_or(MediaType::Unknown)
}

pub fn type_from_name(name: &str) -> MediaType {
    type_from_ext(&extension(name))
}

pub fn is_media_ext(ext: &str) -> bool {
    type_from_ext(ext).is_asset()
}

pub fn is_raw_ext(ext: &str) -> bool {
    RAW_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

pub fn is_jpeg_ext(ext: &str) -> bool {
    matches!(ext.to_lowercase().as_str(), ".jpg" | ".jpeg" | ".jpe")
}

pub fn is_heic_ext(ext: &str) -> bool {
    matches!(ext.to_lowercase().as_str(), ".heic" | ".heif" | ".hif")
}

/// Files with no use for the server: `.MP` leftovers and motion-photo video halves
pub fn is_useless(name: &str) -> bool {
    let ext = extension(name);
    let kind = type_from_ext(&ext);
    if kind == MediaType::Useless {
        return true;
    }
    let base = name.rsplit('/').next().unwrap_or(name);
    (ext.is_empty() || kind == MediaType::Video) && base.to_uppercase().starts_with("MVIMG")
}

/// Motion-photo video parts (`.MP`, `.mp~2`, `MVIMG*` videos)
pub fn is_motion_part(name: &str) -> bool {
    let ext = extension(name);
    if type_from_ext(&ext) == MediaType::Useless {
        return true;
    }
    let base = name.rsplit('/').next().unwrap_or(name);
    type_from_ext(&ext) == MediaType::Video && base.to_uppercase().starts_with("MVIMG")
}

/// MIME type sent with uploads
pub fn mime_type(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        ".jpg" | ".jpeg" | ".jpe" => "image/jpeg",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".heic" => "image/heic",
        ".heif" | ".hif" => "image/heif",
        ".webp" => "image/webp",
        ".avif" => "image/avif",
        ".tif" | ".tiff" => "image/tiff",
        ".bmp" => "image/bmp",
        ".jxl" => "image/jxl",
        ".mp4" | ".insv" => "video/mp4",
        ".mov" => "video/quicktime",
        ".avi" => "video/x-msvideo",
        ".mkv" => "video/x-matroska",
        ".webm" => "video/webm",
        ".3gp" => "video/3gpp",
        ".m4v" => "video/x-m4v",
        ".mpg" => "video/mpeg",
        ".wmv" => "video/x-ms-wmv",
        ".flv" => "video/x-flv",
        ".mts" | ".m2ts" => "video/mp2t",
        _ => "application/octet-stream",
    }
}
