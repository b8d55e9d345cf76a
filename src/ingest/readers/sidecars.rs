//! Sidecar files next to local assets
//!
//! This module provides functionality for:
//! 1. Finding `NAME.ext.xmp` / `NAME.xmp` style companions in a directory listing
//! 2. Reading the XMP properties the pipeline uses (date, GPS, rating, description, tags)
//! 3. Reading JSON sidecars written by a previous export

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::ingest::asset::{Album, SidecarMetadata};
use crate::ingest::media;
use crate::ingest::names::local_to_utc;

/// Marker found in JSON sidecars written by an export run
pub const EXPORT_MARKER: &[u8] = b"immich-go version";

/// Companion of `path` with extension `ext`, looked up case-insensitively.
///
/// `lower_paths` maps lower-cased paths of the directory to their real spelling.
pub fn find_sidecar(lower_paths: &HashMap<String, String>, path: &str, ext: &str) -> Option<String> {
    let candidate = format!("{}{}", path, ext).to_lowercase();
    if let Some(found) = lower_paths.get(&candidate) {
        return Some(found.clone());
    }
    let file_ext = media::extension(path);
    if !media::is_media_ext(&file_ext) {
        return None;
    }
    let stem = &path[..path.rfind('.')?];
    lower_paths.get(&format!("{}{}", stem, ext).to_lowercase()).cloned()
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Value of an XMP property written either as an attribute or as a simple element
fn xmp_value(text: &str, property: &str) -> Option<String> {
    let name = regex::escape(property);
    let attribute = Regex::new(&format!(r#"{}\s*=\s*"([^"]*)""#, name)).ok()?;
    if let Some(c) = attribute.captures(text) {
        return Some(unescape(&c[1]));
    }
    let element = Regex::new(&format!(r"(?s)<{}>([^<]*)</{}>", name, name)).ok()?;
    element.captures(text).map(|c| unescape(&c[1]))
}

/// `rdf:li` items of an XMP container property (`rdf:Alt`, `rdf:Bag`, `rdf:Seq`)
fn xmp_items(text: &str, property: &str) -> Vec<String> {
    let name = regex::escape(property);
    let Ok(block) = Regex::new(&format!(r"(?s)<{}>(.*?)</{}>", name, name)) else {
        return Vec::new();
    };
    let Ok(item) = Regex::new(r"(?s)<rdf:li[^>]*>([^<]*)</rdf:li>") else {
        return Vec::new();
    };
    block
        .captures(text)
        .map(|b| {
            item.captures_iter(&b[1])
                .map(|c| unescape(&c[1]))
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// XMP date: RFC 3339, or a local time without offset
fn parse_xmp_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y:%m:%d %H:%M:%S"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(local_to_utc)
}

/// GPS coordinate as `DDD,MM.mmk` / `DDD,MM,SSk`, or a plain decimal
pub fn parse_xmp_coordinate(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Ok(v) = s.parse::<f64>() {
        return Some(v);
    }
    let direction = s.chars().last()?;
    let body = &s[..s.len() - direction.len_utf8()];
    let parts: Vec<&str> = body.split(',').collect();
    let degrees: f64 = parts.first()?.parse().ok()?;
    let minutes: f64 = parts.get(1).map(|m| m.parse().ok()).unwrap_or(Some(0.0))?;
    let seconds: f64 = parts.get(2).map(|m| m.parse().ok()).unwrap_or(Some(0.0))?;
    let value = degrees + minutes / 60.0 + seconds / 3600.0;
    match direction {
        'S' | 'W' => Some(-value),
        'N' | 'E' => Some(value),
        _ => None,
    }
}

/// Read the properties of an XMP packet
pub fn parse_xmp(data: &[u8]) -> SidecarMetadata {
    let text = String::from_utf8_lossy(data);
    let mut md = SidecarMetadata::default();

    md.date_taken = ["exif:DateTimeOriginal", "xmp:CreateDate", "photoshop:DateCreated"]
        .iter()
        .filter_map(|p| xmp_value(&text, p))
        .find_map(|v| parse_xmp_date(&v));

    if let (Some(lat), Some(lon)) = (
        xmp_value(&text, "exif:GPSLatitude").and_then(|v| parse_xmp_coordinate(&v)),
        xmp_value(&text, "exif:GPSLongitude").and_then(|v| parse_xmp_coordinate(&v)),
    ) {
        md.latitude = lat;
        md.longitude = lon;
    }

    if let Some(rating) = xmp_value(&text, "xmp:Rating").and_then(|v| v.parse::<i32>().ok()) {
        md.rating = rating.clamp(0, 5) as u8;
    }

    md.description = xmp_items(&text, "dc:description")
        .into_iter()
        .chain(xmp_items(&text, "exif:ImageDescription"))
        .next()
        .unwrap_or_default();

    let mut tags = xmp_items(&text, "digiKam:TagsList");
    if tags.is_empty() {
        tags = xmp_items(&text, "dc:subject");
    }
    for tag in tags {
        if !md.tags.contains(&tag) {
            md.tags.push(tag);
        }
    }
    md
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportAlbum {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
}

#[derive(Debug, Default, Deserialize)]
struct ExportTag {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportMetadata {
    #[serde(default)]
    file_name: String,
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
    date_taken: Option<DateTime<Utc>>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    albums: Vec<ExportAlbum>,
    #[serde(default)]
    tags: Vec<ExportTag>,
    #[serde(default)]
    rating: u8,
    #[serde(default)]
    trashed: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    favorited: bool,
    #[serde(default)]
    from_partner: bool,
}

/// Read a JSON sidecar written by a previous export
pub fn parse_export_json(data: &[u8]) -> serde_json::Result<SidecarMetadata> {
    let raw: ExportMetadata = serde_json::from_slice(data)?;
    Ok(SidecarMetadata {
        file_name: Some(raw.file_name).filter(|n| !n.is_empty()),
        date_taken: raw.date_taken.filter(|d| d.timestamp() > 0),
        description: raw.description,
        latitude: raw.latitude,
        longitude: raw.longitude,
        rating: raw.rating.min(5),
        favorite: raw.favorited,
        archived: raw.archived,
        trashed: raw.trashed,
        from_partner: raw.from_partner,
        albums: raw
            .albums
            .into_iter()
            .filter(|a| !a.title.is_empty())
            .map(|a| Album {
                title: a.title,
                description: a.description,
                latitude: a.latitude,
                longitude: a.longitude,
            })
            .collect(),
        tags: raw.tags.into_iter().map(|t| t.value).filter(|t| !t.is_empty()).collect(),
    })
}
