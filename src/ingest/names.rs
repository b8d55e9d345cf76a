//! File name information
//!
//! This module provides functionality for:
//! 1. Recognizing vendor burst and series naming schemes
//! 2. Extracting a capture time from a file name or its parent directories
//!
//! Times found in names are wall-clock times without an offset; they are
//! returned as `NaiveDateTime` and placed in the local zone by the caller.

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ingest::media::{self, MediaType};

static PIXEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(PXL_\d{8}_\d{9})((.*)?(\d{2}))?(.*)?(\..*)$").unwrap());
static SAMSUNG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{8}_\d{6})_(\d{3})(\..+)$").unwrap());
static NEXUS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\D+_\d+_(BURST\d+)(\D+)?(\..+)$").unwrap());
static HUAWEI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(IMG_\d{8}_\d{6})_BURST(\d{3})(?:_(\w+))?(\..+)$").unwrap());
static SONY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^DSC_(\d+)_BURST(\d+)(\D+)?(\..+)$").unwrap());
static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(19[89]\d|20\d\d)\D?(0\d|1[0-2])\D?([0-3]\d)\D{0,1}([01]\d|2[0-4])?\D?([0-5]\d)?\D?([0-5]\d)?")
        .unwrap()
});

/// What a vendor naming scheme says about the shot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameKind {
    #[default]
    None,
    Burst,
    Edited,
    Portrait,
    Night,
    LongExposure,
    Motion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameInfo {
    /// File name with extension
    pub base: String,
    /// Part of the name shared by every file of a series
    pub radical: String,
    /// Lower-cased extension
    pub ext: String,
    pub media: MediaType,
    pub kind: NameKind,
    pub index: u32,
    pub is_cover: bool,
    pub taken: Option<NaiveDateTime>,
}

/// Parse `name` (a bare file name) with the vendor schemes, first match wins.
pub fn name_info(name: &str) -> NameInfo {
    let base = name.rsplit('/').next().unwrap_or(name);
    let parsers: [fn(&str) -> Option<NameInfo>; 5] = [pixel, samsung, nexus, huawei, sony_xperia];
    for parser in parsers {
        if let Some(info) = parser(base) {
            return info;
        }
    }
    let ext = media::extension(base);
    let mut kind = NameKind::None;
    if is_edited_name(base) {
        kind = NameKind::Edited;
    }
    NameInfo {
        base: base.to_string(),
        radical: media::stem(base).to_string(),
        media: media::type_from_ext(&ext),
        ext,
        kind,
        index: 0,
        is_cover: false,
        taken: None,
    }
}

fn is_edited_name(base: &str) -> bool {
    let lower = media::stem(base).to_lowercase();
    lower.ends_with("-edited") || lower.ends_with("-modifié") || lower.ends_with("-bearbeitet")
}

fn pixel(name: &str) -> Option<NameInfo> {
    let caps = PIXEL_RE.captures(name)?;
    let radical = caps.get(1)?.as_str();
    let middle = caps.get(3).map(|m| m.as_str()).unwrap_or("");
    let tail = caps.get(5).map(|m| m.as_str()).unwrap_or("");
    let ext = caps.get(6)?.as_str();

    let kind = if middle.contains("PORTRAIT") {
        NameKind::Portrait
    } else if middle.contains("NIGHT") {
        NameKind::Night
    } else if middle.contains("LONG_EXPOSURE") {
        NameKind::LongExposure
    } else if middle.contains("MOTION") {
        NameKind::Motion
    } else {
        NameKind::None
    };

    Some(NameInfo {
        base: name.to_string(),
        radical: radical.to_string(),
        ext: ext.to_lowercase(),
        media: media::type_from_ext(ext),
        kind,
        index: caps.get(4).and_then(|m| m.as_str().parse().ok()).unwrap_or(0),
        is_cover: tail.ends_with("COVER"),
        taken: NaiveDateTime::parse_from_str(&radical[4..19], "%Y%m%d_%H%M%S").ok(),
    })
}

fn samsung(name: &str) -> Option<NameInfo> {
    let caps = SAMSUNG_RE.captures(name)?;
    let radical = caps.get(1)?.as_str();
    let ext = caps.get(3)?.as_str();
    let index: u32 = caps.get(2)?.as_str().parse().ok()?;
    Some(NameInfo {
        base: name.to_string(),
        radical: radical.to_string(),
        ext: ext.to_lowercase(),
        media: media::type_from_ext(ext),
        kind: NameKind::Burst,
        index,
        is_cover: index == 1,
        taken: NaiveDateTime::parse_from_str(radical, "%Y%m%d_%H%M%S").ok(),
    })
}

fn nexus(name: &str) -> Option<NameInfo> {
    let caps = NEXUS_RE.captures(name)?;
    let radical = caps.get(2)?.as_str();
    let ext = caps.get(4)?.as_str();
    let ts = radical.trim_start_matches("BURST");
    let taken = match ts.len() {
        14 => NaiveDateTime::parse_from_str(ts, "%Y%m%d%H%M%S").ok(),
        13 => ts
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|t| t.with_timezone(&Local).naive_local()),
        17 => NaiveDateTime::parse_from_str(&format!("{}.{}", &ts[..14], &ts[14..]), "%Y%m%d%H%M%S%.3f").ok(),
        _ => None,
    };
    Some(NameInfo {
        base: name.to_string(),
        radical: radical.to_string(),
        ext: ext.to_lowercase(),
        media: media::type_from_ext(ext),
        kind: NameKind::Burst,
        index: caps.get(1)?.as_str().parse().unwrap_or(0),
        is_cover: caps.get(3).map(|m| m.as_str().contains("COVER")).unwrap_or(false),
        taken,
    })
}

fn huawei(name: &str) -> Option<NameInfo> {
    let caps = HUAWEI_RE.captures(name)?;
    let radical = caps.get(1)?.as_str();
    let ext = caps.get(4)?.as_str();
    Some(NameInfo {
        base: name.to_string(),
        radical: radical.to_string(),
        ext: ext.to_lowercase(),
        media: media::type_from_ext(ext),
        kind: NameKind::Burst,
        index: caps.get(2)?.as_str().parse().unwrap_or(0),
        is_cover: caps.get(3).map(|m| m.as_str().ends_with("COVER")).unwrap_or(false),
        taken: NaiveDateTime::parse_from_str(&radical[4..19], "%Y%m%d_%H%M%S").ok(),
    })
}

fn sony_xperia(name: &str) -> Option<NameInfo> {
    let caps = SONY_RE.captures(name)?;
    let digits = caps.get(2)?.as_str();
    let ext = caps.get(4)?.as_str();
    let taken = if digits.len() > 14 {
        NaiveDateTime::parse_from_str(&format!("{}.{}", &digits[..14], &digits[14..]), "%Y%m%d%H%M%S%.f").ok()
    } else {
        NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S").ok()
    };
    Some(NameInfo {
        base: name.to_string(),
        radical: format!("BURST{}", digits),
        ext: ext.to_lowercase(),
        media: media::type_from_ext(ext),
        kind: NameKind::Burst,
        index: caps.get(1)?.as_str().parse().unwrap_or(0),
        is_cover: caps.get(3).map(|m| m.as_str().contains("COVER")).unwrap_or(false),
        taken,
    })
}

/// First plausible date in a single name segment
pub fn take_time_from_name(s: &str) -> Option<NaiveDateTime> {
    let caps = TIME_RE.captures(s)?;
    let num = |i: usize| -> u32 { caps.get(i).and_then(|m| m.as_str().parse().ok()).unwrap_or(0) };
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, num(2), num(3))?;
    let t = date.and_hms_opt(num(4), num(5), num(6))?;
    if t > Local::now().naive_local() + Duration::hours(24) {
        return None;
    }
    Some(t)
}

/// Search the base name, then each parent directory from the innermost out, then the whole path.
pub fn take_time_from_path(path: &str) -> Option<NaiveDateTime> {
    path.rsplit('/')
        .find_map(take_time_from_name)
        .or_else(|| take_time_from_name(path))
}

/// Place a wall-clock time in the local zone
pub fn local_to_utc(t: NaiveDateTime) -> chrono::DateTime<Utc> {
    match Local.from_local_datetime(&t).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&t),
    }
}
