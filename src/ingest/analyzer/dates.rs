//! Capture dates
//!
//! This module provides functionality for:
//! 1. Reading `DateTimeOriginal` from the EXIF block of a file
//! 2. Resolving an asset's capture date: sidecar, EXIF, file name, modification time
//! 3. Date range filters (`2023`, `2023-06`, `2023-06-01`, `start,end`)

use std::io::{BufReader, Cursor};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::ingest::asset::{Asset, Content, DateSource};
use crate::ingest::names::local_to_utc;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DateError {
    #[error("invalid date range: {0}")]
    InvalidRange(String),
}

pub type DateResult<T> = Result<T, DateError>;

/// Half-open interval `[after, before)`; an unset range accepts everything.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DateRange {
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn parse(s: &str) -> DateResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        if let Some((start, end)) = s.split_once(',') {
            let (after, _) = parse_period(start.trim()).ok_or_else(|| DateError::InvalidRange(s.to_string()))?;
            let (_, before) = parse_period(end.trim()).ok_or_else(|| DateError::InvalidRange(s.to_string()))?;
            return Ok(Self {
                after: Some(local_to_utc(after)),
                before: Some(local_to_utc(before)),
            });
        }
        let (after, before) = parse_period(s).ok_or_else(|| DateError::InvalidRange(s.to_string()))?;
        Ok(Self {
            after: Some(local_to_utc(after)),
            before: Some(local_to_utc(before)),
        })
    }

    pub fn is_set(&self) -> bool {
        self.after.is_some() || self.before.is_some()
    }

    /// Whether a date is inside the range; an unknown date is only inside an unset range.
    pub fn contains(&self, date: Option<DateTime<Utc>>) -> bool {
        if !self.is_set() {
            return true;
        }
        let Some(d) = date else {
            return false;
        };
        self.after.map(|a| d >= a).unwrap_or(true) && self.before.map(|b| d < b).unwrap_or(true)
    }
}

/// A year, month or day as `[start, end)` local times
fn parse_period(s: &str) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let parts: Vec<&str> = s.split('-').collect();
    let year: i32 = parts.first()?.parse().ok()?;
    match parts.len() {
        1 => {
            let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
            let end = NaiveDate::from_ymd_opt(year + 1, 1, 1)?;
            Some((start.and_hms_opt(0, 0, 0)?, end.and_hms_opt(0, 0, 0)?))
        }
        2 => {
            let month: u32 = parts[1].parse().ok()?;
            let start = NaiveDate::from_ymd_opt(year, month, 1)?;
            let end = if month == 12 {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)?
            } else {
                NaiveDate::from_ymd_opt(year, month + 1, 1)?
            };
            Some((start.and_hms_opt(0, 0, 0)?, end.and_hms_opt(0, 0, 0)?))
        }
        3 => {
            let start = NaiveDate::from_ymd_opt(year, parts[1].parse().ok()?, parts[2].parse().ok()?)?;
            let start = start.and_hms_opt(0, 0, 0)?;
            Some((start, start + Duration::days(1)))
        }
        _ => None,
    }
}

/// `DateTimeOriginal` (or `DateTime`) from an EXIF container
pub fn read_exif_date<R: std::io::BufRead + std::io::Seek>(reader: &mut R) -> Option<NaiveDateTime> {
    let data = exif::Reader::new().read_from_container(reader).ok()?;
    [exif::Tag::DateTimeOriginal, exif::Tag::DateTimeDigitized, exif::Tag::DateTime]
        .into_iter()
        .find_map(|tag| {
            let field = data.get_field(tag, exif::In::PRIMARY)?;
            let text = field.display_value().to_string();
            NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S").ok()
        })
}

fn exif_date(asset: &Asset) -> Option<NaiveDateTime> {
    let Content::Fs(fs) = &asset.content else {
        return None;
    };
    if let Some(path) = fs.local_path(asset.file.path()) {
        let file = std::fs::File::open(path).ok()?;
        return read_exif_date(&mut BufReader::new(file));
    }
    let bytes = fs.read_all(asset.file.path()).ok()?;
    read_exif_date(&mut Cursor::new(bytes))
}

/// Fill in the capture date when no sidecar provided one.
///
/// Returns the source the date came from.
pub fn resolve_capture_date(asset: &mut Asset, date_from_name: bool) -> DateSource {
    if asset.date_source == DateSource::Sidecar && asset.capture_date.is_some() {
        return DateSource::Sidecar;
    }
    if asset.is_image() {
        if let Some(t) = exif_date(asset) {
            asset.capture_date = Some(local_to_utc(t));
            asset.date_source = DateSource::Exif;
            return DateSource::Exif;
        }
    }
    if date_from_name && asset.date_from_name() {
        return DateSource::Name;
    }
    if let Some(modified) = asset.file_date {
        debug!(file = %asset.file, "Using modification time as capture date");
        asset.capture_date = Some(modified);
        asset.date_source = DateSource::ModTime;
        return DateSource::ModTime;
    }
    DateSource::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::asset::tests::test_asset;
    use chrono::TimeZone;

    fn local(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        local_to_utc(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(12, 0, 0).unwrap())
    }

    #[test]
    fn test_ranges() {
        let year = DateRange::parse("2023").unwrap();
        assert!(year.contains(Some(local(2023, 12, 31))));
        assert!(!year.contains(Some(local(2024, 1, 1))));
        assert!(!year.contains(None));

        let month = DateRange::parse("2023-12").unwrap();
        assert!(month.contains(Some(local(2023, 12, 5))));
        assert!(!month.contains(Some(local(2023, 11, 30))));

        let span = DateRange::parse("2020-01-01,2020-01-31").unwrap();
        assert!(span.contains(Some(local(2020, 1, 31))));
        assert!(!span.contains(Some(local(2020, 2, 1))));

        assert!(DateRange::parse("").unwrap().contains(None));
        assert!(DateRange::parse("20x3").is_err());
    }

    #[test]
    fn test_resolution_order() {
        let mut a = test_asset("2019/IMG_20190704_101500.jpg", 10, None);
        a.file_date = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(resolve_capture_date(&mut a, true), DateSource::Name);

        let mut b = test_asset("misc/photo.jpg", 10, None);
        b.file_date = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(resolve_capture_date(&mut b, true), DateSource::ModTime);
        assert_eq!(b.capture_date, b.file_date);

        let mut c = test_asset("misc/IMG_20190704_101500.jpg", 10, None);
        assert_eq!(resolve_capture_date(&mut c, false), DateSource::Unknown);
    }
}
