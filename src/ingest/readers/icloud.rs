//! iCloud export metadata
//!
//! This module provides functionality for:
//! 1. Album CSVs under `Albums/` (and `Memories/` when memories count as albums)
//! 2. `Photo Details*.csv` files carrying each photo's original creation date
//! 3. A per-file-name lookup the folder reader consults in its asset pass

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use super::{BrowseContext, ReaderError, ReaderResult};
use crate::ingest::asset::Album;
use crate::ingest::events::EventCode;
use crate::ingest::fsys::{FsEntry, SourceFs, base_name};
use crate::ingest::media;

/// What the CSVs say about one file name
#[derive(Debug, Clone, Default)]
pub struct ICloudMeta {
    pub albums: Vec<Album>,
    pub created: Option<DateTime<Utc>>,
}

pub type ICloudIndex = HashMap<String, ICloudMeta>;

/// Split CSV text into records; quoted fields may hold commas and `""` escapes.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    quoted = false;
                }
            }
            '"' if field.is_empty() => quoted = true,
            ',' if !quoted => record.push(std::mem::take(&mut field)),
            '\r' if !quoted => {}
            '\n' if !quoted => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

/// `Saturday June 4,2022 12:11 PM GMT`; the hour is already on a 24-hour clock.
pub fn parse_creation_date(s: &str) -> Option<DateTime<Utc>> {
    let cleaned = s.replace(" AM ", " ").replace(" PM ", " ");
    NaiveDateTime::parse_from_str(cleaned.trim(), "%A %B %d,%Y %H:%M GMT")
        .ok()
        .map(|t| t.and_utc())
}

fn read_text(fs: &SourceFs, path: &str) -> ReaderResult<String> {
    Ok(String::from_utf8_lossy(&fs.read_all(path)?).to_string())
}

/// Album CSV: a header line, then one file name per row
fn read_album_csv(index: &mut ICloudIndex, text: &str, album: &str) -> ReaderResult<()> {
    for record in parse_csv(text).into_iter().skip(1) {
        if record.len() != 1 {
            return Err(ReaderError::Invalid("invalid album record".to_string()));
        }
        index
            .entry(record[0].clone())
            .or_default()
            .albums
            .push(Album::named(album));
    }
    Ok(())
}

/// `imgName,fileChecksum,favorite,hidden,deleted,originalCreationDate,viewCount,importDate`
fn read_details_csv(index: &mut ICloudIndex, text: &str) -> ReaderResult<()> {
    for record in parse_csv(text).into_iter().skip(1) {
        if record.len() != 8 {
            return Err(ReaderError::Invalid("invalid photo details record".to_string()));
        }
        let created = parse_creation_date(&record[5])
            .ok_or_else(|| ReaderError::Invalid(format!("invalid original creation date: {}", record[5])))?;
        index.entry(record[0].clone()).or_default().created = Some(created);
    }
    Ok(())
}

/// Metadata pass over the CSV files of a source
pub fn read_metadata(
    ctx: &BrowseContext,
    fs: &SourceFs,
    entries: &[FsEntry],
    memories_as_albums: bool,
) -> ICloudIndex {
    let mut index = ICloudIndex::new();
    for entry in entries {
        if media::extension(&entry.path) != ".csv" {
            continue;
        }
        let name = base_name(&entry.path);
        let in_dir = |dir: &str| entry.path.starts_with(&format!("{}/", dir)) || entry.path.contains(&format!("/{}/", dir));
        let result = if in_dir("Albums") || (memories_as_albums && in_dir("Memories")) {
            read_text(fs, &entry.path).and_then(|t| read_album_csv(&mut index, &t, media::stem(name)))
        } else if name.starts_with("Photo Details") {
            read_text(fs, &entry.path).and_then(|t| read_details_csv(&mut index, &t))
        } else {
            continue;
        };

        let file = fs.file_id(&entry.path);
        match result {
            Ok(()) => {
                debug!(file = %file, "iCloud metadata read");
                ctx.processor.record_non_asset(&file, entry.size, EventCode::Metadata, &[]);
            }
            Err(e) => ctx
                .processor
                .record_non_asset(&file, entry.size, EventCode::Error, &[("error", e.to_string())]),
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_csv() {
        let text = "imgName,date\r\nIMG_1.HEIC,\"Saturday June 4,2022 12:11 PM GMT\"\n\"a \"\"b\"\"\",x";
        let records = parse_csv(text);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1][1], "Saturday June 4,2022 12:11 PM GMT");
        assert_eq!(records[2][0], "a \"b\"");
    }

    #[test]
    fn test_creation_date() {
        assert_eq!(
            parse_creation_date("Saturday June 4,2022 12:11 PM GMT"),
            Some(Utc.with_ymd_and_hms(2022, 6, 4, 12, 11, 0).unwrap())
        );
        assert_eq!(parse_creation_date("June 4 2022"), None);
    }

    #[test]
    fn test_details_and_albums() {
        let mut index = ICloudIndex::new();
        let details = "imgName,fileChecksum,favorite,hidden,deleted,originalCreationDate,viewCount,importDate\n\
            IMG_7938.HEIC,AfQj,no,no,no,\"Saturday June 4,2022 12:11 PM GMT\",10,\"Saturday June 4,2022 12:11 PM GMT\"\n";
        read_details_csv(&mut index, details).unwrap();
        read_album_csv(&mut index, "Images\nIMG_7938.HEIC\n", "Holidays").unwrap();

        let meta = &index["IMG_7938.HEIC"];
        assert!(meta.created.is_some());
        assert_eq!(meta.albums[0].title, "Holidays");
        assert!(read_album_csv(&mut index, "Images\na,b\n", "x").is_err());
    }
}
