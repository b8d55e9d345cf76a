//! Google Photos JSON metadata
//!
//! Takeout writes one JSON per asset (title, capture time, GPS, flags, people)
//! and one per album folder (title, description, location enrichments).
//! Old exports wrap album files in an `albumData` object.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::asset::{Album, SidecarMetadata};

static UNSAFE_TITLE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\r\n\\/:*?"<>|]"#).unwrap());

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleMetaData {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub photo_taken_time: Option<TimeObject>,
    pub geo_data_exif: Option<GeoData>,
    pub geo_data: Option<GeoData>,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub favorited: bool,
    pub url: Option<Value>,
    #[serde(default)]
    pub people: Vec<Person>,
    #[serde(default)]
    pub enrichments: Vec<Enrichment>,
    #[serde(default)]
    pub google_photos_origin: Origin,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeObject {
    #[serde(default)]
    pub timestamp: String,
}

impl TimeObject {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        let ts: i64 = self.timestamp.parse().ok()?;
        if ts == 0 {
            return None;
        }
        DateTime::from_timestamp(ts, 0)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct GeoData {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub from_partner_sharing: Option<Value>,
    pub from_shared_album: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    pub narrative_enrichment: Option<NarrativeEnrichment>,
    pub location_enrichment: Option<LocationEnrichment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NarrativeEnrichment {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationEnrichment {
    #[serde(default)]
    pub location: Vec<Location>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "latitudeE7")]
    pub latitude_e7: i64,
    #[serde(default, rename = "longitudeE7")]
    pub longitude_e7: i64,
}

/// A marker object counts when present; a plain boolean only when true
fn is_present(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => true,
    }
}

fn append(s: &mut String, sep: &str, t: &str) {
    if !s.is_empty() {
        s.push_str(sep);
    }
    s.push_str(t);
}

impl GoogleMetaData {
    /// Parse a Takeout JSON, unwrapping `albumData` when present
    pub fn parse(data: &[u8]) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_slice(data)?;
        match value.get("albumData") {
            Some(inner @ Value::Object(_)) => serde_json::from_value(inner.clone()),
            _ => serde_json::from_value(value),
        }
    }

    pub fn is_asset(&self) -> bool {
        self.photo_taken_time
            .as_ref()
            .map(|t| !t.timestamp.is_empty())
            .unwrap_or(false)
    }

    pub fn is_album(&self) -> bool {
        !self.is_asset() && !self.title.is_empty()
    }

    pub fn is_partner(&self) -> bool {
        is_present(&self.google_photos_origin.from_partner_sharing)
    }

    /// Title with characters no file system accepts replaced by `_`
    pub fn sanitized_title(&self) -> String {
        UNSAFE_TITLE_CHARS.replace_all(&self.title, "_").to_string()
    }

    /// Asset metadata; `people_tag` turns each recognized person into `People/<name>`.
    pub fn as_metadata(&self, people_tag: bool) -> SidecarMetadata {
        let mut md = SidecarMetadata {
            file_name: Some(self.sanitized_title()),
            description: self.description.clone(),
            trashed: self.trashed,
            archived: self.archived,
            favorite: self.favorited,
            from_partner: self.is_partner(),
            ..Default::default()
        };

        let geo = match (self.geo_data_exif, self.geo_data) {
            (Some(exif), Some(geo)) if exif.latitude == 0.0 && exif.longitude == 0.0 => Some(geo),
            (Some(exif), _) => Some(exif),
            (None, geo) => geo,
        };
        if let Some(geo) = geo {
            md.latitude = geo.latitude;
            md.longitude = geo.longitude;
        }

        md.date_taken = self.photo_taken_time.as_ref().and_then(TimeObject::time);

        if people_tag {
            for person in self.people.iter().filter(|p| !p.name.is_empty()) {
                let tag = format!("People/{}", person.name);
                if !md.tags.contains(&tag) {
                    md.tags.push(tag);
                }
            }
        }
        md
    }

    /// Album described by an album JSON; the folder name stands in for a missing title.
    pub fn as_album(&self, dir_base: &str) -> Album {
        let mut album = Album::named(if self.title.is_empty() {
            dir_base.to_string()
        } else {
            self.title.clone()
        });
        album.description = self.description.clone();
        if let Some(geo) = self.geo_data {
            album.latitude = geo.latitude;
            album.longitude = geo.longitude;
        }

        let mut text = String::new();
        let mut location = None;
        for e in &self.enrichments {
            if let Some(n) = &e.narrative_enrichment {
                if !n.text.is_empty() {
                    append(&mut text, "\n", &n.text);
                }
            }
            if let Some(l) = &e.location_enrichment {
                for loc in &l.location {
                    if !loc.name.is_empty() {
                        append(&mut text, "\n", &loc.name);
                    }
                    if !loc.description.is_empty() {
                        append(&mut text, " - ", &loc.description);
                    }
                    location = Some((loc.latitude_e7 as f64 / 1e7, loc.longitude_e7 as f64 / 1e7));
                }
            }
        }
        if !text.is_empty() {
            album.description = text;
        }
        if let Some((lat, lon)) = location {
            album.latitude = lat;
            album.longitude = lon;
        }
        album
    }
}
