//! JSON sidecar to media file binding rules
//!
//! Google truncates and renumbers names when it exports a library, so a JSON
//! named `IMG_2710.HEIC(1).json` describes `IMG_2710(1).HEIC`. Each rule takes
//! the JSON name and a media file name of the same directory.

use crate::ingest::media;

pub type Matcher = fn(json_name: &str, file_name: &str) -> bool;

/// Rules in the order they are tried
pub const MATCHERS: [(&str, Matcher); 4] = [
    ("fast track", match_fast_track),
    ("normal", match_normal),
    ("forgotten duplicates", match_forgotten_duplicates),
    ("edited name", match_edited_name),
];

/// Extension as Go's `path.Ext` sees it: from the last dot, case kept
pub(super) fn ext(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) => &name[i..],
        None => "",
    }
}

pub(super) fn trim_ext(name: &str) -> &str {
    &name[..name.len() - ext(name).len()]
}

/// Split a `(n)` disambiguation index out of a name: `DSC(1).JPG` -> (`DSC.JPG`, `1`)
pub fn file_index(name: &str) -> (String, String) {
    if let Some(open) = name.rfind('(') {
        if let Some(close) = name.rfind(')') {
            if close > open {
                let index = &name[open + 1..close];
                if index.parse::<i64>().is_ok() {
                    return (format!("{}{}", &name[..open], &name[close + 1..]), index.to_string());
                }
            }
        }
    }
    (name.to_string(), String::new())
}

/// Strip the `.supplemental-metadata` marker newer exports put before `.json`,
/// including its truncated forms and a trailing `(n)` index.
pub fn clean_json_name(json_name: &str) -> String {
    let Some(stem) = json_name.strip_suffix(".json") else {
        return json_name.to_string();
    };
    let (stem, index) = file_index(stem);
    let marker = ext(&stem);
    let cleaned = if marker.len() > 2 && ".supplemental-metadata".starts_with(&marker.to_lowercase()) {
        trim_ext(&stem).to_string()
    } else {
        stem.clone()
    };
    if index.is_empty() {
        format!("{}.json", cleaned)
    } else {
        format!("{}({}).json", cleaned, index)
    }
}

fn match_fast_track(json_name: &str, file_name: &str) -> bool {
    trim_ext(json_name) == file_name
}

/// Same index, then the JSON stem equals the file name or its 46-character truncation
fn match_normal(json_name: &str, file_name: &str) -> bool {
    let (file_name, file_idx) = file_index(file_name);
    let (json_name, json_idx) = file_index(json_name);
    if file_idx != json_idx {
        return false;
    }

    let json_name = trim_ext(&json_name);
    if json_name == file_name {
        return true;
    }

    if file_name.len() > 46 {
        if file_name.chars().count() > 46 {
            let truncated: String = file_name.chars().take(46).collect();
            return truncated == json_name;
        }
        let mut truncated = trim_ext(&file_name).to_string();
        truncated.pop();
        return truncated == json_name;
    }
    false
}

/// `PXL_1.PORTRAIT.jpg.json` binds `PXL_1.PORTRAIT-modifié.jpg`, never an indexed copy
fn match_edited_name(json_name: &str, file_name: &str) -> bool {
    if !file_index(file_name).1.is_empty() {
        return false;
    }
    let base = trim_ext(json_name);
    let media_ext = ext(base);
    if !media_ext.is_empty() && media::is_media_ext(media_ext) {
        let base = trim_ext(base);
        return trim_ext(file_name).starts_with(base);
    }
    false
}

/// `original_x_.json` binds `original_x_P(1).jpg`
fn match_forgotten_duplicates(json_name: &str, file_name: &str) -> bool {
    let json_name = trim_ext(json_name);
    let file_name = trim_ext(file_name);
    file_name.starts_with(json_name) && file_name.chars().count() - json_name.chars().count() < 10
}
