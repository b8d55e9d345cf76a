//! Burst detection from capture times
//!
//! Catches bursts from cameras that leave no mark in the file name:
//! consecutive images captured less than 500 ms apart.

use chrono::Duration;

use crate::ingest::asset::{Asset, Group, GroupKind};
use crate::ingest::names::NameKind;

use super::groups::Grouped;

const FRAME_INTERVAL_MS: i64 = 500;

pub fn group(assets: Vec<Asset>) -> Grouped {
    let (mut candidates, others): (Vec<Asset>, Vec<Asset>) = assets.into_iter().partition(|a| {
        a.is_image()
            && a.capture_date.is_some()
            && a.name_info.kind != NameKind::Burst
            && a.name_info.kind != NameKind::Edited
    });
    candidates.sort_by(|a, b| a.capture_date.cmp(&b.capture_date).then(a.file.cmp(&b.file)));

    let mut out = Grouped {
        groups: Vec::new(),
        rest: others,
    };
    let interval = Duration::milliseconds(FRAME_INTERVAL_MS);
    let mut current: Vec<Asset> = Vec::new();
    for asset in candidates {
        let close = match (current.last().and_then(|a| a.capture_date), asset.capture_date) {
            (Some(last), Some(taken)) => (taken - last).abs() <= interval,
            _ => false,
        };
        if !close {
            flush(std::mem::take(&mut current), &mut out);
        }
        current.push(asset);
    }
    flush(current, &mut out);
    out
}

fn flush(frames: Vec<Asset>, out: &mut Grouped) {
    // Frames sharing one radical are a RAW+JPEG or HEIC+JPEG shot, left to the series grouper.
    let single_radical = frames
        .first()
        .map(|first| frames.iter().all(|a| a.name_info.radical == first.name_info.radical))
        .unwrap_or(true);
    if frames.len() < 2 || single_radical {
        out.rest.extend(frames);
        return;
    }
    out.groups.push(Group::new(GroupKind::Burst, frames, 0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::asset::tests::test_asset;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_frames_within_interval() {
        let t = Utc.with_ymd_and_hms(2022, 8, 1, 9, 30, 0).unwrap();
        let out = group(vec![
            test_asset("IMG_0003.jpg", 10, Some(t + Duration::milliseconds(600))),
            test_asset("IMG_0001.jpg", 10, Some(t)),
            test_asset("IMG_0002.jpg", 10, Some(t + Duration::milliseconds(300))),
            test_asset("IMG_0009.jpg", 10, Some(t + Duration::seconds(5))),
            test_asset("VID_0001.mp4", 10, Some(t)),
        ]);
        assert_eq!(out.groups.len(), 1);
        let names: Vec<&str> = out.groups[0].assets.iter().map(|a| a.file.name()).collect();
        assert_eq!(names, vec!["IMG_0001.jpg", "IMG_0002.jpg", "IMG_0003.jpg"]);
        assert_eq!(out.groups[0].cover, 0);
        assert_eq!(out.rest.len(), 2);
    }

    #[test]
    fn test_same_radical_left_for_pairs() {
        let t = Utc.with_ymd_and_hms(2022, 8, 1, 9, 30, 0).unwrap();
        let out = group(vec![
            test_asset("IMG_0001.jpg", 10, Some(t)),
            test_asset("IMG_0001.cr2", 10, Some(t)),
        ]);
        assert!(out.groups.is_empty());
        assert_eq!(out.rest.len(), 2);
    }

    #[test]
    fn test_undated_and_edited_skipped() {
        let t = Utc.with_ymd_and_hms(2022, 8, 1, 9, 30, 0).unwrap();
        let out = group(vec![
            test_asset("a.jpg", 10, None),
            test_asset("b.jpg", 10, Some(t)),
            test_asset("b-edited.jpg", 10, Some(t)),
        ]);
        assert!(out.groups.is_empty());
        assert_eq!(out.rest.len(), 3);
    }
}
