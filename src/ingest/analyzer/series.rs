//! Series grouping: files sharing a name radical in one directory

use chrono::Duration;

use crate::ingest::asset::{Asset, Group, GroupKind};
use crate::ingest::media;
use crate::ingest::names::NameKind;

use super::groups::{Grouped, pair_cover, within};

const PAIR_INTERVAL_MS: i64 = 500;

/// Group assets with the same radical.
///
/// Two files become a RAW+JPEG or HEIC+JPEG pair, vendor-named bursts
/// become a burst group, and any other series is split back into singletons.
pub fn group(mut assets: Vec<Asset>) -> Grouped {
    assets.sort_by(|a, b| {
        a.name_info
            .radical
            .cmp(&b.name_info.radical)
            .then(a.capture_date.cmp(&b.capture_date))
            .then(a.file.cmp(&b.file))
    });

    let mut out = Grouped::default();
    let mut current: Vec<Asset> = Vec::new();
    for asset in assets {
        if let Some(first) = current.first() {
            if first.name_info.radical != asset.name_info.radical {
                flush(std::mem::take(&mut current), &mut out);
            }
        }
        current.push(asset);
    }
    flush(current, &mut out);
    out
}

fn flush(series: Vec<Asset>, out: &mut Grouped) {
    if series.len() < 2 {
        out.rest.extend(series);
        return;
    }

    let mut got_jpg = false;
    let mut got_raw = false;
    let mut got_heic = false;
    let mut burst = false;
    let mut cover = None;
    for (i, a) in series.iter().enumerate() {
        got_jpg |= media::is_jpeg_ext(a.ext());
        got_raw |= media::is_raw_ext(a.ext());
        got_heic |= media::is_heic_ext(a.ext());
        burst |= a.name_info.kind == NameKind::Burst;
        if a.name_info.is_cover {
            cover = Some(i);
        }
    }

    if burst {
        out.groups.push(Group::new(GroupKind::Burst, series, cover.unwrap_or(0)));
        return;
    }

    if series.len() == 2 && within(&series[0], &series[1], Duration::milliseconds(PAIR_INTERVAL_MS)) {
        let kind = if got_jpg && got_raw && !got_heic {
            Some(GroupKind::RawJpg)
        } else if got_jpg && got_heic && !got_raw {
            Some(GroupKind::HeicJpg)
        } else {
            None
        };
        if let Some(kind) = kind {
            let cover = cover.unwrap_or_else(|| pair_cover(&series));
            out.groups.push(Group::new(kind, series, cover));
            return;
        }
    }

    out.rest.extend(series);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::asset::tests::test_asset;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_raw_jpeg_pair() {
        let out = group(vec![
            test_asset("d/IMG_0001.JPG", 100, None),
            test_asset("d/IMG_0001.CR3", 900, None),
            test_asset("d/IMG_0002.JPG", 100, None),
        ]);
        assert_eq!(out.groups.len(), 1);
        let g = &out.groups[0];
        assert_eq!(g.kind, GroupKind::RawJpg);
        assert_eq!(g.cover_asset().unwrap().ext(), ".cr3");
        assert_eq!(out.rest.len(), 1);
    }

    #[test]
    fn test_pair_too_far_apart() {
        let t = Utc.with_ymd_and_hms(2023, 1, 1, 10, 0, 0).unwrap();
        let out = group(vec![
            test_asset("IMG_1.heic", 10, Some(t)),
            test_asset("IMG_1.jpg", 10, Some(t + Duration::seconds(3))),
        ]);
        assert!(out.groups.is_empty());
        assert_eq!(out.rest.len(), 2);
    }

    #[test]
    fn test_named_burst_with_cover() {
        let out = group(vec![
            test_asset("00001IMG_00001_BURST20210101153000.jpg", 10, None),
            test_asset("00002IMG_00002_BURST20210101153000_COVER.jpg", 10, None),
            test_asset("00003IMG_00003_BURST20210101153000.jpg", 10, None),
        ]);
        assert_eq!(out.groups.len(), 1);
        let g = &out.groups[0];
        assert_eq!(g.kind, GroupKind::Burst);
        assert!(g.cover_asset().unwrap().name_info.is_cover);
    }
}
