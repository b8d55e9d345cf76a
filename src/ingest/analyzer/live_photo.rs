//! Live photos: a still image and its short video sharing a stem

use chrono::Duration;

use crate::ingest::asset::{Asset, Group, GroupKind};
use crate::ingest::media;

use super::groups::{Grouped, within};

const MATCH_INTERVAL_SECS: i64 = 2;

/// Stem used to pair the halves; Pixel `NAME.MP.jpg` images pair with `NAME.mp4`.
fn pairing_stem(a: &Asset) -> String {
    let stem = media::stem(a.file.name());
    if a.is_image() {
        if media::extension(stem).starts_with(".mp") {
            return media::stem(stem).to_string();
        }
    }
    stem.to_string()
}

pub fn group(assets: Vec<Asset>) -> Grouped {
    let (images, others): (Vec<Asset>, Vec<Asset>) = assets.into_iter().partition(|a| a.is_image());
    let (videos, mut rest): (Vec<Asset>, Vec<Asset>) = others.into_iter().partition(|a| a.is_video());

    let mut images: Vec<Option<Asset>> = images.into_iter().map(Some).collect();
    let stems: Vec<String> = images
        .iter()
        .map(|a| a.as_ref().map(pairing_stem).unwrap_or_default())
        .collect();
    let mut out = Grouped::default();
    let interval = Duration::seconds(MATCH_INTERVAL_SECS);

    for video in videos {
        let stem = pairing_stem(&video);
        let found = images.iter().enumerate().position(|(i, img)| {
            img.as_ref()
                .map(|img| stems[i] == stem && img.file.dir() == video.file.dir() && within(img, &video, interval))
                .unwrap_or(false)
        });
        match found.and_then(|i| images[i].take()) {
            Some(image) => out.groups.push(Group::new(GroupKind::LivePhoto, vec![image, video], 0)),
            None => rest.push(video),
        }
    }

    rest.extend(images.into_iter().flatten());
    out.rest = rest;
    out
}
