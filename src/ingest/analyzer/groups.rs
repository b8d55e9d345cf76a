//! Grouping pipeline
//!
//! This module provides functionality for:
//! 1. Chaining the groupers from the most specific to the most generic
//! 2. Cover selection for pairs
//! 3. Turning assets nobody claimed into singleton groups
//!
//! Each grouper takes the assets left over by the previous one and returns
//! the groups it recognized plus the assets it did not claim.

use std::cmp::Ordering;

use chrono::Duration;

use crate::ingest::asset::{Asset, Group};
use crate::ingest::media;

use super::{burst, fastfoto, live_photo, series};

/// Output of a single grouper
#[derive(Debug, Default)]
pub struct Grouped {
    pub groups: Vec<Group>,
    pub rest: Vec<Asset>,
}

/// Which optional groupers run
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupingOptions {
    pub epson_fastfoto: bool,
}

/// Whether two assets were captured within `interval`; a missing date never separates them.
pub fn within(a: &Asset, b: &Asset, interval: Duration) -> bool {
    match (a.capture_date, b.capture_date) {
        (Some(x), Some(y)) => (x - y).abs() <= interval,
        _ => true,
    }
}

fn format_rank(a: &Asset) -> u8 {
    if media::is_raw_ext(a.ext()) {
        0
    } else if media::is_heic_ext(a.ext()) {
        1
    } else if media::is_jpeg_ext(a.ext()) {
        2
    } else {
        3
    }
}

/// RAW, then HEIC, then JPEG; larger file first, then identity.
pub fn compare_cover(a: &Asset, b: &Asset) -> Ordering {
    format_rank(a)
        .cmp(&format_rank(b))
        .then(b.size.cmp(&a.size))
        .then(a.file.cmp(&b.file))
}

pub fn pair_cover(assets: &[Asset]) -> usize {
    (0..assets.len())
        .min_by(|&i, &j| compare_cover(&assets[i], &assets[j]))
        .unwrap_or(0)
}

/// Run every grouper over the assets of one directory.
///
/// Groups come out in the order they were recognized; singletons follow,
/// sorted by identity.
pub fn group_assets(assets: Vec<Asset>, options: GroupingOptions) -> Vec<Group> {
    let mut groups = Vec::new();
    let mut rest = assets;

    if options.epson_fastfoto {
        let out = fastfoto::group(rest);
        groups.extend(out.groups);
        rest = out.rest;
    }

    for grouper in [burst::group, series::group, live_photo::group] {
        let out = grouper(rest);
        groups.extend(out.groups);
        rest = out.rest;
    }

    rest.sort_by(|a, b| a.file.cmp(&b.file));
    groups.extend(rest.into_iter().map(Group::single));
    groups
}
