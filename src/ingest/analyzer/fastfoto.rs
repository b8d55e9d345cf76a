//! Epson FastFoto scans: `NAME_n.jpg`, `NAME_n_a.jpg` (enhanced) and `NAME_n_b.jpg` (back side)

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ingest::asset::{Asset, Group, GroupKind};
use crate::ingest::names::NameKind;

use super::groups::Grouped;

static FASTFOTO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*_\d+)(_[ab])?(\.[a-z]+)$").unwrap());

pub fn group(mut assets: Vec<Asset>) -> Grouped {
    assets.sort_by(|a, b| a.file.cmp(&b.file));

    let mut out = Grouped::default();
    let mut current: Vec<Asset> = Vec::new();
    let mut radical = String::new();
    let mut cover = 0;

    for asset in assets {
        let scan = FASTFOTO_RE.captures(asset.file.name()).map(|c| {
            (
                c.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
                c.get(2).map(|m| m.as_str() == "_a").unwrap_or(false),
            )
        });
        let (this_radical, enhanced) = match scan {
            Some(s) if asset.is_image() && asset.name_info.kind != NameKind::Burst => s,
            _ => {
                flush(std::mem::take(&mut current), cover, &mut out);
                radical.clear();
                out.rest.push(asset);
                continue;
            }
        };
        if this_radical != radical {
            flush(std::mem::take(&mut current), cover, &mut out);
            radical = this_radical;
            cover = 0;
        }
        if enhanced {
            cover = current.len();
        }
        current.push(asset);
    }
    flush(current, cover, &mut out);
    out
}

fn flush(scans: Vec<Asset>, cover: usize, out: &mut Grouped) {
    if (2..=3).contains(&scans.len()) {
        out.groups.push(Group::new(GroupKind::FastFoto, scans, cover));
    } else {
        out.rest.extend(scans);
    }
}
