//! Stacking policies
//!
//! This module provides functionality for:
//! 1. Parsing the policy labels accepted for bursts, RAW+JPEG and HEIC+JPEG groups
//! 2. Applying a policy to a group: ungroup, keep a format, or move the cover
//!
//! Assets removed by a policy are handed back with the reason so the caller
//! can finalize them.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::ingest::asset::{Asset, Group, GroupKind};
use crate::ingest::media;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("invalid value {value:?} for {kind} policy")]
    Invalid { kind: &'static str, value: String },
}

pub type PolicyResult<T> = Result<T, PolicyError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StackPolicy {
    #[default]
    NoStack,
    Stack,
    StackKeepRaw,
    StackKeepJpg,
    KeepRaw,
    KeepJpg,
    KeepHeic,
    StackCoverRaw,
    StackCoverJpg,
    StackCoverHeic,
}

impl fmt::Display for StackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StackPolicy::NoStack => "NoStack",
            StackPolicy::Stack => "Stack",
            StackPolicy::StackKeepRaw => "StackKeepRaw",
            StackPolicy::StackKeepJpg => "StackKeepJPG",
            StackPolicy::KeepRaw => "KeepRaw",
            StackPolicy::KeepJpg => "KeepJPG",
            StackPolicy::KeepHeic => "KeepHeic",
            StackPolicy::StackCoverRaw => "StackCoverRaw",
            StackPolicy::StackCoverJpg => "StackCoverJPG",
            StackPolicy::StackCoverHeic => "StackCoverHeic",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for StackPolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> PolicyResult<Self> {
        let policy = match s.to_lowercase().as_str() {
            "" | "nostack" => StackPolicy::NoStack,
            "stack" => StackPolicy::Stack,
            "stackkeepraw" => StackPolicy::StackKeepRaw,
            "stackkeepjpg" | "stackkeepjpeg" => StackPolicy::StackKeepJpg,
            "keepraw" => StackPolicy::KeepRaw,
            "keepjpg" | "keepjpeg" => StackPolicy::KeepJpg,
            "keepheic" => StackPolicy::KeepHeic,
            "stackcoverraw" => StackPolicy::StackCoverRaw,
            "stackcoverjpg" | "stackcoverjpeg" => StackPolicy::StackCoverJpg,
            "stackcoverheic" => StackPolicy::StackCoverHeic,
            _ => {
                return Err(PolicyError::Invalid {
                    kind: "stacking",
                    value: s.to_string(),
                });
            }
        };
        Ok(policy)
    }
}

impl StackPolicy {
    pub fn parse_burst(s: &str) -> PolicyResult<Self> {
        match s.parse()? {
            p @ (StackPolicy::NoStack | StackPolicy::Stack | StackPolicy::StackKeepRaw | StackPolicy::StackKeepJpg) => {
                Ok(p)
            }
            _ => Err(PolicyError::Invalid {
                kind: "burst",
                value: s.to_string(),
            }),
        }
    }

    pub fn parse_raw_jpeg(s: &str) -> PolicyResult<Self> {
        match s.parse()? {
            StackPolicy::StackKeepRaw => Ok(StackPolicy::KeepRaw),
            StackPolicy::StackKeepJpg => Ok(StackPolicy::KeepJpg),
            p @ (StackPolicy::NoStack
            | StackPolicy::KeepRaw
            | StackPolicy::KeepJpg
            | StackPolicy::StackCoverRaw
            | StackPolicy::StackCoverJpg) => Ok(p),
            _ => Err(PolicyError::Invalid {
                kind: "RAW+JPEG",
                value: s.to_string(),
            }),
        }
    }

    pub fn parse_heic_jpeg(s: &str) -> PolicyResult<Self> {
        match s.parse()? {
            p @ (StackPolicy::NoStack
            | StackPolicy::KeepHeic
            | StackPolicy::KeepJpg
            | StackPolicy::StackCoverHeic
            | StackPolicy::StackCoverJpg) => Ok(p),
            _ => Err(PolicyError::Invalid {
                kind: "HEIC+JPEG",
                value: s.to_string(),
            }),
        }
    }
}

/// Policies for each kind of group
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupPolicies {
    pub burst: StackPolicy,
    pub raw_jpeg: StackPolicy,
    pub heic_jpeg: StackPolicy,
    pub epson_fastfoto: bool,
}

impl GroupPolicies {
    pub fn from_labels(burst: &str, raw_jpeg: &str, heic_jpeg: &str, epson_fastfoto: bool) -> PolicyResult<Self> {
        Ok(Self {
            burst: StackPolicy::parse_burst(burst)?,
            raw_jpeg: StackPolicy::parse_raw_jpeg(raw_jpeg)?,
            heic_jpeg: StackPolicy::parse_heic_jpeg(heic_jpeg)?,
            epson_fastfoto,
        })
    }

    /// Policy that applies to a group, `None` when the kind has no policy
    pub fn for_kind(&self, kind: GroupKind) -> Option<StackPolicy> {
        match kind {
            GroupKind::Burst => Some(self.burst),
            GroupKind::RawJpg => Some(self.raw_jpeg),
            GroupKind::HeicJpg => Some(self.heic_jpeg),
            GroupKind::FastFoto => Some(if self.epson_fastfoto {
                StackPolicy::Stack
            } else {
                StackPolicy::NoStack
            }),
            GroupKind::None | GroupKind::LivePhoto => None,
        }
    }

    /// Apply the matching policy; returns the removed assets with their reason.
    pub fn apply(&self, group: &mut Group) -> Vec<(Asset, String)> {
        let Some(policy) = self.for_kind(group.kind) else {
            return Vec::new();
        };
        let what = match group.kind {
            GroupKind::Burst => "burst",
            GroupKind::RawJpg => "RAW/JPEG group",
            GroupKind::HeicJpg => "HEIC/JPEG group",
            _ => "group",
        };
        match policy {
            StackPolicy::NoStack => {
                group.kind = GroupKind::None;
                Vec::new()
            }
            StackPolicy::Stack => Vec::new(),
            StackPolicy::StackKeepRaw | StackPolicy::KeepRaw => {
                keep_only(group, |a| media::is_raw_ext(a.ext()), &format!("Keep only RAW files in {}", what))
            }
            StackPolicy::StackKeepJpg | StackPolicy::KeepJpg => {
                keep_only(group, |a| media::is_jpeg_ext(a.ext()), &format!("Keep only JPEG files in {}", what))
            }
            StackPolicy::KeepHeic => {
                keep_only(group, |a| media::is_heic_ext(a.ext()), &format!("Keep only HEIC files in {}", what))
            }
            StackPolicy::StackCoverRaw => {
                move_cover(group, |a| media::is_raw_ext(a.ext()));
                Vec::new()
            }
            StackPolicy::StackCoverJpg => {
                move_cover(group, |a| media::is_jpeg_ext(a.ext()));
                Vec::new()
            }
            StackPolicy::StackCoverHeic => {
                move_cover(group, |a| media::is_heic_ext(a.ext()));
                Vec::new()
            }
        }
    }
}

fn keep_only(group: &mut Group, keep: impl Fn(&Asset) -> bool, reason: &str) -> Vec<(Asset, String)> {
    let mut removed = Vec::new();
    if group.assets.iter().any(&keep) {
        let mut i = 0;
        while i < group.assets.len() {
            if keep(&group.assets[i]) {
                i += 1;
            } else {
                removed.push((group.remove(i), reason.to_string()));
            }
        }
    }
    if group.assets.len() < 2 {
        group.kind = GroupKind::None;
    }
    removed
}

fn move_cover(group: &mut Group, is_cover: impl Fn(&Asset) -> bool) {
    if let Some(i) = group.assets.iter().position(is_cover) {
        group.cover = i;
    }
}
