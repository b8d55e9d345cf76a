//! Analyzer stage
//!
//! This module provides functionality for:
//! 1. Finalizing assets the readers rejected
//! 2. Local duplicate suppression across every source of the run
//! 3. Stacking policies, date range selection and the capture date requirement
//! 4. Handing each group on with a decided action per asset, cover first
//!
//! The grouping itself (bursts, pairs, live photos, FastFoto scans) runs in
//! the readers, per directory, through `groups::group_assets`.

pub mod burst;
pub mod dates;
pub mod fastfoto;
pub mod filters;
pub mod groups;
pub mod live_photo;
pub mod series;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::ingest::asset::{Asset, Group, GroupKind};
use crate::ingest::cancel::CancelToken;
use crate::ingest::events::EventCode;
use crate::ingest::file_processor::FileProcessor;

use self::dates::DateRange;
use self::filters::GroupPolicies;

/// Error types for the analyzer stage
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Downstream stage closed")]
    Closed,
}

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

/// What happens to an asset that reaches the uploader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Upload,
    UploadAndStack,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub asset: Asset,
    pub action: Action,
}

/// A group with its decided actions; entries are in cover-first order.
#[derive(Debug, Clone)]
pub struct DecidedGroup {
    pub kind: GroupKind,
    pub entries: Vec<Decision>,
}

impl DecidedGroup {
    pub fn is_stacked(&self) -> bool {
        self.entries.iter().any(|d| d.action == Action::UploadAndStack)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzerOptions {
    pub policies: GroupPolicies,
    pub date_range: DateRange,
    /// An asset without capture date is an error instead of a warning
    pub require_date: bool,
}

/// Whether a group is uploaded as a stack
fn stacks(group: &Group) -> bool {
    !matches!(group.kind, GroupKind::None | GroupKind::LivePhoto) && group.len() > 1
}

pub struct Analyzer {
    processor: Arc<FileProcessor>,
    options: AnalyzerOptions,
    /// Kept assets by `(base name, size)`, in arrival order
    seen: HashMap<(String, u64), Vec<Asset>>,
}

impl Analyzer {
    pub fn new(processor: Arc<FileProcessor>, options: AnalyzerOptions) -> Self {
        Self {
            processor,
            options,
            seen: HashMap::new(),
        }
    }

    /// Consume reader groups until the readers are done or the run is cancelled
    #[instrument(skip_all)]
    pub async fn run(
        mut self,
        rx: flume::Receiver<Group>,
        tx: flume::Sender<DecidedGroup>,
        cancel: CancelToken,
    ) -> AnalyzerResult<()> {
        let mut groups = 0usize;
        while let Ok(group) = rx.recv_async().await {
            if cancel.is_cancelled() {
                info!("Analyzer stopped by cancellation");
                break;
            }
            if let Some(decided) = self.analyze(group).await {
                groups += 1;
                tx.send_async(decided).await.map_err(|_| AnalyzerError::Closed)?;
            }
        }
        info!(groups, "Analysis finished");
        Ok(())
    }

    /// Decide a group; `None` when nothing in it is left to upload.
    pub async fn analyze(&mut self, mut group: Group) -> Option<DecidedGroup> {
        self.finalize_rejected(&mut group);
        self.remove_duplicates(&mut group).await;

        for (asset, reason) in self.options.policies.apply(&mut group) {
            self.processor
                .record_asset_discarded(&asset.file, EventCode::DiscardedDiscarded, &reason);
        }

        let mut i = 0;
        while i < group.len() {
            let asset = &group.assets[i];
            if !self.options.date_range.contains(asset.capture_date) {
                let asset = group.remove(i);
                self.processor
                    .record_asset_discarded(&asset.file, EventCode::UploadNotSelected, "outside the date range");
                continue;
            }
            if asset.capture_date.is_none() {
                if self.options.require_date {
                    let asset = group.remove(i);
                    self.processor
                        .record_asset_error(&asset.file, EventCode::Error, "capture date could not be determined");
                    continue;
                }
                warn!(file = %asset.file, "No capture date");
            }
            i += 1;
        }

        if group.is_empty() {
            return None;
        }

        let action = if stacks(&group) {
            Action::UploadAndStack
        } else {
            Action::Upload
        };
        let order = group.cover_first_order();
        let mut slots: Vec<Option<Asset>> = group.assets.into_iter().map(Some).collect();
        let entries = order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .map(|asset| Decision { asset, action })
            .collect();
        Some(DecidedGroup {
            kind: group.kind,
            entries,
        })
    }

    fn finalize_rejected(&self, group: &mut Group) {
        let mut i = 0;
        while i < group.len() {
            if group.assets[i].rejected.is_none() {
                i += 1;
                continue;
            }
            let asset = group.remove(i);
            if let Some(rejection) = &asset.rejected {
                if rejection.code == EventCode::DiscardedLocalDuplicate {
                    self.processor.record_asset_event(
                        &asset.file,
                        EventCode::AnalysisLocalDuplicate,
                        &[("reason", rejection.reason.clone())],
                    );
                }
                self.processor
                    .record_asset_discarded(&asset.file, rejection.code, &rejection.reason);
            }
        }
    }

    /// Earlier-seen copies win; a `(name, size)` collision is settled by SHA-1.
    async fn remove_duplicates(&mut self, group: &mut Group) {
        let mut i = 0;
        while i < group.len() {
            let key = (group.assets[i].file.name().to_string(), group.assets[i].size);
            let Some(earlier) = self.seen.get(&key).cloned() else {
                self.seen.insert(key, vec![group.assets[i].clone()]);
                i += 1;
                continue;
            };

            let checksum = match group.assets[i].compute_checksum().await {
                Ok(sum) => sum,
                Err(e) => {
                    let asset = group.remove(i);
                    self.processor
                        .record_asset_error(&asset.file, EventCode::Error, &e.to_string());
                    continue;
                }
            };

            let mut original = None;
            let mut hashed = Vec::with_capacity(earlier.len());
            for mut kept in earlier {
                match kept.compute_checksum().await {
                    Ok(sum) if sum == checksum && original.is_none() => original = Some(kept.file.clone()),
                    Ok(_) => {}
                    Err(e) => debug!(file = %kept.file, error = %e, "Could not hash earlier copy"),
                }
                hashed.push(kept);
            }

            match original {
                Some(original) => {
                    let asset = group.remove(i);
                    self.seen.insert(key, hashed);
                    let reason = format!("duplicate of {}", original);
                    self.processor.record_asset_event(
                        &asset.file,
                        EventCode::AnalysisLocalDuplicate,
                        &[("original", original.to_string())],
                    );
                    self.processor
                        .record_asset_discarded(&asset.file, EventCode::DiscardedLocalDuplicate, &reason);
                }
                None => {
                    hashed.push(group.assets[i].clone());
                    self.seen.insert(key, hashed);
                    i += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::asset::Rejection;
    use crate::ingest::file_processor::init_file_processor;
    use crate::ingest::fsys::{FsEntry, SourceFs};
    use crate::ingest::analyzer::filters::StackPolicy;
    use chrono::{TimeZone, Utc};
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        fs: Arc<SourceFs>,
        processor: Arc<FileProcessor>,
    }

    impl Fixture {
        fn new(files: &[(&str, &[u8])]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for (path, content) in files {
                let full = dir.path().join(path);
                fs::create_dir_all(full.parent().unwrap()).unwrap();
                fs::write(full, content).unwrap();
            }
            Self {
                fs: Arc::new(SourceFs::open_dir(dir.path()).unwrap()),
                _dir: dir,
                processor: init_file_processor(true),
            }
        }

        fn asset(&self, path: &str) -> Asset {
            let size = self.fs.stat(path).unwrap().size;
            let entry = FsEntry {
                path: path.to_string(),
                is_dir: false,
                size,
                modified: None,
            };
            let mut asset = Asset::from_entry(&self.fs, &entry);
            asset.capture_date = Some(Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap());
            self.processor
                .record_asset_discovered(&asset.file, asset.size, EventCode::DiscoveredImage);
            asset
        }
    }

    #[tokio::test]
    async fn test_local_duplicates() {
        let f = Fixture::new(&[
            ("a/IMG_1.jpg", b"same"),
            ("b/IMG_1.jpg", b"same"),
            ("c/IMG_1.jpg", b"diff"),
        ]);
        let mut analyzer = Analyzer::new(f.processor.clone(), AnalyzerOptions::default());

        assert!(analyzer.analyze(Group::single(f.asset("a/IMG_1.jpg"))).await.is_some());
        assert!(analyzer.analyze(Group::single(f.asset("b/IMG_1.jpg"))).await.is_none());
        assert!(analyzer.analyze(Group::single(f.asset("c/IMG_1.jpg"))).await.is_some());

        let counts = f.processor.get_event_counts();
        assert_eq!(counts[&EventCode::DiscardedLocalDuplicate], 1);
        assert_eq!(counts[&EventCode::AnalysisLocalDuplicate], 1);
        assert_eq!(f.processor.get_asset_counters().pending, 2);
    }

    #[tokio::test]
    async fn test_rejections_are_finalized() {
        let f = Fixture::new(&[("x.jpg", b"x"), ("y.jpg", b"yy")]);
        let mut analyzer = Analyzer::new(f.processor.clone(), AnalyzerOptions::default());

        let mut x = f.asset("x.jpg");
        x.rejected = Some(Rejection::local_duplicate("duplicated in the directory"));
        let mut y = f.asset("y.jpg");
        y.rejected = Some(Rejection::discarded("no associated metadata"));

        assert!(analyzer.analyze(Group::single(x)).await.is_none());
        assert!(analyzer.analyze(Group::single(y)).await.is_none());

        let counts = f.processor.get_event_counts();
        assert_eq!(counts[&EventCode::DiscardedLocalDuplicate], 1);
        assert_eq!(counts[&EventCode::AnalysisLocalDuplicate], 1);
        assert_eq!(counts[&EventCode::DiscardedDiscarded], 1);
        assert!(f.processor.is_complete());
    }

    #[tokio::test]
    async fn test_policies_and_stacking() {
        let f = Fixture::new(&[("IMG_1.CR2", b"raw-bytes"), ("IMG_1.JPG", b"jpg")]);
        let pair = || Group::new(GroupKind::RawJpg, vec![f.asset("IMG_1.JPG"), f.asset("IMG_1.CR2")], 1);

        let options = AnalyzerOptions {
            policies: GroupPolicies {
                raw_jpeg: StackPolicy::StackCoverJpg,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut analyzer = Analyzer::new(f.processor.clone(), options);
        let decided = analyzer.analyze(pair()).await.unwrap();
        assert!(decided.is_stacked());
        assert_eq!(decided.entries[0].asset.file.name(), "IMG_1.JPG");

        let f = Fixture::new(&[("IMG_1.CR2", b"raw-bytes"), ("IMG_1.JPG", b"jpg")]);
        let options = AnalyzerOptions {
            policies: GroupPolicies {
                raw_jpeg: StackPolicy::KeepRaw,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut analyzer = Analyzer::new(f.processor.clone(), options);
        let group = Group::new(GroupKind::RawJpg, vec![f.asset("IMG_1.JPG"), f.asset("IMG_1.CR2")], 1);
        let decided = analyzer.analyze(group).await.unwrap();
        assert_eq!(decided.len(), 1);
        assert_eq!(decided.entries[0].action, Action::Upload);
        assert_eq!(f.processor.get_event_counts()[&EventCode::DiscardedDiscarded], 1);
    }

    #[tokio::test]
    async fn test_date_range_and_required_date() {
        let f = Fixture::new(&[("old.jpg", b"o"), ("nodate.jpg", b"n"), ("new.jpg", b"w")]);
        let options = AnalyzerOptions {
            date_range: DateRange::parse("2023").unwrap(),
            require_date: true,
            ..Default::default()
        };
        let mut analyzer = Analyzer::new(f.processor.clone(), options);

        let mut old = f.asset("old.jpg");
        old.capture_date = Some(Utc.with_ymd_and_hms(2019, 1, 1, 12, 0, 0).unwrap());
        assert!(analyzer.analyze(Group::single(old)).await.is_none());

        assert!(analyzer.analyze(Group::single(f.asset("new.jpg"))).await.is_some());

        let mut analyzer = Analyzer::new(
            f.processor.clone(),
            AnalyzerOptions {
                require_date: true,
                ..Default::default()
            },
        );
        let mut nodate = f.asset("nodate.jpg");
        nodate.capture_date = None;
        assert!(analyzer.analyze(Group::single(nodate)).await.is_none());

        let counts = f.processor.get_event_counts();
        assert_eq!(counts[&EventCode::UploadNotSelected], 1);
        assert_eq!(counts[&EventCode::Error], 1);
    }
}
