//! Ingestion pipeline
//!
//! This module provides functionality for:
//! 1. Running the readers, the analyzer and the uploader as stages joined by bounded queues
//! 2. Holding the server job lease for the length of the run
//! 3. Unwinding every stage on cancellation or when the error budget runs out
//! 4. Finalizing the tracker so that counters reconcile

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::ingest::analyzer::{Analyzer, AnalyzerError, AnalyzerOptions};
use crate::ingest::cancel::CancelToken;
use crate::ingest::coordinator::JobLease;
use crate::ingest::events::EventCode;
use crate::ingest::file_processor::FileProcessor;
use crate::ingest::readers::{BrowseContext, Reader, ReaderError};
use crate::ingest::server::ServerClient;
use crate::ingest::uploader::{UploadError, Uploader, UploaderOptions};

/// Error types for a run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Run cancelled")]
    Cancelled,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Capacity of each queue between stages
    pub queue_size: usize,
    pub pause_jobs: bool,
    pub analyzer: AnalyzerOptions,
    pub uploader: UploaderOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            queue_size: 64,
            pause_jobs: true,
            analyzer: AnalyzerOptions::default(),
            uploader: UploaderOptions::default(),
        }
    }
}

pub struct Pipeline {
    client: Arc<dyn ServerClient>,
    admin: Option<Arc<dyn ServerClient>>,
    processor: Arc<FileProcessor>,
    options: PipelineOptions,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(
        client: Arc<dyn ServerClient>,
        admin: Option<Arc<dyn ServerClient>>,
        processor: Arc<FileProcessor>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            client,
            admin,
            processor,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Token that stops the run when cancelled
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Read every source and publish what it holds.
    ///
    /// Readers run one after the other ordered by identity, so the first copy
    /// of a duplicate is always taken from the same source.
    #[instrument(skip_all, fields(readers = readers.len()))]
    pub async fn run(&self, mut readers: Vec<Reader>) -> PipelineResult<()> {
        readers.sort_by_key(|r| r.identity());
        let queue_size = self.options.queue_size.max(1);

        let lease = if self.options.pause_jobs {
            Some(JobLease::acquire(self.admin.clone(), self.processor.clone()).await)
        } else {
            None
        };

        let (group_tx, group_rx) = flume::bounded(queue_size);
        let (decided_tx, decided_rx) = flume::bounded(queue_size);

        let ctx = BrowseContext {
            processor: self.processor.clone(),
            cancel: self.cancel.clone(),
            tx: group_tx,
        };
        let read_task = tokio::spawn(read_all(readers, ctx));

        let analyzer = Analyzer::new(self.processor.clone(), self.options.analyzer.clone());
        let analyze_task = tokio::spawn(analyzer.run(group_rx, decided_tx, self.cancel.clone()));

        let uploader = Arc::new(Uploader::new(
            self.client.clone(),
            self.processor.clone(),
            self.options.uploader.clone(),
            self.cancel.clone(),
        ));
        let uploaded = uploader.run(decided_rx).await;

        let read = read_task.await;
        let analyzed = analyze_task.await;

        if let Some(lease) = &lease {
            lease.release().await;
        }

        let cancelled = self.cancel.is_cancelled();
        if let Err(e) = self.processor.finalize() {
            if cancelled {
                info!(error = %e, "Run interrupted with pending assets");
            } else {
                warn!(error = %e, "Run finished with pending assets");
            }
        }
        info!(summary = %self.processor.summary(), "Run finished");

        uploaded?;
        match read? {
            Err(ReaderError::Cancelled | ReaderError::Closed) => {}
            other => other?,
        }
        match analyzed? {
            Err(AnalyzerError::Closed) if cancelled => {}
            other => other?,
        }
        if cancelled {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }
}

/// Browse the readers in turn; a failed reader does not stop the next ones.
async fn read_all(readers: Vec<Reader>, ctx: BrowseContext) -> Result<(), ReaderError> {
    let mut first_error = None;
    for reader in readers {
        let name = reader.name();
        match reader.browse(ctx.clone()).await {
            Ok(()) => {}
            Err(e @ (ReaderError::Cancelled | ReaderError::Closed)) => return Err(e),
            Err(e) => {
                error!(reader = %name, error = %e, "Source could not be read");
                ctx.processor
                    .record_info(EventCode::Error, &[("reader", name), ("error", e.to_string())]);
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::analyzer::filters::GroupPolicies;
    use crate::ingest::file_processor::init_file_processor;
    use crate::ingest::fsys::SourceFs;
    use crate::ingest::readers::{FolderOptions, FolderReader, ReaderOptions, TakeoutOptions, TakeoutReader};
    use crate::ingest::server::dry_run::DryRun;
    use crate::ingest::server::fake::FakeServer;
    use crate::ingest::server_errors::ErrorPolicy;
    use crate::ingest::tracker::AssetState;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::Ordering;

    fn write(root: &Path, path: &str, content: &[u8]) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    fn common() -> Arc<ReaderOptions> {
        Arc::new(ReaderOptions {
            date_from_name: true,
            ..Default::default()
        })
    }

    fn folder(root: &Path, common: Arc<ReaderOptions>) -> Reader {
        let src = Arc::new(SourceFs::open_dir(root).unwrap());
        Reader::Folder(FolderReader::new(vec![src], FolderOptions::default(), common).unwrap())
    }

    fn options(policies: GroupPolicies) -> PipelineOptions {
        PipelineOptions {
            queue_size: 4,
            analyzer: AnalyzerOptions {
                policies,
                ..Default::default()
            },
            uploader: UploaderOptions {
                concurrent_jobs: 4,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn run(
        server: Arc<dyn ServerClient>,
        options: PipelineOptions,
        readers: Vec<Reader>,
    ) -> (Arc<FileProcessor>, PipelineResult<()>) {
        let processor = init_file_processor(true);
        let pipeline = Pipeline::new(server.clone(), Some(server), processor.clone(), options);
        let result = pipeline.run(readers).await;
        (processor, result)
    }

    fn count(counts: &HashMap<EventCode, i64>, code: EventCode) -> i64 {
        counts.get(&code).copied().unwrap_or(0)
    }

    fn assert_partition(processor: &FileProcessor) {
        let c = processor.get_asset_counters();
        assert_eq!(c.processed + c.discarded + c.errors + c.pending, c.total());
        assert_eq!(
            c.processed_size + c.discarded_size + c.error_size + c.pending_size,
            c.asset_size
        );
    }

    #[tokio::test]
    async fn test_distinct_images() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..40 {
            let name = format!("IMG_20230101_10{:02}00.jpg", i);
            write(dir.path(), &name, format!("distinct image {}", i).as_bytes());
        }
        let server = Arc::new(FakeServer::new());
        let (processor, result) = run(
            server.clone(),
            options(GroupPolicies::default()),
            vec![folder(dir.path(), common())],
        )
        .await;
        result.unwrap();

        let counts = processor.get_event_counts();
        assert_eq!(count(&counts, EventCode::Uploaded), 40);
        let c = processor.get_asset_counters();
        assert_eq!((c.pending, c.errors, c.discarded), (0, 0, 0));
        assert_partition(&processor);
        assert!(processor.is_complete());
        assert_eq!(server.assets().len(), 40);
        assert!(server.paused_jobs().is_empty());
        assert!(server.pause_calls.load(Ordering::SeqCst) > 0);
    }

    fn copies_fixture(root: &Path) {
        for i in 0..5 {
            let name = format!("IMG_20230102_11{:02}00.jpg", i);
            let content = format!("copied image {}", i);
            write(root, &format!("a/{}", name), content.as_bytes());
            write(root, &format!("b/{}", name), content.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_local_copies() {
        let dir = tempfile::tempdir().unwrap();
        copies_fixture(dir.path());
        let server = Arc::new(FakeServer::new());
        let (processor, result) = run(
            server.clone(),
            options(GroupPolicies::default()),
            vec![folder(dir.path(), common())],
        )
        .await;
        result.unwrap();

        let counts = processor.get_event_counts();
        assert_eq!(count(&counts, EventCode::Uploaded), 5);
        assert_eq!(count(&counts, EventCode::DiscardedLocalDuplicate), 5);
        assert_eq!(count(&counts, EventCode::AnalysisLocalDuplicate), 5);
        assert!(processor.is_complete());
        assert_partition(&processor);
        assert_eq!(server.assets().len(), 5);
    }

    fn survivors(processor: &FileProcessor) -> Vec<String> {
        let mut kept: Vec<String> = processor
            .tracker()
            .get_all_assets()
            .into_iter()
            .filter(|r| r.state == AssetState::Processed)
            .map(|r| r.file.to_string())
            .collect();
        kept.sort();
        kept
    }

    #[tokio::test]
    async fn test_duplicate_survivor_ignores_order() {
        let dir = tempfile::tempdir().unwrap();
        // written in reverse of identity order
        write(dir.path(), "b/IMG_20230107_170000.jpg", b"same picture");
        write(dir.path(), "a/IMG_20230107_170000.jpg", b"same picture");

        let (processor, result) = run(
            Arc::new(FakeServer::new()),
            options(GroupPolicies::default()),
            vec![folder(dir.path(), common())],
        )
        .await;
        result.unwrap();
        let kept = survivors(&processor);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].ends_with("a/IMG_20230107_170000.jpg"));
        assert_eq!(count(&processor.get_event_counts(), EventCode::DiscardedLocalDuplicate), 1);
    }

    #[tokio::test]
    async fn test_duplicate_survivor_across_readers() {
        let one = tempfile::tempdir().unwrap();
        let two = tempfile::tempdir().unwrap();
        for dir in [&one, &two] {
            write(dir.path(), "IMG_20230107_180000.jpg", b"shared picture");
        }

        let mut outcomes = Vec::new();
        for (first, second) in [(&one, &two), (&two, &one)] {
            let (processor, result) = run(
                Arc::new(FakeServer::new()),
                options(GroupPolicies::default()),
                vec![folder(first.path(), common()), folder(second.path(), common())],
            )
            .await;
            result.unwrap();
            let counts = processor.get_event_counts();
            assert_eq!(count(&counts, EventCode::Uploaded), 1);
            assert_eq!(count(&counts, EventCode::DiscardedLocalDuplicate), 1);
            assert_partition(&processor);
            outcomes.push(survivors(&processor));
        }
        assert_eq!(outcomes[0].len(), 1);
        assert_eq!(outcomes[0], outcomes[1]);
    }

    #[tokio::test]
    async fn test_dry_run_matches_real_run() {
        let dir = tempfile::tempdir().unwrap();
        copies_fixture(dir.path());

        let real = Arc::new(FakeServer::new());
        let (real_processor, result) = run(
            real.clone(),
            options(GroupPolicies::default()),
            vec![folder(dir.path(), common())],
        )
        .await;
        result.unwrap();

        let untouched = Arc::new(FakeServer::new());
        let dry: Arc<dyn ServerClient> = Arc::new(DryRun::new(untouched.clone()));
        let (dry_processor, result) = run(
            dry,
            options(GroupPolicies::default()),
            vec![folder(dir.path(), common())],
        )
        .await;
        result.unwrap();

        assert_eq!(real_processor.get_event_counts(), dry_processor.get_event_counts());
        assert!(untouched.assets().is_empty());
        assert_eq!(untouched.upload_calls.load(Ordering::SeqCst), 0);
        assert_eq!(untouched.pause_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upgrade_on_second_run() {
        let low = tempfile::tempdir().unwrap();
        let high = tempfile::tempdir().unwrap();
        for i in 0..5 {
            let name = format!("IMG_20230103_12{:02}00.jpg", i);
            write(low.path(), &name, format!("low {}", i).as_bytes());
            write(high.path(), &name, format!("much higher quality {}", i).as_bytes());
        }
        let server = Arc::new(FakeServer::new());

        let (first, result) = run(
            server.clone(),
            options(GroupPolicies::default()),
            vec![folder(low.path(), common())],
        )
        .await;
        result.unwrap();
        assert_eq!(count(&first.get_event_counts(), EventCode::Uploaded), 5);

        let (second, result) = run(
            server.clone(),
            options(GroupPolicies::default()),
            vec![folder(high.path(), common())],
        )
        .await;
        result.unwrap();
        let counts = second.get_event_counts();
        assert_eq!(count(&counts, EventCode::UploadUpgraded), 5);
        assert_eq!(count(&counts, EventCode::Uploaded), 0);
        assert_eq!(server.assets().len(), 5);

        let (third, result) = run(
            server.clone(),
            options(GroupPolicies::default()),
            vec![folder(low.path(), common())],
        )
        .await;
        result.unwrap();
        let counts = third.get_event_counts();
        assert_eq!(count(&counts, EventCode::UploadServerBetter), 5);
        assert!(third.is_complete());
    }

    #[tokio::test]
    async fn test_takeout_album_copies() {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=5 {
            let name = format!("IMG_000{}.jpg", i);
            let json = format!(
                r#"{{"title":"{}","photoTakenTime":{{"timestamp":"{}"}}}}"#,
                name,
                1_672_574_400 + i * 3600
            );
            let content = format!("takeout image {}", i);
            for album in ["Photos from 2023", "Trip"] {
                write(dir.path(), &format!("Takeout/Google Photos/{}/{}", album, name), content.as_bytes());
                write(
                    dir.path(),
                    &format!("Takeout/Google Photos/{}/{}.json", album, name),
                    json.as_bytes(),
                );
            }
        }
        write(dir.path(), "Takeout/Google Photos/Trip/metadata.json", br#"{"title":"Trip"}"#);

        let src = Arc::new(SourceFs::open_dir(dir.path()).unwrap());
        let reader = Reader::Takeout(TakeoutReader::new(vec![src], TakeoutOptions::default(), common()));
        let server = Arc::new(FakeServer::new());
        let (processor, result) = run(server.clone(), options(GroupPolicies::default()), vec![reader]).await;
        result.unwrap();

        let counts = processor.get_event_counts();
        assert_eq!(count(&counts, EventCode::AnalysisAssociatedMetadata), 10);
        assert_eq!(count(&counts, EventCode::AnalysisMissingAssociatedMetadata), 0);
        assert_eq!(count(&counts, EventCode::Uploaded), 5);
        assert_eq!(count(&counts, EventCode::DiscardedLocalDuplicate), 5);
        assert_eq!(count(&counts, EventCode::UploadAlbumCreated), 1);
        assert_eq!(count(&counts, EventCode::UploadAddToAlbum), 5);
        assert_eq!(count(&counts, EventCode::Tagged), 5);
        assert!(processor.is_complete());
        assert_eq!(server.album_members()["Trip"].len(), 5);
        assert_eq!(server.updates(), 5);
    }

    #[tokio::test]
    async fn test_raw_jpeg_keep_raw() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            let stem = format!("IMG_20230104_13{:02}00", i);
            write(dir.path(), &format!("{}.NEF", stem), format!("raw {}", i).as_bytes());
            write(dir.path(), &format!("{}.JPG", stem), format!("jpeg {}", i).as_bytes());
        }
        for i in 0..3 {
            let name = format!("IMG_20230104_14{:02}00.jpg", i);
            write(dir.path(), &name, format!("single {}", i).as_bytes());
        }

        let policies = GroupPolicies::from_labels("NoStack", "StackKeepRaw", "NoStack", false).unwrap();
        let server = Arc::new(FakeServer::new());
        let (processor, result) = run(server.clone(), options(policies), vec![folder(dir.path(), common())]).await;
        result.unwrap();

        let counts = processor.get_event_counts();
        assert_eq!(count(&counts, EventCode::Uploaded), 7);
        assert_eq!(count(&counts, EventCode::DiscardedDiscarded), 4);
        assert_eq!(count(&counts, EventCode::Stacked), 0);
        assert!(processor.is_complete());
        assert!(server.assets().iter().all(|a| !a.original_file_name.ends_with(".JPG")));
    }

    #[tokio::test]
    async fn test_phone_burst_stacked() {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=7 {
            let name = if i == 1 {
                "IMG_20210101_120000_BURST001_COVER.jpg".to_string()
            } else {
                format!("IMG_20210101_120000_BURST{:03}.jpg", i)
            };
            write(dir.path(), &name, format!("frame {}", i).as_bytes());
        }

        let policies = GroupPolicies::from_labels("Stack", "NoStack", "NoStack", false).unwrap();
        let server = Arc::new(FakeServer::new());
        let (processor, result) = run(server.clone(), options(policies), vec![folder(dir.path(), common())]).await;
        result.unwrap();

        let counts = processor.get_event_counts();
        assert_eq!(count(&counts, EventCode::Uploaded), 7);
        assert_eq!(count(&counts, EventCode::Stacked), 7);
        let stacks = server.stacks();
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0].len(), 7);
        let cover = server.assets().into_iter().find(|a| a.id == stacks[0][0]).unwrap();
        assert!(cover.original_file_name.contains("COVER"));
    }

    #[tokio::test]
    async fn test_error_budget_aborts() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6 {
            let name = format!("IMG_20230105_15{:02}00.jpg", i);
            write(dir.path(), &name, format!("rejected {}", i).as_bytes());
        }
        let server = Arc::new(FakeServer::new());
        for i in 0..6 {
            server.fail_upload(&format!("IMG_20230105_15{:02}00.jpg", i), 400);
        }

        let mut opts = options(GroupPolicies::default());
        opts.uploader.concurrent_jobs = 1;
        opts.uploader.on_server_errors = ErrorPolicy::Stop;
        let (processor, result) = run(server.clone(), opts, vec![folder(dir.path(), common())]).await;

        assert!(matches!(
            result,
            Err(PipelineError::Upload(UploadError::BudgetExceeded { .. }))
        ));
        assert!(server.paused_jobs().is_empty());
        assert!(count(&processor.get_event_counts(), EventCode::UploadServerError) >= 1);
        assert_partition(&processor);
    }

    #[tokio::test]
    async fn test_continue_policy_records_errors() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            let name = format!("IMG_20230106_16{:02}00.jpg", i);
            write(dir.path(), &name, format!("image {}", i).as_bytes());
        }
        let server = Arc::new(FakeServer::new());
        server.fail_upload("IMG_20230106_160000.jpg", 400);

        let mut opts = options(GroupPolicies::default());
        opts.uploader.on_server_errors = ErrorPolicy::Continue;
        let (processor, result) = run(server.clone(), opts, vec![folder(dir.path(), common())]).await;
        result.unwrap();

        let counts = processor.get_event_counts();
        assert_eq!(count(&counts, EventCode::UploadServerError), 1);
        assert_eq!(count(&counts, EventCode::Uploaded), 3);
        assert!(processor.is_complete());
    }

    #[tokio::test]
    async fn test_cancelled_run_reconciles() {
        let dir = tempfile::tempdir().unwrap();
        copies_fixture(dir.path());
        let server = Arc::new(FakeServer::new());
        let processor = init_file_processor(true);
        let pipeline = Pipeline::new(
            server.clone(),
            Some(server.clone()),
            processor.clone(),
            options(GroupPolicies::default()),
        );
        pipeline.cancel_token().cancel();

        let result = pipeline.run(vec![folder(dir.path(), common())]).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(server.paused_jobs().is_empty());
        assert_partition(&processor);
        assert_eq!(server.upload_calls.load(Ordering::SeqCst), 0);
    }
}
