//! File Processor
//!
//! This module provides functionality for:
//! 1. Keeping the asset tracker and the event recorder in lock-step
//! 2. Recording non-asset files (sidecars, metadata, banned entries)
//! 3. Finalizing a run and flagging assets that never reached a terminal state
//! 4. Combined reports for the end-of-run summary

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{instrument, warn};

use crate::ingest::events::{EventCode, EventRecorder};
use crate::ingest::fsys::FileId;
use crate::ingest::tracker::{AssetCounters, AssetRecord, AssetTracker, TrackerResult};

type CountersHook = Box<dyn Fn(AssetCounters) + Send + Sync>;

/// Façade over tracker and recorder
pub struct FileProcessor {
    tracker: Arc<AssetTracker>,
    recorder: Arc<EventRecorder>,
    counters_hook: RwLock<Option<CountersHook>>,
}

impl FileProcessor {
    /// Create a new file processor
    pub fn new(tracker: Arc<AssetTracker>, recorder: Arc<EventRecorder>) -> Self {
        Self {
            tracker,
            recorder,
            counters_hook: RwLock::new(None),
        }
    }

    pub fn tracker(&self) -> &Arc<AssetTracker> {
        &self.tracker
    }

    pub fn recorder(&self) -> &Arc<EventRecorder> {
        &self.recorder
    }

    /// Register a callback run after every counter change
    pub fn set_counters_hook(&self, hook: impl Fn(AssetCounters) + Send + Sync + 'static) {
        hook(self.tracker.get_counters());
        *self.counters_hook.write() = Some(Box::new(hook));
    }

    fn emit_counters(&self) {
        if let Some(hook) = self.counters_hook.read().as_ref() {
            hook(self.tracker.get_counters());
        }
    }

    /// An image or video enters the pipeline
    pub fn record_asset_discovered(&self, file: &FileId, size: u64, code: EventCode) {
        if self.tracker.discover_asset(file, size, code) {
            self.recorder.record_with_size(code, Some(file), size, &[]);
            self.emit_counters();
        }
    }

    /// An image or video is rejected as soon as it is seen
    pub fn record_asset_discarded_immediately(&self, file: &FileId, size: u64, code: EventCode, reason: &str) {
        if self.tracker.discover_and_discard(file, size, code, reason) {
            self.recorder
                .record_with_size(code, Some(file), size, &[("reason", reason.to_string())]);
            self.emit_counters();
        }
    }

    pub fn record_asset_processed(&self, file: &FileId, code: EventCode) {
        if let Ok(size) = self.tracker.set_processed(file, code) {
            self.recorder.record_with_size(code, Some(file), size, &[]);
            self.emit_counters();
        }
    }

    pub fn record_asset_discarded(&self, file: &FileId, code: EventCode, reason: &str) {
        if let Ok(size) = self.tracker.set_discarded(file, code, reason) {
            self.recorder
                .record_with_size(code, Some(file), size, &[("reason", reason.to_string())]);
            self.emit_counters();
        }
    }

    pub fn record_asset_error(&self, file: &FileId, code: EventCode, err: &str) {
        if let Ok(size) = self.tracker.set_error(file, code, err) {
            self.recorder
                .record_with_size(code, Some(file), size, &[("error", err.to_string())]);
            self.emit_counters();
        }
    }

    /// A narrative event about a tracked asset that does not change its state
    pub fn record_asset_event(&self, file: &FileId, code: EventCode, args: &[(&str, String)]) {
        self.tracker.annotate(file, code, code.label(), args);
        self.recorder.record(code, Some(file), args);
    }

    /// Sidecars, metadata files and everything else that is not an asset
    pub fn record_non_asset(&self, file: &FileId, size: u64, code: EventCode, args: &[(&str, String)]) {
        self.recorder.record_with_size(code, Some(file), size, args);
    }

    /// A run-level event not tied to a file
    pub fn record_info(&self, code: EventCode, args: &[(&str, String)]) {
        self.recorder.record(code, None, args);
    }

    /// Validate the tracker; every still-pending asset gets an `ErrorIncomplete` event.
    #[instrument(skip(self))]
    pub fn finalize(&self) -> TrackerResult<()> {
        if let Err(e) = self.tracker.validate() {
            for record in self.tracker.get_pending() {
                self.recorder.record(
                    EventCode::ErrorIncomplete,
                    Some(&record.file),
                    &[
                        ("error", "asset never reached final state".to_string()),
                        ("discovered_at", record.discovered_at.to_rfc3339()),
                    ],
                );
            }
            warn!(error = %e, "Run finished with pending assets");
            return Err(e);
        }
        Ok(())
    }

    pub fn generate_report(&self) -> String {
        let mut report = self.tracker.generate_report();
        let events = self.recorder.generate_event_report();
        if !events.is_empty() {
            report.push('\n');
            report.push_str(&events);
        }
        report
    }

    pub fn generate_detailed_report(&self) -> String {
        self.tracker.generate_detailed_report()
    }

    pub fn get_asset_counters(&self) -> AssetCounters {
        self.tracker.get_counters()
    }

    pub fn get_event_counts(&self) -> HashMap<EventCode, i64> {
        self.recorder.get_event_counts()
    }

    pub fn get_event_sizes(&self) -> HashMap<EventCode, i64> {
        self.recorder.get_event_sizes()
    }

    pub fn get_pending_assets(&self) -> Vec<AssetRecord> {
        self.tracker.get_pending()
    }

    pub fn is_complete(&self) -> bool {
        self.tracker.is_complete()
    }

    pub fn summary(&self) -> String {
        let c = self.tracker.get_counters();
        format!(
            "Assets: {} processed, {} discarded, {} errors, {} pending",
            c.processed, c.discarded, c.errors, c.pending
        )
    }
}

/// Build a processor with fresh tracker and recorder
pub fn init_file_processor(debug_events: bool) -> Arc<FileProcessor> {
    Arc::new(FileProcessor::new(
        Arc::new(AssetTracker::new(debug_events)),
        Arc::new(EventRecorder::new()),
    ))
}
