//! Event Recorder
//!
//! This module provides functionality for:
//! 1. A closed set of event codes, each with a default severity
//! 2. Thread-safe counts and byte sums per code
//! 3. Emitting every recorded event to the tracing sink
//! 4. A grouped, human readable event report

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{Level, debug, error, info, trace, warn};

use crate::ingest::fsys::FileId;

/// Every event the pipeline can tell about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventCode {
    NotHandled,
    DiscoveredImage,
    DiscoveredVideo,
    DiscoveredSidecar,
    DiscoveredDiscarded,
    DiscoveredUnsupported,
    DiscoveredUseless,
    DiscoveredBanned,
    AnalysisAssociatedMetadata,
    AnalysisMissingAssociatedMetadata,
    AnalysisLocalDuplicate,
    UploadNotSelected,
    UploadUpgraded,
    UploadServerDuplicate,
    UploadServerBetter,
    UploadAlbumCreated,
    UploadAddToAlbum,
    UploadServerError,
    Uploaded,
    UploadedSuccess,
    UploadedServerDuplicate,
    Stacked,
    LivePhoto,
    Metadata,
    Info,
    Written,
    Tagged,
    DiscardedBanned,
    DiscardedLocalDuplicate,
    DiscardedDiscarded,
    ErrorUploadFailed,
    ErrorIncomplete,
    Error,
}

impl EventCode {
    pub const ALL: [EventCode; 33] = [
        EventCode::NotHandled,
        EventCode::DiscoveredImage,
        EventCode::DiscoveredVideo,
        EventCode::DiscoveredSidecar,
        EventCode::DiscoveredDiscarded,
        EventCode::DiscoveredUnsupported,
        EventCode::DiscoveredUseless,
        EventCode::DiscoveredBanned,
        EventCode::AnalysisAssociatedMetadata,
        EventCode::AnalysisMissingAssociatedMetadata,
        EventCode::AnalysisLocalDuplicate,
        EventCode::UploadNotSelected,
        EventCode::UploadUpgraded,
        EventCode::UploadServerDuplicate,
        EventCode::UploadServerBetter,
        EventCode::UploadAlbumCreated,
        EventCode::UploadAddToAlbum,
        EventCode::UploadServerError,
        EventCode::Uploaded,
        EventCode::UploadedSuccess,
        EventCode::UploadedServerDuplicate,
        EventCode::Stacked,
        EventCode::LivePhoto,
        EventCode::Metadata,
        EventCode::Info,
        EventCode::Written,
        EventCode::Tagged,
        EventCode::DiscardedBanned,
        EventCode::DiscardedLocalDuplicate,
        EventCode::DiscardedDiscarded,
        EventCode::ErrorUploadFailed,
        EventCode::ErrorIncomplete,
        EventCode::Error,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Label shown in logs and reports
    pub fn label(self) -> &'static str {
        match self {
            EventCode::NotHandled => "not handled",
            EventCode::DiscoveredImage => "scanned image file",
            EventCode::DiscoveredVideo => "scanned video file",
            EventCode::DiscoveredSidecar => "scanned sidecar file",
            EventCode::DiscoveredDiscarded => "discarded file",
            EventCode::DiscoveredUnsupported => "unsupported file",
            EventCode::DiscoveredUseless => "useless file",
            EventCode::DiscoveredBanned => "banned file",
            EventCode::AnalysisAssociatedMetadata => "associated metadata file",
            EventCode::AnalysisMissingAssociatedMetadata => "missing associated metadata file",
            EventCode::AnalysisLocalDuplicate => "file duplicated in the input",
            EventCode::UploadNotSelected => "file not selected",
            EventCode::UploadUpgraded => "server's asset upgraded with the input",
            EventCode::UploadServerDuplicate => "server has same asset",
            EventCode::UploadServerBetter => "server has a better asset",
            EventCode::UploadAlbumCreated => "album created/updated",
            EventCode::UploadAddToAlbum => "added to an album",
            EventCode::UploadServerError => "server error",
            EventCode::Uploaded => "uploaded",
            EventCode::UploadedSuccess => "upload completed",
            EventCode::UploadedServerDuplicate => "server reported a duplicate",
            EventCode::Stacked => "stacked",
            EventCode::LivePhoto => "live photo",
            EventCode::Metadata => "metadata file",
            EventCode::Info => "info",
            EventCode::Written => "written",
            EventCode::Tagged => "tagged",
            EventCode::DiscardedBanned => "banned asset",
            EventCode::DiscardedLocalDuplicate => "local duplicate",
            EventCode::DiscardedDiscarded => "discarded by policy",
            EventCode::ErrorUploadFailed => "upload failed",
            EventCode::ErrorIncomplete => "incomplete asset",
            EventCode::Error => "error",
        }
    }

    /// Default severity before attribute elevation
    pub fn level(self) -> Level {
        match self {
            EventCode::UploadServerError
            | EventCode::ErrorUploadFailed
            | EventCode::ErrorIncomplete
            | EventCode::Error => Level::ERROR,
            EventCode::NotHandled
            | EventCode::DiscoveredUnsupported
            | EventCode::AnalysisMissingAssociatedMetadata => Level::WARN,
            EventCode::DiscoveredSidecar
            | EventCode::DiscoveredUseless
            | EventCode::AnalysisAssociatedMetadata
            | EventCode::Metadata
            | EventCode::Written => Level::DEBUG,
            _ => Level::INFO,
        }
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Append-only tally of events
pub struct EventRecorder {
    counts: Vec<AtomicI64>,
    sizes: Vec<AtomicI64>,
}

impl EventRecorder {
    /// Create a new recorder with zeroed counters
    pub fn new() -> Self {
        Self {
            counts: EventCode::ALL.iter().map(|_| AtomicI64::new(0)).collect(),
            sizes: EventCode::ALL.iter().map(|_| AtomicI64::new(0)).collect(),
        }
    }

    pub fn record(&self, code: EventCode, file: Option<&FileId>, args: &[(&str, String)]) {
        self.record_with_size(code, file, 0, args);
    }

    /// Count the event, add its size and emit it at the code's severity.
    ///
    /// An `"error"` attribute raises the severity to ERROR, a `"warning"` one to WARN.
    pub fn record_with_size(&self, code: EventCode, file: Option<&FileId>, size: u64, args: &[(&str, String)]) {
        self.counts[code.index()].fetch_add(1, Ordering::Relaxed);
        self.sizes[code.index()].fetch_add(size as i64, Ordering::Relaxed);

        let mut level = code.level();
        if args.iter().any(|(k, _)| *k == "error") {
            level = Level::ERROR;
        } else if args.iter().any(|(k, _)| *k == "warning") && level > Level::WARN {
            level = Level::WARN;
        }

        let file = file.map(|f| f.to_string()).unwrap_or_default();
        let attrs = args
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        emit(level, code, &file, size, &attrs);
    }

    pub fn count(&self, code: EventCode) -> i64 {
        self.counts[code.index()].load(Ordering::Relaxed)
    }

    pub fn size(&self, code: EventCode) -> i64 {
        self.sizes[code.index()].load(Ordering::Relaxed)
    }

    /// Snapshot of every code's count
    pub fn get_event_counts(&self) -> HashMap<EventCode, i64> {
        EventCode::ALL.iter().map(|c| (*c, self.count(*c))).collect()
    }

    /// Snapshot of every code's byte sum
    pub fn get_event_sizes(&self) -> HashMap<EventCode, i64> {
        EventCode::ALL.iter().map(|c| (*c, self.size(*c))).collect()
    }

    #[cfg(test)]
    pub fn total_assets(&self) -> i64 {
        self.count(EventCode::DiscoveredImage) + self.count(EventCode::DiscoveredVideo)
    }

    /// Grouped report of every non-zero counter
    pub fn generate_event_report(&self) -> String {
        let sections: [(&str, &[EventCode]); 5] = [
            ("Discovery (assets)", &[EventCode::DiscoveredImage, EventCode::DiscoveredVideo]),
            (
                "Discovery (non-assets)",
                &[
                    EventCode::DiscoveredSidecar,
                    EventCode::DiscoveredUnsupported,
                    EventCode::DiscoveredUseless,
                    EventCode::DiscoveredBanned,
                    EventCode::Metadata,
                    EventCode::AnalysisAssociatedMetadata,
                    EventCode::AnalysisMissingAssociatedMetadata,
                ],
            ),
            (
                "Lifecycle: processed",
                &[
                    EventCode::Uploaded,
                    EventCode::UploadUpgraded,
                    EventCode::UploadServerDuplicate,
                    EventCode::UploadedServerDuplicate,
                    EventCode::UploadedSuccess,
                    EventCode::UploadAlbumCreated,
                    EventCode::UploadAddToAlbum,
                    EventCode::Tagged,
                    EventCode::Stacked,
                    EventCode::LivePhoto,
                ],
            ),
            (
                "Lifecycle: discarded",
                &[
                    EventCode::DiscoveredDiscarded,
                    EventCode::DiscardedBanned,
                    EventCode::DiscardedLocalDuplicate,
                    EventCode::AnalysisLocalDuplicate,
                    EventCode::DiscardedDiscarded,
                    EventCode::UploadNotSelected,
                    EventCode::UploadServerBetter,
                ],
            ),
            (
                "Lifecycle: errors",
                &[
                    EventCode::UploadServerError,
                    EventCode::ErrorUploadFailed,
                    EventCode::ErrorIncomplete,
                    EventCode::Error,
                ],
            ),
        ];

        let mut report = String::new();
        for (title, codes) in sections {
            let lines: Vec<String> = codes
                .iter()
                .filter(|c| self.count(**c) > 0)
                .map(|c| {
                    let size = self.size(*c);
                    if size > 0 {
                        format!("{:<40}: {:>7}  ({})", c.label(), self.count(*c), format_size(size as u64))
                    } else {
                        format!("{:<40}: {:>7}", c.label(), self.count(*c))
                    }
                })
                .collect();
            if lines.is_empty() {
                continue;
            }
            report.push_str(title);
            report.push('\n');
            report.push_str(&"-".repeat(title.len()));
            report.push('\n');
            for line in lines {
                report.push_str(&line);
                report.push('\n');
            }
            report.push('\n');
        }
        report
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn emit(level: Level, code: EventCode, file: &str, size: u64, attrs: &str) {
    let event = code.label();
    match level {
        Level::ERROR => error!(event, file, size, attrs, "{}", event),
        Level::WARN => warn!(event, file, size, attrs, "{}", event),
        Level::INFO => info!(event, file, size, attrs, "{}", event),
        Level::DEBUG => debug!(event, file, size, attrs, "{}", event),
        _ => trace!(event, file, size, attrs, "{}", event),
    }
}

/// Human readable byte size in 1024 units with one decimal
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counts_and_sizes() {
        let recorder = EventRecorder::new();
        let file = FileId::new("src", "a.jpg");
        recorder.record_with_size(EventCode::DiscoveredImage, Some(&file), 100, &[]);
        recorder.record_with_size(EventCode::DiscoveredImage, Some(&file), 50, &[]);
        recorder.record(EventCode::Metadata, None, &[("reason", "album".to_string())]);

        assert_eq!(recorder.count(EventCode::DiscoveredImage), 2);
        assert_eq!(recorder.size(EventCode::DiscoveredImage), 150);
        assert_eq!(recorder.get_event_counts()[&EventCode::Metadata], 1);
        assert_eq!(recorder.get_event_counts()[&EventCode::Uploaded], 0);
        assert_eq!(recorder.total_assets(), 2);
    }

    #[test]
    fn test_concurrent_recording() {
        let recorder = Arc::new(EventRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = recorder.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        r.record_with_size(EventCode::Uploaded, None, 2, &[]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(recorder.count(EventCode::Uploaded), 8000);
        assert_eq!(recorder.size(EventCode::Uploaded), 16000);
    }

    #[test]
    fn test_event_report_sections() {
        let recorder = EventRecorder::new();
        recorder.record_with_size(EventCode::DiscoveredImage, None, 2048, &[]);
        recorder.record(EventCode::DiscardedLocalDuplicate, None, &[]);

        let report = recorder.generate_event_report();
        assert!(report.contains("Discovery (assets)"));
        assert!(report.contains("Lifecycle: discarded"));
        assert!(!report.contains("Lifecycle: errors"));
        assert!(report.contains(&format!("{:<40}: {:>7}  (2.0 KB)", "scanned image file", 1)));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
