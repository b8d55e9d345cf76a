//! Asset Tracker
//!
//! This module provides functionality for:
//! 1. A per-asset lifecycle state machine (pending, processed, discarded, error)
//! 2. Counters and byte totals that partition the discovered assets
//! 3. Validation that every asset reached a terminal state
//! 4. Text and CSV reports
//!
//! Only images and videos are tracked. Sidecars and other files are the
//! event recorder's business.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{error, warn};

use crate::ingest::events::{EventCode, format_size};
use crate::ingest::fsys::FileId;

/// Error types for the tracker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("{0} assets never reached final state")]
    Incomplete(usize),

    #[error("asset not tracked: {0}")]
    Unknown(String),

    #[error("asset {file} is already {state}")]
    AlreadyFinal { file: String, state: AssetState },
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetState {
    Pending,
    Processed,
    Discarded,
    Error,
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetState::Pending => write!(f, "PENDING"),
            AssetState::Processed => write!(f, "PROCESSED"),
            AssetState::Discarded => write!(f, "DISCARDED"),
            AssetState::Error => write!(f, "ERROR"),
        }
    }
}

/// One entry of a debug-mode event history
#[derive(Debug, Clone)]
pub struct TrackedEvent {
    pub code: EventCode,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub file: FileId,
    pub size: u64,
    pub state: AssetState,
    pub code: EventCode,
    pub reason: String,
    pub discovered_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub history: Vec<TrackedEvent>,
}

/// Snapshot of the partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetCounters {
    pub pending: i64,
    pub processed: i64,
    pub discarded: i64,
    pub errors: i64,
    pub asset_size: u64,
    pub processed_size: u64,
    pub discarded_size: u64,
    pub error_size: u64,
    pub pending_size: u64,
}

impl AssetCounters {
    pub fn total(&self) -> i64 {
        self.pending + self.processed + self.discarded + self.errors
    }

    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }
}

#[derive(Default)]
struct TrackerState {
    assets: HashMap<String, AssetRecord>,
    pending: i64,
    processed: i64,
    discarded: i64,
    errors: i64,
    asset_size: u64,
    processed_size: u64,
    discarded_size: u64,
    error_size: u64,
}

pub struct AssetTracker {
    state: RwLock<TrackerState>,
    debug: bool,
}

impl AssetTracker {
    /// Create a new tracker; `debug` keeps a per-asset event history
    pub fn new(debug: bool) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            debug,
        }
    }

    /// Register an asset in PENDING. Re-discovery is logged and ignored.
    pub fn discover_asset(&self, file: &FileId, size: u64, code: EventCode) -> bool {
        let mut state = self.state.write();
        let key = file.identity();
        if state.assets.contains_key(&key) {
            warn!(file = %file, code = ?code, "Asset already tracked");
            return false;
        }
        let now = Utc::now();
        let history = if self.debug {
            vec![TrackedEvent {
                code,
                timestamp: now,
                message: "Asset discovered".to_string(),
                attrs: Vec::new(),
            }]
        } else {
            Vec::new()
        };
        state.assets.insert(
            key,
            AssetRecord {
                file: file.clone(),
                size,
                state: AssetState::Pending,
                code,
                reason: String::new(),
                discovered_at: now,
                finalized_at: None,
                history,
            },
        );
        state.pending += 1;
        state.asset_size += size;
        true
    }

    /// Register an asset directly in DISCARDED
    pub fn discover_and_discard(&self, file: &FileId, size: u64, code: EventCode, reason: &str) -> bool {
        let mut state = self.state.write();
        let key = file.identity();
        if state.assets.contains_key(&key) {
            warn!(file = %file, code = ?code, "Asset already tracked");
            return false;
        }
        let now = Utc::now();
        let history = if self.debug {
            vec![TrackedEvent {
                code,
                timestamp: now,
                message: "Asset discovered and immediately discarded".to_string(),
                attrs: vec![("reason".to_string(), reason.to_string())],
            }]
        } else {
            Vec::new()
        };
        state.assets.insert(
            key,
            AssetRecord {
                file: file.clone(),
                size,
                state: AssetState::Discarded,
                code,
                reason: reason.to_string(),
                discovered_at: now,
                finalized_at: Some(now),
                history,
            },
        );
        state.discarded += 1;
        state.asset_size += size;
        state.discarded_size += size;
        true
    }

    /// PENDING → PROCESSED. Returns the asset size.
    pub fn set_processed(&self, file: &FileId, code: EventCode) -> TrackerResult<u64> {
        self.finalize(file, AssetState::Processed, code, String::new(), "Asset processed")
    }

    /// PENDING → DISCARDED. Returns the asset size.
    pub fn set_discarded(&self, file: &FileId, code: EventCode, reason: &str) -> TrackerResult<u64> {
        self.finalize(file, AssetState::Discarded, code, reason.to_string(), "Asset discarded")
    }

    /// PENDING → ERROR. Returns the asset size.
    pub fn set_error(&self, file: &FileId, code: EventCode, err: &str) -> TrackerResult<u64> {
        self.finalize(file, AssetState::Error, code, err.to_string(), "Asset error")
    }

    fn finalize(
        &self,
        file: &FileId,
        target: AssetState,
        code: EventCode,
        reason: String,
        message: &str,
    ) -> TrackerResult<u64> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let key = file.identity();

        let record = match state.assets.get_mut(&key) {
            Some(record) => record,
            None => {
                error!(file = %file, code = ?code, target = %target, "Transition on untracked asset");
                return Err(TrackerError::Unknown(key));
            }
        };
        if record.state != AssetState::Pending {
            error!(
                file = %file,
                current_state = %record.state,
                target = %target,
                code = ?code,
                "Asset not in pending state"
            );
            return Err(TrackerError::AlreadyFinal {
                file: key,
                state: record.state,
            });
        }

        let now = Utc::now();
        record.state = target;
        record.code = code;
        record.finalized_at = Some(now);
        if self.debug {
            let attrs = match target {
                AssetState::Discarded => vec![("reason".to_string(), reason.clone())],
                AssetState::Error => vec![("error".to_string(), reason.clone())],
                _ => Vec::new(),
            };
            record.history.push(TrackedEvent {
                code,
                timestamp: now,
                message: message.to_string(),
                attrs,
            });
        }
        record.reason = reason;
        let size = record.size;

        state.pending -= 1;
        match target {
            AssetState::Processed => {
                state.processed += 1;
                state.processed_size += size;
            }
            AssetState::Discarded => {
                state.discarded += 1;
                state.discarded_size += size;
            }
            AssetState::Error => {
                state.errors += 1;
                state.error_size += size;
            }
            AssetState::Pending => {}
        }
        Ok(size)
    }

    /// Attach a free-form note to an asset's history (debug mode only)
    pub fn annotate(&self, file: &FileId, code: EventCode, message: &str, attrs: &[(&str, String)]) {
        if !self.debug {
            return;
        }
        let mut state = self.state.write();
        if let Some(record) = state.assets.get_mut(&file.identity()) {
            record.history.push(TrackedEvent {
                code,
                timestamp: Utc::now(),
                message: message.to_string(),
                attrs: attrs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            });
        }
    }

    pub fn get_counters(&self) -> AssetCounters {
        let state = self.state.read();
        AssetCounters {
            pending: state.pending,
            processed: state.processed,
            discarded: state.discarded,
            errors: state.errors,
            asset_size: state.asset_size,
            processed_size: state.processed_size,
            discarded_size: state.discarded_size,
            error_size: state.error_size,
            pending_size: state.asset_size - state.processed_size - state.discarded_size - state.error_size,
        }
    }

    #[cfg(test)]
    pub fn get_asset(&self, file: &FileId) -> Option<AssetRecord> {
        self.state.read().assets.get(&file.identity()).cloned()
    }

    pub fn get_pending(&self) -> Vec<AssetRecord> {
        let state = self.state.read();
        let mut pending: Vec<AssetRecord> = state
            .assets
            .values()
            .filter(|r| r.state == AssetState::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.file.cmp(&b.file));
        pending
    }

    pub fn get_all_assets(&self) -> Vec<AssetRecord> {
        let state = self.state.read();
        let mut all: Vec<AssetRecord> = state.assets.values().cloned().collect();
        all.sort_by(|a, b| a.file.cmp(&b.file));
        all
    }

    pub fn is_complete(&self) -> bool {
        self.state.read().pending == 0
    }

    pub fn validate(&self) -> TrackerResult<()> {
        let pending = self.state.read().pending;
        if pending > 0 {
            return Err(TrackerError::Incomplete(pending as usize));
        }
        Ok(())
    }

    pub fn generate_report(&self) -> String {
        let c = self.get_counters();
        let mut report = String::from("\nAsset Tracking Report:\n=====================\n");
        report.push_str(&format!("Total Assets:    {:>7}  ({})\n", c.total(), format_size(c.asset_size)));
        report.push_str(&format!("  Processed:     {:>7}  ({})\n", c.processed, format_size(c.processed_size)));
        report.push_str(&format!("  Discarded:     {:>7}  ({})\n", c.discarded, format_size(c.discarded_size)));
        report.push_str(&format!("  Errors:        {:>7}  ({})\n", c.errors, format_size(c.error_size)));
        report.push_str(&format!("  Pending:       {:>7}  ({})\n", c.pending, format_size(c.pending_size)));
        if !c.is_complete() {
            report.push_str(&format!("\nWARNING: {} assets did not reach a final state!\n", c.pending));
        }
        report
    }

    /// One CSV row per tracked asset
    pub fn generate_detailed_report(&self) -> String {
        let mut report = String::from("FilePath,Size,State,EventCode,Reason,DiscoveredAt,FinalizedAt\n");
        for record in self.get_all_assets() {
            let finalized = record
                .finalized_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default();
            report.push_str(&format!(
                "{},{},{},{},{},{},{}\n",
                csv_field(&record.file.to_string()),
                record.size,
                record.state,
                csv_field(record.code.label()),
                csv_field(&record.reason),
                record.discovered_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                finalized,
            ));
        }
        report
    }
}

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}
