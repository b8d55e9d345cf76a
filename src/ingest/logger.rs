//! Structured logging
//!
//! This module provides functionality for:
//! 1. Installing the tracing subscriber for a run
//! 2. Writing logs to the terminal and to a daily rotating file
//! 3. JSON or line format, filtered by `RUST_LOG` or the configured level

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan, time::UtcTime},
    prelude::*,
};

use crate::ingest::config_loader::AppConfig;

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging error: {0}")]
    Logging(String),
}

pub type LoggerResult<T> = Result<T, LoggerError>;

pub const LOG_FILE: &str = "photo_ingest.log";

/// Keeps the file writer alive; dropping it flushes pending lines
pub struct LogHandle {
    pub log_dir: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

fn filter(level: &str) -> LoggerResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LoggerError::Logging(e.to_string()))
}

/// Install the global subscriber; the terminal only gets warnings unless `RUST_LOG` says otherwise.
pub fn init_logger(config: &AppConfig) -> LoggerResult<LogHandle> {
    let logging = &config.logging;
    let json = logging.log_format == "json";

    let terminal = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter("warn")?);

    let (file_layer, guard, log_dir) = if logging.log_to_file {
        let log_dir = PathBuf::from(&config.paths.log_directory);
        std::fs::create_dir_all(&log_dir)?;
        let (writer, guard) = file_writer(&log_dir);
        let layer = if json {
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(filter(&logging.log_level)?)
                .boxed()
        } else {
            fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(filter(&logging.log_level)?)
                .boxed()
        };
        (Some(layer), Some(guard), Some(log_dir))
    } else {
        (None, None, None)
    };

    tracing_subscriber::registry()
        .with(terminal)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    info!(
        log_format = %logging.log_format,
        log_level = %logging.log_level,
        log_dir = ?log_dir,
        "Logger initialized"
    );

    Ok(LogHandle {
        log_dir,
        _guard: guard,
    })
}

fn file_writer(log_dir: &Path) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE);
    tracing_appender::non_blocking(appender)
}

/// Path of the API trace file for a run started at `stamp`
pub fn api_trace_path(config: &AppConfig, stamp: &str) -> PathBuf {
    PathBuf::from(&config.paths.log_directory).join(format!("api-trace-{}.log", stamp))
}
