//! Asset ingestion
//!
//! Reads photo and video collections from folders, exports and archives,
//! decides what the server is missing and uploads it.

pub mod analyzer;
pub mod asset;
pub mod ban_list;
pub mod cancel;
pub mod config_loader;
pub mod coordinator;
pub mod events;
pub mod file_processor;
pub mod fsys;
pub mod hasher;
pub mod logger;
pub mod media;
pub mod names;
pub mod pipeline;
pub mod readers;
pub mod server;
pub mod server_errors;
pub mod tracker;
pub mod uploader;
