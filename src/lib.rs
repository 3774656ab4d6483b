//! Offline chapter download core for the MangaShelf reader
//!
//! Queues chapters for offline reading, downloads them page by page on a single
//! background worker, and keeps the catalog on disk so downloads survive restarts.

pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod file;
pub mod storage;

pub use config::DownloadConfig;
pub use download::{ChapterState, DownloadEvent, DownloadManager};
pub use error::{DownloadError, Result};
