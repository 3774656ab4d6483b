// MangaShelf - Offline Manga Reader for Handheld Devices
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Offline chapter downloads
//!
//! # Components
//! - [`catalog`]: in-memory records and their invariants
//! - `worker`: the single background task downloading chapters page by page
//! - [`stream`]: HTTP page fetches streamed to disk
//! - [`progress`]: callbacks and the event stream
//! - [`manager`]: the command and query surface tying it together

pub mod catalog;
pub mod manager;
pub mod models;
pub mod progress;
pub mod stream;
mod worker;

// Re-export commonly used types
pub use catalog::Catalog;
pub use manager::DownloadManager;
pub use models::{
    ChapterDownload, ChapterState, MangaDownload, MoveDirection, PageDownload, QueuedChapter,
};
pub use progress::{ChapterProgress, CompletionCallback, DownloadEvent, ProgressCallback};
pub use stream::{HttpPageFetcher, PageFetcher};
