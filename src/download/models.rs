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


//! Download records
//!
//! Three levels, each owned by the one above it:
//! - `MangaDownload`: one per manga with at least one chapter in the catalog
//! - `ChapterDownload`: one per queued or downloaded chapter, unique by chapter index
//! - `PageDownload`: one per page the worker attempted
//!
//! Aggregate fields (`downloaded_pages`, `completed_chapters`, `total_bytes`, the manga
//! `state`) are always derived through the `recompute` methods and never incremented by
//! hand.

use crate::error::{DownloadError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// ENUMS
// ============================================================================

/// Lifecycle state of a chapter download
///
/// ```text
/// QUEUED ──worker──▶ DOWNLOADING ──▶ COMPLETED
///   ▲                    │  │
///   │ resume             │  └──pause──▶ PAUSED ──resume──▶ QUEUED
///   │                    └──error/cancel──▶ FAILED ──resume──▶ QUEUED
/// ```
///
/// FAILED covers both transport errors and user cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterState {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
}

impl ChapterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterState::Queued => "queued",
            ChapterState::Downloading => "downloading",
            ChapterState::Paused => "paused",
            ChapterState::Completed => "completed",
            ChapterState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(ChapterState::Queued),
            "downloading" => Ok(ChapterState::Downloading),
            "paused" => Ok(ChapterState::Paused),
            "completed" => Ok(ChapterState::Completed),
            "failed" => Ok(ChapterState::Failed),
            _ => Err(DownloadError::InvalidInput(format!("Invalid chapter state: {}", s))),
        }
    }

    /// Waiting for or inside the worker
    pub fn is_active(&self) -> bool {
        matches!(self, ChapterState::Queued | ChapterState::Downloading)
    }

    /// Can go back to QUEUED through resume
    pub fn is_resumable(&self) -> bool {
        matches!(self, ChapterState::Paused | ChapterState::Failed)
    }

    /// Precedence used for the manga-level aggregate state
    fn aggregate_rank(&self) -> u8 {
        match self {
            ChapterState::Downloading => 4,
            ChapterState::Queued => 3,
            ChapterState::Paused => 2,
            ChapterState::Failed => 1,
            ChapterState::Completed => 0,
        }
    }
}

impl std::fmt::Display for ChapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Direction for `move_chapter_in_queue`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Up,
    Down,
}

// ============================================================================
// RECORDS
// ============================================================================

/// A single page on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDownload {
    /// 0-based, matches the remote page order
    pub index: u32,
    pub local_path: PathBuf,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub downloaded: bool,
}

/// One queued or downloaded chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterDownload {
    /// Remote chapter id
    pub chapter_id: i64,
    /// Local ordinal, join key with the reader
    pub chapter_index: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub chapter_number: f32,
    pub local_path: PathBuf,
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub downloaded_pages: u32,
    pub state: ChapterState,
    #[serde(default)]
    pub pages: Vec<PageDownload>,
    #[serde(default)]
    pub last_page_read: u32,
    #[serde(default)]
    pub last_read_time: Option<DateTime<Utc>>,
    /// Message of the last failure, cleared on resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChapterDownload {
    /// Fresh QUEUED chapter
    pub fn new(chapter_id: i64, chapter_index: i32, name: String, local_path: PathBuf) -> Self {
        Self {
            chapter_id,
            chapter_index,
            name,
            chapter_number: 0.0,
            local_path,
            page_count: 0,
            downloaded_pages: 0,
            state: ChapterState::Queued,
            pages: Vec::new(),
            last_page_read: 0,
            last_read_time: None,
            error: None,
        }
    }

    /// COMPLETED ⇔ every page present and there is at least one
    pub fn is_complete(&self) -> bool {
        self.page_count > 0 && self.downloaded_pages == self.page_count
    }

    /// Download percentage (0.0 - 100.0)
    pub fn progress_percentage(&self) -> f64 {
        if self.page_count == 0 {
            return 0.0;
        }
        (self.downloaded_pages as f64 / self.page_count as f64) * 100.0
    }

    /// Bytes of all downloaded pages
    pub fn downloaded_bytes(&self) -> u64 {
        self.pages
            .iter()
            .filter(|p| p.downloaded)
            .map(|p| p.size)
            .sum()
    }

    /// Record the outcome of one page, replacing any earlier record for the same index
    pub fn record_page(&mut self, page: PageDownload) {
        match self.pages.iter_mut().find(|p| p.index == page.index) {
            Some(existing) => *existing = page,
            None => self.pages.push(page),
        }
        self.recompute_counters();
    }

    /// Forget page records ahead of a fresh pass over the chapter
    pub fn reset_pages(&mut self, page_count: u32) {
        self.page_count = page_count;
        self.pages.clear();
        self.downloaded_pages = 0;
    }

    /// Re-derive `downloaded_pages` from the page list
    pub fn recompute_counters(&mut self) {
        let downloaded = self
            .pages
            .iter()
            .filter(|p| p.downloaded && p.index < self.page_count)
            .count() as u32;
        self.downloaded_pages = downloaded.min(self.page_count);
    }

    /// Locally stored page file, if that page was downloaded
    pub fn page_path(&self, page_index: u32) -> Option<PathBuf> {
        self.pages
            .iter()
            .find(|p| p.index == page_index && p.downloaded)
            .map(|p| p.local_path.clone())
    }
}

/// Everything downloaded for one manga
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MangaDownload {
    pub manga_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    pub local_path: PathBuf,
    #[serde(default)]
    pub local_cover_path: Option<PathBuf>,
    #[serde(default)]
    pub cover_url: Option<String>,
    /// Aggregate of the chapter states
    #[serde(default = "default_manga_state")]
    pub state: ChapterState,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub total_chapters: u32,
    #[serde(default)]
    pub completed_chapters: u32,
    #[serde(default)]
    pub last_chapter_read: i32,
    #[serde(default)]
    pub last_page_read: u32,
    #[serde(default)]
    pub last_read_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chapters: Vec<ChapterDownload>,
}

fn default_manga_state() -> ChapterState {
    ChapterState::Queued
}

impl MangaDownload {
    pub fn new(manga_id: i64, title: String, local_path: PathBuf) -> Self {
        Self {
            manga_id,
            title,
            author: String::new(),
            local_path,
            local_cover_path: None,
            cover_url: None,
            state: ChapterState::Queued,
            total_bytes: 0,
            total_chapters: 0,
            completed_chapters: 0,
            last_chapter_read: 0,
            last_page_read: 0,
            last_read_time: None,
            chapters: Vec::new(),
        }
    }

    pub fn chapter(&self, chapter_index: i32) -> Option<&ChapterDownload> {
        self.chapters.iter().find(|c| c.chapter_index == chapter_index)
    }

    pub fn chapter_mut(&mut self, chapter_index: i32) -> Option<&mut ChapterDownload> {
        self.chapters
            .iter_mut()
            .find(|c| c.chapter_index == chapter_index)
    }

    /// Re-derive chapter totals, byte total and aggregate state
    pub fn recompute(&mut self) {
        self.total_chapters = self.chapters.len() as u32;
        self.completed_chapters = self
            .chapters
            .iter()
            .filter(|c| c.state == ChapterState::Completed)
            .count() as u32;
        self.total_bytes = self.chapters.iter().map(|c| c.downloaded_bytes()).sum();
        self.state = self
            .chapters
            .iter()
            .map(|c| c.state)
            .max_by_key(|s| s.aggregate_rank())
            .unwrap_or(ChapterState::Queued);
    }
}

/// A chapter that changed state, as reported by catalog mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub manga_id: i64,
    pub chapter_index: i32,
    pub state: ChapterState,
}

/// Flattened row for the download queue screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedChapter {
    pub manga_id: i64,
    pub manga_title: String,
    pub chapter_id: i64,
    pub chapter_index: i32,
    pub chapter_name: String,
    pub state: ChapterState,
    pub downloaded_pages: u32,
    pub page_count: u32,
}

impl QueuedChapter {
    /// Display string for the queue list
    pub fn display_string(&self) -> String {
        match self.state {
            ChapterState::Downloading => format!(
                "{} - {}: {}/{}",
                self.manga_title, self.chapter_name, self.downloaded_pages, self.page_count
            ),
            state => format!("{} - {}: {}", self.manga_title, self.chapter_name, state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(index: u32, downloaded: bool, size: u64) -> PageDownload {
        PageDownload {
            index,
            local_path: PathBuf::from(format!("/d/page_{}.jpg", index)),
            size,
            downloaded,
        }
    }

    #[test]
    fn test_state_round_trip_through_str() {
        for state in [
            ChapterState::Queued,
            ChapterState::Downloading,
            ChapterState::Paused,
            ChapterState::Completed,
            ChapterState::Failed,
        ] {
            assert_eq!(ChapterState::from_str(state.as_str()).unwrap(), state);
        }
        assert!(ChapterState::from_str("cancelled").is_err());
    }

    #[test]
    fn test_record_page_replaces_and_counts() {
        let mut chapter = ChapterDownload::new(103, 3, "Ch. 3".into(), "/d".into());
        chapter.reset_pages(3);
        chapter.record_page(page(0, true, 10));
        chapter.record_page(page(1, false, 0));
        assert_eq!(chapter.downloaded_pages, 1);

        chapter.record_page(page(1, true, 20));
        chapter.record_page(page(2, true, 30));
        assert_eq!(chapter.downloaded_pages, 3);
        assert_eq!(chapter.pages.len(), 3);
        assert!(chapter.is_complete());
        assert_eq!(chapter.downloaded_bytes(), 60);
    }

    #[test]
    fn test_counters_never_exceed_page_count() {
        let mut chapter = ChapterDownload::new(1, 0, String::new(), "/d".into());
        chapter.page_count = 1;
        chapter.pages = vec![page(0, true, 1), page(5, true, 1)];
        chapter.recompute_counters();
        assert_eq!(chapter.downloaded_pages, 1);
    }

    #[test]
    fn test_empty_chapter_is_not_complete() {
        let chapter = ChapterDownload::new(1, 0, String::new(), "/d".into());
        assert!(!chapter.is_complete());
        assert_eq!(chapter.progress_percentage(), 0.0);
    }

    #[test]
    fn test_manga_aggregate_state() {
        let mut manga = MangaDownload::new(42, "Alpha".into(), "/d/manga_42".into());
        let mut done = ChapterDownload::new(101, 1, String::new(), "/d/1".into());
        done.state = ChapterState::Completed;
        let mut failed = ChapterDownload::new(102, 2, String::new(), "/d/2".into());
        failed.state = ChapterState::Failed;
        manga.chapters = vec![done, failed];
        manga.recompute();
        assert_eq!(manga.state, ChapterState::Failed);
        assert_eq!(manga.completed_chapters, 1);
        assert_eq!(manga.total_chapters, 2);

        manga.chapters[1].state = ChapterState::Downloading;
        manga.recompute();
        assert_eq!(manga.state, ChapterState::Downloading);
    }
}
