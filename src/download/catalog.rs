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


//! In-memory download catalog
//!
//! The catalog is the source of truth for queue order and chapter state. It is plain
//! data; the manager keeps it behind a single mutex and every mutation below runs with
//! that lock held.
//!
//! # Invariants
//! - no two chapters of one manga share a `chapter_index`
//! - a manga with zero chapters is removed
//! - `0 <= downloaded_pages <= page_count` for every chapter
//! - aggregates are recomputed after every mutation that touches a manga

use crate::download::models::{
    ChapterDownload, ChapterState, MangaDownload, MoveDirection, QueuedChapter, StateChange,
};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

/// Outcome of queueing a chapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// `(manga_id, chapter_index)` was already present; nothing changed
    AlreadyQueued,
    /// Chapter appended; `created_manga` tells whether the manga entry is new
    Added { created_manga: bool },
}

/// Chapter handed to the worker by `select_next_queued`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterTicket {
    pub manga_id: i64,
    pub chapter_id: i64,
    pub chapter_index: i32,
    pub manga_dir: PathBuf,
    pub chapter_dir: PathBuf,
    pub cover_url: Option<String>,
    pub has_cover: bool,
}

/// Removed records, returned so the caller can clean up their files
#[derive(Debug, Clone)]
pub struct Removal {
    pub chapter: ChapterDownload,
    /// Set when the removed chapter was the manga's last one
    pub manga: Option<MangaDownload>,
}

/// All download records, in queue order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    downloads: Vec<MangaDownload>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from untrusted records (a loaded state file)
    ///
    /// Drops invalid ids, duplicate manga, duplicate chapter indices and empty manga,
    /// turns interrupted DOWNLOADING chapters into PAUSED and re-derives every counter.
    pub fn from_records(records: Vec<MangaDownload>) -> Self {
        let mut seen_manga = HashSet::new();
        let mut downloads = Vec::with_capacity(records.len());

        for mut manga in records {
            if manga.manga_id <= 0 {
                warn!(manga_id = manga.manga_id, "Discarding manga with invalid id");
                continue;
            }
            if !seen_manga.insert(manga.manga_id) {
                warn!(manga_id = manga.manga_id, "Discarding duplicate manga entry");
                continue;
            }

            let mut seen_chapters = HashSet::new();
            manga.chapters.retain(|c| seen_chapters.insert(c.chapter_index));

            for chapter in &mut manga.chapters {
                Self::normalize_chapter(chapter);
            }

            if manga.chapters.is_empty() {
                continue;
            }
            manga.recompute();
            downloads.push(manga);
        }

        Self { downloads }
    }

    fn normalize_chapter(chapter: &mut ChapterDownload) {
        chapter.recompute_counters();

        match chapter.state {
            ChapterState::Downloading => chapter.state = ChapterState::Paused,
            ChapterState::Completed if !chapter.is_complete() => {
                chapter.state = ChapterState::Failed;
                chapter.error = Some("Incomplete chapter marked as completed".to_string());
            }
            _ => {}
        }

        if chapter.state != ChapterState::Completed && chapter.is_complete() {
            chapter.state = ChapterState::Completed;
            chapter.error = None;
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn downloads(&self) -> &[MangaDownload] {
        &self.downloads
    }

    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    pub fn manga(&self, manga_id: i64) -> Option<&MangaDownload> {
        self.downloads.iter().find(|m| m.manga_id == manga_id)
    }

    pub fn manga_mut(&mut self, manga_id: i64) -> Option<&mut MangaDownload> {
        self.downloads.iter_mut().find(|m| m.manga_id == manga_id)
    }

    pub fn chapter(&self, manga_id: i64, chapter_index: i32) -> Option<&ChapterDownload> {
        self.manga(manga_id)?.chapter(chapter_index)
    }

    pub fn chapter_mut(&mut self, manga_id: i64, chapter_index: i32) -> Option<&mut ChapterDownload> {
        self.manga_mut(manga_id)?.chapter_mut(chapter_index)
    }

    /// Every chapter in queue order, flattened for display
    pub fn queued_chapters(&self) -> Vec<QueuedChapter> {
        self.downloads
            .iter()
            .flat_map(|manga| {
                manga.chapters.iter().map(move |c| QueuedChapter {
                    manga_id: manga.manga_id,
                    manga_title: manga.title.clone(),
                    chapter_id: c.chapter_id,
                    chapter_index: c.chapter_index,
                    chapter_name: c.name.clone(),
                    state: c.state,
                    downloaded_pages: c.downloaded_pages,
                    page_count: c.page_count,
                })
            })
            .collect()
    }

    pub fn has_queued(&self) -> bool {
        self.downloads
            .iter()
            .flat_map(|m| m.chapters.iter())
            .any(|c| c.state == ChapterState::Queued)
    }

    pub fn total_downloaded_chapters(&self) -> usize {
        self.downloads
            .iter()
            .map(|m| m.completed_chapters as usize)
            .sum()
    }

    pub fn total_download_size(&self) -> u64 {
        self.downloads.iter().map(|m| m.total_bytes).sum()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append a QUEUED chapter, creating the manga entry if needed
    ///
    /// Idempotent: an existing `(manga_id, chapter.chapter_index)` is left untouched.
    pub fn queue_chapter(
        &mut self,
        manga_id: i64,
        manga_title: &str,
        manga_dir: PathBuf,
        chapter: ChapterDownload,
    ) -> QueueOutcome {
        if self.chapter(manga_id, chapter.chapter_index).is_some() {
            return QueueOutcome::AlreadyQueued;
        }

        let created_manga = self.manga(manga_id).is_none();
        if created_manga {
            self.downloads.push(MangaDownload::new(
                manga_id,
                manga_title.to_string(),
                manga_dir,
            ));
        }

        if let Some(manga) = self.manga_mut(manga_id) {
            if manga.title.is_empty() && !manga_title.is_empty() {
                manga.title = manga_title.to_string();
            }
            manga.chapters.push(chapter);
            manga.recompute();
        }

        QueueOutcome::Added { created_manga }
    }

    /// Pick the first QUEUED chapter in catalog order and mark it DOWNLOADING
    pub fn select_next_queued(&mut self) -> Option<ChapterTicket> {
        for manga in &mut self.downloads {
            let Some(chapter) = manga
                .chapters
                .iter_mut()
                .find(|c| c.state == ChapterState::Queued)
            else {
                continue;
            };

            chapter.state = ChapterState::Downloading;
            chapter.error = None;
            let ticket = ChapterTicket {
                manga_id: manga.manga_id,
                chapter_id: chapter.chapter_id,
                chapter_index: chapter.chapter_index,
                manga_dir: manga.local_path.clone(),
                chapter_dir: chapter.local_path.clone(),
                cover_url: manga.cover_url.clone(),
                has_cover: manga.local_cover_path.is_some(),
            };
            manga.recompute();
            return Some(ticket);
        }
        None
    }

    /// Set a chapter's state; returns false if the chapter is gone
    pub fn set_chapter_state(
        &mut self,
        manga_id: i64,
        chapter_index: i32,
        state: ChapterState,
        error: Option<String>,
    ) -> bool {
        let Some(manga) = self.manga_mut(manga_id) else {
            return false;
        };
        let Some(chapter) = manga.chapter_mut(chapter_index) else {
            return false;
        };
        chapter.state = state;
        chapter.error = error;
        manga.recompute();
        true
    }

    /// DOWNLOADING → PAUSED for every chapter
    pub fn pause_active(&mut self) -> Vec<StateChange> {
        self.transition_where(None, None, |s| s == ChapterState::Downloading, ChapterState::Paused)
    }

    /// QUEUED/DOWNLOADING → FAILED, for one chapter or a whole manga
    pub fn cancel(&mut self, manga_id: i64, chapter_index: Option<i32>) -> Vec<StateChange> {
        self.transition_where(
            Some(manga_id),
            chapter_index,
            |s| s.is_active(),
            ChapterState::Failed,
        )
    }

    /// PAUSED/FAILED → QUEUED, for the whole catalog or one chapter
    pub fn resume(&mut self, target: Option<(i64, i32)>) -> Vec<StateChange> {
        let (manga_id, chapter_index) = match target {
            Some((m, c)) => (Some(m), Some(c)),
            None => (None, None),
        };
        self.transition_where(manga_id, chapter_index, |s| s.is_resumable(), ChapterState::Queued)
    }

    fn transition_where(
        &mut self,
        manga_id: Option<i64>,
        chapter_index: Option<i32>,
        from: impl Fn(ChapterState) -> bool,
        to: ChapterState,
    ) -> Vec<StateChange> {
        let mut changes = Vec::new();

        for manga in &mut self.downloads {
            if manga_id.map_or(false, |id| id != manga.manga_id) {
                continue;
            }
            let mut touched = false;
            for chapter in &mut manga.chapters {
                if chapter_index.map_or(false, |idx| idx != chapter.chapter_index) {
                    continue;
                }
                if from(chapter.state) {
                    chapter.state = to;
                    if to == ChapterState::Queued {
                        chapter.error = None;
                    }
                    touched = true;
                    changes.push(StateChange {
                        manga_id: manga.manga_id,
                        chapter_index: chapter.chapter_index,
                        state: to,
                    });
                }
            }
            if touched {
                manga.recompute();
            }
        }

        changes
    }

    /// Swap a chapter with its neighbour; false at list boundaries or if not found
    pub fn move_chapter(&mut self, manga_id: i64, chapter_index: i32, direction: MoveDirection) -> bool {
        let Some(manga) = self.manga_mut(manga_id) else {
            return false;
        };
        let Some(pos) = manga
            .chapters
            .iter()
            .position(|c| c.chapter_index == chapter_index)
        else {
            return false;
        };

        let target = match direction {
            MoveDirection::Up if pos > 0 => pos - 1,
            MoveDirection::Down if pos + 1 < manga.chapters.len() => pos + 1,
            _ => return false,
        };
        manga.chapters.swap(pos, target);
        true
    }

    /// Remove one chapter; the manga goes too when it was the last chapter
    pub fn remove_chapter(&mut self, manga_id: i64, chapter_index: i32) -> Option<Removal> {
        let manga_pos = self.downloads.iter().position(|m| m.manga_id == manga_id)?;
        let manga = &mut self.downloads[manga_pos];
        let chapter_pos = manga
            .chapters
            .iter()
            .position(|c| c.chapter_index == chapter_index)?;

        let chapter = manga.chapters.remove(chapter_pos);
        if manga.chapters.is_empty() {
            let manga = self.downloads.remove(manga_pos);
            return Some(Removal {
                chapter,
                manga: Some(manga),
            });
        }

        manga.recompute();
        Some(Removal {
            chapter,
            manga: None,
        })
    }

    /// Remove a manga with all its chapters
    pub fn remove_manga(&mut self, manga_id: i64) -> Option<MangaDownload> {
        let pos = self.downloads.iter().position(|m| m.manga_id == manga_id)?;
        Some(self.downloads.remove(pos))
    }
}
