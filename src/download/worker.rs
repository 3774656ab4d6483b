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


//! Background download worker
//!
//! Exactly one worker task exists at a time. It repeatedly picks the first QUEUED
//! chapter in catalog order, marks it DOWNLOADING under the catalog lock and downloads
//! it page by page with the lock released, so commands from the UI interleave freely
//! between pages.
//!
//! # Checkpoints
//! Before every page the worker re-reads the "downloading enabled" flag and the
//! chapter record:
//! - flag cleared, or chapter no longer DOWNLOADING: stop, keep downloaded pages
//! - chapter FAILED (user cancelled): stop, completion event with `success = false`
//! - chapter gone (user deleted): stop silently
//!
//! A page fetch already in flight always runs to completion first.
//!
//! # Failure isolation
//! Each chapter runs in its own spawned task. An error, or a panic surfacing as a
//! `JoinError`, turns that chapter FAILED and the loop moves on to the next one.

use crate::download::catalog::ChapterTicket;
use crate::download::manager::Shared;
use crate::download::models::{ChapterState, PageDownload};
use crate::download::progress::ChapterProgress;
use crate::error::{DownloadError, Result};
use crate::file::paths::page_file;
use crate::file::FileManager;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Why the page loop of a chapter ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoopExit {
    /// Every page was attempted
    Finished,
    /// Pause requested, or the chapter was moved out of DOWNLOADING by a command
    Stopped,
    /// Chapter cancelled by the user
    Cancelled,
    /// Chapter deleted while downloading
    Removed,
}

/// Worker main loop, runs until the queue is drained or downloading is disabled
pub(crate) async fn run(shared: Arc<Shared>) {
    info!("Download worker started");

    loop {
        let ticket = {
            let mut state = shared.state.lock().await;
            if !shared.enabled.load(Ordering::SeqCst) {
                state.worker_running = false;
                debug!("Downloading disabled, worker exiting");
                break;
            }
            match state.catalog.select_next_queued() {
                Some(ticket) => ticket,
                None => {
                    shared.enabled.store(false, Ordering::SeqCst);
                    state.worker_running = false;
                    debug!("No queued chapters left, worker exiting");
                    break;
                }
            }
        };

        info!(
            manga_id = ticket.manga_id,
            chapter_index = ticket.chapter_index,
            "Starting chapter download"
        );
        shared
            .notifier
            .state_changed(ticket.manga_id, ticket.chapter_index, ChapterState::Downloading);
        shared.saver.request();

        if !ticket.has_cover {
            fetch_cover(&shared, &ticket).await;
        }

        let task = tokio::spawn(download_chapter(Arc::clone(&shared), ticket.clone()));
        let result = match task.await {
            Ok(result) => result,
            Err(join_error) => Err(DownloadError::from(join_error)),
        };

        finish_chapter(&shared, &ticket, result).await;
    }

    info!("Download worker stopped");
}

/// Download every page of one chapter
async fn download_chapter(shared: Arc<Shared>, ticket: ChapterTicket) -> Result<LoopExit> {
    let mut pages = shared
        .api
        .fetch_chapter_pages(ticket.manga_id, ticket.chapter_id)
        .await?;
    if pages.is_empty() {
        return Err(DownloadError::InvalidApiResponse(format!(
            "chapter {} of manga {} has no pages",
            ticket.chapter_index, ticket.manga_id
        )));
    }
    pages.sort_by_key(|p| p.index);

    if !FileManager::file_exists(&ticket.manga_dir).await {
        return Err(DownloadError::DownloadDirectoryNotFound(
            ticket.manga_dir.display().to_string(),
        ));
    }
    shared.files.ensure_directory_exists(&ticket.chapter_dir).await?;

    let page_count = pages.len() as u32;
    // Some(manga still present) when the chapter was deleted meanwhile
    let deleted = {
        let mut state = shared.state.lock().await;
        match state.catalog.chapter_mut(ticket.manga_id, ticket.chapter_index) {
            Some(chapter) => {
                chapter.reset_pages(page_count);
                if let Some(manga) = state.catalog.manga_mut(ticket.manga_id) {
                    manga.recompute();
                }
                None
            }
            None => Some(state.catalog.manga(ticket.manga_id).is_some()),
        }
    };
    if let Some(manga_present) = deleted {
        // The directory create above may have revived what the delete removed
        shared.files.remove_dir_best_effort(&ticket.chapter_dir).await;
        if !manga_present {
            shared.files.remove_dir_best_effort(&ticket.manga_dir).await;
        }
        return Ok(LoopExit::Removed);
    }

    let auth_header = shared.auth_header().await;
    let page_delay = shared.config.page_delay();

    for (position, page) in pages.iter().enumerate() {
        let index = position as u32;

        if let Some(exit) = checkpoint(&shared, &ticket).await {
            return Ok(exit);
        }

        let dest = page_file(&ticket.chapter_dir, index);
        let record = match shared
            .fetcher
            .download_to_file(&page.image_url, auth_header.as_deref(), &dest)
            .await
        {
            Ok(size) => PageDownload {
                index,
                local_path: dest.clone(),
                size,
                downloaded: true,
            },
            Err(e) => {
                warn!(
                    manga_id = ticket.manga_id,
                    chapter_index = ticket.chapter_index,
                    page = index,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Page download failed"
                );
                PageDownload {
                    index,
                    local_path: dest.clone(),
                    size: 0,
                    downloaded: false,
                }
            }
        };

        let progress = {
            let mut state = shared.state.lock().await;
            match state.catalog.chapter_mut(ticket.manga_id, ticket.chapter_index) {
                Some(chapter) => {
                    chapter.record_page(record);
                    let progress = ChapterProgress::new(
                        ticket.manga_id,
                        ticket.chapter_index,
                        chapter.downloaded_pages,
                        chapter.page_count,
                    );
                    if let Some(manga) = state.catalog.manga_mut(ticket.manga_id) {
                        manga.recompute();
                    }
                    Some(progress)
                }
                None => None,
            }
        };
        let Some(progress) = progress else {
            // Deleted while the page was in flight
            shared.files.remove_file_best_effort(&dest).await;
            return Ok(LoopExit::Removed);
        };

        shared.notifier.progress(&progress).await;
        shared.saver.request();

        if index + 1 < page_count && !page_delay.is_zero() {
            sleep(page_delay).await;
        }
    }

    Ok(LoopExit::Finished)
}

/// Between-page check of the pause flag and the chapter record
async fn checkpoint(shared: &Shared, ticket: &ChapterTicket) -> Option<LoopExit> {
    let state = shared.state.lock().await;
    let enabled = shared.enabled.load(Ordering::SeqCst);

    match state.catalog.chapter(ticket.manga_id, ticket.chapter_index) {
        None => Some(LoopExit::Removed),
        Some(chapter) => match chapter.state {
            ChapterState::Downloading if enabled => None,
            ChapterState::Failed => Some(LoopExit::Cancelled),
            _ => Some(LoopExit::Stopped),
        },
    }
}

/// Settle the chapter's terminal state and emit its events
async fn finish_chapter(shared: &Shared, ticket: &ChapterTicket, result: Result<LoopExit>) {
    let (manga_id, chapter_index) = (ticket.manga_id, ticket.chapter_index);

    // (new state to announce, completion event to fire)
    let (announce, completion) = {
        let mut state = shared.state.lock().await;
        let Some(chapter) = state.catalog.chapter(manga_id, chapter_index) else {
            debug!(manga_id, chapter_index, "Chapter deleted during download");
            return;
        };
        let current = chapter.state;
        let complete = chapter.is_complete();
        let (downloaded, total) = (chapter.downloaded_pages, chapter.page_count);

        match result {
            Err(e) => {
                error!(
                    manga_id,
                    chapter_index,
                    file_error = e.is_file_error(),
                    error = %e,
                    "Chapter download failed"
                );
                state
                    .catalog
                    .set_chapter_state(manga_id, chapter_index, ChapterState::Failed, Some(e.user_message()));
                let announce = (current != ChapterState::Failed).then_some(ChapterState::Failed);
                (announce, Some(false))
            }
            Ok(LoopExit::Removed) => {
                debug!(manga_id, chapter_index, "Chapter deleted during download");
                return;
            }
            Ok(LoopExit::Cancelled) => {
                info!(manga_id, chapter_index, downloaded, total, "Chapter download cancelled");
                (None, Some(false))
            }
            Ok(LoopExit::Stopped) => {
                if current == ChapterState::Downloading {
                    state
                        .catalog
                        .set_chapter_state(manga_id, chapter_index, ChapterState::Paused, None);
                    info!(manga_id, chapter_index, downloaded, total, "Chapter download paused");
                    (Some(ChapterState::Paused), None)
                } else {
                    info!(manga_id, chapter_index, state = %current, downloaded, total, "Chapter download stopped");
                    (None, None)
                }
            }
            Ok(LoopExit::Finished) if current == ChapterState::Failed => {
                info!(manga_id, chapter_index, "Chapter cancelled after its last page");
                (None, Some(false))
            }
            Ok(LoopExit::Finished) if complete => {
                state
                    .catalog
                    .set_chapter_state(manga_id, chapter_index, ChapterState::Completed, None);
                info!(manga_id, chapter_index, pages = total, "Chapter download completed");
                (Some(ChapterState::Completed), Some(true))
            }
            Ok(LoopExit::Finished) => {
                let message = format!("Downloaded {} of {} pages", downloaded, total);
                warn!(manga_id, chapter_index, downloaded, total, "Chapter download incomplete");
                state
                    .catalog
                    .set_chapter_state(manga_id, chapter_index, ChapterState::Failed, Some(message));
                (Some(ChapterState::Failed), Some(false))
            }
        }
    };

    if let Some(new_state) = announce {
        shared.notifier.state_changed(manga_id, chapter_index, new_state);
    }
    if let Some(success) = completion {
        shared.notifier.chapter_completed(manga_id, chapter_index, success).await;
    }

    if let Err(e) = shared.saver.flush().await {
        warn!(manga_id, chapter_index, error = %e, "Failed to persist chapter result");
    }
}

/// Fetch the manga's cover next to its chapters, best-effort
async fn fetch_cover(shared: &Shared, ticket: &ChapterTicket) {
    let Some(url) = ticket.cover_url.as_deref() else {
        return;
    };
    let dest = shared.paths.cover_path(ticket.manga_id);

    if !FileManager::file_exists(&dest).await {
        let auth_header = shared.auth_header().await;
        if let Err(e) = shared
            .fetcher
            .download_to_file(url, auth_header.as_deref(), &dest)
            .await
        {
            warn!(manga_id = ticket.manga_id, error = %e, "Cover download failed");
            return;
        }
    }

    let mut state = shared.state.lock().await;
    if let Some(manga) = state.catalog.manga_mut(ticket.manga_id) {
        manga.local_cover_path = Some(dest);
        shared.saver.request();
    }
}
