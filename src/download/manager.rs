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


//! Download manager for offline chapters
//!
//! [`DownloadManager`] is the command and query surface the UI talks to. It is a cheap
//! `Clone` handle over shared state, constructed once by the app and handed to whoever
//! needs it.
//!
//! # Download Queue Management
//! - FIFO over the catalog: manga in insertion order, chapters in per-manga order
//! - One chapter downloading at a time, system-wide
//! - Pause/cancel take effect between pages
//! - Every state change is persisted through the debounced writer; terminal chapter
//!   states are flushed immediately
//!
//! # Locking
//! All catalog access goes through one `tokio::sync::Mutex`. Commands only hold it for
//! in-memory work; network and disk I/O happen with the lock released. The worker's
//! "running" bit lives under the same lock, and the "downloading enabled" flag is only
//! flipped while holding it, so `start_downloads` and a worker that is just exiting
//! can't both decide the other one is responsible.
//!
//! # Usage Example
//! ```no_run
//! use manga_core::config::DownloadConfig;
//! use manga_core::download::{DownloadManager, HttpPageFetcher};
//! use manga_core::file::FileManager;
//! use manga_core::api::LibraryApi;
//! use std::sync::Arc;
//!
//! # async fn example(api: Arc<dyn LibraryApi>) -> manga_core::Result<()> {
//! let config = DownloadConfig::with_root("/sd/manga");
//! let fetcher = HttpPageFetcher::new(
//!     config.server_url.as_deref(),
//!     config.request_timeout(),
//!     FileManager::new(config.downloads_root.clone()),
//! )?;
//! let manager = DownloadManager::new(config, api, Arc::new(fetcher))?;
//! manager.initialize().await?;
//!
//! manager.set_chapter_completion_callback(|manga_id, chapter_index, success| {
//!     println!("{}/{} done: {}", manga_id, chapter_index, success);
//! }).await;
//! manager.queue_chapter_download(42, 103, 3, "Alpha", "Chapter 3").await?;
//! manager.start_downloads().await;
//! # Ok(())
//! # }
//! ```

use crate::api::LibraryApi;
use crate::config::DownloadConfig;
use crate::download::catalog::{Catalog, QueueOutcome};
use crate::download::models::{
    ChapterDownload, ChapterState, MangaDownload, MoveDirection, QueuedChapter, StateChange,
};
use crate::download::progress::{DownloadEvent, Notifier};
use crate::download::stream::PageFetcher;
use crate::download::worker;
use crate::error::{DownloadError, Result};
use crate::file::{DownloadPaths, FileManager};
use crate::storage::{CatalogSource, SaveHandle, StateFile};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Catalog plus the worker bookkeeping that must change atomically with it
#[derive(Debug, Default)]
pub(crate) struct CatalogState {
    pub(crate) catalog: Catalog,
    pub(crate) worker_running: bool,
}

#[async_trait]
impl CatalogSource for Mutex<CatalogState> {
    async fn snapshot(&self) -> Catalog {
        self.lock().await.catalog.clone()
    }
}

/// State shared by the manager handles and the worker task
pub(crate) struct Shared {
    pub(crate) config: DownloadConfig,
    pub(crate) paths: DownloadPaths,
    pub(crate) files: FileManager,
    pub(crate) api: Arc<dyn LibraryApi>,
    pub(crate) fetcher: Arc<dyn PageFetcher>,
    pub(crate) state: Arc<Mutex<CatalogState>>,
    /// "Downloading enabled"; only written with `state` locked
    pub(crate) enabled: AtomicBool,
    pub(crate) notifier: Notifier,
    pub(crate) saver: SaveHandle,
    store: StateFile,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// `Authorization` header for page fetches: the API client's, else the configured one
    pub(crate) async fn auth_header(&self) -> Option<String> {
        match self.api.auth_header().await {
            Some(header) => Some(header),
            None => {
                if self.config.auth.needs_refresh() {
                    warn!("Configured access token has expired, page fetches may be rejected");
                }
                self.config.auth.header_value()
            }
        }
    }
}

/// Offline chapter download service
#[derive(Clone)]
pub struct DownloadManager {
    shared: Arc<Shared>,
}

impl DownloadManager {
    /// Create a manager with an empty catalog
    ///
    /// Must be called from within a Tokio runtime (the state writer is spawned here).
    /// Call [`initialize`](Self::initialize) to load persisted downloads.
    pub fn new(
        config: DownloadConfig,
        api: Arc<dyn LibraryApi>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Result<Self> {
        config.validate()?;

        let files = FileManager::new(config.downloads_root.clone());
        let paths = DownloadPaths::new(config.downloads_root.clone());
        let store = StateFile::new(
            config.state_file_path(),
            config.max_state_file_bytes,
            files.clone(),
        );
        let state = Arc::new(Mutex::new(CatalogState::default()));
        let saver = SaveHandle::spawn(store.clone(), state.clone(), config.save_debounce());

        if config.max_concurrent_downloads > 1 {
            info!(
                max_concurrent_downloads = config.max_concurrent_downloads,
                "Concurrent chapter downloads are not supported, downloading one at a time"
            );
        }

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                paths,
                files,
                api,
                fetcher,
                state,
                enabled: AtomicBool::new(false),
                notifier: Notifier::new(),
                saver,
                store,
                worker: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.shared.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load persisted downloads and, if configured, resume them
    ///
    /// Replaces the in-memory catalog, so call it before issuing commands.
    pub async fn initialize(&self) -> Result<()> {
        self.shared
            .files
            .ensure_directory_exists(&self.shared.config.downloads_root)
            .await?;

        let loaded = self.shared.store.load().await;
        {
            let mut state = self.shared.state.lock().await;
            state.catalog = loaded;
            info!(
                manga = state.catalog.downloads().len(),
                chapters = state.catalog.queued_chapters().len(),
                "Download state initialized"
            );
        }

        if self.shared.config.auto_resume_downloads {
            let resumed = self.resume_incomplete_downloads().await;
            if resumed > 0 || self.shared.state.lock().await.catalog.has_queued() {
                self.start_downloads().await;
            }
        }

        Ok(())
    }

    /// Stop the worker after its current page, wait for it and write state to disk
    pub async fn shutdown(&self) -> Result<()> {
        self.pause_downloads().await;
        self.wait_for_idle().await;
        self.shared.saver.flush().await?;
        info!("Download manager shut down");
        Ok(())
    }

    /// Wait until the current worker task (if any) has exited
    pub async fn wait_for_idle(&self) {
        loop {
            let handle = self.shared.worker.lock().await.take();
            let Some(handle) = handle else {
                return;
            };
            if let Err(e) = handle.await {
                warn!(error = %e, "Download worker ended abnormally");
            }
        }
    }

    /// Whether a worker task is currently running
    pub async fn is_downloading(&self) -> bool {
        self.shared.state.lock().await.worker_running
    }

    /// Write the catalog to disk now
    pub async fn flush_state(&self) -> Result<()> {
        self.shared.saver.flush().await
    }

    // ========================================================================
    // Queueing
    // ========================================================================

    /// Queue one chapter; queueing an existing `(manga_id, chapter_index)` is a no-op
    pub async fn queue_chapter_download(
        &self,
        manga_id: i64,
        chapter_id: i64,
        chapter_index: i32,
        manga_title: &str,
        chapter_name: &str,
    ) -> Result<()> {
        if manga_id <= 0 {
            return Err(DownloadError::invalid_input(format!("Invalid manga id {}", manga_id)));
        }
        if chapter_index < 0 {
            return Err(DownloadError::invalid_input(format!(
                "Invalid chapter index {}",
                chapter_index
            )));
        }

        if self.shared.state.lock().await.catalog.chapter(manga_id, chapter_index).is_some() {
            debug!(manga_id, chapter_index, "Chapter already queued");
            return Ok(());
        }

        let manga_dir = self.shared.paths.manga_dir(manga_id);
        self.shared.files.ensure_directory_exists(&manga_dir).await?;

        let chapter = ChapterDownload::new(
            chapter_id,
            chapter_index,
            chapter_name.to_string(),
            self.shared.paths.chapter_dir(manga_id, chapter_index),
        );
        let outcome = self
            .shared
            .state
            .lock()
            .await
            .catalog
            .queue_chapter(manga_id, manga_title, manga_dir, chapter);

        if let QueueOutcome::Added { created_manga } = outcome {
            info!(manga_id, chapter_id, chapter_index, created_manga, "Chapter queued");
            self.shared
                .notifier
                .state_changed(manga_id, chapter_index, ChapterState::Queued);
            self.shared.saver.request();
        }
        Ok(())
    }

    /// Queue several chapters of one manga in order
    ///
    /// Stops at the first failure; chapters queued before it stay queued.
    pub async fn queue_chapters_download(
        &self,
        manga_id: i64,
        chapters: &[(i64, i32)],
        manga_title: &str,
    ) -> Result<()> {
        for &(chapter_id, chapter_index) in chapters {
            let name = format!("Chapter {}", chapter_index);
            self.queue_chapter_download(manga_id, chapter_id, chapter_index, manga_title, &name)
                .await?;
        }
        Ok(())
    }

    /// Record display metadata for a queued manga
    pub async fn set_manga_metadata(
        &self,
        manga_id: i64,
        author: Option<String>,
        cover_url: Option<String>,
    ) -> Result<()> {
        {
            let mut state = self.shared.state.lock().await;
            let manga = state
                .catalog
                .manga_mut(manga_id)
                .ok_or_else(|| DownloadError::not_found(format!("manga {}", manga_id)))?;
            if let Some(author) = author {
                manga.author = author;
            }
            if cover_url.is_some() {
                manga.cover_url = cover_url;
            }
        }
        self.shared.saver.request();
        Ok(())
    }

    // ========================================================================
    // Worker Control
    // ========================================================================

    /// Enable downloading and spawn the worker unless it is already running
    pub async fn start_downloads(&self) {
        let mut state = self.shared.state.lock().await;
        self.shared.enabled.store(true, Ordering::SeqCst);

        if state.worker_running {
            debug!("Download worker already running");
            return;
        }
        state.worker_running = true;

        let handle = tokio::spawn(worker::run(Arc::clone(&self.shared)));
        *self.shared.worker.lock().await = Some(handle);
    }

    /// Stop after the current page; DOWNLOADING chapters become PAUSED
    pub async fn pause_downloads(&self) {
        let changes = {
            let mut state = self.shared.state.lock().await;
            self.shared.enabled.store(false, Ordering::SeqCst);
            state.catalog.pause_active()
        };
        info!(paused = changes.len(), "Downloads paused");
        self.announce(&changes);
    }

    // ========================================================================
    // Cancel & Reorder
    // ========================================================================

    /// QUEUED/DOWNLOADING chapters of a manga become FAILED
    pub async fn cancel_download(&self, manga_id: i64) {
        let changes = self.shared.state.lock().await.catalog.cancel(manga_id, None);
        info!(manga_id, cancelled = changes.len(), "Manga downloads cancelled");
        self.announce(&changes);
    }

    /// One QUEUED/DOWNLOADING chapter becomes FAILED
    pub async fn cancel_chapter_download(&self, manga_id: i64, chapter_index: i32) {
        let changes = self
            .shared
            .state
            .lock()
            .await
            .catalog
            .cancel(manga_id, Some(chapter_index));
        info!(manga_id, chapter_index, cancelled = changes.len(), "Chapter download cancelled");
        self.announce(&changes);
    }

    /// Move a chapter one position within its manga; false at the list boundaries
    pub async fn move_chapter_in_queue(
        &self,
        manga_id: i64,
        chapter_index: i32,
        direction: MoveDirection,
    ) -> bool {
        let moved = self
            .shared
            .state
            .lock()
            .await
            .catalog
            .move_chapter(manga_id, chapter_index, direction);
        if moved {
            self.shared.saver.request();
        }
        moved
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Remove a manga with all its chapters and files
    pub async fn delete_manga_download(&self, manga_id: i64) {
        let removed = self.shared.state.lock().await.catalog.remove_manga(manga_id);
        let Some(manga) = removed else {
            debug!(manga_id, "Nothing to delete");
            return;
        };

        self.shared.files.remove_dir_best_effort(&manga.local_path).await;
        info!(manga_id, chapters = manga.chapters.len(), "Manga download deleted");
        self.shared.saver.request();
    }

    /// Remove one chapter and its files; the manga goes too if it was the last chapter
    pub async fn delete_chapter_download(&self, manga_id: i64, chapter_index: i32) {
        let removed = self
            .shared
            .state
            .lock()
            .await
            .catalog
            .remove_chapter(manga_id, chapter_index);
        let Some(removal) = removed else {
            debug!(manga_id, chapter_index, "Nothing to delete");
            return;
        };

        for page in &removal.chapter.pages {
            self.shared.files.remove_file_best_effort(&page.local_path).await;
        }
        self.shared
            .files
            .remove_dir_best_effort(&removal.chapter.local_path)
            .await;
        if let Some(manga) = &removal.manga {
            self.shared.files.remove_dir_best_effort(&manga.local_path).await;
        }

        info!(
            manga_id,
            chapter_index,
            manga_removed = removal.manga.is_some(),
            "Chapter download deleted"
        );
        self.shared.saver.request();
    }

    // ========================================================================
    // Resume
    // ========================================================================

    /// Re-queue every PAUSED and FAILED chapter; returns how many were re-queued
    pub async fn resume_incomplete_downloads(&self) -> usize {
        let changes = self.shared.state.lock().await.catalog.resume(None);
        if !changes.is_empty() {
            info!(resumed = changes.len(), "Incomplete downloads re-queued");
        }
        self.announce(&changes);
        changes.len()
    }

    /// Re-queue one PAUSED or FAILED chapter
    pub async fn resume_chapter_download(&self, manga_id: i64, chapter_index: i32) -> Result<()> {
        let changes = {
            let mut state = self.shared.state.lock().await;
            let chapter = state.catalog.chapter(manga_id, chapter_index).ok_or_else(|| {
                DownloadError::not_found(format!("chapter {} of manga {}", chapter_index, manga_id))
            })?;
            if !chapter.state.is_resumable() {
                return Err(DownloadError::InvalidState(format!(
                    "Chapter {} of manga {} is {}",
                    chapter_index, manga_id, chapter.state
                )));
            }
            state.catalog.resume(Some((manga_id, chapter_index)))
        };
        self.announce(&changes);
        Ok(())
    }

    // ========================================================================
    // Reading Progress
    // ========================================================================

    /// Move the reading cursor of a downloaded chapter and push it to the server
    pub async fn update_reading_progress(
        &self,
        manga_id: i64,
        chapter_index: i32,
        last_page_read: u32,
    ) -> Result<()> {
        let now = Utc::now();
        let page_count = {
            let mut state = self.shared.state.lock().await;
            let manga = state
                .catalog
                .manga_mut(manga_id)
                .ok_or_else(|| DownloadError::not_found(format!("manga {}", manga_id)))?;
            let chapter = manga.chapter_mut(chapter_index).ok_or_else(|| {
                DownloadError::not_found(format!("chapter {} of manga {}", chapter_index, manga_id))
            })?;
            if chapter.page_count > 0 && last_page_read >= chapter.page_count {
                return Err(DownloadError::invalid_input(format!(
                    "page {} is past the end of chapter {} ({} pages)",
                    last_page_read, chapter_index, chapter.page_count
                )));
            }
            chapter.last_page_read = last_page_read;
            chapter.last_read_time = Some(now);
            let page_count = chapter.page_count;

            manga.last_chapter_read = chapter_index;
            manga.last_page_read = last_page_read;
            manga.last_read_time = Some(now);
            page_count
        };
        self.shared.saver.request();

        let api = Arc::clone(&self.shared.api);
        let finished = page_count > 0 && last_page_read.saturating_add(1) >= page_count;
        tokio::spawn(async move {
            if let Err(e) = api
                .update_chapter_progress(manga_id, chapter_index, last_page_read)
                .await
            {
                warn!(manga_id, chapter_index, error = %e, "Failed to sync reading progress");
            }
            if finished {
                if let Err(e) = api.mark_chapter_read(manga_id, chapter_index).await {
                    warn!(manga_id, chapter_index, error = %e, "Failed to mark chapter read");
                }
            }
        });

        Ok(())
    }

    /// Advance local reading cursors that are behind the server's
    ///
    /// Returns the number of chapters updated.
    pub async fn sync_progress_from_server(&self, manga_id: i64) -> Result<usize> {
        let remote = self.shared.api.fetch_chapters(manga_id).await?;
        let now = Utc::now();

        let (updated, renumbered) = {
            let mut state = self.shared.state.lock().await;
            let Some(manga) = state.catalog.manga_mut(manga_id) else {
                return Ok(0);
            };

            let mut updated = 0;
            let mut renumbered = false;
            let mut furthest: Option<(i32, u32)> = None;
            for server in &remote {
                let Some(chapter) = manga.chapter_mut(server.index) else {
                    continue;
                };
                if chapter.chapter_number != server.chapter_number {
                    chapter.chapter_number = server.chapter_number;
                    renumbered = true;
                }
                if server.last_page_read > chapter.last_page_read {
                    chapter.last_page_read = server.last_page_read;
                    chapter.last_read_time = Some(now);
                    updated += 1;
                    if furthest.map_or(true, |(index, _)| server.index > index) {
                        furthest = Some((server.index, server.last_page_read));
                    }
                }
            }

            if let Some((index, page)) = furthest {
                if index >= manga.last_chapter_read {
                    manga.last_chapter_read = index;
                    manga.last_page_read = page;
                    manga.last_read_time = Some(now);
                }
            }
            (updated, renumbered)
        };

        if updated > 0 {
            debug!(manga_id, updated, "Reading progress pulled from server");
        }
        if updated > 0 || renumbered {
            self.shared.saver.request();
        }
        Ok(updated)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Called with `(downloaded_pages, total_pages)` after every page
    pub async fn set_progress_callback<F>(&self, callback: F)
    where
        F: Fn(u32, u32) + Send + Sync + 'static,
    {
        self.shared
            .notifier
            .set_progress_callback(Some(Arc::new(callback)))
            .await;
    }

    /// Called with `(manga_id, chapter_index, success)` when a chapter finishes
    pub async fn set_chapter_completion_callback<F>(&self, callback: F)
    where
        F: Fn(i64, i32, bool) + Send + Sync + 'static,
    {
        self.shared
            .notifier
            .set_completion_callback(Some(Arc::new(callback)))
            .await;
    }

    /// Drop both callbacks
    pub async fn clear_callbacks(&self) {
        self.shared.notifier.set_progress_callback(None).await;
        self.shared.notifier.set_completion_callback(None).await;
    }

    /// Stream of every download event from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.shared.notifier.subscribe()
    }

    fn announce(&self, changes: &[StateChange]) {
        for change in changes {
            self.shared
                .notifier
                .state_changed(change.manga_id, change.chapter_index, change.state);
        }
        if !changes.is_empty() {
            self.shared.saver.request();
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Copy of every download record
    pub async fn get_downloads(&self) -> Vec<MangaDownload> {
        self.shared.state.lock().await.catalog.downloads().to_vec()
    }

    pub async fn get_manga_download(&self, manga_id: i64) -> Option<MangaDownload> {
        self.shared.state.lock().await.catalog.manga(manga_id).cloned()
    }

    pub async fn get_chapter_download(&self, manga_id: i64, chapter_index: i32) -> Option<ChapterDownload> {
        self.shared
            .state
            .lock()
            .await
            .catalog
            .chapter(manga_id, chapter_index)
            .cloned()
    }

    /// Flattened chapter list for the queue screen
    pub async fn get_queued_chapters(&self) -> Vec<QueuedChapter> {
        self.shared.state.lock().await.catalog.queued_chapters()
    }

    pub async fn is_chapter_downloaded(&self, manga_id: i64, chapter_index: i32) -> bool {
        self.shared
            .state
            .lock()
            .await
            .catalog
            .chapter(manga_id, chapter_index)
            .map_or(false, |c| c.state == ChapterState::Completed)
    }

    /// Local file of one downloaded page
    pub async fn get_page_path(&self, manga_id: i64, chapter_index: i32, page_index: u32) -> Option<PathBuf> {
        self.shared
            .state
            .lock()
            .await
            .catalog
            .chapter(manga_id, chapter_index)?
            .page_path(page_index)
    }

    /// Local files of every downloaded page, in page order
    pub async fn get_chapter_pages(&self, manga_id: i64, chapter_index: i32) -> Vec<PathBuf> {
        let state = self.shared.state.lock().await;
        let Some(chapter) = state.catalog.chapter(manga_id, chapter_index) else {
            return Vec::new();
        };

        let mut pages: Vec<_> = chapter.pages.iter().filter(|p| p.downloaded).collect();
        pages.sort_by_key(|p| p.index);
        pages.into_iter().map(|p| p.local_path.clone()).collect()
    }

    pub async fn get_total_downloaded_chapters(&self) -> usize {
        self.shared.state.lock().await.catalog.total_downloaded_chapters()
    }

    /// Bytes of all downloaded pages
    pub async fn get_total_download_size(&self) -> u64 {
        self.shared.state.lock().await.catalog.total_download_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Chapter, Page};
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingApi {
        progress_pushes: StdMutex<Vec<(i64, i32, u32)>>,
        marked_read: StdMutex<Vec<(i64, i32)>>,
        server_chapters: Vec<Chapter>,
    }

    #[async_trait]
    impl LibraryApi for RecordingApi {
        async fn fetch_chapter_pages(&self, _manga_id: i64, _chapter_id: i64) -> Result<Vec<Page>> {
            Ok(Vec::new())
        }

        async fn fetch_chapters(&self, _manga_id: i64) -> Result<Vec<Chapter>> {
            Ok(self.server_chapters.clone())
        }

        async fn update_chapter_progress(&self, manga_id: i64, chapter_index: i32, page: u32) -> Result<()> {
            self.progress_pushes.lock().unwrap().push((manga_id, chapter_index, page));
            Ok(())
        }

        async fn mark_chapter_read(&self, manga_id: i64, chapter_index: i32) -> Result<()> {
            self.marked_read.lock().unwrap().push((manga_id, chapter_index));
            Ok(())
        }
    }

    struct NoFetch;

    #[async_trait]
    impl PageFetcher for NoFetch {
        async fn download_to_file(&self, url: &str, _auth: Option<&str>, _dest: &Path) -> Result<u64> {
            Err(DownloadError::DownloadFailed(format!("offline: {}", url)))
        }
    }

    fn manager(temp: &TempDir, api: Arc<RecordingApi>) -> DownloadManager {
        let mut config = DownloadConfig::with_root(temp.path());
        config.save_debounce_ms = 10;
        config.page_delay_ms = 0;
        DownloadManager::new(config, api, Arc::new(NoFetch)).unwrap()
    }

    #[tokio::test]
    async fn test_queue_allocates_manga_directory() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp, Arc::new(RecordingApi::default()));

        manager.queue_chapter_download(42, 103, 3, "Alpha", "Chapter 3").await.unwrap();

        assert!(temp.path().join("manga_42").is_dir());
        let chapter = manager.get_chapter_download(42, 3).await.unwrap();
        assert_eq!(chapter.local_path, temp.path().join("manga_42").join("chapter_3"));
    }

    #[tokio::test]
    async fn test_queue_rejects_invalid_ids() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp, Arc::new(RecordingApi::default()));

        assert!(manager.queue_chapter_download(0, 1, 1, "Bad", "c").await.is_err());
        assert!(manager.queue_chapter_download(42, 1, -1, "Bad", "c").await.is_err());
        assert!(manager.get_downloads().await.is_empty());
    }

    #[tokio::test]
    async fn test_queue_many_stops_at_first_failure() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp, Arc::new(RecordingApi::default()));

        let result = manager
            .queue_chapters_download(42, &[(101, 1), (102, -2), (103, 3)], "Alpha")
            .await;

        assert!(result.is_err());
        let manga = manager.get_manga_download(42).await.unwrap();
        assert_eq!(manga.chapters.len(), 1);
        assert_eq!(manga.chapters[0].chapter_index, 1);
    }

    #[tokio::test]
    async fn test_update_reading_progress_pushes_and_marks_read() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(RecordingApi::default());
        let manager = manager(&temp, api.clone());
        manager.queue_chapter_download(42, 103, 3, "Alpha", "Chapter 3").await.unwrap();
        {
            let mut state = manager.shared.state.lock().await;
            state.catalog.chapter_mut(42, 3).unwrap().page_count = 12;
        }

        manager.update_reading_progress(42, 3, 11).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let manga = manager.get_manga_download(42).await.unwrap();
        assert_eq!(manga.last_chapter_read, 3);
        assert_eq!(manga.last_page_read, 11);
        assert!(manga.last_read_time.is_some());
        assert_eq!(manga.chapter(3).unwrap().last_page_read, 11);
        assert_eq!(*api.progress_pushes.lock().unwrap(), vec![(42, 3, 11)]);
        assert_eq!(*api.marked_read.lock().unwrap(), vec![(42, 3)]);
    }

    #[tokio::test]
    async fn test_update_reading_progress_unknown_chapter() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp, Arc::new(RecordingApi::default()));
        assert!(matches!(
            manager.update_reading_progress(42, 3, 1).await,
            Err(DownloadError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_reading_progress_rejects_page_past_end() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(RecordingApi::default());
        let manager = manager(&temp, api.clone());
        manager.queue_chapter_download(42, 103, 3, "Alpha", "Chapter 3").await.unwrap();
        {
            let mut state = manager.shared.state.lock().await;
            state.catalog.chapter_mut(42, 3).unwrap().page_count = 12;
        }

        for page in [12, u32::MAX] {
            assert!(matches!(
                manager.update_reading_progress(42, 3, page).await,
                Err(DownloadError::InvalidInput(_))
            ));
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let manga = manager.get_manga_download(42).await.unwrap();
        assert_eq!(manga.last_page_read, 0);
        assert!(manga.last_read_time.is_none());
        assert_eq!(manga.chapter(3).unwrap().last_page_read, 0);
        assert!(api.progress_pushes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_progress_only_moves_forward() {
        let temp = TempDir::new().unwrap();
        let server_chapter = |index: i32, last_page_read: u32| Chapter {
            id: 100 + index as i64,
            manga_id: 42,
            index,
            name: format!("Chapter {}", index),
            chapter_number: index as f32,
            page_count: 20,
            last_page_read,
            is_read: false,
        };
        let api = Arc::new(RecordingApi {
            server_chapters: vec![server_chapter(1, 0), server_chapter(2, 7)],
            ..Default::default()
        });
        let manager = manager(&temp, api);
        manager
            .queue_chapters_download(42, &[(101, 1), (102, 2)], "Alpha")
            .await
            .unwrap();
        manager.update_reading_progress(42, 1, 5).await.unwrap();

        let updated = manager.sync_progress_from_server(42).await.unwrap();

        assert_eq!(updated, 1);
        let manga = manager.get_manga_download(42).await.unwrap();
        assert_eq!(manga.chapter(1).unwrap().last_page_read, 5);
        assert_eq!(manga.chapter(2).unwrap().last_page_read, 7);
        assert_eq!((manga.last_chapter_read, manga.last_page_read), (2, 7));
        assert_eq!(manga.chapter(1).unwrap().chapter_number, 1.0);
        assert_eq!(manga.chapter(2).unwrap().chapter_number, 2.0);
    }

    #[tokio::test]
    async fn test_resume_chapter_requires_resumable_state() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp, Arc::new(RecordingApi::default()));
        manager.queue_chapter_download(42, 103, 3, "Alpha", "Chapter 3").await.unwrap();

        assert!(matches!(
            manager.resume_chapter_download(42, 3).await,
            Err(DownloadError::InvalidState(_))
        ));

        manager.cancel_chapter_download(42, 3).await;
        manager.resume_chapter_download(42, 3).await.unwrap();
        assert_eq!(
            manager.get_chapter_download(42, 3).await.unwrap().state,
            ChapterState::Queued
        );
    }

    #[tokio::test]
    async fn test_set_manga_metadata() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp, Arc::new(RecordingApi::default()));
        assert!(manager.set_manga_metadata(42, None, None).await.is_err());

        manager.queue_chapter_download(42, 103, 3, "Alpha", "Chapter 3").await.unwrap();
        manager
            .set_manga_metadata(42, Some("Author".into()), Some("/covers/42.jpg".into()))
            .await
            .unwrap();

        let manga = manager.get_manga_download(42).await.unwrap();
        assert_eq!(manga.author, "Author");
        assert_eq!(manga.cover_url.as_deref(), Some("/covers/42.jpg"));
    }
}
