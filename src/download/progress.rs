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


//! Download progress reporting
//!
//! The worker reports through a [`Notifier`], which fans every event out to:
//! - the two UI callbacks (page progress, chapter completion)
//! - a broadcast channel any number of subscribers can listen on
//!
//! Both paths are fed from the worker task in the order events happen, so a chapter's
//! progress events always arrive before its completion event.

use crate::download::models::ChapterState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Callback type for page progress: `(downloaded_pages, total_pages)`
pub type ProgressCallback = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Callback type for chapter completion: `(manga_id, chapter_index, success)`
pub type CompletionCallback = Arc<dyn Fn(i64, i32, bool) + Send + Sync>;

/// Event emitted by the download core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DownloadEvent {
    /// One page finished (successfully or not)
    #[serde(rename_all = "camelCase")]
    Progress {
        manga_id: i64,
        chapter_index: i32,
        downloaded_pages: u32,
        total_pages: u32,
    },

    /// A chapter reached COMPLETED or FAILED inside the worker
    #[serde(rename_all = "camelCase")]
    ChapterCompleted {
        manga_id: i64,
        chapter_index: i32,
        success: bool,
    },

    /// A chapter changed state (worker or command)
    #[serde(rename_all = "camelCase")]
    StateChanged {
        manga_id: i64,
        chapter_index: i32,
        state: ChapterState,
    },
}

/// Progress snapshot for one chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterProgress {
    pub manga_id: i64,
    pub chapter_index: i32,
    pub downloaded_pages: u32,
    pub total_pages: u32,
    /// Percentage complete (0.0 - 100.0)
    pub percent_complete: f64,
}

impl ChapterProgress {
    pub fn new(manga_id: i64, chapter_index: i32, downloaded_pages: u32, total_pages: u32) -> Self {
        let percent_complete = if total_pages > 0 {
            (downloaded_pages as f64 / total_pages as f64) * 100.0
        } else {
            0.0
        };
        Self {
            manga_id,
            chapter_index,
            downloaded_pages,
            total_pages,
            percent_complete,
        }
    }

    /// Format progress as display string (e.g. "4/12 (33%)")
    pub fn display_string(&self) -> String {
        format!(
            "{}/{} ({:.0}%)",
            self.downloaded_pages, self.total_pages, self.percent_complete
        )
    }
}

/// Fan-out point for download events
pub struct Notifier {
    progress_callback: RwLock<Option<ProgressCallback>>,
    completion_callback: RwLock<Option<CompletionCallback>>,
    events: broadcast::Sender<DownloadEvent>,
}

impl Notifier {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            progress_callback: RwLock::new(None),
            completion_callback: RwLock::new(None),
            events,
        }
    }

    pub async fn set_progress_callback(&self, callback: Option<ProgressCallback>) {
        *self.progress_callback.write().await = callback;
    }

    pub async fn set_completion_callback(&self, callback: Option<CompletionCallback>) {
        *self.completion_callback.write().await = callback;
    }

    /// New receiver for every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    pub async fn progress(&self, progress: &ChapterProgress) {
        if let Some(cb) = self.progress_callback.read().await.as_ref() {
            cb(progress.downloaded_pages, progress.total_pages);
        }
        self.emit(DownloadEvent::Progress {
            manga_id: progress.manga_id,
            chapter_index: progress.chapter_index,
            downloaded_pages: progress.downloaded_pages,
            total_pages: progress.total_pages,
        });
    }

    pub async fn chapter_completed(&self, manga_id: i64, chapter_index: i32, success: bool) {
        if let Some(cb) = self.completion_callback.read().await.as_ref() {
            cb(manga_id, chapter_index, success);
        }
        self.emit(DownloadEvent::ChapterCompleted {
            manga_id,
            chapter_index,
            success,
        });
    }

    pub fn state_changed(&self, manga_id: i64, chapter_index: i32, state: ChapterState) {
        self.emit(DownloadEvent::StateChanged {
            manga_id,
            chapter_index,
            state,
        });
    }

    fn emit(&self, event: DownloadEvent) {
        // No subscribers is the normal case on the device
        if self.events.send(event).is_err() {
            trace!("Download event dropped, no subscribers");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_percentage() {
        let progress = ChapterProgress::new(42, 3, 3, 12);
        assert_eq!(progress.percent_complete, 25.0);
        assert_eq!(progress.display_string(), "3/12 (25%)");

        let empty = ChapterProgress::new(42, 3, 0, 0);
        assert_eq!(empty.percent_complete, 0.0);
    }

    #[tokio::test]
    async fn test_callbacks_and_stream_see_same_order() {
        let notifier = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let progress_seen = Arc::clone(&seen);
        notifier
            .set_progress_callback(Some(Arc::new(move |done, total| {
                progress_seen.lock().unwrap().push(format!("p{}/{}", done, total));
            })))
            .await;
        let completion_seen = Arc::clone(&seen);
        notifier
            .set_completion_callback(Some(Arc::new(move |manga, chapter, ok| {
                completion_seen.lock().unwrap().push(format!("c{}:{}:{}", manga, chapter, ok));
            })))
            .await;

        let mut rx = notifier.subscribe();
        notifier.progress(&ChapterProgress::new(42, 3, 1, 2)).await;
        notifier.progress(&ChapterProgress::new(42, 3, 2, 2)).await;
        notifier.chapter_completed(42, 3, true).await;

        assert_eq!(*seen.lock().unwrap(), vec!["p1/2", "p2/2", "c42:3:true"]);
        assert!(matches!(rx.recv().await.unwrap(), DownloadEvent::Progress { downloaded_pages: 1, .. }));
        assert!(matches!(rx.recv().await.unwrap(), DownloadEvent::Progress { downloaded_pages: 2, .. }));
        assert_eq!(
            rx.recv().await.unwrap(),
            DownloadEvent::ChapterCompleted {
                manga_id: 42,
                chapter_index: 3,
                success: true
            }
        );
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = DownloadEvent::StateChanged {
            manga_id: 42,
            chapter_index: 3,
            state: ChapterState::Paused,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stateChanged");
        assert_eq!(json["mangaId"], 42);
        assert_eq!(json["state"], "paused");
    }
}
