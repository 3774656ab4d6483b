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


//! Debounced catalog writer
//!
//! A background task that owns the [`StateFile`] and coalesces save requests:
//! - [`SaveHandle::request`] marks the catalog dirty; the first request after a write
//!   arms a deadline one debounce window away, later requests ride along with it
//! - [`SaveHandle::flush`] writes immediately and reports the result
//! - when the last handle is dropped the task writes any pending state and exits
//!
//! The task only holds the catalog source, never the manager, so dropping the manager
//! ends it.

use crate::download::catalog::Catalog;
use crate::error::{DownloadError, Result};
use crate::storage::state_file::StateFile;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error};

/// Something that can hand out a consistent copy of the catalog
#[async_trait]
pub trait CatalogSource: Send + Sync + 'static {
    async fn snapshot(&self) -> Catalog;
}

#[async_trait]
impl CatalogSource for tokio::sync::Mutex<Catalog> {
    async fn snapshot(&self) -> Catalog {
        self.lock().await.clone()
    }
}

enum SaveRequest {
    Request,
    Flush(oneshot::Sender<Result<()>>),
}

/// Handle to the save task
#[derive(Clone)]
pub struct SaveHandle {
    tx: mpsc::UnboundedSender<SaveRequest>,
    writes: Arc<AtomicU64>,
}

impl SaveHandle {
    /// Spawn the save task on the current runtime
    pub fn spawn(store: StateFile, source: Arc<dyn CatalogSource>, window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let writes = Arc::new(AtomicU64::new(0));

        tokio::spawn(save_loop(rx, store, source, window, Arc::clone(&writes)));

        Self { tx, writes }
    }

    /// Ask for a save within the debounce window
    pub fn request(&self) {
        if self.tx.send(SaveRequest::Request).is_err() {
            debug!("Save task gone, dropping save request");
        }
    }

    /// Write now and wait for the result
    pub async fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SaveRequest::Flush(reply_tx))
            .map_err(|_| DownloadError::internal("Save task is not running"))?;
        reply_rx
            .await
            .map_err(|_| DownloadError::internal("Save task exited before replying"))?
    }

    /// Number of successful writes so far
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

async fn save_loop(
    mut rx: mpsc::UnboundedReceiver<SaveRequest>,
    store: StateFile,
    source: Arc<dyn CatalogSource>,
    window: Duration,
    writes: Arc<AtomicU64>,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let message = match deadline {
            Some(at) => match timeout_at(at, rx.recv()).await {
                Ok(message) => message,
                Err(_) => {
                    write(&store, source.as_ref(), &writes).await.ok();
                    deadline = None;
                    continue;
                }
            },
            None => rx.recv().await,
        };

        match message {
            Some(SaveRequest::Request) => {
                if deadline.is_none() {
                    deadline = Some(Instant::now() + window);
                }
            }
            Some(SaveRequest::Flush(reply)) => {
                let result = write(&store, source.as_ref(), &writes).await;
                deadline = None;
                // Caller may have stopped waiting
                let _ = reply.send(result);
            }
            None => {
                if deadline.is_some() {
                    write(&store, source.as_ref(), &writes).await.ok();
                }
                break;
            }
        }
    }

    debug!("Save task exited");
}

async fn write(store: &StateFile, source: &dyn CatalogSource, writes: &AtomicU64) -> Result<()> {
    let catalog = source.snapshot().await;
    match store.save(&catalog).await {
        Ok(_) => {
            writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        Err(e) => {
            error!(path = %store.path().display(), error = %e, "Failed to save download state");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::ChapterDownload;
    use crate::file::FileManager;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    fn setup(temp: &TempDir) -> (StateFile, Arc<Mutex<Catalog>>) {
        let store = StateFile::new(
            temp.path().join("downloads.json"),
            1024 * 1024,
            FileManager::new(temp.path().to_path_buf()),
        );
        (store, Arc::new(Mutex::new(Catalog::new())))
    }

    async fn queue(catalog: &Mutex<Catalog>, index: i32) {
        catalog.lock().await.queue_chapter(
            42,
            "Alpha",
            "/d/manga_42".into(),
            ChapterDownload::new(100 + index as i64, index, format!("Chapter {}", index), "/d/c".into()),
        );
    }

    #[tokio::test]
    async fn test_requests_inside_window_coalesce() {
        let temp = TempDir::new().unwrap();
        let (store, catalog) = setup(&temp);
        let handle = SaveHandle::spawn(store.clone(), catalog.clone(), Duration::from_millis(150));

        for index in 0..5 {
            queue(&catalog, index).await;
            handle.request();
        }
        assert_eq!(handle.writes(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(handle.writes(), 1);
        assert_eq!(store.load().await.manga(42).unwrap().chapters.len(), 5);
    }

    #[tokio::test]
    async fn test_flush_writes_immediately() {
        let temp = TempDir::new().unwrap();
        let (store, catalog) = setup(&temp);
        let handle = SaveHandle::spawn(store.clone(), catalog.clone(), Duration::from_secs(60));

        queue(&catalog, 3).await;
        handle.request();
        handle.flush().await.unwrap();

        assert_eq!(handle.writes(), 1);
        assert!(store.load().await.chapter(42, 3).is_some());
    }

    #[tokio::test]
    async fn test_dropping_handle_writes_pending_state() {
        let temp = TempDir::new().unwrap();
        let (store, catalog) = setup(&temp);
        let handle = SaveHandle::spawn(store.clone(), catalog.clone(), Duration::from_secs(60));

        queue(&catalog, 3).await;
        handle.request();
        drop(handle);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.load().await.chapter(42, 3).is_some());
    }
}
