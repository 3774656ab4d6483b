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


//! Catalog state file
//!
//! The whole catalog is stored as one JSON document:
//!
//! ```json
//! { "version": 1, "downloads": [ { "mangaId": 42, "chapters": [ ... ] } ] }
//! ```
//!
//! Loading never fails. A missing, oversized or unparseable file is an empty catalog,
//! and manga entries that don't deserialize are skipped one by one so a single bad
//! record doesn't cost the user every other download.

use crate::download::catalog::Catalog;
use crate::download::models::MangaDownload;
use crate::error::{DownloadError, Result};
use crate::file::FileManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Current layout version written to disk
pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct PersistedState<'a> {
    version: u32,
    downloads: &'a [MangaDownload],
}

#[derive(Deserialize)]
struct RawState {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    downloads: Vec<Value>,
}

/// Bounded JSON file holding the download catalog
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
    max_bytes: u64,
    files: FileManager,
}

impl StateFile {
    pub fn new(path: PathBuf, max_bytes: u64, files: FileManager) -> Self {
        Self {
            path,
            max_bytes,
            files,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the catalog, treating any unusable file as "no saved state"
    pub async fn load(&self) -> Catalog {
        let size = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved download state");
                return Catalog::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "State file unreadable, starting empty");
                return Catalog::new();
            }
        };

        if size > self.max_bytes {
            warn!(
                path = %self.path.display(),
                size,
                limit = self.max_bytes,
                "State file exceeds size cap, starting empty"
            );
            return Catalog::new();
        }

        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "State file unreadable, starting empty");
                return Catalog::new();
            }
        };

        let catalog = Self::decode(&bytes);
        info!(
            path = %self.path.display(),
            manga = catalog.downloads().len(),
            "Loaded download state"
        );
        catalog
    }

    /// Best-effort parse of a state document
    pub fn decode(bytes: &[u8]) -> Catalog {
        let raw: RawState = match serde_json::from_slice(bytes) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "State file is not valid JSON, starting empty");
                return Catalog::new();
            }
        };

        if raw.version > STATE_FORMAT_VERSION {
            warn!(version = raw.version, "State file written by a newer version, loading best-effort");
        }

        let records = raw
            .downloads
            .into_iter()
            .enumerate()
            .filter_map(|(i, value)| match serde_json::from_value::<MangaDownload>(value) {
                Ok(manga) => Some(manga),
                Err(e) => {
                    warn!(entry = i, error = %e, "Skipping unreadable manga entry");
                    None
                }
            })
            .collect();

        Catalog::from_records(records)
    }

    /// Serialize a catalog, refusing documents over the size cap
    pub fn encode(&self, catalog: &Catalog) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(&PersistedState {
            version: STATE_FORMAT_VERSION,
            downloads: catalog.downloads(),
        })?;

        let size = bytes.len() as u64;
        if size > self.max_bytes {
            return Err(DownloadError::StateFileTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(bytes)
    }

    /// Replace the state file atomically; returns the number of bytes written
    pub async fn save(&self, catalog: &Catalog) -> Result<u64> {
        let bytes = self.encode(catalog)?;
        self.files.atomic_write(&self.path, &bytes).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "Saved download state");
        Ok(bytes.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::{ChapterDownload, ChapterState, PageDownload};
    use tempfile::TempDir;

    fn state_file(dir: &TempDir, max_bytes: u64) -> StateFile {
        StateFile::new(
            dir.path().join("downloads.json"),
            max_bytes,
            FileManager::new(dir.path().to_path_buf()),
        )
    }

    fn sample_catalog(root: &Path) -> Catalog {
        let mut catalog = Catalog::new();
        let mut chapter = ChapterDownload::new(103, 3, "Chapter 3".into(), root.join("manga_42/chapter_3"));
        chapter.reset_pages(2);
        chapter.record_page(PageDownload {
            index: 0,
            local_path: root.join("manga_42/chapter_3/page_0.jpg"),
            size: 2048,
            downloaded: true,
        });
        chapter.state = ChapterState::Paused;
        catalog.queue_chapter(42, "Alpha", root.join("manga_42"), chapter);
        catalog
    }

    #[tokio::test]
    async fn test_save_then_load_restores_catalog() {
        let temp = TempDir::new().unwrap();
        let store = state_file(&temp, 1024 * 1024);
        let catalog = sample_catalog(temp.path());

        store.save(&catalog).await.unwrap();
        let loaded = store.load().await;

        assert_eq!(loaded, catalog);
        let chapter = loaded.chapter(42, 3).unwrap();
        assert_eq!(chapter.downloaded_pages, 1);
        assert_eq!(chapter.pages[0].size, 2048);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_catalog() {
        let temp = TempDir::new().unwrap();
        assert!(state_file(&temp, 1024).load().await.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_file_is_ignored() {
        let temp = TempDir::new().unwrap();
        let store = state_file(&temp, 1024 * 1024);
        store.save(&sample_catalog(temp.path())).await.unwrap();

        let tiny = state_file(&temp, 16);
        assert!(tiny.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_save_is_refused_and_old_file_kept() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("downloads.json"), br#"{"version":1,"downloads":[]}"#).unwrap();
        let tiny = state_file(&temp, 32);

        let result = tiny.save(&sample_catalog(temp.path())).await;

        assert!(matches!(result, Err(DownloadError::StateFileTooLarge { .. })));
        let on_disk = std::fs::read_to_string(temp.path().join("downloads.json")).unwrap();
        assert_eq!(on_disk, r#"{"version":1,"downloads":[]}"#);
    }

    #[test]
    fn test_corrupt_json_is_empty_catalog() {
        assert!(StateFile::decode(b"{\"downloads\": [").is_empty());
        assert!(StateFile::decode(b"").is_empty());
    }

    #[test]
    fn test_bad_entries_are_skipped_individually() {
        let json = br#"{
            "version": 1,
            "downloads": [
                { "mangaId": "not-a-number" },
                {
                    "mangaId": -3,
                    "localPath": "/d/manga_-3",
                    "chapters": [
                        { "chapterId": 1, "chapterIndex": 0, "localPath": "/d/c", "state": "queued" }
                    ]
                },
                {
                    "mangaId": 42,
                    "title": "Alpha",
                    "localPath": "/d/manga_42",
                    "completedChapters": 99,
                    "chapters": [
                        {
                            "chapterId": 103,
                            "chapterIndex": 3,
                            "localPath": "/d/manga_42/chapter_3",
                            "state": "downloading",
                            "pageCount": 12
                        }
                    ]
                }
            ]
        }"#;

        let catalog = StateFile::decode(json);

        assert_eq!(catalog.downloads().len(), 1);
        let manga = catalog.manga(42).unwrap();
        assert_eq!(manga.completed_chapters, 0);
        assert_eq!(manga.chapter(3).unwrap().state, ChapterState::Paused);
    }
}
