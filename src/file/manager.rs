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


//! File operations used by the download core
//!
//! # Key Operations
//! - Idempotent directory creation
//! - Best-effort deletion (missing files are not errors)
//! - Rename-into-place with retry
//! - Atomic write (temp file + fsync + rename) for the catalog file

use crate::error::{DownloadError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Maximum retry attempts for file operations
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// File manager rooted at the downloads directory
#[derive(Debug, Clone)]
pub struct FileManager {
    root: PathBuf,
}

impl FileManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure directory exists, creating parent directories as needed
    pub async fn ensure_directory_exists(&self, path: &Path) -> Result<()> {
        if Self::file_exists(path).await {
            return Ok(());
        }

        fs::create_dir_all(path).await.map_err(|e| {
            DownloadError::FileIoError(format!(
                "Failed to create directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Check if file or directory exists
    pub async fn file_exists(path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Remove a file, ignoring "not found" and logging anything else
    ///
    /// Returns whether a file was actually removed.
    pub async fn remove_file_best_effort(&self, path: &Path) -> bool {
        match fs::remove_file(path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove file");
                false
            }
        }
    }

    /// Remove a directory tree, ignoring "not found" and logging anything else
    pub async fn remove_dir_best_effort(&self, path: &Path) -> bool {
        if !path.starts_with(&self.root) || path == self.root {
            warn!(path = %path.display(), "Refusing to remove directory outside downloads root");
            return false;
        }

        match fs::remove_dir_all(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed directory");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove directory");
                false
            }
        }
    }

    /// Rename `source` onto `destination`, replacing it, with retry
    pub async fn move_into_place(&self, source: &Path, destination: &Path) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match fs::rename(source, destination).await {
                Ok(()) => return Ok(()),
                Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                    return Err(DownloadError::FileIoError(format!(
                        "Failed to move file after {} attempts: {} -> {}: {}",
                        MAX_RETRY_ATTEMPTS,
                        source.display(),
                        destination.display(),
                        e
                    )));
                }
                Err(_) => {
                    sleep(RETRY_DELAY).await;
                    continue;
                }
            }
        }
    }

    /// Atomic write: write to temp file, then rename
    pub async fn atomic_write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                self.ensure_directory_exists(parent).await?;
            }
        }

        let temp_path = path.with_file_name(format!(
            ".{}.tmp",
            path.file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("file")
        ));

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            DownloadError::FileIoError(format!(
                "Failed to create temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        file.write_all(contents).await.map_err(|e| {
            DownloadError::FileIoError(format!(
                "Failed to write temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        file.sync_all().await.map_err(|e| {
            DownloadError::FileIoError(format!(
                "Failed to sync temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        drop(file);

        fs::rename(&temp_path, path).await.map_err(|e| {
            DownloadError::FileIoError(format!(
                "Failed to rename temp file {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Total size of all regular files below `path`
    pub async fn directory_size(path: &Path) -> u64 {
        let mut total = 0;
        let mut pending = vec![path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let Ok(mut entries) = fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                match entry.metadata().await {
                    Ok(meta) if meta.is_dir() => pending.push(entry.path()),
                    Ok(meta) => total += meta.len(),
                    Err(_) => {}
                }
            }
        }

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ensure_directory_exists_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let manager = FileManager::new(temp.path().to_path_buf());
        let dir = temp.path().join("manga_1").join("chapter_0");

        manager.ensure_directory_exists(&dir).await.unwrap();
        manager.ensure_directory_exists(&dir).await.unwrap();
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        let manager = FileManager::new(temp.path().to_path_buf());
        assert!(!manager.remove_file_best_effort(&temp.path().join("nope.jpg")).await);
        assert!(!manager.remove_dir_best_effort(&temp.path().join("manga_9")).await);
    }

    #[tokio::test]
    async fn test_remove_dir_outside_root_is_refused() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let manager = FileManager::new(root.path().to_path_buf());

        assert!(!manager.remove_dir_best_effort(other.path()).await);
        assert!(!manager.remove_dir_best_effort(root.path()).await);
        assert!(other.path().exists());
    }

    #[tokio::test]
    async fn test_atomic_write_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let manager = FileManager::new(temp.path().to_path_buf());
        let path = temp.path().join("downloads.json");

        manager.atomic_write(&path, b"first").await.unwrap();
        manager.atomic_write(&path, b"second").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!temp.path().join(".downloads.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_directory_size() {
        let temp = TempDir::new().unwrap();
        let chapter = temp.path().join("manga_1").join("chapter_0");
        std::fs::create_dir_all(&chapter).unwrap();
        std::fs::write(chapter.join("page_0.jpg"), vec![0u8; 10]).unwrap();
        std::fs::write(temp.path().join("manga_1").join("cover.jpg"), vec![0u8; 5]).unwrap();

        assert_eq!(FileManager::directory_size(temp.path()).await, 15);
    }
}
