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


//! On-disk layout of offline downloads
//!
//! ```text
//! <downloads_root>/manga_<manga_id>/cover.jpg
//! <downloads_root>/manga_<manga_id>/chapter_<chapter_index>/page_<page_index>.jpg
//! ```
//!
//! Paths are a pure function of the ids, so a resumed chapter overwrites its own files
//! instead of creating new ones, and no two chapters ever share a directory.

use std::path::{Path, PathBuf};

/// Extension used while a page body is still streaming in
pub const PARTIAL_EXTENSION: &str = "part";

/// Path builder for the downloads tree
#[derive(Debug, Clone)]
pub struct DownloadPaths {
    root: PathBuf,
}

impl DownloadPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manga_dir(&self, manga_id: i64) -> PathBuf {
        self.root.join(format!("manga_{}", manga_id))
    }

    pub fn cover_path(&self, manga_id: i64) -> PathBuf {
        self.manga_dir(manga_id).join("cover.jpg")
    }

    pub fn chapter_dir(&self, manga_id: i64, chapter_index: i32) -> PathBuf {
        self.manga_dir(manga_id)
            .join(format!("chapter_{}", chapter_index))
    }

    pub fn page_path(&self, manga_id: i64, chapter_index: i32, page_index: u32) -> PathBuf {
        page_file(&self.chapter_dir(manga_id, chapter_index), page_index)
    }
}

/// `page_<index>.jpg` inside a chapter directory
pub fn page_file(chapter_dir: &Path, page_index: u32) -> PathBuf {
    chapter_dir.join(format!("page_{}.jpg", page_index))
}

/// Sibling path a download streams into before it is renamed into place
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_EXTENSION);
    final_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = DownloadPaths::new("/sd/downloads");
        assert_eq!(paths.manga_dir(42), PathBuf::from("/sd/downloads/manga_42"));
        assert_eq!(paths.cover_path(42), PathBuf::from("/sd/downloads/manga_42/cover.jpg"));
        assert_eq!(
            paths.page_path(42, 3, 7),
            PathBuf::from("/sd/downloads/manga_42/chapter_3/page_7.jpg")
        );
    }

    #[test]
    fn test_partial_path() {
        let page = PathBuf::from("/sd/downloads/manga_1/chapter_0/page_0.jpg");
        assert_eq!(
            partial_path(&page),
            PathBuf::from("/sd/downloads/manga_1/chapter_0/page_0.jpg.part")
        );
    }
}
