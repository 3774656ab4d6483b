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


//! Remote library server seam
//!
//! The GraphQL transport lives in the app shell. The download core only needs the
//! handful of calls below, so it talks to the server through [`LibraryApi`] and the
//! shell injects its client as an `Arc<dyn LibraryApi>`.

pub mod auth;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use auth::AuthConfig;

/// One page of a chapter as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// 0-based position in the chapter
    pub index: u32,

    /// Absolute URL, or a path relative to the server base URL
    pub image_url: String,
}

/// Chapter metadata as reported by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: i64,
    pub manga_id: i64,
    /// Local ordinal shared with the reader
    pub index: i32,
    pub name: String,
    pub chapter_number: f32,
    pub page_count: u32,
    pub last_page_read: u32,
    pub is_read: bool,
}

/// Calls the download core makes against the remote library server
#[async_trait]
pub trait LibraryApi: Send + Sync {
    /// Ordered page list of a chapter
    async fn fetch_chapter_pages(&self, manga_id: i64, chapter_id: i64) -> Result<Vec<Page>>;

    /// All chapters of a manga (used for progress sync)
    async fn fetch_chapters(&self, manga_id: i64) -> Result<Vec<Chapter>>;

    /// Push the reading cursor of one chapter
    async fn update_chapter_progress(
        &self,
        manga_id: i64,
        chapter_index: i32,
        last_page_read: u32,
    ) -> Result<()>;

    /// Mark a chapter as read
    async fn mark_chapter_read(&self, manga_id: i64, chapter_index: i32) -> Result<()>;

    /// Current `Authorization` header value for page fetches
    ///
    /// Token refresh is the implementor's business; the worker asks once per chapter.
    async fn auth_header(&self) -> Option<String> {
        None
    }
}
