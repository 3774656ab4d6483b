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


//! Download state persistence
//!
//! The catalog is kept in a single bounded JSON file under the downloads root.
//! [`StateFile`] does the (de)serialization and atomic replace; [`SaveHandle`] is the
//! debounced writer the manager talks to.
//!
//! # Usage Example
//! ```no_run
//! use manga_core::file::FileManager;
//! use manga_core::storage::StateFile;
//! use std::path::PathBuf;
//!
//! # async fn example() {
//! let root = PathBuf::from("/sd/manga");
//! let store = StateFile::new(root.join("downloads.json"), 16 * 1024 * 1024, FileManager::new(root));
//! let catalog = store.load().await;
//! println!("{} manga downloaded", catalog.downloads().len());
//! # }
//! ```

pub mod state_file;
pub mod writer;

// Re-export commonly used types
pub use state_file::{StateFile, STATE_FORMAT_VERSION};
pub use writer::{CatalogSource, SaveHandle};
