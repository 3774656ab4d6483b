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


//! Download configuration
//!
//! Loaded from a small JSON file next to the rest of the app settings. Every field has a
//! default so a missing or partial file still yields a usable configuration.

use crate::api::AuthConfig;
use crate::error::{DownloadError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cap for the persisted download catalog (16 MiB)
pub const DEFAULT_MAX_STATE_FILE_BYTES: u64 = 16 * 1024 * 1024;

/// Default trailing window for coalescing catalog saves
pub const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 2_000;

/// Default pause between two page fetches
pub const DEFAULT_PAGE_DELAY_MS: u64 = 100;

/// File name of the catalog inside the downloads root
pub const STATE_FILE_NAME: &str = "downloads.json";

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadConfig {
    /// Root directory holding `manga_<id>/` folders
    pub downloads_root: PathBuf,

    /// Catalog file; `<downloads_root>/downloads.json` when unset
    pub state_file: Option<PathBuf>,

    /// State files larger than this are ignored on load and refused on save
    pub max_state_file_bytes: u64,

    /// Trailing debounce window for catalog saves
    pub save_debounce_ms: u64,

    /// Delay between consecutive page fetches, keeps small self-hosted servers happy
    pub page_delay_ms: u64,

    /// Re-queue paused/failed chapters and start the worker on `initialize()`
    pub auto_resume_downloads: bool,

    /// Shown in settings but not enforced: the worker downloads one chapter at a time
    pub max_concurrent_downloads: usize,

    /// Per-request timeout for page and cover fetches
    pub request_timeout_secs: u64,

    /// Base URL used to resolve relative page image URLs
    pub server_url: Option<String>,

    /// Credentials for page fetches when the API client doesn't supply a header
    pub auth: AuthConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            downloads_root: PathBuf::from("downloads"),
            state_file: None,
            max_state_file_bytes: DEFAULT_MAX_STATE_FILE_BYTES,
            save_debounce_ms: DEFAULT_SAVE_DEBOUNCE_MS,
            page_delay_ms: DEFAULT_PAGE_DELAY_MS,
            auto_resume_downloads: true,
            max_concurrent_downloads: 1,
            request_timeout_secs: 60,
            server_url: None,
            auth: AuthConfig::None,
        }
    }
}

impl DownloadConfig {
    /// Configuration rooted at `downloads_root` with every other value defaulted
    pub fn with_root(downloads_root: impl Into<PathBuf>) -> Self {
        Self {
            downloads_root: downloads_root.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file
    ///
    /// A missing file is not an error; defaults are returned instead.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(path).map_err(|e| {
            DownloadError::ConfigurationError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            DownloadError::ConfigurationError(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the download core can't work with
    pub fn validate(&self) -> Result<()> {
        if self.downloads_root.as_os_str().is_empty() {
            return Err(DownloadError::ConfigurationError(
                "downloadsRoot must not be empty".to_string(),
            ));
        }
        if self.max_state_file_bytes == 0 {
            return Err(DownloadError::ConfigurationError(
                "maxStateFileBytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved path of the catalog file
    pub fn state_file_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.downloads_root.join(STATE_FILE_NAME))
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_file_defaults_to_root() {
        let config = DownloadConfig::with_root("/sd/manga");
        assert_eq!(config.state_file_path(), PathBuf::from("/sd/manga/downloads.json"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DownloadConfig =
            serde_json::from_str(r#"{"downloadsRoot": "/sd/manga", "pageDelayMs": 250}"#).unwrap();
        assert_eq!(config.page_delay(), Duration::from_millis(250));
        assert_eq!(config.save_debounce_ms, DEFAULT_SAVE_DEBOUNCE_MS);
        assert!(config.auto_resume_downloads);
        assert_eq!(config.auth, AuthConfig::None);
    }

    #[test]
    fn test_auth_section_parses() {
        let config: DownloadConfig = serde_json::from_str(
            r#"{"auth": {"mode": "basic", "username": "reader", "password": "secret"}}"#,
        )
        .unwrap();
        assert!(config.auth.header_value().unwrap().starts_with("Basic "));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DownloadConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.max_state_file_bytes, DEFAULT_MAX_STATE_FILE_BYTES);
    }

    #[test]
    fn test_validate_rejects_zero_cap() {
        let config = DownloadConfig {
            max_state_file_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
