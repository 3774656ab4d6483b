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


//! Single-file HTTP fetch for pages and covers
//!
//! # Key Features
//! - Body streamed chunk by chunk to disk, never buffered whole in memory
//! - Written to `<name>.part` and renamed into place only once complete, so a page file
//!   at its final path is always a full copy
//! - `Authorization` header supplied per call (the caller owns token refresh)
//! - Relative image URLs resolved against the server base URL

use crate::error::{DownloadError, Result};
use crate::file::paths::partial_path;
use crate::file::FileManager;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;
use url::Url;

/// Write buffer for page bodies
const DOWNLOAD_BUFF_SZ: usize = 64 * 1024;

/// Fetches one remote file to one local path
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Download `url` to `dest`, returning the number of bytes written
    ///
    /// On error nothing is left at `dest`.
    async fn download_to_file(&self, url: &str, auth_header: Option<&str>, dest: &Path) -> Result<u64>;
}

/// reqwest-backed [`PageFetcher`]
pub struct HttpPageFetcher {
    client: Client,
    base_url: Option<Url>,
    files: FileManager,
}

impl HttpPageFetcher {
    /// Create a fetcher; `base_url` resolves relative image URLs
    pub fn new(base_url: Option<&str>, timeout: Duration, files: FileManager) -> Result<Self> {
        let base_url = base_url.map(Url::parse).transpose()?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            files,
        })
    }

    /// Absolute URL for an image reference from the server
    pub fn resolve_url(&self, url: &str) -> Result<Url> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
                Some(base) => Ok(base.join(url)?),
                None => Err(DownloadError::InvalidDownloadUrl(format!(
                    "Relative URL without server base: {}",
                    url
                ))),
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn stream_to(&self, url: Url, auth_header: Option<&str>, partial: &Path) -> Result<u64> {
        let mut request = self.client.get(url.clone());
        if let Some(auth) = auth_header {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = request.send().await.map_err(|e| {
            DownloadError::network_error(format!("Request failed: {}", e), e.is_timeout() || e.is_connect())
        })?;

        if !response.status().is_success() {
            return Err(DownloadError::UnexpectedStatusCode {
                status_code: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let expected = response.content_length();
        let file = File::create(partial).await.map_err(|e| {
            DownloadError::FileIoError(format!("Failed to create {}: {}", partial.display(), e))
        })?;
        let mut writer = BufWriter::with_capacity(DOWNLOAD_BUFF_SZ, file);

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| {
                DownloadError::network_error(format!("Stream error: {}", e), true)
            })?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;

        if let Some(expected) = expected {
            if written != expected {
                return Err(DownloadError::DownloadFailed(format!(
                    "Incomplete body for {}: {}/{} bytes",
                    url, written, expected
                )));
            }
        }
        if written == 0 {
            return Err(DownloadError::DownloadFailed(format!("Empty body for {}", url)));
        }

        Ok(written)
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn download_to_file(&self, url: &str, auth_header: Option<&str>, dest: &Path) -> Result<u64> {
        let url = self.resolve_url(url)?;
        let partial = partial_path(dest);

        match self.stream_to(url, auth_header, &partial).await {
            Ok(written) => {
                self.files.move_into_place(&partial, dest).await?;
                debug!(path = %dest.display(), bytes = written, "Downloaded file");
                Ok(written)
            }
            Err(e) => {
                self.files.remove_file_best_effort(&partial).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fetcher(base: Option<&str>) -> HttpPageFetcher {
        HttpPageFetcher::new(base, Duration::from_secs(5), FileManager::new(PathBuf::from("/tmp"))).unwrap()
    }

    #[test]
    fn test_resolve_relative_url() {
        let fetcher = fetcher(Some("http://nas.local:4567/"));
        let url = fetcher.resolve_url("/api/v1/manga/42/chapter/3/page/0").unwrap();
        assert_eq!(url.as_str(), "http://nas.local:4567/api/v1/manga/42/chapter/3/page/0");
    }

    #[test]
    fn test_absolute_url_ignores_base() {
        let fetcher = fetcher(Some("http://nas.local:4567/"));
        let url = fetcher.resolve_url("https://cdn.example.com/p/1.jpg").unwrap();
        assert_eq!(url.host_str(), Some("cdn.example.com"));
    }

    #[test]
    fn test_relative_url_without_base_fails() {
        let fetcher = fetcher(None);
        assert!(matches!(
            fetcher.resolve_url("/page/0"),
            Err(DownloadError::InvalidDownloadUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing_behind() {
        let temp = tempfile::tempdir().unwrap();
        let fetcher = HttpPageFetcher::new(
            None,
            Duration::from_millis(200),
            FileManager::new(temp.path().to_path_buf()),
        )
        .unwrap();
        let dest = temp.path().join("page_0.jpg");

        // Port 9 (discard) on localhost: connection refused on any sane test box
        let result = fetcher.download_to_file("http://127.0.0.1:9/page.jpg", None, &dest).await;

        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }
}
