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


use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use manga_core::api::{Chapter, LibraryApi, Page};
use manga_core::download::HttpPageFetcher;
use manga_core::file::FileManager;
use manga_core::{ChapterState, DownloadConfig, DownloadError, DownloadManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "manga-cli")]
#[command(about = "MangaShelf CLI - inspect and maintain offline downloads", long_about = None)]
struct Cli {
    /// Downloads root (overrides the config file)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List downloaded manga and their chapters
    List {
        /// Only show chapters in this state (queued, downloading, paused, completed, failed)
        #[arg(short, long)]
        state: Option<String>,
    },
    /// Show the flattened download queue
    Queue,
    /// Show totals
    Stats,
    /// Re-queue paused and failed chapters
    Resume,
    /// Delete one downloaded chapter
    DeleteChapter {
        manga_id: i64,
        chapter_index: i32,
    },
    /// Delete a manga with all its chapters
    DeleteManga {
        manga_id: i64,
    },
}

/// The CLI never talks to the server
struct OfflineApi;

#[async_trait]
impl LibraryApi for OfflineApi {
    async fn fetch_chapter_pages(&self, _manga_id: i64, _chapter_id: i64) -> manga_core::Result<Vec<Page>> {
        Err(offline())
    }

    async fn fetch_chapters(&self, _manga_id: i64) -> manga_core::Result<Vec<Chapter>> {
        Err(offline())
    }

    async fn update_chapter_progress(&self, _manga_id: i64, _chapter_index: i32, _page: u32) -> manga_core::Result<()> {
        Err(offline())
    }

    async fn mark_chapter_read(&self, _manga_id: i64, _chapter_index: i32) -> manga_core::Result<()> {
        Err(offline())
    }
}

fn offline() -> DownloadError {
    DownloadError::network_error("manga-cli works offline", false)
}

fn format_size(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    format!("{:.1} MiB", bytes as f64 / MIB)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DownloadConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => DownloadConfig::default(),
    };
    if let Some(root) = cli.root {
        config.downloads_root = root;
    }
    config.auto_resume_downloads = false;

    let fetcher = HttpPageFetcher::new(
        config.server_url.as_deref(),
        config.request_timeout(),
        FileManager::new(config.downloads_root.clone()),
    )?;
    let downloads_root = config.downloads_root.clone();
    let manager = DownloadManager::new(config, Arc::new(OfflineApi), Arc::new(fetcher))?;
    manager
        .initialize()
        .await
        .context("Failed to load download state")?;

    match cli.command {
        Commands::List { state } => {
            let filter = state.as_deref().map(ChapterState::from_str).transpose()?;
            let downloads = manager.get_downloads().await;
            if downloads.is_empty() {
                println!("No downloads");
            }
            for manga in downloads {
                println!(
                    "[{}] {} ({}/{} chapters, {}, {})",
                    manga.manga_id,
                    manga.title,
                    manga.completed_chapters,
                    manga.total_chapters,
                    format_size(manga.total_bytes),
                    manga.state
                );
                for chapter in manga
                    .chapters
                    .iter()
                    .filter(|c| filter.map_or(true, |state| c.state == state))
                {
                    println!(
                        "    #{:<4} {:<30} {:<12} {}/{} pages ({:.0}%)",
                        chapter.chapter_index,
                        chapter.name,
                        chapter.state,
                        chapter.downloaded_pages,
                        chapter.page_count,
                        chapter.progress_percentage()
                    );
                    if let Some(error) = &chapter.error {
                        println!("          error: {}", error);
                    }
                }
            }
        }
        Commands::Queue => {
            for row in manager.get_queued_chapters().await {
                println!("{}", row.display_string());
            }
        }
        Commands::Stats => {
            println!("Downloaded chapters: {}", manager.get_total_downloaded_chapters().await);
            println!("Total size:          {}", format_size(manager.get_total_download_size().await));
            println!("On disk:             {}", format_size(FileManager::directory_size(&downloads_root).await));
        }
        Commands::Resume => {
            let resumed = manager.resume_incomplete_downloads().await;
            println!("Re-queued {} chapter(s)", resumed);
        }
        Commands::DeleteChapter {
            manga_id,
            chapter_index,
        } => {
            manager.delete_chapter_download(manga_id, chapter_index).await;
            println!("Deleted chapter {} of manga {}", chapter_index, manga_id);
        }
        Commands::DeleteManga { manga_id } => {
            manager.delete_manga_download(manga_id).await;
            println!("Deleted manga {}", manga_id);
        }
    }

    manager.flush_state().await.context("Failed to save download state")?;
    Ok(())
}
