// Library module - media scanning, caching and delivery
mod cache;
mod error;
mod handlers;
pub mod index;
mod persist;
pub mod probe;
pub mod scan;
pub mod serve;
pub mod sidecar;
pub mod source;
pub mod tags;
mod types;

pub use error::LibraryError;
pub use handlers::{
    image_file_handler, images_handler, music_file_handler, music_handler, refresh_handler,
    tags_handler, video_file_handler, videos_handler,
};
pub use types::*;

use cache::{ResponseCache, load_snapshot, remove_snapshot, save_snapshot, snapshot_path};
use chrono::Utc;
use probe::{FfprobeProbe, NullProbe, Probe};
use scan::{ScanOrchestrator, scan_music};
use source::{DatabaseSource, FolderSource, MediaSource};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::info;

pub type SharedLibrary = Arc<Library>;

/// Owns every cache tier for one media library.
pub struct Library {
    scanner: ScanOrchestrator,
    cache: ResponseCache,
    music_directory: PathBuf,
}

impl Library {
    pub fn new(
        source: Arc<dyn MediaSource>,
        probe: Arc<dyn Probe>,
        music_directory: PathBuf,
        ttl: Duration,
    ) -> Self {
        Self {
            scanner: ScanOrchestrator::new(source, probe),
            cache: ResponseCache::new(ttl),
            music_directory,
        }
    }

    /// Builds a library from configuration, loading the database when one is set.
    pub fn from_config(config: &crate::LibraryConfig) -> Result<Self, LibraryError> {
        let source: Arc<dyn MediaSource> = match &config.database_file {
            Some(database) => {
                info!("Database mode: {:?}", database);
                Arc::new(DatabaseSource::load(database)?)
            }
            None => Arc::new(FolderSource::new(
                &config.videos_directory,
                &config.images_directory,
            )),
        };

        let probe: Arc<dyn Probe> = if config.probe.enabled {
            Arc::new(FfprobeProbe::from_config(&config.probe))
        } else {
            info!("Media probing disabled");
            Arc::new(NullProbe)
        };

        Ok(Self::new(
            source,
            probe,
            config.music_directory.clone(),
            Duration::from_secs(config.cache_ttl_seconds),
        ))
    }

    fn snapshot_path(&self, kind: MediaKind) -> PathBuf {
        snapshot_path(&self.scanner.source().snapshot_dir(kind), kind)
    }

    /// Listing for one kind: persisted snapshot, then TTL slot, then a fresh scan.
    ///
    /// `force_refresh` skips both caches and always rewrites the snapshot.
    pub async fn list(
        &self,
        kind: MediaKind,
        force_refresh: bool,
    ) -> Result<Arc<ScanResult>, LibraryError> {
        let snapshot = self.snapshot_path(kind);

        if !force_refresh {
            let path = snapshot.clone();
            if let Some(stored) =
                tokio::task::spawn_blocking(move || load_snapshot(&path, kind)).await?
            {
                let stored = Arc::new(stored);
                self.cache.store_listing(kind, Arc::clone(&stored)).await;
                return Ok(stored);
            }

            if let Some(cached) = self.cache.listing(kind).await {
                return Ok(cached);
            }
        }

        let (result, present) = self.scanner.scan(kind).await?;
        let result = Arc::new(result);

        // A folder that does not exist yet is neither persisted nor cached.
        if present {
            let to_save = Arc::clone(&result);
            tokio::task::spawn_blocking(move || save_snapshot(&snapshot, &to_save)).await?;
            self.cache.store_listing(kind, Arc::clone(&result)).await;
        }

        Ok(result)
    }

    pub async fn music(&self) -> Result<Arc<MusicListing>, LibraryError> {
        if let Some(cached) = self.cache.music().await {
            return Ok(cached);
        }

        let folder = self.music_directory.clone();
        let listing = Arc::new(tokio::task::spawn_blocking(move || scan_music(&folder)).await?);
        self.cache.store_music(Arc::clone(&listing)).await;
        Ok(listing)
    }

    pub async fn tags(&self) -> Result<Arc<TagSummary>, LibraryError> {
        if let Some(cached) = self.cache.tags().await {
            return Ok(cached);
        }

        let videos = self.list(MediaKind::Video, false).await?;
        let images = self.list(MediaKind::Image, false).await?;
        let summary = Arc::new(TagSummary {
            generated: Utc::now(),
            videos: tags::count_tags(videos.items()),
            images: tags::count_tags(images.items()),
        });
        self.cache.store_tags(Arc::clone(&summary)).await;
        Ok(summary)
    }

    /// Drops every cache tier and rescans everything.
    pub async fn refresh(&self) -> Result<RefreshSummary, LibraryError> {
        info!("Refreshing media library");
        self.cache.clear().await;

        let snapshots = [
            self.snapshot_path(MediaKind::Video),
            self.snapshot_path(MediaKind::Image),
        ];
        tokio::task::spawn_blocking(move || snapshots.iter().for_each(|p| remove_snapshot(p)))
            .await?;

        let videos = self.list(MediaKind::Video, true).await?;
        let images = self.list(MediaKind::Image, true).await?;
        let music = self.music().await?;

        Ok(RefreshSummary {
            status: "refreshed".to_string(),
            videos: videos.total_count(),
            images: images.total_count(),
            music: music.tracks.len(),
            timestamp: Utc::now(),
        })
    }

    /// Path to stream for a listed video or image.
    pub fn media_path(&self, kind: MediaKind, filename: &str) -> Result<PathBuf, LibraryError> {
        if !is_plain_filename(filename) {
            return Err(LibraryError::InvalidPath);
        }
        self.scanner
            .source()
            .resolve(kind, filename)
            .ok_or(LibraryError::NotFound)
    }

    pub fn music_path(&self, filename: &str) -> Result<PathBuf, LibraryError> {
        if !is_plain_filename(filename) {
            return Err(LibraryError::InvalidPath);
        }
        Ok(self.music_directory.join(filename))
    }
}

/// A single path component: no separators and no parent references.
pub fn is_plain_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.contains(['/', '\\'])
        && !filename.contains("..")
        && Path::new(filename).file_name().is_some()
}
