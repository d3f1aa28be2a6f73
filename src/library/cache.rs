use super::{
    MediaKind, MusicListing, ScanResult, TagSummary,
    persist::{read_json, remove_if_exists, write_json_atomic},
};
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

struct Slot<T> {
    stored_at: Instant,
    value: Arc<T>,
}

type SlotLock<T> = RwLock<Option<Slot<T>>>;

async fn read_slot<T>(slot: &SlotLock<T>, ttl: Duration) -> Option<Arc<T>> {
    slot.read()
        .await
        .as_ref()
        .filter(|entry| entry.stored_at.elapsed() < ttl)
        .map(|entry| Arc::clone(&entry.value))
}

async fn write_slot<T>(slot: &SlotLock<T>, value: Arc<T>) {
    *slot.write().await = Some(Slot {
        stored_at: Instant::now(),
        value,
    });
}

/// In-process TTL slots for every payload plus the on-disk listing snapshots.
pub struct ResponseCache {
    ttl: Duration,
    videos: SlotLock<ScanResult>,
    images: SlotLock<ScanResult>,
    music: SlotLock<MusicListing>,
    tags: SlotLock<TagSummary>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            videos: RwLock::new(None),
            images: RwLock::new(None),
            music: RwLock::new(None),
            tags: RwLock::new(None),
        }
    }

    fn listing_slot(&self, kind: MediaKind) -> &SlotLock<ScanResult> {
        match kind {
            MediaKind::Video => &self.videos,
            MediaKind::Image => &self.images,
        }
    }

    pub async fn listing(&self, kind: MediaKind) -> Option<Arc<ScanResult>> {
        read_slot(self.listing_slot(kind), self.ttl).await
    }

    /// Stores a listing and restarts its TTL.
    pub async fn store_listing(&self, kind: MediaKind, value: Arc<ScanResult>) {
        write_slot(self.listing_slot(kind), value).await;
    }

    pub async fn music(&self) -> Option<Arc<MusicListing>> {
        read_slot(&self.music, self.ttl).await
    }

    pub async fn store_music(&self, value: Arc<MusicListing>) {
        write_slot(&self.music, value).await;
    }

    pub async fn tags(&self) -> Option<Arc<TagSummary>> {
        read_slot(&self.tags, self.ttl).await
    }

    pub async fn store_tags(&self, value: Arc<TagSummary>) {
        write_slot(&self.tags, value).await;
    }

    pub async fn clear(&self) {
        *self.videos.write().await = None;
        *self.images.write().await = None;
        *self.music.write().await = None;
        *self.tags.write().await = None;
        debug!("Cleared in-process response caches");
    }
}

pub fn snapshot_path(dir: &Path, kind: MediaKind) -> PathBuf {
    dir.join(kind.api_cache_file_name())
}

/// Reads a persisted listing; anything unreadable or of the wrong shape is a miss.
pub fn load_snapshot(path: &Path, kind: MediaKind) -> Option<ScanResult> {
    let raw: Value = match read_json(path) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to read {} API cache {:?}: {}", kind.plural(), path, e);
            return None;
        }
    };

    if raw.get(kind.plural()).is_none() {
        warn!("Ignoring {} API cache {:?} without a '{}' key", kind.plural(), path, kind.plural());
        return None;
    }

    match serde_json::from_value::<ScanResult>(raw) {
        Ok(result) if result.kind() == kind => {
            debug!("Serving {} from persistent API cache {:?}", kind.plural(), path);
            Some(result)
        }
        Ok(_) => None,
        Err(e) => {
            warn!("Malformed {} API cache {:?}: {}", kind.plural(), path, e);
            None
        }
    }
}

pub fn save_snapshot(path: &Path, result: &ScanResult) {
    if let Err(e) = write_json_atomic(path, result) {
        warn!("Failed to write {} API cache {:?}: {}", result.kind().plural(), path, e);
    }
}

pub fn remove_snapshot(path: &Path) {
    if remove_if_exists(path) {
        info!("Cleared API cache {:?}", path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn listing(kind: MediaKind) -> ScanResult {
        ScanResult::new(kind, "somewhere".to_string(), Utc::now(), Vec::new())
    }

    #[tokio::test]
    async fn test_slots_expire_after_ttl() {
        let cache = ResponseCache::new(Duration::from_millis(50));
        cache
            .store_listing(MediaKind::Video, Arc::new(listing(MediaKind::Video)))
            .await;
        assert!(cache.listing(MediaKind::Video).await.is_some());
        assert!(cache.listing(MediaKind::Image).await.is_none());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.listing(MediaKind::Video).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        cache
            .store_listing(MediaKind::Image, Arc::new(listing(MediaKind::Image)))
            .await;
        cache
            .store_tags(Arc::new(TagSummary {
                generated: Utc::now(),
                videos: vec![],
                images: vec![],
            }))
            .await;
        cache.clear().await;
        assert!(cache.listing(MediaKind::Image).await.is_none());
        assert!(cache.tags().await.is_none());
    }

    #[test]
    fn test_snapshot_round_trip_and_validation() {
        let temp_dir = TempDir::new().unwrap();
        let videos = snapshot_path(temp_dir.path(), MediaKind::Video);
        assert!(videos.ends_with(".videos_api_cache.json"));
        assert!(load_snapshot(&videos, MediaKind::Video).is_none());

        let saved = listing(MediaKind::Video);
        save_snapshot(&videos, &saved);
        assert_eq!(load_snapshot(&videos, MediaKind::Video), Some(saved));

        // A snapshot of the wrong shape is a miss, not an error.
        std::fs::write(&videos, r#"{"images": []}"#).unwrap();
        assert!(load_snapshot(&videos, MediaKind::Video).is_none());
        std::fs::write(&videos, "{truncated").unwrap();
        assert!(load_snapshot(&videos, MediaKind::Video).is_none());

        remove_snapshot(&videos);
        assert!(!videos.exists());
    }
}
