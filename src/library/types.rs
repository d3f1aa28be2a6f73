use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "webm", "avi", "mov", "mkv", "flv", "wmv", "m4v", "3gp",
];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma"];

/// The two media kinds that carry a metadata index and a response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            MediaKind::Video => VIDEO_EXTENSIONS,
            MediaKind::Image => IMAGE_EXTENSIONS,
        }
    }

    pub fn matches_path(self, path: &Path) -> bool {
        has_extension(path, self.extensions())
    }

    /// Infers the kind from a file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        if MediaKind::Video.matches_path(path) {
            Some(MediaKind::Video)
        } else if MediaKind::Image.matches_path(path) {
            Some(MediaKind::Image)
        } else {
            None
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "video" => Some(MediaKind::Video),
            "image" => Some(MediaKind::Image),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }

    /// Top-level payload key, also used to validate persisted snapshots.
    pub fn plural(self) -> &'static str {
        match self {
            MediaKind::Video => "videos",
            MediaKind::Image => "images",
        }
    }

    pub fn folder_label(self) -> &'static str {
        match self {
            MediaKind::Video => "/videos/",
            MediaKind::Image => "/images/",
        }
    }

    pub fn index_file_name(self) -> &'static str {
        match self {
            MediaKind::Video => ".video_index_cache.json",
            MediaKind::Image => ".image_index_cache.json",
        }
    }

    pub fn api_cache_file_name(self) -> &'static str {
        match self {
            MediaKind::Video => ".videos_api_cache.json",
            MediaKind::Image => ".images_api_cache.json",
        }
    }
}

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_lowercase();
            extensions.iter().any(|candidate| *candidate == lower)
        })
        .unwrap_or(false)
}

pub(crate) fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// Used whenever nothing better is known, so the client can always lay out a tile.
    pub const FALLBACK: Dimensions = Dimensions {
        width: 1920,
        height: 1080,
    };

    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            None
        } else {
            Some(Self { width, height })
        }
    }

    pub fn aspect_ratio(&self) -> f64 {
        round3(self.width as f64 / self.height as f64)
    }
}

/// One entry of a listing payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub tags: Vec<String>,
    pub filename: String,
    pub size: u64,
    pub title: String,
    pub modified: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Listing {
    Videos {
        total_videos: usize,
        videos: Vec<MediaItem>,
    },
    Images {
        total_images: usize,
        images: Vec<MediaItem>,
    },
}

/// The `/api/videos` and `/api/images` payload, also the persisted snapshot body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub folder: String,
    pub generated: DateTime<Utc>,
    pub scan_path: String,
    pub total_size: u64,
    #[serde(flatten)]
    pub listing: Listing,
}

impl ScanResult {
    /// Builds a payload, sorting items by filename.
    pub fn new(
        kind: MediaKind,
        scan_path: String,
        generated: DateTime<Utc>,
        mut items: Vec<MediaItem>,
    ) -> Self {
        items.sort_by(|a, b| a.filename.cmp(&b.filename));
        let total_size = items.iter().map(|item| item.size).sum();
        let listing = match kind {
            MediaKind::Video => Listing::Videos {
                total_videos: items.len(),
                videos: items,
            },
            MediaKind::Image => Listing::Images {
                total_images: items.len(),
                images: items,
            },
        };

        Self {
            folder: kind.folder_label().to_string(),
            generated,
            scan_path,
            total_size,
            listing,
        }
    }

    pub fn empty(kind: MediaKind, scan_path: String) -> Self {
        Self::new(kind, scan_path, Utc::now(), Vec::new())
    }

    pub fn kind(&self) -> MediaKind {
        match self.listing {
            Listing::Videos { .. } => MediaKind::Video,
            Listing::Images { .. } => MediaKind::Image,
        }
    }

    pub fn items(&self) -> &[MediaItem] {
        match &self.listing {
            Listing::Videos { videos, .. } => videos,
            Listing::Images { images, .. } => images,
        }
    }

    pub fn total_count(&self) -> usize {
        match self.listing {
            Listing::Videos { total_videos, .. } => total_videos,
            Listing::Images { total_images, .. } => total_images,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicTrack {
    pub filename: String,
    pub size: u64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicListing {
    pub folder: String,
    pub generated: DateTime<Utc>,
    pub scan_path: String,
    pub tracks: Vec<MusicTrack>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagSummary {
    pub generated: DateTime<Utc>,
    pub videos: Vec<TagCount>,
    pub images: Vec<TagCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub status: String,
    pub videos: usize,
    pub images: usize,
    pub music: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListQuery {
    pub refresh: Option<String>,
}

impl ListQuery {
    pub fn force_refresh(&self) -> bool {
        matches!(self.refresh.as_deref(), Some("1" | "true" | "yes"))
    }
}
