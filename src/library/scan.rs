use super::{
    Dimensions, LibraryError, MediaItem, MediaKind, MusicListing, MusicTrack, ScanResult,
    probe::Probe,
    source::{MediaCandidate, MediaSource},
    tags::{TagInput, generate_tags},
    types::{AUDIO_EXTENSIONS, has_extension, round3},
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{path::Path, sync::Arc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

static COLLECTION_UNDERSCORED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{8}T\d{6}_\d+_[^_]+_(.+)$").expect("valid collection regex")
});
static COLLECTION_SPACED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\d{8}T\d{6}\s+\d+\s+\w+\s+\w+\s+(.+)$").expect("valid spaced regex")
});
static TIMESTAMP_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{8}T\d{6}[_\s]+\d+[_\s]+").expect("valid prefix regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Turns a decorated download filename into something presentable.
///
/// `20250808T163938_36228936_collection_Actual_Title.mp4` becomes `Actual Title`.
pub fn display_title(filename: &str) -> String {
    let stem = match filename.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => filename,
    };

    if let Some(caps) = COLLECTION_UNDERSCORED.captures(stem) {
        return caps[1].replace('_', " ").trim().to_string();
    }

    if let Some(caps) = COLLECTION_SPACED.captures(stem) {
        return caps[1].trim().to_string();
    }

    let stripped = TIMESTAMP_PREFIX.replace(stem, "").replace('_', " ");
    let collapsed = WHITESPACE.replace_all(&stripped, " ");
    let title = collapsed
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");

    if title.is_empty() {
        stem.to_string()
    } else {
        title
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Upper-cases the first letter of every run of letters and lower-cases the rest.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_is_letter = false;
    for c in text.chars() {
        if previous_is_letter {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_is_letter = c.is_alphabetic();
    }
    out
}

/// Assembles listing payloads from a source, probing only what the source lacks.
pub struct ScanOrchestrator {
    source: Arc<dyn MediaSource>,
    probe: Arc<dyn Probe>,
}

impl ScanOrchestrator {
    pub fn new(source: Arc<dyn MediaSource>, probe: Arc<dyn Probe>) -> Self {
        Self { source, probe }
    }

    pub fn source(&self) -> &Arc<dyn MediaSource> {
        &self.source
    }

    /// Scans one kind. An absent source yields an empty payload and `false`.
    pub async fn scan(&self, kind: MediaKind) -> Result<(ScanResult, bool), LibraryError> {
        let scan_path = self.source.describe(kind);
        info!("Scanning {} from {}", kind.plural(), scan_path);

        let source = Arc::clone(&self.source);
        let candidates = tokio::task::spawn_blocking(move || source.enumerate(kind)).await?;
        let Some(candidates) = candidates else {
            return Ok((ScanResult::empty(kind, scan_path), false));
        };

        let mut items = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            items.push(self.build_item(kind, candidate).await);
        }

        let result = ScanResult::new(kind, scan_path, Utc::now(), items);
        info!(
            "Found {} {} ({} bytes)",
            result.total_count(),
            kind.plural(),
            result.total_size
        );
        Ok((result, true))
    }

    async fn build_item(&self, kind: MediaKind, candidate: MediaCandidate) -> MediaItem {
        let title = candidate
            .title
            .clone()
            .unwrap_or_else(|| display_title(&candidate.filename));
        let dimensions = candidate.dimensions.unwrap_or(Dimensions::FALLBACK);

        // Probed values are resolved once here and shared with tag generation.
        let (duration, has_audio) = match kind {
            MediaKind::Video => {
                let duration = match candidate.duration {
                    Some(duration) => Some(duration),
                    None => self.probe.duration(&candidate.path).await,
                };
                let has_audio = match candidate.has_audio {
                    Some(has_audio) => Some(has_audio),
                    None => self.probe.has_audio(&candidate.path).await,
                };
                (duration, has_audio)
            }
            MediaKind::Image => (None, None),
        };

        let tags = generate_tags(&TagInput {
            kind,
            dimensions: Some(dimensions),
            score: candidate.score.as_ref(),
            duration,
            has_audio,
            existing: &candidate.tags,
        });

        MediaItem {
            kind,
            tags,
            filename: candidate.filename,
            size: candidate.size,
            title,
            modified: candidate.modified,
            width: dimensions.width,
            height: dimensions.height,
            aspect_ratio: dimensions.aspect_ratio(),
            duration_seconds: duration.map(round3),
            metadata: candidate.metadata,
        }
    }
}

/// Lists audio tracks under `folder`. Blocking.
pub fn scan_music(folder: &Path) -> MusicListing {
    let scan_path = folder.display().to_string();
    let mut tracks = Vec::new();

    if !folder.is_dir() {
        info!("Music folder doesn't exist yet: {:?}", folder);
    } else {
        for entry in WalkDir::new(folder)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !has_extension(path, AUDIO_EXTENSIONS) {
                continue;
            }
            let (Some(filename), Some(stem)) = (
                path.file_name().and_then(|n| n.to_str()),
                path.file_stem().and_then(|n| n.to_str()),
            ) else {
                continue;
            };

            match entry.metadata() {
                Ok(meta) => tracks.push(MusicTrack {
                    filename: filename.to_string(),
                    size: meta.len(),
                    title: title_case(&stem.replace('_', " ")),
                }),
                Err(e) => warn!("Error processing {:?}: {}", path, e),
            }
        }
        tracks.sort_by(|a, b| a.filename.cmp(&b.filename));
        debug!("Found {} music tracks", tracks.len());
    }

    MusicListing {
        folder: "/music/".to_string(),
        generated: Utc::now(),
        scan_path,
        tracks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{probe::FixedProbe, source::FolderSource};
    use tempfile::TempDir;

    #[test]
    fn test_display_title_patterns() {
        assert_eq!(
            display_title("20250808T163938_36228936_collection_Actual_Title_Here.mp4"),
            "Actual Title Here"
        );
        assert_eq!(
            display_title("20250808T163938 36228936 Some Collection the real title.mp4"),
            "the real title"
        );
        assert_eq!(
            display_title("20250808T163938_12 lonely__word.mp4"),
            "Lonely Word"
        );
        assert_eq!(display_title("my_HOLIDAY clip.webm"), "My Holiday Clip");
        assert_eq!(display_title("___.mp4"), "___");
        assert_eq!(display_title("noext"), "Noext");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("the long road"), "The Long Road");
        assert_eq!(title_case("AC-DC live"), "Ac-Dc Live");
    }

    #[test]
    fn test_scan_music_sorts_tracks() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("album");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("b_side.flac"), b"12").unwrap();
        std::fs::write(temp_dir.path().join("a_song.MP3"), b"1").unwrap();
        std::fs::write(temp_dir.path().join("cover.jpg"), b"1").unwrap();

        let listing = scan_music(temp_dir.path());
        let names: Vec<_> = listing.tracks.iter().map(|t| t.filename.as_str()).collect();
        assert_eq!(names, vec!["a_song.MP3", "b_side.flac"]);
        assert_eq!(listing.tracks[0].title, "A Song");
        assert_eq!(listing.tracks[1].size, 2);
        assert_eq!(listing.folder, "/music/");
    }

    #[test]
    fn test_scan_music_missing_folder() {
        let temp_dir = TempDir::new().unwrap();
        let listing = scan_music(&temp_dir.path().join("absent"));
        assert!(listing.tracks.is_empty());
    }

    #[tokio::test]
    async fn test_scan_resolves_fallbacks_and_probes_once() {
        let temp_dir = TempDir::new().unwrap();
        let videos = temp_dir.path().join("videos");
        std::fs::create_dir_all(&videos).unwrap();
        std::fs::write(videos.join("b_clip.mp4"), vec![0u8; 5]).unwrap();
        std::fs::write(videos.join("a_clip.mp4"), vec![0u8; 7]).unwrap();
        std::fs::write(
            videos.join("a_clip.mp4_metadata.json"),
            r#"{"title": "Known", "width": 640, "height": 480, "duration": 5, "muted": true}"#,
        )
        .unwrap();

        let source = Arc::new(FolderSource::new(&videos, temp_dir.path().join("images")));
        let probe = Arc::new(FixedProbe {
            duration: Some(75.1234),
            has_audio: Some(true),
        });
        let scanner = ScanOrchestrator::new(source, probe);

        let (result, present) = scanner.scan(MediaKind::Video).await.unwrap();
        assert!(present);
        assert_eq!(result.total_count(), 2);
        assert_eq!(result.total_size, 12);

        let items = result.items();
        assert_eq!(items[0].filename, "a_clip.mp4");
        assert_eq!(items[0].title, "Known");
        assert_eq!((items[0].width, items[0].height), (640, 480));
        assert_eq!(items[0].duration_seconds, Some(5.0));
        assert_eq!(
            items[0].tags,
            vec!["audio/no", "horizontal", "len/<10s", "video"]
        );

        assert_eq!(items[1].title, "B Clip");
        assert_eq!((items[1].width, items[1].height), (1920, 1080));
        assert_eq!(items[1].aspect_ratio, 1.778);
        assert_eq!(items[1].duration_seconds, Some(75.123));
        assert_eq!(
            items[1].tags,
            vec!["1080+", "audio/yes", "horizontal", "len/60s+", "video"]
        );
    }

    #[tokio::test]
    async fn test_scan_missing_folder_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(FolderSource::new(
            temp_dir.path().join("videos"),
            temp_dir.path().join("images"),
        ));
        let scanner = ScanOrchestrator::new(source, Arc::new(FixedProbe::default()));

        let (result, present) = scanner.scan(MediaKind::Image).await.unwrap();
        assert!(!present);
        assert_eq!(result.total_count(), 0);
        assert_eq!(result.folder, "/images/");
    }
}
