use super::{
    Dimensions, LibraryError, MediaKind,
    index::MetadataIndex,
    sidecar::{SidecarDocument, detect_audio, parse_duration},
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Keys of a database entry that are not copied into the metadata block.
const DATABASE_RESERVED_FIELDS: &[&str] = &["filename", "path", "mediaType", "title", "dimensions"];

/// One file offered to the scanner, with whatever the source already knows about it.
#[derive(Debug, Clone)]
pub struct MediaCandidate {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub title: Option<String>,
    pub dimensions: Option<Dimensions>,
    pub duration: Option<f64>,
    pub has_audio: Option<bool>,
    pub tags: Vec<String>,
    pub score: Option<Value>,
    pub metadata: Option<Map<String, Value>>,
}

impl MediaCandidate {
    fn from_file(path: PathBuf, filename: String) -> Result<Self, LibraryError> {
        let meta = std::fs::metadata(&path)?;
        if !meta.is_file() {
            return Err(LibraryError::NotFound);
        }
        Ok(Self {
            size: meta.len(),
            modified: DateTime::<Utc>::from(meta.modified()?),
            path,
            filename,
            title: None,
            dimensions: None,
            duration: None,
            has_audio: None,
            tags: Vec::new(),
            score: None,
            metadata: None,
        })
    }
}

/// Where media records come from. Implementations block and are driven
/// from `spawn_blocking`.
pub trait MediaSource: Send + Sync {
    /// Candidates for `kind`, or `None` when the source itself is absent
    /// (for example the folder has not been created yet).
    fn enumerate(&self, kind: MediaKind) -> Option<Vec<MediaCandidate>>;

    /// Human readable origin reported as `scan_path`.
    fn describe(&self, kind: MediaKind) -> String;

    /// Directory holding the persisted response snapshot for `kind`.
    fn snapshot_dir(&self, kind: MediaKind) -> PathBuf;

    /// File to stream for a listed filename.
    fn resolve(&self, kind: MediaKind, filename: &str) -> Option<PathBuf>;
}

/// Walks the `videos/` and `images/` folders, backed by one metadata index each.
pub struct FolderSource {
    videos: PathBuf,
    images: PathBuf,
    video_index: Mutex<MetadataIndex>,
    image_index: Mutex<MetadataIndex>,
}

impl FolderSource {
    pub fn new(videos: impl Into<PathBuf>, images: impl Into<PathBuf>) -> Self {
        let videos = videos.into();
        let images = images.into();
        Self {
            video_index: Mutex::new(MetadataIndex::new(MediaKind::Video, &videos)),
            image_index: Mutex::new(MetadataIndex::new(MediaKind::Image, &images)),
            videos,
            images,
        }
    }

    fn folder(&self, kind: MediaKind) -> &Path {
        match kind {
            MediaKind::Video => &self.videos,
            MediaKind::Image => &self.images,
        }
    }

    fn index(&self, kind: MediaKind) -> &Mutex<MetadataIndex> {
        match kind {
            MediaKind::Video => &self.video_index,
            MediaKind::Image => &self.image_index,
        }
    }
}

impl MediaSource for FolderSource {
    fn enumerate(&self, kind: MediaKind) -> Option<Vec<MediaCandidate>> {
        let folder = self.folder(kind);
        if !folder.is_dir() {
            info!("{} folder doesn't exist yet: {:?}", kind.plural(), folder);
            return None;
        }

        let mut index = self.index(kind).lock().unwrap_or_else(|e| e.into_inner());
        index.update();

        let mut candidates = Vec::new();
        for entry in WalkDir::new(folder)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !kind.matches_path(path) {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let mut candidate = match MediaCandidate::from_file(path.to_path_buf(), filename.to_string()) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!("Error processing {:?}: {}", path, e);
                    continue;
                }
            };

            if let Some(record) = index.get_entry(filename) {
                let essentials = &record.essentials;
                candidate.title = essentials.title.clone();
                candidate.dimensions = essentials.dimensions;
                candidate.duration = essentials.duration;
                candidate.has_audio = essentials.has_audio;
                candidate.tags = essentials.tags.clone().unwrap_or_default();
                candidate.score = essentials.score().cloned();
                candidate.metadata = essentials.metadata_block();
            }

            candidates.push(candidate);
        }

        Some(candidates)
    }

    fn describe(&self, kind: MediaKind) -> String {
        self.folder(kind).display().to_string()
    }

    fn snapshot_dir(&self, kind: MediaKind) -> PathBuf {
        self.folder(kind).to_path_buf()
    }

    fn resolve(&self, kind: MediaKind, filename: &str) -> Option<PathBuf> {
        Some(self.folder(kind).join(filename))
    }
}

/// A validated element of the flat JSON database.
#[derive(Debug, Clone)]
pub struct DatabaseEntry {
    pub kind: MediaKind,
    pub filename: String,
    pub path: PathBuf,
    pub fields: Map<String, Value>,
}

impl DatabaseEntry {
    fn candidate(&self) -> Result<MediaCandidate, LibraryError> {
        let mut candidate = MediaCandidate::from_file(self.path.clone(), self.filename.clone())?;
        let doc = SidecarDocument::new(&self.fields);

        candidate.title = doc.field("title").as_text();
        candidate.dimensions = doc.dimensions();
        candidate.duration = doc.raw("duration").and_then(parse_duration);
        if self.kind == MediaKind::Video {
            candidate.has_audio = detect_audio(doc);
        }
        let tag_fields: &[&str] = match self.kind {
            MediaKind::Video => &["tags", "video_tags"],
            MediaKind::Image => &["tags", "image_tags"],
        };
        candidate.tags = doc.first_truthy(tag_fields).as_tags().unwrap_or_default();
        candidate.score = doc.raw("score").cloned();

        let passthrough: Map<String, Value> = self
            .fields
            .iter()
            .filter(|(key, _)| !DATABASE_RESERVED_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if !passthrough.is_empty() {
            candidate.metadata = Some(passthrough);
        }

        Ok(candidate)
    }
}

/// Media listed in one JSON array file instead of discovered on disk.
pub struct DatabaseSource {
    file: PathBuf,
    entries: Vec<DatabaseEntry>,
}

impl DatabaseSource {
    /// Loads and validates the database; the file must exist and hold a JSON array.
    pub fn load(file: impl Into<PathBuf>) -> Result<Self, LibraryError> {
        let file = file.into();
        let json = std::fs::read_to_string(&file)?;
        let value: Value = serde_json::from_str(&json)?;
        let Value::Array(items) = value else {
            return Err(LibraryError::DatabaseError(format!(
                "{:?} must contain a JSON array",
                file
            )));
        };

        let base = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let entries = parse_entries(&base, items);
        info!(
            "Loaded {} valid entries from database {:?}",
            entries.len(),
            file
        );

        Ok(Self { file, entries })
    }

    pub fn entries(&self) -> &[DatabaseEntry] {
        &self.entries
    }
}

fn parse_entries(base: &Path, items: Vec<Value>) -> Vec<DatabaseEntry> {
    let mut entries = Vec::with_capacity(items.len());

    for (position, item) in items.into_iter().enumerate() {
        let Value::Object(fields) = item else {
            warn!("Skipping database entry {}: not an object", position);
            continue;
        };

        let path_field = fields.get("path").and_then(Value::as_str);
        let filename = fields
            .get("filename")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                path_field
                    .and_then(|p| Path::new(p).file_name())
                    .map(|n| n.to_string_lossy().to_string())
            });
        let Some(filename) = filename else {
            warn!("Skipping database entry {}: missing 'filename' or 'path'", position);
            continue;
        };

        let kind = match fields.get("mediaType") {
            Some(Value::String(media_type)) => MediaKind::parse(media_type),
            Some(_) => None,
            None => MediaKind::from_path(Path::new(&filename)),
        };
        let Some(kind) = kind else {
            warn!(
                "Skipping database entry {}: unknown media type for {}",
                position, filename
            );
            continue;
        };

        let relative = PathBuf::from(path_field.unwrap_or(&filename));
        let path = if relative.is_absolute() {
            relative
        } else {
            base.join(relative)
        };

        entries.push(DatabaseEntry {
            kind,
            filename,
            path,
            fields,
        });
    }

    entries
}

impl MediaSource for DatabaseSource {
    fn enumerate(&self, kind: MediaKind) -> Option<Vec<MediaCandidate>> {
        let candidates = self
            .entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .filter_map(|entry| match entry.candidate() {
                Ok(candidate) => Some(candidate),
                Err(e) => {
                    debug!("Skipping database entry {:?}: {}", entry.path, e);
                    None
                }
            })
            .collect();
        Some(candidates)
    }

    fn describe(&self, _kind: MediaKind) -> String {
        format!("database:{}", self.file.display())
    }

    fn snapshot_dir(&self, _kind: MediaKind) -> PathBuf {
        self.file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    fn resolve(&self, kind: MediaKind, filename: &str) -> Option<PathBuf> {
        self.entries
            .iter()
            .find(|entry| entry.kind == kind && entry.filename == filename)
            .map(|entry| entry.path.clone())
    }
}
