use super::{
    Dimensions, LibraryError, MediaKind,
    persist::{read_json, write_json_atomic},
    sidecar::{Essentials, extract_essentials, read_sidecar, sidecar_path},
};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Keys with this prefix are never pruned and never treated as files.
pub const RESERVED_PREFIX: &str = "__";

/// Modification times (epoch seconds) of a media file and its sidecar (0 if none).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub file_mtime: i64,
    pub metadata_mtime: i64,
}

impl Fingerprint {
    pub fn of(media_path: &Path) -> Result<Self, LibraryError> {
        let file_mtime = mtime_secs(&std::fs::metadata(media_path)?)?;

        let sidecar = sidecar_path(media_path);
        let metadata_mtime = match std::fs::metadata(&sidecar) {
            Ok(meta) if meta.is_file() => mtime_secs(&meta).unwrap_or_else(|e| {
                warn!("Unreadable sidecar mtime for {:?}: {}", sidecar, e);
                0
            }),
            _ => 0,
        };

        Ok(Self {
            file_mtime,
            metadata_mtime,
        })
    }

    pub fn has_sidecar(&self) -> bool {
        self.metadata_mtime > 0
    }
}

fn mtime_secs(meta: &std::fs::Metadata) -> Result<i64, LibraryError> {
    Ok(DateTime::<Utc>::from(meta.modified()?).timestamp())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    #[serde(flatten)]
    pub fingerprint: Fingerprint,
    #[serde(flatten)]
    pub essentials: Essentials,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub scanned: usize,
    pub refreshed: usize,
    pub pruned: usize,
    pub persisted: bool,
}

#[derive(Debug, Default)]
struct IndexState {
    records: BTreeMap<String, IndexRecord>,
    reserved: Map<String, Value>,
}

impl IndexState {
    fn load(kind: MediaKind, path: &Path) -> Self {
        let raw: Map<String, Value> = match read_json(path) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No {} index at {:?}, starting empty", kind.as_str(), path);
                return Self::default();
            }
            Err(e) => {
                warn!("Failed to load {} index {:?}: {}", kind.as_str(), path, e);
                return Self::default();
            }
        };

        let mut state = Self::default();
        for (key, value) in raw {
            if key.starts_with(RESERVED_PREFIX) {
                state.reserved.insert(key, value);
                continue;
            }
            match serde_json::from_value::<IndexRecord>(value) {
                Ok(record) => {
                    state.records.insert(key, record);
                }
                Err(e) => debug!("Dropping malformed index record {}: {}", key, e),
            }
        }

        info!(
            "Loaded {} cached {} index entries",
            state.records.len(),
            kind.as_str()
        );
        state
    }

    fn to_json(&self) -> Result<Map<String, Value>, LibraryError> {
        let mut out = self.reserved.clone();
        for (key, record) in &self.records {
            out.insert(key.clone(), serde_json::to_value(record)?);
        }
        Ok(out)
    }
}

/// Incremental, persistent per-file metadata cache for one folder and media kind.
///
/// Records are keyed by bare filename; files with the same name in different
/// subfolders share one record.
#[derive(Debug)]
pub struct MetadataIndex {
    kind: MediaKind,
    folder: PathBuf,
    index_path: PathBuf,
    state: OnceCell<IndexState>,
}

impl MetadataIndex {
    pub fn new(kind: MediaKind, folder: impl Into<PathBuf>) -> Self {
        let folder = folder.into();
        let index_path = folder.join(kind.index_file_name());
        Self {
            kind,
            folder,
            index_path,
            state: OnceCell::new(),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    fn state(&self) -> &IndexState {
        self.state
            .get_or_init(|| IndexState::load(self.kind, &self.index_path))
    }

    /// Brings the index in line with the folder.
    ///
    /// Unchanged fingerprints are skipped, changed or new files are re-read from
    /// their sidecar, and records for files no longer present are pruned. The
    /// index file is rewritten only when something changed.
    pub fn update(&mut self) -> UpdateStats {
        let mut stats = UpdateStats::default();

        if !self.folder.is_dir() {
            debug!("{} folder {:?} does not exist", self.kind.as_str(), self.folder);
            return stats;
        }

        let mut state = self
            .state
            .take()
            .unwrap_or_else(|| IndexState::load(self.kind, &self.index_path));
        let mut seen = HashSet::new();

        for entry in WalkDir::new(&self.folder)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !self.kind.matches_path(path) {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let fingerprint = match Fingerprint::of(path) {
                Ok(fingerprint) => fingerprint,
                Err(e) => {
                    warn!("Index update error for {:?}: {}", path, e);
                    continue;
                }
            };
            stats.scanned += 1;
            seen.insert(filename.to_string());

            if state
                .records
                .get(filename)
                .is_some_and(|record| record.fingerprint == fingerprint)
            {
                continue;
            }

            let essentials = if fingerprint.has_sidecar() {
                self.read_essentials(path, filename)
            } else {
                Essentials::default()
            };

            state.records.insert(
                filename.to_string(),
                IndexRecord {
                    fingerprint,
                    essentials,
                },
            );
            stats.refreshed += 1;
        }

        let before = state.records.len();
        state
            .records
            .retain(|name, _| name.starts_with(RESERVED_PREFIX) || seen.contains(name));
        stats.pruned = before - state.records.len();

        if stats.refreshed > 0 || stats.pruned > 0 {
            match state
                .to_json()
                .and_then(|json| write_json_atomic(&self.index_path, &json))
            {
                Ok(()) => stats.persisted = true,
                Err(e) => warn!("Failed to write index {:?}: {}", self.index_path, e),
            }
            info!(
                "{} index updated: {} refreshed, {} pruned, {} total",
                self.kind.as_str(),
                stats.refreshed,
                stats.pruned,
                state.records.len()
            );
        }

        self.state = OnceCell::with_value(state);
        stats
    }

    fn read_essentials(&self, media_path: &Path, filename: &str) -> Essentials {
        match read_sidecar(&sidecar_path(media_path)) {
            Ok(sidecar) => extract_essentials(self.kind, &sidecar),
            Err(e) => {
                warn!(
                    "Failed to read {} metadata for {}: {}",
                    self.kind.as_str(),
                    filename,
                    e
                );
                Essentials::default()
            }
        }
    }

    pub fn get_entry(&self, filename: &str) -> Option<&IndexRecord> {
        self.state().records.get(filename)
    }

    pub fn get_title(&self, filename: &str) -> Option<&str> {
        self.get_entry(filename)?.essentials.title.as_deref()
    }

    pub fn get_dimensions(&self, filename: &str) -> Option<Dimensions> {
        self.get_entry(filename)?.essentials.dimensions
    }

    pub fn get_duration(&self, filename: &str) -> Option<f64> {
        self.get_entry(filename)?.essentials.duration
    }

    pub fn get_has_audio(&self, filename: &str) -> Option<bool> {
        self.get_entry(filename)?.essentials.has_audio
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
