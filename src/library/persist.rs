use super::LibraryError;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};
use uuid::Uuid;

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "cache".to_string());
    path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()))
}

/// Writes `value` as JSON to a uniquely named sibling and renames it over `path`.
///
/// Readers see either the previous file or the complete new one.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), LibraryError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec(value)?;
    let tmp = temp_path_for(path);

    let written = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(&json)?;
            file.sync_all()
        })
        .and_then(|_| std::fs::rename(&tmp, path));

    if let Err(e) = written {
        if let Err(cleanup) = std::fs::remove_file(&tmp) {
            debug!("Could not remove temp file {:?}: {}", tmp, cleanup);
        }
        return Err(e.into());
    }

    debug!("Wrote {} bytes to {:?}", json.len(), path);
    Ok(())
}

/// Reads a JSON file, returning `Ok(None)` when it does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, LibraryError> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&json)?))
}

pub(crate) fn remove_if_exists(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove {:?}: {}", path, e);
            false
        }
    }
}
