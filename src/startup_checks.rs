use crate::Config;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum StartupCheckError {
    #[error("Database file does not exist: {0}")]
    DatabaseFileMissing(String),

    #[error("Database file is not readable: {0}")]
    DatabaseFileUnreadable(#[from] std::io::Error),

    #[error("Database file is not a JSON array: {0}")]
    DatabaseFileInvalid(String),

    #[error("Configured ffprobe executable does not exist: {0}")]
    ProbeExecutableMissing(String),
}

impl StartupCheckError {
    /// Only a broken database file prevents serving.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            StartupCheckError::DatabaseFileMissing(_)
                | StartupCheckError::DatabaseFileUnreadable(_)
                | StartupCheckError::DatabaseFileInvalid(_)
        )
    }
}

async fn check_database_file(path: &Path) -> Result<(), StartupCheckError> {
    if !path.exists() {
        error!("Database file not found: {:?}", path);
        return Err(StartupCheckError::DatabaseFileMissing(
            path.display().to_string(),
        ));
    }

    let content = tokio::fs::read_to_string(path).await?;
    match serde_json::from_str::<serde_json::Value>(&content) {
        Ok(serde_json::Value::Array(entries)) => {
            info!("Database file {:?} holds {} entries", path, entries.len());
            Ok(())
        }
        Ok(_) => Err(StartupCheckError::DatabaseFileInvalid(format!(
            "{} does not contain an array",
            path.display()
        ))),
        Err(e) => Err(StartupCheckError::DatabaseFileInvalid(format!(
            "{}: {}",
            path.display(),
            e
        ))),
    }
}

pub async fn perform_startup_checks(config: &Config) -> Result<(), Vec<StartupCheckError>> {
    let mut errors = Vec::new();
    let library = &config.library;

    info!("Performing startup checks...");

    if let Some(database) = &library.database_file {
        if let Err(e) = check_database_file(database).await {
            errors.push(e);
        }
    } else {
        // Missing folders are allowed; they list as empty until created.
        for (label, dir) in [
            ("Videos", &library.videos_directory),
            ("Images", &library.images_directory),
        ] {
            if dir.is_dir() {
                info!("{} directory exists: {:?}", label, dir);
            } else {
                warn!("{} directory does not exist yet: {:?}", label, dir);
            }
        }
    }

    if library.music_directory.is_dir() {
        info!("Music directory exists: {:?}", library.music_directory);
    } else {
        warn!(
            "Music directory does not exist yet: {:?}",
            library.music_directory
        );
    }

    if library.probe.enabled
        && let Some(executable) = &library.probe.executable
        && !executable.is_file()
    {
        warn!("Configured ffprobe executable not found: {:?}", executable);
        errors.push(StartupCheckError::ProbeExecutableMissing(
            executable.display().to_string(),
        ));
    }

    if errors.is_empty() {
        info!("All startup checks passed");
        Ok(())
    } else {
        error!("Startup checks failed with {} errors", errors.len());
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_with_database(path: &Path) -> Config {
        let mut config = Config::default();
        config.library.database_file = Some(path.to_path_buf());
        config.library.probe.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_missing_database_is_critical() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_with_database(&temp_dir.path().join("missing.json"));

        let errors = perform_startup_checks(&config).await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_critical());
    }

    #[tokio::test]
    async fn test_database_must_hold_an_array() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db.json");
        std::fs::write(&path, r#"{"not": "an array"}"#).unwrap();

        let errors = perform_startup_checks(&config_with_database(&path))
            .await
            .unwrap_err();
        assert!(matches!(errors[0], StartupCheckError::DatabaseFileInvalid(_)));

        std::fs::write(&path, "[]").unwrap();
        assert!(perform_startup_checks(&config_with_database(&path)).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_probe_is_not_critical() {
        let mut config = Config::default();
        config.library.probe.executable = Some("/nonexistent/ffprobe".into());

        let errors = perform_startup_checks(&config).await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].is_critical());
    }
}
