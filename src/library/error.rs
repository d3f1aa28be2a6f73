use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] axum::http::Error),

    #[error("Background task failed: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Invalid path")]
    InvalidPath,

    #[error("Not found")]
    NotFound,
}
