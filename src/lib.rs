use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod library;
pub mod startup_checks;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub app: AppConfig,
    pub library: LibraryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryConfig {
    pub videos_directory: PathBuf,
    pub images_directory: PathBuf,
    pub music_directory: PathBuf,
    /// Flat JSON array of media entries; when set, folders are not walked.
    #[serde(default)]
    pub database_file: Option<PathBuf>,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default)]
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    pub enabled: bool,
    pub timeout_seconds: u64,
    pub audio_timeout_seconds: u64,
    #[serde(default)]
    pub executable: Option<PathBuf>,
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: 8,
            audio_timeout_seconds: 6,
            executable: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            app: AppConfig {
                name: "Mediawall".to_string(),
                log_level: "info".to_string(),
            },
            library: LibraryConfig {
                videos_directory: PathBuf::from("videos"),
                images_directory: PathBuf::from("images"),
                music_directory: PathBuf::from("music"),
                database_file: None,
                cache_ttl_seconds: default_cache_ttl_seconds(),
                probe: ProbeConfig::default(),
            },
        }
    }
}

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub library: library::SharedLibrary,
}

pub async fn create_app(config: Config) -> Result<Router, library::LibraryError> {
    let library = Arc::new(library::Library::from_config(&config.library)?);
    Ok(create_router(library))
}

/// Router over an already constructed library.
pub fn create_router(library: library::SharedLibrary) -> Router {
    let app_state = AppState { library };

    Router::new()
        .route("/api/videos", get(library::videos_handler))
        .route("/api/images", get(library::images_handler))
        .route("/api/music", get(library::music_handler))
        .route("/api/tags", get(library::tags_handler))
        .route("/api/refresh", post(library::refresh_handler))
        .route("/videos/{filename}", get(library::video_file_handler))
        .route("/images/{filename}", get(library::image_file_handler))
        .route("/music/{filename}", get(library::music_file_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let method = request.method();
                    let uri = request.uri();
                    let matched_path = request
                        .extensions()
                        .get::<axum::extract::MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::info_span!(
                        "http_request",
                        method = %method,
                        uri = %uri,
                        matched_path,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    let uri = request.uri();
                    let header = |name: axum::http::HeaderName| {
                        request
                            .headers()
                            .get(name)
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or("-")
                            .to_string()
                    };

                    tracing::info!(
                        target: "access_log",
                        method = %request.method(),
                        path = %uri.path(),
                        query = ?uri.query(),
                        range = %header(axum::http::header::RANGE),
                        user_agent = %header(axum::http::header::USER_AGENT),
                        "request"
                    );
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        let header = |name: axum::http::HeaderName| {
                            response
                                .headers()
                                .get(name)
                                .and_then(|h| h.to_str().ok())
                                .unwrap_or("-")
                                .to_string()
                        };

                        tracing::info!(
                            target: "access_log",
                            status = %response.status(),
                            size = %header(axum::http::header::CONTENT_LENGTH),
                            content_range = %header(axum::http::header::CONTENT_RANGE),
                            latency_ms = %latency.as_millis(),
                            "response"
                        );
                    },
                ),
        )
        .with_state(app_state)
}
