use super::{LibraryError, ListQuery, MediaKind, serve::serve_file};
use crate::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, error};

const LISTING_CACHE_CONTROL: &str = "public, max-age=300";

fn listing_response<T: Serialize>(payload: Result<Arc<T>, LibraryError>, what: &str) -> Response {
    match payload {
        Ok(payload) => (
            [
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (header::CACHE_CONTROL, LISTING_CACHE_CONTROL),
            ],
            Json(payload.as_ref()),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to build {} listing: {}", what, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn media_file_response(
    path: Result<PathBuf, LibraryError>,
    headers: &HeaderMap,
    default_content_type: &str,
    filename: &str,
) -> Response {
    let path = match path {
        Ok(path) => path,
        Err(e) => {
            debug!("Rejected media request for {:?}: {}", filename, e);
            return (StatusCode::NOT_FOUND, "File not found").into_response();
        }
    };

    match serve_file(&path, headers, default_content_type).await {
        Ok(response) => response,
        Err(LibraryError::NotFound) => {
            debug!("Media file not found: {:?}", path);
            (StatusCode::NOT_FOUND, "File not found").into_response()
        }
        Err(e) => {
            error!("Failed to serve {:?}: {}", path, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file").into_response()
        }
    }
}

pub async fn videos_handler(
    State(app_state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let listing = app_state
        .library
        .list(MediaKind::Video, query.force_refresh())
        .await;
    listing_response(listing, "video")
}

pub async fn images_handler(
    State(app_state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let listing = app_state
        .library
        .list(MediaKind::Image, query.force_refresh())
        .await;
    listing_response(listing, "image")
}

pub async fn music_handler(State(app_state): State<AppState>) -> impl IntoResponse {
    listing_response(app_state.library.music().await, "music")
}

pub async fn tags_handler(State(app_state): State<AppState>) -> impl IntoResponse {
    listing_response(app_state.library.tags().await, "tag")
}

pub async fn refresh_handler(State(app_state): State<AppState>) -> impl IntoResponse {
    listing_response(app_state.library.refresh().await.map(Arc::new), "refresh")
}

pub async fn video_file_handler(
    State(app_state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let path = app_state.library.media_path(MediaKind::Video, &filename);
    media_file_response(path, &headers, "video/mp4", &filename).await
}

pub async fn image_file_handler(
    State(app_state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let path = app_state.library.media_path(MediaKind::Image, &filename);
    media_file_response(path, &headers, "application/octet-stream", &filename).await
}

pub async fn music_file_handler(
    State(app_state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let path = app_state.library.music_path(&filename);
    media_file_response(path, &headers, "audio/mpeg", &filename).await
}
