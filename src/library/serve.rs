use super::LibraryError;
use axum::{
    body::Body,
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use std::{
    io::SeekFrom,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;
use tracing::debug;

const CHUNK_SIZE: usize = 64 * 1024;
pub const MEDIA_CACHE_CONTROL: &str = "public, max-age=86400";

/// Inclusive byte range inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parses a single `bytes=start-end` range and clamps it into the file.
///
/// Missing bounds default to the start and the last byte. Multiple ranges,
/// other units and non-numeric bounds are rejected.
pub fn parse_range_header(range: &str, file_size: u64) -> Option<ByteRange> {
    if file_size == 0 {
        return None;
    }

    let ranges = range.trim().strip_prefix("bytes=")?;
    if ranges.contains(',') {
        return None;
    }
    let (start, end) = ranges.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    let last = file_size - 1;
    let start = if start.is_empty() {
        0
    } else {
        start.parse::<u64>().ok()?
    };
    let end = if end.is_empty() {
        last
    } else {
        end.parse::<u64>().ok()?
    };

    let start = start.min(last);
    let end = end.clamp(start, last);
    Some(ByteRange { start, end })
}

/// True when the client copy is at least as new as `modified`, at second precision.
pub fn not_modified_since(headers: &HeaderMap, modified: SystemTime) -> bool {
    let Some(since) = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| httpdate::parse_http_date(h).ok())
    else {
        return false;
    };

    let modified_secs = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let since_secs = since
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    modified_secs <= since_secs
}

/// Streams a media file honoring `If-Modified-Since` and single byte ranges.
pub async fn serve_file(
    path: &Path,
    headers: &HeaderMap,
    default_content_type: &str,
) -> Result<Response, LibraryError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(LibraryError::NotFound),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(LibraryError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let file_size = metadata.len();
    let modified = metadata.modified()?;

    if not_modified_since(headers, modified) {
        debug!("Not modified: {:?}", path);
        return Ok(Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .body(Body::empty())?);
    }

    let content_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(default_content_type);
    let last_modified = httpdate::fmt_http_date(modified);
    let etag = format!(
        "\"{}-{}\"",
        modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        file_size
    );

    let mut file = File::open(path).await?;

    let range = headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| parse_range_header(h, file_size));

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, MEDIA_CACHE_CONTROL)
        .header(header::LAST_MODIFIED, last_modified)
        .header(header::ETAG, etag);

    let response = match range {
        Some(range) => {
            debug!(
                "Serving range {}-{} of {:?} ({} bytes)",
                range.start,
                range.end,
                path,
                range.content_length()
            );
            file.seek(SeekFrom::Start(range.start)).await?;
            let stream = ReaderStream::with_capacity(file.take(range.content_length()), CHUNK_SIZE);
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", range.start, range.end, file_size),
                )
                .header(header::CONTENT_LENGTH, range.content_length())
                .body(Body::from_stream(stream))
        }
        None => {
            let stream = ReaderStream::with_capacity(file, CHUNK_SIZE);
            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, file_size)
                .body(Body::from_stream(stream))
        }
    };

    Ok(response?)
}
