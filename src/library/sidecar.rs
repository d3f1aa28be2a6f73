use super::{Dimensions, LibraryError, MediaKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};
use tracing::trace;

const SIDECAR_SUFFIX: &str = "_metadata.json";

const VIDEO_TITLE_FIELDS: &[&str] = &["video_title", "title", "video_data-title"];
const NESTED_VIDEO_TITLE_FIELDS: &[&str] = &["video_title", "video_data-title", "title"];
const IMAGE_TITLE_FIELDS: &[&str] = &["title", "image_title"];

const VIDEO_PASSTHROUGH_FIELDS: &[&str] = &[
    "id",
    "contentId",
    "category",
    "score",
    "poster",
    "pageUrl",
    "referer",
    "extractedDate",
    "videoUrl",
];
const IMAGE_PASSTHROUGH_FIELDS: &[&str] = &["id", "source", "pageUrl", "referer", "extractedDate"];

pub(crate) const DURATION_FIELDS: &[&str] = &["duration", "video_duration", "length"];
const AUDIO_FLAG_FIELDS: &[&str] = &["has_audio", "hasAudio", "audio", "sound", "hasSound"];
const AUDIO_CHANNEL_FIELDS: &[&str] = &["audio_channels", "audioChannels"];
const AUDIO_BITRATE_FIELDS: &[&str] = &["audio_bitrate", "audioBitrate"];
const NESTED_ATTRIBUTES: &str = "allAttributes";

/// Numeric durations above this are assumed to be milliseconds.
const MILLISECOND_THRESHOLD: f64 = 10_000.0;

static CLOCK_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}:\d{2}(:\d{2})?$").expect("valid clock regex"));
static UNIT_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+(?:\.\d+)?)\s*(s|sec|secs|seconds)?$").expect("valid unit regex")
});
static ISO_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^P(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)$")
        .expect("valid iso regex")
});

/// Path of the JSON sidecar for a media file: `clip.mp4` -> `clip.mp4_metadata.json`.
pub fn sidecar_path(media_path: &Path) -> PathBuf {
    let mut name = media_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(SIDECAR_SUFFIX);
    media_path.with_file_name(name)
}

pub fn read_sidecar(path: &Path) -> Result<Value, LibraryError> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// A field looked up in a loosely-typed sidecar document.
#[derive(Debug, Clone, Copy)]
pub enum RawField<'a> {
    Absent,
    Null,
    Bool(bool),
    Number(&'a Number),
    Text(&'a str),
    List(&'a [Value]),
    Object(&'a Map<String, Value>),
}

impl<'a> RawField<'a> {
    fn of(value: Option<&'a Value>) -> Self {
        match value {
            None => RawField::Absent,
            Some(Value::Null) => RawField::Null,
            Some(Value::Bool(b)) => RawField::Bool(*b),
            Some(Value::Number(n)) => RawField::Number(n),
            Some(Value::String(s)) => RawField::Text(s),
            Some(Value::Array(items)) => RawField::List(items),
            Some(Value::Object(map)) => RawField::Object(map),
        }
    }

    /// Empty strings, zero, false, null and empty collections count as unset.
    pub fn is_truthy(&self) -> bool {
        match self {
            RawField::Absent | RawField::Null => false,
            RawField::Bool(b) => *b,
            RawField::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            RawField::Text(s) => !s.is_empty(),
            RawField::List(items) => !items.is_empty(),
            RawField::Object(map) => !map.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            RawField::Text(s) if !s.is_empty() => Some(s.to_string()),
            RawField::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            RawField::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .and_then(|v| u32::try_from(v).ok()),
            RawField::Text(s) => s.trim().parse::<u32>().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawField::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            RawField::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RawField::Bool(b) => Some(*b),
            RawField::Number(n) => n.as_f64().map(|f| f != 0.0),
            RawField::Text(s) => parse_truthy(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<SidecarDocument<'a>> {
        match self {
            RawField::Object(map) => Some(SidecarDocument { fields: map }),
            _ => None,
        }
    }

    /// Tags arrive either as one string or as a list of scalars.
    pub fn as_tags(&self) -> Option<Vec<String>> {
        match self {
            RawField::Text(s) if !s.is_empty() => Some(vec![s.to_string()]),
            RawField::List(items) if !items.is_empty() => Some(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Read-only view over one JSON object of a sidecar (or database entry).
#[derive(Debug, Clone, Copy)]
pub struct SidecarDocument<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> SidecarDocument<'a> {
    pub fn new(fields: &'a Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn from_value(value: &'a Value) -> Option<Self> {
        value.as_object().map(Self::new)
    }

    pub fn field(&self, name: &str) -> RawField<'a> {
        RawField::of(self.fields.get(name))
    }

    pub fn raw(&self, name: &str) -> Option<&'a Value> {
        self.fields.get(name)
    }

    /// First field among `names` holding a truthy value.
    pub fn first_truthy(&self, names: &[&str]) -> RawField<'a> {
        names
            .iter()
            .map(|name| self.field(name))
            .find(|field| field.is_truthy())
            .unwrap_or(RawField::Absent)
    }

    pub fn nested(&self, name: &str) -> Option<SidecarDocument<'a>> {
        self.field(name).as_object()
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        if let Some(dims) = self.nested("dimensions")
            && let (Some(w), Some(h)) = (dims.field("width").as_u32(), dims.field("height").as_u32())
            && let Some(found) = Dimensions::new(w, h)
        {
            return Some(found);
        }

        let width = self.first_truthy(&["width", "video_width"]).as_u32()?;
        let height = self.first_truthy(&["height", "video_height"]).as_u32()?;
        Dimensions::new(width, height)
    }

    pub fn duration(&self) -> Option<f64> {
        self.raw_first_truthy(DURATION_FIELDS)
            .and_then(parse_duration)
    }

    pub fn raw_first_truthy(&self, names: &[&str]) -> Option<&'a Value> {
        names
            .iter()
            .find(|name| self.field(name).is_truthy())
            .and_then(|name| self.raw(name))
    }
}

/// Normalized subset of a sidecar that the index persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Essentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_audio: Option<bool>,
    /// Whitelisted scalar fields copied verbatim.
    #[serde(default, rename = "metadata", skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Essentials {
    pub fn is_empty(&self) -> bool {
        *self == Essentials::default()
    }

    pub fn score(&self) -> Option<&Value> {
        self.extra.get("score")
    }

    /// The passthrough block attached to a listing item.
    pub fn metadata_block(&self) -> Option<Map<String, Value>> {
        let mut block = self.extra.clone();
        if let Some(dims) = self.dimensions {
            block.insert(
                "dimensions".to_string(),
                serde_json::json!({ "width": dims.width, "height": dims.height }),
            );
        }
        if let Some(tags) = &self.tags {
            block.insert("tags".to_string(), Value::from(tags.clone()));
        }
        if let Some(duration) = self.duration {
            block.insert("duration".to_string(), Value::from(duration));
        }
        if let Some(has_audio) = self.has_audio {
            block.insert("has_audio".to_string(), Value::from(has_audio));
        }
        if block.is_empty() { None } else { Some(block) }
    }
}

pub fn extract_essentials(kind: MediaKind, sidecar: &Value) -> Essentials {
    let Some(doc) = SidecarDocument::from_value(sidecar) else {
        trace!("Sidecar is not a JSON object, ignoring");
        return Essentials::default();
    };

    match kind {
        MediaKind::Video => extract_video(doc),
        MediaKind::Image => extract_image(doc),
    }
}

fn copy_fields(doc: SidecarDocument<'_>, names: &[&str]) -> Map<String, Value> {
    names
        .iter()
        .filter_map(|name| doc.raw(name).map(|v| (name.to_string(), v.clone())))
        .collect()
}

fn extract_video(doc: SidecarDocument<'_>) -> Essentials {
    let title = doc.first_truthy(VIDEO_TITLE_FIELDS).as_text().or_else(|| {
        doc.nested(NESTED_ATTRIBUTES)
            .and_then(|attrs| attrs.first_truthy(NESTED_VIDEO_TITLE_FIELDS).as_text())
    });

    Essentials {
        title,
        dimensions: doc.dimensions(),
        duration: doc.duration(),
        tags: doc.first_truthy(&["tags", "video_tags"]).as_tags(),
        has_audio: detect_audio(doc),
        extra: copy_fields(doc, VIDEO_PASSTHROUGH_FIELDS),
    }
}

fn extract_image(doc: SidecarDocument<'_>) -> Essentials {
    Essentials {
        title: doc.first_truthy(IMAGE_TITLE_FIELDS).as_text(),
        dimensions: doc.dimensions(),
        duration: None,
        tags: doc.first_truthy(&["tags", "image_tags"]).as_tags(),
        has_audio: None,
        extra: copy_fields(doc, IMAGE_PASSTHROUGH_FIELDS),
    }
}

/// Accepts yes/no, true/false, y/n and 1/0 in any case.
pub fn parse_truthy(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Normalizes a duration in any of the accepted shapes to seconds.
///
/// Numbers above 10,000 are taken as milliseconds. Strings may be `MM:SS`,
/// `HH:MM:SS`, a bare number with an optional seconds unit, or `PT#H#M#S`.
pub fn parse_duration(value: &Value) -> Option<f64> {
    let seconds = match value {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if raw > MILLISECOND_THRESHOLD {
                raw / 1000.0
            } else {
                raw
            }
        }
        Value::String(s) => parse_duration_str(s)?,
        _ => return None,
    };

    (seconds > 0.0 && seconds.is_finite()).then_some(seconds)
}

fn parse_duration_str(value: &str) -> Option<f64> {
    let s = value.trim();

    if CLOCK_DURATION.is_match(s) {
        let parts: Vec<u64> = s.split(':').filter_map(|p| p.parse().ok()).collect();
        return match parts.as_slice() {
            [m, sec] => Some((m * 60 + sec) as f64),
            [h, m, sec] => Some((h * 3600 + m * 60 + sec) as f64),
            _ => None,
        };
    }

    if let Some(caps) = UNIT_DURATION.captures(s) {
        return caps[1].parse::<f64>().ok();
    }

    if let Some(caps) = ISO_DURATION.captures(s) {
        let hours = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0);
        let minutes = caps
            .get(2)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0);
        let secs = caps
            .get(3)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0);
        return Some(hours * 3600.0 + minutes * 60.0 + secs);
    }

    None
}

/// Audio presence from sidecar hints; `None` means the sidecar does not say.
pub fn detect_audio(doc: SidecarDocument<'_>) -> Option<bool> {
    for name in AUDIO_FLAG_FIELDS {
        if let Some(flag) = doc.field(name).as_bool() {
            return Some(flag);
        }
    }

    if doc.field("muted").as_bool() == Some(true) {
        return Some(false);
    }

    if AUDIO_CHANNEL_FIELDS
        .iter()
        .any(|name| doc.field(name).as_i64().is_some_and(|channels| channels > 0))
    {
        return Some(true);
    }

    if AUDIO_BITRATE_FIELDS
        .iter()
        .any(|name| doc.field(name).is_truthy())
    {
        return Some(true);
    }

    // A streams list is authoritative even when it lists no audio.
    if let RawField::List(streams) = doc.field("streams") {
        let has_audio_stream = streams.iter().filter_map(SidecarDocument::from_value).any(|s| {
            matches!(s.field("codec_type"), RawField::Text("audio"))
                || matches!(s.field("type"), RawField::Text("audio"))
        });
        return Some(has_audio_stream);
    }

    doc.nested(NESTED_ATTRIBUTES).and_then(detect_audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn audio_of(value: Value) -> Option<bool> {
        detect_audio(SidecarDocument::from_value(&value).unwrap())
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration(&json!("1:30")), Some(90.0));
        assert_eq!(parse_duration(&json!("01:02:03")), Some(3723.0));
        assert_eq!(parse_duration(&json!("PT1M30S")), Some(90.0));
        assert_eq!(parse_duration(&json!("pt1h")), Some(3600.0));
        assert_eq!(parse_duration(&json!("PT2.5S")), Some(2.5));
        assert_eq!(parse_duration(&json!("42")), Some(42.0));
        assert_eq!(parse_duration(&json!("12.5 sec")), Some(12.5));
        assert_eq!(parse_duration(&json!("7 Seconds")), Some(7.0));
        assert_eq!(parse_duration(&json!(15000)), Some(15.0));
        assert_eq!(parse_duration(&json!(95.5)), Some(95.5));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(&json!("not a duration")), None);
        assert_eq!(parse_duration(&json!("0:00")), None);
        assert_eq!(parse_duration(&json!(0)), None);
        assert_eq!(parse_duration(&json!(-4)), None);
        assert_eq!(parse_duration(&json!(true)), None);
        assert_eq!(parse_duration(&json!(null)), None);
        assert_eq!(parse_duration(&json!("PT")), None);
    }

    #[test]
    fn test_sidecar_path_appends_suffix() {
        let path = sidecar_path(Path::new("/media/videos/clip.mp4"));
        assert_eq!(path, PathBuf::from("/media/videos/clip.mp4_metadata.json"));
    }

    #[test]
    fn test_detect_audio_flags() {
        assert_eq!(audio_of(json!({"has_audio": "yes"})), Some(true));
        assert_eq!(audio_of(json!({"hasSound": "N"})), Some(false));
        assert_eq!(audio_of(json!({"audio": 0})), Some(false));
        assert_eq!(audio_of(json!({"muted": true})), Some(false));
        assert_eq!(audio_of(json!({"muted": false})), None);
        assert_eq!(audio_of(json!({"audioChannels": "2"})), Some(true));
        assert_eq!(audio_of(json!({"audio_channels": 0})), None);
        assert_eq!(audio_of(json!({"audio_bitrate": 128000})), Some(true));
        assert_eq!(audio_of(json!({})), None);
    }

    #[test]
    fn test_detect_audio_streams_list_is_authoritative() {
        assert_eq!(
            audio_of(json!({"streams": [{"codec_type": "video"}, {"codec_type": "audio"}]})),
            Some(true)
        );
        assert_eq!(
            audio_of(json!({"streams": [{"codec_type": "video"}]})),
            Some(false)
        );
        assert_eq!(
            audio_of(json!({"streams": [], "allAttributes": {"has_audio": true}})),
            Some(false)
        );
    }

    #[test]
    fn test_detect_audio_recurses_into_attributes() {
        assert_eq!(
            audio_of(json!({"allAttributes": {"sound": "true"}})),
            Some(true)
        );
    }

    #[test]
    fn test_extract_video_essentials() {
        let sidecar = json!({
            "title": "",
            "allAttributes": {"video_data-title": "Nested Title"},
            "id": 17,
            "score": "1,234 likes",
            "unrelated": "dropped",
            "dimensions": {"width": 1280, "height": "720"},
            "video_tags": "funny",
            "duration": "0:45",
            "streams": [{"codec_type": "audio"}]
        });

        let essentials = extract_essentials(MediaKind::Video, &sidecar);
        assert_eq!(essentials.title.as_deref(), Some("Nested Title"));
        assert_eq!(essentials.dimensions, Dimensions::new(1280, 720));
        assert_eq!(essentials.duration, Some(45.0));
        assert_eq!(essentials.tags, Some(vec!["funny".to_string()]));
        assert_eq!(essentials.has_audio, Some(true));
        assert_eq!(essentials.extra.get("id"), Some(&json!(17)));
        assert!(essentials.extra.get("unrelated").is_none());
        assert_eq!(essentials.score(), Some(&json!("1,234 likes")));
    }

    #[test]
    fn test_extract_image_essentials() {
        let sidecar = json!({
            "image_title": "Sunset",
            "source": "camera",
            "score": 50,
            "tags": ["beach", 7],
            "width": 800,
            "height": 600,
            "duration": 12
        });

        let essentials = extract_essentials(MediaKind::Image, &sidecar);
        assert_eq!(essentials.title.as_deref(), Some("Sunset"));
        assert_eq!(essentials.dimensions, Dimensions::new(800, 600));
        assert_eq!(essentials.duration, None);
        assert_eq!(
            essentials.tags,
            Some(vec!["beach".to_string(), "7".to_string()])
        );
        assert!(essentials.extra.get("score").is_none());
        assert_eq!(essentials.extra.get("source"), Some(&json!("camera")));
    }

    #[test]
    fn test_non_object_sidecar_is_empty() {
        assert!(extract_essentials(MediaKind::Video, &json!([1, 2, 3])).is_empty());
    }

    #[test]
    fn test_metadata_block_includes_canonical_fields() {
        let essentials = Essentials {
            duration: Some(12.0),
            has_audio: Some(false),
            ..Default::default()
        };
        let block = essentials.metadata_block().unwrap();
        assert_eq!(block.get("duration"), Some(&json!(12.0)));
        assert_eq!(block.get("has_audio"), Some(&json!(false)));
        assert!(Essentials::default().metadata_block().is_none());
    }
}
