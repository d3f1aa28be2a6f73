use super::{Dimensions, MediaItem, MediaKind, TagCount};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

static FIRST_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid integer regex"));

/// Everything tag derivation looks at for one item.
#[derive(Debug, Clone, Copy)]
pub struct TagInput<'a> {
    pub kind: MediaKind,
    pub dimensions: Option<Dimensions>,
    pub score: Option<&'a Value>,
    pub duration: Option<f64>,
    pub has_audio: Option<bool>,
    pub existing: &'a [String],
}

/// Derives the sorted, deduplicated tag list for one item.
///
/// Duration and audio buckets only apply to videos; the audio tag is
/// omitted when presence is unknown.
pub fn generate_tags(input: &TagInput<'_>) -> Vec<String> {
    let mut tags: BTreeSet<String> = input.existing.iter().cloned().collect();
    tags.insert(input.kind.as_str().to_string());

    if let Some(dims) = input.dimensions {
        tags.insert(orientation_tag(dims).to_string());
        if let Some(bucket) = resolution_bucket(dims) {
            tags.insert(bucket.to_string());
        }
    }

    if let Some(bucket) = input.score.and_then(score_bucket) {
        tags.insert(bucket.to_string());
    }

    if input.kind == MediaKind::Video {
        if let Some(seconds) = input.duration {
            tags.insert(length_bucket(seconds).to_string());
        }
        match input.has_audio {
            Some(true) => {
                tags.insert("audio/yes".to_string());
            }
            Some(false) => {
                tags.insert("audio/no".to_string());
            }
            None => {}
        }
    }

    tags.into_iter().collect()
}

pub fn orientation_tag(dims: Dimensions) -> &'static str {
    match dims.width.cmp(&dims.height) {
        std::cmp::Ordering::Equal => "square",
        std::cmp::Ordering::Greater => "horizontal",
        std::cmp::Ordering::Less => "vertical",
    }
}

pub fn resolution_bucket(dims: Dimensions) -> Option<&'static str> {
    let pixels = dims.width as u64 * dims.height as u64;
    if pixels >= 3840 * 2160 {
        Some("4K")
    } else if pixels >= 1920 * 1080 {
        Some("1080+")
    } else if pixels >= 1280 * 720 {
        Some("720+")
    } else {
        None
    }
}

/// Buckets the first integer found in a numeric or textual score.
pub fn score_bucket(score: &Value) -> Option<&'static str> {
    let value = match score {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => FIRST_INTEGER.find(s)?.as_str().parse::<i64>().ok()?,
        _ => return None,
    };

    Some(if value >= 10_000 {
        "score/ultra"
    } else if value >= 1_000 {
        "score/high"
    } else if value >= 100 {
        "score/med"
    } else {
        "score/low"
    })
}

pub fn length_bucket(seconds: f64) -> &'static str {
    if seconds < 10.0 {
        "len/<10s"
    } else if seconds < 30.0 {
        "len/10-30s"
    } else if seconds < 60.0 {
        "len/30-60s"
    } else {
        "len/60s+"
    }
}

/// Tag histogram over listing items, ordered by name ignoring case.
pub fn count_tags(items: &[MediaItem]) -> Vec<TagCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for tag in items.iter().flat_map(|item| item.tags.iter()) {
        *counts.entry(tag.as_str()).or_default() += 1;
    }

    let mut histogram: Vec<TagCount> = counts
        .into_iter()
        .map(|(name, count)| TagCount {
            name: name.to_string(),
            count,
        })
        .collect();
    histogram.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(kind: MediaKind) -> TagInput<'static> {
        TagInput {
            kind,
            dimensions: None,
            score: None,
            duration: None,
            has_audio: None,
            existing: &[],
        }
    }

    #[test]
    fn test_image_tags_are_sorted_and_unique() {
        let existing = vec!["b".to_string(), "a".to_string(), "image".to_string()];
        let tags = generate_tags(&TagInput {
            dimensions: Dimensions::new(1920, 1080),
            existing: &existing,
            ..input(MediaKind::Image)
        });

        assert_eq!(tags, vec!["1080+", "a", "b", "horizontal", "image"]);
    }

    #[test]
    fn test_video_tags_include_length_and_audio() {
        let score = json!("1234 views");
        let tags = generate_tags(&TagInput {
            dimensions: Dimensions::new(720, 1280),
            score: Some(&score),
            duration: Some(42.0),
            has_audio: Some(false),
            ..input(MediaKind::Video)
        });

        assert_eq!(
            tags,
            vec!["720+", "audio/no", "len/30-60s", "score/high", "vertical", "video"]
        );
    }

    #[test]
    fn test_unknown_audio_and_dimensions_add_nothing() {
        let tags = generate_tags(&input(MediaKind::Video));
        assert_eq!(tags, vec!["video"]);
    }

    #[test]
    fn test_image_ignores_duration_and_audio() {
        let tags = generate_tags(&TagInput {
            duration: Some(5.0),
            has_audio: Some(true),
            ..input(MediaKind::Image)
        });
        assert_eq!(tags, vec!["image"]);
    }

    #[test]
    fn test_buckets() {
        assert_eq!(orientation_tag(Dimensions::new(500, 500).unwrap()), "square");
        assert_eq!(
            resolution_bucket(Dimensions::new(3840, 2160).unwrap()),
            Some("4K")
        );
        assert_eq!(resolution_bucket(Dimensions::new(640, 480).unwrap()), None);
        assert_eq!(score_bucket(&json!(10_000)), Some("score/ultra"));
        assert_eq!(score_bucket(&json!(150.9)), Some("score/med"));
        assert_eq!(score_bucket(&json!("7 points")), Some("score/low"));
        assert_eq!(score_bucket(&json!("none")), None);
        assert_eq!(length_bucket(9.99), "len/<10s");
        assert_eq!(length_bucket(10.0), "len/10-30s");
        assert_eq!(length_bucket(60.0), "len/60s+");
    }

    #[test]
    fn test_count_tags_orders_case_insensitively() {
        let item = |tags: &[&str]| MediaItem {
            kind: MediaKind::Image,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            filename: "x.jpg".to_string(),
            size: 1,
            title: "x".to_string(),
            modified: chrono::Utc::now(),
            width: 1,
            height: 1,
            aspect_ratio: 1.0,
            duration_seconds: None,
            metadata: None,
        };

        let histogram = count_tags(&[item(&["image", "Beach"]), item(&["image", "apple"])]);
        let pairs: Vec<_> = histogram
            .iter()
            .map(|t| (t.name.as_str(), t.count))
            .collect();
        assert_eq!(pairs, vec![("apple", 1), ("Beach", 1), ("image", 2)]);
    }
}
