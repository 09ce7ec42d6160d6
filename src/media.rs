//! Display model shared by every feed plus the normaliser that builds it from
//! raw Pexels video records.
//!
//! Upstream payloads are only loosely trusted: every field on the raw structs
//! defaults when missing so a partially filled record still produces a usable
//! card.

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One rendition of a video as listed under `video_files`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VideoFile {
    pub id: u64,
    pub quality: Option<String>,
    pub file_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub link: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VideoPicture {
    pub id: u64,
    pub picture: String,
    pub nr: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VideoUser {
    pub id: u64,
    pub name: String,
    pub url: String,
}

/// Video record as returned by the upstream `videos/*` endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpstreamVideo {
    pub id: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub url: String,
    pub image: String,
    #[serde(deserialize_with = "lenient_duration")]
    pub duration: Option<i64>,
    pub user: Option<VideoUser>,
    #[serde(deserialize_with = "string_tags")]
    pub tags: Vec<String>,
    pub video_files: Vec<VideoFile>,
    pub video_pictures: Vec<VideoPicture>,
}

/// Normalised unit rendered by cards, carousels and the watch page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default = "zero_duration", alias = "duration")]
    pub duration_display: String,
    #[serde(default, alias = "image")]
    pub image_url: String,
    #[serde(default)]
    pub playback_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub page_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl MediaItem {
    /// Bare item carrying only an id; every display field is empty.
    pub fn with_id(id: u64) -> Self {
        Self {
            id,
            title: String::new(),
            description: String::new(),
            duration_seconds: 0,
            duration_display: zero_duration(),
            image_url: String::new(),
            playback_url: String::new(),
            page_url: String::new(),
            author: None,
            views: None,
            uploaded_at: None,
            tags: Vec::new(),
        }
    }
}

fn zero_duration() -> String {
    format_duration(0)
}

/// Caller supplied display metadata used when upstream has no title or
/// description for a slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderMeta {
    pub title: String,
    pub description: String,
    pub views: Option<String>,
    pub uploaded_at: Option<String>,
}

impl PlaceholderMeta {
    fn new(title: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            views: None,
            uploaded_at: None,
        }
    }

    fn views(mut self, views: &str) -> Self {
        self.views = Some(views.to_string());
        self
    }

    fn uploaded(mut self, uploaded_at: &str) -> Self {
        self.uploaded_at = Some(uploaded_at.to_string());
        self
    }
}

/// Catalogue entries used for the home page "Trending Now" rows.
pub fn trending_placeholders() -> Vec<PlaceholderMeta> {
    vec![
        PlaceholderMeta::new(
            "The Future of AI",
            "Explore the advancements and impact of artificial intelligence in modern society.",
        )
        .views("2.1M"),
        PlaceholderMeta::new(
            "Amazing Nature Documentary",
            "A breathtaking journey through the wonders of the natural world.",
        )
        .uploaded("1 week ago"),
        PlaceholderMeta::new(
            "Cooking Masterclass",
            "Learn gourmet recipes and cooking techniques from top chefs.",
        )
        .uploaded("3 days ago"),
        PlaceholderMeta::new(
            "Space Exploration 2024",
            "Discover the latest missions and discoveries in space exploration.",
        )
        .uploaded("5 days ago"),
        PlaceholderMeta::new(
            "Music Production Tips",
            "Essential tips and tricks for aspiring music producers.",
        )
        .uploaded("1 day ago"),
        PlaceholderMeta::new(
            "Ultimate Fitness Guide",
            "Your complete guide to achieving fitness goals and healthy living.",
        )
        .uploaded("2 days ago"),
        PlaceholderMeta::new(
            "Travel Vlog: Japan Adventure",
            "Experience the culture, food, and sights of Japan in this travel vlog.",
        )
        .views("980K"),
        PlaceholderMeta::new(
            "Beginner Yoga Routine",
            "A gentle yoga routine perfect for beginners.",
        )
        .uploaded("4 days ago"),
        PlaceholderMeta::new(
            "Top 10 Coding Tricks",
            "Boost your productivity with these top coding tricks.",
        )
        .views("1.3M"),
        PlaceholderMeta::new(
            "Wildlife Photography Secrets",
            "Professional tips for capturing stunning wildlife photos.",
        )
        .uploaded("6 days ago"),
    ]
}

/// Hero carousel slots all share the same copy.
pub fn featured_placeholder(slots: usize) -> Vec<PlaceholderMeta> {
    let meta = PlaceholderMeta::new(
        "Featured Video",
        "Discover amazing content from talented creators around the world. Watch exclusive videos and explore trending topics.",
    );
    vec![meta; slots]
}

/// Formats a raw second count as `M:SS`, or `H:MM:SS` from one hour up.
/// Zero and negative values render as `00:00`.
pub fn format_duration(seconds: i64) -> String {
    if seconds <= 0 {
        return "00:00".to_string();
    }
    let hours = seconds / 3600;
    let remainder = seconds % 60;
    if hours > 0 {
        let minutes = (seconds % 3600) / 60;
        format!("{hours}:{minutes:02}:{remainder:02}")
    } else {
        let minutes = seconds / 60;
        format!("{minutes}:{remainder:02}")
    }
}

/// Builds a display item from an upstream record. `index` selects the
/// placeholder entry; an exhausted list leaves title and description empty.
pub fn normalize(raw: &UpstreamVideo, index: usize, fallback: &[PlaceholderMeta]) -> MediaItem {
    let meta = fallback.get(index);
    let duration = raw.duration.unwrap_or(0);
    let author = raw
        .user
        .as_ref()
        .map(|user| user.name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    MediaItem {
        id: raw.id,
        title: meta.map(|meta| meta.title.clone()).unwrap_or_default(),
        description: meta.map(|meta| meta.description.clone()).unwrap_or_default(),
        duration_seconds: duration.max(0) as u64,
        duration_display: format_duration(duration),
        image_url: pick_image(raw),
        playback_url: pick_playback_url(raw),
        page_url: raw.url.clone(),
        author,
        views: meta.and_then(|meta| meta.views.clone()),
        uploaded_at: meta.and_then(|meta| meta.uploaded_at.clone()),
        tags: raw.tags.clone(),
    }
}

/// Normalises the `videos` array of a passthrough payload. Anything that is
/// not a list of objects yields an empty feed; individual records that fail
/// to decode are skipped.
pub fn normalize_feed(payload: &Value, fallback: &[PlaceholderMeta]) -> Vec<MediaItem> {
    let Some(videos) = payload.get("videos").and_then(Value::as_array) else {
        return Vec::new();
    };
    videos
        .iter()
        .filter_map(|video| UpstreamVideo::deserialize(video).ok())
        .enumerate()
        .map(|(index, video)| normalize(&video, index, fallback))
        .collect()
}

/// Decodes a single upstream video payload (as served by `videos/videos/{id}`).
pub fn normalize_single(payload: &Value) -> Option<MediaItem> {
    let video = UpstreamVideo::deserialize(payload).ok()?;
    if video.id == 0 {
        return None;
    }
    Some(normalize(&video, 0, &[]))
}

fn pick_image(raw: &UpstreamVideo) -> String {
    if !raw.image.trim().is_empty() {
        return raw.image.clone();
    }
    raw.video_pictures
        .iter()
        .min_by_key(|picture| picture.nr)
        .map(|picture| picture.picture.clone())
        .unwrap_or_default()
}

fn pick_playback_url(raw: &UpstreamVideo) -> String {
    let mp4 = |file: &&VideoFile| {
        !file.link.is_empty() && file.file_type.as_deref().is_none_or(|kind| kind == "video/mp4")
    };
    let hd = raw
        .video_files
        .iter()
        .filter(mp4)
        .filter(|file| file.quality.as_deref() == Some("hd"))
        .max_by_key(|file| file.width.unwrap_or(0));
    let best = hd.or_else(|| {
        raw.video_files
            .iter()
            .filter(mp4)
            .max_by_key(|file| file.width.unwrap_or(0))
    });
    best.map(|file| file.link.clone())
        .unwrap_or_else(|| raw.url.clone())
}

/// How missing view counts are handled on a feed. Fabricated values are
/// synthetic placeholders, not telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewsPolicy {
    #[default]
    Fabricate,
    Omit,
}

pub fn apply_views_policy(items: &mut [MediaItem], policy: ViewsPolicy) {
    if policy == ViewsPolicy::Omit {
        return;
    }
    for item in items.iter_mut().filter(|item| item.views.is_none()) {
        item.views = Some(synthetic_views(OsRng.next_u32()));
    }
}

/// Maps a random draw onto `1.0k..=10.0k`.
fn synthetic_views(draw: u32) -> String {
    let tenths = 10 + draw % 91;
    format!("{}.{}k", tenths / 10, tenths % 10)
}

fn lenient_duration<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.floor() as i64)),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }))
}

fn string_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(entries)) = value else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(tag) if !tag.trim().is_empty() => Some(tag),
            Value::Object(map) => map
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect())
}
