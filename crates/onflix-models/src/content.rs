//! Content catalog: movies, shows, seasons, episodes and their videos.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Kind of catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Movie,
    TvShow,
}

impl ContentType {
    pub fn parse(s: &str) -> ModelResult<Self> {
        match s.to_lowercase().as_str() {
            "movie" => Ok(Self::Movie),
            "tv_show" => Ok(Self::TvShow),
            other => Err(ModelError::unknown("content type", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::TvShow => "tv_show",
        }
    }
}

/// Publication status. Only `published` items are visible outside admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl ContentStatus {
    pub fn parse(s: &str) -> ModelResult<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "archived" => Ok(Self::Archived),
            other => Err(ModelError::unknown("content status", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }
}

/// Kind of video attached to a catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    Trailer,
    Teaser,
    Full,
    Clip,
}

impl VideoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trailer => "trailer",
            Self::Teaser => "teaser",
            Self::Full => "full",
            Self::Clip => "clip",
        }
    }

    /// Trailers and teasers are free to watch.
    pub fn is_preview(&self) -> bool {
        matches!(self, Self::Trailer | Self::Teaser)
    }
}

/// Encoded video quality. Ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum VideoQuality {
    #[serde(rename = "480p")]
    Q480p,
    #[serde(rename = "720p")]
    Q720p,
    #[serde(rename = "1080p")]
    Q1080p,
    #[serde(rename = "4k", alias = "4K")]
    Q4k,
}

impl VideoQuality {
    pub fn parse(s: &str) -> ModelResult<Self> {
        match s.to_lowercase().as_str() {
            "480p" => Ok(Self::Q480p),
            "720p" => Ok(Self::Q720p),
            "1080p" => Ok(Self::Q1080p),
            "4k" | "2160p" => Ok(Self::Q4k),
            other => Err(ModelError::unknown("video quality", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Q480p => "480p",
            Self::Q720p => "720p",
            Self::Q1080p => "1080p",
            Self::Q4k => "4k",
        }
    }
}

impl std::fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CastMember {
    pub name: String,
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub profile_path: String,
    #[serde(default)]
    pub order: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContentImages {
    #[serde(default)]
    pub poster_path: String,
    #[serde(default)]
    pub backdrop_path: String,
    #[serde(default)]
    pub logo_path: String,
    #[serde(default)]
    pub screenshots: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Subtitle {
    pub language: String,
    pub label: String,
    pub file_url: String,
}

/// A playable video file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContentVideo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub video_type: VideoType,
    pub quality: VideoQuality,
    /// Duration in seconds.
    #[serde(default)]
    pub duration: u32,
    /// Object path relative to the CDN base.
    pub file_url: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub subtitles: Vec<Subtitle>,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Episode {
    pub id: String,
    pub episode_number: u32,
    pub name: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub still_path: String,
    #[serde(default)]
    pub air_date: Option<DateTime<Utc>>,
    /// Runtime in minutes.
    #[serde(default)]
    pub runtime: u32,
    #[serde(default)]
    pub videos: Vec<ContentVideo>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Season {
    pub id: String,
    pub season_number: u32,
    pub name: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub poster_path: String,
    #[serde(default)]
    pub air_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub episodes: Vec<Episode>,
    pub created_at: DateTime<Utc>,
}

impl Season {
    pub fn episode(&self, number: u32) -> Option<&Episode> {
        self.episodes.iter().find(|e| e.episode_number == number)
    }
}

/// A catalog item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Content {
    pub id: String,
    #[serde(default)]
    pub tmdb_id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub original_title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,
    /// Runtime in minutes.
    #[serde(default)]
    pub runtime: u32,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub maturity_rating: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub cast: Vec<CastMember>,
    #[serde(default)]
    pub director: Vec<String>,
    #[serde(default)]
    pub producer: Vec<String>,
    #[serde(default)]
    pub writer: Vec<String>,
    #[serde(default)]
    pub images: ContentImages,
    #[serde(default)]
    pub videos: Vec<ContentVideo>,
    #[serde(default)]
    pub seasons: Vec<Season>,
    #[serde(default)]
    pub status: ContentStatus,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub is_original: bool,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Content {
    pub fn is_published(&self) -> bool {
        self.status == ContentStatus::Published
    }

    /// Trailers and teasers.
    pub fn previews(&self) -> Vec<&ContentVideo> {
        self.videos
            .iter()
            .filter(|v| v.video_type.is_preview())
            .collect()
    }

    pub fn season(&self, number: u32) -> Option<&Season> {
        self.seasons.iter().find(|s| s.season_number == number)
    }

    pub fn episode(&self, season: u32, episode: u32) -> Option<&Episode> {
        self.season(season).and_then(|s| s.episode(episode))
    }
}

/// Pick the highest-quality full-length video from `videos`.
pub fn best_full_video(videos: &[ContentVideo]) -> Option<&ContentVideo> {
    videos
        .iter()
        .filter(|v| v.video_type == VideoType::Full)
        .max_by_key(|v| (v.quality, v.is_default))
}

/// Pick the full-length video encoded at exactly `quality`.
pub fn full_video_at(videos: &[ContentVideo], quality: VideoQuality) -> Option<&ContentVideo> {
    videos
        .iter()
        .find(|v| v.video_type == VideoType::Full && v.quality == quality)
}
