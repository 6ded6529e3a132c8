//! Content catalog query building.
//!
//! Turns browse/search parameters into a [`Filter`] plus [`FindOptions`]
//! against the `content` collection. Non-admin callers only ever see
//! published items.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, TimeZone, Utc};
use regex_lite::Regex;
use thiserror::Error;

use onflix_models::{ContentStatus, ContentType};

use crate::filter::{Filter, FindOptions, SortDirection};

/// Fields searched by free-text queries.
pub const SEARCH_FIELDS: [&str; 7] = [
    "title",
    "original_title",
    "description",
    "cast.name",
    "director",
    "genres",
    "keywords",
];

/// Rating threshold of the top-rated category.
pub const TOP_RATED_MIN_RATING: f64 = 7.0;

/// Window of the new-releases rail.
pub const NEW_RELEASE_DAYS: i64 = 30;

static SEARCH_QUERY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\s\-\.\,\!\?]+$").expect("valid search regex"));

// ============================================================================
// Sort Configuration
// ============================================================================

/// Supported sort fields for catalog queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentSortField {
    /// Sort by creation date (default)
    #[default]
    CreatedAt,
    Title,
    Rating,
    ReleaseDate,
    ViewCount,
}

impl ContentSortField {
    /// Parse from string, returning default if invalid.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "title" => Self::Title,
            "rating" => Self::Rating,
            "release_date" | "year" => Self::ReleaseDate,
            "view_count" | "popularity" => Self::ViewCount,
            _ => Self::CreatedAt,
        }
    }

    /// Document field this sort key orders by.
    pub const fn field(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Title => "title",
            Self::Rating => "rating",
            Self::ReleaseDate => "release_date",
            Self::ViewCount => "view_count",
        }
    }

    /// Direction used when the caller does not pick one.
    pub const fn default_direction(&self) -> SortDirection {
        match self {
            Self::Title => SortDirection::Ascending,
            _ => SortDirection::Descending,
        }
    }
}

// ============================================================================
// Search validation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchQueryError {
    #[error("Search query is required")]
    Empty,

    #[error("Search query must be between 2 and 100 characters")]
    Length,

    #[error("Search query contains invalid characters")]
    InvalidCharacters,
}

/// Validate and trim a free-text search query.
pub fn validate_search_query(raw: &str) -> Result<String, SearchQueryError> {
    let query = raw.trim();
    if query.is_empty() {
        return Err(SearchQueryError::Empty);
    }
    let len = query.chars().count();
    if !(2..=100).contains(&len) {
        return Err(SearchQueryError::Length);
    }
    if !SEARCH_QUERY_PATTERN.is_match(query) {
        return Err(SearchQueryError::InvalidCharacters);
    }
    Ok(query.to_string())
}

// ============================================================================
// Query builder
// ============================================================================

/// Catalog query parameters.
#[derive(Debug, Clone, Default)]
pub struct ContentQuery {
    pub content_type: Option<ContentType>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub maturity_rating: Option<String>,
    pub search: Option<String>,
    pub sort: ContentSortField,
    pub direction: Option<SortDirection>,
    /// Restrict to one status. Only honoured for admin queries.
    pub status: Option<ContentStatus>,
    pub include_unpublished: bool,
}

impl ContentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admin listing across every status.
    pub fn admin() -> Self {
        Self {
            include_unpublished: true,
            ..Self::default()
        }
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn maturity_rating(mut self, rating: impl Into<String>) -> Self {
        self.maturity_rating = Some(rating.into());
        self
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    pub fn sort(mut self, field: ContentSortField, direction: Option<SortDirection>) -> Self {
        self.sort = field;
        self.direction = direction;
        self
    }

    pub fn filter(&self) -> Filter {
        let mut parts = Vec::new();

        match (self.include_unpublished, self.status) {
            (true, Some(status)) => parts.push(Filter::eq("status", status)),
            (true, None) => {}
            (false, _) => parts.push(Filter::eq("status", ContentStatus::Published)),
        }

        if let Some(t) = self.content_type {
            parts.push(Filter::eq("type", t));
        }
        if let Some(genre) = &self.genre {
            parts.push(Filter::is_in("genres", [genre.as_str()]));
        }
        if let Some((start, end)) = self.year.and_then(year_bounds) {
            parts.push(Filter::gte("release_date", start));
            parts.push(Filter::lt("release_date", end));
        }
        if let Some(rating) = &self.maturity_rating {
            parts.push(Filter::eq("maturity_rating", rating.as_str()));
        }
        if let Some(q) = &self.search {
            parts.push(search_filter(q));
        }

        Filter::and(parts)
    }

    /// Search results rank by popularity, everything else by the chosen key.
    pub fn options(&self) -> FindOptions {
        if self.search.is_some() {
            return popularity_order();
        }
        let direction = self.direction.unwrap_or(self.sort.default_direction());
        FindOptions::new().sort_by(self.sort.field(), direction)
    }
}

fn year_bounds(year: i32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
    let end = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?;
    Some((start, end))
}

/// Case-insensitive substring match across every searchable field.
pub fn search_filter(query: &str) -> Filter {
    Filter::or(SEARCH_FIELDS.iter().map(|f| Filter::contains(f, query)))
}

fn published() -> Filter {
    Filter::eq("status", ContentStatus::Published)
}

fn popularity_order() -> FindOptions {
    FindOptions::new()
        .sort_by("view_count", SortDirection::Descending)
        .sort_by("rating", SortDirection::Descending)
}

fn rating_order() -> FindOptions {
    FindOptions::new()
        .sort_by("rating", SortDirection::Descending)
        .sort_by("view_count", SortDirection::Descending)
}

// ============================================================================
// Fixed rails
// ============================================================================

/// Same type, at least one shared genre, excluding the source item.
pub fn similar(source_id: &str, content_type: ContentType, genres: &[String]) -> (Filter, FindOptions) {
    let filter = Filter::and([
        published(),
        Filter::ne("id", source_id),
        Filter::eq("type", content_type),
        Filter::is_in("genres", genres.iter().map(String::as_str)),
    ]);
    (filter, rating_order())
}

pub fn featured() -> (Filter, FindOptions) {
    (
        published().with(Filter::eq("is_featured", true)),
        FindOptions::new().sort_by("created_at", SortDirection::Descending),
    )
}

pub fn trending() -> (Filter, FindOptions) {
    (
        published(),
        FindOptions::new()
            .sort_by("view_count", SortDirection::Descending)
            .sort_by("created_at", SortDirection::Descending),
    )
}

/// Released within the last [`NEW_RELEASE_DAYS`] days.
pub fn new_releases(now: DateTime<Utc>) -> (Filter, FindOptions) {
    (
        published().with(Filter::gte("release_date", now - Duration::days(NEW_RELEASE_DAYS))),
        FindOptions::new().sort_by("release_date", SortDirection::Descending),
    )
}

pub fn originals() -> (Filter, FindOptions) {
    (
        published().with(Filter::eq("is_original", true)),
        FindOptions::new().sort_by("created_at", SortDirection::Descending),
    )
}

pub fn by_genre(genre: &str) -> (Filter, FindOptions) {
    (
        published().with(Filter::is_in("genres", [genre])),
        rating_order(),
    )
}

/// Title-prefix suggestions.
pub fn suggestions(prefix: &str) -> (Filter, FindOptions) {
    (
        published().with(Filter::starts_with("title", prefix)),
        FindOptions::new().sort_by("view_count", SortDirection::Descending),
    )
}

/// Predefined browse categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogCategory {
    Trending,
    New,
    TopRated,
    Recent,
}

impl CatalogCategory {
    pub const ALL: [CatalogCategory; 4] = [
        CatalogCategory::Trending,
        CatalogCategory::New,
        CatalogCategory::TopRated,
        CatalogCategory::Recent,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trending" => Some(Self::Trending),
            "new" => Some(Self::New),
            "top_rated" => Some(Self::TopRated),
            "recent" => Some(Self::Recent),
            _ => None,
        }
    }

    pub const fn key(&self) -> &'static str {
        match self {
            Self::Trending => "trending",
            Self::New => "new",
            Self::TopRated => "top_rated",
            Self::Recent => "recent",
        }
    }

    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Trending => "Trending Now",
            Self::New => "New Releases",
            Self::TopRated => "Top Rated",
            Self::Recent => "Recently Added",
        }
    }

    pub fn query(&self) -> (Filter, FindOptions) {
        match self {
            Self::Trending => (
                published(),
                FindOptions::new().sort_by("view_count", SortDirection::Descending),
            ),
            Self::New => (
                published(),
                FindOptions::new().sort_by("release_date", SortDirection::Descending),
            ),
            Self::TopRated => (
                published().with(Filter::gte("rating", TOP_RATED_MIN_RATING)),
                FindOptions::new().sort_by("rating", SortDirection::Descending),
            ),
            Self::Recent => (
                published(),
                FindOptions::new().sort_by("created_at", SortDirection::Descending),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, status: &str, genres: &[&str]) -> serde_json::Value {
        json!({
            "id": id,
            "title": "Night Shift",
            "type": "movie",
            "status": status,
            "genres": genres,
            "cast": [{"name": "Mira Lane"}],
            "release_date": "2019-07-04T00:00:00Z",
            "rating": 7.2
        })
    }

    #[test]
    fn test_sort_field_parsing() {
        assert_eq!(ContentSortField::from_str_or_default("rating"), ContentSortField::Rating);
        assert_eq!(ContentSortField::from_str_or_default("bogus"), ContentSortField::CreatedAt);
        assert_eq!(ContentSortField::Title.default_direction(), SortDirection::Ascending);
        assert_eq!(ContentSortField::ViewCount.default_direction(), SortDirection::Descending);
    }

    #[test]
    fn test_public_queries_hide_drafts() {
        let q = ContentQuery::new();
        assert!(q.filter().matches(&doc("a", "published", &["Drama"])));
        assert!(!q.filter().matches(&doc("a", "draft", &["Drama"])));

        let admin = ContentQuery::admin();
        assert!(admin.filter().matches(&doc("a", "draft", &["Drama"])));
    }

    #[test]
    fn test_year_and_genre_filters() {
        let q = ContentQuery::new().genre("Drama").year(2019);
        assert!(q.filter().matches(&doc("a", "published", &["Drama"])));
        assert!(!ContentQuery::new().year(2020).filter().matches(&doc("a", "published", &["Drama"])));
        assert!(!ContentQuery::new().genre("Horror").filter().matches(&doc("a", "published", &["Drama"])));
    }

    #[test]
    fn test_search_matches_cast_and_ranks_by_popularity() {
        let q = ContentQuery::new().search("mira");
        assert!(q.filter().matches(&doc("a", "published", &[])));
        assert_eq!(q.options().sort[0].0, "view_count");

        let miss = ContentQuery::new().search("zzz");
        assert!(!miss.filter().matches(&doc("a", "published", &[])));
    }

    #[test]
    fn test_explicit_direction_wins() {
        let q = ContentQuery::new().sort(ContentSortField::Title, Some(SortDirection::Descending));
        assert_eq!(q.options().sort, vec![("title".to_string(), SortDirection::Descending)]);
        let q = ContentQuery::new().sort(ContentSortField::Title, None);
        assert_eq!(q.options().sort[0].1, SortDirection::Ascending);
    }

    #[test]
    fn test_similar_excludes_source() {
        let (filter, options) = similar("a", ContentType::Movie, &["Drama".to_string()]);
        assert!(!filter.matches(&doc("a", "published", &["Drama"])));
        assert!(filter.matches(&doc("b", "published", &["Drama", "Comedy"])));
        assert!(!filter.matches(&doc("c", "published", &["Comedy"])));
        assert_eq!(options.sort[0].0, "rating");
    }

    #[test]
    fn test_top_rated_threshold() {
        let (filter, _) = CatalogCategory::TopRated.query();
        assert!(filter.matches(&doc("a", "published", &[])));
        let mut low = doc("b", "published", &[]);
        low["rating"] = json!(6.9);
        assert!(!filter.matches(&low));
        assert_eq!(CatalogCategory::parse("continue"), None);
    }

    #[test]
    fn test_validate_search_query() {
        assert_eq!(validate_search_query("  star wars ").unwrap(), "star wars");
        assert_eq!(validate_search_query("a"), Err(SearchQueryError::Length));
        assert_eq!(validate_search_query(""), Err(SearchQueryError::Empty));
        assert_eq!(
            validate_search_query("drop;table"),
            Err(SearchQueryError::InvalidCharacters)
        );
        assert!(validate_search_query(&"x".repeat(101)).is_err());
        assert!(validate_search_query("what's up?").is_err());
        assert!(validate_search_query("hello, world!").is_ok());
    }
}
