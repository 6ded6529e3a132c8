//! Public catalog handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use onflix_models::{Content, ContentType, ContentVideo, Episode, PageParams, Paginated, Season};
use onflix_store::{ContentQuery, ContentSortField, SortDirection};

use crate::error::{ApiError, ApiResult};
use crate::services::catalog::{
    rail_limit, CategoryInfo, GenreCount, Suggestion, RAIL_LIMIT_MAX, SUGGESTION_LIMIT_MAX,
};
use crate::services::BackgroundTask;
use crate::state::AppState;

/// Browse filters. Unparseable years are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct BrowseQuery {
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    pub genre: Option<String>,
    pub year: Option<String>,
    pub maturity_rating: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl BrowseQuery {
    /// Translate into a catalog query over published items.
    pub fn into_query(self, base: ContentQuery) -> ApiResult<ContentQuery> {
        let mut query = base;
        if let Some(t) = self.content_type.filter(|t| !t.is_empty()) {
            query = query.content_type(ContentType::parse(&t)?);
        }
        if let Some(genre) = self.genre.filter(|g| !g.is_empty()) {
            query = query.genre(genre);
        }
        if let Some(year) = self.year.and_then(|y| y.trim().parse().ok()) {
            query = query.year(year);
        }
        if let Some(rating) = self.maturity_rating.filter(|r| !r.is_empty()) {
            query = query.maturity_rating(rating);
        }
        let field = ContentSortField::from_str_or_default(self.sort_by.as_deref().unwrap_or_default());
        let direction = self.sort_order.as_deref().and_then(SortDirection::parse);
        Ok(query.sort(field, direction))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<u64>,
}

pub async fn browse_content(
    State(state): State<AppState>,
    Query(filters): Query<BrowseQuery>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Paginated<Content>>> {
    let query = filters.into_query(ContentQuery::new())?;
    Ok(Json(state.catalog.browse(&query, &params).await?))
}

pub async fn featured_content(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Json<Vec<Content>>> {
    let limit = rail_limit(q.limit, 10, RAIL_LIMIT_MAX);
    Ok(Json(state.catalog.featured(limit).await?))
}

pub async fn trending_content(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Json<Vec<Content>>> {
    let limit = rail_limit(q.limit, 20, RAIL_LIMIT_MAX);
    Ok(Json(state.catalog.trending(limit).await?))
}

pub async fn new_releases(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Json<Vec<Content>>> {
    let limit = rail_limit(q.limit, 20, RAIL_LIMIT_MAX);
    Ok(Json(state.catalog.new_releases(limit, Utc::now()).await?))
}

pub async fn originals(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Json<Vec<Content>>> {
    let limit = rail_limit(q.limit, 20, RAIL_LIMIT_MAX);
    Ok(Json(state.catalog.originals(limit).await?))
}

/// Item details. The view counter is bumped in the background.
pub async fn content_details(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
) -> ApiResult<Json<Content>> {
    let content = state.catalog.published(&content_id).await?;
    state.tasks.enqueue(BackgroundTask::IncrementViewCount {
        content_id: content.id.clone(),
    });
    Ok(Json(content))
}

pub async fn similar_content(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Json<Vec<Content>>> {
    let limit = rail_limit(q.limit, 10, SUGGESTION_LIMIT_MAX);
    Ok(Json(state.catalog.similar(&content_id, limit).await?))
}

/// Trailer and teaser videos of an item.
pub async fn trailers(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
) -> ApiResult<Json<Vec<ContentVideo>>> {
    let content = state.catalog.published(&content_id).await?;
    Ok(Json(content.previews().into_iter().cloned().collect()))
}

pub async fn search_content(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Paginated<Content>>> {
    Ok(Json(state.catalog.search(&q.q, &params).await?))
}

pub async fn search_suggestions(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Suggestion>>> {
    let limit = rail_limit(q.limit, 10, SUGGESTION_LIMIT_MAX);
    Ok(Json(state.catalog.suggestions(&q.q, limit).await?))
}

pub async fn genres(State(state): State<AppState>) -> ApiResult<Json<Vec<GenreCount>>> {
    Ok(Json(state.catalog.genres().await?))
}

pub async fn content_by_genre(
    State(state): State<AppState>,
    Path(genre): Path<String>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Paginated<Content>>> {
    Ok(Json(state.catalog.by_genre(&genre, &params).await?))
}

pub async fn categories(State(state): State<AppState>) -> Json<Vec<CategoryInfo>> {
    Json(state.catalog.categories())
}

pub async fn content_by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Json<Vec<Content>>> {
    let limit = rail_limit(q.limit, 20, RAIL_LIMIT_MAX);
    Ok(Json(state.catalog.category(&category, limit).await?))
}

// ============================================================================
// TV shows
// ============================================================================

pub async fn seasons(
    State(state): State<AppState>,
    Path(show_id): Path<String>,
) -> ApiResult<Json<Vec<Season>>> {
    Ok(Json(state.catalog.show(&show_id).await?.seasons))
}

pub async fn season(
    State(state): State<AppState>,
    Path((show_id, season_number)): Path<(String, u32)>,
) -> ApiResult<Json<Season>> {
    Ok(Json(state.catalog.season(&show_id, season_number).await?))
}

pub async fn episodes(
    State(state): State<AppState>,
    Path((show_id, season_number)): Path<(String, u32)>,
) -> ApiResult<Json<Vec<Episode>>> {
    Ok(Json(state.catalog.season(&show_id, season_number).await?.episodes))
}

pub async fn episode(
    State(state): State<AppState>,
    Path((show_id, season_number, episode_number)): Path<(String, u32, u32)>,
) -> ApiResult<Json<Episode>> {
    state
        .catalog
        .season(&show_id, season_number)
        .await?
        .episode(episode_number)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Episode not found"))
}
