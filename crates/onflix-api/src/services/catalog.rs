//! Public catalog reads.

use chrono::{DateTime, Utc};
use serde::Serialize;

use onflix_models::{Content, ContentStatus, ContentType, PageParams, Paginated, Season};
use onflix_store::content_query::{self, CatalogCategory};
use onflix_store::{validate_search_query, ContentQuery, Filter, FindOptions, Repositories};

use crate::error::{ApiError, ApiResult};

/// Upper bound for fixed rails (featured, trending, ...).
pub const RAIL_LIMIT_MAX: u64 = 50;
/// Upper bound for similar titles and search suggestions.
pub const SUGGESTION_LIMIT_MAX: u64 = 20;

/// Requested rail size, defaulted and capped.
pub fn rail_limit(requested: Option<u64>, default: u64, max: u64) -> u64 {
    requested.unwrap_or(default).clamp(1, max)
}

#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenreCount {
    pub genre: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryInfo {
    pub key: &'static str,
    pub name: &'static str,
}

#[derive(Clone)]
pub struct CatalogService {
    repos: Repositories,
}

impl CatalogService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn browse(
        &self,
        query: &ContentQuery,
        params: &PageParams,
    ) -> ApiResult<Paginated<Content>> {
        Ok(self
            .repos
            .content
            .page(&query.filter(), query.options(), params)
            .await?)
    }

    pub async fn rail(&self, (filter, options): (Filter, FindOptions), limit: u64) -> ApiResult<Vec<Content>> {
        Ok(self
            .repos
            .content
            .find(&filter, &options.limit(limit))
            .await?)
    }

    pub async fn featured(&self, limit: u64) -> ApiResult<Vec<Content>> {
        self.rail(content_query::featured(), limit).await
    }

    pub async fn trending(&self, limit: u64) -> ApiResult<Vec<Content>> {
        self.rail(content_query::trending(), limit).await
    }

    pub async fn new_releases(&self, limit: u64, now: DateTime<Utc>) -> ApiResult<Vec<Content>> {
        self.rail(content_query::new_releases(now), limit).await
    }

    pub async fn originals(&self, limit: u64) -> ApiResult<Vec<Content>> {
        self.rail(content_query::originals(), limit).await
    }

    /// A published item.
    pub async fn published(&self, id: &str) -> ApiResult<Content> {
        self.repos
            .content
            .get_published(id)
            .await?
            .ok_or_else(|| ApiError::not_found("Content not found"))
    }

    /// A published TV show.
    pub async fn show(&self, id: &str) -> ApiResult<Content> {
        let content = self.published(id).await?;
        if content.content_type != ContentType::TvShow {
            return Err(ApiError::not_found("TV show not found"));
        }
        Ok(content)
    }

    pub async fn season(&self, show_id: &str, number: u32) -> ApiResult<Season> {
        self.show(show_id)
            .await?
            .season(number)
            .cloned()
            .ok_or_else(|| ApiError::not_found("Season not found"))
    }

    pub async fn similar(&self, id: &str, limit: u64) -> ApiResult<Vec<Content>> {
        let source = self.published(id).await?;
        if source.genres.is_empty() {
            return Ok(Vec::new());
        }
        self.rail(
            content_query::similar(&source.id, source.content_type, &source.genres),
            limit,
        )
        .await
    }

    /// Full-text search. Malformed queries are rejected before touching the store.
    pub async fn search(&self, raw: &str, params: &PageParams) -> ApiResult<Paginated<Content>> {
        let query = validate_search_query(raw).map_err(|e| ApiError::bad_request(e.to_string()))?;
        self.browse(&ContentQuery::new().search(query), params).await
    }

    /// Title-prefix matches. Prefixes shorter than two characters match nothing.
    pub async fn suggestions(&self, prefix: &str, limit: u64) -> ApiResult<Vec<Suggestion>> {
        let prefix = prefix.trim();
        if prefix.chars().count() < 2 {
            return Ok(Vec::new());
        }
        let items = self.rail(content_query::suggestions(prefix), limit).await?;
        Ok(items
            .into_iter()
            .map(|c| Suggestion {
                id: c.id,
                title: c.title,
                content_type: c.content_type,
            })
            .collect())
    }

    /// Published items per genre, most populated first.
    pub async fn genres(&self) -> ApiResult<Vec<GenreCount>> {
        let published = Filter::eq("status", ContentStatus::Published);
        let groups = self.repos.content.group_count(&published, "genres").await?;
        Ok(groups
            .into_iter()
            .filter_map(|g| {
                g.key.as_str().map(|genre| GenreCount {
                    genre: genre.to_string(),
                    count: g.count,
                })
            })
            .collect())
    }

    pub async fn by_genre(&self, genre: &str, params: &PageParams) -> ApiResult<Paginated<Content>> {
        let (filter, options) = content_query::by_genre(genre);
        Ok(self.repos.content.page(&filter, options, params).await?)
    }

    pub fn categories(&self) -> Vec<CategoryInfo> {
        CatalogCategory::ALL
            .iter()
            .map(|c| CategoryInfo {
                key: c.key(),
                name: c.display_name(),
            })
            .collect()
    }

    pub async fn category(&self, key: &str, limit: u64) -> ApiResult<Vec<Content>> {
        let category = CatalogCategory::parse(key)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid category: {}", key)))?;
        self.rail(category.query(), limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rail_limit() {
        assert_eq!(rail_limit(None, 10, RAIL_LIMIT_MAX), 10);
        assert_eq!(rail_limit(Some(500), 10, RAIL_LIMIT_MAX), 50);
        assert_eq!(rail_limit(Some(0), 10, SUGGESTION_LIMIT_MAX), 1);
    }
}
