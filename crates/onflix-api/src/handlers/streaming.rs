//! Entitlement-gated streaming handlers.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use onflix_models::{best_full_video, full_video_at, Content, ContentVideo, Episode, VideoQuality};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::services::SignedStream;
use crate::state::AppState;

#[derive(Serialize)]
pub struct StreamResponse {
    pub streaming_url: String,
    pub expires_at: DateTime<Utc>,
    pub video_info: ContentVideo,
    pub content: Content,
}

#[derive(Serialize)]
pub struct EpisodeStreamResponse {
    pub streaming_url: String,
    pub expires_at: DateTime<Utc>,
    pub video_info: ContentVideo,
    pub episode: Episode,
    pub show: Content,
}

#[derive(Serialize)]
pub struct StreamTokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

fn signed_url(signed: SignedStream) -> ApiResult<(String, DateTime<Utc>)> {
    let url = signed
        .url
        .ok_or_else(|| ApiError::internal("Signed stream is missing its URL"))?;
    Ok((url, signed.expires_at))
}

/// Highest available quality of the main video.
pub async fn stream_content(
    State(state): State<AppState>,
    user: AuthUser,
    Path(content_id): Path<String>,
) -> ApiResult<Json<StreamResponse>> {
    let now = Utc::now();
    let content = state.catalog.published(&content_id).await?;
    state.entitlements.authorize(&user.user, now)?;

    let video = best_full_video(&content.videos)
        .cloned()
        .ok_or_else(|| ApiError::not_found("Video not found"))?;

    let (streaming_url, expires_at) = signed_url(state.delivery.streaming_url(
        &video.file_url,
        &content.id,
        user.id(),
        video.quality,
        now,
    )?)?;

    info!(
        user_id = %user.id(),
        content_id = %content.id,
        quality = %video.quality,
        "Stream authorized"
    );
    Ok(Json(StreamResponse {
        streaming_url,
        expires_at,
        video_info: video,
        content,
    }))
}

/// A specific quality, which the user's plan must include.
pub async fn stream_content_quality(
    State(state): State<AppState>,
    user: AuthUser,
    Path((content_id, quality)): Path<(String, String)>,
) -> ApiResult<Json<StreamResponse>> {
    let now = Utc::now();
    let quality = VideoQuality::parse(&quality)?;
    let content = state.catalog.published(&content_id).await?;
    state.entitlements.authorize(&user.user, now)?;

    let video = full_video_at(&content.videos, quality)
        .cloned()
        .ok_or_else(|| ApiError::not_found("Video with specified quality not found"))?;
    state
        .entitlements
        .authorize_quality(&user.user, video.quality)
        .await?;

    let (streaming_url, expires_at) = signed_url(state.delivery.streaming_url(
        &video.file_url,
        &content.id,
        user.id(),
        video.quality,
        now,
    )?)?;

    info!(
        user_id = %user.id(),
        content_id = %content.id,
        quality = %video.quality,
        "Stream authorized"
    );
    Ok(Json(StreamResponse {
        streaming_url,
        expires_at,
        video_info: video,
        content,
    }))
}

/// Session token for adaptive (HLS/DASH) players.
pub async fn stream_token(
    State(state): State<AppState>,
    user: AuthUser,
    Path(content_id): Path<String>,
) -> ApiResult<Json<StreamTokenResponse>> {
    let now = Utc::now();
    let content = state.catalog.published(&content_id).await?;
    state.entitlements.authorize(&user.user, now)?;

    let signed = state.delivery.playback_token(&content.id, user.id(), now)?;
    Ok(Json(StreamTokenResponse {
        token: signed.token,
        expires_at: signed.expires_at,
    }))
}

pub async fn stream_episode(
    State(state): State<AppState>,
    user: AuthUser,
    Path((show_id, season_number, episode_number)): Path<(String, u32, u32)>,
) -> ApiResult<Json<EpisodeStreamResponse>> {
    let now = Utc::now();
    let show = state.catalog.show(&show_id).await?;
    state.entitlements.authorize(&user.user, now)?;

    let episode = show
        .episode(season_number, episode_number)
        .cloned()
        .ok_or_else(|| ApiError::not_found("Episode not found"))?;
    let video = best_full_video(&episode.videos)
        .cloned()
        .ok_or_else(|| ApiError::not_found("Episode video not found"))?;

    let (streaming_url, expires_at) = signed_url(state.delivery.streaming_url(
        &video.file_url,
        &episode.id,
        user.id(),
        video.quality,
        now,
    )?)?;

    info!(
        user_id = %user.id(),
        show_id = %show.id,
        season = season_number,
        episode = episode_number,
        "Episode stream authorized"
    );
    Ok(Json(EpisodeStreamResponse {
        streaming_url,
        expires_at,
        video_info: video,
        episode,
        show,
    }))
}
