//! Video API handlers: upload admission and record read paths.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vstream_models::{VideoId, VideoRecord, VideoStatus, VideoSummary};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_TITLE_LENGTH: usize = 500;
const DEFAULT_PAGE_SIZE: u32 = 25;
const MAX_PAGE_SIZE: u32 = 100;
const OWNER_LIST_LIMIT: u32 = 200;

// ============================================================================
// Types
// ============================================================================

/// Upload admission request.
#[derive(Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub title: Option<String>,
}

/// Upload admission response: the record id plus a time-limited write grant.
#[derive(Serialize)]
pub struct UploadResponse {
    pub video_id: String,
    pub object_key: String,
    pub upload_url: String,
    pub expires_in_secs: u64,
}

/// Single-record view.
#[derive(Serialize)]
pub struct VideoDetailResponse {
    pub video_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: String,
    pub view_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct UserVideosResponse {
    pub videos: Vec<VideoSummary>,
}

#[derive(Deserialize)]
pub struct ListVideosQuery {
    pub limit: Option<u32>,
    pub page_token: Option<String>,
}

#[derive(Serialize)]
pub struct AllVideosResponse {
    pub videos: Vec<VideoSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Serialize)]
pub struct ViewCountResponse {
    pub video_id: String,
    pub view_count: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Admit a new upload: create the record and hand back a presigned PUT.
///
/// The API never sees the video bytes; the client uploads straight to
/// object storage and the bucket notification drives the rest.
pub async fn request_upload(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<UploadRequest>,
) -> ApiResult<Json<UploadResponse>> {
    if let Some(title) = &request.title {
        if title.len() > MAX_TITLE_LENGTH {
            return Err(ApiError::bad_request(format!(
                "Title exceeds {} characters",
                MAX_TITLE_LENGTH
            )));
        }
    }

    let record = VideoRecord::new(&user.uid, request.title);
    state.videos.create(&record).await?;

    let upload_url = state
        .storage
        .presign_put(&record.object_key, "video/mp4", state.config.upload_url_ttl)
        .await?;

    info!(
        video_id = %record.video_id,
        owner_id = %user.uid,
        "Upload admitted"
    );

    Ok(Json(UploadResponse {
        video_id: record.video_id.to_string(),
        object_key: record.object_key,
        upload_url,
        expires_in_secs: state.config.upload_url_ttl.as_secs(),
    }))
}

/// List the caller's videos.
pub async fn list_user_videos(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<UserVideosResponse>> {
    let records = state.videos.list_owner(&user.uid, OWNER_LIST_LIMIT).await?;
    let videos = records.iter().map(VideoSummary::from).collect();
    Ok(Json(UserVideosResponse { videos }))
}

/// Platform-wide paginated listing.
pub async fn list_all_videos(
    State(state): State<AppState>,
    Query(query): Query<ListVideosQuery>,
    _user: AuthUser,
) -> ApiResult<Json<AllVideosResponse>> {
    let limit = normalize_limit(query.limit);
    let (records, next_page_token) = state
        .videos
        .list_page(Some(limit), query.page_token.as_deref())
        .await?;

    Ok(Json(AllVideosResponse {
        videos: records.iter().map(VideoSummary::from).collect(),
        next_page_token,
    }))
}

/// Fetch one video, resolving a playback URL when transcoding is done.
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<VideoDetailResponse>> {
    let record = load_visible_record(&state, &video_id, &user).await?;

    let playback_url = match (&record.status, &record.output_ref) {
        (VideoStatus::Ready, Some(output_ref)) => Some(
            state
                .storage
                .presign_get(output_ref, state.config.playback_url_ttl)
                .await?,
        ),
        _ => None,
    };

    Ok(Json(VideoDetailResponse {
        video_id: record.video_id.to_string(),
        title: record.title,
        status: record.status.as_str().to_string(),
        view_count: record.view_count,
        playback_url,
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
    }))
}

/// Bump the view counter. The counter only ever moves up.
pub async fn update_views(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<ViewCountResponse>> {
    let record = load_visible_record(&state, &video_id, &user).await?;
    let view_count = state.videos.increment_views(&record.video_id).await?;

    Ok(Json(ViewCountResponse {
        video_id: record.video_id.to_string(),
        view_count,
    }))
}

// ============================================================================
// Helpers
// ============================================================================

/// Load a record and apply the visibility policy.
///
/// A record the caller may not see reads as absent, so probing for other
/// tenants' ids leaks nothing.
pub(crate) async fn load_visible_record(
    state: &AppState,
    video_id: &str,
    user: &AuthUser,
) -> ApiResult<VideoRecord> {
    if !is_valid_video_id(video_id) {
        return Err(ApiError::bad_request("Invalid video ID format"));
    }

    let id = VideoId::from_string(video_id);
    let record = state
        .videos
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Video {}", video_id)))?;

    if record.owner_id != user.uid && !state.config.public_read {
        return Err(ApiError::not_found(format!("Video {}", video_id)));
    }

    Ok(record)
}

fn normalize_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) | None => DEFAULT_PAGE_SIZE,
        Some(l) if l > MAX_PAGE_SIZE => MAX_PAGE_SIZE,
        Some(l) => l,
    }
}

/// Validate video ID format to prevent injection into store paths.
///
/// Valid format: alphanumeric characters and hyphens, 8-64 chars.
pub fn is_valid_video_id(id: &str) -> bool {
    if id.len() > 64 || id.len() < 8 {
        return false;
    }
    id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_video_id() {
        assert!(is_valid_video_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(is_valid_video_id("abcd1234"));
        assert!(!is_valid_video_id("short"));
        assert!(!is_valid_video_id(""));
        assert!(!is_valid_video_id("videos/../../etc"));
        assert!(!is_valid_video_id(&"x".repeat(65)));
    }

    #[test]
    fn test_normalize_limit() {
        assert_eq!(normalize_limit(None), DEFAULT_PAGE_SIZE);
        assert_eq!(normalize_limit(Some(0)), DEFAULT_PAGE_SIZE);
        assert_eq!(normalize_limit(Some(50)), 50);
        assert_eq!(normalize_limit(Some(10_000)), MAX_PAGE_SIZE);
    }
}
