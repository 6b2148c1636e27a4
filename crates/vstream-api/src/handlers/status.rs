//! Pipeline status query handler.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::handlers::videos::load_visible_record;
use crate::state::AppState;

/// Status view of one record.
#[derive(Serialize)]
pub struct StatusResponse {
    pub video_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Derived monitoring annotation: still processing but quiet past the
    /// configured deadline. Not a pipeline state.
    pub stalled: bool,
    pub updated_at: String,
}

/// Current pipeline state of a video.
pub async fn get_status(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<StatusResponse>> {
    let record = load_visible_record(&state, &video_id, &user).await?;

    Ok(Json(StatusResponse {
        video_id: record.video_id.to_string(),
        status: record.status.as_str().to_string(),
        output_ref: record.output_ref.clone(),
        failure_code: record.failure_code.map(|c| c.as_str().to_string()),
        error_message: record.error_message.clone(),
        stalled: record.is_stalled(state.config.stalled_after_secs),
        updated_at: record.updated_at.to_rfc3339(),
    }))
}
