//! Webhook receivers for the ingestion pipeline.
//!
//! Both receivers follow the same contract: 2xx acknowledges the event,
//! including duplicates, stale jobs and other no-ops. Non-2xx is reserved
//! for payloads missing required fields. Returning an error for a
//! duplicate would only make the sender redeliver it.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use vstream_models::{JobId, JobOutcome};

use crate::error::{ApiError, ApiResult};
use crate::services::pipeline;
use crate::state::AppState;

/// Storage "object created" notification body.
#[derive(Deserialize)]
pub struct StorageEventPayload {
    pub object_key: Option<String>,
    pub checksum: Option<String>,
}

/// Transcoder completion notification body.
#[derive(Deserialize)]
pub struct CompletionEventPayload {
    pub job_id: Option<String>,
    pub outcome: Option<JobOutcome>,
    pub output_ref: Option<String>,
    pub reason: Option<String>,
}

/// Webhook acknowledgement body.
#[derive(Serialize)]
pub struct WebhookAck {
    pub disposition: &'static str,
}

/// `POST /api/videos/s3-trigger` — storage event receiver.
pub async fn storage_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<StorageEventPayload>,
) -> ApiResult<Json<WebhookAck>> {
    check_webhook_token(&state, &headers)?;

    let object_key = payload.object_key.as_deref().ok_or_else(|| {
        warn!("Storage event missing object_key");
        ApiError::malformed_event("object_key is required")
    })?;

    vstream_storage::validate_object_key(object_key)
        .map_err(|e| ApiError::malformed_event(e.to_string()))?;

    let ack = pipeline::handle_storage_event(&state, object_key, payload.checksum.as_deref()).await?;

    Ok(Json(WebhookAck {
        disposition: ack.as_str(),
    }))
}

/// `POST /api/videos/ecs-trigger` — job completion receiver.
pub async fn transcoder_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CompletionEventPayload>,
) -> ApiResult<Json<WebhookAck>> {
    check_webhook_token(&state, &headers)?;

    let job_id = payload.job_id.as_deref().filter(|j| !j.is_empty()).ok_or_else(|| {
        warn!("Completion event missing job_id");
        ApiError::malformed_event("job_id is required")
    })?;
    let outcome = payload.outcome.ok_or_else(|| {
        warn!(job_id = %job_id, "Completion event missing outcome");
        ApiError::malformed_event("outcome is required")
    })?;

    let ack = pipeline::handle_completion_event(
        &state,
        &JobId::from_string(job_id),
        outcome,
        payload.output_ref.as_deref(),
        payload.reason.as_deref(),
    )
    .await?;

    Ok(Json(WebhookAck {
        disposition: ack.as_str(),
    }))
}

/// Shared-secret check, active only when `WEBHOOK_TOKEN` is configured.
fn check_webhook_token(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = &state.config.webhook_token else {
        return Ok(());
    };

    let provided = headers
        .get("X-Webhook-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if provided != expected {
        return Err(ApiError::unauthorized("Invalid webhook token"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_payload_tolerates_extra_fields() {
        let payload: StorageEventPayload = serde_json::from_str(
            r#"{"object_key":"uploads/u/v/source.mp4","checksum":"etag","bucket":"extra"}"#,
        )
        .unwrap();
        assert_eq!(payload.object_key.as_deref(), Some("uploads/u/v/source.mp4"));
        assert_eq!(payload.checksum.as_deref(), Some("etag"));
    }

    #[test]
    fn test_storage_payload_missing_key_parses_to_none() {
        // Deserialization succeeds; the handler converts the absent field
        // into a 400 MalformedEvent.
        let payload: StorageEventPayload = serde_json::from_str(r#"{"checksum":"etag"}"#).unwrap();
        assert!(payload.object_key.is_none());
    }

    #[test]
    fn test_completion_payload_wire_format() {
        let payload: CompletionEventPayload = serde_json::from_str(
            r#"{"job_id":"j-1","outcome":"SUCCESS","output_ref":"outputs/u/v/playlist.m3u8"}"#,
        )
        .unwrap();
        assert_eq!(payload.job_id.as_deref(), Some("j-1"));
        assert_eq!(payload.outcome, Some(JobOutcome::Success));

        let payload: CompletionEventPayload =
            serde_json::from_str(r#"{"job_id":"j-1","outcome":"FAILURE","reason":"exit 1"}"#)
                .unwrap();
        assert_eq!(payload.outcome, Some(JobOutcome::Failure));
        assert_eq!(payload.reason.as_deref(), Some("exit 1"));
    }

    #[test]
    fn test_completion_payload_rejects_unknown_outcome() {
        let result: Result<CompletionEventPayload, _> =
            serde_json::from_str(r#"{"job_id":"j-1","outcome":"MAYBE"}"#);
        assert!(result.is_err());
    }
}
