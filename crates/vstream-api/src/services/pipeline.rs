//! Ingestion pipeline orchestration.
//!
//! Storage and transcoder webhooks are untrusted: deliveries may be
//! duplicated, delayed or reordered arbitrarily. The handlers here never
//! rely on delivery order. Each event is reduced to a decision against the
//! record's current status, and every write goes through the record
//! store's conditional updates, so replaying any event sequence converges
//! on the same terminal record.

use tracing::{info, warn};

use vstream_models::{output_prefix_for, JobId, JobOutcome, VideoRecord, VideoStatus};
use vstream_firestore::{ClaimOutcome, CompletionOutcome, TransitionOutcome};
use vstream_transcode::LaunchSpec;

use crate::error::ApiResult;
use crate::metrics::{record_completion_event, record_dispatch, record_storage_event};
use crate::state::AppState;

// ============================================================================
// Decisions
// ============================================================================

/// What to do with a storage "object created" event, given the record's
/// current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEventAction {
    /// First delivery: mark the record uploaded, then dispatch.
    MarkAndDispatch,
    /// Redelivery before a job was claimed: just (re-)dispatch; the claim
    /// makes the dispatch idempotent.
    DispatchOnly,
    /// Record already at or past `Processing`: acknowledge without side
    /// effect. This is the idempotence boundary.
    Ignore,
}

pub fn storage_event_action(status: VideoStatus) -> StorageEventAction {
    match status {
        VideoStatus::PendingUpload => StorageEventAction::MarkAndDispatch,
        VideoStatus::Uploaded => StorageEventAction::DispatchOnly,
        VideoStatus::Processing | VideoStatus::Ready | VideoStatus::Failed => {
            StorageEventAction::Ignore
        }
    }
}

/// What to do with a job-completion event, given the record it resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAction {
    /// Job matches a processing record: apply the terminal transition.
    Apply,
    /// Event for a superseded or unknown job: discard.
    IgnoreStale,
    /// Record already terminal: later events for the same job are no-ops.
    IgnoreTerminal,
}

pub fn completion_action(record: &VideoRecord, event_job: &JobId) -> CompletionAction {
    if record.job_id.as_ref() != Some(event_job) {
        return CompletionAction::IgnoreStale;
    }
    if record.status.is_terminal() {
        return CompletionAction::IgnoreTerminal;
    }
    if record.status == VideoStatus::Processing {
        return CompletionAction::Apply;
    }
    // A job id on a non-processing, non-terminal record should not exist.
    CompletionAction::IgnoreStale
}

// ============================================================================
// Acks
// ============================================================================

/// Disposition reported back to the storage webhook sender (always 2xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageAck {
    /// Record advanced and a job was launched.
    Dispatched,
    /// Another delivery already claimed the job; nothing launched.
    Deduplicated,
    /// Launch rejected; record is now terminally failed.
    DispatchFailed,
    /// Event for an unknown object key.
    UnknownObject,
    /// Record already past the relevant stage.
    Ignored,
}

impl StorageAck {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageAck::Dispatched => "dispatched",
            StorageAck::Deduplicated => "deduplicated",
            StorageAck::DispatchFailed => "dispatch_failed",
            StorageAck::UnknownObject => "unknown_object",
            StorageAck::Ignored => "ignored",
        }
    }
}

/// Disposition reported back to the transcoder webhook sender (always 2xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAck {
    Applied,
    Stale,
    Ignored,
}

impl CompletionAck {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionAck::Applied => "applied",
            CompletionAck::Stale => "stale",
            CompletionAck::Ignored => "ignored",
        }
    }
}

// ============================================================================
// Orchestration
// ============================================================================

/// Handle one storage "object created" notification.
pub async fn handle_storage_event(
    state: &AppState,
    object_key: &str,
    checksum: Option<&str>,
) -> ApiResult<StorageAck> {
    let Some(record) = state.videos.find_by_object_key(object_key).await? else {
        info!(object_key = %object_key, "Storage event for unknown object, acking");
        record_storage_event("unknown");
        return Ok(StorageAck::UnknownObject);
    };

    match storage_event_action(record.status) {
        StorageEventAction::Ignore => {
            info!(
                video_id = %record.video_id,
                status = %record.status,
                "Storage event for settled record, acking without side effect"
            );
            record_storage_event("conflict_ignored");
            Ok(StorageAck::Ignored)
        }
        StorageEventAction::MarkAndDispatch => {
            let outcome = state.videos.mark_uploaded(&record.video_id, checksum).await?;
            let record = match outcome {
                TransitionOutcome::Applied(r) => r,
                // A concurrent delivery marked it first; fall through to the
                // claim, which settles who dispatches.
                TransitionOutcome::AlreadyPast(r) => r,
            };

            if record.status == VideoStatus::Uploaded {
                record_storage_event("accepted");
                dispatch(state, &record).await
            } else {
                record_storage_event("conflict_ignored");
                Ok(StorageAck::Ignored)
            }
        }
        StorageEventAction::DispatchOnly => {
            record_storage_event("duplicate");
            dispatch(state, &record).await
        }
    }
}

/// Claim and launch the transcode job for an uploaded record.
///
/// At most one job ever launches per record: the conditional job claim
/// decides the winner, and losers return the winner's job id untouched.
async fn dispatch(state: &AppState, record: &VideoRecord) -> ApiResult<StorageAck> {
    let job_id = JobId::new();

    match state.videos.claim_job(&record.video_id, &job_id).await? {
        ClaimOutcome::Claimed(job_id) => {
            let spec = LaunchSpec {
                video_id: record.video_id.clone(),
                job_id: job_id.clone(),
                source_bucket: state.storage.bucket().to_string(),
                source_key: record.object_key.clone(),
                output_prefix: output_prefix_for(&record.owner_id, &record.video_id),
            };

            match state.dispatcher.launch(&spec).await {
                Ok(_task_arn) => {
                    record_dispatch("launched");
                    Ok(StorageAck::Dispatched)
                }
                Err(e) => {
                    warn!(
                        video_id = %record.video_id,
                        job_id = %job_id,
                        "Transcode launch rejected, failing record: {}",
                        e
                    );
                    state
                        .videos
                        .fail_dispatch(&record.video_id, &e.to_string())
                        .await?;
                    record_dispatch("rejected");
                    Ok(StorageAck::DispatchFailed)
                }
            }
        }
        ClaimOutcome::Existing(existing) => {
            info!(
                video_id = %record.video_id,
                job_id = %existing,
                "Job already claimed by a concurrent delivery"
            );
            record_dispatch("deduplicated");
            Ok(StorageAck::Deduplicated)
        }
        ClaimOutcome::Superseded(record) => {
            info!(
                video_id = %record.video_id,
                status = %record.status,
                "Record superseded before job claim, acking"
            );
            record_dispatch("superseded");
            Ok(StorageAck::Ignored)
        }
    }
}

/// Handle one transcoder completion notification.
pub async fn handle_completion_event(
    state: &AppState,
    job_id: &JobId,
    outcome: JobOutcome,
    output_ref: Option<&str>,
    reason: Option<&str>,
) -> ApiResult<CompletionAck> {
    let Some(record) = state.videos.find_by_job_id(job_id).await? else {
        info!(job_id = %job_id, "Completion event for unknown job, discarding");
        record_completion_event("stale");
        return Ok(CompletionAck::Stale);
    };

    match completion_action(&record, job_id) {
        CompletionAction::IgnoreStale => {
            info!(
                video_id = %record.video_id,
                job_id = %job_id,
                "Stale completion event, discarding"
            );
            record_completion_event("stale");
            Ok(CompletionAck::Stale)
        }
        CompletionAction::IgnoreTerminal => {
            info!(
                video_id = %record.video_id,
                status = %record.status,
                "Completion event for settled record, acking"
            );
            record_completion_event("ignored");
            Ok(CompletionAck::Ignored)
        }
        CompletionAction::Apply => {
            let result = match outcome {
                JobOutcome::Success => {
                    let output_ref = output_ref
                        .map(String::from)
                        .unwrap_or_else(|| output_prefix_for(&record.owner_id, &record.video_id));
                    state
                        .videos
                        .complete_job(&record.video_id, job_id, &output_ref)
                        .await?
                }
                JobOutcome::Failure => {
                    let reason = reason.unwrap_or("Transcode job reported failure");
                    state.videos.fail_job(&record.video_id, job_id, reason).await?
                }
            };

            match result {
                CompletionOutcome::Applied(record) => {
                    info!(
                        video_id = %record.video_id,
                        status = %record.status,
                        "Completion applied"
                    );
                    record_completion_event("applied");
                    Ok(CompletionAck::Applied)
                }
                CompletionOutcome::Stale => {
                    record_completion_event("stale");
                    Ok(CompletionAck::Stale)
                }
                CompletionOutcome::AlreadyTerminal(_) => {
                    record_completion_event("ignored");
                    Ok(CompletionAck::Ignored)
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use vstream_models::FailureCode;

    fn record() -> VideoRecord {
        VideoRecord::new("user-1", Some("clip".into()))
    }

    #[test]
    fn test_first_storage_event_marks_and_dispatches() {
        assert_eq!(
            storage_event_action(VideoStatus::PendingUpload),
            StorageEventAction::MarkAndDispatch
        );
    }

    #[test]
    fn test_duplicate_before_claim_redispatches() {
        assert_eq!(
            storage_event_action(VideoStatus::Uploaded),
            StorageEventAction::DispatchOnly
        );
    }

    #[test]
    fn test_storage_events_past_processing_are_ignored() {
        for status in [VideoStatus::Processing, VideoStatus::Ready, VideoStatus::Failed] {
            assert_eq!(storage_event_action(status), StorageEventAction::Ignore);
        }
    }

    #[test]
    fn test_completion_requires_matching_job() {
        let rec = record().uploaded(None).processing(JobId::from_string("j-1"));
        assert_eq!(
            completion_action(&rec, &JobId::from_string("j-1")),
            CompletionAction::Apply
        );
        assert_eq!(
            completion_action(&rec, &JobId::from_string("j-2")),
            CompletionAction::IgnoreStale
        );
    }

    #[test]
    fn test_completion_without_job_is_stale() {
        let rec = record();
        assert_eq!(
            completion_action(&rec, &JobId::from_string("j-1")),
            CompletionAction::IgnoreStale
        );
    }

    #[test]
    fn test_completion_after_terminal_is_noop() {
        let job = JobId::from_string("j-1");
        let done = record().uploaded(None).processing(job.clone()).ready("outputs/u/v/");
        assert_eq!(completion_action(&done, &job), CompletionAction::IgnoreTerminal);

        let failed = record()
            .uploaded(None)
            .processing(job.clone())
            .failed(FailureCode::TranscodeFailed, "boom");
        assert_eq!(completion_action(&failed, &job), CompletionAction::IgnoreTerminal);
    }

    /// The end-to-end event-ordering scenario: duplicate storage events set
    /// one job, a success completion lands, and a late failure for the same
    /// job changes nothing.
    #[test]
    fn test_event_sequence_converges() {
        let rec = record();
        assert_eq!(rec.status, VideoStatus::PendingUpload);

        // First storage delivery
        assert_eq!(
            storage_event_action(rec.status),
            StorageEventAction::MarkAndDispatch
        );
        let rec = rec.uploaded(Some("etag".into()));

        // Claim wins, record enters processing with J1
        let j1 = JobId::from_string("j-1");
        let rec = rec.processing(j1.clone());

        // Second storage delivery is a no-op
        assert_eq!(storage_event_action(rec.status), StorageEventAction::Ignore);

        // Success completion applies
        assert_eq!(completion_action(&rec, &j1), CompletionAction::Apply);
        let rec = rec.ready("outputs/user-1/v/playlist.m3u8");
        assert_eq!(rec.status, VideoStatus::Ready);

        // Late failure for the same job is discarded; status never regresses
        assert_eq!(completion_action(&rec, &j1), CompletionAction::IgnoreTerminal);
        assert_eq!(rec.status, VideoStatus::Ready);
        assert_eq!(rec.output_ref.as_deref(), Some("outputs/user-1/v/playlist.m3u8"));
    }

    #[test]
    fn test_ack_labels() {
        assert_eq!(StorageAck::Dispatched.as_str(), "dispatched");
        assert_eq!(StorageAck::UnknownObject.as_str(), "unknown_object");
        assert_eq!(CompletionAck::Stale.as_str(), "stale");
    }
}
