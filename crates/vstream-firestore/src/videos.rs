//! Typed repository for video records.
//!
//! Every mutation is a read-decide-write loop: read the document together
//! with its `updateTime`, decide from the record's current status, then
//! write with that `updateTime` as a precondition. Losing the precondition
//! means another handler advanced the record first; we re-read and
//! re-decide, which is what makes duplicate and racing webhook deliveries
//! safe without any external lock.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info, warn};

use vstream_models::{FailureCode, JobId, VideoId, VideoRecord, VideoStatus};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_cas_conflict;
use crate::retry::with_retry;
use crate::types::{Document, StructuredQuery, ToFirestoreValue, Value};

/// Collection holding all video records.
const COLLECTION: &str = "videos";

/// Attempts before a conditional transition gives up.
const MAX_TRANSITION_ATTEMPTS: u32 = 5;

/// Result of an idempotent transition attempt.
#[derive(Debug)]
pub enum TransitionOutcome {
    /// This call performed the transition.
    Applied(VideoRecord),
    /// The record was already at or past the target stage; nothing written.
    AlreadyPast(VideoRecord),
}

impl TransitionOutcome {
    pub fn record(&self) -> &VideoRecord {
        match self {
            TransitionOutcome::Applied(r) | TransitionOutcome::AlreadyPast(r) => r,
        }
    }
}

/// Result of a transcode-job claim.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// This call won the `Uploaded -> Processing` write; launch the job.
    Claimed(JobId),
    /// Another handler already claimed (or finished) a job for this record;
    /// its job id is returned and nothing was written.
    Existing(JobId),
    /// The record is in a state where no job may be claimed.
    Superseded(VideoRecord),
}

/// Result of applying a job-completion event.
#[derive(Debug)]
pub enum CompletionOutcome {
    /// The terminal transition was performed by this call.
    Applied(VideoRecord),
    /// The event's job id does not match the record's current job.
    Stale,
    /// The record already reached a terminal state earlier.
    AlreadyTerminal(VideoRecord),
}

/// Repository for video records.
#[derive(Clone)]
pub struct VideoRepository {
    client: FirestoreClient,
}

impl VideoRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Get a record by ID. Transient store faults are retried; a missing
    /// document is not a fault.
    pub async fn get(&self, video_id: &VideoId) -> FirestoreResult<Option<VideoRecord>> {
        let doc = with_retry(self.client.retry_config(), "get_video", || {
            self.client.get_document(COLLECTION, video_id.as_str())
        })
        .await?;
        doc.map(|d| document_to_record(&d)).transpose()
    }

    /// Look a record up by its raw-upload object key.
    pub async fn find_by_object_key(&self, object_key: &str) -> FirestoreResult<Option<VideoRecord>> {
        self.find_one("object_key", object_key).await
    }

    /// Look a record up by its transcode job id.
    pub async fn find_by_job_id(&self, job_id: &JobId) -> FirestoreResult<Option<VideoRecord>> {
        self.find_one("job_id", job_id.as_str()).await
    }

    async fn find_one(&self, field: &str, value: &str) -> FirestoreResult<Option<VideoRecord>> {
        let docs = with_retry(self.client.retry_config(), "find_video", || {
            let query = StructuredQuery::field_equals(COLLECTION, field, value).with_limit(1);
            self.client.run_query(query)
        })
        .await?;
        docs.first().map(document_to_record).transpose()
    }

    /// Platform-wide page of records.
    pub async fn list_page(
        &self,
        limit: Option<u32>,
        page_token: Option<&str>,
    ) -> FirestoreResult<(Vec<VideoRecord>, Option<String>)> {
        let response = self.client.list_documents(COLLECTION, limit, page_token).await?;

        let mut records = Vec::new();
        if let Some(docs) = response.documents {
            for doc in docs {
                match document_to_record(&doc) {
                    Ok(r) => records.push(r),
                    Err(e) => warn!("Skipping malformed video document: {}", e),
                }
            }
        }

        Ok((records, response.next_page_token))
    }

    /// All records owned by one principal.
    pub async fn list_owner(&self, owner_id: &str, limit: u32) -> FirestoreResult<Vec<VideoRecord>> {
        let query =
            StructuredQuery::field_equals(COLLECTION, "owner_id", owner_id).with_limit(limit);
        let docs = self.client.run_query(query).await?;

        let mut records = Vec::new();
        for doc in &docs {
            match document_to_record(doc) {
                Ok(r) => records.push(r),
                Err(e) => warn!("Skipping malformed video document: {}", e),
            }
        }
        Ok(records)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Create a new record. Fails if the id already exists.
    pub async fn create(&self, record: &VideoRecord) -> FirestoreResult<()> {
        let fields = record_to_fields(record);
        self.client
            .create_document(COLLECTION, record.video_id.as_str(), fields)
            .await?;
        info!(video_id = %record.video_id, owner_id = %record.owner_id, "Created video record");
        Ok(())
    }

    /// `PendingUpload -> Uploaded`, storing the storage-provided checksum.
    ///
    /// Duplicate storage notifications land in `AlreadyPast`.
    pub async fn mark_uploaded(
        &self,
        video_id: &VideoId,
        checksum: Option<&str>,
    ) -> FirestoreResult<TransitionOutcome> {
        for _attempt in 0..MAX_TRANSITION_ATTEMPTS {
            let (record, version) = self.read_versioned(video_id).await?;

            if record.status != VideoStatus::PendingUpload {
                return Ok(TransitionOutcome::AlreadyPast(record));
            }

            let now = Utc::now();
            let mut fields = HashMap::new();
            fields.insert(
                "status".to_string(),
                VideoStatus::Uploaded.as_str().to_firestore_value(),
            );
            fields.insert("checksum".to_string(), checksum.to_firestore_value());
            fields.insert("updated_at".to_string(), now.to_firestore_value());

            match self
                .write_guarded(video_id, fields, vec!["status", "checksum", "updated_at"], version.as_deref())
                .await
            {
                Ok(doc) => return document_to_record(&doc).map(TransitionOutcome::Applied),
                Err(e) if e.is_precondition_failed() => {
                    record_cas_conflict("mark_uploaded");
                    debug!(video_id = %video_id, "Lost uploaded-transition race, re-reading");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(transition_exhausted(video_id, "mark_uploaded"))
    }

    /// `Uploaded -> Processing` plus the job-id write, as one conditional
    /// update. Exactly one of any number of concurrent callers wins; the
    /// losers observe the winner's job id and write nothing.
    pub async fn claim_job(&self, video_id: &VideoId, job_id: &JobId) -> FirestoreResult<ClaimOutcome> {
        for _attempt in 0..MAX_TRANSITION_ATTEMPTS {
            let (record, version) = self.read_versioned(video_id).await?;

            match record.status {
                VideoStatus::Uploaded => {}
                _ => {
                    return Ok(match record.job_id.clone() {
                        Some(existing) => ClaimOutcome::Existing(existing),
                        None => ClaimOutcome::Superseded(record),
                    });
                }
            }

            let now = Utc::now();
            let mut fields = HashMap::new();
            fields.insert(
                "status".to_string(),
                VideoStatus::Processing.as_str().to_firestore_value(),
            );
            fields.insert("job_id".to_string(), job_id.as_str().to_firestore_value());
            fields.insert("updated_at".to_string(), now.to_firestore_value());

            match self
                .write_guarded(video_id, fields, vec!["status", "job_id", "updated_at"], version.as_deref())
                .await
            {
                Ok(_) => {
                    info!(video_id = %video_id, job_id = %job_id, "Claimed transcode job");
                    return Ok(ClaimOutcome::Claimed(job_id.clone()));
                }
                Err(e) if e.is_precondition_failed() => {
                    record_cas_conflict("claim_job");
                    debug!(video_id = %video_id, "Lost job-claim race, re-reading");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(transition_exhausted(video_id, "claim_job"))
    }

    /// `Processing -> Ready`, guarded on the event's job id matching the
    /// record's current job.
    pub async fn complete_job(
        &self,
        video_id: &VideoId,
        job_id: &JobId,
        output_ref: &str,
    ) -> FirestoreResult<CompletionOutcome> {
        let now = Utc::now();
        let mut fields = HashMap::new();
        fields.insert(
            "status".to_string(),
            VideoStatus::Ready.as_str().to_firestore_value(),
        );
        fields.insert("output_ref".to_string(), output_ref.to_firestore_value());
        fields.insert("updated_at".to_string(), now.to_firestore_value());

        self.finish_job(video_id, job_id, fields, vec!["status", "output_ref", "updated_at"])
            .await
    }

    /// `Processing -> Failed` with a transcode failure reason, guarded on
    /// the event's job id matching the record's current job.
    pub async fn fail_job(
        &self,
        video_id: &VideoId,
        job_id: &JobId,
        message: &str,
    ) -> FirestoreResult<CompletionOutcome> {
        let now = Utc::now();
        let mut fields = HashMap::new();
        fields.insert(
            "status".to_string(),
            VideoStatus::Failed.as_str().to_firestore_value(),
        );
        fields.insert(
            "failure_code".to_string(),
            FailureCode::TranscodeFailed.as_str().to_firestore_value(),
        );
        fields.insert("error_message".to_string(), message.to_firestore_value());
        fields.insert("updated_at".to_string(), now.to_firestore_value());

        self.finish_job(
            video_id,
            job_id,
            fields,
            vec!["status", "failure_code", "error_message", "updated_at"],
        )
        .await
    }

    async fn finish_job(
        &self,
        video_id: &VideoId,
        job_id: &JobId,
        fields: HashMap<String, Value>,
        mask: Vec<&str>,
    ) -> FirestoreResult<CompletionOutcome> {
        for _attempt in 0..MAX_TRANSITION_ATTEMPTS {
            let (record, version) = self.read_versioned(video_id).await?;

            if record.job_id.as_ref() != Some(job_id) {
                return Ok(CompletionOutcome::Stale);
            }
            if record.status.is_terminal() {
                return Ok(CompletionOutcome::AlreadyTerminal(record));
            }
            if record.status != VideoStatus::Processing {
                // A job id on a non-processing, non-terminal record should
                // not exist; treat the event as stale rather than widen the
                // lattice.
                warn!(video_id = %video_id, status = %record.status, "Completion event for non-processing record");
                return Ok(CompletionOutcome::Stale);
            }

            match self
                .write_guarded(video_id, fields.clone(), mask.clone(), version.as_deref())
                .await
            {
                Ok(doc) => return document_to_record(&doc).map(CompletionOutcome::Applied),
                Err(e) if e.is_precondition_failed() => {
                    record_cas_conflict("finish_job");
                    debug!(video_id = %video_id, "Lost completion race, re-reading");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(transition_exhausted(video_id, "finish_job"))
    }

    /// Terminal failure for a launch the execution service rejected.
    ///
    /// Clears the job id: a launch that was never accepted produced no job
    /// to audit, and the status query must report the record as failed
    /// with no job attached.
    pub async fn fail_dispatch(
        &self,
        video_id: &VideoId,
        message: &str,
    ) -> FirestoreResult<TransitionOutcome> {
        for _attempt in 0..MAX_TRANSITION_ATTEMPTS {
            let (record, version) = self.read_versioned(video_id).await?;

            if record.status.is_terminal() {
                return Ok(TransitionOutcome::AlreadyPast(record));
            }
            if !matches!(record.status, VideoStatus::Uploaded | VideoStatus::Processing) {
                return Ok(TransitionOutcome::AlreadyPast(record));
            }

            let now = Utc::now();
            let mut fields = HashMap::new();
            fields.insert(
                "status".to_string(),
                VideoStatus::Failed.as_str().to_firestore_value(),
            );
            fields.insert("job_id".to_string(), Value::NullValue(()));
            fields.insert(
                "failure_code".to_string(),
                FailureCode::DispatchFailed.as_str().to_firestore_value(),
            );
            fields.insert("error_message".to_string(), message.to_firestore_value());
            fields.insert("updated_at".to_string(), now.to_firestore_value());

            match self
                .write_guarded(
                    video_id,
                    fields,
                    vec!["status", "job_id", "failure_code", "error_message", "updated_at"],
                    version.as_deref(),
                )
                .await
            {
                Ok(doc) => return document_to_record(&doc).map(TransitionOutcome::Applied),
                Err(e) if e.is_precondition_failed() => {
                    record_cas_conflict("fail_dispatch");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(transition_exhausted(video_id, "fail_dispatch"))
    }

    /// Bump the view counter by one. Optimistic retry keeps the counter
    /// monotone under concurrent viewers. Returns the new count.
    pub async fn increment_views(&self, video_id: &VideoId) -> FirestoreResult<u64> {
        for _attempt in 0..MAX_TRANSITION_ATTEMPTS {
            let (record, version) = self.read_versioned(video_id).await?;

            let new_count = record.view_count.saturating_add(1);
            let mut fields = HashMap::new();
            fields.insert("view_count".to_string(), new_count.to_firestore_value());
            fields.insert("updated_at".to_string(), Utc::now().to_firestore_value());

            match self
                .write_guarded(video_id, fields, vec!["view_count", "updated_at"], version.as_deref())
                .await
            {
                Ok(_) => return Ok(new_count),
                Err(e) if e.is_precondition_failed() => {
                    record_cas_conflict("increment_views");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(transition_exhausted(video_id, "increment_views"))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn read_versioned(
        &self,
        video_id: &VideoId,
    ) -> FirestoreResult<(VideoRecord, Option<String>)> {
        let doc = with_retry(self.client.retry_config(), "read_video", || {
            self.client.get_document(COLLECTION, video_id.as_str())
        })
        .await?
        .ok_or_else(|| FirestoreError::not_found(format!("videos/{}", video_id)))?;

        let version = doc.update_time.clone();
        Ok((document_to_record(&doc)?, version))
    }

    async fn write_guarded(
        &self,
        video_id: &VideoId,
        fields: HashMap<String, Value>,
        mask: Vec<&str>,
        update_time: Option<&str>,
    ) -> FirestoreResult<Document> {
        self.client
            .update_document_with_precondition(
                COLLECTION,
                video_id.as_str(),
                fields,
                mask.into_iter().map(String::from).collect(),
                update_time,
            )
            .await
    }
}

fn transition_exhausted(video_id: &VideoId, operation: &str) -> FirestoreError {
    warn!(video_id = %video_id, operation = %operation, "Conditional update contention exhausted retries");
    FirestoreError::request_failed(format!(
        "{} for {} lost {} consecutive conditional updates",
        operation, video_id, MAX_TRANSITION_ATTEMPTS
    ))
}

// ============================================================================
// Field mapping
// ============================================================================

/// Serialize a record into Firestore fields.
pub fn record_to_fields(record: &VideoRecord) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("owner_id".to_string(), record.owner_id.to_firestore_value());
    fields.insert("object_key".to_string(), record.object_key.to_firestore_value());
    fields.insert("title".to_string(), record.title.to_firestore_value());
    fields.insert(
        "status".to_string(),
        record.status.as_str().to_firestore_value(),
    );
    fields.insert(
        "job_id".to_string(),
        record.job_id.as_ref().map(|j| j.as_str()).to_firestore_value(),
    );
    fields.insert("checksum".to_string(), record.checksum.to_firestore_value());
    fields.insert("output_ref".to_string(), record.output_ref.to_firestore_value());
    fields.insert(
        "failure_code".to_string(),
        record.failure_code.map(|c| c.as_str()).to_firestore_value(),
    );
    fields.insert(
        "error_message".to_string(),
        record.error_message.to_firestore_value(),
    );
    fields.insert("view_count".to_string(), record.view_count.to_firestore_value());
    fields.insert("created_at".to_string(), record.created_at.to_firestore_value());
    fields.insert("updated_at".to_string(), record.updated_at.to_firestore_value());
    fields
}

/// Deserialize a Firestore document into a record.
///
/// `owner_id`, `object_key` and a parseable `status` are required; a
/// document missing them is corrupt and must not silently re-enter the
/// pipeline at a default stage.
pub fn document_to_record(doc: &Document) -> FirestoreResult<VideoRecord> {
    let video_id = doc
        .doc_id()
        .map(VideoId::from_string)
        .ok_or_else(|| FirestoreError::invalid_response("Video document without resource name"))?;

    let owner_id: String = doc
        .field("owner_id")
        .ok_or_else(|| missing_field(&video_id, "owner_id"))?;
    let object_key: String = doc
        .field("object_key")
        .ok_or_else(|| missing_field(&video_id, "object_key"))?;
    let status_raw: String = doc
        .field("status")
        .ok_or_else(|| missing_field(&video_id, "status"))?;
    let status = VideoStatus::parse(&status_raw).ok_or_else(|| {
        FirestoreError::invalid_response(format!(
            "Video {} has unknown status '{}'",
            video_id, status_raw
        ))
    })?;

    let now = Utc::now();
    Ok(VideoRecord {
        video_id,
        owner_id,
        object_key,
        title: doc.field("title"),
        status,
        job_id: doc.field::<String>("job_id").map(JobId::from_string),
        checksum: doc.field("checksum"),
        output_ref: doc.field("output_ref"),
        failure_code: doc
            .field::<String>("failure_code")
            .and_then(|s| FailureCode::parse(&s)),
        error_message: doc.field("error_message"),
        view_count: doc.field("view_count").unwrap_or(0),
        created_at: doc.field("created_at").unwrap_or(now),
        updated_at: doc.field("updated_at").unwrap_or(now),
    })
}

fn missing_field(video_id: &VideoId, field: &str) -> FirestoreError {
    FirestoreError::invalid_response(format!("Video {} missing field '{}'", video_id, field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vstream_models::object_key_for;

    fn doc_for(record: &VideoRecord) -> Document {
        Document {
            name: Some(format!(
                "projects/p/databases/(default)/documents/videos/{}",
                record.video_id
            )),
            fields: Some(record_to_fields(record)),
            create_time: None,
            update_time: Some("2026-01-01T00:00:00.000000Z".to_string()),
        }
    }

    #[test]
    fn test_field_mapping_round_trip() {
        let record = VideoRecord::new("user-1", Some("My Talk".into()))
            .uploaded(Some("etag-abc".into()))
            .processing(JobId::from_string("job-1"));

        let back = document_to_record(&doc_for(&record)).unwrap();

        assert_eq!(back.video_id, record.video_id);
        assert_eq!(back.owner_id, "user-1");
        assert_eq!(back.object_key, record.object_key);
        assert_eq!(back.title.as_deref(), Some("My Talk"));
        assert_eq!(back.status, VideoStatus::Processing);
        assert_eq!(back.job_id, Some(JobId::from_string("job-1")));
        assert_eq!(back.checksum.as_deref(), Some("etag-abc"));
        assert_eq!(back.view_count, 0);
    }

    #[test]
    fn test_failed_record_round_trip() {
        let record = VideoRecord::new("user-1", None)
            .uploaded(None)
            .failed(FailureCode::DispatchFailed, "run_task rejected");

        let back = document_to_record(&doc_for(&record)).unwrap();
        assert_eq!(back.status, VideoStatus::Failed);
        assert_eq!(back.failure_code, Some(FailureCode::DispatchFailed));
        assert_eq!(back.error_message.as_deref(), Some("run_task rejected"));
        assert!(back.job_id.is_none());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let record = VideoRecord::new("user-1", None);
        let mut doc = doc_for(&record);
        doc.fields
            .as_mut()
            .unwrap()
            .insert("status".into(), "transcoding".to_firestore_value());

        assert!(document_to_record(&doc).is_err());
    }

    #[test]
    fn test_missing_owner_is_rejected() {
        let record = VideoRecord::new("user-1", None);
        let mut doc = doc_for(&record);
        doc.fields.as_mut().unwrap().remove("owner_id");

        assert!(document_to_record(&doc).is_err());
    }

    #[test]
    fn test_null_job_id_maps_to_none() {
        let record = VideoRecord::new("user-1", None);
        let back = document_to_record(&doc_for(&record)).unwrap();
        assert!(back.job_id.is_none());
        assert_eq!(back.object_key, object_key_for("user-1", &record.video_id));
    }
}
