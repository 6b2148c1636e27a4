//! Video record models and the pipeline status lattice.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::job::JobId;

/// Unique identifier for a video record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Pipeline status of a video record.
///
/// Statuses form a forward-only lattice:
/// `PendingUpload -> Uploaded -> Processing -> {Ready, Failed}`.
/// `Ready` and `Failed` are terminal; no event moves a record backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Record created, waiting for the client to upload to object storage
    #[default]
    PendingUpload,
    /// Raw object landed in storage, transcode not yet claimed
    Uploaded,
    /// Transcode job claimed and launched
    Processing,
    /// Transcode finished, output available
    Ready,
    /// Pipeline gave up (dispatch rejected or transcode failed)
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::PendingUpload => "pending_upload",
            VideoStatus::Uploaded => "uploaded",
            VideoStatus::Processing => "processing",
            VideoStatus::Ready => "ready",
            VideoStatus::Failed => "failed",
        }
    }

    /// Parse from the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_upload" => Some(VideoStatus::PendingUpload),
            "uploaded" => Some(VideoStatus::Uploaded),
            "processing" => Some(VideoStatus::Processing),
            "ready" => Some(VideoStatus::Ready),
            "failed" => Some(VideoStatus::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state (no more transitions accepted).
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Ready | VideoStatus::Failed)
    }

    /// Whether the lattice permits moving from `self` to `next`.
    pub fn can_transition(&self, next: VideoStatus) -> bool {
        use VideoStatus::*;
        matches!(
            (self, next),
            (PendingUpload, Uploaded)
                | (Uploaded, Processing)
                // Dispatch rejection fails a record without a job ever launching.
                | (Uploaded, Failed)
                | (Processing, Ready)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reason class for a `Failed` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// The container-execution service rejected the launch request
    DispatchFailed,
    /// The transcode job itself reported failure
    TranscodeFailed,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::DispatchFailed => "DISPATCH_FAILED",
            FailureCode::TranscodeFailed => "TRANSCODE_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DISPATCH_FAILED" => Some(FailureCode::DispatchFailed),
            "TRANSCODE_FAILED" => Some(FailureCode::TranscodeFailed),
            _ => None,
        }
    }
}

/// A video record as stored in the record store.
///
/// The store holds the only authoritative copy; handlers operate on a
/// snapshot plus the document version they read it at.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoRecord {
    /// Unique video ID, assigned at admission
    pub video_id: VideoId,

    /// Owning principal (immutable)
    pub owner_id: String,

    /// Location of the raw upload in object storage (immutable once set)
    pub object_key: String,

    /// Optional client-supplied title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Pipeline status
    #[serde(default)]
    pub status: VideoStatus,

    /// Transcode job in flight (or finished); kept for audit once launched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,

    /// Storage-provided checksum of the raw upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Output location once transcoding succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,

    /// Failure class (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<FailureCode>,

    /// Human-readable failure detail (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Monotonically non-decreasing view counter
    #[serde(default)]
    pub view_count: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    /// Create a new record at admission time, status `PendingUpload`.
    ///
    /// The object key is scoped under the owner so uploads from different
    /// principals can never collide.
    pub fn new(owner_id: impl Into<String>, title: Option<String>) -> Self {
        let owner_id = owner_id.into();
        let video_id = VideoId::new();
        let now = Utc::now();

        Self {
            object_key: object_key_for(&owner_id, &video_id),
            video_id,
            owner_id,
            title,
            status: VideoStatus::PendingUpload,
            job_id: None,
            checksum: None,
            output_ref: None,
            failure_code: None,
            error_message: None,
            view_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the raw object as landed in storage.
    pub fn uploaded(mut self, checksum: Option<String>) -> Self {
        self.status = VideoStatus::Uploaded;
        self.checksum = checksum;
        self.updated_at = Utc::now();
        self
    }

    /// Claim the transcode job: the `Uploaded -> Processing` move plus the
    /// job-id write that must land in a single conditional store update.
    pub fn processing(mut self, job_id: JobId) -> Self {
        self.status = VideoStatus::Processing;
        self.job_id = Some(job_id);
        self.updated_at = Utc::now();
        self
    }

    /// Mark as ready with the transcoder's output reference.
    pub fn ready(mut self, output_ref: impl Into<String>) -> Self {
        self.status = VideoStatus::Ready;
        self.output_ref = Some(output_ref.into());
        self.updated_at = Utc::now();
        self
    }

    /// Mark as failed.
    pub fn failed(mut self, code: FailureCode, message: impl Into<String>) -> Self {
        self.status = VideoStatus::Failed;
        self.failure_code = Some(code);
        self.error_message = Some(message.into());
        if code == FailureCode::DispatchFailed {
            // A rejected launch never produced a job to audit.
            self.job_id = None;
        }
        self.updated_at = Utc::now();
        self
    }

    /// Derived monitoring classification: a record that has sat in
    /// `Processing` past the deadline without any update. Not a lattice
    /// state; the pipeline cannot tell a slow job from a lost one.
    pub fn is_stalled(&self, stalled_after_secs: i64) -> bool {
        self.status == VideoStatus::Processing
            && (Utc::now() - self.updated_at).num_seconds() > stalled_after_secs
    }
}

/// Build the owner-scoped object key for a raw upload.
pub fn object_key_for(owner_id: &str, video_id: &VideoId) -> String {
    format!("uploads/{}/{}/source.mp4", owner_id, video_id)
}

/// Prefix under which a transcode job writes its output.
pub fn output_prefix_for(owner_id: &str, video_id: &VideoId) -> String {
    format!("outputs/{}/{}/", owner_id, video_id)
}

/// Summary of a video for list views.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoSummary {
    pub video_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: String,
    pub view_count: u64,
    pub created_at: DateTime<Utc>,
}

impl From<&VideoRecord> for VideoSummary {
    fn from(r: &VideoRecord) -> Self {
        Self {
            video_id: r.video_id.as_str().to_string(),
            title: r.title.clone(),
            status: r.status.as_str().to_string(),
            view_count: r.view_count,
            created_at: r.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_generation() {
        let id1 = VideoId::new();
        let id2 = VideoId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_record_creation() {
        let record = VideoRecord::new("user-1", Some("Test Video".into()));
        assert_eq!(record.status, VideoStatus::PendingUpload);
        assert!(record.job_id.is_none());
        assert!(record
            .object_key
            .starts_with(&format!("uploads/user-1/{}", record.video_id)));
    }

    #[test]
    fn test_object_key_is_owner_scoped() {
        let id = VideoId::from_string("v-1");
        assert_eq!(object_key_for("alice", &id), "uploads/alice/v-1/source.mp4");
        assert_ne!(object_key_for("alice", &id), object_key_for("bob", &id));
    }

    #[test]
    fn test_lattice_forward_moves() {
        use VideoStatus::*;
        assert!(PendingUpload.can_transition(Uploaded));
        assert!(Uploaded.can_transition(Processing));
        assert!(Uploaded.can_transition(Failed));
        assert!(Processing.can_transition(Ready));
        assert!(Processing.can_transition(Failed));
    }

    #[test]
    fn test_lattice_rejects_regression() {
        use VideoStatus::*;
        assert!(!Uploaded.can_transition(PendingUpload));
        assert!(!Processing.can_transition(Uploaded));
        assert!(!Ready.can_transition(Processing));
        assert!(!Failed.can_transition(Processing));
        assert!(!PendingUpload.can_transition(Processing));
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        use VideoStatus::*;
        for terminal in [Ready, Failed] {
            assert!(terminal.is_terminal());
            for next in [PendingUpload, Uploaded, Processing, Ready, Failed] {
                assert!(!terminal.can_transition(next));
            }
        }
    }

    #[test]
    fn test_status_round_trip() {
        use VideoStatus::*;
        for status in [PendingUpload, Uploaded, Processing, Ready, Failed] {
            assert_eq!(VideoStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(VideoStatus::parse("bogus"), None);
    }

    #[test]
    fn test_claim_sets_job_id() {
        let job = JobId::new();
        let record = VideoRecord::new("user-1", None)
            .uploaded(Some("etag-1".into()))
            .processing(job.clone());
        assert_eq!(record.status, VideoStatus::Processing);
        assert_eq!(record.job_id, Some(job));
    }

    #[test]
    fn test_dispatch_failure_leaves_no_job() {
        let record = VideoRecord::new("user-1", None)
            .uploaded(None)
            .failed(FailureCode::DispatchFailed, "run_task rejected");
        assert_eq!(record.status, VideoStatus::Failed);
        assert_eq!(record.failure_code, Some(FailureCode::DispatchFailed));
        assert!(record.job_id.is_none());
    }

    #[test]
    fn test_transcode_failure_keeps_job_for_audit() {
        let job = JobId::new();
        let record = VideoRecord::new("user-1", None)
            .uploaded(None)
            .processing(job.clone())
            .failed(FailureCode::TranscodeFailed, "exit code 1");
        assert_eq!(record.job_id, Some(job));
    }

    #[test]
    fn test_stalled_detection() {
        let mut record = VideoRecord::new("user-1", None)
            .uploaded(None)
            .processing(JobId::new());

        // Freshly updated, not stalled
        assert!(!record.is_stalled(60));

        // Simulate a long-quiet processing record
        record.updated_at = Utc::now() - chrono::Duration::seconds(300);
        assert!(record.is_stalled(60));

        // Terminal records are never stalled
        let done = record.ready("outputs/user-1/v/playlist.m3u8");
        assert!(!done.is_stalled(60));
    }
}
