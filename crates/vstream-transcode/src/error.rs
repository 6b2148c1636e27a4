//! Dispatcher error types.

use thiserror::Error;

/// Result type for dispatch operations.
pub type TranscodeResult<T> = Result<T, TranscodeError>;

/// Errors that can occur while launching a transcode job.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Failed to configure dispatcher: {0}")]
    ConfigError(String),

    #[error("Launch rejected by execution service: {0}")]
    LaunchRejected(String),

    #[error("AWS SDK error: {0}")]
    AwsSdk(String),
}

impl TranscodeError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn launch_rejected(msg: impl Into<String>) -> Self {
        Self::LaunchRejected(msg.into())
    }
}
