//! S3 client implementation.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Longest object key we accept from webhook payloads.
const MAX_KEY_LENGTH: usize = 1024;

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket holding raw uploads and transcoded output
    pub bucket_name: String,
    /// Region
    pub region: String,
    /// Optional S3-compatible endpoint (MinIO/localstack in dev)
    pub endpoint_url: Option<String>,
    /// Optional static credentials; default AWS chain when absent
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            bucket_name: std::env::var("S3_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("S3_BUCKET_NAME not set"))?,
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint_url: std::env::var("S3_ENDPOINT_URL").ok(),
            access_key_id: std::env::var("S3_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY").ok(),
        })
    }
}

/// S3 storage client.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

impl S3Client {
    /// Create a new S3 client from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        let client = match (&config.access_key_id, &config.secret_access_key) {
            (Some(key), Some(secret)) => {
                let credentials = Credentials::new(key, secret, None, None, "vstream");

                let mut builder = Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .credentials_provider(credentials);

                if let Some(endpoint) = &config.endpoint_url {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }

                Client::from_conf(builder.build())
            }
            _ => {
                // Default provider chain (instance role, env vars, profile).
                let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                Client::new(&sdk_config)
            }
        };

        Ok(Self {
            client,
            bucket: config.bucket_name,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = S3Config::from_env()?;
        Self::new(config).await
    }

    /// Bucket this client talks to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Generate a presigned PUT URL: the time-limited write grant handed to
    /// an admitted uploader.
    pub async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        validate_object_key(key)?;

        let presign_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        debug!(key = %key, "Presigned upload URL issued");
        Ok(presigned.uri().to_string())
    }

    /// Generate a presigned GET URL for playback of transcoded output.
    pub async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        validate_object_key(key)?;

        let presign_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    /// Check if an object exists.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.to_string().contains("NotFound") || e.to_string().contains("NoSuchKey") {
                    Ok(false)
                } else {
                    Err(StorageError::AwsSdk(e.to_string()))
                }
            }
        }
    }

    /// Check connectivity by performing a head-bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("S3 connectivity check failed: {}", e)))?;
        Ok(())
    }
}

/// Reject keys that could escape the expected layout or blow up URLs.
pub fn validate_object_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_key("empty key"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(StorageError::invalid_key("key too long"));
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StorageError::invalid_key(format!(
            "key '{}' contains path traversal",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_valid_object_keys() {
        assert!(validate_object_key("uploads/user-1/v-1/source.mp4").is_ok());
        assert!(validate_object_key("outputs/user-1/v-1/playlist.m3u8").is_ok());
    }

    #[test]
    fn test_invalid_object_keys() {
        assert!(validate_object_key("").is_err());
        assert!(validate_object_key("/absolute/key").is_err());
        assert!(validate_object_key("uploads/../secrets").is_err());
        assert!(validate_object_key(&"k".repeat(2048)).is_err());
    }

    #[test]
    #[serial]
    fn test_config_requires_bucket() {
        std::env::remove_var("S3_BUCKET_NAME");
        assert!(S3Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        std::env::set_var("S3_BUCKET_NAME", "vstream-media");
        std::env::remove_var("AWS_REGION");
        std::env::remove_var("S3_ENDPOINT_URL");
        let config = S3Config::from_env().unwrap();
        assert_eq!(config.bucket_name, "vstream-media");
        assert_eq!(config.region, "us-east-1");
        assert!(config.endpoint_url.is_none());
        std::env::remove_var("S3_BUCKET_NAME");
    }
}
