//! Application state.

use std::sync::Arc;

use vstream_firestore::{FirestoreClient, VideoRepository};
use vstream_storage::S3Client;
use vstream_transcode::EcsDispatcher;

use crate::auth::JwksCache;
use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub storage: Arc<S3Client>,
    pub videos: VideoRepository,
    pub dispatcher: Arc<EcsDispatcher>,
    pub jwks: Arc<JwksCache>,
}

impl AppState {
    /// Create new application state from the environment.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let storage = S3Client::from_env().await?;
        let firestore = FirestoreClient::from_env().await?;
        let dispatcher = EcsDispatcher::from_env().await?;
        let jwks = JwksCache::new().await?;

        Ok(Self {
            config,
            storage: Arc::new(storage),
            videos: VideoRepository::new(firestore),
            dispatcher: Arc::new(dispatcher),
            jwks: Arc::new(jwks),
        })
    }
}
