//! API configuration.

use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second (authenticated API routes)
    pub rate_limit_rps: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// TTL of presigned upload URLs
    pub upload_url_ttl: Duration,
    /// TTL of presigned playback URLs
    pub playback_url_ttl: Duration,
    /// A record still `processing` but untouched for this long is reported
    /// as stalled on the status view
    pub stalled_after_secs: i64,
    /// Whether any authenticated caller may read any record
    pub public_read: bool,
    /// Shared secret required on webhook calls, if set
    pub webhook_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            max_body_size: 1024 * 1024, // 1MB; no video bytes pass through the API
            environment: "development".to_string(),
            upload_url_ttl: Duration::from_secs(900),
            playback_url_ttl: Duration::from_secs(600),
            stalled_after_secs: 1800,
            public_read: false,
            webhook_token: None,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: std::env::var("RATE_LIMIT_RPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rate_limit_rps),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            upload_url_ttl: Duration::from_secs(
                std::env::var("UPLOAD_URL_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(900),
            ),
            playback_url_ttl: Duration::from_secs(
                std::env::var("PLAYBACK_URL_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            stalled_after_secs: std::env::var("STALLED_AFTER_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stalled_after_secs),
            public_read: std::env::var("PUBLIC_READ")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.public_read),
            webhook_token: std::env::var("WEBHOOK_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        for var in [
            "API_HOST",
            "API_PORT",
            "STALLED_AFTER_SECS",
            "PUBLIC_READ",
            "WEBHOOK_TOKEN",
        ] {
            std::env::remove_var(var);
        }

        let config = ApiConfig::from_env();
        assert_eq!(config.port, 8000);
        assert_eq!(config.stalled_after_secs, 1800);
        assert!(!config.public_read);
        assert!(config.webhook_token.is_none());
    }

    #[test]
    #[serial]
    fn test_webhook_token_blank_is_unset() {
        std::env::set_var("WEBHOOK_TOKEN", "");
        let config = ApiConfig::from_env();
        assert!(config.webhook_token.is_none());
        std::env::remove_var("WEBHOOK_TOKEN");
    }

    #[test]
    #[serial]
    fn test_visibility_policy_toggle() {
        std::env::set_var("PUBLIC_READ", "true");
        let config = ApiConfig::from_env();
        assert!(config.public_read);
        std::env::remove_var("PUBLIC_READ");
    }
}
