//! ECS Fargate launch plumbing.

use aws_config::BehaviorVersion;
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, ContainerOverride, KeyValuePair, LaunchType,
    NetworkConfiguration, TaskOverride,
};
use aws_sdk_ecs::Client;
use tracing::{info, warn};

use vstream_models::{JobId, VideoId};

use crate::error::{TranscodeError, TranscodeResult};

/// Configuration for the ECS dispatcher.
#[derive(Debug, Clone)]
pub struct EcsConfig {
    /// ECS cluster name
    pub cluster: String,
    /// Task definition (family:revision or full ARN)
    pub task_definition: String,
    /// Name of the transcoder container inside the task definition
    pub container_name: String,
    /// Subnets for the awsvpc network configuration
    pub subnets: Vec<String>,
    /// Security groups for the awsvpc network configuration
    pub security_groups: Vec<String>,
    /// Whether tasks get a public IP (needed outside NAT-ed subnets)
    pub assign_public_ip: bool,
    /// Webhook URL the task posts its completion event to
    pub callback_url: String,
}

impl EcsConfig {
    /// Create config from environment variables.
    pub fn from_env() -> TranscodeResult<Self> {
        let cluster = std::env::var("ECS_CLUSTER")
            .map_err(|_| TranscodeError::config_error("ECS_CLUSTER not set"))?;
        let task_definition = std::env::var("ECS_TASK_DEFINITION")
            .map_err(|_| TranscodeError::config_error("ECS_TASK_DEFINITION not set"))?;
        let callback_url = std::env::var("TRANSCODE_CALLBACK_URL")
            .map_err(|_| TranscodeError::config_error("TRANSCODE_CALLBACK_URL not set"))?;

        let subnets = parse_list(std::env::var("ECS_SUBNETS").ok());
        if subnets.is_empty() {
            return Err(TranscodeError::config_error("ECS_SUBNETS not set"));
        }

        Ok(Self {
            cluster,
            task_definition,
            container_name: std::env::var("ECS_CONTAINER_NAME")
                .unwrap_or_else(|_| "video-transcoder".to_string()),
            subnets,
            security_groups: parse_list(std::env::var("ECS_SECURITY_GROUPS").ok()),
            assign_public_ip: std::env::var("ECS_ASSIGN_PUBLIC_IP")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            callback_url,
        })
    }
}

fn parse_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Everything a single transcode task needs to know.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub video_id: VideoId,
    pub job_id: JobId,
    pub source_bucket: String,
    pub source_key: String,
    pub output_prefix: String,
}

impl LaunchSpec {
    /// Container environment handed to the task. The job id rides along so
    /// the task's completion notification can carry it back.
    pub fn container_environment(&self, callback_url: &str) -> Vec<(String, String)> {
        vec![
            ("VIDEO_ID".to_string(), self.video_id.to_string()),
            ("JOB_ID".to_string(), self.job_id.to_string()),
            ("SOURCE_BUCKET".to_string(), self.source_bucket.clone()),
            ("SOURCE_KEY".to_string(), self.source_key.clone()),
            ("OUTPUT_PREFIX".to_string(), self.output_prefix.clone()),
            ("CALLBACK_URL".to_string(), callback_url.to_string()),
        ]
    }
}

/// Transcode job dispatcher backed by ECS Fargate.
#[derive(Clone)]
pub struct EcsDispatcher {
    client: Client,
    config: EcsConfig,
}

impl EcsDispatcher {
    /// Create a dispatcher with the default AWS credential chain.
    pub async fn new(config: EcsConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self {
            client: Client::new(&sdk_config),
            config,
        }
    }

    /// Create from environment variables.
    pub async fn from_env() -> TranscodeResult<Self> {
        let config = EcsConfig::from_env()?;
        Ok(Self::new(config).await)
    }

    /// Launch one transcode task. Returns the task ARN on acceptance.
    ///
    /// A rejected launch is not retried here; the caller records the
    /// terminal dispatch failure on the video record.
    pub async fn launch(&self, spec: &LaunchSpec) -> TranscodeResult<String> {
        let env_vars: Vec<KeyValuePair> = spec
            .container_environment(&self.config.callback_url)
            .into_iter()
            .map(|(name, value)| KeyValuePair::builder().name(name).value(value).build())
            .collect();

        let mut vpc_builder = AwsVpcConfiguration::builder().assign_public_ip(
            if self.config.assign_public_ip {
                AssignPublicIp::Enabled
            } else {
                AssignPublicIp::Disabled
            },
        );
        for subnet in &self.config.subnets {
            vpc_builder = vpc_builder.subnets(subnet);
        }
        for sg in &self.config.security_groups {
            vpc_builder = vpc_builder.security_groups(sg);
        }
        let vpc_config = vpc_builder
            .build()
            .map_err(|e| TranscodeError::config_error(e.to_string()))?;

        let network_config = NetworkConfiguration::builder()
            .awsvpc_configuration(vpc_config)
            .build();

        let container_override = ContainerOverride::builder()
            .name(&self.config.container_name)
            .set_environment(Some(env_vars))
            .build();

        let task_override = TaskOverride::builder()
            .set_container_overrides(Some(vec![container_override]))
            .build();

        let response = self
            .client
            .run_task()
            .cluster(&self.config.cluster)
            .task_definition(&self.config.task_definition)
            .launch_type(LaunchType::Fargate)
            .network_configuration(network_config)
            .overrides(task_override)
            .started_by(spec.job_id.as_str())
            .count(1)
            .send()
            .await
            .map_err(|e| TranscodeError::AwsSdk(e.to_string()))?;

        if let Some(task) = response.tasks().first() {
            let arn = task.task_arn().unwrap_or_default().to_string();
            info!(
                video_id = %spec.video_id,
                job_id = %spec.job_id,
                task_arn = %arn,
                "Launched transcode task"
            );
            return Ok(arn);
        }

        let reasons: Vec<String> = response
            .failures()
            .iter()
            .map(|f| {
                format!(
                    "{}: {}",
                    f.reason().unwrap_or("unknown"),
                    f.detail().unwrap_or("")
                )
            })
            .collect();

        warn!(
            video_id = %spec.video_id,
            job_id = %spec.job_id,
            "ECS rejected transcode launch: {:?}",
            reasons
        );

        Err(TranscodeError::launch_rejected(if reasons.is_empty() {
            "run_task returned neither tasks nor failures".to_string()
        } else {
            reasons.join("; ")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            video_id: VideoId::from_string("v-1"),
            job_id: JobId::from_string("j-1"),
            source_bucket: "vstream-media".into(),
            source_key: "uploads/u-1/v-1/source.mp4".into(),
            output_prefix: "outputs/u-1/v-1/".into(),
        }
    }

    #[test]
    fn test_container_environment_carries_job_identity() {
        let env = spec().container_environment("https://api.example.com/api/videos/ecs-trigger");
        let get = |k: &str| {
            env.iter()
                .find(|(name, _)| name == k)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("VIDEO_ID"), Some("v-1"));
        assert_eq!(get("JOB_ID"), Some("j-1"));
        assert_eq!(get("SOURCE_KEY"), Some("uploads/u-1/v-1/source.mp4"));
        assert_eq!(get("OUTPUT_PREFIX"), Some("outputs/u-1/v-1/"));
        assert_eq!(
            get("CALLBACK_URL"),
            Some("https://api.example.com/api/videos/ecs-trigger")
        );
    }

    #[test]
    fn test_parse_list_trims_and_drops_empties() {
        assert_eq!(
            parse_list(Some("subnet-a, subnet-b,,".into())),
            vec!["subnet-a".to_string(), "subnet-b".to_string()]
        );
        assert!(parse_list(None).is_empty());
    }

    #[test]
    #[serial]
    fn test_config_requires_cluster() {
        std::env::remove_var("ECS_CLUSTER");
        std::env::set_var("ECS_TASK_DEFINITION", "video-transcoder:1");
        std::env::set_var("TRANSCODE_CALLBACK_URL", "https://api.example.com/hook");
        std::env::set_var("ECS_SUBNETS", "subnet-a");
        assert!(EcsConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("ECS_CLUSTER", "vstream");
        std::env::set_var("ECS_TASK_DEFINITION", "video-transcoder:1");
        std::env::set_var("TRANSCODE_CALLBACK_URL", "https://api.example.com/hook");
        std::env::set_var("ECS_SUBNETS", "subnet-a,subnet-b");
        std::env::set_var("ECS_SECURITY_GROUPS", "sg-1");
        std::env::remove_var("ECS_CONTAINER_NAME");
        std::env::remove_var("ECS_ASSIGN_PUBLIC_IP");

        let config = EcsConfig::from_env().unwrap();
        assert_eq!(config.cluster, "vstream");
        assert_eq!(config.container_name, "video-transcoder");
        assert_eq!(config.subnets.len(), 2);
        assert!(!config.assign_public_ip);
    }
}
