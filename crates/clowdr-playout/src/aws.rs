//! AWS channel stack service
//!
//! Creates one CloudFormation stack per broadcast room and keeps the
//! deployment notifications topic subscribed to this service's notify
//! endpoint. The actual AWS calls sit behind [`StackDeployer`] and
//! [`TopicSubscriber`]; [`crate::sns::SnsSubscriber`] is the SNS one.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clowdr_core::{ConferenceId, RoomId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::channel_stack::{ChannelStack, ChannelStackProps, DEFAULT_SHORT_ID_LENGTH, short_id};
use crate::config::{AwsConfig, HostConfig};
use crate::error::PlayoutResult;
use crate::notify::StackEvent;

/// Path SNS posts CloudFormation notifications to
pub const NOTIFY_PATH: &str = "/aws/cloudformation/notify";

/// Everything a deployer needs to create or update a stack
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub stack: ChannelStackManifest,
    pub notification_arns: Vec<String>,
}

/// Stack metadata plus its template
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStackManifest {
    pub stack_name: String,
    pub description: String,
    pub tags: BTreeMap<String, String>,
    pub account: String,
    pub region: String,
    pub template: serde_json::Value,
}

impl From<ChannelStack> for ChannelStackManifest {
    fn from(stack: ChannelStack) -> Self {
        Self {
            stack_name: stack.stack_name,
            description: stack.description,
            tags: stack.tags,
            account: stack.account,
            region: stack.region,
            template: stack.template,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStackResult {
    pub stack_name: String,
    /// ARN of the created stack, when the deployer talks to CloudFormation
    pub stack_arn: Option<String>,
    /// Nothing changed
    pub no_op: bool,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

#[async_trait]
pub trait StackDeployer: Send + Sync {
    async fn deploy(&self, request: DeployRequest) -> PlayoutResult<DeployStackResult>;
}

#[async_trait]
pub trait TopicSubscriber: Send + Sync {
    /// Subscribe `endpoint` to `topic_arn` over `protocol` (`http` or `https`)
    async fn subscribe(&self, protocol: &str, topic_arn: &str, endpoint: &str) -> PlayoutResult<()>;
}

/// Writes each stack as `<dir>/<stackName>.template.json` plus a
/// `<stackName>.deploy.json` manifest, for deployment by external tooling
pub struct TemplateDirDeployer {
    dir: PathBuf,
}

impl TemplateDirDeployer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl StackDeployer for TemplateDirDeployer {
    async fn deploy(&self, request: DeployRequest) -> PlayoutResult<DeployStackResult> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = request.stack.stack_name.clone();

        let template = serde_json::to_vec_pretty(&request.stack.template)?;
        let template_path = self.dir.join(format!("{}.template.json", name));
        tokio::fs::write(&template_path, template).await?;

        let manifest = serde_json::to_vec_pretty(&request)?;
        tokio::fs::write(self.dir.join(format!("{}.deploy.json", name)), manifest).await?;

        info!(stack = %name, path = %template_path.display(), "Wrote stack template");
        Ok(DeployStackResult {
            stack_name: name,
            stack_arn: None,
            no_op: false,
            outputs: BTreeMap::new(),
        })
    }
}

pub struct AwsService {
    config: AwsConfig,
    host: HostConfig,
    deployer: Arc<dyn StackDeployer>,
    subscriber: Arc<dyn TopicSubscriber>,
    events: broadcast::Sender<StackEvent>,
}

impl AwsService {
    pub fn new(
        config: AwsConfig,
        host: HostConfig,
        deployer: Arc<dyn StackDeployer>,
        subscriber: Arc<dyn TopicSubscriber>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            host,
            deployer,
            subscriber,
            events,
        }
    }

    pub fn config(&self) -> &AwsConfig {
        &self.config
    }

    /// Public base URL of this service
    pub fn get_host_url(&self) -> String {
        self.host.url()
    }

    pub fn notification_url(&self) -> String {
        format!("{}{}", self.get_host_url(), NOTIFY_PATH)
    }

    /// Subscribe the CloudFormation notifications topic to our notify endpoint
    pub async fn init(&self) -> PlayoutResult<()> {
        info!("Subscribing to CloudFormation SNS notifications");
        let endpoint = self.notification_url();
        self.subscribe_to_topic(&self.config.notifications_topic_arn, &endpoint)
            .await
    }

    pub async fn subscribe_to_topic(&self, topic_arn: &str, endpoint: &str) -> PlayoutResult<()> {
        self.subscriber
            .subscribe(self.host.protocol(), topic_arn, endpoint)
            .await
    }

    /// Synthesize and deploy the broadcast channel stack for a room
    ///
    /// Deployment failures are returned as-is; nothing is rolled back here.
    pub async fn create_new_channel_stack(
        &self,
        room_id: RoomId,
        room_name: &str,
        conference_id: ConferenceId,
    ) -> PlayoutResult<DeployStackResult> {
        let props = ChannelStackProps {
            aws_prefix: self.config.prefix.clone(),
            input_security_group_id: self.config.input_security_group_id.clone(),
            media_live_service_role_arn: self.config.media_live_service_role_arn.clone(),
            room_id,
            room_name: room_name.to_string(),
            conference_id,
            account: self.config.account_id.clone(),
            region: self.config.region.clone(),
        };
        let stack = ChannelStack::synthesize(
            &props,
            &short_id(DEFAULT_SHORT_ID_LENGTH),
            || short_id(DEFAULT_SHORT_ID_LENGTH),
        );

        info!(
            room_id = %room_id,
            conference_id = %conference_id,
            stack = %stack.stack_name,
            "Starting deployment"
        );
        let request = DeployRequest {
            stack: stack.into(),
            notification_arns: vec![self.config.notifications_topic_arn.clone()],
        };
        self.deployer.deploy(request).await.inspect_err(|e| {
            warn!(room_id = %room_id, error = %e, "Channel stack deployment failed");
        })
    }

    /// Listen for stack events received on the notify endpoint
    pub fn stack_events(&self) -> broadcast::Receiver<StackEvent> {
        self.events.subscribe()
    }

    /// Hand a stack event to every listener; events with no listener are dropped
    pub fn publish(&self, event: StackEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlayoutError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingDeployer {
        requests: Mutex<Vec<DeployRequest>>,
        fail_with: Option<String>,
    }

    impl RecordingDeployer {
        fn failing(message: impl Into<String>) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                fail_with: Some(message.into()),
            }
        }

        fn requests(&self) -> Vec<DeployRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl StackDeployer for RecordingDeployer {
        async fn deploy(&self, request: DeployRequest) -> PlayoutResult<DeployStackResult> {
            let stack_name = request.stack.stack_name.clone();
            self.requests.lock().push(request);
            if let Some(message) = &self.fail_with {
                return Err(PlayoutError::Deploy(message.clone()));
            }
            Ok(DeployStackResult {
                stack_name,
                stack_arn: None,
                no_op: false,
                outputs: BTreeMap::new(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSubscriber(Mutex<Vec<(String, String, String)>>);

    #[async_trait]
    impl TopicSubscriber for RecordingSubscriber {
        async fn subscribe(&self, protocol: &str, topic_arn: &str, endpoint: &str) -> PlayoutResult<()> {
            self.0
                .lock()
                .push((protocol.into(), topic_arn.into(), endpoint.into()));
            Ok(())
        }
    }

    fn aws_config() -> AwsConfig {
        AwsConfig {
            prefix: "clowdr-dev".into(),
            input_security_group_id: "1234567".into(),
            media_live_service_role_arn: "arn:aws:iam::111122223333:role/MediaLive".into(),
            notifications_topic_arn: "arn:aws:sns:eu-west-1:111122223333:cfn".into(),
            region: "eu-west-1".into(),
            account_id: "111122223333".into(),
        }
    }

    fn service(
        secure: bool,
        deployer: Arc<dyn StackDeployer>,
    ) -> (AwsService, Arc<RecordingSubscriber>) {
        let subscriber = Arc::new(RecordingSubscriber::default());
        let host = HostConfig {
            domain: "playout.example.org".into(),
            secure,
        };
        let service = AwsService::new(aws_config(), host, deployer, subscriber.clone());
        (service, subscriber)
    }

    #[tokio::test]
    async fn test_init_subscribes_notify_endpoint() {
        let (service, subscriber) = service(true, Arc::new(RecordingDeployer::default()));
        service.init().await.unwrap();

        let calls = subscriber.0.lock().clone();
        assert_eq!(
            calls,
            vec![(
                "https".to_string(),
                "arn:aws:sns:eu-west-1:111122223333:cfn".to_string(),
                "https://playout.example.org/aws/cloudformation/notify".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_insecure_host_subscribes_over_http() {
        let (service, subscriber) = service(false, Arc::new(RecordingDeployer::default()));
        service.init().await.unwrap();
        let calls = subscriber.0.lock().clone();
        assert_eq!(calls[0].0, "http");
        assert!(calls[0].2.starts_with("http://"));
    }

    #[tokio::test]
    async fn test_create_new_channel_stack() {
        let deployer = Arc::new(RecordingDeployer::default());
        let (service, _) = service(true, deployer.clone());
        let room = RoomId::generate();
        let conference = ConferenceId::generate();

        let result = service
            .create_new_channel_stack(room, "Main stage", conference)
            .await
            .unwrap();
        assert!(result.stack_name.starts_with("clowdr-dev-room-C"));
        assert_eq!(result.stack_name.len(), "clowdr-dev-room-".len() + 6);

        let requests = deployer.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.stack.stack_name, result.stack_name);
        assert_eq!(
            request.notification_arns,
            vec!["arn:aws:sns:eu-west-1:111122223333:cfn".to_string()]
        );
        assert_eq!(request.stack.tags["roomId"], room.to_string());
        assert_eq!(request.stack.tags["roomName"], "Main stage");
        assert_eq!(
            request.stack.description,
            format!("Broadcast channel stack for room {}", room)
        );
    }

    #[tokio::test]
    async fn test_deployment_failure_is_surfaced() {
        let (service, _) = service(true, Arc::new(RecordingDeployer::failing("quota exceeded")));
        let err = service
            .create_new_channel_stack(RoomId::generate(), "Room", ConferenceId::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, PlayoutError::Deploy(message) if message == "quota exceeded"));
    }

    #[tokio::test]
    async fn test_template_dir_deployer_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = Arc::new(TemplateDirDeployer::new(dir.path()));
        let (service, _) = service(true, deployer);

        let result = service
            .create_new_channel_stack(RoomId::generate(), "Room", ConferenceId::generate())
            .await
            .unwrap();

        let template_path = dir.path().join(format!("{}.template.json", result.stack_name));
        let template: serde_json::Value =
            serde_json::from_slice(&std::fs::read(template_path).unwrap()).unwrap();
        assert_eq!(template["AWSTemplateFormatVersion"], "2010-09-09");
        assert!(
            dir.path()
                .join(format!("{}.deploy.json", result.stack_name))
                .exists()
        );
    }

    #[test]
    fn test_publish_without_listeners() {
        let (service, _) = service(true, Arc::new(RecordingDeployer::default()));
        let event = StackEvent {
            stack_id: "arn".into(),
            stack_name: "s".into(),
            logical_resource_id: "s".into(),
            resource_status: "CREATE_COMPLETE".into(),
            resource_type: "AWS::CloudFormation::Stack".into(),
            physical_resource_id: None,
            resource_status_reason: None,
            timestamp: None,
        };
        assert_eq!(service.publish(event.clone()), 0);

        let mut events = service.stack_events();
        assert_eq!(service.publish(event.clone()), 1);
        assert_eq!(events.try_recv().unwrap(), event);
    }
}
