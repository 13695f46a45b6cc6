//! The SNS notify endpoint, driven through `tower::ServiceExt::oneshot`

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use clowdr_playout::{
    AwsConfig, AwsService, HostConfig, NOTIFY_PATH, NotifyState, PlayoutResult,
    SubscriptionConfirmer, TemplateDirDeployer, TopicSubscriber, build_router,
};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::json;
use tower::ServiceExt;

#[derive(Default)]
struct RecordingConfirmer(Mutex<Vec<String>>);

#[async_trait]
impl SubscriptionConfirmer for RecordingConfirmer {
    async fn confirm(&self, subscribe_url: &str) -> PlayoutResult<()> {
        self.0.lock().push(subscribe_url.to_string());
        Ok(())
    }
}

/// The endpoint tests never subscribe
struct UnusedSubscriber;

#[async_trait]
impl TopicSubscriber for UnusedSubscriber {
    async fn subscribe(&self, _: &str, _: &str, _: &str) -> PlayoutResult<()> {
        unreachable!("notify endpoint tests do not subscribe")
    }
}

struct Harness {
    aws: Arc<AwsService>,
    confirmer: Arc<RecordingConfirmer>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        clowdr_logging::init_testing();
        let dir = tempfile::tempdir().unwrap();
        let aws = Arc::new(AwsService::new(
            AwsConfig {
                prefix: "clowdr-test".into(),
                input_security_group_id: "1234567".into(),
                media_live_service_role_arn: "arn:aws:iam::111122223333:role/MediaLive".into(),
                notifications_topic_arn: "arn:aws:sns:eu-west-1:111122223333:cfn".into(),
                region: "eu-west-1".into(),
                account_id: "111122223333".into(),
            },
            HostConfig {
                domain: "playout.example.org".into(),
                secure: true,
            },
            Arc::new(TemplateDirDeployer::new(dir.path())),
            Arc::new(UnusedSubscriber),
        ));
        Self {
            aws,
            confirmer: Arc::new(RecordingConfirmer::default()),
            _dir: dir,
        }
    }

    async fn post(&self, body: String) -> StatusCode {
        let state = NotifyState {
            aws: self.aws.clone(),
            confirmer: self.confirmer.clone(),
        };
        let request = Request::builder()
            .method("POST")
            .uri(NOTIFY_PATH)
            .header("content-type", "text/plain; charset=UTF-8")
            .header("x-amz-sns-message-type", "Notification")
            .body(Body::from(body))
            .unwrap();
        let response = build_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let _ = response.into_body().collect().await.unwrap();
        status
    }
}

fn envelope(kind: &str, message: &str) -> serde_json::Value {
    json!({
        "Type": kind,
        "MessageId": "165545c9-2a5c-472c-8df2-7ff2be2b3b1b",
        "TopicArn": "arn:aws:sns:eu-west-1:111122223333:cfn",
        "Subject": "AWS CloudFormation Notification",
        "Message": message,
        "Timestamp": "2021-02-03T10:00:00.000Z",
        "SignatureVersion": "1",
        "Signature": "EXAMPLE",
        "SigningCertURL": "https://sns.eu-west-1.amazonaws.com/cert.pem"
    })
}

#[tokio::test]
async fn test_subscription_confirmation_is_confirmed() {
    let harness = Harness::new();
    let mut body = envelope("SubscriptionConfirmation", "You have chosen to subscribe");
    body["SubscribeURL"] =
        json!("https://sns.eu-west-1.amazonaws.com/?Action=ConfirmSubscription&Token=t");
    body["Token"] = json!("t");

    assert_eq!(harness.post(body.to_string()).await, StatusCode::OK);
    assert_eq!(
        harness.confirmer.0.lock().clone(),
        vec!["https://sns.eu-west-1.amazonaws.com/?Action=ConfirmSubscription&Token=t".to_string()]
    );
}

#[tokio::test]
async fn test_confirmation_without_url_is_rejected() {
    let harness = Harness::new();
    let body = envelope("SubscriptionConfirmation", "You have chosen to subscribe");
    assert_eq!(harness.post(body.to_string()).await, StatusCode::BAD_REQUEST);
    assert!(harness.confirmer.0.lock().is_empty());
}

#[tokio::test]
async fn test_stack_notification_reaches_listeners() {
    let harness = Harness::new();
    let mut events = harness.aws.stack_events();
    let message = "StackId='arn:aws:cloudformation:eu-west-1:111122223333:stack/clowdr-test-room-Cq1w2e/9'\n\
        LogicalResourceId='LiveChannel'\n\
        PhysicalResourceId='1234567'\n\
        ResourceStatus='CREATE_IN_PROGRESS'\n\
        ResourceStatusReason='Resource creation Initiated'\n\
        ResourceType='AWS::MediaLive::Channel'\n\
        StackName='clowdr-test-room-Cq1w2e'\n";

    let status = harness
        .post(envelope("Notification", message).to_string())
        .await;
    assert_eq!(status, StatusCode::OK);

    let event = events.try_recv().unwrap();
    assert_eq!(event.stack_name, "clowdr-test-room-Cq1w2e");
    assert_eq!(event.logical_resource_id, "LiveChannel");
    assert_eq!(event.resource_status, "CREATE_IN_PROGRESS");
    assert!(!event.is_stack_event());
    assert_eq!(
        event.resource_status_reason.as_deref(),
        Some("Resource creation Initiated")
    );
}

#[tokio::test]
async fn test_malformed_messages_are_bad_requests() {
    let harness = Harness::new();
    assert_eq!(harness.post("not json".into()).await, StatusCode::BAD_REQUEST);
    assert_eq!(
        harness
            .post(envelope("Notification", "hello").to_string())
            .await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        harness
            .post(envelope("Mystery", "hello").to_string())
            .await,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn test_deploy_then_receive_completion() {
    let harness = Harness::new();
    let mut events = harness.aws.stack_events();
    let result = harness
        .aws
        .create_new_channel_stack(
            clowdr_core::RoomId::generate(),
            "Main stage",
            clowdr_core::ConferenceId::generate(),
        )
        .await
        .unwrap();

    let message = format!(
        "StackId='arn:aws:cloudformation:eu-west-1:111122223333:stack/{name}/1'\n\
         LogicalResourceId='{name}'\n\
         ResourceStatus='CREATE_COMPLETE'\n\
         ResourceType='AWS::CloudFormation::Stack'\n\
         StackName='{name}'\n",
        name = result.stack_name
    );
    let status = harness
        .post(envelope("Notification", &message).to_string())
        .await;
    assert_eq!(status, StatusCode::OK);

    let event = events.try_recv().unwrap();
    assert!(event.is_stack_event());
    assert_eq!(event.stack_name, result.stack_name);
}
