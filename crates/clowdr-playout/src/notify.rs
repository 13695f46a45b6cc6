//! CloudFormation notifications delivered over SNS
//!
//! SNS posts JSON envelopes (with a `text/plain` content type) to
//! [`NOTIFY_PATH`]. Subscription confirmations are confirmed by fetching the
//! `SubscribeURL`; notifications carry CloudFormation's `Key='value'` line
//! format and are turned into [`StackEvent`]s for in-process listeners.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use clowdr_logging::RequestContext;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, warn};

use crate::aws::{AwsService, NOTIFY_PATH};
use crate::error::{PlayoutError, PlayoutResult};

/// SNS HTTP(S) delivery envelope
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsMessage {
    #[serde(rename = "Type")]
    pub kind: String,
    pub message_id: String,
    pub topic_arn: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "SubscribeURL", default)]
    pub subscribe_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// One CloudFormation stack or resource status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackEvent {
    pub stack_id: String,
    pub stack_name: String,
    pub logical_resource_id: String,
    pub resource_status: String,
    pub resource_type: String,
    pub physical_resource_id: Option<String>,
    pub resource_status_reason: Option<String>,
    pub timestamp: Option<String>,
}

impl StackEvent {
    /// Parse CloudFormation's notification body
    ///
    /// ```text
    /// StackId='arn:aws:cloudformation:...'
    /// LogicalResourceId='clowdr-dev-room-Cab12x'
    /// ResourceStatus='CREATE_COMPLETE'
    /// ...
    /// ```
    pub fn parse(message: &str) -> PlayoutResult<Self> {
        let fields: HashMap<&str, &str> = message
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| {
                let value = value.trim();
                let value = value
                    .strip_prefix('\'')
                    .and_then(|v| v.strip_suffix('\''))
                    .unwrap_or(value);
                (key.trim(), value)
            })
            .collect();

        let required = |key: &str| -> PlayoutResult<String> {
            fields
                .get(key)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
                .ok_or_else(|| PlayoutError::InvalidNotification(format!("missing {}", key)))
        };
        let optional = |key: &str| {
            fields
                .get(key)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };

        Ok(Self {
            stack_id: required("StackId")?,
            stack_name: required("StackName")?,
            logical_resource_id: required("LogicalResourceId")?,
            resource_status: required("ResourceStatus")?,
            resource_type: required("ResourceType")?,
            physical_resource_id: optional("PhysicalResourceId"),
            resource_status_reason: optional("ResourceStatusReason"),
            timestamp: optional("Timestamp"),
        })
    }

    /// Event about the stack as a whole rather than one of its resources
    pub fn is_stack_event(&self) -> bool {
        self.resource_type == "AWS::CloudFormation::Stack"
    }
}

#[async_trait]
pub trait SubscriptionConfirmer: Send + Sync {
    async fn confirm(&self, subscribe_url: &str) -> PlayoutResult<()>;
}

/// Confirms subscriptions by fetching the `SubscribeURL` from SNS
pub struct HttpConfirmer {
    client: reqwest::Client,
}

impl HttpConfirmer {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpConfirmer {
    fn default() -> Self {
        Self::new()
    }
}

/// Only HTTPS URLs on an `amazonaws.com` host are fetched
pub fn is_trusted_subscribe_url(raw: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(raw) else {
        return false;
    };
    url.scheme() == "https"
        && url
            .host_str()
            .is_some_and(|host| host.ends_with(".amazonaws.com"))
}

#[async_trait]
impl SubscriptionConfirmer for HttpConfirmer {
    async fn confirm(&self, subscribe_url: &str) -> PlayoutResult<()> {
        if !is_trusted_subscribe_url(subscribe_url) {
            return Err(PlayoutError::UntrustedUrl(subscribe_url.to_string()));
        }
        self.client
            .get(subscribe_url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotifyState {
    pub aws: Arc<AwsService>,
    pub confirmer: Arc<dyn SubscriptionConfirmer>,
}

async fn root() -> &'static str {
    "Clowdr playout"
}

async fn cloudformation_notify(State(state): State<NotifyState>, body: Bytes) -> StatusCode {
    let span = RequestContext::new().span("sns");
    async move {
        match handle_sns(&state, &body).await {
            Ok(()) => StatusCode::OK,
            Err(e) => {
                warn!(error = %e, "Could not handle SNS message");
                match e {
                    PlayoutError::InvalidNotification(_)
                    | PlayoutError::UntrustedUrl(_)
                    | PlayoutError::Serialization(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                }
            }
        }
    }
    .instrument(span)
    .await
}

async fn handle_sns(state: &NotifyState, body: &[u8]) -> PlayoutResult<()> {
    let message: SnsMessage = serde_json::from_slice(body)?;
    debug!(kind = %message.kind, message_id = %message.message_id, "SNS message");

    match message.kind.as_str() {
        "SubscriptionConfirmation" => {
            let url = message.subscribe_url.ok_or_else(|| {
                PlayoutError::InvalidNotification("missing SubscribeURL".to_string())
            })?;
            state.confirmer.confirm(&url).await?;
            info!(topic_arn = %message.topic_arn, "Confirmed SNS subscription");
        }
        "Notification" => {
            let event = StackEvent::parse(&message.message)?;
            info!(
                stack = %event.stack_name,
                resource = %event.logical_resource_id,
                status = %event.resource_status,
                "CloudFormation event"
            );
            state.aws.publish(event);
        }
        "UnsubscribeConfirmation" => {
            warn!(topic_arn = %message.topic_arn, "SNS subscription removed");
        }
        other => {
            return Err(PlayoutError::InvalidNotification(format!(
                "unknown message type {}",
                other
            )));
        }
    }
    Ok(())
}

pub fn build_router(state: NotifyState) -> Router {
    Router::new()
        .route("/", get(root))
        .route(NOTIFY_PATH, post(cloudformation_notify))
        .with_state(state)
}
