//! SNS topic subscription over the AWS query API

use std::sync::Arc;

use async_trait::async_trait;
use clowdr_core::sigv4::{self, AwsCredentials, SignableRequest, SigningScope};
use clowdr_core::{Clock, SystemClock};
use reqwest::Url;
use tracing::{debug, info};

use crate::aws::TopicSubscriber;
use crate::error::{PlayoutError, PlayoutResult};

const SNS_API_VERSION: &str = "2010-03-31";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// Subscribes endpoints with signed `Subscribe` calls
pub struct SnsSubscriber {
    client: reqwest::Client,
    credentials: AwsCredentials,
    region: String,
    endpoint: Url,
    clock: Arc<dyn Clock>,
}

impl SnsSubscriber {
    /// Subscriber for the regional SNS endpoint
    pub fn new(credentials: AwsCredentials, region: impl Into<String>) -> PlayoutResult<Self> {
        let region = region.into();
        let endpoint = format!("https://sns.{}.amazonaws.com/", region);
        Self::with_endpoint(credentials, region, &endpoint, Arc::new(SystemClock))
    }

    /// Subscriber for an explicit API endpoint (VPC endpoints, local stacks)
    pub fn with_endpoint(
        credentials: AwsCredentials,
        region: impl Into<String>,
        endpoint: &str,
        clock: Arc<dyn Clock>,
    ) -> PlayoutResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| PlayoutError::Subscribe(format!("Invalid SNS endpoint {}: {}", endpoint, e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            credentials,
            region: region.into(),
            endpoint,
            clock,
        })
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

#[async_trait]
impl TopicSubscriber for SnsSubscriber {
    async fn subscribe(&self, protocol: &str, topic_arn: &str, endpoint: &str) -> PlayoutResult<()> {
        let body = sigv4::form_body(&[
            ("Action", "Subscribe"),
            ("Endpoint", endpoint),
            ("Protocol", protocol),
            ("ReturnSubscriptionArn", "true"),
            ("TopicArn", topic_arn),
            ("Version", SNS_API_VERSION),
        ]);
        let host = self.host();
        let signed = sigv4::sign(
            &self.credentials,
            SigningScope {
                region: &self.region,
                service: "sns",
            },
            &SignableRequest {
                method: "POST",
                host: &host,
                path: self.endpoint.path(),
                query: &[],
                headers: &[("content-type", FORM_CONTENT_TYPE)],
                body: body.as_bytes(),
            },
            self.clock.now_utc(),
        )
        .map_err(|e| PlayoutError::Subscribe(e.to_string()))?;

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", FORM_CONTENT_TYPE);
        for (name, value) in signed {
            request = request.header(name, value);
        }
        debug!(%topic_arn, %endpoint, "Calling SNS Subscribe");
        let response = request.body(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PlayoutError::Subscribe(format!("SNS returned {}: {}", status, text)));
        }
        info!(%topic_arn, %endpoint, "Subscribed to SNS topic");
        Ok(())
    }
}
