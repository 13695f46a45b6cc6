//! Video meeting provider seam
//!
//! [`ChimeProvider`] talks to the Chime SDK meetings REST API with SigV4
//! signed requests.

use std::sync::Arc;

use async_trait::async_trait;
use clowdr_core::sigv4::{self, SignableRequest, SigningScope};
use clowdr_core::{Clock, RoomId, SystemClock};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ChimeConfig;
use crate::error::{ActionsError, ActionsResult};

/// Chime meeting payload as returned by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Meeting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_meeting_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_placement: Option<serde_json::Value>,
}

impl Meeting {
    /// Parse stored meeting data, accepting it only with a non-empty `MeetingId`
    pub fn validate(data: &serde_json::Value) -> Option<Meeting> {
        let meeting: Meeting = serde_json::from_value(data.clone()).ok()?;
        match meeting.meeting_id.as_deref() {
            Some(id) if !id.is_empty() => Some(meeting),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.meeting_id.as_deref()
    }
}

#[async_trait]
pub trait MeetingProvider: Send + Sync {
    /// Start a provider session for the room
    async fn create_meeting(&self, room_id: RoomId) -> ActionsResult<Meeting>;

    /// Whether the provider still knows the meeting
    async fn meeting_exists(&self, meeting_id: &str) -> ActionsResult<bool>;
}

/// Provider used in test mode, where no video backend is configured
///
/// Every call fails, so stored meeting records are never judged stale.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledProvider;

#[async_trait]
impl MeetingProvider for DisabledProvider {
    async fn create_meeting(&self, _room_id: RoomId) -> ActionsResult<Meeting> {
        Err(ActionsError::Provider("No meeting provider configured".into()))
    }

    async fn meeting_exists(&self, _meeting_id: &str) -> ActionsResult<bool> {
        Err(ActionsError::Provider("No meeting provider configured".into()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MeetingEnvelope {
    meeting: Meeting,
}

/// Chime SDK meetings client
pub struct ChimeProvider {
    client: reqwest::Client,
    config: ChimeConfig,
    endpoint: Url,
    clock: Arc<dyn Clock>,
}

impl ChimeProvider {
    /// Client for the regional `meetings-chime` endpoint
    pub fn new(config: ChimeConfig) -> ActionsResult<Self> {
        let endpoint = format!("https://meetings-chime.{}.amazonaws.com", config.region);
        Self::with_endpoint(config, &endpoint, Arc::new(SystemClock))
    }

    pub fn with_endpoint(
        config: ChimeConfig,
        endpoint: &str,
        clock: Arc<dyn Clock>,
    ) -> ActionsResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ActionsError::Provider(format!("Invalid Chime endpoint {}: {}", endpoint, e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            config,
            endpoint,
            clock,
        })
    }

    async fn send(&self, method: Method, path: &str, body: Vec<u8>) -> ActionsResult<reqwest::Response> {
        let host = match (self.endpoint.host_str(), self.endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(ActionsError::Provider("Chime endpoint has no host".into())),
        };
        let url = self
            .endpoint
            .join(path)
            .map_err(|e| ActionsError::Provider(e.to_string()))?;

        let content_type: &[(&str, &str)] = if body.is_empty() {
            &[]
        } else {
            &[("content-type", "application/json")]
        };
        let signed = sigv4::sign(
            &self.config.credentials,
            SigningScope {
                region: &self.config.region,
                service: "chime",
            },
            &SignableRequest {
                method: method.as_str(),
                host: &host,
                path: url.path(),
                query: &[],
                headers: content_type,
                body: &body,
            },
            self.clock.now_utc(),
        )
        .map_err(|e| ActionsError::Provider(e.to_string()))?;

        let mut request = self.client.request(method, url);
        for (name, value) in content_type.iter().copied() {
            request = request.header(name, value);
        }
        for (name, value) in signed {
            request = request.header(name, value);
        }
        Ok(request.body(body).send().await?)
    }
}

async fn provider_error(action: &str, response: reqwest::Response) -> ActionsError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    ActionsError::Provider(format!("{} returned {}: {}", action, status, text))
}

#[async_trait]
impl MeetingProvider for ChimeProvider {
    async fn create_meeting(&self, room_id: RoomId) -> ActionsResult<Meeting> {
        let body = serde_json::to_vec(&json!({
            "ClientRequestToken": Uuid::new_v4().to_string(),
            "ExternalMeetingId": room_id.to_string(),
            "MediaRegion": self.config.region,
        }))?;
        let response = self.send(Method::POST, "/meetings", body).await?;
        if !response.status().is_success() {
            return Err(provider_error("CreateMeeting", response).await);
        }
        let envelope: MeetingEnvelope = response.json().await?;
        info!(room_id = %room_id, meeting_id = ?envelope.meeting.id(), "Created Chime meeting");
        Ok(envelope.meeting)
    }

    async fn meeting_exists(&self, meeting_id: &str) -> ActionsResult<bool> {
        let path = format!("/meetings/{}", sigv4::uri_encode(meeting_id, false));
        let response = self.send(Method::GET, &path, Vec::new()).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => {
                debug!(meeting_id, "Chime meeting not found");
                Ok(false)
            }
            _ => Err(provider_error("GetMeeting", response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_accepts_meeting_with_id() {
        let data = json!({
            "MeetingId": "abc-123",
            "MediaRegion": "eu-west-1",
            "MediaPlacement": { "AudioHostUrl": "wss://example" }
        });
        let meeting = Meeting::validate(&data).unwrap();
        assert_eq!(meeting.id(), Some("abc-123"));
        assert_eq!(meeting.media_region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        assert!(Meeting::validate(&json!({ "MediaRegion": "eu-west-1" })).is_none());
        assert!(Meeting::validate(&json!({ "MeetingId": "" })).is_none());
        assert!(Meeting::validate(&json!({ "MeetingId": 42 })).is_none());
        assert!(Meeting::validate(&json!("garbage")).is_none());
    }

    #[tokio::test]
    async fn test_disabled_provider_never_reports_missing_meetings() {
        let provider = DisabledProvider;
        assert!(provider.create_meeting(RoomId::generate()).await.is_err());
        assert!(matches!(
            provider.meeting_exists("x").await,
            Err(ActionsError::Provider(_))
        ));
    }

    mod chime {
        use super::*;
        use axum::Router;
        use axum::extract::Path;
        use axum::http::HeaderMap;
        use axum::routing::{get, post};
        use clowdr_core::ManualClock;
        use clowdr_core::sigv4::AwsCredentials;
        use parking_lot::Mutex;

        type Seen = Arc<Mutex<Vec<(HeaderMap, String)>>>;

        async fn chime_stub() -> (String, Seen) {
            let seen: Seen = Arc::default();
            let sink = seen.clone();
            let app = Router::new()
                .route(
                    "/meetings",
                    post(move |headers: HeaderMap, body: String| {
                        let sink = sink.clone();
                        async move {
                            sink.lock().push((headers, body));
                            axum::Json(json!({
                                "Meeting": {
                                    "MeetingId": "m-1",
                                    "ExternalMeetingId": "room",
                                    "MediaRegion": "eu-west-1",
                                    "MediaPlacement": { "AudioHostUrl": "wss://audio" }
                                }
                            }))
                        }
                    }),
                )
                .route(
                    "/meetings/{id}",
                    get(|Path(id): Path<String>| async move {
                        match id.as_str() {
                            "live" => (axum::http::StatusCode::OK, "{}"),
                            "gone" => (axum::http::StatusCode::NOT_FOUND, "{}"),
                            _ => (axum::http::StatusCode::SERVICE_UNAVAILABLE, "busy"),
                        }
                    }),
                );
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            (format!("http://{}", addr), seen)
        }

        fn provider(endpoint: &str) -> ChimeProvider {
            ChimeProvider::with_endpoint(
                ChimeConfig {
                    region: "eu-west-1".into(),
                    credentials: AwsCredentials::new("AKIDTEST", "secret"),
                },
                endpoint,
                Arc::new(ManualClock::at_millis(1_700_000_000_000)),
            )
            .unwrap()
        }

        #[tokio::test]
        async fn test_create_meeting() {
            let (url, seen) = chime_stub().await;
            let room = RoomId::generate();
            let meeting = provider(&url).create_meeting(room).await.unwrap();
            assert_eq!(meeting.id(), Some("m-1"));
            assert_eq!(meeting.media_region.as_deref(), Some("eu-west-1"));

            let requests = seen.lock().clone();
            let (headers, body) = &requests[0];
            let body: serde_json::Value = serde_json::from_str(body).unwrap();
            assert_eq!(body["ExternalMeetingId"], room.to_string());
            assert_eq!(body["MediaRegion"], "eu-west-1");
            assert!(
                headers["authorization"]
                    .to_str()
                    .unwrap()
                    .starts_with("AWS4-HMAC-SHA256 Credential=AKIDTEST/20231114/eu-west-1/chime/")
            );
        }

        #[tokio::test]
        async fn test_meeting_exists() {
            let (url, _) = chime_stub().await;
            let provider = provider(&url);
            assert!(provider.meeting_exists("live").await.unwrap());
            assert!(!provider.meeting_exists("gone").await.unwrap());
            assert!(matches!(
                provider.meeting_exists("flaky").await,
                Err(ActionsError::Provider(message)) if message.contains("503")
            ));
        }
    }
}
