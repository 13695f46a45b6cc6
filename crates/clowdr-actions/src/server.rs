//! Router, shared state and server lifecycle

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{Next, from_fn, from_fn_with_state};
use axum::response::Response;
use axum::routing::{get, post};
use clowdr_core::Clock;
use clowdr_logging::RequestContext;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{Instrument, debug, info};

use crate::auth::{JwtVerifier, check_event_secret, check_jwt};
use crate::config::{ActionsConfig, FrontendConfig};
use crate::email::{EmailDispatcher, EmailSender};
use crate::handlers;
use crate::invitation::InvitationService;
use crate::provider::MeetingProvider;
use crate::room::RoomService;
use crate::store::DataStore;
use crate::upload::UploadService;

/// Frontend assumed when none is configured (test mode)
const LOCAL_FRONTEND: &str = "localhost:3000";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ActionsConfig>,
    pub jwt: Option<Arc<JwtVerifier>>,
    pub rooms: Arc<RoomService>,
    pub invitations: Arc<InvitationService>,
    pub uploads: Arc<UploadService>,
    pub emails: Arc<EmailDispatcher>,
}

impl AppState {
    pub fn new<S: DataStore + 'static>(
        config: ActionsConfig,
        store: Arc<S>,
        provider: Arc<dyn MeetingProvider>,
        sender: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let frontend = config
            .frontend
            .clone()
            .unwrap_or_else(|| FrontendConfig::new(LOCAL_FRONTEND, None));
        let jwt = config
            .auth
            .as_ref()
            .map(|auth| Arc::new(JwtVerifier::new(auth, Arc::clone(&clock))));

        Self {
            jwt,
            rooms: Arc::new(RoomService::new(store.clone(), provider)),
            invitations: Arc::new(InvitationService::new(
                store.clone(),
                store.clone(),
                frontend.clone(),
            )),
            uploads: Arc::new(UploadService::new(store.clone(), store.clone(), frontend)),
            emails: Arc::new(EmailDispatcher::new(
                sender,
                store,
                clock,
                config.stop_emails_contact.clone(),
            )),
            config: Arc::new(config),
        }
    }
}

/// Wrap each request in a span carrying a fresh request id
async fn request_tracing(request: Request, next: Next) -> Response {
    let context = RequestContext::new();
    let span = context.span("http");
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut response = async {
        debug!(method = %method, path = %path, "Request");
        let response = next.run(request).await;
        info!(method = %method, path = %path, status = response.status().as_u16(), "Response");
        response
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&context.request_id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

pub fn build_router(state: AppState) -> Router {
    let user_routes = Router::new()
        .route("/protectedEcho", post(handlers::protected_echo))
        .route("/invitation/send/initial", post(handlers::invitation_send_initial))
        .route("/invitation/send/repeat", post(handlers::invitation_send_repeat))
        .route("/invitation/confirm/current", post(handlers::invitation_confirm_current))
        .route("/invitation/confirm/code", post(handlers::invitation_confirm_code))
        .route(
            "/invitation/confirm/send/initial",
            post(handlers::invitation_confirm_send_initial),
        )
        .route(
            "/invitation/confirm/send/repeat",
            post(handlers::invitation_confirm_send_repeat),
        )
        .route(
            "/uploaders/sendSubmissionRequests",
            post(handlers::uploaders_send_submission_requests),
        )
        .route_layer(from_fn_with_state(state.clone(), check_jwt));

    let event_routes = Router::new()
        .route("/echo", post(handlers::echo))
        .route("/emailCreated", post(handlers::email_created))
        .merge(user_routes)
        .route_layer(from_fn_with_state(state.clone(), check_event_secret));

    Router::new()
        .route("/", get(handlers::root))
        .merge(event_routes)
        .layer(from_fn(request_tracing))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until ctrl-c
pub async fn serve(state: AppState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "App is listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
}
