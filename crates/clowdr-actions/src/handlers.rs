//! HTTP handlers for Hasura actions and event triggers

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Extension, FromRequest, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::auth::AuthenticatedUser;
use crate::error::{ActionsError, ActionsResult};
use crate::event::{EMAIL_CREATED_TRIGGER, EmailData, Payload};
use crate::invitation::{
    ConfirmInvitationOutput, ConfirmWithCodeInput, ConfirmationEmailOutput,
    InvitationSendEmailResult, InviteCodeInput, SendInvitationEmailsInput,
};
use crate::server::AppState;
use crate::upload::{SendSubmissionRequestsInput, SubmissionRequestResult};

/// Hasura action arguments, unwrapped from the `{ "input": ... }` envelope
pub struct ActionInput<T>(pub T);

#[derive(Deserialize)]
struct Envelope<T> {
    input: T,
}

impl<S, T> FromRequest<S> for ActionInput<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ActionsError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(envelope) = Json::<Envelope<T>>::from_request(request, state)
            .await
            .map_err(|rejection| ActionsError::BadRequest(rejection.body_text()))?;
        Ok(ActionInput(envelope.input))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoMessage {
    pub message: String,
}

pub async fn root() -> &'static str {
    "Clowdr"
}

pub async fn echo(ActionInput(params): ActionInput<EchoMessage>) -> Json<EchoMessage> {
    info!(message = %params.message, "Echoing");
    Json(params)
}

pub async fn protected_echo(
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    ActionInput(params): ActionInput<EchoMessage>,
) -> Json<EchoMessage> {
    info!(user_id = %user_id, message = %params.message, "Echoing (protected)");
    Json(params)
}

fn status_json(status: StatusCode, message: &str) -> Response {
    (status, Json(message)).into_response()
}

pub async fn email_created(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(payload) = serde_json::from_slice::<Payload>(&body) else {
        warn!("Received incorrect payload");
        return status_json(StatusCode::INTERNAL_SERVER_ERROR, "Unexpected payload");
    };

    let email = if payload.trigger.name == EMAIL_CREATED_TRIGGER {
        payload
            .typed::<EmailData>()
            .and_then(|typed| typed.event.data.new)
    } else {
        None
    };
    let Some(email) = email else {
        info!(trigger = %payload.trigger.name, "Received unhandled payload");
        return status_json(StatusCode::BAD_REQUEST, "Received unhandled payload");
    };

    if let Err(e) = state.emails.handle_email_created(&email).await {
        error!(error = %e, email_id = %email.id, "Failure while handling event");
        return status_json(StatusCode::INTERNAL_SERVER_ERROR, "Failure while handling event");
    }
    status_json(StatusCode::OK, "OK")
}

pub async fn invitation_send_initial(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    ActionInput(params): ActionInput<SendInvitationEmailsInput>,
) -> ActionsResult<Json<Vec<InvitationSendEmailResult>>> {
    info!(user_id = %user_id, attendees = params.attendee_ids.len(), "Invitation/send/initial");
    Ok(Json(state.invitations.send_initial(params, &user_id).await?))
}

pub async fn invitation_send_repeat(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    ActionInput(params): ActionInput<SendInvitationEmailsInput>,
) -> ActionsResult<Json<Vec<InvitationSendEmailResult>>> {
    info!(user_id = %user_id, attendees = params.attendee_ids.len(), "Invitation/send/repeat");
    Ok(Json(state.invitations.send_repeat(params, &user_id).await?))
}

pub async fn invitation_confirm_current(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    ActionInput(params): ActionInput<InviteCodeInput>,
) -> ActionsResult<Json<ConfirmInvitationOutput>> {
    info!(user_id = %user_id, "Invitation/confirm/current");
    Ok(Json(state.invitations.confirm_current(params, &user_id).await?))
}

pub async fn invitation_confirm_code(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    ActionInput(params): ActionInput<ConfirmWithCodeInput>,
) -> ActionsResult<Json<ConfirmInvitationOutput>> {
    info!(user_id = %user_id, "Invitation/confirm/code");
    Ok(Json(state.invitations.confirm_with_code(params, &user_id).await?))
}

pub async fn invitation_confirm_send_initial(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    ActionInput(params): ActionInput<InviteCodeInput>,
) -> ActionsResult<Json<ConfirmationEmailOutput>> {
    info!(user_id = %user_id, "Invitation/confirm/send/initial");
    Ok(Json(state.invitations.confirm_send_initial(params, &user_id).await?))
}

pub async fn invitation_confirm_send_repeat(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    ActionInput(params): ActionInput<InviteCodeInput>,
) -> ActionsResult<Json<ConfirmationEmailOutput>> {
    info!(user_id = %user_id, "Invitation/confirm/send/repeat");
    Ok(Json(state.invitations.confirm_send_repeat(params, &user_id).await?))
}

pub async fn uploaders_send_submission_requests(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    ActionInput(params): ActionInput<SendSubmissionRequestsInput>,
) -> ActionsResult<Json<Vec<SubmissionRequestResult>>> {
    info!(user_id = %user_id, uploaders = params.uploader_ids.len(), "Uploaders/sendSubmissionRequests");
    Ok(Json(state.uploads.send_submission_requests(params).await?))
}
