//! Conference invitations
//!
//! An attendee is created with an invitation addressed to an email
//! address. Signed-in users claim it either directly, when their account
//! email matches, or by proving ownership of the invited address with a
//! confirmation code mailed to it.

use std::sync::Arc;

use clowdr_core::{AttendeeId, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FrontendConfig;
use crate::error::ActionsResult;
use crate::model::{EmailReason, InvitationDetails, NewEmail};
use crate::store::{EmailStore, InvitationStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendInvitationEmailsInput {
    pub attendee_ids: Vec<AttendeeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationSendEmailResult {
    pub attendee_id: AttendeeId,
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteCodeInput {
    pub invite_code: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmWithCodeInput {
    pub invite_code: Uuid,
    pub confirmation_code: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmInvitationOutput {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf_slug: Option<String>,
}

impl ConfirmInvitationOutput {
    fn rejected() -> Self {
        Self {
            ok: false,
            conf_slug: None,
        }
    }

    fn accepted(details: &InvitationDetails) -> Self {
        Self {
            ok: true,
            conf_slug: Some(details.conference.slug.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationEmailOutput {
    pub sent: bool,
}

pub struct InvitationService {
    invitations: Arc<dyn InvitationStore>,
    emails: Arc<dyn EmailStore>,
    frontend: FrontendConfig,
}

impl InvitationService {
    pub fn new(
        invitations: Arc<dyn InvitationStore>,
        emails: Arc<dyn EmailStore>,
        frontend: FrontendConfig,
    ) -> Self {
        Self {
            invitations,
            emails,
            frontend,
        }
    }

    /// Email invitations that have never been sent
    pub async fn send_initial(
        &self,
        input: SendInvitationEmailsInput,
        _caller: &UserId,
    ) -> ActionsResult<Vec<InvitationSendEmailResult>> {
        self.send_invitations(&input.attendee_ids, false).await
    }

    /// Email invitations again, whether or not they were sent before
    pub async fn send_repeat(
        &self,
        input: SendInvitationEmailsInput,
        _caller: &UserId,
    ) -> ActionsResult<Vec<InvitationSendEmailResult>> {
        self.send_invitations(&input.attendee_ids, true).await
    }

    async fn send_invitations(
        &self,
        attendee_ids: &[AttendeeId],
        repeat: bool,
    ) -> ActionsResult<Vec<InvitationSendEmailResult>> {
        let found = self.invitations.invitations_for_attendees(attendee_ids).await?;

        let mut results = Vec::with_capacity(attendee_ids.len());
        let mut emails = Vec::new();
        for attendee_id in attendee_ids {
            let Some(details) = found.iter().find(|d| d.attendee.id == *attendee_id) else {
                results.push(InvitationSendEmailResult {
                    attendee_id: *attendee_id,
                    sent: false,
                    message: Some("No invitation for attendee".into()),
                });
                continue;
            };
            if details.attendee.user_id.is_some() {
                results.push(InvitationSendEmailResult {
                    attendee_id: *attendee_id,
                    sent: false,
                    message: Some("Invitation already accepted".into()),
                });
                continue;
            }
            if !repeat && details.invitation.emails_sent > 0 {
                results.push(InvitationSendEmailResult {
                    attendee_id: *attendee_id,
                    sent: false,
                    message: Some("Invitation already sent".into()),
                });
                continue;
            }
            emails.push(self.invitation_email(details));
            results.push(InvitationSendEmailResult {
                attendee_id: *attendee_id,
                sent: true,
                message: None,
            });
        }

        let queued = emails.len();
        self.emails.insert_emails(emails).await?;
        info!(requested = attendee_ids.len(), queued, repeat, "Queued invitation emails");
        Ok(results)
    }

    /// Claim an invitation with the caller's account, whose email must match
    pub async fn confirm_current(
        &self,
        input: InviteCodeInput,
        caller: &UserId,
    ) -> ActionsResult<ConfirmInvitationOutput> {
        let Some(details) = self.invitations.invitation_by_code(input.invite_code).await? else {
            return Ok(ConfirmInvitationOutput::rejected());
        };
        if let Some(outcome) = already_claimed(&details, caller) {
            return Ok(outcome);
        }

        let email_matches = self
            .invitations
            .user(caller)
            .await?
            .and_then(|user| user.email)
            .is_some_and(|email| {
                email.trim().eq_ignore_ascii_case(details.invitation.invited_email_address.trim())
            });
        if !email_matches {
            debug!(user_id = %caller, "Account email does not match invitation");
            return Ok(ConfirmInvitationOutput::rejected());
        }

        self.invitations
            .link_attendee(details.attendee.id, caller.clone())
            .await?;
        info!(user_id = %caller, attendee_id = %details.attendee.id, "Invitation accepted");
        Ok(ConfirmInvitationOutput::accepted(&details))
    }

    /// Claim an invitation with the confirmation code mailed to the invited address
    pub async fn confirm_with_code(
        &self,
        input: ConfirmWithCodeInput,
        caller: &UserId,
    ) -> ActionsResult<ConfirmInvitationOutput> {
        let Some(details) = self.invitations.invitation_by_code(input.invite_code).await? else {
            return Ok(ConfirmInvitationOutput::rejected());
        };
        if let Some(outcome) = already_claimed(&details, caller) {
            return Ok(outcome);
        }

        let invitation = &details.invitation;
        if invitation.confirmation_code != Some(input.confirmation_code)
            || invitation.link_to_user_id.as_ref() != Some(caller)
        {
            warn!(user_id = %caller, "Invitation confirmation code mismatch");
            return Ok(ConfirmInvitationOutput::rejected());
        }

        self.invitations
            .link_attendee(details.attendee.id, caller.clone())
            .await?;
        info!(user_id = %caller, attendee_id = %details.attendee.id, "Invitation accepted with code");
        Ok(ConfirmInvitationOutput::accepted(&details))
    }

    /// Issue a confirmation code for the caller and mail it to the invited address
    pub async fn confirm_send_initial(
        &self,
        input: InviteCodeInput,
        caller: &UserId,
    ) -> ActionsResult<ConfirmationEmailOutput> {
        let Some(details) = self.invitations.invitation_by_code(input.invite_code).await? else {
            return Ok(ConfirmationEmailOutput { sent: false });
        };
        if details.attendee.user_id.is_some() {
            return Ok(ConfirmationEmailOutput { sent: false });
        }
        if details.invitation.confirmation_code.is_some()
            && details.invitation.link_to_user_id.as_ref() == Some(caller)
        {
            return Ok(ConfirmationEmailOutput { sent: false });
        }

        let code = Uuid::new_v4();
        self.invitations
            .set_confirmation(details.invitation.id, code, caller.clone())
            .await?;
        self.emails
            .insert_emails(vec![self.confirmation_email(&details, code, caller)])
            .await?;
        Ok(ConfirmationEmailOutput { sent: true })
    }

    /// Mail the caller's pending confirmation code again
    pub async fn confirm_send_repeat(
        &self,
        input: InviteCodeInput,
        caller: &UserId,
    ) -> ActionsResult<ConfirmationEmailOutput> {
        let Some(details) = self.invitations.invitation_by_code(input.invite_code).await? else {
            return Ok(ConfirmationEmailOutput { sent: false });
        };
        let invitation = &details.invitation;
        let (Some(code), Some(linked)) = (invitation.confirmation_code, &invitation.link_to_user_id)
        else {
            return Ok(ConfirmationEmailOutput { sent: false });
        };
        if linked != caller || details.attendee.user_id.is_some() {
            return Ok(ConfirmationEmailOutput { sent: false });
        }

        self.emails
            .insert_emails(vec![self.confirmation_email(&details, code, caller)])
            .await?;
        Ok(ConfirmationEmailOutput { sent: true })
    }

    fn invitation_email(&self, details: &InvitationDetails) -> NewEmail {
        let url = self
            .frontend
            .url(&format!("invitation/accept/{}", details.invitation.invite_code));
        let conference = &details.conference;
        NewEmail {
            user_id: None,
            invitation_id: Some(details.invitation.id),
            email_address: details.invitation.invited_email_address.clone(),
            reason: EmailReason::Invite,
            subject: format!("Your invitation to {}", conference.short_name),
            html_contents: format!(
                "<p>Dear {name},</p>\
                 <p>You have been invited to <b>{conf}</b>. To accept, follow this link \
                 and sign in or create an account:</p>\
                 <p><a href=\"{url}\">{url}</a></p>\
                 <p>Your invite code is <code>{code}</code>.</p>",
                name = details.attendee.display_name,
                conf = conference.name,
                code = details.invitation.invite_code,
            ),
            plain_text_contents: format!(
                "Dear {name},\n\nYou have been invited to {conf}. To accept, visit {url} \
                 and sign in or create an account.\n\nYour invite code is {code}.",
                name = details.attendee.display_name,
                conf = conference.name,
                code = details.invitation.invite_code,
            ),
        }
    }

    fn confirmation_email(&self, details: &InvitationDetails, code: Uuid, caller: &UserId) -> NewEmail {
        let url = self.frontend.url(&format!(
            "invitation/accept/{}/{}",
            details.invitation.invite_code, code
        ));
        let conference = &details.conference;
        NewEmail {
            user_id: Some(caller.clone()),
            invitation_id: None,
            email_address: details.invitation.invited_email_address.clone(),
            reason: EmailReason::ConfirmInvite,
            subject: format!("Confirm your invitation to {}", conference.short_name),
            html_contents: format!(
                "<p>Someone signed in to Clowdr asked to accept your invitation to <b>{conf}</b>. \
                 If this was you, follow this link to confirm:</p>\
                 <p><a href=\"{url}\">{url}</a></p>\
                 <p>If it was not you, ignore this email.</p>",
                conf = conference.name,
            ),
            plain_text_contents: format!(
                "Someone signed in to Clowdr asked to accept your invitation to {conf}. \
                 If this was you, visit {url} to confirm. If it was not you, ignore this email.",
                conf = conference.name,
            ),
        }
    }
}

/// Outcome for an invitation whose attendee already has an account
fn already_claimed(details: &InvitationDetails, caller: &UserId) -> Option<ConfirmInvitationOutput> {
    match &details.attendee.user_id {
        Some(owner) if owner == caller => Some(ConfirmInvitationOutput::accepted(details)),
        Some(_) => Some(ConfirmInvitationOutput::rejected()),
        None => None,
    }
}
