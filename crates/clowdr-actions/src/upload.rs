//! Submission requests to content uploaders

use std::sync::Arc;

use clowdr_core::UploaderId;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::FrontendConfig;
use crate::error::ActionsResult;
use crate::model::{EmailReason, NewEmail, RequiredItem, Uploader};
use crate::store::{EmailStore, UploaderStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSubmissionRequestsInput {
    pub uploader_ids: Vec<UploaderId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequestResult {
    pub uploader_id: UploaderId,
    pub sent: bool,
}

pub struct UploadService {
    uploaders: Arc<dyn UploaderStore>,
    emails: Arc<dyn EmailStore>,
    frontend: FrontendConfig,
}

impl UploadService {
    pub fn new(
        uploaders: Arc<dyn UploaderStore>,
        emails: Arc<dyn EmailStore>,
        frontend: FrontendConfig,
    ) -> Self {
        Self {
            uploaders,
            emails,
            frontend,
        }
    }

    /// Email each uploader a link for submitting their item
    pub async fn send_submission_requests(
        &self,
        input: SendSubmissionRequestsInput,
    ) -> ActionsResult<Vec<SubmissionRequestResult>> {
        let found = self.uploaders.uploaders(&input.uploader_ids).await?;

        let emails: Vec<NewEmail> = found
            .iter()
            .map(|(uploader, item)| self.request_email(uploader, item))
            .collect();
        let sent: Vec<UploaderId> = found.iter().map(|(uploader, _)| uploader.id).collect();

        self.emails.insert_emails(emails).await?;
        self.uploaders.record_emails_sent(&sent).await?;
        info!(requested = input.uploader_ids.len(), sent = sent.len(), "Queued submission requests");

        Ok(input
            .uploader_ids
            .iter()
            .map(|id| SubmissionRequestResult {
                uploader_id: *id,
                sent: sent.contains(id),
            })
            .collect())
    }

    fn request_email(&self, uploader: &Uploader, item: &RequiredItem) -> NewEmail {
        let url = self
            .frontend
            .url(&format!("upload/{}/{}", item.id, item.access_token));
        let conference = &item.conference;
        NewEmail {
            user_id: None,
            invitation_id: None,
            email_address: uploader.email.clone(),
            reason: EmailReason::UploadRequest,
            subject: format!(
                "Submission request: {} for {}",
                item.name, item.content_group_title
            ),
            html_contents: format!(
                "<p>Dear {name},</p>\
                 <p>The organisers of {conf} are requesting that you upload \
                 {item} for \"{group}\".</p>\
                 <p>Please use this link to submit: <a href=\"{url}\">{url}</a></p>",
                name = uploader.name,
                conf = conference.name,
                item = item.name,
                group = item.content_group_title,
            ),
            plain_text_contents: format!(
                "Dear {name},\n\nThe organisers of {conf} are requesting that you upload \
                 {item} for \"{group}\".\n\nPlease use this link to submit: {url}",
                name = uploader.name,
                conf = conference.name,
                item = item.name,
                group = item.content_group_title,
            ),
        }
    }
}
