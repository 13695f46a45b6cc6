//! Outgoing email
//!
//! Handlers never send mail directly: they insert `Email` rows and the
//! `EmailCreated` trigger hands each row to [`EmailDispatcher`], which
//! delivers it and stamps `sentAt`.

use std::sync::Arc;

use async_trait::async_trait;
use clowdr_core::Clock;
use serde_json::json;
use tracing::{info, warn};

use crate::config::SendGridConfig;
use crate::error::{ActionsError, ActionsResult};
use crate::event::EmailData;
use crate::store::EmailStore;

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// A message ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> ActionsResult<()>;
}

/// Delivery through the SendGrid v3 API
pub struct SendGridSender {
    client: reqwest::Client,
    config: SendGridConfig,
    endpoint: String,
}

impl SendGridSender {
    pub fn new(config: SendGridConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            endpoint: SENDGRID_SEND_URL.to_string(),
        }
    }

    /// Send to a different API endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn body(&self, email: &OutgoingEmail) -> serde_json::Value {
        json!({
            "personalizations": [{ "to": [{ "email": email.to }] }],
            "from": { "email": self.config.sender },
            "subject": email.subject,
            "content": [
                { "type": "text/plain", "value": email.text },
                { "type": "text/html", "value": email.html }
            ]
        })
    }
}

#[async_trait]
impl EmailSender for SendGridSender {
    async fn send(&self, email: &OutgoingEmail) -> ActionsResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&self.body(email))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ActionsError::Email(format!("SendGrid returned {}: {}", status, detail)));
        }
        Ok(())
    }
}

/// Sender that only logs; used when no mail provider is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlySender;

#[async_trait]
impl EmailSender for LogOnlySender {
    async fn send(&self, email: &OutgoingEmail) -> ActionsResult<()> {
        info!(to = %email.to, subject = %email.subject, "Email delivery disabled, dropping message");
        Ok(())
    }
}

/// Append the unsubscribe notice to both bodies
pub fn with_stop_emails_footer(email: OutgoingEmail, contact: Option<&str>) -> OutgoingEmail {
    let Some(contact) = contact else {
        return email;
    };
    OutgoingEmail {
        html: format!(
            "{}<p style=\"font-size: 80%;\">You are receiving this email because of your \
             registration with a conference hosted on Clowdr. To stop receiving emails, \
             contact <a href=\"mailto:{contact}\">{contact}</a>.</p>",
            email.html
        ),
        text: format!(
            "{}\n\nYou are receiving this email because of your registration with a conference \
             hosted on Clowdr. To stop receiving emails, contact {contact}.",
            email.text
        ),
        ..email
    }
}

/// Delivers queued emails
pub struct EmailDispatcher {
    sender: Arc<dyn EmailSender>,
    store: Arc<dyn EmailStore>,
    clock: Arc<dyn Clock>,
    stop_emails_contact: Option<String>,
}

impl EmailDispatcher {
    pub fn new(
        sender: Arc<dyn EmailSender>,
        store: Arc<dyn EmailStore>,
        clock: Arc<dyn Clock>,
        stop_emails_contact: Option<String>,
    ) -> Self {
        Self {
            sender,
            store,
            clock,
            stop_emails_contact,
        }
    }

    /// Send a newly created email row unless it was already sent
    pub async fn handle_email_created(&self, email: &EmailData) -> ActionsResult<()> {
        if email.sent_at.is_some() {
            warn!(email_id = %email.id, "Email already sent, skipping");
            return Ok(());
        }

        let outgoing = with_stop_emails_footer(
            OutgoingEmail {
                to: email.email_address.clone(),
                subject: email.subject.clone(),
                html: email.html_contents.clone(),
                text: email.plain_text_contents.clone(),
            },
            self.stop_emails_contact.as_deref(),
        );
        self.sender.send(&outgoing).await?;
        self.store.mark_sent(email.id, self.clock.now_utc()).await?;
        info!(email_id = %email.id, reason = %email.reason, "Sent email");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EmailReason, NewEmail};
    use crate::store::MemoryStore;
    use clowdr_core::ManualClock;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<OutgoingEmail>>);

    #[async_trait]
    impl EmailSender for Outbox {
        async fn send(&self, email: &OutgoingEmail) -> ActionsResult<()> {
            self.0.lock().push(email.clone());
            Ok(())
        }
    }

    #[test]
    fn test_footer() {
        let email = OutgoingEmail {
            to: "a@example.org".into(),
            subject: "Hi".into(),
            html: "<p>Hi</p>".into(),
            text: "Hi".into(),
        };
        let with = with_stop_emails_footer(email.clone(), Some("stop@example.org"));
        assert!(with.html.starts_with("<p>Hi</p>"));
        assert!(with.html.contains("mailto:stop@example.org"));
        assert!(with.text.ends_with("contact stop@example.org."));
        assert_eq!(with_stop_emails_footer(email.clone(), None), email);
    }

    #[test]
    fn test_sendgrid_body() {
        let sender = SendGridSender::new(SendGridConfig {
            api_key: "k".into(),
            sender: "noreply@example.org".into(),
        });
        let body = sender.body(&OutgoingEmail {
            to: "a@example.org".into(),
            subject: "S".into(),
            html: "<b>h</b>".into(),
            text: "t".into(),
        });
        assert_eq!(body["personalizations"][0]["to"][0]["email"], "a@example.org");
        assert_eq!(body["from"]["email"], "noreply@example.org");
        assert_eq!(body["content"][1]["type"], "text/html");
    }

    #[tokio::test]
    async fn test_dispatch_sends_and_marks() {
        let store = Arc::new(MemoryStore::new());
        let outbox = Arc::new(Outbox::default());
        let clock = Arc::new(ManualClock::at_millis(1_600_000_000_000));
        let dispatcher = EmailDispatcher::new(
            outbox.clone(),
            store.clone(),
            clock,
            Some("stop@example.org".into()),
        );

        let ids = store
            .insert_emails(vec![NewEmail {
                user_id: None,
                invitation_id: None,
                email_address: "ada@example.org".into(),
                reason: EmailReason::Invite,
                subject: "Welcome".into(),
                html_contents: "<p>Welcome</p>".into(),
                plain_text_contents: "Welcome".into(),
            }])
            .await
            .unwrap();
        let data = EmailData {
            id: ids[0],
            user_id: None,
            email_address: "ada@example.org".into(),
            reason: "invite".into(),
            subject: "Welcome".into(),
            html_contents: "<p>Welcome</p>".into(),
            plain_text_contents: "Welcome".into(),
            sent_at: None,
        };

        dispatcher.handle_email_created(&data).await.unwrap();
        assert_eq!(outbox.0.lock().len(), 1);
        assert!(outbox.0.lock()[0].text.contains("stop@example.org"));
        assert_eq!(
            store.emails()[0].sent_at.map(|t| t.timestamp_millis()),
            Some(1_600_000_000_000)
        );

        let already = EmailData {
            sent_at: store.emails()[0].sent_at,
            ..data
        };
        dispatcher.handle_email_created(&already).await.unwrap();
        assert_eq!(outbox.0.lock().len(), 1);
    }
}
