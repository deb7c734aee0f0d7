//! Contact notification delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url, header::AUTHORIZATION};
use serde::Serialize;
use tracing::{debug, info};

use crate::application::notify::{ContactEmail, ContactNotifier, NotifyError};

use super::error::InfraError;

/// Posts rendered emails to an HTTP mail relay as JSON.
#[derive(Debug, Clone)]
pub struct RelayNotifier {
    client: Client,
    endpoint: Url,
    api_key: String,
    sender: String,
    recipient: String,
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    reply_to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl RelayNotifier {
    pub fn new(
        endpoint: Url,
        api_key: String,
        sender: String,
        recipient: String,
        timeout: Duration,
    ) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("catalogue/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::configuration(format!("mail client: {err}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            sender,
            recipient,
        })
    }
}

#[async_trait]
impl ContactNotifier for RelayNotifier {
    async fn send(&self, email: &ContactEmail) -> Result<(), NotifyError> {
        let body = RelayMessage {
            from: &self.sender,
            to: &self.recipient,
            reply_to: &email.reply_to,
            subject: &email.subject,
            text: &email.text,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!(
            target = "catalogue::infra::mail",
            subject = %email.subject,
            "Contact notification relayed"
        );
        Ok(())
    }
}

/// Used when mail is switched off; every send reports failure so callers
/// surface the warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNotifier;

#[async_trait]
impl ContactNotifier for DisabledNotifier {
    async fn send(&self, email: &ContactEmail) -> Result<(), NotifyError> {
        info!(
            target = "catalogue::infra::mail",
            subject = %email.subject,
            "Mail disabled; contact notification not sent"
        );
        Err(NotifyError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> ContactEmail {
        ContactEmail {
            subject: "New Contact Form Submission: Samples".to_string(),
            text: "Name: Ada\n".to_string(),
            reply_to: "ada@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn disabled_notifier_reports_failure() {
        let err = DisabledNotifier.send(&email()).await.expect_err("disabled");
        assert!(matches!(err, NotifyError::Disabled));
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_transport_error() {
        let notifier = RelayNotifier::new(
            Url::parse("http://127.0.0.1:9/send").expect("url"),
            "key".to_string(),
            "shop@example.com".to_string(),
            "sales@example.com".to_string(),
            Duration::from_millis(500),
        )
        .expect("client");

        let err = notifier.send(&email()).await.expect_err("nothing listens");
        assert!(matches!(err, NotifyError::Transport(_)));
    }

    #[test]
    fn relay_body_uses_configured_addresses() {
        let email = email();
        let body = RelayMessage {
            from: "shop@example.com",
            to: "sales@example.com",
            reply_to: &email.reply_to,
            subject: &email.subject,
            text: &email.text,
        };
        assert_eq!(
            serde_json::to_value(&body).expect("json"),
            serde_json::json!({
                "from": "shop@example.com",
                "to": "sales@example.com",
                "reply_to": "ada@example.com",
                "subject": "New Contact Form Submission: Samples",
                "text": "Name: Ada\n",
            })
        );
    }
}
