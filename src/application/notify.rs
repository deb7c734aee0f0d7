//! Outbound notification seam for contact form submissions.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::entities::ContactMessageRecord;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("mail notifications are disabled")]
    Disabled,
    #[error("mail relay unreachable: {0}")]
    Transport(String),
    #[error("mail relay rejected the message with status {status}")]
    Rejected { status: u16 },
}

/// A rendered notification email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactEmail {
    pub subject: String,
    pub text: String,
    pub reply_to: String,
}

impl ContactEmail {
    pub fn for_message(message: &ContactMessageRecord) -> Self {
        Self {
            subject: format!("New Contact Form Submission: {}", message.subject),
            text: format!(
                "Name: {}\nEmail: {}\nSubject: {}\n\nMessage:\n{}\n",
                message.name, message.email, message.subject, message.message
            ),
            reply_to: message.email.clone(),
        }
    }
}

#[async_trait]
pub trait ContactNotifier: Send + Sync {
    async fn send(&self, email: &ContactEmail) -> Result<(), NotifyError>;
}
