//! Contact form and product inquiry intake, plus the admin inbox over both.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::catalog::views::{ProductEncoder, ProductListItem};
use crate::application::notify::{ContactEmail, ContactNotifier};
use crate::application::repos::{
    ContactMessagesRepo, CreateContactMessageParams, CreateInquiryParams, InquiriesRepo,
    MessageFilter, ProductFilter, ProductsRepo, RepoError,
};
use crate::application::validation::{FieldErrors, JsonFields, expect_object, uuid_value};
use crate::domain::entities::{ContactMessageRecord, InquiryItemRecord, InquiryRecord};
use crate::domain::fields::{
    CONTACT_NAME_MAX, CONTACT_SUBJECT_MAX, FieldProblem, email_address, required_body,
    required_text,
};

const TARGET: &str = "catalogue::application::messages";

#[derive(Debug, Error)]
pub enum MessagesError {
    #[error("request failed validation on {}", .0.fields().collect::<Vec<_>>().join(", "))]
    Validation(FieldErrors),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("Product not found with id: {0}")]
    ProductNotFound(Uuid),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<FieldErrors> for MessagesError {
    fn from(errors: FieldErrors) -> Self {
        Self::Validation(errors)
    }
}

/// Sender fields shared by contact messages and inquiries.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Sender {
    name: String,
    email: String,
    subject: String,
    message: String,
}

fn decode_sender(fields: &JsonFields<'_>, problems: &mut FieldErrors) -> Option<Sender> {
    let name = fields.text(problems, "name");
    let email = fields.text(problems, "email");
    let subject = fields.text(problems, "subject");
    let message = fields.text(problems, "message");

    let name = problems.capture("name", required_text(name.as_deref(), CONTACT_NAME_MAX));
    let email = problems.capture("email", email_address(email.as_deref()));
    let subject = problems.capture(
        "subject",
        required_text(subject.as_deref(), CONTACT_SUBJECT_MAX),
    );
    let message = problems.capture("message", required_body(message.as_deref()));

    Some(Sender {
        name: name?,
        email: email?,
        subject: subject?,
        message: message?,
    })
}

/// Accepts `[id, ...]` or `[{ "product": id }, ...]`, mixed freely.
fn decode_items(fields: &JsonFields<'_>, problems: &mut FieldErrors) -> Vec<Uuid> {
    let Some(items) = fields.array(problems, "items") else {
        return Vec::new();
    };

    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        let candidate = match item {
            Value::Object(object) => match object.get("product") {
                Some(product) => uuid_value(product),
                None => Err(FieldProblem::Missing),
            },
            other => uuid_value(other),
        };
        if let Some(id) = problems.capture("items", candidate) {
            ids.push(id);
        }
    }
    ids
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

impl From<&ContactMessageRecord> for ContactView {
    fn from(record: &ContactMessageRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            email: record.email.clone(),
            subject: record.subject.clone(),
            message: record.message.clone(),
        }
    }
}

/// Inbox row as shown to administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactInboxView {
    #[serde(flatten)]
    pub message: ContactView,
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&ContactMessageRecord> for ContactInboxView {
    fn from(record: &ContactMessageRecord) -> Self {
        Self {
            message: ContactView::from(record),
            is_read: record.is_read,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Outcome of a contact submission; the message is stored either way.
#[derive(Debug, Clone)]
pub struct ContactSubmission {
    pub message: ContactView,
    pub notified: bool,
}

#[derive(Clone)]
pub struct ContactService {
    repo: Arc<dyn ContactMessagesRepo>,
    notifier: Arc<dyn ContactNotifier>,
}

impl ContactService {
    pub fn new(repo: Arc<dyn ContactMessagesRepo>, notifier: Arc<dyn ContactNotifier>) -> Self {
        Self { repo, notifier }
    }

    pub async fn submit(&self, body: &Value) -> Result<ContactSubmission, MessagesError> {
        let object = expect_object(body)?;
        let mut problems = FieldErrors::new();
        let sender = decode_sender(&JsonFields::new(object), &mut problems);
        problems.into_result()?;
        let Some(sender) = sender else {
            return Err(FieldErrors::single("non_field_errors", FieldProblem::Missing).into());
        };

        let record = self
            .repo
            .create_contact_message(CreateContactMessageParams {
                id: Uuid::new_v4(),
                name: sender.name,
                email: sender.email,
                subject: sender.subject,
                message: sender.message,
            })
            .await?;
        info!(target = TARGET, message_id = %record.id, "Contact message stored");

        let notified = match self.notifier.send(&ContactEmail::for_message(&record)).await {
            Ok(()) => true,
            Err(err) => {
                counter!("catalogue_mail_failed_total").increment(1);
                warn!(
                    target = TARGET,
                    message_id = %record.id,
                    error = %err,
                    "Contact notification failed"
                );
                false
            }
        };

        Ok(ContactSubmission {
            message: ContactView::from(&record),
            notified,
        })
    }

    pub async fn list(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<ContactInboxView>, MessagesError> {
        let records = self.repo.list_contact_messages(filter).await?;
        Ok(records.iter().map(ContactInboxView::from).collect())
    }

    pub async fn mark_read(&self, id: Uuid) -> Result<ContactInboxView, MessagesError> {
        let record = self
            .repo
            .mark_contact_message_read(id)
            .await?
            .ok_or(MessagesError::NotFound {
                entity: "contact message",
                id,
            })?;
        Ok(ContactInboxView::from(&record))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InquiryItemView {
    pub id: Uuid,
    pub product: Uuid,
}

impl From<&InquiryItemRecord> for InquiryItemView {
    fn from(item: &InquiryItemRecord) -> Self {
        Self {
            id: item.id,
            product: item.product_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InquiryView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub items: Vec<InquiryItemView>,
}

impl From<&InquiryRecord> for InquiryView {
    fn from(record: &InquiryRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            email: record.email.clone(),
            subject: record.subject.clone(),
            message: record.message.clone(),
            items: record.items.iter().map(InquiryItemView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InquiryInboxView {
    #[serde(flatten)]
    pub inquiry: InquiryView,
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&InquiryRecord> for InquiryInboxView {
    fn from(record: &InquiryRecord) -> Self {
        Self {
            inquiry: InquiryView::from(record),
            is_read: record.is_read,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Inquiry with the referenced products expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InquiryDetailView {
    #[serde(flatten)]
    pub inquiry: InquiryInboxView,
    pub products: Vec<ProductListItem>,
}

#[derive(Clone)]
pub struct InquiryService {
    repo: Arc<dyn InquiriesRepo>,
    products: Arc<dyn ProductsRepo>,
    encoder: ProductEncoder,
}

impl InquiryService {
    pub fn new(
        repo: Arc<dyn InquiriesRepo>,
        products: Arc<dyn ProductsRepo>,
        encoder: ProductEncoder,
    ) -> Self {
        Self {
            repo,
            products,
            encoder,
        }
    }

    /// Store an inquiry with one item per referenced product.
    ///
    /// Every id is checked before anything is written; the first unknown id
    /// fails the whole submission.
    pub async fn submit(&self, body: &Value) -> Result<InquiryView, MessagesError> {
        let object = expect_object(body)?;
        let fields = JsonFields::new(object);
        let mut problems = FieldErrors::new();
        let sender = decode_sender(&fields, &mut problems);
        let product_ids = decode_items(&fields, &mut problems);
        problems.into_result()?;
        let Some(sender) = sender else {
            return Err(FieldErrors::single("non_field_errors", FieldProblem::Missing).into());
        };

        if !product_ids.is_empty() {
            let existing: HashSet<Uuid> = self
                .products
                .existing_product_ids(&product_ids)
                .await?
                .into_iter()
                .collect();
            if let Some(missing) = product_ids.iter().find(|id| !existing.contains(id)) {
                return Err(MessagesError::ProductNotFound(*missing));
            }
        }

        let record = self
            .repo
            .create_inquiry(CreateInquiryParams {
                id: Uuid::new_v4(),
                name: sender.name,
                email: sender.email,
                subject: sender.subject,
                message: sender.message,
                product_ids,
            })
            .await?;

        info!(
            target = TARGET,
            inquiry_id = %record.id,
            items = record.items.len(),
            "Inquiry stored"
        );
        Ok(InquiryView::from(&record))
    }

    pub async fn list(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<InquiryInboxView>, MessagesError> {
        let records = self.repo.list_inquiries(filter).await?;
        Ok(records.iter().map(InquiryInboxView::from).collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<InquiryDetailView, MessagesError> {
        let record = self
            .repo
            .find_inquiry(id)
            .await?
            .ok_or(MessagesError::NotFound {
                entity: "inquiry",
                id,
            })?;

        let mut ids: Vec<Uuid> = Vec::new();
        for item in &record.items {
            if !ids.contains(&item.product_id) {
                ids.push(item.product_id);
            }
        }
        let products = if ids.is_empty() {
            Vec::new()
        } else {
            let filter = ProductFilter {
                category_id: None,
                ids: Some(ids),
            };
            self.encoder
                .list(&self.products.list_products(&filter).await?)
        };

        Ok(InquiryDetailView {
            inquiry: InquiryInboxView::from(&record),
            products,
        })
    }

    pub async fn mark_read(&self, id: Uuid) -> Result<InquiryInboxView, MessagesError> {
        let record = self
            .repo
            .mark_inquiry_read(id)
            .await?
            .ok_or(MessagesError::NotFound {
                entity: "inquiry",
                id,
            })?;
        Ok(InquiryInboxView::from(&record))
    }
}
