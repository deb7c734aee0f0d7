use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        ContactMessagesRepo, CreateContactMessageParams, CreateInquiryParams, InquiriesRepo,
        MessageFilter, RepoError,
    },
    domain::entities::{ContactMessageRecord, InquiryItemRecord, InquiryRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

const MESSAGE_COLUMNS: &str = "id, name, email, subject, message, is_read, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    name: String,
    email: String,
    subject: String,
    message: String,
    is_read: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<MessageRow> for ContactMessageRecord {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            subject: row.subject,
            message: row.message,
            is_read: row.is_read,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl MessageRow {
    fn into_inquiry(self, items: Vec<InquiryItemRecord>) -> InquiryRecord {
        InquiryRecord {
            id: self.id,
            name: self.name,
            email: self.email,
            subject: self.subject,
            message: self.message,
            is_read: self.is_read,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LinkedItemRow {
    inquiry_id: Uuid,
    id: Uuid,
    product_id: Uuid,
}

/// Append the read-state and free-text conditions shared by both inboxes.
fn push_filter(qb: &mut QueryBuilder<'_, sqlx::Postgres>, filter: &MessageFilter) {
    if let Some(is_read) = filter.is_read {
        qb.push(" AND is_read = ");
        qb.push_bind(is_read);
    }

    if let Some(search) = filter.search.as_ref().filter(|term| !term.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        qb.push(" AND (name ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR email ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR subject ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR message ILIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }
}

#[async_trait]
impl ContactMessagesRepo for PostgresRepositories {
    async fn create_contact_message(
        &self,
        params: CreateContactMessageParams,
    ) -> Result<ContactMessageRecord, RepoError> {
        let sql = format!(
            "INSERT INTO contact_messages (id, name, email, subject, message) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {MESSAGE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(params.id)
            .bind(&params.name)
            .bind(&params.email)
            .bind(&params.subject)
            .bind(&params.message)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(ContactMessageRecord::from(row))
    }

    async fn list_contact_messages(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<ContactMessageRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {MESSAGE_COLUMNS} FROM contact_messages WHERE 1=1 "
        ));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id");

        let rows = qb
            .build_query_as::<MessageRow>()
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;

        Ok(rows.into_iter().map(ContactMessageRecord::from).collect())
    }

    async fn mark_contact_message_read(
        &self,
        id: Uuid,
    ) -> Result<Option<ContactMessageRecord>, RepoError> {
        let sql = format!(
            "UPDATE contact_messages SET is_read = TRUE, updated_at = now() \
             WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(ContactMessageRecord::from))
    }
}

impl PostgresRepositories {
    async fn attach_items(&self, rows: Vec<MessageRow>) -> Result<Vec<InquiryRecord>, RepoError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let links = sqlx::query_as::<_, LinkedItemRow>(
            r#"
            SELECT l.inquiry_id, i.id, i.product_id
            FROM inquiry_item_links l
            INNER JOIN inquiry_items i ON i.id = l.item_id
            WHERE l.inquiry_id = ANY($1)
            ORDER BY l.position, i.id
            "#,
        )
        .bind(&ids)
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;

        let mut grouped: HashMap<Uuid, Vec<InquiryItemRecord>> = HashMap::new();
        for link in links {
            grouped
                .entry(link.inquiry_id)
                .or_default()
                .push(InquiryItemRecord {
                    id: link.id,
                    product_id: link.product_id,
                });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let items = grouped.remove(&row.id).unwrap_or_default();
                row.into_inquiry(items)
            })
            .collect())
    }
}

#[async_trait]
impl InquiriesRepo for PostgresRepositories {
    async fn create_inquiry(
        &self,
        params: CreateInquiryParams,
    ) -> Result<InquiryRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let sql = format!(
            "INSERT INTO inquiries (id, name, email, subject, message) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {MESSAGE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(params.id)
            .bind(&params.name)
            .bind(&params.email)
            .bind(&params.subject)
            .bind(&params.message)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let items: Vec<InquiryItemRecord> = params
            .product_ids
            .iter()
            .map(|product_id| InquiryItemRecord {
                id: Uuid::new_v4(),
                product_id: *product_id,
            })
            .collect();

        if !items.is_empty() {
            let item_ids: Vec<Uuid> = items.iter().map(|item| item.id).collect();

            sqlx::query(
                r#"
                INSERT INTO inquiry_items (id, product_id)
                SELECT * FROM UNNEST($1::uuid[], $2::uuid[])
                "#,
            )
            .bind(&item_ids)
            .bind(&params.product_ids)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            sqlx::query(
                r#"
                INSERT INTO inquiry_item_links (inquiry_id, item_id, position)
                SELECT $1, item_id, (ord - 1)::int
                FROM UNNEST($2::uuid[]) WITH ORDINALITY AS t(item_id, ord)
                "#,
            )
            .bind(params.id)
            .bind(&item_ids)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(row.into_inquiry(items))
    }

    async fn list_inquiries(&self, filter: &MessageFilter) -> Result<Vec<InquiryRecord>, RepoError> {
        let mut qb =
            QueryBuilder::new(format!("SELECT {MESSAGE_COLUMNS} FROM inquiries WHERE 1=1 "));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id");

        let rows = qb
            .build_query_as::<MessageRow>()
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;

        self.attach_items(rows).await
    }

    async fn find_inquiry(&self, id: Uuid) -> Result<Option<InquiryRecord>, RepoError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM inquiries WHERE id = $1");
        let Some(row) = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(RepoError::from_persistence)?
        else {
            return Ok(None);
        };

        Ok(self.attach_items(vec![row]).await?.pop())
    }

    async fn mark_inquiry_read(&self, id: Uuid) -> Result<Option<InquiryRecord>, RepoError> {
        let sql = format!(
            "UPDATE inquiries SET is_read = TRUE, updated_at = now() \
             WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        );
        let Some(row) = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?
        else {
            return Ok(None);
        };

        Ok(self.attach_items(vec![row]).await?.pop())
    }
}
