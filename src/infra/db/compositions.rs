use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    application::repos::{
        CompositionsRepo, CompositionsWriteRepo, CreateCompositionParams, RepoError,
        UpdateCompositionParams,
    },
    domain::entities::CompositionRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct CompositionRow {
    id: Uuid,
    material: String,
}

impl From<CompositionRow> for CompositionRecord {
    fn from(row: CompositionRow) -> Self {
        Self {
            id: row.id,
            material: row.material,
        }
    }
}

#[async_trait]
impl CompositionsRepo for PostgresRepositories {
    async fn list_compositions(&self) -> Result<Vec<CompositionRecord>, RepoError> {
        let rows = sqlx::query_as::<_, CompositionRow>(
            r#"
            SELECT id, material
            FROM compositions
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;

        Ok(rows.into_iter().map(CompositionRecord::from).collect())
    }

    async fn find_composition(&self, id: Uuid) -> Result<Option<CompositionRecord>, RepoError> {
        let row = sqlx::query_as::<_, CompositionRow>(
            "SELECT id, material FROM compositions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;

        Ok(row.map(CompositionRecord::from))
    }

    async fn find_compositions(&self, ids: &[Uuid]) -> Result<Vec<CompositionRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, CompositionRow>(
            r#"
            SELECT id, material
            FROM compositions
            WHERE id = ANY($1)
            ORDER BY material, id
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;

        Ok(rows.into_iter().map(CompositionRecord::from).collect())
    }
}

#[async_trait]
impl CompositionsWriteRepo for PostgresRepositories {
    async fn create_composition(
        &self,
        params: CreateCompositionParams,
    ) -> Result<CompositionRecord, RepoError> {
        let row = sqlx::query_as::<_, CompositionRow>(
            r#"
            INSERT INTO compositions (id, material)
            VALUES ($1, $2)
            RETURNING id, material
            "#,
        )
        .bind(params.id)
        .bind(&params.material)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(CompositionRecord::from(row))
    }

    async fn update_composition(
        &self,
        params: UpdateCompositionParams,
    ) -> Result<CompositionRecord, RepoError> {
        let row = sqlx::query_as::<_, CompositionRow>(
            r#"
            UPDATE compositions
            SET material = $2,
                updated_at = now()
            WHERE id = $1
            RETURNING id, material
            "#,
        )
        .bind(params.id)
        .bind(&params.material)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        Ok(CompositionRecord::from(row))
    }

    async fn delete_composition(&self, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM compositions WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
