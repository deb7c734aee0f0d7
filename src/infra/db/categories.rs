use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        CategoriesRepo, CategoriesWriteRepo, CreateCategoryParams, DeletedCategory, RepoError,
        SubCategoryRef, UpdateCategoryParams,
    },
    domain::entities::{CategoryRecord, CategoryTree, SubCategoryRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: Uuid,
    name: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<CategoryRow> for CategoryRecord {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SubCategoryRow {
    id: Uuid,
    name: String,
}

impl From<SubCategoryRow> for SubCategoryRecord {
    fn from(row: SubCategoryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LinkedSubCategoryRow {
    category_id: Uuid,
    id: Uuid,
    name: String,
}

const SUBCATEGORIES_FOR_CATEGORIES: &str = r#"
    SELECT cs.category_id, s.id, s.name
    FROM category_subcategories cs
    INNER JOIN subcategories s ON s.id = cs.subcategory_id
    WHERE cs.category_id = ANY($1)
    ORDER BY s.name, s.id
"#;

/// Attach the current subcategory association to each category row.
fn into_trees(
    categories: Vec<CategoryRow>,
    links: Vec<LinkedSubCategoryRow>,
) -> Vec<CategoryTree> {
    let mut grouped: HashMap<Uuid, Vec<SubCategoryRecord>> = HashMap::new();
    for link in links {
        grouped
            .entry(link.category_id)
            .or_default()
            .push(SubCategoryRecord {
                id: link.id,
                name: link.name,
            });
    }

    categories
        .into_iter()
        .map(|row| {
            let subcategories = grouped.remove(&row.id).unwrap_or_default();
            CategoryTree {
                category: CategoryRecord::from(row),
                subcategories,
            }
        })
        .collect()
}

/// Load categories with their subcategories, keyed by id.
pub(super) async fn load_trees(
    pool: &PgPool,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, CategoryTree>, RepoError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query_as::<_, CategoryRow>(
        r#"
        SELECT id, name, created_at, updated_at
        FROM categories
        WHERE id = ANY($1)
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await
    .map_err(RepoError::from_persistence)?;

    let links = sqlx::query_as::<_, LinkedSubCategoryRow>(SUBCATEGORIES_FOR_CATEGORIES)
        .bind(ids)
        .fetch_all(pool)
        .await
        .map_err(RepoError::from_persistence)?;

    Ok(into_trees(rows, links)
        .into_iter()
        .map(|tree| (tree.category.id, tree))
        .collect())
}

async fn load_tree_in(
    conn: &mut PgConnection,
    row: CategoryRow,
) -> Result<CategoryTree, RepoError> {
    let links = sqlx::query_as::<_, LinkedSubCategoryRow>(SUBCATEGORIES_FOR_CATEGORIES)
        .bind(vec![row.id])
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    into_trees(vec![row], links)
        .pop()
        .ok_or_else(|| RepoError::from_persistence("category row disappeared while loading"))
}

/// Turn references into subcategory ids, creating named rows that do not
/// exist yet. Repeated references collapse to one id.
async fn resolve_subcategories(
    conn: &mut PgConnection,
    refs: Vec<SubCategoryRef>,
) -> Result<Vec<Uuid>, RepoError> {
    let mut ids: Vec<Uuid> = Vec::with_capacity(refs.len());

    for reference in refs {
        let id = match reference {
            SubCategoryRef::Existing(id) => id,
            SubCategoryRef::Named(name) => subcategory_id_for_name(&mut *conn, &name).await?,
        };

        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    Ok(ids)
}

/// Names are unique ignoring case. A concurrent writer that inserts the same
/// name first wins the conflict and its row is reused.
async fn subcategory_id_for_name(conn: &mut PgConnection, name: &str) -> Result<Uuid, RepoError> {
    if let Some(id) = find_subcategory_by_name(&mut *conn, name).await? {
        return Ok(id);
    }

    let inserted = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO subcategories (id, name)
        VALUES ($1, $2)
        ON CONFLICT ((lower(name))) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    match inserted {
        Some(id) => Ok(id),
        None => find_subcategory_by_name(&mut *conn, name)
            .await?
            .ok_or_else(|| RepoError::from_persistence("subcategory conflict row not visible")),
    }
}

async fn find_subcategory_by_name(
    conn: &mut PgConnection,
    name: &str,
) -> Result<Option<Uuid>, RepoError> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM subcategories WHERE lower(name) = lower($1)")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)
}

async fn replace_links(
    conn: &mut PgConnection,
    category_id: Uuid,
    subcategory_ids: &[Uuid],
) -> Result<(), RepoError> {
    sqlx::query("DELETE FROM category_subcategories WHERE category_id = $1")
        .bind(category_id)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    if subcategory_ids.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO category_subcategories (category_id, subcategory_id)
        SELECT $1, sub_id
        FROM UNNEST($2::uuid[]) AS t(sub_id)
        "#,
    )
    .bind(category_id)
    .bind(subcategory_ids)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

#[async_trait]
impl CategoriesRepo for PostgresRepositories {
    async fn list_categories(&self) -> Result<Vec<CategoryTree>, RepoError> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            r#"
            SELECT id, name, created_at, updated_at
            FROM categories
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let links = sqlx::query_as::<_, LinkedSubCategoryRow>(SUBCATEGORIES_FOR_CATEGORIES)
            .bind(&ids)
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;

        Ok(into_trees(rows, links))
    }

    async fn find_category(&self, id: Uuid) -> Result<Option<CategoryTree>, RepoError> {
        Ok(load_trees(self.pool(), &[id]).await?.remove(&id))
    }

    async fn find_subcategories(&self, ids: &[Uuid]) -> Result<Vec<SubCategoryRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, SubCategoryRow>(
            r#"
            SELECT id, name
            FROM subcategories
            WHERE id = ANY($1)
            ORDER BY name, id
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;

        Ok(rows.into_iter().map(SubCategoryRecord::from).collect())
    }
}

#[async_trait]
impl CategoriesWriteRepo for PostgresRepositories {
    async fn create_category(
        &self,
        params: CreateCategoryParams,
    ) -> Result<CategoryTree, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query_as::<_, CategoryRow>(
            r#"
            INSERT INTO categories (id, name)
            VALUES ($1, $2)
            RETURNING id, name, created_at, updated_at
            "#,
        )
        .bind(params.id)
        .bind(&params.name)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let subcategory_ids = resolve_subcategories(&mut *tx, params.subcategories).await?;
        replace_links(&mut *tx, row.id, &subcategory_ids).await?;
        let tree = load_tree_in(&mut *tx, row).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(tree)
    }

    async fn update_category(
        &self,
        params: UpdateCategoryParams,
    ) -> Result<CategoryTree, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query_as::<_, CategoryRow>(
            r#"
            UPDATE categories
            SET name = COALESCE($2, name),
                updated_at = now()
            WHERE id = $1
            RETURNING id, name, created_at, updated_at
            "#,
        )
        .bind(params.id)
        .bind(params.name.as_deref())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        if let Some(refs) = params.subcategories {
            let subcategory_ids = resolve_subcategories(&mut *tx, refs).await?;
            replace_links(&mut *tx, row.id, &subcategory_ids).await?;
        }
        let tree = load_tree_in(&mut *tx, row).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(tree)
    }

    async fn delete_category(&self, id: Uuid) -> Result<DeletedCategory, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let product_ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM products WHERE category_id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(DeletedCategory { product_ids })
    }
}
