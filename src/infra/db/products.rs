use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::{PgConnection, QueryBuilder};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::{
    application::repos::{
        CategoriesRepo, CreateProductParams, NewProductImage, ProductFilter, ProductsRepo,
        ProductsWriteRepo, RepoError, UpdateProductParams,
    },
    domain::entities::{
        CompositionRecord, ProductGraph, ProductImageRecord, ProductRecord, SubCategoryRecord,
    },
};

use super::{PostgresRepositories, categories::load_trees, map_sqlx_error};

const PRODUCT_COLUMNS: &str = r#"id, style_number, gauge, "end", weight, description, category_id, sub_category_id, image_path, created_at, updated_at"#;

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    style_number: String,
    gauge: String,
    end: String,
    weight: String,
    description: String,
    category_id: Uuid,
    sub_category_id: Option<Uuid>,
    image_path: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ProductRow> for ProductRecord {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            style_number: row.style_number,
            gauge: row.gauge,
            end: row.end,
            weight: row.weight,
            description: row.description,
            category_id: row.category_id,
            sub_category_id: row.sub_category_id,
            image_path: row.image_path,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LinkedCompositionRow {
    product_id: Uuid,
    id: Uuid,
    material: String,
}

#[derive(sqlx::FromRow)]
struct GalleryRow {
    product_id: Uuid,
    id: Uuid,
    stored_path: String,
    checksum: String,
    size_bytes: i64,
    width: i32,
    height: i32,
    created_at: OffsetDateTime,
}

impl From<GalleryRow> for ProductImageRecord {
    fn from(row: GalleryRow) -> Self {
        Self {
            id: row.id,
            stored_path: row.stored_path,
            checksum: row.checksum,
            size_bytes: row.size_bytes,
            width: row.width,
            height: row.height,
            created_at: row.created_at,
        }
    }
}

impl PostgresRepositories {
    /// Load every related row for `rows` with one query per relation.
    async fn load_graphs(&self, rows: Vec<ProductRow>) -> Result<Vec<ProductGraph>, RepoError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let product_ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let category_ids: Vec<Uuid> = rows
            .iter()
            .map(|row| row.category_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let sub_category_ids: Vec<Uuid> = rows
            .iter()
            .filter_map(|row| row.sub_category_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let trees = load_trees(self.pool(), &category_ids).await?;
        let subs: HashMap<Uuid, SubCategoryRecord> = self
            .find_subcategories(&sub_category_ids)
            .await?
            .into_iter()
            .map(|sub| (sub.id, sub))
            .collect();

        let composition_rows = sqlx::query_as::<_, LinkedCompositionRow>(
            r#"
            SELECT pc.product_id, c.id, c.material
            FROM product_compositions pc
            INNER JOIN compositions c ON c.id = pc.composition_id
            WHERE pc.product_id = ANY($1)
            ORDER BY c.material, c.id
            "#,
        )
        .bind(&product_ids)
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;

        let mut compositions: HashMap<Uuid, Vec<CompositionRecord>> = HashMap::new();
        for row in composition_rows {
            compositions
                .entry(row.product_id)
                .or_default()
                .push(CompositionRecord {
                    id: row.id,
                    material: row.material,
                });
        }

        let gallery_rows = sqlx::query_as::<_, GalleryRow>(
            r#"
            SELECT pg.product_id, i.id, i.stored_path, i.checksum, i.size_bytes,
                   i.width, i.height, i.created_at
            FROM product_gallery pg
            INNER JOIN product_images i ON i.id = pg.image_id
            WHERE pg.product_id = ANY($1)
            ORDER BY pg.position, i.id
            "#,
        )
        .bind(&product_ids)
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;

        let mut galleries: HashMap<Uuid, Vec<ProductImageRecord>> = HashMap::new();
        for row in gallery_rows {
            galleries
                .entry(row.product_id)
                .or_default()
                .push(ProductImageRecord::from(row));
        }

        let mut graphs = Vec::with_capacity(rows.len());
        for row in rows {
            // A category deleted after the products select took this row with it.
            let Some(category) = trees.get(&row.category_id).cloned() else {
                debug!(
                    product_id = %row.id,
                    category_id = %row.category_id,
                    "Skipping product whose category was deleted mid-read"
                );
                continue;
            };
            let sub_category = row.sub_category_id.and_then(|id| subs.get(&id).cloned());
            let compositions = compositions.remove(&row.id).unwrap_or_default();
            let images = galleries.remove(&row.id).unwrap_or_default();

            let graph = ProductGraph::assemble(
                ProductRecord::from(row),
                category,
                sub_category,
                compositions,
                images,
            )
            .map_err(|err| RepoError::Integrity {
                message: err.to_string(),
            })?;
            graphs.push(graph);
        }
        Ok(graphs)
    }
}

async fn replace_compositions(
    conn: &mut PgConnection,
    product_id: Uuid,
    composition_ids: &[Uuid],
) -> Result<(), RepoError> {
    sqlx::query("DELETE FROM product_compositions WHERE product_id = $1")
        .bind(product_id)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    if composition_ids.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO product_compositions (product_id, composition_id)
        SELECT $1, composition_id
        FROM UNNEST($2::uuid[]) AS t(composition_id)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(product_id)
    .bind(composition_ids)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

/// Drop the gallery links of `product_id` and link `images` in order.
/// Unlinked image rows are kept.
async fn replace_gallery(
    conn: &mut PgConnection,
    product_id: Uuid,
    images: &[NewProductImage],
) -> Result<(), RepoError> {
    sqlx::query("DELETE FROM product_gallery WHERE product_id = $1")
        .bind(product_id)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    if images.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = images.iter().map(|image| image.id).collect();
    let paths: Vec<String> = images.iter().map(|image| image.stored_path.clone()).collect();
    let checksums: Vec<String> = images.iter().map(|image| image.checksum.clone()).collect();
    let sizes: Vec<i64> = images.iter().map(|image| image.size_bytes).collect();
    let widths: Vec<i32> = images.iter().map(|image| image.width).collect();
    let heights: Vec<i32> = images.iter().map(|image| image.height).collect();

    sqlx::query(
        r#"
        INSERT INTO product_images (id, stored_path, checksum, size_bytes, width, height)
        SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::text[], $4::bigint[], $5::int[], $6::int[])
        "#,
    )
    .bind(&ids)
    .bind(&paths)
    .bind(&checksums)
    .bind(&sizes)
    .bind(&widths)
    .bind(&heights)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    sqlx::query(
        r#"
        INSERT INTO product_gallery (product_id, image_id, position)
        SELECT $1, image_id, (ord - 1)::int
        FROM UNNEST($2::uuid[]) WITH ORDINALITY AS t(image_id, ord)
        "#,
    )
    .bind(product_id)
    .bind(&ids)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

#[async_trait]
impl ProductsRepo for PostgresRepositories {
    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<ProductGraph>, RepoError> {
        let mut qb = QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE 1=1 "));

        if let Some(category_id) = filter.category_id {
            qb.push(" AND category_id = ");
            qb.push_bind(category_id);
        }

        if let Some(ids) = filter.ids.as_ref() {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" AND id = ANY(");
            qb.push_bind(ids.clone());
            qb.push(")");
        }

        qb.push(" ORDER BY created_at DESC, id");

        let rows = qb
            .build_query_as::<ProductRow>()
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;

        self.load_graphs(rows).await
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<ProductGraph>, RepoError> {
        let Some(row) = self.product_row(id).await? else {
            return Ok(None);
        };
        Ok(self.load_graphs(vec![row]).await?.pop())
    }

    async fn find_product_record(&self, id: Uuid) -> Result<Option<ProductRecord>, RepoError> {
        Ok(self.product_row(id).await?.map(ProductRecord::from))
    }

    async fn existing_product_ids(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query_scalar::<_, Uuid>("SELECT id FROM products WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)
    }
}

impl PostgresRepositories {
    async fn product_row(&self, id: Uuid) -> Result<Option<ProductRow>, RepoError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(RepoError::from_persistence)
    }
}

#[async_trait]
impl ProductsWriteRepo for PostgresRepositories {
    async fn create_product(&self, params: CreateProductParams) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO products (
                id, style_number, gauge, "end", weight, description,
                category_id, sub_category_id, image_path
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(params.id)
        .bind(&params.style_number)
        .bind(&params.gauge)
        .bind(&params.end)
        .bind(&params.weight)
        .bind(&params.description)
        .bind(params.category_id)
        .bind(params.sub_category_id)
        .bind(params.image_path.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        replace_compositions(&mut *tx, params.id, &params.composition_ids).await?;
        replace_gallery(&mut *tx, params.id, &params.images).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update_product(&self, params: UpdateProductParams) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let result = sqlx::query(
            r#"
            UPDATE products
            SET style_number = COALESCE($2, style_number),
                gauge = COALESCE($3, gauge),
                "end" = COALESCE($4, "end"),
                weight = COALESCE($5, weight),
                description = COALESCE($6, description),
                category_id = COALESCE($7, category_id),
                sub_category_id = CASE WHEN $8 THEN $9 ELSE sub_category_id END,
                image_path = COALESCE($10, image_path),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(params.id)
        .bind(params.style_number.as_deref())
        .bind(params.gauge.as_deref())
        .bind(params.end.as_deref())
        .bind(params.weight.as_deref())
        .bind(params.description.as_deref())
        .bind(params.category_id)
        .bind(params.sub_category_id.is_some())
        .bind(params.sub_category_id.flatten())
        .bind(params.image_path.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        if let Some(composition_ids) = params.composition_ids.as_ref() {
            replace_compositions(&mut *tx, params.id, composition_ids).await?;
        }
        if let Some(images) = params.images.as_ref() {
            replace_gallery(&mut *tx, params.id, images).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete_product(&self, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
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
