//! Product reads and writes.
//!
//! A write runs in four phases: field validation and reference resolution,
//! image normalization on the blocking pool, blob storage, and a single
//! repository transaction. Blobs written for a save that does not commit are
//! removed again.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::application::catalog::media::{
    BlobStore, ImageError, ImageNormalizer, NormalizedImage, Upload, discard_blobs,
};
use crate::application::catalog::payload::ProductPayload;
use crate::application::catalog::views::{ProductDetail, ProductEncoder, ProductListItem};
use crate::application::catalog::{CatalogError, missing_as_not_found};
use crate::application::repos::{
    CategoriesRepo, CompositionsRepo, CreateProductParams, NewProductImage, ProductFilter,
    ProductsRepo, ProductsWriteRepo, UpdateProductParams,
};
use crate::application::validation::FieldErrors;
use crate::cache::{CacheTrigger, EntityKey, EventKind, deps};
use crate::domain::entities::ProductGraph;
use crate::domain::error::DomainError;
use crate::domain::fields::{
    FieldProblem, PRODUCT_CODE_MAX, bounded_text, required_body, required_text,
};

const ENTITY: &str = "product";
const TARGET: &str = "catalogue::application::catalog::products";

/// Image collaborators of the product service.
#[derive(Clone)]
pub struct ProductMedia {
    pub normalizer: Arc<dyn ImageNormalizer>,
    pub blobs: Arc<dyn BlobStore>,
    pub encoder: ProductEncoder,
}

#[derive(Clone)]
pub struct ProductService {
    reader: Arc<dyn ProductsRepo>,
    writer: Arc<dyn ProductsWriteRepo>,
    categories: Arc<dyn CategoriesRepo>,
    compositions: Arc<dyn CompositionsRepo>,
    media: ProductMedia,
    cache_trigger: Option<Arc<CacheTrigger>>,
}

/// Foreign keys of a write that passed reference checks.
#[derive(Debug, Default)]
struct ResolvedRefs {
    category_id: Option<Uuid>,
    sub_category_id: Option<Option<Uuid>>,
    composition_ids: Option<Vec<Uuid>>,
}

/// Normalized images waiting to be stored.
#[derive(Debug, Default)]
struct PreparedImages {
    primary: Option<NormalizedImage>,
    gallery: Option<Vec<NormalizedImage>>,
}

/// Images written to blob storage for the pending transaction.
#[derive(Debug, Default)]
struct StoredImages {
    primary: Option<String>,
    gallery: Option<Vec<NewProductImage>>,
    paths: Vec<String>,
}

impl ProductService {
    pub fn new(
        reader: Arc<dyn ProductsRepo>,
        writer: Arc<dyn ProductsWriteRepo>,
        categories: Arc<dyn CategoriesRepo>,
        compositions: Arc<dyn CompositionsRepo>,
        media: ProductMedia,
    ) -> Self {
        Self {
            reader,
            writer,
            categories,
            compositions,
            media,
            cache_trigger: None,
        }
    }

    pub fn with_cache_trigger_opt(mut self, trigger: Option<Arc<CacheTrigger>>) -> Self {
        self.cache_trigger = trigger;
        self
    }

    pub async fn list(&self) -> Result<Vec<ProductListItem>, CatalogError> {
        let graphs = self.reader.list_products(&ProductFilter::default()).await?;
        deps::record_all([
            EntityKey::Products,
            EntityKey::Categories,
            EntityKey::Compositions,
        ]);
        record_graphs(&graphs);
        Ok(self.media.encoder.list(&graphs))
    }

    /// Products of one category; the category itself must exist.
    pub async fn list_by_category(
        &self,
        category_id: Uuid,
    ) -> Result<Vec<ProductListItem>, CatalogError> {
        self.categories
            .find_category(category_id)
            .await?
            .ok_or_else(|| CatalogError::not_found("category", category_id))?;

        let filter = ProductFilter {
            category_id: Some(category_id),
            ids: None,
        };
        let graphs = self.reader.list_products(&filter).await?;
        deps::record_all([
            EntityKey::Products,
            EntityKey::Category(category_id),
            EntityKey::Compositions,
        ]);
        record_graphs(&graphs);
        Ok(self.media.encoder.list(&graphs))
    }

    pub async fn get(&self, id: Uuid) -> Result<ProductDetail, CatalogError> {
        let graph = self
            .reader
            .find_product(id)
            .await?
            .ok_or_else(|| CatalogError::not_found(ENTITY, id))?;
        record_graphs(std::slice::from_ref(&graph));
        Ok(self.media.encoder.detail(&graph))
    }

    pub async fn create(&self, payload: ProductPayload) -> Result<ProductDetail, CatalogError> {
        let ProductPayload {
            style_number,
            gauge,
            end,
            weight,
            description,
            category,
            sub_category,
            composition,
            image,
            images,
            mut problems,
        } = payload;

        let style_number = code(&mut problems, "style_number", style_number);
        let gauge = code(&mut problems, "gauge", gauge);
        let end = code(&mut problems, "end", end);
        let weight = code(&mut problems, "weight", weight);
        let description = problems.capture("description", required_body(description.as_deref()));
        if category.is_none() && !problems.contains("category") {
            problems.push("category", FieldProblem::Missing);
        }

        let refs = self
            .resolve_refs(category, sub_category, composition, &mut problems)
            .await?;
        problems.into_result()?;

        let (
            Some(style_number),
            Some(gauge),
            Some(end),
            Some(weight),
            Some(description),
            Some(category_id),
        ) = (style_number, gauge, end, weight, description, refs.category_id)
        else {
            return Err(DomainError::invariant("validated product fields went missing").into());
        };

        let prepared = self.prepare_images(image, images).await?;
        let stored = self.store_images(prepared).await?;

        let id = Uuid::new_v4();
        let params = CreateProductParams {
            id,
            style_number,
            gauge,
            end,
            weight,
            description,
            category_id,
            sub_category_id: refs.sub_category_id.flatten(),
            image_path: stored.primary,
            composition_ids: refs.composition_ids.unwrap_or_default(),
            images: stored.gallery.unwrap_or_default(),
        };
        let compositions = params.composition_ids.len();
        let gallery = params.images.len();

        if let Err(err) = self.writer.create_product(params).await {
            discard_blobs(&self.media.blobs, &stored.paths).await;
            return Err(err.into());
        }

        info!(
            target = TARGET,
            product_id = %id,
            compositions,
            images = gallery,
            "Product created"
        );
        self.publish(EventKind::ProductCreated { product_id: id });
        self.reload(id).await
    }

    /// Apply the supplied fields; `PUT` and `PATCH` share these semantics.
    pub async fn update(
        &self,
        id: Uuid,
        payload: ProductPayload,
    ) -> Result<ProductDetail, CatalogError> {
        self.reader
            .find_product_record(id)
            .await?
            .ok_or_else(|| CatalogError::not_found(ENTITY, id))?;

        let ProductPayload {
            style_number,
            gauge,
            end,
            weight,
            description,
            category,
            sub_category,
            composition,
            image,
            images,
            mut problems,
        } = payload;

        let style_number = supplied_code(&mut problems, "style_number", style_number);
        let gauge = supplied_code(&mut problems, "gauge", gauge);
        let end = supplied_code(&mut problems, "end", end);
        let weight = supplied_code(&mut problems, "weight", weight);
        let description = description.and_then(|raw| {
            problems.capture("description", required_body(Some(raw.as_str())))
        });

        let refs = self
            .resolve_refs(category, sub_category, composition, &mut problems)
            .await?;
        problems.into_result()?;

        // An empty gallery upload keeps the current images.
        let images = images.filter(|uploads| !uploads.is_empty());
        let prepared = self.prepare_images(image, images).await?;
        let stored = self.store_images(prepared).await?;

        let params = UpdateProductParams {
            id,
            style_number,
            gauge,
            end,
            weight,
            description,
            category_id: refs.category_id,
            sub_category_id: refs.sub_category_id,
            image_path: stored.primary,
            composition_ids: refs.composition_ids,
            images: stored.gallery,
        };
        let replaced_compositions = params.composition_ids.is_some();
        let replaced_images = params.images.is_some();

        if let Err(err) = self.writer.update_product(params).await {
            discard_blobs(&self.media.blobs, &stored.paths).await;
            return Err(missing_as_not_found(ENTITY, id)(err));
        }

        info!(
            target = TARGET,
            product_id = %id,
            replaced_compositions,
            replaced_images,
            "Product updated"
        );
        self.publish(EventKind::ProductUpdated { product_id: id });
        self.reload(id).await
    }

    /// Remove the product; compositions and stored images stay.
    pub async fn delete(&self, id: Uuid) -> Result<(), CatalogError> {
        self.reader
            .find_product_record(id)
            .await?
            .ok_or_else(|| CatalogError::not_found(ENTITY, id))?;
        self.writer
            .delete_product(id)
            .await
            .map_err(missing_as_not_found(ENTITY, id))?;

        info!(target = TARGET, product_id = %id, "Product deleted");
        self.publish(EventKind::ProductDeleted { product_id: id });
        Ok(())
    }

    async fn reload(&self, id: Uuid) -> Result<ProductDetail, CatalogError> {
        let graph = self.reader.find_product(id).await?.ok_or_else(|| {
            DomainError::invariant(format!("product `{id}` vanished after its write"))
        })?;
        Ok(self.media.encoder.detail(&graph))
    }

    /// Check every referenced row exists, recording misses as field errors.
    async fn resolve_refs(
        &self,
        category: Option<Uuid>,
        sub_category: Option<Option<Uuid>>,
        composition: Option<Vec<Uuid>>,
        problems: &mut FieldErrors,
    ) -> Result<ResolvedRefs, CatalogError> {
        let mut refs = ResolvedRefs::default();

        if let Some(category_id) = category {
            if self.categories.find_category(category_id).await?.is_some() {
                refs.category_id = Some(category_id);
            } else {
                problems.push("category", unknown(category_id));
            }
        }

        match sub_category {
            Some(Some(sub_id)) => {
                let found = self.categories.find_subcategories(&[sub_id]).await?;
                if found.iter().any(|sub| sub.id == sub_id) {
                    refs.sub_category_id = Some(Some(sub_id));
                } else {
                    problems.push("sub_category", unknown(sub_id));
                }
            }
            Some(None) => refs.sub_category_id = Some(None),
            None => {}
        }

        if let Some(ids) = composition {
            let mut seen = HashSet::new();
            let ids: Vec<Uuid> = ids.into_iter().filter(|id| seen.insert(*id)).collect();
            let found: HashSet<Uuid> = if ids.is_empty() {
                HashSet::new()
            } else {
                self.compositions
                    .find_compositions(&ids)
                    .await?
                    .into_iter()
                    .map(|record| record.id)
                    .collect()
            };
            let missing: Vec<&Uuid> = ids.iter().filter(|id| !found.contains(id)).collect();
            if missing.is_empty() {
                refs.composition_ids = Some(ids);
            } else {
                for id in missing {
                    problems.push("composition", unknown(*id));
                }
            }
        }

        Ok(refs)
    }

    /// Normalize uploads on the blocking pool.
    ///
    /// Undecodable files become a field error on the field that carried them.
    async fn prepare_images(
        &self,
        image: Option<Upload>,
        images: Option<Vec<Upload>>,
    ) -> Result<PreparedImages, CatalogError> {
        let has_gallery = images.is_some();
        let mut uploads: Vec<(&'static str, Upload)> = Vec::new();
        uploads.extend(image.map(|upload| ("image", upload)));
        uploads.extend(images.into_iter().flatten().map(|upload| ("images", upload)));
        if uploads.is_empty() {
            return Ok(PreparedImages::default());
        }

        let normalizer = self.media.normalizer.clone();
        let results = tokio::task::spawn_blocking(move || {
            uploads
                .into_iter()
                .map(|(field, upload)| {
                    let result = normalizer.normalize(&upload);
                    (field, upload.file_name, result)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|err| CatalogError::Task(err.to_string()))?;

        let mut problems = FieldErrors::new();
        let mut prepared = PreparedImages {
            primary: None,
            gallery: has_gallery.then(Vec::new),
        };
        for (field, file_name, result) in results {
            match result {
                Ok(normalized) if field == "image" => prepared.primary = Some(normalized),
                Ok(normalized) => prepared.gallery.get_or_insert_with(Vec::new).push(normalized),
                Err(ImageError::Decode(reason)) => {
                    debug!(
                        target = TARGET,
                        field,
                        file_name = %file_name,
                        reason = %reason,
                        "Rejected upload"
                    );
                    if !problems.contains(field) {
                        problems.push(field, FieldProblem::InvalidImage);
                    }
                }
                Err(other) => return Err(other.into()),
            }
        }
        problems.into_result()?;
        Ok(prepared)
    }

    async fn store_images(&self, prepared: PreparedImages) -> Result<StoredImages, CatalogError> {
        let mut stored = StoredImages::default();

        if let Some(image) = prepared.primary {
            match self.media.blobs.put(&image.file_name, image.bytes).await {
                Ok(blob) => {
                    stored.paths.push(blob.stored_path.clone());
                    stored.primary = Some(blob.stored_path);
                }
                Err(err) => return Err(err.into()),
            }
        }

        if let Some(gallery) = prepared.gallery {
            let mut rows = Vec::with_capacity(gallery.len());
            for image in gallery {
                let (width, height) = (image.width, image.height);
                match self.media.blobs.put(&image.file_name, image.bytes).await {
                    Ok(blob) => {
                        stored.paths.push(blob.stored_path.clone());
                        rows.push(NewProductImage {
                            id: Uuid::new_v4(),
                            stored_path: blob.stored_path,
                            checksum: blob.checksum,
                            size_bytes: i64::try_from(blob.size_bytes).unwrap_or(i64::MAX),
                            width: i32::try_from(width).unwrap_or(i32::MAX),
                            height: i32::try_from(height).unwrap_or(i32::MAX),
                        });
                    }
                    Err(err) => {
                        discard_blobs(&self.media.blobs, &stored.paths).await;
                        return Err(err.into());
                    }
                }
            }
            stored.gallery = Some(rows);
        }

        Ok(stored)
    }

    fn publish(&self, event: EventKind) {
        if let Some(trigger) = &self.cache_trigger {
            trigger.publish(event);
        }
    }
}

fn record_graphs(graphs: &[ProductGraph]) {
    for graph in graphs {
        deps::record(EntityKey::Product(graph.id()));
        deps::record(EntityKey::Category(graph.product.category_id));
        deps::record_all(
            graph
                .compositions
                .iter()
                .map(|composition| EntityKey::Composition(composition.id)),
        );
    }
}

fn code(problems: &mut FieldErrors, field: &str, value: Option<String>) -> Option<String> {
    problems.capture(field, required_text(value.as_deref(), PRODUCT_CODE_MAX))
}

fn supplied_code(problems: &mut FieldErrors, field: &str, value: Option<String>) -> Option<String> {
    value.and_then(|raw| problems.capture(field, bounded_text(&raw, PRODUCT_CODE_MAX)))
}

fn unknown(id: Uuid) -> FieldProblem {
    FieldProblem::UnknownReference { id: id.to_string() }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use time::OffsetDateTime;

    use super::*;
    use crate::application::catalog::media::{BlobError, MediaUrls, StoredBlob};
    use crate::application::catalog::payload::{MultipartForm, ProductBody};
    use crate::application::repos::RepoError;
    use crate::cache::{CacheConfig, CacheKey, ResponseCache};
    use crate::domain::entities::{
        CategoryRecord, CategoryTree, CompositionRecord, ProductImageRecord, ProductRecord,
        SubCategoryRecord,
    };

    struct Catalogue {
        category: CategoryTree,
        compositions: Vec<CompositionRecord>,
        products: Mutex<Vec<ProductGraph>>,
        updates: Mutex<Vec<UpdateProductParams>>,
        fail_writes: bool,
    }

    impl Catalogue {
        fn new() -> Self {
            Self {
                category: CategoryTree {
                    category: CategoryRecord {
                        id: Uuid::new_v4(),
                        name: "Knitwear".to_string(),
                        created_at: OffsetDateTime::UNIX_EPOCH,
                        updated_at: OffsetDateTime::UNIX_EPOCH,
                    },
                    subcategories: Vec::new(),
                },
                compositions: vec![
                    CompositionRecord {
                        id: Uuid::new_v4(),
                        material: "Merino".to_string(),
                    },
                    CompositionRecord {
                        id: Uuid::new_v4(),
                        material: "Cashmere".to_string(),
                    },
                ],
                products: Mutex::new(Vec::new()),
                updates: Mutex::new(Vec::new()),
                fail_writes: false,
            }
        }

        fn graph(&self, params: &CreateProductParams) -> ProductGraph {
            ProductGraph::assemble(
                ProductRecord {
                    id: params.id,
                    style_number: params.style_number.clone(),
                    gauge: params.gauge.clone(),
                    end: params.end.clone(),
                    weight: params.weight.clone(),
                    description: params.description.clone(),
                    category_id: params.category_id,
                    sub_category_id: None,
                    image_path: params.image_path.clone(),
                    created_at: OffsetDateTime::UNIX_EPOCH,
                    updated_at: OffsetDateTime::UNIX_EPOCH,
                },
                self.category.clone(),
                None,
                self.compositions
                    .iter()
                    .filter(|c| params.composition_ids.contains(&c.id))
                    .cloned()
                    .collect(),
                params
                    .images
                    .iter()
                    .map(|image| ProductImageRecord {
                        id: image.id,
                        stored_path: image.stored_path.clone(),
                        checksum: image.checksum.clone(),
                        size_bytes: image.size_bytes,
                        width: image.width,
                        height: image.height,
                        created_at: OffsetDateTime::UNIX_EPOCH,
                    })
                    .collect(),
            )
            .expect("consistent graph")
        }
    }

    #[async_trait]
    impl ProductsRepo for Catalogue {
        async fn list_products(
            &self,
            filter: &ProductFilter,
        ) -> Result<Vec<ProductGraph>, RepoError> {
            Ok(self
                .products
                .lock()
                .unwrap()
                .iter()
                .filter(|g| filter.category_id.is_none_or(|id| g.product.category_id == id))
                .filter(|g| filter.ids.as_ref().is_none_or(|ids| ids.contains(&g.id())))
                .cloned()
                .collect())
        }

        async fn find_product(&self, id: Uuid) -> Result<Option<ProductGraph>, RepoError> {
            Ok(self
                .products
                .lock()
                .unwrap()
                .iter()
                .find(|g| g.id() == id)
                .cloned())
        }

        async fn find_product_record(
            &self,
            id: Uuid,
        ) -> Result<Option<ProductRecord>, RepoError> {
            Ok(self.find_product(id).await?.map(|g| g.product))
        }

        async fn existing_product_ids(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, RepoError> {
            Ok(self
                .products
                .lock()
                .unwrap()
                .iter()
                .map(ProductGraph::id)
                .filter(|id| ids.contains(id))
                .collect())
        }
    }

    #[async_trait]
    impl ProductsWriteRepo for Catalogue {
        async fn create_product(&self, params: CreateProductParams) -> Result<(), RepoError> {
            if self.fail_writes {
                return Err(RepoError::from_persistence("connection reset"));
            }
            let graph = self.graph(&params);
            self.products.lock().unwrap().push(graph);
            Ok(())
        }

        async fn update_product(&self, params: UpdateProductParams) -> Result<(), RepoError> {
            if self.fail_writes {
                return Err(RepoError::from_persistence("connection reset"));
            }
            let mut products = self.products.lock().unwrap();
            let graph = products
                .iter_mut()
                .find(|g| g.id() == params.id)
                .ok_or(RepoError::NotFound)?;
            if let Some(style_number) = &params.style_number {
                graph.product.style_number = style_number.clone();
            }
            if let Some(ids) = &params.composition_ids {
                graph.compositions = self
                    .compositions
                    .iter()
                    .filter(|c| ids.contains(&c.id))
                    .cloned()
                    .collect();
            }
            drop(products);
            self.updates.lock().unwrap().push(params);
            Ok(())
        }

        async fn delete_product(&self, id: Uuid) -> Result<(), RepoError> {
            self.products.lock().unwrap().retain(|g| g.id() != id);
            Ok(())
        }
    }

    #[async_trait]
    impl CategoriesRepo for Catalogue {
        async fn list_categories(&self) -> Result<Vec<CategoryTree>, RepoError> {
            Ok(vec![self.category.clone()])
        }

        async fn find_category(&self, id: Uuid) -> Result<Option<CategoryTree>, RepoError> {
            Ok((self.category.category.id == id).then(|| self.category.clone()))
        }

        async fn find_subcategories(
            &self,
            _ids: &[Uuid],
        ) -> Result<Vec<SubCategoryRecord>, RepoError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl CompositionsRepo for Catalogue {
        async fn list_compositions(&self) -> Result<Vec<CompositionRecord>, RepoError> {
            Ok(self.compositions.clone())
        }

        async fn find_composition(
            &self,
            id: Uuid,
        ) -> Result<Option<CompositionRecord>, RepoError> {
            Ok(self.compositions.iter().find(|c| c.id == id).cloned())
        }

        async fn find_compositions(
            &self,
            ids: &[Uuid],
        ) -> Result<Vec<CompositionRecord>, RepoError> {
            Ok(self
                .compositions
                .iter()
                .filter(|c| ids.contains(&c.id))
                .cloned()
                .collect())
        }
    }

    /// Accepts anything except the literal bytes `corrupt`.
    struct StubNormalizer;

    impl ImageNormalizer for StubNormalizer {
        fn normalize(&self, upload: &Upload) -> Result<NormalizedImage, ImageError> {
            if upload.bytes.as_ref() == b"corrupt" {
                return Err(ImageError::Decode("unsupported format".to_string()));
            }
            let stem = upload.file_name.rsplit_once('.').map_or(
                upload.file_name.as_str(),
                |(stem, _)| stem,
            );
            Ok(NormalizedImage {
                file_name: format!("{stem}.jpg"),
                bytes: upload.bytes.clone(),
                width: 800,
                height: 600,
            })
        }
    }

    #[derive(Default)]
    struct MemoryBlobs {
        stored: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for MemoryBlobs {
        async fn put(&self, file_name: &str, bytes: Bytes) -> Result<StoredBlob, BlobError> {
            let path = format!("2025/01/02/{}-{file_name}", Uuid::new_v4());
            self.stored.lock().unwrap().push(path.clone());
            Ok(StoredBlob {
                stored_path: path,
                checksum: "abc".to_string(),
                size_bytes: bytes.len() as u64,
            })
        }

        async fn remove(&self, stored_path: &str) -> Result<(), BlobError> {
            self.removed.lock().unwrap().push(stored_path.to_string());
            Ok(())
        }
    }

    struct Harness {
        catalogue: Arc<Catalogue>,
        blobs: Arc<MemoryBlobs>,
        service: ProductService,
    }

    fn harness(catalogue: Catalogue) -> Harness {
        let catalogue = Arc::new(catalogue);
        let blobs = Arc::new(MemoryBlobs::default());
        let service = ProductService::new(
            catalogue.clone(),
            catalogue.clone(),
            catalogue.clone(),
            catalogue.clone(),
            ProductMedia {
                normalizer: Arc::new(StubNormalizer),
                blobs: blobs.clone(),
                encoder: ProductEncoder::new(MediaUrls::new("/uploads")),
            },
        );
        Harness {
            catalogue,
            blobs,
            service,
        }
    }

    fn upload(name: &str, bytes: &'static [u8]) -> Upload {
        Upload {
            file_name: name.to_string(),
            content_type: Some("image/png".to_string()),
            bytes: Bytes::from_static(bytes),
        }
    }

    fn form(catalogue: &Catalogue, files: Vec<(String, Upload)>) -> ProductPayload {
        let mut fields = vec![
            ("style_number".to_string(), "KN-100".to_string()),
            ("gauge".to_string(), "12GG".to_string()),
            ("end".to_string(), "2/28".to_string()),
            ("weight".to_string(), "320g".to_string()),
            ("description".to_string(), "Crew neck".to_string()),
            ("category".to_string(), catalogue.category.category.id.to_string()),
        ];
        for composition in &catalogue.compositions {
            fields.push(("composition".to_string(), composition.id.to_string()));
        }
        ProductPayload::decode(ProductBody::Multipart(MultipartForm { fields, files }))
    }

    #[tokio::test]
    async fn create_links_compositions_and_gallery() {
        let h = harness(Catalogue::new());
        let payload = form(
            &h.catalogue,
            vec![("images".to_string(), upload("side.png", b"png"))],
        );

        let detail = h.service.create(payload).await.expect("create");

        assert_eq!(detail.composition.len(), 2);
        assert_eq!(detail.images.len(), 1);
        assert!(detail.images[0].image.starts_with("/uploads/2025/01/02/"));
        assert!(detail.images[0].image.ends_with("-side.jpg"));
        assert_eq!(h.blobs.stored.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_reports_every_missing_field() {
        let h = harness(Catalogue::new());
        let err = h
            .service
            .create(ProductPayload::decode(ProductBody::Json(json!({}))))
            .await
            .expect_err("empty body");
        let CatalogError::Validation(problems) = err else {
            panic!("expected validation error");
        };
        for field in ["style_number", "gauge", "end", "weight", "description", "category"] {
            assert_eq!(
                problems.get(field),
                Some(&["This field is required.".to_string()][..]),
                "{field}"
            );
        }
    }

    #[tokio::test]
    async fn unknown_composition_is_rejected_before_any_blob_is_written() {
        let h = harness(Catalogue::new());
        let mut payload = form(
            &h.catalogue,
            vec![("image".to_string(), upload("main.png", b"png"))],
        );
        let bogus = Uuid::new_v4();
        payload.composition = Some(vec![bogus]);

        let err = h.service.create(payload).await.expect_err("unknown id");
        let CatalogError::Validation(problems) = err else {
            panic!("expected validation error");
        };
        assert_eq!(
            problems.get("composition"),
            Some(&[format!("Invalid pk \"{bogus}\" - object does not exist.")][..])
        );
        assert!(h.blobs.stored.lock().unwrap().is_empty());
        assert!(h.catalogue.products.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_image_aborts_the_save() {
        let h = harness(Catalogue::new());
        let payload = form(
            &h.catalogue,
            vec![
                ("image".to_string(), upload("main.png", b"png")),
                ("images".to_string(), upload("broken.png", b"corrupt")),
            ],
        );

        let err = h.service.create(payload).await.expect_err("corrupt");
        let CatalogError::Validation(problems) = err else {
            panic!("expected validation error");
        };
        assert_eq!(
            problems.get("images"),
            Some(&[FieldProblem::InvalidImage.to_string()][..])
        );
        assert!(h.blobs.stored.lock().unwrap().is_empty());
        assert!(h.catalogue.products.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_transaction_removes_stored_blobs() {
        let mut catalogue = Catalogue::new();
        catalogue.fail_writes = true;
        let h = harness(catalogue);
        let payload = form(
            &h.catalogue,
            vec![
                ("image".to_string(), upload("main.png", b"png")),
                ("images".to_string(), upload("side.png", b"png")),
            ],
        );

        let err = h.service.create(payload).await.expect_err("write fails");
        assert!(matches!(err, CatalogError::Repo(_)));
        let stored = h.blobs.stored.lock().unwrap().clone();
        let removed = h.blobs.removed.lock().unwrap().clone();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored, removed);
    }

    #[tokio::test]
    async fn update_replaces_composition_set_and_keeps_absent_fields() {
        let h = harness(Catalogue::new());
        let created = h
            .service
            .create(form(&h.catalogue, Vec::new()))
            .await
            .expect("create");
        let keep = h.catalogue.compositions[1].id;

        let detail = h
            .service
            .update(
                created.id,
                ProductPayload::decode(ProductBody::Json(json!({
                    "composition": [keep.to_string()]
                }))),
            )
            .await
            .expect("update");

        assert_eq!(detail.style_number, "KN-100");
        assert_eq!(detail.composition.len(), 1);
        assert_eq!(detail.composition[0].id, keep);

        let updates = h.catalogue.updates.lock().unwrap();
        assert_eq!(updates[0].style_number, None);
        assert_eq!(updates[0].images, None);
        assert_eq!(updates[0].sub_category_id, None);
    }

    #[tokio::test]
    async fn update_with_empty_composition_clears_it() {
        let h = harness(Catalogue::new());
        let created = h
            .service
            .create(form(&h.catalogue, Vec::new()))
            .await
            .expect("create");

        let detail = h
            .service
            .update(
                created.id,
                ProductPayload::decode(ProductBody::Json(json!({ "composition": [] }))),
            )
            .await
            .expect("update");
        assert!(detail.composition.is_empty());
    }

    #[tokio::test]
    async fn update_of_missing_product_is_not_found() {
        let h = harness(Catalogue::new());
        let err = h
            .service
            .update(
                Uuid::new_v4(),
                ProductPayload::decode(ProductBody::Json(json!({ "gauge": "7GG" }))),
            )
            .await
            .expect_err("missing");
        assert!(matches!(err, CatalogError::NotFound { entity: "product", .. }));
    }

    #[tokio::test]
    async fn writes_invalidate_cached_reads() {
        let h = harness(Catalogue::new());
        let cache = Arc::new(ResponseCache::new(CacheConfig::default()));
        let service = h
            .service
            .clone()
            .with_cache_trigger_opt(Some(Arc::new(CacheTrigger::new(cache.clone()))));

        let read = |service: ProductService| async move {
            let items = service.list().await?;
            Ok::<_, CatalogError>(Bytes::from(serde_json::to_vec(&items).expect("json")))
        };

        let empty = cache
            .get_or_compute(CacheKey::ProductList, read(service.clone()))
            .await
            .expect("first read");
        service
            .create(form(&h.catalogue, Vec::new()))
            .await
            .expect("create");
        let after = cache
            .get_or_compute(CacheKey::ProductList, read(service.clone()))
            .await
            .expect("second read");

        assert_eq!(empty, Bytes::from_static(b"[]"));
        assert_ne!(after, empty);
    }

    #[tokio::test]
    async fn detail_records_every_source_row() {
        let h = harness(Catalogue::new());
        let created = h
            .service
            .create(form(&h.catalogue, Vec::new()))
            .await
            .expect("create");

        let (detail, recorded) = deps::with_collector(h.service.get(created.id)).await;
        detail.expect("detail");
        assert!(recorded.contains(&EntityKey::Product(created.id)));
        assert!(recorded.contains(&EntityKey::Category(h.catalogue.category.category.id)));
        for composition in &h.catalogue.compositions {
            assert!(recorded.contains(&EntityKey::Composition(composition.id)));
        }
    }
}
