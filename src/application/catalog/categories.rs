use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::application::catalog::payload::{CategoryPayload, SubCategoryInput};
use crate::application::catalog::views::{CategoryView, NamedRef};
use crate::application::catalog::{CatalogError, UpdateMode, missing_as_not_found};
use crate::application::repos::{
    CategoriesRepo, CategoriesWriteRepo, CreateCategoryParams, SubCategoryRef,
    UpdateCategoryParams,
};
use crate::application::validation::FieldErrors;
use crate::cache::{CacheTrigger, EntityKey, EventKind, deps};
use crate::domain::entities::CategoryTree;
use crate::domain::fields::{
    CATEGORY_NAME_MAX, FieldProblem, SUBCATEGORY_NAME_MAX, bounded_text, required_text,
};

const ENTITY: &str = "category";

#[derive(Clone)]
pub struct CategoryService {
    reader: Arc<dyn CategoriesRepo>,
    writer: Arc<dyn CategoriesWriteRepo>,
    cache_trigger: Option<Arc<CacheTrigger>>,
}

impl CategoryService {
    pub fn new(reader: Arc<dyn CategoriesRepo>, writer: Arc<dyn CategoriesWriteRepo>) -> Self {
        Self {
            reader,
            writer,
            cache_trigger: None,
        }
    }

    pub fn with_cache_trigger_opt(mut self, trigger: Option<Arc<CacheTrigger>>) -> Self {
        self.cache_trigger = trigger;
        self
    }

    pub async fn list(&self) -> Result<Vec<CategoryView>, CatalogError> {
        let trees = self.reader.list_categories().await?;
        deps::record(EntityKey::Categories);
        deps::record_all(trees.iter().map(|tree| EntityKey::Category(tree.category.id)));
        Ok(trees.iter().map(CategoryView::from).collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<CategoryView, CatalogError> {
        let tree = self.load(id).await?;
        Ok(CategoryView::from(&tree))
    }

    /// Subcategories currently associated with the category.
    pub async fn subcategories(&self, id: Uuid) -> Result<Vec<NamedRef>, CatalogError> {
        let tree = self.load(id).await?;
        Ok(tree.subcategories.iter().map(NamedRef::from).collect())
    }

    pub async fn create(&self, payload: CategoryPayload) -> Result<CategoryView, CatalogError> {
        let CategoryPayload {
            name,
            subcategories,
            mut problems,
        } = payload;

        let name = problems.capture("name", required_text(name.as_deref(), CATEGORY_NAME_MAX));
        let subcategories = self
            .resolve_subcategories(subcategories.unwrap_or_default(), &mut problems)
            .await?;
        problems.into_result()?;
        let name = name.ok_or_else(|| FieldErrors::single("name", FieldProblem::Missing))?;

        let tree = self
            .writer
            .create_category(CreateCategoryParams {
                id: Uuid::new_v4(),
                name,
                subcategories,
            })
            .await?;

        let category_id = tree.category.id;
        info!(
            target = "catalogue::application::catalog::categories",
            %category_id,
            subcategories = tree.subcategories.len(),
            "Category created"
        );
        self.publish(EventKind::CategoryCreated { category_id });
        Ok(CategoryView::from(&tree))
    }

    pub async fn update(
        &self,
        id: Uuid,
        payload: CategoryPayload,
        mode: UpdateMode,
    ) -> Result<CategoryView, CatalogError> {
        self.reader
            .find_category(id)
            .await?
            .ok_or_else(|| CatalogError::not_found(ENTITY, id))?;

        let CategoryPayload {
            name,
            subcategories,
            mut problems,
        } = payload;

        let name = match (name, mode) {
            (Some(raw), _) => problems.capture("name", bounded_text(&raw, CATEGORY_NAME_MAX)),
            (None, UpdateMode::Full) => {
                problems.push("name", FieldProblem::Missing);
                None
            }
            (None, UpdateMode::Partial) => None,
        };
        let subcategories = match subcategories {
            Some(entries) => Some(self.resolve_subcategories(entries, &mut problems).await?),
            None => None,
        };
        problems.into_result()?;

        let tree = self
            .writer
            .update_category(UpdateCategoryParams {
                id,
                name,
                subcategories,
            })
            .await
            .map_err(missing_as_not_found(ENTITY, id))?;

        info!(
            target = "catalogue::application::catalog::categories",
            category_id = %id,
            subcategories = tree.subcategories.len(),
            "Category updated"
        );
        self.publish(EventKind::CategoryUpdated { category_id: id });
        Ok(CategoryView::from(&tree))
    }

    /// Delete the category and, through the foreign key, its products.
    pub async fn delete(&self, id: Uuid) -> Result<(), CatalogError> {
        self.reader
            .find_category(id)
            .await?
            .ok_or_else(|| CatalogError::not_found(ENTITY, id))?;

        let deleted = self
            .writer
            .delete_category(id)
            .await
            .map_err(missing_as_not_found(ENTITY, id))?;

        info!(
            target = "catalogue::application::catalog::categories",
            category_id = %id,
            cascaded_products = deleted.product_ids.len(),
            "Category deleted"
        );
        self.publish(EventKind::CategoryDeleted {
            category_id: id,
            product_ids: deleted.product_ids,
        });
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<CategoryTree, CatalogError> {
        let tree = self
            .reader
            .find_category(id)
            .await?
            .ok_or_else(|| CatalogError::not_found(ENTITY, id))?;
        deps::record(EntityKey::Category(id));
        Ok(tree)
    }

    /// Turn wire entries into references, checking that every id exists.
    ///
    /// An entry carrying an id refers to that row; otherwise its trimmed name
    /// is matched later inside the write transaction.
    async fn resolve_subcategories(
        &self,
        entries: Vec<SubCategoryInput>,
        problems: &mut FieldErrors,
    ) -> Result<Vec<SubCategoryRef>, CatalogError> {
        let mut refs = Vec::with_capacity(entries.len());
        let mut ids = Vec::new();

        for (index, entry) in entries.into_iter().enumerate() {
            match entry {
                SubCategoryInput { id: Some(id), .. } => {
                    ids.push(id);
                    refs.push(SubCategoryRef::Existing(id));
                }
                SubCategoryInput {
                    id: None,
                    name: Some(name),
                } => {
                    let field = format!("subcategories.{index}.name");
                    if let Some(name) =
                        problems.capture(&field, bounded_text(&name, SUBCATEGORY_NAME_MAX))
                    {
                        refs.push(SubCategoryRef::Named(name));
                    }
                }
                SubCategoryInput {
                    id: None,
                    name: None,
                } => problems.push(format!("subcategories.{index}.name"), FieldProblem::Missing),
            }
        }

        if !ids.is_empty() {
            let found: HashSet<Uuid> = self
                .reader
                .find_subcategories(&ids)
                .await?
                .into_iter()
                .map(|sub| sub.id)
                .collect();
            for id in ids.iter().filter(|id| !found.contains(id)) {
                problems.push(
                    "subcategories",
                    FieldProblem::UnknownReference { id: id.to_string() },
                );
            }
        }

        Ok(refs)
    }

    fn publish(&self, event: EventKind) {
        if let Some(trigger) = &self.cache_trigger {
            trigger.publish(event);
        }
    }
}
