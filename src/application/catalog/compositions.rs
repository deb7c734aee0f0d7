use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::application::catalog::payload::CompositionPayload;
use crate::application::catalog::views::CompositionView;
use crate::application::catalog::{CatalogError, UpdateMode, missing_as_not_found};
use crate::application::repos::{
    CompositionsRepo, CompositionsWriteRepo, CreateCompositionParams, UpdateCompositionParams,
};
use crate::application::validation::FieldErrors;
use crate::cache::{CacheTrigger, EntityKey, EventKind, deps};
use crate::domain::entities::CompositionRecord;
use crate::domain::fields::{FieldProblem, MATERIAL_MAX, bounded_text, required_text};

const ENTITY: &str = "composition";

#[derive(Clone)]
pub struct CompositionService {
    reader: Arc<dyn CompositionsRepo>,
    writer: Arc<dyn CompositionsWriteRepo>,
    cache_trigger: Option<Arc<CacheTrigger>>,
}

impl CompositionService {
    pub fn new(
        reader: Arc<dyn CompositionsRepo>,
        writer: Arc<dyn CompositionsWriteRepo>,
    ) -> Self {
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

    pub async fn list(&self) -> Result<Vec<CompositionView>, CatalogError> {
        let records = self.reader.list_compositions().await?;
        deps::record(EntityKey::Compositions);
        deps::record_all(records.iter().map(|record| EntityKey::Composition(record.id)));
        Ok(records.iter().map(CompositionView::from).collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<CompositionView, CatalogError> {
        let record = self.load(id).await?;
        Ok(CompositionView::from(&record))
    }

    pub async fn create(
        &self,
        payload: CompositionPayload,
    ) -> Result<CompositionView, CatalogError> {
        let CompositionPayload {
            material,
            mut problems,
        } = payload;
        let material = problems.capture(
            "material",
            required_text(material.as_deref(), MATERIAL_MAX),
        );
        problems.into_result()?;
        let material =
            material.ok_or_else(|| FieldErrors::single("material", FieldProblem::Missing))?;

        let record = self
            .writer
            .create_composition(CreateCompositionParams {
                id: Uuid::new_v4(),
                material,
            })
            .await?;

        info!(
            target = "catalogue::application::catalog::compositions",
            composition_id = %record.id,
            "Composition created"
        );
        self.publish(EventKind::CompositionCreated {
            composition_id: record.id,
        });
        Ok(CompositionView::from(&record))
    }

    pub async fn update(
        &self,
        id: Uuid,
        payload: CompositionPayload,
        mode: UpdateMode,
    ) -> Result<CompositionView, CatalogError> {
        let existing = self
            .reader
            .find_composition(id)
            .await?
            .ok_or_else(|| CatalogError::not_found(ENTITY, id))?;

        let CompositionPayload {
            material,
            mut problems,
        } = payload;

        let material = match (material, mode) {
            (Some(raw), _) => problems.capture("material", bounded_text(&raw, MATERIAL_MAX)),
            (None, UpdateMode::Full) => {
                problems.push("material", FieldProblem::Missing);
                None
            }
            // Nothing supplied: the stored row is the answer.
            (None, UpdateMode::Partial) => return Ok(CompositionView::from(&existing)),
        };
        problems.into_result()?;
        let Some(material) = material else {
            return Ok(CompositionView::from(&existing));
        };

        let record = self
            .writer
            .update_composition(UpdateCompositionParams { id, material })
            .await
            .map_err(missing_as_not_found(ENTITY, id))?;

        info!(
            target = "catalogue::application::catalog::compositions",
            composition_id = %id,
            "Composition updated"
        );
        self.publish(EventKind::CompositionUpdated { composition_id: id });
        Ok(CompositionView::from(&record))
    }

    /// Remove the composition; products lose the association but remain.
    pub async fn delete(&self, id: Uuid) -> Result<(), CatalogError> {
        self.reader
            .find_composition(id)
            .await?
            .ok_or_else(|| CatalogError::not_found(ENTITY, id))?;
        self.writer
            .delete_composition(id)
            .await
            .map_err(missing_as_not_found(ENTITY, id))?;

        info!(
            target = "catalogue::application::catalog::compositions",
            composition_id = %id,
            "Composition deleted"
        );
        // Product payloads embed materials, so they go stale too.
        self.publish(EventKind::CompositionDeleted { composition_id: id });
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<CompositionRecord, CatalogError> {
        let record = self
            .reader
            .find_composition(id)
            .await?
            .ok_or_else(|| CatalogError::not_found(ENTITY, id))?;
        deps::record(EntityKey::Composition(id));
        Ok(record)
    }

    fn publish(&self, event: EventKind) {
        if let Some(trigger) = &self.cache_trigger {
            trigger.publish(event);
        }
    }
}
