//! Response shapes for catalogue entities.

use serde::Serialize;
use uuid::Uuid;

use crate::application::catalog::media::MediaUrls;
use crate::domain::entities::{
    CategoryTree, CompositionRecord, ProductGraph, ProductImageRecord, SubCategoryRecord,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedRef {
    pub id: Uuid,
    pub name: String,
}

impl From<&SubCategoryRecord> for NamedRef {
    fn from(record: &SubCategoryRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryView {
    pub id: Uuid,
    pub name: String,
    pub subcategories: Vec<NamedRef>,
}

impl From<&CategoryTree> for CategoryView {
    fn from(tree: &CategoryTree) -> Self {
        Self {
            id: tree.category.id,
            name: tree.category.name.clone(),
            subcategories: tree.subcategories.iter().map(NamedRef::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompositionView {
    pub id: Uuid,
    pub material: String,
}

impl From<&CompositionRecord> for CompositionView {
    fn from(record: &CompositionRecord) -> Self {
        Self {
            id: record.id,
            material: record.material.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductListItem {
    pub id: Uuid,
    pub style_number: String,
    pub image: Option<String>,
    pub category: NamedRef,
    pub sub_category: Option<NamedRef>,
    pub composition: Vec<CompositionView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GalleryImage {
    pub id: Uuid,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductDetail {
    pub id: Uuid,
    pub style_number: String,
    pub gauge: String,
    pub end: String,
    pub weight: String,
    pub description: String,
    pub image: Option<String>,
    pub category: CategoryView,
    pub sub_category: Option<NamedRef>,
    pub composition: Vec<CompositionView>,
    pub images: Vec<GalleryImage>,
}

/// Encodes product graphs with blob URLs resolved against one public base.
#[derive(Debug, Clone)]
pub struct ProductEncoder {
    urls: MediaUrls,
}

impl ProductEncoder {
    pub fn new(urls: MediaUrls) -> Self {
        Self { urls }
    }

    pub fn list_item(&self, graph: &ProductGraph) -> ProductListItem {
        ProductListItem {
            id: graph.product.id,
            style_number: graph.product.style_number.clone(),
            image: self.primary_image(graph),
            category: NamedRef {
                id: graph.category.category.id,
                name: graph.category.category.name.clone(),
            },
            sub_category: graph.sub_category.as_ref().map(NamedRef::from),
            composition: graph.compositions.iter().map(CompositionView::from).collect(),
        }
    }

    pub fn list(&self, graphs: &[ProductGraph]) -> Vec<ProductListItem> {
        graphs.iter().map(|graph| self.list_item(graph)).collect()
    }

    pub fn detail(&self, graph: &ProductGraph) -> ProductDetail {
        let product = &graph.product;
        ProductDetail {
            id: product.id,
            style_number: product.style_number.clone(),
            gauge: product.gauge.clone(),
            end: product.end.clone(),
            weight: product.weight.clone(),
            description: product.description.clone(),
            image: self.primary_image(graph),
            category: CategoryView::from(&graph.category),
            sub_category: graph.sub_category.as_ref().map(NamedRef::from),
            composition: graph.compositions.iter().map(CompositionView::from).collect(),
            images: graph
                .images
                .iter()
                .map(|image| self.gallery_image(image))
                .collect(),
        }
    }

    fn primary_image(&self, graph: &ProductGraph) -> Option<String> {
        graph
            .product
            .image_path
            .as_deref()
            .map(|path| self.urls.url_for(path))
    }

    fn gallery_image(&self, image: &ProductImageRecord) -> GalleryImage {
        GalleryImage {
            id: image.id,
            image: self.urls.url_for(&image.stored_path),
        }
    }
}
