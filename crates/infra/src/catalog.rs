//! Product catalog boundary.
//!
//! The catalog is owned by another system; this core only reads names and
//! categories for display and unit footprints for placement estimates.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use wms_core::ProductId;
use wms_locations::Footprint;

pub trait ProductCatalog: Send + Sync {
    fn product_name(&self, product_id: &ProductId) -> Option<String>;

    fn product_category(&self, product_id: &ProductId) -> Option<String>;

    /// Per-unit weight and volume; unknown products get the default footprint.
    fn unit_footprint(&self, product_id: &ProductId) -> Footprint;
}

impl<C> ProductCatalog for Arc<C>
where
    C: ProductCatalog + ?Sized,
{
    fn product_name(&self, product_id: &ProductId) -> Option<String> {
        (**self).product_name(product_id)
    }

    fn product_category(&self, product_id: &ProductId) -> Option<String> {
        (**self).product_category(product_id)
    }

    fn unit_footprint(&self, product_id: &ProductId) -> Footprint {
        (**self).unit_footprint(product_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    pub category: Option<String>,
    pub footprint: Footprint,
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    entries: RwLock<HashMap<ProductId, CatalogEntry>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product_id: ProductId, entry: CatalogEntry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(product_id, entry);
        }
    }

    fn get(&self, product_id: &ProductId) -> Option<CatalogEntry> {
        self.entries.read().ok()?.get(product_id).cloned()
    }
}

impl ProductCatalog for InMemoryProductCatalog {
    fn product_name(&self, product_id: &ProductId) -> Option<String> {
        self.get(product_id).map(|e| e.name)
    }

    fn product_category(&self, product_id: &ProductId) -> Option<String> {
        self.get(product_id).and_then(|e| e.category)
    }

    fn unit_footprint(&self, product_id: &ProductId) -> Footprint {
        self.get(product_id).map(|e| e.footprint).unwrap_or_default()
    }
}
