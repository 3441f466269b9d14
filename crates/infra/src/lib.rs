//! Infrastructure layer: storage backends, configuration, catalog boundary
//! and the `Warehouse` service façade.

pub mod catalog;
pub mod config;
pub mod error;
pub mod service;
pub mod store;
pub mod system;

#[cfg(test)]
mod integration_tests;

pub use catalog::{CatalogEntry, InMemoryProductCatalog, ProductCatalog};
pub use config::{ConfigError, DatabaseConfig, WmsConfig};
pub use error::WmsError;
pub use service::{
    ContainerSummary, RegisterRequest, RegisteredContainer, StockRow, UnpackOutcome, UnpackRequest, Warehouse,
};
pub use store::{
    ContainerCommit, ContainerFilter, InMemoryWarehouseStore, PostgresWarehouseStore, StockQuery, StoreError,
    WarehouseStore,
};
pub use system::{AggregateRefresh, ProductAggregate, ProductSummary};
