//! Transactional storage boundary for the warehouse core.
//!
//! Every mutating method is one all-or-nothing unit: an error means nothing
//! was applied. Ledger appends update the stock projection inside the same
//! unit, so readers never see one without the other.

pub mod in_memory;
pub mod postgres;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;

use wms_containers::{Container, ContainerError, ContainerStatus, ContainerType};
use wms_core::{ContainerId, ExpectedVersion, LocationId, ProductId, QrCode};
use wms_ledger::{
    IntegrityReport, LedgerError, Movement, MovementFilter, MovementPage, NewMovement, Pagination,
    ProjectionKey, ProjectionRow, RecomputeScope, RecomputeStats, SnapshotRow, SnapshotSummary, StockProjection,
};
use wms_locations::{Location, LocationError, LocationNode, LocationPatch, NewLocation};

pub use in_memory::InMemoryWarehouseStore;
pub use postgres::PostgresWarehouseStore;

/// Storage operation error.
///
/// Domain rules checked inside a transaction surface with their own type;
/// everything else is a concurrency clash or a backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Result of a container save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerCommit {
    pub movements: Vec<Movement>,
    /// Quantity of every projection key the movements touched, read inside
    /// the saving transaction.
    pub balances: BTreeMap<ProjectionKey, i64>,
}

impl ContainerCommit {
    pub fn balance(&self, key: &ProjectionKey) -> i64 {
        self.balances.get(key).copied().unwrap_or(0)
    }
}

/// Projection keys a batch of requests will touch.
fn touched_keys(requests: &[NewMovement]) -> BTreeSet<ProjectionKey> {
    requests.iter().flat_map(StockProjection::touched_keys).collect()
}

/// Which projection rows to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockQuery {
    All,
    Product(ProductId),
    Location(LocationId),
    Container(QrCode),
    /// Rows outside any container, optionally at one location.
    Loose(Option<LocationId>),
}

impl StockQuery {
    pub fn matches(&self, key: &ProjectionKey) -> bool {
        match self {
            StockQuery::All => true,
            StockQuery::Product(p) => &key.product_id == p,
            StockQuery::Location(l) => key.location_id == *l,
            StockQuery::Container(c) => key.container_code.as_ref() == Some(c),
            StockQuery::Loose(l) => !key.in_container() && l.is_none_or(|l| key.location_id == l),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    pub location_id: Option<LocationId>,
    pub status: Option<ContainerStatus>,
    pub container_type: Option<ContainerType>,
}

impl ContainerFilter {
    pub fn matches(&self, container: &Container) -> bool {
        self.location_id.is_none_or(|l| container.location_id() == Some(l))
            && self.status.is_none_or(|s| container.status() == s)
            && self.container_type.is_none_or(|t| container.container_type() == t)
    }
}

/// Persistence for locations, the ledger, the stock projection, containers
/// and snapshots.
#[async_trait::async_trait]
pub trait WarehouseStore: Send + Sync {
    /// Validate `request` against its parent and insert it, in one transaction.
    async fn create_location(&self, request: &NewLocation) -> Result<Location, StoreError>;

    /// Merge `patch` over the current row, in one transaction.
    async fn update_location(&self, id: LocationId, patch: &LocationPatch) -> Result<Location, StoreError>;

    async fn location(&self, id: LocationId) -> Result<Option<Location>, StoreError>;

    async fn location_by_code(&self, code: &str) -> Result<Option<Location>, StoreError>;

    /// Every location, ordered by path.
    async fn locations(&self) -> Result<Vec<Location>, StoreError>;

    async fn descendants(&self, target: &Location, recursive: bool) -> Result<Vec<LocationNode>, StoreError>;

    /// Append movements in order and update the projection, atomically.
    ///
    /// Fails with `LocationNotFound`, `LocationInactive` (for the `to` side),
    /// `InvalidMovement` or `InsufficientStock`; nothing is written then.
    /// Entries naming a container are `InvalidMovement` here: container
    /// stock only moves through `save_container`.
    async fn append(&self, requests: Vec<NewMovement>) -> Result<Vec<Movement>, StoreError>;

    async fn movements(&self, filter: &MovementFilter, pagination: Pagination) -> Result<MovementPage, StoreError>;

    /// Every movement carrying `container_code`, newest first.
    async fn container_movements(&self, container_code: &QrCode) -> Result<Vec<Movement>, StoreError>;

    async fn stock(&self, query: &StockQuery) -> Result<Vec<ProjectionRow>, StoreError>;

    /// Rebuild the projection rows in `scope` from the ledger, atomically.
    async fn recompute(&self, scope: &RecomputeScope) -> Result<RecomputeStats, StoreError>;

    /// Compare the stored projection with ledger sums, without mutation.
    async fn integrity(&self) -> Result<IntegrityReport, StoreError>;

    async fn next_container_id(&self) -> Result<ContainerId, StoreError>;

    async fn container(&self, id: ContainerId) -> Result<Option<Container>, StoreError>;

    async fn container_by_qr(&self, qr_code: &QrCode) -> Result<Option<Container>, StoreError>;

    async fn containers(&self, filter: &ContainerFilter) -> Result<Vec<Container>, StoreError>;

    /// Persist container state and append its movements in one transaction.
    ///
    /// `expected` is the version the container had when it was loaded;
    /// new containers are saved with `ExpectedVersion::Exact(0)`.
    async fn save_container(
        &self,
        container: &Container,
        expected: ExpectedVersion,
        movements: Vec<NewMovement>,
    ) -> Result<ContainerCommit, StoreError>;

    /// Replace the snapshot batch for `date` with the current available rows.
    async fn snapshot(&self, date: NaiveDate) -> Result<SnapshotSummary, StoreError>;

    async fn snapshot_rows(&self, date: NaiveDate) -> Result<Vec<SnapshotRow>, StoreError>;
}

#[async_trait::async_trait]
impl<S> WarehouseStore for Arc<S>
where
    S: WarehouseStore + ?Sized,
{
    async fn create_location(&self, request: &NewLocation) -> Result<Location, StoreError> {
        (**self).create_location(request).await
    }

    async fn update_location(&self, id: LocationId, patch: &LocationPatch) -> Result<Location, StoreError> {
        (**self).update_location(id, patch).await
    }

    async fn location(&self, id: LocationId) -> Result<Option<Location>, StoreError> {
        (**self).location(id).await
    }

    async fn location_by_code(&self, code: &str) -> Result<Option<Location>, StoreError> {
        (**self).location_by_code(code).await
    }

    async fn locations(&self) -> Result<Vec<Location>, StoreError> {
        (**self).locations().await
    }

    async fn descendants(&self, target: &Location, recursive: bool) -> Result<Vec<LocationNode>, StoreError> {
        (**self).descendants(target, recursive).await
    }

    async fn append(&self, requests: Vec<NewMovement>) -> Result<Vec<Movement>, StoreError> {
        (**self).append(requests).await
    }

    async fn movements(&self, filter: &MovementFilter, pagination: Pagination) -> Result<MovementPage, StoreError> {
        (**self).movements(filter, pagination).await
    }

    async fn container_movements(&self, container_code: &QrCode) -> Result<Vec<Movement>, StoreError> {
        (**self).container_movements(container_code).await
    }

    async fn stock(&self, query: &StockQuery) -> Result<Vec<ProjectionRow>, StoreError> {
        (**self).stock(query).await
    }

    async fn recompute(&self, scope: &RecomputeScope) -> Result<RecomputeStats, StoreError> {
        (**self).recompute(scope).await
    }

    async fn integrity(&self) -> Result<IntegrityReport, StoreError> {
        (**self).integrity().await
    }

    async fn next_container_id(&self) -> Result<ContainerId, StoreError> {
        (**self).next_container_id().await
    }

    async fn container(&self, id: ContainerId) -> Result<Option<Container>, StoreError> {
        (**self).container(id).await
    }

    async fn container_by_qr(&self, qr_code: &QrCode) -> Result<Option<Container>, StoreError> {
        (**self).container_by_qr(qr_code).await
    }

    async fn containers(&self, filter: &ContainerFilter) -> Result<Vec<Container>, StoreError> {
        (**self).containers(filter).await
    }

    async fn save_container(
        &self,
        container: &Container,
        expected: ExpectedVersion,
        movements: Vec<NewMovement>,
    ) -> Result<ContainerCommit, StoreError> {
        (**self).save_container(container, expected, movements).await
    }

    async fn snapshot(&self, date: NaiveDate) -> Result<SnapshotSummary, StoreError> {
        (**self).snapshot(date).await
    }

    async fn snapshot_rows(&self, date: NaiveDate) -> Result<Vec<SnapshotRow>, StoreError> {
        (**self).snapshot_rows(date).await
    }
}
