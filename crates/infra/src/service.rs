//! Application service: the warehouse façade.
//!
//! Container commands follow the aggregate pipeline:
//!
//! ```text
//! load container -> handle(command) -> apply(events)
//!   -> save_container(state, expected version, ledger movements)
//! ```
//!
//! The store persists the new state and appends the movements in one
//! transaction, so a failed save leaves neither behind.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use wms_containers::{
    Container, ContainerCommand, ContainerError, ContainerEvent, ContainerStatus, ContainerType, NewContentLine,
    RegisterContainer, RelocateContainer, UnpackContainer, UpdateContainerStatus,
};
use wms_core::{Aggregate, AggregateRoot, ContainerId, ExpectedVersion, LocationId, ProductId, QrCode};
use wms_ledger::{Movement, MovementFilter, MovementPage, NewMovement, Pagination, ProjectionKey, ProjectionRow};
use wms_locations::{
    find_available, Load, Location, LocationError, LocationNode, LocationPatch, LocationTree, NewLocation,
    PlacementCandidate, PlacementRequest,
};

use crate::catalog::ProductCatalog;
use crate::error::WmsError;
use crate::store::{ContainerCommit, ContainerFilter, StockQuery, WarehouseStore};
use crate::system::AggregateCache;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub qr_code: String,
    pub container_type: ContainerType,
    pub location_code: String,
    #[serde(default)]
    pub contents: Vec<NewContentLine>,
    #[serde(default)]
    pub parent_container_id: Option<ContainerId>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredContainer {
    pub id: ContainerId,
    pub qr_code: QrCode,
    /// Content lines after merging duplicates.
    pub items_registered: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackRequest {
    /// Scanned code; must match the container's.
    pub qr_code: String,
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub batch_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackOutcome {
    pub remaining_in_container: i64,
    /// Loose stock of the product (and batch) at the container's location
    /// after the unpack.
    pub loose_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub qr_code: QrCode,
    pub container_type: ContainerType,
    pub status: ContainerStatus,
    pub products_count: usize,
    pub total_units: i64,
}

/// Projection row enriched for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRow {
    #[serde(flatten)]
    pub row: ProjectionRow,
    pub location_code: Option<String>,
    pub product_name: Option<String>,
}

/// Warehouse façade over a store and the product catalog.
pub struct Warehouse<S> {
    pub(crate) store: S,
    pub(crate) catalog: Arc<dyn ProductCatalog>,
    pub(crate) aggregate: AggregateCache,
}

impl<S> Warehouse<S> {
    pub fn new(store: S, catalog: Arc<dyn ProductCatalog>) -> Self {
        Self {
            store,
            catalog,
            aggregate: AggregateCache::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> Warehouse<S>
where
    S: WarehouseStore,
{
    // --- locations -------------------------------------------------------

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    pub async fn create_location(&self, request: &NewLocation) -> Result<Location, WmsError> {
        let location = self.store.create_location(request).await?;
        info!(location_id = %location.id, code = %location.code, level = location.level, "location created");
        Ok(location)
    }

    #[instrument(skip(self, patch), err)]
    pub async fn update_location(&self, id: LocationId, patch: &LocationPatch) -> Result<Location, WmsError> {
        let location = self.store.update_location(id, patch).await?;
        info!(location_id = %id, "location updated");
        Ok(location)
    }

    /// Mark a location inactive. Children keep their own flag.
    pub async fn deactivate_location(&self, id: LocationId) -> Result<Location, WmsError> {
        let patch = LocationPatch {
            is_active: Some(false),
            ..LocationPatch::default()
        };
        self.update_location(id, &patch).await
    }

    pub async fn location(&self, id: LocationId) -> Result<Location, WmsError> {
        self.store
            .location(id)
            .await?
            .ok_or_else(|| LocationError::not_found(id).into())
    }

    pub async fn location_by_code(&self, code: &str) -> Result<Location, WmsError> {
        self.store
            .location_by_code(code)
            .await?
            .ok_or_else(|| LocationError::not_found(code).into())
    }

    pub async fn descendants(&self, id: LocationId, recursive: bool) -> Result<Vec<LocationNode>, WmsError> {
        let target = self.location(id).await?;
        Ok(self.store.descendants(&target, recursive).await?)
    }

    pub async fn location_tree(&self, max_level: u8) -> Result<LocationTree, WmsError> {
        let rows = self.store.locations().await?;
        Ok(LocationTree::build(rows, max_level))
    }

    /// Least-loaded leaf location able to take `request.quantity` units.
    #[instrument(skip(self), err)]
    pub async fn find_available_location(&self, request: &PlacementRequest) -> Result<PlacementCandidate, WmsError> {
        let locations = self.store.locations().await?;
        let mut loads: HashMap<LocationId, Load> = HashMap::new();
        for row in self.store.stock(&StockQuery::All).await? {
            let load = self.catalog.unit_footprint(&row.key.product_id).times(row.quantity);
            loads.entry(row.key.location_id).or_default().add(load);
        }
        let footprint = self.catalog.unit_footprint(&request.product_id);
        Ok(find_available(request, footprint, &locations, &loads)?)
    }

    // --- ledger ----------------------------------------------------------

    #[instrument(
        skip(self, request),
        fields(movement_type = %request.movement_type, product_id = %request.product_id, quantity = request.quantity),
        err
    )]
    pub async fn create_movement(&self, request: NewMovement) -> Result<Movement, WmsError> {
        let movement = self
            .store
            .append(vec![request])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| WmsError::Storage("append committed no movement".to_string()))?;
        info!(movement_id = %movement.id, "movement recorded");
        Ok(movement)
    }

    pub async fn movements(&self, filter: &MovementFilter, pagination: Pagination) -> Result<MovementPage, WmsError> {
        Ok(self.store.movements(filter, pagination).await?)
    }

    // --- containers ------------------------------------------------------

    async fn load_container(&self, id: ContainerId) -> Result<Container, WmsError> {
        self.store
            .container(id)
            .await?
            .ok_or_else(|| ContainerError::not_found(id).into())
    }

    async fn target_location(&self, code: &str) -> Result<Location, WmsError> {
        self.store
            .location_by_code(code)
            .await?
            .ok_or_else(|| LocationError::not_found(code).into())
    }

    /// Decide, apply and persist one container command.
    async fn execute_container(
        &self,
        container: Container,
        command: ContainerCommand,
    ) -> Result<(Container, Vec<ContainerEvent>, ContainerCommit), WmsError> {
        let expected = ExpectedVersion::Exact(container.version());
        let events = container.handle(&command)?;
        if events.is_empty() {
            return Ok((container, events, ContainerCommit::default()));
        }

        let mut next = container;
        let mut movements = Vec::new();
        for event in &events {
            next.apply(event);
            movements.extend(event.movements());
        }

        let committed = self.store.save_container(&next, expected, movements).await?;
        info!(
            container_id = %next.id_typed(),
            version = next.version(),
            events = events.len(),
            movements = committed.movements.len(),
            "container command committed"
        );
        Ok((next, events, committed))
    }

    #[instrument(skip(self, request), fields(qr_code = %request.qr_code, location_code = %request.location_code), err)]
    pub async fn register_container(&self, request: RegisterRequest) -> Result<RegisteredContainer, WmsError> {
        let qr_code = QrCode::new(request.qr_code)?;
        if self.store.container_by_qr(&qr_code).await?.is_some() {
            return Err(ContainerError::AlreadyExists(qr_code.to_string()).into());
        }
        let location = self.target_location(&request.location_code).await?;
        let id = self.store.next_container_id().await?;

        let command = ContainerCommand::Register(RegisterContainer {
            qr_code: qr_code.clone(),
            container_type: request.container_type,
            location,
            contents: request.contents,
            parent_container_id: request.parent_container_id,
            metadata: request.metadata,
            occurred_at: Utc::now(),
        });
        let (container, _, _) = self.execute_container(Container::empty(id), command).await?;

        Ok(RegisteredContainer {
            id,
            qr_code,
            items_registered: container.contents().len(),
        })
    }

    #[instrument(skip(self), err)]
    pub async fn relocate_container(&self, id: ContainerId, location_code: &str) -> Result<Container, WmsError> {
        let container = self.load_container(id).await?;
        let target = self.target_location(location_code).await?;
        let command = ContainerCommand::Relocate(RelocateContainer {
            target,
            occurred_at: Utc::now(),
        });
        let (container, _, _) = self.execute_container(container, command).await?;
        Ok(container)
    }

    #[instrument(skip(self, request), fields(product_id = %request.product_id, quantity = request.quantity), err)]
    pub async fn unpack_container(&self, id: ContainerId, request: UnpackRequest) -> Result<UnpackOutcome, WmsError> {
        let container = self.load_container(id).await?;
        let command = ContainerCommand::Unpack(UnpackContainer {
            qr_code: QrCode::new(request.qr_code)?,
            product_id: request.product_id,
            quantity: request.quantity,
            batch_number: request.batch_number,
            occurred_at: Utc::now(),
        });
        let (_, events, committed) = self.execute_container(container, command).await?;

        let unpacked = events
            .iter()
            .find_map(|e| match e {
                ContainerEvent::Unpacked(u) => Some(u),
                _ => None,
            })
            .ok_or_else(|| WmsError::Storage("unpack produced no event".to_string()))?;

        let loose_quantity = committed.balance(&ProjectionKey::loose(
            unpacked.product_id.clone(),
            unpacked.location_id,
            unpacked.batch_number.clone(),
        ));

        Ok(UnpackOutcome {
            remaining_in_container: unpacked.remaining_in_container,
            loose_quantity,
        })
    }

    #[instrument(skip(self), err)]
    pub async fn update_container_status(&self, id: ContainerId, status: ContainerStatus) -> Result<Container, WmsError> {
        let container = self.load_container(id).await?;
        let command = ContainerCommand::UpdateStatus(UpdateContainerStatus {
            status,
            occurred_at: Utc::now(),
        });
        let (container, _, _) = self.execute_container(container, command).await?;
        Ok(container)
    }

    pub async fn container(&self, id: ContainerId) -> Result<Container, WmsError> {
        self.load_container(id).await
    }

    pub async fn container_by_qr(&self, qr_code: &str) -> Result<Container, WmsError> {
        let qr_code = QrCode::new(qr_code)?;
        self.store
            .container_by_qr(&qr_code)
            .await?
            .ok_or_else(|| ContainerError::not_found(&qr_code).into())
    }

    /// Every ledger entry carrying the container's code, newest first.
    pub async fn container_history(&self, qr_code: &str) -> Result<Vec<Movement>, WmsError> {
        let container = self.container_by_qr(qr_code).await?;
        let Some(code) = container.qr_code() else {
            return Err(ContainerError::not_found(qr_code).into());
        };
        Ok(self.store.container_movements(code).await?)
    }

    pub async fn containers_in_location(
        &self,
        location_id: LocationId,
        status: Option<ContainerStatus>,
        container_type: Option<ContainerType>,
    ) -> Result<Vec<ContainerSummary>, WmsError> {
        self.location(location_id).await?;
        let filter = ContainerFilter {
            location_id: Some(location_id),
            status,
            container_type,
        };
        Ok(self
            .store
            .containers(&filter)
            .await?
            .into_iter()
            .filter_map(|c| {
                Some(ContainerSummary {
                    id: c.id_typed(),
                    qr_code: c.qr_code()?.clone(),
                    container_type: c.container_type(),
                    status: c.status(),
                    products_count: c.products_count(),
                    total_units: c.total_units(),
                })
            })
            .collect())
    }

    // --- stock -----------------------------------------------------------

    async fn enrich(&self, rows: Vec<ProjectionRow>) -> Result<Vec<StockRow>, WmsError> {
        let codes: HashMap<LocationId, String> = self
            .store
            .locations()
            .await?
            .into_iter()
            .map(|l| (l.id, l.code))
            .collect();
        Ok(rows
            .into_iter()
            .map(|row| StockRow {
                location_code: codes.get(&row.key.location_id).cloned(),
                product_name: self.catalog.product_name(&row.key.product_id),
                row,
            })
            .collect())
    }

    pub async fn stock_by_product(&self, product_id: &ProductId) -> Result<Vec<StockRow>, WmsError> {
        let rows = self.store.stock(&StockQuery::Product(product_id.clone())).await?;
        self.enrich(rows).await
    }

    pub async fn stock_by_location(&self, location_id: LocationId) -> Result<Vec<StockRow>, WmsError> {
        self.location(location_id).await?;
        let rows = self.store.stock(&StockQuery::Location(location_id)).await?;
        self.enrich(rows).await
    }

    pub async fn stock_in_container(&self, qr_code: &str) -> Result<Vec<StockRow>, WmsError> {
        let qr_code = QrCode::new(qr_code)?;
        let rows = self.store.stock(&StockQuery::Container(qr_code)).await?;
        self.enrich(rows).await
    }

    pub async fn loose_stock(&self, location_id: Option<LocationId>) -> Result<Vec<StockRow>, WmsError> {
        let rows = self.store.stock(&StockQuery::Loose(location_id)).await?;
        self.enrich(rows).await
    }
}
