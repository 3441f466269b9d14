use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::RwLock;

use chrono::{NaiveDate, Utc};

use wms_containers::{Container, ContainerError};
use wms_core::{AggregateRoot, ContainerId, EventId, ExpectedVersion, LocationId, MovementId, QrCode};
use wms_events::Projection;
use wms_ledger::{
    check_integrity, newest_first, recompute, select, take_snapshot, IntegrityReport, LedgerError, Movement,
    MovementFilter, MovementPage, NewMovement, Pagination, ProjectionKey, ProjectionRow, RecomputeScope,
    RecomputeStats, SnapshotRow, SnapshotSummary, StockProjection,
};
use wms_locations::{descendants, Location, LocationError, LocationNode, LocationPatch, NewLocation};

use super::{touched_keys, ContainerCommit, ContainerFilter, StockQuery, StoreError, WarehouseStore};

#[derive(Debug, Default)]
struct Sites {
    locations: BTreeMap<LocationId, Location>,
    codes: HashMap<String, LocationId>,
    next_location_id: i64,
}

#[derive(Debug, Default)]
struct Stock {
    movements: Vec<Movement>,
    next_movement_id: i64,
    projection: StockProjection,
    containers: BTreeMap<ContainerId, Container>,
    qr_index: HashMap<QrCode, ContainerId>,
}

/// Pre-images of what an append batch changed.
struct Undo {
    movements_len: usize,
    next_movement_id: i64,
    rows: BTreeMap<ProjectionKey, i64>,
}

impl Undo {
    fn begin(stock: &Stock) -> Self {
        Self {
            movements_len: stock.movements.len(),
            next_movement_id: stock.next_movement_id,
            rows: BTreeMap::new(),
        }
    }

    /// Remember the current quantity of each key `request` is about to change.
    fn touch(&mut self, projection: &StockProjection, request: &NewMovement) {
        for key in StockProjection::touched_keys(request) {
            self.rows.entry(key).or_insert_with_key(|k| projection.quantity(k));
        }
    }

    fn rollback(self, stock: &mut Stock) {
        stock.movements.truncate(self.movements_len);
        stock.next_movement_id = self.next_movement_id;
        for (key, quantity) in self.rows {
            stock.projection.set(key, quantity);
        }
    }
}

/// In-memory warehouse store.
///
/// Intended for tests/dev. Locations, stock and snapshots sit behind
/// separate locks, always taken in that order. A failed append batch is
/// undone from the pre-images it recorded, so a write costs what it touches.
#[derive(Debug)]
pub struct InMemoryWarehouseStore {
    sites: RwLock<Sites>,
    stock: RwLock<Stock>,
    snapshots: RwLock<BTreeMap<NaiveDate, Vec<SnapshotRow>>>,
    next_container_id: AtomicI64,
    fail_append_at: AtomicUsize,
}

impl Default for InMemoryWarehouseStore {
    fn default() -> Self {
        Self {
            sites: RwLock::new(Sites::default()),
            stock: RwLock::new(Stock::default()),
            snapshots: RwLock::new(BTreeMap::new()),
            next_container_id: AtomicI64::new(1),
            fail_append_at: AtomicUsize::new(usize::MAX),
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

impl InMemoryWarehouseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injection: the next append fails right before writing the
    /// movement at `index` within its batch.
    pub fn fail_next_append_at(&self, index: usize) {
        self.fail_append_at.store(index, Ordering::SeqCst);
    }

    /// Overwrite one projection row without touching the ledger.
    ///
    /// Lets tests and repair tooling simulate a drifted projection.
    pub fn force_projection_row(&self, key: ProjectionKey, quantity: i64) -> Result<(), StoreError> {
        let mut stock = self.stock.write().map_err(|_| poisoned())?;
        stock.projection.set(key, quantity);
        Ok(())
    }

    /// Append to the ledger without updating the projection.
    pub fn force_ledger_entry(&self, request: NewMovement) -> Result<Movement, StoreError> {
        let request = request.validated()?;
        let mut stock = self.stock.write().map_err(|_| poisoned())?;
        stock.next_movement_id += 1;
        let movement = request.into_movement(MovementId::new(stock.next_movement_id), EventId::new(), Utc::now());
        stock.movements.push(movement.clone());
        Ok(movement)
    }

    fn read_sites<T>(&self, f: impl FnOnce(&Sites) -> T) -> Result<T, StoreError> {
        let sites = self.sites.read().map_err(|_| poisoned())?;
        Ok(f(&sites))
    }

    fn read_stock<T>(&self, f: impl FnOnce(&Stock) -> T) -> Result<T, StoreError> {
        let stock = self.stock.read().map_err(|_| poisoned())?;
        Ok(f(&stock))
    }

    /// Append a batch; on error every change it made is undone.
    fn append_in(&self, sites: &Sites, stock: &mut Stock, requests: Vec<NewMovement>) -> Result<Vec<Movement>, StoreError> {
        let mut undo = Undo::begin(stock);
        match self.append_steps(sites, stock, &mut undo, requests) {
            Ok(committed) => Ok(committed),
            Err(err) => {
                undo.rollback(stock);
                Err(err)
            }
        }
    }

    fn append_steps(
        &self,
        sites: &Sites,
        stock: &mut Stock,
        undo: &mut Undo,
        requests: Vec<NewMovement>,
    ) -> Result<Vec<Movement>, StoreError> {
        let fail_at = self.fail_append_at.swap(usize::MAX, Ordering::SeqCst);
        let now = Utc::now();

        let mut committed = Vec::with_capacity(requests.len());
        for (index, request) in requests.into_iter().enumerate() {
            let request = request.validated()?;

            for side in [request.from_location_id, request.to_location_id].into_iter().flatten() {
                if !sites.locations.contains_key(&side) {
                    return Err(LedgerError::LocationNotFound(side).into());
                }
            }
            if let Some(to) = request.to_location_id.and_then(|id| sites.locations.get(&id)) {
                if !to.is_active {
                    return Err(LedgerError::LocationInactive(to.code.clone()).into());
                }
            }
            stock.projection.check(&request)?;

            if index == fail_at {
                return Err(StoreError::Backend(format!("injected failure at movement {index}")));
            }

            undo.touch(&stock.projection, &request);
            stock.next_movement_id += 1;
            let movement = request.into_movement(MovementId::new(stock.next_movement_id), EventId::new(), now);
            stock.projection.apply(&movement);
            stock.movements.push(movement.clone());
            committed.push(movement);
        }
        Ok(committed)
    }
}

#[async_trait::async_trait]
impl WarehouseStore for InMemoryWarehouseStore {
    async fn create_location(&self, request: &NewLocation) -> Result<Location, StoreError> {
        let mut sites = self.sites.write().map_err(|_| poisoned())?;
        let parent = request.parent_id.and_then(|id| sites.locations.get(&id));
        let draft = request.plan(parent)?;
        if sites.codes.contains_key(&draft.code) {
            return Err(LocationError::DuplicateCode(draft.code).into());
        }

        sites.next_location_id += 1;
        let location = draft.into_location(LocationId::new(sites.next_location_id), Utc::now());
        sites.codes.insert(location.code.clone(), location.id);
        sites.locations.insert(location.id, location.clone());
        Ok(location)
    }

    async fn update_location(&self, id: LocationId, patch: &LocationPatch) -> Result<Location, StoreError> {
        let mut sites = self.sites.write().map_err(|_| poisoned())?;
        let current = sites.locations.get(&id).ok_or_else(|| LocationError::not_found(id))?;
        let next = patch.merge(current, Utc::now())?;
        sites.locations.insert(id, next.clone());
        Ok(next)
    }

    async fn location(&self, id: LocationId) -> Result<Option<Location>, StoreError> {
        self.read_sites(|sites| sites.locations.get(&id).cloned())
    }

    async fn location_by_code(&self, code: &str) -> Result<Option<Location>, StoreError> {
        self.read_sites(|sites| sites.codes.get(code).and_then(|id| sites.locations.get(id)).cloned())
    }

    async fn locations(&self) -> Result<Vec<Location>, StoreError> {
        self.read_sites(|sites| {
            let mut all: Vec<Location> = sites.locations.values().cloned().collect();
            all.sort_by(|a, b| a.path.cmp(&b.path));
            all
        })
    }

    async fn descendants(&self, target: &Location, recursive: bool) -> Result<Vec<LocationNode>, StoreError> {
        self.read_sites(|sites| {
            let all: Vec<Location> = sites.locations.values().cloned().collect();
            descendants(target, &all, recursive)
        })
    }

    async fn append(&self, requests: Vec<NewMovement>) -> Result<Vec<Movement>, StoreError> {
        for request in &requests {
            request.ensure_loose()?;
        }
        let sites = self.sites.read().map_err(|_| poisoned())?;
        let mut stock = self.stock.write().map_err(|_| poisoned())?;
        self.append_in(&sites, &mut stock, requests)
    }

    async fn movements(&self, filter: &MovementFilter, pagination: Pagination) -> Result<MovementPage, StoreError> {
        self.read_stock(|stock| select(&stock.movements, filter, pagination))
    }

    async fn container_movements(&self, container_code: &QrCode) -> Result<Vec<Movement>, StoreError> {
        self.read_stock(|stock| {
            let mut out: Vec<Movement> = stock
                .movements
                .iter()
                .filter(|m| m.container_code.as_ref() == Some(container_code))
                .cloned()
                .collect();
            out.sort_by(newest_first);
            out
        })
    }

    async fn stock(&self, query: &StockQuery) -> Result<Vec<ProjectionRow>, StoreError> {
        self.read_stock(|stock| stock.projection.select(|k| query.matches(k)))
    }

    async fn recompute(&self, scope: &RecomputeScope) -> Result<RecomputeStats, StoreError> {
        let mut stock = self.stock.write().map_err(|_| poisoned())?;
        let (next, stats) = recompute(&stock.movements, &stock.projection, scope);
        stock.projection = next;
        Ok(stats)
    }

    async fn integrity(&self) -> Result<IntegrityReport, StoreError> {
        let codes: HashMap<LocationId, String> =
            self.read_sites(|sites| sites.locations.values().map(|l| (l.id, l.code.clone())).collect())?;
        self.read_stock(|stock| check_integrity(&stock.movements, &stock.projection, &codes))
    }

    async fn next_container_id(&self) -> Result<ContainerId, StoreError> {
        Ok(ContainerId::new(self.next_container_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn container(&self, id: ContainerId) -> Result<Option<Container>, StoreError> {
        self.read_stock(|stock| stock.containers.get(&id).cloned())
    }

    async fn container_by_qr(&self, qr_code: &QrCode) -> Result<Option<Container>, StoreError> {
        self.read_stock(|stock| stock.qr_index.get(qr_code).and_then(|id| stock.containers.get(id)).cloned())
    }

    async fn containers(&self, filter: &ContainerFilter) -> Result<Vec<Container>, StoreError> {
        self.read_stock(|stock| stock.containers.values().filter(|c| filter.matches(c)).cloned().collect())
    }

    async fn save_container(
        &self,
        container: &Container,
        expected: ExpectedVersion,
        movements: Vec<NewMovement>,
    ) -> Result<ContainerCommit, StoreError> {
        let id = container.id_typed();
        let qr_code = container
            .qr_code()
            .cloned()
            .ok_or_else(|| ContainerError::not_found(id))?;

        let sites = self.sites.read().map_err(|_| poisoned())?;
        let mut stock = self.stock.write().map_err(|_| poisoned())?;

        let actual = stock.containers.get(&id).map(|c| c.version()).unwrap_or(0);
        if !expected.matches(actual) {
            return Err(StoreError::Concurrency(format!(
                "container {id}: expected {expected}, found v{actual}"
            )));
        }
        if let Some(owner) = stock.qr_index.get(&qr_code) {
            if *owner != id {
                return Err(ContainerError::AlreadyExists(qr_code.to_string()).into());
            }
        }

        let touched = touched_keys(&movements);
        let committed = self.append_in(&sites, &mut stock, movements)?;
        let balances = touched
            .into_iter()
            .map(|key| {
                let quantity = stock.projection.quantity(&key);
                (key, quantity)
            })
            .collect();
        stock.qr_index.insert(qr_code, id);
        stock.containers.insert(id, container.clone());
        Ok(ContainerCommit {
            movements: committed,
            balances,
        })
    }

    async fn snapshot(&self, date: NaiveDate) -> Result<SnapshotSummary, StoreError> {
        let rows = self.read_stock(|stock| take_snapshot(&stock.projection, date))?;
        let summary = SnapshotSummary::of(date, &rows);
        let mut snapshots = self.snapshots.write().map_err(|_| poisoned())?;
        snapshots.insert(date, rows);
        Ok(summary)
    }

    async fn snapshot_rows(&self, date: NaiveDate) -> Result<Vec<SnapshotRow>, StoreError> {
        let snapshots = self.snapshots.read().map_err(|_| poisoned())?;
        Ok(snapshots.get(&date).cloned().unwrap_or_default())
    }
}
