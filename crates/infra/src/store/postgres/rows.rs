//! SQLx row types and their conversion into domain values.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;

use wms_containers::{Container, ContainerStatus, ContainerType, ContentLine};
use wms_core::{ContainerId, EventId, LocationId, MovementId, ProductId, QrCode};
use wms_ledger::{Movement, MovementType, ProjectionKey, ProjectionRow, SnapshotRow, StockStatus};
use wms_locations::{Location, LocationPath, ZoneType};

use crate::store::StoreError;

fn corrupt(what: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Backend(format!("failed to decode {what}: {err}"))
}

/// Key columns store "no batch" and "no container" as `''`.
pub(super) fn blank_to_none(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

pub(super) fn none_to_blank(value: Option<&str>) -> &str {
    value.unwrap_or("")
}

fn container_code(value: String) -> Result<Option<QrCode>, StoreError> {
    blank_to_none(value)
        .map(QrCode::new)
        .transpose()
        .map_err(|e| corrupt("container_code", e))
}

fn product(value: String) -> Result<ProductId, StoreError> {
    ProductId::new(value).map_err(|e| corrupt("product_id", e))
}

#[derive(Debug)]
pub(super) struct LocationRow {
    id: i64,
    code: String,
    name: String,
    zone_type: String,
    level: i16,
    path: String,
    parent_id: Option<i64>,
    max_weight: Option<f64>,
    max_volume: Option<f64>,
    is_active: bool,
    is_pickable: bool,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for LocationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LocationRow {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            zone_type: row.try_get("zone_type")?,
            level: row.try_get("level")?,
            path: row.try_get("path")?,
            parent_id: row.try_get("parent_id")?,
            max_weight: row.try_get("max_weight")?,
            max_volume: row.try_get("max_volume")?,
            is_active: row.try_get("is_active")?,
            is_pickable: row.try_get("is_pickable")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<LocationRow> for Location {
    type Error = StoreError;

    fn try_from(row: LocationRow) -> Result<Self, Self::Error> {
        Ok(Location {
            id: LocationId::new(row.id),
            code: row.code,
            name: row.name,
            zone_type: row.zone_type.parse::<ZoneType>().map_err(|e| corrupt("zone_type", e))?,
            level: u8::try_from(row.level).map_err(|e| corrupt("level", e))?,
            path: row.path.parse::<LocationPath>().map_err(|e| corrupt("path", e))?,
            parent_id: row.parent_id.map(LocationId::new),
            max_weight: row.max_weight,
            max_volume: row.max_volume,
            is_active: row.is_active,
            is_pickable: row.is_pickable,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
pub(super) struct MovementRow {
    id: i64,
    event_id: uuid::Uuid,
    movement_type: String,
    product_id: String,
    from_location_id: Option<i64>,
    to_location_id: Option<i64>,
    quantity: i64,
    batch_number: Option<String>,
    container_code: Option<String>,
    user_name: Option<String>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            event_id: row.try_get("event_id")?,
            movement_type: row.try_get("movement_type")?,
            product_id: row.try_get("product_id")?,
            from_location_id: row.try_get("from_location_id")?,
            to_location_id: row.try_get("to_location_id")?,
            quantity: row.try_get("quantity")?,
            batch_number: row.try_get("batch_number")?,
            container_code: row.try_get("container_code")?,
            user_name: row.try_get("user_name")?,
            reason: row.try_get("reason")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<MovementRow> for Movement {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(Movement {
            id: MovementId::new(row.id),
            event_id: EventId::from_uuid(row.event_id),
            movement_type: row
                .movement_type
                .parse::<MovementType>()
                .map_err(|e| corrupt("movement_type", e))?,
            product_id: product(row.product_id)?,
            from_location_id: row.from_location_id.map(LocationId::new),
            to_location_id: row.to_location_id.map(LocationId::new),
            quantity: row.quantity,
            batch_number: row.batch_number,
            container_code: container_code(row.container_code.unwrap_or_default())?,
            user: row.user_name,
            reason: row.reason,
            created_at: row.created_at,
        })
    }
}

/// A row of `inventory`, `inventory_snapshots` or a ledger aggregate.
#[derive(Debug)]
pub(super) struct KeyedRow {
    product_id: String,
    location_id: i64,
    batch_number: String,
    container_code: String,
}

impl KeyedRow {
    pub(super) fn read(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(KeyedRow {
            product_id: row.try_get("product_id")?,
            location_id: row.try_get("location_id")?,
            batch_number: row.try_get("batch_number")?,
            container_code: row.try_get("container_code")?,
        })
    }

    pub(super) fn into_key(self) -> Result<ProjectionKey, StoreError> {
        Ok(ProjectionKey {
            product_id: product(self.product_id)?,
            location_id: LocationId::new(self.location_id),
            batch_number: blank_to_none(self.batch_number),
            container_code: container_code(self.container_code)?,
        })
    }
}

#[derive(Debug)]
pub(super) struct InventoryRow {
    key: KeyedRow,
    quantity: i64,
    status: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for InventoryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InventoryRow {
            key: KeyedRow::read(row)?,
            quantity: row.try_get("quantity")?,
            status: row.try_get("status")?,
        })
    }
}

impl TryFrom<InventoryRow> for ProjectionRow {
    type Error = StoreError;

    fn try_from(row: InventoryRow) -> Result<Self, Self::Error> {
        Ok(ProjectionRow {
            key: row.key.into_key()?,
            quantity: row.quantity,
            status: row.status.parse::<StockStatus>().map_err(|e| corrupt("status", e))?,
        })
    }
}

#[derive(Debug)]
pub(super) struct SnapshotDbRow {
    snapshot_date: NaiveDate,
    row: InventoryRow,
}

impl<'r> sqlx::FromRow<'r, PgRow> for SnapshotDbRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SnapshotDbRow {
            snapshot_date: row.try_get("snapshot_date")?,
            row: InventoryRow::from_row(row)?,
        })
    }
}

impl TryFrom<SnapshotDbRow> for SnapshotRow {
    type Error = StoreError;

    fn try_from(value: SnapshotDbRow) -> Result<Self, Self::Error> {
        let row = ProjectionRow::try_from(value.row)?;
        Ok(SnapshotRow {
            snapshot_date: value.snapshot_date,
            product_id: row.key.product_id,
            location_id: row.key.location_id,
            batch_number: row.key.batch_number,
            container_code: row.key.container_code,
            quantity: row.quantity,
            status: row.status,
        })
    }
}

#[derive(Debug)]
pub(super) struct ContainerRow {
    pub(super) id: i64,
    qr_code: String,
    container_type: String,
    status: String,
    location_id: i64,
    parent_container_id: Option<i64>,
    metadata: Option<serde_json::Value>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ContainerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ContainerRow {
            id: row.try_get("id")?,
            qr_code: row.try_get("qr_code")?,
            container_type: row.try_get("container_type")?,
            status: row.try_get("status")?,
            location_id: row.try_get("location_id")?,
            parent_container_id: row.try_get("parent_container_id")?,
            metadata: row.try_get("metadata")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl ContainerRow {
    pub(super) fn into_container(self, contents: Vec<ContentLine>) -> Result<Container, StoreError> {
        Ok(Container::restore(
            ContainerId::new(self.id),
            QrCode::new(self.qr_code).map_err(|e| corrupt("qr_code", e))?,
            self.container_type
                .parse::<ContainerType>()
                .map_err(|e| corrupt("container_type", e))?,
            self.status.parse::<ContainerStatus>().map_err(|e| corrupt("status", e))?,
            LocationId::new(self.location_id),
            self.parent_container_id.map(ContainerId::new),
            contents,
            self.metadata,
            u64::try_from(self.version).map_err(|e| corrupt("version", e))?,
            self.created_at,
            self.updated_at,
        ))
    }
}

#[derive(Debug)]
pub(super) struct ContentRow {
    pub(super) container_id: i64,
    product_id: String,
    batch_number: Option<String>,
    quantity: i64,
    is_scanned: bool,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ContentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ContentRow {
            container_id: row.try_get("container_id")?,
            product_id: row.try_get("product_id")?,
            batch_number: row.try_get("batch_number")?,
            quantity: row.try_get("quantity")?,
            is_scanned: row.try_get("is_scanned")?,
        })
    }
}

impl TryFrom<ContentRow> for ContentLine {
    type Error = StoreError;

    fn try_from(row: ContentRow) -> Result<Self, Self::Error> {
        Ok(ContentLine {
            product_id: product(row.product_id)?,
            quantity: row.quantity,
            batch_number: row.batch_number,
            is_scanned: row.is_scanned,
        })
    }
}
