//! Postgres-backed warehouse store.
//!
//! Every mutating operation runs in one transaction. Stock rows a movement
//! draws from are locked with `SELECT ... FOR UPDATE` before the check, so
//! concurrent appends against the same key serialize instead of overdrawing.
//! Recompute takes `SHARE` on `movements`, which blocks appends until it
//! commits.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Concurrency` (or a domain conflict where the key is known) |
//! | Database (other) | any | `Backend` |
//! | PoolClosed / other | N/A | `Backend` |

mod rows;
mod schema;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, instrument};

use wms_containers::{Container, ContainerError, ContentLine};
use wms_core::{AggregateRoot, ContainerId, EventId, ExpectedVersion, LocationId, QrCode};
use wms_ledger::{
    IntegrityIssue, IntegrityReport, LedgerError, Movement, MovementFilter, MovementPage, NewMovement, Pagination,
    ProjectionKey, ProjectionRow, RecomputeScope, RecomputeStats, SnapshotRow, SnapshotSummary,
};
use wms_locations::{descendants, Location, LocationError, LocationNode, LocationPatch, NewLocation};

use rows::{none_to_blank, ContainerRow, ContentRow, InventoryRow, KeyedRow, LocationRow, MovementRow, SnapshotDbRow};

use super::{touched_keys, ContainerCommit, ContainerFilter, StockQuery, StoreError, WarehouseStore};
use crate::config::DatabaseConfig;

const LOCATION_COLUMNS: &str = "id, code, name, zone_type, level, path, parent_id, max_weight, max_volume, \
     is_active, is_pickable, metadata, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "id, event_id, movement_type, product_id, from_location_id, to_location_id, \
     quantity, batch_number, container_code, user_name, reason, created_at";

const CONTAINER_COLUMNS: &str = "id, qr_code, container_type, status, location_id, parent_container_id, \
     metadata, version, created_at, updated_at";

const INVENTORY_COLUMNS: &str = "product_id, location_id, batch_number, container_code, quantity, status";

/// Postgres warehouse store over a shared connection pool.
#[derive(Debug, Clone)]
pub struct PostgresWarehouseStore {
    pool: Arc<PgPool>,
}

impl PostgresWarehouseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool sized from `config`.
    #[instrument(skip(config), fields(max_connections = config.max_connections), err)]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables, indexes and views that do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for (name, ddl) in schema::STATEMENTS {
            sqlx::query(ddl)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error(name, e))?;
            debug!(object = name, "schema object ensured");
        }
        Ok(())
    }

    /// Close the pool; waits for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, StoreError> {
        self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn commit(tx: sqlx::Transaction<'_, sqlx::Postgres>) -> Result<(), StoreError> {
    tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))
}

async fn fetch_location(
    conn: &mut PgConnection,
    id: LocationId,
    for_update: bool,
) -> Result<Option<Location>, StoreError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let row = sqlx::query_as::<_, LocationRow>(&format!(
        "SELECT {LOCATION_COLUMNS} FROM locations WHERE id = $1{lock}"
    ))
    .bind(id.get())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_location", e))?;
    row.map(Location::try_from).transpose()
}

/// On-hand quantity for `key`, locking the row for the rest of the transaction.
async fn lock_inventory(conn: &mut PgConnection, key: &ProjectionKey) -> Result<i64, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT quantity FROM inventory
        WHERE product_id = $1 AND location_id = $2 AND batch_number = $3 AND container_code = $4
        FOR UPDATE
        "#,
    )
    .bind(key.product_id.as_str())
    .bind(key.location_id.get())
    .bind(none_to_blank(key.batch_number.as_deref()))
    .bind(none_to_blank(key.container_code.as_ref().map(QrCode::as_str)))
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("lock_inventory", e))?;

    match row {
        Some(row) => row
            .try_get::<i64, _>("quantity")
            .map_err(|e| StoreError::Backend(format!("failed to read quantity: {e}"))),
        None => Ok(0),
    }
}

/// Apply `delta` to `key`. `on_hand` must be the locked quantity when
/// `delta` is negative.
async fn apply_delta(conn: &mut PgConnection, key: &ProjectionKey, delta: i64, on_hand: i64) -> Result<(), StoreError> {
    let product = key.product_id.as_str();
    let batch = none_to_blank(key.batch_number.as_deref());
    let container = none_to_blank(key.container_code.as_ref().map(QrCode::as_str));

    let result = if delta > 0 {
        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, location_id, batch_number, container_code, quantity, status, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'available', NOW())
            ON CONFLICT (product_id, location_id, batch_number, container_code)
            DO UPDATE SET quantity = inventory.quantity + EXCLUDED.quantity, updated_at = NOW()
            "#,
        )
        .bind(product)
        .bind(key.location_id.get())
        .bind(batch)
        .bind(container)
        .bind(delta)
        .execute(&mut *conn)
        .await
    } else if on_hand + delta == 0 {
        sqlx::query(
            r#"
            DELETE FROM inventory
            WHERE product_id = $1 AND location_id = $2 AND batch_number = $3 AND container_code = $4
            "#,
        )
        .bind(product)
        .bind(key.location_id.get())
        .bind(batch)
        .bind(container)
        .execute(&mut *conn)
        .await
    } else {
        sqlx::query(
            r#"
            UPDATE inventory SET quantity = quantity + $5, updated_at = NOW()
            WHERE product_id = $1 AND location_id = $2 AND batch_number = $3 AND container_code = $4
            "#,
        )
        .bind(product)
        .bind(key.location_id.get())
        .bind(batch)
        .bind(container)
        .bind(delta)
        .execute(&mut *conn)
        .await
    };

    result.map_err(|e| map_sqlx_error("apply_delta", e))?;
    Ok(())
}

async fn append_in(conn: &mut PgConnection, requests: Vec<NewMovement>) -> Result<Vec<Movement>, StoreError> {
    let mut committed = Vec::with_capacity(requests.len());
    for request in requests {
        let request = request.validated()?;

        for side in [request.from_location_id, request.to_location_id].into_iter().flatten() {
            let location = fetch_location(conn, side, false)
                .await?
                .ok_or(LedgerError::LocationNotFound(side))?;
            if request.to_location_id == Some(side) && !location.is_active {
                return Err(LedgerError::LocationInactive(location.code).into());
            }
        }

        let contributions = request.contributions();
        let mut on_hand = Vec::with_capacity(contributions.len());
        for (key, delta) in &contributions {
            if *delta >= 0 {
                on_hand.push(0);
                continue;
            }
            let current = lock_inventory(conn, key).await?;
            if current + delta < 0 {
                return Err(LedgerError::InsufficientStock {
                    product_id: key.product_id.to_string(),
                    location_id: key.location_id,
                    on_hand: current,
                    requested: -delta,
                }
                .into());
            }
            on_hand.push(current);
        }

        let row = sqlx::query_as::<_, MovementRow>(&format!(
            r#"
            INSERT INTO movements (
                event_id, movement_type, product_id, from_location_id, to_location_id,
                quantity, batch_number, container_code, user_name, reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {MOVEMENT_COLUMNS}
            "#
        ))
        .bind(*EventId::new().as_uuid())
        .bind(request.movement_type.as_str())
        .bind(request.product_id.as_str())
        .bind(request.from_location_id.map(LocationId::get))
        .bind(request.to_location_id.map(LocationId::get))
        .bind(request.quantity)
        .bind(request.batch_number.as_deref())
        .bind(request.container_code.as_ref().map(QrCode::as_str))
        .bind(request.user.as_deref())
        .bind(request.reason.as_deref())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        let movement = Movement::try_from(row)?;

        for ((key, delta), current) in contributions.iter().zip(on_hand) {
            apply_delta(conn, key, *delta, current).await?;
        }
        committed.push(movement);
    }
    Ok(committed)
}

async fn load_contents(conn: &mut PgConnection, ids: &[i64]) -> Result<HashMap<i64, Vec<ContentLine>>, StoreError> {
    let rows = sqlx::query_as::<_, ContentRow>(
        r#"
        SELECT container_id, product_id, batch_number, quantity, is_scanned
        FROM container_contents
        WHERE container_id = ANY($1)
        ORDER BY container_id, line_no
        "#,
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_contents", e))?;

    let mut out: HashMap<i64, Vec<ContentLine>> = HashMap::new();
    for row in rows {
        let container_id = row.container_id;
        out.entry(container_id).or_default().push(ContentLine::try_from(row)?);
    }
    Ok(out)
}

async fn hydrate(conn: &mut PgConnection, rows: Vec<ContainerRow>) -> Result<Vec<Container>, StoreError> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut contents = load_contents(conn, &ids).await?;
    rows.into_iter()
        .map(|row| {
            let lines = contents.remove(&row.id).unwrap_or_default();
            row.into_container(lines)
        })
        .collect()
}

async fn write_container(conn: &mut PgConnection, container: &Container, qr_code: &QrCode, is_new: bool) -> Result<(), StoreError> {
    let location_id = container
        .location_id()
        .ok_or_else(|| ContainerError::not_found(container.id_typed()))?;
    let created_at = container.created_at().unwrap_or_else(Utc::now);
    let updated_at = container.updated_at().unwrap_or(created_at);
    let version = i64::try_from(container.version())
        .map_err(|e| StoreError::Backend(format!("container version out of range: {e}")))?;

    let result = if is_new {
        sqlx::query(
            r#"
            INSERT INTO containers (
                id, qr_code, container_type, status, location_id, parent_container_id,
                metadata, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(container.id_typed().get())
        .bind(qr_code.as_str())
        .bind(container.container_type().as_str())
        .bind(container.status().as_str())
        .bind(location_id.get())
        .bind(container.parent_container_id().map(ContainerId::get))
        .bind(container.metadata().cloned())
        .bind(version)
        .bind(created_at)
        .bind(updated_at)
        .execute(&mut *conn)
        .await
    } else {
        sqlx::query(
            r#"
            UPDATE containers SET
                status = $2, location_id = $3, parent_container_id = $4,
                metadata = $5, version = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(container.id_typed().get())
        .bind(container.status().as_str())
        .bind(location_id.get())
        .bind(container.parent_container_id().map(ContainerId::get))
        .bind(container.metadata().cloned())
        .bind(version)
        .bind(updated_at)
        .execute(&mut *conn)
        .await
    };

    result.map_err(|e| {
        if is_unique_violation(&e) {
            ContainerError::AlreadyExists(qr_code.to_string()).into()
        } else {
            map_sqlx_error("write_container", e)
        }
    })?;

    sqlx::query("DELETE FROM container_contents WHERE container_id = $1")
        .bind(container.id_typed().get())
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("clear_contents", e))?;

    for (line_no, line) in container.contents().iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO container_contents (container_id, line_no, product_id, batch_number, quantity, is_scanned)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(container.id_typed().get())
        .bind(line_no as i32)
        .bind(line.product_id.as_str())
        .bind(line.batch_number.as_deref())
        .bind(line.quantity)
        .bind(line.is_scanned)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_content", e))?;
    }
    Ok(())
}

/// Predicate selecting the rows of `alias` (with key columns) in a recompute scope.
fn scope_predicate(alias: &str) -> String {
    format!(
        r#"
        ($1::TEXT IS NULL OR {alias}.product_id = $1)
        AND ($2::TIMESTAMPTZ IS NULL OR EXISTS (
            SELECT 1 FROM movement_sides t
            WHERE t.created_at >= $2
              AND t.product_id = {alias}.product_id
              AND t.location_id = {alias}.location_id
              AND t.batch_number = {alias}.batch_number
              AND t.container_code = {alias}.container_code
        ))
        "#
    )
}

#[async_trait::async_trait]
impl WarehouseStore for PostgresWarehouseStore {
    #[instrument(skip(self, request), fields(name = %request.name, parent_id = ?request.parent_id), err)]
    async fn create_location(&self, request: &NewLocation) -> Result<Location, StoreError> {
        let mut tx = self.begin().await?;

        let parent = match request.parent_id {
            Some(id) => fetch_location(&mut tx, id, false).await?,
            None => None,
        };
        let draft = request.plan(parent.as_ref())?;

        let taken = sqlx::query("SELECT 1 FROM locations WHERE code = $1")
            .bind(&draft.code)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_code", e))?;
        if taken.is_some() {
            return Err(LocationError::DuplicateCode(draft.code).into());
        }

        let id: i64 = sqlx::query("SELECT nextval(pg_get_serial_sequence('locations', 'id')) AS id")
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get("id"))
            .map_err(|e| map_sqlx_error("next_location_id", e))?;
        let location = draft.into_location(LocationId::new(id), Utc::now());

        sqlx::query(
            r#"
            INSERT INTO locations (
                id, code, name, zone_type, level, path, parent_id, max_weight, max_volume,
                is_active, is_pickable, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(location.id.get())
        .bind(&location.code)
        .bind(&location.name)
        .bind(location.zone_type.as_str())
        .bind(i16::from(location.level))
        .bind(location.path.to_string())
        .bind(location.parent_id.map(LocationId::get))
        .bind(location.max_weight)
        .bind(location.max_volume)
        .bind(location.is_active)
        .bind(location.is_pickable)
        .bind(location.metadata.clone())
        .bind(location.created_at)
        .bind(location.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LocationError::DuplicateCode(location.code.clone()).into()
            } else {
                map_sqlx_error("insert_location", e)
            }
        })?;

        commit(tx).await?;
        Ok(location)
    }

    #[instrument(skip(self, id, patch), fields(location_id = %id), err)]
    async fn update_location(&self, id: LocationId, patch: &LocationPatch) -> Result<Location, StoreError> {
        let mut tx = self.begin().await?;
        let current = fetch_location(&mut tx, id, true)
            .await?
            .ok_or_else(|| LocationError::not_found(id))?;
        let next = patch.merge(&current, Utc::now())?;

        sqlx::query(
            r#"
            UPDATE locations SET
                name = $2, zone_type = $3, max_weight = $4, max_volume = $5,
                is_active = $6, is_pickable = $7, metadata = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .bind(&next.name)
        .bind(next.zone_type.as_str())
        .bind(next.max_weight)
        .bind(next.max_volume)
        .bind(next.is_active)
        .bind(next.is_pickable)
        .bind(next.metadata.clone())
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_location", e))?;

        commit(tx).await?;
        Ok(next)
    }

    async fn location(&self, id: LocationId) -> Result<Option<Location>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        fetch_location(&mut conn, id, false).await
    }

    async fn location_by_code(&self, code: &str) -> Result<Option<Location>, StoreError> {
        let row = sqlx::query_as::<_, LocationRow>(&format!(
            "SELECT {LOCATION_COLUMNS} FROM locations WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("location_by_code", e))?;
        row.map(Location::try_from).transpose()
    }

    async fn locations(&self) -> Result<Vec<Location>, StoreError> {
        let rows = sqlx::query_as::<_, LocationRow>(&format!("SELECT {LOCATION_COLUMNS} FROM locations"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("locations", e))?;
        let mut all = rows.into_iter().map(Location::try_from).collect::<Result<Vec<_>, _>>()?;
        // Text order of "1.10" vs "1.9" differs from segment order.
        all.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(all)
    }

    #[instrument(skip(self, target), fields(location_id = %target.id), err)]
    async fn descendants(&self, target: &Location, recursive: bool) -> Result<Vec<LocationNode>, StoreError> {
        let recursive_sql = format!("SELECT {LOCATION_COLUMNS} FROM locations WHERE path LIKE $1");
        let children_sql = format!("SELECT {LOCATION_COLUMNS} FROM locations WHERE parent_id = $1");
        let query = if recursive {
            sqlx::query_as::<_, LocationRow>(&recursive_sql).bind(format!("{}.%", target.path))
        } else {
            sqlx::query_as::<_, LocationRow>(&children_sql).bind(target.id.get())
        };
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("descendants", e))?;
        let found = rows.into_iter().map(Location::try_from).collect::<Result<Vec<_>, _>>()?;
        Ok(descendants(target, &found, recursive))
    }

    #[instrument(skip(self, requests), fields(movement_count = requests.len()), err)]
    async fn append(&self, requests: Vec<NewMovement>) -> Result<Vec<Movement>, StoreError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        for request in &requests {
            request.ensure_loose()?;
        }
        let mut tx = self.begin().await?;
        let committed = append_in(&mut tx, requests).await?;
        commit(tx).await?;
        Ok(committed)
    }

    #[instrument(skip(self, filter), fields(limit = pagination.limit, offset = pagination.offset), err)]
    async fn movements(&self, filter: &MovementFilter, pagination: Pagination) -> Result<MovementPage, StoreError> {
        const WHERE: &str = r#"
            WHERE ($1::TEXT IS NULL OR product_id = $1)
              AND ($2::TEXT IS NULL OR container_code = $2)
              AND ($3::TEXT IS NULL OR movement_type = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR created_at >= $4)
              AND ($5::TIMESTAMPTZ IS NULL OR created_at < $5)
        "#;

        let product = filter.product_id.as_ref().map(|p| p.as_str());
        let container = filter.container_code.as_ref().map(QrCode::as_str);
        let movement_type = filter.movement_type.map(|t| t.as_str());
        let from: Option<DateTime<Utc>> = filter.from_instant();
        let to: Option<DateTime<Utc>> = filter.to_instant();

        let total: i64 = sqlx::query(&format!("SELECT COUNT(*) AS total FROM movements {WHERE}"))
            .bind(product)
            .bind(container)
            .bind(movement_type)
            .bind(from)
            .bind(to)
            .fetch_one(&*self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_movements", e))?;

        let rows = sqlx::query_as::<_, MovementRow>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements {WHERE} ORDER BY created_at DESC, id DESC LIMIT $6 OFFSET $7"
        ))
        .bind(product)
        .bind(container)
        .bind(movement_type)
        .bind(from)
        .bind(to)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_movements", e))?;

        let movements = rows.into_iter().map(Movement::try_from).collect::<Result<Vec<_>, _>>()?;
        let total = total.max(0) as u64;
        let has_more = u64::from(pagination.offset) + (movements.len() as u64) < total;
        Ok(MovementPage {
            movements,
            total,
            pagination,
            has_more,
        })
    }

    async fn container_movements(&self, container_code: &QrCode) -> Result<Vec<Movement>, StoreError> {
        let rows = sqlx::query_as::<_, MovementRow>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE container_code = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(container_code.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("container_movements", e))?;
        rows.into_iter().map(Movement::try_from).collect()
    }

    async fn stock(&self, query: &StockQuery) -> Result<Vec<ProjectionRow>, StoreError> {
        let (product, location, container, loose) = match query {
            StockQuery::All => (None, None, None, false),
            StockQuery::Product(p) => (Some(p.as_str()), None, None, false),
            StockQuery::Location(l) => (None, Some(l.get()), None, false),
            StockQuery::Container(c) => (None, None, Some(c.as_str()), false),
            StockQuery::Loose(l) => (None, l.map(LocationId::get), None, true),
        };

        let rows = sqlx::query_as::<_, InventoryRow>(&format!(
            r#"
            SELECT {INVENTORY_COLUMNS} FROM inventory
            WHERE ($1::TEXT IS NULL OR product_id = $1)
              AND ($2::BIGINT IS NULL OR location_id = $2)
              AND ($3::TEXT IS NULL OR container_code = $3)
              AND (NOT $4 OR container_code = '')
            "#
        ))
        .bind(product)
        .bind(location)
        .bind(container)
        .bind(loose)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock", e))?;

        let mut out = rows.into_iter().map(ProjectionRow::try_from).collect::<Result<Vec<_>, _>>()?;
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    #[instrument(skip(self, scope), fields(product_id = ?scope.product_id, from_date = ?scope.from_date), err)]
    async fn recompute(&self, scope: &RecomputeScope) -> Result<RecomputeStats, StoreError> {
        let product = scope.product_id.as_ref().map(|p| p.as_str());
        let from = scope.from_date;

        let mut tx = self.begin().await?;
        sqlx::query("LOCK TABLE movements IN SHARE MODE")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_movements", e))?;

        sqlx::query(&format!("DELETE FROM inventory i WHERE {}", scope_predicate("i")))
            .bind(product)
            .bind(from)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("discard_scope", e))?;

        sqlx::query(&format!(
            r#"
            INSERT INTO inventory (product_id, location_id, batch_number, container_code, quantity, status, updated_at)
            SELECT s.product_id, s.location_id, s.batch_number, s.container_code, SUM(s.delta)::BIGINT, 'available', NOW()
            FROM movement_sides s
            WHERE {}
            GROUP BY s.product_id, s.location_id, s.batch_number, s.container_code
            HAVING SUM(s.delta) > 0
            "#,
            scope_predicate("s")
        ))
        .bind(product)
        .bind(from)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("rebuild_scope", e))?;

        let row = sqlx::query(&format!(
            r#"
            SELECT COUNT(*) AS row_count,
                   COALESCE(SUM(i.quantity), 0)::BIGINT AS total_units,
                   COUNT(DISTINCT i.product_id) AS distinct_products
            FROM inventory i
            WHERE {}
            "#,
            scope_predicate("i")
        ))
        .bind(product)
        .bind(from)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("recompute_stats", e))?;

        let stats = read_stats(&row).map_err(|e| map_sqlx_error("recompute_stats", e))?;
        commit(tx).await?;
        Ok(stats)
    }

    #[instrument(skip(self), err)]
    async fn integrity(&self) -> Result<IntegrityReport, StoreError> {
        let rows = sqlx::query(
            r#"
            WITH ledger AS (
                SELECT product_id, location_id, batch_number, container_code, SUM(delta)::BIGINT AS total
                FROM movement_sides
                GROUP BY product_id, location_id, batch_number, container_code
                HAVING SUM(delta) > 0
            )
            SELECT COALESCE(l.product_id, i.product_id) AS product_id,
                   COALESCE(l.location_id, i.location_id) AS location_id,
                   COALESCE(l.batch_number, i.batch_number) AS batch_number,
                   COALESCE(l.container_code, i.container_code) AS container_code,
                   COALESCE(l.total, 0)::BIGINT AS from_ledger,
                   COALESCE(i.quantity, 0)::BIGINT AS from_projection,
                   loc.code AS location_code
            FROM ledger l
            FULL OUTER JOIN inventory i
              ON i.product_id = l.product_id
             AND i.location_id = l.location_id
             AND i.batch_number = l.batch_number
             AND i.container_code = l.container_code
            LEFT JOIN locations loc ON loc.id = COALESCE(l.location_id, i.location_id)
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("integrity", e))?;

        let checked_keys = rows.len();
        let mut issues = Vec::new();
        for row in rows {
            let read = |e: sqlx::Error| map_sqlx_error("integrity", e);
            let from_ledger: i64 = row.try_get("from_ledger").map_err(read)?;
            let from_projection: i64 = row.try_get("from_projection").map_err(read)?;
            if from_ledger == from_projection {
                continue;
            }
            let location_code: Option<String> = row.try_get("location_code").map_err(read)?;
            issues.push(IntegrityIssue {
                key: KeyedRow::read(&row).map_err(read)?.into_key()?,
                location_code,
                from_ledger,
                from_projection,
                difference: from_ledger - from_projection,
            });
        }
        issues.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(IntegrityReport { issues, checked_keys })
    }

    async fn next_container_id(&self) -> Result<ContainerId, StoreError> {
        let id: i64 = sqlx::query("SELECT nextval('containers_id_seq') AS id")
            .fetch_one(&*self.pool)
            .await
            .and_then(|row| row.try_get("id"))
            .map_err(|e| map_sqlx_error("next_container_id", e))?;
        Ok(ContainerId::new(id))
    }

    async fn container(&self, id: ContainerId) -> Result<Option<Container>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        let rows = sqlx::query_as::<_, ContainerRow>(&format!(
            "SELECT {CONTAINER_COLUMNS} FROM containers WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("container", e))?;
        Ok(hydrate(&mut conn, rows).await?.into_iter().next())
    }

    async fn container_by_qr(&self, qr_code: &QrCode) -> Result<Option<Container>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        let rows = sqlx::query_as::<_, ContainerRow>(&format!(
            "SELECT {CONTAINER_COLUMNS} FROM containers WHERE qr_code = $1"
        ))
        .bind(qr_code.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("container_by_qr", e))?;
        Ok(hydrate(&mut conn, rows).await?.into_iter().next())
    }

    async fn containers(&self, filter: &ContainerFilter) -> Result<Vec<Container>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        let rows = sqlx::query_as::<_, ContainerRow>(&format!(
            r#"
            SELECT {CONTAINER_COLUMNS} FROM containers
            WHERE ($1::BIGINT IS NULL OR location_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::TEXT IS NULL OR container_type = $3)
            ORDER BY id
            "#
        ))
        .bind(filter.location_id.map(LocationId::get))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.container_type.map(|t| t.as_str()))
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("containers", e))?;
        hydrate(&mut conn, rows).await
    }

    #[instrument(
        skip(self, container, movements),
        fields(container_id = %container.id_typed(), expected = ?expected, movement_count = movements.len()),
        err
    )]
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

        let mut tx = self.begin().await?;

        let current: Option<i64> = sqlx::query("SELECT version FROM containers WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_container", e))?
            .map(|row| row.try_get("version"))
            .transpose()
            .map_err(|e| map_sqlx_error("lock_container", e))?;
        let actual = current.map(|v| v.max(0) as u64).unwrap_or(0);
        if !expected.matches(actual) {
            return Err(StoreError::Concurrency(format!(
                "container {id}: expected {expected}, found v{actual}"
            )));
        }

        let owner: Option<i64> = sqlx::query("SELECT id FROM containers WHERE qr_code = $1")
            .bind(qr_code.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_qr_code", e))?
            .map(|row| row.try_get("id"))
            .transpose()
            .map_err(|e| map_sqlx_error("check_qr_code", e))?;
        if owner.is_some_and(|owner| owner != id.get()) {
            return Err(ContainerError::AlreadyExists(qr_code.to_string()).into());
        }

        write_container(&mut tx, container, &qr_code, current.is_none()).await?;
        let touched = touched_keys(&movements);
        let committed = append_in(&mut tx, movements).await?;
        let mut balances = BTreeMap::new();
        for key in touched {
            let quantity = lock_inventory(&mut tx, &key).await?;
            balances.insert(key, quantity);
        }

        commit(tx).await?;
        Ok(ContainerCommit {
            movements: committed,
            balances,
        })
    }

    #[instrument(skip(self, date), fields(date = %date), err)]
    async fn snapshot(&self, date: NaiveDate) -> Result<SnapshotSummary, StoreError> {
        let mut tx = self.begin().await?;

        sqlx::query("DELETE FROM inventory_snapshots WHERE snapshot_date = $1")
            .bind(date)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_snapshot", e))?;

        sqlx::query(
            r#"
            INSERT INTO inventory_snapshots (snapshot_date, product_id, location_id, batch_number, container_code, quantity, status)
            SELECT $1, product_id, location_id, batch_number, container_code, quantity, status
            FROM inventory
            WHERE status = 'available'
            "#,
        )
        .bind(date)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("take_snapshot", e))?;

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS row_count,
                   COALESCE(SUM(quantity), 0)::BIGINT AS total_units,
                   COUNT(DISTINCT product_id) AS distinct_products
            FROM inventory_snapshots
            WHERE snapshot_date = $1
            "#,
        )
        .bind(date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("snapshot_summary", e))?;
        let stats = read_stats(&row).map_err(|e| map_sqlx_error("snapshot_summary", e))?;

        commit(tx).await?;
        Ok(SnapshotSummary {
            date,
            records_count: stats.row_count,
            total_units: stats.total_units,
            products_count: stats.distinct_products,
        })
    }

    async fn snapshot_rows(&self, date: NaiveDate) -> Result<Vec<SnapshotRow>, StoreError> {
        let rows = sqlx::query_as::<_, SnapshotDbRow>(&format!(
            "SELECT snapshot_date, {INVENTORY_COLUMNS} FROM inventory_snapshots WHERE snapshot_date = $1 \
             ORDER BY product_id, location_id, batch_number, container_code"
        ))
        .bind(date)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("snapshot_rows", e))?;
        rows.into_iter().map(SnapshotRow::try_from).collect()
    }
}

fn read_stats(row: &sqlx::postgres::PgRow) -> Result<RecomputeStats, sqlx::Error> {
    let row_count: i64 = row.try_get("row_count")?;
    let total_units: i64 = row.try_get("total_units")?;
    let distinct_products: i64 = row.try_get("distinct_products")?;
    Ok(RecomputeStats {
        row_count: row_count.max(0) as usize,
        total_units,
        distinct_products: distinct_products.max(0) as usize,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Concurrency(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
