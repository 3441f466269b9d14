//! Maintenance operations: recompute, integrity audit, snapshots and the
//! per-product aggregate.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use wms_core::ProductId;
use wms_ledger::{
    product_totals, IntegrityReport, RecomputeScope, RecomputeStats, SnapshotRow, SnapshotSummary, StockProjection,
};

use crate::error::WmsError;
use crate::service::Warehouse;
use crate::store::{StockQuery, WarehouseStore};

/// One row of the read-optimized product aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub product_id: ProductId,
    pub product_name: Option<String>,
    pub category: Option<String>,
    pub total_quantity: i64,
    pub locations_count: usize,
    pub in_containers: i64,
    pub loose: i64,
}

/// Published state of the product aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAggregate {
    pub rows: Vec<ProductSummary>,
    /// `None` until the first refresh.
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl ProductAggregate {
    pub fn product(&self, product_id: &ProductId) -> Option<&ProductSummary> {
        self.rows.iter().find(|r| &r.product_id == product_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRefresh {
    pub records_count: usize,
    pub total_units: i64,
    pub refreshed_at: DateTime<Utc>,
}

/// Readers clone the `Arc`; a refresh builds a new value off-lock and swaps it in.
#[derive(Debug, Default)]
pub(crate) struct AggregateCache {
    current: RwLock<Arc<ProductAggregate>>,
}

impl AggregateCache {
    fn load(&self) -> Result<Arc<ProductAggregate>, WmsError> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| WmsError::Storage("aggregate lock poisoned".to_string()))
    }

    fn publish(&self, next: ProductAggregate) -> Result<(), WmsError> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| WmsError::Storage("aggregate lock poisoned".to_string()))?;
        *guard = Arc::new(next);
        Ok(())
    }
}

impl<S> Warehouse<S>
where
    S: WarehouseStore,
{
    /// Rebuild projection rows in scope from the full ledger history.
    #[instrument(skip(self), err)]
    pub async fn recalculate_inventory(&self, scope: RecomputeScope) -> Result<RecomputeStats, WmsError> {
        let stats = self.store.recompute(&scope).await?;
        info!(
            row_count = stats.row_count,
            total_units = stats.total_units,
            distinct_products = stats.distinct_products,
            "inventory recalculated"
        );
        Ok(stats)
    }

    /// Audit the projection against the ledger. Never mutates.
    #[instrument(skip(self), err)]
    pub async fn validate_integrity(&self) -> Result<IntegrityReport, WmsError> {
        let report = self.store.integrity().await?;
        if report.is_consistent() {
            info!(checked_keys = report.checked_keys, "projection consistent with ledger");
        } else {
            for issue in &report.issues {
                warn!(
                    product_id = %issue.key.product_id,
                    location_id = %issue.key.location_id,
                    location_code = issue.location_code.as_deref().unwrap_or("?"),
                    from_ledger = issue.from_ledger,
                    from_projection = issue.from_projection,
                    difference = issue.difference,
                    "projection diverges from ledger"
                );
            }
        }
        Ok(report)
    }

    /// Snapshot available stock for `date` (default: today, UTC), replacing
    /// any earlier snapshot of the same date.
    #[instrument(skip(self), err)]
    pub async fn create_snapshot(&self, date: Option<NaiveDate>) -> Result<SnapshotSummary, WmsError> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let summary = self.store.snapshot(date).await?;
        info!(
            date = %summary.date,
            records_count = summary.records_count,
            total_units = summary.total_units,
            "snapshot created"
        );
        Ok(summary)
    }

    pub async fn snapshot_rows(&self, date: NaiveDate) -> Result<Vec<SnapshotRow>, WmsError> {
        Ok(self.store.snapshot_rows(date).await?)
    }

    /// Recompute per-product totals and publish them.
    #[instrument(skip(self), err)]
    pub async fn refresh_aggregate(&self) -> Result<AggregateRefresh, WmsError> {
        let projection = StockProjection::from_rows(self.store.stock(&StockQuery::All).await?);
        let rows: Vec<ProductSummary> = product_totals(&projection)
            .into_iter()
            .map(|t| ProductSummary {
                product_name: self.catalog.product_name(&t.product_id),
                category: self.catalog.product_category(&t.product_id),
                product_id: t.product_id,
                total_quantity: t.total_quantity,
                locations_count: t.locations_count,
                in_containers: t.in_containers,
                loose: t.loose,
            })
            .collect();

        let refreshed_at = Utc::now();
        let refresh = AggregateRefresh {
            records_count: rows.len(),
            total_units: rows.iter().map(|r| r.total_quantity).sum(),
            refreshed_at,
        };
        self.aggregate.publish(ProductAggregate {
            rows,
            refreshed_at: Some(refreshed_at),
        })?;

        info!(records_count = refresh.records_count, total_units = refresh.total_units, "aggregate refreshed");
        Ok(refresh)
    }

    /// The last published aggregate; empty until the first refresh.
    pub fn product_summary(&self) -> Result<Arc<ProductAggregate>, WmsError> {
        self.aggregate.load()
    }
}
