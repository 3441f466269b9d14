//! Read-optimized aggregates over the projection: product totals and
//! dated snapshots.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use wms_core::{LocationId, ProductId, QrCode};

use crate::projection::{StockProjection, StockStatus};

/// Per-product totals derived from the projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTotals {
    pub product_id: ProductId,
    pub total_quantity: i64,
    pub locations_count: usize,
    pub in_containers: i64,
    pub loose: i64,
}

/// Totals for every product with stock, ordered by product id.
pub fn product_totals(projection: &StockProjection) -> Vec<ProductTotals> {
    let mut acc: BTreeMap<&ProductId, (i64, BTreeSet<LocationId>, i64, i64)> = BTreeMap::new();
    for (key, quantity) in projection.iter() {
        let entry = acc.entry(&key.product_id).or_default();
        entry.0 += quantity;
        entry.1.insert(key.location_id);
        if key.in_container() {
            entry.2 += quantity;
        } else {
            entry.3 += quantity;
        }
    }

    acc.into_iter()
        .map(|(product_id, (total, locations, in_containers, loose))| ProductTotals {
            product_id: product_id.clone(),
            total_quantity: total,
            locations_count: locations.len(),
            in_containers,
            loose,
        })
        .collect()
}

/// One row of a dated stock snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub snapshot_date: NaiveDate,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub batch_number: Option<String>,
    pub container_code: Option<QrCode>,
    pub quantity: i64,
    pub status: StockStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub date: NaiveDate,
    pub records_count: usize,
    pub total_units: i64,
    pub products_count: usize,
}

/// Copy every available row of the projection, tagged with `date`.
pub fn take_snapshot(projection: &StockProjection, date: NaiveDate) -> Vec<SnapshotRow> {
    projection
        .rows()
        .into_iter()
        .filter(|row| row.status == StockStatus::Available)
        .map(|row| SnapshotRow {
            snapshot_date: date,
            product_id: row.key.product_id,
            location_id: row.key.location_id,
            batch_number: row.key.batch_number,
            container_code: row.key.container_code,
            quantity: row.quantity,
            status: row.status,
        })
        .collect()
}

impl SnapshotSummary {
    pub fn of(date: NaiveDate, rows: &[SnapshotRow]) -> Self {
        let products: HashSet<&ProductId> = rows.iter().map(|r| &r.product_id).collect();
        Self {
            date,
            records_count: rows.len(),
            total_units: rows.iter().map(|r| r.quantity).sum(),
            products_count: products.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionKey;

    fn sku(s: &str) -> ProductId {
        ProductId::new(s).unwrap()
    }

    fn sample() -> StockProjection {
        let qr = QrCode::new("QR-100").unwrap();
        let mut projection = StockProjection::new();
        projection.set(ProjectionKey::loose(sku("SKU1"), LocationId::new(1), None), 20);
        projection.set(
            ProjectionKey {
                container_code: Some(qr),
                ..ProjectionKey::loose(sku("SKU1"), LocationId::new(1), Some("B1".into()))
            },
            30,
        );
        projection.set(ProjectionKey::loose(sku("SKU2"), LocationId::new(2), None), 5);
        projection
    }

    #[test]
    fn totals_split_loose_and_containerized() {
        let totals = product_totals(&sample());
        assert_eq!(totals.len(), 2);
        assert_eq!(
            totals[0],
            ProductTotals {
                product_id: sku("SKU1"),
                total_quantity: 50,
                locations_count: 1,
                in_containers: 30,
                loose: 20,
            }
        );
        assert_eq!(totals[1].total_quantity, 5);
    }

    #[test]
    fn snapshot_copies_rows_and_summarizes() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let rows = take_snapshot(&sample(), date);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.snapshot_date == date));
        let summary = SnapshotSummary::of(date, &rows);
        assert_eq!(summary.records_count, 3);
        assert_eq!(summary.total_units, 55);
        assert_eq!(summary.products_count, 2);
    }
}
