//! Derived stock: per-key quantities folded from the ledger.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use wms_core::{LocationId, ProductId, QrCode};
use wms_events::Projection;

use crate::error::LedgerError;
use crate::movement::{Movement, NewMovement};

/// Identity of a projection row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectionKey {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub batch_number: Option<String>,
    pub container_code: Option<QrCode>,
}

impl ProjectionKey {
    pub fn loose(product_id: ProductId, location_id: LocationId, batch_number: Option<String>) -> Self {
        Self {
            product_id,
            location_id,
            batch_number,
            container_code: None,
        }
    }

    pub fn in_container(&self) -> bool {
        self.container_code.is_some()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Available,
    Reserved,
    Quarantine,
    Damaged,
}

impl StockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StockStatus::Available => "available",
            StockStatus::Reserved => "reserved",
            StockStatus::Quarantine => "quarantine",
            StockStatus::Damaged => "damaged",
        }
    }
}

impl core::str::FromStr for StockStatus {
    type Err = wms_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(StockStatus::Available),
            "reserved" => Ok(StockStatus::Reserved),
            "quarantine" => Ok(StockStatus::Quarantine),
            "damaged" => Ok(StockStatus::Damaged),
            other => Err(wms_core::DomainError::validation(format!(
                "unknown stock status '{other}'"
            ))),
        }
    }
}

/// One materialized stock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionRow {
    #[serde(flatten)]
    pub key: ProjectionKey,
    pub quantity: i64,
    pub status: StockStatus,
}

/// Stock on hand per key. Only strictly positive quantities are kept.
///
/// Folding movements in ledger order gives the same rows as summing each key
/// over the whole ledger, because appends never take a key below zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockProjection {
    rows: BTreeMap<ProjectionKey, i64>,
}

impl StockProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored rows. Non-positive rows are dropped.
    pub fn from_rows(rows: impl IntoIterator<Item = ProjectionRow>) -> Self {
        let mut projection = Self::new();
        for row in rows {
            projection.set(row.key, row.quantity);
        }
        projection
    }

    pub fn quantity(&self, key: &ProjectionKey) -> i64 {
        self.rows.get(key).copied().unwrap_or(0)
    }

    /// Overwrite a key. Zero or negative removes the row.
    pub fn set(&mut self, key: ProjectionKey, quantity: i64) {
        if quantity > 0 {
            self.rows.insert(key, quantity);
        } else {
            self.rows.remove(&key);
        }
    }

    fn add(&mut self, key: ProjectionKey, delta: i64) {
        let next = self.quantity(&key) + delta;
        self.set(key, next);
    }

    /// Reject a movement whose `from` side would drive a row below zero.
    pub fn check(&self, movement: &NewMovement) -> Result<(), LedgerError> {
        for (key, delta) in movement.contributions() {
            let on_hand = self.quantity(&key);
            if delta < 0 && on_hand + delta < 0 {
                return Err(LedgerError::InsufficientStock {
                    product_id: key.product_id.to_string(),
                    location_id: key.location_id,
                    on_hand,
                    requested: -delta,
                });
            }
        }
        Ok(())
    }

    /// Keys whose rows a movement changes.
    pub fn touched_keys(movement: &NewMovement) -> BTreeSet<ProjectionKey> {
        movement.contributions().into_iter().map(|(k, _)| k).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ProjectionKey> {
        self.rows.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProjectionKey, i64)> {
        self.rows.iter().map(|(k, q)| (k, *q))
    }

    pub fn rows(&self) -> Vec<ProjectionRow> {
        self.select(|_| true)
    }

    /// Rows matching `pred`, in key order.
    pub fn select(&self, pred: impl Fn(&ProjectionKey) -> bool) -> Vec<ProjectionRow> {
        self.rows
            .iter()
            .filter(|(k, _)| pred(k))
            .map(|(k, q)| ProjectionRow {
                key: k.clone(),
                quantity: *q,
                status: StockStatus::Available,
            })
            .collect()
    }

    pub fn by_product(&self, product_id: &ProductId) -> Vec<ProjectionRow> {
        self.select(|k| &k.product_id == product_id)
    }

    pub fn at_location(&self, location_id: LocationId) -> Vec<ProjectionRow> {
        self.select(|k| k.location_id == location_id)
    }

    pub fn in_container(&self, container_code: &QrCode) -> Vec<ProjectionRow> {
        self.select(|k| k.container_code.as_ref() == Some(container_code))
    }

    /// Loose (not containerized) stock, optionally narrowed to one location.
    pub fn loose(&self, location_id: Option<LocationId>) -> Vec<ProjectionRow> {
        self.select(|k| !k.in_container() && location_id.is_none_or(|l| k.location_id == l))
    }

    pub fn total_units(&self) -> i64 {
        self.rows.values().sum()
    }

    /// Remove every row matching `pred`; returns how many were removed.
    pub fn discard(&mut self, pred: impl Fn(&ProjectionKey) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(|k, _| !pred(k));
        before - self.rows.len()
    }
}

impl Projection for StockProjection {
    type Ev = Movement;

    fn apply(&mut self, event: &Self::Ev) {
        for (key, delta) in event.contributions() {
            self.add(key, delta);
        }
    }
}

/// Signed sum per key over `movements`, without dropping non-positive keys.
pub fn ledger_sums<'a>(movements: impl IntoIterator<Item = &'a Movement>) -> BTreeMap<ProjectionKey, i64> {
    let mut sums = BTreeMap::new();
    for movement in movements {
        for (key, delta) in movement.contributions() {
            *sums.entry(key).or_insert(0) += delta;
        }
    }
    sums
}
