//! Auditing the stored projection against the ledger.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use wms_core::LocationId;

use crate::error::LedgerError;
use crate::movement::Movement;
use crate::projection::{ledger_sums, ProjectionKey, StockProjection};

/// One key where the projection disagrees with the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub key: ProjectionKey,
    pub location_code: Option<String>,
    pub from_ledger: i64,
    pub from_projection: i64,
    /// `from_ledger - from_projection`.
    pub difference: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
    pub checked_keys: usize,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn ensure_consistent(&self) -> Result<(), LedgerError> {
        if self.is_consistent() {
            Ok(())
        } else {
            Err(LedgerError::IntegrityViolation(self.issues.len()))
        }
    }
}

/// Compare every ledger key and every stored key. Ledger keys summing to
/// zero or less count as absent, like in the projection.
pub fn check_integrity(
    movements: &[Movement],
    projection: &StockProjection,
    location_codes: &HashMap<LocationId, String>,
) -> IntegrityReport {
    let expected: BTreeMap<ProjectionKey, i64> = ledger_sums(movements)
        .into_iter()
        .filter(|(_, sum)| *sum > 0)
        .collect();

    let keys: BTreeSet<&ProjectionKey> = expected.keys().chain(projection.keys()).collect();

    let issues = keys
        .iter()
        .filter_map(|key| {
            let from_ledger = expected.get(*key).copied().unwrap_or(0);
            let from_projection = projection.quantity(key);
            (from_ledger != from_projection).then(|| IntegrityIssue {
                key: (*key).clone(),
                location_code: location_codes.get(&key.location_id).cloned(),
                from_ledger,
                from_projection,
                difference: from_ledger - from_projection,
            })
        })
        .collect();

    IntegrityReport {
        issues,
        checked_keys: keys.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::NewMovement;
    use crate::recompute::{recompute, RecomputeScope};
    use chrono::Utc;
    use wms_core::{EventId, MovementId, ProductId};
    use wms_events::Projection;

    fn sku() -> ProductId {
        ProductId::new("SKU1").unwrap()
    }

    fn codes() -> HashMap<LocationId, String> {
        HashMap::from([(LocationId::new(1), "WH-A-01".to_string())])
    }

    #[test]
    fn consistent_projection_reports_nothing() {
        let loc = LocationId::new(1);
        let movements = vec![NewMovement::receive(sku(), loc, 10).into_movement(
            MovementId::new(1),
            EventId::new(),
            Utc::now(),
        )];
        let mut projection = StockProjection::new();
        projection.apply_all(&movements);

        let report = check_integrity(&movements, &projection, &codes());
        assert!(report.is_consistent());
        assert_eq!(report.checked_keys, 1);
        assert!(report.ensure_consistent().is_ok());
    }

    #[test]
    fn ledger_append_without_projection_update_is_reported_once() {
        let loc = LocationId::new(1);
        let mut movements = vec![NewMovement::receive(sku(), loc, 10).into_movement(
            MovementId::new(1),
            EventId::new(),
            Utc::now(),
        )];
        let mut projection = StockProjection::new();
        projection.apply_all(&movements);

        movements.push(NewMovement::receive(sku(), loc, 5).into_movement(
            MovementId::new(2),
            EventId::new(),
            Utc::now(),
        ));

        let report = check_integrity(&movements, &projection, &codes());
        assert_eq!(report.issues.len(), 1);
        let issue = &report.issues[0];
        assert_eq!(issue.from_ledger, 15);
        assert_eq!(issue.from_projection, 10);
        assert_eq!(issue.difference, 5);
        assert_eq!(issue.location_code.as_deref(), Some("WH-A-01"));
        assert_eq!(
            report.ensure_consistent().unwrap_err().kind(),
            wms_core::ErrorKind::IntegrityViolation
        );

        let (fixed, _) = recompute(&movements, &projection, &RecomputeScope::all());
        assert!(check_integrity(&movements, &fixed, &codes()).is_consistent());
    }

    #[test]
    fn stored_rows_missing_from_ledger_are_reported() {
        let mut projection = StockProjection::new();
        projection.set(crate::projection::ProjectionKey::loose(sku(), LocationId::new(1), None), 4);
        let report = check_integrity(&[], &projection, &codes());
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].difference, -4);
    }
}
