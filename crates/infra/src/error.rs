use thiserror::Error;

use wms_containers::ContainerError;
use wms_core::{DomainError, ErrorKind};
use wms_ledger::LedgerError;
use wms_locations::LocationError;

use crate::store::StoreError;

/// Error returned by the `Warehouse` service.
///
/// Domain failures keep their crate-level type; storage failures are folded
/// into `Concurrency` (stale write, retryable) or `Storage` (rolled back).
#[derive(Debug, Error)]
pub enum WmsError {
    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Invalid(#[from] DomainError),

    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl WmsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WmsError::Location(e) => e.kind(),
            WmsError::Ledger(e) => e.kind(),
            WmsError::Container(e) => e.kind(),
            WmsError::Invalid(e) => e.kind(),
            WmsError::Concurrency(_) => ErrorKind::Conflict,
            WmsError::Storage(_) => ErrorKind::Operational,
        }
    }
}

impl From<StoreError> for WmsError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Location(e) => WmsError::Location(e),
            StoreError::Ledger(e) => WmsError::Ledger(e),
            StoreError::Container(e) => WmsError::Container(e),
            StoreError::Concurrency(msg) => WmsError::Concurrency(msg),
            StoreError::Backend(msg) => WmsError::Storage(msg),
        }
    }
}
