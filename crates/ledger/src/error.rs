use thiserror::Error;

use wms_core::{DomainError, ErrorKind, LocationId};

/// Failures raised while recording or auditing movements.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("invalid movement: {0}")]
    InvalidMovement(String),

    #[error("location {0} not found")]
    LocationNotFound(LocationId),

    #[error("location '{0}' is inactive; nothing can be moved into it")]
    LocationInactive(String),

    #[error(
        "insufficient stock of '{product_id}' at location {location_id}: on hand {on_hand}, requested {requested}"
    )]
    InsufficientStock {
        product_id: String,
        location_id: LocationId,
        on_hand: i64,
        requested: i64,
    },

    #[error("projection diverges from the ledger on {0} key(s)")]
    IntegrityViolation(usize),

    #[error(transparent)]
    Invalid(#[from] DomainError),
}

impl LedgerError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidMovement(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidMovement(_) | LedgerError::InsufficientStock { .. } => {
                ErrorKind::InvalidInput
            }
            LedgerError::LocationNotFound(_) => ErrorKind::NotFound,
            LedgerError::LocationInactive(_) => ErrorKind::StateConflict,
            LedgerError::IntegrityViolation(_) => ErrorKind::IntegrityViolation,
            LedgerError::Invalid(e) => e.kind(),
        }
    }
}
