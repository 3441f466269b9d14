use thiserror::Error;

use wms_core::{DomainError, ErrorKind, LocationId};

use crate::location::ZoneType;

/// Failures raised by the location hierarchy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LocationError {
    #[error("location '{0}' not found")]
    NotFound(String),

    #[error("parent location {0} not found")]
    ParentNotFound(LocationId),

    #[error("parent location '{0}' is inactive; children cannot be created under it")]
    ParentInactive(String),

    #[error("location '{0}' is inactive; nothing can be placed into it")]
    Inactive(String),

    #[error("parent location '{parent}' is at level {level}; the hierarchy allows at most {max} levels")]
    MaxDepthExceeded { parent: String, level: u8, max: u8 },

    #[error("location code '{0}' already exists")]
    DuplicateCode(String),

    #[error("no available {zone_type} location for product '{product_id}' (quantity {quantity})")]
    NoAvailableLocation {
        product_id: String,
        quantity: i64,
        zone_type: ZoneType,
    },

    #[error(transparent)]
    Invalid(#[from] DomainError),
}

impl LocationError {
    pub fn not_found(what: impl core::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LocationError::NotFound(_)
            | LocationError::ParentNotFound(_)
            | LocationError::NoAvailableLocation { .. } => ErrorKind::NotFound,
            LocationError::ParentInactive(_) | LocationError::Inactive(_) => {
                ErrorKind::StateConflict
            }
            LocationError::MaxDepthExceeded { .. } => ErrorKind::InvalidInput,
            LocationError::DuplicateCode(_) => ErrorKind::Conflict,
            LocationError::Invalid(e) => e.kind(),
        }
    }
}
