use thiserror::Error;

use wms_core::{DomainError, ErrorKind};
use wms_locations::LocationError;

use crate::status::ContainerStatus;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContainerError {
    #[error("container '{0}' not found")]
    NotFound(String),

    #[error("container with qr code '{0}' already exists")]
    AlreadyExists(String),

    #[error("qr code '{given}' does not match container '{expected}'")]
    QrMismatch { expected: String, given: String },

    #[error("container '{0}' is blocked")]
    Blocked(String),

    #[error(
        "container holds {available} of '{product_id}'{}, requested {requested}",
        .batch.as_deref().map(|b| format!(" (batch {b})")).unwrap_or_default()
    )]
    InsufficientQuantity {
        product_id: String,
        batch: Option<String>,
        available: i64,
        requested: i64,
    },

    #[error("product '{product_id}' is held in several batches ({}); a batch must be given", .batches.join(", "))]
    AmbiguousBatch {
        product_id: String,
        batches: Vec<String>,
    },

    #[error("container status cannot change from {from} to {to}")]
    InvalidTransition {
        from: ContainerStatus,
        to: ContainerStatus,
    },

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Invalid(#[from] DomainError),
}

impl ContainerError {
    pub fn not_found(what: impl core::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ContainerError::NotFound(_) => ErrorKind::NotFound,
            ContainerError::AlreadyExists(_) => ErrorKind::Conflict,
            ContainerError::QrMismatch { .. }
            | ContainerError::InsufficientQuantity { .. }
            | ContainerError::AmbiguousBatch { .. } => ErrorKind::InvalidInput,
            ContainerError::Blocked(_) | ContainerError::InvalidTransition { .. } => {
                ErrorKind::StateConflict
            }
            ContainerError::Location(e) => e.kind(),
            ContainerError::Invalid(e) => e.kind(),
        }
    }
}
