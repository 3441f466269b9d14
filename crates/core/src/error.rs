//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy shared by every layer of the warehouse core.
///
/// Domain crates expose their own named error enums; each of them reports
/// one of these kinds so callers (API layers, the admin CLI) can map
/// failures uniformly without matching on every variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A referenced location, container, movement or product is missing.
    NotFound,
    /// Uniqueness clash (qr code, location code) or a stale version.
    Conflict,
    /// A request broke a validation rule; the message names the rule.
    InvalidInput,
    /// The target is in a state that forbids the operation (blocked
    /// container, inactive location, disallowed status transition).
    StateConflict,
    /// Projection diverges from the ledger.
    IntegrityViolation,
    /// Storage failed underneath a transactional unit; nothing was applied.
    Operational,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::IntegrityViolation => "integrity_violation",
            ErrorKind::Operational => "operational",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malformed input caught before any state is read.
///
/// Crate-level error enums wrap this for their own validation paths; missing
/// rows, conflicts and state violations get named variants there instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_input_is_invalid_input() {
        assert_eq!(DomainError::validation("x").kind(), ErrorKind::InvalidInput);
        assert_eq!(DomainError::invalid_id("x").to_string(), "invalid identifier: x");
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorKind::StateConflict).unwrap();
        assert_eq!(json, "\"state_conflict\"");
        assert_eq!(ErrorKind::InvalidInput.to_string(), "invalid_input");
    }
}
